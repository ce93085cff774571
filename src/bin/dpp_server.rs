//! Passport web server
//!
//! Serves the upload-session API and the retrieval endpoint.
//!
//! Configuration comes from `DPP_CONFIG` (YAML) and `DPP_*` overrides;
//! see [`dpp_mapper::DppConfig::from_env`].

use anyhow::Context;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dpp_mapper::api::{create_router, AppState};
use dpp_mapper::{DppConfig, Pipeline};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dpp_mapper=info,dpp_server=info,tower_http=debug")),
        )
        .init();

    let config = DppConfig::from_env().context("loading configuration")?;
    info!(
        content_dir = %config.content_dir.display(),
        source_dir = %config.source_dir.display(),
        policy = ?config.mapping_policy,
        "configuration loaded"
    );

    let pipeline = Pipeline::from_config(&config).context("initialising pipeline")?;

    let app = create_router(AppState::new(pipeline)).layer(
        ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        ),
    );

    info!("Starting server on {}", config.server.bind);
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    axum::serve(listener, app).await?;

    Ok(())
}
