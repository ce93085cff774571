//! Passport Command Line Interface
//!
//! Runs the upload-session steps against local files.
//!
//! # Usage
//!
//! ```bash
//! # List mappable groups and field paths
//! dpp_cli schema
//!
//! # Show the header of a source file
//! dpp_cli columns parts.csv
//!
//! # Check a mapping without building anything
//! dpp_cli resolve parts.csv --mapping mapping.yaml
//!
//! # Build, publish and encode every row
//! dpp_cli generate parts.csv --mapping mapping.yaml --config dpp.yaml
//!
//! # Print a published document
//! dpp_cli show 3f2c6a1e-0d8b-4a57-9a53-1f7d0c1e5b2a
//! ```
//!
//! A mapping file is YAML (or JSON) from target to column:
//!
//! ```yaml
//! identification: Part Name
//! characteristics.physicalDimension.weight.value: Weight
//! circularity: ~
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use dpp_mapper::pipeline::GenerationReport;
use dpp_mapper::{dpp_schema, DppConfig, FieldMapping, MappingPolicy, Pipeline, RowStatus};

#[derive(Parser)]
#[command(name = "dpp_cli")]
#[command(version)]
#[command(about = "Map CSV rows to Digital Product Passport documents and QR codes")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (YAML). Falls back to DPP_CONFIG and DPP_* variables.
    #[arg(long, short, global = true, env = "DPP_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', global = true, default_value = "pretty", value_enum)]
    format: OutputFormat,

    /// Reject mappings that leave a group unmapped
    #[arg(long, global = true)]
    strict: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// List schema groups and their field paths
    Schema,

    /// Show the header of a source file
    Columns {
        /// Source file
        source: PathBuf,
    },

    /// Validate a mapping against a source file
    Resolve {
        /// Source file
        source: PathBuf,

        /// Mapping file (YAML or JSON)
        #[arg(short, long)]
        mapping: PathBuf,
    },

    /// Build, publish and encode every row of a source file
    Generate {
        /// Source file
        source: PathBuf,

        /// Mapping file (YAML or JSON)
        #[arg(short, long)]
        mapping: PathBuf,

        /// Override the content directory
        #[arg(long)]
        content_dir: Option<PathBuf>,
    },

    /// Print a published document
    Show {
        /// Document identifier
        id: String,
    },
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dpp_mapper=warn")),
        )
        .init();

    let result = load_config(&cli).and_then(|config| match cli.command {
        Commands::Schema => cmd_schema(cli.format),
        Commands::Columns { ref source } => cmd_columns(&config, source, cli.format),
        Commands::Resolve {
            ref source,
            ref mapping,
        } => cmd_resolve(&config, source, mapping, cli.format),
        Commands::Generate {
            ref source,
            ref mapping,
            ref content_dir,
        } => {
            let config = match content_dir {
                Some(dir) => config.with_content_dir(dir),
                None => config,
            };
            cmd_generate(&config, source, mapping, cli.format)
        }
        Commands::Show { ref id } => cmd_show(&config, id),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.format == OutputFormat::Json {
                println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
            } else {
                eprintln!("{}: {:#}", "error".red().bold(), e);
            }
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<DppConfig> {
    let config = match &cli.config {
        Some(path) => DppConfig::from_file(path)?
            .apply_env(|key| std::env::var(key).ok())
            .context("applying DPP_* overrides")?,
        None => DppConfig::from_env()?,
    };
    Ok(if cli.strict {
        config.with_mapping_policy(MappingPolicy::Strict)
    } else {
        config
    })
}

fn load_mapping(path: &Path) -> anyhow::Result<FieldMapping> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&content).with_context(|| format!("parsing mapping {}", path.display()))
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// COMMAND IMPLEMENTATIONS
// =============================================================================

fn cmd_schema(format: OutputFormat) -> anyhow::Result<()> {
    let fields = dpp_schema().fields();
    if format == OutputFormat::Json {
        return print_json(&fields);
    }
    for group in fields {
        let marker = if group.required { " (required)" } else { "" };
        println!("{}{}", group.name.bold(), marker.dimmed());
        for field in group.fields {
            let list = if field.list { "[]" } else { "" };
            println!("  {} {}{}", field.path, field.kind.as_str().cyan(), list);
        }
    }
    Ok(())
}

fn cmd_columns(config: &DppConfig, source: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let pipeline = Pipeline::with_store(config, noop_store())?;
    let listing = pipeline.columns(source)?;
    if format == OutputFormat::Json {
        return print_json(&listing);
    }
    println!(
        "{} {} ({} data rows)",
        "source".bold(),
        listing.source,
        listing.rows
    );
    for (i, column) in listing.columns.iter().enumerate() {
        println!("  [{}] {}", i, column);
    }
    Ok(())
}

fn cmd_resolve(
    config: &DppConfig,
    source: &Path,
    mapping: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::with_store(config, noop_store())?;
    let mapping = load_mapping(mapping)?;
    let resolved = pipeline.resolve(source, &mapping)?;
    if format == OutputFormat::Json {
        return print_json(&resolved);
    }
    println!("{} {} targets mapped", "OK".green(), resolved.targets().len());
    for target in resolved.targets() {
        println!("  {} <- {}", target.target, target.column);
    }
    for group in resolved.unmapped_groups() {
        println!("  {} {}", "unmapped".yellow(), group);
    }
    Ok(())
}

fn cmd_generate(
    config: &DppConfig,
    source: &Path,
    mapping: &Path,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let mapping = load_mapping(mapping)?;
    let report = pipeline.generate(source, &mapping)?;
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &GenerationReport) {
    for row in &report.rows {
        let status = match row.status {
            RowStatus::FullyBuilt => row.status.to_string().green(),
            RowStatus::BuiltWithFailures(_) => row.status.to_string().yellow(),
            RowStatus::Unbuildable => row.status.to_string().red(),
        };
        let id = row
            .document_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("row {:>5}  {:<30} {}", row.row, status, id);
        for failure in row.outcome.failures() {
            println!("           {}", failure.to_string().dimmed());
        }
        for error in row.publish_error.iter().chain(row.code_error.iter()) {
            println!("           {}", error.red());
        }
    }
    let s = &report.summary;
    println!(
        "\n{} rows: {} fully built, {} with failures, {} unbuildable; {} published, {} codes",
        s.build.total.to_string().bold(),
        s.build.fully_built,
        s.build.built_with_failures,
        s.build.unbuildable,
        s.published,
        s.codes
    );
}

fn cmd_show(config: &DppConfig, id: &str) -> anyhow::Result<()> {
    let pipeline = Pipeline::from_config(config)?;
    let bytes = pipeline.document(id)?;
    println!("{}", String::from_utf8_lossy(&bytes));
    Ok(())
}

/// Store for commands that never publish
fn noop_store() -> std::sync::Arc<dyn dpp_mapper::DocumentStore> {
    std::sync::Arc::new(dpp_mapper::MemoryDocumentStore::new())
}
