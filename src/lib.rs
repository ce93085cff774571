//! DPP Mapper - CSV to Digital Product Passport records
//!
//! Turns rows of an uploaded delimited file into passport records using an
//! operator-chosen column mapping, publishes each record under a fresh
//! identifier and produces a QR code for it.
//!
//! ## Flow
//! Source -> Resolve mapping -> Build rows -> Publish -> Encode
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use dpp_mapper::{DppConfig, FieldMapping, Pipeline};
//!
//! let pipeline = Pipeline::from_config(&DppConfig::default())?;
//! let mapping = FieldMapping::new()
//!     .with("identification", "Part Name")
//!     .with("characteristics.physicalDimension.weight.value", "Weight");
//! let report = pipeline.generate(Path::new("data/uploads/parts.csv"), &mapping)?;
//! println!("{} of {} rows published", report.summary.published, report.summary.build.total);
//! # Ok::<(), dpp_mapper::DppError>(())
//! ```

// Core error handling
pub mod error;

// Target record shape
pub mod schema;

// Tabular input
pub mod source;

// Column mapping resolution
pub mod mapping;

// Row to record construction
pub mod builder;

// Deterministic serialization
pub mod canonical;

// Identifier assignment and storage
pub mod publish;

// QR code images
pub mod encode;

pub mod config;

// Upload-session orchestration
pub mod pipeline;

// REST API (when enabled)
#[cfg(feature = "server")]
pub mod api;

pub use builder::{build, build_batch, BatchSummary, BuildOutcome, RowStatus, TargetRecord};
pub use config::DppConfig;
pub use encode::{CodeEncoder, CodeOptions, CodePayloadMode, ErrorCorrection};
pub use error::{DppError, MappingError, PublishError, Result, SourceError};
pub use mapping::{resolve, FieldMapping, MappingPolicy, ResolvedMapping};
pub use pipeline::{GenerationReport, Pipeline};
pub use publish::{DocumentId, DocumentPublisher, DocumentStore, FsDocumentStore, MemoryDocumentStore};
pub use schema::{dpp_schema, FieldKind, Schema};
pub use source::{SourceOptions, SourceTable};
