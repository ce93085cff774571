//! Upload-session pipeline
//!
//! Glue between the components for one upload session:
//!
//! ```text
//! source file ─► load ─► resolve mapping ─► build rows (parallel)
//!                             │                  │
//!                   fail fast on bad mapping     ▼
//!                                   publish ─► encode ─► attach code
//! ```
//!
//! Session-level problems (unreadable source, bad mapping) return `Err`.
//! Everything after that is reported per row in a [`GenerationReport`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{build_batch, BatchSummary, BuildOutcome, RowStatus};
use crate::config::DppConfig;
use crate::encode::{CodeEncoder, CodePayloadMode};
use crate::error::{DppError, MappingError, PublishError, SourceError};
use crate::mapping::{resolve, FieldMapping, MappingPolicy, ResolvedMapping};
use crate::publish::{DocumentId, DocumentPublisher, DocumentStore, FsDocumentStore};
use crate::schema::{dpp_schema, Schema};
use crate::source::{self, SourceOptions, SourceTable};

/// Source header plus the groups an operator can map to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnListing {
    pub source: String,
    pub columns: Vec<String>,
    pub groups: Vec<String>,
    pub rows: usize,
}

/// Fate of one input row
#[derive(Debug, Clone, Serialize)]
pub struct RowReport {
    pub row: usize,
    pub status: RowStatus,
    pub outcome: BuildOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<DocumentId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_error: Option<String>,
}

/// Batch totals including publishing and code generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenerationSummary {
    #[serde(flatten)]
    pub build: BatchSummary,
    pub published: usize,
    pub codes: usize,
}

/// Complete accounting of a generation request, rows in input order
#[derive(Debug, Clone, Serialize)]
pub struct GenerationReport {
    pub source: String,
    pub unmapped_groups: Vec<String>,
    pub rows: Vec<RowReport>,
    pub summary: GenerationSummary,
}

/// Configured pipeline. Shareable across sessions.
#[derive(Debug, Clone)]
pub struct Pipeline {
    schema: &'static Schema,
    source: SourceOptions,
    source_dir: PathBuf,
    policy: MappingPolicy,
    publisher: DocumentPublisher,
    encoder: CodeEncoder,
    payload: CodePayloadMode,
}

impl Pipeline {
    /// Pipeline with a filesystem store at `content_dir`
    pub fn from_config(config: &DppConfig) -> Result<Self, DppError> {
        let store = FsDocumentStore::open(&config.content_dir)?;
        Self::with_store(config, Arc::new(store))
    }

    /// Pipeline over any document store
    pub fn with_store(config: &DppConfig, store: Arc<dyn DocumentStore>) -> Result<Self, DppError> {
        Ok(Self {
            schema: dpp_schema(),
            source: config.source.clone(),
            source_dir: config.source_dir.clone(),
            policy: config.mapping_policy,
            publisher: DocumentPublisher::new(store),
            encoder: CodeEncoder::new(config.code.options.clone())?,
            payload: config.code.payload.clone(),
        })
    }

    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    pub fn publisher(&self) -> &DocumentPublisher {
        &self.publisher
    }

    /// Resolve a caller-supplied source name inside `source_dir`
    pub fn source_path(&self, name: &str) -> Result<PathBuf, SourceError> {
        let relative = Path::new(name);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined || name.trim().is_empty() {
            return Err(SourceError::OutsideSourceDir {
                path: relative.to_path_buf(),
            });
        }
        Ok(self.source_dir.join(relative))
    }

    pub fn load(&self, path: &Path) -> Result<SourceTable, SourceError> {
        source::load(path, &self.source)
    }

    /// Header and mappable groups for a stored source
    pub fn columns(&self, path: &Path) -> Result<ColumnListing, DppError> {
        let table = self.load(path)?;
        Ok(ColumnListing {
            source: table.name().to_string(),
            columns: table.columns().to_vec(),
            groups: self.schema.group_names().map(str::to_string).collect(),
            rows: table.len(),
        })
    }

    /// Mapping-resolution request for a stored source
    pub fn resolve(&self, path: &Path, mapping: &FieldMapping) -> Result<ResolvedMapping, DppError> {
        let table = self.load(path)?;
        Ok(self.resolve_table(&table, mapping)?)
    }

    pub fn resolve_table(
        &self,
        table: &SourceTable,
        mapping: &FieldMapping,
    ) -> Result<ResolvedMapping, Vec<MappingError>> {
        resolve(mapping, table.columns(), self.schema, self.policy)
    }

    /// Generation request for a stored source
    pub fn generate(&self, path: &Path, mapping: &FieldMapping) -> Result<GenerationReport, DppError> {
        let table = self.load(path)?;
        self.generate_table(&table, mapping)
    }

    /// Generation request for an already loaded source
    pub fn generate_table(
        &self,
        table: &SourceTable,
        mapping: &FieldMapping,
    ) -> Result<GenerationReport, DppError> {
        let resolved = self.resolve_table(table, mapping)?;
        let outcomes = build_batch(table.rows(), &resolved, self.schema);
        let build = BatchSummary::from_outcomes(&outcomes);

        let rows: Vec<RowReport> = outcomes
            .into_par_iter()
            .map(|outcome| self.publish_row(outcome))
            .collect();

        let summary = GenerationSummary {
            build,
            published: rows.iter().filter(|r| r.document_id.is_some()).count(),
            codes: rows.iter().filter(|r| r.code_path.is_some()).count(),
        };

        info!(
            source = table.name(),
            rows = summary.build.total,
            published = summary.published,
            codes = summary.codes,
            "generation request complete"
        );

        Ok(GenerationReport {
            source: table.name().to_string(),
            unmapped_groups: resolved.unmapped_groups().to_vec(),
            rows,
            summary,
        })
    }

    /// Retrieval request
    pub fn document(&self, id: &str) -> Result<Vec<u8>, PublishError> {
        self.publisher.get(id)
    }

    fn publish_row(&self, outcome: BuildOutcome) -> RowReport {
        let mut report = RowReport {
            row: outcome.row(),
            status: outcome.status(),
            outcome,
            document_id: None,
            digest: None,
            code_path: None,
            publish_error: None,
            code_error: None,
        };

        let Some(record) = report.outcome.record() else {
            return report;
        };

        let document = match self.publisher.publish(record) {
            Ok(document) => document,
            Err(e) => {
                warn!(row = report.row, error = %e, "publishing failed");
                report.publish_error = Some(e.to_string());
                return report;
            }
        };
        report.document_id = Some(document.id);
        report.digest = Some(document.digest.clone());

        let code = self
            .encoder
            .encode(&self.payload.payload(&document))
            .map_err(DppError::from)
            .and_then(|artifact| Ok(self.publisher.attach_code(&document.id, &artifact.png)?));
        match code {
            Ok(path) => report.code_path = Some(path),
            Err(e) => {
                warn!(row = report.row, document_id = %document.id, error = %e, "code generation failed");
                report.code_error = Some(e.to_string());
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::CodeOptions;
    use crate::publish::MemoryDocumentStore;
    use crate::source::load_bytes;

    fn pipeline(config: DppConfig) -> (Pipeline, Arc<MemoryDocumentStore>) {
        let store = Arc::new(MemoryDocumentStore::new());
        (Pipeline::with_store(&config, store.clone()).unwrap(), store)
    }

    #[test]
    fn test_source_path_is_confined() {
        let (p, _) = pipeline(DppConfig::default().with_source_dir("/srv/uploads"));
        assert_eq!(
            p.source_path("parts.csv").unwrap(),
            PathBuf::from("/srv/uploads/parts.csv")
        );
        assert!(p.source_path("../secrets.csv").is_err());
        assert!(p.source_path("/etc/passwd").is_err());
        assert!(p.source_path("").is_err());
    }

    #[test]
    fn test_bad_mapping_fails_before_any_row() {
        let (p, store) = pipeline(DppConfig::default());
        let table = load_bytes("t.csv", b"name\nA\nB\n", &SourceOptions::default()).unwrap();
        let err = p
            .generate_table(&table, &FieldMapping::new().with("identification", "nmae"))
            .unwrap_err();
        assert!(matches!(err, DppError::Mapping(ref errors) if errors.len() == 1));
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn test_code_failure_is_per_row() {
        let config = DppConfig::default().with_code_options(CodeOptions {
            version: Some(1),
            ..CodeOptions::default()
        });
        let (p, store) = pipeline(config);
        let table = load_bytes("t.csv", b"name\nA\n", &SourceOptions::default()).unwrap();
        let report = p
            .generate_table(&table, &FieldMapping::new().with("identification", "name"))
            .unwrap();

        let row = &report.rows[0];
        assert!(row.document_id.is_some());
        assert!(row.code_path.is_none());
        assert!(row.code_error.as_deref().unwrap().contains("does not fit"));
        assert_eq!(store.document_count(), 1);
        assert_eq!(report.summary.published, 1);
        assert_eq!(report.summary.codes, 0);
    }

    #[test]
    fn test_link_mode_fits_small_codes() {
        let config = DppConfig::default()
            .with_payload_mode(CodePayloadMode::Link {
                base_url: "https://dpp.example.com".to_string(),
            })
            .with_code_options(CodeOptions {
                version: Some(10),
                ..CodeOptions::default()
            });
        let (p, store) = pipeline(config);
        let table = load_bytes("t.csv", b"name\nA\n", &SourceOptions::default()).unwrap();
        let report = p
            .generate_table(&table, &FieldMapping::new().with("identification", "name"))
            .unwrap();

        let id = report.rows[0].document_id.unwrap();
        assert!(report.rows[0].code_error.is_none());
        assert!(store.code(&id).is_some());
    }
}
