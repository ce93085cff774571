//! Error handling for the passport pipeline
//!
//! Session-level failures (bad source file, bad mapping) abort a request and are
//! returned as `Err`. Field- and row-level failures are data: they live inside
//! [`crate::builder::BuildOutcome`] and never cross the batch boundary.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::encode::ErrorCorrection;

/// Main error type for the passport pipeline
#[derive(Error, Debug)]
pub enum DppError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Mapping rejected: {}", format_mapping_errors(.0))]
    Mapping(Vec<MappingError>),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("Encoding error: {0}")]
    Encode(#[from] EncodeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Vec<MappingError>> for DppError {
    fn from(errors: Vec<MappingError>) -> Self {
        DppError::Mapping(errors)
    }
}

fn format_mapping_errors(errors: &[MappingError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failures reading the tabular source. Fatal to the whole request.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Source file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Source '{name}' is not valid delimited text{}: {message}", .line.map(|l| format!(" (line {l})")).unwrap_or_default())]
    Format {
        name: String,
        line: Option<u64>,
        message: String,
    },

    #[error("Source '{name}' has a header but no data rows")]
    Empty { name: String },

    #[error("Source '{name}' is {size} bytes, limit is {limit}")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("Source '{name}' has more than {limit} data rows")]
    TooManyRows { name: String, limit: usize },

    #[error("Source path '{path}' is outside the source directory")]
    OutsideSourceDir { path: PathBuf },

    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Mapping resolution failures. Collected in full, then returned before any
/// row is processed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingError {
    #[error("'{group}' is mapped to column '{column}' which does not exist in the source")]
    UnknownColumn { group: String, column: String },

    #[error("'{group}' mapping to column '{column}' is ambiguous: {reason}")]
    AmbiguousMapping {
        group: String,
        column: String,
        reason: String,
    },

    #[error("'{target}' is not a schema group or field path")]
    UnknownTarget { target: String },

    #[error("Group '{group}' has no mapping (strict policy)")]
    UnmappedGroup { group: String },
}

impl MappingError {
    /// Mapping key the error is reported against.
    pub fn target(&self) -> &str {
        match self {
            MappingError::UnknownColumn { group, .. }
            | MappingError::AmbiguousMapping { group, .. }
            | MappingError::UnmappedGroup { group } => group,
            MappingError::UnknownTarget { target } => target,
        }
    }
}

/// Schema declaration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Group '{group}' is declared more than once")]
    DuplicateGroup { group: String },

    #[error("Path '{path}' is declared more than once in group '{group}'")]
    DuplicatePath { group: String, path: String },
}

/// Document store and publisher errors
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Document '{id}' not found")]
    NotFound { id: String },

    #[error("'{id}' is not a valid document identifier")]
    InvalidIdentifier { id: String },

    #[error("Document '{id}' already exists")]
    AlreadyExists { id: String },

    #[error("Could not allocate an unused document identifier after {attempts} attempts")]
    IdentifierExhausted { attempts: usize },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Code generation failures. Fatal only to the document being encoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Payload of {len} bytes does not fit a {} code at error correction {level:?}", .version.map(|v| format!("version {v}")).unwrap_or_else(|| "version 40".to_string()))]
    PayloadTooLarge {
        len: usize,
        version: Option<i16>,
        level: ErrorCorrection,
    },

    #[error("Invalid code options: {message}")]
    InvalidOptions { message: String },

    #[error("Code encoding failed: {message}")]
    Encoding { message: String },
}

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value '{value}' for {var}")]
    InvalidEnv { var: String, value: String },
}

pub type Result<T> = std::result::Result<T, DppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_errors_are_joined_in_display() {
        let err = DppError::from(vec![
            MappingError::UnknownColumn {
                group: "identification".to_string(),
                column: "nmae".to_string(),
            },
            MappingError::UnknownTarget {
                target: "colour".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("column 'nmae'"));
        assert!(text.contains("'colour' is not a schema group"));
    }

    #[test]
    fn test_mapping_error_serializes_with_kind_tag() {
        let err = MappingError::UnknownColumn {
            group: "metadata".to_string(),
            column: "meta".to_string(),
        };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "unknown_column");
        assert_eq!(json["column"], "meta");
        assert_eq!(err.target(), "metadata");
    }

    #[test]
    fn test_payload_too_large_names_version() {
        let err = EncodeError::PayloadTooLarge {
            len: 500,
            version: Some(1),
            level: ErrorCorrection::M,
        };
        assert!(err.to_string().contains("version 1"));
    }
}
