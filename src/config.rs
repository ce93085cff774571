//! Pipeline configuration.
//!
//! One explicit object carries every directory, limit and encoder setting;
//! components receive what they need at construction.
//!
//! ```yaml
//! content_dir: data/passports
//! source_dir: data/uploads
//! mapping_policy: lenient
//! source:
//!   delimiter: ","
//!   max_bytes: 16777216
//!   max_rows: 100000
//! code:
//!   payload:
//!     mode: link
//!     base_url: https://dpp.example.com
//!   options:
//!     error_correction: M
//!     pixel_size: 10
//!     border: 5
//! server:
//!   bind: 0.0.0.0:3000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::encode::{CodeOptions, CodePayloadMode};
use crate::error::ConfigError;
use crate::mapping::MappingPolicy;
use crate::source::SourceOptions;

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DppConfig {
    /// Published documents and code images
    pub content_dir: PathBuf,
    /// Stored source files; request paths are confined here
    pub source_dir: PathBuf,
    pub source: SourceOptions,
    pub mapping_policy: MappingPolicy,
    pub code: CodeConfig,
    pub server: ServerConfig,
}

impl Default for DppConfig {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("data/passports"),
            source_dir: PathBuf::from("data/uploads"),
            source: SourceOptions::default(),
            mapping_policy: MappingPolicy::default(),
            code: CodeConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

/// Code generation settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodeConfig {
    pub payload: CodePayloadMode,
    pub options: CodeOptions,
}

/// HTTP adapter settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl DppConfig {
    /// Load config from a YAML (or JSON) file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Load `.env`, start from `DPP_CONFIG` (if set) and apply `DPP_*` overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let base = match std::env::var("DPP_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        base.apply_env(|key| std::env::var(key).ok())
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("DPP_CONTENT_DIR") {
            self.content_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("DPP_SOURCE_DIR") {
            self.source_dir = PathBuf::from(dir);
        }
        if let Some(policy) = lookup("DPP_MAPPING_POLICY") {
            self.mapping_policy = match policy.to_ascii_lowercase().as_str() {
                "lenient" => MappingPolicy::Lenient,
                "strict" => MappingPolicy::Strict,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        var: "DPP_MAPPING_POLICY".to_string(),
                        value: policy,
                    })
                }
            };
        }
        if let Some(base_url) = lookup("DPP_CODE_BASE_URL") {
            self.code.payload = CodePayloadMode::Link { base_url };
        }
        if let Some(bind) = lookup("DPP_BIND") {
            self.server.bind = bind;
        }
        if let Some(max) = lookup("DPP_MAX_SOURCE_BYTES") {
            self.source.max_bytes = max.parse().map_err(|_| ConfigError::InvalidEnv {
                var: "DPP_MAX_SOURCE_BYTES".to_string(),
                value: max,
            })?;
        }
        Ok(self)
    }

    pub fn with_content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.content_dir = dir.into();
        self
    }

    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }

    pub fn with_mapping_policy(mut self, policy: MappingPolicy) -> Self {
        self.mapping_policy = policy;
        self
    }

    pub fn with_payload_mode(mut self, mode: CodePayloadMode) -> Self {
        self.code.payload = mode;
        self
    }

    pub fn with_code_options(mut self, options: CodeOptions) -> Self {
        self.code.options = options;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::ErrorCorrection;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_follow_upload_flow() {
        let config = DppConfig::default();
        assert_eq!(config.mapping_policy, MappingPolicy::Lenient);
        assert_eq!(config.code.payload, CodePayloadMode::EmbedDocument);
        assert_eq!(config.code.options.pixel_size, 10);
        assert_eq!(config.code.options.border, 5);
        assert_eq!(config.source.delimiter, ',');
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
content_dir: /srv/dpp
mapping_policy: strict
code:
  payload:
    mode: link
    base_url: https://dpp.example.com
  options:
    error_correction: H
"#;
        let config: DppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.content_dir, PathBuf::from("/srv/dpp"));
        assert_eq!(config.source_dir, PathBuf::from("data/uploads"));
        assert_eq!(config.mapping_policy, MappingPolicy::Strict);
        assert_eq!(config.code.options.error_correction, ErrorCorrection::H);
        assert_eq!(config.code.options.pixel_size, 10);
        assert_eq!(
            config.code.payload,
            CodePayloadMode::Link {
                base_url: "https://dpp.example.com".to_string()
            }
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("DPP_CONTENT_DIR", "/tmp/out"),
            ("DPP_MAPPING_POLICY", "STRICT"),
            ("DPP_CODE_BASE_URL", "http://localhost:3000"),
        ]
        .into_iter()
        .collect();
        let config = DppConfig::default()
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.content_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.mapping_policy, MappingPolicy::Strict);
        assert!(matches!(config.code.payload, CodePayloadMode::Link { .. }));
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let err = DppConfig::default()
            .apply_env(|k| (k == "DPP_MAPPING_POLICY").then(|| "sometimes".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_from_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dpp.yaml");
        std::fs::write(&path, "mapping_policy: [not, a, policy]\n").unwrap();
        let err = DppConfig::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("dpp.yaml"));
    }
}
