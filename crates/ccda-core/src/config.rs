//! Engine configuration and config file discovery

use crate::record::RecordKind;
use crate::source::Namespaces;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Config file names, in discovery priority order
pub const CONFIG_FILES: &[&str] = &["ccda.toml", ".ccdarc.json", "ccda.json"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read config '{}': {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config '{}': {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("unsupported config format '{}' (expected .toml or .json)", .path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Strategy for correlation ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Random v4 UUIDs
    #[default]
    Uuid,
    /// `1`, `2`, `3`, ... per document; reproducible output
    Sequential,
}

fn default_sections() -> Vec<RecordKind> {
    vec![
        RecordKind::Practitioner,
        RecordKind::Condition,
        RecordKind::AllergyIntolerance,
        RecordKind::Procedure,
        RecordKind::Observation,
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub id_strategy: IdStrategy,
    /// Section converters to register, in invocation order
    pub sections: Vec<RecordKind>,
    /// Extra prefix bindings for path queries
    pub namespaces: BTreeMap<String, String>,
    /// Treat accumulated errors as failure
    pub strict: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            id_strategy: IdStrategy::default(),
            sections: default_sections(),
            namespaces: BTreeMap::new(),
            strict: false,
        }
    }
}

impl EngineConfig {
    /// CDA prefix table extended with the configured bindings
    pub fn namespace_table(&self) -> Namespaces {
        let mut table = Namespaces::cda();
        for (prefix, uri) in &self.namespaces {
            table.insert(prefix.as_str(), uri.as_str());
        }
        table
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
    }
}

/// Configuration loader for discovering and loading config files
pub struct ConfigLoader;

impl ConfigLoader {
    /// Search `start_path` and its ancestors for the first known config file
    pub fn auto_discover(start_path: &Path) -> Result<Option<PathBuf>> {
        let mut current = start_path
            .canonicalize()
            .map_err(|source| ConfigError::Read {
                path: start_path.to_path_buf(),
                source,
            })?;

        loop {
            for filename in CONFIG_FILES {
                let candidate = current.join(filename);
                if candidate.is_file() {
                    debug!("Found config: {}", candidate.display());
                    return Ok(Some(candidate));
                }
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }

        Ok(None)
    }

    /// Load a TOML or JSON config file
    pub fn load_from_file(path: &Path) -> Result<EngineConfig> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Load from `custom_path`, or discover upward from `start_dir`
    ///
    /// Without an explicit path and without a discovered file the defaults apply.
    pub fn load(custom_path: Option<&Path>, start_dir: Option<&Path>) -> Result<EngineConfig> {
        if let Some(path) = custom_path {
            if !path.exists() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            return Self::load_from_file(path);
        }

        let search_dir = start_dir.unwrap_or_else(|| Path::new("."));
        match Self::auto_discover(search_dir)? {
            Some(path) => Self::load_from_file(&path),
            None => {
                debug!("No config file found, using defaults");
                Ok(EngineConfig::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ccda.toml");
        fs::write(
            &path,
            r#"
id_strategy = "sequential"
sections = ["Condition"]
strict = true

[namespaces]
ext = "urn:example:ext"
"#,
        )
        .unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.id_strategy, IdStrategy::Sequential);
        assert_eq!(config.sections, vec![RecordKind::Condition]);
        assert!(config.strict);
        assert_eq!(
            config.namespace_table().resolve("ext"),
            Some("urn:example:ext")
        );
    }

    #[test]
    fn test_load_json_uses_defaults_for_missing_fields() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(".ccdarc.json");
        fs::write(&path, r#"{ "strict": true }"#).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert!(config.strict);
        assert_eq!(config.sections, default_sections());
        assert_eq!(config.id_strategy, IdStrategy::Uuid);
    }

    #[test]
    fn test_auto_discover_walks_upward() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(temp_dir.path().join("ccda.json"), "{}").unwrap();

        let found = ConfigLoader::auto_discover(&nested).unwrap().unwrap();
        assert!(found.ends_with("ccda.json"));
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let result = ConfigLoader::load(Some(Path::new("/nonexistent/ccda.toml")), None);
        assert!(matches!(result, Err(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_unknown_section_kind_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ccda.json");
        fs::write(&path, r#"{ "sections": ["Encounter"] }"#).unwrap();

        assert!(matches!(
            ConfigLoader::load_from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let rendered = EngineConfig::default().to_toml_string().unwrap();
        let parsed: EngineConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, EngineConfig::default());
    }
}
