//! Configuration for the mock server.
//!
//! Defines where the document store lives and how resolution is logged.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration for the mock server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MockServerConfig {
    /// Document store settings
    #[serde(default)]
    pub store: StoreSettings,

    /// Directory receiving log backups
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            store: StoreSettings::default(),
            backup_dir: default_backup_dir(),
            settings: GlobalSettings::default(),
        }
    }
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

impl MockServerConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.store.path.as_os_str().is_empty() {
            anyhow::bail!("store.path cannot be empty");
        }
        if self.backup_dir.as_os_str().is_empty() {
            anyhow::bail!("backup_dir cannot be empty");
        }
        if self.settings.default_content_type.trim().is_empty() {
            anyhow::bail!("settings.default_content_type cannot be empty");
        }
        Ok(())
    }
}

/// Document store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSettings {
    /// Path of the JSON document holding `mocks` and `logs`
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./mocks.db.json")
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log all matched mocks
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log unmatched requests
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Append a request log entry for unmatched requests too
    #[serde(default = "default_true")]
    pub record_unmatched: bool,

    /// Content type used when a mock declares none
    #[serde(default = "default_content_type")]
    pub default_content_type: String,
}

fn default_true() -> bool {
    true
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            log_matches: true,
            log_unmatched: true,
            record_unmatched: true,
            default_content_type: default_content_type(),
        }
    }
}

fn default_content_type() -> String {
    "application/json".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
store:
  path: /var/lib/mockd/db.json
backup_dir: /var/backups/mockd
settings:
  log_matches: false
  record_unmatched: false
  default_content_type: text/plain
"#;
        let config: MockServerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.store.path, PathBuf::from("/var/lib/mockd/db.json"));
        assert_eq!(config.backup_dir, PathBuf::from("/var/backups/mockd"));
        assert!(!config.settings.log_matches);
        assert!(config.settings.log_unmatched);
        assert!(!config.settings.record_unmatched);
        assert_eq!(config.settings.default_content_type, "text/plain");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: MockServerConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.store.path, PathBuf::from("./mocks.db.json"));
        assert_eq!(config.backup_dir, PathBuf::from("./backups"));
        assert_eq!(config.settings.default_content_type, "application/json");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let yaml = r#"
settings:
  passthrough_unmatched: true
"#;
        assert!(serde_yaml::from_str::<MockServerConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_blank_content_type() {
        let mut config = MockServerConfig::default();
        config.settings.default_content_type = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mockd.yaml");
        std::fs::write(&path, "store:\n  path: data/db.json\n").unwrap();

        let config = MockServerConfig::from_file(&path).unwrap();
        assert_eq!(config.store.path, PathBuf::from("data/db.json"));
    }
}
