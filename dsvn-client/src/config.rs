//! Client configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default name of the working-copy administrative directory
pub const DEFAULT_ADMIN_DIR: &str = ".dsvn";

/// Settings shared by every operation a [`crate::Client`] runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Administrative directory name inside each working copy.
    #[serde(default = "default_admin_dir")]
    pub admin_dir: String,
    /// Commit author when no auth provider yields a username.
    pub default_author: Option<String>,
    /// Whether working-copy writes take the administrative lock.
    pub lock_working_copy: bool,
}

fn default_admin_dir() -> String {
    DEFAULT_ADMIN_DIR.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            admin_dir: default_admin_dir(),
            default_author: None,
            lock_working_copy: true,
        }
    }
}

impl ClientConfig {
    /// Load from a JSON file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read client config from {:?}", path))?;
        let config: ClientConfig =
            serde_json::from_str(&data).with_context(|| "Failed to parse client config JSON")?;
        Ok(config)
    }

    /// Save as JSON, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<()> {
        let tmp_path = path.with_extension("tmp");
        let data = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, &data)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.admin_dir, ".dsvn");
        assert!(config.default_author.is_none());
        assert!(config.lock_working_copy);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&dir.path().join("client.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        let config = ClientConfig {
            admin_dir: ".wc".to_string(),
            default_author: Some("jrandom".to_string()),
            lock_working_copy: false,
        };
        config.save(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(ClientConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_json_uses_default_admin_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, r#"{"default_author": null, "lock_working_copy": true}"#).unwrap();
        assert_eq!(ClientConfig::load(&path).unwrap().admin_dir, ".dsvn");
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, "not json").unwrap();
        assert!(ClientConfig::load(&path).is_err());
    }
}
