use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_NAME: &str = "vellum.config.json";

/// Editor configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Name of this replica; seeds generated ids
    #[serde(default = "default_replica_id")]
    pub replica_id: String,

    /// Maximum number of undo levels (0 = unlimited)
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Fold repeated attribute writes within a transaction
    #[serde(default = "default_true")]
    pub merge_commands: bool,

    /// Recompute group frames at commit
    #[serde(default = "default_true")]
    pub frame_updates: bool,
}

fn default_replica_id() -> String {
    "local".to_string()
}

fn default_max_history() -> usize {
    100
}

fn default_true() -> bool {
    true
}

impl EditorConfig {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            Self::from_path(&config_path)
        } else {
            Ok(EditorConfig::default())
        }
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EditorConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn with_replica(mut self, replica_id: impl Into<String>) -> Self {
        self.replica_id = replica_id.into();
        self
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            replica_id: default_replica_id(),
            max_history: default_max_history(),
            merge_commands: true,
            frame_updates: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "replicaId": "alice",
            "maxHistory": 10,
            "mergeCommands": false
        }"#;

        let config: EditorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.replica_id, "alice");
        assert_eq!(config.max_history, 10);
        assert!(!config.merge_commands);
        assert!(config.frame_updates);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cwd = dir.path().to_str().unwrap();

        assert_eq!(EditorConfig::load(cwd).unwrap(), EditorConfig::default());

        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_NAME),
            r#"{"replicaId": "bob", "frameUpdates": false}"#,
        )
        .unwrap();
        let config = EditorConfig::load(cwd).unwrap();
        assert_eq!(config.replica_id, "bob");
        assert_eq!(config.max_history, 100);
        assert!(!config.frame_updates);
    }
}
