//! Node configuration

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use purechain_orchestrator::{ContributorProfile, OrchestratorConfig};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    /// Contributor profiles keyed by identity token
    #[serde(default)]
    pub identities: HashMap<String, ContributorProfile>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Root for the ledger journal, blobs, audit log, staging and models
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Ledger address used to attribute training runs
    #[serde(default = "default_admin_account")]
    pub admin_account: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// JSON-lines file receiving a copy of every outgoing message
    #[serde(default)]
    pub outbox: Option<PathBuf>,
}

// Defaults
fn default_data_dir() -> PathBuf { PathBuf::from("/var/lib/purechain") }
fn default_admin_account() -> String { "admin".to_string() }

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            admin_account: default_admin_account(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn ledger_journal(&self) -> PathBuf {
        self.node.data_dir.join("ledger.jsonl")
    }

    pub fn content_dir(&self) -> PathBuf {
        self.node.data_dir.join("content")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.node.data_dir.join("audit")
    }

    /// Orchestrator settings with staging, work and artifact dirs under the data dir.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        self.orchestrator.clone().with_data_dir(&self.node.data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.node.data_dir, PathBuf::from("/var/lib/purechain"));
        assert!(config.identities.is_empty());
        assert_eq!(config.ledger_journal(), PathBuf::from("/var/lib/purechain/ledger.jsonl"));
    }

    #[test]
    fn test_derived_paths_follow_data_dir() {
        let mut config = Config::default();
        config.node.data_dir = PathBuf::from("/srv/pc");

        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.submission.staging_dir, PathBuf::from("/srv/pc/staging"));
        assert_eq!(orchestrator.training.artifact_dir, PathBuf::from("/srv/pc/models"));
        assert_eq!(config.audit_dir(), PathBuf::from("/srv/pc/audit"));
    }
}
