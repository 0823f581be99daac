//! Configuration for the PureChain orchestrators.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use purechain_ledger::DuplicateKey;

use crate::retry::RetryPolicy;
use crate::types::Sector;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Submission pipeline settings
    pub submission: SubmissionConfig,
    /// Retry policy for network collaborators
    pub retry: RetryPolicy,
    /// Receipt polling after a ledger call
    pub receipts: ReceiptPolling,
    /// Training pipeline settings
    pub training: TrainingConfig,
    /// External process commands
    pub process: ProcessConfig,
}

impl OrchestratorConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Point every on-disk location under one data directory.
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        self.submission.staging_dir = data_dir.join("staging");
        self.training.artifact_dir = data_dir.join("models");
        self.training.work_dir = data_dir.join("work");
        self
    }
}

/// Submission pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,
    /// Accepted file extensions, lowercase, without the dot
    pub allowed_extensions: Vec<String>,
    /// Penalty and duplicate rules
    pub policy: SubmissionPolicy,
    /// Where uploads are staged for validation
    pub staging_dir: PathBuf,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 10 * 1024 * 1024,
            allowed_extensions: vec!["csv".to_string(), "json".to_string(), "txt".to_string()],
            policy: SubmissionPolicy::default(),
            staging_dir: std::env::temp_dir().join("purechain").join("staging"),
        }
    }
}

impl SubmissionConfig {
    /// Whether a file name carries an accepted extension.
    pub fn accepts_file(&self, file_name: &str) -> bool {
        match std::path::Path::new(file_name).extension() {
            Some(ext) => {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                self.allowed_extensions.iter().any(|a| a.eq_ignore_ascii_case(&ext))
            }
            None => false,
        }
    }
}

/// How long to wait for a ledger receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiptPolling {
    pub attempts: u32,
    pub interval_ms: u64,
}

impl Default for ReceiptPolling {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval_ms: 200,
        }
    }
}

impl ReceiptPolling {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Reputation policy applied to submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionPolicy {
    /// Skip the penalty for an invalid first submission
    pub leniency_on_first_invalid: bool,
    /// What makes two submissions duplicates
    pub duplicate_key: DuplicateKey,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            leniency_on_first_invalid: true,
            duplicate_key: DuplicateKey::default(),
        }
    }
}

/// Model family, selecting the quality metric and target handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    #[default]
    Classification,
    Clustering,
}

impl ModelFamily {
    /// Metric compared against the performance floor.
    pub fn quality_metric(&self) -> &'static str {
        match self {
            Self::Classification => "f1_score",
            Self::Clustering => "silhouette_score",
        }
    }

    /// Clustering is unsupervised; the label column is not a feature.
    pub fn drops_target(&self) -> bool {
        matches!(self, Self::Clustering)
    }
}

/// Column layout expected for one sector's datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectorSchema {
    pub sector: Sector,
    /// Explicit feature columns; empty means the union of observed columns
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default = "default_target")]
    pub target: String,
}

fn default_target() -> String {
    "target".to_string()
}

impl SectorSchema {
    pub fn inferred(sector: Sector) -> Self {
        Self {
            sector,
            features: Vec::new(),
            target: default_target(),
        }
    }
}

/// Names of the files the trainer leaves in its working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactNames {
    pub model: String,
    pub scaler: String,
}

impl Default for ArtifactNames {
    fn default() -> Self {
        Self {
            model: "model.pkl".to_string(),
            scaler: "scaler.pkl".to_string(),
        }
    }
}

/// Training pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Minimum usable rows (and valid submissions) to train
    pub min_rows: usize,
    /// Quality metric below this is LOW_PERFORMANCE
    pub performance_floor: f64,
    /// Root of the versioned artifact tree
    pub artifact_dir: PathBuf,
    /// Scratch space for per-run working directories
    pub work_dir: PathBuf,
    /// Operator address for low-performance alerts
    pub operator_contact: Option<String>,
    /// Family per model id
    pub model_families: HashMap<String, ModelFamily>,
    /// Family for model ids not listed above
    pub default_family: ModelFamily,
    pub sector_schemas: Vec<SectorSchema>,
    pub artifact_names: ArtifactNames,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        let root = std::env::temp_dir().join("purechain");
        Self {
            min_rows: 2,
            performance_floor: 0.7,
            artifact_dir: root.join("models"),
            work_dir: root.join("work"),
            operator_contact: None,
            model_families: HashMap::new(),
            default_family: ModelFamily::default(),
            sector_schemas: Vec::new(),
            artifact_names: ArtifactNames::default(),
        }
    }
}

impl TrainingConfig {
    pub fn family_for(&self, model_id: &str) -> ModelFamily {
        self.model_families
            .get(model_id)
            .copied()
            .unwrap_or(self.default_family)
    }

    pub fn schema_for(&self, sector: Sector) -> SectorSchema {
        self.sector_schemas
            .iter()
            .find(|s| s.sector == sector)
            .cloned()
            .unwrap_or_else(|| SectorSchema::inferred(sector))
    }
}

/// An external command. The input path is appended as the last argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Wall-clock limit for one invocation
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str], timeout_secs: u64) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Commands for the quality validator and the trainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    pub validator: CommandSpec,
    pub trainer: CommandSpec,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            validator: CommandSpec::new("python3", &["scripts/validate.py"], 120),
            trainer: CommandSpec::new("python3", &["scripts/train.py"], 1800),
        }
    }
}
