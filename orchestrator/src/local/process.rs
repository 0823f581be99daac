//! External process collaborators: the quality validator and the trainer.
//!
//! Children are spawned with `kill_on_drop(true)`, so a timeout or a
//! cancelled caller never leaves an orphaned process behind.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::collaborators::{
    CollabResult, ExecOutput, ExecRequest, Executor, QualityValidator, TrainerReport, Trainer,
    ValidationReport,
};
use crate::config::CommandSpec;
use crate::error::CollaboratorError;
use crate::training::metrics::parse_metrics;
use crate::types::ValidationStatus;

/// Runs one configured command per call.
pub struct ProcessExecutor {
    spec: CommandSpec,
}

impl ProcessExecutor {
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec }
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, request: &ExecRequest) -> CollabResult<ExecOutput> {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .arg(&request.input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn().map_err(|e| {
            CollaboratorError::Unavailable(format!("failed to spawn {}: {}", self.spec.program, e))
        })?;

        debug!(program = %self.spec.program, input = %request.input.display(), "Spawned process");

        let timeout = self.spec.timeout();
        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                // The child was owned by the dropped future and has been killed.
                warn!(program = %self.spec.program, ?timeout, "Process timed out");
                return Err(CollaboratorError::Timeout(timeout));
            }
        };

        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Validator backed by an external script printing one JSON verdict.
pub struct ProcessQualityValidator {
    executor: Arc<dyn Executor>,
}

impl ProcessQualityValidator {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl QualityValidator for ProcessQualityValidator {
    async fn validate(&self, path: &Path) -> CollabResult<ValidationReport> {
        let output = self
            .executor
            .run(&ExecRequest {
                input: path.to_path_buf(),
                working_dir: None,
            })
            .await?
            .into_success()?;

        parse_validation_output(&output.stdout)
    }
}

/// Parse the validator's JSON verdict.
///
/// The verdict is the whole of stdout, or failing that its last line that
/// looks like a JSON object. `{"error": ...}` is malformed output.
pub fn parse_validation_output(stdout: &str) -> CollabResult<ValidationReport> {
    let trimmed = stdout.trim();
    let value: serde_json::Value = serde_json::from_str(trimmed)
        .ok()
        .or_else(|| {
            trimmed
                .lines()
                .rev()
                .map(str::trim)
                .find(|l| l.starts_with('{'))
                .and_then(|l| serde_json::from_str(l).ok())
        })
        .ok_or_else(|| CollaboratorError::MalformedOutput("validator printed no JSON verdict".to_string()))?;

    if let Some(error) = value.get("error") {
        return Err(CollaboratorError::MalformedOutput(format!("validator error: {}", error)));
    }

    let quality = match value.get("quality").and_then(|q| q.as_str()) {
        Some(q) if q.eq_ignore_ascii_case("valid") => ValidationStatus::Valid,
        Some(q) if q.eq_ignore_ascii_case("invalid") || q.eq_ignore_ascii_case("bad") => {
            ValidationStatus::Invalid
        }
        other => {
            return Err(CollaboratorError::MalformedOutput(format!(
                "unknown quality verdict: {:?}",
                other
            )))
        }
    };

    let issues = value
        .get("issues")
        .and_then(|i| i.as_array())
        .map(|items| {
            items
                .iter()
                .map(|i| match i.as_str() {
                    Some(s) => s.to_string(),
                    None => i.to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    Ok(ValidationReport {
        quality,
        issues,
        stats: value.get("stats").cloned(),
    })
}

/// Trainer backed by an external script printing `Name: value` metric lines.
pub struct ProcessTrainer {
    executor: Arc<dyn Executor>,
}

impl ProcessTrainer {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Trainer for ProcessTrainer {
    async fn train(&self, input: &Path, working_dir: &Path) -> CollabResult<TrainerReport> {
        let output = self
            .executor
            .run(&ExecRequest {
                input: input.to_path_buf(),
                working_dir: Some(working_dir.to_path_buf()),
            })
            .await?
            .into_success()?;

        Ok(TrainerReport {
            metrics: parse_metrics(&output.stdout),
            stdout: output.stdout,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    #[test]
    fn test_parse_valid_verdict() {
        let report = parse_validation_output(
            r#"{"quality": "VALID", "issues": [], "stats": {"rows": 10}}"#,
        )
        .unwrap();
        assert_eq!(report.quality, ValidationStatus::Valid);
        assert_eq!(report.stats.unwrap()["rows"], 10);
    }

    #[test]
    fn test_parse_verdict_after_log_noise() {
        let stdout = "loading file...\n{\"quality\": \"INVALID\", \"issues\": [\"Missing values: 40%\"]}\n";
        let report = parse_validation_output(stdout).unwrap();
        assert_eq!(report.quality, ValidationStatus::Invalid);
        assert_eq!(report.issues, vec!["Missing values: 40%"]);
    }

    #[test]
    fn test_parse_error_verdict_is_malformed() {
        let err = parse_validation_output(r#"{"error": "Unsupported file format"}"#).unwrap_err();
        assert!(matches!(err, CollaboratorError::MalformedOutput(_)));

        assert!(parse_validation_output("not json").is_err());
        assert!(parse_validation_output(r#"{"quality": "MAYBE"}"#).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executor_captures_output() {
        let executor = ProcessExecutor::new(CommandSpec::new("sh", &["-c", "echo ok; echo oops >&2; exit 3", "sh"], 10));
        let output = executor
            .run(&ExecRequest {
                input: PathBuf::from("ignored"),
                working_dir: None,
            })
            .await
            .unwrap();

        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "ok");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(output.into_success().is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_executor_enforces_timeout() {
        let executor = ProcessExecutor::new(CommandSpec::new("sh", &["-c", "sleep 30", "sh"], 1));
        let started = Instant::now();
        let err = executor
            .run(&ExecRequest {
                input: PathBuf::from("ignored"),
                working_dir: None,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CollaboratorError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
