//! Training orchestration.

use chrono::Utc;
use futures::future::join_all;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{info, warn};

use purechain_ledger::EventPayload;

use crate::collaborators::{TrainerReport, TrainingCollaborators};
use crate::config::OrchestratorConfig;
use crate::error::{CollaboratorError, OrchestratorError, Result, Step};
use crate::messages::{self, Message};
use crate::retry::retry_with_backoff;
use crate::steps::{confirm_commit, deliver, from_retry, mirror_events};
use crate::types::{
    ArtifactPaths, NotificationFailure, RecordOutcome, SkippedBlob, SubmissionQuery, SubmissionRecord,
    TrainingOutcome, TrainingRequest, TrainingRun, TrainingStatus,
};

use super::artifacts::{publish, ArtifactVersioner};
use super::dataset::{parse_table, Dataset, Row};

/// Coordinates model training over validated contributions.
pub struct TrainingOrchestrator {
    config: OrchestratorConfig,
    collaborators: TrainingCollaborators,
    versioner: ArtifactVersioner,
}

/// Rows fetched from the content store.
struct Fetched {
    tables: Vec<Vec<Row>>,
    skipped: Vec<SkippedBlob>,
}

impl TrainingOrchestrator {
    pub fn new(config: OrchestratorConfig, collaborators: TrainingCollaborators) -> Self {
        Self {
            config,
            collaborators,
            versioner: ArtifactVersioner::new(),
        }
    }

    /// Train one model on every validated submission for it.
    pub async fn train(&self, request: TrainingRequest) -> Result<TrainingOutcome> {
        if request.model_id.trim().is_empty() {
            return Err(OrchestratorError::ClientInput("Missing model id".to_string()));
        }
        if request.triggering_account.trim().is_empty() {
            return Err(OrchestratorError::ClientInput("Missing triggering account".to_string()));
        }

        let started = Instant::now();
        let settings = &self.config.training;
        let audit = &*self.collaborators.audit;

        // Only committed contributions; failed and duplicate attempts also carry VALID.
        let valid: Vec<SubmissionRecord> = audit
            .submissions(&SubmissionQuery::valid().for_model(&request.model_id, request.sector))
            .await
            .map_err(|e| OrchestratorError::internal(Step::Audit, e))?
            .into_iter()
            .filter(|r| r.outcome == RecordOutcome::Accepted)
            .collect();
        let addresses = distinct_addresses(&valid);

        if addresses.len() < settings.min_rows {
            warn!(model_id = %request.model_id, found = addresses.len(), "Not enough validated data to train");
            return Err(OrchestratorError::InsufficientData {
                required: settings.min_rows,
                found: addresses.len(),
            });
        }

        let fetched = self.fetch(&addresses).await?;
        let family = settings.family_for(&request.model_id);
        let dataset = Dataset::assemble(&fetched.tables, &settings.schema_for(request.sector), family);

        if dataset.row_count() < settings.min_rows {
            return Err(OrchestratorError::InsufficientData {
                required: settings.min_rows,
                found: dataset.row_count(),
            });
        }

        info!(
            model_id = %request.model_id,
            sector = %request.sector,
            rows = dataset.row_count(),
            columns = dataset.columns.len(),
            imputed = dataset.imputed,
            skipped = fetched.skipped.len(),
            "Dataset assembled"
        );

        tokio::fs::create_dir_all(&settings.work_dir)
            .await
            .map_err(|e| OrchestratorError::internal(Step::Dataset, e))?;
        let work = tempfile::Builder::new()
            .prefix("train-")
            .tempdir_in(&settings.work_dir)
            .map_err(|e| OrchestratorError::internal(Step::Dataset, e))?;
        let input = work.path().join("training_data.csv");
        tokio::fs::write(&input, dataset.to_csv())
            .await
            .map_err(|e| OrchestratorError::internal(Step::Dataset, e))?;

        let contributors = contributor_count(&valid);
        let mut run = TrainingRun {
            id: uuid::Uuid::new_v4().to_string(),
            model_id: request.model_id.clone(),
            sector: request.sector,
            triggering_account: request.triggering_account.clone(),
            row_count: dataset.row_count(),
            contributor_count: contributors,
            duration_seconds: 0.0,
            metrics: BTreeMap::new(),
            status: TrainingStatus::Failed,
            artifact_version: None,
            model_path: None,
            scaler_path: None,
            ledger_tx_ref: None,
            error: None,
            created_at: Utc::now(),
        };

        let report = match self.collaborators.trainer.train(&input, work.path()).await {
            Ok(report) => report,
            Err(e) => return Err(self.fail_run(run, started, Step::Trainer, e).await),
        };

        let version = self.versioner.next().await;
        let artifacts = match publish(
            work.path(),
            &settings.artifact_dir,
            &request.model_id,
            &version,
            &settings.artifact_names,
        )
        .await
        {
            Ok(paths) => paths,
            Err(e) => {
                run.metrics = report.metrics;
                return Err(self.fail_run(run, started, Step::Artifacts, e).await);
            }
        };
        drop(work);

        let quality_metric = family.quality_metric();
        let quality = report.metrics.get(quality_metric).copied();
        let low = quality.map_or(true, |v| v < settings.performance_floor);

        run.status = if low {
            TrainingStatus::LowPerformance
        } else {
            TrainingStatus::Success
        };
        run.metrics = report.metrics.clone();
        run.artifact_version = Some(artifacts.version.clone());
        run.model_path = Some(artifacts.model_path.clone());
        run.scaler_path = Some(artifacts.scaler_path.clone());

        let mut warnings = Vec::new();
        run.ledger_tx_ref = self.record_on_ledger(&run, &artifacts, &mut warnings).await;
        run.duration_seconds = started.elapsed().as_secs_f64();

        if let Err(e) = audit.record_training_run(run.clone()).await {
            warn!(run_id = %run.id, error = %e, "Failed to record training run");
            warnings.push(format!("training run record not written: {}", e));
        }

        let alert_sent = if low {
            self.alert_operator(&request.model_id, &version, quality_metric, quality, &mut warnings)
                .await
        } else {
            false
        };

        let notification_failures = self
            .notify_contributors(&request, &valid, &report, &mut warnings)
            .await;

        info!(
            model_id = %request.model_id,
            version = %version,
            status = ?run.status,
            quality_metric,
            quality = ?quality,
            duration_seconds = run.duration_seconds,
            "Training run complete"
        );

        Ok(TrainingOutcome {
            run,
            artifacts,
            skipped_blobs: fetched.skipped,
            notification_failures,
            alert_sent,
            warnings,
        })
    }

    async fn fetch(&self, addresses: &[String]) -> Result<Fetched> {
        let store = &*self.collaborators.store;
        let mut fetched = Fetched {
            tables: Vec::new(),
            skipped: Vec::new(),
        };

        let mut unreachable = None;
        for address in addresses {
            let address_ref = address.as_str();
            let result = retry_with_backoff(&self.config.retry, CollaboratorError::is_transient, || async move {
                store.get(address_ref).await
            })
            .await;

            let error = match result {
                Ok(bytes) => match parse_table(&bytes) {
                    Ok(rows) => {
                        fetched.tables.push(rows);
                        continue;
                    }
                    Err(e) => e.to_string(),
                },
                Err(e) => {
                    let error = e.last_error.to_string();
                    if e.last_error.is_transient() {
                        unreachable = Some(e);
                    }
                    error
                }
            };

            warn!(content_address = %address, error = %error, "Skipping unusable blob");
            fetched.skipped.push(SkippedBlob {
                content_address: address.clone(),
                error,
            });
        }

        // Nothing readable and the store stayed unreachable: an outage, not bad data.
        if fetched.tables.is_empty() {
            if let Some(e) = unreachable {
                return Err(from_retry(Step::ContentStore, e));
            }
        }

        Ok(fetched)
    }

    /// Record a FAILED run and build the error to return.
    async fn fail_run(
        &self,
        mut run: TrainingRun,
        started: Instant,
        step: Step,
        err: impl std::fmt::Display,
    ) -> OrchestratorError {
        let detail = err.to_string();
        warn!(model_id = %run.model_id, step = %step, error = %detail, "Training run failed");

        run.status = TrainingStatus::Failed;
        run.error = Some(detail.clone());
        run.duration_seconds = started.elapsed().as_secs_f64();

        if let Err(e) = self.collaborators.audit.record_training_run(run).await {
            warn!(error = %e, "Failed to record failed training run");
        }

        OrchestratorError::FatalProcess { step, detail }
    }

    async fn record_on_ledger(
        &self,
        run: &TrainingRun,
        artifacts: &ArtifactPaths,
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let ledger = &*self.collaborators.ledger;

        let mut payload = EventPayload::new();
        payload.insert("runId".to_string(), json!(run.id));
        payload.insert("sector".to_string(), json!(run.sector));
        payload.insert("status".to_string(), json!(run.status));
        payload.insert("version".to_string(), json!(artifacts.version));
        payload.insert("rowCount".to_string(), json!(run.row_count));
        payload.insert("contributorCount".to_string(), json!(run.contributor_count));
        payload.insert("metrics".to_string(), json!(run.metrics));

        let tx = match ledger
            .record_training(&run.triggering_account, &run.model_id, payload)
            .await
        {
            Ok(tx) => tx,
            Err(e) => {
                warn!(model_id = %run.model_id, error = %e, "Failed to record training on ledger");
                warnings.push(format!("ledger training record failed: {}", e));
                return None;
            }
        };

        if let Err(e) = confirm_commit(ledger, &tx.tx_hash, &self.config.receipts).await {
            warnings.push(e.to_string());
            return None;
        }

        mirror_events(&*self.collaborators.audit, &tx, None, warnings).await;
        Some(tx.tx_hash)
    }

    async fn alert_operator(
        &self,
        model_id: &str,
        version: &str,
        metric: &str,
        value: Option<f64>,
        warnings: &mut Vec<String>,
    ) -> bool {
        let settings = &self.config.training;
        warn!(model_id = %model_id, metric, value = ?value, floor = settings.performance_floor, "Model below performance floor");

        let Some(operator) = settings.operator_contact.as_deref().filter(|c| !c.trim().is_empty()) else {
            warnings.push("no operator contact configured for low-performance alert".to_string());
            return false;
        };

        let message = messages::low_performance_alert(
            model_id,
            version,
            metric,
            value,
            settings.performance_floor,
        );
        match deliver(
            &*self.collaborators.notifier,
            &*self.collaborators.audit,
            operator,
            &message,
        )
        .await
        {
            Ok(()) => true,
            Err(e) => {
                warnings.push(format!("operator alert failed: {}", e));
                false
            }
        }
    }

    /// Tell valid contributors about the run and invalid ones why they were left out.
    async fn notify_contributors(
        &self,
        request: &TrainingRequest,
        valid: &[SubmissionRecord],
        report: &TrainerReport,
        warnings: &mut Vec<String>,
    ) -> Vec<NotificationFailure> {
        let invalid = match self
            .collaborators
            .audit
            .submissions(&SubmissionQuery::invalid().for_model(&request.model_id, request.sector))
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warnings.push(format!("invalid submissions not loaded: {}", e));
                Vec::new()
            }
        };

        let mut outgoing: Vec<(String, Message)> = Vec::new();
        for (contact, name, _) in group_by_contact(valid) {
            outgoing.push((contact, messages::training_success(&name, &request.model_id, &report.metrics)));
        }
        for (contact, name, issues) in group_by_contact(&invalid) {
            outgoing.push((contact, messages::training_rejection(&name, &request.model_id, &issues)));
        }

        let notifier = &*self.collaborators.notifier;
        let audit = &*self.collaborators.audit;
        let results = join_all(
            outgoing
                .iter()
                .map(|(contact, message)| deliver(notifier, audit, contact, message)),
        )
        .await;

        outgoing
            .iter()
            .zip(results)
            .filter_map(|((contact, _), result)| {
                result.err().map(|error| NotificationFailure {
                    recipient: contact.clone(),
                    error,
                })
            })
            .collect()
    }
}

/// Content addresses in first-seen order, without repeats.
fn distinct_addresses(records: &[SubmissionRecord]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    records
        .iter()
        .filter_map(|r| r.content_address.as_deref())
        .filter(|a| !a.is_empty() && seen.insert(a.to_string()))
        .map(String::from)
        .collect()
}

fn contributor_count(records: &[SubmissionRecord]) -> usize {
    records
        .iter()
        .map(|r| r.account.as_str())
        .collect::<std::collections::HashSet<_>>()
        .len()
}

/// One entry per contact: (contact, name, collected issues).
fn group_by_contact(records: &[SubmissionRecord]) -> Vec<(String, String, Vec<String>)> {
    let mut grouped: BTreeMap<String, (String, Vec<String>)> = BTreeMap::new();
    for record in records {
        let contact = record.contact.trim();
        if contact.is_empty() {
            continue;
        }
        let entry = grouped
            .entry(contact.to_string())
            .or_insert_with(|| (record.contributor_name.clone(), Vec::new()));
        for issue in &record.issues {
            if !entry.1.contains(issue) {
                entry.1.push(issue.clone());
            }
        }
    }
    grouped
        .into_iter()
        .map(|(contact, (name, issues))| (contact, name, issues))
        .collect()
}
