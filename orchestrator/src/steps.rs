//! Pipeline steps shared by both orchestrators.

use tracing::{debug, warn};

use purechain_ledger::{Ledger, TxResult};

use crate::collaborators::{AuditLog, NotificationSink};
use crate::config::ReceiptPolling;
use crate::error::{CollaboratorError, OrchestratorError, Result, Step};
use crate::messages::Message;
use crate::retry::RetryError;
use crate::types::{LedgerTransaction, NotificationRecord};

/// Wait for a successful receipt for `tx_hash`.
pub async fn confirm_commit(
    ledger: &dyn Ledger,
    tx_hash: &str,
    polling: &ReceiptPolling,
) -> Result<()> {
    let attempts = polling.attempts.max(1);

    for attempt in 1..=attempts {
        match ledger.receipt(tx_hash).await {
            Some(receipt) if receipt.is_success() => {
                debug!(tx_hash = %tx_hash, block = receipt.block_number, "Transaction confirmed");
                return Ok(());
            }
            Some(receipt) => {
                return Err(OrchestratorError::LedgerCommitFailed {
                    tx_hash: tx_hash.to_string(),
                    reason: receipt
                        .reason
                        .unwrap_or_else(|| "transaction reverted".to_string()),
                });
            }
            None if attempt < attempts => tokio::time::sleep(polling.interval()).await,
            None => {}
        }
    }

    Err(OrchestratorError::LedgerCommitFailed {
        tx_hash: tx_hash.to_string(),
        reason: format!("no receipt after {} attempt(s)", attempts),
    })
}

/// Append an audit mirror for every event of a committed transaction.
///
/// Failures are returned as warnings; the ledger stays authoritative.
pub async fn mirror_events(
    audit: &dyn AuditLog,
    tx: &TxResult,
    related_submission: Option<&str>,
    warnings: &mut Vec<String>,
) {
    for event in &tx.events {
        let mirror = LedgerTransaction::mirror(event, related_submission);
        if let Err(e) = audit.append_transaction(mirror).await {
            warn!(tx_hash = %tx.tx_hash, kind = %event.kind, error = %e, "Failed to mirror ledger event");
            warnings.push(format!("audit mirror for {} {} failed: {}", event.kind, tx.tx_hash, e));
        }
    }
}

/// Send one message and record the attempt in the notification log.
pub async fn deliver(
    notifier: &dyn NotificationSink,
    audit: &dyn AuditLog,
    recipient: &str,
    message: &Message,
) -> std::result::Result<(), String> {
    let result = notifier
        .send(recipient, &message.subject, &message.body)
        .await
        .map_err(|e| e.to_string());

    if let Err(e) = &result {
        warn!(recipient = %recipient, subject = %message.subject, error = %e, "Notification failed");
    }
    if let Err(e) = audit
        .record_notification(NotificationRecord::new(recipient, &message.subject, &result))
        .await
    {
        warn!(recipient = %recipient, error = %e, "Failed to record notification");
    }

    result
}

/// Classify a retried collaborator failure.
pub fn from_retry(step: Step, err: RetryError<CollaboratorError>) -> OrchestratorError {
    match err.last_error {
        source if source.is_transient() => OrchestratorError::TransientInfrastructure {
            step,
            attempts: err.attempts,
            source,
        },
        CollaboratorError::NotFound(what) => OrchestratorError::NotFound(what),
        other => OrchestratorError::internal(step, other),
    }
}
