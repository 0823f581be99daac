//! The reputation ledger state machine.
//!
//! Every account moves `New -> Active -> Blacklisted`. Operations are atomic:
//! the events of an operation are journaled first and only then applied to
//! the account table, all under a single lock. A rejected operation leaves a
//! failed receipt and nothing else.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::journal::{FileJournal, Journal, MemoryJournal};
use crate::types::{
    Account, DuplicateKey, EventPayload, LedgerEvent, TxKind, TxReceipt, TxResult, TxStatus,
    INITIAL_REPUTATION, PENALTY, SUBMISSION_REWARD,
};

/// Operations the orchestrators need from a ledger.
///
/// Implemented by [`ReputationLedger`]; tests substitute wrappers to model
/// receipts that report failure after the call itself returned.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record a submission, creating the account on first use.
    async fn submit_with_profile(
        &self,
        actor: &str,
        unique_id: &str,
        content_address: &str,
        display_name: &str,
        organization: &str,
    ) -> Result<TxResult>;

    /// Record a submission without profile details.
    async fn submit(&self, actor: &str, unique_id: &str, content_address: &str) -> Result<TxResult> {
        self.submit_with_profile(actor, unique_id, content_address, "", "")
            .await
    }

    /// Apply one penalty to the actor's account.
    async fn penalize(&self, unique_id: &str, actor: &str) -> Result<TxResult>;

    /// Append an audit-only TRAINING event.
    async fn record_training(
        &self,
        actor: &str,
        model_id: &str,
        payload: EventPayload,
    ) -> Result<TxResult>;

    /// Receipt for a completed transaction.
    async fn receipt(&self, tx_hash: &str) -> Option<TxReceipt>;

    /// Account for an address; a zero-value account when unknown.
    async fn get_account(&self, address: &str) -> Account;

    async fn get_reputation(&self, address: &str) -> i64 {
        self.get_account(address).await.reputation
    }
}

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
    pair_index: HashSet<(String, String)>,
    content_index: HashSet<String>,
    submitted_ids: HashSet<String>,
    events: Vec<LedgerEvent>,
    receipts: HashMap<String, TxReceipt>,
    next_sequence: u64,
    next_block: u64,
}

impl LedgerState {
    fn begin(&mut self, op: &str, parts: &[&str]) -> (String, u64) {
        let block = self.next_block;
        self.next_block += 1;

        let mut hasher = Sha256::new();
        hasher.update(block.to_be_bytes());
        hasher.update(op.as_bytes());
        for part in parts {
            hasher.update((part.len() as u64).to_be_bytes());
            hasher.update(part.as_bytes());
        }
        (format!("0x{}", hex::encode(hasher.finalize())), block)
    }

    fn revert(&mut self, tx_hash: &str, block: u64, error: &LedgerError) {
        warn!(tx_hash = %tx_hash, block, error = %error, "Ledger transaction reverted");
        self.receipts.insert(
            tx_hash.to_string(),
            TxReceipt {
                tx_hash: tx_hash.to_string(),
                block_number: block,
                status: TxStatus::Failed,
                reason: Some(error.to_string()),
            },
        );
    }

    fn is_duplicate(&self, key: DuplicateKey, unique_id: &str, content_address: &str) -> bool {
        match key {
            DuplicateKey::UniqueIdAndContent => self
                .pair_index
                .contains(&(unique_id.to_string(), content_address.to_string())),
            DuplicateKey::ContentOnly => self.content_index.contains(content_address),
        }
    }

    fn apply(&mut self, event: &LedgerEvent) {
        match event.kind {
            TxKind::Submission => {
                let unique_id = event.unique_id.clone().unwrap_or_default();
                let account = self
                    .accounts
                    .entry(event.account.clone())
                    .or_insert_with(|| {
                        let mut account = Account::unknown(&event.account);
                        account.bound_unique_id = unique_id.clone();
                        account.display_name = payload_str(&event.payload, "name");
                        account.organization = payload_str(&event.payload, "organization");
                        account
                    });
                account.submission_count += 1;
                account.apply_delta(event.delta);

                if let Some(content) = &event.content_address {
                    self.pair_index.insert((unique_id.clone(), content.clone()));
                    self.content_index.insert(content.clone());
                }
                self.submitted_ids.insert(unique_id);
            }
            TxKind::Reward | TxKind::Penalize => {
                if let Some(account) = self.accounts.get_mut(&event.account) {
                    account.apply_delta(event.delta);
                }
            }
            // The flag is already derived from the reputation the preceding PENALIZE set.
            TxKind::Blacklist | TxKind::Training => {}
        }

        self.next_sequence = self.next_sequence.max(event.sequence + 1);
        self.next_block = self.next_block.max(event.block_number + 1);
        self.receipts
            .entry(event.tx_hash.clone())
            .or_insert_with(|| TxReceipt {
                tx_hash: event.tx_hash.clone(),
                block_number: event.block_number,
                status: TxStatus::Success,
                reason: None,
            });
        self.events.push(event.clone());
    }
}

fn payload_str(payload: &EventPayload, key: &str) -> String {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Assigns sequence numbers to the events of one operation.
struct EventBatch {
    tx_hash: String,
    block: u64,
    next_sequence: u64,
    events: Vec<LedgerEvent>,
}

impl EventBatch {
    fn new(tx_hash: String, block: u64, next_sequence: u64) -> Self {
        Self {
            tx_hash,
            block,
            next_sequence,
            events: Vec::new(),
        }
    }

    fn push(
        &mut self,
        kind: TxKind,
        account: &str,
        unique_id: Option<&str>,
        content_address: Option<&str>,
        delta: i64,
        payload: EventPayload,
    ) {
        self.events.push(LedgerEvent {
            sequence: self.next_sequence,
            block_number: self.block,
            tx_hash: self.tx_hash.clone(),
            kind,
            account: account.to_string(),
            unique_id: unique_id.map(String::from),
            content_address: content_address.map(String::from),
            delta,
            payload,
            recorded_at: Utc::now(),
        });
        self.next_sequence += 1;
    }
}

fn payload(entries: impl IntoIterator<Item = (&'static str, serde_json::Value)>) -> EventPayload {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Authoritative account table plus append-only event log.
pub struct ReputationLedger {
    state: Mutex<LedgerState>,
    journal: Arc<dyn Journal>,
    duplicate_key: DuplicateKey,
}

impl ReputationLedger {
    /// Create an empty ledger backed by an in-memory journal.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LedgerState::default()),
            journal: Arc::new(MemoryJournal::new()),
            duplicate_key: DuplicateKey::default(),
        }
    }

    /// Open a ledger backed by a journal file, replaying committed events.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let journal = FileJournal::new(path).await?;
        Self::with_journal(Arc::new(journal)).await
    }

    /// Build a ledger from an existing journal.
    pub async fn with_journal(journal: Arc<dyn Journal>) -> Result<Self> {
        let events = journal.load().await?;
        let mut state = LedgerState::default();

        for event in &events {
            if !state.events.is_empty() && event.sequence < state.next_sequence {
                return Err(LedgerError::Journal(format!(
                    "sequence {} is not increasing",
                    event.sequence
                )));
            }
            state.apply(event);
        }

        info!(
            events = events.len(),
            accounts = state.accounts.len(),
            "Ledger replayed"
        );

        Ok(Self {
            state: Mutex::new(state),
            journal,
            duplicate_key: DuplicateKey::default(),
        })
    }

    /// Choose which fields identify duplicate submissions.
    pub fn with_duplicate_key(mut self, key: DuplicateKey) -> Self {
        self.duplicate_key = key;
        self
    }

    pub fn duplicate_key(&self) -> DuplicateKey {
        self.duplicate_key
    }

    /// All accounts, ordered by address.
    pub async fn accounts(&self) -> Vec<Account> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state.accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.address.cmp(&b.address));
        accounts
    }

    /// The full event log in sequence order.
    pub async fn events(&self) -> Vec<LedgerEvent> {
        self.state.lock().await.events.clone()
    }

    /// Events that touched one account.
    pub async fn events_for(&self, address: &str) -> Vec<LedgerEvent> {
        let state = self.state.lock().await;
        state
            .events
            .iter()
            .filter(|e| e.account == address)
            .cloned()
            .collect()
    }

    /// Total accepted submissions across all accounts.
    pub async fn submission_count(&self) -> u64 {
        let state = self.state.lock().await;
        state.accounts.values().map(|a| a.submission_count).sum()
    }

    async fn commit(&self, state: &mut LedgerState, batch: EventBatch) -> Result<TxResult> {
        if let Err(e) = self.journal.append(&batch.events).await {
            state.revert(&batch.tx_hash, batch.block, &e);
            return Err(e);
        }

        for event in &batch.events {
            state.apply(event);
        }

        debug!(
            tx_hash = %batch.tx_hash,
            block = batch.block,
            events = batch.events.len(),
            "Ledger transaction committed"
        );

        Ok(TxResult {
            tx_hash: batch.tx_hash,
            block_number: batch.block,
            events: batch.events,
        })
    }

    fn check_submit(
        &self,
        state: &LedgerState,
        actor: &str,
        unique_id: &str,
        content_address: &str,
    ) -> Result<()> {
        if content_address.trim().is_empty() {
            return Err(LedgerError::EmptyContent);
        }

        if let Some(account) = state.accounts.get(actor) {
            if account.bound_unique_id != unique_id {
                return Err(LedgerError::UniqueIdMismatch {
                    expected: account.bound_unique_id.clone(),
                    actual: unique_id.to_string(),
                });
            }
            if account.is_blacklisted {
                return Err(LedgerError::Blacklisted(actor.to_string()));
            }
        }

        if state.is_duplicate(self.duplicate_key, unique_id, content_address) {
            return Err(LedgerError::DuplicateSubmission {
                unique_id: unique_id.to_string(),
                content_address: content_address.to_string(),
            });
        }

        Ok(())
    }

    fn check_penalize<'a>(
        &self,
        state: &'a LedgerState,
        unique_id: &str,
        actor: &str,
    ) -> Result<&'a Account> {
        if !state.submitted_ids.contains(unique_id) {
            return Err(LedgerError::SubmissionNotFound(unique_id.to_string()));
        }

        let account = state
            .accounts
            .get(actor)
            .ok_or_else(|| LedgerError::SubmissionNotFound(unique_id.to_string()))?;

        if account.bound_unique_id != unique_id {
            return Err(LedgerError::UniqueIdMismatch {
                expected: account.bound_unique_id.clone(),
                actual: unique_id.to_string(),
            });
        }
        if account.is_blacklisted {
            return Err(LedgerError::Blacklisted(actor.to_string()));
        }

        Ok(account)
    }
}

impl Default for ReputationLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for ReputationLedger {
    async fn submit_with_profile(
        &self,
        actor: &str,
        unique_id: &str,
        content_address: &str,
        display_name: &str,
        organization: &str,
    ) -> Result<TxResult> {
        let mut state = self.state.lock().await;
        let (tx_hash, block) = state.begin("submit", &[actor, unique_id, content_address]);

        if let Err(e) = self.check_submit(&state, actor, unique_id, content_address) {
            state.revert(&tx_hash, block, &e);
            return Err(e);
        }

        let existing = state.accounts.get(actor);
        let (opening, reputation, count) = match existing {
            Some(account) => (0, account.reputation, account.submission_count),
            None => (INITIAL_REPUTATION, 0, 0),
        };
        let after_submit = reputation + opening;

        let mut batch = EventBatch::new(tx_hash, block, state.next_sequence);
        batch.push(
            TxKind::Submission,
            actor,
            Some(unique_id),
            Some(content_address),
            opening,
            payload([
                ("uniqueId", json!(unique_id)),
                ("contentAddress", json!(content_address)),
                ("name", json!(display_name)),
                ("organization", json!(organization)),
                ("submissionCount", json!(count + 1)),
            ]),
        );
        batch.push(
            TxKind::Reward,
            actor,
            Some(unique_id),
            Some(content_address),
            SUBMISSION_REWARD,
            payload([
                ("amount", json!(SUBMISSION_REWARD)),
                ("reputation", json!(after_submit + SUBMISSION_REWARD)),
            ]),
        );

        let result = self.commit(&mut state, batch).await?;

        info!(
            actor = %actor,
            unique_id = %unique_id,
            content_address = %content_address,
            reputation = after_submit + SUBMISSION_REWARD,
            "Submission recorded"
        );

        Ok(result)
    }

    async fn penalize(&self, unique_id: &str, actor: &str) -> Result<TxResult> {
        let mut state = self.state.lock().await;
        let (tx_hash, block) = state.begin("penalize", &[actor, unique_id]);

        let checked = self
            .check_penalize(&state, unique_id, actor)
            .map(|account| account.reputation - PENALTY);
        let reputation = match checked {
            Ok(reputation) => reputation,
            Err(e) => {
                state.revert(&tx_hash, block, &e);
                return Err(e);
            }
        };

        let mut batch = EventBatch::new(tx_hash, block, state.next_sequence);
        batch.push(
            TxKind::Penalize,
            actor,
            Some(unique_id),
            None,
            -PENALTY,
            payload([
                ("uniqueId", json!(unique_id)),
                ("reputation", json!(reputation)),
            ]),
        );
        if reputation < 0 {
            batch.push(
                TxKind::Blacklist,
                actor,
                Some(unique_id),
                None,
                0,
                payload([
                    ("uniqueId", json!(unique_id)),
                    ("reputation", json!(reputation)),
                ]),
            );
        }

        let result = self.commit(&mut state, batch).await?;

        if reputation < 0 {
            warn!(actor = %actor, unique_id = %unique_id, reputation, "Account blacklisted");
        } else {
            info!(actor = %actor, unique_id = %unique_id, reputation, "Account penalized");
        }

        Ok(result)
    }

    async fn record_training(
        &self,
        actor: &str,
        model_id: &str,
        mut payload: EventPayload,
    ) -> Result<TxResult> {
        let mut state = self.state.lock().await;
        let (tx_hash, block) = state.begin("training", &[actor, model_id]);

        payload.insert("modelId".to_string(), json!(model_id));

        let mut batch = EventBatch::new(tx_hash, block, state.next_sequence);
        batch.push(TxKind::Training, actor, None, None, 0, payload);

        let result = self.commit(&mut state, batch).await?;
        info!(actor = %actor, model_id = %model_id, "Training recorded");
        Ok(result)
    }

    async fn receipt(&self, tx_hash: &str) -> Option<TxReceipt> {
        self.state.lock().await.receipts.get(tx_hash).cloned()
    }

    async fn get_account(&self, address: &str) -> Account {
        let state = self.state.lock().await;
        state
            .accounts
            .get(address)
            .cloned()
            .unwrap_or_else(|| Account::unknown(address))
    }
}
