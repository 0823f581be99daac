//! Reputation Ledger for PureChain
//!
//! The authoritative record of contributor reputation:
//!
//! - **Accounts**: one per address, created by the first accepted submission
//!   with reputation 1 and a bound unique id
//! - **Rewards**: +2 on every successful submit
//! - **Penalties**: -1 per penalty; crossing below zero blacklists the account
//!   for good
//! - **Duplicate guard**: a `(unique id, content address)` pair is accepted once
//! - **Event log**: append-only, sequence-numbered, journaled before it is applied
//!
//! # Example
//!
//! ```ignore
//! use purechain_ledger::{Ledger, ReputationLedger};
//!
//! let ledger = ReputationLedger::open("data/ledger.jsonl").await?;
//! let tx = ledger.submit("0xA11CE", "uid-...", "sha256-...").await?;
//! let receipt = ledger.receipt(&tx.tx_hash).await;
//! ```

pub mod error;
pub mod journal;
pub mod ledger;
pub mod types;

pub use error::{LedgerError, Result};
pub use journal::{FileJournal, Journal, MemoryJournal};
pub use ledger::{Ledger, ReputationLedger};
pub use types::*;
