//! purechain-node: command-line runtime for the PureChain pipeline
//!
//! Assembles the ledger, content store, audit log and external validator
//! and trainer processes from a TOML config, then runs one submission,
//! training run or query per invocation.

pub mod config;
pub mod runtime;

pub use config::Config;
pub use runtime::Node;
