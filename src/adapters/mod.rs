//! Adapters Layer - External System Implementations
//!
//! This module contains implementations of the port traits:
//! - Memory: in-process stores for risk history, decisions and breaker status
//! - JSON store: file-backed breaker status with atomic replacement
//! - File feed: opportunities from a JSON file and a fixed gas oracle
//! - HTTP proposer: external strategy proposer over reqwest
//! - Paper: simulated transaction executor
//! - CLI: Command-line interface handlers

pub mod cli;
pub mod file_feed;
pub mod http_proposer;
pub mod json_store;
pub mod memory;
pub mod paper;

pub use cli::CliApp;
pub use file_feed::{JsonFileFeed, StaticGasOracle};
pub use http_proposer::{HttpProposer, HttpProposerConfig};
pub use json_store::JsonBreakerStore;
pub use memory::{InMemoryBreakerStore, InMemoryDecisionHistory, InMemoryRiskScoreStore};
pub use paper::PaperExecutor;
