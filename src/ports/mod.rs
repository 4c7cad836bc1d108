//! Ports Layer - Trait definitions for external collaborators
//!
//! Following hexagonal architecture, these traits abstract everything the
//! decision core talks to but does not own:
//! - Opportunity feeds and gas prices
//! - The natural-language strategy proposer
//! - Risk score, decision history and breaker status persistence
//! - Transaction execution

pub mod market_data;
pub mod proposer;
pub mod persistence;
pub mod execution;

#[cfg(test)]
pub mod mocks;

pub use market_data::{FeedError, GasOracle, OpportunityFeed};
pub use proposer::{ProposalRequest, ProposerError, StrategyProposer};
pub use persistence::{
    BreakerStateStore, DecisionHistoryStore, DecisionRecord, InvestmentRecord, RiskScoreStore,
    StoreError,
};
pub use execution::{ExecutorError, StepOutcome, TransactionExecutor};
