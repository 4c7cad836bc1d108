//! Persistence ports
//!
//! The core treats storage as a key-value-ish store keyed by opportunity id
//! or user address, with simple read, upsert and range-by-date access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::circuit_breaker::BreakerStatus;
use crate::domain::risk_scorer::RiskScore;
use crate::domain::strategy::StrategyAction;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Failed to serialize record: {0}")]
    Serialization(String),
    #[error("Stored record is corrupted: {0}")]
    Corrupted(String),
}

/// A committed investment, used for daily and rapid-fire limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestmentRecord {
    pub user_address: String,
    pub protocol: String,
    pub chain: String,
    pub amount: f64,
    pub executed_at: DateTime<Utc>,
}

/// Outcome string of a decision that reached the chain
pub const EXECUTED_OUTCOME: &str = "executed";

/// A pipeline decision for a user, whether or not it executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub user_address: String,
    pub run_id: String,
    pub protocol: String,
    pub action: StrategyAction,
    pub amount: f64,
    pub outcome: String,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn is_executed(&self) -> bool {
        self.outcome == EXECUTED_OUTCOME
    }
}

/// Persisted copy of risk scores for historical trend queries
#[async_trait]
pub trait RiskScoreStore: Send + Sync {
    async fn upsert(&self, score: &RiskScore) -> Result<(), StoreError>;

    async fn latest(&self, opportunity_id: &str) -> Result<Option<RiskScore>, StoreError>;

    /// Scores calculated at or after `since`, oldest first
    async fn history(
        &self,
        opportunity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskScore>, StoreError>;
}

/// Append-only investment and decision history
#[async_trait]
pub trait DecisionHistoryStore: Send + Sync {
    async fn record_investment(&self, record: &InvestmentRecord) -> Result<(), StoreError>;

    /// Investments by `user_address` executed at or after `since`
    async fn investments_since(
        &self,
        user_address: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InvestmentRecord>, StoreError>;

    async fn record_decision(&self, record: &DecisionRecord) -> Result<(), StoreError>;

    async fn last_decision(&self, user_address: &str) -> Result<Option<DecisionRecord>, StoreError>;

    /// Most recent decision for `user_address` whose outcome was executed
    async fn last_executed_decision(
        &self,
        user_address: &str,
    ) -> Result<Option<DecisionRecord>, StoreError>;
}

/// Process-wide breaker status row
///
/// `save` must replace the whole record atomically.
#[async_trait]
pub trait BreakerStateStore: Send + Sync {
    async fn load(&self) -> Result<BreakerStatus, StoreError>;

    async fn save(&self, status: &BreakerStatus) -> Result<(), StoreError>;
}
