//! In-memory persistence adapters
//!
//! Used by tests and by CLI runs without a configured state file. Each store
//! sits behind a tokio `RwLock` so concurrent pipeline runs can share it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::circuit_breaker::BreakerStatus;
use crate::domain::risk_scorer::RiskScore;
use crate::ports::persistence::{
    BreakerStateStore, DecisionHistoryStore, DecisionRecord, InvestmentRecord, RiskScoreStore,
    StoreError,
};

/// Every risk score ever upserted, per opportunity, oldest first
#[derive(Debug, Default)]
pub struct InMemoryRiskScoreStore {
    scores: RwLock<HashMap<String, Vec<RiskScore>>>,
}

impl InMemoryRiskScoreStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RiskScoreStore for InMemoryRiskScoreStore {
    async fn upsert(&self, score: &RiskScore) -> Result<(), StoreError> {
        let mut scores = self.scores.write().await;
        let entries = scores.entry(score.opportunity_id.clone()).or_default();
        // Same calculation time replaces, anything else appends
        match entries
            .iter_mut()
            .find(|s| s.calculated_at == score.calculated_at)
        {
            Some(existing) => *existing = score.clone(),
            None => {
                entries.push(score.clone());
                entries.sort_by_key(|s| s.calculated_at);
            }
        }
        Ok(())
    }

    async fn latest(&self, opportunity_id: &str) -> Result<Option<RiskScore>, StoreError> {
        let scores = self.scores.read().await;
        Ok(scores
            .get(opportunity_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn history(
        &self,
        opportunity_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RiskScore>, StoreError> {
        let scores = self.scores.read().await;
        Ok(scores
            .get(opportunity_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| s.calculated_at >= since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Append-only investment and decision log
#[derive(Debug, Default)]
pub struct InMemoryDecisionHistory {
    investments: RwLock<Vec<InvestmentRecord>>,
    decisions: RwLock<Vec<DecisionRecord>>,
}

impl InMemoryDecisionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn investment_count(&self) -> usize {
        self.investments.read().await.len()
    }

    pub async fn decisions(&self) -> Vec<DecisionRecord> {
        self.decisions.read().await.clone()
    }
}

#[async_trait]
impl DecisionHistoryStore for InMemoryDecisionHistory {
    async fn record_investment(&self, record: &InvestmentRecord) -> Result<(), StoreError> {
        self.investments.write().await.push(record.clone());
        Ok(())
    }

    async fn investments_since(
        &self,
        user_address: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<InvestmentRecord>, StoreError> {
        let investments = self.investments.read().await;
        Ok(investments
            .iter()
            .filter(|r| r.user_address == user_address && r.executed_at >= since)
            .cloned()
            .collect())
    }

    async fn record_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        self.decisions.write().await.push(record.clone());
        Ok(())
    }

    async fn last_decision(&self, user_address: &str) -> Result<Option<DecisionRecord>, StoreError> {
        let decisions = self.decisions.read().await;
        Ok(decisions
            .iter()
            .filter(|d| d.user_address == user_address)
            .max_by_key(|d| d.decided_at)
            .cloned())
    }

    async fn last_executed_decision(
        &self,
        user_address: &str,
    ) -> Result<Option<DecisionRecord>, StoreError> {
        let decisions = self.decisions.read().await;
        Ok(decisions
            .iter()
            .filter(|d| d.user_address == user_address && d.is_executed())
            .max_by_key(|d| d.decided_at)
            .cloned())
    }
}

/// Single breaker status row
#[derive(Debug, Default)]
pub struct InMemoryBreakerStore {
    status: RwLock<BreakerStatus>,
}

impl InMemoryBreakerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BreakerStateStore for InMemoryBreakerStore {
    async fn load(&self) -> Result<BreakerStatus, StoreError> {
        Ok(self.status.read().await.clone())
    }

    async fn save(&self, status: &BreakerStatus) -> Result<(), StoreError> {
        *self.status.write().await = status.clone();
        Ok(())
    }
}
