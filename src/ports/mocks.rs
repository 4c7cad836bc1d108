//! mockall doubles for every port, shared by unit tests

use async_trait::async_trait;
use mockall::mock;

use super::execution::{ExecutorError, StepOutcome, TransactionExecutor};
use super::market_data::{FeedError, GasOracle, OpportunityFeed};
use super::persistence::{BreakerStateStore, StoreError};
use super::proposer::{ProposalRequest, ProposerError, StrategyProposer};
use crate::domain::circuit_breaker::BreakerStatus;
use crate::domain::execution_plan::ExecutionPlan;
use crate::domain::opportunity::Opportunity;

mock! {
    pub Feed {}

    #[async_trait]
    impl OpportunityFeed for Feed {
        async fn active_opportunities(&self, chain: &str) -> Result<Vec<Opportunity>, FeedError>;
    }
}

mock! {
    pub Gas {}

    #[async_trait]
    impl GasOracle for Gas {
        async fn gas_price_gwei(&self, chain: &str) -> Result<f64, FeedError>;
    }
}

mock! {
    pub Proposer {}

    #[async_trait]
    impl StrategyProposer for Proposer {
        async fn propose(&self, request: &ProposalRequest) -> Result<String, ProposerError>;
    }
}

mock! {
    pub Executor {}

    #[async_trait]
    impl TransactionExecutor for Executor {
        async fn simulate(&self, plan: &ExecutionPlan) -> Result<Vec<StepOutcome>, ExecutorError>;
        async fn execute(&self, plan: &ExecutionPlan) -> Result<Vec<StepOutcome>, ExecutorError>;
    }
}

mock! {
    pub BreakerStore {}

    #[async_trait]
    impl BreakerStateStore for BreakerStore {
        async fn load(&self) -> Result<BreakerStatus, StoreError>;
        async fn save(&self, status: &BreakerStatus) -> Result<(), StoreError>;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_feed() {
        let mut feed = MockFeed::new();
        feed.expect_active_opportunities()
            .times(1)
            .returning(|_| Ok(vec![Opportunity::new("a", "Aave", "ethereum", 4.0, 1e9)]));

        let result = feed.active_opportunities("ethereum").await.unwrap();
        assert_eq!(result.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_breaker_store_failure() {
        let mut store = MockBreakerStore::new();
        store
            .expect_load()
            .returning(|| Err(StoreError::Unavailable("disk gone".to_string())));

        assert!(store.load().await.is_err());
    }
}
