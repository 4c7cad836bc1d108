//! Decision Engine
//!
//! The surface callers use: scoring, allocation, rebalance checks, safety
//! validation, breaker control and full pipeline runs, all wired to one
//! shared breaker and one shared risk cache.

use std::sync::Arc;

use crate::application::pipeline::{Collaborators, DecisionPipeline, PipelineConfig};
use crate::application::run_state::{RunContext, RunState};
use crate::domain::allocation::{
    AllocationConfig, AllocationConstraints, AllocationOptimizer, AllocationPlan, PositionAmount,
    RebalanceReport, RebalanceSuggestion,
};
use crate::domain::circuit_breaker::{
    BreakerConfig, BreakerError, BreakerStatus, CircuitBreaker, PauseDecision, RequestKind,
};
use crate::domain::opportunity::Opportunity;
use crate::domain::risk_scorer::{RiskConfig, RiskScore, RiskScoreError, RiskScorer, RiskTrend};
use crate::domain::safety_validator::{SafetyConfig, SafetyValidator, UserContext, ValidationResult};
use crate::domain::strategy::{sanitize_strategy, Strategy};
use crate::ports::persistence::{BreakerStateStore, RiskScoreStore};

/// Per-component configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub risk: RiskConfig,
    pub allocation: AllocationConfig,
    pub safety: SafetyConfig,
    pub breaker: BreakerConfig,
    pub pipeline: PipelineConfig,
}

/// Everything the engine needs from the outside world
#[derive(Clone)]
pub struct EngineServices {
    pub collaborators: Collaborators,
    pub breaker_store: Arc<dyn BreakerStateStore>,
    pub risk_store: Option<Arc<dyn RiskScoreStore>>,
}

pub struct DecisionEngine {
    scorer: Arc<RiskScorer>,
    optimizer: AllocationOptimizer,
    validator: Arc<SafetyValidator>,
    breaker: Arc<CircuitBreaker>,
    pipeline: DecisionPipeline,
}

impl DecisionEngine {
    pub fn new(config: EngineConfig, services: EngineServices) -> Self {
        let mut pipeline_config = config.pipeline;
        pipeline_config.allow_withdrawals = config.breaker.allow_withdrawals;

        let breaker = Arc::new(CircuitBreaker::new(config.breaker, services.breaker_store));

        let scorer = match services.risk_store {
            Some(store) => RiskScorer::new(config.risk).with_history(store),
            None => RiskScorer::new(config.risk),
        };
        let scorer = Arc::new(scorer);

        let validator = Arc::new(
            SafetyValidator::new(config.safety, services.collaborators.history.clone())
                .with_breaker(breaker.clone()),
        );

        let pipeline = DecisionPipeline::new(
            pipeline_config,
            services.collaborators,
            scorer.clone(),
            validator.clone(),
            breaker.clone(),
        );

        Self {
            scorer,
            optimizer: AllocationOptimizer::new(config.allocation),
            validator,
            breaker,
            pipeline,
        }
    }

    pub async fn score_opportunity(&self, opportunity: &Opportunity) -> Result<RiskScore, RiskScoreError> {
        self.scorer.score(opportunity).await
    }

    pub async fn risk_trend(&self, opportunity_id: &str, since: chrono::DateTime<chrono::Utc>) -> RiskTrend {
        self.scorer.risk_trend(opportunity_id, since).await
    }

    /// Score any unscored opportunities, then optimize across all of them
    pub async fn optimize_allocation(
        &self,
        opportunities: &[Opportunity],
        constraints: &AllocationConstraints,
    ) -> Result<AllocationPlan, RiskScoreError> {
        let mut scored = Vec::with_capacity(opportunities.len());
        for opp in opportunities {
            if opp.risk_score.is_some() {
                scored.push(opp.clone());
            } else {
                let risk = self.scorer.score(opp).await?;
                scored.push(opp.clone().with_risk_score(risk.composite));
            }
        }
        Ok(self.optimizer.optimize(&scored, constraints))
    }

    pub fn needs_rebalancing(
        &self,
        current: &[PositionAmount],
        targets: &[PositionAmount],
        threshold_pct: Option<f64>,
    ) -> RebalanceReport {
        let threshold = threshold_pct.unwrap_or(self.optimizer.config().rebalance_threshold_pct);
        self.optimizer.needs_rebalancing(current, targets, threshold)
    }

    pub fn find_better_opportunity(
        &self,
        current: &Opportunity,
        candidates: &[Opportunity],
        max_risk_score: f64,
    ) -> Option<RebalanceSuggestion> {
        self.optimizer
            .find_better_opportunity(current, candidates, max_risk_score)
    }

    pub async fn validate_strategy(&self, strategy: &Strategy, ctx: &UserContext) -> ValidationResult {
        self.validator.validate(strategy, ctx).await
    }

    pub fn sanitize_strategy(&self, strategy: &Strategy) -> Strategy {
        sanitize_strategy(strategy)
    }

    pub async fn is_tripped(&self) -> BreakerStatus {
        self.breaker.is_tripped().await
    }

    pub async fn record_failure(
        &self,
        key: &str,
        context: Option<serde_json::Value>,
    ) -> Result<bool, BreakerError> {
        self.breaker.record_failure(key, context).await
    }

    pub async fn trip(
        &self,
        reason: &str,
        context: Option<serde_json::Value>,
    ) -> Result<(), BreakerError> {
        self.breaker.trip(reason, context).await
    }

    pub async fn reset(&self, reset_by: &str) -> Result<(), BreakerError> {
        self.breaker.reset(reset_by).await
    }

    pub async fn check_emergency_pause(&self, request: RequestKind) -> PauseDecision {
        let allow = self.breaker.config().allow_withdrawals;
        self.breaker.check_emergency_pause(request, allow).await
    }

    /// Run the full pipeline for a new request
    pub async fn run_pipeline(&self, context: RunContext) -> RunState {
        self.pipeline.run(RunState::new(context)).await
    }

    /// Continue a checkpointed run
    pub async fn resume_pipeline(&self, state: RunState) -> RunState {
        self.pipeline.run(state).await
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Drop in-memory breaker counters and cached scores
    pub async fn close(&self) {
        self.breaker.close().await;
        self.scorer.clear_cache().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_feed::StaticGasOracle;
    use crate::adapters::memory::{InMemoryBreakerStore, InMemoryDecisionHistory, InMemoryRiskScoreStore};
    use crate::adapters::paper::PaperExecutor;
    use crate::domain::opportunity::{
        GovernanceType, LiquidityDepth, ProtocolType, RevenueModel, RiskAttributes,
    };
    use crate::domain::strategy::StrategyAction;
    use crate::ports::mocks::MockFeed;

    fn engine() -> DecisionEngine {
        let mut feed = MockFeed::new();
        feed.expect_active_opportunities().returning(|_| Ok(vec![]));
        let services = EngineServices {
            collaborators: Collaborators {
                feed: Arc::new(feed),
                gas: Arc::new(StaticGasOracle::uniform(20.0)),
                proposer: None,
                executor: Arc::new(PaperExecutor::new()),
                history: Arc::new(InMemoryDecisionHistory::new()),
            },
            breaker_store: Arc::new(InMemoryBreakerStore::new()),
            risk_store: Some(Arc::new(InMemoryRiskScoreStore::new())),
        };
        DecisionEngine::new(EngineConfig::default(), services)
    }

    #[tokio::test]
    async fn test_single_opportunity_gets_full_budget() {
        let engine = engine();
        let opp = Opportunity::new("aave-usdc", "Aave", "ethereum", 4.25, 1.5e9).with_attributes(
            RiskAttributes {
                age_years: 5.0,
                audit_count: 5,
                has_bug_bounty: true,
                governance_type: GovernanceType::Multisig,
                is_upgradeable: Some(true),
                oracle_dependencies: 1,
                liquidity_depth: LiquidityDepth::Deep,
                apy_volatility_30d: Some(3.0),
                apy_volatility_90d: Some(4.0),
                revenue_model: RevenueModel::Sustainable,
                protocol_type: ProtocolType::Lending,
                ..RiskAttributes::default()
            },
        );
        let risk = engine.score_opportunity(&opp).await.unwrap();
        assert!((2.0..=3.0).contains(&risk.composite), "composite {}", risk.composite);

        let plan = engine
            .optimize_allocation(
                &[opp],
                &AllocationConstraints {
                    max_total_investment: 1000.0,
                    max_risk_score: 7.0,
                    max_investment_per_opportunity: 1000.0,
                },
            )
            .await
            .unwrap();
        assert_eq!(plan.allocations.len(), 1);
        assert_eq!(plan.total_allocated, 1000.0);
    }

    #[tokio::test]
    async fn test_breaker_controls() {
        let engine = engine();
        for _ in 0..3 {
            engine.record_failure("scan:ethereum", None).await.unwrap();
        }
        assert!(engine.is_tripped().await.is_paused);
        assert!(engine
            .check_emergency_pause(RequestKind::Deployment)
            .await
            .is_blocked());
        assert_eq!(
            engine.check_emergency_pause(RequestKind::Withdrawal).await,
            PauseDecision::Allowed
        );

        engine.reset("ops").await.unwrap();
        assert!(!engine.is_tripped().await.is_paused);
        assert_eq!(engine.breaker().failure_count("scan:ethereum").await, 0);
    }

    #[tokio::test]
    async fn test_sanitize_is_idempotent() {
        let engine = engine();
        let raw = Strategy::new("  aave ", "ethereum", StrategyAction::Deposit, 99.9, 5000.0, 0.2);
        let once = engine.sanitize_strategy(&raw);
        assert_eq!(engine.sanitize_strategy(&once), once);
    }

    #[tokio::test]
    async fn test_empty_market_awaits_approval() {
        let engine = engine();
        let state = engine
            .run_pipeline(RunContext {
                user_address: "0xabc".to_string(),
                chain: "ethereum".to_string(),
                available_funds: 1000.0,
                max_investment_per_opportunity: 500.0,
                risk_tolerance: 5.0,
                daily_limit: None,
            })
            .await;

        assert!(state.human_approval_required);
        assert!(state.selected_strategy.is_none());
        assert!(!state.errors.is_empty());
    }
}
