//! Domain Layer - Core decision logic
//!
//! Pure decision types and logic. Storage, feeds, the strategy proposer and
//! the transaction executor are reached only through the ports layer.
//!
//! ## Safety Modules
//!
//! - `safety_validator`: Hard per-strategy rules, all evaluated on every call
//! - `circuit_breaker`: Global pause after repeated failures, manual reset only

pub mod opportunity;
pub mod risk_scorer;
pub mod allocation;
pub mod strategy;
pub mod execution_plan;
pub mod safety_validator;
pub mod circuit_breaker;

pub use opportunity::{
    Composability, ContractComplexity, GovernanceType, LiquidityDepth, Opportunity,
    ProtocolType, RevenueModel, RiskAttributes,
};
pub use risk_scorer::{
    RiskBreakdown, RiskCategory, RiskConfig, RiskScore, RiskScoreError, RiskScorer, RiskTrend,
    RiskWeights,
};
pub use allocation::{
    kelly_fraction, Allocation, AllocationConfig, AllocationConstraints, AllocationOptimizer,
    AllocationPlan, PositionAmount, PositionDrift, RebalanceDirection, RebalanceReport,
    RebalanceSuggestion,
};
pub use strategy::{parse_strategies, sanitize_strategy, ProposalParseError, Strategy, StrategyAction};
pub use execution_plan::{ExecutionPlan, GasStrategy, PlanParams, PlanStep, RiskExposure, StepKind};
pub use safety_validator::{
    RiskLevel, SafetyConfig, SafetyValidator, Severity, UserContext, ValidationResult, Violation,
    ViolationType,
};
pub use circuit_breaker::{
    BreakerConfig, BreakerError, BreakerState, BreakerStatus, CircuitBreaker, PauseDecision,
    RequestKind,
};
