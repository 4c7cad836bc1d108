//! Safety Validator
//!
//! Hard pre-execution rules for a single strategy. Every check runs on
//! every call so the caller always sees the complete violation set; the
//! strategy is sanitized before any check so extreme proposer values cannot
//! slip past a comparison.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::circuit_breaker::CircuitBreaker;
use crate::domain::strategy::{sanitize_strategy, Strategy};
use crate::ports::persistence::DecisionHistoryStore;

/// Protocols accepted when no whitelist is configured
pub const DEFAULT_PROTOCOL_WHITELIST: &[&str] = &[
    "aave", "compound", "curve", "lido", "uniswap", "yearn", "convex", "maker", "morpho",
    "balancer", "rocket pool",
];

/// APY above this (percent) is considered unrealistic
pub const DEFAULT_MAX_APY_PCT: f64 = 100.0;

/// Share of available funds above which a position is concentrated (percent)
pub const DEFAULT_CONCENTRATION_PCT: f64 = 80.0;

/// Daily limit defaults to this multiple of the per-opportunity cap
pub const DEFAULT_DAILY_LIMIT_MULTIPLIER: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationType {
    AmountLimitExceeded,
    InsufficientFunds,
    RiskToleranceExceeded,
    DailyLimitExceeded,
    ProtocolNotWhitelisted,
    RapidRepeatedInvestments,
    UnrealisticApy,
    HighConcentration,
    RapidStrategyChanges,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::AmountLimitExceeded => "AMOUNT_LIMIT_EXCEEDED",
            ViolationType::InsufficientFunds => "INSUFFICIENT_FUNDS",
            ViolationType::RiskToleranceExceeded => "RISK_TOLERANCE_EXCEEDED",
            ViolationType::DailyLimitExceeded => "DAILY_LIMIT_EXCEEDED",
            ViolationType::ProtocolNotWhitelisted => "PROTOCOL_NOT_WHITELISTED",
            ViolationType::RapidRepeatedInvestments => "RAPID_REPEATED_INVESTMENTS",
            ViolationType::UnrealisticApy => "UNREALISTIC_APY",
            ViolationType::HighConcentration => "HIGH_CONCENTRATION",
            ViolationType::RapidStrategyChanges => "RAPID_STRATEGY_CHANGES",
        }
    }
}

impl std::fmt::Display for ViolationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Overall verdict severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// High if any high violation, medium for two or more mediums, low for one
    pub fn from_violations(violations: &[Violation]) -> Self {
        if violations.iter().any(|v| v.severity == Severity::High) {
            return RiskLevel::High;
        }
        let mediums = violations
            .iter()
            .filter(|v| v.severity == Severity::Medium)
            .count();
        match mediums {
            0 => RiskLevel::None,
            1 => RiskLevel::Low,
            _ => RiskLevel::Medium,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(rename = "type")]
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub message: String,
    /// Values that caused the violation
    pub context: serde_json::Value,
}

impl Violation {
    fn new(
        violation_type: ViolationType,
        severity: Severity,
        message: String,
        context: serde_json::Value,
    ) -> Self {
        Self {
            violation_type,
            severity,
            message,
            context,
        }
    }
}

/// Limits of the user the strategy would run for
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub user_address: String,
    pub max_investment_per_opp: f64,
    pub available_funds: f64,
    pub risk_tolerance: f64,
    /// Defaults to a multiple of the per-opportunity cap
    #[serde(default)]
    pub daily_limit: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub risk_level: RiskLevel,
    /// The sanitized strategy the checks ran against
    pub strategy: Strategy,
}

impl ValidationResult {
    pub fn has(&self, violation_type: ViolationType) -> bool {
        self.violations
            .iter()
            .any(|v| v.violation_type == violation_type)
    }

    /// Comma-separated violation types, for logs and error lists
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| v.violation_type.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Lowercase protocol names
    pub protocol_whitelist: Vec<String>,
    pub max_apy_pct: f64,
    pub concentration_pct: f64,
    pub daily_limit_multiplier: f64,
    pub rapid_investment_count: usize,
    pub rapid_investment_window: Duration,
    pub min_decision_interval: Duration,
    /// Escalate high-risk verdicts to a breaker trip
    pub trip_on_high_risk: bool,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            protocol_whitelist: DEFAULT_PROTOCOL_WHITELIST
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_apy_pct: DEFAULT_MAX_APY_PCT,
            concentration_pct: DEFAULT_CONCENTRATION_PCT,
            daily_limit_multiplier: DEFAULT_DAILY_LIMIT_MULTIPLIER,
            rapid_investment_count: 3,
            rapid_investment_window: Duration::from_secs(3600),
            min_decision_interval: Duration::from_secs(300),
            trip_on_high_risk: true,
        }
    }
}

pub struct SafetyValidator {
    config: SafetyConfig,
    history: Arc<dyn DecisionHistoryStore>,
    breaker: Option<Arc<CircuitBreaker>>,
}

impl SafetyValidator {
    pub fn new(config: SafetyConfig, history: Arc<dyn DecisionHistoryStore>) -> Self {
        Self {
            config,
            history,
            breaker: None,
        }
    }

    /// Attach the breaker that high-risk verdicts escalate to
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn is_whitelisted(&self, protocol: &str) -> bool {
        let name = protocol.trim().to_lowercase();
        self.config.protocol_whitelist.iter().any(|entry| {
            let entry = entry.trim().to_lowercase();
            name == entry
                || name.starts_with(&format!("{} ", entry))
                || name.starts_with(&format!("{}-", entry))
        })
    }

    pub async fn validate(&self, strategy: &Strategy, ctx: &UserContext) -> ValidationResult {
        self.validate_at(strategy, ctx, Utc::now()).await
    }

    pub async fn validate_at(
        &self,
        strategy: &Strategy,
        ctx: &UserContext,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let s = sanitize_strategy(strategy);
        let mut violations = Vec::new();

        if s.amount > ctx.max_investment_per_opp {
            violations.push(Violation::new(
                ViolationType::AmountLimitExceeded,
                Severity::High,
                format!(
                    "Amount ${:.2} exceeds per-opportunity limit ${:.2}",
                    s.amount, ctx.max_investment_per_opp
                ),
                json!({ "amount": s.amount, "limit": ctx.max_investment_per_opp }),
            ));
        }

        if s.amount > ctx.available_funds {
            violations.push(Violation::new(
                ViolationType::InsufficientFunds,
                Severity::High,
                format!(
                    "Amount ${:.2} exceeds available funds ${:.2}",
                    s.amount, ctx.available_funds
                ),
                json!({ "amount": s.amount, "availableFunds": ctx.available_funds }),
            ));
        }

        if s.risk_score > ctx.risk_tolerance {
            violations.push(Violation::new(
                ViolationType::RiskToleranceExceeded,
                Severity::Medium,
                format!(
                    "Risk score {:.0} exceeds tolerance {:.1}",
                    s.risk_score, ctx.risk_tolerance
                ),
                json!({ "riskScore": s.risk_score, "riskTolerance": ctx.risk_tolerance }),
            ));
        }

        let daily_limit = ctx
            .daily_limit
            .unwrap_or(ctx.max_investment_per_opp * self.config.daily_limit_multiplier);
        let invested_today = self.invested_today(&ctx.user_address, now).await;
        if invested_today + s.amount > daily_limit {
            violations.push(Violation::new(
                ViolationType::DailyLimitExceeded,
                Severity::High,
                format!(
                    "Daily total ${:.2} would exceed limit ${:.2}",
                    invested_today + s.amount,
                    daily_limit
                ),
                json!({
                    "investedToday": invested_today,
                    "amount": s.amount,
                    "dailyLimit": daily_limit,
                }),
            ));
        }

        if !self.is_whitelisted(&s.protocol) {
            violations.push(Violation::new(
                ViolationType::ProtocolNotWhitelisted,
                Severity::High,
                format!("Protocol '{}' is not whitelisted", s.protocol),
                json!({ "protocol": s.protocol }),
            ));
        }

        let recent = self
            .recent_protocol_investments(&ctx.user_address, &s.protocol, now)
            .await;
        if recent >= self.config.rapid_investment_count {
            violations.push(Violation::new(
                ViolationType::RapidRepeatedInvestments,
                Severity::Medium,
                format!(
                    "{} investments into {} within the last {} minutes",
                    recent,
                    s.protocol,
                    self.config.rapid_investment_window.as_secs() / 60
                ),
                json!({ "protocol": s.protocol, "recentInvestments": recent }),
            ));
        }

        if s.expected_apy > self.config.max_apy_pct {
            violations.push(Violation::new(
                ViolationType::UnrealisticApy,
                Severity::High,
                format!(
                    "Expected APY {:.1}% exceeds {:.0}%",
                    s.expected_apy, self.config.max_apy_pct
                ),
                json!({ "expectedApy": s.expected_apy, "maxApy": self.config.max_apy_pct }),
            ));
        }

        let concentration_limit = ctx.available_funds * self.config.concentration_pct / 100.0;
        if s.amount > concentration_limit {
            violations.push(Violation::new(
                ViolationType::HighConcentration,
                Severity::Medium,
                format!(
                    "Amount ${:.2} is more than {:.0}% of available funds",
                    s.amount, self.config.concentration_pct
                ),
                json!({ "amount": s.amount, "availableFunds": ctx.available_funds }),
            ));
        }

        if let Some(elapsed) = self.since_last_executed_decision(&ctx.user_address, now).await {
            if elapsed < self.config.min_decision_interval {
                violations.push(Violation::new(
                    ViolationType::RapidStrategyChanges,
                    Severity::Medium,
                    format!(
                        "Previous decision was {}s ago (minimum {}s)",
                        elapsed.as_secs(),
                        self.config.min_decision_interval.as_secs()
                    ),
                    json!({ "secondsSinceLastDecision": elapsed.as_secs() }),
                ));
            }
        }

        let risk_level = RiskLevel::from_violations(&violations);
        let result = ValidationResult {
            valid: violations.is_empty(),
            violations,
            risk_level,
            strategy: s,
        };

        if result.valid {
            tracing::debug!("Strategy passed safety checks: {}", result.strategy.summary());
        } else {
            tracing::warn!(
                "Strategy for {} failed safety checks ({:?}): {}",
                result.strategy.protocol,
                result.risk_level,
                result.summary()
            );
        }

        if result.risk_level == RiskLevel::High && self.config.trip_on_high_risk {
            let reason = format!(
                "High-risk strategy rejected for {}: {}",
                ctx.user_address,
                result.summary()
            );
            let context = json!({
                "userAddress": ctx.user_address,
                "protocol": result.strategy.protocol,
                "amount": result.strategy.amount,
                "violations": result.violations.iter().map(|v| v.violation_type.as_str()).collect::<Vec<_>>(),
            });
            self.trigger_circuit_breaker(&reason, context).await;
        }

        result
    }

    /// Ask the breaker to trip; failures are logged, never raised
    pub async fn trigger_circuit_breaker(&self, reason: &str, context: serde_json::Value) -> bool {
        let Some(breaker) = &self.breaker else {
            tracing::warn!("No circuit breaker attached; not tripping for: {}", reason);
            return false;
        };
        match breaker.trip(reason, Some(context)).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to trip circuit breaker: {}", e);
                false
            }
        }
    }

    async fn invested_today(&self, user_address: &str, now: DateTime<Utc>) -> f64 {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        match self.history.investments_since(user_address, midnight).await {
            Ok(records) => records.iter().map(|r| r.amount.max(0.0)).sum(),
            Err(e) => {
                tracing::warn!("Investment history unavailable, assuming none today: {}", e);
                0.0
            }
        }
    }

    async fn recent_protocol_investments(
        &self,
        user_address: &str,
        protocol: &str,
        now: DateTime<Utc>,
    ) -> usize {
        let window = chrono::Duration::from_std(self.config.rapid_investment_window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        match self.history.investments_since(user_address, now - window).await {
            Ok(records) => records
                .iter()
                .filter(|r| r.protocol.eq_ignore_ascii_case(protocol))
                .count(),
            Err(e) => {
                tracing::warn!("Investment history unavailable: {}", e);
                0
            }
        }
    }

    async fn since_last_executed_decision(
        &self,
        user_address: &str,
        now: DateTime<Utc>,
    ) -> Option<Duration> {
        match self.history.last_executed_decision(user_address).await {
            Ok(Some(decision)) => Some(
                now.signed_duration_since(decision.decided_at)
                    .to_std()
                    .unwrap_or(Duration::ZERO),
            ),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Decision history unavailable: {}", e);
                None
            }
        }
    }
}
