//! Portfolio Allocation Optimizer
//!
//! Greedy risk-adjusted allocation across eligible opportunities. Candidates
//! are ranked by a Sharpe/risk-adjusted-return composite and filled in order,
//! each allocation bounded by the remaining budget, the per-opportunity cap,
//! the per-protocol concentration cap and a conservative Kelly fraction.
//!
//! Also provides the drift comparison used to decide when positions should
//! be rebalanced. Everything here is stateless per call.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use super::opportunity::Opportunity;

/// Default share of the budget any one protocol may receive
pub const DEFAULT_MAX_PROTOCOL_ALLOCATION: f64 = 0.40;

/// Default smallest position worth opening (currency units)
pub const DEFAULT_MIN_POSITION_SIZE: f64 = 100.0;

/// Default drift percentage that triggers a rebalance
pub const DEFAULT_REBALANCE_THRESHOLD_PCT: f64 = 5.0;

/// Optimizer tuning constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationConfig {
    /// Max fraction of the budget per protocol name
    pub max_protocol_allocation: f64,
    pub min_position_size: f64,
    /// Fixed win probability for the Kelly bound; not fit per opportunity
    pub kelly_win_probability: f64,
    pub kelly_win_loss_ratio: f64,
    pub kelly_cap: f64,
    /// Annual risk-free rate as a decimal
    pub risk_free_rate: f64,
    /// Volatility estimate per unit of normalised risk when the feed supplies none
    pub volatility_factor: f64,
    pub rebalance_threshold_pct: f64,
    /// Absolute APY points a replacement must add to justify moving a position
    pub improvement_threshold_apy: f64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            max_protocol_allocation: DEFAULT_MAX_PROTOCOL_ALLOCATION,
            min_position_size: DEFAULT_MIN_POSITION_SIZE,
            kelly_win_probability: 0.7,
            kelly_win_loss_ratio: 2.0,
            kelly_cap: 0.25,
            risk_free_rate: 0.02,
            volatility_factor: 0.15,
            rebalance_threshold_pct: DEFAULT_REBALANCE_THRESHOLD_PCT,
            improvement_threshold_apy: 1.0,
        }
    }
}

/// Caller-supplied limits for one optimization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationConstraints {
    pub max_total_investment: f64,
    pub max_risk_score: f64,
    pub max_investment_per_opportunity: f64,
}

/// One sized position in a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Allocation {
    pub opportunity: Opportunity,
    pub amount: f64,
    /// Share of the total budget in percent
    pub percentage: f64,
    pub sharpe: f64,
    pub risk_adjusted_return: f64,
}

/// Output of an optimization run
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationPlan {
    pub allocations: Vec<Allocation>,
    pub total_allocated: f64,
    pub remaining: f64,
    /// Allocation-weighted APY in percent
    pub expected_return: f64,
    /// Allocation-weighted composite risk score
    pub portfolio_risk: f64,
    pub portfolio_volatility: f64,
    pub sharpe_ratio: f64,
    pub diversification_score: f64,
}

impl AllocationPlan {
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Total committed to a protocol name (case-insensitive)
    pub fn protocol_total(&self, protocol_name: &str) -> f64 {
        self.allocations
            .iter()
            .filter(|a| a.opportunity.protocol_name.eq_ignore_ascii_case(protocol_name))
            .map(|a| a.amount)
            .sum()
    }
}

/// Current or target size of a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionAmount {
    pub opportunity_id: String,
    pub amount: f64,
}

impl PositionAmount {
    pub fn new(opportunity_id: impl Into<String>, amount: f64) -> Self {
        Self {
            opportunity_id: opportunity_id.into(),
            amount,
        }
    }
}

/// What to do with a drifted position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RebalanceDirection {
    Increase,
    Decrease,
    Hold,
}

/// Drift of a single position against its target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionDrift {
    pub opportunity_id: String,
    pub current: f64,
    pub target: f64,
    pub drift_pct: f64,
    pub action: RebalanceDirection,
}

/// Result of comparing current positions against targets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceReport {
    pub needs_rebalancing: bool,
    pub positions: Vec<PositionDrift>,
    pub average_drift: f64,
    pub recommendation: String,
}

impl RebalanceReport {
    /// Positions whose drift exceeded the threshold
    pub fn actions(&self) -> impl Iterator<Item = &PositionDrift> {
        self.positions
            .iter()
            .filter(|p| p.action != RebalanceDirection::Hold)
    }
}

/// A strictly better home for an existing position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebalanceSuggestion {
    pub from_opportunity_id: String,
    pub to: Opportunity,
    /// APY points gained by moving
    pub apy_gain: f64,
}

/// Bounded Kelly fraction for win probability `p` and payoff ratio `b`
pub fn kelly_fraction(p: f64, win_loss_ratio: f64, max_kelly: f64) -> f64 {
    if win_loss_ratio <= 0.0 || !p.is_finite() || !win_loss_ratio.is_finite() {
        return 0.0;
    }
    let q = 1.0 - p;
    let f = (p * win_loss_ratio - q) / win_loss_ratio;
    f.clamp(0.0, max_kelly.max(0.0))
}

#[derive(Debug, Clone)]
struct Candidate<'a> {
    opportunity: &'a Opportunity,
    apy: f64,
    risk_score: f64,
    volatility: f64,
    sharpe: f64,
    risk_adjusted_return: f64,
    score: f64,
}

/// Stateless allocation optimizer
#[derive(Debug, Clone, Default)]
pub struct AllocationOptimizer {
    config: AllocationConfig,
}

impl AllocationOptimizer {
    pub fn new(config: AllocationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AllocationConfig {
        &self.config
    }

    /// Build a diversified allocation plan
    pub fn optimize(
        &self,
        opportunities: &[Opportunity],
        constraints: &AllocationConstraints,
    ) -> AllocationPlan {
        let budget = non_negative(constraints.max_total_investment);
        let per_opportunity_cap = non_negative(constraints.max_investment_per_opportunity);

        let mut candidates: Vec<Candidate<'_>> = opportunities
            .iter()
            .filter(|o| o.is_active)
            .filter_map(|o| {
                // Unscored opportunities are never eligible
                let risk = o.risk_score.filter(|r| r.is_finite())?;
                (risk <= constraints.max_risk_score).then(|| self.evaluate(o, risk))
            })
            .collect();

        // sort_by is stable, so equal scores keep input order
        candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

        // A lone candidate may take the whole budget; any two share the protocol cap
        let diversify = candidates.len() > 1;

        let protocol_cap = self.config.max_protocol_allocation * budget;
        let kelly = kelly_fraction(
            self.config.kelly_win_probability,
            self.config.kelly_win_loss_ratio,
            self.config.kelly_cap,
        );

        let mut remaining = budget;
        let mut committed: HashMap<String, f64> = HashMap::new();
        let mut allocations = Vec::new();

        for candidate in &candidates {
            if remaining < self.config.min_position_size {
                break;
            }

            let key = protocol_key(candidate.opportunity);
            let already = committed.get(&key).copied().unwrap_or(0.0);

            let mut amount = remaining.min(per_opportunity_cap);
            if diversify {
                let headroom = (protocol_cap - already).max(0.0);
                amount = amount.min(headroom).min(kelly * remaining);
            }
            let amount = floor_cents(amount);

            if amount < self.config.min_position_size {
                tracing::debug!(
                    "Skipping {}: sized ${:.2} below minimum ${:.2}",
                    candidate.opportunity.id,
                    amount,
                    self.config.min_position_size
                );
                continue;
            }

            remaining = floor_cents(remaining - amount);
            *committed.entry(key).or_insert(0.0) += amount;

            allocations.push(Allocation {
                opportunity: candidate.opportunity.clone(),
                amount,
                percentage: if budget > 0.0 { amount / budget * 100.0 } else { 0.0 },
                sharpe: candidate.sharpe,
                risk_adjusted_return: candidate.risk_adjusted_return,
            });
        }

        let plan = self.summarize(allocations, &candidates, budget);
        tracing::info!(
            "Allocation plan: {} positions, ${:.2} allocated, ${:.2} remaining, expected APY {:.2}%",
            plan.allocations.len(),
            plan.total_allocated,
            plan.remaining,
            plan.expected_return
        );
        plan
    }

    /// Compare current positions against targets and flag drifted ones
    pub fn needs_rebalancing(
        &self,
        current: &[PositionAmount],
        targets: &[PositionAmount],
        threshold_pct: f64,
    ) -> RebalanceReport {
        let mut ids: Vec<&str> = Vec::new();
        for p in current.iter().chain(targets.iter()) {
            if !ids.contains(&p.opportunity_id.as_str()) {
                ids.push(&p.opportunity_id);
            }
        }

        let amount_for = |list: &[PositionAmount], id: &str| -> f64 {
            list.iter()
                .filter(|p| p.opportunity_id == id)
                .map(|p| non_negative(p.amount))
                .sum()
        };

        let positions: Vec<PositionDrift> = ids
            .into_iter()
            .map(|id| {
                let cur = amount_for(current, id);
                let target = amount_for(targets, id);
                let drift_pct = if target > 0.0 {
                    (cur - target).abs() / target * 100.0
                } else if cur > 0.0 {
                    100.0
                } else {
                    0.0
                };
                let action = if drift_pct <= threshold_pct {
                    RebalanceDirection::Hold
                } else if cur < target {
                    RebalanceDirection::Increase
                } else {
                    RebalanceDirection::Decrease
                };
                PositionDrift {
                    opportunity_id: id.to_string(),
                    current: cur,
                    target,
                    drift_pct,
                    action,
                }
            })
            .collect();

        let average_drift = if positions.is_empty() {
            0.0
        } else {
            positions.iter().map(|p| p.drift_pct).mean()
        };

        let increases: Vec<&str> = positions
            .iter()
            .filter(|p| p.action == RebalanceDirection::Increase)
            .map(|p| p.opportunity_id.as_str())
            .collect();
        let decreases: Vec<&str> = positions
            .iter()
            .filter(|p| p.action == RebalanceDirection::Decrease)
            .map(|p| p.opportunity_id.as_str())
            .collect();
        let needs_rebalancing = !increases.is_empty() || !decreases.is_empty();

        let recommendation = if needs_rebalancing {
            let mut parts = Vec::new();
            if !increases.is_empty() {
                parts.push(format!("increase {}", increases.join(", ")));
            }
            if !decreases.is_empty() {
                parts.push(format!("decrease {}", decreases.join(", ")));
            }
            format!(
                "Rebalance {} position(s): {} (average drift {:.1}%)",
                increases.len() + decreases.len(),
                parts.join("; "),
                average_drift
            )
        } else {
            format!(
                "Portfolio within {:.1}% drift tolerance; no rebalance needed",
                threshold_pct
            )
        };

        RebalanceReport {
            needs_rebalancing,
            positions,
            average_drift,
            recommendation,
        }
    }

    /// Best eligible replacement for `current` that clears the APY improvement threshold
    pub fn find_better_opportunity(
        &self,
        current: &Opportunity,
        candidates: &[Opportunity],
        max_risk_score: f64,
    ) -> Option<RebalanceSuggestion> {
        let mut best: Option<(&Opportunity, f64)> = None;

        for candidate in candidates {
            if candidate.id == current.id || !candidate.is_active {
                continue;
            }
            let Some(risk) = candidate.risk_score else {
                continue;
            };
            if risk > max_risk_score {
                continue;
            }
            let gain = candidate.apy - current.apy;
            if gain < self.config.improvement_threshold_apy {
                continue;
            }
            if best.map_or(true, |(_, g)| gain > g) {
                best = Some((candidate, gain));
            }
        }

        best.map(|(to, gain)| RebalanceSuggestion {
            from_opportunity_id: current.id.clone(),
            to: to.clone(),
            apy_gain: gain,
        })
    }

    fn evaluate<'a>(&self, opportunity: &'a Opportunity, risk_score: f64) -> Candidate<'a> {
        let apy = opportunity.apy_decimal();
        let risk = (risk_score / 10.0).clamp(0.0, 1.0);
        let volatility = opportunity
            .volatility
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(risk * self.config.volatility_factor);

        let sharpe = if volatility > 0.0 {
            (apy - self.config.risk_free_rate) / volatility
        } else {
            0.0
        };
        let risk_adjusted_return = apy / (1.0 + risk);
        let score = sharpe * 100.0 + risk_adjusted_return * 50.0;

        Candidate {
            opportunity,
            apy,
            risk_score,
            volatility,
            sharpe,
            risk_adjusted_return,
            score,
        }
    }

    fn summarize(
        &self,
        allocations: Vec<Allocation>,
        candidates: &[Candidate<'_>],
        budget: f64,
    ) -> AllocationPlan {
        let total_allocated: f64 = allocations.iter().map(|a| a.amount).sum();
        let remaining = (budget - total_allocated).max(0.0);

        if allocations.is_empty() || total_allocated <= 0.0 {
            return AllocationPlan {
                allocations,
                total_allocated: 0.0,
                remaining: budget,
                ..AllocationPlan::default()
            };
        }

        let lookup = |id: &str| candidates.iter().find(|c| c.opportunity.id == id);

        let mut expected_apy = 0.0;
        let mut portfolio_risk = 0.0;
        let mut variance = 0.0;
        for allocation in &allocations {
            let weight = allocation.amount / total_allocated;
            if let Some(c) = lookup(&allocation.opportunity.id) {
                expected_apy += weight * c.apy;
                portfolio_risk += weight * c.risk_score;
                // Positions treated as independent
                variance += (weight * c.volatility).powi(2);
            }
        }
        let portfolio_volatility = variance.sqrt();
        let sharpe_ratio = if portfolio_volatility > 0.0 {
            (expected_apy - self.config.risk_free_rate) / portfolio_volatility
        } else {
            0.0
        };
        let diversification_score = (2.0 * allocations.len() as f64).min(10.0);

        AllocationPlan {
            allocations,
            total_allocated,
            remaining,
            expected_return: expected_apy * 100.0,
            portfolio_risk,
            portfolio_volatility,
            sharpe_ratio,
            diversification_score,
        }
    }
}

fn protocol_key(opportunity: &Opportunity) -> String {
    opportunity.protocol_name.trim().to_ascii_lowercase()
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn floor_cents(value: f64) -> f64 {
    (value * 100.0).floor() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn opp(id: &str, protocol: &str, apy: f64, risk: f64) -> Opportunity {
        Opportunity::new(id, protocol, "ethereum", apy, 1e9).with_risk_score(risk)
    }

    fn constraints(total: f64, max_risk: f64, per_opp: f64) -> AllocationConstraints {
        AllocationConstraints {
            max_total_investment: total,
            max_risk_score: max_risk,
            max_investment_per_opportunity: per_opp,
        }
    }

    #[test]
    fn test_kelly_fraction_is_capped() {
        // (0.7 * 2 - 0.3) / 2 = 0.55, capped to 0.25
        assert_relative_eq!(kelly_fraction(0.7, 2.0, 0.25), 0.25);
        assert_relative_eq!(kelly_fraction(0.7, 2.0, 1.0), 0.55, epsilon = 1e-12);
        assert_eq!(kelly_fraction(0.2, 1.0, 0.25), 0.0);
        assert_eq!(kelly_fraction(0.7, 0.0, 0.25), 0.0);
    }

    #[test]
    fn test_single_eligible_opportunity_takes_full_budget() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![opp("aave-usdc", "Aave", 4.25, 2.5)];

        let plan = optimizer.optimize(&opportunities, &constraints(1000.0, 7.0, 1000.0));

        assert_eq!(plan.allocations.len(), 1);
        assert_relative_eq!(plan.allocations[0].amount, 1000.0);
        assert_relative_eq!(plan.total_allocated, 1000.0);
        assert_relative_eq!(plan.remaining, 0.0);
        assert_relative_eq!(plan.expected_return, 4.25, epsilon = 1e-9);
        assert_relative_eq!(plan.diversification_score, 2.0);
    }

    #[test]
    fn test_high_risk_opportunity_is_filtered() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![
            opp("risky", "Degen", 90.0, 9.5),
            opp("safe", "Aave", 4.0, 2.0),
        ];

        let plan = optimizer.optimize(&opportunities, &constraints(1000.0, 7.0, 1000.0));
        assert!(plan.allocations.iter().all(|a| a.opportunity.id != "risky"));
    }

    #[test]
    fn test_unscored_and_inactive_are_ineligible() {
        let optimizer = AllocationOptimizer::default();
        let mut inactive = opp("inactive", "Compound", 6.0, 2.0);
        inactive.is_active = false;
        let unscored = Opportunity::new("unscored", "Curve", "ethereum", 6.0, 1e9);

        let plan = optimizer.optimize(&[inactive, unscored], &constraints(1000.0, 7.0, 1000.0));
        assert!(plan.is_empty());
        assert_relative_eq!(plan.remaining, 1000.0);
    }

    #[test]
    fn test_protocol_concentration_and_budget_limits() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![
            opp("aave-usdc", "Aave", 5.0, 2.0),
            opp("aave-dai", "Aave", 4.8, 2.0),
            opp("comp-usdc", "Compound", 4.5, 2.5),
            opp("curve-3pool", "Curve", 3.9, 3.0),
            opp("lido-steth", "Lido", 3.5, 2.0),
        ];
        let c = constraints(10_000.0, 7.0, 5_000.0);
        let plan = optimizer.optimize(&opportunities, &c);

        assert!(plan.total_allocated <= c.max_total_investment + 1e-9);
        for protocol in ["Aave", "Compound", "Curve", "Lido"] {
            assert!(plan.protocol_total(protocol) <= 0.40 * c.max_total_investment + 1e-9);
        }
        for allocation in &plan.allocations {
            assert!(allocation.amount >= DEFAULT_MIN_POSITION_SIZE);
            assert!(allocation.amount <= c.max_investment_per_opportunity);
        }
        assert_relative_eq!(
            plan.remaining,
            c.max_total_investment - plan.total_allocated,
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_same_protocol_pools_share_the_cap() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![
            opp("aave-usdc", "Aave", 4.5, 2.0),
            opp("aave-dai", "aave", 4.2, 2.0),
        ];
        let c = constraints(10_000.0, 7.0, 5_000.0);
        let plan = optimizer.optimize(&opportunities, &c);

        assert!(!plan.is_empty());
        assert!(plan.protocol_total("Aave") <= 0.40 * c.max_total_investment + 1e-9);
        assert!(plan.remaining >= 6_000.0 - 1e-9);
    }

    #[test]
    fn test_kelly_bounds_each_step() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![
            opp("a", "Alpha", 6.0, 2.0),
            opp("b", "Beta", 5.0, 2.0),
        ];
        let plan = optimizer.optimize(&opportunities, &constraints(1000.0, 7.0, 1000.0));

        // 25% of 1000, then 25% of the 750 left
        assert_eq!(plan.allocations.len(), 2);
        assert_relative_eq!(plan.allocations[0].amount, 250.0);
        assert_relative_eq!(plan.allocations[1].amount, 187.5);
        assert_relative_eq!(plan.remaining, 562.5);
    }

    #[test]
    fn test_ranking_prefers_risk_adjusted_return() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![
            opp("mediocre", "Beta", 5.0, 6.0),
            opp("strong", "Alpha", 8.0, 2.0),
        ];
        let plan = optimizer.optimize(&opportunities, &constraints(10_000.0, 7.0, 10_000.0));
        assert_eq!(plan.allocations[0].opportunity.id, "strong");
    }

    #[test]
    fn test_equal_scores_keep_input_order() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![
            opp("first", "Alpha", 5.0, 3.0),
            opp("second", "Beta", 5.0, 3.0),
        ];
        let plan = optimizer.optimize(&opportunities, &constraints(10_000.0, 7.0, 10_000.0));
        assert_eq!(plan.allocations[0].opportunity.id, "first");
        assert_eq!(plan.allocations[1].opportunity.id, "second");
    }

    #[test]
    fn test_budget_below_min_position_allocates_nothing() {
        let optimizer = AllocationOptimizer::default();
        let plan = optimizer.optimize(&[opp("a", "Aave", 5.0, 2.0)], &constraints(50.0, 7.0, 50.0));
        assert!(plan.is_empty());
        assert_relative_eq!(plan.remaining, 50.0);
    }

    #[test]
    fn test_supplied_volatility_is_used() {
        let optimizer = AllocationOptimizer::default();
        let opportunities = vec![opp("a", "Aave", 12.0, 4.0).with_volatility(0.05)];
        let plan = optimizer.optimize(&opportunities, &constraints(1000.0, 7.0, 1000.0));

        // (0.12 - 0.02) / 0.05
        assert_relative_eq!(plan.allocations[0].sharpe, 2.0, epsilon = 1e-9);
        assert_relative_eq!(plan.portfolio_volatility, 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_zero_risk_gives_zero_sharpe() {
        let optimizer = AllocationOptimizer::default();
        let plan = optimizer.optimize(&[opp("a", "Aave", 5.0, 0.0)], &constraints(1000.0, 7.0, 1000.0));
        assert_eq!(plan.allocations[0].sharpe, 0.0);
        assert_eq!(plan.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_needs_rebalancing_flags_drift() {
        let optimizer = AllocationOptimizer::default();
        let current = vec![
            PositionAmount::new("a", 1000.0),
            PositionAmount::new("b", 460.0),
            PositionAmount::new("c", 300.0),
        ];
        let targets = vec![
            PositionAmount::new("a", 1020.0),
            PositionAmount::new("b", 500.0),
            PositionAmount::new("c", 200.0),
        ];

        let report = optimizer.needs_rebalancing(&current, &targets, 5.0);
        assert!(report.needs_rebalancing);

        let by_id = |id: &str| report.positions.iter().find(|p| p.opportunity_id == id).unwrap();
        assert_eq!(by_id("a").action, RebalanceDirection::Hold);
        assert_eq!(by_id("b").action, RebalanceDirection::Increase);
        assert_eq!(by_id("c").action, RebalanceDirection::Decrease);
        assert_relative_eq!(by_id("c").drift_pct, 50.0);
        assert_eq!(report.actions().count(), 2);
        assert!(report.recommendation.contains("increase b"));
        assert!(report.recommendation.contains("decrease c"));
    }

    #[test]
    fn test_needs_rebalancing_handles_missing_sides() {
        let optimizer = AllocationOptimizer::default();
        let current = vec![PositionAmount::new("orphan", 400.0)];
        let targets = vec![PositionAmount::new("new", 400.0)];

        let report = optimizer.needs_rebalancing(&current, &targets, 5.0);
        assert_eq!(report.positions.len(), 2);
        assert_eq!(report.positions[0].action, RebalanceDirection::Decrease);
        assert_eq!(report.positions[1].action, RebalanceDirection::Increase);
        assert_relative_eq!(report.average_drift, 100.0);
    }

    #[test]
    fn test_no_rebalance_within_tolerance() {
        let optimizer = AllocationOptimizer::default();
        let current = vec![PositionAmount::new("a", 1000.0)];
        let targets = vec![PositionAmount::new("a", 1040.0)];

        let report = optimizer.needs_rebalancing(&current, &targets, 5.0);
        assert!(!report.needs_rebalancing);
        assert!(report.recommendation.contains("no rebalance needed"));

        let empty = optimizer.needs_rebalancing(&[], &[], 5.0);
        assert!(!empty.needs_rebalancing);
        assert_eq!(empty.average_drift, 0.0);
    }

    #[test]
    fn test_find_better_opportunity_respects_threshold_and_risk() {
        let optimizer = AllocationOptimizer::default();
        let current = opp("cur", "Aave", 4.0, 2.0);
        let candidates = vec![
            opp("marginal", "Compound", 4.5, 2.0),
            opp("risky", "Degen", 20.0, 9.0),
            opp("better", "Curve", 5.5, 3.0),
            opp("best", "Lido", 6.0, 3.5),
        ];

        let suggestion = optimizer
            .find_better_opportunity(&current, &candidates, 7.0)
            .unwrap();
        assert_eq!(suggestion.to.id, "best");
        assert_relative_eq!(suggestion.apy_gain, 2.0);

        let none = optimizer.find_better_opportunity(&current, &candidates[..1], 7.0);
        assert!(none.is_none());
    }
}
