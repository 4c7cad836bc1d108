//! Execution plan metadata for a selected strategy
//!
//! The plan never contains transactions; it lists the steps an executor has
//! to carry out plus the gas, slippage and contingency parameters to use.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::strategy::{Strategy, StrategyAction};
use crate::ports::execution::StepOutcome;

/// Risk score above which slippage tolerance is widened
const HIGH_RISK_SLIPPAGE_THRESHOLD: f64 = 6.0;

/// Extra slippage for high-risk strategies (bps)
const HIGH_RISK_SLIPPAGE_BPS: u16 = 50;

/// Kind of on-chain step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Approve,
    Deposit,
    Withdraw,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepKind::Approve => "approve",
            StepKind::Deposit => "deposit",
            StepKind::Withdraw => "withdraw",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub index: usize,
    pub kind: StepKind,
    pub protocol: String,
    pub chain: String,
    pub amount: f64,
}

impl PlanStep {
    /// Label used to match step outcomes
    pub fn label(&self) -> String {
        format!("{}:{}:{}", self.index, self.kind, self.protocol)
    }
}

/// How aggressively to price gas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasStrategy {
    /// Gas is expensive; wait for a cheaper block
    Slow,
    Standard,
    /// Gas is cheap; land quickly
    Fast,
}

impl GasStrategy {
    /// Pick a gas strategy from the current price
    pub fn for_price(gas_price_gwei: Option<f64>, high_gas_gwei: f64) -> Self {
        match gas_price_gwei {
            Some(price) if price > high_gas_gwei => GasStrategy::Slow,
            Some(price) if price < high_gas_gwei / 2.0 => GasStrategy::Fast,
            _ => GasStrategy::Standard,
        }
    }
}

/// Capital exposure of the plan
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskExposure {
    /// amount * risk / 10
    pub amount_at_risk: f64,
    /// amount / available funds
    pub portfolio_fraction: f64,
    pub risk_score: f64,
}

/// Inputs to plan construction beyond the strategy itself
#[derive(Debug, Clone, Copy)]
pub struct PlanParams {
    pub gas_price_gwei: Option<f64>,
    pub available_funds: f64,
    pub base_slippage_bps: u16,
    pub high_gas_gwei: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    pub strategy: Strategy,
    pub steps: Vec<PlanStep>,
    pub gas_strategy: GasStrategy,
    pub gas_price_gwei: Option<f64>,
    pub slippage_tolerance_bps: u16,
    pub contingencies: Vec<String>,
    pub risk_exposure: RiskExposure,
    /// Filled in after the executor dry-runs the plan
    #[serde(default)]
    pub simulations: Vec<StepOutcome>,
    #[serde(default)]
    pub all_simulations_succeed: bool,
}

impl ExecutionPlan {
    pub fn build(strategy: &Strategy, params: PlanParams) -> Self {
        let steps = steps_for(strategy);

        let mut slippage_tolerance_bps = params.base_slippage_bps;
        if strategy.risk_score > HIGH_RISK_SLIPPAGE_THRESHOLD {
            slippage_tolerance_bps = slippage_tolerance_bps.saturating_add(HIGH_RISK_SLIPPAGE_BPS);
        }

        let gas_strategy = GasStrategy::for_price(params.gas_price_gwei, params.high_gas_gwei);

        let portfolio_fraction = if params.available_funds > 0.0 {
            strategy.amount / params.available_funds
        } else {
            0.0
        };

        let risk_exposure = RiskExposure {
            amount_at_risk: strategy.amount * strategy.risk_score / 10.0,
            portfolio_fraction,
            risk_score: strategy.risk_score,
        };

        let mut contingencies = vec![format!(
            "Abort if realised slippage exceeds {} bps",
            slippage_tolerance_bps
        )];
        if gas_strategy == GasStrategy::Slow {
            contingencies.push(format!(
                "Defer submission while gas stays above {:.0} gwei",
                params.high_gas_gwei
            ));
        }
        if steps.len() > 1 {
            contingencies.push("Halt remaining steps if any step fails".to_string());
        }
        if strategy.risk_score > HIGH_RISK_SLIPPAGE_THRESHOLD {
            contingencies.push(format!(
                "Withdraw from {} if its risk score rises further",
                strategy.protocol
            ));
        }

        Self {
            strategy: strategy.clone(),
            steps,
            gas_strategy,
            gas_price_gwei: params.gas_price_gwei,
            slippage_tolerance_bps,
            contingencies,
            risk_exposure,
            simulations: Vec::new(),
            all_simulations_succeed: false,
        }
    }

    /// Attach simulation results; every step must have a successful outcome
    pub fn with_simulations(mut self, simulations: Vec<StepOutcome>) -> Self {
        self.all_simulations_succeed = !self.steps.is_empty()
            && simulations.len() >= self.steps.len()
            && simulations.iter().all(|s| s.success);
        self.simulations = simulations;
        self
    }

    pub fn failed_simulations(&self) -> impl Iterator<Item = &StepOutcome> {
        self.simulations.iter().filter(|s| !s.success)
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} step(s) for {} ({:?} gas, {} bps slippage)",
            self.steps.len(),
            self.strategy.protocol,
            self.gas_strategy,
            self.slippage_tolerance_bps
        )
    }
}

fn steps_for(strategy: &Strategy) -> Vec<PlanStep> {
    let kinds: &[StepKind] = match strategy.action {
        StrategyAction::Deposit => &[StepKind::Approve, StepKind::Deposit],
        StrategyAction::Withdraw => &[StepKind::Withdraw],
        StrategyAction::Rebalance => &[StepKind::Withdraw, StepKind::Deposit],
    };

    kinds
        .iter()
        .enumerate()
        .map(|(index, kind)| PlanStep {
            index,
            kind: *kind,
            protocol: strategy.protocol.clone(),
            chain: strategy.chain.clone(),
            amount: strategy.amount,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params(gas: Option<f64>) -> PlanParams {
        PlanParams {
            gas_price_gwei: gas,
            available_funds: 2000.0,
            base_slippage_bps: 50,
            high_gas_gwei: 50.0,
        }
    }

    #[test]
    fn test_deposit_plan_steps() {
        let strategy = Strategy::new("Aave", "ethereum", StrategyAction::Deposit, 500.0, 4.0, 3.0);
        let plan = ExecutionPlan::build(&strategy, params(Some(30.0)));

        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].kind, StepKind::Approve);
        assert_eq!(plan.steps[1].kind, StepKind::Deposit);
        assert_eq!(plan.slippage_tolerance_bps, 50);
        assert_eq!(plan.gas_strategy, GasStrategy::Standard);
        assert_relative_eq!(plan.risk_exposure.amount_at_risk, 150.0);
        assert_relative_eq!(plan.risk_exposure.portfolio_fraction, 0.25);
        assert!(!plan.all_simulations_succeed);
    }

    #[test]
    fn test_high_risk_widens_slippage() {
        let strategy = Strategy::new("Degen", "base", StrategyAction::Deposit, 100.0, 40.0, 8.0);
        let plan = ExecutionPlan::build(&strategy, params(None));

        assert_eq!(plan.slippage_tolerance_bps, 100);
        assert!(plan.contingencies.iter().any(|c| c.contains("Withdraw from Degen")));
    }

    #[test]
    fn test_gas_strategy_thresholds() {
        assert_eq!(GasStrategy::for_price(Some(80.0), 50.0), GasStrategy::Slow);
        assert_eq!(GasStrategy::for_price(Some(10.0), 50.0), GasStrategy::Fast);
        assert_eq!(GasStrategy::for_price(Some(40.0), 50.0), GasStrategy::Standard);
        assert_eq!(GasStrategy::for_price(None, 50.0), GasStrategy::Standard);
    }

    #[test]
    fn test_rebalance_and_withdraw_steps() {
        let rebalance = Strategy::new("Curve", "ethereum", StrategyAction::Rebalance, 100.0, 5.0, 3.0);
        let kinds: Vec<StepKind> = ExecutionPlan::build(&rebalance, params(None))
            .steps
            .iter()
            .map(|s| s.kind)
            .collect();
        assert_eq!(kinds, vec![StepKind::Withdraw, StepKind::Deposit]);

        let withdraw = Strategy::new("Curve", "ethereum", StrategyAction::Withdraw, 100.0, 5.0, 3.0);
        assert_eq!(ExecutionPlan::build(&withdraw, params(None)).steps.len(), 1);
    }

    #[test]
    fn test_simulations_must_cover_every_step() {
        let strategy = Strategy::new("Aave", "ethereum", StrategyAction::Deposit, 500.0, 4.0, 3.0);
        let plan = ExecutionPlan::build(&strategy, params(None));

        let partial = plan
            .clone()
            .with_simulations(vec![StepOutcome::succeeded("0:approve:Aave", None)]);
        assert!(!partial.all_simulations_succeed);

        let failed = plan.clone().with_simulations(vec![
            StepOutcome::succeeded("0:approve:Aave", None),
            StepOutcome::failed("1:deposit:Aave", "reverted"),
        ]);
        assert!(!failed.all_simulations_succeed);
        assert_eq!(failed.failed_simulations().count(), 1);

        let ok = plan.with_simulations(vec![
            StepOutcome::succeeded("0:approve:Aave", None),
            StepOutcome::succeeded("1:deposit:Aave", None),
        ]);
        assert!(ok.all_simulations_succeed);
    }

    #[test]
    fn test_zero_funds_exposure() {
        let strategy = Strategy::new("Aave", "ethereum", StrategyAction::Deposit, 0.0, 4.0, 3.0);
        let mut p = params(None);
        p.available_funds = 0.0;
        let plan = ExecutionPlan::build(&strategy, p);
        assert_eq!(plan.risk_exposure.portfolio_fraction, 0.0);
    }
}
