//! Paper transaction executor
//!
//! Stands in for a real executor: every simulation passes, and execution
//! only updates an in-memory book of positions per protocol.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::domain::execution_plan::{ExecutionPlan, StepKind};
use crate::ports::execution::{ExecutorError, StepOutcome, TransactionExecutor};

#[derive(Debug, Default)]
struct PaperBook {
    positions: HashMap<String, f64>,
    next_ref: u64,
}

#[derive(Debug, Default)]
pub struct PaperExecutor {
    book: Mutex<PaperBook>,
}

impl PaperExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paper position held in `protocol`
    pub async fn position(&self, protocol: &str) -> f64 {
        let book = self.book.lock().await;
        book.positions
            .get(&protocol.to_lowercase())
            .copied()
            .unwrap_or(0.0)
    }

    pub async fn executed_steps(&self) -> u64 {
        self.book.lock().await.next_ref
    }
}

#[async_trait]
impl TransactionExecutor for PaperExecutor {
    async fn simulate(&self, plan: &ExecutionPlan) -> Result<Vec<StepOutcome>, ExecutorError> {
        if plan.steps.is_empty() {
            return Err(ExecutorError::InvalidPlan("plan has no steps".to_string()));
        }
        Ok(plan
            .steps
            .iter()
            .map(|step| StepOutcome::succeeded(step.label(), None))
            .collect())
    }

    async fn execute(&self, plan: &ExecutionPlan) -> Result<Vec<StepOutcome>, ExecutorError> {
        if plan.steps.is_empty() {
            return Err(ExecutorError::InvalidPlan("plan has no steps".to_string()));
        }

        let mut book = self.book.lock().await;
        let mut outcomes = Vec::with_capacity(plan.steps.len());

        for step in &plan.steps {
            let key = step.protocol.to_lowercase();
            match step.kind {
                StepKind::Approve => {}
                StepKind::Deposit => {
                    *book.positions.entry(key).or_insert(0.0) += step.amount;
                }
                StepKind::Withdraw => {
                    let held = book.positions.entry(key).or_insert(0.0);
                    *held = (*held - step.amount).max(0.0);
                }
            }

            book.next_ref += 1;
            let tx_ref = format!("paper-{}", book.next_ref);
            info!(
                "[PAPER] {} ${:.2} on {} ({}) -> {}",
                step.kind, step.amount, step.protocol, step.chain, tx_ref
            );
            outcomes.push(StepOutcome::succeeded(step.label(), Some(tx_ref)));
        }

        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution_plan::PlanParams;
    use crate::domain::strategy::{Strategy, StrategyAction};

    fn plan(action: StrategyAction, amount: f64) -> ExecutionPlan {
        let strategy = Strategy::new("Aave", "ethereum", action, amount, 4.0, 3.0);
        ExecutionPlan::build(
            &strategy,
            PlanParams {
                gas_price_gwei: Some(20.0),
                available_funds: 1000.0,
                base_slippage_bps: 50,
                high_gas_gwei: 50.0,
            },
        )
    }

    #[tokio::test]
    async fn test_simulation_always_succeeds() {
        let executor = PaperExecutor::new();
        let outcomes = executor.simulate(&plan(StrategyAction::Deposit, 500.0)).await.unwrap();
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.success));
        assert_eq!(executor.executed_steps().await, 0);
    }

    #[tokio::test]
    async fn test_execute_tracks_positions() {
        let executor = PaperExecutor::new();
        let outcomes = executor.execute(&plan(StrategyAction::Deposit, 500.0)).await.unwrap();
        assert_eq!(outcomes[1].tx_ref.as_deref(), Some("paper-2"));
        assert_eq!(executor.position("aave").await, 500.0);

        executor.execute(&plan(StrategyAction::Withdraw, 800.0)).await.unwrap();
        assert_eq!(executor.position("Aave").await, 0.0);
    }
}
