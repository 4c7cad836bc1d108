use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::execution_plan::ExecutionPlan;

#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("Executor unavailable: {0}")]
    Unavailable(String),
    #[error("Simulation failed: {0}")]
    SimulationFailed(String),
    #[error("Transaction execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),
}

/// Result of one plan step, simulated or executed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step: String,
    pub success: bool,
    /// Transaction reference when the step landed
    pub tx_ref: Option<String>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn succeeded(step: impl Into<String>, tx_ref: Option<String>) -> Self {
        Self {
            step: step.into(),
            success: true,
            tx_ref,
            error: None,
        }
    }

    pub fn failed(step: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            success: false,
            tx_ref: None,
            error: Some(error.into()),
        }
    }
}

/// Transaction executor boundary
///
/// The core never builds or signs transactions; it hands over a plan and
/// reads back per-step outcomes.
#[async_trait::async_trait]
pub trait TransactionExecutor: Send + Sync {
    /// Dry-run every step of the plan
    async fn simulate(&self, plan: &ExecutionPlan) -> Result<Vec<StepOutcome>, ExecutorError>;

    /// Execute the plan for real
    async fn execute(&self, plan: &ExecutionPlan) -> Result<Vec<StepOutcome>, ExecutorError>;
}
