//! Pipeline run state
//!
//! One `RunState` per invocation. Stages take the state by value and hand
//! back the next one, so a run never shares mutable state with another and
//! can be checkpointed between stages (the whole struct is serde-serializable).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::execution_plan::ExecutionPlan;
use crate::domain::opportunity::Opportunity;
use crate::domain::safety_validator::{UserContext, ValidationResult};
use crate::domain::strategy::Strategy;
use crate::ports::execution::StepOutcome;

/// Who the run is for and what they can afford
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunContext {
    pub user_address: String,
    pub chain: String,
    pub available_funds: f64,
    pub max_investment_per_opportunity: f64,
    /// Highest acceptable strategy risk score (0-10)
    pub risk_tolerance: f64,
    #[serde(default)]
    pub daily_limit: Option<f64>,
}

impl RunContext {
    pub fn user_context(&self) -> UserContext {
        UserContext {
            user_address: self.user_address.clone(),
            max_investment_per_opp: self.max_investment_per_opportunity,
            available_funds: self.available_funds,
            risk_tolerance: self.risk_tolerance,
            daily_limit: self.daily_limit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Entry,
    Analyze,
    Generate,
    Select,
    Plan,
    Route,
    Execute,
    Finalize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Entry => "entry",
            Stage::Analyze => "analyze",
            Stage::Generate => "generate",
            Stage::Select => "select",
            Stage::Plan => "plan",
            Stage::Route => "route",
            Stage::Execute => "execute",
            Stage::Finalize => "finalize",
        };
        write!(f, "{}", s)
    }
}

/// One line of the auditable reasoning trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    pub stage: Stage,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl fmt::Display for TrailEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.at.format("%Y-%m-%dT%H:%M:%SZ"),
            self.stage,
            self.message
        )
    }
}

/// A stage failure recorded into the run instead of aborting it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageError {
    pub stage: Stage,
    pub message: String,
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Still in progress
    Pending,
    Executed,
    /// Stopped only because a human has to sign off
    AwaitingApproval,
    /// Stopped by the circuit breaker or a safety violation
    Blocked,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Pending => "pending",
            RunOutcome::Executed => "executed",
            RunOutcome::AwaitingApproval => "awaiting_approval",
            RunOutcome::Blocked => "blocked",
            RunOutcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub run_id: String,
    pub context: RunContext,
    pub opportunities: Vec<Opportunity>,
    pub gas_price_gwei: Option<f64>,
    pub analysis: String,
    pub strategies: Vec<Strategy>,
    pub selected_strategy: Option<Strategy>,
    pub validation: Option<ValidationResult>,
    pub execution_plan: Option<ExecutionPlan>,
    pub execution_results: Vec<StepOutcome>,
    pub trail: Vec<TrailEntry>,
    pub human_approval_required: bool,
    pub circuit_breaker_triggered: bool,
    /// Completed analyze calls
    pub iteration: u32,
    pub errors: Vec<StageError>,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(context: RunContext) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            context,
            opportunities: Vec::new(),
            gas_price_gwei: None,
            analysis: String::new(),
            strategies: Vec::new(),
            selected_strategy: None,
            validation: None,
            execution_plan: None,
            execution_results: Vec::new(),
            trail: Vec::new(),
            human_approval_required: false,
            circuit_breaker_triggered: false,
            iteration: 0,
            errors: Vec::new(),
            outcome: RunOutcome::Pending,
            started_at: Utc::now(),
        }
    }

    /// Append a reasoning-trail entry
    pub fn note(mut self, stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::info!(run_id = %self.run_id, "{}: {}", stage, message);
        self.trail.push(TrailEntry {
            stage,
            message,
            at: Utc::now(),
        });
        self
    }

    /// Record a stage failure; it is also written to the trail
    pub fn fail(mut self, stage: Stage, message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::warn!(run_id = %self.run_id, "{} failed: {}", stage, message);
        self.trail.push(TrailEntry {
            stage,
            message: format!("ERROR {}", message),
            at: Utc::now(),
        });
        self.errors.push(StageError { stage, message });
        self
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Trail entries for one stage
    pub fn trail_for(&self, stage: Stage) -> impl Iterator<Item = &TrailEntry> {
        self.trail.iter().filter(move |e| e.stage == stage)
    }

    /// Human-readable explanation of the run
    pub fn explain(&self) -> String {
        let mut lines: Vec<String> = self.trail.iter().map(|e| e.to_string()).collect();
        for error in &self.errors {
            lines.push(format!("error: {}", error));
        }
        lines.join("\n")
    }
}
