//! Decision Pipeline
//!
//! `analyze -> generate -> select -> plan -> (route) -> execute | stop`
//!
//! Every stage consumes a `RunState` and returns the next one. A stage never
//! aborts the run: failures are appended to `errors` and the routing function
//! turns any error into a stop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::application::run_state::{RunContext, RunOutcome, RunState, Stage};
use crate::domain::circuit_breaker::{CircuitBreaker, PauseDecision, RequestKind};
use crate::domain::execution_plan::{ExecutionPlan, PlanParams};
use crate::domain::opportunity::Opportunity;
use crate::domain::risk_scorer::RiskScorer;
use crate::domain::safety_validator::SafetyValidator;
use crate::domain::strategy::{parse_strategies, sanitize_strategy, Strategy, StrategyAction};
use crate::ports::execution::TransactionExecutor;
use crate::ports::market_data::{GasOracle, OpportunityFeed};
use crate::ports::persistence::{DecisionHistoryStore, DecisionRecord, InvestmentRecord};
use crate::ports::proposer::{ProposalRequest, StrategyProposer};

/// Confidence given to the deterministic fallback strategy
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub proposer_timeout: Duration,
    /// Resumed states at or past this iteration are not analysed again
    pub max_iterations: u32,
    /// Amount above this share of available funds needs approval
    pub approval_amount_fraction: f64,
    /// Confidence below this needs approval
    pub min_confidence: f64,
    pub min_candidates: usize,
    pub max_candidates: usize,
    pub base_slippage_bps: u16,
    pub high_gas_gwei: f64,
    /// Let withdrawals execute while the breaker is paused
    pub allow_withdrawals: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            proposer_timeout: Duration::from_secs(5),
            max_iterations: 10,
            approval_amount_fraction: 0.5,
            min_confidence: 0.5,
            min_candidates: 3,
            max_candidates: 5,
            base_slippage_bps: 50,
            high_gas_gwei: 50.0,
            allow_withdrawals: true,
        }
    }
}

/// Routing verdict after the plan stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Execute,
    Stop(String),
}

/// Decide whether a planned run may execute
pub fn route(state: &RunState) -> Route {
    if state.circuit_breaker_triggered {
        return Route::Stop("circuit breaker triggered".to_string());
    }
    if state.human_approval_required {
        return Route::Stop("human approval required".to_string());
    }
    if !state.errors.is_empty() {
        return Route::Stop(format!("{} error(s) recorded", state.errors.len()));
    }
    match &state.execution_plan {
        Some(plan) if plan.all_simulations_succeed => Route::Execute,
        Some(_) => Route::Stop("simulations did not all succeed".to_string()),
        None => Route::Stop("no execution plan".to_string()),
    }
}

/// Deterministic selection score
///
/// `confidence*30 + min(apy/20,1)*25 + ((10-risk)/10)*25 + min(amount/funds,1)*20`
pub fn strategy_score(strategy: &Strategy, available_funds: f64) -> f64 {
    let apy_term = (strategy.expected_apy / 20.0).min(1.0);
    let risk_term = (10.0 - strategy.risk_score) / 10.0;
    let size_term = if available_funds > 0.0 {
        (strategy.amount / available_funds).min(1.0)
    } else if strategy.amount > 0.0 {
        1.0
    } else {
        0.0
    };

    strategy.confidence * 30.0 + apy_term * 25.0 + risk_term * 25.0 + size_term * 20.0
}

/// Top opportunity by APY, sized to what the user can put in one position
pub fn fallback_strategy(opportunities: &[Opportunity], ctx: &RunContext) -> Option<Strategy> {
    let mut best: Option<&Opportunity> = None;
    for opp in opportunities {
        if best.map_or(true, |b| opp.apy > b.apy) {
            best = Some(opp);
        }
    }
    let top = best?;

    let amount = ctx.available_funds.min(ctx.max_investment_per_opportunity);
    let strategy = Strategy::new(
        top.protocol_name.clone(),
        top.chain.clone(),
        StrategyAction::Deposit,
        amount,
        top.apy,
        top.risk_score.unwrap_or(10.0),
    )
    .with_confidence(FALLBACK_CONFIDENCE)
    .with_rationale(format!(
        "Fallback: highest APY opportunity {} at {:.2}%",
        top.id, top.apy
    ));

    Some(sanitize_strategy(&strategy))
}

/// Pick the highest scoring candidate and decide whether a human must approve it
pub fn select_strategy(mut state: RunState, config: &PipelineConfig) -> RunState {
    if state.strategies.is_empty() {
        state.selected_strategy = None;
        state.human_approval_required = true;
        return state.fail(Stage::Select, "No candidate strategies to select from");
    }

    let funds = state.context.available_funds;
    let mut best: Option<(usize, f64)> = None;
    for (i, candidate) in state.strategies.iter().enumerate() {
        let score = strategy_score(candidate, funds);
        tracing::debug!("Candidate {} scored {:.2}: {}", i, score, candidate.summary());
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((i, score));
        }
    }

    let Some((index, score)) = best else {
        return state;
    };
    let selected = state.strategies[index].scored(score);

    let mut reasons = Vec::new();
    if selected.amount > funds * config.approval_amount_fraction {
        reasons.push(format!(
            "amount above {:.0}% of available funds",
            config.approval_amount_fraction * 100.0
        ));
    }
    if selected.risk_score > state.context.risk_tolerance + 1.0 {
        reasons.push("risk exceeds tolerance".to_string());
    }
    if selected.confidence < config.min_confidence {
        reasons.push(format!("confidence below {:.2}", config.min_confidence));
    }

    state.human_approval_required = !reasons.is_empty();
    let message = if reasons.is_empty() {
        format!("Selected {} (score {:.1})", selected.summary(), score)
    } else {
        format!(
            "Selected {} (score {:.1}); human approval required: {}",
            selected.summary(),
            score,
            reasons.join(", ")
        )
    };
    state.selected_strategy = Some(selected);
    state.note(Stage::Select, message)
}

/// External collaborators the pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub feed: Arc<dyn OpportunityFeed>,
    pub gas: Arc<dyn GasOracle>,
    /// Without a proposer every run uses the fallback strategy
    pub proposer: Option<Arc<dyn StrategyProposer>>,
    pub executor: Arc<dyn TransactionExecutor>,
    pub history: Arc<dyn DecisionHistoryStore>,
}

pub struct DecisionPipeline {
    config: PipelineConfig,
    collaborators: Collaborators,
    scorer: Arc<RiskScorer>,
    validator: Arc<SafetyValidator>,
    breaker: Arc<CircuitBreaker>,
}

impl DecisionPipeline {
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        scorer: Arc<RiskScorer>,
        validator: Arc<SafetyValidator>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            config,
            collaborators,
            scorer,
            validator,
            breaker,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage for a fresh or resumed state
    pub async fn run(&self, state: RunState) -> RunState {
        tracing::info!(
            "Pipeline run {} for {} on {}",
            state.run_id,
            state.context.user_address,
            state.context.chain
        );

        let state = self.enter(state).await;
        if state.has_errors() {
            return self.finalize(state).await;
        }

        let state = self.analyze(state).await;
        if state.circuit_breaker_triggered || state.has_errors() {
            return self.finalize(state).await;
        }

        let state = self.generate(state).await;
        let state = select_strategy(state, &self.config);
        let state = self.plan(state).await;

        let state = match route(&state) {
            Route::Execute => {
                let state = state.note(Stage::Route, "All checks passed; executing");
                self.execute(state).await
            }
            Route::Stop(reason) => state.note(Stage::Route, format!("Stopping: {}", reason)),
        };

        self.finalize(state).await
    }

    /// Breaker and iteration gate
    async fn enter(&self, mut state: RunState) -> RunState {
        let iteration = state.iteration;
        if iteration >= self.config.max_iterations {
            return state.fail(
                Stage::Entry,
                format!(
                    "Iteration guard reached ({}/{}) without progress",
                    iteration, self.config.max_iterations
                ),
            );
        }

        let status = self.breaker.is_tripped().await;
        if status.is_paused {
            let reason = status
                .reason
                .unwrap_or_else(|| "Emergency pause active".to_string());
            if self.config.allow_withdrawals {
                return state.note(
                    Stage::Entry,
                    format!("Deployments paused ({}); only withdrawals may execute", reason),
                );
            }
            state.circuit_breaker_triggered = true;
            return state.fail(Stage::Entry, format!("Circuit breaker paused: {}", reason));
        }

        state
    }

    pub async fn analyze(&self, mut state: RunState) -> RunState {
        let chain = state.context.chain.clone();

        let opportunities = match self.collaborators.feed.active_opportunities(&chain).await {
            Ok(opps) => opps,
            Err(e) => {
                return self
                    .analysis_failed(state, format!("Opportunity feed failed: {}", e))
                    .await;
            }
        };

        let mut scored = Vec::with_capacity(opportunities.len());
        for opp in opportunities.into_iter().filter(|o| o.is_active) {
            match self.scorer.score(&opp).await {
                Ok(risk) => {
                    tracing::debug!(
                        "{} risk {:.1} ({:?}): {}",
                        opp.id,
                        risk.composite,
                        risk.category(),
                        risk.reasoning
                    );
                    scored.push(opp.with_risk_score(risk.composite));
                }
                Err(e) => {
                    return self
                        .analysis_failed(state, format!("Risk scoring failed: {}", e))
                        .await;
                }
            }
        }

        let gas_price = match self.collaborators.gas.gas_price_gwei(&chain).await {
            Ok(gwei) => Some(gwei),
            Err(e) => {
                tracing::warn!("Gas price unavailable on {}: {}", chain, e);
                state = state.note(Stage::Analyze, format!("Gas price unavailable: {}", e));
                None
            }
        };

        state.analysis = describe_market(&chain, &scored, gas_price);
        state.opportunities = scored;
        state.gas_price_gwei = gas_price;
        state.iteration += 1;

        let summary = state.analysis.clone();
        state.note(Stage::Analyze, summary)
    }

    async fn analysis_failed(&self, mut state: RunState, message: String) -> RunState {
        state.circuit_breaker_triggered = true;
        let key = format!("scan:{}", state.context.chain);
        let context = json!({ "runId": state.run_id, "error": message });
        if let Err(e) = self.breaker.record_failure(&key, Some(context)).await {
            tracing::error!("Failed to record breaker failure for {}: {}", key, e);
        }
        state.fail(Stage::Analyze, message)
    }

    pub async fn generate(&self, mut state: RunState) -> RunState {
        let proposed = match &self.collaborators.proposer {
            Some(proposer) => {
                let request = ProposalRequest {
                    user_address: state.context.user_address.clone(),
                    chain: state.context.chain.clone(),
                    analysis: state.analysis.clone(),
                    available_funds: state.context.available_funds,
                    max_investment_per_opportunity: state.context.max_investment_per_opportunity,
                    risk_tolerance: state.context.risk_tolerance,
                    min_candidates: self.config.min_candidates,
                    max_candidates: self.config.max_candidates,
                };

                match tokio::time::timeout(self.config.proposer_timeout, proposer.propose(&request))
                    .await
                {
                    Ok(Ok(raw)) => match parse_strategies(&raw, self.config.max_candidates) {
                        Ok(strategies) => Ok(strategies),
                        Err(e) => Err(format!("unusable proposer output: {}", e)),
                    },
                    Ok(Err(e)) => Err(format!("proposer error: {}", e)),
                    Err(_) => Err(format!(
                        "proposer timed out after {}s",
                        self.config.proposer_timeout.as_secs_f64()
                    )),
                }
            }
            None => Err("no proposer configured".to_string()),
        };

        match proposed {
            Ok(strategies) => {
                let mut message = format!("{} candidate strategies proposed", strategies.len());
                if strategies.len() < self.config.min_candidates {
                    message.push_str(&format!(
                        " (fewer than the {} requested)",
                        self.config.min_candidates
                    ));
                }
                state.strategies = strategies;
                state.note(Stage::Generate, message)
            }
            Err(reason) => {
                tracing::warn!("Using fallback strategy: {}", reason);
                match fallback_strategy(&state.opportunities, &state.context) {
                    Some(fallback) => {
                        let message = format!("Fallback strategy ({}): {}", reason, fallback.summary());
                        state.strategies = vec![fallback];
                        state.note(Stage::Generate, message)
                    }
                    None => {
                        state.strategies = Vec::new();
                        state.note(
                            Stage::Generate,
                            format!("No fallback available ({}): no opportunities", reason),
                        )
                    }
                }
            }
        }
    }

    pub async fn plan(&self, mut state: RunState) -> RunState {
        let Some(selected) = state.selected_strategy.clone() else {
            state.execution_plan = None;
            return state.fail(Stage::Plan, "No strategy selected; empty plan");
        };

        let validation = self
            .validator
            .validate(&selected, &state.context.user_context())
            .await;
        let valid = validation.valid;
        for violation in &validation.violations {
            state = state.fail(
                Stage::Plan,
                format!("{}: {}", violation.violation_type, violation.message),
            );
        }
        let checked = validation.strategy.clone();
        state.validation = Some(validation);

        let plan = ExecutionPlan::build(
            &checked,
            PlanParams {
                gas_price_gwei: state.gas_price_gwei,
                available_funds: state.context.available_funds,
                base_slippage_bps: self.config.base_slippage_bps,
                high_gas_gwei: self.config.high_gas_gwei,
            },
        );

        if !valid {
            state.execution_plan = Some(plan);
            return state.note(Stage::Plan, "Safety checks failed; simulation skipped");
        }

        let simulated = self.collaborators.executor.simulate(&plan).await;
        let plan = match simulated {
            Ok(outcomes) => plan.with_simulations(outcomes),
            Err(e) => {
                state = state.fail(Stage::Plan, format!("Simulation failed: {}", e));
                plan
            }
        };

        for failed in plan.failed_simulations() {
            let message = format!(
                "Simulation of {} failed: {}",
                failed.step,
                failed.error.as_deref().unwrap_or("unknown error")
            );
            state = state.fail(Stage::Plan, message);
        }

        let message = format!(
            "Plan: {} (simulations ok: {})",
            plan, plan.all_simulations_succeed
        );
        state.execution_plan = Some(plan);
        state.note(Stage::Plan, message)
    }

    pub async fn execute(&self, mut state: RunState) -> RunState {
        let Some(plan) = state.execution_plan.clone() else {
            return state.fail(Stage::Execute, "No execution plan");
        };

        let kind = if plan.strategy.action.is_withdrawal() {
            RequestKind::Withdrawal
        } else {
            RequestKind::Deployment
        };
        if let PauseDecision::Blocked { reason } = self
            .breaker
            .check_emergency_pause(kind, self.config.allow_withdrawals)
            .await
        {
            state.circuit_breaker_triggered = true;
            return state.fail(Stage::Execute, format!("Blocked by circuit breaker: {}", reason));
        }

        let key = format!("execute:{}", plan.strategy.protocol.to_lowercase());
        match self.collaborators.executor.execute(&plan).await {
            Ok(outcomes) => {
                let failed: Vec<String> = outcomes
                    .iter()
                    .filter(|o| !o.success)
                    .map(|o| {
                        format!("{} ({})", o.step, o.error.as_deref().unwrap_or("unknown error"))
                    })
                    .collect();
                let complete = failed.is_empty() && outcomes.len() >= plan.steps.len();
                state.execution_results = outcomes;

                if complete {
                    self.record_investment(&state, &plan.strategy).await;
                    state.note(
                        Stage::Execute,
                        format!("Executed {} step(s) for {}", plan.steps.len(), plan.strategy.protocol),
                    )
                } else {
                    self.record_execution_failure(&key, &state.run_id).await;
                    let detail = if failed.is_empty() {
                        "executor returned fewer outcomes than steps".to_string()
                    } else {
                        failed.join(", ")
                    };
                    state.fail(Stage::Execute, format!("Step failure: {}", detail))
                }
            }
            Err(e) => {
                self.record_execution_failure(&key, &state.run_id).await;
                state.fail(Stage::Execute, format!("Executor error: {}", e))
            }
        }
    }

    async fn record_execution_failure(&self, key: &str, run_id: &str) {
        let context = json!({ "runId": run_id });
        if let Err(e) = self.breaker.record_failure(key, Some(context)).await {
            tracing::error!("Failed to record breaker failure for {}: {}", key, e);
        }
    }

    async fn record_investment(&self, state: &RunState, strategy: &Strategy) {
        if strategy.action.is_withdrawal() {
            return;
        }
        let record = InvestmentRecord {
            user_address: state.context.user_address.clone(),
            protocol: strategy.protocol.clone(),
            chain: strategy.chain.clone(),
            amount: strategy.amount,
            executed_at: Utc::now(),
        };
        if let Err(e) = self.collaborators.history.record_investment(&record).await {
            tracing::warn!("Failed to record investment for {}: {}", record.user_address, e);
        }
    }

    async fn finalize(&self, mut state: RunState) -> RunState {
        let executed = !state.execution_results.is_empty()
            && state.execution_results.iter().all(|o| o.success)
            && !state.has_errors();
        let violated = state.validation.as_ref().map_or(false, |v| !v.valid);

        state.outcome = if executed {
            RunOutcome::Executed
        } else if state.circuit_breaker_triggered || violated {
            RunOutcome::Blocked
        } else if state.has_errors() {
            RunOutcome::Failed
        } else if state.human_approval_required {
            RunOutcome::AwaitingApproval
        } else {
            RunOutcome::Failed
        };

        if let Some(selected) = &state.selected_strategy {
            let record = DecisionRecord {
                user_address: state.context.user_address.clone(),
                run_id: state.run_id.clone(),
                protocol: selected.protocol.clone(),
                action: selected.action,
                amount: selected.amount,
                outcome: state.outcome.as_str().to_string(),
                decided_at: Utc::now(),
            };
            if let Err(e) = self.collaborators.history.record_decision(&record).await {
                tracing::warn!("Failed to record decision for run {}: {}", state.run_id, e);
            }
        }

        let outcome = state.outcome;
        let errors = state.errors.len();
        state.note(
            Stage::Finalize,
            format!("Run finished: {} ({} error(s))", outcome.as_str(), errors),
        )
    }
}

fn describe_market(chain: &str, opportunities: &[Opportunity], gas_price: Option<f64>) -> String {
    if opportunities.is_empty() {
        return format!("No active opportunities on {}", chain);
    }

    let mut by_apy: Vec<&Opportunity> = opportunities.iter().collect();
    by_apy.sort_by(|a, b| b.apy.total_cmp(&a.apy));
    let top: Vec<String> = by_apy
        .iter()
        .take(3)
        .map(|o| {
            format!(
                "{} {:.2}% APY (risk {:.1})",
                o.protocol_name,
                o.apy,
                o.risk_score.unwrap_or(10.0)
            )
        })
        .collect();

    let avg_risk = opportunities
        .iter()
        .map(|o| o.risk_score.unwrap_or(10.0))
        .sum::<f64>()
        / opportunities.len() as f64;

    let gas = gas_price
        .map(|g| format!("{:.1} gwei", g))
        .unwrap_or_else(|| "unknown".to_string());

    format!(
        "{} active opportunities on {}; top: {}; average risk {:.1}; gas {}",
        opportunities.len(),
        chain,
        top.join(", "),
        avg_risk,
        gas
    )
}
