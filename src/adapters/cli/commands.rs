//! CLI Command Handlers
//!
//! Implementation of all CLI commands for yield-sentinel. Market data comes
//! from a JSON opportunities file and execution is always paper.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapters::file_feed::{JsonFileFeed, StaticGasOracle};
use crate::adapters::http_proposer::{HttpProposer, HttpProposerConfig};
use crate::adapters::json_store::{JsonBreakerStore, DEFAULT_BREAKER_FILE};
use crate::adapters::memory::{InMemoryDecisionHistory, InMemoryRiskScoreStore};
use crate::adapters::paper::PaperExecutor;
use crate::application::engine::{DecisionEngine, EngineConfig, EngineServices};
use crate::application::pipeline::Collaborators;
use crate::application::run_state::RunContext;
use crate::config::Config;
use crate::domain::allocation::{AllocationConstraints, PositionAmount};
use crate::domain::safety_validator::UserContext;
use crate::domain::strategy::Strategy;
use crate::ports::proposer::StrategyProposer;

/// yield-sentinel - risk-aware DeFi yield decision engine
#[derive(Parser, Debug)]
#[command(
    name = "yield-sentinel",
    version = env!("CARGO_PKG_VERSION"),
    about = "Risk-aware decision engine for DeFi yield allocation",
    long_about = "yield-sentinel scores yield opportunities, sizes allocations, validates \
                  proposed strategies against safety rules and runs the full decision \
                  pipeline behind a persistent circuit breaker."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file (built-in defaults when omitted)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Score opportunities on the 0-10 risk scale
    Score(ScoreCmd),

    /// Size allocations across opportunities
    Optimize(OptimizeCmd),

    /// Compare current positions against targets
    Rebalance(RebalanceCmd),

    /// Run safety checks on a proposed strategy
    Validate(ValidateCmd),

    /// Run the full decision pipeline
    Run(RunCmd),

    /// Inspect or control the circuit breaker
    #[command(subcommand)]
    Breaker(BreakerCmd),
}

/// Who the decision is for
#[derive(Args, Debug, Clone)]
pub struct UserArgs {
    /// User wallet address
    #[arg(long, value_name = "ADDRESS", default_value = "0x0000000000000000000000000000000000000000")]
    pub user: String,

    /// Funds available to invest
    #[arg(long, value_name = "AMOUNT", default_value = "1000")]
    pub funds: f64,

    /// Cap per opportunity
    #[arg(long, value_name = "AMOUNT", default_value = "1000")]
    pub max_per_opportunity: f64,

    /// Highest acceptable risk score (0-10)
    #[arg(long, value_name = "SCORE", default_value = "7")]
    pub risk_tolerance: f64,

    /// Daily investment limit (defaults to a multiple of the per-opportunity cap)
    #[arg(long, value_name = "AMOUNT")]
    pub daily_limit: Option<f64>,
}

impl UserArgs {
    fn user_context(&self) -> UserContext {
        UserContext {
            user_address: self.user.clone(),
            max_investment_per_opp: self.max_per_opportunity,
            available_funds: self.funds,
            risk_tolerance: self.risk_tolerance,
            daily_limit: self.daily_limit,
        }
    }

    fn run_context(&self, chain: &str) -> RunContext {
        RunContext {
            user_address: self.user.clone(),
            chain: chain.to_string(),
            available_funds: self.funds,
            max_investment_per_opportunity: self.max_per_opportunity,
            risk_tolerance: self.risk_tolerance,
            daily_limit: self.daily_limit,
        }
    }
}

/// Score opportunities
#[derive(Parser, Debug)]
pub struct ScoreCmd {
    /// JSON file with an array of opportunities
    #[arg(short, long, value_name = "FILE", default_value = "opportunities.json")]
    pub opportunities: PathBuf,

    /// Only score this opportunity id
    #[arg(long, value_name = "ID")]
    pub id: Option<String>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Size allocations
#[derive(Parser, Debug)]
pub struct OptimizeCmd {
    /// JSON file with an array of opportunities
    #[arg(short, long, value_name = "FILE", default_value = "opportunities.json")]
    pub opportunities: PathBuf,

    /// Total amount to allocate
    #[arg(long, value_name = "AMOUNT", default_value = "1000")]
    pub budget: f64,

    /// Skip opportunities riskier than this
    #[arg(long, value_name = "SCORE", default_value = "7")]
    pub max_risk: f64,

    /// Cap per opportunity
    #[arg(long, value_name = "AMOUNT")]
    pub max_per_opportunity: Option<f64>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Check positions for drift
#[derive(Parser, Debug)]
pub struct RebalanceCmd {
    /// JSON array of current positions ({"opportunityId", "amount"})
    #[arg(long, value_name = "FILE")]
    pub current: PathBuf,

    /// JSON array of target positions
    #[arg(long, value_name = "FILE")]
    pub targets: PathBuf,

    /// Drift threshold in percent (config value when omitted)
    #[arg(long, value_name = "PCT")]
    pub threshold: Option<f64>,

    /// Also look for a better home for this opportunity id
    #[arg(long, value_name = "ID")]
    pub from: Option<String>,

    /// Opportunities to search when --from is given
    #[arg(short, long, value_name = "FILE", default_value = "opportunities.json")]
    pub opportunities: PathBuf,

    /// Risk ceiling for replacement candidates
    #[arg(long, value_name = "SCORE", default_value = "7")]
    pub max_risk: f64,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Validate a strategy
#[derive(Parser, Debug)]
pub struct ValidateCmd {
    /// JSON file with one strategy object
    #[arg(short, long, value_name = "FILE")]
    pub strategy: PathBuf,

    #[command(flatten)]
    pub user: UserArgs,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

/// Run the decision pipeline
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// JSON file with an array of opportunities
    #[arg(short, long, value_name = "FILE", default_value = "opportunities.json")]
    pub opportunities: PathBuf,

    /// Chain to scan
    #[arg(long, default_value = "ethereum")]
    pub chain: String,

    /// Gas price reported for every chain
    #[arg(long, value_name = "GWEI", default_value = "20")]
    pub gas_gwei: f64,

    #[command(flatten)]
    pub user: UserArgs,

    /// Print the final run state as JSON
    #[arg(long)]
    pub json: bool,
}

/// Circuit breaker control
#[derive(Subcommand, Debug)]
pub enum BreakerCmd {
    /// Show the persisted breaker status
    Status {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Pause all deployments
    Trip {
        /// Why the system is being paused
        #[arg(long)]
        reason: String,
    },

    /// Resume deployments and clear failure counters
    Reset {
        /// Operator performing the reset
        #[arg(long = "by", value_name = "NAME")]
        reset_by: String,
    },
}

/// Execute the CLI command against a loaded configuration
pub async fn execute(command: Command, config: Config) -> Result<()> {
    match command {
        Command::Score(cmd) => score_command(cmd, &config).await,
        Command::Optimize(cmd) => optimize_command(cmd, &config).await,
        Command::Rebalance(cmd) => rebalance_command(cmd, &config).await,
        Command::Validate(cmd) => validate_command(cmd, &config).await,
        Command::Run(cmd) => run_command(cmd, &config).await,
        Command::Breaker(cmd) => breaker_command(cmd, &config).await,
    }
}

/// Wire the engine to file-backed market data and a paper executor
fn build_engine(config: &Config, opportunities: &Path, gas_gwei: f64) -> Result<DecisionEngine> {
    let proposer: Option<Arc<dyn StrategyProposer>> = match config.proposer.url.as_deref() {
        Some(url) if !url.is_empty() => {
            let mut proposer_config = HttpProposerConfig::new(url);
            proposer_config.api_key = config.proposer.get_api_key();
            let client = HttpProposer::new(proposer_config)
                .context("Failed to create strategy proposer")?;
            Some(Arc::new(client))
        }
        _ => {
            tracing::info!("No proposer configured, using fallback strategy");
            None
        }
    };

    let state_file = config
        .breaker
        .state_path()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_BREAKER_FILE));
    tracing::debug!("Breaker state file: {}", state_file.display());

    let services = EngineServices {
        collaborators: Collaborators {
            feed: Arc::new(JsonFileFeed::new(opportunities)),
            gas: Arc::new(StaticGasOracle::uniform(gas_gwei)),
            proposer,
            executor: Arc::new(PaperExecutor::new()),
            history: Arc::new(InMemoryDecisionHistory::new()),
        },
        breaker_store: Arc::new(JsonBreakerStore::new(state_file)),
        risk_store: Some(Arc::new(InMemoryRiskScoreStore::new())),
    };

    Ok(DecisionEngine::new(EngineConfig::from(config), services))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Handle score command
async fn score_command(cmd: ScoreCmd, config: &Config) -> Result<()> {
    let feed = JsonFileFeed::new(&cmd.opportunities);
    let mut opportunities = feed
        .load_all()
        .await
        .context("Failed to load opportunities")?;

    if let Some(ref id) = cmd.id {
        opportunities.retain(|o| &o.id == id);
        if opportunities.is_empty() {
            bail!("No opportunity with id '{}' in {}", id, cmd.opportunities.display());
        }
    }

    let engine = build_engine(config, &cmd.opportunities, 0.0)?;
    let mut scores = Vec::with_capacity(opportunities.len());
    for opp in &opportunities {
        let score = engine
            .score_opportunity(opp)
            .await
            .with_context(|| format!("Failed to score {}", opp.id))?;
        scores.push(score);
    }

    if cmd.json {
        return print_json(&scores);
    }

    for score in &scores {
        println!(
            "{:<24} {:>5.2}  {:<6}  {}",
            score.opportunity_id,
            score.composite,
            format!("{:?}", score.category()).to_lowercase(),
            score.reasoning
        );
    }
    Ok(())
}

/// Handle optimize command
async fn optimize_command(cmd: OptimizeCmd, config: &Config) -> Result<()> {
    let feed = JsonFileFeed::new(&cmd.opportunities);
    let opportunities = feed
        .load_all()
        .await
        .context("Failed to load opportunities")?;

    let constraints = AllocationConstraints {
        max_total_investment: cmd.budget,
        max_risk_score: cmd.max_risk,
        max_investment_per_opportunity: cmd.max_per_opportunity.unwrap_or(cmd.budget),
    };

    let engine = build_engine(config, &cmd.opportunities, 0.0)?;
    let plan = engine
        .optimize_allocation(&opportunities, &constraints)
        .await
        .context("Failed to optimize allocation")?;

    if cmd.json {
        return print_json(&plan);
    }

    if plan.is_empty() {
        println!("No eligible opportunities (budget ${:.2}, max risk {:.1})", cmd.budget, cmd.max_risk);
        return Ok(());
    }

    for a in &plan.allocations {
        println!(
            "{:<24} ${:>10.2}  {:>5.1}%  APY {:>6.2}%  sharpe {:.2}",
            a.opportunity.id, a.amount, a.percentage, a.opportunity.apy, a.sharpe
        );
    }
    println!("Allocated: ${:.2}  Remaining: ${:.2}", plan.total_allocated, plan.remaining);
    println!(
        "Expected return: {:.2}%  Risk: {:.2}  Diversification: {:.2}",
        plan.expected_return, plan.portfolio_risk, plan.diversification_score
    );
    Ok(())
}

/// Handle rebalance command
async fn rebalance_command(cmd: RebalanceCmd, config: &Config) -> Result<()> {
    let current: Vec<PositionAmount> = read_json(&cmd.current)?;
    let targets: Vec<PositionAmount> = read_json(&cmd.targets)?;

    let engine = build_engine(config, &cmd.opportunities, 0.0)?;
    let report = engine.needs_rebalancing(&current, &targets, cmd.threshold);

    let suggestion = match cmd.from {
        Some(ref from) => {
            let opportunities = JsonFileFeed::new(&cmd.opportunities)
                .load_all()
                .await
                .context("Failed to load opportunities")?;
            let Some(held) = opportunities.iter().find(|o| &o.id == from) else {
                bail!("No opportunity with id '{}' in {}", from, cmd.opportunities.display());
            };
            engine.find_better_opportunity(held, &opportunities, cmd.max_risk)
        }
        None => None,
    };

    if cmd.json {
        return print_json(&serde_json::json!({
            "report": report,
            "suggestion": suggestion,
        }));
    }

    println!("{}", report.recommendation);
    for drift in report.actions() {
        println!(
            "  {:<24} ${:>10.2} -> ${:>10.2}  ({:+.1}%, {:?})",
            drift.opportunity_id, drift.current, drift.target, drift.drift_pct, drift.action
        );
    }
    if let Some(s) = suggestion {
        println!(
            "Move {} to {} (+{:.2} APY points)",
            s.from_opportunity_id, s.to.id, s.apy_gain
        );
    }
    Ok(())
}

/// Handle validate command
async fn validate_command(cmd: ValidateCmd, config: &Config) -> Result<()> {
    let strategy: Strategy = read_json(&cmd.strategy)?;
    let engine = build_engine(config, Path::new("opportunities.json"), 0.0)?;
    let result = engine
        .validate_strategy(&strategy, &cmd.user.user_context())
        .await;

    if cmd.json {
        return print_json(&result);
    }

    if result.valid {
        println!("✓ Valid ({:?} risk): {}", result.risk_level, result.strategy.summary());
    } else {
        println!("✗ Invalid ({:?} risk): {}", result.risk_level, result.strategy.summary());
        for v in &result.violations {
            println!("  [{:?}] {}: {}", v.severity, v.violation_type, v.message);
        }
    }
    Ok(())
}

/// Handle run command
async fn run_command(cmd: RunCmd, config: &Config) -> Result<()> {
    tracing::info!("Starting decision run on {}", cmd.chain);
    tracing::warn!("PAPER EXECUTION - no real transactions");

    let engine = build_engine(config, &cmd.opportunities, cmd.gas_gwei)?;
    let state = engine.run_pipeline(cmd.user.run_context(&cmd.chain)).await;
    engine.close().await;

    if cmd.json {
        return print_json(&state);
    }

    println!("Run {}", state.run_id);
    println!("{}", state.explain());
    println!("Outcome: {}", state.outcome.as_str());
    if let Some(ref selected) = state.selected_strategy {
        println!("Selected: {}", selected.summary());
    }
    if state.human_approval_required {
        println!("Human approval required before execution");
    }
    Ok(())
}

/// Handle breaker subcommands
async fn breaker_command(cmd: BreakerCmd, config: &Config) -> Result<()> {
    let engine = build_engine(config, Path::new("opportunities.json"), 0.0)?;

    match cmd {
        BreakerCmd::Status { json } => {
            let status = engine.is_tripped().await;
            if json {
                return print_json(&status);
            }
            println!("Circuit breaker: {}", status.state().description());
            if let Some(ref reason) = status.reason {
                println!("  Reason: {}", reason);
            }
            if let Some(at) = status.paused_at {
                println!("  Paused at: {}", at.to_rfc3339());
            }
            if let Some(ref by) = status.last_reset_by {
                println!("  Last reset by: {}", by);
            }
        }
        BreakerCmd::Trip { reason } => {
            engine
                .trip(&reason, Some(serde_json::json!({ "source": "cli" })))
                .await
                .context("Failed to trip circuit breaker")?;
            println!("Circuit breaker OPEN: {}", reason);
        }
        BreakerCmd::Reset { reset_by } => {
            engine
                .reset(&reset_by)
                .await
                .context("Failed to reset circuit breaker")?;
            println!("Circuit breaker CLOSED (reset by {})", reset_by);
        }
    }
    Ok(())
}
