//! Application Layer - Pipeline orchestration and the exposed engine
//!
//! Wires the domain services to the ports and runs the staged decision
//! pipeline for one user request at a time.

pub mod run_state;
pub mod pipeline;
pub mod engine;

pub use run_state::{RunContext, RunOutcome, RunState, Stage, StageError, TrailEntry};
pub use pipeline::{
    fallback_strategy, route, select_strategy, strategy_score, Collaborators, DecisionPipeline,
    PipelineConfig, Route,
};
pub use engine::{DecisionEngine, EngineConfig, EngineServices};
