//! yield-sentinel - Risk-aware DeFi yield decision engine
//!
//! Scores yield opportunities, sizes allocations, validates proposed
//! strategies and runs them through a staged decision pipeline guarded by
//! a persistent circuit breaker.
//!
//! # Modules
//!
//! - `domain`: Core logic (RiskScorer, AllocationOptimizer, SafetyValidator, CircuitBreaker)
//! - `ports`: Trait abstractions (OpportunityFeed, StrategyProposer, TransactionExecutor, stores)
//! - `adapters`: External implementations (in-memory and JSON stores, file feed, HTTP proposer, CLI)
//! - `config`: Configuration loading and validation
//! - `application`: Decision pipeline and the DecisionEngine facade

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;

pub use application::{DecisionEngine, EngineConfig, EngineServices};
