//! Configuration Module
//!
//! Loads and validates configuration from TOML files.

pub mod loader;

pub use loader::{
    load_config, AllocationSection, BreakerSection, Config, ConfigError, LoggingSection,
    PipelineSection, ProposerSection, RiskSection, SafetySection,
};
