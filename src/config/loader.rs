//! Configuration Loader
//!
//! Loads and validates configuration from TOML files. Every section is
//! optional; missing keys fall back to the built-in defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::application::pipeline::PipelineConfig;
use crate::domain::allocation::AllocationConfig;
use crate::domain::circuit_breaker::BreakerConfig;
use crate::domain::risk_scorer::{
    RiskConfig, RiskWeights, DEFAULT_CACHE_TTL_SECS, DEFAULT_REPUTABLE_PROTOCOLS,
};
use crate::domain::safety_validator::{
    SafetyConfig, DEFAULT_CONCENTRATION_PCT, DEFAULT_DAILY_LIMIT_MULTIPLIER, DEFAULT_MAX_APY_PCT,
    DEFAULT_PROTOCOL_WHITELIST,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub risk: RiskSection,
    pub allocation: AllocationSection,
    pub safety: SafetySection,
    pub breaker: BreakerSection,
    pub pipeline: PipelineSection,
    pub proposer: ProposerSection,
    pub logging: LoggingSection,
}

/// Risk scorer section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskSection {
    pub protocol_weight: f64,
    pub financial_weight: f64,
    pub technical_weight: f64,
    pub market_weight: f64,
    /// Score cache TTL in seconds
    pub cache_ttl_secs: u64,
    /// Name substrings of protocols with an established reputation
    pub reputable_protocols: Vec<String>,
}

impl Default for RiskSection {
    fn default() -> Self {
        let weights = RiskWeights::default();
        Self {
            protocol_weight: weights.protocol,
            financial_weight: weights.financial,
            technical_weight: weights.technical,
            market_weight: weights.market,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            reputable_protocols: DEFAULT_REPUTABLE_PROTOCOLS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Allocation optimizer section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AllocationSection {
    /// Maximum share of the budget per protocol (0.40 = 40%)
    pub max_protocol_allocation: f64,
    pub min_position_size: f64,
    pub kelly_win_probability: f64,
    pub kelly_win_loss_ratio: f64,
    pub kelly_cap: f64,
    pub risk_free_rate: f64,
    /// Volatility estimate per risk point when a feed supplies none
    pub volatility_factor: f64,
    pub rebalance_threshold_pct: f64,
    /// Absolute APY points a replacement must add
    pub improvement_threshold_apy: f64,
}

impl Default for AllocationSection {
    fn default() -> Self {
        let defaults = AllocationConfig::default();
        Self {
            max_protocol_allocation: defaults.max_protocol_allocation,
            min_position_size: defaults.min_position_size,
            kelly_win_probability: defaults.kelly_win_probability,
            kelly_win_loss_ratio: defaults.kelly_win_loss_ratio,
            kelly_cap: defaults.kelly_cap,
            risk_free_rate: defaults.risk_free_rate,
            volatility_factor: defaults.volatility_factor,
            rebalance_threshold_pct: defaults.rebalance_threshold_pct,
            improvement_threshold_apy: defaults.improvement_threshold_apy,
        }
    }
}

/// Safety validator section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetySection {
    pub protocol_whitelist: Vec<String>,
    pub max_apy_pct: f64,
    pub concentration_pct: f64,
    pub daily_limit_multiplier: f64,
    pub rapid_investment_count: usize,
    pub rapid_investment_window_secs: u64,
    pub min_decision_interval_secs: u64,
    pub trip_on_high_risk: bool,
}

impl Default for SafetySection {
    fn default() -> Self {
        Self {
            protocol_whitelist: DEFAULT_PROTOCOL_WHITELIST
                .iter()
                .map(|p| p.to_string())
                .collect(),
            max_apy_pct: DEFAULT_MAX_APY_PCT,
            concentration_pct: DEFAULT_CONCENTRATION_PCT,
            daily_limit_multiplier: DEFAULT_DAILY_LIMIT_MULTIPLIER,
            rapid_investment_count: 3,
            rapid_investment_window_secs: 3600,
            min_decision_interval_secs: 300,
            trip_on_high_risk: true,
        }
    }
}

/// Circuit breaker section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub window_secs: u64,
    pub allow_withdrawals: bool,
    /// JSON file holding the persisted status; in-memory when absent
    pub state_file: Option<String>,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window_secs: 600,
            allow_withdrawals: true,
            state_file: None,
        }
    }
}

impl BreakerSection {
    /// State file path with `~` expanded
    pub fn state_path(&self) -> Option<PathBuf> {
        self.state_file
            .as_ref()
            .filter(|p| !p.trim().is_empty())
            .map(|p| PathBuf::from(shellexpand::tilde(p).to_string()))
    }
}

/// Decision pipeline section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    pub proposer_timeout_secs: u64,
    pub max_iterations: u32,
    pub approval_amount_fraction: f64,
    pub min_confidence: f64,
    pub min_candidates: usize,
    pub max_candidates: usize,
    pub base_slippage_bps: u16,
    pub high_gas_gwei: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            proposer_timeout_secs: 5,
            max_iterations: 10,
            approval_amount_fraction: 0.5,
            min_confidence: 0.5,
            min_candidates: 3,
            max_candidates: 5,
            base_slippage_bps: 50,
            high_gas_gwei: 50.0,
        }
    }
}

/// External strategy proposer section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ProposerSection {
    /// Proposer endpoint; the fallback strategy is used when unset
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl ProposerSection {
    /// API key with PROPOSER_API_KEY env fallback
    pub fn get_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        std::env::var("PROPOSER_API_KEY").ok()
    }
}

/// Logging configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "trace", "debug", "info", "warn", "error"
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

fn check_fraction(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::ValidationError(format!(
            "{} must be 0-1, got {}",
            name, value
        )));
    }
    Ok(())
}

impl Config {
    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Risk weights
        let weights = RiskWeights::from(self);
        for (name, w) in [
            ("protocol_weight", weights.protocol),
            ("financial_weight", weights.financial),
            ("technical_weight", weights.technical),
            ("market_weight", weights.market),
        ] {
            check_fraction(name, w)?;
        }
        if !weights.is_normalized() {
            return Err(ConfigError::ValidationError(format!(
                "risk weights must sum to 1.0, got {}",
                weights.sum()
            )));
        }

        // Allocation
        let a = &self.allocation;
        if a.max_protocol_allocation <= 0.0 || a.max_protocol_allocation > 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "max_protocol_allocation must be in (0, 1], got {}",
                a.max_protocol_allocation
            )));
        }
        if a.min_position_size < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "min_position_size must be >= 0, got {}",
                a.min_position_size
            )));
        }
        check_fraction("kelly_win_probability", a.kelly_win_probability)?;
        check_fraction("kelly_cap", a.kelly_cap)?;
        if a.kelly_win_loss_ratio <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "kelly_win_loss_ratio must be > 0, got {}",
                a.kelly_win_loss_ratio
            )));
        }
        if a.volatility_factor < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "volatility_factor must be >= 0, got {}",
                a.volatility_factor
            )));
        }
        if a.rebalance_threshold_pct < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "rebalance_threshold_pct must be >= 0, got {}",
                a.rebalance_threshold_pct
            )));
        }

        // Safety
        let s = &self.safety;
        if s.protocol_whitelist.is_empty() {
            return Err(ConfigError::ValidationError(
                "protocol_whitelist cannot be empty".to_string(),
            ));
        }
        if s.max_apy_pct <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "max_apy_pct must be > 0, got {}",
                s.max_apy_pct
            )));
        }
        if s.concentration_pct <= 0.0 || s.concentration_pct > 100.0 {
            return Err(ConfigError::ValidationError(format!(
                "concentration_pct must be 0-100, got {}",
                s.concentration_pct
            )));
        }
        if s.daily_limit_multiplier <= 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "daily_limit_multiplier must be > 0, got {}",
                s.daily_limit_multiplier
            )));
        }
        if s.rapid_investment_count == 0 {
            return Err(ConfigError::ValidationError(
                "rapid_investment_count must be > 0".to_string(),
            ));
        }

        // Breaker
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be > 0".to_string(),
            ));
        }
        if self.breaker.window_secs == 0 {
            return Err(ConfigError::ValidationError(
                "window_secs must be > 0".to_string(),
            ));
        }

        // Pipeline
        let p = &self.pipeline;
        if p.proposer_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "proposer_timeout_secs must be > 0".to_string(),
            ));
        }
        if p.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be > 0".to_string(),
            ));
        }
        check_fraction("approval_amount_fraction", p.approval_amount_fraction)?;
        check_fraction("min_confidence", p.min_confidence)?;
        if p.min_candidates == 0 || p.max_candidates < p.min_candidates {
            return Err(ConfigError::ValidationError(format!(
                "candidate bounds must satisfy 0 < min <= max, got {}..{}",
                p.min_candidates, p.max_candidates
            )));
        }

        // Proposer
        if let Some(ref url) = self.proposer.url {
            if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(ConfigError::ValidationError(format!(
                    "proposer url must be http(s), got {}",
                    url
                )));
            }
        }

        Ok(())
    }
}

impl From<&Config> for RiskWeights {
    fn from(config: &Config) -> Self {
        RiskWeights {
            protocol: config.risk.protocol_weight,
            financial: config.risk.financial_weight,
            technical: config.risk.technical_weight,
            market: config.risk.market_weight,
        }
    }
}

impl From<&Config> for RiskConfig {
    fn from(config: &Config) -> Self {
        RiskConfig {
            weights: RiskWeights::from(config),
            cache_ttl: Duration::from_secs(config.risk.cache_ttl_secs),
            reputable_protocols: config
                .risk
                .reputable_protocols
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }
}

impl From<&Config> for AllocationConfig {
    fn from(config: &Config) -> Self {
        let a = &config.allocation;
        AllocationConfig {
            max_protocol_allocation: a.max_protocol_allocation,
            min_position_size: a.min_position_size,
            kelly_win_probability: a.kelly_win_probability,
            kelly_win_loss_ratio: a.kelly_win_loss_ratio,
            kelly_cap: a.kelly_cap,
            risk_free_rate: a.risk_free_rate,
            volatility_factor: a.volatility_factor,
            rebalance_threshold_pct: a.rebalance_threshold_pct,
            improvement_threshold_apy: a.improvement_threshold_apy,
        }
    }
}

impl From<&Config> for SafetyConfig {
    fn from(config: &Config) -> Self {
        let s = &config.safety;
        SafetyConfig {
            protocol_whitelist: s.protocol_whitelist.iter().map(|p| p.to_lowercase()).collect(),
            max_apy_pct: s.max_apy_pct,
            concentration_pct: s.concentration_pct,
            daily_limit_multiplier: s.daily_limit_multiplier,
            rapid_investment_count: s.rapid_investment_count,
            rapid_investment_window: Duration::from_secs(s.rapid_investment_window_secs),
            min_decision_interval: Duration::from_secs(s.min_decision_interval_secs),
            trip_on_high_risk: s.trip_on_high_risk,
        }
    }
}

impl From<&Config> for BreakerConfig {
    fn from(config: &Config) -> Self {
        BreakerConfig {
            failure_threshold: config.breaker.failure_threshold,
            window: Duration::from_secs(config.breaker.window_secs),
            allow_withdrawals: config.breaker.allow_withdrawals,
        }
    }
}

impl From<&Config> for PipelineConfig {
    fn from(config: &Config) -> Self {
        let p = &config.pipeline;
        PipelineConfig {
            proposer_timeout: Duration::from_secs(p.proposer_timeout_secs),
            max_iterations: p.max_iterations,
            approval_amount_fraction: p.approval_amount_fraction,
            min_confidence: p.min_confidence,
            min_candidates: p.min_candidates,
            max_candidates: p.max_candidates,
            base_slippage_bps: p.base_slippage_bps,
            high_gas_gwei: p.high_gas_gwei,
            allow_withdrawals: config.breaker.allow_withdrawals,
        }
    }
}

impl From<&Config> for crate::application::engine::EngineConfig {
    fn from(config: &Config) -> Self {
        crate::application::engine::EngineConfig {
            risk: RiskConfig::from(config),
            allocation: AllocationConfig::from(config),
            safety: SafetyConfig::from(config),
            breaker: BreakerConfig::from(config),
            pipeline: PipelineConfig::from(config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_valid_config() -> String {
        r#"
[risk]
protocol_weight = 0.40
financial_weight = 0.35
technical_weight = 0.15
market_weight = 0.10
cache_ttl_secs = 600
reputable_protocols = ["aave", "compound"]

[allocation]
max_protocol_allocation = 0.30
min_position_size = 250.0

[safety]
protocol_whitelist = ["Aave", "Compound", "Curve"]
max_apy_pct = 80.0

[breaker]
failure_threshold = 5
window_secs = 300
allow_withdrawals = false
state_file = "~/.yield-sentinel/breaker.json"

[pipeline]
proposer_timeout_secs = 3
max_candidates = 4

[proposer]
url = "https://proposer.internal/v1/strategies"

[logging]
level = "info"
"#
        .to_string()
    }

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.risk.cache_ttl_secs, 600);
        assert_eq!(config.allocation.max_protocol_allocation, 0.30);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.pipeline.max_candidates, 4);
        assert_eq!(config.logging.level, "info");
        // Unset keys keep their defaults
        assert_eq!(config.allocation.kelly_cap, 0.25);
        assert_eq!(config.pipeline.min_candidates, 3);
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.breaker.window_secs, 600);
        assert_eq!(config.safety.max_apy_pct, 100.0);
        assert!(config.proposer.url.is_none());
        assert!(config.breaker.state_path().is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_config("/nonexistent/path/config.toml");
        assert!(matches!(result.unwrap_err(), ConfigError::IoError(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let file = write_config("[risk\nprotocol_weight = ");
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::ParseError(_)
        ));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let file = write_config(
            r#"
[risk]
protocol_weight = 0.5
financial_weight = 0.35
technical_weight = 0.15
market_weight = 0.10
"#,
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_invalid_candidate_bounds() {
        let file = write_config(
            r#"
[pipeline]
min_candidates = 5
max_candidates = 3
"#,
        );
        assert!(matches!(
            load_config(file.path()).unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_invalid_proposer_url() {
        let file = write_config(
            r#"
[proposer]
url = "ftp://nope"
"#,
        );
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn test_conversions() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();

        let safety = SafetyConfig::from(&config);
        assert_eq!(safety.protocol_whitelist, vec!["aave", "compound", "curve"]);
        assert_eq!(safety.max_apy_pct, 80.0);

        let breaker = BreakerConfig::from(&config);
        assert_eq!(breaker.window, Duration::from_secs(300));
        assert!(!breaker.allow_withdrawals);

        let pipeline = PipelineConfig::from(&config);
        assert_eq!(pipeline.proposer_timeout, Duration::from_secs(3));
        assert!(!pipeline.allow_withdrawals);

        let risk = RiskConfig::from(&config);
        assert_eq!(risk.cache_ttl, Duration::from_secs(600));

        let allocation = AllocationConfig::from(&config);
        assert_eq!(allocation.min_position_size, 250.0);
    }

    #[test]
    fn test_state_path_expands_tilde() {
        let file = write_config(&create_valid_config());
        let config = load_config(file.path()).unwrap();
        let path = config.breaker.state_path().unwrap();
        if std::env::var("HOME").is_ok() {
            assert!(!path.to_string_lossy().starts_with('~'));
        }
        assert!(path.ends_with(".yield-sentinel/breaker.json"));
    }

    #[test]
    fn test_proposer_api_key_from_config() {
        let section = ProposerSection {
            url: None,
            api_key: Some("secret".to_string()),
        };
        assert_eq!(section.get_api_key().as_deref(), Some("secret"));
    }
}
