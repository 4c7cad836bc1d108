//! File-backed market data for offline and paper runs

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::opportunity::Opportunity;
use crate::ports::market_data::{FeedError, GasOracle, OpportunityFeed};

/// Reads a JSON array of opportunities on every call
#[derive(Debug, Clone)]
pub struct JsonFileFeed {
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every opportunity in the file, regardless of chain or status
    pub async fn load_all(&self) -> Result<Vec<Opportunity>, FeedError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FeedError::Unavailable(format!("{}: {}", self.path.display(), e)))?;

        serde_json::from_str(&content)
            .map_err(|e| FeedError::ParseError(format!("{}: {}", self.path.display(), e)))
    }
}

#[async_trait]
impl OpportunityFeed for JsonFileFeed {
    async fn active_opportunities(&self, chain: &str) -> Result<Vec<Opportunity>, FeedError> {
        let all = self.load_all().await?;
        let total = all.len();
        let active: Vec<Opportunity> = all
            .into_iter()
            .filter(|o| o.is_active && o.chain.eq_ignore_ascii_case(chain))
            .collect();

        tracing::debug!(
            "Loaded {} active opportunities on {} ({} in file)",
            active.len(),
            chain,
            total
        );
        Ok(active)
    }
}

/// Fixed gas prices per chain
#[derive(Debug, Clone, Default)]
pub struct StaticGasOracle {
    prices: HashMap<String, f64>,
    default_gwei: Option<f64>,
}

impl StaticGasOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same price on every chain
    pub fn uniform(gwei: f64) -> Self {
        Self {
            prices: HashMap::new(),
            default_gwei: Some(gwei),
        }
    }

    pub fn with_price(mut self, chain: &str, gwei: f64) -> Self {
        self.prices.insert(chain.to_lowercase(), gwei);
        self
    }
}

#[async_trait]
impl GasOracle for StaticGasOracle {
    async fn gas_price_gwei(&self, chain: &str) -> Result<f64, FeedError> {
        self.prices
            .get(&chain.to_lowercase())
            .copied()
            .or(self.default_gwei)
            .ok_or_else(|| FeedError::UnsupportedChain(chain.to_string()))
    }
}
