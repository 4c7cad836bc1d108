use async_trait::async_trait;
use thiserror::Error;

use crate::domain::opportunity::Opportunity;

/// Opportunity feed / gas oracle error type
#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("Feed unavailable: {0}")]
    Unavailable(String),

    #[error("Data parsing error: {0}")]
    ParseError(String),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),
}

/// Source of yield opportunities for a chain
#[async_trait]
pub trait OpportunityFeed: Send + Sync {
    /// Active opportunities currently listed on `chain`
    async fn active_opportunities(&self, chain: &str) -> Result<Vec<Opportunity>, FeedError>;
}

/// Source of current gas prices
#[async_trait]
pub trait GasOracle: Send + Sync {
    /// Current gas price on `chain` in gwei
    async fn gas_price_gwei(&self, chain: &str) -> Result<f64, FeedError>;
}
