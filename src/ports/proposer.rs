use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy proposer errors
#[derive(Debug, Error, Clone)]
pub enum ProposerError {
    #[error("Proposer request failed: {0}")]
    RequestFailed(String),

    #[error("Proposer returned status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Proposer not configured: {0}")]
    NotConfigured(String),
}

/// Portfolio context handed to the proposer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRequest {
    pub user_address: String,
    pub chain: String,
    /// Market narrative produced by the analyze stage
    pub analysis: String,
    pub available_funds: f64,
    pub max_investment_per_opportunity: f64,
    pub risk_tolerance: f64,
    /// How many strategies to return
    pub min_candidates: usize,
    pub max_candidates: usize,
}

/// External capability that turns a market narrative into candidate strategies
///
/// Returns raw text: the core extracts and validates the strategy array
/// itself, so implementations need not trust their own output.
#[async_trait]
pub trait StrategyProposer: Send + Sync {
    async fn propose(&self, request: &ProposalRequest) -> Result<String, ProposerError>;
}
