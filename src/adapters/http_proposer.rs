//! HTTP strategy proposer
//!
//! POSTs the proposal request as JSON and hands back the raw response body.
//! The body is not interpreted here; strategy extraction happens in the
//! domain parser.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::ports::proposer::{ProposalRequest, ProposerError, StrategyProposer};

/// HTTP proposer settings
#[derive(Debug, Clone)]
pub struct HttpProposerConfig {
    pub url: String,
    /// Sent as a bearer token when present
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl HttpProposerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpProposer {
    http: Client,
    config: HttpProposerConfig,
}

impl HttpProposer {
    pub fn new(config: HttpProposerConfig) -> Result<Self, ProposerError> {
        if config.url.trim().is_empty() {
            return Err(ProposerError::NotConfigured("proposer url is empty".to_string()));
        }

        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ProposerError::NotConfigured(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http, config })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl StrategyProposer for HttpProposer {
    async fn propose(&self, request: &ProposalRequest) -> Result<String, ProposerError> {
        let mut req = self.http.post(&self.config.url).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key);
        }

        tracing::debug!(
            "Requesting {}-{} strategies for {} on {}",
            request.min_candidates,
            request.max_candidates,
            request.user_address,
            request.chain
        );

        let response = req
            .send()
            .await
            .map_err(|e| ProposerError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProposerError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            return Err(ProposerError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proposer_creation() {
        let proposer = HttpProposer::new(HttpProposerConfig::new("http://localhost:8080/propose"));
        assert!(proposer.is_ok());
        assert_eq!(proposer.unwrap().url(), "http://localhost:8080/propose");
    }

    #[test]
    fn test_empty_url_rejected() {
        let result = HttpProposer::new(HttpProposerConfig::new("  "));
        assert!(matches!(result, Err(ProposerError::NotConfigured(_))));
    }

    #[tokio::test]
    async fn test_unreachable_proposer_is_request_failure() {
        let mut config = HttpProposerConfig::new("http://127.0.0.1:9/propose");
        config.timeout = Duration::from_millis(500);
        let proposer = HttpProposer::new(config).unwrap();

        let request = ProposalRequest {
            user_address: "0xabc".to_string(),
            chain: "ethereum".to_string(),
            analysis: "quiet market".to_string(),
            available_funds: 1000.0,
            max_investment_per_opportunity: 500.0,
            risk_tolerance: 5.0,
            min_candidates: 3,
            max_candidates: 5,
        };
        let result = proposer.propose(&request).await;
        assert!(matches!(result, Err(ProposerError::RequestFailed(_))));
    }
}
