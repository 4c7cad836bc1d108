//! Multi-Factor Risk Scorer
//!
//! Scores an opportunity 0-10 (higher = riskier) from four weighted
//! sub-scores: protocol, financial, technical and market. Results are kept in
//! a TTL cache keyed by opportunity id, and every fresh score is also pushed
//! to the persisted history for trend queries.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;

use super::opportunity::{
    Composability, ContractComplexity, GovernanceType, LiquidityDepth, Opportunity, RevenueModel,
};
use crate::ports::persistence::RiskScoreStore;

/// Default cache TTL (15 minutes)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 900;

/// Composite below this is considered low risk
pub const LOW_RISK_CEILING: f64 = 3.5;

/// Composite below this (and above LOW_RISK_CEILING) is medium risk
pub const MEDIUM_RISK_CEILING: f64 = 6.5;

/// Sub-score at or above which a factor is called out in the reasoning
const HIGH_FACTOR_THRESHOLD: f64 = 7.0;

/// Sub-score at or below which a factor is called out as a strength
const LOW_FACTOR_THRESHOLD: f64 = 3.0;

const NEUTRAL_REASONING: &str = "Moderate balanced risk profile";

/// Protocols with an established reputation
pub const DEFAULT_REPUTABLE_PROTOCOLS: &[&str] = &[
    "aave", "compound", "uniswap", "curve", "lido", "maker", "convex", "balancer", "yearn",
    "rocket pool",
];

#[derive(Error, Debug, Clone)]
pub enum RiskScoreError {
    #[error("Risk score unavailable for opportunity '{0}': {1}")]
    ScoreUnavailable(String, String),
}

/// Relative weight of each sub-score; must sum to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskWeights {
    pub protocol: f64,
    pub financial: f64,
    pub technical: f64,
    pub market: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            protocol: 0.40,
            financial: 0.35,
            technical: 0.15,
            market: 0.10,
        }
    }
}

impl RiskWeights {
    pub fn sum(&self) -> f64 {
        self.protocol + self.financial + self.technical + self.market
    }

    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() < 1e-6
    }
}

/// Per-factor scores, each in [0, 10]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskBreakdown {
    pub protocol: f64,
    pub financial: f64,
    pub technical: f64,
    pub market: f64,
}

impl RiskBreakdown {
    /// Weighted sum rounded to one decimal
    pub fn composite(&self, weights: &RiskWeights) -> f64 {
        let raw = self.protocol * weights.protocol
            + self.financial * weights.financial
            + self.technical * weights.technical
            + self.market * weights.market;
        round1(raw)
    }
}

/// Coarse bucket for a composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub fn from_composite(composite: f64) -> Self {
        if composite < LOW_RISK_CEILING {
            RiskCategory::Low
        } else if composite < MEDIUM_RISK_CEILING {
            RiskCategory::Medium
        } else {
            RiskCategory::High
        }
    }
}

/// Scored risk for one opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskScore {
    pub opportunity_id: String,
    pub composite: f64,
    pub breakdown: RiskBreakdown,
    pub weights: RiskWeights,
    pub reasoning: String,
    pub calculated_at: DateTime<Utc>,
}

impl RiskScore {
    pub fn category(&self) -> RiskCategory {
        RiskCategory::from_composite(self.composite)
    }

    /// Whether the score is older than `ttl` at `now`
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.calculated_at);
        match age.to_std() {
            Ok(age) => age >= ttl,
            // calculated_at in the future: clock skew, treat as fresh
            Err(_) => false,
        }
    }
}

/// Direction of an opportunity's risk over a period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskTrend {
    pub opportunity_id: String,
    pub samples: usize,
    pub first: Option<f64>,
    pub latest: Option<f64>,
    /// latest - first; positive means risk is rising
    pub delta: f64,
}

/// Risk scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub weights: RiskWeights,
    pub cache_ttl: Duration,
    /// Lowercase substrings identifying reputable protocols
    pub reputable_protocols: Vec<String>,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            reputable_protocols: DEFAULT_REPUTABLE_PROTOCOLS
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }
}

/// Multi-factor risk scorer with a read-through cache
pub struct RiskScorer {
    config: RiskConfig,
    cache: Arc<RwLock<HashMap<String, RiskScore>>>,
    /// Ids whose persisted score must not be reused until recomputed
    invalidated: Arc<RwLock<HashSet<String>>>,
    history: Option<Arc<dyn RiskScoreStore>>,
}

impl RiskScorer {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            cache: Arc::new(RwLock::new(HashMap::new())),
            invalidated: Arc::new(RwLock::new(HashSet::new())),
            history: None,
        }
    }

    /// Attach a persisted history store for trend queries
    pub fn with_history(mut self, store: Arc<dyn RiskScoreStore>) -> Self {
        self.history = Some(store);
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score an opportunity, serving from cache while the cached score is fresh
    pub async fn score(&self, opportunity: &Opportunity) -> Result<RiskScore, RiskScoreError> {
        self.score_at(opportunity, Utc::now()).await
    }

    /// Score an opportunity as of `now`
    pub async fn score_at(
        &self,
        opportunity: &Opportunity,
        now: DateTime<Utc>,
    ) -> Result<RiskScore, RiskScoreError> {
        if opportunity.id.trim().is_empty() {
            return Err(RiskScoreError::ScoreUnavailable(
                opportunity.protocol_name.clone(),
                "opportunity has no id to key the score".to_string(),
            ));
        }

        {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.get(&opportunity.id) {
                // Age is re-checked against calculated_at rather than trusting insertion
                if !cached.is_stale(self.config.cache_ttl, now) {
                    tracing::debug!("Risk cache hit for {}", opportunity.id);
                    return Ok(cached.clone());
                }
            }
        }

        if let Some(persisted) = self.fresh_persisted(&opportunity.id, now).await {
            tracing::debug!("Reusing persisted risk score for {}", opportunity.id);
            self.cache
                .write()
                .await
                .insert(opportunity.id.clone(), persisted.clone());
            return Ok(persisted);
        }

        let score = self.calculate_at(opportunity, now);
        self.invalidated.write().await.remove(&opportunity.id);

        self.cache
            .write()
            .await
            .insert(opportunity.id.clone(), score.clone());

        if let Some(store) = &self.history {
            if let Err(e) = store.upsert(&score).await {
                tracing::warn!(
                    "Failed to persist risk score for {}: {} (continuing with computed score)",
                    opportunity.id,
                    e
                );
            }
        }

        Ok(score)
    }

    /// Latest stored score for `opportunity_id` if it is still inside the TTL
    async fn fresh_persisted(&self, opportunity_id: &str, now: DateTime<Utc>) -> Option<RiskScore> {
        let store = self.history.as_ref()?;
        if self.invalidated.read().await.contains(opportunity_id) {
            return None;
        }
        match store.latest(opportunity_id).await {
            Ok(Some(score)) if !score.is_stale(self.config.cache_ttl, now) => Some(score),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Risk history lookup failed for {}: {}", opportunity_id, e);
                None
            }
        }
    }

    /// Compute a fresh score, bypassing the cache
    pub fn calculate(&self, opportunity: &Opportunity) -> RiskScore {
        self.calculate_at(opportunity, Utc::now())
    }

    pub fn calculate_at(&self, opportunity: &Opportunity, now: DateTime<Utc>) -> RiskScore {
        let breakdown = RiskBreakdown {
            protocol: self.protocol_score(opportunity),
            financial: financial_score(opportunity),
            technical: technical_score(opportunity),
            market: market_score(opportunity),
        };
        let composite = breakdown.composite(&self.config.weights).clamp(0.0, 10.0);
        let reasoning = build_reasoning(opportunity, &breakdown);

        tracing::debug!(
            "Scored {} ({}): composite {:.1} [p={:.1} f={:.1} t={:.1} m={:.1}]",
            opportunity.id,
            opportunity.protocol_name,
            composite,
            breakdown.protocol,
            breakdown.financial,
            breakdown.technical,
            breakdown.market
        );

        RiskScore {
            opportunity_id: opportunity.id.clone(),
            composite,
            breakdown,
            weights: self.config.weights,
            reasoning,
            calculated_at: now,
        }
    }

    /// Risk movement for an opportunity since `since`, read from persisted history
    pub async fn risk_trend(&self, opportunity_id: &str, since: DateTime<Utc>) -> RiskTrend {
        let mut samples = match &self.history {
            Some(store) => match store.history(opportunity_id, since).await {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!("Risk history unavailable for {}: {}", opportunity_id, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };
        samples.sort_by_key(|s| s.calculated_at);

        let first = samples.first().map(|s| s.composite);
        let latest = samples.last().map(|s| s.composite);
        let delta = match (first, latest) {
            (Some(f), Some(l)) => round1(l - f),
            _ => 0.0,
        };

        RiskTrend {
            opportunity_id: opportunity_id.to_string(),
            samples: samples.len(),
            first,
            latest,
            delta,
        }
    }

    /// Drop a cached score so the next call recomputes
    pub async fn invalidate(&self, opportunity_id: &str) {
        self.cache.write().await.remove(opportunity_id);
        self.invalidated
            .write()
            .await
            .insert(opportunity_id.to_string());
    }

    pub async fn clear_cache(&self) {
        self.cache.write().await.clear();
    }

    pub async fn cached_count(&self) -> usize {
        self.cache.read().await.len()
    }

    fn is_reputable(&self, protocol_name: &str) -> bool {
        let name = protocol_name.to_ascii_lowercase();
        self.config
            .reputable_protocols
            .iter()
            .any(|p| !p.is_empty() && name.contains(&p.to_ascii_lowercase()))
    }

    fn protocol_score(&self, opportunity: &Opportunity) -> f64 {
        let attrs = &opportunity.risk_attributes;
        let mut score = 10.0;

        let age = finite_or_zero(attrs.age_years);
        if age >= 3.0 {
            score -= 3.0;
        } else if age >= 2.0 {
            score -= 2.0;
        } else if age >= 1.0 {
            score -= 1.0;
        }

        if attrs.audit_count >= 5 {
            score -= 3.0;
        } else if attrs.audit_count >= 3 {
            score -= 2.0;
        } else if attrs.audit_count >= 1 {
            score -= 1.0;
        }

        if attrs.has_bug_bounty {
            score -= 1.0;
        }

        match attrs.governance_type {
            GovernanceType::Decentralized => score -= 1.0,
            GovernanceType::Multisig => score -= 0.5,
            GovernanceType::Centralized => {}
        }

        if self.is_reputable(&opportunity.protocol_name) {
            score -= 2.0;
        }

        if attrs.team_doxxed {
            score -= 1.0;
        }

        clamp_score(score)
    }
}

fn financial_score(opportunity: &Opportunity) -> f64 {
    let attrs = &opportunity.risk_attributes;
    let mut score = 10.0;

    let tvl = finite_or_zero(opportunity.tvl);
    if tvl > 1_000_000_000.0 {
        score -= 4.0;
    } else if tvl > 100_000_000.0 {
        score -= 3.0;
    } else if tvl > 10_000_000.0 {
        score -= 2.0;
    } else if tvl > 1_000_000.0 {
        score -= 1.0;
    }

    // Sustainability penalty: very high yields rarely last, near-zero yields signal a dying pool
    let apy = finite_or_zero(opportunity.apy);
    if apy > 200.0 {
        score += 4.0;
    } else if apy > 100.0 {
        score += 3.0;
    } else if apy > 50.0 || apy < 1.0 {
        score += 1.0;
    }

    match attrs.liquidity_depth {
        LiquidityDepth::Deep => score -= 1.0,
        LiquidityDepth::Shallow => score += 1.0,
        LiquidityDepth::Moderate => {}
    }

    if attrs.revenue_model == RevenueModel::Sustainable {
        score -= 1.0;
    }

    if attrs.token_inflationary == Some(false) {
        score -= 0.5;
    }

    if let Some(vol) = attrs.apy_volatility_30d.filter(|v| v.is_finite()) {
        if vol < 5.0 {
            score -= 0.5;
        } else if vol > 20.0 {
            score += 1.0;
        }
    }

    clamp_score(score)
}

fn technical_score(opportunity: &Opportunity) -> f64 {
    let attrs = &opportunity.risk_attributes;
    let mut score = 5.0;

    score += match attrs.contract_complexity {
        ContractComplexity::Simple => -1.5,
        ContractComplexity::Moderate => 0.0,
        ContractComplexity::Complex => 1.5,
        ContractComplexity::VeryComplex => 2.5,
    };

    match attrs.is_upgradeable {
        Some(true) => score += 1.0,
        Some(false) => score -= 1.0,
        None => {}
    }

    if attrs.oracle_dependencies == 0 {
        score -= 0.5;
    } else if attrs.oracle_dependencies > 2 {
        score += 1.0;
    }

    if attrs.protocol_dependencies == 0 {
        score -= 0.5;
    } else if attrs.protocol_dependencies > 3 {
        score += 1.0;
    }

    if attrs.composability == Composability::High {
        score += 0.5;
    }

    clamp_score(score)
}

fn market_score(opportunity: &Opportunity) -> f64 {
    let attrs = &opportunity.risk_attributes;
    let mut score = 5.0;

    let vol_30 = attrs.apy_volatility_30d.filter(|v| v.is_finite());
    let vol_90 = attrs.apy_volatility_90d.filter(|v| v.is_finite());
    let combined = match (vol_30, vol_90) {
        (Some(a), Some(b)) => Some((a + b) / 2.0),
        (Some(a), None) | (None, Some(a)) => Some(a),
        (None, None) => None,
    };

    if let Some(vol) = combined {
        if vol > 50.0 {
            score += 2.0;
        } else if vol > 25.0 {
            score += 1.0;
        } else if vol < 5.0 {
            score -= 1.0;
        }
    }

    if attrs.protocol_type.has_regulatory_exposure() {
        score += 1.0;
    }

    if opportunity.is_ethereum_mainnet() {
        score -= 0.5;
    }

    clamp_score(score)
}

fn build_reasoning(opportunity: &Opportunity, breakdown: &RiskBreakdown) -> String {
    let mut reasons = Vec::new();

    if breakdown.protocol >= HIGH_FACTOR_THRESHOLD {
        reasons.push("High protocol risk due to unproven track record".to_string());
    } else if breakdown.protocol <= LOW_FACTOR_THRESHOLD {
        reasons.push("Established protocol with strong security track record".to_string());
    }

    if opportunity.apy > 100.0 {
        reasons.push(format!(
            "APY of {:.1}% is likely unsustainable",
            opportunity.apy
        ));
    }
    if breakdown.financial >= HIGH_FACTOR_THRESHOLD {
        reasons.push("Elevated financial risk from limited TVL or yield sustainability".to_string());
    }

    if breakdown.technical >= HIGH_FACTOR_THRESHOLD {
        reasons.push("Complex technical architecture increases smart contract risk".to_string());
    }

    if breakdown.market >= HIGH_FACTOR_THRESHOLD {
        reasons.push("High market volatility exposure".to_string());
    }

    if reasons.is_empty() {
        NEUTRAL_REASONING.to_string()
    } else {
        reasons.join("; ")
    }
}

fn clamp_score(score: f64) -> f64 {
    score.clamp(0.0, 10.0)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
