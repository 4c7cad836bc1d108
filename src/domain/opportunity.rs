//! Yield Opportunities
//!
//! Immutable snapshot of a yield-bearing opportunity as delivered by the
//! opportunity feed, together with the qualitative attributes the risk
//! scorer consumes.

use serde::{Deserialize, Serialize};

/// Governance model of a protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GovernanceType {
    #[default]
    Centralized,
    Multisig,
    Decentralized,
}

/// Smart contract complexity as assessed by the data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractComplexity {
    Simple,
    #[default]
    Moderate,
    Complex,
    VeryComplex,
}

/// Depth of the market backing the position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidityDepth {
    Deep,
    #[default]
    Moderate,
    Shallow,
}

/// How heavily other protocols build on top of this one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composability {
    Low,
    #[default]
    Medium,
    High,
}

/// Where the yield comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevenueModel {
    /// Fees or interest paid by real users
    Sustainable,
    /// Token emissions
    Emissions,
    #[default]
    Unknown,
}

/// Broad protocol category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolType {
    Lending,
    Dex,
    Staking,
    Yield,
    Options,
    StructuredProduct,
    #[default]
    Other,
}

impl ProtocolType {
    /// Categories with elevated regulatory exposure
    pub fn has_regulatory_exposure(&self) -> bool {
        matches!(self, ProtocolType::Options | ProtocolType::StructuredProduct)
    }
}

/// Qualitative risk signals for an opportunity
///
/// Every field has a neutral default so partially populated feed records
/// still score, just without the missing signal's adjustment.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskAttributes {
    /// Protocol age in years
    pub age_years: f64,
    /// Number of completed security audits
    pub audit_count: u32,
    pub has_bug_bounty: bool,
    pub governance_type: GovernanceType,
    pub team_doxxed: bool,
    pub contract_complexity: ContractComplexity,
    /// `Some(false)` means the contracts are immutable
    pub is_upgradeable: Option<bool>,
    pub oracle_dependencies: u32,
    pub protocol_dependencies: u32,
    pub composability: Composability,
    pub liquidity_depth: LiquidityDepth,
    /// 30-day APY volatility in percent
    #[serde(rename = "apyVolatility30d")]
    pub apy_volatility_30d: Option<f64>,
    /// 90-day APY volatility in percent
    #[serde(rename = "apyVolatility90d")]
    pub apy_volatility_90d: Option<f64>,
    pub revenue_model: RevenueModel,
    pub token_inflationary: Option<bool>,
    pub protocol_type: ProtocolType,
}

fn default_active() -> bool {
    true
}

/// A candidate yield opportunity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Opportunity {
    pub id: String,
    pub protocol_name: String,
    pub chain: String,
    /// Annual percentage yield in percent (4.25 = 4.25%)
    pub apy: f64,
    /// Total value locked in currency units
    pub tvl: f64,
    #[serde(default)]
    pub risk_attributes: RiskAttributes,
    /// Composite risk score (0-10), attached by the risk scorer or supplied by the feed
    #[serde(default)]
    pub risk_score: Option<f64>,
    /// Annualised return volatility as a decimal, if the feed knows it
    #[serde(default)]
    pub volatility: Option<f64>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl Opportunity {
    /// Create an active opportunity with neutral risk attributes
    pub fn new(
        id: impl Into<String>,
        protocol_name: impl Into<String>,
        chain: impl Into<String>,
        apy: f64,
        tvl: f64,
    ) -> Self {
        Self {
            id: id.into(),
            protocol_name: protocol_name.into(),
            chain: chain.into(),
            apy,
            tvl,
            risk_attributes: RiskAttributes::default(),
            risk_score: None,
            volatility: None,
            is_active: true,
        }
    }

    pub fn with_attributes(mut self, attributes: RiskAttributes) -> Self {
        self.risk_attributes = attributes;
        self
    }

    pub fn with_risk_score(mut self, risk_score: f64) -> Self {
        self.risk_score = Some(risk_score);
        self
    }

    pub fn with_volatility(mut self, volatility: f64) -> Self {
        self.volatility = Some(volatility);
        self
    }

    /// APY as a decimal fraction
    pub fn apy_decimal(&self) -> f64 {
        if self.apy.is_finite() {
            self.apy / 100.0
        } else {
            0.0
        }
    }

    /// Whether the opportunity lives on Ethereum mainnet
    pub fn is_ethereum_mainnet(&self) -> bool {
        let chain = self.chain.to_ascii_lowercase();
        chain == "ethereum" || chain == "mainnet" || chain == "eth"
    }
}
