//! Investment Strategies
//!
//! Strict schema for strategies coming from the external proposer, the
//! clamping applied before any safety check, and the defensive parser that
//! pulls a JSON array out of free-form proposer text.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound for a sanitized APY (percent)
pub const MAX_SANITIZED_APY: f64 = 1000.0;

/// Risk scores are sanitized into [MIN_RISK, MAX_RISK]
pub const MIN_RISK: f64 = 1.0;
pub const MAX_RISK: f64 = 10.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProposalParseError {
    #[error("Proposer output contains no JSON array")]
    NoJsonArray,

    #[error("Proposer output is not a valid strategy list: {0}")]
    InvalidSchema(String),

    #[error("Proposer returned an empty strategy list")]
    Empty,
}

/// What a strategy does with capital
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyAction {
    Deposit,
    Withdraw,
    Rebalance,
}

impl StrategyAction {
    /// Withdrawals reduce exposure and may pass a paused breaker
    pub fn is_withdrawal(&self) -> bool {
        matches!(self, StrategyAction::Withdraw)
    }
}

impl std::fmt::Display for StrategyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StrategyAction::Deposit => "deposit",
            StrategyAction::Withdraw => "withdraw",
            StrategyAction::Rebalance => "rebalance",
        };
        write!(f, "{}", s)
    }
}

fn default_confidence() -> f64 {
    0.5
}

/// A proposed investment action
///
/// Unknown fields are rejected so loosely shaped proposer output never
/// enters the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Strategy {
    pub protocol: String,
    pub chain: String,
    pub action: StrategyAction,
    /// Amount in currency units
    pub amount: f64,
    /// Expected APY in percent
    #[serde(rename = "expectedAPY", alias = "expectedApy")]
    pub expected_apy: f64,
    pub risk_score: f64,
    #[serde(default)]
    pub rationale: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Selection score, attached to the chosen copy only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Strategy {
    pub fn new(
        protocol: impl Into<String>,
        chain: impl Into<String>,
        action: StrategyAction,
        amount: f64,
        expected_apy: f64,
        risk_score: f64,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            chain: chain.into(),
            action,
            amount,
            expected_apy,
            risk_score,
            rationale: String::new(),
            confidence: default_confidence(),
            score: None,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Clone with a selection score attached
    pub fn scored(&self, score: f64) -> Self {
        Self {
            score: Some(score),
            ..self.clone()
        }
    }

    /// One-line description for logs and the reasoning trail
    pub fn summary(&self) -> String {
        format!(
            "{} ${:.2} into {} on {} (APY {:.2}%, risk {:.0}, confidence {:.2})",
            self.action,
            self.amount,
            self.protocol,
            self.chain,
            self.expected_apy,
            self.risk_score,
            self.confidence
        )
    }
}

/// Clamp numeric fields into safe ranges
///
/// Amount becomes a non-negative whole number, APY is bounded to
/// [0, 1000] and risk to an integer in [1, 10]. Idempotent.
pub fn sanitize_strategy(strategy: &Strategy) -> Strategy {
    let amount = if strategy.amount.is_finite() {
        strategy.amount.max(0.0).floor()
    } else {
        0.0
    };

    let expected_apy = if strategy.expected_apy.is_finite() {
        strategy.expected_apy.clamp(0.0, MAX_SANITIZED_APY)
    } else {
        0.0
    };

    // Unknown risk is treated as the worst case
    let risk_score = if strategy.risk_score.is_finite() {
        strategy.risk_score.round().clamp(MIN_RISK, MAX_RISK)
    } else {
        MAX_RISK
    };

    let confidence = if strategy.confidence.is_finite() {
        strategy.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    Strategy {
        protocol: strategy.protocol.trim().to_string(),
        chain: strategy.chain.trim().to_string(),
        action: strategy.action,
        amount,
        expected_apy,
        risk_score,
        rationale: strategy.rationale.clone(),
        confidence,
        score: strategy.score,
    }
}

/// Extract and validate a strategy list from raw proposer text
///
/// Tolerates surrounding prose and markdown code fences. Every parsed
/// strategy is sanitized; at most `max_candidates` are returned.
pub fn parse_strategies(
    raw: &str,
    max_candidates: usize,
) -> Result<Vec<Strategy>, ProposalParseError> {
    let body = strip_code_fence(raw);
    let strategies = first_strategy_array(body)?;

    let strategies: Vec<Strategy> = strategies
        .iter()
        .filter(|s| !s.protocol.trim().is_empty())
        .take(max_candidates)
        .map(sanitize_strategy)
        .collect();

    if strategies.is_empty() {
        return Err(ProposalParseError::Empty);
    }
    Ok(strategies)
}

/// First non-empty `[...]` in `body` that deserializes as strategies
///
/// Each `[` is tried in turn so bracketed prose ahead of the array is skipped.
/// Text after the array is ignored.
fn first_strategy_array(body: &str) -> Result<Vec<Strategy>, ProposalParseError> {
    let mut saw_empty = false;
    let mut first_error: Option<String> = None;
    let mut object_error: Option<String> = None;

    for (start, _) in body.match_indices('[') {
        let candidate = &body[start..];
        let mut stream =
            serde_json::Deserializer::from_str(candidate).into_iter::<Vec<Strategy>>();
        match stream.next() {
            Some(Ok(strategies)) if strategies.is_empty() => saw_empty = true,
            Some(Ok(strategies)) => return Ok(strategies),
            Some(Err(e)) => {
                // Errors from an array of objects say more than errors from prose
                if object_error.is_none() && candidate[1..].trim_start().starts_with('{') {
                    object_error = Some(e.to_string());
                }
                first_error.get_or_insert_with(|| e.to_string());
            }
            None => {}
        }
    }

    if saw_empty {
        return Err(ProposalParseError::Empty);
    }
    match object_error.or(first_error) {
        Some(e) => Err(ProposalParseError::InvalidSchema(e)),
        None => Err(ProposalParseError::NoJsonArray),
    }
}

/// Return the contents of the first ``` fenced block, or the input unchanged
fn strip_code_fence(raw: &str) -> &str {
    let Some(open) = raw.find("```") else {
        return raw;
    };
    let after_open = &raw[open + 3..];
    // Skip an optional language tag on the fence line
    let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_open[content_start..];
    match content.find("```") {
        Some(close) => &content[..close],
        None => content,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Strategy {
        Strategy::new("aave", "ethereum", StrategyAction::Deposit, 500.0, 4.5, 3.0)
            .with_confidence(0.8)
    }

    #[test]
    fn test_sanitize_clamps_extremes() {
        let wild = Strategy {
            amount: -250.7,
            expected_apy: 5000.0,
            risk_score: 0.2,
            confidence: 3.0,
            ..sample()
        };
        let clean = sanitize_strategy(&wild);
        assert_eq!(clean.amount, 0.0);
        assert_eq!(clean.expected_apy, MAX_SANITIZED_APY);
        assert_eq!(clean.risk_score, 1.0);
        assert_eq!(clean.confidence, 1.0);
    }

    #[test]
    fn test_sanitize_rounds_and_floors() {
        let s = Strategy {
            amount: 1234.99,
            risk_score: 6.6,
            ..sample()
        };
        let clean = sanitize_strategy(&s);
        assert_eq!(clean.amount, 1234.0);
        assert_eq!(clean.risk_score, 7.0);
    }

    #[test]
    fn test_sanitize_non_finite_is_conservative() {
        let s = Strategy {
            amount: f64::INFINITY,
            expected_apy: f64::NAN,
            risk_score: f64::NAN,
            confidence: f64::NAN,
            ..sample()
        };
        let clean = sanitize_strategy(&s);
        assert_eq!(clean.amount, 0.0);
        assert_eq!(clean.expected_apy, 0.0);
        assert_eq!(clean.risk_score, MAX_RISK);
        assert_eq!(clean.confidence, 0.0);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            sample(),
            Strategy { amount: -5.0, expected_apy: -3.0, risk_score: 42.0, ..sample() },
            Strategy { amount: 99.999, expected_apy: 1000.5, risk_score: 5.5, ..sample() },
        ];
        for input in inputs {
            let once = sanitize_strategy(&input);
            let twice = sanitize_strategy(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_parse_plain_array() {
        let raw = r#"[{"protocol":"aave","chain":"ethereum","action":"deposit","amount":500,"expectedAPY":4.5,"riskScore":3,"rationale":"blue chip","confidence":0.8}]"#;
        let parsed = parse_strategies(raw, 5).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].protocol, "aave");
        assert_eq!(parsed[0].action, StrategyAction::Deposit);
        assert_eq!(parsed[0].confidence, 0.8);
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let raw = "Here are my picks:\n```json\n[\n  {\"protocol\": \"compound\", \"chain\": \"ethereum\", \"action\": \"deposit\", \"amount\": 300.7, \"expectedApy\": 3.9, \"riskScore\": 2.6}\n]\n```\nLet me know!";
        let parsed = parse_strategies(raw, 5).unwrap();
        assert_eq!(parsed[0].protocol, "compound");
        assert_eq!(parsed[0].amount, 300.0);
        assert_eq!(parsed[0].risk_score, 3.0);
        assert_eq!(parsed[0].confidence, 0.5);
    }

    #[test]
    fn test_parse_skips_bracketed_preamble() {
        let raw = r#"[Note] Based on the [3] markets above, here is the plan: [{"protocol":"curve","chain":"ethereum","action":"deposit","amount":250,"expectedAPY":5.1,"riskScore":4}] (see [docs] for details)"#;
        let parsed = parse_strategies(raw, 5).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].protocol, "curve");
        assert_eq!(parsed[0].amount, 250.0);
    }

    #[test]
    fn test_parse_reports_schema_error_behind_preamble() {
        let raw = r#"[draft] picks: [{"protocol":"aave","leverage":3}]"#;
        match parse_strategies(raw, 5) {
            Err(ProposalParseError::InvalidSchema(msg)) => {
                assert!(msg.contains("leverage"), "{}", msg)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_parse_truncates_to_max_candidates() {
        let one = r#"{"protocol":"aave","chain":"ethereum","action":"deposit","amount":100,"expectedAPY":4,"riskScore":3}"#;
        let raw = format!("[{}]", vec![one; 7].join(","));
        let parsed = parse_strategies(&raw, 5).unwrap();
        assert_eq!(parsed.len(), 5);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(
            parse_strategies("I cannot help with that.", 5),
            Err(ProposalParseError::NoJsonArray)
        );
        assert!(matches!(
            parse_strategies(r#"[{"protocol": "aave"}]"#, 5),
            Err(ProposalParseError::InvalidSchema(_))
        ));
        assert_eq!(parse_strategies("[]", 5), Err(ProposalParseError::Empty));
    }

    #[test]
    fn test_parse_rejects_unknown_fields() {
        let raw = r#"[{"protocol":"aave","chain":"ethereum","action":"deposit","amount":100,"expectedAPY":4,"riskScore":3,"leverage":10}]"#;
        assert!(matches!(
            parse_strategies(raw, 5),
            Err(ProposalParseError::InvalidSchema(_))
        ));
    }

    #[test]
    fn test_scored_clone_leaves_original() {
        let original = sample();
        let scored = original.scored(61.5);
        assert_eq!(scored.score, Some(61.5));
        assert!(original.score.is_none());
    }
}
