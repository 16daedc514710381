//! Tunable heuristic policy
//!
//! Every threshold, weight and word list the scorer uses lives here so it can
//! be loaded from configuration. The defaults are the production tuning.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Error type for policy validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PolicyError {
    #[error("{field} must be a finite number in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("{0}: critical_min must be greater than safe_max")]
    EmptyRamp(&'static str),
    #[error("med: critical_max_ratio must not exceed suspicious_max_ratio")]
    MedOrder,
    #[error("port mismatch alone would reach the block threshold")]
    PortBlocksAlone,
}

// =============================================================================
// Ramps
// =============================================================================

/// Piecewise-linear score over a count.
///
/// `v <= safe_max` scores 0, the first value above it scores
/// `score_at_suspicious`, and `v >= critical_min` scores `score_at_critical`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ramp {
    pub safe_max: u32,
    pub critical_min: u32,
    pub score_at_suspicious: f64,
    pub score_at_critical: f64,
}

impl Ramp {
    pub const fn new(safe_max: u32, critical_min: u32, at_suspicious: f64, at_critical: f64) -> Self {
        Self {
            safe_max,
            critical_min,
            score_at_suspicious: at_suspicious,
            score_at_critical: at_critical,
        }
    }

    pub fn score(&self, value: usize) -> f64 {
        let value = value as f64;
        let safe = self.safe_max as f64;
        let critical = self.critical_min as f64;
        if value <= safe {
            return 0.0;
        }
        if value >= critical {
            return clamp01(self.score_at_critical);
        }
        let start = safe + 1.0;
        let span = (critical - start).max(1.0);
        let t = ((value - start) / span).clamp(0.0, 1.0);
        clamp01(self.score_at_suspicious + t * (self.score_at_critical - self.score_at_suspicious))
    }

    fn validate(&self, name: &'static str) -> Result<(), PolicyError> {
        if self.critical_min <= self.safe_max {
            return Err(PolicyError::EmptyRamp(name));
        }
        unit(name, self.score_at_suspicious)?;
        unit(name, self.score_at_critical)
    }
}

/// Near-whitelist (MED) scoring. Lower ratios are worse; an exact match is safe.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MedPolicy {
    pub suspicious_max_ratio: f64,
    pub critical_max_ratio: f64,
    pub score_at_suspicious: f64,
    pub score_at_critical: f64,
}

impl Default for MedPolicy {
    fn default() -> Self {
        Self {
            suspicious_max_ratio: 0.20,
            critical_max_ratio: 0.10,
            score_at_suspicious: 0.60,
            score_at_critical: 1.00,
        }
    }
}

impl MedPolicy {
    pub fn score(&self, ratio: f64) -> f64 {
        if ratio <= f64::EPSILON || ratio > self.suspicious_max_ratio {
            return 0.0;
        }
        if ratio <= self.critical_max_ratio {
            return clamp01(self.score_at_critical);
        }
        let span = (self.suspicious_max_ratio - self.critical_max_ratio).max(1e-9);
        let t = (self.suspicious_max_ratio - ratio) / span;
        clamp01(self.score_at_suspicious + t * (self.score_at_critical - self.score_at_suspicious))
    }
}

// =============================================================================
// Weights and combination
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftWeights {
    pub port: f64,
    pub encoded: f64,
    pub med: f64,
    pub length: f64,
    pub subdomains: f64,
    pub keywords: f64,
}

impl Default for SoftWeights {
    fn default() -> Self {
        Self {
            port: 0.50,
            encoded: 0.40,
            med: 0.85,
            length: 0.45,
            subdomains: 0.55,
            keywords: 0.65,
        }
    }
}

/// How weighted soft contributions become one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combiner {
    /// Plain sum of `weight * score`
    #[default]
    Sum,
    /// `1 - prod(1 - weight * score)`
    SoftOr,
}

impl Combiner {
    pub fn combine(self, contributions: impl IntoIterator<Item = f64>) -> f64 {
        match self {
            Combiner::Sum => contributions.into_iter().map(clamp01).sum(),
            Combiner::SoftOr => {
                let keep: f64 = contributions.into_iter().map(|c| 1.0 - clamp01(c)).product();
                clamp01(1.0 - keep)
            }
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Complete scorer tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicPolicy {
    /// Blocked iff the combined soft score is at least this value
    pub block_threshold: f64,
    pub combiner: Combiner,
    pub weights: SoftWeights,
    /// Measured on the original input string
    pub length: Ramp,
    pub subdomains: Ramp,
    /// Over the number of distinct keyword hits
    pub keywords: Ramp,
    pub keyword_list: Vec<String>,
    pub med: MedPolicy,
    pub encoded_score: f64,
    pub port_score: f64,
    /// Scheme -> ports that are expected for it
    pub allowed_ports: BTreeMap<String, Vec<u16>>,
    pub familiar_tlds: Vec<String>,
}

const DEFAULT_KEYWORDS: &[&str] = &[
    "login", "verify", "secure", "update", "account", "wallet", "support", "billing", "reset",
    "password", "bank", "pay", "invoice", "doc", "drive", "dropbox", "free", "gift", "promo",
    "bonus", "prize",
];

const DEFAULT_FAMILIAR_TLDS: &[&str] = &[
    "com", "org", "net", "edu", "gov", "mil", "io", "co", "me", "ai", "dev", "app", "il", "co.il",
    "org.il", "gov.il", "ac.il", "muni.il", "uk", "co.uk", "de", "fr", "es", "it", "nl", "pl", "se",
];

impl Default for HeuristicPolicy {
    fn default() -> Self {
        let allowed_ports = [
            ("http", 80),
            ("https", 443),
            ("ws", 80),
            ("wss", 443),
            ("ftp", 21),
            ("ftps", 990),
        ]
        .into_iter()
        .map(|(scheme, port)| (scheme.to_string(), vec![port]))
        .collect();

        Self {
            block_threshold: 0.60,
            combiner: Combiner::Sum,
            weights: SoftWeights::default(),
            length: Ramp::new(80, 300, 0.25, 1.00),
            subdomains: Ramp::new(2, 6, 0.30, 1.00),
            keywords: Ramp::new(0, 6, 0.30, 1.00),
            keyword_list: DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            med: MedPolicy::default(),
            encoded_score: 1.0,
            port_score: 1.0,
            allowed_ports,
            familiar_tlds: DEFAULT_FAMILIAR_TLDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl HeuristicPolicy {
    /// Reject policies that cannot be evaluated sensibly.
    pub fn validate(&self) -> Result<(), PolicyError> {
        range("block_threshold", self.block_threshold, f64::MIN_POSITIVE, 6.0)?;

        let w = &self.weights;
        unit("weights.port", w.port)?;
        unit("weights.encoded", w.encoded)?;
        unit("weights.med", w.med)?;
        unit("weights.length", w.length)?;
        unit("weights.subdomains", w.subdomains)?;
        unit("weights.keywords", w.keywords)?;
        unit("encoded_score", self.encoded_score)?;
        unit("port_score", self.port_score)?;

        self.length.validate("length")?;
        self.subdomains.validate("subdomains")?;
        self.keywords.validate("keywords")?;

        unit("med.suspicious_max_ratio", self.med.suspicious_max_ratio)?;
        unit("med.critical_max_ratio", self.med.critical_max_ratio)?;
        unit("med.score_at_suspicious", self.med.score_at_suspicious)?;
        unit("med.score_at_critical", self.med.score_at_critical)?;
        if self.med.critical_max_ratio > self.med.suspicious_max_ratio {
            return Err(PolicyError::MedOrder);
        }

        if w.port * self.port_score >= self.block_threshold {
            return Err(PolicyError::PortBlocksAlone);
        }
        Ok(())
    }
}

fn range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), PolicyError> {
    if value.is_finite() && value >= min && value <= max {
        Ok(())
    } else {
        Err(PolicyError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

fn unit(field: &'static str, value: f64) -> Result<(), PolicyError> {
    range(field, value, 0.0, 1.0)
}

#[inline]
pub(crate) fn clamp01(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        assert_eq!(HeuristicPolicy::default().validate(), Ok(()));
    }

    #[test]
    fn test_ramp() {
        let ramp = Ramp::new(80, 300, 0.25, 1.0);
        assert_eq!(ramp.score(0), 0.0);
        assert_eq!(ramp.score(80), 0.0);
        assert_eq!(ramp.score(81), 0.25);
        assert_eq!(ramp.score(300), 1.0);
        assert_eq!(ramp.score(5000), 1.0);
        let mid = ramp.score(190);
        assert!(mid > 0.25 && mid < 1.0);

        let keywords = Ramp::new(0, 6, 0.30, 1.0);
        assert_eq!(keywords.score(0), 0.0);
        assert_eq!(keywords.score(1), 0.30);
        assert!((keywords.score(3) - 0.58).abs() < 1e-9);
        assert_eq!(keywords.score(6), 1.0);
    }

    #[test]
    fn test_med_score() {
        let med = MedPolicy::default();
        assert_eq!(med.score(0.0), 0.0);
        assert_eq!(med.score(0.05), 1.0);
        assert_eq!(med.score(0.10), 1.0);
        assert!((med.score(0.15) - 0.80).abs() < 1e-9);
        assert!((med.score(0.20) - 0.60).abs() < 1e-9);
        assert_eq!(med.score(0.21), 0.0);
    }

    #[test]
    fn test_combiners() {
        assert!((Combiner::Sum.combine([0.3, 0.4]) - 0.7).abs() < 1e-9);
        assert!((Combiner::SoftOr.combine([0.5, 0.5]) - 0.75).abs() < 1e-9);
        assert_eq!(Combiner::Sum.combine(Vec::new()), 0.0);
        assert_eq!(Combiner::SoftOr.combine(Vec::new()), 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut policy = HeuristicPolicy::default();
        policy.weights.port = 0.9;
        assert_eq!(policy.validate(), Err(PolicyError::PortBlocksAlone));

        let mut policy = HeuristicPolicy::default();
        policy.subdomains = Ramp::new(4, 4, 0.3, 1.0);
        assert_eq!(policy.validate(), Err(PolicyError::EmptyRamp("subdomains")));

        let mut policy = HeuristicPolicy::default();
        policy.med.critical_max_ratio = 0.5;
        assert_eq!(policy.validate(), Err(PolicyError::MedOrder));

        let mut policy = HeuristicPolicy::default();
        policy.block_threshold = f64::NAN;
        assert!(matches!(policy.validate(), Err(PolicyError::OutOfRange { .. })));
    }

    #[test]
    fn test_partial_toml_like_input_keeps_defaults() {
        let policy: HeuristicPolicy =
            serde_json::from_str(r#"{"block_threshold": 0.7, "combiner": "soft_or"}"#).unwrap();
        assert_eq!(policy.block_threshold, 0.7);
        assert_eq!(policy.combiner, Combiner::SoftOr);
        assert_eq!(policy.weights, SoftWeights::default());
        assert_eq!(policy.keyword_list.len(), 21);
    }
}
