//! Heuristic Risk Scorer
//!
//! Two tiers. Critical reasons block on their own. Soft reasons each produce
//! a score in `[0, 1]`, are weighted and combined, and block only when the
//! combined score reaches the policy threshold.
//!
//! Local tables take precedence: a whitelisted or cached-trusted host is safe
//! and a blacklisted or cached-unsafe host is blocked without scoring.

use std::collections::{BTreeSet, HashSet};

use serde::{Serialize, Serializer};

use crate::canon::{CanonUrl, HostKind};
use crate::distance::normalized_distance;
use crate::hotset::HostLists;
use crate::policy::{HeuristicPolicy, PolicyError};
use crate::psl::{get_parent_domain, last_label};
use crate::types::{HostStatus, Reason, ReasonDetail, Reasons};

// =============================================================================
// Results
// =============================================================================

/// Outcome of running the heuristics on one URL.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub blocked: bool,
    /// Combined soft score, or 1.0 when a critical reason fired
    pub score: f64,
    #[serde(serialize_with = "serialize_reasons")]
    pub reasons: Reasons,
    /// Criticals first, then soft reasons in evaluation order
    pub details: Vec<ReasonDetail>,
    /// Closest whitelist entry other than the host itself, with its
    /// normalized distance
    pub nearest: Option<(String, f64)>,
}

impl Assessment {
    /// Critical-free, zero-score result.
    pub fn clean() -> Self {
        Self {
            blocked: false,
            score: 0.0,
            reasons: Reasons::empty(),
            details: Vec::new(),
            nearest: None,
        }
    }
}

fn serialize_reasons<S: Serializer>(reasons: &Reasons, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(reasons.list())
}

/// Which local table decided, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ListHit {
    Whitelist,
    Blacklist,
    Cached(HostStatus),
}

impl ListHit {
    pub const fn blocked(self) -> bool {
        match self {
            ListHit::Whitelist => false,
            ListHit::Blacklist => true,
            ListHit::Cached(status) => status.is_unsafe(),
        }
    }
}

/// Result of [`HeuristicScorer::evaluate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Evaluation {
    /// Decided by a local table; heuristics did not run
    Listed(ListHit),
    Scored(Assessment),
}

impl Evaluation {
    pub fn blocked(&self) -> bool {
        match self {
            Evaluation::Listed(hit) => hit.blocked(),
            Evaluation::Scored(a) => a.blocked,
        }
    }

    pub fn reasons(&self) -> Reasons {
        match self {
            Evaluation::Listed(_) => Reasons::empty(),
            Evaluation::Scored(a) => a.reasons,
        }
    }
}

// =============================================================================
// Scorer
// =============================================================================

/// Heuristic scorer bound to a validated policy.
#[derive(Debug, Clone)]
pub struct HeuristicScorer {
    policy: HeuristicPolicy,
    keywords: HashSet<String>,
    familiar_tlds: HashSet<String>,
}

impl HeuristicScorer {
    pub fn new(policy: HeuristicPolicy) -> Result<Self, PolicyError> {
        policy.validate()?;
        let keywords = policy.keyword_list.iter().map(|k| k.to_lowercase()).collect();
        let familiar_tlds = policy.familiar_tlds.iter().map(|t| t.to_lowercase()).collect();
        Ok(Self {
            policy,
            keywords,
            familiar_tlds,
        })
    }

    pub fn policy(&self) -> &HeuristicPolicy {
        &self.policy
    }

    /// Lists first, then heuristics.
    pub fn evaluate(&self, canon: &CanonUrl, lists: &dyn HostLists) -> Evaluation {
        if let Some(hit) = self.lookup(canon, lists) {
            log::debug!("{} decided by local table: {:?}", canon.summary(), hit);
            return Evaluation::Listed(hit);
        }
        Evaluation::Scored(self.score(canon, &lists.whitelist_hosts()))
    }

    /// Local-table short-circuit. IP literals never match a list entry.
    ///
    /// The whitelist matches the exact host; the blacklist also matches parent
    /// domains down to the registrable domain.
    pub fn lookup(&self, canon: &CanonUrl, lists: &dyn HostLists) -> Option<ListHit> {
        if canon.host_kind.is_ip() {
            return None;
        }
        let host = canon.host_ascii.trim_end_matches('.');

        if lists.is_whitelisted(host) {
            return Some(ListHit::Whitelist);
        }
        if blacklist_candidates(host, canon.domain.as_deref()).any(|h| lists.is_blacklisted(h)) {
            return Some(ListHit::Blacklist);
        }
        lists.cached_status(host).map(ListHit::Cached)
    }

    /// Run every heuristic. Pure: no table lookups besides the given whitelist.
    pub fn score(&self, canon: &CanonUrl, whitelist: &BTreeSet<String>) -> Assessment {
        let policy = &self.policy;
        let weights = &policy.weights;
        let mut reasons = Reasons::empty();
        let mut details = Vec::new();
        let mut contributions = Vec::new();

        // Critical
        if canon.host_kind.is_ip() {
            push(&mut reasons, &mut details, Reason::IpHost, "Link uses an IP address instead of a domain name.".into());
        }
        if canon.is_mixed_script {
            push(&mut reasons, &mut details, Reason::MixedScript, "Domain mixes writing systems and may imitate another site.".into());
        }
        if canon.user_info.is_some() {
            push(&mut reasons, &mut details, Reason::UserinfoPresent, "Link hides a username or password before the real address.".into());
        }
        if let Some(suffix) = self.unfamiliar_suffix(canon) {
            push(&mut reasons, &mut details, Reason::UnfamiliarTld, format!("Unfamiliar domain ending: **{}**.", suffix));
        }

        // Soft booleans
        if let Some(port) = canon.port.filter(|p| !self.port_allowed(&canon.scheme, *p)) {
            let message = match self.policy.allowed_ports.get(&canon.scheme).and_then(|p| p.first()) {
                Some(expected) => format!(
                    "{} uses a non-default port: **{}** (expected **{}**).",
                    canon.scheme.to_uppercase(),
                    port,
                    expected
                ),
                None => format!("Uses a non-default network port: **{}**.", port),
            };
            push(&mut reasons, &mut details, Reason::PortSchemeMismatch, message);
            contributions.push(weights.port * policy.port_score);
        }
        if canon.has_encoded_parts {
            push(&mut reasons, &mut details, Reason::EncodedParts, "Link contains encoded characters.".into());
            contributions.push(weights.encoded * policy.encoded_score);
        }

        // Numeric
        let nearest = nearest_lookalike(&canon.host_ascii, whitelist);
        if let Some((domain, ratio)) = &nearest {
            let med = policy.med.score(*ratio);
            if med > 0.0 {
                log::debug!("med: near={} r={:.2} s={:.2}", domain, ratio, med);
                push(&mut reasons, &mut details, Reason::NearWhitelistLookalike, format!("Not **{}**, just looks similar.", domain));
                contributions.push(weights.med * med);
            }
        }

        let length = canon.original_url.chars().count();
        let len_score = policy.length.score(length);
        if len_score > 0.0 {
            push(&mut reasons, &mut details, Reason::LongUrl, format!("Very long link (**{}** characters).", length));
            contributions.push(weights.length * len_score);
        }

        let depth = canon.subdomain_depth();
        let depth_score = policy.subdomains.score(depth);
        if depth_score > 0.0 {
            push(&mut reasons, &mut details, Reason::TooManySubdomains, format!("Unusually deep subdomain chain (**{}** levels).", depth));
            contributions.push(weights.subdomains * depth_score);
        }

        let hits = self.keyword_hits(canon);
        let kw_score = policy.keywords.score(hits);
        if kw_score > 0.0 {
            push(&mut reasons, &mut details, Reason::PhishKeywords, format!("Contains **{}** words commonly used in phishing.", hits));
            contributions.push(weights.keywords * kw_score);
        }

        let soft = policy.combiner.combine(contributions);
        let critical = reasons.has_critical();
        let blocked = critical || soft >= policy.block_threshold;

        log::debug!(
            "{} soft={:.2} crit={} reasons=[{}] block={}",
            canon.summary(),
            soft,
            u8::from(critical),
            reasons.tags(),
            blocked
        );

        Assessment {
            blocked,
            score: if critical { 1.0 } else { soft },
            reasons,
            details,
            nearest,
        }
    }

    /// The suffix that failed the familiar check, if any.
    fn unfamiliar_suffix(&self, canon: &CanonUrl) -> Option<String> {
        if canon.host_kind != HostKind::Domain {
            return None;
        }
        let suffix = match &canon.tld {
            Some(tld) => tld.clone(),
            None => last_label(&canon.host_ascii).to_string(),
        };
        if self.familiar_tlds.contains(&suffix) {
            None
        } else {
            Some(suffix)
        }
    }

    fn port_allowed(&self, scheme: &str, port: u16) -> bool {
        self.policy
            .allowed_ports
            .get(scheme)
            .is_some_and(|ports| ports.contains(&port))
    }

    /// Distinct keyword hits among `[a-z0-9]{3,}` tokens of host, path and query.
    fn keyword_hits(&self, canon: &CanonUrl) -> usize {
        let mut text = canon.host_unicode.to_lowercase();
        text.push(' ');
        text.push_str(&canon.path.to_lowercase());
        if let Some(query) = &canon.query {
            text.push(' ');
            text.push_str(&query.to_lowercase());
        }

        tokens(&text)
            .filter(|t| self.keywords.contains(*t))
            .collect::<HashSet<_>>()
            .len()
    }
}

fn push(reasons: &mut Reasons, details: &mut Vec<ReasonDetail>, reason: Reason, message: String) {
    reasons.insert(reason.flag());
    details.push(ReasonDetail { reason, message });
}

/// Host, then each parent down to the registrable domain.
fn blacklist_candidates<'a>(host: &'a str, domain: Option<&'a str>) -> impl Iterator<Item = &'a str> {
    let mut next = Some(host);
    std::iter::from_fn(move || {
        let current = next?;
        next = match domain {
            Some(d) if current.len() > d.len() => get_parent_domain(current),
            _ => None,
        };
        Some(current)
    })
}

/// Maximal runs of ASCII lowercase letters and digits, at least three long.
fn tokens(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit()))
        .filter(|t| t.len() >= 3)
}

/// Whitelist entry with the smallest non-zero normalized distance to `host`.
/// An identical entry is skipped so it cannot mask a lookalike.
fn nearest_lookalike(host: &str, whitelist: &BTreeSet<String>) -> Option<(String, f64)> {
    let host = host.trim_end_matches('.');
    let mut best: Option<(&String, f64)> = None;
    for entry in whitelist {
        let ratio = normalized_distance(host, entry);
        if ratio > 0.0 && best.map_or(true, |(_, r)| ratio < r) {
            best = Some((entry, ratio));
        }
    }
    best.map(|(entry, ratio)| (entry.clone(), ratio))
}
