//! Link decision pipeline
//!
//! resolve redirects -> canonicalize -> local tables -> heuristics, strictly
//! in that order and under one time budget. A safe verdict may kick off a
//! remote analysis in the background; its result never feeds back.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use lg_core::{
    Assessment, CanonUrl, Canonicalizer, Evaluation, HeuristicScorer, HostStatus, ListHit, ParseFailure,
    Verdict,
};
use serde::Serialize;

use crate::redirect::{RedirectOutcome, RedirectResolver};
use crate::remote::{RemoteAnalyzer, RemoteLog, RemoteStatus};
use crate::store::HotsetStore;

/// Default total budget for one decision.
pub const DEFAULT_TOTAL_BUDGET: Duration = Duration::from_millis(6000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on redirect resolution
    pub total_budget: Duration,
    /// Record heuristic outcomes in the host-status cache
    pub cache_outcomes: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_budget: DEFAULT_TOTAL_BUDGET,
            cache_outcomes: false,
        }
    }
}

/// What decided a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionSource {
    ParseError,
    Whitelist,
    Blacklist,
    CachedTrusted,
    CachedSuspicious,
    CachedBlacklisted,
    Heuristics,
    ResolveTimeout,
}

impl From<ListHit> for DecisionSource {
    fn from(hit: ListHit) -> Self {
        match hit {
            ListHit::Whitelist => DecisionSource::Whitelist,
            ListHit::Blacklist => DecisionSource::Blacklist,
            ListHit::Cached(HostStatus::Trusted) => DecisionSource::CachedTrusted,
            ListHit::Cached(HostStatus::Suspicious) => DecisionSource::CachedSuspicious,
            ListHit::Cached(HostStatus::Blacklisted) => DecisionSource::CachedBlacklisted,
        }
    }
}

/// One verdict plus everything that led to it.
#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub verdict: Verdict,
    pub source: DecisionSource,
    /// URL that was canonicalized and judged
    pub final_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub canon: Option<CanonUrl>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<ParseFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assessment: Option<Assessment>,
}

impl Decision {
    pub fn is_blocked(&self) -> bool {
        self.verdict == Verdict::Block
    }

    /// User-facing explanation: reason messages separated by blank lines, or
    /// a short note about what decided when there are none.
    pub fn context(&self) -> String {
        let mut seen = HashSet::new();
        let messages: Vec<&str> = self
            .assessment
            .iter()
            .flat_map(|a| a.details.iter())
            .map(|d| d.message.trim())
            .filter(|m| !m.is_empty() && seen.insert(*m))
            .collect();
        if !messages.is_empty() {
            return messages.join("\n\n");
        }

        let host = self
            .canon
            .as_ref()
            .map(|c| c.host_ascii.as_str())
            .unwrap_or("this domain");
        match (self.source, self.verdict) {
            (DecisionSource::ParseError, _) => "Blocked: invalid or unparsable URL.".to_string(),
            (DecisionSource::ResolveTimeout, _) => {
                "The link took too long to respond and was blocked for your safety. Try again later."
                    .to_string()
            }
            (DecisionSource::Blacklist, _) => format!("Blocked: domain is on your blacklist ({}).", host),
            (DecisionSource::CachedSuspicious | DecisionSource::CachedBlacklisted, _) => {
                format!("Blocked: domain was recently flagged ({}).", host)
            }
            (DecisionSource::Whitelist, _) => format!("Trusted: domain is on your whitelist ({}).", host),
            (_, Verdict::Block) => "Blocked for your safety.".to_string(),
            (_, Verdict::Safe) => "No risk signals found.".to_string(),
        }
    }

    fn blocked_without_canon(source: DecisionSource, url: &str, redirect: Option<RedirectOutcome>) -> Self {
        Self {
            verdict: Verdict::Block,
            source,
            final_url: url.to_string(),
            redirect,
            canon: None,
            parse_error: None,
            assessment: None,
        }
    }
}

struct Remote {
    analyzer: Arc<dyn RemoteAnalyzer>,
    log: Arc<RemoteLog>,
}

/// Orchestrates one decision per link. Cheap to share behind an `Arc`.
pub struct DecisionEngine {
    canonicalizer: Canonicalizer,
    scorer: HeuristicScorer,
    store: Arc<HotsetStore>,
    resolver: Option<RedirectResolver>,
    remote: Option<Remote>,
    config: EngineConfig,
}

impl DecisionEngine {
    pub fn new(
        canonicalizer: Canonicalizer,
        scorer: HeuristicScorer,
        store: Arc<HotsetStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            canonicalizer,
            scorer,
            store,
            resolver: None,
            remote: None,
            config,
        }
    }

    /// Follow redirects before judging. Without a resolver the input is judged as is.
    pub fn with_resolver(mut self, resolver: RedirectResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Send safe links to `analyzer`, recording results in `log`.
    pub fn with_remote(mut self, analyzer: Arc<dyn RemoteAnalyzer>, log: Arc<RemoteLog>) -> Self {
        self.remote = Some(Remote { analyzer, log });
        self
    }

    pub fn store(&self) -> &Arc<HotsetStore> {
        &self.store
    }

    /// Full pipeline for one user-initiated link.
    pub async fn decide(&self, raw: &str) -> Decision {
        let redirect = match &self.resolver {
            Some(resolver) => match tokio::time::timeout(self.config.total_budget, resolver.resolve(raw)).await {
                Ok(outcome) => Some(outcome),
                Err(_) => {
                    log::warn!("Redirect resolution exceeded {:?}; blocking", self.config.total_budget);
                    return Decision::blocked_without_canon(DecisionSource::ResolveTimeout, raw, None);
                }
            },
            None => None,
        };

        let target = match redirect.as_ref().and_then(RedirectOutcome::final_url) {
            Some(url) => url.to_string(),
            None => {
                if let Some(cause) = redirect.as_ref().and_then(RedirectOutcome::cause) {
                    log::debug!("Redirect resolution failed ({}); judging raw input", cause);
                }
                raw.to_string()
            }
        };

        let decision = self.evaluate_with(&target, redirect);
        if decision.verdict == Verdict::Safe {
            self.spawn_remote(&decision.final_url);
        }
        decision
    }

    /// Canonicalize and judge `url` without any network access.
    pub fn evaluate(&self, url: &str) -> Decision {
        self.evaluate_with(url, None)
    }

    fn evaluate_with(&self, url: &str, redirect: Option<RedirectOutcome>) -> Decision {
        let canon = match self.canonicalizer.canonicalize(url) {
            Ok(canon) => canon,
            Err(e) => {
                log::debug!("Cannot canonicalize link: {}", e.code());
                let mut decision = Decision::blocked_without_canon(DecisionSource::ParseError, url, redirect);
                decision.parse_error = Some(e);
                return decision;
            }
        };

        let view = self.store.view();
        let evaluation = self.scorer.evaluate(&canon, &view);
        let verdict = Verdict::from_blocked(evaluation.blocked());
        let (source, assessment) = match evaluation {
            Evaluation::Listed(hit) => (DecisionSource::from(hit), None),
            Evaluation::Scored(assessment) => (DecisionSource::Heuristics, Some(assessment)),
        };

        if source == DecisionSource::Heuristics && self.config.cache_outcomes && !canon.host_kind.is_ip() {
            let status = match verdict {
                Verdict::Block => HostStatus::Suspicious,
                Verdict::Safe => HostStatus::Trusted,
            };
            self.store.record(&canon.host_ascii, status);
        }

        match &assessment {
            Some(a) => log::info!(
                "{} -> {:?} via {:?} (score {:.2}, reasons [{}])",
                canon.summary(),
                verdict,
                source,
                a.score,
                a.reasons.tags()
            ),
            None => log::info!("{} -> {:?} via {:?}", canon.summary(), verdict, source),
        }

        Decision {
            verdict,
            source,
            final_url: canon.original_url.clone(),
            redirect,
            canon: Some(canon),
            parse_error: None,
            assessment,
        }
    }

    fn spawn_remote(&self, url: &str) {
        let Some(remote) = &self.remote else {
            return;
        };
        let analyzer = remote.analyzer.clone();
        let log = remote.log.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            let result = analyzer.analyze(&url).await;
            log.record(&url, RemoteStatus::from_result(&result));
        });
    }
}
