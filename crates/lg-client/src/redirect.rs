//! Manual, loop-safe redirect resolution
//!
//! Redirects are never followed by the transport. Each hop is a bodiless
//! `HEAD` request whose `Location` is resolved and checked against the hops
//! already visited, so the whole chain stays observable and bounded.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

/// Default hop budget.
pub const DEFAULT_MAX_HOPS: u32 = 5;

// =============================================================================
// Transport
// =============================================================================

/// Status and `Location` of one `HEAD` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadResponse {
    pub status: u16,
    pub location: Option<String>,
}

impl HeadResponse {
    pub fn new(status: u16) -> Self {
        Self { status, location: None }
    }

    pub fn redirect(status: u16, location: impl Into<String>) -> Self {
        Self {
            status,
            location: Some(location.into()),
        }
    }

    pub fn is_redirect(&self) -> bool {
        (300..400).contains(&self.status)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Timeout, refused or reset connection, cancelled request
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request failed: {0}")]
    Other(String),
}

/// One `HEAD` request with redirects disabled.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn head(&self, url: &Url) -> Result<HeadResponse, TransportError>;
}

/// `reqwest` transport with a per-hop timeout.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(hop_timeout: Duration, user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(hop_timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn head(&self, url: &Url) -> Result<HeadResponse, TransportError> {
        let response = self.client.head(url.clone()).send().await.map_err(|e| {
            if e.is_builder() {
                TransportError::Other(e.to_string())
            } else {
                TransportError::Network(e.to_string())
            }
        })?;
        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(HeadResponse {
            status: response.status().as_u16(),
            location,
        })
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// Why a resolution failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, thiserror::Error)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RedirectCause {
    #[error("The supplied URL is invalid or not absolute")]
    InvalidUrl,
    #[error("A redirect loop was detected")]
    LoopDetected,
    #[error("The redirect chain exceeded the allowed limit")]
    ExceededRedirectLimit,
    #[error("Redirect response missing or containing invalid Location header")]
    UnrecoverableLocation,
    #[error("Network error, timeout or request cancelled")]
    NetworkException,
    #[error("An unknown error occurred")]
    Unknown,
}

impl RedirectCause {
    pub const fn code(self) -> u8 {
        match self {
            RedirectCause::InvalidUrl => 1,
            RedirectCause::LoopDetected => 2,
            RedirectCause::ExceededRedirectLimit => 3,
            RedirectCause::UnrecoverableLocation => 4,
            RedirectCause::NetworkException => 5,
            RedirectCause::Unknown => 6,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            RedirectCause::InvalidUrl => "The supplied URL is invalid or not absolute",
            RedirectCause::LoopDetected => "A redirect loop was detected",
            RedirectCause::ExceededRedirectLimit => "The redirect chain exceeded the allowed limit",
            RedirectCause::UnrecoverableLocation => {
                "Redirect response missing or containing invalid Location header"
            }
            RedirectCause::NetworkException => "Network error, timeout or request cancelled",
            RedirectCause::Unknown => "An unknown error occurred",
        }
    }
}

/// Result of one resolution attempt. Both arms keep the input as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RedirectOutcome {
    Success {
        original_url: String,
        final_url: String,
        hop_count: u32,
        final_status: u16,
    },
    Failure {
        original_url: String,
        cause: RedirectCause,
        hops_so_far: u32,
    },
}

impl RedirectOutcome {
    pub fn original_url(&self) -> &str {
        match self {
            RedirectOutcome::Success { original_url, .. } => original_url,
            RedirectOutcome::Failure { original_url, .. } => original_url,
        }
    }

    pub fn final_url(&self) -> Option<&str> {
        match self {
            RedirectOutcome::Success { final_url, .. } => Some(final_url),
            RedirectOutcome::Failure { .. } => None,
        }
    }

    pub fn hops(&self) -> u32 {
        match self {
            RedirectOutcome::Success { hop_count, .. } => *hop_count,
            RedirectOutcome::Failure { hops_so_far, .. } => *hops_so_far,
        }
    }

    pub fn cause(&self) -> Option<RedirectCause> {
        match self {
            RedirectOutcome::Success { .. } => None,
            RedirectOutcome::Failure { cause, .. } => Some(*cause),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RedirectOutcome::Success { .. })
    }
}

// =============================================================================
// Resolver
// =============================================================================

pub struct RedirectResolver {
    transport: Arc<dyn Transport>,
    max_hops: u32,
}

impl RedirectResolver {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_hops: DEFAULT_MAX_HOPS,
        }
    }

    pub fn with_max_hops(mut self, max_hops: u32) -> Self {
        self.max_hops = max_hops;
        self
    }

    pub fn max_hops(&self) -> u32 {
        self.max_hops
    }

    /// Follow `raw` with the configured hop budget.
    pub async fn resolve(&self, raw: &str) -> RedirectOutcome {
        self.resolve_with(raw, self.max_hops).await
    }

    /// Follow `raw` for at most `max_hops` redirects.
    pub async fn resolve_with(&self, raw: &str, max_hops: u32) -> RedirectOutcome {
        let failure = |cause: RedirectCause, hops: u32| RedirectOutcome::Failure {
            original_url: raw.to_string(),
            cause,
            hops_so_far: hops,
        };

        let Some(mut current) = parse_start(raw) else {
            log::debug!("Resolve rejected unparsable input");
            return failure(RedirectCause::InvalidUrl, 0);
        };
        let mut visited = HashSet::from([current.to_string()]);
        let mut hops = 0;

        while hops <= max_hops {
            let response = match self.transport.head(&current).await {
                Ok(response) => response,
                Err(TransportError::Network(e)) => {
                    log::warn!("HEAD {} failed after {} hops: {}", summary(&current), hops, e);
                    return failure(RedirectCause::NetworkException, hops);
                }
                Err(TransportError::Other(e)) => {
                    log::warn!("HEAD {} failed: {}", summary(&current), e);
                    return failure(RedirectCause::Unknown, hops);
                }
            };

            if !response.is_redirect() {
                log::debug!(
                    "Resolved to {} with status {} after {} hops",
                    summary(&current),
                    response.status,
                    hops
                );
                return RedirectOutcome::Success {
                    original_url: raw.to_string(),
                    final_url: current.to_string(),
                    hop_count: hops,
                    final_status: response.status,
                };
            }

            let Some(next) = response.location.as_deref().and_then(|l| next_hop(&current, l)) else {
                return failure(RedirectCause::UnrecoverableLocation, hops);
            };
            if !visited.insert(next.to_string()) {
                log::debug!("Redirect loop back to {}", summary(&next));
                return failure(RedirectCause::LoopDetected, hops);
            }
            log::debug!("{} {} -> {}", response.status, summary(&current), summary(&next));
            current = next;
            hops += 1;
        }

        failure(RedirectCause::ExceededRedirectLimit, hops)
    }
}

/// Trimmed input; `https://` is assumed when no scheme is written.
fn parse_start(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let url = if trimmed.contains("://") {
        Url::parse(trimmed).ok()?
    } else {
        Url::parse(&format!("https://{}", trimmed)).ok()?
    };
    followable(url)
}

/// Absolute `Location` first, then relative to the request URL.
fn next_hop(current: &Url, location: &str) -> Option<Url> {
    let location = location.trim();
    if location.is_empty() {
        return None;
    }
    let next = Url::parse(location).or_else(|_| current.join(location)).ok()?;
    followable(next)
}

fn followable(url: Url) -> Option<Url> {
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Some(url),
        _ => None,
    }
}

fn summary(url: &Url) -> String {
    match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), url.host_str().unwrap_or(""), port),
        None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or("")),
    }
}
