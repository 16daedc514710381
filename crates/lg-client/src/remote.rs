//! Remote phishing analysis
//!
//! Runs in the background for links the local engine let through. Its result
//! is recorded for observability and never changes a verdict.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Longest input the analyzer accepts, in characters.
pub const MAX_INPUT_CHARS: usize = 600;

/// Scores at or above this are reported as a risk.
pub const RISK_THRESHOLD: f64 = 0.5;

/// Most recent entries kept by [`RemoteLog`].
const LOG_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RemoteError {
    #[error("Input must be non-blank and at most 600 characters")]
    InvalidInput,
    #[error("Request failed: {0}")]
    Http(String),
    #[error("Analyzer returned HTTP {0}")]
    Status(u16),
    #[error("Malformed analyzer response: {0}")]
    Decode(String),
}

/// Analyzer response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteVerdict {
    pub phishing_score: f64,
    #[serde(default)]
    pub suspicion_reasons: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_actions: Option<Vec<String>>,
}

impl RemoteVerdict {
    pub fn is_risk(&self) -> bool {
        self.phishing_score >= RISK_THRESHOLD
    }
}

#[async_trait]
pub trait RemoteAnalyzer: Send + Sync {
    async fn analyze(&self, url: &str) -> Result<RemoteVerdict, RemoteError>;
}

/// Reject blank or oversized input before it leaves the device.
pub fn validate_input(text: &str) -> Result<&str, RemoteError> {
    if text.trim().is_empty() || text.chars().count() > MAX_INPUT_CHARS {
        return Err(RemoteError::InvalidInput);
    }
    Ok(text)
}

/// Posts `{"message": url}` to a JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpRemoteAnalyzer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpRemoteAnalyzer {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    message: &'a str,
}

#[async_trait]
impl RemoteAnalyzer for HttpRemoteAnalyzer {
    async fn analyze(&self, url: &str) -> Result<RemoteVerdict, RemoteError> {
        let message = validate_input(url)?;
        let response = self
            .client
            .post(&self.endpoint)
            .json(&AnalyzeRequest { message })
            .send()
            .await
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(RemoteError::Status(response.status().as_u16()));
        }
        response
            .json::<RemoteVerdict>()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))
    }
}

// =============================================================================
// Log
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemoteStatus {
    Safe { score: f64 },
    Risk { score: f64, reasons: Vec<String> },
    Error { message: String },
}

impl RemoteStatus {
    pub fn from_result(result: &Result<RemoteVerdict, RemoteError>) -> Self {
        match result {
            Ok(v) if v.is_risk() => RemoteStatus::Risk {
                score: v.phishing_score,
                reasons: v.suspicion_reasons.clone(),
            },
            Ok(v) => RemoteStatus::Safe { score: v.phishing_score },
            Err(e) => RemoteStatus::Error { message: e.to_string() },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteEntry {
    pub url: String,
    /// Seconds since the Unix epoch
    pub at: u64,
    #[serde(flatten)]
    pub status: RemoteStatus,
}

/// Bounded in-memory record of remote analysis results.
#[derive(Debug, Default)]
pub struct RemoteLog {
    entries: Mutex<Vec<RemoteEntry>>,
}

impl RemoteLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, url: &str, status: RemoteStatus) {
        let at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        match &status {
            RemoteStatus::Risk { score, .. } => log::warn!("Remote analysis flagged link (score {:.2})", score),
            RemoteStatus::Safe { score } => log::debug!("Remote analysis passed link (score {:.2})", score),
            RemoteStatus::Error { message } => log::warn!("Remote analysis failed: {}", message),
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() >= LOG_CAPACITY {
            entries.remove(0);
        }
        entries.push(RemoteEntry {
            url: url.to_string(),
            at,
            status,
        });
    }

    pub fn entries(&self) -> Vec<RemoteEntry> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Latest entry for `url`.
    pub fn latest_for(&self, url: &str) -> Option<RemoteEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|e| e.url == url)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
