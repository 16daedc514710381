//! Hotset sync protocol, client side
//!
//! A cheap `HEAD` probe learns the head version; when it differs from the
//! local version, the record for the local version is fetched and applied in
//! one store commit. The commit is labelled with the head the fetch response
//! names, which may be newer than the probed one. The local version only
//! moves when that commit succeeds, so a failed attempt can simply be retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lg_core::hotset::{HeadRecord, HotsetEnvelope};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::store::{ApplyKind, HotsetStore, StoreError};

/// Header carrying the head version on probe and fetch responses.
pub const LATEST_VERSION_HEADER: &str = "latest-version";

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Invalid server URL '{url}': {message}")]
    InvalidServer { url: String, message: String },
    #[error("Version probe failed: {0}")]
    Probe(String),
    #[error("Missing or invalid Latest-Version header")]
    BadHeader,
    #[error("Server sent head version {head} for a client at version {local}")]
    StaleHead { local: u64, head: u64 },
    #[error("Fetch of version {version} failed: {message}")]
    Fetch { version: u64, message: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Sync task failed: {0}")]
    Task(String),
}

/// What one sync attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    UpToDate { version: u64 },
    Applied { from: u64, to: u64, kind: ApplyKind },
    /// Another sync was in flight; nothing was requested
    AlreadyRunning,
}

// =============================================================================
// Client
// =============================================================================

/// The two requests of the sync protocol.
#[async_trait]
pub trait HotsetClient: Send + Sync {
    async fn latest_version(&self) -> Result<u64, SyncError>;
    /// Record for a client at `version`, with the head it leads to.
    async fn fetch(&self, version: u64) -> Result<HeadRecord, SyncError>;
}

#[derive(Debug, Clone)]
pub struct HttpHotsetClient {
    client: reqwest::Client,
    base: String,
}

impl HttpHotsetClient {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let invalid = |message: String| SyncError::InvalidServer {
            url: server_url.to_string(),
            message,
        };
        let parsed = url::Url::parse(server_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(e.to_string()))?;
        Ok(Self {
            client,
            base: server_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl HotsetClient for HttpHotsetClient {
    async fn latest_version(&self) -> Result<u64, SyncError> {
        let response = self
            .client
            .head(format!("{}/hotset/latest-version", self.base))
            .send()
            .await
            .map_err(|e| SyncError::Probe(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::Probe(format!("HTTP {}", response.status())));
        }
        head_version(response.headers())
    }

    async fn fetch(&self, version: u64) -> Result<HeadRecord, SyncError> {
        let fetch_error = |message: String| SyncError::Fetch { version, message };
        let response = self
            .client
            .get(format!("{}/hotset/{}", self.base, version))
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(fetch_error(format!("HTTP {}", response.status())));
        }
        let head = head_version(response.headers())?;
        let envelope: HotsetEnvelope = response.json().await.map_err(|e| fetch_error(e.to_string()))?;
        Ok(HeadRecord {
            head,
            record: envelope.record,
        })
    }
}

fn head_version(headers: &reqwest::header::HeaderMap) -> Result<u64, SyncError> {
    headers
        .get(LATEST_VERSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .ok_or(SyncError::BadHeader)
}

// =============================================================================
// Sync
// =============================================================================

/// Probe, fetch and commit once.
///
/// A local version ahead of the server (ledger reset) is treated like a
/// never-synced client and receives full snapshots.
pub async fn sync_once(client: &dyn HotsetClient, store: &Arc<HotsetStore>) -> Result<SyncOutcome, SyncError> {
    let latest = client.latest_version().await?;
    let local = store.version();
    if local == latest {
        log::debug!("Hotset up to date at version {}", local);
        return Ok(SyncOutcome::UpToDate { version: local });
    }

    let request = if local > latest {
        log::warn!("Local hotset version {} is ahead of server {}; resyncing", local, latest);
        0
    } else {
        local
    };
    let HeadRecord { head, record } = client.fetch(request).await?;
    if head != latest {
        log::debug!("Hotset head moved from {} to {} during sync", latest, head);
    }
    if request == local && head == local {
        return Ok(SyncOutcome::UpToDate { version: local });
    }
    if head < request {
        return Err(SyncError::StaleHead { local, head });
    }

    let store = store.clone();
    let kind = tokio::task::spawn_blocking(move || store.apply(local, head, &record))
        .await
        .map_err(|e| SyncError::Task(e.to_string()))??;
    Ok(SyncOutcome::Applied {
        from: local,
        to: head,
        kind,
    })
}

/// Allows one sync in flight; concurrent triggers are coalesced.
pub struct SyncCoordinator {
    client: Arc<dyn HotsetClient>,
    store: Arc<HotsetStore>,
    gate: tokio::sync::Mutex<()>,
}

impl SyncCoordinator {
    pub fn new(client: Arc<dyn HotsetClient>, store: Arc<HotsetStore>) -> Self {
        Self {
            client,
            store,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<HotsetStore> {
        &self.store
    }

    /// Run a sync unless one is already running.
    pub async fn trigger(&self) -> Result<SyncOutcome, SyncError> {
        let Ok(_guard) = self.gate.try_lock() else {
            log::debug!("Sync already in flight; trigger coalesced");
            return Ok(SyncOutcome::AlreadyRunning);
        };
        sync_once(self.client.as_ref(), &self.store).await
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Exponential retry delays, doubling from `base` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            max: Duration::from_secs(60 * 60),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Periodic sync with backoff on failure.
pub struct SyncScheduler {
    coordinator: Arc<SyncCoordinator>,
    period: Duration,
    backoff: Backoff,
}

impl SyncScheduler {
    pub fn new(coordinator: Arc<SyncCoordinator>, period: Duration, backoff: Backoff) -> Self {
        Self {
            coordinator,
            period: period.max(Duration::from_millis(10)),
            backoff,
        }
    }

    /// Sync now, then every period. Failed runs are retried until the next
    /// period is due.
    pub fn spawn(self) -> JoinHandle<()> {
        log::info!("Hotset sync scheduler started, period {:?}", self.period);
        tokio::spawn(async move {
            let mut ticker = interval(self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let started = ticker.tick().await;
                self.run_with_retries(started).await;
            }
        })
    }

    async fn run_with_retries(&self, started: Instant) {
        let mut attempt = 0;
        loop {
            match self.coordinator.trigger().await {
                Ok(outcome) => {
                    log::debug!("Scheduled sync: {:?}", outcome);
                    return;
                }
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    if started.elapsed() + delay >= self.period {
                        log::warn!("Scheduled sync failed: {}; waiting for next period", e);
                        return;
                    }
                    log::warn!("Scheduled sync failed: {}; retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex;

    use lg_core::hotset::HotsetRecord;

    use crate::store::MemoryStateStore;

    /// Serves a fixed head version and record; can fail or stall fetches.
    struct Fake {
        latest: AtomicU64,
        record: Mutex<HotsetRecord>,
        fetched: Mutex<Vec<u64>>,
        /// Head named by fetch responses when it differs from the probe
        served_head: Option<u64>,
        probes: AtomicU32,
        fail_probes: AtomicU32,
        stall: Option<Arc<tokio::sync::Notify>>,
    }

    impl Fake {
        fn new(latest: u64, record: HotsetRecord) -> Self {
            Self {
                latest: AtomicU64::new(latest),
                record: Mutex::new(record),
                fetched: Mutex::new(Vec::new()),
                served_head: None,
                probes: AtomicU32::new(0),
                fail_probes: AtomicU32::new(0),
                stall: None,
            }
        }
    }

    #[async_trait]
    impl HotsetClient for Fake {
        async fn latest_version(&self) -> Result<u64, SyncError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.fail_probes.load(Ordering::SeqCst) > 0 {
                self.fail_probes.fetch_sub(1, Ordering::SeqCst);
                return Err(SyncError::Probe("HTTP 503".into()));
            }
            Ok(self.latest.load(Ordering::SeqCst))
        }

        async fn fetch(&self, version: u64) -> Result<HeadRecord, SyncError> {
            self.fetched.lock().unwrap().push(version);
            if let Some(stall) = &self.stall {
                stall.notified().await;
            }
            Ok(HeadRecord {
                head: self.served_head.unwrap_or(self.latest.load(Ordering::SeqCst)),
                record: self.record.lock().unwrap().clone(),
            })
        }
    }

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn store() -> Arc<HotsetStore> {
        Arc::new(HotsetStore::in_memory())
    }

    #[tokio::test]
    async fn test_first_sync_requests_version_zero() {
        let client = Fake::new(3, HotsetRecord::snapshot(v(&["a.com"]), v(&["x.com"])));
        let store = store();
        let outcome = sync_once(&client, &store).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                from: 0,
                to: 3,
                kind: ApplyKind::Snapshot
            }
        );
        assert_eq!(*client.fetched.lock().unwrap(), vec![0]);
        assert_eq!(store.version(), 3);

        let outcome = sync_once(&client, &store).await.unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate { version: 3 });
        assert_eq!(client.fetched.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_commit_uses_head_from_fetch() {
        let mut client = Fake::new(2, HotsetRecord::snapshot(v(&["a.com", "b.com"]), v(&[])));
        client.served_head = Some(3);
        let store = store();
        let outcome = sync_once(&client, &store).await.unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                from: 0,
                to: 3,
                kind: ApplyKind::Snapshot
            }
        );
        assert_eq!(store.version(), 3);
    }

    #[tokio::test]
    async fn test_fetch_with_head_at_local_is_up_to_date() {
        let store = store();
        store.apply(0, 2, &HotsetRecord::snapshot(v(&["a.com"]), v(&[]))).unwrap();
        let mut client = Fake::new(3, HotsetRecord::empty());
        client.served_head = Some(2);
        let outcome = sync_once(&client, &store).await.unwrap();
        assert_eq!(outcome, SyncOutcome::UpToDate { version: 2 });
        assert_eq!(store.version(), 2);
        assert!(store.state().lists.whitelist.contains("a.com"));
    }

    #[tokio::test]
    async fn test_local_ahead_resyncs_from_zero() {
        let backend = MemoryStateStore::new();
        let store = Arc::new(HotsetStore::open(Arc::new(backend), Duration::from_secs(60)).unwrap());
        store.apply(0, 9, &HotsetRecord::snapshot(v(&["old.com"]), v(&[]))).unwrap();

        let client = Fake::new(2, HotsetRecord::snapshot(v(&["new.com"]), v(&[])));
        sync_once(&client, &store).await.unwrap();
        assert_eq!(*client.fetched.lock().unwrap(), vec![0]);
        assert_eq!(store.version(), 2);
        assert!(store.state().lists.whitelist.contains("new.com"));
        assert!(!store.state().lists.whitelist.contains("old.com"));
    }

    #[tokio::test]
    async fn test_malformed_record_keeps_version() {
        let mut record = HotsetRecord::snapshot(v(&["a.com"]), v(&[]));
        record.white_snapshot = None;
        let client = Fake::new(1, record);
        let store = store();
        let err = sync_once(&client, &store).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::Record(_))));
        assert_eq!(store.version(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_is_reported() {
        let client = Fake::new(1, HotsetRecord::empty());
        client.fail_probes.store(1, Ordering::SeqCst);
        let err = sync_once(&client, &store()).await.unwrap_err();
        assert!(matches!(err, SyncError::Probe(_)));
        assert!(client.fetched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_coordinator_coalesces() {
        let stall = Arc::new(tokio::sync::Notify::new());
        let mut fake = Fake::new(1, HotsetRecord::snapshot(v(&["a.com"]), v(&[])));
        fake.stall = Some(stall.clone());
        let fake = Arc::new(fake);
        let coordinator = Arc::new(SyncCoordinator::new(fake.clone(), store()));

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move { coordinator.trigger().await }
        });
        while fake.fetched.lock().unwrap().is_empty() {
            tokio::task::yield_now().await;
        }

        assert_eq!(coordinator.trigger().await.unwrap(), SyncOutcome::AlreadyRunning);
        assert_eq!(fake.probes.load(Ordering::SeqCst), 1);

        stall.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, SyncOutcome::Applied { to: 1, .. }));
        assert_eq!(coordinator.store().version(), 1);
    }

    #[tokio::test]
    async fn test_scheduler_retries_after_failure() {
        let fake = Arc::new(Fake::new(4, HotsetRecord::snapshot(v(&["a.com"]), v(&[]))));
        fake.fail_probes.store(2, Ordering::SeqCst);
        let coordinator = Arc::new(SyncCoordinator::new(fake.clone(), store()));
        let backoff = Backoff {
            base: Duration::from_millis(5),
            max: Duration::from_millis(20),
        };
        let handle = SyncScheduler::new(coordinator.clone(), Duration::from_secs(3600), backoff).spawn();

        for _ in 0..200 {
            if coordinator.store().version() == 4 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(coordinator.store().version(), 4);
        assert_eq!(fake.probes.load(Ordering::SeqCst), 3);
        handle.abort();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(backoff.delay(0), Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(2));
        assert_eq!(backoff.delay(3), Duration::from_secs(8));
        assert_eq!(backoff.delay(4), Duration::from_secs(10));
        assert_eq!(backoff.delay(200), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_invalid_server_url() {
        assert!(matches!(
            HttpHotsetClient::new("not a url", Duration::from_secs(1)),
            Err(SyncError::InvalidServer { .. })
        ));
        assert!(HttpHotsetClient::new("http://127.0.0.1:9/", Duration::from_secs(1)).is_ok());
    }
}
