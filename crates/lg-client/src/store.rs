//! Client-side hotset state
//!
//! The synced whitelist/blacklist and their version live behind a single
//! `Arc` that is replaced only after the new state has been persisted, so a
//! reader sees either the state before a sync or the state after it. The
//! host-status cache is separate, short-lived and never persisted.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use lg_core::hotset::{HostLists, HotsetLists, HotsetRecord, RecordError, RecordKind};
use lg_core::HostStatus;
use serde::{Deserialize, Serialize};

/// Default lifetime of a host-status cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Corrupt state file '{path}': {message}")]
    Format { path: String, message: String },
    #[error("State store unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed hotset record: {0}")]
    Record(#[from] RecordError),
    #[error("Local version changed during sync (expected {expected}, found {found})")]
    VersionConflict { expected: u64, found: u64 },
}

/// Persisted client state. Version 0 means never synced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotsetState {
    pub version: u64,
    #[serde(flatten)]
    pub lists: HotsetLists,
}

/// How a record changed the lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyKind {
    Snapshot,
    Delta,
}

// =============================================================================
// Backends
// =============================================================================

pub trait StateStore: Send + Sync {
    /// Stored state, or the empty version-0 state when nothing was saved yet.
    fn load(&self) -> Result<HotsetState, StoreError>;
    /// Replace the stored state. Must be all-or-nothing.
    fn save(&self, state: &HotsetState) -> Result<(), StoreError>;
}

/// One JSON document, written to a temp file and renamed into place.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, e: impl std::fmt::Display) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            message: e.to_string(),
        }
    }
}

impl StateStore for JsonFileStore {
    fn load(&self) -> Result<HotsetState, StoreError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HotsetState::default()),
            Err(e) => return Err(self.io_error(e)),
        };
        serde_json::from_str(&text).map_err(|e| StoreError::Format {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    fn save(&self, state: &HotsetState) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let json = serde_json::to_vec_pretty(state).map_err(|e| self.io_error(e))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        tmp.write_all(&json).map_err(|e| self.io_error(e))?;
        tmp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_error(e.error))?;
        Ok(())
    }
}

/// Volatile backend; saves can be made to fail.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<HotsetState>,
    fail_saves: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: HotsetState) -> Self {
        Self {
            state: Mutex::new(state),
            fail_saves: AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<HotsetState, StoreError> {
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, state: &HotsetState) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("save disabled".to_string()));
        }
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        Ok(())
    }
}

// =============================================================================
// Store
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    status: HostStatus,
    observed_at: Instant,
}

pub struct HotsetStore {
    backend: Arc<dyn StateStore>,
    state: RwLock<Arc<HotsetState>>,
    commit: Mutex<()>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl std::fmt::Debug for HotsetStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("HotsetStore")
            .field("version", &state.version)
            .field("whitelist", &state.lists.whitelist.len())
            .field("blacklist", &state.lists.blacklist.len())
            .field("cache_ttl", &self.cache_ttl)
            .finish()
    }
}

impl HotsetStore {
    /// Load persisted state from `backend`.
    pub fn open(backend: Arc<dyn StateStore>, cache_ttl: Duration) -> Result<Self, StoreError> {
        let state = backend.load()?;
        log::debug!(
            "Hotset store opened at version {} ({} white, {} black)",
            state.version,
            state.lists.whitelist.len(),
            state.lists.blacklist.len()
        );
        Ok(Self {
            backend,
            state: RwLock::new(Arc::new(state)),
            commit: Mutex::new(()),
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Arc::new(MemoryStateStore::new()),
            state: RwLock::new(Arc::new(HotsetState::default())),
            commit: Mutex::new(()),
            cache: RwLock::new(HashMap::new()),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Current committed state.
    pub fn state(&self) -> Arc<HotsetState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn version(&self) -> u64 {
        self.state().version
    }

    /// Consistent lookup view over one committed state plus the live cache.
    pub fn view(&self) -> StoreView<'_> {
        StoreView {
            state: self.state(),
            store: self,
        }
    }

    /// Apply `record` on top of version `from` and commit it as version `to`.
    ///
    /// The new state is built on a copy and persisted before it replaces the
    /// current one. Any error leaves version and lists untouched.
    pub fn apply(&self, from: u64, to: u64, record: &HotsetRecord) -> Result<ApplyKind, StoreError> {
        let _guard = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state();
        if current.version != from {
            return Err(StoreError::VersionConflict {
                expected: from,
                found: current.version,
            });
        }

        let kind = match record.kind()? {
            RecordKind::Snapshot { .. } => ApplyKind::Snapshot,
            RecordKind::Delta => ApplyKind::Delta,
        };
        let mut next = HotsetState {
            version: to,
            lists: current.lists.clone(),
        };
        next.lists.apply_record(record)?;
        self.backend.save(&next)?;

        log::info!(
            "Hotset {:?} applied: version {} -> {} ({} white, {} black)",
            kind,
            from,
            to,
            next.lists.whitelist.len(),
            next.lists.blacklist.len()
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(next);
        Ok(kind)
    }

    // -------------------------------------------------------------------------
    // Host-status cache
    // -------------------------------------------------------------------------

    pub fn record(&self, host: &str, status: HostStatus) {
        self.record_at(host, status, Instant::now());
    }

    fn record_at(&self, host: &str, status: HostStatus, observed_at: Instant) {
        let Some(host) = lg_core::hotset::normalize_domain(host) else {
            return;
        };
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Expired entries go on every write so the map stays bounded by the TTL
        let ttl = self.cache_ttl;
        cache.retain(|_, entry| entry.observed_at.elapsed() < ttl);
        cache.insert(host, CacheEntry { status, observed_at });
    }

    /// Cached status if the entry is younger than the TTL.
    pub fn cached_status(&self, host: &str) -> Option<HostStatus> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let entry = cache.get(host)?;
        (entry.observed_at.elapsed() < self.cache_ttl).then_some(entry.status)
    }

    /// Drop entries at least `age` old. Returns how many were removed.
    pub fn evict_older_than(&self, age: Duration) -> usize {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let before = cache.len();
        cache.retain(|_, entry| entry.observed_at.elapsed() < age);
        let removed = before - cache.len();
        if removed > 0 {
            log::debug!("Evicted {} host-status cache entries", removed);
        }
        removed
    }

    pub fn cache_len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// [`HostLists`] over one committed state.
pub struct StoreView<'a> {
    state: Arc<HotsetState>,
    store: &'a HotsetStore,
}

impl StoreView<'_> {
    pub fn version(&self) -> u64 {
        self.state.version
    }
}

impl HostLists for StoreView<'_> {
    fn is_whitelisted(&self, host: &str) -> bool {
        self.state.lists.is_whitelisted(host)
    }

    fn is_blacklisted(&self, host: &str) -> bool {
        self.state.lists.is_blacklisted(host)
    }

    fn cached_status(&self, host: &str) -> Option<HostStatus> {
        self.store.cached_status(host)
    }

    fn whitelist_hosts(&self) -> BTreeSet<String> {
        self.state.lists.whitelist_hosts()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lg_core::hotset::compute_delta;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn store_with(backend: Arc<MemoryStateStore>) -> HotsetStore {
        HotsetStore::open(backend, DEFAULT_CACHE_TTL).unwrap()
    }

    #[test]
    fn test_apply_snapshot_then_delta() {
        let store = store_with(Arc::new(MemoryStateStore::new()));
        assert_eq!(store.version(), 0);

        let kind = store
            .apply(0, 3, &HotsetRecord::snapshot(v(&["a.com", "b.com"]), v(&["x.com"])))
            .unwrap();
        assert_eq!(kind, ApplyKind::Snapshot);
        assert_eq!(store.version(), 3);

        let delta = compute_delta(&v(&["a.com", "b.com"]), &v(&["x.com"]), &v(&["b.com", "c.com"]), &v(&[]));
        let kind = store.apply(3, 4, &HotsetRecord::delta(delta)).unwrap();
        assert_eq!(kind, ApplyKind::Delta);

        let view = store.view();
        assert_eq!(view.version(), 4);
        assert!(!view.is_whitelisted("a.com"));
        assert!(view.is_whitelisted("c.com"));
        assert!(!view.is_blacklisted("x.com"));
    }

    #[test]
    fn test_failed_save_leaves_state() {
        let backend = Arc::new(MemoryStateStore::new());
        let store = store_with(backend.clone());
        store.apply(0, 1, &HotsetRecord::snapshot(v(&["a.com"]), v(&[]))).unwrap();

        backend.set_fail_saves(true);
        let err = store
            .apply(1, 2, &HotsetRecord::snapshot(v(&["b.com"]), v(&[])))
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert_eq!(store.version(), 1);
        assert!(store.view().is_whitelisted("a.com"));
        assert_eq!(backend.load().unwrap().version, 1);
    }

    #[test]
    fn test_malformed_record_rejected() {
        let store = store_with(Arc::new(MemoryStateStore::new()));
        let mut record = HotsetRecord::snapshot(v(&["a.com"]), v(&[]));
        record.black_snapshot = None;
        assert!(matches!(store.apply(0, 1, &record), Err(StoreError::Record(_))));
        assert_eq!(store.version(), 0);
        assert!(store.state().lists.is_empty());
    }

    #[test]
    fn test_version_conflict() {
        let store = store_with(Arc::new(MemoryStateStore::new()));
        let err = store.apply(5, 6, &HotsetRecord::empty()).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { expected: 5, found: 0 }));
    }

    #[test]
    fn test_json_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("hotset.json");
        let store = HotsetStore::open(Arc::new(JsonFileStore::new(&path)), DEFAULT_CACHE_TTL).unwrap();
        store
            .apply(0, 7, &HotsetRecord::snapshot(v(&["a.com"]), v(&["x.com"])))
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(json["version"], 7);
        assert_eq!(json["whitelist"][0], "a.com");
        assert_eq!(json["blacklist"][0], "x.com");

        let reopened = HotsetStore::open(Arc::new(JsonFileStore::new(&path)), DEFAULT_CACHE_TTL).unwrap();
        assert_eq!(*reopened.state(), *store.state());
    }

    #[test]
    fn test_json_file_store_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hotset.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(JsonFileStore::new(&path).load(), Err(StoreError::Format { .. })));
    }

    #[test]
    fn test_cache_ttl_and_eviction() {
        let store = store_with(Arc::new(MemoryStateStore::new()));
        store.record("Trusted.com", HostStatus::Trusted);
        store.record("bad.com", HostStatus::Blacklisted);
        assert_eq!(store.cached_status("trusted.com"), Some(HostStatus::Trusted));
        assert_eq!(store.view().cached_status("bad.com"), Some(HostStatus::Blacklisted));

        let old = Instant::now().checked_sub(Duration::from_secs(3600));
        if let Some(old) = old {
            store.record_at("old.com", HostStatus::Suspicious, old);
            assert_eq!(store.evict_older_than(Duration::from_secs(60)), 1);
        }
        assert_eq!(store.cache_len(), 2);
        assert_eq!(store.evict_older_than(Duration::ZERO), 2);
        assert_eq!(store.cache_len(), 0);
    }

    #[test]
    fn test_record_drops_expired_entries() {
        let store = HotsetStore::open(Arc::new(MemoryStateStore::new()), Duration::from_secs(60)).unwrap();
        let Some(old) = Instant::now().checked_sub(Duration::from_secs(3600)) else {
            return;
        };
        store.record_at("old.com", HostStatus::Suspicious, old);
        store.record_at("older.com", HostStatus::Trusted, old);
        assert_eq!(store.cache_len(), 1);

        store.record("fresh.com", HostStatus::Trusted);
        assert_eq!(store.cache_len(), 1);
        assert_eq!(store.cached_status("fresh.com"), Some(HostStatus::Trusted));
        assert_eq!(store.cached_status("old.com"), None);
    }

    #[test]
    fn test_cache_expires_after_ttl() {
        let store = HotsetStore::open(Arc::new(MemoryStateStore::new()), Duration::ZERO).unwrap();
        store.record("a.com", HostStatus::Trusted);
        assert_eq!(store.cached_status("a.com"), None);
        assert_eq!(store.cache_len(), 1);
    }
}
