//! Hotset Ledger
//!
//! A bounded window of versioned snapshots. The newest row is the head and
//! carries only snapshots. Every older retained row also carries the delta
//! that jumps from its snapshot straight to the current head; those deltas are
//! recomputed each time a new head is created.
//!
//! Row lifecycle: created as head, superseded into history, pruned once the
//! window overflows (oldest first).

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use lg_core::hotset::{compute_delta, normalize_domain, HeadRecord, HotsetRecord};
use lg_core::types::Polarity;
use serde::{Deserialize, Serialize};

use crate::registry::{DomainSource, RegistryError};
use crate::storage::{LedgerStorage, StorageError};

/// Error type for ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("No hotset version has been published yet")]
    Empty,
    #[error("Version {0} not found")]
    VersionNotFound(u64),
    #[error("{polarity:?} snapshot has {len} domains, limit is {max}")]
    SnapshotTooLarge {
        polarity: Polarity,
        len: usize,
        max: usize,
    },
    #[error("Head version {0} has no snapshot")]
    MissingSnapshot(u64),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("Background task failed: {0}")]
    Task(String),
}

// =============================================================================
// Rows
// =============================================================================

/// One stored version row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotsetVersion {
    pub version: u64,
    pub white_snapshot: Option<Vec<String>>,
    pub black_snapshot: Option<Vec<String>>,
    pub white_add: Option<Vec<String>>,
    pub white_remove: Option<Vec<String>>,
    pub black_add: Option<Vec<String>>,
    pub black_remove: Option<Vec<String>>,
    /// Unix seconds
    #[serde(default)]
    pub created_at: u64,
}

impl HotsetVersion {
    /// A fresh head row: snapshots only.
    pub fn head(version: u64, white: Vec<String>, black: Vec<String>, created_at: u64) -> Self {
        Self {
            version,
            white_snapshot: Some(white),
            black_snapshot: Some(black),
            white_add: None,
            white_remove: None,
            black_add: None,
            black_remove: None,
            created_at,
        }
    }

    fn white(&self) -> &[String] {
        self.white_snapshot.as_deref().unwrap_or_default()
    }

    fn black(&self) -> &[String] {
        self.black_snapshot.as_deref().unwrap_or_default()
    }

    /// Point this row's delta at `head`.
    fn retarget(&mut self, head: &HotsetVersion) {
        let delta = compute_delta(self.white(), self.black(), head.white(), head.black());
        self.white_add = Some(delta.white.add);
        self.white_remove = Some(delta.white.remove);
        self.black_add = Some(delta.black.add);
        self.black_remove = Some(delta.black.remove);
    }

    fn delta_record(&self) -> HotsetRecord {
        HotsetRecord {
            white_snapshot: None,
            black_snapshot: None,
            white_add: self.white_add.clone().unwrap_or_default(),
            white_remove: self.white_remove.clone().unwrap_or_default(),
            black_add: self.black_add.clone().unwrap_or_default(),
            black_remove: self.black_remove.clone().unwrap_or_default(),
        }
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Window and snapshot bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    pub max_white: usize,
    pub max_black: usize,
    /// Retained versions, head included
    pub max_versions: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_white: 1000,
            max_black: 1000,
            max_versions: 5,
        }
    }
}

/// Versioned hotset history.
pub struct HotsetLedger {
    config: LedgerConfig,
    storage: Arc<dyn LedgerStorage>,
    rows: RwLock<BTreeMap<u64, HotsetVersion>>,
}

impl std::fmt::Debug for HotsetLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotsetLedger")
            .field("config", &self.config)
            .field("versions", &self.versions())
            .finish_non_exhaustive()
    }
}

impl HotsetLedger {
    /// Open a ledger over whatever the storage already holds.
    pub fn open(config: LedgerConfig, storage: Arc<dyn LedgerStorage>) -> Result<Self, LedgerError> {
        let rows: BTreeMap<u64, HotsetVersion> =
            storage.load()?.into_iter().map(|row| (row.version, row)).collect();
        if let Some((&latest, _)) = rows.last_key_value() {
            log::info!("Ledger opened with {} versions, head v{}", rows.len(), latest);
        }
        Ok(Self {
            config: config.normalized(),
            storage,
            rows: RwLock::new(rows),
        })
    }

    pub fn config(&self) -> LedgerConfig {
        self.config
    }

    /// Cut a new version from the top-ranked domains of `source`.
    pub fn create_version(&self, source: &dyn DomainSource) -> Result<HotsetVersion, LedgerError> {
        let white = source.top_domains(Polarity::White, self.config.max_white)?;
        let black = source.top_domains(Polarity::Black, self.config.max_black)?;
        self.publish(white, black)
    }

    /// Publish explicit snapshots as the new head.
    ///
    /// The new table is built aside, persisted, then swapped in; a storage
    /// failure leaves both the stored and the visible state untouched.
    pub fn publish(&self, white: Vec<String>, black: Vec<String>) -> Result<HotsetVersion, LedgerError> {
        let white = dedup_normalized(white);
        let black = dedup_normalized(black);
        check_size(Polarity::White, white.len(), self.config.max_white)?;
        check_size(Polarity::Black, black.len(), self.config.max_black)?;

        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = rows.clone();

        let version = next.last_key_value().map_or(1, |(&v, _)| v + 1);
        let head = HotsetVersion::head(version, white, black, unix_now());
        next.insert(version, head.clone());

        // Walk down until the first gap: the edge of the retained window
        let mut older = version - 1;
        while let Some(row) = next.get_mut(&older) {
            row.retarget(&head);
            if older == 0 {
                break;
            }
            older -= 1;
        }

        while next.len() > self.config.max_versions {
            if let Some((pruned, _)) = next.pop_first() {
                log::debug!("Pruned hotset version {}", pruned);
            }
        }

        let table: Vec<HotsetVersion> = next.values().cloned().collect();
        self.storage.save(&table)?;
        *rows = next;

        log::info!(
            "Created hotset version {} ({} white, {} black, {} retained)",
            version,
            head.white().len(),
            head.black().len(),
            rows.len()
        );
        Ok(head)
    }

    pub fn latest_version(&self) -> Result<u64, LedgerError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.last_key_value().map(|(&v, _)| v).ok_or(LedgerError::Empty)
    }

    pub fn oldest_version(&self) -> Result<u64, LedgerError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.first_key_value().map(|(&v, _)| v).ok_or(LedgerError::Empty)
    }

    /// Record that fast-forwards a client at `version` to the head, tagged
    /// with the head it was computed against.
    pub fn record_for_version(&self, version: u64) -> Result<HeadRecord, LedgerError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let (&latest, head) = rows.last_key_value().ok_or(LedgerError::Empty)?;
        let oldest = rows.first_key_value().map_or(latest, |(&v, _)| v);

        if version > latest {
            return Err(LedgerError::VersionNotFound(version));
        }
        let record = if version == latest {
            HotsetRecord::empty()
        } else if version < oldest {
            let white = head.white_snapshot.clone().ok_or(LedgerError::MissingSnapshot(latest))?;
            let black = head.black_snapshot.clone().ok_or(LedgerError::MissingSnapshot(latest))?;
            log::debug!("v{} is outside the window [{}, {}], sending snapshots", version, oldest, latest);
            HotsetRecord::snapshot(white, black)
        } else {
            rows.get(&version)
                .map(HotsetVersion::delta_record)
                .ok_or(LedgerError::VersionNotFound(version))?
        };
        Ok(HeadRecord { head: latest, record })
    }

    /// The stored row itself, for diagnostics.
    pub fn raw_record(&self, version: u64) -> Result<HotsetVersion, LedgerError> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.get(&version).cloned().ok_or(LedgerError::VersionNotFound(version))
    }

    /// Retained version numbers, oldest first.
    pub fn versions(&self) -> Vec<u64> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        rows.keys().copied().collect()
    }
}

impl LedgerConfig {
    fn normalized(self) -> Self {
        Self {
            max_versions: self.max_versions.max(1),
            ..self
        }
    }
}

fn check_size(polarity: Polarity, len: usize, max: usize) -> Result<(), LedgerError> {
    if len > max {
        return Err(LedgerError::SnapshotTooLarge { polarity, len, max });
    }
    Ok(())
}

/// Normalize names and drop blanks and repeats, keeping first-seen order.
fn dedup_normalized(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .iter()
        .filter_map(|n| normalize_domain(n))
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
