//! Hotset sync record (wire format)
//!
//! ```json
//! { "record": { "whiteSnapshot": ["a.com"], "blackSnapshot": [],
//!               "whiteAdd": [], "whiteRemove": [], "blackAdd": [], "blackRemove": [] } }
//! ```
//!
//! Snapshots are both null or both present. Present snapshots mean "replace
//! wholesale"; otherwise the add/remove sets fast-forward to the head.

use serde::{Deserialize, Deserializer, Serialize};

use super::delta::{Delta, ListDelta};

/// Error type for records that violate the snapshot rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record carries only one of whiteSnapshot/blackSnapshot")]
    HalfSnapshot,
}

/// One sync response record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotsetRecord {
    #[serde(default)]
    pub white_snapshot: Option<Vec<String>>,
    #[serde(default)]
    pub black_snapshot: Option<Vec<String>>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub white_add: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub white_remove: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub black_add: Vec<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub black_remove: Vec<String>,
}

/// `{ "record": ... }` body of `GET /hotset/{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotsetEnvelope {
    pub record: HotsetRecord,
}

/// A record and the head version it brings a client to.
///
/// A client must commit `head`, not a version it probed earlier: the head
/// may have moved between the probe and the fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeadRecord {
    pub head: u64,
    pub record: HotsetRecord,
}

/// How a record must be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind<'a> {
    /// Replace both lists wholesale
    Snapshot {
        white: &'a [String],
        black: &'a [String],
    },
    /// Apply removals then additions per polarity
    Delta,
}

impl HotsetRecord {
    /// Full-replace record.
    pub fn snapshot(white: Vec<String>, black: Vec<String>) -> Self {
        Self {
            white_snapshot: Some(white),
            black_snapshot: Some(black),
            ..Self::default()
        }
    }

    /// Incremental record. An empty delta means "already current".
    pub fn delta(delta: Delta) -> Self {
        Self {
            white_snapshot: None,
            black_snapshot: None,
            white_add: delta.white.add,
            white_remove: delta.white.remove,
            black_add: delta.black.add,
            black_remove: delta.black.remove,
        }
    }

    /// Record for a client that is already at the head.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_snapshot(&self) -> bool {
        self.white_snapshot.is_some() && self.black_snapshot.is_some()
    }

    pub fn has_delta(&self) -> bool {
        !(self.white_add.is_empty()
            && self.white_remove.is_empty()
            && self.black_add.is_empty()
            && self.black_remove.is_empty())
    }

    /// Classify the record, rejecting half-populated snapshots.
    pub fn kind(&self) -> Result<RecordKind<'_>, RecordError> {
        match (&self.white_snapshot, &self.black_snapshot) {
            (Some(white), Some(black)) => {
                if self.has_delta() {
                    log::warn!("snapshot record also carries delta fields; ignoring the delta");
                }
                Ok(RecordKind::Snapshot { white, black })
            }
            (None, None) => Ok(RecordKind::Delta),
            _ => Err(RecordError::HalfSnapshot),
        }
    }

    /// The add/remove sets as a [`Delta`].
    pub fn to_delta(&self) -> Delta {
        Delta {
            white: ListDelta {
                add: self.white_add.clone(),
                remove: self.white_remove.clone(),
            },
            black: ListDelta {
                add: self.black_add.clone(),
                remove: self.black_remove.clone(),
            },
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}
