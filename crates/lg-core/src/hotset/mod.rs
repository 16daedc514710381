//! Hotset: the distributed allow/deny domain lists
//!
//! - `record`: the sync wire record and its snapshot/delta classification
//! - `delta`: fast-forward delta computation and application
//! - `lists`: local list tables and the [`HostLists`] lookup trait

pub mod delta;
pub mod lists;
pub mod record;

pub use delta::{compute_delta, Delta, ListDelta};
pub use lists::{normalize_domain, HostLists, HotsetLists};
pub use record::{HeadRecord, HotsetEnvelope, HotsetRecord, RecordError, RecordKind};
