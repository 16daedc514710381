//! LinkGuard Core Library
//!
//! This crate provides the local risk-decision engine for LinkGuard: it
//! decides, offline, whether a link is safe to open.
//!
//! # Architecture
//!
//! A raw link is canonicalized into a [`CanonUrl`], checked against the local
//! whitelist/blacklist tables, and otherwise scored by the [`HeuristicScorer`].
//! Nothing in this crate performs I/O; the tables are reached through the
//! [`HostLists`] trait and the public suffix list is an explicit value.
//!
//! # Modules
//!
//! - `url`: Generic URI splitting without allocations
//! - `psl`: Public Suffix List for eTLD+1 extraction
//! - `canon`: URL canonicalization
//! - `distance`: Levenshtein distance for lookalike detection
//! - `policy`: Tunable heuristic constants
//! - `heuristics`: Critical/soft risk scorer
//! - `hotset`: Hotset sync record, delta algebra and list tables
//! - `types`: Shared type definitions

pub mod canon;
pub mod distance;
pub mod heuristics;
pub mod hotset;
pub mod policy;
pub mod psl;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use canon::{CanonUrl, Canonicalizer, HostKind, ParseFailure};
pub use heuristics::{Assessment, Evaluation, HeuristicScorer, ListHit};
pub use hotset::{HeadRecord, HostLists, HotsetEnvelope, HotsetLists, HotsetRecord};
pub use policy::{Combiner, HeuristicPolicy, PolicyError};
pub use psl::{PslError, SuffixList};
pub use types::{HostStatus, Polarity, Reason, ReasonDetail, Reasons, Verdict};
