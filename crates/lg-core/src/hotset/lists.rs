//! Whitelist/blacklist tables and the lookup interface the scorer consumes

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::delta::{Delta, ListDelta};
use super::record::{HotsetRecord, RecordError, RecordKind};
use crate::types::HostStatus;

/// Read-only view of the local host tables.
pub trait HostLists {
    fn is_whitelisted(&self, host: &str) -> bool;
    fn is_blacklisted(&self, host: &str) -> bool;
    /// Decision-cache entry for `host`, if any and still fresh.
    fn cached_status(&self, host: &str) -> Option<HostStatus>;
    /// Every whitelisted host, for the near-whitelist scan.
    fn whitelist_hosts(&self) -> BTreeSet<String>;
}

/// Trim, lowercase and drop a trailing dot. `None` for blank names.
pub fn normalize_domain(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}

/// In-memory whitelist and blacklist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotsetLists {
    pub whitelist: BTreeSet<String>,
    pub blacklist: BTreeSet<String>,
}

impl HotsetLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(white: &[String], black: &[String]) -> Self {
        let mut lists = Self::default();
        lists.replace_all(white, black);
        lists
    }

    /// Replace both lists wholesale.
    pub fn replace_all(&mut self, white: &[String], black: &[String]) {
        self.whitelist = white.iter().filter_map(|d| normalize_domain(d)).collect();
        self.blacklist = black.iter().filter_map(|d| normalize_domain(d)).collect();
    }

    /// Apply a fast-forward delta, removals before additions per polarity.
    pub fn apply_delta(&mut self, delta: &Delta) {
        let normalized = Delta {
            white: normalize_list_delta(&delta.white),
            black: normalize_list_delta(&delta.black),
        };
        normalized.white.apply_to(&mut self.whitelist);
        normalized.black.apply_to(&mut self.blacklist);
    }

    /// Apply a sync record in place. Nothing changes when it is malformed.
    pub fn apply_record(&mut self, record: &HotsetRecord) -> Result<(), RecordError> {
        match record.kind()? {
            RecordKind::Snapshot { white, black } => self.replace_all(white, black),
            RecordKind::Delta => self.apply_delta(&record.to_delta()),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.whitelist.len() + self.blacklist.len()
    }

    pub fn is_empty(&self) -> bool {
        self.whitelist.is_empty() && self.blacklist.is_empty()
    }
}

fn normalize_list_delta(delta: &ListDelta) -> ListDelta {
    ListDelta {
        add: delta.add.iter().filter_map(|d| normalize_domain(d)).collect(),
        remove: delta.remove.iter().filter_map(|d| normalize_domain(d)).collect(),
    }
}

impl HostLists for HotsetLists {
    fn is_whitelisted(&self, host: &str) -> bool {
        self.whitelist.contains(host)
    }

    fn is_blacklisted(&self, host: &str) -> bool {
        self.blacklist.contains(host)
    }

    fn cached_status(&self, _host: &str) -> Option<HostStatus> {
        None
    }

    fn whitelist_hosts(&self) -> BTreeSet<String> {
        self.whitelist.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotset::delta::compute_delta;

    fn v(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_domain() {
        assert_eq!(normalize_domain("  Example.COM. "), Some("example.com".to_string()));
        assert_eq!(normalize_domain("   "), None);
        assert_eq!(normalize_domain("."), None);
    }

    #[test]
    fn test_replace_all_normalizes() {
        let lists = HotsetLists::from_snapshots(&v(&["A.com", "", "a.com"]), &v(&["bad.com."]));
        assert_eq!(lists.whitelist.len(), 1);
        assert!(lists.is_whitelisted("a.com"));
        assert!(lists.is_blacklisted("bad.com"));
        assert_eq!(lists.len(), 2);
    }

    #[test]
    fn test_delta_matches_snapshot_replace() {
        let old = HotsetLists::from_snapshots(&v(&["a.com", "b.com"]), &v(&["x.com"]));
        let head_white = v(&["b.com", "c.com"]);
        let head_black = v(&["y.com"]);

        let delta = compute_delta(
            &old.whitelist.iter().cloned().collect::<Vec<_>>(),
            &old.blacklist.iter().cloned().collect::<Vec<_>>(),
            &head_white,
            &head_black,
        );

        let mut by_delta = old.clone();
        by_delta.apply_record(&HotsetRecord::delta(delta)).unwrap();

        let mut by_snapshot = old;
        by_snapshot
            .apply_record(&HotsetRecord::snapshot(head_white, head_black))
            .unwrap();

        assert_eq!(by_delta, by_snapshot);
    }

    #[test]
    fn test_malformed_record_changes_nothing() {
        let mut lists = HotsetLists::from_snapshots(&v(&["a.com"]), &[]);
        let before = lists.clone();
        let record = HotsetRecord {
            black_snapshot: Some(vec![]),
            white_add: v(&["evil.com"]),
            ..HotsetRecord::default()
        };
        assert!(lists.apply_record(&record).is_err());
        assert_eq!(lists, before);
    }
}
