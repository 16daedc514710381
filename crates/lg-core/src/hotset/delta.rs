//! Fast-forward delta algebra
//!
//! A delta from snapshot `old` to snapshot `new` is `add = new - old` and
//! `remove = old - new`, per polarity. Applying it (removals first) to `old`
//! yields exactly `new`.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

/// Changes for one polarity.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ListDelta {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl ListDelta {
    /// Set difference in both directions. Keeps input order.
    pub fn between(old: &[String], new: &[String]) -> Self {
        let old_set: HashSet<&str> = old.iter().map(String::as_str).collect();
        let new_set: HashSet<&str> = new.iter().map(String::as_str).collect();
        Self {
            add: new.iter().filter(|d| !old_set.contains(d.as_str())).cloned().collect(),
            remove: old.iter().filter(|d| !new_set.contains(d.as_str())).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }

    /// Removals before additions.
    pub fn apply_to(&self, set: &mut BTreeSet<String>) {
        for domain in &self.remove {
            set.remove(domain);
        }
        for domain in &self.add {
            set.insert(domain.clone());
        }
    }
}

/// Changes for both polarities.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Delta {
    pub white: ListDelta,
    pub black: ListDelta,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.white.is_empty() && self.black.is_empty()
    }

    /// Number of domains added or removed across both lists.
    pub fn len(&self) -> usize {
        self.white.add.len() + self.white.remove.len() + self.black.add.len() + self.black.remove.len()
    }
}

/// Delta that fast-forwards `(old_white, old_black)` to `(new_white, new_black)`.
pub fn compute_delta(
    old_white: &[String],
    old_black: &[String],
    new_white: &[String],
    new_black: &[String],
) -> Delta {
    Delta {
        white: ListDelta::between(old_white, new_white),
        black: ListDelta::between(old_black, new_black),
    }
}
