//! Domain registry: the ranked source each hotset version is cut from
//!
//! Rows are `{name, suspicious, access_count}`. A snapshot is the top-N rows
//! of one polarity, most-accessed first, ties broken by name.
//!
//! Two on-disk formats are accepted:
//!
//! - JSON: an array of rows
//! - text: one domain per line, `#` comments, `!` prefix marks a suspicious
//!   domain, an optional second column is the access count
//!
//! ```text
//! # trusted
//! example.com 120
//! !examp1e.com 4
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use lg_core::hotset::normalize_domain;
use lg_core::types::Polarity;
use serde::{Deserialize, Serialize};

/// Error type for registry loading and updates.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid domain name '{0}'")]
    InvalidName(String),
    #[error("Line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("Failed to read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Invalid registry JSON: {0}")]
    Json(String),
}

/// One registry row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEntry {
    pub name: String,
    #[serde(default)]
    pub suspicious: bool,
    #[serde(default)]
    pub access_count: u64,
}

impl DomainEntry {
    pub fn polarity(&self) -> Polarity {
        if self.suspicious {
            Polarity::Black
        } else {
            Polarity::White
        }
    }
}

/// Anything that can rank domains for a new hotset version.
pub trait DomainSource: Send + Sync {
    fn top_domains(&self, polarity: Polarity, limit: usize) -> Result<Vec<String>, RegistryError>;
}

// =============================================================================
// Registry
// =============================================================================

/// In-memory domain registry.
#[derive(Debug, Clone, Default)]
pub struct DomainRegistry {
    entries: BTreeMap<String, DomainEntry>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&DomainEntry> {
        normalize_domain(name).and_then(|n| self.entries.get(&n))
    }

    /// Insert a domain or change its polarity. Access counts are kept.
    pub fn upsert(&mut self, name: &str, suspicious: bool) -> Result<(), RegistryError> {
        let name = validated_name(name)?;
        self.entries
            .entry(name.clone())
            .and_modify(|e| e.suspicious = suspicious)
            .or_insert(DomainEntry {
                name,
                suspicious,
                access_count: 0,
            });
        Ok(())
    }

    fn insert_entry(&mut self, entry: DomainEntry) -> Result<(), RegistryError> {
        let name = validated_name(&entry.name)?;
        match self.entries.get_mut(&name) {
            Some(existing) => {
                existing.suspicious = entry.suspicious;
                existing.access_count = existing.access_count.max(entry.access_count);
            }
            None => {
                self.entries.insert(name.clone(), DomainEntry { name, ..entry });
            }
        }
        Ok(())
    }

    /// Top `limit` names of one polarity.
    pub fn top(&self, polarity: Polarity, limit: usize) -> Vec<String> {
        let mut rows: Vec<&DomainEntry> =
            self.entries.values().filter(|e| e.polarity() == polarity).collect();
        rows.sort_by(|a, b| b.access_count.cmp(&a.access_count).then_with(|| a.name.cmp(&b.name)));
        rows.into_iter().take(limit).map(|e| e.name.clone()).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &DomainEntry> {
        self.entries.values()
    }

    // =========================================================================
    // Loading
    // =========================================================================

    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        let rows: Vec<DomainEntry> =
            serde_json::from_str(text).map_err(|e| RegistryError::Json(e.to_string()))?;
        let mut registry = Self::new();
        for row in rows {
            registry.insert_entry(row)?;
        }
        Ok(registry)
    }

    pub fn from_text(text: &str) -> Result<Self, RegistryError> {
        let mut registry = Self::new();

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = match raw_line.find('#') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }

            let mut columns = line.split_whitespace();
            let first = columns.next().unwrap_or_default();
            let (suspicious, name) = match first.strip_prefix('!') {
                Some(rest) => (true, rest),
                None => (false, first),
            };
            let access_count = match columns.next() {
                Some(count) => count.parse::<u64>().map_err(|_| RegistryError::Syntax {
                    line: line_no,
                    message: format!("invalid access count '{}'", count),
                })?,
                None => 0,
            };
            if columns.next().is_some() {
                return Err(RegistryError::Syntax {
                    line: line_no,
                    message: "too many columns".to_string(),
                });
            }

            registry
                .insert_entry(DomainEntry {
                    name: name.to_string(),
                    suspicious,
                    access_count,
                })
                .map_err(|e| RegistryError::Syntax {
                    line: line_no,
                    message: e.to_string(),
                })?;
        }

        Ok(registry)
    }

    /// Load from a `.json` file or a text list.
    pub fn load(path: &Path) -> Result<Self, RegistryError> {
        let text = std::fs::read_to_string(path).map_err(|e| RegistryError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let registry = if is_json {
            Self::from_json(&text)?
        } else {
            Self::from_text(&text)?
        };
        log::debug!("Loaded {} domains from {}", registry.len(), path.display());
        Ok(registry)
    }
}

impl DomainSource for DomainRegistry {
    fn top_domains(&self, polarity: Polarity, limit: usize) -> Result<Vec<String>, RegistryError> {
        Ok(self.top(polarity, limit))
    }
}

/// Registry file re-read on every ranking, so edits are picked up by the next version.
#[derive(Debug, Clone)]
pub struct RegistryFile {
    path: PathBuf,
}

impl RegistryFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl DomainSource for RegistryFile {
    fn top_domains(&self, polarity: Polarity, limit: usize) -> Result<Vec<String>, RegistryError> {
        Ok(DomainRegistry::load(&self.path)?.top(polarity, limit))
    }
}

/// FQDN check: 3-253 chars, at least two labels, LDH labels of 1-63 chars.
pub fn is_valid_domain_name(name: &str) -> bool {
    if name.len() < 3 || name.len() > 253 || !name.contains('.') {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    })
}

fn validated_name(name: &str) -> Result<String, RegistryError> {
    match normalize_domain(name) {
        Some(n) if is_valid_domain_name(&n) => Ok(n),
        _ => Err(RegistryError::InvalidName(name.trim().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_orders_by_access_then_name() {
        let registry = DomainRegistry::from_text("b.com 1\na.com\nc.com 2\n!bad.com 9\n").unwrap();

        assert_eq!(registry.top(Polarity::White, 10), vec!["c.com", "b.com", "a.com"]);
        assert_eq!(registry.top(Polarity::White, 2), vec!["c.com", "b.com"]);
        assert_eq!(registry.top(Polarity::Black, 10), vec!["bad.com"]);
    }

    #[test]
    fn test_names_are_normalized_and_deduplicated() {
        let mut registry = DomainRegistry::new();
        registry.upsert("  Example.COM ", false).unwrap();
        registry.upsert("example.com.", true).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("EXAMPLE.com").unwrap().suspicious);
        assert!(registry.get("unknown.com").is_none());
    }

    #[test]
    fn test_invalid_names() {
        let mut registry = DomainRegistry::new();
        assert!(registry.upsert("localhost", false).is_err());
        assert!(registry.upsert("a b.com", false).is_err());
        assert!(registry.upsert("-bad.com", false).is_err());
        assert!(registry.upsert("", false).is_err());
        assert!(is_valid_domain_name("xn--e1afmkfd.com"));
    }

    #[test]
    fn test_from_text() {
        let text = "# header\nexample.com 10\n!examp1e.com 3  # lookalike\n\nwiki.org\n";
        let registry = DomainRegistry::from_text(text).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.top(Polarity::White, 5), vec!["example.com", "wiki.org"]);
        assert_eq!(registry.top(Polarity::Black, 5), vec!["examp1e.com"]);

        match DomainRegistry::from_text("ok.com\nbad.com x\n") {
            Err(RegistryError::Syntax { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_from_json() {
        let text = r#"[{"name":"a.com","access_count":5},{"name":"b.com","suspicious":true}]"#;
        let registry = DomainRegistry::from_json(text).unwrap();
        assert_eq!(registry.get("a.com").unwrap().access_count, 5);
        assert_eq!(registry.top(Polarity::Black, 1), vec!["b.com"]);
        assert!(DomainRegistry::from_json("{}").is_err());
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let json = dir.path().join("domains.json");
        std::fs::write(&json, r#"[{"name":"a.com"}]"#).unwrap();
        let txt = dir.path().join("domains.txt");
        std::fs::write(&txt, "!b.com\n").unwrap();

        assert_eq!(DomainRegistry::load(&json).unwrap().len(), 1);
        let source = RegistryFile::new(&txt);
        assert_eq!(source.top_domains(Polarity::Black, 5).unwrap(), vec!["b.com"]);
        assert!(DomainRegistry::load(&dir.path().join("missing.txt")).is_err());
    }
}
