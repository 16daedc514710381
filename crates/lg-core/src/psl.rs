//! Public Suffix List (PSL) utilities for eTLD+1 extraction
//!
//! The list is an explicit value owned by whoever canonicalizes URLs; there is
//! no process-wide PSL state. By default the embedded ICANN subset is used,
//! and a complete list file can be loaded instead.
//!
//! # Examples
//!
//! ```
//! use lg_core::psl::SuffixList;
//!
//! let psl = SuffixList::embedded().unwrap();
//! let parts = psl.split("sub.example.co.uk").unwrap().unwrap();
//! assert_eq!(parts.domain, "example.co.uk");
//! assert_eq!(parts.subdomain.as_deref(), Some("sub"));
//! assert_eq!(parts.tld, "co.uk");
//! ```

use std::path::Path;

use publicsuffix::{List, Psl};

/// Embedded PSL subset.
const EMBEDDED_LIST: &str = include_str!("../data/public_suffix_list.dat");

/// Error type for PSL loading and lookups.
#[derive(Debug, thiserror::Error)]
pub enum PslError {
    #[error("Failed to read '{path}': {message}")]
    Io { path: String, message: String },
    #[error("Invalid public suffix list: {0}")]
    Parse(String),
    #[error("Suffix lookup returned an inconsistent split for '{0}'")]
    Inconsistent(String),
}

/// Registrable-domain decomposition of a host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainParts {
    /// eTLD+1, e.g. `example.co.uk`
    pub domain: String,
    /// Labels left of the registrable domain, e.g. `www.shop`
    pub subdomain: Option<String>,
    /// Public suffix, e.g. `co.uk`
    pub tld: String,
}

/// A parsed Public Suffix List.
pub struct SuffixList {
    list: List,
}

impl std::fmt::Debug for SuffixList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuffixList").finish_non_exhaustive()
    }
}

impl SuffixList {
    /// The list compiled into the binary.
    pub fn embedded() -> Result<Self, PslError> {
        Self::from_text(EMBEDDED_LIST)
    }

    /// Parse a list in the standard `public_suffix_list.dat` format.
    pub fn from_text(text: &str) -> Result<Self, PslError> {
        let list: List = text.parse().map_err(|e| PslError::Parse(format!("{}", e)))?;
        Ok(Self { list })
    }

    /// Load a list file from disk.
    pub fn from_path(path: &Path) -> Result<Self, PslError> {
        let text = std::fs::read_to_string(path).map_err(|e| PslError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_text(&text)
    }

    /// Split an ASCII host into domain/subdomain/tld.
    ///
    /// Returns `Ok(None)` when the host is not *under* a known public suffix:
    /// unknown TLDs (the implicit `*` rule), bare suffixes such as `co.uk`,
    /// and single-label hosts.
    pub fn split(&self, host_ascii: &str) -> Result<Option<DomainParts>, PslError> {
        let host = host_ascii.trim_end_matches('.');
        if host.is_empty() {
            return Ok(None);
        }

        let suffix = match self.list.suffix(host.as_bytes()) {
            Some(suffix) if suffix.is_known() => suffix,
            _ => return Ok(None),
        };
        let domain = match self.list.domain(host.as_bytes()) {
            Some(domain) => domain,
            None => return Ok(None),
        };

        let tld = std::str::from_utf8(suffix.as_bytes())
            .map_err(|_| PslError::Inconsistent(host.to_string()))?;
        let domain = std::str::from_utf8(domain.as_bytes())
            .map_err(|_| PslError::Inconsistent(host.to_string()))?;

        if !host.ends_with(domain) || !domain.ends_with(tld) || domain.len() <= tld.len() {
            return Err(PslError::Inconsistent(host.to_string()));
        }

        let subdomain = if host.len() > domain.len() {
            let prefix = &host[..host.len() - domain.len()];
            let prefix = prefix
                .strip_suffix('.')
                .ok_or_else(|| PslError::Inconsistent(host.to_string()))?;
            Some(prefix.to_string()).filter(|s| !s.is_empty())
        } else {
            None
        };

        Ok(Some(DomainParts {
            domain: domain.to_string(),
            subdomain,
            tld: tld.to_string(),
        }))
    }
}

/// Get the parent domain (strip leftmost label).
pub fn get_parent_domain(host: &str) -> Option<&str> {
    match host.find('.') {
        Some(idx) if idx < host.len() - 1 => Some(&host[idx + 1..]),
        _ => None,
    }
}

/// The rightmost label of a host, ignoring a trailing dot.
pub fn last_label(host: &str) -> &str {
    let host = host.trim_end_matches('.');
    match host.rfind('.') {
        Some(idx) => &host[idx + 1..],
        None => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psl() -> SuffixList {
        SuffixList::embedded().unwrap()
    }

    #[test]
    fn test_split_simple() {
        let parts = psl().split("example.com").unwrap().unwrap();
        assert_eq!(parts.domain, "example.com");
        assert_eq!(parts.subdomain, None);
        assert_eq!(parts.tld, "com");
    }

    #[test]
    fn test_split_two_part_suffix() {
        let parts = psl().split("a.b.example.co.uk").unwrap().unwrap();
        assert_eq!(parts.domain, "example.co.uk");
        assert_eq!(parts.subdomain.as_deref(), Some("a.b"));
        assert_eq!(parts.tld, "co.uk");
    }

    #[test]
    fn test_split_trailing_dot() {
        let parts = psl().split("www.example.com.").unwrap().unwrap();
        assert_eq!(parts.domain, "example.com");
        assert_eq!(parts.subdomain.as_deref(), Some("www"));
    }

    #[test]
    fn test_split_not_under_suffix() {
        assert_eq!(psl().split("example.notarealtld").unwrap(), None);
        assert_eq!(psl().split("co.uk").unwrap(), None);
        assert_eq!(psl().split("com").unwrap(), None);
        assert_eq!(psl().split("localhost").unwrap(), None);
        assert_eq!(psl().split("").unwrap(), None);
    }

    #[test]
    fn test_custom_list() {
        let text = "// ===BEGIN ICANN DOMAINS===\nexample\n// ===END ICANN DOMAINS===\n";
        let list = SuffixList::from_text(text).unwrap();
        let parts = list.split("shop.brand.example").unwrap().unwrap();
        assert_eq!(parts.domain, "brand.example");
        assert_eq!(parts.subdomain.as_deref(), Some("shop"));
        assert_eq!(list.split("brand.com").unwrap(), None);
    }

    #[test]
    fn test_get_parent_domain() {
        assert_eq!(get_parent_domain("sub.example.com"), Some("example.com"));
        assert_eq!(get_parent_domain("example.com"), Some("com"));
        assert_eq!(get_parent_domain("com"), None);
        assert_eq!(get_parent_domain(""), None);
    }

    #[test]
    fn test_last_label() {
        assert_eq!(last_label("a.example.xyz"), "xyz");
        assert_eq!(last_label("example.com."), "com");
        assert_eq!(last_label("localhost"), "localhost");
    }
}
