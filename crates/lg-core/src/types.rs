//! Core type definitions for LinkGuard
//!
//! Shared by the scorer, the client-side host tables and the sync protocol.

use serde::{Deserialize, Serialize};

// =============================================================================
// Reasons
// =============================================================================

/// A single risk signal raised by the heuristic scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Reason {
    // Critical: any one forces a block
    IpHost,
    MixedScript,
    UserinfoPresent,
    UnfamiliarTld,

    // Soft: contribute to the combined score
    PortSchemeMismatch,
    EncodedParts,
    NearWhitelistLookalike,
    LongUrl,
    TooManySubdomains,
    PhishKeywords,
}

impl Reason {
    /// Every reason, criticals first.
    pub const ALL: [Reason; 10] = [
        Reason::IpHost,
        Reason::MixedScript,
        Reason::UserinfoPresent,
        Reason::UnfamiliarTld,
        Reason::PortSchemeMismatch,
        Reason::EncodedParts,
        Reason::NearWhitelistLookalike,
        Reason::LongUrl,
        Reason::TooManySubdomains,
        Reason::PhishKeywords,
    ];

    /// The bit for this reason in a [`Reasons`] set.
    pub const fn flag(self) -> Reasons {
        match self {
            Reason::IpHost => Reasons::IP_HOST,
            Reason::MixedScript => Reasons::MIXED_SCRIPT,
            Reason::UserinfoPresent => Reasons::USERINFO_PRESENT,
            Reason::UnfamiliarTld => Reasons::UNFAMILIAR_TLD,
            Reason::PortSchemeMismatch => Reasons::PORT_SCHEME_MISMATCH,
            Reason::EncodedParts => Reasons::ENCODED_PARTS,
            Reason::NearWhitelistLookalike => Reasons::NEAR_WHITELIST_LOOKALIKE,
            Reason::LongUrl => Reasons::LONG_URL,
            Reason::TooManySubdomains => Reasons::TOO_MANY_SUBDOMAINS,
            Reason::PhishKeywords => Reasons::PHISH_KEYWORDS,
        }
    }

    pub const fn is_critical(self) -> bool {
        Reasons::CRITICAL.contains(self.flag())
    }

    /// Short tag for compact log lines.
    pub const fn tag(self) -> &'static str {
        match self {
            Reason::IpHost => "ip",
            Reason::MixedScript => "mix",
            Reason::UserinfoPresent => "ui",
            Reason::UnfamiliarTld => "tld",
            Reason::PortSchemeMismatch => "port",
            Reason::EncodedParts => "enc",
            Reason::NearWhitelistLookalike => "med",
            Reason::LongUrl => "len",
            Reason::TooManySubdomains => "subd",
            Reason::PhishKeywords => "kw",
        }
    }
}

bitflags::bitflags! {
    /// Set of reasons raised for one URL.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Reasons: u16 {
        const IP_HOST = 1 << 0;
        const MIXED_SCRIPT = 1 << 1;
        const USERINFO_PRESENT = 1 << 2;
        const UNFAMILIAR_TLD = 1 << 3;
        const PORT_SCHEME_MISMATCH = 1 << 4;
        const ENCODED_PARTS = 1 << 5;
        const NEAR_WHITELIST_LOOKALIKE = 1 << 6;
        const LONG_URL = 1 << 7;
        const TOO_MANY_SUBDOMAINS = 1 << 8;
        const PHISH_KEYWORDS = 1 << 9;

        /// Reasons that block on their own
        const CRITICAL = Self::IP_HOST.bits()
            | Self::MIXED_SCRIPT.bits()
            | Self::USERINFO_PRESENT.bits()
            | Self::UNFAMILIAR_TLD.bits();
        /// Reasons that only contribute to the soft score
        const SOFT = Self::PORT_SCHEME_MISMATCH.bits()
            | Self::ENCODED_PARTS.bits()
            | Self::NEAR_WHITELIST_LOOKALIKE.bits()
            | Self::LONG_URL.bits()
            | Self::TOO_MANY_SUBDOMAINS.bits()
            | Self::PHISH_KEYWORDS.bits();
    }
}

impl Reasons {
    pub fn has(&self, reason: Reason) -> bool {
        self.contains(reason.flag())
    }

    pub fn has_critical(&self) -> bool {
        self.intersects(Reasons::CRITICAL)
    }

    /// Reasons present in this set, criticals first.
    pub fn list(&self) -> Vec<Reason> {
        Reason::ALL.iter().copied().filter(|r| self.has(*r)).collect()
    }

    /// `ip,ui` style tag list for log lines.
    pub fn tags(&self) -> String {
        self.list().iter().map(|r| r.tag()).collect::<Vec<_>>().join(",")
    }
}

/// A reason together with its user-facing explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReasonDetail {
    pub reason: Reason,
    pub message: String,
}

// =============================================================================
// Host Status (decision cache)
// =============================================================================

/// Status of a host in the short-lived decision cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    Trusted,
    Suspicious,
    Blacklisted,
}

impl HostStatus {
    /// Whether a cached status of this kind forces a block.
    pub const fn is_unsafe(self) -> bool {
        matches!(self, HostStatus::Suspicious | HostStatus::Blacklisted)
    }
}

// =============================================================================
// Polarity
// =============================================================================

/// Which hotset list a domain belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    White,
    Black,
}

// =============================================================================
// Verdict
// =============================================================================

/// Final decision for a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Safe,
    Block,
}

impl Verdict {
    pub const fn from_blocked(blocked: bool) -> Self {
        if blocked {
            Verdict::Block
        } else {
            Verdict::Safe
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_mask() {
        for reason in Reason::ALL {
            assert_eq!(reason.is_critical(), Reasons::CRITICAL.contains(reason.flag()));
        }
        assert!(Reason::IpHost.is_critical());
        assert!(!Reason::PortSchemeMismatch.is_critical());
        assert_eq!(Reasons::CRITICAL | Reasons::SOFT, Reasons::all());
        assert!((Reasons::CRITICAL & Reasons::SOFT).is_empty());
    }

    #[test]
    fn test_reason_list_order() {
        let set = Reasons::LONG_URL | Reasons::IP_HOST | Reasons::ENCODED_PARTS;
        assert_eq!(set.list(), vec![Reason::IpHost, Reason::EncodedParts, Reason::LongUrl]);
        assert_eq!(set.tags(), "ip,enc,len");
        assert!(set.has_critical());
    }

    #[test]
    fn test_host_status_safety() {
        assert!(HostStatus::Suspicious.is_unsafe());
        assert!(!HostStatus::Trusted.is_unsafe());
    }
}
