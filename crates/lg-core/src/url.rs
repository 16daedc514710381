//! Generic URI splitting without allocations
//!
//! These functions slice a raw URI string into its RFC 3986 components and
//! never decode or rewrite anything: path, query and fragment come back
//! exactly as written so callers can inspect percent-encoding.

// =============================================================================
// Errors
// =============================================================================

/// Reasons a string is not a syntactically valid generic URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UriError {
    #[error("illegal character at byte {0}")]
    IllegalChar(usize),
    #[error("malformed percent escape at byte {0}")]
    BadEscape(usize),
    #[error("invalid scheme")]
    BadScheme,
    #[error("unterminated IPv6 literal")]
    UnterminatedBracket,
    #[error("unexpected data after IPv6 literal")]
    TrailingAfterBracket,
    #[error("invalid port")]
    BadPort,
}

// =============================================================================
// Components
// =============================================================================

/// Raw components of a URI. Every field borrows from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UriParts<'a> {
    /// Scheme as written (not lowercased). `None` for relative references.
    pub scheme: Option<&'a str>,
    /// Text between `//` and the first `/`, `?` or `#`.
    pub authority: Option<&'a str>,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub fragment: Option<&'a str>,
}

/// Raw pieces of an authority component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorityParts<'a> {
    pub user_info: Option<&'a str>,
    /// Host without IPv6 brackets.
    pub host: &'a str,
    /// True when the host was written as `[...]`.
    pub bracketed: bool,
    pub port: Option<u16>,
}

/// Characters the generic URI grammar never allows unescaped.
#[inline]
fn is_forbidden(b: u8) -> bool {
    b <= 0x20
        || b == 0x7F
        || matches!(b, b'"' | b'<' | b'>' | b'\\' | b'^' | b'`' | b'{' | b'|' | b'}')
}

/// Check the whole input for forbidden characters and malformed escapes.
/// Non-ASCII characters are accepted (IRI-style input).
pub fn validate_chars(input: &str) -> Result<(), UriError> {
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if is_forbidden(b) {
            return Err(UriError::IllegalChar(i));
        }
        if b == b'%' {
            let ok = i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit();
            if !ok {
                return Err(UriError::BadEscape(i));
            }
            i += 3;
            continue;
        }
        i += 1;
    }
    Ok(())
}

/// `ALPHA *( ALPHA / DIGIT / "+" / "-" / "." )`
#[inline]
pub fn is_valid_scheme(s: &str) -> bool {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b) if b.is_ascii_alphabetic() => bytes[1..]
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'+' || b == b'-' || b == b'.'),
        _ => false,
    }
}

/// Find the scheme delimiter. A `:` only ends a scheme when it appears before
/// any `/`, `?` or `#`.
#[inline]
fn scheme_end(input: &str) -> Option<usize> {
    for (i, b) in input.bytes().enumerate() {
        match b {
            b':' => return Some(i),
            b'/' | b'?' | b'#' => return None,
            _ => {}
        }
    }
    None
}

/// Split a URI into scheme, authority, path, query and fragment.
pub fn split_uri(input: &str) -> Result<UriParts<'_>, UriError> {
    let (scheme, rest) = match scheme_end(input) {
        Some(colon) => {
            let scheme = &input[..colon];
            if !is_valid_scheme(scheme) {
                return Err(UriError::BadScheme);
            }
            (Some(scheme), &input[colon + 1..])
        }
        None => (None, input),
    };

    // Fragment first: everything after the first '#'
    let (rest, fragment) = match rest.find('#') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let (rest, query) = match rest.find('?') {
        Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
        None => (rest, None),
    };

    let (authority, path) = match rest.strip_prefix("//") {
        Some(after) => match after.find('/') {
            Some(pos) => (Some(&after[..pos]), &after[pos..]),
            None => (Some(after), ""),
        },
        None => (None, rest),
    };

    Ok(UriParts {
        scheme,
        authority,
        path,
        query,
        fragment,
    })
}

/// Split an authority into userinfo, host and port.
///
/// Userinfo ends at the *last* `@`, so `https://bank.com@evil.com` yields
/// host `evil.com`, matching where a browser would actually connect.
pub fn split_authority(authority: &str) -> Result<AuthorityParts<'_>, UriError> {
    let (user_info, host_port) = match authority.rfind('@') {
        Some(at) => (Some(&authority[..at]), &authority[at + 1..]),
        None => (None, authority),
    };

    let (host, bracketed, port_text) = if let Some(inner) = host_port.strip_prefix('[') {
        let end = inner.find(']').ok_or(UriError::UnterminatedBracket)?;
        let after = &inner[end + 1..];
        let port_text = if after.is_empty() {
            None
        } else {
            Some(after.strip_prefix(':').ok_or(UriError::TrailingAfterBracket)?)
        };
        (&inner[..end], true, port_text)
    } else {
        match host_port.find(':') {
            Some(colon) => (&host_port[..colon], false, Some(&host_port[colon + 1..])),
            None => (host_port, false, None),
        }
    };

    Ok(AuthorityParts {
        user_info,
        host,
        bracketed,
        port: parse_port(port_text)?,
    })
}

/// An empty port (`host:`) means "no explicit port".
fn parse_port(text: Option<&str>) -> Result<Option<u16>, UriError> {
    match text {
        None | Some("") => Ok(None),
        Some(digits) if digits.bytes().all(|b| b.is_ascii_digit()) => {
            digits.parse::<u16>().map(Some).map_err(|_| UriError::BadPort)
        }
        Some(_) => Err(UriError::BadPort),
    }
}

/// Privacy-friendly `scheme://host[:port]` summary for log lines.
pub fn summarize(scheme: &str, host: &str, port: Option<u16>) -> String {
    match port {
        Some(p) => format!("{}://{}:{}", scheme, host, p),
        None => format!("{}://{}", scheme, host),
    }
}

/// Best-effort summary of an arbitrary string for logs. Never fails.
pub fn summarize_raw(raw: &str) -> String {
    let parts = match split_uri(raw) {
        Ok(parts) => parts,
        Err(_) => return "<invalid>".to_string(),
    };
    let scheme = parts.scheme.unwrap_or("?");
    match parts.authority.map(split_authority) {
        Some(Ok(auth)) => summarize(scheme, auth.host, auth.port),
        _ => format!("{}://?", scheme),
    }
}
