//! Peer addressing
//!
//! Operators type peer addresses by hand, often pasted from a browser bar.
//! Every address is normalized before it becomes a registry key.

use std::fmt;

/// Normalize a raw peer address.
///
/// Strips surrounding whitespace, any `scheme://` prefix and trailing
/// slashes. Returns `None` if nothing is left.
pub fn normalize_host(raw: &str) -> Option<String> {
    let mut host = raw.trim();
    if let Some(pos) = host.find("://") {
        host = &host[pos + 3..];
    }
    let host = host.trim_end_matches('/').trim();
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Target of a directed invite or join request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerTarget {
    /// Hardware address, upper-cased `AA:BB:CC:DD:EE:FF`
    Mac(String),
    /// Host name or IP
    Host(String),
}

impl PeerTarget {
    /// Classify operator input as a MAC address or a host.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if is_mac(trimmed) {
            return Some(PeerTarget::Mac(trimmed.to_ascii_uppercase()));
        }
        normalize_host(trimmed).map(PeerTarget::Host)
    }
}

impl fmt::Display for PeerTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerTarget::Mac(mac) => f.write_str(mac),
            PeerTarget::Host(host) => f.write_str(host),
        }
    }
}

fn is_mac(s: &str) -> bool {
    let parts: Vec<&str> = s.split(':').collect();
    parts.len() == 6
        && parts
            .iter()
            .all(|p| p.len() == 2 && p.chars().all(|c| c.is_ascii_hexdigit()))
}
