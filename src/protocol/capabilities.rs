//! Capabilities for protocol negotiation.
//!
//! Capabilities are URIs advertised in `<hello>`. The negotiated set for a
//! session is the intersection of both sides' lists, and the protocol
//! version is the highest base capability present on both sides.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{NetconfError, Result};

/// Well-known capability URIs.
pub mod uri {
    /// Base protocol 1.0 (end-of-message framing)
    pub const BASE_1_0: &str = "urn:ietf:params:netconf:base:1.0";
    /// Base protocol 1.1 (chunked framing)
    pub const BASE_1_1: &str = "urn:ietf:params:netconf:base:1.1";
    /// :writable-running
    pub const WRITABLE_RUNNING: &str = "urn:ietf:params:netconf:capability:writable-running:1.0";
    /// :candidate
    pub const CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
    /// :startup
    pub const STARTUP: &str = "urn:ietf:params:netconf:capability:startup:1.0";
    /// :url
    pub const URL: &str = "urn:ietf:params:netconf:capability:url:1.0";
    /// :with-defaults
    pub const WITH_DEFAULTS: &str = "urn:ietf:params:netconf:capability:with-defaults:1.0";
    /// :validate
    pub const VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";
    /// :rollback-on-error
    pub const ROLLBACK_ON_ERROR: &str = "urn:ietf:params:netconf:capability:rollback-on-error:1.0";
}

/// A capability URI.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capability(String);

impl Capability {
    /// Create a capability from a URI.
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into().trim().to_string())
    }

    /// Full URI including any `?` parameters.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// URI without `?` parameters.
    pub fn base_uri(&self) -> &str {
        self.0.split_once('?').map_or(&self.0, |(base, _)| base)
    }

    /// Whether the URI carries `?` parameters.
    pub fn has_params(&self) -> bool {
        self.0.contains('?')
    }

    /// Value of a `?key=value` parameter.
    pub fn param(&self, key: &str) -> Option<&str> {
        let (_, query) = self.0.split_once('?')?;
        query
            .split(['&', ';'])
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Capability {
    fn from(uri: &str) -> Self {
        Self::new(uri)
    }
}

/// NETCONF base protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// base:1.0, `]]>]]>` framing
    V1_0,
    /// base:1.1, chunked framing
    V1_1,
}

impl ProtocolVersion {
    /// Capability URI announcing this version.
    pub fn capability_uri(self) -> &'static str {
        match self {
            Self::V1_0 => uri::BASE_1_0,
            Self::V1_1 => uri::BASE_1_1,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V1_0 => f.write_str("1.0"),
            Self::V1_1 => f.write_str("1.1"),
        }
    }
}

/// Ordered set of capabilities without duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Capability>", into = "Vec<Capability>")]
pub struct CapabilitySet {
    caps: Vec<Capability>,
}

impl CapabilitySet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Capabilities this engine implements, offered when nothing else is configured.
    pub fn engine_defaults() -> Self {
        [
            uri::BASE_1_0,
            uri::BASE_1_1,
            uri::WRITABLE_RUNNING,
            uri::CANDIDATE,
            uri::STARTUP,
            uri::URL,
            uri::WITH_DEFAULTS,
        ]
        .into_iter()
        .collect()
    }

    /// Insert a capability; returns false if it was already present.
    pub fn insert(&mut self, cap: impl Into<Capability>) -> bool {
        let cap = cap.into();
        if cap.as_str().is_empty() || self.caps.contains(&cap) {
            return false;
        }
        self.caps.push(cap);
        true
    }

    /// Remove a capability by exact URI.
    pub fn remove(&mut self, uri: &str) -> bool {
        let before = self.caps.len();
        self.caps.retain(|c| c.as_str() != uri);
        before != self.caps.len()
    }

    /// Builder-style insert.
    pub fn with(mut self, cap: impl Into<Capability>) -> Self {
        self.insert(cap);
        self
    }

    /// Exact URI membership.
    pub fn contains(&self, uri: &str) -> bool {
        self.caps.iter().any(|c| c.as_str() == uri)
    }

    /// Membership ignoring `?` parameters.
    pub fn supports(&self, base_uri: &str) -> bool {
        self.find(base_uri).is_some()
    }

    /// First capability whose base URI matches.
    pub fn find(&self, base_uri: &str) -> Option<&Capability> {
        self.caps.iter().find(|c| c.base_uri() == base_uri)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.caps.iter()
    }

    /// Number of capabilities
    pub fn len(&self) -> usize {
        self.caps.len()
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.caps.is_empty()
    }

    /// Highest base version advertised in this set.
    pub fn highest_version(&self) -> Option<ProtocolVersion> {
        if self.contains(uri::BASE_1_1) {
            Some(ProtocolVersion::V1_1)
        } else if self.contains(uri::BASE_1_0) {
            Some(ProtocolVersion::V1_0)
        } else {
            None
        }
    }
}

impl<C: Into<Capability>> FromIterator<C> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = C>>(iter: I) -> Self {
        let mut set = Self::new();
        for cap in iter {
            set.insert(cap);
        }
        set
    }
}

impl From<Vec<Capability>> for CapabilitySet {
    fn from(caps: Vec<Capability>) -> Self {
        caps.into_iter().collect()
    }
}

impl From<CapabilitySet> for Vec<Capability> {
    fn from(set: CapabilitySet) -> Self {
        set.caps
    }
}

/// Result of capability negotiation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedCaps {
    /// Agreed protocol version
    pub version: ProtocolVersion,
    /// Capabilities present on both sides, matched on base URI
    pub capabilities: CapabilitySet,
}

impl NegotiatedCaps {
    /// Whether a capability (ignoring parameters) was agreed.
    pub fn supports(&self, base_uri: &str) -> bool {
        self.capabilities.supports(base_uri)
    }
}

fn preference(cap: &Capability) -> (bool, &str) {
    (!cap.has_params(), cap.as_str())
}

/// Negotiate version and effective capabilities from both sides' lists.
///
/// Capabilities are matched on their base URI, so `:url` advertised as
/// `url:1.0?scheme=file` on one side and bare on the other is agreed, and
/// the parameterized form is kept. The result does not depend on argument
/// order or on the order of either list: the selected base capability comes
/// first, followed by the rest of the intersection in lexicographic order.
pub fn negotiate(local: &CapabilitySet, peer: &CapabilitySet) -> Result<NegotiatedCaps> {
    let common = |uri: &str| local.contains(uri) && peer.contains(uri);

    let version = if common(uri::BASE_1_1) {
        ProtocolVersion::V1_1
    } else if common(uri::BASE_1_0) {
        ProtocolVersion::V1_0
    } else {
        return Err(NetconfError::NegotiationFailed(
            "no common base protocol version".to_string(),
        ));
    };

    // One entry per base URI present on both sides. The parameterized form
    // wins over a bare one; equal footing falls back to the smaller string.
    let mut by_base: BTreeMap<&str, &Capability> = BTreeMap::new();
    for cap in local.iter().chain(peer.iter()) {
        let base = cap.base_uri();
        if base == version.capability_uri() || !local.supports(base) || !peer.supports(base) {
            continue;
        }
        by_base
            .entry(base)
            .and_modify(|current| {
                if preference(cap) < preference(*current) {
                    *current = cap;
                }
            })
            .or_insert(cap);
    }
    let mut rest: Vec<&Capability> = by_base.into_values().collect();
    rest.sort();

    let mut capabilities = CapabilitySet::new().with(version.capability_uri());
    for cap in rest {
        capabilities.insert(cap.clone());
    }

    Ok(NegotiatedCaps {
        version,
        capabilities,
    })
}
