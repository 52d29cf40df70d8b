//! Configuration datastores and the collaborator that stores them.
//!
//! The engine only routes operations to a datastore; storage and query
//! semantics belong to a [`DatastoreBackend`]. Exclusive access is arbitrated
//! by the process-wide [`LockRegistry`].
//!
//! | Datastore   | Requires capability |
//! |-------------|---------------------|
//! | `running`   | (always present)    |
//! | `startup`   | `:startup`          |
//! | `candidate` | `:candidate`        |

mod lock;
mod memory;

pub use lock::LockRegistry;
pub use memory::MemoryDatastore;

use std::fmt;
use std::str::FromStr;

use crate::error::{NetconfError, Result};
use crate::protocol::{
    uri, DefaultOperation, ErrorOption, NegotiatedCaps, RpcError, TestOption, WithDefaultsMode,
    XmlElement,
};

/// Named configuration datastore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Datastore {
    /// Running configuration
    Running,
    /// Startup configuration
    Startup,
    /// Candidate configuration
    Candidate,
}

impl Datastore {
    /// All datastores
    pub const ALL: [Datastore; 3] = [Datastore::Running, Datastore::Startup, Datastore::Candidate];

    /// Element name used on the wire (`<running/>`).
    pub fn element_name(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Startup => "startup",
            Self::Candidate => "candidate",
        }
    }

    /// Capability that must be negotiated before this datastore is usable.
    pub fn required_capability(self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Running => None,
            Self::Startup => Some((uri::STARTUP, ":startup")),
            Self::Candidate => Some((uri::CANDIDATE, ":candidate")),
        }
    }

    /// Fail unless the negotiated set makes this datastore available.
    pub fn check_available(self, negotiated: &NegotiatedCaps) -> Result<()> {
        match self.required_capability() {
            Some((uri, short)) if !negotiated.supports(uri) => {
                Err(NetconfError::DatastoreUnavailable(self, short))
            },
            _ => Ok(()),
        }
    }

    /// Wire element, e.g. `<candidate/>`.
    pub fn to_element(self) -> XmlElement {
        XmlElement::new(self.element_name())
    }
}

impl fmt::Display for Datastore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.element_name())
    }
}

impl FromStr for Datastore {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "startup" => Ok(Self::Startup),
            "candidate" => Ok(Self::Candidate),
            _ => Err(format!("Unknown datastore: {s}")),
        }
    }
}

/// Target of a write operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigTarget {
    /// Named datastore
    Datastore(Datastore),
    /// Remote URL (requires `:url`)
    Url(String),
}

impl ConfigTarget {
    /// Named datastore, if this is not a URL.
    pub fn datastore(&self) -> Option<Datastore> {
        match self {
            Self::Datastore(ds) => Some(*ds),
            Self::Url(_) => None,
        }
    }

    /// Check availability against the negotiated capabilities.
    pub fn check_available(&self, negotiated: &NegotiatedCaps) -> Result<()> {
        match self {
            Self::Datastore(ds) => ds.check_available(negotiated),
            Self::Url(_) if negotiated.supports(uri::URL) => Ok(()),
            Self::Url(_) => Err(NetconfError::UrlUnsupported),
        }
    }

    /// Serialize as the children of `<target>`.
    pub fn to_element(&self) -> XmlElement {
        match self {
            Self::Datastore(ds) => ds.to_element(),
            Self::Url(url) => XmlElement::new("url").with_text(url.clone()),
        }
    }

    /// Parse from a `<target>`/`<source>` wrapper element.
    pub fn from_wrapper(wrapper: &XmlElement) -> std::result::Result<Self, RpcError> {
        match ConfigSource::from_wrapper(wrapper)? {
            ConfigSource::Datastore(ds) => Ok(Self::Datastore(ds)),
            ConfigSource::Url(url) => Ok(Self::Url(url)),
            ConfigSource::Inline(_) => Err(RpcError::bad_element(
                wrapper.local_name(),
                "inline config is not a valid target",
            )),
        }
    }
}

impl From<Datastore> for ConfigTarget {
    fn from(ds: Datastore) -> Self {
        Self::Datastore(ds)
    }
}

/// Source of a read or copy operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Named datastore
    Datastore(Datastore),
    /// Remote URL (requires `:url`)
    Url(String),
    /// Inline `<config>` content
    Inline(Vec<XmlElement>),
}

impl ConfigSource {
    /// Check availability against the negotiated capabilities.
    pub fn check_available(&self, negotiated: &NegotiatedCaps) -> Result<()> {
        match self {
            Self::Datastore(ds) => ds.check_available(negotiated),
            Self::Url(_) if negotiated.supports(uri::URL) => Ok(()),
            Self::Url(_) => Err(NetconfError::UrlUnsupported),
            Self::Inline(_) => Ok(()),
        }
    }

    /// Serialize as the children of `<source>`.
    pub fn to_element(&self) -> XmlElement {
        match self {
            Self::Datastore(ds) => ds.to_element(),
            Self::Url(url) => XmlElement::new("url").with_text(url.clone()),
            Self::Inline(config) => XmlElement::new("config").with_children(config.iter().cloned()),
        }
    }

    /// Parse from a `<source>` wrapper element.
    pub fn from_wrapper(wrapper: &XmlElement) -> std::result::Result<Self, RpcError> {
        let inner = wrapper
            .first_element()
            .ok_or_else(|| RpcError::missing_element(wrapper.local_name()))?;
        match inner.local_name() {
            "url" => Ok(Self::Url(inner.text())),
            "config" => Ok(Self::Inline(inner.elements().cloned().collect())),
            name => name
                .parse::<Datastore>()
                .map(Self::Datastore)
                .map_err(|e| RpcError::bad_element(name, e)),
        }
    }
}

impl From<Datastore> for ConfigSource {
    fn from(ds: Datastore) -> Self {
        Self::Datastore(ds)
    }
}

/// Options forwarded with `edit-config`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditOptions {
    /// `<default-operation>`
    pub default_operation: Option<DefaultOperation>,
    /// `<test-option>`
    pub test_option: Option<TestOption>,
    /// `<error-option>`
    pub error_option: Option<ErrorOption>,
}

/// Storage collaborator that holds and mutates configuration data.
///
/// Implementations run synchronously inside the session's worker. Errors
/// are returned as `rpc-error`s and forwarded to the peer unchanged.
pub trait DatastoreBackend: Send + Sync {
    /// `<get>`: running configuration plus state data.
    fn get(
        &self,
        filter: Option<&XmlElement>,
        with_defaults: Option<WithDefaultsMode>,
    ) -> std::result::Result<Vec<XmlElement>, RpcError>;

    /// `<get-config>` from a datastore.
    fn get_config(
        &self,
        source: Datastore,
        filter: Option<&XmlElement>,
        with_defaults: Option<WithDefaultsMode>,
    ) -> std::result::Result<Vec<XmlElement>, RpcError>;

    /// `<edit-config>` into a datastore or URL.
    fn edit_config(
        &self,
        target: &ConfigTarget,
        source: &ConfigSource,
        options: EditOptions,
    ) -> std::result::Result<(), RpcError>;

    /// `<copy-config>` replacing the target with the source.
    fn copy_config(
        &self,
        target: &ConfigTarget,
        source: &ConfigSource,
        with_defaults: Option<WithDefaultsMode>,
    ) -> std::result::Result<(), RpcError>;

    /// `<delete-config>`.
    fn delete_config(&self, target: &ConfigTarget) -> std::result::Result<(), RpcError>;

    /// `<commit>`: candidate becomes running.
    fn commit(&self) -> std::result::Result<(), RpcError>;

    /// `<discard-changes>`: candidate reverts to running.
    fn discard_changes(&self) -> std::result::Result<(), RpcError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{negotiate, CapabilitySet};

    fn negotiated(extra: &[&str]) -> NegotiatedCaps {
        let mut caps = CapabilitySet::new().with(uri::BASE_1_1);
        for cap in extra {
            caps.insert(*cap);
        }
        negotiate(&caps, &caps).unwrap()
    }

    #[test]
    fn test_running_always_available() {
        assert!(Datastore::Running.check_available(&negotiated(&[])).is_ok());
    }

    #[test]
    fn test_candidate_requires_capability() {
        let err = Datastore::Candidate
            .check_available(&negotiated(&[]))
            .unwrap_err();
        assert!(matches!(
            err,
            NetconfError::DatastoreUnavailable(Datastore::Candidate, ":candidate")
        ));
        assert!(Datastore::Candidate
            .check_available(&negotiated(&[uri::CANDIDATE]))
            .is_ok());
    }

    #[test]
    fn test_url_requires_capability() {
        let target = ConfigTarget::Url("file:///tmp/backup.xml".to_string());
        assert!(matches!(
            target.check_available(&negotiated(&[])),
            Err(NetconfError::UrlUnsupported)
        ));
        assert!(target.check_available(&negotiated(&[uri::URL])).is_ok());
    }

    #[test]
    fn test_source_from_wrapper() {
        let wrapper = XmlElement::parse("<source><startup/></source>").unwrap();
        assert_eq!(
            ConfigSource::from_wrapper(&wrapper).unwrap(),
            ConfigSource::Datastore(Datastore::Startup)
        );

        let wrapper = XmlElement::parse("<source><config><a>1</a></config></source>").unwrap();
        match ConfigSource::from_wrapper(&wrapper).unwrap() {
            ConfigSource::Inline(els) => assert_eq!(els[0].local_name(), "a"),
            other => panic!("unexpected source {other:?}"),
        }

        let wrapper = XmlElement::parse("<target><bogus/></target>").unwrap();
        assert!(ConfigTarget::from_wrapper(&wrapper).is_err());
    }
}
