//! NETCONF operations carried inside `<rpc>`.
//!
//! [`Operation`] is shared by both roles: clients build the element with
//! [`Operation::to_element`], servers recover it with
//! [`Operation::from_element`] before dispatching.

use std::fmt;
use std::str::FromStr;

use super::capabilities::{uri, Capability, NegotiatedCaps};
use super::rpc_error::RpcError;
use super::xml::XmlElement;
use crate::datastore::{ConfigSource, ConfigTarget, Datastore, EditOptions};
use crate::error::{NetconfError, Result};

/// Namespace of the `<with-defaults>` parameter.
pub const NS_WITH_DEFAULTS: &str = "urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults";

/// with-defaults retrieval mode (RFC 6243).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WithDefaultsMode {
    /// Report every node, defaults included
    ReportAll,
    /// Omit nodes equal to their default
    Trim,
    /// Report nodes explicitly set
    Explicit,
    /// Report all, tagging defaults with `wd:default="true"`
    ReportAllTagged,
}

impl WithDefaultsMode {
    /// Value used in `<with-defaults>` and in the capability parameters.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReportAll => "report-all",
            Self::Trim => "trim",
            Self::Explicit => "explicit",
            Self::ReportAllTagged => "report-all-tagged",
        }
    }

    /// Every mode, in RFC 6243 order.
    pub const ALL: [Self; 4] = [Self::ReportAll, Self::Trim, Self::Explicit, Self::ReportAllTagged];

    /// `:with-defaults` capability announcing `self` as the basic mode.
    ///
    /// Modes in `also_supported` other than `self` go into the
    /// `also-supported` parameter.
    pub fn capability(self, also_supported: &[WithDefaultsMode]) -> Capability {
        let also: Vec<&str> = also_supported
            .iter()
            .filter(|mode| **mode != self)
            .map(|mode| mode.as_str())
            .collect();
        let mut uri = format!("{}?basic-mode={}", uri::WITH_DEFAULTS, self.as_str());
        if !also.is_empty() {
            uri.push_str("&also-supported=");
            uri.push_str(&also.join(","));
        }
        Capability::new(uri)
    }

    fn to_element(self) -> XmlElement {
        XmlElement::new("with-defaults")
            .with_attr("xmlns", NS_WITH_DEFAULTS)
            .with_text(self.as_str())
    }
}

impl fmt::Display for WithDefaultsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WithDefaultsMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim() {
            "report-all" => Ok(Self::ReportAll),
            "trim" => Ok(Self::Trim),
            "explicit" => Ok(Self::Explicit),
            "report-all-tagged" => Ok(Self::ReportAllTagged),
            _ => Err(format!("Unknown with-defaults mode: {s}")),
        }
    }
}

macro_rules! edit_param {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Value used on the wire.
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s.trim() {
                    $($wire => Ok(Self::$variant),)+
                    _ => Err(format!("Unknown {} value: {s}", stringify!($name))),
                }
            }
        }
    };
}

edit_param! {
    /// `<default-operation>` of edit-config.
    DefaultOperation {
        /// Merge into existing configuration (protocol default)
        Merge => "merge",
        /// Replace the whole target
        Replace => "replace",
        /// Only apply explicit per-node operations
        None => "none",
    }
}

edit_param! {
    /// `<test-option>` of edit-config.
    TestOption {
        /// Validate, then apply
        TestThenSet => "test-then-set",
        /// Apply without validation
        Set => "set",
        /// Validate only
        TestOnly => "test-only",
    }
}

edit_param! {
    /// `<error-option>` of edit-config.
    ErrorOption {
        /// Abort on first error
        StopOnError => "stop-on-error",
        /// Continue past errors
        ContinueOnError => "continue-on-error",
        /// Restore the previous configuration on error
        RollbackOnError => "rollback-on-error",
    }
}

/// An operation inside `<rpc>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `<get>`
    Get {
        /// `<filter>` element as sent
        filter: Option<XmlElement>,
        /// with-defaults mode
        with_defaults: Option<WithDefaultsMode>,
    },
    /// `<get-config>`
    GetConfig {
        /// Datastore to read
        source: Datastore,
        /// `<filter>` element as sent
        filter: Option<XmlElement>,
        /// with-defaults mode
        with_defaults: Option<WithDefaultsMode>,
    },
    /// `<edit-config>`
    EditConfig {
        /// Datastore or URL to modify
        target: ConfigTarget,
        /// Inline `<config>` or `<url>`
        source: ConfigSource,
        /// default-operation, test-option, error-option
        options: EditOptions,
    },
    /// `<copy-config>`
    CopyConfig {
        /// Destination
        target: ConfigTarget,
        /// Origin
        source: ConfigSource,
        /// with-defaults mode
        with_defaults: Option<WithDefaultsMode>,
    },
    /// `<delete-config>`
    DeleteConfig {
        /// Datastore or URL to delete
        target: ConfigTarget,
    },
    /// `<lock>`
    Lock {
        /// Datastore to lock
        target: Datastore,
    },
    /// `<unlock>`
    Unlock {
        /// Datastore to unlock
        target: Datastore,
    },
    /// `<kill-session>`
    KillSession {
        /// Session to terminate
        session_id: u32,
    },
    /// `<close-session>`
    CloseSession,
    /// `<commit>`
    Commit,
    /// `<discard-changes>`
    DiscardChanges,
    /// Any other operation, forwarded to a custom handler
    Custom(XmlElement),
}

impl Operation {
    /// Operation element name.
    pub fn name(&self) -> &str {
        match self {
            Self::Get { .. } => "get",
            Self::GetConfig { .. } => "get-config",
            Self::EditConfig { .. } => "edit-config",
            Self::CopyConfig { .. } => "copy-config",
            Self::DeleteConfig { .. } => "delete-config",
            Self::Lock { .. } => "lock",
            Self::Unlock { .. } => "unlock",
            Self::KillSession { .. } => "kill-session",
            Self::CloseSession => "close-session",
            Self::Commit => "commit",
            Self::DiscardChanges => "discard-changes",
            Self::Custom(el) => el.local_name(),
        }
    }

    /// Check datastores, URL and with-defaults use against the negotiated set.
    pub fn check_capabilities(&self, negotiated: &NegotiatedCaps) -> Result<()> {
        let with_defaults = match self {
            Self::Get { with_defaults, .. } => *with_defaults,
            Self::GetConfig {
                source,
                with_defaults,
                ..
            } => {
                source.check_available(negotiated)?;
                *with_defaults
            },
            Self::EditConfig { target, source, .. } => {
                target.check_available(negotiated)?;
                source.check_available(negotiated)?;
                None
            },
            Self::CopyConfig {
                target,
                source,
                with_defaults,
            } => {
                target.check_available(negotiated)?;
                source.check_available(negotiated)?;
                *with_defaults
            },
            Self::DeleteConfig { target } => {
                target.check_available(negotiated)?;
                None
            },
            Self::Lock { target } | Self::Unlock { target } => {
                target.check_available(negotiated)?;
                None
            },
            Self::Commit | Self::DiscardChanges => {
                Datastore::Candidate.check_available(negotiated)?;
                None
            },
            Self::KillSession { .. } | Self::CloseSession | Self::Custom(_) => None,
        };

        if with_defaults.is_some() && !negotiated.supports(uri::WITH_DEFAULTS) {
            return Err(NetconfError::WithDefaultsUnsupported);
        }
        Ok(())
    }

    /// Build the operation element placed inside `<rpc>`.
    pub fn to_element(&self) -> XmlElement {
        match self {
            Self::Get {
                filter,
                with_defaults,
            } => XmlElement::new("get")
                .with_children(filter.clone())
                .with_children(with_defaults.map(WithDefaultsMode::to_element)),
            Self::GetConfig {
                source,
                filter,
                with_defaults,
            } => XmlElement::new("get-config")
                .with_child(XmlElement::new("source").with_child(source.to_element()))
                .with_children(filter.clone())
                .with_children(with_defaults.map(WithDefaultsMode::to_element)),
            Self::EditConfig {
                target,
                source,
                options,
            } => {
                let mut el = XmlElement::new("edit-config")
                    .with_child(XmlElement::new("target").with_child(target.to_element()));
                if let Some(op) = options.default_operation {
                    el = el.with_child(XmlElement::new("default-operation").with_text(op.as_str()));
                }
                if let Some(opt) = options.test_option {
                    el = el.with_child(XmlElement::new("test-option").with_text(opt.as_str()));
                }
                if let Some(opt) = options.error_option {
                    el = el.with_child(XmlElement::new("error-option").with_text(opt.as_str()));
                }
                el.with_child(source.to_element())
            },
            Self::CopyConfig {
                target,
                source,
                with_defaults,
            } => XmlElement::new("copy-config")
                .with_child(XmlElement::new("target").with_child(target.to_element()))
                .with_child(XmlElement::new("source").with_child(source.to_element()))
                .with_children(with_defaults.map(WithDefaultsMode::to_element)),
            Self::DeleteConfig { target } => XmlElement::new("delete-config")
                .with_child(XmlElement::new("target").with_child(target.to_element())),
            Self::Lock { target } => XmlElement::new("lock")
                .with_child(XmlElement::new("target").with_child(target.to_element())),
            Self::Unlock { target } => XmlElement::new("unlock")
                .with_child(XmlElement::new("target").with_child(target.to_element())),
            Self::KillSession { session_id } => XmlElement::new("kill-session")
                .with_child(XmlElement::new("session-id").with_text(session_id.to_string())),
            Self::CloseSession => XmlElement::new("close-session"),
            Self::Commit => XmlElement::new("commit"),
            Self::DiscardChanges => XmlElement::new("discard-changes"),
            Self::Custom(el) => el.clone(),
        }
    }

    /// Interpret an operation element received inside `<rpc>`.
    pub fn from_element(el: &XmlElement) -> std::result::Result<Self, RpcError> {
        let op = match el.local_name() {
            "get" => Self::Get {
                filter: el.child("filter").cloned(),
                with_defaults: with_defaults_param(el)?,
            },
            "get-config" => Self::GetConfig {
                source: datastore_param(el, "source")?,
                filter: el.child("filter").cloned(),
                with_defaults: with_defaults_param(el)?,
            },
            "edit-config" => {
                let target = ConfigTarget::from_wrapper(required(el, "target")?)?;
                let source = if let Some(config) = el.child("config") {
                    ConfigSource::Inline(config.elements().cloned().collect())
                } else if let Some(url) = el.child("url") {
                    ConfigSource::Url(url.text())
                } else {
                    return Err(RpcError::missing_element("edit-config"));
                };
                let options = EditOptions {
                    default_operation: enum_param(el, "default-operation")?,
                    test_option: enum_param(el, "test-option")?,
                    error_option: enum_param(el, "error-option")?,
                };
                Self::EditConfig {
                    target,
                    source,
                    options,
                }
            },
            "copy-config" => Self::CopyConfig {
                target: ConfigTarget::from_wrapper(required(el, "target")?)?,
                source: ConfigSource::from_wrapper(required(el, "source")?)?,
                with_defaults: with_defaults_param(el)?,
            },
            "delete-config" => Self::DeleteConfig {
                target: ConfigTarget::from_wrapper(required(el, "target")?)?,
            },
            "lock" => Self::Lock {
                target: datastore_param(el, "target")?,
            },
            "unlock" => Self::Unlock {
                target: datastore_param(el, "target")?,
            },
            "kill-session" => {
                let text = required(el, "session-id")?.text();
                let session_id = text
                    .parse::<u32>()
                    .ok()
                    .filter(|id| *id > 0)
                    .ok_or_else(|| RpcError::invalid_value(format!("Invalid session-id '{text}'")))?;
                Self::KillSession { session_id }
            },
            "close-session" => Self::CloseSession,
            "commit" => Self::Commit,
            "discard-changes" => Self::DiscardChanges,
            _ => Self::Custom(el.clone()),
        };
        Ok(op)
    }
}

fn required<'a>(el: &'a XmlElement, name: &str) -> std::result::Result<&'a XmlElement, RpcError> {
    el.child(name)
        .ok_or_else(|| RpcError::missing_element(name).with_path(el.local_name().to_string()))
}

fn datastore_param(el: &XmlElement, wrapper: &str) -> std::result::Result<Datastore, RpcError> {
    match ConfigSource::from_wrapper(required(el, wrapper)?)? {
        ConfigSource::Datastore(ds) => Ok(ds),
        _ => Err(RpcError::bad_element(
            wrapper,
            format!("{} requires a datastore", el.local_name()),
        )),
    }
}

fn with_defaults_param(el: &XmlElement) -> std::result::Result<Option<WithDefaultsMode>, RpcError> {
    enum_param(el, "with-defaults")
}

fn enum_param<T: FromStr<Err = String>>(
    el: &XmlElement,
    name: &str,
) -> std::result::Result<Option<T>, RpcError> {
    el.child(name)
        .map(|child| {
            child
                .text()
                .parse::<T>()
                .map_err(|e| RpcError::bad_element(name, e))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{negotiate, CapabilitySet, ErrorTag};

    fn caps(extra: &[&str]) -> NegotiatedCaps {
        let mut set = CapabilitySet::new().with(uri::BASE_1_0);
        for cap in extra {
            set.insert(*cap);
        }
        negotiate(&set, &set).unwrap()
    }

    #[test]
    fn test_with_defaults_capability_parameters() {
        let cap = WithDefaultsMode::Explicit.capability(&WithDefaultsMode::ALL);
        assert_eq!(cap.base_uri(), uri::WITH_DEFAULTS);
        assert_eq!(cap.param("basic-mode"), Some("explicit"));
        assert_eq!(cap.param("also-supported"), Some("report-all,trim,report-all-tagged"));

        let bare = WithDefaultsMode::Trim.capability(&[WithDefaultsMode::Trim]);
        assert_eq!(
            bare.as_str(),
            "urn:ietf:params:netconf:capability:with-defaults:1.0?basic-mode=trim"
        );
    }

    #[test]
    fn test_element_roundtrip_edit_config() {
        let op = Operation::EditConfig {
            target: ConfigTarget::Datastore(Datastore::Running),
            source: ConfigSource::Inline(XmlElement::parse_fragment("<system><hostname>r1</hostname></system>").unwrap()),
            options: EditOptions {
                default_operation: Some(DefaultOperation::Replace),
                test_option: None,
                error_option: Some(ErrorOption::RollbackOnError),
            },
        };
        let parsed = Operation::from_element(&op.to_element()).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_get_with_defaults_wire_value() {
        let op = Operation::Get {
            filter: None,
            with_defaults: Some(WithDefaultsMode::ReportAllTagged),
        };
        let xml = op.to_element().to_xml();
        assert!(xml.contains(">report-all-tagged</with-defaults>"));
        assert!(xml.contains(NS_WITH_DEFAULTS));
    }

    #[test]
    fn test_with_defaults_requires_capability() {
        let op = Operation::Get {
            filter: None,
            with_defaults: Some(WithDefaultsMode::Trim),
        };
        assert!(matches!(
            op.check_capabilities(&caps(&[])),
            Err(NetconfError::WithDefaultsUnsupported)
        ));
        assert!(op.check_capabilities(&caps(&[uri::WITH_DEFAULTS])).is_ok());
    }

    #[test]
    fn test_commit_requires_candidate() {
        assert!(Operation::Commit.check_capabilities(&caps(&[])).is_err());
        assert!(Operation::Commit
            .check_capabilities(&caps(&[uri::CANDIDATE]))
            .is_ok());
    }

    #[test]
    fn test_copy_config_url_requires_capability() {
        let op = Operation::CopyConfig {
            target: ConfigTarget::Url("ftp://backup/cfg.xml".to_string()),
            source: ConfigSource::Datastore(Datastore::Running),
            with_defaults: None,
        };
        assert!(matches!(
            op.check_capabilities(&caps(&[])),
            Err(NetconfError::UrlUnsupported)
        ));
    }

    #[test]
    fn test_missing_target_is_rpc_error() {
        let el = XmlElement::parse("<lock/>").unwrap();
        let err = Operation::from_element(&el).unwrap_err();
        assert_eq!(err.tag, ErrorTag::MissingElement);
    }

    #[test]
    fn test_kill_session_rejects_zero() {
        let el = XmlElement::parse("<kill-session><session-id>0</session-id></kill-session>").unwrap();
        assert_eq!(
            Operation::from_element(&el).unwrap_err().tag,
            ErrorTag::InvalidValue
        );
    }

    #[test]
    fn test_unknown_operation_is_custom() {
        let el = XmlElement::parse("<reboot xmlns=\"urn:example\"/>").unwrap();
        match Operation::from_element(&el).unwrap() {
            Operation::Custom(inner) => assert_eq!(inner.local_name(), "reboot"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
