//! `<rpc-error>` content as defined by RFC 6241 section 4.3.

use std::fmt;

use super::xml::XmlElement;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
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

            /// Parse the wire value.
            pub fn from_wire(s: &str) -> Option<Self> {
                match s.trim() {
                    $($wire => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Conceptual layer where the error occurred.
    ErrorType {
        /// Secure transport layer
        Transport => "transport",
        /// Messages layer
        Rpc => "rpc",
        /// Operations layer
        Protocol => "protocol",
        /// Content layer
        Application => "application",
    }
}

wire_enum! {
    /// `<error-tag>` values.
    ErrorTag {
        /// Resource in use
        InUse => "in-use",
        /// Unacceptable value
        InvalidValue => "invalid-value",
        /// Request or response too large
        TooBig => "too-big",
        /// Expected attribute missing
        MissingAttribute => "missing-attribute",
        /// Attribute value not correct
        BadAttribute => "bad-attribute",
        /// Unexpected attribute
        UnknownAttribute => "unknown-attribute",
        /// Expected element missing
        MissingElement => "missing-element",
        /// Element value not correct
        BadElement => "bad-element",
        /// Unexpected element
        UnknownElement => "unknown-element",
        /// Unexpected namespace
        UnknownNamespace => "unknown-namespace",
        /// Access denied
        AccessDenied => "access-denied",
        /// Lock held by another entity
        LockDenied => "lock-denied",
        /// Insufficient resources
        ResourceDenied => "resource-denied",
        /// Rollback failed
        RollbackFailed => "rollback-failed",
        /// Data already exists
        DataExists => "data-exists",
        /// Data does not exist
        DataMissing => "data-missing",
        /// Operation not supported
        OperationNotSupported => "operation-not-supported",
        /// Operation failed for another reason
        OperationFailed => "operation-failed",
        /// Obsolete, kept for parsing
        PartialOperation => "partial-operation",
        /// Message could not be parsed
        MalformedMessage => "malformed-message",
    }
}

wire_enum! {
    /// `<error-severity>`
    ErrorSeverity {
        /// Error
        Error => "error",
        /// Warning
        Warning => "warning",
    }
}

/// One `<rpc-error>` element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    /// `<error-type>`
    pub error_type: ErrorType,
    /// `<error-tag>`
    pub tag: ErrorTag,
    /// `<error-severity>`
    pub severity: ErrorSeverity,
    /// `<error-app-tag>`
    pub app_tag: Option<String>,
    /// `<error-path>`
    pub path: Option<String>,
    /// `<error-message>`
    pub message: Option<String>,
    /// `<error-info>` children as (name, text) pairs
    pub info: Vec<(String, String)>,
}

impl RpcError {
    /// Create an error with severity `error`.
    pub fn new(error_type: ErrorType, tag: ErrorTag) -> Self {
        Self {
            error_type,
            tag,
            severity: ErrorSeverity::Error,
            app_tag: None,
            path: None,
            message: None,
            info: Vec::new(),
        }
    }

    /// Set `<error-message>`.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Add an `<error-info>` entry.
    pub fn with_info(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.info.push((name.into(), value.into()));
        self
    }

    /// Set `<error-path>`.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// First `<error-info>` value with the given name.
    pub fn info_value(&self, name: &str) -> Option<&str> {
        self.info
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Lock held by session `holder`.
    pub fn lock_denied(holder: u32) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::LockDenied)
            .with_message(format!("Lock held by session {holder}"))
            .with_info("session-id", holder.to_string())
    }

    /// Datastore is locked by another session.
    pub fn in_use(holder: u32) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::InUse)
            .with_message(format!("Datastore locked by session {holder}"))
            .with_info("session-id", holder.to_string())
    }

    /// Operation the server does not implement.
    pub fn operation_not_supported(operation: &str) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::OperationNotSupported)
            .with_message(format!("Operation '{operation}' is not supported"))
            .with_info("bad-element", operation)
    }

    /// Generic failure.
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Application, ErrorTag::OperationFailed).with_message(message)
    }

    /// Parameter value is not acceptable.
    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::InvalidValue).with_message(message)
    }

    /// Required element missing.
    pub fn missing_element(element: &str) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::MissingElement)
            .with_message(format!("Missing element in '{element}'"))
            .with_info("bad-element", element)
    }

    /// Element present but unusable.
    pub fn bad_element(element: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorType::Protocol, ErrorTag::BadElement)
            .with_message(message)
            .with_info("bad-element", element)
    }

    /// Required attribute missing on an element.
    pub fn missing_attribute(attribute: &str, element: &str) -> Self {
        Self::new(ErrorType::Rpc, ErrorTag::MissingAttribute)
            .with_message(format!("Missing attribute '{attribute}'"))
            .with_info("bad-attribute", attribute)
            .with_info("bad-element", element)
    }

    /// Message could not be parsed.
    pub fn malformed_message(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Rpc, ErrorTag::MalformedMessage).with_message(message)
    }

    /// Serialize as `<rpc-error>`.
    pub fn to_element(&self) -> XmlElement {
        let mut el = XmlElement::new("rpc-error")
            .with_child(XmlElement::new("error-type").with_text(self.error_type.as_str()))
            .with_child(XmlElement::new("error-tag").with_text(self.tag.as_str()))
            .with_child(XmlElement::new("error-severity").with_text(self.severity.as_str()));
        if let Some(app_tag) = &self.app_tag {
            el = el.with_child(XmlElement::new("error-app-tag").with_text(app_tag.clone()));
        }
        if let Some(path) = &self.path {
            el = el.with_child(XmlElement::new("error-path").with_text(path.clone()));
        }
        if let Some(message) = &self.message {
            el = el.with_child(
                XmlElement::new("error-message")
                    .with_attr("xml:lang", "en")
                    .with_text(message.clone()),
            );
        }
        if !self.info.is_empty() {
            let info = self.info.iter().fold(XmlElement::new("error-info"), |info, (k, v)| {
                info.with_child(XmlElement::new(k.clone()).with_text(v.clone()))
            });
            el = el.with_child(info);
        }
        el
    }

    /// Parse an `<rpc-error>` element. Unknown values degrade to
    /// `application` / `operation-failed` rather than failing.
    pub fn from_element(el: &XmlElement) -> Self {
        let error_type = el
            .child_text("error-type")
            .and_then(|t| ErrorType::from_wire(&t))
            .unwrap_or(ErrorType::Application);
        let tag = el
            .child_text("error-tag")
            .and_then(|t| ErrorTag::from_wire(&t))
            .unwrap_or(ErrorTag::OperationFailed);
        let severity = el
            .child_text("error-severity")
            .and_then(|t| ErrorSeverity::from_wire(&t))
            .unwrap_or(ErrorSeverity::Error);
        let info = el
            .child("error-info")
            .map(|info| {
                info.elements()
                    .map(|e| (e.local_name().to_string(), e.text()))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            error_type,
            tag,
            severity,
            app_tag: el.child_text("error-app-tag"),
            path: el.child_text("error-path"),
            message: el.child_text("error-message"),
            info,
        }
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.error_type, self.tag)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}
