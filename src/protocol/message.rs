//! Protocol messages for NETCONF communication.
//!
//! Every message is one XML document whose root is `<hello>`, `<rpc>` or
//! `<rpc-reply>` in the base namespace.

use bytes::Bytes;

use super::capabilities::{Capability, CapabilitySet};
use super::rpc_error::RpcError;
use super::xml::XmlElement;
use crate::error::{NetconfError, Result};

/// Base protocol XML namespace.
pub const NS_BASE: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// Message types in the NETCONF protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    /// Capability exchange
    Hello,
    /// Request
    Rpc,
    /// Response to a request
    RpcReply,
}

/// Parsed protocol message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message type
    pub msg_type: MessageType,
    /// Root element
    pub root: XmlElement,
}

/// Content of an `<rpc-reply>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyContent {
    /// `<ok/>`
    Ok,
    /// `<data>` with its children
    Data(Vec<XmlElement>),
    /// Other reply payload returned by a custom operation
    Raw(Vec<XmlElement>),
    /// One or more `<rpc-error>` elements
    Errors(Vec<RpcError>),
}

impl ReplyContent {
    fn into_elements(self) -> Vec<XmlElement> {
        match self {
            Self::Ok => vec![XmlElement::new("ok")],
            Self::Data(data) => vec![XmlElement::new("data").with_children(data)],
            Self::Raw(elements) => elements,
            Self::Errors(errors) => errors.iter().map(RpcError::to_element).collect(),
        }
    }
}

impl Message {
    /// Parse a framed message payload.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| NetconfError::InvalidMessage(format!("message is not UTF-8: {e}")))?;
        let root = XmlElement::parse(text.trim_start())?;
        let msg_type = match root.local_name() {
            "hello" => MessageType::Hello,
            "rpc" => MessageType::Rpc,
            "rpc-reply" => MessageType::RpcReply,
            other => {
                return Err(NetconfError::InvalidMessage(format!(
                    "unexpected root element <{other}>"
                )))
            },
        };
        Ok(Self { msg_type, root })
    }

    /// Create a `<hello>`; servers include their session id.
    pub fn hello(capabilities: &CapabilitySet, session_id: Option<u32>) -> Self {
        let caps = capabilities.iter().fold(XmlElement::new("capabilities"), |el, cap| {
            el.with_child(XmlElement::new("capability").with_text(cap.as_str()))
        });
        let mut root = XmlElement::new("hello")
            .with_attr("xmlns", NS_BASE)
            .with_child(caps);
        if let Some(id) = session_id {
            root = root.with_child(XmlElement::new("session-id").with_text(id.to_string()));
        }
        Self {
            msg_type: MessageType::Hello,
            root,
        }
    }

    /// Create an `<rpc>` wrapping one operation.
    pub fn rpc(message_id: &str, operation: XmlElement) -> Self {
        Self {
            msg_type: MessageType::Rpc,
            root: XmlElement::new("rpc")
                .with_attr("xmlns", NS_BASE)
                .with_attr("message-id", message_id)
                .with_child(operation),
        }
    }

    /// Create an `<rpc-reply>` echoing the request's attributes.
    ///
    /// `request_attrs` is empty when the request could not be parsed; the
    /// reply then carries no message-id.
    pub fn reply(request_attrs: &[(String, String)], content: ReplyContent) -> Self {
        let mut root = XmlElement::new("rpc-reply");
        if !request_attrs.iter().any(|(k, _)| k == "xmlns") {
            root = root.with_attr("xmlns", NS_BASE);
        }
        root.attributes.extend(request_attrs.iter().cloned());
        Self {
            msg_type: MessageType::RpcReply,
            root: root.with_children(content.into_elements()),
        }
    }

    /// Serialize with XML declaration.
    pub fn to_xml(&self) -> String {
        format!("{XML_DECLARATION}{}", self.root.to_xml())
    }

    /// Serialize into a frame payload.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.to_xml())
    }

    /// `message-id` attribute of rpc / rpc-reply.
    pub fn message_id(&self) -> Option<&str> {
        self.root.attr("message-id")
    }

    /// Capabilities advertised in a hello.
    pub fn capabilities(&self) -> Result<CapabilitySet> {
        let caps = self
            .root
            .child("capabilities")
            .ok_or_else(|| NetconfError::InvalidMessage("hello without <capabilities>".to_string()))?;
        Ok(caps
            .children_named("capability")
            .map(|c| Capability::new(c.text()))
            .collect())
    }

    /// Session id carried by a server hello.
    pub fn session_id(&self) -> Result<Option<u32>> {
        match self.root.child_text("session-id") {
            None => Ok(None),
            Some(text) => text
                .parse::<u32>()
                .ok()
                .filter(|id| *id > 0)
                .map(Some)
                .ok_or_else(|| NetconfError::InvalidMessage(format!("invalid session-id '{text}'"))),
        }
    }

    /// The operation element inside an `<rpc>`.
    pub fn operation(&self) -> Option<&XmlElement> {
        self.root.first_element()
    }

    /// Interpret an `<rpc-reply>`.
    pub fn reply_content(&self) -> ReplyContent {
        let errors: Vec<RpcError> = self
            .root
            .children_named("rpc-error")
            .map(RpcError::from_element)
            .collect();
        if errors
            .iter()
            .any(|e| e.severity == super::ErrorSeverity::Error)
        {
            return ReplyContent::Errors(errors);
        }
        if let Some(data) = self.root.child("data") {
            return ReplyContent::Data(data.elements().cloned().collect());
        }
        if self.root.child("ok").is_some() {
            return ReplyContent::Ok;
        }
        ReplyContent::Raw(
            self.root
                .elements()
                .filter(|e| e.local_name() != "rpc-error")
                .cloned()
                .collect(),
        )
    }
}
