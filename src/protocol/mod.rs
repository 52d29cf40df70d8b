//! NETCONF negotiation, framing and session management.
//!
//! Implements the NETCONF (RFC 6241) session layer: hello exchange with
//! capability negotiation, the two wire framings of RFC 6242, RPC
//! correlation and the session lifecycle.
//!
//! # Protocol Overview
//!
//! Both peers send a `<hello>` as soon as the channel opens. The server's
//! hello carries the session id. Afterwards the client sends `<rpc>`
//! requests and the server answers each with exactly one `<rpc-reply>`.
//!
//! ## Message Flow
//!
//! ```text
//! Client                                  Server
//!    |                                      |
//!    |-------- <hello> (caps) ------------->|  ]]>]]> framing
//!    |<------- <hello> (caps, session-id) --|
//!    |                                      |  framing upgraded if
//!    |                                      |  base:1.1 negotiated
//!    |-------- <rpc message-id="1"> ------->|
//!    |<------- <rpc-reply message-id="1"> --|  <ok/>, <data> or <rpc-error>
//!    |                                      |
//!    |-------- <close-session/> ----------->|
//!    |<------- <ok/> -----------------------|  locks released
//! ```
//!
//! ## State Machine
//!
//! | State           | Description                        | Valid Transitions                     |
//! |-----------------|------------------------------------|---------------------------------------|
//! | `Connecting`    | Channel open, nothing exchanged    | → HelloSent, HelloReceived, Closed    |
//! | `HelloSent`     | Our hello written                  | → HelloReceived, Closed               |
//! | `HelloReceived` | Peer hello validated               | → HelloSent, Established, Closed      |
//! | `Established`   | RPCs may flow                      | → Closing                             |
//! | `Closing`       | Releasing locks                    | → Closed                              |
//! | `Closed`        | Terminal                           | (none)                                |
//!
//! ## Framing
//!
//! | Version  | Delimiting                               |
//! |----------|------------------------------------------|
//! | base:1.0 | message followed by `]]>]]>`             |
//! | base:1.1 | `\n#<len>\n<bytes>` chunks, then `\n##\n` |
//!
//! The hello exchange always uses base:1.0 framing.
//!
//! # Usage
//!
//! ## Client Side
//!
//! ```rust,ignore
//! use netconf::{Datastore, Session, SessionConfig, TransportInfo};
//!
//! let mut session = Session::connect(TransportInfo::default(), &SessionConfig::default(), channel).await?;
//! session.lock(Datastore::Running).await?;
//! let config = session.get_config(Datastore::Running, None, None).await?;
//! session.close_session().await?;
//! ```
//!
//! ## Server Side
//!
//! ```rust,ignore
//! use netconf::{server::ServerContext, Session, SessionConfig};
//!
//! let mut session = Session::accept(user, &SessionConfig::default(), channel, ctx).await?;
//! while session.is_active() {
//!     session.process_request().await?;
//! }
//! ```

mod capabilities;
mod client;
pub mod framer;
mod message;
mod operation;
mod rpc;
mod rpc_error;
mod session;
mod xml;

pub use capabilities::{negotiate, uri, Capability, CapabilitySet, NegotiatedCaps, ProtocolVersion};
pub use message::{Message, MessageType, ReplyContent, NS_BASE};
pub use operation::{
    DefaultOperation, ErrorOption, Operation, TestOption, WithDefaultsMode, NS_WITH_DEFAULTS,
};
pub use rpc::{Correlation, RpcDispatcher};
pub use rpc_error::{ErrorSeverity, ErrorTag, ErrorType, RpcError};
pub use session::{Role, Session, SessionState, SessionStats};
pub use xml::{XmlElement, XmlNode};
