//! Session management for NETCONF.
//!
//! Handles the lifecycle of one connection: hello exchange, capability
//! negotiation, framing upgrade, request processing and teardown.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use super::capabilities::{negotiate, CapabilitySet, NegotiatedCaps, ProtocolVersion};
use super::framer::MessageFramer;
use super::message::{Message, MessageType, ReplyContent};
use super::operation::Operation;
use super::rpc::{Correlation, RpcDispatcher};
use crate::config::SessionConfig;
use crate::error::{NetconfError, Result};
use crate::server::{allocate_session_id, handle_request, Outcome, ServerContext};
use crate::transport::{ByteChannel, StdioChannel, TransportInfo, TransportKind};

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Channel open, no hello exchanged yet
    Connecting,
    /// Our hello sent, waiting for the peer's
    HelloSent,
    /// Peer hello received and validated
    HelloReceived,
    /// Session established, ready for RPCs
    Established,
    /// Session closing, locks being released
    Closing,
    /// Session closed
    Closed,
}

impl SessionState {
    /// Whether `next` is a legal successor of this state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{Closed, Closing, Connecting, Established, HelloReceived, HelloSent};
        matches!(
            (self, next),
            (Connecting, HelloSent | HelloReceived | Closed)
                | (HelloSent, HelloReceived | Closed)
                | (HelloReceived, HelloSent | Established | Closed)
                | (Established, Closing)
                | (Closing, Closed)
        )
    }

    /// Validated transition.
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(NetconfError::InvalidTransition {
                from: self,
                to: next,
            })
        }
    }
}

/// Side of the connection this session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Issues RPCs
    Client,
    /// Answers RPCs
    Server,
}

impl Role {
    fn name(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// NETCONF session bound to one channel.
pub struct Session {
    /// Session ID (0 until a client learns it from the server hello)
    id: u32,
    /// Client or server
    role: Role,
    /// Current state
    state: SessionState,
    /// Peer metadata
    info: TransportInfo,
    /// Capabilities we advertise
    local_caps: CapabilitySet,
    /// Capabilities the peer advertised
    peer_caps: Option<CapabilitySet>,
    /// Negotiated version and capabilities
    negotiated: Option<NegotiatedCaps>,
    /// Wire framing
    framer: MessageFramer,
    /// Client request correlation
    dispatcher: RpcDispatcher,
    /// Server-side shared state
    server: Option<ServerContext>,
    /// Signalled when another session kills this one
    kill: Option<Arc<Notify>>,
    /// Creation time
    started: Instant,
    /// Messages received by a server session
    in_rpcs: u64,
    /// Inbound messages that were not valid RPCs
    in_bad_rpcs: u64,
    /// Replies carrying rpc-errors
    out_rpc_errors: u64,
    /// RPCs sent by a client session
    out_rpcs: u64,
}

impl Session {
    fn new(
        role: Role,
        id: u32,
        info: TransportInfo,
        config: &SessionConfig,
        channel: impl ByteChannel + 'static,
    ) -> Self {
        Self {
            id,
            role,
            state: SessionState::Connecting,
            info,
            local_caps: config.capabilities.clone(),
            peer_caps: None,
            negotiated: None,
            framer: MessageFramer::new(channel, config.max_message_size),
            dispatcher: RpcDispatcher::new(config.rpc_timeout),
            server: None,
            kill: None,
            started: Instant::now(),
            in_rpcs: 0,
            in_bad_rpcs: 0,
            out_rpc_errors: 0,
            out_rpcs: 0,
        }
    }

    /// Open a client session over an established channel.
    ///
    /// Sends our hello, waits for the server hello, negotiates and switches
    /// framing. The session id is learned from the server.
    pub async fn connect(
        info: TransportInfo,
        config: &SessionConfig,
        channel: impl ByteChannel + 'static,
    ) -> Result<Self> {
        tracing::info!(
            host = info.host.as_deref().unwrap_or("-"),
            port = info.port,
            user = info.user.as_deref().unwrap_or("-"),
            transport = %info.kind,
            "opening client session"
        );
        let mut session = Self::new(Role::Client, 0, info, config, channel);
        session.handshake(config.hello_timeout).await?;
        Ok(session)
    }

    /// Accept a server session over an established channel.
    ///
    /// Assigns a fresh session id, registers it for kill-session and
    /// performs the hello exchange.
    pub async fn accept(
        user: Option<String>,
        config: &SessionConfig,
        channel: impl ByteChannel + 'static,
        ctx: ServerContext,
    ) -> Result<Self> {
        Self::accept_with(TransportInfo::server(user, TransportKind::Ssh), config, channel, ctx).await
    }

    /// Accept a server session on the process stdin/stdout.
    pub async fn accept_stdio(
        user: Option<String>,
        config: &SessionConfig,
        ctx: ServerContext,
    ) -> Result<Self> {
        Self::accept(user, config, StdioChannel::new(), ctx).await
    }

    /// Accept a server session with full transport metadata.
    pub async fn accept_with(
        info: TransportInfo,
        config: &SessionConfig,
        channel: impl ByteChannel + 'static,
        ctx: ServerContext,
    ) -> Result<Self> {
        let id = allocate_session_id();
        let kill = ctx.sessions.register(id, info.user.clone());
        tracing::info!(
            session_id = id,
            user = info.user.as_deref().unwrap_or("-"),
            transport = %info.kind,
            "accepting session"
        );

        let mut session = Self::new(Role::Server, id, info, config, channel);
        session.local_caps = ctx.advertised_capabilities(&config.capabilities);
        session.server = Some(ctx);
        session.kill = Some(kill);
        session.handshake(config.hello_timeout).await?;
        Ok(session)
    }

    /// Get session ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Client or server
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Peer metadata
    pub fn info(&self) -> &TransportInfo {
        &self.info
    }

    /// Capabilities we advertised
    pub fn local_capabilities(&self) -> &CapabilitySet {
        &self.local_caps
    }

    /// Capabilities the peer advertised
    pub fn peer_capabilities(&self) -> Option<&CapabilitySet> {
        self.peer_caps.as_ref()
    }

    /// Negotiated version and capabilities
    pub fn negotiated(&self) -> Option<&NegotiatedCaps> {
        self.negotiated.as_ref()
    }

    /// Negotiated protocol version
    pub fn version(&self) -> Option<ProtocolVersion> {
        self.negotiated.as_ref().map(|n| n.version)
    }

    /// Whether the session can still exchange RPCs.
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Established
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            session_id: self.id,
            role: self.role,
            state: self.state,
            in_rpcs: self.in_rpcs,
            in_bad_rpcs: self.in_bad_rpcs,
            out_rpc_errors: self.out_rpc_errors,
            out_rpcs: self.out_rpcs,
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    fn transition(&mut self, next: SessionState) -> Result<()> {
        let next = self.state.transition(next)?;
        tracing::trace!(session_id = self.id, from = ?self.state, to = ?next, "state transition");
        self.state = next;
        Ok(())
    }

    fn ensure_established(&self) -> Result<&NegotiatedCaps> {
        match (self.state, &self.negotiated) {
            (SessionState::Established, Some(negotiated)) => Ok(negotiated),
            (SessionState::Closed, _) => Err(NetconfError::SessionClosed),
            (state, _) => Err(NetconfError::SessionNotEstablished(state)),
        }
    }

    async fn handshake(&mut self, hello_timeout: Duration) -> Result<()> {
        let result = match tokio::time::timeout(hello_timeout, self.exchange_hello()).await {
            Ok(result) => result,
            Err(_) => Err(NetconfError::NegotiationFailed(format!(
                "no hello received within {hello_timeout:?}"
            ))),
        };
        if let Err(e) = &result {
            tracing::error!(session_id = self.id, role = %self.role, error = %e, "hello exchange failed");
            self.teardown("hello exchange failed").await;
        }
        result
    }

    async fn exchange_hello(&mut self) -> Result<()> {
        let own_id = match self.role {
            Role::Server => Some(self.id),
            Role::Client => None,
        };
        let hello = Message::hello(&self.local_caps, own_id);
        self.framer.write_message(&hello.to_bytes()).await?;
        self.transition(SessionState::HelloSent)?;

        let raw = self.framer.read_message().await?;
        let peer = Message::parse(&raw)
            .map_err(|e| NetconfError::NegotiationFailed(format!("invalid hello: {e}")))?;
        if peer.msg_type != MessageType::Hello {
            return Err(NetconfError::NegotiationFailed(format!(
                "expected <hello>, received <{}>",
                peer.root.local_name()
            )));
        }

        let peer_id = peer
            .session_id()
            .map_err(|e| NetconfError::NegotiationFailed(e.to_string()))?;
        match (self.role, peer_id) {
            (Role::Client, Some(id)) => self.id = id,
            (Role::Client, None) => {
                return Err(NetconfError::NegotiationFailed(
                    "server hello without session-id".to_string(),
                ))
            },
            (Role::Server, Some(id)) => {
                return Err(NetconfError::NegotiationFailed(format!(
                    "client hello carries session-id {id}"
                )))
            },
            (Role::Server, None) => {},
        }

        let peer_caps = peer
            .capabilities()
            .map_err(|e| NetconfError::NegotiationFailed(e.to_string()))?;
        self.transition(SessionState::HelloReceived)?;

        let negotiated = negotiate(&self.local_caps, &peer_caps)?;
        self.framer.upgrade(negotiated.version);
        tracing::info!(
            session_id = self.id,
            role = %self.role,
            version = %negotiated.version,
            capabilities = negotiated.capabilities.len(),
            "session established"
        );
        self.peer_caps = Some(peer_caps);
        self.negotiated = Some(negotiated);
        self.transition(SessionState::Established)
    }

    /// Send one RPC and wait for its reply. Capability checks run before any I/O.
    pub(super) async fn request(&mut self, operation: Operation) -> Result<ReplyContent> {
        if self.role != Role::Client {
            return Err(NetconfError::WrongRole("server"));
        }
        operation.check_capabilities(self.ensure_established()?)?;

        let message_id = self.dispatcher.next_message_id();
        self.dispatcher.begin(message_id.clone())?;
        let rpc = Message::rpc(&message_id, operation.to_element());
        if let Err(e) = self.framer.write_message(&rpc.to_bytes()).await {
            self.dispatcher.abandon();
            return Err(self.fail(e).await);
        }
        self.out_rpcs += 1;
        tracing::debug!(session_id = self.id, %message_id, operation = operation.name(), "sent rpc");

        let timeout = self.dispatcher.timeout();
        let reply = match tokio::time::timeout(timeout, self.await_reply()).await {
            Ok(reply) => reply?,
            Err(_) => {
                self.dispatcher.abandon();
                tracing::warn!(session_id = self.id, %message_id, "rpc timed out");
                return Err(NetconfError::Timeout(timeout));
            },
        };

        match reply.reply_content() {
            ReplyContent::Errors(errors) => {
                tracing::warn!(
                    session_id = self.id,
                    %message_id,
                    operation = operation.name(),
                    errors = errors.len(),
                    "rpc-error received"
                );
                Err(NetconfError::Rpc(errors))
            },
            content => Ok(content),
        }
    }

    async fn await_reply(&mut self) -> Result<Message> {
        loop {
            let raw = match self.framer.read_message().await {
                Ok(raw) => raw,
                Err(e) => return Err(self.fail(e).await),
            };
            let reply = match Message::parse(&raw) {
                Ok(reply) => reply,
                Err(e) => {
                    self.dispatcher.abandon();
                    return Err(e);
                },
            };
            match self.dispatcher.correlate(&reply)? {
                Correlation::Matched => return Ok(reply),
                Correlation::Stale => continue,
            }
        }
    }

    /// Read one request, dispatch it and send exactly one reply.
    ///
    /// Returns without reading if the session is killed by another session.
    pub async fn process_request(&mut self) -> Result<()> {
        let Some(ctx) = self.server.clone() else {
            return Err(NetconfError::WrongRole("client"));
        };
        let negotiated = self.ensure_established()?.clone();
        let kill = self.kill.clone();

        let inbound = tokio::select! {
            biased;
            () = killed(kill.as_deref()) => None,
            read = self.framer.read_message() => Some(read),
        };
        let raw = match inbound {
            None => {
                self.teardown("killed by another session").await;
                return Ok(());
            },
            Some(Ok(raw)) => raw,
            Some(Err(e)) => return Err(self.fail(e).await),
        };

        self.in_rpcs += 1;
        let handled = handle_request(&ctx, self.id, &negotiated, &raw);
        if handled.bad_rpc {
            self.in_bad_rpcs += 1;
        }
        if handled.is_error {
            self.out_rpc_errors += 1;
        }

        if let Err(e) = self.framer.write_message(&handled.reply.to_bytes()).await {
            return Err(self.fail(e).await);
        }
        if handled.outcome == Outcome::Close {
            self.teardown("close-session").await;
        }
        Ok(())
    }

    /// Serve requests until the session closes.
    ///
    /// Peer EOF ends the loop normally; other fatal errors are returned.
    pub async fn serve(&mut self) -> Result<()> {
        while self.is_active() {
            match self.process_request().await {
                Ok(()) => {},
                Err(NetconfError::ConnectionClosed) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Close the session without sending anything, releasing its locks.
    pub async fn shutdown(&mut self) {
        self.teardown("shutdown").await;
    }

    /// Tear down after a fatal error and hand the error back.
    async fn fail(&mut self, err: NetconfError) -> NetconfError {
        if err.is_fatal() {
            if matches!(err, NetconfError::ConnectionClosed) {
                tracing::info!(session_id = self.id, "peer closed the connection");
            } else {
                tracing::error!(session_id = self.id, error = %err, "fatal session error");
            }
            self.teardown("fatal error").await;
        }
        err
    }

    /// Established -> Closing -> Closed, releasing locks on the way.
    pub(super) async fn teardown(&mut self, reason: &str) {
        if self.state == SessionState::Closed {
            return;
        }
        if self.state.can_transition_to(SessionState::Closing) {
            self.state = SessionState::Closing;
        }
        self.release_resources();
        self.state = SessionState::Closed;
        self.framer.shutdown().await;
        tracing::info!(session_id = self.id, reason, "session closed");
    }

    fn release_resources(&mut self) {
        if let Some(ctx) = &self.server {
            ctx.locks.release_all(self.id);
            ctx.sessions.deregister(self.id);
        }
    }
}

async fn killed(kill: Option<&Notify>) {
    match kill {
        Some(kill) => kill.notified().await,
        None => std::future::pending().await,
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release_resources();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("state", &self.state)
            .field("version", &self.version())
            .field("framer", &self.framer)
            .finish_non_exhaustive()
    }
}

/// Session statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStats {
    /// Session ID
    pub session_id: u32,
    /// Client or server
    pub role: Role,
    /// Current state
    pub state: SessionState,
    /// Messages received (server)
    pub in_rpcs: u64,
    /// Messages that were not valid RPCs (server)
    pub in_bad_rpcs: u64,
    /// Replies sent with rpc-errors (server)
    pub out_rpc_errors: u64,
    /// RPCs sent (client)
    pub out_rpcs: u64,
    /// Session uptime in seconds
    pub uptime_secs: u64,
}
