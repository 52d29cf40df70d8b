//! Server-side request handling.
//!
//! [`handle_request`] turns one inbound message into exactly one reply. It
//! never fails: parse errors, capability violations, backend errors and
//! handler panics all become `rpc-error` replies.

use std::panic::{catch_unwind, AssertUnwindSafe};

use super::state::ServerContext;
use crate::datastore::{ConfigTarget, Datastore};
use crate::error::NetconfError;
use crate::protocol::{
    Message, MessageType, NegotiatedCaps, Operation, ReplyContent, RpcError, WithDefaultsMode,
};

/// What the session does after sending the reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep serving requests
    Continue,
    /// `close-session` succeeded; tear the session down
    Close,
}

/// Result of handling one inbound message.
#[derive(Debug, Clone)]
pub struct Handled {
    /// Reply to send
    pub reply: Message,
    /// Follow-up action
    pub outcome: Outcome,
    /// Request could not be interpreted as an operation
    pub bad_rpc: bool,
    /// Reply carries rpc-errors
    pub is_error: bool,
}

impl Handled {
    fn bad(attrs: &[(String, String)], error: RpcError) -> Self {
        Self {
            reply: Message::reply(attrs, ReplyContent::Errors(vec![error])),
            outcome: Outcome::Continue,
            bad_rpc: true,
            is_error: true,
        }
    }
}

/// Handle one framed message received by server session `session_id`.
pub fn handle_request(
    ctx: &ServerContext,
    session_id: u32,
    negotiated: &NegotiatedCaps,
    raw: &[u8],
) -> Handled {
    let message = match Message::parse(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(session_id, error = %e, "malformed message");
            return Handled::bad(&[], e.to_rpc_error());
        },
    };

    if message.msg_type != MessageType::Rpc {
        tracing::warn!(session_id, kind = ?message.msg_type, "unexpected message");
        return Handled::bad(
            &[],
            RpcError::malformed_message(format!(
                "expected <rpc>, received <{}>",
                message.root.local_name()
            )),
        );
    }

    let attrs = &message.root.attributes;
    let Some(message_id) = message.message_id() else {
        tracing::warn!(session_id, "rpc without message-id");
        return Handled::bad(attrs, RpcError::missing_attribute("message-id", "rpc"));
    };

    let Some(element) = message.operation() else {
        return Handled::bad(attrs, RpcError::missing_element("rpc"));
    };

    let operation = match Operation::from_element(element) {
        Ok(op) => op,
        Err(error) => return Handled::bad(attrs, error),
    };

    tracing::debug!(session_id, message_id, operation = operation.name(), "processing rpc");

    let result = operation
        .check_capabilities(negotiated)
        .map_err(|e| e.to_rpc_error())
        .and_then(|()| run_guarded(ctx, session_id, &operation));

    match result {
        Ok(content) => Handled {
            reply: Message::reply(attrs, content),
            outcome: if operation == Operation::CloseSession {
                Outcome::Close
            } else {
                Outcome::Continue
            },
            bad_rpc: false,
            is_error: false,
        },
        Err(error) => {
            tracing::warn!(
                session_id,
                message_id,
                operation = operation.name(),
                tag = %error.tag,
                "rpc failed"
            );
            Handled {
                reply: Message::reply(attrs, ReplyContent::Errors(vec![error])),
                outcome: Outcome::Continue,
                bad_rpc: false,
                is_error: true,
            }
        },
    }
}

fn run_guarded(
    ctx: &ServerContext,
    session_id: u32,
    operation: &Operation,
) -> Result<ReplyContent, RpcError> {
    catch_unwind(AssertUnwindSafe(|| execute(ctx, session_id, operation))).unwrap_or_else(|_| {
        tracing::error!(session_id, operation = operation.name(), "handler panicked");
        Err(RpcError::operation_failed(format!(
            "internal error while processing <{}>",
            operation.name()
        )))
    })
}

/// Execute a decoded operation against the server context.
fn execute(
    ctx: &ServerContext,
    session_id: u32,
    operation: &Operation,
) -> Result<ReplyContent, RpcError> {
    let backend = ctx.backend.as_ref();
    match operation {
        Operation::Get {
            filter,
            with_defaults,
        } => backend
            .get(filter.as_ref(), resolve_with_defaults(ctx, *with_defaults)?)
            .map(ReplyContent::Data),
        Operation::GetConfig {
            source,
            filter,
            with_defaults,
        } => backend
            .get_config(*source, filter.as_ref(), resolve_with_defaults(ctx, *with_defaults)?)
            .map(ReplyContent::Data),
        Operation::EditConfig {
            target,
            source,
            options,
        } => {
            check_writable(ctx, session_id, target)?;
            backend.edit_config(target, source, *options).map(|()| ReplyContent::Ok)
        },
        Operation::CopyConfig {
            target,
            source,
            with_defaults,
        } => {
            let with_defaults = resolve_with_defaults(ctx, *with_defaults)?;
            check_writable(ctx, session_id, target)?;
            backend
                .copy_config(target, source, with_defaults)
                .map(|()| ReplyContent::Ok)
        },
        Operation::DeleteConfig { target } => {
            if target.datastore() == Some(Datastore::Running) {
                return Err(RpcError::operation_failed(
                    "the running datastore cannot be deleted",
                ));
            }
            check_writable(ctx, session_id, target)?;
            backend.delete_config(target).map(|()| ReplyContent::Ok)
        },
        Operation::Lock { target } => ctx
            .locks
            .acquire(*target, session_id)
            .map(|()| ReplyContent::Ok)
            .map_err(|e| e.to_rpc_error()),
        Operation::Unlock { target } => ctx
            .locks
            .release(*target, session_id)
            .map(|()| ReplyContent::Ok)
            .map_err(|e| e.to_rpc_error()),
        Operation::KillSession { session_id: target } => {
            if *target == session_id {
                return Err(RpcError::invalid_value("a session cannot kill itself"));
            }
            if !ctx.sessions.kill(*target, &ctx.locks) {
                return Err(RpcError::invalid_value(format!("no session with id {target}")));
            }
            Ok(ReplyContent::Ok)
        },
        Operation::CloseSession => Ok(ReplyContent::Ok),
        Operation::Commit => {
            check_writable(ctx, session_id, &Datastore::Running.into())?;
            backend.commit().map(|()| ReplyContent::Ok)
        },
        Operation::DiscardChanges => {
            check_writable(ctx, session_id, &Datastore::Candidate.into())?;
            backend.discard_changes().map(|()| ReplyContent::Ok)
        },
        Operation::Custom(element) => match ctx.handlers.get(element.local_name()) {
            Some(handler) => handler.call(session_id, element),
            None => Err(RpcError::operation_not_supported(element.local_name())),
        },
    }
}

/// Requested with-defaults mode, or the basic mode when none was given.
fn resolve_with_defaults(
    ctx: &ServerContext,
    requested: Option<WithDefaultsMode>,
) -> Result<Option<WithDefaultsMode>, RpcError> {
    match requested {
        Some(mode) if !ctx.supports_with_defaults(mode) => Err(RpcError::invalid_value(format!(
            "with-defaults mode '{mode}' is not supported"
        ))
        .with_info("bad-element", "with-defaults")),
        requested => Ok(requested.or(ctx.basic_mode)),
    }
}

/// Writes to a datastore locked by another session fail with `in-use`.
fn check_writable(
    ctx: &ServerContext,
    session_id: u32,
    target: &ConfigTarget,
) -> Result<(), RpcError> {
    let Some(datastore) = target.datastore() else {
        return Ok(());
    };
    ctx.locks
        .check_writable(datastore, session_id)
        .map_err(|e| match e {
            NetconfError::LockDenied { holder, .. } => RpcError::in_use(holder),
            other => other.to_rpc_error(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::datastore::MemoryDatastore;
    use crate::protocol::{negotiate, uri, CapabilitySet, ErrorTag, XmlElement};
    use crate::server::{HandlerRegistry, HandlerResult};

    fn ctx() -> ServerContext {
        let backend = MemoryDatastore::new().with_running(
            XmlElement::parse_fragment("<system><hostname>r1</hostname></system>").unwrap(),
        );
        ServerContext::isolated(Arc::new(backend))
    }

    fn caps(extra: &[&str]) -> NegotiatedCaps {
        let mut set = CapabilitySet::new().with(uri::BASE_1_0).with(uri::BASE_1_1);
        for cap in extra {
            set.insert(*cap);
        }
        negotiate(&set, &set).unwrap()
    }

    fn rpc(id: &str, body: &str) -> Vec<u8> {
        format!(r#"<rpc message-id="{id}" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">{body}</rpc>"#)
            .into_bytes()
    }

    fn errors(handled: &Handled) -> Vec<RpcError> {
        match handled.reply.reply_content() {
            ReplyContent::Errors(errors) => errors,
            other => panic!("expected rpc-error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_operation_keeps_message_id() {
        let handled = handle_request(&ctx(), 1, &caps(&[]), &rpc("7", "<frobnicate/>"));
        assert_eq!(handled.reply.message_id(), Some("7"));
        assert_eq!(errors(&handled)[0].tag, ErrorTag::OperationNotSupported);
        assert_eq!(handled.outcome, Outcome::Continue);
    }

    #[test]
    fn test_get_returns_data() {
        let handled = handle_request(&ctx(), 1, &caps(&[]), &rpc("1", "<get/>"));
        match handled.reply.reply_content() {
            ReplyContent::Data(data) => assert_eq!(data[0].local_name(), "system"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_malformed_xml_reply_has_no_message_id() {
        let handled = handle_request(&ctx(), 1, &caps(&[]), b"<rpc message-id=\"1\"><get>");
        assert!(handled.bad_rpc);
        assert_eq!(handled.reply.message_id(), None);
        assert_eq!(errors(&handled)[0].tag, ErrorTag::MalformedMessage);
    }

    #[test]
    fn test_deeply_nested_filter_is_malformed() {
        let body = format!("<get><filter>{}</filter></get>", "<a>".repeat(200_000));
        let handled = handle_request(&ctx(), 1, &caps(&[]), &rpc("1", &body));
        assert!(handled.bad_rpc);
        assert_eq!(handled.outcome, Outcome::Continue);
        assert_eq!(errors(&handled)[0].tag, ErrorTag::MalformedMessage);
    }

    #[test]
    fn test_missing_message_id() {
        let handled = handle_request(&ctx(), 1, &caps(&[]), b"<rpc><get/></rpc>");
        let err = &errors(&handled)[0];
        assert_eq!(err.tag, ErrorTag::MissingAttribute);
        assert_eq!(err.info_value("bad-attribute"), Some("message-id"));
    }

    #[test]
    fn test_candidate_not_negotiated() {
        let handled = handle_request(
            &ctx(),
            1,
            &caps(&[]),
            &rpc("2", "<lock><target><candidate/></target></lock>"),
        );
        assert_eq!(errors(&handled)[0].tag, ErrorTag::OperationNotSupported);
    }

    #[test]
    fn test_lock_contention_and_in_use() {
        let ctx = ctx();
        let negotiated = caps(&[]);
        let lock = rpc("1", "<lock><target><running/></target></lock>");

        assert!(!handle_request(&ctx, 1, &negotiated, &lock).is_error);

        let denied = handle_request(&ctx, 2, &negotiated, &lock);
        let err = &errors(&denied)[0];
        assert_eq!(err.tag, ErrorTag::LockDenied);
        assert_eq!(err.info_value("session-id"), Some("1"));

        let edit = rpc(
            "2",
            "<edit-config><target><running/></target><config><a/></config></edit-config>",
        );
        let in_use = handle_request(&ctx, 2, &negotiated, &edit);
        assert_eq!(errors(&in_use)[0].tag, ErrorTag::InUse);

        // Lock holder may still write
        assert!(!handle_request(&ctx, 1, &negotiated, &edit).is_error);
    }

    #[test]
    fn test_delete_running_fails() {
        let handled = handle_request(
            &ctx(),
            1,
            &caps(&[]),
            &rpc("3", "<delete-config><target><running/></target></delete-config>"),
        );
        assert_eq!(errors(&handled)[0].tag, ErrorTag::OperationFailed);
    }

    #[test]
    fn test_kill_session_rules() {
        let ctx = ctx();
        ctx.sessions.register(1, None);
        ctx.sessions.register(2, None);
        let negotiated = caps(&[]);

        let own = handle_request(&ctx, 1, &negotiated, &rpc("1", "<kill-session><session-id>1</session-id></kill-session>"));
        assert_eq!(errors(&own)[0].tag, ErrorTag::InvalidValue);

        let unknown = handle_request(&ctx, 1, &negotiated, &rpc("2", "<kill-session><session-id>99</session-id></kill-session>"));
        assert_eq!(errors(&unknown)[0].tag, ErrorTag::InvalidValue);

        ctx.locks.acquire(Datastore::Running, 2).unwrap();
        let killed = handle_request(&ctx, 1, &negotiated, &rpc("3", "<kill-session><session-id>2</session-id></kill-session>"));
        assert!(!killed.is_error);
        assert_eq!(ctx.locks.holder(Datastore::Running), None);
    }

    #[test]
    fn test_close_session_outcome() {
        let handled = handle_request(&ctx(), 1, &caps(&[]), &rpc("9", "<close-session/>"));
        assert_eq!(handled.outcome, Outcome::Close);
        assert_eq!(handled.reply.reply_content(), ReplyContent::Ok);
    }

    #[test]
    fn test_custom_handler_and_panic() {
        let mut handlers = HandlerRegistry::new();
        handlers
            .register("ping", |_: u32, _: &XmlElement| -> HandlerResult {
                Ok(ReplyContent::Raw(vec![XmlElement::new("pong")]))
            })
            .register("crash", |_: u32, _: &XmlElement| -> HandlerResult {
                panic!("handler bug")
            });
        let ctx = ctx().with_handlers(handlers);

        let pong = handle_request(&ctx, 1, &caps(&[]), &rpc("1", "<ping/>"));
        assert_eq!(
            pong.reply.reply_content(),
            ReplyContent::Raw(vec![XmlElement::new("pong")])
        );

        let crashed = handle_request(&ctx, 1, &caps(&[]), &rpc("2", "<crash/>"));
        assert_eq!(crashed.reply.message_id(), Some("2"));
        assert_eq!(errors(&crashed)[0].tag, ErrorTag::OperationFailed);
    }

    #[test]
    fn test_unsupported_with_defaults_mode_rejected() {
        let ctx = ctx()
            .with_basic_mode(Some(WithDefaultsMode::Explicit))
            .with_also_supported(vec![WithDefaultsMode::Trim]);
        let negotiated = caps(&[uri::WITH_DEFAULTS]);
        let get = |id: &str, mode: &str| {
            rpc(
                id,
                &format!(
                    r#"<get><with-defaults xmlns="urn:ietf:params:xml:ns:yang:ietf-netconf-with-defaults">{mode}</with-defaults></get>"#
                ),
            )
        };

        let trimmed = handle_request(&ctx, 1, &negotiated, &get("1", "trim"));
        assert!(!trimmed.is_error);

        let rejected = handle_request(&ctx, 1, &negotiated, &get("2", "report-all"));
        assert_eq!(rejected.reply.message_id(), Some("2"));
        let error = &errors(&rejected)[0];
        assert_eq!(error.tag, ErrorTag::InvalidValue);
        assert_eq!(error.info_value("bad-element"), Some("with-defaults"));

        // The basic mode itself and requests without a mode are accepted
        assert!(!handle_request(&ctx, 1, &negotiated, &get("3", "explicit")).is_error);
        assert!(!handle_request(&ctx, 1, &negotiated, &rpc("4", "<get/>")).is_error);
    }

    #[test]
    fn test_commit_needs_candidate() {
        let ctx = ctx();
        let without = handle_request(&ctx, 1, &caps(&[]), &rpc("1", "<commit/>"));
        assert!(without.is_error);
        let with = handle_request(&ctx, 1, &caps(&[uri::CANDIDATE]), &rpc("2", "<commit/>"));
        assert!(!with.is_error);
    }
}
