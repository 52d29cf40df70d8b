//! Client-side request/reply correlation.
//!
//! A session has at most one outstanding request. Message-ids are decimal
//! strings from a monotonically increasing counter. When a request times out
//! its id is remembered as abandoned so that a late reply can be skipped
//! instead of being mistaken for the answer to the next request.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::message::{Message, MessageType};
use crate::error::{NetconfError, Result};

/// Maximum remembered abandoned ids before the oldest are forgotten.
const MAX_ABANDONED: usize = 64;

/// How an inbound reply relates to the outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Reply to the outstanding request
    Matched,
    /// Late reply to an abandoned request; discard and keep reading
    Stale,
}

/// Message-id allocation and pending-reply tracking.
#[derive(Debug)]
pub struct RpcDispatcher {
    next_id: AtomicU64,
    pending: Option<String>,
    abandoned: HashSet<String>,
    abandoned_order: Vec<String>,
    timeout: Duration,
}

impl RpcDispatcher {
    /// Dispatcher waiting at most `timeout` for each reply.
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: None,
            abandoned: HashSet::new(),
            abandoned_order: Vec::new(),
            timeout,
        }
    }

    /// Reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Allocate a fresh message-id. Never returns the same id twice.
    pub fn next_message_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Id of the outstanding request, if any.
    pub fn pending(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Register `message_id` as the outstanding request.
    pub fn begin(&mut self, message_id: String) -> Result<()> {
        if let Some(current) = &self.pending {
            return Err(NetconfError::Protocol(format!(
                "request {current} still awaiting its reply"
            )));
        }
        if self.abandoned.contains(&message_id) {
            return Err(NetconfError::Protocol(format!(
                "message-id {message_id} reused before its reply resolved"
            )));
        }
        self.pending = Some(message_id);
        Ok(())
    }

    /// Match an inbound message against the outstanding request.
    ///
    /// On a mismatch the outstanding request is abandoned and an error is
    /// returned; its reply, should it still arrive, will be skipped.
    pub fn correlate(&mut self, reply: &Message) -> Result<Correlation> {
        if reply.msg_type != MessageType::RpcReply {
            self.abandon();
            return Err(NetconfError::Protocol(format!(
                "expected rpc-reply, received {:?}",
                reply.msg_type
            )));
        }

        let id = reply.message_id();
        if let Some(id) = id {
            if self.abandoned.remove(id) {
                self.abandoned_order.retain(|a| a != id);
                tracing::debug!(message_id = id, "discarding late reply");
                return Ok(Correlation::Stale);
            }
        }

        match (&self.pending, id) {
            (Some(pending), Some(id)) if pending == id => {
                self.pending = None;
                Ok(Correlation::Matched)
            },
            (Some(_), None) => {
                // Peer could not parse the request and sent an anonymous error.
                self.pending = None;
                Ok(Correlation::Matched)
            },
            (pending, id) => {
                let err = NetconfError::Protocol(format!(
                    "reply message-id {} does not match pending {}",
                    id.unwrap_or("<none>"),
                    pending.as_deref().unwrap_or("<none>")
                ));
                self.abandon();
                Err(err)
            },
        }
    }

    /// Give up on the outstanding request.
    pub fn abandon(&mut self) {
        if let Some(id) = self.pending.take() {
            tracing::debug!(message_id = %id, "abandoning request");
            if self.abandoned_order.len() >= MAX_ABANDONED {
                let oldest = self.abandoned_order.remove(0);
                self.abandoned.remove(&oldest);
            }
            self.abandoned.insert(id.clone());
            self.abandoned_order.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ReplyContent, XmlElement};
    use std::sync::Arc;
    use std::thread;

    fn reply(id: &str) -> Message {
        Message::reply(&[("message-id".to_string(), id.to_string())], ReplyContent::Ok)
    }

    #[test]
    fn test_ids_are_monotonic() {
        let d = RpcDispatcher::new(Duration::from_secs(1));
        assert_eq!(d.next_message_id(), "1");
        assert_eq!(d.next_message_id(), "2");
    }

    #[test]
    fn test_concurrent_ids_unique() {
        let d = Arc::new(RpcDispatcher::new(Duration::from_secs(1)));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let d = Arc::clone(&d);
                thread::spawn(move || (0..500).map(|_| d.next_message_id()).collect::<Vec<_>>())
            })
            .collect();
        let mut all = HashSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(all.insert(id), "duplicate message-id");
            }
        }
        assert_eq!(all.len(), 4000);
    }

    #[test]
    fn test_single_outstanding_request() {
        let mut d = RpcDispatcher::new(Duration::from_secs(1));
        d.begin("1".to_string()).unwrap();
        assert!(d.begin("2".to_string()).is_err());
        assert_eq!(d.correlate(&reply("1")).unwrap(), Correlation::Matched);
        assert!(d.pending().is_none());
        d.begin("2".to_string()).unwrap();
    }

    #[test]
    fn test_late_reply_is_stale() {
        let mut d = RpcDispatcher::new(Duration::from_secs(1));
        d.begin("1".to_string()).unwrap();
        d.abandon();
        d.begin("2".to_string()).unwrap();

        assert_eq!(d.correlate(&reply("1")).unwrap(), Correlation::Stale);
        assert_eq!(d.correlate(&reply("2")).unwrap(), Correlation::Matched);
    }

    #[test]
    fn test_mismatched_reply_is_error() {
        let mut d = RpcDispatcher::new(Duration::from_secs(1));
        d.begin("5".to_string()).unwrap();
        assert!(matches!(
            d.correlate(&reply("9")),
            Err(NetconfError::Protocol(_))
        ));
        // The abandoned request's reply is skipped later on
        assert_eq!(d.correlate(&reply("5")).unwrap(), Correlation::Stale);
    }

    #[test]
    fn test_rpc_instead_of_reply_is_error() {
        let mut d = RpcDispatcher::new(Duration::from_secs(1));
        d.begin("1".to_string()).unwrap();
        let rpc = Message::rpc("1", XmlElement::new("get"));
        assert!(d.correlate(&rpc).is_err());
        assert!(d.pending().is_none());
    }
}
