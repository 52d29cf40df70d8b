//! Client operations on an established [`Session`].
//!
//! Every operation validates datastores, URLs and with-defaults against the
//! negotiated capabilities before touching the channel. Peer `rpc-error`s are
//! returned as [`NetconfError::Rpc`].

use super::message::ReplyContent;
use super::operation::{Operation, WithDefaultsMode};
use super::session::Session;
use super::xml::XmlElement;
use crate::datastore::{ConfigSource, ConfigTarget, Datastore, EditOptions};
use crate::error::{NetconfError, Result};

fn expect_ok(operation: &str, content: ReplyContent) -> Result<()> {
    match content {
        ReplyContent::Ok => Ok(()),
        other => Err(NetconfError::Protocol(format!(
            "expected <ok/> in reply to {operation}, got {other:?}"
        ))),
    }
}

fn expect_data(operation: &str, content: ReplyContent) -> Result<Vec<XmlElement>> {
    match content {
        ReplyContent::Data(data) => Ok(data),
        other => Err(NetconfError::Protocol(format!(
            "expected <data> in reply to {operation}, got {other:?}"
        ))),
    }
}

impl Session {
    /// `<get>`: running configuration and state data.
    pub async fn get(
        &mut self,
        filter: Option<XmlElement>,
        with_defaults: Option<WithDefaultsMode>,
    ) -> Result<Vec<XmlElement>> {
        let reply = self
            .request(Operation::Get {
                filter,
                with_defaults,
            })
            .await?;
        expect_data("get", reply)
    }

    /// `<get-config>` from `source`.
    pub async fn get_config(
        &mut self,
        source: Datastore,
        filter: Option<XmlElement>,
        with_defaults: Option<WithDefaultsMode>,
    ) -> Result<Vec<XmlElement>> {
        let reply = self
            .request(Operation::GetConfig {
                source,
                filter,
                with_defaults,
            })
            .await?;
        expect_data("get-config", reply)
    }

    /// `<edit-config>` applying `config` (inline or URL) to `target`.
    pub async fn edit_config(
        &mut self,
        target: impl Into<ConfigTarget>,
        config: ConfigSource,
        options: EditOptions,
    ) -> Result<()> {
        if matches!(config, ConfigSource::Datastore(_)) {
            return Err(NetconfError::InvalidMessage(
                "edit-config takes inline config or a URL".to_string(),
            ));
        }
        let reply = self
            .request(Operation::EditConfig {
                target: target.into(),
                source: config,
                options,
            })
            .await?;
        expect_ok("edit-config", reply)
    }

    /// `<copy-config>` replacing `target` with `source`.
    pub async fn copy_config(
        &mut self,
        target: impl Into<ConfigTarget>,
        source: impl Into<ConfigSource>,
        with_defaults: Option<WithDefaultsMode>,
    ) -> Result<()> {
        let reply = self
            .request(Operation::CopyConfig {
                target: target.into(),
                source: source.into(),
                with_defaults,
            })
            .await?;
        expect_ok("copy-config", reply)
    }

    /// `<delete-config>`.
    pub async fn delete_config(&mut self, target: impl Into<ConfigTarget>) -> Result<()> {
        let reply = self
            .request(Operation::DeleteConfig {
                target: target.into(),
            })
            .await?;
        expect_ok("delete-config", reply)
    }

    /// `<lock>`. A denial carries the holder's session id in the rpc-error.
    pub async fn lock(&mut self, target: Datastore) -> Result<()> {
        let reply = self.request(Operation::Lock { target }).await?;
        expect_ok("lock", reply)
    }

    /// `<unlock>`.
    pub async fn unlock(&mut self, target: Datastore) -> Result<()> {
        let reply = self.request(Operation::Unlock { target }).await?;
        expect_ok("unlock", reply)
    }

    /// `<kill-session>` terminating another session.
    pub async fn kill_session(&mut self, session_id: u32) -> Result<()> {
        if session_id == 0 {
            return Err(NetconfError::InvalidMessage(
                "session-id 0 is not a valid session".to_string(),
            ));
        }
        let reply = self.request(Operation::KillSession { session_id }).await?;
        expect_ok("kill-session", reply)
    }

    /// `<close-session>`; the session is closed afterwards whatever the reply.
    pub async fn close_session(&mut self) -> Result<()> {
        let result = self
            .request(Operation::CloseSession)
            .await
            .and_then(|reply| expect_ok("close-session", reply));
        self.teardown("close-session").await;
        result
    }

    /// `<commit>` the candidate into running.
    pub async fn commit(&mut self) -> Result<()> {
        let reply = self.request(Operation::Commit).await?;
        expect_ok("commit", reply)
    }

    /// `<discard-changes>` reverting the candidate.
    pub async fn discard_changes(&mut self) -> Result<()> {
        let reply = self.request(Operation::DiscardChanges).await?;
        expect_ok("discard-changes", reply)
    }

    /// Send an arbitrary operation element and return the reply content.
    pub async fn rpc(&mut self, operation: XmlElement) -> Result<ReplyContent> {
        match Operation::from_element(&operation) {
            Ok(op) => self.request(op).await,
            Err(e) => Err(NetconfError::Rpc(vec![e])),
        }
    }
}
