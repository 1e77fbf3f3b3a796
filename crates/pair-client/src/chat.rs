//! Session-scoped chat relay.
//!
//! Keeps one ordered log per session. Local sends are echoed into the log as
//! soon as the signaling channel accepts them, without waiting for any
//! acknowledgement. Entries are ordered by processing order only.

use crate::errors::{Precondition, SessionError};
use crate::signaling::{OutboundEvent, SignalingChannel};
use chrono::{DateTime, Utc};
use common::types::{ParticipantId, SessionId};
use tracing::debug;

/// One line of chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    /// Message text.
    pub content: String,
    /// Who wrote it.
    pub sender_peer_id: ParticipantId,
    /// Local processing time, for display only.
    pub received_at: DateTime<Utc>,
}

/// Ordered chat log for the current session.
#[derive(Debug, Default)]
pub struct ChatRelay {
    session: Option<SessionId>,
    log: Vec<ChatEntry>,
}

impl ChatRelay {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh log for `session_id`.
    pub fn begin_session(&mut self, session_id: SessionId) {
        self.log.clear();
        self.session = Some(session_id);
    }

    /// Drop the log of the session that just ended.
    pub fn end_session(&mut self) {
        self.log.clear();
        self.session = None;
    }

    /// Send `text` to the other member of `session_id` and echo it locally.
    ///
    /// # Errors
    ///
    /// `PreconditionNotMet` if there is no session or no local id; nothing is
    /// sent and nothing is logged. `ChannelLost` if the channel refuses the
    /// event; nothing is logged.
    pub async fn send(
        &mut self,
        signaling: &dyn SignalingChannel,
        session_id: Option<&SessionId>,
        local_id: Option<&ParticipantId>,
        text: String,
    ) -> Result<(), SessionError> {
        let session_id = session_id.ok_or(Precondition::NoActiveSession)?;
        let local_id = local_id.ok_or(Precondition::LocalIdUnavailable)?;

        signaling
            .send(OutboundEvent::MessageSent(
                session_id.clone(),
                local_id.clone(),
                text.clone(),
            ))
            .await
            .map_err(|e| SessionError::ChannelLost(e.to_string()))?;

        debug!(
            target: "pair.chat",
            session_id = %session_id,
            length = text.len(),
            "Chat message sent"
        );
        self.append(text, local_id.clone());
        Ok(())
    }

    /// Append a line received from `peer_id`.
    ///
    /// Returns `false` if no session is active and the line was dropped.
    pub fn on_receive(&mut self, peer_id: ParticipantId, text: String) -> bool {
        if self.session.is_none() {
            debug!(
                target: "pair.chat",
                peer_id = %peer_id,
                "Dropping chat message received outside a session"
            );
            return false;
        }

        self.append(text, peer_id);
        true
    }

    /// The log in processing order.
    #[must_use]
    pub fn entries(&self) -> &[ChatEntry] {
        &self.log
    }

    fn append(&mut self, content: String, sender_peer_id: ParticipantId) {
        self.log.push(ChatEntry {
            content,
            sender_peer_id,
            received_at: Utc::now(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::signaling::SignalingError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<OutboundEvent>>,
        closed: bool,
    }

    #[async_trait::async_trait]
    impl SignalingChannel for Recorder {
        async fn send(&self, event: OutboundEvent) -> Result<(), SignalingError> {
            if self.closed {
                return Err(SignalingError::Closed);
            }
            self.sent.lock().unwrap().push(event);
            Ok(())
        }
    }

    fn contents(relay: &ChatRelay) -> Vec<(&str, &str)> {
        relay
            .entries()
            .iter()
            .map(|e| (e.content.as_str(), e.sender_peer_id.as_str()))
            .collect()
    }

    #[tokio::test]
    async fn test_send_then_receive_keeps_processing_order() {
        let signaling = Recorder::default();
        let session = SessionId::new("room1");
        let me = ParticipantId::new("alice");

        let mut relay = ChatRelay::new();
        relay.begin_session(session.clone());

        relay
            .send(&signaling, Some(&session), Some(&me), "hi".to_string())
            .await
            .unwrap();
        relay.on_receive(ParticipantId::new("bob"), "yo".to_string());

        assert_eq!(contents(&relay), vec![("hi", "alice"), ("yo", "bob")]);
        assert_eq!(
            signaling.sent.lock().unwrap().as_slice(),
            &[OutboundEvent::MessageSent(
                session,
                me,
                "hi".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_send_without_session_fails_cleanly() {
        let signaling = Recorder::default();
        let mut relay = ChatRelay::new();

        let result = relay
            .send(
                &signaling,
                None,
                Some(&ParticipantId::new("alice")),
                "hello".to_string(),
            )
            .await;

        assert!(matches!(
            result,
            Err(SessionError::PreconditionNotMet(Precondition::NoActiveSession))
        ));
        assert!(relay.entries().is_empty());
        assert!(signaling.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_without_local_id_fails_cleanly() {
        let signaling = Recorder::default();
        let session = SessionId::new("room1");
        let mut relay = ChatRelay::new();
        relay.begin_session(session.clone());

        let result = relay
            .send(&signaling, Some(&session), None, "hello".to_string())
            .await;

        assert!(matches!(
            result,
            Err(SessionError::PreconditionNotMet(Precondition::LocalIdUnavailable))
        ));
        assert!(relay.entries().is_empty());
    }

    #[tokio::test]
    async fn test_send_on_closed_channel_does_not_echo() {
        let signaling = Recorder {
            closed: true,
            ..Recorder::default()
        };
        let session = SessionId::new("room1");
        let mut relay = ChatRelay::new();
        relay.begin_session(session.clone());

        let result = relay
            .send(
                &signaling,
                Some(&session),
                Some(&ParticipantId::new("alice")),
                "hello".to_string(),
            )
            .await;

        assert!(matches!(result, Err(SessionError::ChannelLost(_))));
        assert!(relay.entries().is_empty());
    }

    #[test]
    fn test_receive_is_not_deduplicated() {
        let mut relay = ChatRelay::new();
        relay.begin_session(SessionId::new("room1"));

        relay.on_receive(ParticipantId::new("bob"), "yo".to_string());
        relay.on_receive(ParticipantId::new("bob"), "yo".to_string());
        assert_eq!(relay.entries().len(), 2);
    }

    #[test]
    fn test_receive_outside_session_is_dropped() {
        let mut relay = ChatRelay::new();
        assert!(!relay.on_receive(ParticipantId::new("bob"), "yo".to_string()));
        assert!(relay.entries().is_empty());
    }

    #[test]
    fn test_new_session_starts_fresh_log() {
        let mut relay = ChatRelay::new();
        relay.begin_session(SessionId::new("room1"));
        relay.on_receive(ParticipantId::new("bob"), "yo".to_string());

        relay.begin_session(SessionId::new("room2"));
        assert!(relay.entries().is_empty());

        relay.on_receive(ParticipantId::new("carol"), "hey".to_string());
        relay.end_session();
        assert!(relay.entries().is_empty());
    }
}
