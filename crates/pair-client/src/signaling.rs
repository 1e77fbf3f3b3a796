//! Signaling channel contract.
//!
//! Events travel as JSON objects of the form `{"event": "<name>", "payload": ...}`
//! with kebab-case event names. Outbound events go through a
//! [`SignalingChannel`]; inbound events are pushed into the coordinator with
//! `SessionCoordinatorHandle::signaling_event`.
//!
//! | Direction | Event | Payload |
//! |-----------|-------|---------|
//! | out | `find-match` | none |
//! | in  | `match-found` | session id or `null` |
//! | out | `join-session` | `[local_id, session_id]` |
//! | in  | `peer-joined` | remote id |
//! | out | `message-sent` | `[session_id, local_id, text]` |
//! | in  | `message-sent` | `[remote_id, text]` |
//! | in  | `peer-left` | remote id |

use common::types::{ParticipantId, SessionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events this client sends to the matchmaking/session server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum OutboundEvent {
    /// Ask to be paired with someone.
    FindMatch,
    /// Acknowledge the pairing and join the session.
    JoinSession(ParticipantId, SessionId),
    /// Relay a chat line to the other member of the session.
    MessageSent(SessionId, ParticipantId, String),
}

impl OutboundEvent {
    /// Wire name, also used as a bounded metric/log label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            OutboundEvent::FindMatch => "find-match",
            OutboundEvent::JoinSession(..) => "join-session",
            OutboundEvent::MessageSent(..) => "message-sent",
        }
    }
}

/// Events delivered by the server (plus local transport notifications).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum InboundEvent {
    /// A pairing was made, or matchmaking was cancelled (`None`).
    MatchFound(Option<SessionId>),
    /// The other participant joined the session.
    PeerJoined(ParticipantId),
    /// Chat line from the other participant.
    MessageSent(ParticipantId, String),
    /// The other participant left the session.
    PeerLeft(ParticipantId),
    /// The transport dropped. Raised locally by the channel adapter,
    /// never received from the server.
    #[serde(skip)]
    Disconnected,
}

impl InboundEvent {
    /// Wire name, also used as a bounded metric/log label.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            InboundEvent::MatchFound(_) => "match-found",
            InboundEvent::PeerJoined(_) => "peer-joined",
            InboundEvent::MessageSent(..) => "message-sent",
            InboundEvent::PeerLeft(_) => "peer-left",
            InboundEvent::Disconnected => "disconnected",
        }
    }
}

/// Signaling transport errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    /// The channel is closed; nothing more can be sent.
    #[error("signaling channel closed")]
    Closed,

    /// The transport rejected the event.
    #[error("signaling send failed: {0}")]
    Send(String),
}

/// Encode one event as a JSON text frame.
///
/// # Errors
///
/// `PairlineError::Serialization` for events with no wire form
/// (`InboundEvent::Disconnected`).
pub fn encode_frame<T: Serialize>(event: &T) -> common::error::Result<String> {
    Ok(serde_json::to_string(event)?)
}

/// Decode one JSON text frame.
///
/// # Errors
///
/// `PairlineError::Serialization` for malformed frames and unknown events.
pub fn decode_frame<T: DeserializeOwned>(frame: &str) -> common::error::Result<T> {
    Ok(serde_json::from_str(frame)?)
}

/// Outbound half of the signaling channel.
#[async_trait::async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send one event to the server.
    async fn send(&self, event: OutboundEvent) -> Result<(), SignalingError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::error::PairlineError;
    use serde_json::json;

    #[test]
    fn test_frame_codec() {
        let frame = encode_frame(&OutboundEvent::JoinSession(
            ParticipantId::new("alice"),
            SessionId::new("room1"),
        ))
        .unwrap();
        assert_eq!(frame, r#"{"event":"join-session","payload":["alice","room1"]}"#);

        let event: InboundEvent = decode_frame(r#"{"event":"peer-left","payload":"bob"}"#).unwrap();
        assert_eq!(event, InboundEvent::PeerLeft(ParticipantId::new("bob")));
    }

    #[test]
    fn test_frame_codec_errors() {
        let err = decode_frame::<InboundEvent>(r#"{"event":"teleport"}"#).unwrap_err();
        assert!(matches!(err, PairlineError::Serialization(_)));

        let err = encode_frame(&InboundEvent::Disconnected).unwrap_err();
        assert!(matches!(err, PairlineError::Serialization(_)));
    }

    #[test]
    fn test_outbound_wire_format() {
        assert_eq!(
            serde_json::to_value(OutboundEvent::FindMatch).unwrap(),
            json!({"event": "find-match"})
        );
        assert_eq!(
            serde_json::to_value(OutboundEvent::JoinSession(
                ParticipantId::new("alice"),
                SessionId::new("room1"),
            ))
            .unwrap(),
            json!({"event": "join-session", "payload": ["alice", "room1"]})
        );
        assert_eq!(
            serde_json::to_value(OutboundEvent::MessageSent(
                SessionId::new("room1"),
                ParticipantId::new("alice"),
                "hi".to_string(),
            ))
            .unwrap(),
            json!({"event": "message-sent", "payload": ["room1", "alice", "hi"]})
        );
    }

    #[test]
    fn test_inbound_match_found_accepts_null() {
        let event: InboundEvent =
            serde_json::from_value(json!({"event": "match-found", "payload": null})).unwrap();
        assert_eq!(event, InboundEvent::MatchFound(None));

        let event: InboundEvent =
            serde_json::from_value(json!({"event": "match-found", "payload": "room1"})).unwrap();
        assert_eq!(event, InboundEvent::MatchFound(Some(SessionId::new("room1"))));
    }

    #[test]
    fn test_inbound_chat_and_presence() {
        let event: InboundEvent =
            serde_json::from_value(json!({"event": "message-sent", "payload": ["bob", "yo"]}))
                .unwrap();
        assert_eq!(
            event,
            InboundEvent::MessageSent(ParticipantId::new("bob"), "yo".to_string())
        );

        let event: InboundEvent =
            serde_json::from_value(json!({"event": "peer-joined", "payload": "bob"})).unwrap();
        assert_eq!(event, InboundEvent::PeerJoined(ParticipantId::new("bob")));
    }

    #[test]
    fn test_disconnected_is_not_a_wire_event() {
        let result =
            serde_json::from_value::<InboundEvent>(json!({"event": "disconnected"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_event_names() {
        assert_eq!(OutboundEvent::FindMatch.name(), "find-match");
        assert_eq!(InboundEvent::Disconnected.name(), "disconnected");
        assert_eq!(
            InboundEvent::PeerLeft(ParticipantId::new("x")).name(),
            "peer-left"
        );
    }
}
