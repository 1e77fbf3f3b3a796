//! Message types for the session coordinator mailbox.
//!
//! Every stimulus the coordinator reacts to arrives as one of these
//! messages, so ordering is simply mailbox order. Request-reply commands
//! carry a `tokio::sync::oneshot` sender.

use crate::chat::ChatEntry;
use crate::errors::{SessionError, SessionFailure};
use crate::media::MediaHandle;
use crate::peer::{CallDirection, CallError, IncomingCall};
use crate::registry::StreamEntry;
use crate::signaling::InboundEvent;
use common::types::{ParticipantId, SessionId};
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Messages sent to `SessionCoordinator`.
#[derive(Debug)]
pub enum CoordinatorMessage {
    /// User pressed "connect" (or "next" while in a call).
    RequestConnection {
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// User submitted a chat line.
    SubmitChat {
        text: String,
        respond_to: oneshot::Sender<Result<(), SessionError>>,
    },

    /// Event from the signaling channel.
    Signaling(InboundEvent),

    /// The identity provider assigned our participant id.
    LocalIdAssigned(ParticipantId),

    /// The media source produced the local stream.
    MediaReady(MediaHandle),

    /// The identity provider delivered an inbound call.
    IncomingCall(IncomingCall),

    /// An outbound call or an answer finished.
    CallCompleted {
        generation: u64,
        remote: ParticipantId,
        direction: CallDirection,
        result: Result<MediaHandle, CallError>,
    },

    /// The grace delay before an outbound call elapsed.
    GraceElapsed {
        generation: u64,
        remote: ParticipantId,
    },

    /// The search timer fired.
    SearchTimeout { generation: u64 },

    /// The call timer fired.
    CallTimeout { generation: u64 },

    /// Read the presentation state.
    GetSnapshot {
        respond_to: oneshot::Sender<SessionSnapshot>,
    },
}

impl CoordinatorMessage {
    /// Bounded label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorMessage::RequestConnection { .. } => "request_connection",
            CoordinatorMessage::SubmitChat { .. } => "submit_chat",
            CoordinatorMessage::Signaling(event) => event.name(),
            CoordinatorMessage::LocalIdAssigned(_) => "local_id_assigned",
            CoordinatorMessage::MediaReady(_) => "media_ready",
            CoordinatorMessage::IncomingCall(_) => "incoming_call",
            CoordinatorMessage::CallCompleted { .. } => "call_completed",
            CoordinatorMessage::GraceElapsed { .. } => "grace_elapsed",
            CoordinatorMessage::SearchTimeout { .. } => "search_timeout",
            CoordinatorMessage::CallTimeout { .. } => "call_timeout",
            CoordinatorMessage::GetSnapshot { .. } => "get_snapshot",
        }
    }
}

/// Which screen the presentation layer should show.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionScreenState {
    /// "connect" button.
    #[default]
    Init,
    /// "waiting for a match..."
    Searching,
    /// Players and chat.
    InCall,
}

/// Everything the presentation layer renders.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub screen_state: SessionScreenState,
    pub local_id: Option<ParticipantId>,
    pub session_id: Option<SessionId>,
    /// The paired participant, once known.
    pub remote_id: Option<ParticipantId>,
    /// Full registry view.
    pub players: HashMap<ParticipantId, StreamEntry>,
    /// The local participant's entry (`self_view`).
    pub my_player: Option<StreamEntry>,
    /// Every entry except the local participant's (`others_view`).
    pub other_players: HashMap<ParticipantId, StreamEntry>,
    /// Chat log in processing order.
    pub chat: Vec<ChatEntry>,
    /// Why the coordinator last fell back to init, if it did.
    pub last_failure: Option<SessionFailure>,
    /// Most recent failed call in the current session. Not fatal; the call
    /// timer decides when to give up.
    pub call_error: Option<SessionError>,
}
