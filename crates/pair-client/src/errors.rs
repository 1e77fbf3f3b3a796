//! Session coordinator error types.
//!
//! Nothing here is fatal to the process. The worst outcome the presentation
//! layer ever sees is a screen stuck in "waiting" or "connecting", or a
//! return to the init screen with a [`SessionFailure`] attached.

use crate::peer::CallError;
use thiserror::Error;

/// Session coordinator error type.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A command was issued before its inputs were ready.
    #[error("Precondition not met: {0}")]
    PreconditionNotMet(Precondition),

    /// The signaling channel is gone; the session returned to init.
    #[error("Signaling channel lost: {0}")]
    ChannelLost(String),

    /// A call to or from the partner failed before a remote stream arrived.
    #[error("Call negotiation failed: {0}")]
    CallNegotiation(String),

    /// The coordinator actor is not reachable.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Inputs a command needs before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Precondition {
    /// No matched session is active.
    #[error("no active session")]
    NoActiveSession,

    /// The identity provider has not assigned a participant id yet.
    #[error("local participant id not assigned")]
    LocalIdUnavailable,

    /// The local media stream is not available.
    #[error("local media stream unavailable")]
    MediaUnavailable,
}

/// Failures surfaced to the user when the coordinator falls back to init
/// or refuses to start searching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFailure {
    /// Camera/microphone stream was not ready.
    MediaUnavailable,
    /// Signaling channel disconnected.
    ChannelLost,
    /// No match arrived within the search timeout.
    SearchTimedOut,
    /// No remote stream arrived within the call timeout.
    CallTimedOut,
    /// The other participant left the session.
    PeerLeft,
}

impl SessionFailure {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SessionFailure::MediaUnavailable => "media_unavailable",
            SessionFailure::ChannelLost => "channel_lost",
            SessionFailure::SearchTimedOut => "search_timed_out",
            SessionFailure::CallTimedOut => "call_timed_out",
            SessionFailure::PeerLeft => "peer_left",
        }
    }

    /// Text for the init screen after falling back.
    #[must_use]
    pub const fn client_message(&self) -> &'static str {
        match self {
            SessionFailure::MediaUnavailable => "Camera or microphone is not available",
            SessionFailure::ChannelLost => "Connection lost, please try again",
            SessionFailure::SearchTimedOut => "Nobody is around right now, try again",
            SessionFailure::CallTimedOut => "Could not connect to your partner",
            SessionFailure::PeerLeft => "Your partner left",
        }
    }
}

impl SessionError {
    /// Returns a presentation-safe message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SessionError::PreconditionNotMet(Precondition::NoActiveSession) => {
                "You are not connected to anyone yet".to_string()
            }
            SessionError::PreconditionNotMet(Precondition::LocalIdUnavailable) => {
                "Still connecting, please wait".to_string()
            }
            SessionError::PreconditionNotMet(Precondition::MediaUnavailable) => {
                "Camera or microphone is not available".to_string()
            }
            SessionError::ChannelLost(_) => "Connection lost, please try again".to_string(),
            SessionError::CallNegotiation(_) => "Still connecting to your partner".to_string(),
            SessionError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<Precondition> for SessionError {
    fn from(precondition: Precondition) -> Self {
        SessionError::PreconditionNotMet(precondition)
    }
}

impl From<CallError> for SessionError {
    fn from(err: CallError) -> Self {
        SessionError::CallNegotiation(err.to_string())
    }
}
