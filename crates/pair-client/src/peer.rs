//! Peer connection capability.
//!
//! The identity provider owns transport negotiation. The core only sees two
//! operations: place a call and get the remote stream back, or answer an
//! inbound call with the local stream and get the remote stream back.

use crate::media::MediaHandle;
use common::types::ParticipantId;
use std::fmt;
use thiserror::Error;

/// Errors from the peer connection capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The remote participant is not reachable.
    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    /// The call was hung up before a stream arrived.
    #[error("call closed before a remote stream arrived")]
    Closed,

    /// Transport negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),
}

/// Outbound calls (`peer.call(remote, stream)` in the identity provider).
#[async_trait::async_trait]
pub trait PeerConnector: Send + Sync {
    /// Call `remote` with `local_stream`; resolves with the remote stream.
    async fn call(
        &self,
        remote: &ParticipantId,
        local_stream: MediaHandle,
    ) -> Result<MediaHandle, CallError>;
}

/// Answer side of one inbound call.
#[async_trait::async_trait]
pub trait CallAnswerer: Send {
    /// Answer with `local_stream`; resolves with the remote stream.
    async fn answer(&mut self, local_stream: MediaHandle) -> Result<MediaHandle, CallError>;

    /// Decline the call without answering.
    fn decline(&mut self) {}
}

/// An inbound call delivered by the identity provider.
pub struct IncomingCall {
    remote: ParticipantId,
    answerer: Box<dyn CallAnswerer>,
}

impl IncomingCall {
    #[must_use]
    pub fn new(remote: ParticipantId, answerer: Box<dyn CallAnswerer>) -> Self {
        Self { remote, answerer }
    }

    /// The caller's participant id.
    #[must_use]
    pub fn remote(&self) -> &ParticipantId {
        &self.remote
    }

    /// Answer with the local stream.
    pub async fn answer(mut self, local_stream: MediaHandle) -> Result<MediaHandle, CallError> {
        self.answerer.answer(local_stream).await
    }

    /// Decline without answering.
    pub fn decline(mut self) {
        self.answerer.decline();
    }
}

impl fmt::Debug for IncomingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IncomingCall")
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

/// Call direction, for logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallDirection {
    /// We placed the call.
    Outbound,
    /// We answered the call.
    Inbound,
}

impl CallDirection {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Outbound => "outbound",
            CallDirection::Inbound => "inbound",
        }
    }
}
