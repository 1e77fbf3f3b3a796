//! Mock peer connection capability.
//!
//! `MockPeerConnector` can be configured to:
//! - Accept calls and return a stream labelled `remote:<id>`
//! - Fail every call with a negotiation error
//! - Take a fixed time before completing
//!
//! `MockAnswerer` builds [`IncomingCall`]s whose outcome can be inspected
//! through an [`AnswerOutcome`].
//!
//! # Example
//!
//! ```rust,ignore
//! use pair_test_utils::MockPeerConnector;
//!
//! let connector = MockPeerConnector::builder()
//!     .with_latency(Duration::from_millis(500))
//!     .build();
//! ```

use common::types::ParticipantId;
use pair_client::media::MediaHandle;
use pair_client::peer::{CallAnswerer, CallError, IncomingCall, PeerConnector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Scripted outbound call capability.
#[derive(Debug, Default)]
pub struct MockPeerConnector {
    fail: bool,
    latency: Option<Duration>,
    calls: Mutex<Vec<ParticipantId>>,
}

impl MockPeerConnector {
    /// Create a new MockPeerConnector builder.
    #[must_use]
    pub fn builder() -> MockPeerConnectorBuilder {
        MockPeerConnectorBuilder::default()
    }

    /// A connector that accepts immediately.
    #[must_use]
    pub fn accepting() -> Arc<Self> {
        Self::builder().build()
    }

    /// Participants called so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<ParticipantId> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls placed.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl PeerConnector for MockPeerConnector {
    async fn call(
        &self,
        remote: &ParticipantId,
        _local_stream: MediaHandle,
    ) -> Result<MediaHandle, CallError> {
        self.calls.lock().unwrap().push(remote.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.fail {
            return Err(CallError::Negotiation("mock negotiation failure".to_string()));
        }
        Ok(MediaHandle::new(format!("remote:{remote}")))
    }
}

/// Builder for MockPeerConnector configuration.
#[derive(Debug, Default)]
pub struct MockPeerConnectorBuilder {
    fail: bool,
    latency: Option<Duration>,
}

impl MockPeerConnectorBuilder {
    /// Fail every call.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Delay every call by `latency`.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Build the MockPeerConnector.
    #[must_use]
    pub fn build(self) -> Arc<MockPeerConnector> {
        Arc::new(MockPeerConnector {
            fail: self.fail,
            latency: self.latency,
            calls: Mutex::new(Vec::new()),
        })
    }
}

/// What happened to a call built by [`MockAnswerer`].
#[derive(Debug, Clone, Default)]
pub struct AnswerOutcome {
    answered: Arc<AtomicBool>,
    declined: Arc<AtomicBool>,
}

impl AnswerOutcome {
    #[must_use]
    pub fn answered(&self) -> bool {
        self.answered.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn declined(&self) -> bool {
        self.declined.load(Ordering::SeqCst)
    }
}

/// Answer side of a scripted inbound call.
#[derive(Debug)]
pub struct MockAnswerer {
    remote_stream: MediaHandle,
    latency: Option<Duration>,
    outcome: AnswerOutcome,
}

impl MockAnswerer {
    /// An inbound call from `remote` that succeeds with `remote:<id>`.
    #[must_use]
    pub fn incoming(remote: &str) -> (IncomingCall, AnswerOutcome) {
        Self::incoming_with_latency(remote, None)
    }

    /// Like [`MockAnswerer::incoming`], completing after `latency`.
    #[must_use]
    pub fn incoming_with_latency(
        remote: &str,
        latency: Option<Duration>,
    ) -> (IncomingCall, AnswerOutcome) {
        let outcome = AnswerOutcome::default();
        let answerer = Self {
            remote_stream: MediaHandle::new(format!("remote:{remote}")),
            latency,
            outcome: outcome.clone(),
        };
        let call = IncomingCall::new(ParticipantId::new(remote), Box::new(answerer));
        (call, outcome)
    }
}

#[async_trait::async_trait]
impl CallAnswerer for MockAnswerer {
    async fn answer(&mut self, _local_stream: MediaHandle) -> Result<MediaHandle, CallError> {
        self.outcome.answered.store(true, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.remote_stream.clone())
    }

    fn decline(&mut self) {
        self.outcome.declined.store(true, Ordering::SeqCst);
    }
}
