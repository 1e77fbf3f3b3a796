//! Test fixtures for pair client testing.
//!
//! Provides pre-configured participants, configs and a coordinator rig
//! wired to the mocks in this crate.

use crate::mock_peer::MockPeerConnector;
use crate::mock_signaling::MockSignaling;
use common::types::{ParticipantId, SessionId};
use pair_client::actors::{
    SessionContext, SessionCoordinator, SessionCoordinatorHandle, SessionMetrics, SessionSnapshot,
};
use pair_client::config::{CallInitiation, Config};
use pair_client::media::MediaHandle;
use pair_client::signaling::InboundEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Test participant fixture.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    pub id: ParticipantId,
    pub stream: MediaHandle,
}

impl TestParticipant {
    /// Create a participant with a `camera:<id>` stream.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: ParticipantId::new(id),
            stream: MediaHandle::new(format!("camera:{id}")),
        }
    }
}

/// Config with both timers disabled and the given initiation policy.
#[must_use]
pub fn test_config(call_initiation: CallInitiation) -> Config {
    Config {
        call_initiation,
        search_timeout: None,
        call_timeout: None,
        ..Config::default()
    }
}

/// A coordinator spawned against mock collaborators.
pub struct TestRig {
    pub participant: TestParticipant,
    pub handle: SessionCoordinatorHandle,
    pub signaling: Arc<MockSignaling>,
    pub connector: Arc<MockPeerConnector>,
    pub metrics: Arc<SessionMetrics>,
    pub cancel_token: CancellationToken,
}

impl TestRig {
    /// Create a new TestRig builder.
    #[must_use]
    pub fn builder(participant: TestParticipant) -> TestRigBuilder {
        TestRigBuilder {
            participant,
            config: test_config(CallInitiation::LowerIdCalls),
            connector: None,
            skip_media: false,
        }
    }

    /// Request a connection and deliver `match-found` for `session`.
    pub async fn match_into(&self, session: &str) {
        self.handle.request_connection().await.unwrap();
        self.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new(session))))
            .await
            .unwrap();
    }

    /// Deliver `peer-joined` for `remote`.
    pub async fn peer_joined(&self, remote: &str) {
        self.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new(remote)))
            .await
            .unwrap();
    }

    /// Poll snapshots until `predicate` holds. Panics after five seconds.
    pub async fn wait_for<F>(&self, predicate: F) -> SessionSnapshot
    where
        F: Fn(&SessionSnapshot) -> bool,
    {
        wait_for(&self.handle, predicate).await
    }
}

impl Drop for TestRig {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Builder for TestRig configuration.
pub struct TestRigBuilder {
    participant: TestParticipant,
    config: Config,
    connector: Option<Arc<MockPeerConnector>>,
    skip_media: bool,
}

impl TestRigBuilder {
    /// Replace the config.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Use a prepared connector.
    #[must_use]
    pub fn connector(mut self, connector: Arc<MockPeerConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Do not deliver the local stream.
    #[must_use]
    pub fn without_media(mut self) -> Self {
        self.skip_media = true;
        self
    }

    /// Spawn the coordinator and deliver identity and media.
    pub async fn spawn(self) -> TestRig {
        let signaling = MockSignaling::new();
        let connector = self.connector.unwrap_or_else(MockPeerConnector::accepting);
        let metrics = SessionMetrics::new();
        let cancel_token = CancellationToken::new();

        let context = SessionContext {
            signaling: signaling.clone(),
            connector: connector.clone(),
        };
        let (handle, _task) = SessionCoordinator::spawn(
            context,
            &self.config,
            cancel_token.clone(),
            Arc::clone(&metrics),
        );

        handle
            .local_id_assigned(self.participant.id.clone())
            .await
            .unwrap();
        if !self.skip_media {
            handle
                .media_ready(self.participant.stream.clone())
                .await
                .unwrap();
        }

        TestRig {
            participant: self.participant,
            handle,
            signaling,
            connector,
            metrics,
            cancel_token,
        }
    }
}

/// Poll snapshots until `predicate` holds. Panics after five seconds.
pub async fn wait_for<F>(handle: &SessionCoordinatorHandle, predicate: F) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = handle.snapshot().await.unwrap();
            if predicate(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within five seconds")
}
