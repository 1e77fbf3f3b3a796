//! `SessionCoordinator` - owns the Init/Searching/InCall state machine.
//!
//! The coordinator is the single owner of the peer stream registry and the
//! chat relay. Signaling events, identity assignment, media readiness,
//! incoming calls, call completions, timer expiries and user commands all
//! arrive through one mailbox and are handled one at a time, in order.
//!
//! # Session lifecycle
//!
//! 1. `request_connection` emits `find-match` and enters Searching
//! 2. A `match-found` with a session id (and a known local id) emits
//!    `join-session` and enters InCall. A later one naming a different
//!    session replaces the active session
//! 3. On `peer-joined` the call initiation policy decides whether this side
//!    places the call; the other side answers the incoming call
//! 4. The first remote stream to arrive is written to the registry; later
//!    ones for the same participant overwrite it
//!
//! Every session end (next, peer left, channel lost, timeout) evicts the
//! session's remote streams and clears the chat log. Completions and timers
//! carry the generation they were started under and are discarded once the
//! generation moves on. Late calls from the partner of an ended session are
//! declined until the next partner's `peer-joined` arrives.

use crate::chat::ChatRelay;
use crate::config::{CallInitiation, Config};
use crate::errors::{Precondition, SessionError, SessionFailure};
use crate::media::MediaHandle;
use crate::observability;
use crate::peer::{CallDirection, CallError, IncomingCall, PeerConnector};
use crate::registry::PeerStreamRegistry;
use crate::signaling::{InboundEvent, OutboundEvent, SignalingChannel};

use super::messages::{CoordinatorMessage, SessionScreenState, SessionSnapshot};
use super::metrics::{MailboxMonitor, SessionMetrics};

use common::types::{ParticipantId, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the coordinator mailbox.
const COORDINATOR_CHANNEL_BUFFER: usize = 256;

/// External collaborators the coordinator drives.
#[derive(Clone)]
pub struct SessionContext {
    /// Outbound half of the signaling channel.
    pub signaling: Arc<dyn SignalingChannel>,
    /// Outbound call capability of the identity provider.
    pub connector: Arc<dyn PeerConnector>,
}

/// Handle to a `SessionCoordinator`.
#[derive(Clone)]
pub struct SessionCoordinatorHandle {
    sender: mpsc::Sender<CoordinatorMessage>,
    cancel_token: CancellationToken,
    screen: watch::Receiver<SessionScreenState>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionCoordinatorHandle {
    /// Start searching for a match ("connect"), or skip to the next match
    /// while in a call.
    ///
    /// # Errors
    ///
    /// `PreconditionNotMet(MediaUnavailable)` before the local stream is
    /// ready, `ChannelLost` if `find-match` could not be sent.
    pub async fn request_connection(&self) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::RequestConnection { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Send a chat line to the other participant.
    ///
    /// # Errors
    ///
    /// `PreconditionNotMet` without an active session or local id;
    /// `ChannelLost` if the signaling channel refused the message.
    pub async fn submit_chat(&self, text: impl Into<String>) -> Result<(), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::SubmitChat {
            text: text.into(),
            respond_to: tx,
        })
        .await?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))?
    }

    /// Read the current presentation state.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(CoordinatorMessage::GetSnapshot { respond_to: tx })
            .await?;

        rx.await
            .map_err(|e| SessionError::Internal(format!("response receive failed: {e}")))
    }

    /// Deliver an event received on the signaling channel.
    pub async fn signaling_event(&self, event: InboundEvent) -> Result<(), SessionError> {
        self.send(CoordinatorMessage::Signaling(event)).await
    }

    /// The identity provider assigned our participant id.
    pub async fn local_id_assigned(&self, id: ParticipantId) -> Result<(), SessionError> {
        self.send(CoordinatorMessage::LocalIdAssigned(id)).await
    }

    /// The media source produced the local stream.
    pub async fn media_ready(&self, stream: MediaHandle) -> Result<(), SessionError> {
        self.send(CoordinatorMessage::MediaReady(stream)).await
    }

    /// The identity provider received a call.
    pub async fn incoming_call(&self, call: IncomingCall) -> Result<(), SessionError> {
        self.send(CoordinatorMessage::IncomingCall(call)).await
    }

    /// Current screen state without a mailbox round trip.
    #[must_use]
    pub fn screen_state(&self) -> SessionScreenState {
        *self.screen.borrow()
    }

    /// Watch screen state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionScreenState> {
        self.screen.clone()
    }

    /// Stop the coordinator and everything it spawned.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Mailbox depth and throughput.
    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    async fn send(&self, message: CoordinatorMessage) -> Result<(), SessionError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|e| {
            self.mailbox.record_rejected();
            SessionError::Internal(format!("channel send failed: {e}"))
        })
    }
}

/// The matched session currently in progress.
#[derive(Debug)]
struct ActiveSession {
    session_id: SessionId,
    /// The paired participant, once a peer-joined or a call names them.
    remote: Option<ParticipantId>,
    /// Whether a remote stream has arrived.
    connected: bool,
    /// An outbound call is scheduled or in flight.
    call_pending: bool,
}

/// Events that arrived before our own match-found was processed.
#[derive(Debug)]
enum Parked {
    PeerJoined(ParticipantId),
    IncomingCall(IncomingCall),
}

/// The `SessionCoordinator` implementation.
pub struct SessionCoordinator {
    /// Message receiver.
    receiver: mpsc::Receiver<CoordinatorMessage>,
    /// Used by spawned calls and timers to post results back.
    self_sender: mpsc::WeakSender<CoordinatorMessage>,
    /// Cancellation token for the actor.
    cancel_token: CancellationToken,
    /// Child token for calls and timers.
    tasks_token: CancellationToken,
    context: SessionContext,
    call_initiation: CallInitiation,
    search_timeout: Option<Duration>,
    call_timeout: Option<Duration>,
    screen: SessionScreenState,
    screen_tx: watch::Sender<SessionScreenState>,
    local_id: Option<ParticipantId>,
    local_stream: Option<MediaHandle>,
    session: Option<ActiveSession>,
    /// Bumped on every new search and every session end.
    generation: u64,
    parked: Vec<Parked>,
    /// Partner of the last session that had one. Its late calls are
    /// declined until the next session's partner is confirmed.
    ended_remote: Option<ParticipantId>,
    registry: PeerStreamRegistry,
    chat: ChatRelay,
    last_failure: Option<SessionFailure>,
    call_error: Option<SessionError>,
    metrics: Arc<SessionMetrics>,
    mailbox: Arc<MailboxMonitor>,
}

impl SessionCoordinator {
    /// Spawn a new coordinator.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        context: SessionContext,
        config: &Config,
        cancel_token: CancellationToken,
        metrics: Arc<SessionMetrics>,
    ) -> (SessionCoordinatorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(COORDINATOR_CHANNEL_BUFFER);
        let (screen_tx, screen_rx) = watch::channel(SessionScreenState::Init);
        let mailbox = Arc::new(MailboxMonitor::new("coordinator"));

        let actor = Self {
            receiver,
            self_sender: sender.downgrade(),
            cancel_token: cancel_token.clone(),
            tasks_token: cancel_token.child_token(),
            context,
            call_initiation: config.call_initiation,
            search_timeout: config.search_timeout,
            call_timeout: config.call_timeout,
            screen: SessionScreenState::Init,
            screen_tx,
            local_id: None,
            local_stream: None,
            session: None,
            generation: 0,
            parked: Vec::new(),
            ended_remote: None,
            registry: PeerStreamRegistry::new(),
            chat: ChatRelay::new(),
            last_failure: None,
            call_error: None,
            metrics,
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionCoordinatorHandle {
            sender,
            cancel_token,
            screen: screen_rx,
            mailbox,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "pair.actor.coordinator")]
    async fn run(mut self) {
        info!(target: "pair.actor.coordinator", "SessionCoordinator started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "pair.actor.coordinator",
                        "SessionCoordinator received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "pair.actor.coordinator",
                                "SessionCoordinator channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.tasks_token.cancel();

        info!(
            target: "pair.actor.coordinator",
            local_id = ?self.local_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionCoordinator stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: CoordinatorMessage) {
        debug!(
            target: "pair.actor.coordinator",
            kind = message.kind(),
            screen = ?self.screen,
            "Handling message"
        );

        match message {
            CoordinatorMessage::RequestConnection { respond_to } => {
                let result = self.handle_request_connection().await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::SubmitChat { text, respond_to } => {
                let result = self.handle_submit_chat(text).await;
                let _ = respond_to.send(result);
            }

            CoordinatorMessage::Signaling(event) => {
                self.handle_signaling(event).await;
            }

            CoordinatorMessage::LocalIdAssigned(id) => {
                self.handle_local_id(id);
            }

            CoordinatorMessage::MediaReady(stream) => {
                self.local_stream = Some(stream);
                self.sync_local_entry();
            }

            CoordinatorMessage::IncomingCall(call) => {
                self.handle_incoming_call(call);
            }

            CoordinatorMessage::CallCompleted {
                generation,
                remote,
                direction,
                result,
            } => {
                self.handle_call_completed(generation, remote, direction, result);
            }

            CoordinatorMessage::GraceElapsed { generation, remote } => {
                self.handle_grace_elapsed(generation, remote);
            }

            CoordinatorMessage::SearchTimeout { generation } => {
                if generation == self.generation && self.screen == SessionScreenState::Searching {
                    self.fail(SessionFailure::SearchTimedOut);
                } else {
                    self.metrics.stale_event();
                }
            }

            CoordinatorMessage::CallTimeout { generation } => {
                let waiting = self.session.as_ref().is_some_and(|s| !s.connected);
                if generation == self.generation && waiting {
                    self.fail(SessionFailure::CallTimedOut);
                } else {
                    self.metrics.stale_event();
                }
            }

            CoordinatorMessage::GetSnapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
        }
    }

    async fn handle_request_connection(&mut self) -> Result<(), SessionError> {
        if self.screen == SessionScreenState::Searching {
            debug!(
                target: "pair.actor.coordinator",
                "Already searching, ignoring duplicate request"
            );
            return Ok(());
        }

        if self.local_stream.is_none() {
            self.last_failure = Some(SessionFailure::MediaUnavailable);
            observability::record_session_failure(SessionFailure::MediaUnavailable);
            return Err(Precondition::MediaUnavailable.into());
        }

        if self.screen == SessionScreenState::InCall {
            info!(target: "pair.actor.coordinator", "Leaving session for the next match");
            self.end_session();
        }

        self.session = None;
        self.last_failure = None;
        self.generation += 1;

        if let Err(e) = self.context.signaling.send(OutboundEvent::FindMatch).await {
            self.fail(SessionFailure::ChannelLost);
            return Err(SessionError::ChannelLost(e.to_string()));
        }

        self.set_screen(SessionScreenState::Searching);
        if let Some(timeout) = self.search_timeout {
            self.spawn_timer(
                timeout,
                CoordinatorMessage::SearchTimeout {
                    generation: self.generation,
                },
            );
        }

        info!(target: "pair.actor.coordinator", "Searching for a match");
        Ok(())
    }

    async fn handle_submit_chat(&mut self, text: String) -> Result<(), SessionError> {
        let result = self
            .chat
            .send(
                self.context.signaling.as_ref(),
                self.session.as_ref().map(|s| &s.session_id),
                self.local_id.as_ref(),
                text,
            )
            .await;

        match &result {
            Ok(()) => observability::record_chat_message(CallDirection::Outbound),
            Err(SessionError::ChannelLost(_)) => self.fail(SessionFailure::ChannelLost),
            Err(_) => {}
        }
        result
    }

    async fn handle_signaling(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::MatchFound(session_id) => self.handle_match_found(session_id).await,

            InboundEvent::PeerJoined(remote) => match self.screen {
                SessionScreenState::Searching if self.ended_remote.as_ref() == Some(&remote) => {
                    debug!(
                        target: "pair.actor.coordinator",
                        remote = %remote,
                        "Dropping peer-joined from the previous partner"
                    );
                    observability::record_ignored_event("peer-joined");
                }
                SessionScreenState::Searching => {
                    debug!(
                        target: "pair.actor.coordinator",
                        remote = %remote,
                        "Peer joined before our match was processed, parking"
                    );
                    self.parked.push(Parked::PeerJoined(remote));
                }
                SessionScreenState::InCall => self.handle_peer_joined(remote),
                SessionScreenState::Init => {
                    observability::record_ignored_event("peer-joined");
                }
            },

            InboundEvent::MessageSent(peer, text) => {
                if self.chat.on_receive(peer, text) {
                    observability::record_chat_message(CallDirection::Inbound);
                }
            }

            InboundEvent::PeerLeft(remote) => {
                let is_partner = self
                    .session
                    .as_ref()
                    .and_then(|s| s.remote.as_ref())
                    .is_some_and(|r| *r == remote);
                if is_partner {
                    info!(target: "pair.actor.coordinator", remote = %remote, "Peer left the session");
                    self.fail(SessionFailure::PeerLeft);
                } else {
                    observability::record_ignored_event("peer-left");
                }
            }

            InboundEvent::Disconnected => {
                if self.screen == SessionScreenState::Init {
                    debug!(target: "pair.actor.coordinator", "Signaling channel lost while idle");
                } else {
                    warn!(
                        target: "pair.actor.coordinator",
                        screen = ?self.screen,
                        "Signaling channel lost"
                    );
                    self.fail(SessionFailure::ChannelLost);
                }
            }
        }
    }

    async fn handle_match_found(&mut self, session_id: Option<SessionId>) {
        if self.screen == SessionScreenState::Init {
            observability::record_ignored_event("match-found");
            return;
        }

        let (Some(session_id), Some(local_id)) = (session_id, self.local_id.clone()) else {
            debug!(
                target: "pair.actor.coordinator",
                local_id_ready = self.local_id.is_some(),
                "Ignoring incomplete match-found"
            );
            observability::record_ignored_event("match-found");
            return;
        };

        // Only set while InCall. The latest valid match-found wins.
        if let Some(current) = &self.session {
            if current.session_id == session_id {
                debug!(
                    target: "pair.actor.coordinator",
                    session_id = %session_id,
                    "Ignoring duplicate match-found"
                );
                observability::record_ignored_event("match-found");
                return;
            }
            info!(
                target: "pair.actor.coordinator",
                previous = %current.session_id,
                session_id = %session_id,
                "Later match-found replaces the active session"
            );
            self.end_session();
        }

        info!(
            target: "pair.actor.coordinator",
            session_id = %session_id,
            local_id = %local_id,
            "Match found"
        );

        self.session = Some(ActiveSession {
            session_id: session_id.clone(),
            remote: None,
            connected: false,
            call_pending: false,
        });
        self.registry.bind_session(session_id.clone());
        self.chat.begin_session(session_id.clone());

        if let Err(e) = self
            .context
            .signaling
            .send(OutboundEvent::JoinSession(local_id, session_id))
            .await
        {
            warn!(target: "pair.actor.coordinator", error = %e, "Failed to join session");
            self.fail(SessionFailure::ChannelLost);
            return;
        }

        self.metrics.session_started();
        observability::record_match();
        self.set_screen(SessionScreenState::InCall);

        if let Some(timeout) = self.call_timeout {
            self.spawn_timer(
                timeout,
                CoordinatorMessage::CallTimeout {
                    generation: self.generation,
                },
            );
        }

        // Peer-joined first, so a parked call cannot name the partner.
        let (joined, calls): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|p| matches!(p, Parked::PeerJoined(_)));
        for parked in joined.into_iter().chain(calls) {
            match parked {
                Parked::PeerJoined(remote) => self.handle_peer_joined(remote),
                Parked::IncomingCall(call) => self.handle_incoming_call(call),
            }
        }
    }

    fn handle_peer_joined(&mut self, remote: ParticipantId) {
        let Some(local_id) = self.local_id.clone() else {
            return;
        };
        if remote == local_id {
            observability::record_ignored_event("peer-joined");
            return;
        }
        if !self.claim_remote(&remote) {
            warn!(
                target: "pair.actor.coordinator",
                remote = %remote,
                "Ignoring peer-joined for a participant outside this pair"
            );
            observability::record_ignored_event("peer-joined");
            return;
        }
        // The partner is confirmed by this session's own peer-joined.
        self.ended_remote = None;
        if self
            .session
            .as_ref()
            .is_some_and(|s| s.connected || s.call_pending)
        {
            debug!(
                target: "pair.actor.coordinator",
                remote = %remote,
                "Call already connected or pending, ignoring repeated peer-joined"
            );
            return;
        }

        match self.call_initiation {
            CallInitiation::LowerIdCalls => {
                if local_id < remote {
                    self.mark_call_pending();
                    self.place_call(remote);
                } else {
                    debug!(
                        target: "pair.actor.coordinator",
                        remote = %remote,
                        "Remote id is lower, waiting for its call"
                    );
                }
            }
            CallInitiation::GraceDelay(delay) => {
                self.mark_call_pending();
                self.spawn_timer(
                    delay,
                    CoordinatorMessage::GraceElapsed {
                        generation: self.generation,
                        remote,
                    },
                );
            }
        }
    }

    fn mark_call_pending(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.call_pending = true;
        }
    }

    fn handle_grace_elapsed(&mut self, generation: u64, remote: ParticipantId) {
        if generation != self.generation {
            self.metrics.stale_event();
            return;
        }
        if self.session.as_ref().is_some_and(|s| s.connected) {
            debug!(
                target: "pair.actor.coordinator",
                remote = %remote,
                "Already connected by the inbound call, skipping outbound call"
            );
            return;
        }
        self.place_call(remote);
    }

    fn handle_incoming_call(&mut self, call: IncomingCall) {
        let unconfirmed = !self.session.as_ref().is_some_and(|s| s.remote.is_some());
        if unconfirmed && self.ended_remote.as_ref() == Some(call.remote()) {
            debug!(
                target: "pair.actor.coordinator",
                remote = %call.remote(),
                "Declining late call from the previous partner"
            );
            call.decline();
            return;
        }

        match self.screen {
            SessionScreenState::Searching => {
                debug!(
                    target: "pair.actor.coordinator",
                    remote = %call.remote(),
                    "Call arrived before our match was processed, parking"
                );
                self.parked.push(Parked::IncomingCall(call));
                return;
            }
            SessionScreenState::Init => {
                debug!(target: "pair.actor.coordinator", "Declining call while idle");
                call.decline();
                return;
            }
            SessionScreenState::InCall => {}
        }

        let remote = call.remote().clone();
        if self.local_id.as_ref() == Some(&remote) || !self.claim_remote(&remote) {
            warn!(
                target: "pair.actor.coordinator",
                remote = %remote,
                "Declining call from a participant outside this pair"
            );
            call.decline();
            return;
        }

        let Some(local_stream) = self.local_stream.clone() else {
            call.decline();
            self.fail(SessionFailure::MediaUnavailable);
            return;
        };

        self.metrics.call_answered();
        let generation = self.generation;
        self.spawn_task(async move {
            let result = call.answer(local_stream).await;
            CoordinatorMessage::CallCompleted {
                generation,
                remote,
                direction: CallDirection::Inbound,
                result,
            }
        });
    }

    fn handle_call_completed(
        &mut self,
        generation: u64,
        remote: ParticipantId,
        direction: CallDirection,
        result: Result<MediaHandle, CallError>,
    ) {
        let current = self
            .session
            .as_mut()
            .filter(|s| generation == self.generation && s.remote.as_ref() == Some(&remote));
        let Some(session) = current else {
            debug!(
                target: "pair.actor.coordinator",
                remote = %remote,
                direction = direction.as_str(),
                "Discarding call result from an earlier session"
            );
            self.metrics.stale_event();
            return;
        };

        match result {
            Ok(stream) => {
                session.connected = true;
                session.call_pending = false;
                self.call_error = None;
                self.registry.upsert_remote(remote.clone(), stream);
                self.metrics.remote_stream_received();
                observability::record_call(direction, true);
                info!(
                    target: "pair.actor.coordinator",
                    remote = %remote,
                    direction = direction.as_str(),
                    "Remote stream received"
                );
            }
            Err(e) => {
                // Registry stays untouched; the UI keeps showing "connecting".
                if direction == CallDirection::Outbound {
                    session.call_pending = false;
                }
                observability::record_call(direction, false);
                warn!(
                    target: "pair.actor.coordinator",
                    remote = %remote,
                    direction = direction.as_str(),
                    error = %e,
                    "Call negotiation failed"
                );
                self.call_error = Some(e.into());
            }
        }
    }

    fn handle_local_id(&mut self, id: ParticipantId) {
        match &self.local_id {
            Some(existing) if *existing != id => {
                warn!(
                    target: "pair.actor.coordinator",
                    existing = %existing,
                    "Ignoring reassignment of the local participant id"
                );
            }
            _ => {
                self.local_id = Some(id);
                self.sync_local_entry();
            }
        }
    }

    fn sync_local_entry(&mut self) {
        if let (Some(id), Some(stream)) = (&self.local_id, &self.local_stream) {
            self.registry.set_local(id.clone(), stream.clone());
        }
    }

    /// Record `remote` as the partner. False if a different partner is set.
    fn claim_remote(&mut self, remote: &ParticipantId) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match &session.remote {
            Some(existing) => existing == remote,
            None => {
                session.remote = Some(remote.clone());
                true
            }
        }
    }

    fn place_call(&mut self, remote: ParticipantId) {
        let Some(local_stream) = self.local_stream.clone() else {
            self.fail(SessionFailure::MediaUnavailable);
            return;
        };

        info!(target: "pair.actor.coordinator", remote = %remote, "Placing call");
        self.metrics.call_placed();

        let connector = Arc::clone(&self.context.connector);
        let generation = self.generation;
        self.spawn_task(async move {
            let result = connector.call(&remote, local_stream).await;
            CoordinatorMessage::CallCompleted {
                generation,
                remote,
                direction: CallDirection::Outbound,
                result,
            }
        });
    }

    /// End the current session without surfacing a failure.
    fn end_session(&mut self) {
        if let Some(session) = self.session.take() {
            self.registry.evict(&session.session_id);
            if session.remote.is_some() {
                self.ended_remote = session.remote;
            }
            self.metrics.session_ended();
            info!(
                target: "pair.actor.coordinator",
                session_id = %session.session_id,
                "Session ended"
            );
        }
        self.chat.end_session();
        self.call_error = None;
        for parked in self.parked.drain(..) {
            if let Parked::IncomingCall(call) = parked {
                call.decline();
            }
        }
        self.generation += 1;
    }

    /// End the session and return to Init with a user-visible failure.
    fn fail(&mut self, reason: SessionFailure) {
        warn!(
            target: "pair.actor.coordinator",
            reason = reason.as_str(),
            "Returning to init"
        );
        self.end_session();
        self.last_failure = Some(reason);
        observability::record_session_failure(reason);
        self.set_screen(SessionScreenState::Init);
    }

    fn set_screen(&mut self, state: SessionScreenState) {
        self.screen = state;
        self.screen_tx.send_replace(state);
        observability::set_screen_state(state);
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            screen_state: self.screen,
            local_id: self.local_id.clone(),
            session_id: self.session.as_ref().map(|s| s.session_id.clone()),
            remote_id: self.session.as_ref().and_then(|s| s.remote.clone()),
            players: self.registry.view(),
            my_player: self
                .local_id
                .as_ref()
                .and_then(|id| self.registry.self_view(id)),
            other_players: self
                .local_id
                .as_ref()
                .map(|id| self.registry.others_view(id))
                .unwrap_or_default(),
            chat: self.chat.entries().to_vec(),
            last_failure: self.last_failure,
            call_error: self.call_error.clone(),
        }
    }

    fn spawn_timer(&self, delay: Duration, message: CoordinatorMessage) {
        self.spawn_task(async move {
            tokio::time::sleep(delay).await;
            message
        });
    }

    /// Run `work` off the actor and post its result back into the mailbox.
    fn spawn_task<F>(&self, work: F)
    where
        F: std::future::Future<Output = CoordinatorMessage> + Send + 'static,
    {
        let sender = self.self_sender.clone();
        let token = self.tasks_token.clone();
        let mailbox = Arc::clone(&self.mailbox);
        tokio::spawn(async move {
            let message = tokio::select! {
                () = token.cancelled() => return,
                message = work => message,
            };
            if let Some(sender) = sender.upgrade() {
                mailbox.record_enqueue();
                if sender.send(message).await.is_err() {
                    mailbox.record_rejected();
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::peer::CallAnswerer;
    use crate::signaling::SignalingError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSignaling {
        sent: Mutex<Vec<OutboundEvent>>,
        closed: AtomicBool,
    }

    impl RecordingSignaling {
        fn sent(&self) -> Vec<OutboundEvent> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl SignalingChannel for RecordingSignaling {
        async fn send(&self, event: OutboundEvent) -> Result<(), SignalingError> {
            if self.closed.load(Ordering::SeqCst) {
                return Err(SignalingError::Closed);
            }
            self.sent.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[derive(Default)]
    struct CountingConnector {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait::async_trait]
    impl PeerConnector for CountingConnector {
        async fn call(
            &self,
            remote: &ParticipantId,
            _local_stream: MediaHandle,
        ) -> Result<MediaHandle, CallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(CallError::Negotiation("ice failed".to_string()));
            }
            Ok(MediaHandle::new(format!("remote:{remote}")))
        }
    }

    struct AcceptingAnswerer;

    #[async_trait::async_trait]
    impl CallAnswerer for AcceptingAnswerer {
        async fn answer(&mut self, _local_stream: MediaHandle) -> Result<MediaHandle, CallError> {
            Ok(MediaHandle::new("remote:inbound"))
        }
    }

    struct Rig {
        handle: SessionCoordinatorHandle,
        signaling: Arc<RecordingSignaling>,
        connector: Arc<CountingConnector>,
    }

    fn rig(config: &Config) -> Rig {
        let signaling = Arc::new(RecordingSignaling::default());
        let connector = Arc::new(CountingConnector::default());
        let context = SessionContext {
            signaling: Arc::clone(&signaling) as Arc<dyn SignalingChannel>,
            connector: Arc::clone(&connector) as Arc<dyn PeerConnector>,
        };
        let (handle, _task) = SessionCoordinator::spawn(
            context,
            config,
            CancellationToken::new(),
            SessionMetrics::new(),
        );
        Rig {
            handle,
            signaling,
            connector,
        }
    }

    fn no_timeouts() -> Config {
        Config {
            search_timeout: None,
            call_timeout: None,
            ..Config::default()
        }
    }

    async fn ready(rig: &Rig, local: &str) {
        rig.handle
            .local_id_assigned(ParticipantId::new(local))
            .await
            .unwrap();
        rig.handle
            .media_ready(MediaHandle::new("camera"))
            .await
            .unwrap();
    }

    async fn matched(rig: &Rig, local: &str, session: &str) {
        ready(rig, local).await;
        rig.handle.request_connection().await.unwrap();
        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new(session))))
            .await
            .unwrap();
    }

    async fn wait_for<F>(handle: &SessionCoordinatorHandle, predicate: F) -> SessionSnapshot
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
        .expect("condition not reached")
    }

    #[tokio::test]
    async fn test_local_preview_before_match() {
        let rig = rig(&no_timeouts());
        ready(&rig, "alice").await;

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::Init);
        assert!(snapshot.my_player.as_ref().unwrap().muted);
        assert!(snapshot.other_players.is_empty());

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_request_connection_requires_media() {
        let rig = rig(&no_timeouts());
        rig.handle
            .local_id_assigned(ParticipantId::new("alice"))
            .await
            .unwrap();

        let result = rig.handle.request_connection().await;
        assert!(matches!(
            result,
            Err(SessionError::PreconditionNotMet(Precondition::MediaUnavailable))
        ));

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::Init);
        assert_eq!(snapshot.last_failure, Some(SessionFailure::MediaUnavailable));
        assert!(rig.signaling.sent().is_empty());

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_request_connection_emits_find_match_once() {
        let rig = rig(&no_timeouts());
        ready(&rig, "alice").await;

        rig.handle.request_connection().await.unwrap();
        rig.handle.request_connection().await.unwrap();

        assert_eq!(rig.handle.screen_state(), SessionScreenState::Searching);
        assert_eq!(rig.signaling.sent(), vec![OutboundEvent::FindMatch]);

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_incomplete_match_found_is_ignored() {
        let rig = rig(&no_timeouts());
        rig.handle
            .media_ready(MediaHandle::new("camera"))
            .await
            .unwrap();
        rig.handle.request_connection().await.unwrap();

        // Null session id
        rig.handle
            .signaling_event(InboundEvent::MatchFound(None))
            .await
            .unwrap();
        // Local id not assigned yet
        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new("room0"))))
            .await
            .unwrap();

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::Searching);
        assert_eq!(snapshot.session_id, None);

        rig.handle
            .local_id_assigned(ParticipantId::new("alice"))
            .await
            .unwrap();
        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new("room1"))))
            .await
            .unwrap();

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::InCall);
        assert_eq!(snapshot.session_id, Some(SessionId::new("room1")));
        assert_eq!(
            rig.signaling.sent(),
            vec![
                OutboundEvent::FindMatch,
                OutboundEvent::JoinSession(ParticipantId::new("alice"), SessionId::new("room1")),
            ]
        );

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_later_match_found_replaces_session() {
        let rig = rig(&no_timeouts());
        matched(&rig, "alice", "room1").await;
        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();
        wait_for(&rig.handle, |s| s.players.len() == 2).await;

        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new("room2"))))
            .await
            .unwrap();
        // A repeat of the active session is a no-op.
        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new("room2"))))
            .await
            .unwrap();

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::InCall);
        assert_eq!(snapshot.session_id, Some(SessionId::new("room2")));
        assert_eq!(snapshot.remote_id, None);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(
            rig.signaling.sent(),
            vec![
                OutboundEvent::FindMatch,
                OutboundEvent::JoinSession(ParticipantId::new("alice"), SessionId::new("room1")),
                OutboundEvent::JoinSession(ParticipantId::new("alice"), SessionId::new("room2")),
            ]
        );

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_lower_id_places_the_call() {
        let rig = rig(&no_timeouts());
        matched(&rig, "alice", "room1").await;

        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();

        let snapshot = wait_for(&rig.handle, |s| s.players.len() == 2).await;
        let (remote, entry) = snapshot.other_players.iter().next().unwrap();
        assert_eq!(remote.as_str(), "bob");
        assert!(!entry.muted);
        assert_eq!(rig.connector.calls.load(Ordering::SeqCst), 1);

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_higher_id_waits_for_inbound_call() {
        let rig = rig(&no_timeouts());
        matched(&rig, "zed", "room1").await;

        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();
        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(rig.connector.calls.load(Ordering::SeqCst), 0);

        rig.handle
            .incoming_call(IncomingCall::new(
                ParticipantId::new("bob"),
                Box::new(AcceptingAnswerer),
            ))
            .await
            .unwrap();

        let snapshot = wait_for(&rig.handle, |s| s.players.len() == 2).await;
        assert!(!snapshot.players.get(&ParticipantId::new("bob")).unwrap().muted);
        assert!(snapshot.my_player.as_ref().unwrap().muted);
        assert_eq!(rig.connector.calls.load(Ordering::SeqCst), 0);

        rig.handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_delay_defers_outbound_call() {
        let config = Config {
            call_initiation: CallInitiation::GraceDelay(Duration::from_millis(1000)),
            ..no_timeouts()
        };
        let rig = rig(&config);
        matched(&rig, "zed", "room1").await;

        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert_eq!(rig.connector.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let snapshot = wait_for(&rig.handle, |s| s.players.len() == 2).await;
        assert_eq!(rig.connector.calls.load(Ordering::SeqCst), 1);
        assert!(snapshot.players.contains_key(&ParticipantId::new("bob")));

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_parked_peer_joined_is_replayed() {
        let rig = rig(&no_timeouts());
        ready(&rig, "alice").await;
        rig.handle.request_connection().await.unwrap();

        // peer-joined overtakes our own match-found
        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();
        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new("room1"))))
            .await
            .unwrap();

        let snapshot = wait_for(&rig.handle, |s| s.players.len() == 2).await;
        assert_eq!(snapshot.remote_id, Some(ParticipantId::new("bob")));

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_failed_call_leaves_registry_untouched() {
        let rig = rig(&no_timeouts());
        rig.connector.fail.store(true, Ordering::SeqCst);
        matched(&rig, "alice", "room1").await;

        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();

        let snapshot = wait_for(&rig.handle, |s| s.call_error.is_some()).await;
        assert_eq!(snapshot.screen_state, SessionScreenState::InCall);
        assert_eq!(snapshot.players.len(), 1);
        assert!(matches!(
            snapshot.call_error,
            Some(SessionError::CallNegotiation(_))
        ));
        assert_eq!(rig.connector.calls.load(Ordering::SeqCst), 1);

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_chat_requires_session() {
        let rig = rig(&no_timeouts());
        ready(&rig, "alice").await;

        let result = rig.handle.submit_chat("hello").await;
        assert!(matches!(
            result,
            Err(SessionError::PreconditionNotMet(Precondition::NoActiveSession))
        ));
        assert!(rig.signaling.sent().is_empty());
        assert!(rig.handle.snapshot().await.unwrap().chat.is_empty());

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_chat_is_echoed_in_order() {
        let rig = rig(&no_timeouts());
        matched(&rig, "alice", "room1").await;

        rig.handle.submit_chat("hi").await.unwrap();
        rig.handle
            .signaling_event(InboundEvent::MessageSent(
                ParticipantId::new("bob"),
                "yo".to_string(),
            ))
            .await
            .unwrap();

        let chat = rig.handle.snapshot().await.unwrap().chat;
        let lines: Vec<_> = chat
            .iter()
            .map(|e| (e.content.as_str(), e.sender_peer_id.as_str()))
            .collect();
        assert_eq!(lines, vec![("hi", "alice"), ("yo", "bob")]);

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_channel_loss_returns_to_init() {
        let rig = rig(&no_timeouts());
        matched(&rig, "alice", "room1").await;
        rig.handle.submit_chat("hi").await.unwrap();

        rig.handle
            .signaling_event(InboundEvent::Disconnected)
            .await
            .unwrap();

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::Init);
        assert_eq!(snapshot.last_failure, Some(SessionFailure::ChannelLost));
        assert_eq!(snapshot.session_id, None);
        assert!(snapshot.chat.is_empty());

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_find_match_send_failure_is_channel_loss() {
        let rig = rig(&no_timeouts());
        ready(&rig, "alice").await;
        rig.signaling.closed.store(true, Ordering::SeqCst);

        let result = rig.handle.request_connection().await;
        assert!(matches!(result, Err(SessionError::ChannelLost(_))));
        assert_eq!(rig.handle.screen_state(), SessionScreenState::Init);

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_peer_left_evicts_remote_stream() {
        let rig = rig(&no_timeouts());
        matched(&rig, "alice", "room1").await;
        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();
        wait_for(&rig.handle, |s| s.players.len() == 2).await;

        rig.handle
            .signaling_event(InboundEvent::PeerLeft(ParticipantId::new("bob")))
            .await
            .unwrap();

        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::Init);
        assert_eq!(snapshot.last_failure, Some(SessionFailure::PeerLeft));
        assert_eq!(snapshot.players.len(), 1);
        assert!(snapshot.my_player.is_some());

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_next_match_evicts_previous_partner() {
        let rig = rig(&no_timeouts());
        matched(&rig, "alice", "room1").await;
        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();
        wait_for(&rig.handle, |s| s.players.len() == 2).await;

        rig.handle.request_connection().await.unwrap();
        let snapshot = rig.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.screen_state, SessionScreenState::Searching);
        assert_eq!(snapshot.players.len(), 1);
        assert_eq!(snapshot.last_failure, None);

        rig.handle
            .signaling_event(InboundEvent::MatchFound(Some(SessionId::new("room2"))))
            .await
            .unwrap();
        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("carol")))
            .await
            .unwrap();

        let snapshot = wait_for(&rig.handle, |s| s.players.len() == 2).await;
        assert!(snapshot.players.contains_key(&ParticipantId::new("carol")));
        assert!(!snapshot.players.contains_key(&ParticipantId::new("bob")));

        rig.handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_timeout_returns_to_init() {
        let config = Config {
            search_timeout: Some(Duration::from_secs(60)),
            ..no_timeouts()
        };
        let rig = rig(&config);
        ready(&rig, "alice").await;
        rig.handle.request_connection().await.unwrap();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(rig.handle.screen_state(), SessionScreenState::Searching);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = wait_for(&rig.handle, |s| {
            s.screen_state == SessionScreenState::Init
        })
        .await;
        assert_eq!(snapshot.last_failure, Some(SessionFailure::SearchTimedOut));

        rig.handle.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_without_remote_stream() {
        let config = Config {
            call_timeout: Some(Duration::from_secs(15)),
            ..no_timeouts()
        };
        let rig = rig(&config);
        // Higher id: waits for a call that never comes
        matched(&rig, "zed", "room1").await;
        rig.handle
            .signaling_event(InboundEvent::PeerJoined(ParticipantId::new("bob")))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(16)).await;
        let snapshot = wait_for(&rig.handle, |s| {
            s.screen_state == SessionScreenState::Init
        })
        .await;
        assert_eq!(snapshot.last_failure, Some(SessionFailure::CallTimedOut));

        rig.handle.shutdown();
    }

    #[tokio::test]
    async fn test_watch_reflects_screen_changes() {
        let rig = rig(&no_timeouts());
        let mut screen = rig.handle.subscribe();
        ready(&rig, "alice").await;

        rig.handle.request_connection().await.unwrap();
        screen.changed().await.unwrap();
        assert_eq!(*screen.borrow(), SessionScreenState::Searching);

        rig.handle.shutdown();
        assert!(rig.handle.is_cancelled());
    }

    #[tokio::test]
    async fn test_mailbox_depth_counts_queued_messages() {
        let rig = rig(&no_timeouts());

        // The actor cannot run until this task yields, so all four queue up.
        for _ in 0..4 {
            rig.handle
                .local_id_assigned(ParticipantId::new("alice"))
                .await
                .unwrap();
        }
        assert_eq!(rig.handle.mailbox().current_depth(), 4);

        rig.handle.snapshot().await.unwrap();
        let mailbox = rig.handle.mailbox();
        assert!(mailbox.peak_depth() >= 4);
        assert_eq!(mailbox.messages_processed(), 5);
        assert_eq!(mailbox.current_depth(), 0);

        rig.handle.shutdown();
    }
}
