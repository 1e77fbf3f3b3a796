//! In-process signaling hub and peer transport.
//!
//! `LoopbackHub` plays the matchmaking server and the identity provider for
//! any number of local clients:
//!
//! - `find-match` pairs waiting clients first-come first-served and sends
//!   `match-found` to both
//! - The second `join-session` in a session sends `peer-joined` to both
//!   members
//! - `message-sent` is relayed to the other member only
//! - Leaving (a new `find-match`, or [`LoopbackHub::disconnect`]) sends
//!   `peer-left` to the partner
//! - Calls are delivered to the callee as [`IncomingCall`]s; the caller
//!   receives the callee's stream once it answers
//!
//! Deliveries to one client keep their order.

use crate::actors::SessionCoordinatorHandle;
use crate::media::MediaHandle;
use crate::peer::{CallAnswerer, CallError, IncomingCall, PeerConnector};
use crate::signaling::{
    decode_frame, encode_frame, InboundEvent, OutboundEvent, SignalingChannel, SignalingError,
};

use common::types::{ParticipantId, SessionId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Something the hub hands to one client.
#[derive(Debug)]
pub enum Delivery {
    Event(InboundEvent),
    Call(IncomingCall),
}

#[derive(Debug, Default)]
struct HubState {
    members: HashMap<ParticipantId, mpsc::UnboundedSender<Delivery>>,
    waiting: VecDeque<ParticipantId>,
    rooms: HashMap<SessionId, Room>,
    /// Which room each member is currently in.
    member_room: HashMap<ParticipantId, SessionId>,
    next_room: u64,
}

#[derive(Debug)]
struct Room {
    members: [ParticipantId; 2],
    joined: HashSet<ParticipantId>,
}

impl Room {
    fn other(&self, id: &ParticipantId) -> Option<&ParticipantId> {
        self.members.iter().find(|m| *m != id)
    }
}

impl HubState {
    fn deliver(&self, to: &ParticipantId, delivery: Delivery) {
        match self.members.get(to) {
            Some(tx) => {
                if tx.send(delivery).is_err() {
                    debug!(target: "pair.loopback", to = %to, "Member inbox closed");
                }
            }
            None => debug!(target: "pair.loopback", to = %to, "Dropping delivery to unknown member"),
        }
    }

    /// Take `id` out of its room (telling the partner) and the waiting queue.
    fn leave(&mut self, id: &ParticipantId) {
        self.waiting.retain(|w| w != id);

        let Some(room_id) = self.member_room.remove(id) else {
            return;
        };
        if let Some(room) = self.rooms.remove(&room_id) {
            if let Some(other) = room.other(id).cloned() {
                self.member_room.remove(&other);
                info!(
                    target: "pair.loopback",
                    session_id = %room_id,
                    left = %id,
                    "Member left session"
                );
                self.deliver(&other, Delivery::Event(InboundEvent::PeerLeft(id.clone())));
            }
        }
    }

    fn find_match(&mut self, id: &ParticipantId) {
        self.leave(id);

        let Some(partner) = self.waiting.pop_front() else {
            debug!(target: "pair.loopback", id = %id, "Queued for matchmaking");
            self.waiting.push_back(id.clone());
            return;
        };

        self.next_room += 1;
        let room_id = SessionId::new(format!("room-{}", self.next_room));
        info!(
            target: "pair.loopback",
            session_id = %room_id,
            first = %partner,
            second = %id,
            "Paired members"
        );

        self.member_room.insert(partner.clone(), room_id.clone());
        self.member_room.insert(id.clone(), room_id.clone());
        self.rooms.insert(
            room_id.clone(),
            Room {
                members: [partner.clone(), id.clone()],
                joined: HashSet::new(),
            },
        );

        let found = || Delivery::Event(InboundEvent::MatchFound(Some(room_id.clone())));
        self.deliver(&partner, found());
        self.deliver(id, found());
    }

    fn join(&mut self, id: &ParticipantId, room_id: &SessionId) {
        let Some(room) = self.rooms.get_mut(room_id) else {
            warn!(target: "pair.loopback", id = %id, session_id = %room_id, "Join for unknown session");
            return;
        };
        if !room.members.contains(id) {
            warn!(target: "pair.loopback", id = %id, session_id = %room_id, "Join from non-member");
            return;
        }

        room.joined.insert(id.clone());
        if room.joined.len() < room.members.len() {
            return;
        }

        let [first, second] = room.members.clone();
        self.deliver(&first, Delivery::Event(InboundEvent::PeerJoined(second.clone())));
        self.deliver(&second, Delivery::Event(InboundEvent::PeerJoined(first)));
    }

    fn relay(&self, sender: &ParticipantId, room_id: &SessionId, text: String) {
        let Some(other) = self
            .rooms
            .get(room_id)
            .filter(|room| room.members.contains(sender))
            .and_then(|room| room.other(sender))
        else {
            debug!(target: "pair.loopback", sender = %sender, "Dropping message outside a session");
            return;
        };
        self.deliver(
            other,
            Delivery::Event(InboundEvent::MessageSent(sender.clone(), text)),
        );
    }
}

/// Matchmaking and transport shared by every local client.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client. The endpoint is its signaling channel and peer
    /// connector; the inbox yields what the hub delivers to it.
    pub async fn register(&self, id: ParticipantId) -> (Arc<LoopbackEndpoint>, LoopbackInbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.members.insert(id.clone(), tx);
        debug!(target: "pair.loopback", id = %id, "Member registered");

        let endpoint = Arc::new(LoopbackEndpoint {
            id,
            state: Arc::clone(&self.state),
        });
        (endpoint, LoopbackInbox { rx })
    }

    /// Drop a client's connection. The partner gets `peer-left`, the client
    /// itself gets `disconnected`.
    pub async fn disconnect(&self, id: &ParticipantId) {
        let mut state = self.state.lock().await;
        state.leave(id);
        state.deliver(id, Delivery::Event(InboundEvent::Disconnected));
        state.members.remove(id);
        info!(target: "pair.loopback", id = %id, "Member disconnected");
    }

    /// Number of clients waiting for a partner.
    pub async fn waiting_len(&self) -> usize {
        self.state.lock().await.waiting.len()
    }
}

/// One client's view of the hub.
#[derive(Debug)]
pub struct LoopbackEndpoint {
    id: ParticipantId,
    state: Arc<Mutex<HubState>>,
}

impl LoopbackEndpoint {
    #[must_use]
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }
}

#[async_trait::async_trait]
impl SignalingChannel for LoopbackEndpoint {
    async fn send(&self, event: OutboundEvent) -> Result<(), SignalingError> {
        let frame = encode_frame(&event).map_err(|e| SignalingError::Send(e.to_string()))?;

        let mut state = self.state.lock().await;
        if !state.members.contains_key(&self.id) {
            return Err(SignalingError::Closed);
        }
        state.handle_frame(&self.id, &frame)
    }
}

impl HubState {
    /// Parse and route one frame from `from`, as the server would.
    fn handle_frame(&mut self, from: &ParticipantId, frame: &str) -> Result<(), SignalingError> {
        let event: OutboundEvent = decode_frame(frame).map_err(|e| {
            warn!(target: "pair.loopback", from = %from, error = %e, "Rejecting malformed frame");
            SignalingError::Send(e.to_string())
        })?;

        match event {
            OutboundEvent::FindMatch => self.find_match(from),
            OutboundEvent::JoinSession(id, room_id) => self.join(&id, &room_id),
            OutboundEvent::MessageSent(room_id, sender, text) => {
                self.relay(&sender, &room_id, text);
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl PeerConnector for LoopbackEndpoint {
    async fn call(
        &self,
        remote: &ParticipantId,
        local_stream: MediaHandle,
    ) -> Result<MediaHandle, CallError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let state = self.state.lock().await;
            if !state.members.contains_key(remote) {
                return Err(CallError::PeerUnavailable(remote.to_string()));
            }
            let answerer = LoopbackAnswerer {
                caller_stream: local_stream,
                reply: Some(reply_tx),
            };
            state.deliver(
                remote,
                Delivery::Call(IncomingCall::new(self.id.clone(), Box::new(answerer))),
            );
        }

        reply_rx.await.map_err(|_| CallError::Closed)
    }
}

/// Answer side of a loopback call.
struct LoopbackAnswerer {
    caller_stream: MediaHandle,
    reply: Option<oneshot::Sender<MediaHandle>>,
}

#[async_trait::async_trait]
impl CallAnswerer for LoopbackAnswerer {
    async fn answer(&mut self, local_stream: MediaHandle) -> Result<MediaHandle, CallError> {
        let reply = self.reply.take().ok_or(CallError::Closed)?;
        reply.send(local_stream).map_err(|_| CallError::Closed)?;
        Ok(self.caller_stream.clone())
    }

    fn decline(&mut self) {
        self.reply = None;
    }
}

/// Deliveries for one client.
#[derive(Debug)]
pub struct LoopbackInbox {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl LoopbackInbox {
    /// Receive the next delivery.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Pump deliveries into a coordinator until either side goes away.
    pub fn forward_to(
        mut self,
        handle: SessionCoordinatorHandle,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    () = cancel_token.cancelled() => break,
                    delivery = self.rx.recv() => delivery,
                };

                let result = match delivery {
                    Some(Delivery::Event(event)) => handle.signaling_event(event).await,
                    Some(Delivery::Call(call)) => handle.incoming_call(call).await,
                    None => break,
                };
                if let Err(e) = result {
                    debug!(target: "pair.loopback", error = %e, "Coordinator gone, stopping inbox");
                    break;
                }
            }
        })
    }
}
