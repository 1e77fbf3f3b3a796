//! Peer stream registry.
//!
//! Authoritative map from participant id to the stream rendered for it.
//! The local participant's entry is always muted (nobody should hear
//! themselves); remote entries are never muted. Every mutation is a keyed
//! upsert or a keyed eviction, so handlers may interleave freely.

use crate::media::MediaHandle;
use common::types::{ParticipantId, SessionId};
use std::collections::HashMap;
use tracing::{debug, warn};

/// One rendered stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream to render.
    pub media_handle: MediaHandle,
    /// Whether playback is muted.
    pub muted: bool,
}

#[derive(Debug)]
struct Slot {
    entry: StreamEntry,
    /// Session the remote entry belongs to; `None` for the local entry.
    session: Option<SessionId>,
}

/// Participant id to stream map.
#[derive(Debug, Default)]
pub struct PeerStreamRegistry {
    local_id: Option<ParticipantId>,
    active_session: Option<SessionId>,
    slots: HashMap<ParticipantId, Slot>,
}

impl PeerStreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert the local participant's own stream (muted).
    ///
    /// Works before any match so the local preview can render.
    pub fn set_local(&mut self, id: ParticipantId, media_handle: MediaHandle) {
        if let Some(previous) = self.local_id.take() {
            if previous != id {
                self.slots.remove(&previous);
            }
        }

        debug!(target: "pair.registry", participant_id = %id, "Local stream set");
        self.slots.insert(
            id.clone(),
            Slot {
                entry: StreamEntry {
                    media_handle,
                    muted: true,
                },
                session: None,
            },
        );
        self.local_id = Some(id);
    }

    /// Upsert a remote participant's stream (unmuted). Last write wins.
    ///
    /// Returns `false` and leaves the registry untouched if `id` is the
    /// local participant.
    pub fn upsert_remote(&mut self, id: ParticipantId, media_handle: MediaHandle) -> bool {
        if self.local_id.as_ref() == Some(&id) {
            warn!(
                target: "pair.registry",
                participant_id = %id,
                "Ignoring remote stream for the local participant"
            );
            return false;
        }

        let replaced = self
            .slots
            .insert(
                id.clone(),
                Slot {
                    entry: StreamEntry {
                        media_handle,
                        muted: false,
                    },
                    session: self.active_session.clone(),
                },
            )
            .is_some();

        debug!(
            target: "pair.registry",
            participant_id = %id,
            replaced,
            "Remote stream upserted"
        );
        true
    }

    /// Tag remote entries created from now on with `session_id`.
    pub fn bind_session(&mut self, session_id: SessionId) {
        self.active_session = Some(session_id);
    }

    /// Remove every remote entry created under `session_id`.
    ///
    /// The local entry is never evicted. Returns the number of entries removed.
    pub fn evict(&mut self, session_id: &SessionId) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| slot.session.as_ref() != Some(session_id));
        if self.active_session.as_ref() == Some(session_id) {
            self.active_session = None;
        }

        let removed = before - self.slots.len();
        debug!(
            target: "pair.registry",
            session_id = %session_id,
            removed,
            "Session streams evicted"
        );
        removed
    }

    /// Full mapping for presentation.
    #[must_use]
    pub fn view(&self) -> HashMap<ParticipantId, StreamEntry> {
        self.slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.entry.clone()))
            .collect()
    }

    /// The entry for `local_id`, if present.
    #[must_use]
    pub fn self_view(&self, local_id: &ParticipantId) -> Option<StreamEntry> {
        self.get(local_id).cloned()
    }

    /// Every entry except `local_id`'s.
    #[must_use]
    pub fn others_view(&self, local_id: &ParticipantId) -> HashMap<ParticipantId, StreamEntry> {
        self.slots
            .iter()
            .filter(|(id, _)| *id != local_id)
            .map(|(id, slot)| (id.clone(), slot.entry.clone()))
            .collect()
    }

    #[must_use]
    pub fn get(&self, id: &ParticipantId) -> Option<&StreamEntry> {
        self.slots.get(id).map(|slot| &slot.entry)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
