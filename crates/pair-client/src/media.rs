//! Opaque media stream handles.
//!
//! The core never looks inside a stream; it only stores, clones and hands
//! handles to the peer connection capability.

use common::types::StreamId;
use std::fmt;
use std::sync::Arc;

/// Reference to an audio/video stream owned by the media layer.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MediaHandle {
    id: StreamId,
    label: Arc<str>,
}

impl MediaHandle {
    /// Create a handle for a fresh stream.
    #[must_use]
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            id: StreamId::new(),
            label: label.into(),
        }
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Human-readable label (device name, "remote:<peer>", ...).
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("id", &self.id.0)
            .field("label", &self.label)
            .finish()
    }
}
