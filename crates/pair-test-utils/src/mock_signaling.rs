//! Mock signaling channel.
//!
//! Records every outbound event and can be switched to refuse sends, which
//! the coordinator treats as a lost channel.
//!
//! # Example
//!
//! ```rust,ignore
//! use pair_test_utils::MockSignaling;
//!
//! let signaling = MockSignaling::new();
//! signaling.close();
//! assert!(signaling.send(OutboundEvent::FindMatch).await.is_err());
//! ```

use pair_client::signaling::{OutboundEvent, SignalingChannel, SignalingError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Recording signaling channel.
#[derive(Debug, Default)]
pub struct MockSignaling {
    sent: Mutex<Vec<OutboundEvent>>,
    closed: AtomicBool,
}

impl MockSignaling {
    /// Create a new open channel.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Refuse every later send.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Events sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of `find-match` events sent.
    #[must_use]
    pub fn find_match_count(&self) -> usize {
        self.sent()
            .iter()
            .filter(|e| matches!(e, OutboundEvent::FindMatch))
            .count()
    }

    /// Chat lines sent, as `(sender, text)`.
    #[must_use]
    pub fn chat_lines(&self) -> Vec<(String, String)> {
        self.sent()
            .into_iter()
            .filter_map(|e| match e {
                OutboundEvent::MessageSent(_, sender, text) => Some((sender.to_string(), text)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl SignalingChannel for MockSignaling {
    async fn send(&self, event: OutboundEvent) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::Closed);
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }
}
