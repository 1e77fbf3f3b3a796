//! Coordinator metrics and mailbox monitoring.
//!
//! Senders record the enqueue before posting and the actor records the
//! dequeue after handling, so depth counts messages waiting or in flight.
//!
//! | Level    | Depth     |
//! |----------|-----------|
//! | Normal   | < 32      |
//! | Warning  | 32-128    |
//! | Critical | > 128     |

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Mailbox depth above which the coordinator is considered busy.
pub const COORDINATOR_MAILBOX_NORMAL: usize = 32;

/// Mailbox depth above which the coordinator is falling behind.
pub const COORDINATOR_MAILBOX_WARNING: usize = 128;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Mailbox monitor for tracking queue depth.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Actor identifier (local participant or a label before one is assigned).
    actor_id: String,
    /// Current mailbox depth.
    depth: AtomicUsize,
    /// Peak mailbox depth since creation.
    peak_depth: AtomicUsize,
    /// Total messages processed.
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match Self::level_for_depth(new_depth) {
            MailboxLevel::Critical => {
                warn!(
                    target: "pair.actor.mailbox",
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    threshold = COORDINATOR_MAILBOX_WARNING,
                    "Mailbox depth critical"
                );
            }
            MailboxLevel::Warning if new_depth == COORDINATOR_MAILBOX_NORMAL + 1 => {
                // Log once when crossing into warning
                debug!(
                    target: "pair.actor.mailbox",
                    actor_id = %self.actor_id,
                    depth = new_depth,
                    "Mailbox depth elevated"
                );
            }
            _ => {}
        }
    }

    /// Undo an enqueue whose send failed.
    pub fn record_rejected(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        Self::level_for_depth(self.current_depth())
    }

    fn level_for_depth(depth: usize) -> MailboxLevel {
        if depth > COORDINATOR_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > COORDINATOR_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Session counters shared between the coordinator and whoever reports on it.
///
/// All fields are atomic so readers never contend with the actor.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    calls_placed: AtomicU64,
    calls_answered: AtomicU64,
    remote_streams: AtomicU64,
    stale_events: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionMetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub calls_placed: u64,
    pub calls_answered: u64,
    pub remote_streams: u64,
    pub stale_events: u64,
}

impl SessionMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_ended(&self) {
        self.sessions_ended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_placed(&self) {
        self.calls_placed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn call_answered(&self) {
        self.calls_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn remote_stream_received(&self) {
        self.remote_streams.fetch_add(1, Ordering::Relaxed);
    }

    /// A completion or timer from an earlier session was discarded.
    pub fn stale_event(&self) {
        self.stale_events.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionMetricsSnapshot {
        SessionMetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            calls_placed: self.calls_placed.load(Ordering::Relaxed),
            calls_answered: self.calls_answered.load(Ordering::Relaxed),
            remote_streams: self.remote_streams.load(Ordering::Relaxed),
            stale_events: self.stale_events.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new("alice");

        assert_eq!(monitor.current_depth(), 0);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);

        monitor.record_rejected();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("alice");
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..=COORDINATOR_MAILBOX_NORMAL {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..COORDINATOR_MAILBOX_WARNING {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_session_metrics_snapshot() {
        let metrics = SessionMetrics::new();
        metrics.session_started();
        metrics.call_placed();
        metrics.remote_stream_received();
        metrics.remote_stream_received();
        metrics.stale_event();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_started, 1);
        assert_eq!(snapshot.calls_placed, 1);
        assert_eq!(snapshot.calls_answered, 0);
        assert_eq!(snapshot.remote_streams, 2);
        assert_eq!(snapshot.stale_events, 1);
    }
}
