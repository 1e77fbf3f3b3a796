//! Metric definitions for the pair client.
//!
//! All metrics follow Prometheus naming conventions:
//! - `pair_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded by enums in this crate:
//! - `direction`: inbound, outbound
//! - `outcome`: success, failure
//! - `reason`: bounded by `SessionFailure`
//! - `event`: bounded by signaling event names

use metrics::{counter, gauge};

use crate::actors::messages::SessionScreenState;
use crate::errors::SessionFailure;
use crate::peer::CallDirection;

/// Record a match that moved the coordinator to InCall.
///
/// Metric: `pair_matches_total`
pub fn record_match() {
    counter!("pair_matches_total").increment(1);
}

/// Record the outcome of one call or answer.
///
/// Metric: `pair_calls_total`
/// Labels: `direction`, `outcome`
pub fn record_call(direction: CallDirection, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        "pair_calls_total",
        "direction" => direction.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Record one chat line.
///
/// Metric: `pair_chat_messages_total`
/// Labels: `direction`
pub fn record_chat_message(direction: CallDirection) {
    counter!("pair_chat_messages_total", "direction" => direction.as_str()).increment(1);
}

/// Record a session failure surfaced to the user.
///
/// Metric: `pair_session_failures_total`
/// Labels: `reason`
pub fn record_session_failure(reason: SessionFailure) {
    counter!("pair_session_failures_total", "reason" => reason.as_str()).increment(1);
}

/// Record an inbound signaling event that was ignored.
///
/// Metric: `pair_ignored_events_total`
/// Labels: `event`
pub fn record_ignored_event(event: &'static str) {
    counter!("pair_ignored_events_total", "event" => event).increment(1);
}

/// Publish the current screen state (0 = init, 1 = searching, 2 = in call).
///
/// Metric: `pair_screen_state`
pub fn set_screen_state(state: SessionScreenState) {
    let value = match state {
        SessionScreenState::Init => 0.0,
        SessionScreenState::Searching => 1.0,
        SessionScreenState::InCall => 2.0,
    };
    gauge!("pair_screen_state").set(value);
}
