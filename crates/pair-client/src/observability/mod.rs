//! Observability for the pair client.
//!
//! # Privacy by Default
//!
//! Chat text is never logged or used as a label; only its length is. The
//! actor loop is instrumented with `#[instrument(skip_all)]` and explicit
//! safe fields.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `pair_matches_total` | Counter | none | Matches that reached InCall |
//! | `pair_calls_total` | Counter | `direction`, `outcome` | Call/answer outcomes |
//! | `pair_chat_messages_total` | Counter | `direction` | Chat lines |
//! | `pair_session_failures_total` | Counter | `reason` | User-visible failures |
//! | `pair_ignored_events_total` | Counter | `event` | Transient races absorbed |
//! | `pair_screen_state` | Gauge | none | Current screen state |

pub mod metrics;

pub use metrics::{
    record_call, record_chat_message, record_ignored_event, record_match, record_session_failure,
    set_screen_state,
};
