//! Actor model implementation for the pair client.
//!
//! ```text
//! SessionCoordinator (one per client)
//! ├── owns PeerStreamRegistry
//! ├── owns ChatRelay
//! └── spawns short-lived call, answer and timer tasks that post back
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single mailbox**: Signaling events, identity and media callbacks, call
//!   completions and user commands are serialized through one channel
//! - **Generations**: Spawned work carries the generation it started under;
//!   results from an earlier session are dropped
//! - **CancellationToken propagation**: Spawned tasks use a child token and
//!   stop with the coordinator
//!
//! # Modules
//!
//! - [`coordinator`] - `SessionCoordinator` and its handle
//! - [`messages`] - Mailbox messages and the presentation snapshot
//! - [`metrics`] - Mailbox monitoring and session counters

pub mod coordinator;
pub mod messages;
pub mod metrics;

pub use coordinator::{SessionContext, SessionCoordinator, SessionCoordinatorHandle};
pub use messages::*;
pub use metrics::{MailboxMonitor, SessionMetrics, SessionMetricsSnapshot};
