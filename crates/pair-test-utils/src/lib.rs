//! # Pair Test Utilities
//!
//! Shared test utilities for the pair client.
//!
//! This crate provides mock implementations of the coordinator's external
//! seams and fixtures for spawning coordinators against them.
//!
//! ## Modules
//!
//! - `mock_signaling` - Recording signaling channel that can be closed
//! - `mock_peer` - Scripted peer connector and call answerer
//! - `fixtures` - Test participants, configs and a coordinator rig
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pair_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let rig = TestRig::builder(TestParticipant::new("alice")).spawn().await;
//!
//!     rig.handle.request_connection().await.unwrap();
//!     assert_eq!(rig.signaling.sent(), vec![OutboundEvent::FindMatch]);
//! }
//! ```

pub mod fixtures;
pub mod mock_peer;
pub mod mock_signaling;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_peer::*;
pub use mock_signaling::*;
