//! Pair Client Library
//!
//! Client-side session coordination for one-to-one random video chat:
//!
//! - Matchmaking through a signaling channel (`find-match`, `join-session`)
//! - Deterministic call initiation between the two matched participants
//! - A registry of local and remote media streams for rendering
//! - A per-session text chat relayed over the signaling channel
//!
//! # Architecture
//!
//! ```text
//! SessionCoordinator (actor)
//! ├── SignalingChannel  (outbound events; inbound events arrive as messages)
//! ├── PeerConnector     (outbound calls; inbound calls arrive as messages)
//! ├── PeerStreamRegistry
//! └── ChatRelay
//! ```
//!
//! The signaling server, the peer-to-peer transport and the camera are
//! external. [`loopback`] provides an in-process stand-in for all three.
//!
//! # Modules
//!
//! - [`actors`] - The session coordinator actor
//! - [`chat`] - Chat log and relay
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error and failure types
//! - [`loopback`] - In-process signaling hub and peer transport
//! - [`registry`] - Peer stream registry

#![warn(clippy::pedantic)]

pub mod actors;
pub mod chat;
pub mod config;
pub mod errors;
pub mod loopback;
pub mod media;
pub mod observability;
pub mod peer;
pub mod registry;
pub mod signaling;
