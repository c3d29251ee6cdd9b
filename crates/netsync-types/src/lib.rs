//! Shared type definitions for the netsync network mirror.
//!
//! This crate is the single source of truth for the shapes that travel
//! between a network graph publisher and the client-side mirror: the graph
//! itself, incremental deltas, aggregate metrics, consensus rounds, swap
//! records, and the named-event vocabulary that carries them.
//!
//! # Modules
//!
//! - [`ids`] -- String identifier wrappers for nodes and channels
//! - [`amount`] -- 256-bit unsigned amounts and their JSON encoding
//! - [`enums`] -- Closed enumerations (node type, consensus type, statuses)
//! - [`node`] -- [`NetworkNode`] and its variant payloads
//! - [`channel`] -- [`Channel`] and partial channel updates
//! - [`state`] -- Full snapshots, deltas, and aggregate metrics
//! - [`consensus`] -- Consensus rounds and cross-chain swap records
//! - [`wire`] -- Inbound/outbound event taxonomy and decoding

pub mod amount;
pub mod channel;
pub mod consensus;
pub mod enums;
pub mod ids;
pub mod node;
pub mod state;
pub mod wire;

// Re-export the public types at crate root for convenience.
pub use amount::Amount;
pub use channel::{Channel, ChannelUpdate};
pub use consensus::{ConsensusEvent, SwapRecord};
pub use enums::{ConsensusType, HealthStatus, NodeType, SwapStatus, UpdateKind};
pub use ids::{ChannelId, NodeId};
pub use node::{
    AccountInfo, DepositaryInfo, EntityHealth, EntityInfo, JurisdictionInfo, NetworkNode,
    NodeKind, NodeUpdate, Position,
};
pub use state::{NetworkDelta, NetworkMetrics, NetworkState};
pub use wire::{
    DecodeError, InboundEvent, OutboundRequest, RawNetworkUpdate, UpdateMessage, event_names,
};
