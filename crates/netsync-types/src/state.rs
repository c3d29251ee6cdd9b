//! Full snapshots, incremental deltas, and aggregate metrics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::channel::{Channel, ChannelUpdate};
use crate::ids::{ChannelId, NodeId};
use crate::node::{NetworkNode, NodeUpdate};

/// A complete snapshot of the network graph.
///
/// On the wire nodes and channels are arrays; ids must be unique within
/// each. `version` orders snapshots: a mirror never moves to a lower one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    /// Every node in the graph.
    #[serde(default)]
    pub nodes: Vec<NetworkNode>,
    /// Every channel in the graph.
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Aggregates as computed by the publisher.
    #[serde(default)]
    pub metrics: NetworkMetrics,
    /// Time the snapshot was taken.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Monotonic snapshot version.
    #[serde(default)]
    pub version: u64,
}

impl NetworkState {
    /// Create an empty snapshot at the given version.
    pub fn empty(version: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            nodes: Vec::new(),
            channels: Vec::new(),
            metrics: NetworkMetrics::default(),
            timestamp,
            version,
        }
    }
}

/// An incremental change set against the current state.
///
/// Every list is optional on the wire and defaults to empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDelta {
    /// Nodes inserted by id (an existing id is overwritten).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_nodes: Vec<NetworkNode>,
    /// Partial records merged into existing nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_nodes: Vec<NodeUpdate>,
    /// Nodes deleted, together with every channel that references them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_nodes: Vec<NodeId>,
    /// Channels inserted by id (an existing id is overwritten).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub added_channels: Vec<Channel>,
    /// Partial records merged into existing channels.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub updated_channels: Vec<ChannelUpdate>,
    /// Channels deleted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed_channels: Vec<ChannelId>,
}

impl NetworkDelta {
    /// Whether the delta carries no changes at all.
    pub fn is_empty(&self) -> bool {
        self.added_nodes.is_empty()
            && self.updated_nodes.is_empty()
            && self.removed_nodes.is_empty()
            && self.added_channels.is_empty()
            && self.updated_channels.is_empty()
            && self.removed_channels.is_empty()
    }

    /// Total number of items across every list.
    pub fn len(&self) -> usize {
        self.added_nodes
            .len()
            .saturating_add(self.updated_nodes.len())
            .saturating_add(self.removed_nodes.len())
            .saturating_add(self.added_channels.len())
            .saturating_add(self.updated_channels.len())
            .saturating_add(self.removed_channels.len())
    }
}

/// Aggregate counters over the whole graph.
///
/// These are derivable from nodes and channels but are transmitted
/// independently; the mirror stores them as received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    /// Sum of entity TVL.
    #[serde(default, with = "crate::amount")]
    pub total_value_locked: Amount,
    /// Number of entity nodes.
    #[serde(default)]
    pub entity_count: u64,
    /// Number of channels.
    #[serde(default)]
    pub channel_count: u64,
    /// Number of account nodes.
    #[serde(default)]
    pub account_count: u64,
    /// Number of channels with `isActive` set.
    #[serde(default)]
    pub active_channels: u64,
    /// Value moved over the last 24 hours.
    #[serde(default, with = "crate::amount")]
    pub volume_24h: Amount,
    /// Mean transactions per second across entities.
    #[serde(default)]
    pub average_throughput: f64,
    /// Overall health score (0 - 100).
    #[serde(default)]
    pub health_score: f64,
}
