//! The canonical in-memory network graph.
//!
//! [`StateReconciler`] is the single owner of the mirrored nodes, channels,
//! metrics, and version. Every write goes through one of three entry
//! points:
//!
//! - [`apply_full_state`](StateReconciler::apply_full_state) replaces the
//!   graph wholesale unless the incoming version is lower than the current
//!   one.
//! - [`apply_delta`](StateReconciler::apply_delta) inserts, merges, and
//!   removes individual items, skipping any item that would break
//!   referential integrity.
//! - [`apply_metrics`](StateReconciler::apply_metrics) stores publisher
//!   aggregates as received.
//!
//! After every write, each channel's `source` and `target` resolve to a
//! node in the graph.
//!
//! Everything outside the pipeline reads through a [`MirrorReader`], which
//! hands out shared borrows or owned clones but never a mutable reference.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use netsync_types::{
    Channel, ChannelId, NetworkDelta, NetworkMetrics, NetworkNode, NetworkState, NodeId, NodeType,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Result of offering a full snapshot to the reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullStateOutcome {
    /// The snapshot replaced the graph.
    Applied {
        /// Version now held by the mirror.
        version: u64,
        /// Channels dropped because an endpoint was missing from the snapshot.
        dropped_channels: Vec<ChannelId>,
    },
    /// The snapshot was older than the mirror and was discarded.
    Stale {
        /// Version carried by the discarded snapshot.
        incoming: u64,
        /// Version the mirror kept.
        current: u64,
    },
}

impl FullStateOutcome {
    /// Whether the snapshot was applied.
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A delta item that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoredItem {
    /// `updatedNodes` entry for a node that does not exist.
    UnknownNode(NodeId),
    /// `updatedChannels` entry for a channel that does not exist.
    UnknownChannel(ChannelId),
    /// `addedChannels` entry whose endpoint does not exist.
    DanglingChannel {
        /// The rejected channel.
        channel: ChannelId,
        /// The endpoint that failed to resolve.
        missing: NodeId,
    },
    /// `updatedChannels` entry that would move an endpoint to a missing node.
    DanglingChannelUpdate {
        /// The channel left untouched.
        channel: ChannelId,
        /// The endpoint that failed to resolve.
        missing: NodeId,
    },
    /// Entity-only fields sent for a node that is not an entity. The
    /// common fields of the same update were still applied.
    EntityFieldsOnNonEntity(NodeId),
}

impl fmt::Display for IgnoredItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNode(id) => write!(f, "update for unknown node {id}"),
            Self::UnknownChannel(id) => write!(f, "update for unknown channel {id}"),
            Self::DanglingChannel { channel, missing } => {
                write!(f, "channel {channel} references missing node {missing}")
            }
            Self::DanglingChannelUpdate { channel, missing } => {
                write!(f, "update to channel {channel} references missing node {missing}")
            }
            Self::EntityFieldsOnNonEntity(id) => {
                write!(f, "entity fields sent for non-entity node {id}")
            }
        }
    }
}

/// What one delta did to the graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaReport {
    /// Nodes inserted or overwritten.
    pub nodes_added: usize,
    /// Nodes merged.
    pub nodes_updated: usize,
    /// Nodes removed explicitly.
    pub nodes_removed: usize,
    /// Channels inserted or overwritten.
    pub channels_added: usize,
    /// Channels merged.
    pub channels_updated: usize,
    /// Channels removed explicitly.
    pub channels_removed: usize,
    /// Channels removed because one of their endpoints was removed.
    pub channels_cascaded: usize,
    /// Items skipped, in the order they were encountered.
    pub ignored: Vec<IgnoredItem>,
    /// Whether any node or channel ended up different from before the
    /// delta. Steps that cancel out within one delta do not count.
    pub changed: bool,
}

/// Owner of the mirrored graph.
#[derive(Debug, Clone, Default)]
pub struct StateReconciler {
    nodes: BTreeMap<NodeId, NetworkNode>,
    channels: BTreeMap<ChannelId, Channel>,
    metrics: Option<NetworkMetrics>,
    version: u64,
    timestamp: Option<DateTime<Utc>>,
    revision: u64,
    initialized: bool,
    rebase: bool,
}

impl StateReconciler {
    /// Create an empty mirror at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the graph with `state` unless it is older than the mirror.
    ///
    /// A snapshot with the same version as the current one is applied.
    /// Duplicate ids keep their last occurrence. Channels whose endpoints
    /// are not in the snapshot are dropped and reported.
    pub fn apply_full_state(&mut self, state: &NetworkState) -> FullStateOutcome {
        if self.initialized && !self.rebase && state.version < self.version {
            warn!(
                incoming = state.version,
                current = self.version,
                "discarding stale full state"
            );
            return FullStateOutcome::Stale {
                incoming: state.version,
                current: self.version,
            };
        }

        let nodes: BTreeMap<NodeId, NetworkNode> = state
            .nodes
            .iter()
            .map(|node| (node.id.clone(), node.clone()))
            .collect();
        if nodes.len() != state.nodes.len() {
            warn!(
                nodes = state.nodes.len(),
                unique = nodes.len(),
                "full state repeats node ids; last occurrence kept"
            );
        }

        let mut channels = BTreeMap::new();
        let mut dropped_channels = Vec::new();
        for channel in &state.channels {
            match missing_endpoint(&nodes, channel) {
                Some(missing) => {
                    warn!(channel = %channel.id, missing = %missing, "dropping dangling channel from full state");
                    dropped_channels.push(channel.id.clone());
                }
                None => {
                    channels.insert(channel.id.clone(), channel.clone());
                }
            }
        }
        // A duplicate id may appear both dangling and valid; the map decides.
        dropped_channels.retain(|id| !channels.contains_key(id));

        self.nodes = nodes;
        self.channels = channels;
        self.metrics = Some(state.metrics.clone());
        self.version = state.version;
        self.timestamp = Some(state.timestamp);
        self.initialized = true;
        self.rebase = false;
        self.bump_revision();

        debug!(
            version = self.version,
            nodes = self.nodes.len(),
            channels = self.channels.len(),
            "full state applied"
        );
        FullStateOutcome::Applied {
            version: self.version,
            dropped_channels,
        }
    }

    /// Apply an incremental change set.
    ///
    /// Items are processed in this order: added nodes, updated nodes,
    /// added channels, updated channels, removed nodes (cascading to their
    /// channels), removed channels. An item that would break referential
    /// integrity or that targets an unknown id is skipped; the rest of the
    /// delta still applies. Applying the same delta twice leaves the graph
    /// as the first application did.
    pub fn apply_delta(&mut self, delta: &NetworkDelta) -> DeltaReport {
        let mut report = DeltaReport::default();
        let mut touched = Touched::default();

        for node in &delta.added_nodes {
            touched.node(&self.nodes, &node.id);
            self.nodes.insert(node.id.clone(), node.clone());
            report.nodes_added = report.nodes_added.saturating_add(1);
        }

        for update in &delta.updated_nodes {
            touched.node(&self.nodes, &update.id);
            let Some(node) = self.nodes.get_mut(&update.id) else {
                report.ignored.push(IgnoredItem::UnknownNode(update.id.clone()));
                continue;
            };
            if !update.apply_to(node) {
                report
                    .ignored
                    .push(IgnoredItem::EntityFieldsOnNonEntity(update.id.clone()));
            }
            report.nodes_updated = report.nodes_updated.saturating_add(1);
        }

        for channel in &delta.added_channels {
            if let Some(missing) = missing_endpoint(&self.nodes, channel) {
                report.ignored.push(IgnoredItem::DanglingChannel {
                    channel: channel.id.clone(),
                    missing,
                });
                continue;
            }
            touched.channel(&self.channels, &channel.id);
            self.channels.insert(channel.id.clone(), channel.clone());
            report.channels_added = report.channels_added.saturating_add(1);
        }

        for update in &delta.updated_channels {
            let Some(current) = self.channels.get(&update.id) else {
                report
                    .ignored
                    .push(IgnoredItem::UnknownChannel(update.id.clone()));
                continue;
            };
            let next = update.merged(current);
            if let Some(missing) = missing_endpoint(&self.nodes, &next) {
                report.ignored.push(IgnoredItem::DanglingChannelUpdate {
                    channel: update.id.clone(),
                    missing,
                });
                continue;
            }
            touched.channel(&self.channels, &update.id);
            self.channels.insert(update.id.clone(), next);
            report.channels_updated = report.channels_updated.saturating_add(1);
        }

        for id in &delta.removed_nodes {
            touched.node(&self.nodes, id);
            if self.nodes.remove(id).is_none() {
                continue;
            }
            let adjacent: Vec<ChannelId> = self
                .channels
                .values()
                .filter(|channel| channel.touches(id))
                .map(|channel| channel.id.clone())
                .collect();
            for channel_id in &adjacent {
                touched.channel(&self.channels, channel_id);
                self.channels.remove(channel_id);
            }
            report.channels_cascaded = report.channels_cascaded.saturating_add(adjacent.len());
            report.nodes_removed = report.nodes_removed.saturating_add(1);
        }

        for id in &delta.removed_channels {
            touched.channel(&self.channels, id);
            if self.channels.remove(id).is_some() {
                report.channels_removed = report.channels_removed.saturating_add(1);
            }
        }

        for item in &report.ignored {
            warn!(item = %item, "ignored delta item");
        }
        report.changed = touched.differs(&self.nodes, &self.channels);
        if report.changed {
            self.bump_revision();
        }
        debug!(
            items = delta.len(),
            ignored = report.ignored.len(),
            changed = report.changed,
            "delta applied"
        );
        report
    }

    /// Accept the next full state whatever its version.
    ///
    /// Used when the graph switches between independent sources, whose
    /// version sequences are unrelated.
    pub const fn accept_next_state(&mut self) {
        self.rebase = true;
    }

    /// Store publisher aggregates as received.
    pub fn apply_metrics(&mut self, metrics: NetworkMetrics) {
        if self.metrics.as_ref() != Some(&metrics) {
            self.metrics = Some(metrics);
            self.bump_revision();
        }
    }

    const fn bump_revision(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }

    /// Look up a node.
    pub fn node(&self, id: &NodeId) -> Option<&NetworkNode> {
        self.nodes.get(id)
    }

    /// Look up a channel.
    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        self.channels.get(id)
    }

    /// Every node, ordered by id.
    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    /// Every channel, ordered by id.
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }

    /// Nodes of one variant.
    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &NetworkNode> {
        self.nodes
            .values()
            .filter(move |node| node.node_type() == node_type)
    }

    /// Nodes on one display layer.
    pub fn nodes_in_layer(&self, layer: u32) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values().filter(move |node| node.layer == layer)
    }

    /// Channels with `node` as either endpoint.
    pub fn channels_of<'a>(&'a self, node: &'a NodeId) -> impl Iterator<Item = &'a Channel> {
        self.channels
            .values()
            .filter(move |channel| channel.touches(node))
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Version of the last applied full state (0 before the first one).
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Local change counter, bumped by every write that altered content.
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether a full state has been applied yet.
    pub const fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Last stored aggregates.
    pub const fn metrics(&self) -> Option<&NetworkMetrics> {
        self.metrics.as_ref()
    }

    /// Timestamp of the last applied full state.
    pub const fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    /// Export the mirror as a snapshot, for an external history store.
    pub fn snapshot(&self) -> NetworkState {
        NetworkState {
            nodes: self.nodes.values().cloned().collect(),
            channels: self.channels.values().cloned().collect(),
            metrics: self.metrics.clone().unwrap_or_default(),
            timestamp: self.timestamp.unwrap_or_default(),
            version: self.version,
        }
    }

    /// Channels whose endpoints do not resolve. Always empty unless the
    /// integrity guarantee has been broken.
    pub fn dangling_channels(&self) -> Vec<ChannelId> {
        self.channels
            .values()
            .filter(|channel| missing_endpoint(&self.nodes, channel).is_some())
            .map(|channel| channel.id.clone())
            .collect()
    }
}

/// Entries as they were before a delta first touched them.
#[derive(Default)]
struct Touched {
    nodes: BTreeMap<NodeId, Option<NetworkNode>>,
    channels: BTreeMap<ChannelId, Option<Channel>>,
}

impl Touched {
    fn node(&mut self, graph: &BTreeMap<NodeId, NetworkNode>, id: &NodeId) {
        self.nodes
            .entry(id.clone())
            .or_insert_with(|| graph.get(id).cloned());
    }

    fn channel(&mut self, graph: &BTreeMap<ChannelId, Channel>, id: &ChannelId) {
        self.channels
            .entry(id.clone())
            .or_insert_with(|| graph.get(id).cloned());
    }

    /// Whether any touched entry ended up different from where it started.
    fn differs(
        &self,
        nodes: &BTreeMap<NodeId, NetworkNode>,
        channels: &BTreeMap<ChannelId, Channel>,
    ) -> bool {
        self.nodes
            .iter()
            .any(|(id, before)| nodes.get(id) != before.as_ref())
            || self
                .channels
                .iter()
                .any(|(id, before)| channels.get(id) != before.as_ref())
    }
}

fn missing_endpoint(nodes: &BTreeMap<NodeId, NetworkNode>, channel: &Channel) -> Option<NodeId> {
    [&channel.source, &channel.target]
        .into_iter()
        .find(|endpoint| !nodes.contains_key(*endpoint))
        .cloned()
}

/// Cloneable read-only handle on the mirror.
#[derive(Clone)]
pub struct MirrorReader {
    inner: Arc<RwLock<StateReconciler>>,
}

impl MirrorReader {
    pub(crate) const fn new(inner: Arc<RwLock<StateReconciler>>) -> Self {
        Self { inner }
    }

    /// Run `f` against the mirror under a shared lock.
    ///
    /// Keep `f` short: the pipeline cannot apply updates while it runs.
    pub fn read<R>(&self, f: impl FnOnce(&StateReconciler) -> R) -> R {
        f(&*self.inner.read())
    }

    /// Clone of one node.
    pub fn node(&self, id: &NodeId) -> Option<NetworkNode> {
        self.inner.read().node(id).cloned()
    }

    /// Clone of one channel.
    pub fn channel(&self, id: &ChannelId) -> Option<Channel> {
        self.inner.read().channel(id).cloned()
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.inner.read().version()
    }

    /// Current revision.
    pub fn revision(&self) -> u64 {
        self.inner.read().revision()
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.inner.read().node_count()
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.inner.read().channel_count()
    }

    /// Clone of the stored metrics.
    pub fn metrics(&self) -> Option<NetworkMetrics> {
        self.inner.read().metrics().cloned()
    }

    /// Export the mirror as a snapshot.
    pub fn snapshot(&self) -> NetworkState {
        self.inner.read().snapshot()
    }
}

impl fmt::Debug for MirrorReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mirror = self.inner.read();
        f.debug_struct("MirrorReader")
            .field("version", &mirror.version())
            .field("nodes", &mirror.node_count())
            .field("channels", &mirror.channel_count())
            .finish()
    }
}
