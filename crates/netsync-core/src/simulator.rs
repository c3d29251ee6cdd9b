//! Synthetic feed used while no live transport is reachable.
//!
//! [`SyntheticFeed`] is a pure, seeded generator: it owns a small graph
//! (one jurisdiction, two depositaries, a ring of entities, one account per
//! entity) and produces the same [`InboundEvent`] values a live publisher
//! would. Two feeds built from the same config produce identical sequences.
//!
//! [`FallbackGenerator`] owns the tick task that drives a feed while the
//! connection manager is in fallback mode.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use netsync_types::{
    AccountInfo, Amount, Channel, ChannelId, ConsensusEvent, ConsensusType, DepositaryInfo,
    EntityHealth, EntityInfo, HealthStatus, InboundEvent, JurisdictionInfo, NetworkDelta,
    NetworkMetrics, NetworkNode, NetworkState, NodeId, NodeKind, NodeUpdate, Position,
    RawNetworkUpdate,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{FallbackConfig, FallbackWeights};
use crate::stats::SyncStats;

/// Fixed time origin of every synthetic feed (2024-01-01T00:00:00Z).
const ORIGIN_MS: i64 = 1_704_067_200_000;

const JURISDICTION: &str = "jurisdiction-0";
const DEPOSITARIES: [&str; 2] = ["depositary-0", "depositary-1"];

/// Seeded generator of synthetic network traffic.
pub struct SyntheticFeed {
    rng: StdRng,
    weights: FallbackWeights,
    step: TimeDelta,
    clock: DateTime<Utc>,
    version: u64,
    nodes: BTreeMap<NodeId, NetworkNode>,
    channels: Vec<Channel>,
    entities: Vec<NodeId>,
    rounds: BTreeMap<NodeId, u64>,
}

impl SyntheticFeed {
    /// Build the synthetic graph from `config`.
    pub fn new(config: &FallbackConfig) -> Self {
        let origin = DateTime::from_timestamp_millis(ORIGIN_MS).unwrap_or_default();
        let step = TimeDelta::milliseconds(i64::try_from(config.tick_interval_ms).unwrap_or(i64::MAX));
        let mut feed = Self {
            rng: StdRng::seed_from_u64(config.seed),
            weights: config.weights,
            step,
            clock: origin,
            version: 0,
            nodes: BTreeMap::new(),
            channels: Vec::new(),
            entities: Vec::new(),
            rounds: BTreeMap::new(),
        };
        feed.build_graph(config.entity_count);
        feed
    }

    fn build_graph(&mut self, entity_count: u32) {
        let jurisdiction = NodeId::from(JURISDICTION);
        self.insert_node(
            jurisdiction.clone(),
            "Synthetic Jurisdiction".to_owned(),
            0,
            0,
            NodeKind::Jurisdiction(JurisdictionInfo { chain_id: Some(1) }),
        );
        for (slot, id) in (0_u32..).zip(DEPOSITARIES) {
            let address = self.address();
            self.insert_node(
                NodeId::from(id),
                format!("Depositary {slot}"),
                1,
                slot,
                NodeKind::Depositary(DepositaryInfo {
                    jurisdiction_id: Some(jurisdiction.clone()),
                    address: Some(address),
                }),
            );
        }

        for slot in 0..entity_count {
            let id = NodeId::new(format!("entity-{slot}"));
            let consensus_type = if slot % 2 == 0 {
                ConsensusType::ProposerBased
            } else {
                ConsensusType::GossipBased
            };
            let validator_count = self.rng.random_range(3..=5_usize);
            let validators = (0..validator_count).map(|_| self.address()).collect();
            let health = self.health();
            let entity = EntityInfo {
                depositary_id: NodeId::from(if slot % 2 == 0 { DEPOSITARIES[0] } else { DEPOSITARIES[1] }),
                consensus_type,
                validators,
                channels: BTreeSet::new(),
                tvl: self.tvl(),
                channel_count: 0,
                transaction_rate: self.transaction_rate(),
                health,
            };
            self.insert_node(
                id.clone(),
                format!("Entity {slot}"),
                2,
                slot,
                NodeKind::Entity(Box::new(entity)),
            );

            let balance = Amount::from(self.rng.random_range(1_000_u64..1_000_000));
            self.insert_node(
                NodeId::new(format!("account-{slot}")),
                format!("Account {slot}"),
                3,
                slot,
                NodeKind::Account(AccountInfo {
                    entity_id: Some(id.clone()),
                    balance: Some(balance),
                }),
            );
            self.entities.push(id);
        }

        if self.entities.len() < 2 {
            return;
        }
        let ring: Vec<(NodeId, NodeId)> = self
            .entities
            .iter()
            .zip(self.entities.iter().cycle().skip(1))
            .map(|(source, target)| (source.clone(), target.clone()))
            .collect();
        for (slot, (source, target)) in ring.into_iter().enumerate() {
            let capacity = self.rng.random_range(10_000_u64..1_000_000);
            let channel = Channel {
                id: ChannelId::new(format!("channel-{slot}")),
                source,
                target,
                capacity: Amount::from(capacity),
                available: Amount::from(self.rng.random_range(0..=capacity)),
                credit_line: Amount::from(self.rng.random_range(0_u64..10_000)),
                is_active: self.rng.random_bool(0.9),
                last_update: self.clock,
            };
            for endpoint in [&channel.source, &channel.target] {
                if let Some(entity) = self.nodes.get_mut(endpoint).and_then(NetworkNode::as_entity_mut) {
                    entity.channels.insert(channel.id.clone());
                    entity.channel_count = u32::try_from(entity.channels.len()).unwrap_or(u32::MAX);
                }
            }
            self.channels.push(channel);
        }
    }

    fn insert_node(&mut self, id: NodeId, name: String, layer: u32, slot: u32, kind: NodeKind) {
        let position = Position {
            x: f64::from(slot) * 120.0,
            y: f64::from(layer) * 150.0,
        };
        self.nodes.insert(
            id.clone(),
            NetworkNode {
                id,
                name,
                layer,
                position: Some(position),
                kind,
            },
        );
    }

    fn address(&mut self) -> String {
        let bytes: [u8; 20] = self.rng.random();
        bytes.iter().fold(String::from("0x"), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
    }

    fn tvl(&mut self) -> Amount {
        Amount::from(self.rng.random_range(1_000_u64..5_000_000)).saturating_mul(Amount::exp10(18))
    }

    fn transaction_rate(&mut self) -> f64 {
        (self.rng.random_range(0.0..500.0_f64) * 10.0).round() / 10.0
    }

    fn health(&mut self) -> EntityHealth {
        let error_rate = self.rng.random_range(0.0..0.08_f64);
        let status = if error_rate < 0.03 {
            HealthStatus::Healthy
        } else if error_rate < 0.06 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Offline
        };
        EntityHealth {
            status,
            uptime: self.rng.random_range(0.95..1.0),
            latency: self.rng.random_range(10.0..250.0),
            error_rate,
            consensus_participation: self.rng.random_range(0.8..1.0),
        }
    }

    fn advance(&mut self) -> DateTime<Utc> {
        self.clock = self.clock.checked_add_signed(self.step).unwrap_or(self.clock);
        self.clock
    }

    /// Current synthetic time.
    pub const fn now(&self) -> DateTime<Utc> {
        self.clock
    }

    /// Aggregates over the synthetic graph.
    pub fn metrics(&mut self) -> NetworkMetrics {
        let entities: Vec<&EntityInfo> = self.nodes.values().filter_map(NetworkNode::as_entity).collect();
        let total_value_locked = entities
            .iter()
            .fold(Amount::zero(), |sum, entity| sum.saturating_add(entity.tvl));
        let entity_count = u32::try_from(entities.len()).unwrap_or(u32::MAX);
        let (throughput, errors) = entities.iter().fold((0.0, 0.0), |(rate, err), entity| {
            (rate + entity.transaction_rate, err + entity.health.error_rate)
        });
        let (average_throughput, health_score) = if entity_count == 0 {
            (0.0, 100.0)
        } else {
            let n = f64::from(entity_count);
            (throughput / n, (1.0 - errors / n) * 100.0)
        };
        let account_count = self
            .nodes
            .values()
            .filter(|node| matches!(node.kind, NodeKind::Account(_)))
            .count();
        let active_channels = self.channels.iter().filter(|c| c.is_active).count();
        let volume = Amount::from(self.rng.random_range(10_000_u64..10_000_000)).saturating_mul(Amount::exp10(18));

        NetworkMetrics {
            total_value_locked,
            entity_count: u64::from(entity_count),
            channel_count: u64::try_from(self.channels.len()).unwrap_or(u64::MAX),
            account_count: u64::try_from(account_count).unwrap_or(u64::MAX),
            active_channels: u64::try_from(active_channels).unwrap_or(u64::MAX),
            volume_24h: volume,
            average_throughput,
            health_score,
        }
    }

    /// Make the next [`full_state`](Self::full_state) newer than `floor`.
    pub fn raise_version(&mut self, floor: u64) {
        self.version = self.version.max(floor);
    }

    /// A full snapshot of the synthetic graph. Each call bumps the version.
    pub fn full_state(&mut self) -> NetworkState {
        self.version = self.version.saturating_add(1);
        let metrics = self.metrics();
        NetworkState {
            nodes: self.nodes.values().cloned().collect(),
            channels: self.channels.clone(),
            metrics,
            timestamp: self.clock,
            version: self.version,
        }
    }

    /// The next synthetic update, chosen by the configured weights.
    ///
    /// Node-attribute deltas are applied to the feed's own graph, so a
    /// later [`full_state`](Self::full_state) agrees with every delta
    /// emitted before it.
    pub fn next_event(&mut self) -> Result<InboundEvent, serde_json::Error> {
        let now = self.advance();
        let roll = self.rng.random_range(0..self.weights.total().max(1));
        if roll < self.weights.metrics {
            let metrics = self.metrics();
            Ok(InboundEvent::NetworkUpdate(RawNetworkUpdate::from_metrics(&metrics, now)?))
        } else if roll < self.weights.metrics.saturating_add(self.weights.node_delta) {
            let delta = self.node_delta();
            Ok(InboundEvent::NetworkUpdate(RawNetworkUpdate::from_delta(&delta, now)?))
        } else if let Some(event) = self.consensus_event(now) {
            Ok(InboundEvent::Consensus(event))
        } else {
            let metrics = self.metrics();
            Ok(InboundEvent::NetworkUpdate(RawNetworkUpdate::from_metrics(&metrics, now)?))
        }
    }

    fn node_delta(&mut self) -> NetworkDelta {
        let Some(id) = self.entities.choose(&mut self.rng).cloned() else {
            return NetworkDelta::default();
        };
        let mut update = NodeUpdate::new(id.clone());
        update.transaction_rate = Some(self.transaction_rate());
        update.tvl = Some(self.tvl());
        update.health = Some(self.health());
        if let Some(node) = self.nodes.get_mut(&id) {
            update.apply_to(node);
        }
        NetworkDelta {
            updated_nodes: vec![update],
            ..NetworkDelta::default()
        }
    }

    fn consensus_event(&mut self, now: DateTime<Utc>) -> Option<ConsensusEvent> {
        let id = self.entities.choose(&mut self.rng).cloned()?;
        let entity = self.nodes.get(&id).and_then(NetworkNode::as_entity)?;
        let consensus_type = entity.consensus_type;
        let validators = entity.validators.clone();

        let counter = self.rounds.entry(id.clone()).or_insert(0);
        *counter = counter.saturating_add(1);
        let round = *counter;

        let proposer = match consensus_type {
            ConsensusType::ProposerBased => usize::try_from(round)
                .ok()
                .and_then(|r| r.checked_rem(validators.len()))
                .and_then(|slot| validators.get(slot).cloned()),
            ConsensusType::GossipBased => None,
        };
        let event_id = uuid::Builder::from_random_bytes(self.rng.random()).into_uuid();

        Some(ConsensusEvent {
            id: event_id.to_string(),
            entity_id: id,
            consensus_type,
            round,
            proposer,
            validators,
            timestamp: now,
            duration: self.rng.random_range(50..800),
            success: self.rng.random_bool(0.92),
        })
    }
}

impl std::fmt::Debug for SyntheticFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntheticFeed")
            .field("version", &self.version)
            .field("nodes", &self.nodes.len())
            .field("channels", &self.channels.len())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Owner of the fallback tick task.
///
/// The feed outlives individual runs, so resuming fallback mode continues
/// the same deterministic sequence instead of restarting it.
pub struct FallbackGenerator {
    feed: Arc<Mutex<SyntheticFeed>>,
    tick: Duration,
    task: Option<JoinHandle<()>>,
    stats: Arc<SyncStats>,
}

impl FallbackGenerator {
    /// Create a stopped generator.
    pub fn new(config: &FallbackConfig, stats: Arc<SyncStats>) -> Self {
        Self {
            feed: Arc::new(Mutex::new(SyntheticFeed::new(config))),
            tick: config.tick_interval(),
            task: None,
            stats,
        }
    }

    /// Start ticking. Each tick passes one synthetic event to `emit`; the
    /// task ends when `emit` returns `false`. A running task is replaced.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, emit: F)
    where
        F: Fn(InboundEvent) -> bool + Send + 'static,
    {
        self.stop();
        let feed = Arc::clone(&self.feed);
        let stats = Arc::clone(&self.stats);
        let tick = self.tick;
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; synthetic traffic starts one period in.
            interval.tick().await;
            loop {
                interval.tick().await;
                let next = feed.lock().next_event();
                match next {
                    Ok(event) => {
                        stats.fallback_tick();
                        if !emit(event) {
                            debug!("fallback sink closed");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to build synthetic update"),
                }
            }
        }));
        info!(tick_ms = tick.as_millis(), "fallback generator started");
    }

    /// Cancel the tick task. No tick fires after this returns.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("fallback generator stopped");
        }
    }

    /// Whether the tick task is alive.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// A full-state update for the synthetic graph, answering a state
    /// request locally while in fallback mode.
    ///
    /// The snapshot's version is above `current_version`, so it replaces
    /// whatever a live publisher left in the mirror.
    pub fn resync(&self, current_version: u64) -> Result<InboundEvent, serde_json::Error> {
        let state = {
            let mut feed = self.feed.lock();
            feed.raise_version(current_version);
            feed.full_state()
        };
        Ok(InboundEvent::NetworkUpdate(RawNetworkUpdate::from_state(&state)?))
    }
}

impl Drop for FallbackGenerator {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for FallbackGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackGenerator")
            .field("tick", &self.tick)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
