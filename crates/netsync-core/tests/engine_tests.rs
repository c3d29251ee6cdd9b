//! End-to-end tests of the sync engine over the in-memory transport.
//!
//! Every test runs on paused tokio time, so retry delays, fallback ticks,
//! and consensus pacing are exercised without wall-clock waits.

#![allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic,
    clippy::arithmetic_side_effects
)]

use std::sync::Arc;
use std::time::Duration;

use netsync_core::config::{FallbackWeights, SyncConfig};
use netsync_core::connection::{ConnectionMode, ConnectionState, DisconnectReason};
use netsync_core::dispatcher::{BusEvent, EventKind, SwapChange};
use netsync_core::engine::SyncEngine;
use netsync_core::reconciler::FullStateOutcome;
use netsync_core::transport::{MemoryConnector, MemoryPeer};
use netsync_types::{
    ChannelId, ConsensusEvent, InboundEvent, NetworkState, NodeId, NodeType, RawNetworkUpdate,
    event_names,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;

const HUB: &str = "mem://hub";

fn config() -> SyncConfig {
    let mut config = SyncConfig::default();
    config.transport.reconnect_attempts = 1;
    config.transport.reconnect_delay_ms = 100;
    config.transport.connect_timeout_ms = 50;
    config.fallback.tick_interval_ms = 1_000;
    config.consensus.pacing_interval_ms = 500;
    config
}

fn engine_with(config: SyncConfig) -> (SyncEngine<MemoryConnector>, MemoryConnector) {
    let connector = MemoryConnector::new();
    (SyncEngine::new(config, connector.clone()), connector)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

fn entity(id: &str) -> Value {
    json!({
        "id": id,
        "type": "entity",
        "name": id,
        "layer": 2,
        "depositaryId": "dep",
        "consensusType": "proposer-based",
        "validators": ["0x01", "0x02"],
        "tvl": "1000",
        "transactionRate": 1.0
    })
}

fn channel(source: &str, target: &str, capacity: u64) -> Value {
    json!({
        "id": format!("{source}-{target}"),
        "source": source,
        "target": target,
        "capacity": capacity.to_string(),
        "available": capacity.to_string(),
        "creditLine": "0",
        "isActive": true,
        "lastUpdate": 0
    })
}

fn update(kind: &str, data: Value) -> InboundEvent {
    InboundEvent::NetworkUpdate(RawNetworkUpdate {
        kind: kind.to_owned(),
        data,
        timestamp: None,
    })
}

fn state(version: u64, nodes: &[Value], channels: &[Value]) -> InboundEvent {
    update(
        "state",
        json!({ "nodes": nodes, "channels": channels, "timestamp": 1_000, "version": version }),
    )
}

fn consensus(round: u64) -> InboundEvent {
    let event: ConsensusEvent = serde_json::from_value(json!({
        "id": format!("round-{round}"),
        "entityId": "A",
        "type": "proposer-based",
        "round": round,
        "proposer": "0x01",
        "validators": ["0x01", "0x02"],
        "timestamp": 0,
        "duration": 20,
        "success": true
    }))
    .unwrap();
    InboundEvent::Consensus(event)
}

fn record(engine: &SyncEngine<MemoryConnector>, kinds: &[EventKind]) -> Arc<Mutex<Vec<BusEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let sink = Arc::clone(&log);
        engine.on(*kind, move |event| {
            sink.lock().push(event.clone());
            Ok(())
        });
    }
    log
}

fn kinds(log: &Mutex<Vec<BusEvent>>) -> Vec<EventKind> {
    log.lock().iter().map(BusEvent::kind).collect()
}

async fn connected(engine: &SyncEngine<MemoryConnector>, connector: &MemoryConnector) -> MemoryPeer {
    assert_eq!(engine.connect(HUB).await, ConnectionState::Connected);
    let mut peer = connector.take_peer().unwrap();
    let request = peer.recv_request().await.unwrap();
    assert_eq!(request.event, event_names::REQUEST_STATE);
    peer
}

#[tokio::test(start_paused = true)]
async fn connect_emits_connect_and_requests_state() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::Connect]);

    let _peer = connected(&engine, &connector).await;

    let events = log.lock();
    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], BusEvent::Connect(ConnectionMode::Live)));
}

#[tokio::test(start_paused = true)]
async fn state_then_delta_updates_and_cascades() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::State, EventKind::Delta]);
    let peer = connected(&engine, &connector).await;

    peer.push(&state(1, &[entity("A"), entity("B")], &[channel("A", "B", 100)]));
    peer.push(&update(
        "delta",
        json!({
            "updatedNodes": [{ "id": "A", "transactionRate": 50.0 }],
            "removedNodes": ["B"]
        }),
    ));
    settle().await;

    let reader = engine.reader();
    let a = reader.node(&NodeId::from("A")).unwrap();
    assert!((a.as_entity().unwrap().transaction_rate - 50.0).abs() < f64::EPSILON);
    assert!(reader.node(&NodeId::from("B")).is_none());
    assert!(reader.channel(&ChannelId::from("A-B")).is_none());
    assert_eq!(reader.version(), 1);
    assert!(reader.read(|mirror| mirror.dangling_channels().is_empty()));
    assert_eq!(kinds(&log), vec![EventKind::State, EventKind::Delta]);
}

#[tokio::test(start_paused = true)]
async fn update_for_unknown_id_creates_nothing() {
    let (engine, connector) = engine_with(config());
    let peer = connected(&engine, &connector).await;

    peer.push(&state(1, &[entity("A")], &[]));
    settle().await;
    let before = engine.reader().snapshot();

    peer.push(&update(
        "delta",
        json!({ "updatedNodes": [{ "id": "X", "transactionRate": 3.0 }] }),
    ));
    settle().await;

    assert!(engine.reader().node(&NodeId::from("X")).is_none());
    assert_eq!(engine.reader().snapshot(), before);
    assert_eq!(engine.stats().ignored_items, 1);
}

#[tokio::test(start_paused = true)]
async fn unknown_tags_and_garbage_frames_are_dropped() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::State, EventKind::Delta, EventKind::Metrics]);
    let peer = connected(&engine, &connector).await;

    peer.push(&update("bogus", json!({})));
    peer.push_raw("mystery:event", "{}");
    peer.push_raw(event_names::CONSENSUS_EVENT, "not json");
    peer.push(&state(1, &[entity("A")], &[]));
    settle().await;

    let stats = engine.stats();
    assert_eq!(stats.unknown_updates, 1);
    assert_eq!(stats.malformed_frames, 2);
    assert_eq!(kinds(&log), vec![EventKind::State]);
    assert_eq!(engine.reader().node_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn older_full_state_is_discarded() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::State]);
    let peer = connected(&engine, &connector).await;

    peer.push(&state(5, &[entity("A")], &[]));
    peer.push(&state(3, &[entity("Z")], &[]));
    settle().await;

    let reader = engine.reader();
    assert_eq!(reader.version(), 5);
    assert!(reader.node(&NodeId::from("A")).is_some());
    assert!(reader.node(&NodeId::from("Z")).is_none());
    assert_eq!(engine.stats().stale_states, 1);
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn bootstrap_snapshot_shares_the_validation_path() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::State]);

    let snapshot: NetworkState = serde_json::from_value(json!({
        "nodes": [entity("A"), entity("B")],
        "channels": [channel("A", "B", 10), channel("A", "ghost", 10)],
        "timestamp": 500,
        "version": 4
    }))
    .unwrap();
    let outcome = engine.apply_full_state(snapshot);
    assert_eq!(
        outcome,
        FullStateOutcome::Applied {
            version: 4,
            dropped_channels: vec![ChannelId::from("A-ghost")],
        }
    );

    let peer = connected(&engine, &connector).await;
    peer.push(&state(2, &[entity("Q")], &[]));
    settle().await;

    assert_eq!(engine.reader().version(), 4);
    assert_eq!(engine.reader().channel_count(), 1);
    assert_eq!(log.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn metrics_and_swaps_pass_through() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::Metrics, EventKind::Swap]);
    let peer = connected(&engine, &connector).await;

    let swap = json!({
        "id": "s1",
        "sourceEntity": "A",
        "targetEntity": "B",
        "amountIn": "5",
        "status": "pending",
        "timestamp": 0
    });
    peer.push_raw(event_names::NETWORK_METRICS, r#"{"entityCount": 7, "healthScore": 99.5}"#);
    peer.push_raw(event_names::SWAP_EVENT, swap.to_string());
    peer.push_raw(event_names::SWAP_UPDATE, swap.to_string());
    settle().await;

    assert_eq!(engine.reader().metrics().unwrap().entity_count, 7);
    let events = log.lock();
    assert_eq!(events.len(), 3);
    assert!(matches!(events[1], BusEvent::Swap(SwapChange::Created, _)));
    assert!(matches!(events[2], BusEvent::Swap(SwapChange::Updated, _)));
}

#[tokio::test(start_paused = true)]
async fn unreachable_transport_falls_back_to_synthetic_feed() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::Connect, EventKind::Error, EventKind::State]);
    connector.refuse_all(true);

    assert_eq!(engine.connect(HUB).await, ConnectionState::FallbackSimulated);
    settle().await;

    assert_eq!(connector.attempts(), 2);
    assert!(engine.is_fallback_running());
    assert_eq!(
        kinds(&log),
        vec![
            EventKind::Error,
            EventKind::Error,
            EventKind::Connect,
            EventKind::State
        ]
    );
    assert!(matches!(log.lock()[2], BusEvent::Connect(ConnectionMode::Simulated)));

    let reader = engine.reader();
    assert_eq!(reader.version(), 1);
    assert_eq!(reader.read(|m| m.nodes_of_type(NodeType::Entity).count()), 6);
    assert!(!engine.request_consensus_history(&NodeId::from("entity-0"), 10));

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(engine.stats().fallback_ticks, 3);
    assert!(reader.read(|m| m.dangling_channels().is_empty()));
}

#[tokio::test(start_paused = true)]
async fn disconnect_stops_ticks_and_discards_queued_rounds() {
    let mut config = config();
    config.fallback.tick_interval_ms = 100;
    config.fallback.weights = FallbackWeights {
        metrics: 0,
        node_delta: 0,
        consensus: 1,
    };
    let (engine, connector) = engine_with(config);
    let log = record(&engine, &[EventKind::Disconnect]);
    let delivered = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&delivered);
    engine.on_consensus_event(move |_| {
        *counter.lock() += 1;
        Ok(())
    });
    connector.refuse_all(true);

    engine.connect(HUB).await;
    tokio::time::sleep(Duration::from_millis(1_050)).await;
    assert!(engine.pending_consensus() > 0);

    engine.disconnect();
    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
    assert_eq!(engine.pending_consensus(), 0);
    assert!(!engine.is_fallback_running());

    let ticks = engine.stats().fallback_ticks;
    let seen = *delivered.lock();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.stats().fallback_ticks, ticks);
    assert_eq!(*delivered.lock(), seen);
    assert!(matches!(
        log.lock().last(),
        Some(BusEvent::Disconnect(DisconnectReason::Requested))
    ));
}

#[tokio::test(start_paused = true)]
async fn live_connection_after_fallback_stops_the_generator() {
    let (engine, connector) = engine_with(config());
    connector.refuse_all(true);
    assert_eq!(engine.connect(HUB).await, ConnectionState::FallbackSimulated);

    connector.refuse_all(false);
    let _peer = connected(&engine, &connector).await;
    assert!(!engine.is_fallback_running());

    let ticks = engine.stats().fallback_ticks;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(engine.stats().fallback_ticks, ticks);
}

#[tokio::test(start_paused = true)]
async fn server_close_reconnects_and_asks_for_state_again() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::Connect, EventKind::Disconnect]);
    let peer = connected(&engine, &connector).await;

    peer.close();
    settle().await;

    assert_eq!(engine.connection_state(), ConnectionState::Connected);
    let mut second = connector.take_peer().unwrap();
    let request = second.recv_request().await.unwrap();
    assert_eq!(request.event, event_names::REQUEST_STATE);
    assert_eq!(
        kinds(&log),
        vec![EventKind::Connect, EventKind::Disconnect, EventKind::Connect]
    );
    assert!(matches!(
        log.lock()[1],
        BusEvent::Disconnect(DisconnectReason::ServerClosed)
    ));
}

#[tokio::test(start_paused = true)]
async fn fallback_after_a_live_session_replaces_the_live_graph() {
    let (engine, connector) = engine_with(config());
    let peer = connected(&engine, &connector).await;
    peer.push(&state(10, &[entity("A")], &[]));
    settle().await;

    connector.refuse_all(true);
    peer.close();
    tokio::time::sleep(Duration::from_millis(3_000)).await;

    assert_eq!(engine.connection_state(), ConnectionState::FallbackSimulated);
    let reader = engine.reader();
    assert_eq!(reader.version(), 11);
    assert!(reader.node(&NodeId::from("entity-0")).is_some());
    assert!(reader.node(&NodeId::from("A")).is_none());
    let stats = engine.stats();
    assert_eq!(stats.stale_states, 0);
    assert_eq!(stats.ignored_items, 0);
    assert!(stats.fallback_ticks > 0);

    connector.refuse_all(false);
    let live = connected(&engine, &connector).await;
    live.push(&state(10, &[entity("A")], &[]));
    settle().await;

    assert_eq!(reader.version(), 10);
    assert!(reader.node(&NodeId::from("A")).is_some());
    assert!(reader.node(&NodeId::from("entity-0")).is_none());
}

#[tokio::test(start_paused = true)]
async fn consensus_rounds_are_paced_in_arrival_order() {
    let (engine, connector) = engine_with(config());
    engine.on_consensus_event(|event| {
        if event.round == 2 {
            panic!("observer bug");
        }
        Ok(())
    });
    let _failing = engine.on(EventKind::Consensus, |_| Err("bus observer failed".into()));
    let arrivals = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&arrivals);
    engine.on_consensus_event(move |event| {
        sink.lock().push((event.round, Instant::now()));
        Ok(())
    });
    let peer = connected(&engine, &connector).await;

    for round in 1..=3 {
        peer.push(&consensus(round));
    }
    tokio::time::sleep(Duration::from_millis(2_000)).await;

    let arrivals = arrivals.lock();
    let rounds: Vec<u64> = arrivals.iter().map(|(round, _)| *round).collect();
    assert_eq!(rounds, vec![1, 2, 3]);
    for pair in arrivals.windows(2) {
        assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(500));
    }
    let stats = engine.stats();
    assert_eq!(stats.consensus_delivered, 3);
    assert_eq!(stats.handler_failures, 4);
    assert_eq!(engine.consensus_history(&NodeId::from("A"), 2).len(), 2);
}

#[tokio::test(start_paused = true)]
async fn outbound_requests_reach_the_publisher() {
    let (engine, connector) = engine_with(config());
    let mut peer = connected(&engine, &connector).await;
    let entity = NodeId::from("A");

    assert!(engine.subscribe_consensus(&entity));
    assert!(engine.request_consensus_history(&entity, 25));
    assert!(engine.unsubscribe_consensus(&entity));

    let first = peer.recv_request().await.unwrap();
    assert_eq!(first.event, event_names::SUBSCRIBE_CONSENSUS);
    let second = peer.recv_request().await.unwrap();
    assert_eq!(second.event, event_names::REQUEST_CONSENSUS_HISTORY);
    assert_eq!(second.json().unwrap(), json!({ "entityId": "A", "limit": 25 }));
    let third = peer.recv_request().await.unwrap();
    assert_eq!(third.event, event_names::UNSUBSCRIBE_CONSENSUS);
}

#[tokio::test(start_paused = true)]
async fn shutdown_silences_every_subscriber() {
    let (engine, connector) = engine_with(config());
    let log = record(&engine, &[EventKind::State]);
    let peer = connected(&engine, &connector).await;

    engine.shutdown();
    peer.push(&state(9, &[entity("A")], &[]));
    settle().await;

    assert!(log.lock().is_empty());
    assert_eq!(engine.connection_state(), ConnectionState::Disconnected);
}
