//! [`SyncEngine`], the facade consumers hold.
//!
//! The engine owns every component and the pipeline task that connects
//! them. Consumers subscribe to bus topics, read the mirror through a
//! [`MirrorReader`], and issue requests; they never touch the transport or
//! get mutable access to the graph.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use netsync_types::{ConsensusEvent, NetworkState, NodeId, OutboundRequest};
use parking_lot::{ReentrantMutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState};
use crate::dispatcher::{BusEvent, EventKind, UpdateDispatcher};
use crate::observers::{HandlerResult, Subscription};
use crate::pipeline::{self, Router};
use crate::reconciler::{FullStateOutcome, MirrorReader, StateReconciler};
use crate::scheduler::ConsensusScheduler;
use crate::stats::{StatsSnapshot, SyncStats};
use crate::transport::Connector;

/// The real-time mirror of a remote network graph.
pub struct SyncEngine<C: Connector> {
    config: SyncConfig,
    manager: Arc<ConnectionManager<C>>,
    router: Arc<Router>,
    reader: MirrorReader,
    gate: Arc<ReentrantMutex<()>>,
    pipeline: JoinHandle<()>,
    stats: Arc<SyncStats>,
}

impl<C: Connector> SyncEngine<C> {
    /// Build the engine and start its pipeline task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: SyncConfig, connector: C) -> Self {
        let stats = Arc::new(SyncStats::new());
        let (sink, envelopes) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(UpdateDispatcher::new(Arc::clone(&stats)));
        let mirror = Arc::new(RwLock::new(StateReconciler::new()));
        let gate = Arc::new(ReentrantMutex::new(()));
        let scheduler = Arc::new(ConsensusScheduler::with_gate(
            &config.consensus,
            Arc::clone(&stats),
            Arc::clone(&gate),
        ));

        // Paced consensus rounds reach bus subscribers through this observer.
        let bus = Arc::clone(&dispatcher);
        scheduler.on_consensus_event(move |event| {
            bus.emit(&BusEvent::Consensus(Arc::new(event.clone())));
            Ok(())
        });

        let manager = Arc::new(ConnectionManager::new(
            connector,
            config.transport.clone(),
            &config.fallback,
            sink,
            Arc::clone(&stats),
        ));
        let router = Arc::new(Router {
            dispatcher,
            mirror: Arc::clone(&mirror),
            scheduler,
            stats: Arc::clone(&stats),
            simulated: AtomicBool::new(false),
        });
        let pipeline = tokio::spawn(pipeline::run(
            envelopes,
            Arc::clone(&router),
            Arc::clone(&manager),
            Arc::clone(&gate),
        ));

        Self {
            config,
            manager,
            router,
            reader: MirrorReader::new(mirror),
            gate,
            pipeline,
            stats,
        }
    }

    /// Configuration the engine was built with.
    pub const fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Connect to `address` and wait until the attempt settles.
    ///
    /// See [`ConnectionManager::connect`]; this never fails.
    pub async fn connect(&self, address: &str) -> ConnectionState {
        self.manager.connect(address).await
    }

    /// Connect to the configured `transport.url`.
    pub async fn connect_configured(&self) -> ConnectionState {
        let address = self.config.transport.url.clone();
        self.manager.connect(&address).await
    }

    /// Close the session or stop the fallback feed, cancel retries, and
    /// discard queued consensus rounds.
    ///
    /// Subscriptions survive, so a later `connect` resumes delivery.
    pub fn disconnect(&self) {
        let _gate = self.gate.lock();
        self.manager.disconnect();
        self.router.scheduler.clear();
    }

    /// [`disconnect`](Self::disconnect), then drop every subscriber and
    /// stop the pipeline. The engine is inert afterwards.
    pub fn shutdown(&self) {
        let _gate = self.gate.lock();
        self.manager.disconnect();
        self.router.scheduler.shutdown();
        self.router.dispatcher.clear();
        self.pipeline.abort();
        info!("sync engine shut down");
    }

    /// Send a request to the publisher. `false` unless connected live.
    pub fn send(&self, request: &OutboundRequest) -> bool {
        self.manager.send(request)
    }

    /// Ask for a fresh full snapshot.
    pub fn request_state(&self) -> bool {
        self.manager.request_state(self.reader.version())
    }

    /// Ask for the last `limit` consensus rounds of `entity_id`.
    pub fn request_consensus_history(&self, entity_id: &NodeId, limit: u32) -> bool {
        self.send(&OutboundRequest::RequestConsensusHistory {
            entity_id: entity_id.clone(),
            limit,
        })
    }

    /// Start streaming consensus rounds of `entity_id`.
    pub fn subscribe_consensus(&self, entity_id: &NodeId) -> bool {
        self.send(&OutboundRequest::SubscribeConsensus {
            entity_id: entity_id.clone(),
        })
    }

    /// Stop streaming consensus rounds of `entity_id`.
    pub fn unsubscribe_consensus(&self, entity_id: &NodeId) -> bool {
        self.send(&OutboundRequest::UnsubscribeConsensus {
            entity_id: entity_id.clone(),
        })
    }

    /// Subscribe to a bus topic.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.dispatcher.on(kind, handler)
    }

    /// Remove a bus or consensus subscription.
    pub fn off(&self, subscription: &Subscription) -> bool {
        self.router.dispatcher.off(subscription)
    }

    /// Observe paced consensus rounds directly.
    pub fn on_consensus_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConsensusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.scheduler.on_consensus_event(handler)
    }

    /// Offer a snapshot from outside the transport, for example one
    /// rehydrated from a history store. Same validation as live snapshots.
    pub fn apply_full_state(&self, state: NetworkState) -> FullStateOutcome {
        let _gate = self.gate.lock();
        self.router.apply_full_state(state)
    }

    /// Read-only handle on the mirror.
    pub fn reader(&self) -> MirrorReader {
        self.reader.clone()
    }

    /// Current connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Receiver that observes every connection state change.
    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.manager.watch()
    }

    /// Whether the synthetic feed is ticking.
    pub fn is_fallback_running(&self) -> bool {
        self.manager.is_fallback_running()
    }

    /// Rounds of `entity_id` delivered so far, oldest first, at most `limit`.
    pub fn consensus_history(&self, entity_id: &NodeId, limit: usize) -> Vec<ConsensusEvent> {
        self.router.scheduler.history(entity_id, limit)
    }

    /// Consensus rounds waiting for delivery.
    pub fn pending_consensus(&self) -> usize {
        self.router.scheduler.pending()
    }

    /// Diagnostic counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

impl<C: Connector> Drop for SyncEngine<C> {
    fn drop(&mut self) {
        self.pipeline.abort();
        self.manager.halt();
        self.router.scheduler.clear();
    }
}

impl<C: Connector> std::fmt::Debug for SyncEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("connection", &self.manager.state())
            .field("mirror", &self.reader)
            .finish_non_exhaustive()
    }
}
