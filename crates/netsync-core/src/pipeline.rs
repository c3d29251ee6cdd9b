//! The single task that turns envelopes into mirror writes and bus events.
//!
//! Everything the connection manager and fallback feed produce funnels
//! through one unbounded channel into [`run`], so the mirror is written
//! from one place and bus events keep arrival order. Inbound data tagged
//! with an epoch older than the manager's current one is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use netsync_types::{InboundEvent, NetworkState, UpdateMessage};
use parking_lot::{ReentrantMutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::connection::{ConnectionManager, ConnectionMode, LifecycleEvent};
use crate::dispatcher::{BusEvent, SwapChange, UpdateDispatcher};
use crate::reconciler::{FullStateOutcome, StateReconciler};
use crate::scheduler::ConsensusScheduler;
use crate::stats::SyncStats;
use crate::transport::Connector;

/// What an envelope carries.
#[derive(Debug)]
pub(crate) enum Payload {
    Lifecycle(LifecycleEvent),
    Inbound(InboundEvent),
}

/// A unit of work for the pipeline, tagged with the epoch it was produced under.
#[derive(Debug)]
pub(crate) struct Envelope {
    pub(crate) epoch: u64,
    pub(crate) payload: Payload,
}

impl Envelope {
    pub(crate) const fn lifecycle(epoch: u64, event: LifecycleEvent) -> Self {
        Self {
            epoch,
            payload: Payload::Lifecycle(event),
        }
    }

    pub(crate) const fn inbound(epoch: u64, event: InboundEvent) -> Self {
        Self {
            epoch,
            payload: Payload::Inbound(event),
        }
    }
}

/// Routes decoded messages to the mirror, the scheduler, and the bus.
pub(crate) struct Router {
    pub(crate) dispatcher: Arc<UpdateDispatcher>,
    pub(crate) mirror: Arc<RwLock<StateReconciler>>,
    pub(crate) scheduler: Arc<ConsensusScheduler>,
    pub(crate) stats: Arc<SyncStats>,
    /// Whether the mirror is fed by the synthetic stream.
    pub(crate) simulated: AtomicBool,
}

impl Router {
    fn lifecycle(&self, event: LifecycleEvent) {
        let bus_event = match event {
            LifecycleEvent::Connected(mode) => {
                let simulated = mode == ConnectionMode::Simulated;
                if self.simulated.swap(simulated, Ordering::SeqCst) != simulated {
                    // Live and synthetic versions are unrelated sequences.
                    self.mirror.write().accept_next_state();
                }
                BusEvent::Connect(mode)
            }
            LifecycleEvent::Disconnected(reason) => BusEvent::Disconnect(reason),
            LifecycleEvent::Error(message) => BusEvent::Error(message),
        };
        self.dispatcher.emit(&bus_event);
    }

    fn inbound(&self, event: InboundEvent) {
        trace!(event = event.name(), "routing inbound event");
        match event {
            InboundEvent::NetworkUpdate(raw) => {
                if let Some(message) = self.dispatcher.normalize(raw) {
                    self.apply_update(message);
                }
            }
            InboundEvent::NetworkMetrics(metrics) => {
                self.apply_update(UpdateMessage::Metrics(metrics));
            }
            InboundEvent::Consensus(event) => self.scheduler.push(event),
            InboundEvent::SwapCreated(swap) => {
                self.dispatcher
                    .emit(&BusEvent::Swap(SwapChange::Created, Arc::new(swap)));
            }
            InboundEvent::SwapUpdated(swap) => {
                self.dispatcher
                    .emit(&BusEvent::Swap(SwapChange::Updated, Arc::new(swap)));
            }
        }
    }

    fn apply_update(&self, message: UpdateMessage) {
        match message {
            UpdateMessage::State(state) => {
                self.apply_full_state(state);
            }
            UpdateMessage::Delta(delta) => {
                let report = self.mirror.write().apply_delta(&delta);
                if !report.ignored.is_empty() {
                    self.stats.ignored_items(report.ignored.len());
                }
                self.dispatcher.emit(&BusEvent::Delta(Arc::new(delta)));
            }
            UpdateMessage::Metrics(metrics) => {
                self.mirror.write().apply_metrics(metrics.clone());
                self.dispatcher.emit(&BusEvent::Metrics(Arc::new(metrics)));
            }
        }
    }

    /// Offer a snapshot to the mirror and publish it if it was applied.
    ///
    /// Live snapshots, synthetic snapshots, and bootstrap snapshots from a
    /// history store all go through here.
    pub(crate) fn apply_full_state(&self, state: NetworkState) -> FullStateOutcome {
        let outcome = self.mirror.write().apply_full_state(&state);
        match &outcome {
            FullStateOutcome::Applied {
                dropped_channels, ..
            } => {
                if !dropped_channels.is_empty() {
                    self.stats.ignored_items(dropped_channels.len());
                }
                self.dispatcher.emit(&BusEvent::State(Arc::new(state)));
            }
            FullStateOutcome::Stale { .. } => self.stats.stale_state(),
        }
        outcome
    }
}

/// Consume envelopes until every sender is gone.
///
/// `gate` is held while an envelope is processed; teardown takes it too,
/// so a disconnect never interleaves with half-routed data.
pub(crate) async fn run<C: Connector>(
    mut envelopes: mpsc::UnboundedReceiver<Envelope>,
    router: Arc<Router>,
    manager: Arc<ConnectionManager<C>>,
    gate: Arc<ReentrantMutex<()>>,
) {
    while let Some(Envelope { epoch, payload }) = envelopes.recv().await {
        let _gate = gate.lock();
        match payload {
            Payload::Lifecycle(event) => {
                let connected = matches!(event, LifecycleEvent::Connected(_));
                router.lifecycle(event);
                if connected {
                    let current = router.mirror.read().version();
                    manager.request_state(current);
                }
            }
            Payload::Inbound(event) => {
                let current = manager.epoch();
                if epoch == current {
                    router.inbound(event);
                } else {
                    debug!(epoch, current, event = event.name(), "dropping stale envelope");
                    router.stats.stale_envelope();
                }
            }
        }
    }
    debug!("pipeline stopped");
}
