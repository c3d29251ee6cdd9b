//! Paced, strictly ordered delivery of consensus rounds.
//!
//! Rounds are pushed onto a FIFO queue and handed to observers by a single
//! drain task. After each delivery the task sleeps for the pacing interval,
//! so observers see one round at a time, in arrival order, never two at
//! once. A failing observer is logged and skipped; the queue keeps moving.
//!
//! The drain task only exists while the queue is non-empty. A queue
//! generation counter fences it: [`ConsensusScheduler::clear`] bumps the
//! generation and aborts the task, and a task that wakes up under an old
//! generation exits without touching the queue.
//!
//! Each delivery runs under a gate shared with the rest of the engine, so
//! consensus observers never run alongside other bus handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use netsync_types::{ConsensusEvent, NodeId};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::config::ConsensusConfig;
use crate::observers::{HandlerResult, ObserverList, Subscription};
use crate::stats::SyncStats;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ConsensusEvent>,
    drain: Option<JoinHandle<()>>,
    generation: u64,
}

struct Shared {
    queue: Mutex<QueueState>,
    observers: ObserverList<ConsensusEvent>,
    history: Mutex<HashMap<NodeId, VecDeque<ConsensusEvent>>>,
    pacing: Duration,
    history_limit: usize,
    stats: Arc<SyncStats>,
    gate: Arc<ReentrantMutex<()>>,
}

impl Shared {
    /// Pop the next round if `generation` is still current. Retires the
    /// drain when the queue is empty.
    fn next(&self, generation: u64) -> Option<ConsensusEvent> {
        let mut queue = self.queue.lock();
        if queue.generation != generation {
            return None;
        }
        let event = queue.pending.pop_front();
        if event.is_none() {
            queue.drain = None;
        }
        event
    }

    /// Deliver the head of the queue under the gate. `false` once the
    /// queue is empty or the generation is stale.
    fn deliver_next(&self, generation: u64) -> bool {
        let _gate = self.gate.lock();
        let Some(event) = self.next(generation) else {
            return false;
        };
        self.deliver(&event);
        true
    }

    fn deliver(&self, event: &ConsensusEvent) {
        self.remember(event);
        let report = self.observers.notify(event);
        if report.failed > 0 {
            self.stats.handler_failures(report.failed);
        }
        self.stats.consensus_delivered();
        trace!(
            entity = %event.entity_id,
            round = event.round,
            delivered = report.delivered,
            failed = report.failed,
            "consensus round delivered"
        );
    }

    fn remember(&self, event: &ConsensusEvent) {
        if self.history_limit == 0 {
            return;
        }
        let mut history = self.history.lock();
        let rounds = history.entry(event.entity_id.clone()).or_default();
        while rounds.len() >= self.history_limit {
            rounds.pop_front();
        }
        rounds.push_back(event.clone());
    }
}

async fn drain(shared: Arc<Shared>, generation: u64) {
    while shared.deliver_next(generation) {
        tokio::time::sleep(shared.pacing).await;
    }
    debug!(generation, "consensus drain finished");
}

/// FIFO queue plus a single paced drain task.
pub struct ConsensusScheduler {
    shared: Arc<Shared>,
}

impl ConsensusScheduler {
    /// Create an idle scheduler with a private gate.
    pub fn new(config: &ConsensusConfig, stats: Arc<SyncStats>) -> Self {
        Self::with_gate(config, stats, Arc::default())
    }

    /// Create an idle scheduler whose deliveries hold `gate`.
    pub fn with_gate(
        config: &ConsensusConfig,
        stats: Arc<SyncStats>,
        gate: Arc<ReentrantMutex<()>>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(QueueState::default()),
                observers: ObserverList::new("consensus"),
                history: Mutex::new(HashMap::new()),
                pacing: config.pacing_interval(),
                history_limit: config.history_limit,
                stats,
                gate,
            }),
        }
    }

    /// Enqueue a round, starting the drain task if none is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn push(&self, event: ConsensusEvent) {
        let mut queue = self.shared.queue.lock();
        queue.pending.push_back(event);
        if queue.drain.is_none() {
            let generation = queue.generation;
            queue.drain = Some(tokio::spawn(drain(Arc::clone(&self.shared), generation)));
        }
    }

    /// Register an observer. Observers run in registration order.
    pub fn on_consensus_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConsensusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.shared.observers.add(handler)
    }

    /// Number of rounds waiting for delivery.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    /// Whether a drain task is alive.
    pub fn is_draining(&self) -> bool {
        self.shared.queue.lock().drain.is_some()
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.shared.observers.len()
    }

    /// The most recent delivered rounds of `entity`, oldest first.
    pub fn history(&self, entity: &NodeId, limit: usize) -> Vec<ConsensusEvent> {
        let history = self.shared.history.lock();
        history.get(entity).map_or_else(Vec::new, |rounds| {
            let skip = rounds.len().saturating_sub(limit);
            rounds.iter().skip(skip).cloned().collect()
        })
    }

    /// Discard every pending round and cancel the drain task.
    ///
    /// Observers stay registered.
    pub fn clear(&self) {
        let mut queue = self.shared.queue.lock();
        let discarded = queue.pending.len();
        queue.pending.clear();
        queue.generation = queue.generation.wrapping_add(1);
        if let Some(handle) = queue.drain.take() {
            handle.abort();
        }
        if discarded > 0 {
            debug!(discarded, "consensus queue cleared");
        }
    }

    /// [`clear`](Self::clear), then drop every observer and the history.
    pub fn shutdown(&self) {
        self.clear();
        self.shared.observers.clear();
        self.shared.history.lock().clear();
    }
}

impl Drop for ConsensusScheduler {
    fn drop(&mut self) {
        self.clear();
    }
}

impl std::fmt::Debug for ConsensusScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusScheduler")
            .field("pending", &self.pending())
            .field("draining", &self.is_draining())
            .field("observers", &self.observer_count())
            .field("pacing", &self.shared.pacing)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::indexing_slicing)]
mod tests {
    use chrono::{TimeZone, Utc};
    use netsync_types::ConsensusType;
    use tokio::time::Instant;

    use super::*;

    fn round(entity: &str, round: u64) -> ConsensusEvent {
        ConsensusEvent {
            id: format!("{entity}-{round}"),
            entity_id: NodeId::from(entity),
            consensus_type: ConsensusType::GossipBased,
            round,
            proposer: None,
            validators: vec!["0x01".to_owned()],
            timestamp: Utc.timestamp_millis_opt(0).unwrap(),
            duration: 10,
            success: true,
        }
    }

    fn scheduler(pacing_ms: u64) -> (ConsensusScheduler, Arc<SyncStats>) {
        let stats = Arc::new(SyncStats::new());
        let config = ConsensusConfig {
            pacing_interval_ms: pacing_ms,
            history_limit: 3,
        };
        (ConsensusScheduler::new(&config, Arc::clone(&stats)), stats)
    }

    fn recording(scheduler: &ConsensusScheduler) -> Arc<Mutex<Vec<(u64, Instant)>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        scheduler.on_consensus_event(move |event| {
            sink.lock().push((event.round, Instant::now()));
            Ok(())
        });
        log
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn delivery_waits_for_the_gate() {
        let gate = Arc::new(ReentrantMutex::new(()));
        let config = ConsensusConfig {
            pacing_interval_ms: 10,
            history_limit: 3,
        };
        let scheduler =
            ConsensusScheduler::with_gate(&config, Arc::new(SyncStats::new()), Arc::clone(&gate));
        let log = recording(&scheduler);

        let (held_tx, held_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let holder = std::thread::spawn(move || {
            let _guard = gate.lock();
            held_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        });
        held_rx.recv().unwrap();

        scheduler.push(round("e1", 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.lock().is_empty());

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(log.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_in_order_with_pacing_gaps() {
        let (scheduler, _) = scheduler(500);
        let log = recording(&scheduler);

        for n in 1..=3 {
            scheduler.push(round("e1", n));
        }
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        let log = log.lock();
        let rounds: Vec<u64> = log.iter().map(|(r, _)| *r).collect();
        assert_eq!(rounds, vec![1, 2, 3]);
        for pair in log.windows(2) {
            assert!(pair[1].1.duration_since(pair[0].1) >= Duration::from_millis(500));
        }
        assert!(!scheduler.is_draining());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_observers_do_not_stall_the_queue() {
        let (scheduler, stats) = scheduler(100);
        scheduler.on_consensus_event(|event| {
            if event.round == 1 {
                panic!("observer bug");
            }
            Err("always unhappy".into())
        });
        let log = recording(&scheduler);

        scheduler.push(round("e1", 1));
        scheduler.push(round("e1", 2));
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(log.lock().len(), 2);
        let snap = stats.snapshot();
        assert_eq!(snap.handler_failures, 2);
        assert_eq!(snap.consensus_delivered, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_discards_pending_rounds() {
        let (scheduler, _) = scheduler(500);
        let log = recording(&scheduler);

        for n in 1..=3 {
            scheduler.push(round("e1", n));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(log.lock().len(), 1);

        scheduler.clear();
        assert_eq!(scheduler.pending(), 0);
        assert!(!scheduler.is_draining());
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(log.lock().len(), 1);

        // A fresh push after clearing starts a new drain.
        scheduler.push(round("e1", 9));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(log.lock().last().map(|(r, _)| *r), Some(9));
    }

    #[tokio::test(start_paused = true)]
    async fn history_is_bounded_per_entity() {
        let (scheduler, _) = scheduler(1);
        for n in 1..=5 {
            scheduler.push(round("e1", n));
        }
        scheduler.push(round("e2", 1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let e1: Vec<u64> = scheduler
            .history(&NodeId::from("e1"), 10)
            .iter()
            .map(|e| e.round)
            .collect();
        assert_eq!(e1, vec![3, 4, 5]);
        assert_eq!(scheduler.history(&NodeId::from("e1"), 1)[0].round, 5);
        assert_eq!(scheduler.history(&NodeId::from("e2"), 10).len(), 1);
        assert!(scheduler.history(&NodeId::from("e3"), 10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_observers() {
        let (scheduler, _) = scheduler(10);
        let log = recording(&scheduler);
        scheduler.shutdown();
        assert_eq!(scheduler.observer_count(), 0);

        scheduler.push(round("e1", 1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(log.lock().is_empty());
    }
}
