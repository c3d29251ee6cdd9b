//! Typed publish/subscribe bus between the pipeline and its consumers.
//!
//! Consumers never see raw transport frames. The pipeline decodes each
//! frame once, applies it to the mirror, and then publishes a [`BusEvent`]
//! on the [`UpdateDispatcher`]. Each [`EventKind`] has its own ordered
//! [`ObserverList`], so a `delta` subscriber is never invoked for a
//! `metrics` event.

use std::fmt;
use std::sync::Arc;

use netsync_types::{
    ConsensusEvent, DecodeError, NetworkDelta, NetworkMetrics, NetworkState, RawNetworkUpdate,
    SwapRecord, UpdateMessage,
};
use tracing::{debug, warn};

use crate::connection::{ConnectionMode, DisconnectReason};
use crate::observers::{HandlerResult, NotifyReport, ObserverList, Subscription};
use crate::stats::SyncStats;

/// The closed set of bus topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    /// Entered `Connected` or `FallbackSimulated`.
    Connect,
    /// Left the connected state.
    Disconnect,
    /// A connection-level failure worth surfacing.
    Error,
    /// A full snapshot was applied.
    State,
    /// A delta was applied.
    Delta,
    /// Metrics were replaced.
    Metrics,
    /// A consensus round was delivered by the scheduler.
    Consensus,
    /// A swap was created or changed status.
    Swap,
}

impl EventKind {
    /// Every topic, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::Connect,
        Self::Disconnect,
        Self::Error,
        Self::State,
        Self::Delta,
        Self::Metrics,
        Self::Consensus,
        Self::Swap,
    ];

    /// Lowercase topic name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Error => "error",
            Self::State => "state",
            Self::Delta => "delta",
            Self::Metrics => "metrics",
            Self::Consensus => "consensus",
            Self::Swap => "swap",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a swap notification announces a new swap or a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapChange {
    /// `swap:event`
    Created,
    /// `swap:update`
    Updated,
}

/// A payload published on the bus.
///
/// Large payloads are shared behind `Arc` so every handler sees the same
/// allocation.
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// Connection established, live or simulated.
    Connect(ConnectionMode),
    /// Connection closed.
    Disconnect(DisconnectReason),
    /// Connection-level failure description.
    Error(String),
    /// The snapshot that was just applied.
    State(Arc<NetworkState>),
    /// The delta that was just applied.
    Delta(Arc<NetworkDelta>),
    /// The metrics that were just stored.
    Metrics(Arc<NetworkMetrics>),
    /// A paced consensus round.
    Consensus(Arc<ConsensusEvent>),
    /// A swap notification.
    Swap(SwapChange, Arc<SwapRecord>),
}

impl BusEvent {
    /// Topic this payload is published on.
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connect(_) => EventKind::Connect,
            Self::Disconnect(_) => EventKind::Disconnect,
            Self::Error(_) => EventKind::Error,
            Self::State(_) => EventKind::State,
            Self::Delta(_) => EventKind::Delta,
            Self::Metrics(_) => EventKind::Metrics,
            Self::Consensus(_) => EventKind::Consensus,
            Self::Swap(..) => EventKind::Swap,
        }
    }
}

/// The bus. One instance per engine; no global listener state.
pub struct UpdateDispatcher {
    connect: ObserverList<BusEvent>,
    disconnect: ObserverList<BusEvent>,
    error: ObserverList<BusEvent>,
    state: ObserverList<BusEvent>,
    delta: ObserverList<BusEvent>,
    metrics: ObserverList<BusEvent>,
    consensus: ObserverList<BusEvent>,
    swap: ObserverList<BusEvent>,
    stats: Arc<SyncStats>,
}

impl UpdateDispatcher {
    /// Create a bus with no subscribers.
    pub fn new(stats: Arc<SyncStats>) -> Self {
        Self {
            connect: ObserverList::new(EventKind::Connect.as_str()),
            disconnect: ObserverList::new(EventKind::Disconnect.as_str()),
            error: ObserverList::new(EventKind::Error.as_str()),
            state: ObserverList::new(EventKind::State.as_str()),
            delta: ObserverList::new(EventKind::Delta.as_str()),
            metrics: ObserverList::new(EventKind::Metrics.as_str()),
            consensus: ObserverList::new(EventKind::Consensus.as_str()),
            swap: ObserverList::new(EventKind::Swap.as_str()),
            stats,
        }
    }

    const fn list(&self, kind: EventKind) -> &ObserverList<BusEvent> {
        match kind {
            EventKind::Connect => &self.connect,
            EventKind::Disconnect => &self.disconnect,
            EventKind::Error => &self.error,
            EventKind::State => &self.state,
            EventKind::Delta => &self.delta,
            EventKind::Metrics => &self.metrics,
            EventKind::Consensus => &self.consensus,
            EventKind::Swap => &self.swap,
        }
    }

    /// Append a handler for `kind`.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) -> HandlerResult + Send + Sync + 'static,
    {
        self.list(kind).add(handler)
    }

    /// Remove a handler. Returns `false` if it was already removed.
    pub fn off(&self, subscription: &Subscription) -> bool {
        subscription.detach()
    }

    /// Publish `event` to every handler of its topic registered right now.
    pub fn emit(&self, event: &BusEvent) -> NotifyReport {
        let kind = event.kind();
        let report = self.list(kind).notify(event);
        if report.failed > 0 {
            self.stats.handler_failures(report.failed);
        }
        debug!(topic = %kind, delivered = report.delivered, failed = report.failed, "bus event emitted");
        report
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.list(kind).len()
    }

    /// Remove every handler from every topic.
    pub fn clear(&self) {
        for kind in EventKind::ALL {
            self.list(kind).clear();
        }
    }

    /// Turn a raw `network:update` envelope into a typed message.
    ///
    /// Unknown tags and payloads that do not match their tag are dropped
    /// with a warning and counted; they never stop the stream.
    pub fn normalize(&self, raw: RawNetworkUpdate) -> Option<UpdateMessage> {
        match raw.decode() {
            Ok(message) => Some(message),
            Err(DecodeError::UnknownUpdateKind { tag }) => {
                warn!(tag = %tag, "dropping network update with unknown type");
                self.stats.unknown_update();
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed network update");
                self.stats.malformed_frame();
                None
            }
        }
    }
}

impl fmt::Debug for UpdateDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind.as_str(), &self.list(kind).len());
        }
        map.finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};
    use netsync_types::UpdateKind;
    use parking_lot::Mutex;

    use super::*;

    fn dispatcher() -> (UpdateDispatcher, Arc<SyncStats>) {
        let stats = Arc::new(SyncStats::new());
        (UpdateDispatcher::new(Arc::clone(&stats)), stats)
    }

    #[test]
    fn handlers_only_receive_their_topic() {
        let (bus, _) = dispatcher();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _sub = bus.on(EventKind::Error, move |event| {
            seen_in.lock().push(event.kind());
            Ok(())
        });

        bus.emit(&BusEvent::Connect(ConnectionMode::Live));
        bus.emit(&BusEvent::Error("refused".to_owned()));

        assert_eq!(*seen.lock(), vec![EventKind::Error]);
        assert_eq!(bus.handler_count(EventKind::Error), 1);
        assert_eq!(bus.handler_count(EventKind::Connect), 0);
    }

    #[test]
    fn off_removes_by_identity() {
        let (bus, _) = dispatcher();
        let first = bus.on(EventKind::Swap, |_| Ok(()));
        let _second = bus.on(EventKind::Swap, |_| Ok(()));

        assert!(bus.off(&first));
        assert!(!bus.off(&first));
        assert_eq!(bus.handler_count(EventKind::Swap), 1);

        bus.clear();
        assert_eq!(bus.handler_count(EventKind::Swap), 0);
    }

    #[test]
    fn handler_failures_are_counted() {
        let (bus, stats) = dispatcher();
        let _bad = bus.on(EventKind::Disconnect, |_| Err("nope".into()));
        let _good = bus.on(EventKind::Disconnect, |_| Ok(()));

        let report = bus.emit(&BusEvent::Disconnect(DisconnectReason::Requested));
        assert_eq!(report.delivered, 1);
        assert_eq!(stats.snapshot().handler_failures, 1);
    }

    #[test]
    fn normalize_drops_unknown_tags() {
        let (bus, stats) = dispatcher();
        let raw = RawNetworkUpdate {
            kind: "bogus".to_owned(),
            data: serde_json::json!({}),
            timestamp: None,
        };
        assert!(bus.normalize(raw).is_none());
        assert_eq!(stats.snapshot().unknown_updates, 1);
    }

    #[test]
    fn normalize_decodes_known_tags() {
        let (bus, stats) = dispatcher();
        let state = NetworkState::empty(4, Utc.timestamp_millis_opt(1_000).unwrap());
        let message = bus.normalize(RawNetworkUpdate::from_state(&state).unwrap());
        assert_eq!(message.map(|m| m.kind()), Some(UpdateKind::State));

        let malformed = RawNetworkUpdate {
            kind: "delta".to_owned(),
            data: serde_json::json!({ "addedNodes": 7 }),
            timestamp: None,
        };
        assert!(bus.normalize(malformed).is_none());
        assert_eq!(stats.snapshot().malformed_frames, 1);
    }
}
