//! Connection lifecycle: connect, retry, server close, and fallback.
//!
//! [`ConnectionManager`] owns either a live [`TransportSession`] or the
//! [`FallbackGenerator`], never both at once after a connection settles.
//! The state machine is:
//!
//! ```text
//! Disconnected --connect--> Connecting --ok--> Connected
//!                               |                  |
//!                               | retries          | server close
//!                               | exhausted        v
//!                               |            Disconnected --> Connecting (retry)
//!                               v
//!                        FallbackSimulated (until the next connect)
//! ```
//!
//! Each `connect` starts a supervisor task that makes one attempt plus
//! `reconnect_attempts` retries, spaced by `reconnect_delay_ms` and each
//! bounded by `connect_timeout_ms`. The same budget applies when a live
//! session is closed by the server.
//!
//! # Epochs
//!
//! Every `connect` and `disconnect` bumps an epoch counter. Supervisors and
//! fallback ticks tag what they produce with the epoch they were started
//! under and check it, under the session lock, before changing state. The
//! pipeline drops inbound data carrying an old epoch. Nothing started
//! before a teardown can surface after it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use netsync_types::{InboundEvent, OutboundRequest};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{FallbackConfig, TransportConfig};
use crate::pipeline::Envelope;
use crate::simulator::FallbackGenerator;
use crate::stats::SyncStats;
use crate::transport::{Connector, OutboundFrame, TransportSession};

/// Observable connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No session and no synthetic feed.
    Disconnected,
    /// An attempt or retry sequence is in progress.
    Connecting,
    /// A live session is open.
    Connected,
    /// Retries were exhausted; the synthetic feed is running.
    FallbackSimulated,
}

impl ConnectionState {
    /// Lowercase name for logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::FallbackSimulated => "fallback-simulated",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the data behind a `connect` event comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// A live transport session.
    Live,
    /// The synthetic fallback feed.
    Simulated,
}

/// Why a `disconnect` event was emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The caller asked for it.
    Requested,
    /// The remote end closed the session.
    ServerClosed,
}

/// Lifecycle notifications produced by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Entered `Connected` or `FallbackSimulated`.
    Connected(ConnectionMode),
    /// Left the connected state.
    Disconnected(DisconnectReason),
    /// An attempt failed, or retries were exhausted with fallback disabled.
    Error(String),
}

struct Session {
    address: Option<String>,
    outbound: Option<mpsc::UnboundedSender<OutboundFrame>>,
    supervisor: Option<JoinHandle<()>>,
    fallback: FallbackGenerator,
}

struct Inner<C> {
    connector: C,
    transport: TransportConfig,
    fallback_enabled: bool,
    epoch: Arc<AtomicU64>,
    state: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    sink: mpsc::UnboundedSender<Envelope>,
    stats: Arc<SyncStats>,
}

impl<C: Connector> Inner<C> {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn emit(&self, epoch: u64, event: LifecycleEvent) {
        if self.sink.send(Envelope::lifecycle(epoch, event)).is_err() {
            debug!("pipeline gone; lifecycle event dropped");
        }
    }

    /// Change state and emit `event` if `epoch` is still current.
    fn transition(&self, epoch: u64, state: ConnectionState, event: Option<LifecycleEvent>) -> bool {
        let _session = self.session.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.state.send_replace(state);
        if let Some(event) = event {
            self.emit(epoch, event);
        }
        true
    }

    fn report_failure(&self, epoch: u64, message: String) -> bool {
        let _session = self.session.lock();
        if !self.is_current(epoch) {
            return false;
        }
        self.emit(epoch, LifecycleEvent::Error(message));
        true
    }

    fn session_opened(&self, epoch: u64, outbound: mpsc::UnboundedSender<OutboundFrame>) -> bool {
        let mut session = self.session.lock();
        if !self.is_current(epoch) {
            return false;
        }
        session.fallback.stop();
        session.outbound = Some(outbound);
        self.state.send_replace(ConnectionState::Connected);
        self.emit(epoch, LifecycleEvent::Connected(ConnectionMode::Live));
        true
    }

    fn session_closed(&self, epoch: u64) -> bool {
        let mut session = self.session.lock();
        if !self.is_current(epoch) {
            return false;
        }
        session.outbound = None;
        self.state.send_replace(ConnectionState::Disconnected);
        self.emit(epoch, LifecycleEvent::Disconnected(DisconnectReason::ServerClosed));
        true
    }

    fn retries_exhausted(&self, epoch: u64, address: &str) {
        let mut session = self.session.lock();
        if !self.is_current(epoch) {
            return;
        }
        if self.fallback_enabled {
            warn!(address, "retries exhausted; entering fallback mode");
            let sink = fallback_sink(&self.sink, &self.epoch, epoch);
            session.fallback.start(sink);
            self.state.send_replace(ConnectionState::FallbackSimulated);
            self.emit(epoch, LifecycleEvent::Connected(ConnectionMode::Simulated));
        } else {
            warn!(address, "retries exhausted; fallback disabled");
            self.state.send_replace(ConnectionState::Disconnected);
            self.emit(
                epoch,
                LifecycleEvent::Error(format!("unable to connect to {address}")),
            );
        }
    }

    /// Forward a live inbound event. Returns `false` once the epoch is stale.
    fn forward(&self, epoch: u64, event: InboundEvent) -> bool {
        self.is_current(epoch) && self.sink.send(Envelope::inbound(epoch, event)).is_ok()
    }
}

fn fallback_sink(
    sink: &mpsc::UnboundedSender<Envelope>,
    epochs: &Arc<AtomicU64>,
    epoch: u64,
) -> impl Fn(InboundEvent) -> bool + Send + 'static {
    let sink = sink.clone();
    let epochs = Arc::clone(epochs);
    move |event| {
        epochs.load(Ordering::SeqCst) == epoch && sink.send(Envelope::inbound(epoch, event)).is_ok()
    }
}

/// Try to open a session: one attempt plus the configured retries.
async fn establish<C: Connector>(
    inner: &Inner<C>,
    address: &str,
    epoch: u64,
) -> Option<TransportSession> {
    let attempts = inner.transport.reconnect_attempts.saturating_add(1);
    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::time::sleep(inner.transport.reconnect_delay()).await;
        }
        if !inner.is_current(epoch) {
            return None;
        }
        let result =
            tokio::time::timeout(inner.transport.connect_timeout(), inner.connector.connect(address))
                .await;
        let message = match result {
            Ok(Ok(session)) => return Some(session),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "connection to {address} timed out after {} ms",
                inner.transport.connect_timeout_ms
            ),
        };
        warn!(address, attempt, attempts, error = %message, "connection attempt failed");
        if !inner.report_failure(epoch, message) {
            return None;
        }
    }
    None
}

/// Own one connection lifecycle until it is superseded or falls back.
async fn supervise<C: Connector>(inner: Arc<Inner<C>>, address: String, epoch: u64) {
    loop {
        let Some(session) = establish(&inner, &address, epoch).await else {
            inner.retries_exhausted(epoch, &address);
            return;
        };

        let TransportSession { outbound, mut inbound } = session;
        if !inner.session_opened(epoch, outbound) {
            return;
        }
        info!(address = %address, "connected");

        while let Some(frame) = inbound.recv().await {
            inner.stats.frame_received();
            match frame.decode() {
                Ok(event) => {
                    if !inner.forward(epoch, event) {
                        return;
                    }
                }
                Err(e) => {
                    warn!(event = %frame.event, error = %e, "dropping undecodable frame");
                    inner.stats.malformed_frame();
                }
            }
        }

        warn!(address = %address, "session closed by server");
        if !inner.session_closed(epoch) {
            return;
        }
        if !inner.transition(epoch, ConnectionState::Connecting, None) {
            return;
        }
    }
}

/// Owner of the live session or the fallback feed.
pub struct ConnectionManager<C: Connector> {
    inner: Arc<Inner<C>>,
}

impl<C: Connector> ConnectionManager<C> {
    pub(crate) fn new(
        connector: C,
        transport: TransportConfig,
        fallback: &FallbackConfig,
        sink: mpsc::UnboundedSender<Envelope>,
        stats: Arc<SyncStats>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let generator = FallbackGenerator::new(fallback, Arc::clone(&stats));
        Self {
            inner: Arc::new(Inner {
                connector,
                transport,
                fallback_enabled: fallback.enabled,
                epoch: Arc::new(AtomicU64::new(0)),
                state,
                session: Mutex::new(Session {
                    address: None,
                    outbound: None,
                    supervisor: None,
                    fallback: generator,
                }),
                sink,
                stats,
            }),
        }
    }

    /// Connect to `address` and wait until the attempt settles.
    ///
    /// Never fails: an unreachable address ends in
    /// [`ConnectionState::FallbackSimulated`] (or `Disconnected` when
    /// fallback is disabled). Calling it again for the address already
    /// connected or being connected to does not start a new attempt.
    pub async fn connect(&self, address: &str) -> ConnectionState {
        let mut watcher = self.inner.state.subscribe();
        {
            let mut session = self.inner.session.lock();
            let current = *self.inner.state.borrow();
            let same_address = session.address.as_deref() == Some(address);
            if same_address && current == ConnectionState::Connected {
                debug!(address, "already connected");
                return current;
            }
            if !(same_address && current == ConnectionState::Connecting) {
                let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
                if let Some(supervisor) = session.supervisor.take() {
                    supervisor.abort();
                }
                session.outbound = None;
                // Synthetic data only flows in fallback; a failed attempt restarts it.
                session.fallback.stop();
                if current == ConnectionState::Connected {
                    self.inner
                        .emit(epoch, LifecycleEvent::Disconnected(DisconnectReason::Requested));
                }
                session.address = Some(address.to_owned());
                self.inner.state.send_replace(ConnectionState::Connecting);
                info!(address, epoch, "connecting");
                session.supervisor = Some(tokio::spawn(supervise(
                    Arc::clone(&self.inner),
                    address.to_owned(),
                    epoch,
                )));
            }
        }
        match watcher
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
        {
            Ok(state) => *state,
            Err(_) => ConnectionState::Disconnected,
        }
    }

    /// Tear down the session or fallback feed and cancel pending retries.
    ///
    /// Emits a `disconnect` event unless already disconnected.
    pub fn disconnect(&self) {
        let mut session = self.inner.session.lock();
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        if let Some(supervisor) = session.supervisor.take() {
            supervisor.abort();
        }
        session.fallback.stop();
        session.outbound = None;
        session.address = None;
        let previous = self.inner.state.send_replace(ConnectionState::Disconnected);
        if previous != ConnectionState::Disconnected {
            info!(from = %previous, "disconnected");
            self.inner
                .emit(epoch, LifecycleEvent::Disconnected(DisconnectReason::Requested));
        }
    }

    /// Send a request over the live session.
    ///
    /// Returns `false` with a warning when not connected; the fallback
    /// feed never accepts outbound requests.
    pub fn send(&self, request: &OutboundRequest) -> bool {
        let frame = match OutboundFrame::from_request(request) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event = request.event_name(), error = %e, "failed to encode request");
                return false;
            }
        };
        self.send_frame(frame)
    }

    /// Send a pre-encoded frame over the live session.
    pub fn send_frame(&self, frame: OutboundFrame) -> bool {
        let session = self.inner.session.lock();
        let state = *self.inner.state.borrow();
        match (&session.outbound, state) {
            (Some(outbound), ConnectionState::Connected) => {
                let event = frame.event.clone();
                if outbound.send(frame).is_ok() {
                    debug!(event = %event, "request sent");
                    true
                } else {
                    warn!(event = %event, "session closed; request dropped");
                    false
                }
            }
            _ => {
                warn!(event = %frame.event, state = %state, "not connected; request dropped");
                false
            }
        }
    }

    /// Ask for a full snapshot.
    ///
    /// Sent over the wire when connected. In fallback mode the synthetic
    /// feed answers locally with its current graph, versioned above
    /// `current_version` so the mirror accepts it.
    pub fn request_state(&self, current_version: u64) -> bool {
        let state = *self.inner.state.borrow();
        match state {
            ConnectionState::Connected => self.send(&OutboundRequest::RequestState),
            ConnectionState::FallbackSimulated => {
                let session = self.inner.session.lock();
                let epoch = self.inner.epoch.load(Ordering::SeqCst);
                match session.fallback.resync(current_version) {
                    Ok(event) => self.inner.forward(epoch, event),
                    Err(e) => {
                        warn!(error = %e, "failed to build synthetic snapshot");
                        false
                    }
                }
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                warn!(state = %state, "state request ignored while not connected");
                false
            }
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Address of the current or last attempted connection.
    pub fn address(&self) -> Option<String> {
        self.inner.session.lock().address.clone()
    }

    /// Whether the synthetic feed is ticking.
    pub fn is_fallback_running(&self) -> bool {
        self.inner.session.lock().fallback.is_running()
    }

    /// Current epoch.
    pub(crate) fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::SeqCst)
    }

    /// Stop every task without emitting events.
    pub(crate) fn halt(&self) {
        let mut session = self.inner.session.lock();
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(supervisor) = session.supervisor.take() {
            supervisor.abort();
        }
        session.fallback.stop();
        session.outbound = None;
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.halt();
    }
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("epoch", &self.epoch())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::pipeline::Payload;
    use crate::transport::MemoryConnector;

    struct Harness {
        manager: ConnectionManager<MemoryConnector>,
        connector: MemoryConnector,
        events: mpsc::UnboundedReceiver<Envelope>,
    }

    fn harness(attempts: u32, fallback_enabled: bool) -> Harness {
        let connector = MemoryConnector::new();
        let (sink, events) = mpsc::unbounded_channel();
        let transport = TransportConfig {
            reconnect_attempts: attempts,
            reconnect_delay_ms: 100,
            connect_timeout_ms: 50,
            ..TransportConfig::default()
        };
        let fallback = FallbackConfig {
            enabled: fallback_enabled,
            tick_interval_ms: 1_000,
            ..FallbackConfig::default()
        };
        let manager = ConnectionManager::new(
            connector.clone(),
            transport,
            &fallback,
            sink,
            Arc::new(SyncStats::new()),
        );
        Harness {
            manager,
            connector,
            events,
        }
    }

    fn lifecycle(events: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        while let Ok(envelope) = events.try_recv() {
            if let Payload::Lifecycle(event) = envelope.payload {
                out.push(event);
            }
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_for_the_same_address() {
        let mut h = harness(0, true);
        assert_eq!(h.manager.connect("mem://a").await, ConnectionState::Connected);
        assert_eq!(h.manager.connect("mem://a").await, ConnectionState::Connected);
        assert_eq!(h.connector.attempts(), 1);
        assert_eq!(
            lifecycle(&mut h.events),
            vec![LifecycleEvent::Connected(ConnectionMode::Live)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_enter_fallback() {
        let mut h = harness(2, true);
        h.connector.refuse_all(true);

        let state = h.manager.connect("mem://a").await;
        assert_eq!(state, ConnectionState::FallbackSimulated);
        assert_eq!(h.connector.attempts(), 3);
        assert!(h.manager.is_fallback_running());

        let events = lifecycle(&mut h.events);
        assert_eq!(events.len(), 4);
        assert!(matches!(events[0], LifecycleEvent::Error(_)));
        assert_eq!(
            events.last(),
            Some(&LifecycleEvent::Connected(ConnectionMode::Simulated))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_count_as_failed_attempts() {
        let h = harness(1, true);
        h.connector.stall(true);
        let state = h.manager.connect("mem://a").await;
        assert_eq!(state, ConnectionState::FallbackSimulated);
        assert_eq!(h.connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fallback_disabled_ends_disconnected_with_error() {
        let mut h = harness(0, false);
        h.connector.refuse_all(true);

        assert_eq!(h.manager.connect("mem://a").await, ConnectionState::Disconnected);
        assert!(!h.manager.is_fallback_running());
        let events = lifecycle(&mut h.events);
        assert!(matches!(events.last(), Some(LifecycleEvent::Error(m)) if m.contains("unable to connect")));
    }

    #[tokio::test(start_paused = true)]
    async fn send_is_a_no_op_unless_connected() {
        let h = harness(0, true);
        assert!(!h.manager.send(&OutboundRequest::RequestState));

        h.connector.refuse_all(true);
        h.manager.connect("mem://a").await;
        assert_eq!(h.manager.state(), ConnectionState::FallbackSimulated);
        assert!(!h.manager.send(&OutboundRequest::RequestState));
    }

    #[tokio::test(start_paused = true)]
    async fn send_reaches_the_peer_when_connected() {
        let h = harness(0, true);
        h.manager.connect("mem://a").await;
        let mut peer = h.connector.take_peer().unwrap();

        assert!(h.manager.request_state(0));
        let frame = peer.recv_request().await.unwrap();
        assert_eq!(frame.event, "request:state");
    }

    #[tokio::test(start_paused = true)]
    async fn server_close_reconnects() {
        let mut h = harness(3, true);
        h.manager.connect("mem://a").await;
        let peer = h.connector.take_peer().unwrap();
        lifecycle(&mut h.events);

        peer.close();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.manager.state(), ConnectionState::Connected);
        assert_eq!(h.connector.attempts(), 2);
        assert_eq!(
            lifecycle(&mut h.events),
            vec![
                LifecycleEvent::Disconnected(DisconnectReason::ServerClosed),
                LifecycleEvent::Connected(ConnectionMode::Live),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retries() {
        let mut h = harness(5, true);
        h.connector.refuse_all(true);
        let manager = Arc::new(h.manager);
        let connecting = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.connect("mem://a").await })
        };
        tokio::time::sleep(Duration::from_millis(150)).await;
        manager.disconnect();
        assert_eq!(connecting.await.unwrap(), ConnectionState::Disconnected);

        let attempts = h.connector.attempts();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.connector.attempts(), attempts);
        assert!(!manager.is_fallback_running());
        assert_eq!(
            lifecycle(&mut h.events).last(),
            Some(&LifecycleEvent::Disconnected(DisconnectReason::Requested))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconnecting_from_fallback_stops_the_generator() {
        let h = harness(1, true);
        h.connector.refuse_all(true);
        assert_eq!(h.manager.connect("mem://a").await, ConnectionState::FallbackSimulated);
        assert!(h.manager.is_fallback_running());

        let attempt = h.manager.connect("mem://a");
        tokio::pin!(attempt);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut attempt)
                .await
                .is_err()
        );
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert!(!h.manager.is_fallback_running());

        h.connector.refuse_all(false);
        assert_eq!(attempt.await, ConnectionState::Connected);
        assert!(!h.manager.is_fallback_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_from_fallback_restarts_the_generator() {
        let h = harness(1, true);
        h.connector.refuse_all(true);
        h.manager.connect("mem://a").await;
        assert_eq!(h.manager.connect("mem://b").await, ConnectionState::FallbackSimulated);
        assert!(h.manager.is_fallback_running());
    }
}
