//! Transport abstraction between the connection manager and the wire.
//!
//! A [`Connector`] turns an address into a [`TransportSession`]: a pair of
//! channels carrying named frames in each direction. The manager does not
//! care what sits behind them. The session ends when the inbound channel
//! closes, which the manager treats as a server-initiated close.
//!
//! [`MemoryConnector`] keeps both ends in process. Tests and embedders use
//! it to script a publisher without a network.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use netsync_types::{DecodeError, InboundEvent, OutboundRequest};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

/// A named frame received from the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Wire event name, e.g. `network:update`.
    pub event: String,
    /// JSON payload.
    pub payload: Vec<u8>,
}

impl InboundFrame {
    /// Encode a typed event as a frame.
    pub fn from_event(event: &InboundEvent) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: event.name().to_owned(),
            payload: event.encode()?,
        })
    }

    /// Decode the frame into a typed event.
    pub fn decode(&self) -> Result<InboundEvent, DecodeError> {
        InboundEvent::decode(&self.event, &self.payload)
    }
}

/// A named frame sent to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Wire event name, e.g. `request:state`.
    pub event: String,
    /// JSON payload.
    pub payload: Vec<u8>,
}

impl OutboundFrame {
    /// Encode a typed request as a frame.
    pub fn from_request(request: &OutboundRequest) -> Result<Self, serde_json::Error> {
        Ok(Self {
            event: request.event_name().to_owned(),
            payload: request.payload()?,
        })
    }

    /// Parse the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

/// Errors raised while establishing a session.
///
/// The connection manager never surfaces these to callers; they drive the
/// retry and fallback logic and are reported as `error` bus events.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The remote end refused or could not be reached.
    #[error("connection to {address} failed: {message}")]
    Connect {
        /// Address that was dialed.
        address: String,
        /// Description of the failure.
        message: String,
    },

    /// The attempt did not complete within the configured timeout.
    #[error("connection to {address} timed out after {timeout_ms} ms")]
    Timeout {
        /// Address that was dialed.
        address: String,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The session was established but the event stream could not be opened.
    #[error("failed to subscribe to {subject}: {message}")]
    Subscribe {
        /// Subject or stream name.
        subject: String,
        /// Description of the failure.
        message: String,
    },
}

/// The client side of an established session.
#[derive(Debug)]
pub struct TransportSession {
    /// Frames to send to the publisher.
    pub outbound: mpsc::UnboundedSender<OutboundFrame>,
    /// Frames received from the publisher. Closes when the server does.
    pub inbound: mpsc::UnboundedReceiver<InboundFrame>,
}

/// The remote side of a session, held by the connector implementation.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Deliver frames to the client. Dropping it closes the session.
    pub inbound: mpsc::UnboundedSender<InboundFrame>,
    /// Frames the client sent.
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl TransportSession {
    /// Create a connected session and its remote end.
    pub fn pair() -> (Self, RemoteEnd) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            RemoteEnd {
                inbound: inbound_tx,
                outbound: outbound_rx,
            },
        )
    }
}

/// Something that can open a session to an address.
pub trait Connector: Send + Sync + 'static {
    /// Open a session. The manager bounds the returned future with its own
    /// timeout, so implementations need not.
    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<TransportSession, TransportError>> + Send;
}

#[derive(Debug, Default)]
struct MemoryState {
    attempts: u32,
    fail_next: u32,
    refuse_all: bool,
    stall: bool,
    peers: VecDeque<MemoryPeer>,
}

/// In-process connector whose remote ends are scripted through [`MemoryPeer`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    /// Create a connector that accepts every attempt.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the next `count` attempts.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().fail_next = count;
    }

    /// Refuse every attempt while `refuse` is set.
    pub fn refuse_all(&self, refuse: bool) {
        self.state.lock().refuse_all = refuse;
    }

    /// Make every attempt hang until the caller's timeout fires.
    pub fn stall(&self, stall: bool) {
        self.state.lock().stall = stall;
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Take the oldest unclaimed remote end.
    pub fn take_peer(&self) -> Option<MemoryPeer> {
        self.state.lock().peers.pop_front()
    }
}

impl Connector for MemoryConnector {
    fn connect(
        &self,
        address: &str,
    ) -> impl Future<Output = Result<TransportSession, TransportError>> + Send {
        let (stall, result) = {
            let mut state = self.state.lock();
            state.attempts = state.attempts.saturating_add(1);
            let result = if state.refuse_all || state.fail_next > 0 {
                state.fail_next = state.fail_next.saturating_sub(1);
                Err(TransportError::Connect {
                    address: address.to_owned(),
                    message: "connection refused".to_owned(),
                })
            } else if state.stall {
                Err(TransportError::Timeout {
                    address: address.to_owned(),
                    timeout_ms: 0,
                })
            } else {
                let (session, remote) = TransportSession::pair();
                state.peers.push_back(MemoryPeer {
                    address: address.to_owned(),
                    remote,
                });
                debug!(address, "memory session opened");
                Ok(session)
            };
            (state.stall, result)
        };
        async move {
            if stall {
                std::future::pending::<()>().await;
            }
            result
        }
    }
}

/// The scripted publisher side of a memory session.
#[derive(Debug)]
pub struct MemoryPeer {
    address: String,
    remote: RemoteEnd,
}

impl MemoryPeer {
    /// Address the client dialed.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Send a typed event. Returns `false` if the client side is gone.
    pub fn push(&self, event: &InboundEvent) -> bool {
        InboundFrame::from_event(event).is_ok_and(|frame| self.remote.inbound.send(frame).is_ok())
    }

    /// Send an arbitrary frame. Returns `false` if the client side is gone.
    pub fn push_raw(&self, event: &str, payload: impl Into<Vec<u8>>) -> bool {
        self.remote
            .inbound
            .send(InboundFrame {
                event: event.to_owned(),
                payload: payload.into(),
            })
            .is_ok()
    }

    /// Next request the client sent, if one is already waiting.
    pub fn try_recv_request(&mut self) -> Option<OutboundFrame> {
        self.remote.outbound.try_recv().ok()
    }

    /// Wait for the next request. `None` once the client side is gone.
    pub async fn recv_request(&mut self) -> Option<OutboundFrame> {
        self.remote.outbound.recv().await
    }

    /// Close the session from the server side.
    pub fn close(self) {
        debug!(address = %self.address, "memory session closed by peer");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use netsync_types::{NetworkMetrics, NodeId};

    use super::*;

    #[tokio::test]
    async fn memory_session_carries_frames_both_ways() {
        let connector = MemoryConnector::new();
        let mut session = connector.connect("mem://a").await.unwrap();
        let mut peer = connector.take_peer().unwrap();
        assert_eq!(peer.address(), "mem://a");

        assert!(peer.push(&InboundEvent::NetworkMetrics(NetworkMetrics::default())));
        let frame = session.inbound.recv().await.unwrap();
        assert!(matches!(frame.decode().unwrap(), InboundEvent::NetworkMetrics(_)));

        let request = OutboundRequest::SubscribeConsensus {
            entity_id: NodeId::from("e1"),
        };
        session
            .outbound
            .send(OutboundFrame::from_request(&request).unwrap())
            .unwrap();
        let sent = peer.recv_request().await.unwrap();
        assert_eq!(sent.event, "subscribeConsensus");
        assert_eq!(sent.json().unwrap()["entityId"], "e1");

        peer.close();
        assert!(session.inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn scripted_failures_are_counted() {
        let connector = MemoryConnector::new();
        connector.fail_next(2);
        assert!(connector.connect("mem://a").await.is_err());
        assert!(connector.connect("mem://a").await.is_err());
        assert!(connector.connect("mem://a").await.is_ok());
        assert_eq!(connector.attempts(), 3);

        connector.refuse_all(true);
        let err = connector.connect("mem://a").await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_attempts_never_resolve() {
        let connector = MemoryConnector::new();
        connector.stall(true);
        let attempt = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            connector.connect("mem://a"),
        )
        .await;
        assert!(attempt.is_err());
    }
}
