//! Named-event vocabulary between publisher and mirror.
//!
//! Every frame on the transport is an event name plus a JSON payload. This
//! module closes that stringly-typed surface: [`InboundEvent::decode`] turns
//! a frame into a typed value exactly once at the transport boundary, and
//! [`OutboundRequest`] enumerates everything the mirror may send.
//!
//! | direction | name | payload |
//! |---|---|---|
//! | in | `network:update` | [`RawNetworkUpdate`] |
//! | in | `network:metrics` | [`NetworkMetrics`] |
//! | in | `consensus:event` | [`ConsensusEvent`] |
//! | in | `swap:event` / `swap:update` | [`SwapRecord`] |
//! | out | `request:state` | none |
//! | out | `requestConsensusHistory` | `{ entityId, limit }` |
//! | out | `subscribeConsensus` / `unsubscribeConsensus` | `{ entityId }` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::consensus::{ConsensusEvent, SwapRecord};
use crate::enums::UpdateKind;
use crate::ids::NodeId;
use crate::state::{NetworkDelta, NetworkMetrics, NetworkState};

/// Event names used on the wire.
pub mod event_names {
    /// Inbound: graph update envelope (`state`, `delta`, or `metrics`).
    pub const NETWORK_UPDATE: &str = "network:update";
    /// Inbound: standalone metrics.
    pub const NETWORK_METRICS: &str = "network:metrics";
    /// Inbound: one consensus round.
    pub const CONSENSUS_EVENT: &str = "consensus:event";
    /// Inbound: a new swap.
    pub const SWAP_EVENT: &str = "swap:event";
    /// Inbound: a swap status change.
    pub const SWAP_UPDATE: &str = "swap:update";

    /// Outbound: ask for a full snapshot.
    pub const REQUEST_STATE: &str = "request:state";
    /// Outbound: ask for recent consensus rounds of one entity.
    pub const REQUEST_CONSENSUS_HISTORY: &str = "requestConsensusHistory";
    /// Outbound: start streaming consensus rounds of one entity.
    pub const SUBSCRIBE_CONSENSUS: &str = "subscribeConsensus";
    /// Outbound: stop streaming consensus rounds of one entity.
    pub const UNSUBSCRIBE_CONSENSUS: &str = "unsubscribeConsensus";

    /// Every inbound event name the mirror understands.
    pub const INBOUND: [&str; 5] = [
        NETWORK_UPDATE,
        NETWORK_METRICS,
        CONSENSUS_EVENT,
        SWAP_EVENT,
        SWAP_UPDATE,
    ];
}

/// Errors raised while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The frame carried an event name outside the inbound vocabulary.
    #[error("unknown event name: {name}")]
    UnknownEvent {
        /// The unrecognised name.
        name: String,
    },

    /// A `network:update` envelope carried an unrecognised type tag.
    #[error("unknown network update type: {tag}")]
    UnknownUpdateKind {
        /// The unrecognised tag.
        tag: String,
    },

    /// The payload did not match the schema of its event.
    #[error("malformed {event} payload: {source}")]
    Malformed {
        /// Event or update kind being decoded.
        event: String,
        /// The underlying JSON error.
        source: serde_json::Error,
    },
}

/// The `network:update` envelope before its type tag has been inspected.
///
/// The tag is kept as a string so an unknown tag can be reported and
/// dropped instead of failing the whole frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawNetworkUpdate {
    /// Type tag: `state`, `delta`, or `metrics`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Payload whose schema depends on `kind`.
    #[serde(default)]
    pub data: serde_json::Value,
    /// Publisher timestamp.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

impl RawNetworkUpdate {
    /// Build an envelope of the given kind around a serializable payload.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if `data` cannot be converted to a value.
    pub fn new<T: Serialize>(
        kind: UpdateKind,
        data: &T,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind: kind.as_str().to_owned(),
            data: serde_json::to_value(data)?,
            timestamp,
        })
    }

    /// Envelope carrying a full snapshot.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the snapshot cannot be serialized.
    pub fn from_state(state: &NetworkState) -> Result<Self, serde_json::Error> {
        Self::new(UpdateKind::State, state, Some(state.timestamp))
    }

    /// Envelope carrying a delta.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the delta cannot be serialized.
    pub fn from_delta(
        delta: &NetworkDelta,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Self::new(UpdateKind::Delta, delta, Some(timestamp))
    }

    /// Envelope carrying metrics.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the metrics cannot be serialized.
    pub fn from_metrics(
        metrics: &NetworkMetrics,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        Self::new(UpdateKind::Metrics, metrics, Some(timestamp))
    }

    /// The recognised kind of this envelope, if any.
    pub fn update_kind(&self) -> Option<UpdateKind> {
        UpdateKind::from_tag(&self.kind)
    }

    /// Inspect the tag and decode the payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownUpdateKind`] for an unrecognised tag,
    /// or [`DecodeError::Malformed`] if the payload does not match the
    /// schema selected by the tag.
    pub fn decode(self) -> Result<UpdateMessage, DecodeError> {
        let Some(kind) = self.update_kind() else {
            return Err(DecodeError::UnknownUpdateKind { tag: self.kind });
        };
        let malformed = |source| DecodeError::Malformed {
            event: format!("{}/{}", event_names::NETWORK_UPDATE, kind.as_str()),
            source,
        };
        match kind {
            UpdateKind::State => serde_json::from_value(self.data)
                .map(UpdateMessage::State)
                .map_err(malformed),
            UpdateKind::Delta => serde_json::from_value(self.data)
                .map(UpdateMessage::Delta)
                .map_err(malformed),
            UpdateKind::Metrics => serde_json::from_value(self.data)
                .map(UpdateMessage::Metrics)
                .map_err(malformed),
        }
    }
}

/// A decoded `network:update` payload.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateMessage {
    /// A complete snapshot.
    State(NetworkState),
    /// An incremental change set.
    Delta(NetworkDelta),
    /// Aggregate metrics.
    Metrics(NetworkMetrics),
}

impl UpdateMessage {
    /// The kind of this message.
    pub const fn kind(&self) -> UpdateKind {
        match self {
            Self::State(_) => UpdateKind::State,
            Self::Delta(_) => UpdateKind::Delta,
            Self::Metrics(_) => UpdateKind::Metrics,
        }
    }
}

/// A typed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// `network:update`
    NetworkUpdate(RawNetworkUpdate),
    /// `network:metrics`
    NetworkMetrics(NetworkMetrics),
    /// `consensus:event`
    Consensus(ConsensusEvent),
    /// `swap:event`
    SwapCreated(SwapRecord),
    /// `swap:update`
    SwapUpdated(SwapRecord),
}

impl InboundEvent {
    /// Decode a frame from its event name and JSON payload.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownEvent`] if `name` is not an inbound
    /// event, or [`DecodeError::Malformed`] if the payload does not match.
    pub fn decode(name: &str, payload: &[u8]) -> Result<Self, DecodeError> {
        let malformed = |source| DecodeError::Malformed {
            event: name.to_owned(),
            source,
        };
        match name {
            event_names::NETWORK_UPDATE => serde_json::from_slice(payload)
                .map(Self::NetworkUpdate)
                .map_err(malformed),
            event_names::NETWORK_METRICS => serde_json::from_slice(payload)
                .map(Self::NetworkMetrics)
                .map_err(malformed),
            event_names::CONSENSUS_EVENT => serde_json::from_slice(payload)
                .map(Self::Consensus)
                .map_err(malformed),
            event_names::SWAP_EVENT => serde_json::from_slice(payload)
                .map(Self::SwapCreated)
                .map_err(malformed),
            event_names::SWAP_UPDATE => serde_json::from_slice(payload)
                .map(Self::SwapUpdated)
                .map_err(malformed),
            other => Err(DecodeError::UnknownEvent {
                name: other.to_owned(),
            }),
        }
    }

    /// The wire name of this event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NetworkUpdate(_) => event_names::NETWORK_UPDATE,
            Self::NetworkMetrics(_) => event_names::NETWORK_METRICS,
            Self::Consensus(_) => event_names::CONSENSUS_EVENT,
            Self::SwapCreated(_) => event_names::SWAP_EVENT,
            Self::SwapUpdated(_) => event_names::SWAP_UPDATE,
        }
    }

    /// Encode the payload as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::NetworkUpdate(update) => serde_json::to_vec(update),
            Self::NetworkMetrics(metrics) => serde_json::to_vec(metrics),
            Self::Consensus(event) => serde_json::to_vec(event),
            Self::SwapCreated(swap) | Self::SwapUpdated(swap) => serde_json::to_vec(swap),
        }
    }
}

/// A request the mirror sends to the publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundRequest {
    /// Ask for a full snapshot.
    RequestState,
    /// Ask for the most recent consensus rounds of an entity.
    RequestConsensusHistory {
        /// Entity of interest.
        entity_id: NodeId,
        /// Maximum number of rounds to return.
        limit: u32,
    },
    /// Start streaming consensus rounds of an entity.
    SubscribeConsensus {
        /// Entity of interest.
        entity_id: NodeId,
    },
    /// Stop streaming consensus rounds of an entity.
    UnsubscribeConsensus {
        /// Entity of interest.
        entity_id: NodeId,
    },
}

impl OutboundRequest {
    /// The wire name of this request.
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::RequestState => event_names::REQUEST_STATE,
            Self::RequestConsensusHistory { .. } => event_names::REQUEST_CONSENSUS_HISTORY,
            Self::SubscribeConsensus { .. } => event_names::SUBSCRIBE_CONSENSUS,
            Self::UnsubscribeConsensus { .. } => event_names::UNSUBSCRIBE_CONSENSUS,
        }
    }

    /// The JSON payload of this request.
    pub fn payload_value(&self) -> serde_json::Value {
        match self {
            Self::RequestState => serde_json::Value::Null,
            Self::RequestConsensusHistory { entity_id, limit } => serde_json::json!({
                "entityId": entity_id,
                "limit": limit,
            }),
            Self::SubscribeConsensus { entity_id } | Self::UnsubscribeConsensus { entity_id } => {
                serde_json::json!({ "entityId": entity_id })
            }
        }
    }

    /// The JSON payload encoded as bytes.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if serialization fails.
    pub fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.payload_value())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::unreachable)]
mod tests {
    use super::*;

    #[test]
    fn decodes_state_envelope() {
        let frame = serde_json::json!({
            "type": "state",
            "data": {
                "nodes": [{ "id": "a", "type": "account", "name": "A" }],
                "channels": [],
                "timestamp": 10,
                "version": 3
            },
            "timestamp": 10
        });
        let bytes = serde_json::to_vec(&frame).unwrap();
        let InboundEvent::NetworkUpdate(raw) =
            InboundEvent::decode(event_names::NETWORK_UPDATE, &bytes).unwrap()
        else {
            unreachable!("network:update decodes to NetworkUpdate");
        };
        match raw.decode().unwrap() {
            UpdateMessage::State(state) => {
                assert_eq!(state.version, 3);
                assert_eq!(state.nodes.len(), 1);
            }
            other => unreachable!("expected state, got {other:?}"),
        }
    }

    #[test]
    fn unknown_update_tag_is_reported_not_fatal() {
        let raw = RawNetworkUpdate {
            kind: "snapshot".to_owned(),
            data: serde_json::Value::Null,
            timestamp: None,
        };
        let err = raw.decode().unwrap_err();
        assert!(matches!(err, DecodeError::UnknownUpdateKind { ref tag } if tag == "snapshot"));
    }

    #[test]
    fn malformed_payload_names_the_event() {
        let err = InboundEvent::decode(event_names::CONSENSUS_EVENT, b"{\"id\": 1}").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { ref event, .. } if event == "consensus:event"));
    }

    #[test]
    fn unknown_event_name_is_rejected() {
        let err = InboundEvent::decode("chat:message", b"{}").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEvent { .. }));
    }

    #[test]
    fn encoded_event_decodes_under_its_own_name() {
        let metrics = NetworkMetrics {
            entity_count: 4,
            ..NetworkMetrics::default()
        };
        let event = InboundEvent::NetworkMetrics(metrics.clone());
        let bytes = event.encode().unwrap();
        let back = InboundEvent::decode(event.name(), &bytes).unwrap();
        assert_eq!(back, InboundEvent::NetworkMetrics(metrics));
    }

    #[test]
    fn outbound_payloads() {
        assert_eq!(OutboundRequest::RequestState.payload().unwrap(), b"null");
        let request = OutboundRequest::RequestConsensusHistory {
            entity_id: NodeId::from("e1"),
            limit: 20,
        };
        assert_eq!(request.event_name(), "requestConsensusHistory");
        assert_eq!(
            request.payload_value(),
            serde_json::json!({ "entityId": "e1", "limit": 20 })
        );
    }
}
