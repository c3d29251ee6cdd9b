//! Consensus rounds and cross-chain swap records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::enums::{ConsensusType, SwapStatus};
use crate::ids::NodeId;

/// One round of an entity's agreement process.
///
/// For proposer-based rounds the producer guarantees that `proposer` is
/// one of `validators`; the mirror does not re-check it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusEvent {
    /// Unique event identifier.
    pub id: String,
    /// Entity that ran the round.
    pub entity_id: NodeId,
    /// Agreement mechanism used.
    #[serde(rename = "type")]
    pub consensus_type: ConsensusType,
    /// Round number within the entity.
    pub round: u64,
    /// Proposer address (proposer-based rounds only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proposer: Option<String>,
    /// Validators that took part.
    #[serde(default)]
    pub validators: Vec<String>,
    /// Time the round started.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Round duration in milliseconds.
    #[serde(default)]
    pub duration: u64,
    /// Whether the round reached agreement.
    pub success: bool,
}

/// A cross-chain swap between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRecord {
    /// Unique swap identifier.
    pub id: String,
    /// Entity sending value.
    pub source_entity: NodeId,
    /// Entity receiving value.
    pub target_entity: NodeId,
    /// Jurisdiction of the sending side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_jurisdiction: Option<NodeId>,
    /// Jurisdiction of the receiving side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_jurisdiction: Option<NodeId>,
    /// Amount leaving the source.
    #[serde(with = "crate::amount")]
    pub amount_in: Amount,
    /// Amount arriving at the target, once known.
    #[serde(
        default,
        with = "crate::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub amount_out: Option<Amount>,
    /// Current lifecycle status.
    pub status: SwapStatus,
    /// Time of the last status change.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}
