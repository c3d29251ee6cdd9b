//! Enumeration types for the network graph and its event stream.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Node taxonomy
// ---------------------------------------------------------------------------

/// The variant tag of a [`NetworkNode`](crate::NetworkNode).
///
/// Nodes form a hierarchy: jurisdictions host depositaries, depositaries
/// hold entities, and entities own accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    /// A settlement jurisdiction (typically a chain).
    Jurisdiction,
    /// A depositary contract within a jurisdiction.
    Depositary,
    /// A consensus-governed entity.
    Entity,
    /// An account owned by an entity.
    Account,
}

impl NodeType {
    /// All node types, in hierarchy order.
    pub const ALL: [Self; 4] = [
        Self::Jurisdiction,
        Self::Depositary,
        Self::Entity,
        Self::Account,
    ];

    /// Wire name of this node type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Jurisdiction => "jurisdiction",
            Self::Depositary => "depositary",
            Self::Entity => "entity",
            Self::Account => "account",
        }
    }
}

impl core::fmt::Display for NodeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

/// How an entity reaches agreement on its next state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusType {
    /// A designated proposer collects signatures from the validator set.
    ProposerBased,
    /// Validators gossip proposals among themselves without a leader.
    GossipBased,
}

/// Coarse health classification of an entity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally.
    #[default]
    Healthy,
    /// Reachable but with elevated latency or error rate.
    Degraded,
    /// Not participating in consensus.
    Offline,
}

// ---------------------------------------------------------------------------
// Swaps
// ---------------------------------------------------------------------------

/// Lifecycle status of a cross-chain swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    /// Announced but no funds locked yet.
    Pending,
    /// Funds locked on the source side.
    Locked,
    /// Settled on both sides.
    Completed,
    /// Aborted before settlement.
    Failed,
    /// Locked funds returned to the source.
    Refunded,
}

// ---------------------------------------------------------------------------
// Update envelope
// ---------------------------------------------------------------------------

/// The recognised type tags of a `network:update` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    /// A complete snapshot superseding prior state.
    State,
    /// An incremental change set.
    Delta,
    /// Aggregate metrics.
    Metrics,
}

impl UpdateKind {
    /// Parse a wire tag, returning `None` for unrecognised tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "state" => Some(Self::State),
            "delta" => Some(Self::Delta),
            "metrics" => Some(Self::Metrics),
            _ => None,
        }
    }

    /// Wire tag of this update kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::State => "state",
            Self::Delta => "delta",
            Self::Metrics => "metrics",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn consensus_type_uses_kebab_case() {
        let json = serde_json::to_string(&ConsensusType::ProposerBased).unwrap();
        assert_eq!(json, "\"proposer-based\"");
        let back: ConsensusType = serde_json::from_str("\"gossip-based\"").unwrap();
        assert_eq!(back, ConsensusType::GossipBased);
    }

    #[test]
    fn update_kind_tags_round_trip_through_from_tag() {
        for kind in [UpdateKind::State, UpdateKind::Delta, UpdateKind::Metrics] {
            assert_eq!(UpdateKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(UpdateKind::from_tag("snapshot"), None);
    }

    #[test]
    fn node_type_display_matches_serde() {
        for ty in NodeType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{ty}\""));
        }
    }
}
