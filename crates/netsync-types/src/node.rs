//! Network nodes and partial node updates.
//!
//! A [`NetworkNode`] is a common header (`id`, `name`, `layer`, optional
//! `position`) plus a [`NodeKind`] payload selected by the `type` tag. On
//! the wire the payload fields are flattened next to the header:
//!
//! ```json
//! { "id": "e1", "type": "entity", "name": "Alpha", "layer": 2,
//!   "depositaryId": "d1", "consensusType": "proposer-based", ... }
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::enums::{ConsensusType, HealthStatus, NodeType};
use crate::ids::{ChannelId, NodeId};

/// Layout position hint supplied by the publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Horizontal coordinate.
    pub x: f64,
    /// Vertical coordinate.
    pub y: f64,
}

/// A vertex of the network graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkNode {
    /// Unique identifier within a state.
    pub id: NodeId,
    /// Human-readable label.
    pub name: String,
    /// Display layer (0 = jurisdictions, increasing toward accounts).
    #[serde(default)]
    pub layer: u32,
    /// Optional layout hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Variant-specific payload, tagged by `type`.
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl NetworkNode {
    /// Return the variant tag of this node.
    pub const fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Return the entity payload if this node is an entity.
    pub fn as_entity(&self) -> Option<&EntityInfo> {
        match &self.kind {
            NodeKind::Entity(entity) => Some(entity),
            _ => None,
        }
    }

    /// Mutable access to the entity payload if this node is an entity.
    pub fn as_entity_mut(&mut self) -> Option<&mut EntityInfo> {
        match &mut self.kind {
            NodeKind::Entity(entity) => Some(entity),
            _ => None,
        }
    }
}

/// Variant payload of a [`NetworkNode`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NodeKind {
    /// A settlement jurisdiction.
    Jurisdiction(JurisdictionInfo),
    /// A depositary within a jurisdiction.
    Depositary(DepositaryInfo),
    /// A consensus-governed entity.
    Entity(Box<EntityInfo>),
    /// An account owned by an entity.
    Account(AccountInfo),
}

impl NodeKind {
    /// Return the variant tag.
    pub const fn node_type(&self) -> NodeType {
        match self {
            Self::Jurisdiction(_) => NodeType::Jurisdiction,
            Self::Depositary(_) => NodeType::Depositary,
            Self::Entity(_) => NodeType::Entity,
            Self::Account(_) => NodeType::Account,
        }
    }
}

/// Jurisdiction payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JurisdictionInfo {
    /// Chain identifier, when the jurisdiction is an EVM-style chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
}

/// Depositary payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositaryInfo {
    /// Jurisdiction hosting this depositary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction_id: Option<NodeId>,
    /// Contract address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Account payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    /// Entity owning this account.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<NodeId>,
    /// Current balance.
    #[serde(
        default,
        with = "crate::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub balance: Option<Amount>,
}

/// Entity payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityInfo {
    /// Depositary holding this entity's reserves.
    pub depositary_id: NodeId,
    /// Agreement mechanism.
    pub consensus_type: ConsensusType,
    /// Ordered validator addresses.
    #[serde(default)]
    pub validators: Vec<String>,
    /// Channels this entity participates in.
    #[serde(default)]
    pub channels: BTreeSet<ChannelId>,
    /// Total value locked.
    #[serde(default, with = "crate::amount")]
    pub tvl: Amount,
    /// Number of channels as reported by the publisher.
    #[serde(default)]
    pub channel_count: u32,
    /// Transactions per second.
    #[serde(default)]
    pub transaction_rate: f64,
    /// Health figures.
    #[serde(default)]
    pub health: EntityHealth,
}

/// Health figures reported for an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHealth {
    /// Coarse classification.
    #[serde(default)]
    pub status: HealthStatus,
    /// Fraction of time available (0.0 - 1.0).
    #[serde(default)]
    pub uptime: f64,
    /// Round-trip latency in milliseconds.
    #[serde(default)]
    pub latency: f64,
    /// Fraction of failed operations (0.0 - 1.0).
    #[serde(default)]
    pub error_rate: f64,
    /// Fraction of rounds this entity took part in (0.0 - 1.0).
    #[serde(default)]
    pub consensus_participation: f64,
}

/// A partial node record, merged field-by-field into an existing node.
///
/// Absent fields leave the target untouched. Entity-only fields are
/// ignored when the target is not an entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeUpdate {
    /// Node being updated.
    pub id: NodeId,
    /// New label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New display layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layer: Option<u32>,
    /// New layout hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// New depositary (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depositary_id: Option<NodeId>,
    /// New agreement mechanism (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consensus_type: Option<ConsensusType>,
    /// Replacement validator set (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validators: Option<Vec<String>>,
    /// Replacement channel set (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<BTreeSet<ChannelId>>,
    /// New TVL (entity only).
    #[serde(
        default,
        with = "crate::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub tvl: Option<Amount>,
    /// New channel count (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_count: Option<u32>,
    /// New transaction rate (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_rate: Option<f64>,
    /// Replacement health figures (entity only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health: Option<EntityHealth>,
}

impl NodeUpdate {
    /// Create an empty update for the given node.
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Whether this update carries any entity-only field.
    pub const fn touches_entity_fields(&self) -> bool {
        self.depositary_id.is_some()
            || self.consensus_type.is_some()
            || self.validators.is_some()
            || self.channels.is_some()
            || self.tvl.is_some()
            || self.channel_count.is_some()
            || self.transaction_rate.is_some()
            || self.health.is_some()
    }

    /// Shallow-merge the present fields into `node`.
    ///
    /// The caller is responsible for matching `self.id` to `node.id`.
    /// Returns `false` if entity-only fields were present but `node` is
    /// not an entity (those fields are skipped; the rest still apply).
    pub fn apply_to(&self, node: &mut NetworkNode) -> bool {
        if let Some(name) = &self.name {
            node.name.clone_from(name);
        }
        if let Some(layer) = self.layer {
            node.layer = layer;
        }
        if let Some(position) = self.position {
            node.position = Some(position);
        }

        if !self.touches_entity_fields() {
            return true;
        }
        let Some(entity) = node.as_entity_mut() else {
            return false;
        };
        if let Some(depositary_id) = &self.depositary_id {
            entity.depositary_id.clone_from(depositary_id);
        }
        if let Some(consensus_type) = self.consensus_type {
            entity.consensus_type = consensus_type;
        }
        if let Some(validators) = &self.validators {
            entity.validators.clone_from(validators);
        }
        if let Some(channels) = &self.channels {
            entity.channels.clone_from(channels);
        }
        if let Some(tvl) = self.tvl {
            entity.tvl = tvl;
        }
        if let Some(channel_count) = self.channel_count {
            entity.channel_count = channel_count;
        }
        if let Some(rate) = self.transaction_rate {
            entity.transaction_rate = rate;
        }
        if let Some(health) = &self.health {
            entity.health.clone_from(health);
        }
        true
    }
}
