//! Channels (edges between nodes) and partial channel updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::ids::{ChannelId, NodeId};

/// A bilateral channel between two nodes.
///
/// Both endpoints must resolve to nodes in the same state; the mirror
/// refuses channels that would dangle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Unique identifier within a state.
    pub id: ChannelId,
    /// Node on the left side of the channel.
    pub source: NodeId,
    /// Node on the right side of the channel.
    pub target: NodeId,
    /// Total collateral committed to the channel.
    #[serde(default, with = "crate::amount")]
    pub capacity: Amount,
    /// Portion of the capacity currently spendable.
    #[serde(default, with = "crate::amount")]
    pub available: Amount,
    /// Unsecured credit extended on top of the collateral.
    #[serde(default, with = "crate::amount")]
    pub credit_line: Amount,
    /// Whether the channel is open for payments.
    #[serde(default)]
    pub is_active: bool,
    /// Time of the last observed change (epoch milliseconds on the wire).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_update: DateTime<Utc>,
}

impl Channel {
    /// Whether this channel has `node` as either endpoint.
    pub fn touches(&self, node: &NodeId) -> bool {
        &self.source == node || &self.target == node
    }

    /// Return the endpoint opposite to `node`, if `node` is an endpoint.
    pub fn peer_of(&self, node: &NodeId) -> Option<&NodeId> {
        if &self.source == node {
            Some(&self.target)
        } else if &self.target == node {
            Some(&self.source)
        } else {
            None
        }
    }
}

/// A partial channel record, merged field-by-field into an existing channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelUpdate {
    /// Channel being updated.
    pub id: ChannelId,
    /// New source endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<NodeId>,
    /// New target endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<NodeId>,
    /// New capacity.
    #[serde(
        default,
        with = "crate::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub capacity: Option<Amount>,
    /// New available balance.
    #[serde(
        default,
        with = "crate::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub available: Option<Amount>,
    /// New credit line.
    #[serde(
        default,
        with = "crate::amount::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub credit_line: Option<Amount>,
    /// New activity flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    /// New last-update time.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update: Option<DateTime<Utc>>,
}

impl ChannelUpdate {
    /// Create an empty update for the given channel.
    pub fn new(id: impl Into<ChannelId>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Return a copy of `channel` with the present fields merged in.
    ///
    /// The original is left untouched so the caller can validate the
    /// result (for example, that new endpoints still resolve) before
    /// committing it.
    pub fn merged(&self, channel: &Channel) -> Channel {
        let mut next = channel.clone();
        if let Some(source) = &self.source {
            next.source.clone_from(source);
        }
        if let Some(target) = &self.target {
            next.target.clone_from(target);
        }
        if let Some(capacity) = self.capacity {
            next.capacity = capacity;
        }
        if let Some(available) = self.available {
            next.available = available;
        }
        if let Some(credit_line) = self.credit_line {
            next.credit_line = credit_line;
        }
        if let Some(is_active) = self.is_active {
            next.is_active = is_active;
        }
        if let Some(last_update) = self.last_update {
            next.last_update = last_update;
        }
        next
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn sample() -> Channel {
        serde_json::from_value(serde_json::json!({
            "id": "a-b",
            "source": "a",
            "target": "b",
            "capacity": "100",
            "available": 60,
            "creditLine": "0x0a",
            "isActive": true,
            "lastUpdate": 1_700_000_000_000_i64
        }))
        .unwrap()
    }

    #[test]
    fn decodes_mixed_amount_encodings() {
        let channel = sample();
        assert_eq!(channel.capacity, Amount::from(100_u8));
        assert_eq!(channel.available, Amount::from(60_u8));
        assert_eq!(channel.credit_line, Amount::from(10_u8));
        assert_eq!(channel.last_update.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn endpoint_helpers() {
        let channel = sample();
        let a = NodeId::from("a");
        let b = NodeId::from("b");
        let c = NodeId::from("c");
        assert!(channel.touches(&a));
        assert!(!channel.touches(&c));
        assert_eq!(channel.peer_of(&a), Some(&b));
        assert_eq!(channel.peer_of(&c), None);
    }

    #[test]
    fn merged_leaves_original_untouched() {
        let channel = sample();
        let mut update = ChannelUpdate::new("a-b");
        update.is_active = Some(false);
        update.available = Some(Amount::from(5_u8));

        let next = update.merged(&channel);
        assert!(!next.is_active);
        assert_eq!(next.available, Amount::from(5_u8));
        assert!(channel.is_active);
        assert_eq!(next.capacity, channel.capacity);
    }
}
