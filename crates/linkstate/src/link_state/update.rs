//! Incremental topology diffs.

use crate::primitives::{Cost, NodeId, WireCodec, WireError};
use serde::{Deserialize, Serialize};

/// A node that appeared, with its cost if known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeEntry {
    pub id: NodeId,
    pub cost: Option<Cost>,
}

/// A node whose cost changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeCostEntry {
    pub id: NodeId,
    pub cost: Cost,
}

/// An undirected link between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkEntry {
    pub id1: NodeId,
    pub id2: NodeId,
    /// Absent for removals.
    pub cost: Option<Cost>,
}

impl LinkEntry {
    pub fn new(id1: NodeId, id2: NodeId, cost: Cost) -> Self {
        Self {
            id1,
            id2,
            cost: Some(cost),
        }
    }

    pub fn removed(id1: NodeId, id2: NodeId) -> Self {
        Self {
            id1,
            id2,
            cost: None,
        }
    }
}

/// Batch of topology changes, as produced by every `LinkState` mutator.
///
/// Each list keeps the order in which the changes happened. `merge` only
/// concatenates; it never collapses contradicting entries, so it should only
/// combine updates that are already minimal on their own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub node_added: Vec<NodeEntry>,
    pub node_removed: Vec<NodeId>,
    pub node_cost_changed: Vec<NodeCostEntry>,
    pub link_added: Vec<LinkEntry>,
    pub link_removed: Vec<LinkEntry>,
    pub link_cost_changed: Vec<LinkEntry>,
}

impl StateUpdate {
    /// The empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate updates list by list, in iteration order.
    pub fn merge<I>(updates: I) -> Self
    where
        I: IntoIterator<Item = StateUpdate>,
    {
        updates.into_iter().fold(Self::new(), |mut acc, update| {
            acc.extend(update);
            acc
        })
    }

    /// Append `other`'s lists to this update's lists.
    pub fn extend(&mut self, other: StateUpdate) {
        self.node_added.extend(other.node_added);
        self.node_removed.extend(other.node_removed);
        self.node_cost_changed.extend(other.node_cost_changed);
        self.link_added.extend(other.link_added);
        self.link_removed.extend(other.link_removed);
        self.link_cost_changed.extend(other.link_cost_changed);
    }

    pub fn is_empty(&self) -> bool {
        self.node_added.is_empty()
            && self.node_removed.is_empty()
            && self.node_cost_changed.is_empty()
            && self.link_added.is_empty()
            && self.link_removed.is_empty()
            && self.link_cost_changed.is_empty()
    }

    /// Total number of entries across all six lists.
    pub fn len(&self) -> usize {
        self.node_added.len()
            + self.node_removed.len()
            + self.node_cost_changed.len()
            + self.link_added.len()
            + self.link_removed.len()
            + self.link_cost_changed.len()
    }

    /// Ids of every node this update added.
    pub fn added_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_added.iter().map(|entry| entry.id)
    }

    pub(crate) fn push_node_added(&mut self, id: NodeId, cost: Option<Cost>) {
        self.node_added.push(NodeEntry { id, cost });
    }

    pub(crate) fn push_node_removed(&mut self, id: NodeId) {
        self.node_removed.push(id);
    }

    pub(crate) fn push_node_cost_changed(&mut self, id: NodeId, cost: Cost) {
        self.node_cost_changed.push(NodeCostEntry { id, cost });
    }

    pub(crate) fn push_link_added(&mut self, id1: NodeId, id2: NodeId, cost: Cost) {
        self.link_added.push(LinkEntry::new(id1, id2, cost));
    }

    pub(crate) fn push_link_removed(&mut self, id1: NodeId, id2: NodeId) {
        self.link_removed.push(LinkEntry::removed(id1, id2));
    }

    pub(crate) fn push_link_cost_changed(&mut self, id1: NodeId, id2: NodeId, cost: Cost) {
        self.link_cost_changed.push(LinkEntry::new(id1, id2, cost));
    }

    /// Convert to the wire form, replacing every id and cost by its bytes.
    pub fn to_frame(&self) -> StateUpdateFrame {
        StateUpdateFrame {
            node_added: self
                .node_added
                .iter()
                .map(|entry| NodeAddedFrame {
                    node_id: entry.id.to_wire_bytes(),
                    cost: entry.cost.map(|cost| cost.to_wire_bytes()),
                })
                .collect(),
            node_removed: self
                .node_removed
                .iter()
                .map(NodeId::to_wire_bytes)
                .collect(),
            node_cost_changed: self
                .node_cost_changed
                .iter()
                .map(|entry| NodeCostFrame {
                    node_id: entry.id.to_wire_bytes(),
                    cost: entry.cost.to_wire_bytes(),
                })
                .collect(),
            link_added: self.link_added.iter().filter_map(LinkCostFrame::from_entry).collect(),
            link_removed: self
                .link_removed
                .iter()
                .map(|entry| LinkFrame {
                    node_id1: entry.id1.to_wire_bytes(),
                    node_id2: entry.id2.to_wire_bytes(),
                })
                .collect(),
            link_cost_changed: self
                .link_cost_changed
                .iter()
                .filter_map(LinkCostFrame::from_entry)
                .collect(),
        }
    }
}

/// Wire form of a `node_added` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAddedFrame {
    pub node_id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<Vec<u8>>,
}

/// Wire form of a `node_cost_changed` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCostFrame {
    pub node_id: Vec<u8>,
    pub cost: Vec<u8>,
}

/// Wire form of a `link_removed` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkFrame {
    pub node_id1: Vec<u8>,
    pub node_id2: Vec<u8>,
}

/// Wire form of `link_added` and `link_cost_changed` entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkCostFrame {
    pub node_id1: Vec<u8>,
    pub node_id2: Vec<u8>,
    pub cost: Vec<u8>,
}

impl LinkCostFrame {
    // Added and cost-changed links always carry a cost.
    fn from_entry(entry: &LinkEntry) -> Option<Self> {
        entry.cost.map(|cost| Self {
            node_id1: entry.id1.to_wire_bytes(),
            node_id2: entry.id2.to_wire_bytes(),
            cost: cost.to_wire_bytes(),
        })
    }

    fn decode(&self) -> Result<LinkEntry, WireError> {
        Ok(LinkEntry::new(
            NodeId::from_wire_bytes(&self.node_id1)?,
            NodeId::from_wire_bytes(&self.node_id2)?,
            Cost::from_wire_bytes(&self.cost)?,
        ))
    }
}

/// Transmitted shape of a [`StateUpdate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdateFrame {
    pub node_added: Vec<NodeAddedFrame>,
    pub node_removed: Vec<Vec<u8>>,
    pub node_cost_changed: Vec<NodeCostFrame>,
    pub link_added: Vec<LinkCostFrame>,
    pub link_removed: Vec<LinkFrame>,
    pub link_cost_changed: Vec<LinkCostFrame>,
}

impl StateUpdateFrame {
    /// Rebuild the [`StateUpdate`] this frame was produced from.
    pub fn decode(&self) -> Result<StateUpdate, WireError> {
        let node_added = self
            .node_added
            .iter()
            .map(|frame| {
                Ok(NodeEntry {
                    id: NodeId::from_wire_bytes(&frame.node_id)?,
                    cost: frame
                        .cost
                        .as_deref()
                        .map(Cost::from_wire_bytes)
                        .transpose()?,
                })
            })
            .collect::<Result<_, WireError>>()?;
        let node_removed = self
            .node_removed
            .iter()
            .map(|bytes| NodeId::from_wire_bytes(bytes))
            .collect::<Result<_, WireError>>()?;
        let node_cost_changed = self
            .node_cost_changed
            .iter()
            .map(|frame| {
                Ok(NodeCostEntry {
                    id: NodeId::from_wire_bytes(&frame.node_id)?,
                    cost: Cost::from_wire_bytes(&frame.cost)?,
                })
            })
            .collect::<Result<_, WireError>>()?;
        let link_added = self
            .link_added
            .iter()
            .map(LinkCostFrame::decode)
            .collect::<Result<_, WireError>>()?;
        let link_removed = self
            .link_removed
            .iter()
            .map(|frame| {
                Ok(LinkEntry::removed(
                    NodeId::from_wire_bytes(&frame.node_id1)?,
                    NodeId::from_wire_bytes(&frame.node_id2)?,
                ))
            })
            .collect::<Result<_, WireError>>()?;
        let link_cost_changed = self
            .link_cost_changed
            .iter()
            .map(LinkCostFrame::decode)
            .collect::<Result<_, WireError>>()?;

        Ok(StateUpdate {
            node_added,
            node_removed,
            node_cost_changed,
            link_added,
            link_removed,
            link_cost_changed,
        })
    }
}

impl From<&StateUpdate> for StateUpdateFrame {
    fn from(update: &StateUpdate) -> Self {
        update.to_frame()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, 0, 0, n])
    }

    fn sample(offset: u8) -> StateUpdate {
        let mut update = StateUpdate::new();
        update.push_node_added(id(offset), Some(Cost::new(1)));
        update.push_node_removed(id(offset + 1));
        update.push_node_cost_changed(id(offset + 2), Cost::new(2));
        update.push_link_added(id(offset), id(offset + 1), Cost::new(3));
        update.push_link_removed(id(offset + 1), id(offset + 2));
        update.push_link_cost_changed(id(offset), id(offset + 2), Cost::new(4));
        update
    }

    #[test]
    fn test_merge_concatenates_in_order() {
        let a = sample(0);
        let b = sample(10);
        let merged = StateUpdate::merge([a.clone(), b.clone()]);

        assert_eq!(merged.node_added, [a.node_added, b.node_added].concat());
        assert_eq!(merged.node_removed, [a.node_removed, b.node_removed].concat());
        assert_eq!(
            merged.link_cost_changed,
            [a.link_cost_changed, b.link_cost_changed].concat()
        );
        assert_eq!(merged.len(), 12);
    }

    #[test]
    fn test_merge_identity_and_associativity() {
        let a = sample(0);
        let b = sample(10);
        let c = sample(20);

        assert_eq!(StateUpdate::merge([StateUpdate::new(), a.clone()]), a);
        assert_eq!(StateUpdate::merge([a.clone(), StateUpdate::new()]), a);
        assert!(StateUpdate::merge(Vec::new()).is_empty());

        let left = StateUpdate::merge([StateUpdate::merge([a.clone(), b.clone()]), c.clone()]);
        let right = StateUpdate::merge([a, StateUpdate::merge([b, c])]);
        assert_eq!(left, right);
    }

    #[test]
    fn test_frame_decodes_to_original() {
        let update = sample(0);
        let frame = update.to_frame();

        assert_eq!(frame.node_removed, vec![id(1).to_wire_bytes()]);
        assert_eq!(frame.link_removed.len(), 1);
        assert_eq!(frame.decode().unwrap(), update);
    }

    #[test]
    fn test_frame_json_omits_missing_node_cost() {
        let mut update = StateUpdate::new();
        update.push_node_added(id(9), None);

        let json = serde_json::to_value(update.to_frame()).unwrap();
        assert!(json["nodeAdded"][0].get("cost").is_none());
        assert_eq!(json["nodeAdded"][0]["nodeId"][7], 9);

        let back: StateUpdateFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back.decode().unwrap(), update);
    }

    #[test]
    fn test_malformed_frame_rejected() {
        let frame = StateUpdateFrame {
            node_removed: vec![vec![1, 2]],
            ..Default::default()
        };
        assert!(matches!(
            frame.decode(),
            Err(WireError::Truncated { what: "NodeId", .. })
        ));
    }
}
