//! Graph vertices and their adjacency.

use crate::primitives::{Cost, NodeId};
use std::collections::BTreeMap;

/// Adjacency of one node, split into strong and weak links.
///
/// A strong link was asserted by this node itself; a weak link is the mirror
/// of a strong link held by the neighbor. A neighbor id is never present in
/// both maps at once.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeLinks {
    strong: BTreeMap<NodeId, Cost>,
    weak: BTreeMap<NodeId, Cost>,
}

impl NodeLinks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strong(&self) -> &BTreeMap<NodeId, Cost> {
        &self.strong
    }

    pub fn weak(&self) -> &BTreeMap<NodeId, Cost> {
        &self.weak
    }

    pub fn strong_cost(&self, neighbor: &NodeId) -> Option<Cost> {
        self.strong.get(neighbor).copied()
    }

    /// True if `neighbor` is linked in either direction.
    pub fn has(&self, neighbor: &NodeId) -> bool {
        self.strong.contains_key(neighbor) || self.weak.contains_key(neighbor)
    }

    pub(crate) fn set_strong(&mut self, neighbor: NodeId, cost: Cost) {
        self.weak.remove(&neighbor);
        self.strong.insert(neighbor, cost);
    }

    pub(crate) fn set_weak(&mut self, neighbor: NodeId, cost: Cost) {
        self.strong.remove(&neighbor);
        self.weak.insert(neighbor, cost);
    }

    pub(crate) fn remove_strong(&mut self, neighbor: &NodeId) -> Option<Cost> {
        self.strong.remove(neighbor)
    }

    pub(crate) fn remove_weak(&mut self, neighbor: &NodeId) -> Option<Cost> {
        self.weak.remove(neighbor)
    }

    /// All neighbors, strong first, each group in id order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, Cost)> + '_ {
        self.strong
            .iter()
            .chain(self.weak.iter())
            .map(|(id, cost)| (*id, *cost))
    }

    pub fn neighbor_ids(&self) -> Vec<NodeId> {
        self.iter().map(|(id, _)| id).collect()
    }

    pub fn len(&self) -> usize {
        self.strong.len() + self.weak.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strong.is_empty() && self.weak.is_empty()
    }
}

/// One vertex of the local topology view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkNode {
    id: NodeId,
    cost: Option<Cost>,
    links: NodeLinks,
    /// Set once the node's own adjacency has been reported or fetched.
    /// Weak mirrors alone never set it.
    links_fetched: bool,
}

impl NetworkNode {
    pub(crate) fn new(id: NodeId, cost: Option<Cost>) -> Self {
        Self {
            id,
            cost,
            links: NodeLinks::new(),
            links_fetched: false,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn cost(&self) -> Option<Cost> {
        self.cost
    }

    /// The node's adjacency, or `None` if it was never reported or fetched.
    pub fn links(&self) -> Option<&NodeLinks> {
        self.links_fetched.then_some(&self.links)
    }

    /// Every known neighbor, including weak mirrors on unfetched nodes.
    pub fn neighbors(&self) -> &NodeLinks {
        &self.links
    }

    pub fn links_fetched(&self) -> bool {
        self.links_fetched
    }

    pub(crate) fn set_cost(&mut self, cost: Cost) {
        self.cost = Some(cost);
    }

    pub(crate) fn mark_links_fetched(&mut self) {
        self.links_fetched = true;
    }

    pub(crate) fn links_mut(&mut self) -> &mut NodeLinks {
        &mut self.links
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, 0, 0, n])
    }

    #[test]
    fn test_strong_and_weak_are_disjoint() {
        let mut links = NodeLinks::new();
        links.set_weak(id(1), Cost::new(3));
        links.set_strong(id(1), Cost::new(4));

        assert!(links.weak().is_empty());
        assert_eq!(links.strong_cost(&id(1)), Some(Cost::new(4)));
        assert_eq!(links.len(), 1);
    }

    #[test]
    fn test_unfetched_node_hides_links() {
        let mut node = NetworkNode::new(id(1), None);
        node.links_mut().set_weak(id(2), Cost::new(1));

        assert!(node.links().is_none());
        assert!(node.neighbors().has(&id(2)));

        node.mark_links_fetched();
        assert_eq!(node.links().map(NodeLinks::len), Some(1));
    }
}
