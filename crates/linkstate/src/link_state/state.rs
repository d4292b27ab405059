//! The local topology graph.

use super::node::{NetworkNode, NodeLinks};
use super::update::StateUpdate;
use crate::primitives::{Cost, NodeId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// Locally-consistent view of the mesh, rooted at the local node.
///
/// Every mutator returns the minimal [`StateUpdate`] describing what changed.
/// Unknown ids are never an error: a notification may race with a local
/// removal, so mutators on missing nodes simply report nothing.
///
/// After every removal the graph is pruned down to the connected component
/// of the local node.
#[derive(Debug, Clone)]
pub struct LinkState {
    nodes: BTreeMap<NodeId, NetworkNode>,
    local_id: NodeId,
}

impl LinkState {
    /// Create a graph holding only the local node.
    pub fn new(local_id: NodeId) -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(local_id, NetworkNode::new(local_id, None));
        Self { nodes, local_id }
    }

    pub fn local_id(&self) -> NodeId {
        self.local_id
    }

    pub fn node(&self, id: &NodeId) -> Option<&NetworkNode> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &NetworkNode> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Neighbors of `id` with link costs, strong and weak alike.
    pub fn get_links(&self, id: &NodeId) -> Vec<(NodeId, Cost)> {
        self.nodes
            .get(id)
            .map(|node| node.neighbors().iter().collect())
            .unwrap_or_default()
    }

    /// Insert `id` if unseen, or update its cost if it differs.
    pub fn create_or_update_node(&mut self, id: NodeId, cost: Option<Cost>) -> StateUpdate {
        let mut update = StateUpdate::new();
        match self.nodes.get_mut(&id) {
            None => {
                self.nodes.insert(id, NetworkNode::new(id, cost));
                update.push_node_added(id, cost);
            }
            Some(node) => {
                if let Some(cost) = cost {
                    if node.cost() != Some(cost) {
                        node.set_cost(cost);
                        update.push_node_cost_changed(id, cost);
                    }
                }
            }
        }
        update
    }

    /// Record that `source` reports a link to `target` with `cost`.
    ///
    /// The reporting side holds the strong entry and the other side gets a
    /// silent weak mirror. If `source` already knows the link only as a weak
    /// mirror, the existing owner keeps it.
    pub fn create_or_update_link(
        &mut self,
        source_id: NodeId,
        target_id: NodeId,
        cost: Cost,
    ) -> StateUpdate {
        let mut update = self.create_or_update_node(source_id, None);
        update.extend(self.create_or_update_node(target_id, None));

        // A self-link carries no adjacency information.
        if source_id == target_id {
            if let Some(source) = self.nodes.get_mut(&source_id) {
                source.mark_links_fetched();
            }
            return update;
        }

        let Some(source) = self.nodes.get_mut(&source_id) else {
            return update;
        };
        source.mark_links_fetched();
        let links = source.links_mut();

        if !links.has(&target_id) {
            links.set_strong(target_id, cost);
            if let Some(target) = self.nodes.get_mut(&target_id) {
                target.links_mut().set_weak(source_id, cost);
            }
            update.push_link_added(source_id, target_id, cost);
        } else if let Some(current) = links.strong_cost(&target_id) {
            if current != cost {
                links.set_strong(target_id, cost);
                if let Some(target) = self.nodes.get_mut(&target_id) {
                    target.links_mut().set_weak(source_id, cost);
                }
                update.push_link_cost_changed(source_id, target_id, cost);
            }
        }
        update
    }

    /// Remove the link between `source` and `target`, then prune.
    pub fn remove_link(&mut self, source_id: NodeId, target_id: NodeId) -> StateUpdate {
        let mut update = self.unlink(source_id, target_id);
        update.extend(self.prune_isolated_nodes());
        update
    }

    /// Remove `id` and every link touching it, then prune.
    pub fn remove_node(&mut self, id: NodeId) -> StateUpdate {
        let mut update = self.detach_node(id);
        update.extend(self.prune_isolated_nodes());
        update
    }

    /// Ids of nodes whose own adjacency is still unknown.
    pub fn get_links_not_yet_fetched_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| !node.links_fetched())
            .map(NetworkNode::id)
            .collect()
    }

    /// Ids of nodes whose cost is still unknown.
    pub fn get_nodes_not_yet_fetched_costs(&self) -> Vec<NodeId> {
        self.nodes
            .values()
            .filter(|node| node.cost().is_none())
            .map(NetworkNode::id)
            .collect()
    }

    /// Full snapshot: every node in `node_added`, every link (reported once,
    /// from its strong side) in `link_added`.
    pub fn sync_state(&self) -> StateUpdate {
        let mut update = StateUpdate::new();
        for node in self.nodes.values() {
            update.push_node_added(node.id(), node.cost());
        }
        for node in self.nodes.values() {
            for (neighbor, cost) in node.neighbors().strong() {
                update.push_link_added(node.id(), *neighbor, *cost);
            }
        }
        update
    }

    /// Drop both sides of the link without pruning. Only a strong entry on
    /// either side counts as a removal worth reporting.
    fn unlink(&mut self, source_id: NodeId, target_id: NodeId) -> StateUpdate {
        let mut update = StateUpdate::new();

        let source_strong = self.remove_side(source_id, target_id, NodeLinks::remove_strong);
        let target_strong = self.remove_side(target_id, source_id, NodeLinks::remove_strong);
        if source_strong.is_some() {
            self.remove_side(target_id, source_id, NodeLinks::remove_weak);
        }
        if target_strong.is_some() {
            self.remove_side(source_id, target_id, NodeLinks::remove_weak);
        }

        if source_strong.is_some() || target_strong.is_some() {
            update.push_link_removed(source_id, target_id);
        } else {
            // A dangling weak mirror has no asserted link behind it.
            self.remove_side(source_id, target_id, NodeLinks::remove_weak);
            self.remove_side(target_id, source_id, NodeLinks::remove_weak);
        }
        update
    }

    fn remove_side(
        &mut self,
        owner: NodeId,
        neighbor: NodeId,
        remove: fn(&mut NodeLinks, &NodeId) -> Option<Cost>,
    ) -> Option<Cost> {
        self.nodes
            .get_mut(&owner)
            .and_then(|node| remove(node.links_mut(), &neighbor))
    }

    /// Unlink every neighbor of `id` and delete it, without pruning.
    fn detach_node(&mut self, id: NodeId) -> StateUpdate {
        let mut update = StateUpdate::new();
        let Some(node) = self.nodes.get(&id) else {
            return update;
        };
        for neighbor in node.neighbors().neighbor_ids() {
            update.extend(self.unlink(id, neighbor));
        }
        self.nodes.remove(&id);
        update.push_node_removed(id);
        update
    }

    /// Remove every node not reachable from the local node.
    fn prune_isolated_nodes(&mut self) -> StateUpdate {
        let reachable = self.reachable_from_local();
        let isolated: Vec<NodeId> = self
            .nodes
            .keys()
            .filter(|id| !reachable.contains(*id))
            .copied()
            .collect();

        let mut update = StateUpdate::new();
        for id in isolated {
            // Earlier detaches never remove other nodes, so `id` is still here.
            update.extend(self.detach_node(id));
        }
        if !update.is_empty() {
            debug!(
                removed = update.node_removed.len(),
                remaining = self.nodes.len(),
                "Pruned nodes unreachable from local node"
            );
        }
        update
    }

    fn reachable_from_local(&self) -> BTreeSet<NodeId> {
        let mut visited = BTreeSet::new();
        if !self.nodes.contains_key(&self.local_id) {
            return visited;
        }

        let mut queue = VecDeque::from([self.local_id]);
        visited.insert(self.local_id);
        while let Some(current) = queue.pop_front() {
            let Some(node) = self.nodes.get(&current) else {
                continue;
            };
            for (neighbor, _) in node.neighbors().iter() {
                if self.nodes.contains_key(&neighbor) && visited.insert(neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        visited
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link_state::update::LinkEntry;

    fn n(i: u8) -> NodeId {
        NodeId::from_bytes([0, 0, 0, 0, 0, 0, 0, i])
    }

    fn c(v: u32) -> Cost {
        Cost::new(v)
    }

    fn assert_all_reachable(state: &LinkState) {
        let reachable = state.reachable_from_local();
        for node in state.nodes() {
            assert!(reachable.contains(&node.id()), "{:?} is unreachable", node.id());
        }
    }

    fn chain() -> LinkState {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(1));
        state.create_or_update_link(n(1), n(2), c(1));
        state
    }

    #[test]
    fn test_first_link_adds_target_and_link() {
        let mut state = LinkState::new(n(0));
        let update = state.create_or_update_link(n(0), n(1), c(5));

        assert_eq!(update.added_node_ids().collect::<Vec<_>>(), vec![n(1)]);
        assert_eq!(update.link_added, vec![LinkEntry::new(n(0), n(1), c(5))]);
        assert_eq!(update.len(), 2);
    }

    #[test]
    fn test_repeated_link_is_noop() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(5));

        assert!(state.create_or_update_link(n(0), n(1), c(5)).is_empty());
    }

    #[test]
    fn test_node_creation_and_cost_idempotent() {
        let mut state = LinkState::new(n(0));

        assert_eq!(state.create_or_update_node(n(0), Some(c(3))).node_cost_changed.len(), 1);
        assert!(state.create_or_update_node(n(0), Some(c(3))).is_empty());
        assert!(state.create_or_update_node(n(0), None).is_empty());
        assert_eq!(state.node(&n(0)).and_then(NetworkNode::cost), Some(c(3)));
    }

    #[test]
    fn test_link_cost_change_updates_both_sides() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(5));
        let update = state.create_or_update_link(n(0), n(1), c(9));

        assert_eq!(update.link_cost_changed, vec![LinkEntry::new(n(0), n(1), c(9))]);
        assert_eq!(state.get_links(&n(1)), vec![(n(0), c(9))]);
    }

    #[test]
    fn test_reverse_report_of_weak_link_keeps_first_owner() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(5));
        let update = state.create_or_update_link(n(1), n(0), c(7));

        assert!(update.is_empty());
        let local = state.node(&n(0)).unwrap();
        assert_eq!(local.neighbors().strong_cost(&n(1)), Some(c(5)));
        assert!(state.node(&n(1)).unwrap().links_fetched());
    }

    #[test]
    fn test_links_are_symmetric() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(2));
        state.create_or_update_link(n(2), n(1), c(3));

        assert!(state.get_links(&n(1)).contains(&(n(0), c(2))));
        assert!(state.get_links(&n(0)).contains(&(n(1), c(2))));
        assert!(state.get_links(&n(1)).contains(&(n(2), c(3))));
        assert!(state.get_links(&n(2)).contains(&(n(1), c(3))));
    }

    #[test]
    fn test_remove_local_node_clears_graph() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(5));
        let update = state.remove_node(n(0));

        assert_eq!(update.link_removed, vec![LinkEntry::removed(n(0), n(1))]);
        assert_eq!(update.node_removed, vec![n(0), n(1)]);
        assert!(state.is_empty());
    }

    #[test]
    fn test_remove_link_prunes_orphaned_chain() {
        let mut state = chain();
        let update = state.remove_link(n(0), n(1));

        assert_eq!(
            update.link_removed,
            vec![LinkEntry::removed(n(0), n(1)), LinkEntry::removed(n(1), n(2))]
        );
        assert_eq!(update.node_removed, vec![n(1), n(2)]);
        assert_eq!(state.len(), 1);
        assert!(state.contains(&n(0)));
    }

    #[test]
    fn test_remove_link_from_weak_side_reports_once() {
        let mut state = chain();
        state.create_or_update_link(n(0), n(2), c(1));
        let update = state.remove_link(n(1), n(0));

        assert_eq!(update.link_removed, vec![LinkEntry::removed(n(1), n(0))]);
        assert!(update.node_removed.is_empty());
        assert!(!state.get_links(&n(0)).iter().any(|(id, _)| *id == n(1)));
        assert!(!state.get_links(&n(1)).iter().any(|(id, _)| *id == n(0)));
    }

    #[test]
    fn test_remove_unknown_ids_is_noop() {
        let mut state = chain();

        assert!(state.remove_node(n(42)).is_empty());
        assert!(state.remove_link(n(0), n(42)).is_empty());
        assert!(state.remove_link(n(0), n(2)).is_empty());
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_remove_cut_vertex_prunes_subtree() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(1));
        state.create_or_update_link(n(0), n(4), c(1));
        state.create_or_update_link(n(1), n(2), c(1));
        state.create_or_update_link(n(1), n(3), c(1));
        state.create_or_update_link(n(2), n(3), c(1));

        let update = state.remove_node(n(1));

        assert_eq!(update.node_removed, vec![n(1), n(2), n(3)]);
        assert_eq!(update.link_removed.len(), 4);
        assert_eq!(state.len(), 2);
        assert_all_reachable(&state);
    }

    #[test]
    fn test_cycle_survives_single_link_removal() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(1));
        state.create_or_update_link(n(1), n(2), c(1));
        state.create_or_update_link(n(2), n(0), c(1));

        let update = state.remove_link(n(0), n(1));

        assert_eq!(update.link_removed.len(), 1);
        assert!(update.node_removed.is_empty());
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_reachability_after_mixed_operations() {
        let mut state = LinkState::new(n(0));
        let ops: [(u8, u8); 6] = [(0, 1), (1, 2), (2, 3), (3, 4), (0, 5), (5, 3)];
        for (a, b) in ops {
            state.create_or_update_link(n(a), n(b), c(1));
            assert_all_reachable(&state);
        }

        state.remove_link(n(0), n(5));
        assert_all_reachable(&state);
        state.remove_node(n(2));
        assert_all_reachable(&state);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_weak_only_target_is_unfetched() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(1));

        let unfetched = state.get_links_not_yet_fetched_nodes();
        assert!(unfetched.contains(&n(1)));
        assert!(!unfetched.contains(&n(0)));

        state.create_or_update_link(n(1), n(2), c(1));
        let unfetched = state.get_links_not_yet_fetched_nodes();
        assert!(!unfetched.contains(&n(1)));
        assert!(unfetched.contains(&n(2)));
    }

    #[test]
    fn test_unfetched_costs() {
        let mut state = LinkState::new(n(0));
        state.create_or_update_link(n(0), n(1), c(1));
        state.create_or_update_node(n(1), Some(c(4)));

        assert_eq!(state.get_nodes_not_yet_fetched_costs(), vec![n(0)]);
    }

    #[test]
    fn test_sync_state_snapshot() {
        let mut state = chain();
        state.create_or_update_node(n(2), Some(c(8)));
        let snapshot = state.sync_state();

        assert_eq!(snapshot.added_node_ids().collect::<Vec<_>>(), vec![n(0), n(1), n(2)]);
        assert_eq!(snapshot.node_added[2].cost, Some(c(8)));
        assert_eq!(
            snapshot.link_added,
            vec![LinkEntry::new(n(0), n(1), c(1)), LinkEntry::new(n(1), n(2), c(1))]
        );
        assert!(snapshot.node_removed.is_empty());
    }

    #[test]
    fn test_self_link_is_ignored() {
        let mut state = LinkState::new(n(0));
        assert!(state.create_or_update_link(n(0), n(0), c(1)).is_empty());
        assert!(state.get_links(&n(0)).is_empty());
    }
}
