//! In-memory emulated mesh.
//!
//! [`SimulatedNetwork`] holds the ground-truth topology of an emulated mesh
//! and plays both collaborators of the link-state service: it is the
//! [`NetworkObserver`] pushing notifications, and the [`NeighborListRpc`]
//! answering backfill requests from the ground truth.
//!
//! Scenarios are YAML documents:
//!
//! ```yaml
//! local: udp://10.0.0.1:9000
//! nodes:
//!   - address: udp://10.0.0.1:9000
//!     cost: 1
//!   - address: udp://10.0.0.2:9000
//! links:
//!   - { a: udp://10.0.0.1:9000, b: udp://10.0.0.2:9000, cost: 4 }
//! events:
//!   - { kind: link_removed, a: udp://10.0.0.1:9000, b: udp://10.0.0.2:9000 }
//! ```

use crate::fetcher::{FetchError, NeighborList, NeighborListRpc};
use crate::notification::{NetworkObserver, Notification, NotificationSink};
use crate::primitives::{Cost, NodeId};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct SimNode {
    address: String,
    cost: Option<Cost>,
    online: bool,
    links: BTreeMap<NodeId, Cost>,
}

/// Ground-truth mesh shared by the observer and RPC roles.
#[derive(Default)]
pub struct SimulatedNetwork {
    nodes: Mutex<BTreeMap<NodeId, SimNode>>,
    sinks: Mutex<Vec<NotificationSink>>,
    rpc_latency: Duration,
    requests: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for SimulatedNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedNetwork")
            .field("nodes", &lock(&self.nodes).len())
            .field("sinks", &lock(&self.sinks).len())
            .field("rpc_latency", &self.rpc_latency)
            .field("requests", &self.request_count())
            .finish()
    }
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every neighbor-list answer by `latency`.
    pub fn with_rpc_latency(mut self, latency: Duration) -> Self {
        self.rpc_latency = latency;
        self
    }

    /// Build a connected random mesh of `node_count` nodes: a spanning chain
    /// in shuffled order plus `extra_links` random shortcuts.
    pub fn random(node_count: usize, extra_links: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let network = Self::new();
        let ids: Vec<NodeId> = (0..node_count)
            .map(|i| {
                let address = format!("udp://10.0.{}.{}:9000", i / 256, i % 256);
                network.add_node(&address, Some(Cost::new(rng.gen_range(1..=10))))
            })
            .collect();

        for pair in ids.windows(2) {
            network.add_link(pair[0], pair[1], Cost::new(rng.gen_range(1..=20)));
        }
        if node_count > 2 {
            for _ in 0..extra_links {
                let a = ids[rng.gen_range(0..node_count)];
                let b = ids[rng.gen_range(0..node_count)];
                if a != b {
                    network.add_link(a, b, Cost::new(rng.gen_range(1..=20)));
                }
            }
        }
        network
    }

    /// Add a node by address and return its id. Re-adding updates the cost.
    pub fn add_node(&self, address: &str, cost: Option<Cost>) -> NodeId {
        let id = NodeId::from_address(address);
        let mut nodes = lock(&self.nodes);
        let node = nodes.entry(id).or_insert_with(|| SimNode {
            address: address.to_string(),
            cost: None,
            online: true,
            links: BTreeMap::new(),
        });
        if cost.is_some() {
            node.cost = cost;
        }
        id
    }

    /// Connect two known nodes. Returns `false` if either is unknown.
    pub fn add_link(&self, a: NodeId, b: NodeId, cost: Cost) -> bool {
        let mut nodes = lock(&self.nodes);
        if a == b || !nodes.contains_key(&a) || !nodes.contains_key(&b) {
            return false;
        }
        if let Some(node) = nodes.get_mut(&a) {
            node.links.insert(b, cost);
        }
        if let Some(node) = nodes.get_mut(&b) {
            node.links.insert(a, cost);
        }
        true
    }

    pub fn remove_link(&self, a: NodeId, b: NodeId) -> bool {
        let mut nodes = lock(&self.nodes);
        let removed_a = nodes.get_mut(&a).and_then(|node| node.links.remove(&b));
        let removed_b = nodes.get_mut(&b).and_then(|node| node.links.remove(&a));
        removed_a.is_some() || removed_b.is_some()
    }

    pub fn remove_node(&self, id: NodeId) -> bool {
        let mut nodes = lock(&self.nodes);
        let Some(node) = nodes.remove(&id) else {
            return false;
        };
        for neighbor in node.links.keys() {
            if let Some(other) = nodes.get_mut(neighbor) {
                other.links.remove(&id);
            }
        }
        true
    }

    /// Offline nodes stay in the topology but fail every RPC.
    pub fn set_online(&self, id: NodeId, online: bool) {
        if let Some(node) = lock(&self.nodes).get_mut(&id) {
            node.online = online;
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        lock(&self.nodes).contains_key(id)
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        lock(&self.nodes).keys().copied().collect()
    }

    pub fn address_of(&self, id: &NodeId) -> Option<String> {
        lock(&self.nodes).get(id).map(|node| node.address.clone())
    }

    pub fn neighbors(&self, id: &NodeId) -> Vec<(NodeId, Cost)> {
        lock(&self.nodes)
            .get(id)
            .map(|node| node.links.iter().map(|(id, cost)| (*id, *cost)).collect())
            .unwrap_or_default()
    }

    /// Number of neighbor-list requests answered or refused so far.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Ids reachable from `start` in the ground truth.
    pub fn component_of(&self, start: NodeId) -> BTreeSet<NodeId> {
        let nodes = lock(&self.nodes);
        let mut visited = BTreeSet::new();
        if !nodes.contains_key(&start) {
            return visited;
        }
        let mut queue = VecDeque::from([start]);
        visited.insert(start);
        while let Some(current) = queue.pop_front() {
            if let Some(node) = nodes.get(&current) {
                for neighbor in node.links.keys() {
                    if visited.insert(*neighbor) {
                        queue.push_back(*neighbor);
                    }
                }
            }
        }
        visited
    }

    /// Notifications the local node's own hello layer would produce: its
    /// cost and one link report per direct neighbor.
    pub fn local_view(&self, local: NodeId) -> Vec<Notification> {
        let nodes = lock(&self.nodes);
        let Some(node) = nodes.get(&local) else {
            return Vec::new();
        };
        NeighborList {
            cost: node.cost,
            neighbors: node.links.iter().map(|(id, cost)| (*id, *cost)).collect(),
        }
        .into_notifications(local)
    }

    /// Push `notification` to every subscribed sink.
    pub async fn emit(&self, notification: Notification) {
        let sinks: Vec<NotificationSink> = lock(&self.sinks).clone();
        for sink in sinks {
            if !sink.send(notification).await {
                debug!("Dropping closed notification sink");
            }
        }
        lock(&self.sinks).retain(|sink| !sink.is_closed());
    }

    /// Apply `event` to the ground truth and return the notification the
    /// network layer would raise for it.
    pub fn apply_event(&self, event: &SimEvent) -> Option<Notification> {
        match *event {
            SimEvent::NodeUpdated { node_id, cost } => {
                if let Some(node) = lock(&self.nodes).get_mut(&node_id) {
                    if cost.is_some() {
                        node.cost = cost;
                    }
                }
                Some(Notification::NodeUpdated { node_id, cost })
            }
            SimEvent::NodeRemoved { node_id } => {
                self.remove_node(node_id);
                Some(Notification::NodeRemoved { node_id })
            }
            SimEvent::LinkUpdated { a, b, cost } => {
                if !self.add_link(a, b, cost) {
                    warn!(a = %a.short(), b = %b.short(), "Link between unknown nodes");
                    return None;
                }
                Some(Notification::LinkUpdated {
                    node_id1: a,
                    node_id2: b,
                    cost,
                })
            }
            SimEvent::LinkRemoved { a, b } => {
                self.remove_link(a, b);
                Some(Notification::LinkRemoved {
                    node_id1: a,
                    node_id2: b,
                })
            }
            SimEvent::Wait { .. } => None,
        }
    }

    /// Compare a node's view against the part of the ground truth reachable
    /// from it.
    pub fn convergence(&self, local: NodeId, known: &BTreeSet<NodeId>) -> ConvergenceSummary {
        let expected = self.component_of(local);
        let missing: Vec<NodeId> = expected.difference(known).copied().collect();
        let extra: Vec<NodeId> = known.difference(&expected).copied().collect();
        ConvergenceSummary {
            local,
            expected: expected.len(),
            known: known.len(),
            converged: missing.is_empty() && extra.is_empty(),
            missing,
            extra,
        }
    }
}

/// How far a local view is from the reachable ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceSummary {
    pub local: NodeId,
    /// Nodes reachable from `local` in the ground truth.
    pub expected: usize,
    /// Nodes in the local view.
    pub known: usize,
    /// Reachable nodes the view lacks.
    pub missing: Vec<NodeId>,
    /// Nodes in the view that are not reachable any more.
    pub extra: Vec<NodeId>,
    pub converged: bool,
}

impl std::fmt::Display for ConvergenceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Link-State Convergence")?;
        writeln!(f, "  Local node: {}", self.local)?;
        writeln!(f, "  Reachable nodes: {}", self.expected)?;
        writeln!(f, "  Known nodes: {}", self.known)?;
        writeln!(
            f,
            "  Convergence: {}",
            if self.converged { "ACHIEVED" } else { "FAILED" }
        )?;
        if !self.missing.is_empty() {
            writeln!(f, "  Missing: {:?}", self.missing)?;
        }
        if !self.extra.is_empty() {
            writeln!(f, "  Stale: {:?}", self.extra)?;
        }
        Ok(())
    }
}

impl NetworkObserver for SimulatedNetwork {
    fn subscribe(&self, sink: NotificationSink) {
        lock(&self.sinks).push(sink);
    }
}

#[async_trait]
impl NeighborListRpc for SimulatedNetwork {
    async fn request_neighbors(&self, node_id: NodeId) -> Result<NeighborList, FetchError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if !self.rpc_latency.is_zero() {
            tokio::time::sleep(self.rpc_latency).await;
        }
        let nodes = lock(&self.nodes);
        match nodes.get(&node_id) {
            Some(node) if node.online => Ok(NeighborList {
                cost: node.cost,
                neighbors: node.links.iter().map(|(id, cost)| (*id, *cost)).collect(),
            }),
            _ => Err(FetchError::Unreachable(node_id)),
        }
    }
}

/// A ground-truth change resolved to node ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimEvent {
    NodeUpdated { node_id: NodeId, cost: Option<Cost> },
    NodeRemoved { node_id: NodeId },
    LinkUpdated { a: NodeId, b: NodeId, cost: Cost },
    LinkRemoved { a: NodeId, b: NodeId },
    Wait { duration: Duration },
}

/// Errors loading or resolving a scenario.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("failed to read scenario: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("scenario references unknown address {0}")]
    UnknownAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioNode {
    pub address: String,
    #[serde(default)]
    pub cost: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioLink {
    pub a: String,
    pub b: String,
    pub cost: u32,
}

/// A scenario event, by address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScenarioEvent {
    NodeUpdated {
        address: String,
        #[serde(default)]
        cost: Option<u32>,
    },
    NodeRemoved {
        address: String,
    },
    LinkUpdated {
        a: String,
        b: String,
        cost: u32,
    },
    LinkRemoved {
        a: String,
        b: String,
    },
    Wait {
        millis: u64,
    },
}

/// A scripted emulation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    /// Address of the node whose view is being built.
    pub local: String,
    #[serde(default)]
    pub nodes: Vec<ScenarioNode>,
    #[serde(default)]
    pub links: Vec<ScenarioLink>,
    #[serde(default)]
    pub events: Vec<ScenarioEvent>,
}

impl Scenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ScenarioError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    /// Build the ground-truth network and resolve events to node ids.
    ///
    /// Returns the network, the local node id and the resolved events.
    pub fn build(&self) -> Result<(SimulatedNetwork, NodeId, Vec<SimEvent>), ScenarioError> {
        let network = SimulatedNetwork::new();
        for node in &self.nodes {
            network.add_node(&node.address, node.cost.map(Cost::new));
        }
        let local = network.add_node(&self.local, None);

        let resolve = |address: &str| -> Result<NodeId, ScenarioError> {
            let id = NodeId::from_address(address);
            if network.contains(&id) {
                Ok(id)
            } else {
                Err(ScenarioError::UnknownAddress(address.to_string()))
            }
        };

        for link in &self.links {
            network.add_link(resolve(&link.a)?, resolve(&link.b)?, Cost::new(link.cost));
        }

        let events = self
            .events
            .iter()
            .map(|event| {
                Ok(match event {
                    ScenarioEvent::NodeUpdated { address, cost } => SimEvent::NodeUpdated {
                        node_id: NodeId::from_address(address),
                        cost: cost.map(Cost::new),
                    },
                    ScenarioEvent::NodeRemoved { address } => SimEvent::NodeRemoved {
                        node_id: resolve(address)?,
                    },
                    ScenarioEvent::LinkUpdated { a, b, cost } => SimEvent::LinkUpdated {
                        a: NodeId::from_address(a),
                        b: NodeId::from_address(b),
                        cost: Cost::new(*cost),
                    },
                    ScenarioEvent::LinkRemoved { a, b } => SimEvent::LinkRemoved {
                        a: resolve(a)?,
                        b: resolve(b)?,
                    },
                    ScenarioEvent::Wait { millis } => SimEvent::Wait {
                        duration: Duration::from_millis(*millis),
                    },
                })
            })
            .collect::<Result<Vec<_>, ScenarioError>>()?;

        Ok((network, local, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
local: udp://10.0.0.1:9000
nodes:
  - address: udp://10.0.0.1:9000
    cost: 1
  - address: udp://10.0.0.2:9000
    cost: 2
  - address: udp://10.0.0.3:9000
links:
  - { a: udp://10.0.0.1:9000, b: udp://10.0.0.2:9000, cost: 4 }
  - { a: udp://10.0.0.2:9000, b: udp://10.0.0.3:9000, cost: 6 }
events:
  - { kind: wait, millis: 10 }
  - { kind: link_removed, a: udp://10.0.0.2:9000, b: udp://10.0.0.3:9000 }
  - { kind: node_updated, address: udp://10.0.0.2:9000, cost: 5 }
"#;

    #[test]
    fn test_scenario_builds_ground_truth() {
        let scenario = Scenario::from_yaml_str(SCENARIO).unwrap();
        let (network, local, events) = scenario.build().unwrap();

        assert_eq!(local, NodeId::from_address("udp://10.0.0.1:9000"));
        assert_eq!(network.node_ids().len(), 3);
        assert_eq!(network.component_of(local).len(), 3);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            SimEvent::Wait {
                duration: Duration::from_millis(10)
            }
        );
    }

    #[test]
    fn test_unknown_link_endpoint_rejected() {
        let yaml = "local: a\nlinks:\n  - { a: a, b: ghost, cost: 1 }\n";
        let err = Scenario::from_yaml_str(yaml).unwrap().build().unwrap_err();
        assert!(matches!(err, ScenarioError::UnknownAddress(addr) if addr == "ghost"));
    }

    #[test]
    fn test_debug_reports_sizes() {
        let (network, _, _) = Scenario::from_yaml_str(SCENARIO).unwrap().build().unwrap();
        let debug = format!("{:?}", network);

        assert!(debug.starts_with("SimulatedNetwork"));
        assert!(debug.contains("nodes: 3"));
        assert!(debug.contains("requests: 0"));
    }

    #[test]
    fn test_events_mutate_ground_truth() {
        let (network, local, events) = Scenario::from_yaml_str(SCENARIO).unwrap().build().unwrap();

        assert_eq!(network.apply_event(&events[0]), None);
        let removal = network.apply_event(&events[1]).unwrap();
        assert_eq!(removal.kind(), "link_removed");
        assert_eq!(network.component_of(local).len(), 2);
    }

    #[test]
    fn test_random_mesh_is_connected_and_deterministic() {
        let a = SimulatedNetwork::random(20, 10, 7);
        let b = SimulatedNetwork::random(20, 10, 7);
        let start = a.node_ids()[0];

        assert_eq!(a.component_of(start).len(), 20);
        assert_eq!(a.neighbors(&start), b.neighbors(&start));
    }

    #[test]
    fn test_local_view_reports_direct_links() {
        let network = SimulatedNetwork::new();
        let a = network.add_node("a", Some(Cost::new(1)));
        let b = network.add_node("b", None);
        network.add_link(a, b, Cost::new(3));

        let view = network.local_view(a);
        assert_eq!(view.len(), 2);
        assert_eq!(
            view[1],
            Notification::LinkUpdated {
                node_id1: a,
                node_id2: b,
                cost: Cost::new(3)
            }
        );
    }

    #[test]
    fn test_convergence_summary() {
        let network = SimulatedNetwork::new();
        let a = network.add_node("a", None);
        let b = network.add_node("b", None);
        let c = network.add_node("c", None);
        network.add_link(a, b, Cost::new(1));

        let summary = network.convergence(a, &BTreeSet::from([a, c]));
        assert!(!summary.converged);
        assert_eq!(summary.missing, vec![b]);
        assert_eq!(summary.extra, vec![c]);
        assert!(summary.to_string().contains("FAILED"));

        assert!(network.convergence(a, &BTreeSet::from([a, b])).converged);
    }

    #[tokio::test]
    async fn test_rpc_refuses_offline_nodes() {
        let network = SimulatedNetwork::new();
        let a = network.add_node("a", Some(Cost::new(1)));
        let b = network.add_node("b", None);
        network.add_link(a, b, Cost::new(3));

        let list = network.request_neighbors(b).await.unwrap();
        assert_eq!(list.neighbors, vec![(a, Cost::new(3))]);

        network.set_online(b, false);
        assert_eq!(
            network.request_neighbors(b).await,
            Err(FetchError::Unreachable(b))
        );
        assert_eq!(network.request_count(), 2);
    }
}
