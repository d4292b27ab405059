//! Backfill of neighbor lists the local node has not learned yet.
//!
//! The [`Fetcher`] keeps at most one outstanding request per node id and
//! issues them one at a time, in the order they were first requested:
//!
//! ```text
//!  request_fetch(id) ──▶ pending set ──▶ FIFO queue ──▶ worker ──▶ RPC
//!                          ▲  (dedup)                     │
//!                          │                              │ Ok
//!                          │                              ▼
//!                          └── drop ◀── FetchedNeighbors ─▶ on_receive
//! ```
//!
//! A successful fetch keeps its node pending until the receiver drops the
//! delivered [`FetchedNeighbors`], so the receiver decides when the answer
//! counts as applied. Failures only release the pending marker. Retrying is
//! left to the caller, which asks again the next time it still sees the node
//! as unfetched.

use crate::notification::Notification;
use crate::primitives::{Cost, NodeId};
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Errors reported by the remote neighbor-list RPC.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeId),
    #[error("request to node {0} timed out")]
    Timeout(NodeId),
    #[error("remote error: {0}")]
    Remote(String),
}

/// A node's answer to a neighbor-list request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NeighborList {
    /// The node's own cost, if it reported one.
    pub cost: Option<Cost>,
    /// Neighbor ids with link costs.
    pub neighbors: Vec<(NodeId, Cost)>,
}

impl NeighborList {
    /// Express the answer as the notifications the node itself would have
    /// sent: its cost first, then one link report per neighbor.
    pub fn into_notifications(self, node_id: NodeId) -> Vec<Notification> {
        let mut batch = Vec::with_capacity(self.neighbors.len() + 1);
        if let Some(cost) = self.cost {
            batch.push(Notification::NodeUpdated {
                node_id,
                cost: Some(cost),
            });
        }
        batch.extend(
            self.neighbors
                .into_iter()
                .map(|(neighbor, cost)| Notification::LinkUpdated {
                    node_id1: node_id,
                    node_id2: neighbor,
                    cost,
                }),
        );
        batch
    }
}

/// Remote call returning a node's neighbor list.
///
/// Timeouts and retries belong to the implementation; the fetcher waits for
/// whatever it returns.
#[async_trait]
pub trait NeighborListRpc: Send + Sync {
    async fn request_neighbors(&self, node_id: NodeId) -> Result<NeighborList, FetchError>;
}

/// Receiver of fetched neighbor lists.
pub type ReceiveCallback = Box<dyn Fn(FetchedNeighbors) + Send + Sync>;

/// A fetched neighbor list, as the notifications the node would have sent.
///
/// `node_id` stays pending in the fetcher until this value is dropped.
pub struct FetchedNeighbors {
    pub node_id: NodeId,
    pub notifications: Vec<Notification>,
    _pending: PendingGuard,
}

impl std::fmt::Debug for FetchedNeighbors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchedNeighbors")
            .field("node_id", &self.node_id)
            .field("notifications", &self.notifications)
            .finish()
    }
}

struct PendingGuard {
    node_id: NodeId,
    shared: Arc<Shared>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.node_id);
    }
}

/// Counters describing fetcher activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetcherStats {
    pub requests_issued: u64,
    pub requests_failed: u64,
    pub requests_dropped: u64,
}

struct Shared {
    pending: DashSet<NodeId>,
    on_receive: OnceLock<ReceiveCallback>,
    requests_issued: AtomicU64,
    requests_failed: AtomicU64,
    requests_dropped: AtomicU64,
}

/// Sequential, deduplicating neighbor-list fetcher.
///
/// Cloning yields another handle to the same queue. The worker task stops
/// once every handle is dropped.
#[derive(Clone)]
pub struct Fetcher {
    queue: mpsc::Sender<NodeId>,
    shared: Arc<Shared>,
}

impl Fetcher {
    /// Create a fetcher and spawn its worker on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(rpc: Arc<dyn NeighborListRpc>, queue_capacity: usize) -> Self {
        let (queue, rx) = mpsc::channel(queue_capacity.max(1));
        let shared = Arc::new(Shared {
            pending: DashSet::new(),
            on_receive: OnceLock::new(),
            requests_issued: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            requests_dropped: AtomicU64::new(0),
        });
        tokio::spawn(run_worker(rx, Arc::clone(&shared), rpc));
        Self { queue, shared }
    }

    /// Register the single receiver of fetched neighbor lists.
    ///
    /// The receiver should hold on to each [`FetchedNeighbors`] until its
    /// notifications are applied; the node is not fetched again before then.
    ///
    /// # Panics
    ///
    /// Panics if a receiver is already registered.
    pub fn on_receive<F>(&self, callback: F)
    where
        F: Fn(FetchedNeighbors) + Send + Sync + 'static,
    {
        if self.shared.on_receive.set(Box::new(callback)).is_err() {
            panic!("Fetcher receive callback registered twice");
        }
    }

    /// Queue a fetch for `node_id` unless one is already queued or running.
    ///
    /// Returns `true` if a new request was queued.
    pub fn request_fetch(&self, node_id: NodeId) -> bool {
        if !self.shared.pending.insert(node_id) {
            return false;
        }
        match self.queue.try_send(node_id) {
            Ok(()) => {
                debug!(node = %node_id.short(), "Queued neighbor fetch");
                true
            }
            Err(err) => {
                self.shared.pending.remove(&node_id);
                self.shared.requests_dropped.fetch_add(1, Ordering::Relaxed);
                warn!(node = %node_id.short(), "Dropped neighbor fetch: {}", err);
                false
            }
        }
    }

    /// True if `node_id` is queued or in flight.
    pub fn is_pending(&self, node_id: &NodeId) -> bool {
        self.shared.pending.contains(node_id)
    }

    /// Number of node ids queued or in flight.
    pub fn pending(&self) -> usize {
        self.shared.pending.len()
    }

    pub fn stats(&self) -> FetcherStats {
        FetcherStats {
            requests_issued: self.shared.requests_issued.load(Ordering::Relaxed),
            requests_failed: self.shared.requests_failed.load(Ordering::Relaxed),
            requests_dropped: self.shared.requests_dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish()
    }
}

async fn run_worker(
    mut rx: mpsc::Receiver<NodeId>,
    shared: Arc<Shared>,
    rpc: Arc<dyn NeighborListRpc>,
) {
    while let Some(node_id) = rx.recv().await {
        shared.requests_issued.fetch_add(1, Ordering::Relaxed);
        let result = rpc.request_neighbors(node_id).await;

        match result {
            Ok(list) => {
                debug!(
                    node = %node_id.short(),
                    neighbors = list.neighbors.len(),
                    "Fetched neighbor list"
                );
                let fetched = FetchedNeighbors {
                    node_id,
                    notifications: list.into_notifications(node_id),
                    _pending: PendingGuard {
                        node_id,
                        shared: Arc::clone(&shared),
                    },
                };
                match shared.on_receive.get() {
                    Some(callback) => callback(fetched),
                    None => warn!(
                        node = %node_id.short(),
                        "Fetched neighbor list with no receiver registered"
                    ),
                }
            }
            Err(err) => {
                shared.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(node = %node_id.short(), "Neighbor fetch failed: {}", err);
                shared.pending.remove(&node_id);
            }
        }
    }
    debug!("Fetcher worker stopped");
}
