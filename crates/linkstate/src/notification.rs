//! Topology notifications from the lower network layer.

use crate::fetcher::FetchedNeighbors;
use crate::link_state::{LinkState, StateUpdate};
use crate::primitives::{Cost, NodeId};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, oneshot};

/// One raw topology event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// A node appeared or reported its cost.
    NodeUpdated { node_id: NodeId, cost: Option<Cost> },
    /// A node left the network.
    NodeRemoved { node_id: NodeId },
    /// `node_id1` reports a link to `node_id2`.
    LinkUpdated {
        node_id1: NodeId,
        node_id2: NodeId,
        cost: Cost,
    },
    /// The link between the two nodes went away.
    LinkRemoved { node_id1: NodeId, node_id2: NodeId },
}

impl Notification {
    /// Apply this notification to `state` and return the resulting diff.
    pub fn apply_to(&self, state: &mut LinkState) -> StateUpdate {
        match *self {
            Notification::NodeUpdated { node_id, cost } => state.create_or_update_node(node_id, cost),
            Notification::NodeRemoved { node_id } => state.remove_node(node_id),
            Notification::LinkUpdated {
                node_id1,
                node_id2,
                cost,
            } => state.create_or_update_link(node_id1, node_id2, cost),
            Notification::LinkRemoved { node_id1, node_id2 } => {
                state.remove_link(node_id1, node_id2)
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Notification::NodeUpdated { .. } => "node_updated",
            Notification::NodeRemoved { .. } => "node_removed",
            Notification::LinkUpdated { .. } => "link_updated",
            Notification::LinkRemoved { .. } => "link_removed",
        }
    }
}

/// One item on the service's inbound queue.
///
/// External notifications, fetched neighbor lists and direct applications
/// share a single queue, so they are applied in the order they arrived.
pub(crate) enum Inbound {
    /// Pushed through a [`NotificationSink`]; the permit bounds how many of
    /// these may wait in the queue.
    External {
        notification: Notification,
        permit: OwnedSemaphorePermit,
    },
    /// A fetched neighbor list, applied as one unit.
    Fetched(FetchedNeighbors),
    /// Applied like an external notification; the diff is sent back.
    Apply {
        notification: Notification,
        reply: oneshot::Sender<StateUpdate>,
    },
}

/// Handle the notification source pushes events into.
///
/// Events are queued and applied strictly in the order they were sent. At
/// most `notification_buffer` of them wait in the queue at once.
#[derive(Debug, Clone)]
pub struct NotificationSink {
    tx: mpsc::UnboundedSender<Inbound>,
    permits: Arc<Semaphore>,
}

impl NotificationSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Inbound>, permits: Arc<Semaphore>) -> Self {
        Self { tx, permits }
    }

    /// Queue a notification, waiting if the buffer is full.
    ///
    /// Returns `false` once the consuming service has shut down.
    pub async fn send(&self, notification: Notification) -> bool {
        match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => self.enqueue(notification, permit),
            Err(_) => false,
        }
    }

    /// Queue a notification without waiting.
    ///
    /// Returns `false` if the buffer is full or the service is gone.
    pub fn try_send(&self, notification: Notification) -> bool {
        match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => self.enqueue(notification, permit),
            Err(_) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed() || self.permits.is_closed()
    }

    /// Fail every current and future send.
    pub(crate) fn close(&self) {
        self.permits.close();
    }

    fn enqueue(&self, notification: Notification, permit: OwnedSemaphorePermit) -> bool {
        self.tx
            .send(Inbound::External {
                notification,
                permit,
            })
            .is_ok()
    }
}

/// External source of topology notifications.
pub trait NetworkObserver: Send + Sync {
    /// Register `sink` to receive every subsequent notification.
    fn subscribe(&self, sink: NotificationSink);
}
