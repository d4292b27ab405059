//! Link-state service: notifications in, diffs out.
//!
//! # Architecture
//!
//! ```text
//!   NetworkObserver ──▶ NotificationSink ─┐
//!   LinkStateService::apply ──────────────┼──▶ inbound queue ──▶ pump ──▶ LinkState
//!   Fetcher ──▶ FetchedNeighbors ─────────┘                                │
//!      ▲                                                                   ▼
//!      └──────────── request_fetch(unfetched ids) ◀──── StateUpdate ──▶ subscribers
//! ```
//!
//! Everything that mutates the graph goes through one queue, and a single
//! pump task applies it in arrival order. Diffs reach subscribers in the
//! order they were produced.

use crate::config::LinkStateConfig;
use crate::fetcher::{Fetcher, FetcherStats, NeighborListRpc};
use crate::link_state::{LinkState, StateUpdate};
use crate::notification::{Inbound, NetworkObserver, Notification, NotificationSink};
use crate::primitives::NodeId;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Callback receiving topology diffs.
pub type UpdateCallback = Arc<dyn Fn(&StateUpdate) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, UpdateCallback)>,
}

struct ServiceCore {
    state: Mutex<LinkState>,
    subscribers: Mutex<Subscribers>,
    /// Serializes "mutate then publish" against "snapshot then register", so
    /// a new subscriber never sees a diff before its snapshot.
    delivery: Mutex<()>,
    fetcher: Fetcher,
    config: LinkStateConfig,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ServiceCore {
    fn apply(&self, notification: Notification) -> StateUpdate {
        self.apply_batch(std::slice::from_ref(&notification))
    }

    /// Apply a batch under one lock and publish its merged diff.
    ///
    /// Fetched neighbor lists go through here as a unit, so a node is marked
    /// fetched before the backfill candidates are recomputed.
    fn apply_batch(&self, batch: &[Notification]) -> StateUpdate {
        let _delivery = lock(&self.delivery);
        let (update, to_fetch) = {
            let mut state = lock(&self.state);
            let update =
                StateUpdate::merge(batch.iter().map(|notification| notification.apply_to(&mut state)));
            let to_fetch = if update.is_empty() {
                Vec::new()
            } else {
                self.fetch_candidates(&state)
            };
            (update, to_fetch)
        };

        if !update.is_empty() {
            debug!(
                notifications = batch.len(),
                changes = update.len(),
                "Applied topology notifications"
            );
            self.publish(&update);
        }
        for node_id in to_fetch {
            self.fetcher.request_fetch(node_id);
        }
        update
    }

    /// Nodes missing links (and cost, if enabled), excluding the local node.
    fn fetch_candidates(&self, state: &LinkState) -> Vec<NodeId> {
        let mut ids: BTreeSet<NodeId> = state.get_links_not_yet_fetched_nodes().into_iter().collect();
        if self.config.fetch_costs {
            ids.extend(state.get_nodes_not_yet_fetched_costs());
        }
        ids.remove(&state.local_id());
        ids.into_iter().collect()
    }

    fn publish(&self, update: &StateUpdate) {
        let callbacks: Vec<UpdateCallback> = lock(&self.subscribers)
            .entries
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(update);
        }
    }

    fn subscribe(&self, callback: UpdateCallback) -> u64 {
        let _delivery = lock(&self.delivery);
        let snapshot = lock(&self.state).sync_state();
        let id = {
            let mut subscribers = lock(&self.subscribers);
            let id = subscribers.next_id;
            subscribers.next_id += 1;
            subscribers.entries.push((id, Arc::clone(&callback)));
            id
        };
        callback(&snapshot);
        id
    }

    fn unsubscribe(&self, id: u64) {
        lock(&self.subscribers)
            .entries
            .retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Handle returned by [`LinkStateService::on_state_update`].
///
/// The callback stays registered until this handle is dropped or
/// [`unsubscribe`](Subscription::unsubscribe) is called.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    core: Weak<ServiceCore>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(core) = self.core.upgrade() {
            core.unsubscribe(self.id);
        }
    }
}

/// Orchestrates the local topology view.
pub struct LinkStateService {
    core: Arc<ServiceCore>,
    inbound: mpsc::UnboundedSender<Inbound>,
    sink: NotificationSink,
    pump: JoinHandle<()>,
}

/// Build the core and its inbound queue, with the fetcher delivering into
/// that queue. The pump is not started.
fn wire(
    local_id: NodeId,
    rpc: Arc<dyn NeighborListRpc>,
    config: LinkStateConfig,
) -> (
    Arc<ServiceCore>,
    NotificationSink,
    mpsc::UnboundedSender<Inbound>,
    mpsc::UnboundedReceiver<Inbound>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let permits = Arc::new(Semaphore::new(config.notification_buffer.max(1)));
    let sink = NotificationSink::new(tx.clone(), permits);

    let fetcher = Fetcher::new(rpc, config.fetch_queue_capacity);
    let fetched_tx = tx.clone();
    fetcher.on_receive(move |fetched| {
        let node_id = fetched.node_id;
        if fetched_tx.send(Inbound::Fetched(fetched)).is_err() {
            debug!(node = %node_id.short(), "Service gone, discarding fetched neighbors");
        }
    });

    let core = Arc::new(ServiceCore {
        state: Mutex::new(LinkState::new(local_id)),
        subscribers: Mutex::new(Subscribers::default()),
        delivery: Mutex::new(()),
        fetcher,
        config,
    });
    (core, sink, tx, rx)
}

impl LinkStateService {
    /// Seed the graph with `local_id`, subscribe to `observer` and start the
    /// pump task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(
        local_id: NodeId,
        observer: &dyn NetworkObserver,
        rpc: Arc<dyn NeighborListRpc>,
        config: LinkStateConfig,
    ) -> Self {
        let (core, sink, inbound, rx) = wire(local_id, rpc, config);
        observer.subscribe(sink.clone());
        let pump = tokio::spawn(run_pump(rx, Arc::clone(&core)));
        info!(local = %local_id, "Link-state service started");

        Self {
            core,
            inbound,
            sink,
            pump,
        }
    }

    pub fn local_id(&self) -> NodeId {
        lock(&self.core.state).local_id()
    }

    /// Register `callback`; it first receives a full snapshot, then every
    /// subsequent diff.
    ///
    /// Callbacks run on the task applying notifications and must not call
    /// `on_state_update` themselves; [`sync_state`](Self::sync_state) is
    /// fine.
    pub fn on_state_update<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StateUpdate) + Send + Sync + 'static,
    {
        let id = self.core.subscribe(Arc::new(callback));
        Subscription {
            core: Arc::downgrade(&self.core),
            id,
        }
    }

    /// Full snapshot of the current graph.
    pub fn sync_state(&self) -> StateUpdate {
        lock(&self.core.state).sync_state()
    }

    /// Queue `notification` behind everything already received and wait for
    /// its diff.
    ///
    /// Returns an empty update if the service has stopped.
    pub async fn apply(&self, notification: Notification) -> StateUpdate {
        let (reply, rx) = oneshot::channel();
        if self
            .inbound
            .send(Inbound::Apply {
                notification,
                reply,
            })
            .is_err()
        {
            return StateUpdate::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Sink for pushing notifications through the ordered queue.
    pub fn sink(&self) -> NotificationSink {
        self.sink.clone()
    }

    /// Run `f` against the current graph.
    pub fn inspect<R>(&self, f: impl FnOnce(&LinkState) -> R) -> R {
        f(&lock(&self.core.state))
    }

    pub fn fetcher_stats(&self) -> FetcherStats {
        self.core.fetcher.stats()
    }

    /// Number of backfill requests queued or in flight.
    pub fn pending_fetches(&self) -> usize {
        self.core.fetcher.pending()
    }
}

impl Drop for LinkStateService {
    fn drop(&mut self) {
        self.sink.close();
        self.pump.abort();
    }
}

async fn run_pump(mut inbound: mpsc::UnboundedReceiver<Inbound>, core: Arc<ServiceCore>) {
    while let Some(item) = inbound.recv().await {
        match item {
            Inbound::External {
                notification,
                permit,
            } => {
                core.apply(notification);
                drop(permit);
            }
            // Dropping `fetched` afterwards releases the node in the fetcher.
            Inbound::Fetched(fetched) => {
                core.apply_batch(&fetched.notifications);
            }
            Inbound::Apply {
                notification,
                reply,
            } => {
                let _ = reply.send(core.apply(notification));
            }
        }
    }
    debug!("Link-state pump stopped");
}
