//! Mesh Link-State Topology Engine
//!
//! Every node of the mesh emulator keeps a local, best-effort view of the
//! whole network. This crate maintains that view:
//!
//! - **LinkState**: the graph, rooted at the local node, pruned to what is
//!   reachable from it after every removal
//! - **StateUpdate**: minimal diffs produced by every mutation, plus their
//!   wire form
//! - **Fetcher**: sequential, deduplicating backfill of neighbor lists the
//!   local node has not learned yet
//! - **LinkStateService**: applies notifications in order, publishes diffs,
//!   drives the fetcher
//! - **SimulatedNetwork**: an emulated mesh standing in for the transport
//!   and RPC layers
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        LinkStateService                            │
//! │                                                                    │
//! │  notifications ──▶ LinkState ──▶ StateUpdate ──▶ subscribers (UI)  │
//! │        ▲                              │                            │
//! │        │                              ▼                            │
//! │        └──── fetched batches ◀── Fetcher ◀── unfetched node ids   │
//! └────────────────────────────────────────┬──────────────────────────┘
//!                                          │ one request at a time
//!                                          ▼
//!                                 remote neighbor-list RPC
//! ```
//!
//! The engine does not compute routes, and different nodes' views are not
//! kept consistent with each other.

pub mod config;
pub mod fetcher;
pub mod link_state;
pub mod notification;
pub mod primitives;
pub mod service;
pub mod simulation;

pub use config::{ConfigError, LinkStateConfig};
pub use fetcher::{
    FetchError, FetchedNeighbors, Fetcher, FetcherStats, NeighborList, NeighborListRpc,
};
pub use link_state::{
    LinkEntry, LinkState, NetworkNode, NodeCostEntry, NodeEntry, NodeLinks, StateUpdate,
    StateUpdateFrame,
};
pub use notification::{NetworkObserver, Notification, NotificationSink};
pub use primitives::{Cost, NodeId, WireCodec, WireError};
pub use service::{LinkStateService, Subscription};
pub use simulation::{ConvergenceSummary, Scenario, ScenarioError, SimEvent, SimulatedNetwork};
