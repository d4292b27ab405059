//! Link-state topology data structures.
//!
//! The graph ([`LinkState`]) is the only owner of topology data. Every
//! mutation produces a [`StateUpdate`] diff; consumers never reach into the
//! graph itself.
//!
//! # Link representation
//!
//! ```text
//!   A ──strong(A→B, cost)──▶ B      reported by A
//!   A ◀──weak(B→A, cost)──── B      mirror installed on B, no diff
//! ```
//!
//! Removal from either side drops both entries and reports one undirected
//! removal. After every removal the graph is pruned to the local node's
//! connected component.

mod node;
mod state;
mod update;

pub use node::{NetworkNode, NodeLinks};
pub use state::LinkState;
pub use update::{
    LinkCostFrame, LinkEntry, LinkFrame, NodeAddedFrame, NodeCostEntry, NodeCostFrame, NodeEntry,
    StateUpdate, StateUpdateFrame,
};
