//! Composition Graph
//!
//! This module implements the composition tree: the nodes bodies create,
//! their lifecycle, keyed reconciliation and the tick that drives it all.
//!
//! # Overview
//!
//! The tree is owned top-down. A node owns its children; a child only links
//! back to its parent for traversal. Nodes live in a generational arena
//! inside the runtime, and everything else (dependency edges, the deferred
//! set, pending detachments) refers to them by handle. A handle whose node
//! was detached, or minted before a reset, simply fails to resolve.
//!
//! # Design Decisions
//!
//! 1. Node kinds are a closed enum, dispatched by pattern match. The set of
//!    kinds (group, once, remember, disposable, lifecycle, keyed) is fixed.
//!
//! 2. Bodies receive an explicit [`Scope`] rather than reaching for ambient
//!    state, which is what makes memo primitives unusable outside a body.
//!
//! 3. Keyed groups preserve the nodes of a stable run of keys and recreate
//!    the rest; see [`reconcile`].

mod arena;
mod node;
pub mod reconcile;
mod scheduler;
mod scope;

pub use arena::{Arena, Handle};
pub use node::{Attachment, Body, NodeId, NodeInfo, NodeKey};
pub use reconcile::{plan, ReconcilePlan};
pub use scheduler::TickReport;
pub use scope::Scope;

pub(crate) use node::CompositionNode;
pub(crate) use scheduler::TickState;
