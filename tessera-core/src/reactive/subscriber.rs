//! Identifiers for the two sides of a dependency edge.
//!
//! A [`CellId`] names anything that can be read under recording: a state
//! cell, or the output of a computed entry. An [`ObserverId`] names anything
//! that records reads: a composition node or a computed entry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::graph::{Handle, NodeId};

/// Unique identifier for a readable reactive source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Generate a new unique cell ID.
    ///
    /// Uses an atomic counter so ids stay unique across runtimes.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for CellId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Handle of a computed entry in its runtime's registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComputedId(pub(crate) Handle);

/// Anything that can be registered as a dependent of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObserverId {
    /// A composition node; re-runs on the next tick.
    Node(NodeId),
    /// A computed entry; goes dirty and forwards the change.
    Computed(ComputedId),
}

impl fmt::Display for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserverId::Node(id) => write!(f, "node#{}", id.handle()),
            ObserverId::Computed(id) => write!(f, "computed#{}", id.0),
        }
    }
}

impl From<NodeId> for ObserverId {
    fn from(id: NodeId) -> Self {
        ObserverId::Node(id)
    }
}

impl From<ComputedId> for ObserverId {
    fn from(id: ComputedId) -> Self {
        ObserverId::Computed(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_ids_are_unique() {
        let id1 = CellId::new();
        let id2 = CellId::new();
        let id3 = CellId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn observer_display_names_the_kind() {
        let mut arena = crate::graph::Arena::new();
        let handle = arena.insert(());
        let observer = ObserverId::Computed(ComputedId(handle));
        assert_eq!(observer.to_string(), "computed#0v0");
    }
}
