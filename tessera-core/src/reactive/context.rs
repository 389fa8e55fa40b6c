//! Recording Context
//!
//! The recording context tracks which observer is currently evaluating, so a
//! cell read can be attributed to it.
//!
//! # Implementation
//!
//! The context is a stack owned by one runtime instance, not a thread-local:
//! two runtimes in the same thread never see each other's recordings. When an
//! observer starts evaluating (a node body, a computed closure) it is pushed;
//! when it finishes it is popped along with the reads it collected.
//!
//! Nested recordings are independent. A computed read inside a node body
//! pushes the computed entry on top of the node, so reads made by the
//! computed closure are attributed to the computed entry only.
//!
//! A frame may also be *untracked*: reads made under it are dropped. This is
//! how memo blocks (`once`, `remember`) stay insulated from reactivity.

use indexmap::IndexSet;

use super::subscriber::{CellId, ObserverId};

/// One entry of the recording stack.
#[derive(Debug, Clone)]
pub struct Recording {
    /// The observer collecting reads, or `None` for an untracked frame.
    observer: Option<ObserverId>,
    /// Cells read during this frame, in first-read order.
    reads: IndexSet<CellId>,
}

impl Recording {
    /// The observer this frame records for.
    pub fn observer(&self) -> Option<ObserverId> {
        self.observer
    }

    /// Cells read during this frame.
    pub fn reads(&self) -> &IndexSet<CellId> {
        &self.reads
    }

    /// Consume the frame, keeping only its reads.
    pub fn into_reads(self) -> IndexSet<CellId> {
        self.reads
    }
}

/// Explicit stack of active recordings.
#[derive(Debug, Default)]
pub struct RecordingContext {
    stack: Vec<Recording>,
}

impl RecordingContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a new frame.
    pub fn push(&mut self, observer: Option<ObserverId>) {
        self.stack.push(Recording {
            observer,
            reads: IndexSet::new(),
        });
    }

    /// Pop the innermost frame.
    pub fn pop(&mut self) -> Option<Recording> {
        self.stack.pop()
    }

    /// Whether any observer is recording right now.
    ///
    /// An untracked frame on top means reads are not being recorded.
    pub fn is_active(&self) -> bool {
        self.current().is_some()
    }

    /// The observer reads are currently attributed to.
    pub fn current(&self) -> Option<ObserverId> {
        self.stack.last().and_then(|entry| entry.observer)
    }

    /// Record a read in the innermost frame.
    ///
    /// Returns the observer the read was attributed to, if any.
    pub fn track(&mut self, cell: CellId) -> Option<ObserverId> {
        let entry = self.stack.last_mut()?;
        let observer = entry.observer?;
        entry.reads.insert(cell);
        Some(observer)
    }

    /// Whether `observer` has a frame anywhere on the stack.
    pub fn contains(&self, observer: ObserverId) -> bool {
        self.stack
            .iter()
            .any(|entry| entry.observer == Some(observer))
    }

    /// The innermost composition node on the stack.
    ///
    /// Untracked frames and computed entries evaluating on top of it are
    /// skipped.
    pub fn innermost_node(&self) -> Option<ObserverId> {
        self.stack
            .iter()
            .rev()
            .filter_map(|entry| entry.observer)
            .find(|observer| matches!(observer, ObserverId::Node(_)))
    }

    /// Observers on the stack whose frame has already read `cell`.
    pub fn readers_of(&self, cell: CellId) -> impl Iterator<Item = ObserverId> + '_ {
        self.stack
            .iter()
            .filter(move |entry| entry.reads.contains(&cell))
            .filter_map(|entry| entry.observer)
    }

    /// Current stack depth.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Drop every frame.
    pub fn clear(&mut self) {
        self.stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Arena, NodeId};

    fn observers(n: usize) -> Vec<ObserverId> {
        let mut arena = Arena::new();
        (0..n)
            .map(|_| ObserverId::Node(NodeId::from(arena.insert(()))))
            .collect()
    }

    #[test]
    fn context_tracks_observer() {
        let ids = observers(1);
        let mut ctx = RecordingContext::new();

        assert!(!ctx.is_active());
        assert!(ctx.current().is_none());

        ctx.push(Some(ids[0]));
        assert!(ctx.is_active());
        assert_eq!(ctx.current(), Some(ids[0]));

        let popped = ctx.pop().unwrap();
        assert_eq!(popped.observer(), Some(ids[0]));
        assert!(!ctx.is_active());
    }

    #[test]
    fn innermost_node_skips_untracked_frames() {
        let ids = observers(2);
        let mut ctx = RecordingContext::new();
        assert!(ctx.innermost_node().is_none());

        ctx.push(Some(ids[0]));
        ctx.push(Some(ids[1]));
        ctx.push(None);
        assert_eq!(ctx.innermost_node(), Some(ids[1]));

        ctx.pop();
        ctx.pop();
        assert_eq!(ctx.innermost_node(), Some(ids[0]));
    }

    #[test]
    fn reads_are_deduplicated_in_first_read_order() {
        let ids = observers(1);
        let (a, b) = (CellId::new(), CellId::new());
        let mut ctx = RecordingContext::new();

        ctx.push(Some(ids[0]));
        ctx.track(b);
        ctx.track(a);
        ctx.track(b);

        let reads: Vec<_> = ctx.pop().unwrap().into_reads().into_iter().collect();
        assert_eq!(reads, vec![b, a]);
    }

    #[test]
    fn nested_frames_attribute_to_the_innermost() {
        let ids = observers(2);
        let (outer_cell, inner_cell) = (CellId::new(), CellId::new());
        let mut ctx = RecordingContext::new();

        ctx.push(Some(ids[0]));
        ctx.track(outer_cell);
        ctx.push(Some(ids[1]));
        assert_eq!(ctx.track(inner_cell), Some(ids[1]));
        assert!(ctx.contains(ids[0]));

        let inner = ctx.pop().unwrap();
        assert_eq!(inner.reads().len(), 1);
        assert!(inner.reads().contains(&inner_cell));

        let outer = ctx.pop().unwrap();
        assert_eq!(outer.reads().len(), 1);
        assert!(outer.reads().contains(&outer_cell));
    }

    #[test]
    fn untracked_frames_swallow_reads() {
        let ids = observers(1);
        let mut ctx = RecordingContext::new();

        ctx.push(Some(ids[0]));
        ctx.push(None);
        assert!(!ctx.is_active());
        assert_eq!(ctx.track(CellId::new()), None);
        ctx.pop();

        assert!(ctx.pop().unwrap().reads().is_empty());
    }
}
