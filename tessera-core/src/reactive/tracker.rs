//! Dependency Tracker
//!
//! The tracker is the bookkeeping half of the runtime: it owns the recording
//! stack and both directions of every dependency edge.
//!
//! # How It Works
//!
//! 1. An observer starts evaluating: [`start_recording`] pushes a frame.
//!
//! 2. Every cell read while the frame is on top lands in that frame.
//!
//! 3. The observer finishes: [`stop_recording`] pops the frame, removes the
//!    observer from every cell it read last time but not this time, then adds
//!    it to every cell it read this time.
//!
//! 4. A cell write asks [`dependents_of`] who to invalidate.
//!
//! Edges are stored as handles, never as references, so the tracker never
//! keeps an observer or a cell alive.
//!
//! [`start_recording`]: DependencyTracker::start_recording
//! [`stop_recording`]: DependencyTracker::stop_recording
//! [`dependents_of`]: DependencyTracker::dependents_of

use std::collections::HashMap;

use indexmap::IndexSet;
use smallvec::SmallVec;

use super::context::RecordingContext;
use super::subscriber::{CellId, ObserverId};

/// Observers of one cell. Most cells have a handful.
pub type Dependents = SmallVec<[ObserverId; 4]>;

/// Registry correlating cells with the observers that read them.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    context: RecordingContext,

    /// Forward edges: cell -> observers that read it in their latest run.
    dependents: HashMap<CellId, IndexSet<ObserverId>>,

    /// Reverse edges: observer -> cells it read in its latest run.
    sources: HashMap<ObserverId, IndexSet<CellId>>,
}

impl DependencyTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a recording frame. `None` opens an untracked frame.
    pub fn start_recording(&mut self, observer: Option<ObserverId>) {
        self.context.push(observer);
    }

    /// Pop the innermost frame and replace the observer's edge set with the
    /// reads it collected.
    ///
    /// Returns the observer the frame belonged to.
    pub fn stop_recording(&mut self) -> Option<ObserverId> {
        let frame = self.context.pop()?;
        let observer = frame.observer()?;
        let reads = frame.into_reads();

        // Stale edges first, so a write never reaches an observer that no
        // longer reads the cell.
        if let Some(previous) = self.sources.remove(&observer) {
            for cell in previous.iter().filter(|cell| !reads.contains(*cell)) {
                self.unlink(*cell, observer);
            }
        }

        for cell in &reads {
            self.dependents.entry(*cell).or_default().insert(observer);
        }
        tracing::trace!(%observer, edges = reads.len(), "recording stopped");

        if !reads.is_empty() {
            self.sources.insert(observer, reads);
        }
        Some(observer)
    }

    /// Record a read of `cell` for the current observer.
    pub fn track_read(&mut self, cell: CellId) -> Option<ObserverId> {
        self.context.track(cell)
    }

    /// Whether reads are currently being recorded.
    pub fn is_tracking(&self) -> bool {
        self.context.is_active()
    }

    /// The observer reads are currently attributed to.
    pub fn current_observer(&self) -> Option<ObserverId> {
        self.context.current()
    }

    /// Whether `observer` is evaluating right now (anywhere on the stack).
    pub fn is_recording(&self, observer: ObserverId) -> bool {
        self.context.contains(observer)
    }

    /// The composition node evaluating innermost right now.
    pub fn innermost_node(&self) -> Option<ObserverId> {
        self.context.innermost_node()
    }

    /// Depth of the recording stack.
    pub fn depth(&self) -> usize {
        self.context.depth()
    }

    /// Observers that read `cell` in their latest evaluation.
    pub fn dependents_of(&self, cell: CellId) -> Dependents {
        self.dependents
            .get(&cell)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Observers still evaluating that have already read `cell`.
    ///
    /// Their edges are not committed yet, so a write to `cell` from inside
    /// the same evaluation is only visible here.
    pub fn recording_readers(&self, cell: CellId) -> Dependents {
        self.context.readers_of(cell).collect()
    }

    /// Cells `observer` read in its latest evaluation.
    pub fn sources_of(&self, observer: ObserverId) -> Vec<CellId> {
        self.sources
            .get(&observer)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Drop every edge held by `observer`.
    ///
    /// Called when a node detaches or a computed entry is disposed.
    pub fn remove_observer(&mut self, observer: ObserverId) {
        if let Some(cells) = self.sources.remove(&observer) {
            for cell in cells {
                self.unlink(cell, observer);
            }
        }
    }

    /// Drop every edge pointing at `cell`. Called when a cell dies.
    pub fn forget_cell(&mut self, cell: CellId) {
        if let Some(observers) = self.dependents.remove(&cell) {
            for observer in observers {
                if let Some(sources) = self.sources.get_mut(&observer) {
                    sources.shift_remove(&cell);
                }
            }
        }
    }

    /// Remove a single edge whose observer turned out to be dead.
    pub fn prune(&mut self, cell: CellId, observer: ObserverId) {
        self.unlink(cell, observer);
        if let Some(sources) = self.sources.get_mut(&observer) {
            sources.shift_remove(&cell);
        }
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.sources.values().map(IndexSet::len).sum()
    }

    /// Drop all edges and recordings.
    pub fn clear(&mut self) {
        self.context.clear();
        self.dependents.clear();
        self.sources.clear();
    }

    fn unlink(&mut self, cell: CellId, observer: ObserverId) {
        if let Some(set) = self.dependents.get_mut(&cell) {
            set.shift_remove(&observer);
            if set.is_empty() {
                self.dependents.remove(&cell);
            }
        }
    }
}
