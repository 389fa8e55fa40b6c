//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects cells, computed
//! entries, monitors and the composition tree. It owns every registry the
//! engine needs; nothing lives in process-wide statics, so independent
//! runtimes (one per test, say) never observe each other.
//!
//! # How It Works
//!
//! 1. When an observer evaluates, the runtime pushes a recording frame and
//!    every cell read lands in it.
//!
//! 2. When the observer finishes, the tracker swaps its old edge set for the
//!    new one.
//!
//! 3. When a cell's value changes, the runtime:
//!    a. Finds all dependents of the cell
//!    b. Marks composition nodes dirty for the next tick
//!    c. Marks computed entries dirty and forwards the change to *their*
//!       dependents, transitively
//!    d. Fires synchronous monitors watching the cell
//!
//! # Thread Safety
//!
//! None. A runtime is confined to one thread (`Rc`/`RefCell` inside); hosts
//! that need to drive it from several threads must serialize access.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::cell::StateCell;
use super::computed::Invalidate;
use super::cell::ValueTracker;
use super::monitor::MonitorRegistry;
use super::named::NamedRegistry;
use super::subscriber::{CellId, ObserverId};
use super::tracker::DependencyTracker;
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::graph::{Arena, CompositionNode, NodeId, TickState};

/// Shared state behind a [`Runtime`] handle.
pub(crate) struct RuntimeInner {
    pub(crate) id: u64,
    pub(crate) config: EngineConfig,
    pub(crate) tracker: RefCell<DependencyTracker>,
    pub(crate) nodes: RefCell<Arena<CompositionNode>>,
    pub(crate) computeds: RefCell<Arena<Weak<dyn Invalidate>>>,
    pub(crate) monitors: RefCell<MonitorRegistry>,
    pub(crate) tick: RefCell<TickState>,
    /// Number of completed ticks.
    pub(crate) ticks: Cell<u64>,
    /// Bumped by `reset`; registrations from an older epoch are void.
    pub(crate) epoch: Cell<u64>,
    /// Failure raised outside a tick (synchronous monitors), surfaced by the
    /// next `tick`.
    pub(crate) pending_error: RefCell<Option<EngineError>>,
    /// Callbacks run at the start of the next tick.
    pub(crate) scheduled: RefCell<Vec<Box<dyn FnOnce()>>>,
    pub(crate) named: RefCell<NamedRegistry>,
}

/// Handle to one reactive engine instance.
///
/// Cloning is cheap and yields another handle to the same instance.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

/// Non-owning handle held by cells, computed entries and objects.
#[derive(Clone, Default)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }

    pub(crate) fn is(&self, runtime: &Runtime) -> bool {
        Weak::ptr_eq(&self.0, &Rc::downgrade(&runtime.inner))
    }
}

/// Pops the recording frame it guards, also when unwinding.
struct RecordingGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for RecordingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut tracker) = self.runtime.inner.tracker.try_borrow_mut() {
            tracker.stop_recording();
        }
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(runtime = id, ?config, "runtime created");

        Self {
            inner: Rc::new(RuntimeInner {
                id,
                config,
                tracker: RefCell::new(DependencyTracker::new()),
                nodes: RefCell::new(Arena::new()),
                computeds: RefCell::new(Arena::new()),
                monitors: RefCell::new(MonitorRegistry::default()),
                tick: RefCell::new(TickState::default()),
                ticks: Cell::new(0),
                epoch: Cell::new(0),
                pending_error: RefCell::new(None),
                scheduled: RefCell::new(Vec::new()),
                named: RefCell::new(NamedRegistry::default()),
            }),
        }
    }

    /// Unique id of this runtime instance.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The configuration the runtime was built with.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Number of ticks that completed successfully.
    pub fn tick_count(&self) -> u64 {
        self.inner.ticks.get()
    }

    /// Create a new state cell owned by the caller.
    pub fn mutable_state<T: 'static>(&self, initial: T) -> StateCell<T> {
        StateCell::new(self, initial)
    }

    /// Create a state cell that treats values as unchanged when `eq` holds.
    ///
    /// An equivalent write replaces the stored value without marking the
    /// cell modified or notifying anyone.
    pub fn mutable_state_with<T: 'static>(
        &self,
        initial: T,
        eq: impl Fn(&T, &T) -> bool + 'static,
    ) -> StateCell<T> {
        StateCell::build(self, initial, Some(Box::new(eq)), None)
    }

    /// Create a state cell whose values pass through `tracker`'s hooks.
    pub fn tracked_state<T: 'static>(&self, initial: T, tracker: ValueTracker<T>) -> StateCell<T> {
        StateCell::build(self, initial, None, Some(tracker))
    }

    /// Run `f` with dependency recording suspended.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.record(None, f)
    }

    /// Whether an observer is recording reads right now.
    pub fn is_tracking(&self) -> bool {
        self.inner.tracker.borrow().is_tracking()
    }

    /// The observer reads are currently attributed to.
    pub fn current_observer(&self) -> Option<ObserverId> {
        self.inner.tracker.borrow().current_observer()
    }

    /// Observers that depend on `cell` after their latest evaluation.
    pub fn dependents_of(&self, cell: CellId) -> Vec<ObserverId> {
        self.inner.tracker.borrow().dependents_of(cell).into_vec()
    }

    /// Cells `observer` read during its latest evaluation.
    pub fn sources_of(&self, observer: impl Into<ObserverId>) -> Vec<CellId> {
        self.inner.tracker.borrow().sources_of(observer.into())
    }

    /// Clear every registry of this runtime.
    ///
    /// Nodes, computed registrations, monitors, edges, scheduled callbacks
    /// and named states are dropped without running any disposer; handles minted before the reset go stale. Cell
    /// values survive. Intended for test isolation.
    pub fn reset(&self) {
        let nodes = self.inner.nodes.borrow_mut().clear();
        let computeds = self.inner.computeds.borrow_mut().clear();
        let monitors = self.inner.monitors.borrow_mut().clear();
        let scheduled = std::mem::take(&mut *self.inner.scheduled.borrow_mut());
        let named = std::mem::take(&mut *self.inner.named.borrow_mut());
        self.inner.tracker.borrow_mut().clear();
        *self.inner.tick.borrow_mut() = TickState::default();
        self.inner.pending_error.borrow_mut().take();
        self.inner.epoch.set(self.inner.epoch.get() + 1);
        tracing::debug!(
            runtime = self.inner.id,
            nodes = nodes.len(),
            computeds = computeds.len(),
            monitors = monitors.len(),
            "runtime reset"
        );

        // Bodies and callbacks may own cells or objects whose drop reaches
        // back into the registries.
        drop(nodes);
        drop(computeds);
        drop(monitors);
        drop(scheduled);
        drop(named);
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.inner.epoch.get()
    }

    /// Run `f` under a recording frame for `observer`.
    pub(crate) fn record<R>(&self, observer: Option<ObserverId>, f: impl FnOnce() -> R) -> R {
        self.inner.tracker.borrow_mut().start_recording(observer);
        let _guard = RecordingGuard { runtime: self };
        f()
    }

    /// Attribute a read of `cell` to the current observer.
    pub(crate) fn track_read(&self, cell: CellId) {
        if let Some(observer) = self.inner.tracker.borrow_mut().track_read(cell) {
            tracing::trace!(%cell, %observer, "read tracked");
        }
    }

    /// Propagate a write of `cell` to everything that depends on it.
    pub(crate) fn notify_write(&self, cell: CellId) {
        let mut queue = VecDeque::from([cell]);
        let mut seen = HashSet::from([cell]);

        while let Some(source) = queue.pop_front() {
            let (committed, in_flight) = {
                let tracker = self.inner.tracker.borrow();
                (tracker.dependents_of(source), tracker.recording_readers(source))
            };

            for observer in committed.into_iter().chain(in_flight) {
                match observer {
                    ObserverId::Node(node) => {
                        if !self.mark_node_dirty(node) {
                            self.inner.tracker.borrow_mut().prune(source, observer);
                        }
                    }
                    ObserverId::Computed(id) => {
                        let entry = self.inner.computeds.borrow().get(id.0).and_then(Weak::upgrade);
                        match entry {
                            Some(entry) => {
                                let output = entry.invalidate();
                                tracing::trace!(%observer, "computed invalidated");
                                if seen.insert(output) {
                                    queue.push_back(output);
                                }
                            }
                            None => self.inner.tracker.borrow_mut().prune(source, observer),
                        }
                    }
                }
            }
        }

        self.fire_synchronous_monitors(cell);
    }

    /// Flag a node for re-evaluation. Returns `false` if the node is gone.
    ///
    /// A node dirtied by its own body cannot re-run within the same tick; it
    /// is deferred to the next one. An ancestor dirtied by a descendant's
    /// body re-runs in the next pass.
    pub(crate) fn mark_node_dirty(&self, node: NodeId) -> bool {
        let evaluating =
            self.inner.tracker.borrow().innermost_node() == Some(ObserverId::Node(node));

        let mut nodes = self.inner.nodes.borrow_mut();
        let Some(entry) = nodes.get_mut(node.handle()) else {
            return false;
        };
        entry.dirty = true;
        drop(nodes);

        if evaluating {
            tracing::debug!(%node, "self-scheduled; deferred to next tick");
            self.inner.tick.borrow_mut().deferred.insert(node);
        } else {
            tracing::trace!(%node, "marked dirty");
        }
        true
    }

    /// Stash an error raised outside of a tick.
    pub(crate) fn stash_error(&self, err: EngineError) {
        let mut pending = self.inner.pending_error.borrow_mut();
        if pending.is_none() {
            *pending = Some(err);
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.inner.id)
            .field("ticks", &self.inner.ticks.get())
            .field("nodes", &self.inner.nodes.borrow().len())
            .field("edges", &self.inner.tracker.borrow().edge_count())
            .finish()
    }
}
