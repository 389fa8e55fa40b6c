//! Computed Entries
//!
//! A computed entry is a cached derived value that re-evaluates only when
//! one of its recorded dependencies changed.
//!
//! # How Computed Entries Work
//!
//! 1. On first read, the entry runs its closure under its own recording
//!    frame and caches the result.
//!
//! 2. When read again with nothing changed, the cached value is returned.
//!
//! 3. When a dependency is written, the entry goes dirty *and* forwards the
//!    change to whatever read the entry, so chains of computed values stay
//!    correct without re-deriving on every read.
//!
//! 4. The next read recomputes.
//!
//! A closure that fails leaves the entry dirty; nothing poisoned is cached
//! and the next read retries.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};
use std::rc::{Rc, Weak};

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::{CellId, ComputedId, ObserverId};
use crate::error::{EngineError, Result};

/// Dirty state for a computed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency changed, or the entry never computed.
    Dirty,
}

/// What the runtime needs from a computed entry during write propagation.
pub(crate) trait Invalidate {
    /// Mark the entry dirty and return the id its readers depend on.
    fn invalidate(&self) -> CellId;
}

type ComputeFn<T> = Box<dyn Fn() -> Result<T>>;

struct ComputedInner<T> {
    runtime: WeakRuntime,
    /// Readers of this entry depend on this id.
    output: CellId,
    registration: Cell<Option<(ComputedId, u64)>>,
    compute: ComputeFn<T>,
    value: RefCell<Option<T>>,
    state: Cell<ComputedState>,
    computing: Cell<bool>,
    invalidations: Cell<u64>,
    runs: Cell<usize>,
    disposed: Cell<bool>,
}

impl<T> Invalidate for ComputedInner<T> {
    fn invalidate(&self) -> CellId {
        self.state.set(ComputedState::Dirty);
        self.invalidations.set(self.invalidations.get() + 1);
        self.output
    }
}

impl<T: 'static> ComputedInner<T> {
    /// Register with the runtime if not registered in its current epoch.
    fn ensure_registered(self: &Rc<Self>, runtime: &Runtime) -> ComputedId {
        if let Some((id, epoch)) = self.registration.get() {
            if epoch == runtime.epoch() && runtime.inner.computeds.borrow().contains(id.0) {
                return id;
            }
        }

        let weak: Weak<dyn Invalidate> = Rc::downgrade(self) as Weak<dyn Invalidate>;
        let id = ComputedId(runtime.inner.computeds.borrow_mut().insert(weak));
        self.registration.set(Some((id, runtime.epoch())));
        // Edges from an older registration are gone; recompute to rebuild.
        self.state.set(ComputedState::Dirty);
        id
    }
}

impl<T> ComputedInner<T> {
    fn unregister(&self) {
        let Some((id, epoch)) = self.registration.take() else {
            return;
        };
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        if epoch == runtime.epoch() {
            if let Ok(mut computeds) = runtime.inner.computeds.try_borrow_mut() {
                computeds.remove(id.0);
            }
        }
        if let Ok(mut tracker) = runtime.inner.tracker.try_borrow_mut() {
            tracker.remove_observer(ObserverId::Computed(id));
            tracker.forget_cell(self.output);
        };
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Clears the computing flag, also when unwinding.
struct Computing<'a>(&'a Cell<bool>);

impl Drop for Computing<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Example
///
/// ```rust
/// use tessera_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.mutable_state(2);
/// let doubled = {
///     let count = count.clone();
///     runtime.computed(move || count.get() * 2)
/// };
///
/// assert_eq!(doubled.get().unwrap(), 4);
/// count.set(5);
/// assert_eq!(doubled.get().unwrap(), 10);
/// ```
pub struct Computed<T> {
    inner: Rc<ComputedInner<T>>,
}

impl<T: Clone + 'static> Computed<T> {
    fn new(runtime: &Runtime, compute: ComputeFn<T>) -> Self {
        Self {
            inner: Rc::new(ComputedInner {
                runtime: runtime.downgrade(),
                output: CellId::new(),
                registration: Cell::new(None),
                compute,
                value: RefCell::new(None),
                state: Cell::new(ComputedState::Dirty),
                computing: Cell::new(false),
                invalidations: Cell::new(0),
                runs: Cell::new(0),
                disposed: Cell::new(false),
            }),
        }
    }

    /// Get the current value, recomputing if a dependency changed.
    ///
    /// Errors raised by the closure propagate and leave the entry dirty.
    pub fn get(&self) -> Result<T> {
        let inner = &self.inner;
        if inner.disposed.get() {
            return Err(EngineError::Disposed("computed entry".into()));
        }
        let runtime = inner.runtime.upgrade().ok_or(EngineError::RuntimeGone)?;
        if inner.computing.get() {
            return Err(EngineError::Cycle);
        }
        let id = inner.ensure_registered(&runtime);

        // The reader depends on this entry, whether or not it recomputes.
        runtime.track_read(inner.output);

        if inner.state.get() == ComputedState::Clean {
            if let Some(value) = inner.value.borrow().as_ref() {
                return Ok(value.clone());
            }
        }

        inner.computing.set(true);
        let seen = inner.invalidations.get();

        let computed = {
            let _computing = Computing(&inner.computing);
            runtime.record(Some(ObserverId::Computed(id)), || (inner.compute)())
        };
        let value = computed?;

        let previous = inner.value.replace(Some(value.clone()));
        inner.runs.set(inner.runs.get() + 1);
        // A write that landed while computing keeps the entry dirty.
        if inner.invalidations.get() == seen {
            inner.state.set(ComputedState::Clean);
        }
        tracing::trace!(output = %inner.output, runs = inner.runs.get(), "computed");
        drop(previous);

        Ok(value)
    }
}

impl<T> Computed<T> {
    /// Id that readers of this entry depend on.
    pub fn output_id(&self) -> CellId {
        self.inner.output
    }

    /// Observer id, once the entry has been read at least once.
    pub fn observer_id(&self) -> Option<ObserverId> {
        self.inner
            .registration
            .get()
            .map(|(id, _)| ObserverId::Computed(id))
    }

    /// Get the current dirty state.
    pub fn state(&self) -> ComputedState {
        self.inner.state.get()
    }

    /// Number of times the closure ran to completion.
    pub fn run_count(&self) -> usize {
        self.inner.runs.get()
    }

    /// Check if the entry has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.value.borrow().is_some()
    }

    /// Unregister every edge and drop the cached value.
    ///
    /// Reads after disposal fail.
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.unregister();
        self.inner.state.set(ComputedState::Dirty);
        let previous = self.inner.value.take();
        drop(previous);
    }

    /// Whether the entry has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("output", &self.inner.output)
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .field("runs", &self.run_count())
            .finish()
    }
}

impl Runtime {
    /// Create a computed entry from an infallible closure.
    ///
    /// The closure is not run until the first read.
    pub fn computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> T + 'static,
    {
        Computed::new(self, Box::new(move || Ok(compute())))
    }

    /// Create a computed entry whose closure may fail.
    pub fn try_computed<T, F>(&self, compute: F) -> Computed<T>
    where
        T: Clone + 'static,
        F: Fn() -> Result<T> + 'static,
    {
        Computed::new(self, Box::new(compute))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
