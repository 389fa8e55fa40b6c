//! State Cells
//!
//! A state cell is the fundamental reactive primitive. It holds a value and
//! lets the runtime know who reads it and when it changes.
//!
//! # How Cells Work
//!
//! 1. When a cell is read while an observer is recording, the read is
//!    attributed to that observer.
//!
//! 2. When a cell's value changes, every observer that read it during its
//!    latest evaluation is invalidated.
//!
//! 3. The cell remembers it was written until the current tick completes
//!    (`modified`), and counts writes (`version`) so monitors can tell which
//!    paths changed between two passes.
//!
//! Edges point from cell ids to observer handles, so a cell never keeps an
//! observer alive and an observer never keeps a cell alive.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell};
use std::fmt::{self, Debug};
use std::rc::Rc;

use super::runtime::{Runtime, WeakRuntime};
use super::subscriber::CellId;
use crate::error::{EngineError, Result};

/// Type-erased view of a cell, used by observed objects and monitors.
pub(crate) trait Watchable {
    fn cell_id(&self) -> CellId;
    fn version(&self) -> u64;
    fn type_name(&self) -> &'static str;
    fn into_any(self: Rc<Self>) -> Rc<dyn Any>;
}

/// Decides whether a new value is equivalent to the current one.
pub(crate) type Equivalence<T> = Box<dyn Fn(&T, &T) -> bool>;

/// Rewrites (or rejects) a value before it is stored.
pub(crate) type UpdateHook<T> = Box<dyn Fn(T) -> Result<T>>;

pub(crate) struct CellInner<T> {
    id: CellId,
    runtime: WeakRuntime,
    value: RefCell<T>,
    version: Cell<u64>,
    /// Tick number (completed ticks at the time) of the latest write.
    written_in: Cell<Option<u64>>,
    equivalent: Option<Equivalence<T>>,
    on_update: Option<UpdateHook<T>>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            if let Ok(mut tracker) = runtime.inner.tracker.try_borrow_mut() {
                tracker.forget_cell(self.id);
            };
        }
    }
}

impl<T: 'static> Watchable for CellInner<T> {
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn version(&self) -> u64 {
        self.version.get()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn into_any(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }
}

/// Hooks run when a cell is created and whenever it is written.
///
/// `on_create` may rewrite the initial value. `on_update` may rewrite every
/// later value, or refuse it by returning an error.
pub struct ValueTracker<T> {
    on_create: Option<Box<dyn FnOnce(T) -> T>>,
    on_update: Option<UpdateHook<T>>,
}

impl<T> ValueTracker<T> {
    pub fn new() -> Self {
        Self {
            on_create: None,
            on_update: None,
        }
    }

    pub fn on_create(mut self, f: impl FnOnce(T) -> T + 'static) -> Self {
        self.on_create = Some(Box::new(f));
        self
    }

    pub fn on_update(mut self, f: impl Fn(T) -> Result<T> + 'static) -> Self {
        self.on_update = Some(Box::new(f));
        self
    }
}

impl<T> Default for ValueTracker<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A single mutable reactive value.
///
/// # Example
///
/// ```rust
/// use tessera_core::reactive::Runtime;
///
/// let runtime = Runtime::new();
/// let count = runtime.mutable_state(0);
///
/// assert_eq!(count.get(), 0);
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// assert!(count.modified());
/// ```
pub struct StateCell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T: 'static> StateCell<T> {
    pub(crate) fn new(runtime: &Runtime, value: T) -> Self {
        Self::build(runtime, value, None, None)
    }

    pub(crate) fn build(
        runtime: &Runtime,
        value: T,
        equivalent: Option<Equivalence<T>>,
        tracker: Option<ValueTracker<T>>,
    ) -> Self {
        let (value, on_update) = match tracker {
            Some(ValueTracker { on_create, on_update }) => {
                let value = match on_create {
                    Some(create) => create(value),
                    None => value,
                };
                (value, on_update)
            }
            None => (value, None),
        };
        Self {
            inner: Rc::new(CellInner {
                id: CellId::new(),
                runtime: runtime.downgrade(),
                value: RefCell::new(value),
                version: Cell::new(0),
                written_in: Cell::new(None),
                equivalent,
                on_update,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<CellInner<T>>) -> Self {
        Self { inner }
    }

    pub(crate) fn watchable(&self) -> Rc<dyn Watchable> {
        self.inner.clone()
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get a clone of the current value, recording the read.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.track();
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value, recording the read.
    ///
    /// Writes to the same cell from inside `f` fail with `CellBorrowed`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.borrow())
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Borrow the current value without recording a dependency.
    pub fn borrow_untracked(&self) -> Ref<'_, T> {
        self.inner.value.borrow()
    }

    /// Store `value` unless it equals the current one.
    ///
    /// Returns whether the cell changed. A failed write (a refusing
    /// `on_update` hook, or a write while the value is borrowed) is logged
    /// and returned by the next `tick`; use [`try_set`](Self::try_set) to
    /// handle it here.
    pub fn set(&self, value: T) -> bool
    where
        T: PartialEq,
    {
        let outcome = self.try_set(value);
        self.settle(outcome)
    }

    /// Like [`set`](Self::set), returning failures to the caller.
    ///
    /// A cell created with an equivalence compares with it instead of `==`.
    pub fn try_set(&self, value: T) -> Result<bool>
    where
        T: PartialEq,
    {
        self.store(value, |current, next| current == next)
    }

    /// Store `value` unless the cell's equivalence holds.
    ///
    /// For values without `PartialEq`; a cell created without an
    /// equivalence always changes.
    pub fn assign(&self, value: T) -> bool {
        let outcome = self.store(value, |_, _| false);
        self.settle(outcome)
    }

    /// Store `value` and notify dependents unconditionally.
    ///
    /// For values without meaningful equality.
    pub fn write(&self, value: T) {
        let outcome = self.hook(value).and_then(|value| self.try_write(value));
        self.settle(outcome.map(|()| true));
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool
    where
        T: PartialEq,
    {
        let next = f(&self.inner.value.borrow());
        self.set(next)
    }

    /// Mutate the value in place and notify dependents.
    pub fn modify<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let result = {
            let mut slot = self.inner.value.try_borrow_mut().map_err(|_| self.borrowed())?;
            f(&mut slot)
        };
        self.changed();
        Ok(result)
    }

    /// Whether the cell was written since the last completed tick.
    pub fn modified(&self) -> bool {
        match (self.inner.written_in.get(), self.inner.runtime.upgrade()) {
            (Some(tick), Some(runtime)) => tick == runtime.tick_count(),
            _ => false,
        }
    }

    /// Number of writes since creation.
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    fn store(&self, value: T, fallback: impl Fn(&T, &T) -> bool) -> Result<bool> {
        let value = self.hook(value)?;
        let same = {
            let current = self.inner.value.try_borrow().map_err(|_| self.borrowed())?;
            match &self.inner.equivalent {
                Some(equivalent) => equivalent(&current, &value),
                None => fallback(&current, &value),
            }
        };
        if !same {
            self.try_write(value)?;
            return Ok(true);
        }
        // An equivalent value is kept without counting as a change.
        if self.inner.equivalent.is_some() {
            let previous = self.replace(value)?;
            drop(previous);
        }
        Ok(false)
    }

    fn hook(&self, value: T) -> Result<T> {
        match &self.inner.on_update {
            Some(on_update) => on_update(value),
            None => Ok(value),
        }
    }

    fn try_write(&self, value: T) -> Result<()> {
        let previous = self.replace(value)?;
        self.changed();
        drop(previous);
        Ok(())
    }

    fn replace(&self, value: T) -> Result<T> {
        let mut slot = self.inner.value.try_borrow_mut().map_err(|_| self.borrowed())?;
        Ok(std::mem::replace(&mut slot, value))
    }

    fn changed(&self) {
        self.inner.version.set(self.inner.version.get() + 1);
        if let Some(runtime) = self.inner.runtime.upgrade() {
            self.inner.written_in.set(Some(runtime.tick_count()));
            runtime.notify_write(self.inner.id);
        }
    }

    fn settle(&self, outcome: Result<bool>) -> bool {
        match outcome {
            Ok(changed) => changed,
            Err(err) => {
                tracing::error!(cell = %self.inner.id, error = %err, "cell write failed");
                if let Some(runtime) = self.inner.runtime.upgrade() {
                    runtime.stash_error(err);
                }
                false
            }
        }
    }

    fn borrowed(&self) -> EngineError {
        EngineError::CellBorrowed(self.inner.id.to_string())
    }

    fn track(&self) {
        if let Some(runtime) = self.inner.runtime.upgrade() {
            runtime.track_read(self.inner.id);
        }
    }
}

impl<T> Clone for StateCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Debug + 'static> Debug for StateCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateCell")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Arena, NodeId};
    use crate::reactive::ObserverId;

    #[test]
    fn cell_get_and_set() {
        let runtime = Runtime::new();
        let cell = runtime.mutable_state(0);
        assert_eq!(cell.get(), 0);

        assert!(cell.set(42));
        assert_eq!(cell.get(), 42);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn equal_writes_are_ignored() {
        let runtime = Runtime::new();
        let cell = runtime.mutable_state(7);

        assert!(!cell.set(7));
        assert_eq!(cell.version(), 0);
        assert!(!cell.modified());

        cell.write(7);
        assert_eq!(cell.version(), 1);
        assert!(cell.modified());
    }

    #[test]
    fn cell_update() {
        let runtime = Runtime::new();
        let cell = runtime.mutable_state(10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn cell_clone_shares_state() {
        let runtime = Runtime::new();
        let a = runtime.mutable_state(String::from("x"));
        let b = a.clone();

        a.set("y".into());
        assert_eq!(b.get(), "y");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn reads_inside_a_recording_register_edges() {
        let runtime = Runtime::new();
        let mut arena = Arena::new();
        let observer = ObserverId::Node(NodeId::from(arena.insert(())));
        let cell = runtime.mutable_state(1);

        runtime.record(Some(observer), || cell.with(|v| *v + 1));
        assert_eq!(runtime.dependents_of(cell.id()), vec![observer]);

        assert_eq!(cell.get_untracked(), 1);
        assert_eq!(*cell.borrow_untracked(), 1);
    }

    #[test]
    fn dropping_the_last_handle_forgets_edges() {
        let runtime = Runtime::new();
        let mut arena = Arena::new();
        let observer = ObserverId::Node(NodeId::from(arena.insert(())));
        let cell = runtime.mutable_state(1);
        let id = cell.id();

        runtime.record(Some(observer), || cell.get());
        drop(cell);

        assert!(runtime.dependents_of(id).is_empty());
        assert!(runtime.sources_of(observer).is_empty());
    }

    #[test]
    fn cells_outlive_their_runtime() {
        let runtime = Runtime::new();
        let cell = runtime.mutable_state(1);
        drop(runtime);

        cell.set(2);
        assert_eq!(cell.get(), 2);
        assert!(!cell.modified());
    }

    #[test]
    fn equivalent_writes_replace_silently() {
        let runtime = Runtime::new();
        let cell = runtime.mutable_state_with((1, "a"), |old, new| old.0 == new.0);

        assert!(!cell.set((1, "b")));
        assert_eq!(cell.get(), (1, "b"));
        assert_eq!(cell.version(), 0);
        assert!(!cell.modified());

        assert!(cell.set((2, "b")));
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn assign_works_without_partial_eq() {
        struct Opaque(u8);

        let runtime = Runtime::new();
        let plain = runtime.mutable_state(Opaque(1));
        assert!(plain.assign(Opaque(1)));
        assert_eq!(plain.version(), 1);

        let keyed = runtime.mutable_state_with(Opaque(1), |a, b| a.0 == b.0);
        assert!(!keyed.assign(Opaque(1)));
        assert!(keyed.assign(Opaque(2)));
        assert_eq!(keyed.with(|v| v.0), 2);
    }

    #[test]
    fn value_tracker_rewrites_and_rejects() {
        let runtime = Runtime::new();
        let tracker = ValueTracker::new().on_create(|v: i32| v * v).on_update(|v| {
            if v < 0 {
                Err(EngineError::msg("negative"))
            } else {
                Ok(v * 2)
            }
        });
        let cell = runtime.tracked_state(5, tracker);
        assert_eq!(cell.get(), 25);

        assert!(cell.set(3));
        assert_eq!(cell.get(), 6);

        assert!(cell.try_set(-1).unwrap_err().is_body());
        assert_eq!(cell.get(), 6);
        // Rewritten to the current value: no change.
        assert!(!cell.set(3));
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn writes_while_borrowed_fail_without_panicking() {
        let runtime = Runtime::new();
        let cell = runtime.mutable_state(1);

        let result = cell.with(|_| cell.try_set(2));
        assert!(matches!(result, Err(EngineError::CellBorrowed(_))));

        cell.with(|_| cell.write(3));
        assert_eq!(cell.get(), 1);
        assert_eq!(cell.version(), 0);
        assert!(matches!(
            runtime.inner.pending_error.borrow().as_ref(),
            Some(EngineError::CellBorrowed(_))
        ));

        assert_eq!(cell.modify(|v| std::mem::replace(v, 4)).unwrap(), 1);
        assert_eq!(cell.get(), 4);
    }
}
