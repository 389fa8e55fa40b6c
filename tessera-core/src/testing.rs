//! Test Harness
//!
//! Small helpers for driving a composition tree from tests: create a root,
//! tick it, reset the runtime between cases, and collect side effects in
//! order.
//!
//! ```rust
//! use tessera_core::testing::{test_tick, EventLog, TestNode};
//! use tessera_core::Runtime;
//!
//! let runtime = Runtime::new();
//! let log = EventLog::new();
//! let root = {
//!     let log = log.clone();
//!     TestNode::create(&runtime, move |scope| {
//!         let (created, disposed) = (log.clone(), log.clone());
//!         scope.memo_lifecycle(move || created.push("+row"), move || disposed.push("-row"))
//!     })
//! };
//!
//! test_tick(&root).unwrap();
//! assert_eq!(log.take(), vec!["+row"]);
//! test_tick(&root).unwrap();
//! assert!(log.take().is_empty());
//! ```

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::graph::{NodeId, Scope, TickReport};
use crate::reactive::Runtime;

/// Handle to a root created by [`TestNode::create`].
#[derive(Debug, Clone)]
pub struct RootHandle {
    runtime: Runtime,
    root: NodeId,
}

impl RootHandle {
    /// The root node.
    pub fn id(&self) -> NodeId {
        self.root
    }

    /// The runtime the root lives in.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Run one tick of this tree.
    pub fn tick(&self) -> Result<TickReport> {
        self.runtime.tick(self.root)
    }

    /// Detach the tree, running every disposer.
    pub fn dispose(&self) -> Result<()> {
        self.runtime.dispose_root(self.root)
    }
}

/// Factory for test roots.
pub struct TestNode;

impl TestNode {
    /// Create a root running `body`. Nothing runs until the first tick.
    pub fn create<F>(runtime: &Runtime, body: F) -> RootHandle
    where
        F: Fn(&mut Scope<'_>) -> Result<()> + 'static,
    {
        RootHandle {
            runtime: runtime.clone(),
            root: runtime.create_root(body),
        }
    }
}

/// Tick the tree behind `root`.
pub fn test_tick(root: &RootHandle) -> Result<TickReport> {
    root.tick()
}

/// Clears every registry of a runtime between test cases.
pub struct GlobalStateManager;

impl GlobalStateManager {
    /// See [`Runtime::reset`].
    pub fn reset(runtime: &Runtime) {
        runtime.reset();
    }
}

/// Shared, ordered log of side effects.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Rc<RefCell<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.borrow_mut().push(entry.into());
    }

    /// Drain the log.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.entries.borrow_mut())
    }

    /// Copy of the log, leaving it in place.
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}
