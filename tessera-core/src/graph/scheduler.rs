//! Tick Scheduler
//!
//! The scheduler drives a composition tree to a fixed point.
//!
//! # Algorithm
//!
//! A tick repeats passes until nothing is pending:
//!
//! 1. Visit the root top-down. A dirty node runs its body under recording;
//!    running a body re-runs every child it reaches, so the subtree is
//!    handled there. A clean node is only traversed.
//!
//! 2. Children that a re-run body did not reach again are detached,
//!    children before parents, running their disposers.
//!
//! 3. Monitors whose watched cells changed fire, in registration order.
//!
//! 4. If a body or monitor dirtied another node of this tree, run another
//!    pass. Nodes that dirtied themselves while running are deferred to the
//!    next tick instead, so a node writing what it reads cannot spin.
//!
//! Callbacks queued with `schedule_callback` run once, before the first
//! pass.
//!
//! The number of passes is bounded by `EngineConfig::max_passes_per_tick`.
//!
//! No registry borrow is held while user code runs: bodies, disposers and
//! callbacks are always called after the borrow that located them is
//! released.

use std::collections::{HashMap, HashSet};

use super::node::{Attachment, Body, CompositionNode, NodeId, NodeInfo, NodeKey, NodeKind};
use super::scope::Scope;
use crate::error::{EngineError, Result};
use crate::reactive::{ObserverId, Runtime};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Number of completed ticks, this one included.
    pub tick: u64,
    /// Passes run to reach the fixed point.
    pub passes: usize,
    /// Bodies evaluated.
    pub nodes_run: usize,
    /// Nodes that entered the tree.
    pub attached: usize,
    /// Nodes that left the tree.
    pub detached: usize,
    /// Monitor callbacks invoked.
    pub monitors_fired: usize,
}

impl TickReport {
    /// Whether the tick had no visible effect.
    pub fn is_idle(&self) -> bool {
        self.nodes_run == 0 && self.attached == 0 && self.detached == 0 && self.monitors_fired == 0
    }
}

/// Per-runtime scheduling state.
#[derive(Debug, Default)]
pub(crate) struct TickState {
    pub(crate) running: bool,
    /// Nodes that dirtied themselves while running; they wait for the next
    /// tick.
    pub(crate) deferred: HashSet<NodeId>,
    /// Unreached children to detach when the pass ends.
    pub(crate) pending_detach: Vec<NodeId>,
    pub(crate) report: TickReport,
}

/// Clears the running flag, also when a tick fails or unwinds.
struct TickGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut tick) = self.runtime.inner.tick.try_borrow_mut() {
            tick.running = false;
        }
    }
}

impl Runtime {
    /// Create the root of a new composition tree.
    ///
    /// Nothing runs until the first `tick`.
    pub fn create_root<F>(&self, body: F) -> NodeId
    where
        F: Fn(&mut Scope<'_>) -> Result<()> + 'static,
    {
        let body: Body = std::rc::Rc::new(body);
        let handle = self.inner.nodes.borrow_mut().insert_with(|handle| {
            CompositionNode::new(
                NodeKey::Root,
                None,
                Some(NodeId::from(handle)),
                NodeKind::Root,
                Some(body),
            )
        });
        let root = NodeId::from(handle);
        tracing::debug!(%root, "root created");
        root
    }

    /// Advance the tree under `root` to a fixed point.
    ///
    /// The first tick attaches the root and runs its body. Later ticks run
    /// only what changed; with no pending change a tick runs nothing.
    ///
    /// Failures raised by bodies and monitor callbacks propagate. Work done
    /// before the failure stays done, and the failing node stays dirty so
    /// the next tick retries it.
    pub fn tick(&self, root: NodeId) -> Result<TickReport> {
        {
            let mut tick = self.inner.tick.borrow_mut();
            if tick.running {
                return Err(EngineError::ReentrantTick);
            }
            tick.running = true;
            tick.deferred.clear();
            tick.pending_detach.clear();
            tick.report = TickReport::default();
        }
        let _guard = TickGuard { runtime: self };
        self.inner.monitors.borrow_mut().begin_tick();

        let number = self.tick_count() + 1;
        let span = tracing::debug_span!("tick", runtime = self.id(), tick = number, %root);
        let _enter = span.enter();

        self.take_pending_error()?;

        let attachment = self
            .inner
            .nodes
            .borrow()
            .get(root.handle())
            .filter(|node| node.parent.is_none())
            .map(|node| node.attachment);
        match attachment {
            None => return Err(EngineError::UnknownNode(root.to_string())),
            Some(Attachment::Unattached) => self.attach(root, || {}),
            Some(_) => {}
        }
        self.run_scheduled();

        let max_passes = self.inner.config.max_passes_per_tick.max(1);
        let mut passes = 0;
        loop {
            passes += 1;
            self.inner.tick.borrow_mut().report.passes = passes;

            let visited = self.visit(root);
            self.flush_detachments();
            visited?;
            self.take_pending_error()?;

            let fired = self.run_monitors();
            if let Ok(count) = fired {
                self.inner.tick.borrow_mut().report.monitors_fired += count;
            }
            fired?;
            self.take_pending_error()?;

            if !self.has_pending(root) {
                break;
            }
            if passes >= max_passes {
                tracing::warn!(passes, "tick did not settle");
                return Err(EngineError::Unsettled { passes });
            }
            tracing::debug!(pass = passes, "dirty nodes remain; running another pass");
        }

        self.inner.ticks.set(number);
        let mut report = std::mem::take(&mut self.inner.tick.borrow_mut().report);
        report.tick = number;
        if self.inner.config.log_ticks {
            tracing::debug!(
                passes = report.passes,
                nodes_run = report.nodes_run,
                attached = report.attached,
                detached = report.detached,
                monitors_fired = report.monitors_fired,
                "tick complete"
            );
        }
        Ok(report)
    }

    /// Run `callback` at the start of the next tick, before any body.
    ///
    /// A callback scheduled by another callback waits for the tick after.
    pub fn schedule_callback(&self, callback: impl FnOnce() + 'static) {
        self.inner.scheduled.borrow_mut().push(Box::new(callback));
    }

    fn run_scheduled(&self) {
        let callbacks = std::mem::take(&mut *self.inner.scheduled.borrow_mut());
        if callbacks.is_empty() {
            return;
        }
        tracing::trace!(count = callbacks.len(), "running scheduled callbacks");
        self.untracked(|| callbacks.into_iter().for_each(|callback| callback()));
    }

    /// Detach the whole tree under `root`, running every disposer.
    pub fn dispose_root(&self, root: NodeId) -> Result<()> {
        if self.inner.tick.borrow().running {
            return Err(EngineError::ReentrantTick);
        }
        let is_root = self
            .inner
            .nodes
            .borrow()
            .get(root.handle())
            .is_some_and(|node| node.parent.is_none());
        if !is_root {
            return Err(EngineError::UnknownNode(root.to_string()));
        }
        self.detach_subtree(root);
        tracing::debug!(%root, "root disposed");
        Ok(())
    }

    /// Whether `id` refers to a node currently in a tree.
    pub fn is_attached(&self, id: NodeId) -> bool {
        self.inner
            .nodes
            .borrow()
            .get(id.handle())
            .is_some_and(|node| node.attachment == Attachment::Attached)
    }

    /// Snapshot of node `id`, or `None` if the handle is stale.
    pub fn node_info(&self, id: NodeId) -> Option<NodeInfo> {
        self.inner
            .nodes
            .borrow()
            .get(id.handle())
            .map(|node| NodeInfo::of(id, node))
    }

    /// Number of live nodes across every tree of this runtime.
    pub fn node_count(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Run the body of node `id` and commit the children it reached.
    pub(crate) fn run_node(&self, id: NodeId) -> Result<()> {
        let (body, previous, root) = {
            let mut nodes = self.inner.nodes.borrow_mut();
            let node = nodes
                .get_mut(id.handle())
                .ok_or_else(|| EngineError::UnknownNode(id.to_string()))?;
            let Some(body) = node.body.clone() else {
                return Ok(());
            };
            node.dirty = false;
            (body, std::mem::take(&mut node.children), node.root.unwrap_or(id))
        };

        let old: HashMap<NodeKey, NodeId> = {
            let nodes = self.inner.nodes.borrow();
            previous
                .iter()
                .filter_map(|child| nodes.get(child.handle()).map(|n| (n.key.clone(), *child)))
                .collect()
        };

        tracing::trace!(node = %id, "running body");
        let mut scope = Scope::new(self, id, root, old);
        let result = self.record(Some(ObserverId::Node(id)), || body(&mut scope));
        let reached = scope.finish();
        self.inner.tick.borrow_mut().report.nodes_run += 1;

        let reached_set: HashSet<NodeId> = reached.iter().copied().collect();
        let unreached: Vec<NodeId> = previous
            .into_iter()
            .filter(|child| !reached_set.contains(child))
            .collect();

        match result {
            Ok(()) => {
                if let Some(node) = self.inner.nodes.borrow_mut().get_mut(id.handle()) {
                    node.children = reached;
                }
                if !unreached.is_empty() {
                    tracing::trace!(node = %id, count = unreached.len(), "children unreached");
                    // Last created leaves first, as in `detach_subtree`.
                    self.inner
                        .tick
                        .borrow_mut()
                        .pending_detach
                        .extend(unreached.into_iter().rev());
                }
                Ok(())
            }
            Err(err) => {
                // Keep what was not reached; the retry decides its fate.
                let mut nodes = self.inner.nodes.borrow_mut();
                let mut children = reached;
                children.extend(
                    unreached
                        .into_iter()
                        .filter(|child| nodes.contains(child.handle())),
                );
                if let Some(node) = nodes.get_mut(id.handle()) {
                    node.children = children;
                    node.dirty = true;
                }
                tracing::debug!(node = %id, error = %err, "body failed");
                Err(err)
            }
        }
    }

    /// Mark `id` attached and run `on_attach` untracked.
    pub(crate) fn attach(&self, id: NodeId, on_attach: impl FnOnce()) {
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let Some(node) = nodes.get_mut(id.handle()) else {
                return;
            };
            node.attachment = Attachment::Attached;
            tracing::trace!(node = %id, kind = node.kind.name(), "attached");
        }
        self.inner.tick.borrow_mut().report.attached += 1;
        self.untracked(on_attach);
    }

    /// Detach `id` and its whole subtree, children first, last child first.
    ///
    /// Each node is removed from the arena and loses its edges before its
    /// disposer runs.
    pub(crate) fn detach_subtree(&self, id: NodeId) {
        let children = match self.inner.nodes.borrow().get(id.handle()) {
            Some(node) => node.children.clone(),
            None => return,
        };
        for child in children.into_iter().rev() {
            self.detach_subtree(child);
        }

        let Some(mut node) = self.inner.nodes.borrow_mut().remove(id.handle()) else {
            return;
        };
        self.inner
            .tracker
            .borrow_mut()
            .remove_observer(ObserverId::Node(id));
        let was_attached = node.attachment == Attachment::Attached;
        node.attachment = Attachment::Detached;
        {
            let mut tick = self.inner.tick.borrow_mut();
            tick.deferred.remove(&id);
            if was_attached {
                tick.report.detached += 1;
            }
        }
        tracing::trace!(node = %id, kind = node.kind.name(), "detached");

        if was_attached {
            if let Some(dispose) = node.kind.take_disposer() {
                self.untracked(dispose);
            }
        }
        drop(node);
    }

    /// Visit `id`: run it if it is dirty, else look further down.
    fn visit(&self, id: NodeId) -> Result<()> {
        let (runnable, children) = {
            let nodes = self.inner.nodes.borrow();
            let Some(node) = nodes.get(id.handle()) else {
                return Ok(());
            };
            let deferred = self.inner.tick.borrow().deferred.contains(&id);
            (node.is_runnable() && !deferred, node.children.clone())
        };

        if runnable {
            return self.run_node(id);
        }
        for child in children {
            self.visit(child)?;
        }
        Ok(())
    }

    fn flush_detachments(&self) {
        loop {
            let pending = std::mem::take(&mut self.inner.tick.borrow_mut().pending_detach);
            if pending.is_empty() {
                break;
            }
            tracing::debug!(count = pending.len(), "detaching unreached nodes");
            for id in pending {
                self.detach_subtree(id);
            }
        }
    }

    /// Whether a node of the tree under `root` still needs to run this tick.
    fn has_pending(&self, root: NodeId) -> bool {
        let nodes = self.inner.nodes.borrow();
        let tick = self.inner.tick.borrow();
        let pending = nodes.iter().any(|(handle, node)| {
            let id = NodeId::from(handle);
            node.root == Some(root) && node.is_runnable() && !tick.deferred.contains(&id)
        });
        pending
    }

    fn take_pending_error(&self) -> Result<()> {
        match self.inner.pending_error.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
