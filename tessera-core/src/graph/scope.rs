//! Evaluation Scope
//!
//! A [`Scope`] is handed to every body the scheduler runs. It is the only
//! way to create child nodes, so memo primitives and `repeat_*` groups can
//! only be used from a body that is being evaluated.
//!
//! # Node Identity
//!
//! Each call creates or re-reaches one child node. The child is identified
//! by the caller's source location (`#[track_caller]`) plus how many times
//! that location was reached earlier in the same run, so the same call
//! inside a loop still yields distinct children. `keyed_child` adds an
//! explicit key on top of the location. A child that existed on the
//! previous run and is reached again keeps its identity; a child that is not
//! reached again is detached when the pass ends.

use std::any::type_name;
use std::collections::HashMap;
use std::panic::Location;
use std::rc::Rc;

use super::node::{Body, CompositionNode, NodeId, NodeKey, NodeKind};
use super::reconcile;
use crate::error::{EngineError, Result};
use crate::reactive::{Runtime, StateCell};

/// Evaluation context passed to a body.
pub struct Scope<'rt> {
    runtime: &'rt Runtime,
    node: NodeId,
    root: NodeId,
    /// Children of the previous run not reached yet in this one.
    old: HashMap<NodeKey, NodeId>,
    reached: Vec<NodeId>,
    occurrences: HashMap<(&'static Location<'static>, Option<String>), u32>,
}

impl<'rt> Scope<'rt> {
    pub(crate) fn new(
        runtime: &'rt Runtime,
        node: NodeId,
        root: NodeId,
        old: HashMap<NodeKey, NodeId>,
    ) -> Self {
        Self {
            runtime,
            node,
            root,
            old,
            reached: Vec::new(),
            occurrences: HashMap::new(),
        }
    }

    /// Children reached during this run, in order.
    pub(crate) fn finish(self) -> Vec<NodeId> {
        self.reached
    }

    /// The node whose body is running.
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// The runtime evaluating this body.
    pub fn runtime(&self) -> &'rt Runtime {
        self.runtime
    }

    /// Run `f` without recording reads for this node.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.runtime.untracked(f)
    }

    /// Create or re-run a child node.
    ///
    /// The child is evaluated right away, with `body` replacing whatever
    /// closure it had on the previous run.
    #[track_caller]
    pub fn child<F>(&mut self, body: F) -> Result<NodeId>
    where
        F: Fn(&mut Scope<'_>) -> Result<()> + 'static,
    {
        let key = self.site_key(Location::caller(), None);
        self.group(key, Rc::new(body))
    }

    /// Like [`child`](Self::child), with an explicit key added to the
    /// call-site identity.
    #[track_caller]
    pub fn keyed_child<F>(&mut self, key: impl Into<String>, body: F) -> Result<NodeId>
    where
        F: Fn(&mut Scope<'_>) -> Result<()> + 'static,
    {
        let key = self.site_key(Location::caller(), Some(key.into()));
        self.group(key, Rc::new(body))
    }

    /// Run `f` the first time this call is reached, and never again while
    /// the node stays attached.
    ///
    /// Reads inside `f` are not tracked. If `f` fails, nothing is memoized
    /// and the next run retries.
    #[track_caller]
    pub fn once<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        let key = self.site_key(Location::caller(), None);
        if self.reuse(&key).is_some() {
            return Ok(());
        }
        self.runtime.untracked(f)?;
        let id = self.create(key, NodeKind::Once, None);
        self.runtime.attach(id, || {});
        Ok(())
    }

    /// Compute a value the first time this call is reached and return the
    /// same value on every later run.
    ///
    /// The value never recomputes, even if cells read inside `f` change.
    #[track_caller]
    pub fn remember<T, F>(&mut self, f: F) -> Result<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        self.remember_at(Location::caller(), f)
    }

    /// A remembered value with a disposer that runs, with the value, when
    /// the node detaches.
    #[track_caller]
    pub fn remember_disposable<T, C, D>(&mut self, create: C, dispose: D) -> Result<T>
    where
        T: Clone + 'static,
        C: FnOnce() -> T,
        D: FnOnce(T) + 'static,
    {
        let key = self.site_key(Location::caller(), None);
        if let Some(id) = self.reuse(&key) {
            return self.stored(id);
        }

        let value = self.runtime.untracked(create);
        let owned = value.clone();
        let id = self.create(
            key,
            NodeKind::Disposable {
                value: Rc::new(value.clone()),
                dispose: Some(Box::new(move || dispose(owned))),
            },
            None,
        );
        self.runtime.attach(id, || {});
        Ok(value)
    }

    /// A state cell created on first reach and kept for the node's lifetime.
    #[track_caller]
    pub fn remember_mutable_state<T: 'static>(&mut self, initial: T) -> Result<StateCell<T>> {
        let runtime = self.runtime;
        self.remember_at(Location::caller(), move || runtime.mutable_state(initial))
    }

    /// A state cell registered under `name` for this node and its
    /// descendants, created from `create` on first reach.
    ///
    /// Reaching the same name again, in this run or a later one, returns
    /// the same cell. The name is forgotten when this node stops reaching it
    /// or detaches.
    pub fn named_state<T: 'static>(
        &mut self,
        name: &str,
        create: impl FnOnce() -> T,
    ) -> Result<StateCell<T>> {
        let key = NodeKey::Named(name.to_owned());
        if self.reuse(&key).is_some() || self.named_here(&key) {
            return self.runtime.find_named(Some(self.node), name);
        }

        let cell = self.runtime.named_state_in(Some(self.node), name, create)?;
        let dispose = self.runtime.named_disposer(self.node, name.to_owned());
        let id = self.create(
            key,
            NodeKind::Disposable {
                value: Rc::new(cell.clone()),
                dispose: Some(dispose),
            },
            None,
        );
        self.runtime.attach(id, || {});
        Ok(cell)
    }

    /// The nearest state named `name`: this node's, an ancestor's, or a
    /// global one.
    pub fn state_by<T: 'static>(&self, name: &str) -> Result<StateCell<T>> {
        self.runtime.find_named(Some(self.node), name)
    }

    /// The value of [`state_by`](Self::state_by), recording the read.
    pub fn value_by<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        Ok(self.state_by::<T>(name)?.get())
    }

    /// Run `on_attach` when this call is first reached and `on_detach` when
    /// the node leaves the tree, regardless of how often the body re-runs.
    #[track_caller]
    pub fn memo_lifecycle<A, D>(&mut self, on_attach: A, on_detach: D) -> Result<()>
    where
        A: FnOnce(),
        D: FnOnce() + 'static,
    {
        let key = self.site_key(Location::caller(), None);
        if self.reuse(&key).is_some() {
            return Ok(());
        }
        let id = self.create(
            key,
            NodeKind::Lifecycle {
                on_detach: Some(Box::new(on_detach)),
            },
            None,
        );
        self.runtime.attach(id, on_attach);
        Ok(())
    }

    /// `count` items keyed by their index.
    ///
    /// Index keys mean items never move: growing the count appends, shrinking
    /// it removes from the end, and each surviving item re-runs in place.
    #[track_caller]
    pub fn repeat<I>(&mut self, count: usize, item: I) -> Result<NodeId>
    where
        I: Fn(&mut Scope<'_>, usize) -> Result<()> + 'static,
    {
        self.repeat_range_at(
            Location::caller(),
            0,
            count,
            |index| index,
            |index, _| index.to_string(),
            move |scope, index, _| item(scope, *index),
        )
    }

    /// `count` items keyed by `key`.
    #[track_caller]
    pub fn repeat_with_key<K, I>(&mut self, count: usize, key: K, item: I) -> Result<NodeId>
    where
        K: Fn(usize) -> String,
        I: Fn(&mut Scope<'_>, usize) -> Result<()> + 'static,
    {
        self.repeat_range_at(
            Location::caller(),
            0,
            count,
            |index| index,
            |index, _| key(*index),
            move |scope, index, _| item(scope, *index),
        )
    }

    /// One item per element of `items`, keyed by `key`.
    #[track_caller]
    pub fn repeat_by_array<T, K, I>(&mut self, items: &[T], key: K, item: I) -> Result<NodeId>
    where
        T: Clone + 'static,
        K: Fn(&T, usize) -> String,
        I: Fn(&mut Scope<'_>, &T, usize) -> Result<()> + 'static,
    {
        self.repeat_range_at(
            Location::caller(),
            0,
            items.len(),
            |index| items[index].clone(),
            key,
            item,
        )
    }

    /// One item per index in `from..to`, with the element produced by
    /// `element`. An empty or inverted range yields no items.
    #[track_caller]
    pub fn repeat_range<T, E, K, I>(
        &mut self,
        from: usize,
        to: usize,
        element: E,
        key: K,
        item: I,
    ) -> Result<NodeId>
    where
        T: 'static,
        E: Fn(usize) -> T,
        K: Fn(&T, usize) -> String,
        I: Fn(&mut Scope<'_>, &T, usize) -> Result<()> + 'static,
    {
        self.repeat_range_at(Location::caller(), from, to, element, key, item)
    }

    fn repeat_range_at<T, E, K, I>(
        &mut self,
        location: &'static Location<'static>,
        from: usize,
        to: usize,
        element: E,
        key: K,
        item: I,
    ) -> Result<NodeId>
    where
        T: 'static,
        E: Fn(usize) -> T,
        K: Fn(&T, usize) -> String,
        I: Fn(&mut Scope<'_>, &T, usize) -> Result<()> + 'static,
    {
        let item = Rc::new(item);
        let mut entries: Vec<(String, Body)> = Vec::with_capacity(to.saturating_sub(from));
        for index in from..to {
            let value = element(index);
            let item_key = key(&value, index);
            let item = Rc::clone(&item);
            entries.push((
                item_key,
                Rc::new(move |scope: &mut Scope<'_>| item(scope, &value, index)),
            ));
        }

        // Reject duplicates before anything is created or detached.
        if let Some(key) = reconcile::first_duplicate(entries.iter().map(|(key, _)| key)) {
            return Err(EngineError::DuplicateKey { key: key.clone() });
        }

        let key = self.site_key(location, None);
        let group = match self.reuse(&key) {
            Some(id) => id,
            None => {
                let id = self.create(key, NodeKind::Keyed, None);
                self.runtime.attach(id, || {});
                id
            }
        };
        self.runtime.reconcile_group(group, self.root, entries)?;
        Ok(group)
    }

    fn group(&mut self, key: NodeKey, body: Body) -> Result<NodeId> {
        let id = match self.reuse(&key) {
            Some(id) => {
                if let Some(node) = self.runtime.inner.nodes.borrow_mut().get_mut(id.handle()) {
                    node.body = Some(Rc::clone(&body));
                }
                id
            }
            None => {
                let id = self.create(key, NodeKind::Group, Some(body));
                self.runtime.attach(id, || {});
                id
            }
        };
        self.runtime.run_node(id)?;
        Ok(id)
    }

    fn remember_at<T, F>(&mut self, location: &'static Location<'static>, f: F) -> Result<T>
    where
        T: Clone + 'static,
        F: FnOnce() -> T,
    {
        let key = self.site_key(location, None);
        if let Some(id) = self.reuse(&key) {
            return self.stored(id);
        }

        let value = self.runtime.untracked(f);
        let id = self.create(
            key,
            NodeKind::Remember {
                value: Rc::new(value.clone()),
            },
            None,
        );
        self.runtime.attach(id, || {});
        Ok(value)
    }

    /// The memoized value of node `id`.
    fn stored<T: Clone + 'static>(&self, id: NodeId) -> Result<T> {
        self.runtime
            .inner
            .nodes
            .borrow()
            .get(id.handle())
            .and_then(|node| node.kind.value())
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .ok_or(EngineError::RememberType {
                expected: type_name::<T>(),
            })
    }

    fn site_key(&mut self, location: &'static Location<'static>, explicit: Option<String>) -> NodeKey {
        let counter = self
            .occurrences
            .entry((location, explicit.clone()))
            .or_insert(0);
        let occurrence = *counter;
        *counter += 1;
        NodeKey::Site {
            location,
            occurrence,
            explicit,
        }
    }

    /// Whether a child with `key` was already created or reused in this run.
    fn named_here(&self, key: &NodeKey) -> bool {
        let nodes = self.runtime.inner.nodes.borrow();
        self.reached
            .iter()
            .any(|id| nodes.get(id.handle()).is_some_and(|node| &node.key == key))
    }

    /// Claim the previous run's child with this key, if it is still alive.
    fn reuse(&mut self, key: &NodeKey) -> Option<NodeId> {
        let id = self.old.remove(key)?;
        if !self.runtime.inner.nodes.borrow().contains(id.handle()) {
            return None;
        }
        self.reached.push(id);
        Some(id)
    }

    fn create(&mut self, key: NodeKey, kind: NodeKind, body: Option<Body>) -> NodeId {
        tracing::trace!(parent = %self.node, %key, kind = kind.name(), "node created");
        let node = CompositionNode::new(key, Some(self.node), Some(self.root), kind, body);
        let id = NodeId::from(self.runtime.inner.nodes.borrow_mut().insert(node));
        self.reached.push(id);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    #[test]
    fn same_call_site_in_a_loop_gets_distinct_children() {
        let runtime = Runtime::new();
        let root = runtime.create_root(|scope| {
            for _ in 0..3 {
                scope.child(|_| Ok(()))?;
            }
            Ok(())
        });
        runtime.tick(root).unwrap();

        let info = runtime.node_info(root).unwrap();
        assert_eq!(info.children.len(), 3);
        let keys: Vec<_> = info
            .children
            .iter()
            .map(|id| runtime.node_info(*id).unwrap().key)
            .collect();
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
    }

    #[test]
    fn remember_survives_reruns() {
        let runtime = Runtime::new();
        let trigger = runtime.mutable_state(0);
        let calls = Rc::new(Cell::new(0));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let root = {
            let (trigger, calls, seen) = (trigger.clone(), calls.clone(), seen.clone());
            runtime.create_root(move |scope| {
                trigger.get();
                let calls = calls.clone();
                let value = scope.remember(move || {
                    calls.set(calls.get() + 1);
                    String::from("memo")
                })?;
                seen.borrow_mut().push(value);
                Ok(())
            })
        };

        runtime.tick(root).unwrap();
        trigger.set(1);
        runtime.tick(root).unwrap();
        trigger.set(2);
        runtime.tick(root).unwrap();

        assert_eq!(calls.get(), 1);
        assert_eq!(*seen.borrow(), vec!["memo", "memo", "memo"]);
    }

    #[test]
    fn remember_mutable_state_keeps_its_cell() {
        let runtime = Runtime::new();
        let trigger = runtime.mutable_state(0);
        let ids = Rc::new(RefCell::new(Vec::new()));

        let root = {
            let (trigger, ids) = (trigger.clone(), ids.clone());
            runtime.create_root(move |scope| {
                trigger.get();
                let cell = scope.remember_mutable_state(10)?;
                ids.borrow_mut().push(cell.id());
                Ok(())
            })
        };

        runtime.tick(root).unwrap();
        trigger.set(1);
        runtime.tick(root).unwrap();

        let ids = ids.borrow();
        assert_eq!(ids.len(), 2);
        assert_eq!(ids[0], ids[1]);
    }

    #[test]
    fn failed_once_retries_on_the_next_run() {
        let runtime = Runtime::new();
        let attempts = Rc::new(Cell::new(0));
        let root = {
            let attempts = attempts.clone();
            runtime.create_root(move |scope| {
                let attempts = attempts.clone();
                scope.once(move || {
                    attempts.set(attempts.get() + 1);
                    if attempts.get() == 1 {
                        Err(EngineError::msg("first attempt"))
                    } else {
                        Ok(())
                    }
                })
            })
        };

        assert!(runtime.tick(root).is_err());
        runtime.tick(root).unwrap();
        runtime.tick(root).unwrap();
        assert_eq!(attempts.get(), 2);
    }

    #[test]
    fn duplicate_keys_fail_before_mutation() {
        let runtime = Runtime::new();
        let items = runtime.mutable_state(vec!["a", "b"]);
        let root = {
            let items = items.clone();
            runtime.create_root(move |scope| {
                let items = items.get();
                scope.repeat_by_array(&items, |item, _| item.to_string(), |_, _, _| Ok(()))?;
                Ok(())
            })
        };

        runtime.tick(root).unwrap();
        let group = runtime.node_info(root).unwrap().children[0];
        let before = runtime.node_info(group).unwrap().children;

        items.set(vec!["a", "a"]);
        let err = runtime.tick(root).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { ref key } if key == "a"));
        assert_eq!(runtime.node_info(group).unwrap().children, before);
    }

    #[test]
    fn memoized_type_mismatch_is_reported() {
        let runtime = Runtime::new();
        let root = runtime.create_root(|scope| {
            let key = scope.site_key(Location::caller(), None);
            let id = scope.create(key, NodeKind::Once, None);
            scope.stored::<u32>(id).map(|_| ())
        });
        assert!(matches!(
            runtime.tick(root),
            Err(EngineError::RememberType { .. })
        ));
    }
}
