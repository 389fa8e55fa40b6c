//! Named State
//!
//! State cells registered under a name, so code that did not create a cell
//! can still find it. A global name lives on the runtime until it is
//! forgotten. A local name belongs to the composition node whose body
//! created it: descendants see it, and it is forgotten when that node
//! detaches.
//!
//! Lookups walk from the asking node up through its ancestors and fall back
//! to the global names, so the nearest registration shadows the others.

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::rc::Rc;

use super::cell::StateCell;
use super::runtime::Runtime;
use crate::error::{EngineError, Result};
use crate::graph::NodeId;

/// Owner of a name: a composition node, or `None` for the runtime itself.
type Owner = Option<NodeId>;

/// Registry of named cells, one per runtime.
#[derive(Default)]
pub(crate) struct NamedRegistry {
    entries: HashMap<(Owner, String), Rc<dyn Any>>,
    /// Set while an initializer of a named state runs.
    creating: bool,
}

impl NamedRegistry {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Clears the initializing flag, also when the initializer unwinds.
struct CreatingGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for CreatingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut named) = self.runtime.inner.named.try_borrow_mut() {
            named.creating = false;
        }
    }
}

impl Runtime {
    /// The global state named `name`, created from `create` on first use.
    ///
    /// Later calls return the same cell and ignore `create`. Creating a
    /// named state from inside another one's `create` fails with
    /// `NestedNamedState`.
    pub fn named_state<T: 'static>(
        &self,
        name: &str,
        create: impl FnOnce() -> T,
    ) -> Result<StateCell<T>> {
        self.named_state_in(None, name, create)
    }

    /// Look up a state by name from outside any composition node.
    ///
    /// Only global names are visible here.
    pub fn state_by<T: 'static>(&self, name: &str) -> Result<StateCell<T>> {
        self.find_named(None, name)
    }

    /// The current value of the state named `name`, recording the read.
    pub fn value_by<T: Clone + 'static>(&self, name: &str) -> Result<T> {
        Ok(self.state_by::<T>(name)?.get())
    }

    /// Remove the global state named `name`. Returns whether it existed.
    ///
    /// Handles to the cell stay usable; the name just stops resolving.
    pub fn forget_state(&self, name: &str) -> bool {
        let removed = self.inner.named.borrow_mut().entries.remove(&(None, name.to_owned()));
        if removed.is_some() {
            tracing::debug!(name, "named state forgotten");
        }
        removed.is_some()
    }

    /// Number of names registered, global and local.
    pub fn named_count(&self) -> usize {
        self.inner.named.borrow().len()
    }

    pub(crate) fn named_state_in<T: 'static>(
        &self,
        owner: Owner,
        name: &str,
        create: impl FnOnce() -> T,
    ) -> Result<StateCell<T>> {
        let existing = self.inner.named.borrow().entries.get(&(owner, name.to_owned())).cloned();
        if let Some(entry) = existing {
            return downcast(name, entry);
        }

        {
            let mut named = self.inner.named.borrow_mut();
            if named.creating {
                return Err(EngineError::NestedNamedState(name.to_owned()));
            }
            named.creating = true;
        }
        let initial = {
            let _guard = CreatingGuard { runtime: self };
            self.untracked(create)
        };

        let cell = self.mutable_state(initial);
        self.inner
            .named
            .borrow_mut()
            .entries
            .insert((owner, name.to_owned()), Rc::new(cell.clone()));
        tracing::debug!(name, owner = ?owner, "named state created");
        Ok(cell)
    }

    /// Resolve `name` from `from` up through its ancestors, then globally.
    pub(crate) fn find_named<T: 'static>(&self, from: Owner, name: &str) -> Result<StateCell<T>> {
        let mut owner = from;
        loop {
            let entry = self.inner.named.borrow().entries.get(&(owner, name.to_owned())).cloned();
            if let Some(entry) = entry {
                return downcast(name, entry);
            }
            let Some(node) = owner else {
                return Err(EngineError::UnknownState(name.to_owned()));
            };
            owner = self.inner.nodes.borrow().get(node.handle()).and_then(|n| n.parent);
        }
    }

    /// Disposer that drops the local name `name` owned by `owner`.
    pub(crate) fn named_disposer(&self, owner: NodeId, name: String) -> Box<dyn FnOnce()> {
        let runtime = self.downgrade();
        Box::new(move || {
            let Some(runtime) = runtime.upgrade() else {
                return;
            };
            let removed = runtime.inner.named.borrow_mut().entries.remove(&(Some(owner), name));
            drop(removed);
        })
    }
}

fn downcast<T: 'static>(name: &str, entry: Rc<dyn Any>) -> Result<StateCell<T>> {
    entry
        .downcast_ref::<StateCell<T>>()
        .cloned()
        .ok_or_else(|| EngineError::StateType {
            name: name.to_owned(),
            expected: type_name::<T>(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_state_is_created_once() {
        let runtime = Runtime::new();
        let first = runtime.named_state("count", || 1).unwrap();
        let second = runtime.named_state("count", || 99).unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(second.get(), 1);

        first.set(2);
        assert_eq!(runtime.value_by::<i32>("count").unwrap(), 2);
    }

    #[test]
    fn lookups_report_missing_and_mistyped_names() {
        let runtime = Runtime::new();
        runtime.named_state("label", || String::from("a")).unwrap();

        assert!(matches!(
            runtime.state_by::<String>("other"),
            Err(EngineError::UnknownState(name)) if name == "other"
        ));
        assert!(matches!(
            runtime.state_by::<u32>("label"),
            Err(EngineError::StateType { .. })
        ));
    }

    #[test]
    fn nested_creation_fails() {
        let runtime = Runtime::new();
        let inner = runtime.clone();
        let mut nested = None;
        let outer = runtime
            .named_state("outer", || {
                nested = Some(inner.named_state("inner", || 0));
                1
            })
            .unwrap();

        assert_eq!(outer.get(), 1);
        assert!(matches!(
            nested,
            Some(Err(EngineError::NestedNamedState(name))) if name == "inner"
        ));
        // The flag is cleared once the initializer returns.
        assert!(runtime.named_state("inner", || 0).is_ok());
    }

    #[test]
    fn forgotten_names_stop_resolving() {
        let runtime = Runtime::new();
        let cell = runtime.named_state("flag", || true).unwrap();
        assert!(runtime.forget_state("flag"));
        assert!(!runtime.forget_state("flag"));
        assert!(runtime.state_by::<bool>("flag").is_err());

        assert!(cell.get());
        let fresh = runtime.named_state("flag", || false).unwrap();
        assert_ne!(fresh.id(), cell.id());
    }
}
