//! Monitors
//!
//! A monitor watches one or more property paths of an observed object and
//! runs a named callback when any of them changed.
//!
//! # How Monitors Work
//!
//! 1. On registration every path is resolved to its backing cell and the
//!    cell's write counter is snapshotted.
//!
//! 2. At the end of each tick pass, each monitor compares its snapshots
//!    against the cells. If any path changed, the callback runs once with the
//!    list of changed paths, and the snapshots move forward.
//!
//! 3. A monitor fires at most once per tick. Changes made after it fired
//!    (by another monitor, or by a later pass) are reported on the next
//!    tick.
//!
//! 4. Synchronous monitors skip the tick and fire at write time with the
//!    single path that was written.
//!
//! Monitors run in registration order. The registry holds cells weakly; a
//! path whose cell is gone never fires again.

use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::IndexMap;

use super::cell::Watchable;
use super::object::{ObjectId, ObservedObject};
use super::runtime::Runtime;
use super::subscriber::CellId;
use crate::error::{EngineError, Result};

/// Identifier of a registered monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorId(u64);

impl fmt::Display for MonitorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "monitor#{}", self.0)
    }
}

/// What a monitor callback is told when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorEvent {
    /// Name of the observed object.
    pub target: String,
    /// Watched paths that changed, in registration order.
    pub changed: Vec<String>,
}

/// Registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorOptions {
    /// Fire at write time instead of at the end of the tick.
    pub synchronous: bool,
}

impl MonitorOptions {
    /// Options for a monitor that fires at write time.
    pub fn synchronous() -> Self {
        Self { synchronous: true }
    }
}

type CallbackFn = Rc<dyn Fn(&MonitorEvent) -> Result<()>>;

/// A named monitor callback.
///
/// The name is the callback's identity: `clear_monitor` removes callbacks
/// by name.
#[derive(Clone)]
pub struct MonitorCallback {
    name: String,
    f: CallbackFn,
}

impl MonitorCallback {
    /// Wrap `f` under `name`.
    pub fn named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&MonitorEvent) -> Result<()> + 'static,
    {
        Self {
            name: name.into(),
            f: Rc::new(f),
        }
    }

    /// The callback's identity.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for MonitorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MonitorCallback").field(&self.name).finish()
    }
}

/// One path or a list of paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorPaths(Vec<String>);

impl MonitorPaths {
    /// The paths, in the order given.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(EngineError::IllegalPath("empty path list".into()));
        }
        for path in &self.0 {
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(EngineError::IllegalPath(format!("`{path}`")));
            }
        }
        Ok(())
    }
}

impl From<&str> for MonitorPaths {
    fn from(path: &str) -> Self {
        Self(vec![path.to_owned()])
    }
}

impl From<String> for MonitorPaths {
    fn from(path: String) -> Self {
        Self(vec![path])
    }
}

impl From<&[&str]> for MonitorPaths {
    fn from(paths: &[&str]) -> Self {
        Self(paths.iter().map(|p| (*p).to_owned()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for MonitorPaths {
    fn from(paths: [&str; N]) -> Self {
        Self(paths.iter().map(|p| (*p).to_owned()).collect())
    }
}

impl From<Vec<String>> for MonitorPaths {
    fn from(paths: Vec<String>) -> Self {
        Self(paths)
    }
}

/// A watched path and the cell version last reported for it.
struct WatchedPath {
    path: String,
    cell: Weak<dyn Watchable>,
    cell_id: CellId,
    seen_version: u64,
}

impl WatchedPath {
    /// Current version if the cell moved past the snapshot.
    fn changed(&self) -> Option<u64> {
        let cell = self.cell.upgrade()?;
        let version = cell.version();
        (version != self.seen_version).then_some(version)
    }
}

pub(crate) struct MonitorEntry {
    target: ObjectId,
    target_name: String,
    callback: MonitorCallback,
    options: MonitorOptions,
    paths: Vec<WatchedPath>,
}

/// Monitors of one runtime, in registration order.
#[derive(Default)]
pub(crate) struct MonitorRegistry {
    entries: IndexMap<MonitorId, MonitorEntry>,
    next: u64,
    /// Monitors that fired during the running tick.
    fired: HashSet<MonitorId>,
}

impl MonitorRegistry {
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Forget which monitors fired; called when a tick starts.
    pub(crate) fn begin_tick(&mut self) {
        self.fired.clear();
    }

    /// Remove every entry, handing them back so they drop outside a borrow.
    pub(crate) fn clear(&mut self) -> Vec<MonitorEntry> {
        self.fired.clear();
        self.entries.drain(..).map(|(_, entry)| entry).collect()
    }

    fn insert(&mut self, entry: MonitorEntry) -> MonitorId {
        let id = MonitorId(self.next);
        self.next += 1;
        self.entries.insert(id, entry);
        id
    }

    fn remove_target(&mut self, target: ObjectId) -> Vec<MonitorEntry> {
        let ids: Vec<_> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.target == target)
            .map(|(id, _)| *id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.entries.shift_remove(&id))
            .collect()
    }

    /// Take the next deferred monitor that has changes and has not fired in
    /// this tick, advancing its snapshots.
    fn next_due(&mut self) -> Option<(MonitorId, MonitorCallback, MonitorEvent)> {
        for (id, entry) in self.entries.iter_mut() {
            if entry.options.synchronous || self.fired.contains(id) {
                continue;
            }
            let mut changed = Vec::new();
            for watched in entry.paths.iter_mut() {
                if let Some(version) = watched.changed() {
                    watched.seen_version = version;
                    changed.push(watched.path.clone());
                }
            }
            if changed.is_empty() {
                continue;
            }
            self.fired.insert(*id);
            let event = MonitorEvent {
                target: entry.target_name.clone(),
                changed,
            };
            return Some((*id, entry.callback.clone(), event));
        }
        None
    }

    /// Synchronous monitors watching `cell`, with their snapshots advanced.
    fn due_for_write(&mut self, cell: CellId) -> Vec<(MonitorId, MonitorCallback, MonitorEvent)> {
        let mut due = Vec::new();
        for (id, entry) in self.entries.iter_mut() {
            if !entry.options.synchronous {
                continue;
            }
            let mut changed = Vec::new();
            for watched in entry.paths.iter_mut().filter(|w| w.cell_id == cell) {
                if let Some(version) = watched.changed() {
                    watched.seen_version = version;
                    changed.push(watched.path.clone());
                }
            }
            if !changed.is_empty() {
                let event = MonitorEvent {
                    target: entry.target_name.clone(),
                    changed,
                };
                due.push((*id, entry.callback.clone(), event));
            }
        }
        due
    }
}

impl Runtime {
    /// Register `callback` to run when any of `paths` on `target` changes.
    ///
    /// Fails with `IllegalTarget` if the object is disposed or belongs to
    /// another runtime, `IllegalPath` if a path is empty or does not resolve
    /// to a cell, and `IllegalCallback` if the callback has no name.
    pub fn add_monitor(
        &self,
        target: &ObservedObject,
        paths: impl Into<MonitorPaths>,
        callback: MonitorCallback,
        options: MonitorOptions,
    ) -> Result<MonitorId> {
        if !target.is_tracked_by(self) {
            return Err(EngineError::IllegalTarget(target.name().to_owned()));
        }
        let paths = paths.into();
        paths.validate()?;
        if callback.name.is_empty() {
            return Err(EngineError::IllegalCallback(
                "monitor callbacks must be named".into(),
            ));
        }

        let mut watched = Vec::with_capacity(paths.0.len());
        for path in paths.0 {
            let cell = target.resolve_path(&path)?;
            watched.push(WatchedPath {
                cell_id: cell.cell_id(),
                seen_version: cell.version(),
                cell: Rc::downgrade(&cell),
                path,
            });
        }

        let id = self.inner.monitors.borrow_mut().insert(MonitorEntry {
            target: target.id(),
            target_name: target.name().to_owned(),
            callback,
            options,
            paths: watched,
        });
        tracing::debug!(%id, object = target.name(), "monitor added");
        Ok(id)
    }

    /// Remove `paths` from monitors on `target`.
    ///
    /// With `callback` set, only monitors with that name are touched;
    /// without it, every monitor on the target. Monitors left with no paths
    /// are dropped. Returns how many path registrations were removed.
    pub fn clear_monitor(
        &self,
        target: &ObservedObject,
        paths: impl Into<MonitorPaths>,
        callback: Option<&str>,
    ) -> Result<usize> {
        if !target.is_tracked_by(self) {
            return Err(EngineError::IllegalTarget(target.name().to_owned()));
        }
        let paths = paths.into();
        paths.validate()?;
        if callback == Some("") {
            return Err(EngineError::IllegalCallback(
                "monitor callbacks must be named".into(),
            ));
        }

        let mut removed = 0;
        let emptied = {
            let mut registry = self.inner.monitors.borrow_mut();
            let mut emptied = Vec::new();
            for (id, entry) in registry.entries.iter_mut() {
                if entry.target != target.id() {
                    continue;
                }
                if callback.is_some_and(|name| name != entry.callback.name) {
                    continue;
                }
                let before = entry.paths.len();
                entry.paths.retain(|w| !paths.0.contains(&w.path));
                removed += before - entry.paths.len();
                if entry.paths.is_empty() {
                    emptied.push(*id);
                }
            }
            emptied
                .into_iter()
                .filter_map(|id| registry.entries.shift_remove(&id))
                .collect::<Vec<_>>()
        };
        tracing::debug!(object = target.name(), removed, dropped = emptied.len(), "monitor cleared");
        drop(emptied);
        Ok(removed)
    }

    /// Number of registered monitors.
    pub fn monitor_count(&self) -> usize {
        self.inner.monitors.borrow().len()
    }

    /// Drop every monitor on `target`.
    pub(crate) fn remove_monitors_for(&self, target: ObjectId) {
        let removed = match self.inner.monitors.try_borrow_mut() {
            Ok(mut registry) => registry.remove_target(target),
            Err(_) => return,
        };
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "monitors removed with their target");
        }
        drop(removed);
    }

    /// Run deferred monitors whose paths changed. Returns how many fired.
    ///
    /// Stops at the first failing callback.
    pub(crate) fn run_monitors(&self) -> Result<usize> {
        let mut fired = 0;
        loop {
            let due = self.inner.monitors.borrow_mut().next_due();
            let Some((id, callback, event)) = due else {
                break;
            };
            tracing::debug!(%id, callback = callback.name(), changed = ?event.changed, "monitor fired");
            fired += 1;
            self.untracked(|| (callback.f)(&event))?;
        }
        Ok(fired)
    }

    /// Fire synchronous monitors watching `cell`.
    ///
    /// There is no caller to hand a failure to, so it is logged and stashed
    /// for the next `tick`.
    pub(crate) fn fire_synchronous_monitors(&self, cell: CellId) {
        let due = match self.inner.monitors.try_borrow_mut() {
            Ok(mut registry) => registry.due_for_write(cell),
            Err(_) => return,
        };
        for (id, callback, event) in due {
            tracing::trace!(%id, callback = callback.name(), "synchronous monitor fired");
            if let Err(err) = self.untracked(|| (callback.f)(&event)) {
                tracing::error!(%id, callback = callback.name(), error = %err, "synchronous monitor failed");
                self.stash_error(err);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
