//! Keyed Reconciliation
//!
//! Given the keys a keyed group had on its previous run and the keys it has
//! now, decide which items keep their node and which are recreated.
//!
//! # Algorithm
//!
//! Walk the new sequence in order and keep a key if its previous position is
//! after the previous position of the last key kept. The kept keys form a
//! run whose relative order did not change; their nodes are preserved and
//! re-run in place.
//!
//! Every other previous key is removed: either it is gone from the new
//! sequence, or it fell out of the stable run. Removals happen first, in
//! the previous order. Then the new sequence is walked again and every key
//! not kept gets a fresh node.
//!
//! A key that moved out of the stable run is therefore disposed and created
//! again, never physically moved. For a single swap `[A, B, C]` to
//! `[B, A, C]` that is one dispose and one create of `A`.
//!
//! The walk is linear in the length of both sequences.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexSet;

use super::node::{Body, CompositionNode, NodeId, NodeKey, NodeKind};
use crate::error::{EngineError, Result};
use crate::reactive::Runtime;

/// What to do with each key when a group moves from one sequence to the
/// next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan<K: Hash + Eq> {
    /// Previous keys to detach, in previous order.
    pub removed: Vec<K>,
    /// Keys whose node is preserved, in new order.
    pub kept: IndexSet<K>,
    /// Keys that get a new node, in new order.
    pub inserted: Vec<K>,
}

impl<K: Hash + Eq> ReconcilePlan<K> {
    /// Whether the plan preserves every node as it is.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty() && self.inserted.is_empty()
    }
}

/// The first key that appears twice, if any.
pub fn first_duplicate<'a, K, I>(keys: I) -> Option<&'a K>
where
    K: Hash + Eq + 'a,
    I: IntoIterator<Item = &'a K>,
{
    let mut seen = HashSet::new();
    keys.into_iter().find(|key| !seen.insert(*key))
}

/// Plan the move from `old` to `new`.
///
/// Fails with `DuplicateKey` if `new` repeats a key.
pub fn plan<K>(old: &[K], new: &[K]) -> Result<ReconcilePlan<K>>
where
    K: Hash + Eq + Clone + Display,
{
    if let Some(key) = first_duplicate(new) {
        return Err(EngineError::DuplicateKey {
            key: key.to_string(),
        });
    }

    let previous: HashMap<&K, usize> = old.iter().enumerate().map(|(i, k)| (k, i)).collect();

    let mut kept = IndexSet::new();
    let mut last: Option<usize> = None;
    for key in new {
        if let Some(&index) = previous.get(key) {
            if last.map_or(true, |last| index > last) {
                kept.insert(key.clone());
                last = Some(index);
            }
        }
    }

    let removed = old.iter().filter(|k| !kept.contains(*k)).cloned().collect();
    let inserted = new.iter().filter(|k| !kept.contains(*k)).cloned().collect();

    Ok(ReconcilePlan {
        removed,
        kept,
        inserted,
    })
}

impl Runtime {
    /// Bring the items of keyed group `group` in line with `entries`.
    ///
    /// Removed items are detached right away. Preserved items re-run with
    /// their new body, new items are attached and run, all in new order.
    pub(crate) fn reconcile_group(
        &self,
        group: NodeId,
        root: NodeId,
        entries: Vec<(String, Body)>,
    ) -> Result<()> {
        let current: Vec<(String, NodeId)> = {
            let nodes = self.inner.nodes.borrow();
            let node = nodes
                .get(group.handle())
                .ok_or_else(|| EngineError::UnknownNode(group.to_string()))?;
            node.children
                .iter()
                .filter_map(|id| match nodes.get(id.handle()).map(|n| &n.key) {
                    Some(NodeKey::Item(key)) => Some((key.clone(), *id)),
                    _ => None,
                })
                .collect()
        };

        let old_keys: Vec<String> = current.iter().map(|(key, _)| key.clone()).collect();
        let new_keys: Vec<String> = entries.iter().map(|(key, _)| key.clone()).collect();
        let plan = plan(&old_keys, &new_keys)?;
        let mut by_key: HashMap<String, NodeId> = current.into_iter().collect();

        if !plan.is_noop() {
            tracing::debug!(
                %group,
                removed = plan.removed.len(),
                kept = plan.kept.len(),
                inserted = plan.inserted.len(),
                "reconciling keyed group"
            );
        }

        for key in &plan.removed {
            if let Some(id) = by_key.remove(key) {
                self.detach_subtree(id);
            }
        }

        let mut children = Vec::with_capacity(entries.len());
        let mut outcome = Ok(());
        for (key, body) in entries {
            let id = match by_key.remove(&key) {
                Some(id) => {
                    if let Some(node) = self.inner.nodes.borrow_mut().get_mut(id.handle()) {
                        node.body = Some(Rc::clone(&body));
                    }
                    id
                }
                None => {
                    let node = CompositionNode::new(
                        NodeKey::Item(key),
                        Some(group),
                        Some(root),
                        NodeKind::Group,
                        Some(body),
                    );
                    let id = NodeId::from(self.inner.nodes.borrow_mut().insert(node));
                    self.attach(id, || {});
                    id
                }
            };
            children.push(id);
            if let Err(err) = self.run_node(id) {
                outcome = Err(err);
                break;
            }
        }

        // Preserved items the walk did not reach after a failure stay attached.
        children.extend(
            plan.kept
                .iter()
                .filter_map(|key| by_key.get(key))
                .copied(),
        );
        if let Some(node) = self.inner.nodes.borrow_mut().get_mut(group.handle()) {
            node.children = children;
        }
        outcome
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn run(old: &str, new: &str) -> ReconcilePlan<char> {
        plan(&keys(old), &keys(new)).unwrap()
    }

    #[test]
    fn unchanged_sequence_is_a_noop() {
        let plan = run("ABC", "ABC");
        assert!(plan.is_noop());
        assert_eq!(plan.kept.len(), 3);
    }

    #[test]
    fn removals_follow_previous_order() {
        let plan = run("ABCDE", "ACE");
        assert_eq!(plan.removed, keys("BD"));
        assert!(plan.inserted.is_empty());
    }

    #[test]
    fn single_swap_recreates_the_displaced_key() {
        let plan = run("ABCDE", "BACDE");
        assert_eq!(plan.removed, keys("A"));
        assert_eq!(plan.inserted, keys("A"));
    }

    #[test]
    fn a_forward_move_is_preserved() {
        let plan = run("BACDE", "BDACE");
        assert_eq!(plan.removed, keys("AC"));
        assert_eq!(plan.inserted, keys("AC"));
        assert!(plan.kept.contains(&'D'));
    }

    #[test]
    fn insertions_land_in_new_order() {
        let plan = run("ABC", "ACDBE");
        assert_eq!(plan.removed, keys("B"));
        assert_eq!(plan.inserted, keys("DBE"));
        assert_eq!(plan.kept.iter().copied().collect::<Vec<_>>(), keys("AC"));
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = plan(&keys("AB"), &keys("ABA")).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKey { ref key } if key == "A"));
        assert_eq!(first_duplicate(&keys("ABC")), None);
    }
}
