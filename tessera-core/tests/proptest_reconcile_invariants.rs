//! Property-based invariant tests for keyed reconciliation.
//!
//! Verifies structural guarantees of `graph::plan` and of keyed groups
//! driven through a runtime:
//!
//! 1. Kept keys appear in the same relative order in both sequences
//! 2. Removed and kept keys partition the previous sequence
//! 3. Inserted and kept keys partition the new sequence
//! 4. Removed keys follow the previous order
//! 5. An unchanged sequence is a no-op
//! 6. Determinism: same inputs produce the same plan
//! 7. A repeated key is always rejected
//! 8. Every create is matched by at most one dispose, and live items equal
//!    the new sequence after a tick
//! 9. A tick's disposes all precede its creates and match the plan

use std::collections::HashSet;

use proptest::prelude::*;
use tessera_core::graph::plan;
use tessera_core::testing::{test_tick, EventLog, RootHandle, TestNode};
use tessera_core::{EngineError, Runtime, StateCell};

// ── Helpers ──────────────────────────────────────────────────────────

/// A sequence of distinct keys in arbitrary order.
fn arb_keys() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::hash_set(0u8..24, 0..16)
        .prop_map(|keys| keys.into_iter().collect::<Vec<_>>())
        .prop_shuffle()
}

fn position(keys: &[u8], key: u8) -> Option<usize> {
    keys.iter().position(|k| *k == key)
}

/// Replay the log into the set of live keys, failing on a double create or
/// a dispose without a create.
fn replay(entries: &[String], live: &mut HashSet<String>) -> Result<(), String> {
    for entry in entries {
        let (sign, key) = entry.split_at(1);
        match sign {
            "+" if !live.insert(key.to_owned()) => return Err(format!("double create of {key}")),
            "-" if !live.remove(key) => return Err(format!("dispose before create of {key}")),
            _ => {}
        }
    }
    Ok(())
}

fn keyed_tree(runtime: &Runtime, log: &EventLog, initial: Vec<u8>) -> (RootHandle, StateCell<Vec<u8>>) {
    let items = runtime.mutable_state(initial);
    let root = {
        let (items, log) = (items.clone(), log.clone());
        TestNode::create(runtime, move |scope| {
            let items = items.get();
            let log = log.clone();
            scope.repeat_by_array(
                &items,
                |key, _| key.to_string(),
                move |scope, key, _| {
                    let key = *key;
                    let (created, disposed) = (log.clone(), log.clone());
                    scope.memo_lifecycle(
                        move || created.push(format!("+{key}")),
                        move || disposed.push(format!("-{key}")),
                    )
                },
            )?;
            Ok(())
        })
    };
    (root, items)
}

// ═════════════════════════════════════════════════════════════════════════
// 1. Kept keys keep their relative order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn kept_is_a_common_subsequence(old in arb_keys(), new in arb_keys()) {
        let plan = plan(&old, &new).unwrap();
        let kept: Vec<u8> = plan.kept.iter().copied().collect();

        let in_new: Vec<u8> = new.iter().copied().filter(|k| plan.kept.contains(k)).collect();
        prop_assert_eq!(&kept, &in_new);

        let old_positions: Vec<usize> = kept.iter().filter_map(|k| position(&old, *k)).collect();
        prop_assert_eq!(old_positions.len(), kept.len());
        prop_assert!(old_positions.windows(2).all(|w| w[0] < w[1]));
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 2–3. Partitions of both sequences
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn removed_and_kept_partition_old(old in arb_keys(), new in arb_keys()) {
        let plan = plan(&old, &new).unwrap();
        for key in &plan.removed {
            prop_assert!(!plan.kept.contains(key));
        }
        prop_assert_eq!(plan.removed.len() + plan.kept.len(), old.len());
    }

    #[test]
    fn inserted_and_kept_partition_new(old in arb_keys(), new in arb_keys()) {
        let plan = plan(&old, &new).unwrap();
        let inserted: HashSet<u8> = plan.inserted.iter().copied().collect();
        for key in &new {
            prop_assert!(inserted.contains(key) != plan.kept.contains(key));
        }
        prop_assert_eq!(plan.inserted.len() + plan.kept.len(), new.len());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 4. Removed keys follow the previous order
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn removed_in_previous_order(old in arb_keys(), new in arb_keys()) {
        let plan = plan(&old, &new).unwrap();
        let positions: Vec<usize> = plan.removed.iter().filter_map(|k| position(&old, *k)).collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));

        let gone: Vec<u8> = old.iter().copied().filter(|k| !new.contains(k)).collect();
        for key in gone {
            prop_assert!(plan.removed.contains(&key));
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 5–6. No-op and determinism
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn unchanged_sequence_is_noop(keys in arb_keys()) {
        let plan = plan(&keys, &keys).unwrap();
        prop_assert!(plan.is_noop());
        prop_assert_eq!(plan.kept.len(), keys.len());
    }

    #[test]
    fn deterministic(old in arb_keys(), new in arb_keys()) {
        prop_assert_eq!(plan(&old, &new).unwrap(), plan(&old, &new).unwrap());
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 7. Repeated keys are rejected
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn repeated_key_rejected(old in arb_keys(), new in arb_keys(), at in any::<prop::sample::Index>()) {
        prop_assume!(!new.is_empty());
        let mut new = new;
        let key = new[at.index(new.len())];
        new.push(key);
        let err = plan(&old, &new).unwrap_err();
        let matched = matches!(err, EngineError::DuplicateKey { key: ref k } if *k == key.to_string());
        prop_assert!(matched);
    }
}

// ═════════════════════════════════════════════════════════════════════════
// 8–9. Keyed groups through a runtime
// ═════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn lifecycle_balanced_across_ticks(steps in proptest::collection::vec(arb_keys(), 1..6)) {
        let runtime = Runtime::new();
        let log = EventLog::new();
        let (root, items) = keyed_tree(&runtime, &log, Vec::new());
        test_tick(&root).unwrap();

        let mut live = HashSet::new();
        for step in steps {
            items.set(step.clone());
            test_tick(&root).unwrap();
            if let Err(problem) = replay(&log.take(), &mut live) {
                return Err(TestCaseError::fail(problem));
            }
            let expected: HashSet<String> = step.iter().map(u8::to_string).collect();
            prop_assert_eq!(&live, &expected);
        }

        root.dispose().unwrap();
        if let Err(problem) = replay(&log.take(), &mut live) {
            return Err(TestCaseError::fail(problem));
        }
        prop_assert!(live.is_empty());
    }

    #[test]
    fn tick_follows_plan(old in arb_keys(), new in arb_keys()) {
        let runtime = Runtime::new();
        let log = EventLog::new();
        let (root, items) = keyed_tree(&runtime, &log, old.clone());
        test_tick(&root).unwrap();
        log.take();

        items.set(new.clone());
        test_tick(&root).unwrap();

        let plan = plan(&old, &new).unwrap();
        let expected: Vec<String> = plan
            .removed
            .iter()
            .map(|k| format!("-{k}"))
            .chain(plan.inserted.iter().map(|k| format!("+{k}")))
            .collect();
        prop_assert_eq!(log.take(), expected);
    }
}
