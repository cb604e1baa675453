//! Property tests over whole computations on a single node.

mod common;

use common::*;
use proptest::prelude::*;
use satin::{
    ComputationRegistry, Delivery, Failure, JobError, LocalNetwork, Payload, SatinConfig, Stamp,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn polling_node(registry: ComputationRegistry) -> (LocalNetwork, satin::Satin) {
    let net = LocalNetwork::new();
    let config = SatinConfig::builder().delivery(Delivery::Polling).build();
    let node = start_node(&net, "solo", "vu", config, registry);
    (net, node)
}

/// `leaves`: spawns one `leaf` per value, each with an inlet that counts
/// and absorbs failures. A leaf fails when its flag is set.
fn inlet_registry(inlet_calls: &Arc<AtomicUsize>) -> ComputationRegistry {
    let mut registry = ComputationRegistry::new();
    let calls = Arc::clone(inlet_calls);
    registry
        .register_fn("leaf", |_worker, params| {
            let (value, fail): (u64, bool) = params.decode()?;
            if fail {
                return Err(JobError::Failed(Failure::new(format!("leaf {value}"))));
            }
            Ok(Payload::encode(&value)?)
        })
        .register_fn("leaves", move |worker, params| {
            let leaves: Vec<(u64, bool)> = params.decode()?;
            let counter = worker.counter();
            let handles: Vec<_> = leaves
                .iter()
                .map(|leaf| {
                    let calls = Arc::clone(&calls);
                    let params = Payload::encode(leaf).unwrap_or_default();
                    worker.spawn_with_inlet(&counter, "leaf", params, move |_failure| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                })
                .collect();
            worker.sync(&counter)?;
            let mut total = 0u64;
            for handle in &handles {
                match worker.result(handle) {
                    Ok(value) => total += value.decode::<u64>()?,
                    Err(JobError::Failed(_)) => {}
                    Err(other) => return Err(other),
                }
            }
            Ok(Payload::encode(&total)?)
        });
    registry
}

proptest! {
    #![proptest_config(test_proptest_config(24))]

    #[test]
    fn child_stamps_invert_and_nest(path in prop::collection::vec(0u32..8, 0..6), root in 0u32..4, extra in 0u32..8) {
        init_test_logging();
        let stamp = path.iter().fold(Stamp::root(root), |s, &i| s.child(i));
        let child = stamp.child(extra);
        prop_assert_eq!(child.parent(), Some(stamp.clone()));
        prop_assert!(child.is_descendant_of(&stamp));
        prop_assert!(child.is_descendant_of(&Stamp::root(root)));
        prop_assert!(!stamp.is_descendant_of(&child));
        prop_assert!(!child.is_descendant_of(&Stamp::root(root + 1)));
    }

    #[test]
    fn range_sum_matches_sequential(lo in 0u64..50, len in 1u64..60) {
        init_test_logging();
        let (_net, node) = polling_node(computations());
        let result = node.run_root("sum", encode(&(lo, lo + len, 0u64))).expect("root job");
        let expected: u64 = (lo..lo + len).sum();
        prop_assert_eq!(decode_u64(&result), expected);
        node.exit();
    }

    #[test]
    fn every_failure_reaches_its_inlet_once(leaves in prop::collection::vec((0u64..1000, any::<bool>()), 1..16)) {
        init_test_logging();
        let calls = Arc::new(AtomicUsize::new(0));
        let (_net, node) = polling_node(inlet_registry(&calls));
        let result = node.run_root("leaves", encode(&leaves)).expect("failures absorbed");

        let failures = leaves.iter().filter(|(_, fail)| *fail).count();
        let expected: u64 = leaves.iter().filter(|(_, fail)| !*fail).map(|(v, _)| v).sum();
        prop_assert_eq!(calls.load(Ordering::SeqCst), failures);
        prop_assert_eq!(decode_u64(&result), expected);
        node.exit();
    }
}

#[test]
fn fib_is_correct_for_small_inputs() {
    init_test("fib_is_correct_for_small_inputs");
    let (_net, node) = polling_node(computations());
    for n in 0..=14u64 {
        let result = node.run_root("fib", encode(&n)).expect("root job");
        let value = decode_u64(&result);
        assert_with_log!(value == fib_expected(n), "fib", fib_expected(n), value);
    }
    node.exit();
    test_complete!("fib_is_correct_for_small_inputs");
}
