// Property-based tests for engine invariants.
//
// Three categories:
// 1. Patch round-trip: any diff applied and reversed is the identity
// 2. Refactor equivalence: accumulate merges preserve observable values
// 3. Driver invariants: determinism and monotone time on generated inputs
//
// Uses proptest with a bounded case count to keep CI stable.

use std::collections::BTreeMap;

use proptest::prelude::*;

use nitta::bus::BusNetwork;
use nitta::ir::{accumulate_merges, Diff, Patch, F};
use nitta::simulator::simulate;
use nitta::spi::IoSync;
use nitta::synthesis::{synthesize, ModelState, SynthesisConfig, TreeCache};
use nitta::value::Int32;

fn add(a: &str, b: &str, outs: &[&str]) -> F<Int32> {
    F::Add {
        a: a.to_string(),
        b: b.to_string(),
        outs: outs.iter().map(|s| s.to_string()).collect(),
    }
}

fn sub(a: &str, b: &str, outs: &[&str]) -> F<Int32> {
    F::Sub {
        a: a.to_string(),
        b: b.to_string(),
        outs: outs.iter().map(|s| s.to_string()).collect(),
    }
}

fn constant(x: i64, outs: &[&str]) -> F<Int32> {
    F::Constant {
        value: nitta::value::Val::from_int(x),
        outs: outs.iter().map(|s| s.to_string()).collect(),
    }
}

fn fib(init1: i64, init2: i64) -> Vec<F<Int32>> {
    vec![
        F::Loop {
            init: nitta::value::Val::from_int(init1),
            input: "b2".to_string(),
            outs: vec!["a1".to_string()],
        },
        F::Loop {
            init: nitta::value::Val::from_int(init2),
            input: "c".to_string(),
            outs: vec!["b1".to_string(), "b2".to_string()],
        },
        add("a1", "b1", &["c"]),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        .. ProptestConfig::default()
    })]

    // ── Patch round-trip ────────────────────────────────────────────────

    #[test]
    fn patch_round_trip(
        ai in "[m-z]{2,5}",
        ao in "[m-z]{2,5}",
    ) {
        prop_assume!(ai != ao);
        let f = add("a", "b", &["c", "d"]);
        let diff = Diff {
            i: [("a".to_string(), ai)].into(),
            o: [("c".to_string(), ao)].into(),
        };
        prop_assert_eq!(f.patch(&diff).patch(&diff.reverse()), f);
    }

    #[test]
    fn reverse_is_involutive(
        from in "[a-l]{1,4}",
        to in "[m-z]{1,4}",
    ) {
        let diff = Diff {
            i: [(from.clone(), to.clone())].into(),
            o: [(to, from)].into(),
        };
        prop_assert_eq!(diff.reverse().reverse(), diff);
    }

    // ── Refactor preserves semantics ────────────────────────────────────

    #[test]
    fn accumulate_merge_preserves_observables(
        x in -100i64..100,
        y in -100i64..100,
        z in -100i64..100,
        upstream_sub in any::<bool>(),
        downstream_sub in any::<bool>(),
    ) {
        let upstream = if upstream_sub {
            sub("x", "y", &["t"])
        } else {
            add("x", "y", &["t"])
        };
        let downstream = if downstream_sub {
            sub("t", "z", &["d"])
        } else {
            add("t", "z", &["d"])
        };
        let chain: Vec<F<Int32>> = vec![
            constant(x, &["x"]),
            constant(y, &["y"]),
            constant(z, &["z"]),
            upstream,
            downstream,
            F::Send { input: "d".to_string() },
        ];

        let merges = accumulate_merges(&chain);
        prop_assert_eq!(merges.len(), 1, "chain must offer exactly one merge");
        let merged: Vec<F<Int32>> = chain
            .iter()
            .filter(|f| !merges[0].chain.contains(*f))
            .cloned()
            .chain(std::iter::once(merges[0].merged.clone()))
            .collect();

        let a = simulate(&chain, 3, &BTreeMap::new(), false).unwrap();
        let b = simulate(&merged, 3, &BTreeMap::new(), false).unwrap();
        prop_assert_eq!(&a.observed["d"], &b.observed["d"]);
    }

    // ── Driver invariants ───────────────────────────────────────────────

    #[test]
    fn synthesis_is_deterministic(
        init1 in 0i64..50,
        init2 in 1i64..50,
    ) {
        let model = || ModelState::new(
            BusNetwork::default_march(IoSync::Sync),
            fib(init1, init2),
        );
        let a = synthesize(model(), &SynthesisConfig::default()).unwrap();
        let b = synthesize(model(), &SynthesisConfig::default()).unwrap();
        prop_assert_eq!(a.complete, b.complete);
        prop_assert_eq!(a.model.digest(), b.model.digest());
    }

    #[test]
    fn next_tick_is_monotone(
        init1 in 0i64..50,
        init2 in 1i64..50,
    ) {
        let cache = TreeCache::new();
        let mut model = std::sync::Arc::new(ModelState::new(
            BusNetwork::default_march(IoSync::Sync),
            fib(init1, init2),
        ));
        for _ in 0..12 {
            if model.is_complete() {
                break;
            }
            let scored = model.scored_options();
            let Some(cand) = scored.first() else { break };
            let Ok(child) = cache.child(&model, cand.index, &cand.option) else { break };
            prop_assert!(child.network.next_tick() >= model.network.next_tick());
            model = child;
        }
    }
}
