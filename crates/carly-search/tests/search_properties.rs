//! Property tests for futures arithmetic and the search engine.

use carly_core::{AnnotatedOp, Checker, Observed, Op, ThreadRuns, TrialOp};
use carly_search::{search, Futures, World};
use proptest::prelude::*;

/// Counter ops against a model that only grows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CounterOp {
    Add(u8),
    Total,
}

impl Op for CounterOp {
    type System = std::sync::Mutex<u64>;
    type Model = u64;
    type Outcome = u64;

    fn apply(&self, system: &Self::System) -> u64 {
        let mut total = system.lock().unwrap();
        match self {
            CounterOp::Add(n) => {
                *total += u64::from(*n);
                *total
            }
            CounterOp::Total => *total,
        }
    }

    fn check(&self, model: &u64, observed: &Observed<u64>, checker: &mut Checker) -> bool {
        match self {
            CounterOp::Add(n) => {
                checker.are_eq(
                    &(*model + u64::from(*n)),
                    observed.returned().unwrap_or(&u64::MAX),
                    "count after add",
                );
                true
            }
            CounterOp::Total => {
                checker.are_eq(model, observed.returned().unwrap_or(&u64::MAX), "total");
                true
            }
        }
    }

    fn next_model(&self, model: &u64) -> u64 {
        match self {
            CounterOp::Add(n) => *model + u64::from(*n),
            CounterOp::Total => *model,
        }
    }
}

/// Exact multinomial for small inputs, as a reference.
fn naive_multinomial(counts: &[usize]) -> u128 {
    fn factorial(n: usize) -> u128 {
        (1..=n as u128).product()
    }
    let total: usize = counts.iter().sum();
    counts
        .iter()
        .fold(factorial(total), |acc, &c| acc / factorial(c))
}

/// Execute `plans` sequentially in a fixed global order so the observed
/// results are consistent with at least one linearization by construction.
fn consistent_runs(plans: Vec<Vec<CounterOp>>) -> ThreadRuns<CounterOp> {
    let system = std::sync::Mutex::new(0u64);
    let mut runs: ThreadRuns<CounterOp> = plans
        .iter()
        .enumerate()
        .map(|(thread, _)| (thread, Vec::new()))
        .collect();
    // Round-robin across threads: an arbitrary but valid interleaving.
    let mut cursors = vec![0usize; plans.len()];
    loop {
        let mut progressed = false;
        for (thread, plan) in plans.iter().enumerate() {
            if cursors[thread] < plan.len() {
                let op = plan[cursors[thread]].clone();
                cursors[thread] += 1;
                progressed = true;
                let observed = op.apply(&system);
                runs.get_mut(&thread).unwrap().push(AnnotatedOp::new(
                    TrialOp::Op(op),
                    thread,
                    Observed::Returned(observed),
                ));
            }
        }
        if !progressed {
            break;
        }
    }
    runs
}

fn plan_strategy() -> impl Strategy<Value = Vec<Vec<CounterOp>>> {
    let op = prop_oneof![
        (1u8..=9).prop_map(CounterOp::Add),
        Just(CounterOp::Total),
    ];
    proptest::collection::vec(proptest::collection::vec(op, 0..4), 1..4)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn futures_matches_naive_multinomial(counts in proptest::collection::vec(0usize..5, 0..4)) {
        prop_assert_eq!(Futures::multinomial(&counts).get(), naive_multinomial(&counts));
    }

    #[test]
    fn futures_is_one_iff_at_most_one_nonempty_thread(counts in proptest::collection::vec(0usize..5, 0..4)) {
        let nonempty = counts.iter().filter(|&&c| c > 0).count();
        prop_assert_eq!(Futures::multinomial(&counts).is_single(), nonempty <= 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        .. ProptestConfig::default()
    })]

    #[test]
    fn search_is_complete_for_realizable_histories(plans in plan_strategy()) {
        let runs = consistent_runs(plans);
        let report = search(2, 0u64, runs).expect("runs are never empty here");
        prop_assert!(report.found(), "a valid interleaving exists by construction");
    }

    #[test]
    fn found_histories_preserve_program_order(plans in plan_strategy()) {
        let runs = consistent_runs(plans);
        let report = search(2, 0u64, runs).expect("runs are never empty here");
        let world = report.world.expect("realizable history");
        let mut cursors = std::collections::BTreeMap::new();
        for &(thread, index) in world.history() {
            let next = cursors.entry(thread).or_insert(0usize);
            prop_assert_eq!(index, *next);
            *next += 1;
        }
    }

    #[test]
    fn equal_visit_keys_expand_equivalently(plans in plan_strategy()) {
        let runs = consistent_runs(plans);
        let world = World::initialize(0u64, runs);
        let mut c1 = Vec::new();
        let mut c2 = Vec::new();
        let a: Vec<_> = world.next_steps(&mut c1).iter().map(World::visit_key).collect();
        let b: Vec<_> = world.next_steps(&mut c2).iter().map(World::visit_key).collect();
        prop_assert_eq!(a, b);
    }
}
