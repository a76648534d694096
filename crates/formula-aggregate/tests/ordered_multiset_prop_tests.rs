#![cfg(not(target_arch = "wasm32"))]

use formula_aggregate::{OrderedMultiset, Value};
use proptest::prelude::*;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
enum Op {
    Add(i64),
    Remove(i64),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (-20i64..20).prop_map(Op::Add),
        1 => (-20i64..20).prop_map(Op::Remove),
    ]
}

/// Applies `ops` to both the multiset and a reference count map.
fn apply(ops: &[Op]) -> (OrderedMultiset<Value>, BTreeMap<i64, usize>) {
    let mut multiset = OrderedMultiset::new();
    let mut oracle: BTreeMap<i64, usize> = BTreeMap::new();

    for op in ops {
        match *op {
            Op::Add(v) => {
                assert!(multiset.add(&Value::Integer(v)).unwrap());
                *oracle.entry(v).or_default() += 1;
            }
            Op::Remove(v) => {
                let removed = multiset.remove(&Value::Integer(v)).unwrap();
                let expected = match oracle.get_mut(&v) {
                    Some(count) => {
                        *count -= 1;
                        if *count == 0 {
                            oracle.remove(&v);
                        }
                        true
                    }
                    None => false,
                };
                assert_eq!(removed, expected);
            }
        }
    }

    (multiset, oracle)
}

proptest! {
    #[test]
    fn prop_len_matches_counts(ops in prop::collection::vec(arb_op(), 0..200)) {
        let (multiset, oracle) = apply(&ops);

        prop_assert_eq!(multiset.len(), oracle.values().sum::<usize>());
        prop_assert_eq!(multiset.distinct_len(), oracle.len());
        for v in -20i64..20 {
            let count = oracle.get(&v).copied().unwrap_or(0);
            prop_assert_eq!(multiset.contains(&Value::Integer(v)), count > 0);
            prop_assert_eq!(multiset.count_of(&Value::Integer(v)), count);
        }
    }

    #[test]
    fn prop_extrapolation_expands_runs_in_order(ops in prop::collection::vec(arb_op(), 0..200)) {
        let (mut multiset, oracle) = apply(&ops);
        multiset.finalize_collection().unwrap();

        let expected: Vec<Value> = oracle
            .iter()
            .flat_map(|(&v, &count)| std::iter::repeat(Value::Integer(v)).take(count))
            .collect();
        let expanded: Vec<Value> = multiset.cursor().unwrap().collect();
        prop_assert_eq!(&expanded, &expected);

        for pair in expanded.windows(2) {
            prop_assert!(pair[0].as_f64() <= pair[1].as_f64());
        }
    }

    #[test]
    fn prop_mode_is_smallest_most_frequent(ops in prop::collection::vec(arb_op(), 0..200)) {
        let (mut multiset, oracle) = apply(&ops);
        multiset.finalize_collection().unwrap();

        let max_count = oracle.values().copied().max();
        let expected = max_count
            .and_then(|max| oracle.iter().find(|(_, &count)| count == max))
            .map_or(Value::Null, |(&v, _)| Value::Integer(v));
        prop_assert_eq!(multiset.extrapolated_mode().unwrap(), expected);
    }
}
