use formula_aggregate::{
    Accumulator, AggregateError, AggregateKind, ConfidenceLevel, Value, ValueError, ValueType,
    NULL_SENTINEL,
};
use pretty_assertions::assert_eq;

fn run(kind: AggregateKind, values: &[Value], target: ValueType, distinct: bool) -> Value {
    let mut acc = Accumulator::new(kind, target);
    for value in values {
        acc.add(value, distinct).unwrap();
    }
    acc.finalize(target, distinct).unwrap()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Integer).collect()
}

fn as_f64(value: &Value) -> f64 {
    value.as_f64().expect("numeric result")
}

fn assert_close(actual: &Value, expected: f64) {
    let actual = as_f64(actual);
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn sum_keeps_integer_representation() {
    let result = run(AggregateKind::Sum, &ints(&[1, 2, 3]), ValueType::Integer, false);
    assert_eq!(result, Value::Integer(6));
}

#[test]
fn sum_converts_later_values_to_running_type() {
    let values = vec![Value::Integer(1), Value::double(2.5), Value::from("3")];
    let result = run(AggregateKind::Sum, &values, ValueType::Double, false);
    assert_eq!(result, Value::double(6.5));
}

#[test]
fn sum_overflow_propagates() {
    let mut acc = Accumulator::new(AggregateKind::Sum, ValueType::Integer);
    acc.add(&Value::Integer(i64::MAX), false).unwrap();
    let err = acc.add(&Value::Integer(1), false).unwrap_err();
    assert!(matches!(err, AggregateError::Value(ValueError::Overflow)));
    assert_eq!(acc.count(), 1);
}

#[test]
fn avg_divides_promoted_sum() {
    let values = ints(&[1, 2, 3]);
    assert_eq!(
        run(AggregateKind::Avg, &values, ValueType::Double, false),
        Value::double(2.0)
    );
    assert_eq!(
        run(AggregateKind::Avg, &values, ValueType::Integer, false),
        Value::Integer(2)
    );
}

#[test]
fn avg_does_not_overflow_integer_inputs() {
    let values = ints(&[i64::MAX, i64::MAX]);
    let result = run(AggregateKind::Avg, &values, ValueType::Double, false);
    assert_eq!(result, Value::double(i64::MAX as f64));
}

#[test]
fn min_and_max_track_extremes() {
    let values = ints(&[4, -2, 9, 0]);
    assert_eq!(
        run(AggregateKind::Min, &values, ValueType::Integer, false),
        Value::Integer(-2)
    );
    assert_eq!(
        run(AggregateKind::Max, &values, ValueType::Integer, false),
        Value::Integer(9)
    );

    let words = vec![Value::from("pear"), Value::from("apple"), Value::from("zucchini")];
    assert_eq!(
        run(AggregateKind::Min, &words, ValueType::Text, false),
        Value::from("apple")
    );
}

#[test]
fn min_with_incomparable_values_propagates() {
    let mut acc = Accumulator::new(AggregateKind::Min, ValueType::Integer);
    acc.add(&Value::Integer(1), false).unwrap();
    let err = acc.add(&Value::from("x"), false).unwrap_err();
    assert!(matches!(
        err,
        AggregateError::Value(ValueError::Incomparable { .. })
    ));
}

#[test]
fn boolean_folds() {
    let values = vec![Value::Boolean(true), Value::Integer(1), Value::from("false")];
    assert_eq!(
        run(AggregateKind::BoolAnd, &values, ValueType::Boolean, false),
        Value::Boolean(false)
    );
    assert_eq!(
        run(AggregateKind::BoolOr, &values, ValueType::Boolean, false),
        Value::Boolean(true)
    );
}

#[test]
fn bitwise_folds() {
    let values = ints(&[0b1100, 0b1010, 0b1110]);
    assert_eq!(
        run(AggregateKind::BitAnd, &values, ValueType::Integer, false),
        Value::Integer(0b1000)
    );
    assert_eq!(
        run(AggregateKind::BitOr, &values, ValueType::Integer, false),
        Value::Integer(0b1110)
    );
}

#[test]
fn variance_family_matches_known_values() {
    let values = ints(&[1, 2, 3]);
    assert_close(
        &run(AggregateKind::VarPop, &values, ValueType::Double, false),
        2.0 / 3.0,
    );
    assert_eq!(
        run(AggregateKind::VarSamp, &values, ValueType::Double, false),
        Value::double(1.0)
    );
    assert_close(
        &run(AggregateKind::StddevPop, &values, ValueType::Double, false),
        (2.0f64 / 3.0).sqrt(),
    );
    assert_eq!(
        run(AggregateKind::StddevSamp, &values, ValueType::Double, false),
        Value::double(1.0)
    );
}

#[test]
fn welford_is_stable_for_large_offsets() {
    let values: Vec<Value> = [4.0, 7.0, 13.0, 16.0]
        .iter()
        .map(|x| Value::double(1e9 + x))
        .collect();
    assert_close(
        &run(AggregateKind::VarSamp, &values, ValueType::Double, false),
        30.0,
    );
}

#[test]
fn sample_statistics_need_two_rows() {
    let one = ints(&[5]);
    assert_eq!(
        run(AggregateKind::StddevSamp, &one, ValueType::Double, false),
        Value::Null
    );
    assert_eq!(
        run(AggregateKind::VarSamp, &one, ValueType::Double, false),
        Value::Null
    );
    assert_eq!(
        run(AggregateKind::VarPop, &one, ValueType::Double, false),
        Value::double(0.0)
    );
}

#[test]
fn empty_groups_yield_null_marker() {
    for kind in [
        AggregateKind::Sum,
        AggregateKind::Avg,
        AggregateKind::Min,
        AggregateKind::Max,
        AggregateKind::BoolAnd,
        AggregateKind::BoolOr,
        AggregateKind::BitAnd,
        AggregateKind::BitOr,
        AggregateKind::StddevPop,
        AggregateKind::StddevSamp,
        AggregateKind::VarPop,
        AggregateKind::VarSamp,
    ] {
        assert_eq!(
            run(kind, &[], ValueType::Double, false),
            Value::Null,
            "{kind}"
        );
    }
}

#[test]
fn empty_groups_yield_text_sentinel_for_interval_and_means() {
    for kind in [
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P95),
        AggregateKind::GeoMean,
        AggregateKind::HarMean,
    ] {
        // The sentinel is returned as text even for a numeric target.
        assert_eq!(
            run(kind, &[Value::Null], ValueType::Double, false),
            Value::from(NULL_SENTINEL),
            "{kind}"
        );
    }
}

#[test]
fn null_rows_are_ignored() {
    let values = vec![Value::Null, Value::Integer(4), Value::Null, Value::Integer(6)];
    let mut acc = Accumulator::new(AggregateKind::Avg, ValueType::Double);
    for value in &values {
        acc.add(value, false).unwrap();
    }
    assert_eq!(acc.count(), 2);
    assert_eq!(acc.finalize(ValueType::Double, false).unwrap(), Value::double(5.0));
}

#[test]
fn geometric_and_harmonic_means() {
    assert_eq!(
        run(AggregateKind::GeoMean, &ints(&[4, 9]), ValueType::Double, false),
        Value::double(6.0)
    );
    assert_eq!(
        run(AggregateKind::HarMean, &ints(&[1, 4]), ValueType::Double, false),
        Value::double(1.6)
    );
    assert_eq!(
        run(AggregateKind::GeoMean, &ints(&[2, 3, 5]), ValueType::Double, false),
        Value::double(3.107)
    );
}

#[test]
fn confidence_intervals_use_z_table() {
    let values = ints(&[1, 2, 3]);
    let cases = [
        (ConfidenceLevel::P80, "(1.26, 2.74)"),
        (ConfidenceLevel::P95, "(0.868, 3.132)"),
        (ConfidenceLevel::P99_9, "(0.1, 3.9)"),
    ];
    for (level, expected) in cases {
        assert_eq!(
            run(
                AggregateKind::ConfidenceInterval(level),
                &values,
                ValueType::Text,
                false
            ),
            Value::from(expected),
            "{level:?}"
        );
    }
}

#[test]
fn single_row_confidence_interval_collapses_to_zero() {
    let result = run(
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P95),
        &ints(&[5]),
        ValueType::Text,
        false,
    );
    assert_eq!(result.as_str(), Some("(0.0, 0.0)"));
}

#[test]
fn large_confidence_bounds_use_scientific_notation() {
    let result = run(
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P95),
        &ints(&[100_000_000, 100_000_000]),
        ValueType::Text,
        false,
    );
    assert_eq!(result.as_str(), Some("(1.0E8, 1.0E8)"));
}

#[test]
fn geometric_mean_of_negative_product_rounds_to_zero() {
    let values = ints(&[-2, 8]);
    assert_eq!(
        run(AggregateKind::GeoMean, &values, ValueType::Double, false),
        Value::double(0.0)
    );
    assert_eq!(
        run(AggregateKind::GeoMean, &values, ValueType::Integer, false),
        Value::Integer(0)
    );
}

#[test]
fn interval_text_is_converted_to_target() {
    let mut acc = Accumulator::new(
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P90),
        ValueType::Double,
    );
    for value in ints(&[1, 2, 3]) {
        acc.add(&value, false).unwrap();
    }
    let err = acc.finalize(ValueType::Double, false).unwrap_err();
    assert!(matches!(
        err,
        AggregateError::Value(ValueError::Conversion { .. })
    ));
}

#[test]
fn distinct_replays_unique_values_only() {
    let values = ints(&[1, 1, 2, 2, 2, 3]);
    assert_eq!(
        run(AggregateKind::Sum, &values, ValueType::Integer, true),
        Value::Integer(6)
    );
    assert_eq!(
        run(AggregateKind::Sum, &values, ValueType::Integer, false),
        Value::Integer(11)
    );
    assert_eq!(
        run(AggregateKind::Avg, &values, ValueType::Double, true),
        Value::double(2.0)
    );
    assert_eq!(
        run(AggregateKind::VarSamp, &values, ValueType::Double, true),
        Value::double(1.0)
    );
}

#[test]
fn distinct_buffers_until_finalize() {
    let mut acc = Accumulator::new(AggregateKind::HarMean, ValueType::Double);
    for value in ints(&[4, 1, 4, 1]) {
        acc.add(&value, true).unwrap();
    }
    assert_eq!(acc.count(), 0);

    assert_eq!(acc.finalize(ValueType::Double, true).unwrap(), Value::double(1.6));
    assert_eq!(acc.count(), 2);
}

#[test]
fn distinct_with_only_nulls_is_empty() {
    let result = run(AggregateKind::GeoMean, &[Value::Null, Value::Null], ValueType::Double, true);
    assert_eq!(result, Value::from(NULL_SENTINEL));
}

#[test]
fn kinds_parse_from_sql_names() {
    for kind in AggregateKind::ALL {
        let parsed: AggregateKind = kind.name().parse().unwrap();
        assert_eq!(parsed, kind);
    }
    assert_eq!(
        "conf_int_99_5".parse::<AggregateKind>().unwrap(),
        AggregateKind::ConfidenceInterval(ConfidenceLevel::P99_5)
    );
    assert!(matches!(
        "MEDIAN".parse::<AggregateKind>(),
        Err(AggregateError::UnknownAggregate(_))
    ));
    assert!("CONF_INT_42".parse::<AggregateKind>().is_err());
}

#[test]
fn kinds_serialize_by_sql_name() {
    let json = serde_json::to_string(&AggregateKind::ConfidenceInterval(ConfidenceLevel::P99_9))
        .unwrap();
    assert_eq!(json, "\"CONF_INT_99_9\"");

    let kind: AggregateKind = serde_json::from_str("\"stddev_samp\"").unwrap();
    assert_eq!(kind, AggregateKind::StddevSamp);
    assert!(serde_json::from_str::<AggregateKind>("\"NOPE\"").is_err());
}
