// Copyright © 2024 Pathway

use deltaflow_engine::engine::{MultiSet, Value};

use crate::helpers::{batch, kv, sorted};

#[test]
fn test_consolidate_merges_and_drops_zeros() {
    let tuple = |i| Value::from(vec![Value::Int(i), Value::from("tag")]);
    let batch = batch(&[
        (tuple(1), 2),
        (tuple(2), 1),
        (tuple(1), -2),
        (tuple(3), 0),
    ]);
    assert_eq!(sorted(&batch), vec![(tuple(2), 1)]);
}

#[test]
fn test_consolidate_keeps_first_seen_representative() {
    let consolidated = batch(&[
        (Value::from("a"), 1),
        (Value::from("b"), 1),
        (Value::from("a"), 2),
    ])
    .consolidate();
    assert_eq!(
        consolidated.entries(),
        &[(Value::from("a"), 3), (Value::from("b"), 1)]
    );
}

#[test]
fn test_consolidate_scalar_keyed_pairs() {
    // every entry is a [scalar, value] pair, taking the composite-key path
    let consolidated = batch(&[
        (kv(1, "x"), 1),
        (kv(2, "y"), 1),
        (kv(1, "x"), 1),
        (kv(1, "z"), 1),
        (kv(2, "y"), -1),
    ])
    .consolidate();
    assert_eq!(
        consolidated.entries(),
        &[(kv(1, "x"), 2), (kv(1, "z"), 1)]
    );
}

#[test]
fn test_consolidate_structural_path_matches_keyed_path() {
    // tuple keys force structural hashing; equal batches consolidate equally
    let wide_key = |i| Value::pair(Value::from(vec![Value::Int(i)]), Value::from("v"));
    let consolidated = batch(&[
        (wide_key(1), 1),
        (wide_key(2), 1),
        (wide_key(1), -1),
    ]);
    assert_eq!(sorted(&consolidated), vec![(wide_key(2), 1)]);
}

#[test]
fn test_add_ignores_zero_diff() {
    let mut batch = MultiSet::new();
    batch.add(Value::Int(1), 0);
    assert!(batch.is_empty());
    batch.add(Value::Int(1), -2);
    assert_eq!(batch.len(), 1);
}

#[test]
fn test_map_filter_negate() {
    let batch = batch(&[(Value::Int(1), 1), (Value::Int(2), 2), (Value::Int(3), 1)]);

    let doubled = batch.clone().map(|value| {
        let i = value.as_int().expect("int batch");
        Value::Int(i * 2)
    });
    assert_eq!(
        sorted(&doubled),
        vec![(Value::Int(2), 1), (Value::Int(4), 2), (Value::Int(6), 1)]
    );

    let odd = batch.clone().filter(|value| {
        value.as_int().expect("int batch") % 2 == 1
    });
    assert_eq!(sorted(&odd), vec![(Value::Int(1), 1), (Value::Int(3), 1)]);

    let negated = batch.negate();
    assert_eq!(
        sorted(&negated),
        vec![(Value::Int(1), -1), (Value::Int(2), -2), (Value::Int(3), -1)]
    );
}

#[test]
fn test_concat_and_extend() {
    let left = batch(&[(Value::Int(1), 1)]);
    let right = batch(&[(Value::Int(1), 1), (Value::Int(2), -1)]);
    let merged = left.concat(right);
    assert_eq!(
        sorted(&merged),
        vec![(Value::Int(1), 2), (Value::Int(2), -1)]
    );

    let mut target = batch(&[(Value::Int(5), 1)]);
    target.extend(batch(&[(Value::Int(5), -1)]));
    assert_eq!(target.len(), 2);
    assert_eq!(sorted(&target), vec![]);
}

#[test]
fn test_from_iterator() {
    let batch: MultiSet = (1..=3).map(|i| (Value::Int(i), 1)).collect();
    assert_eq!(batch.len(), 3);
    let values: Vec<i64> = batch
        .iter()
        .map(|(value, _)| value.as_int().expect("int batch"))
        .collect();
    assert_eq!(values, vec![1, 2, 3]);
}
