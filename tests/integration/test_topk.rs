// Copyright © 2024 Pathway

use std::cmp::Ordering;

use deltaflow_engine::engine::{DataflowGraph, FractionalTopKOptions, TopKOptions, Value};

use crate::helpers::{batch, kv, Capture};

fn pair(key: &str, value: i64) -> Value {
    Value::pair(Value::from(key), Value::Int(value))
}

fn positioned(value: i64, position: i64) -> Value {
    Value::pair(Value::Int(value), Value::Int(position))
}

fn indexed(value: i64, frac: &str) -> Value {
    Value::pair(Value::Int(value), Value::from(frac))
}

#[test]
fn test_top_k_slices_per_key() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k(
        |lhs, rhs| lhs.cmp(rhs),
        TopKOptions {
            offset: 0,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[
        (kv("a", 5), 1),
        (kv("a", 3), 1),
        (kv("a", 1), 1),
        (kv("b", 9), 1),
    ]));
    graph.run()?;

    assert_eq!(
        capture.consolidated(),
        vec![(pair("a", 1), 1), (pair("a", 3), 1), (pair("b", 9), 1)]
    );
    Ok(())
}

#[test]
fn test_top_k_updates_incrementally() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k(
        |lhs, rhs| lhs.cmp(rhs),
        TopKOptions {
            offset: 0,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[
        (kv("a", 5), 1),
        (kv("a", 3), 1),
        (kv("a", 1), 1),
    ]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(pair("a", 1), 1), (pair("a", 3), 1)]
    );

    // a new minimum pushes the previous second entry out
    session.send(batch(&[(kv("a", 0), 1)]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(pair("a", 0), 1), (pair("a", 3), -1)]
    );

    // retracting an inside entry pulls the next one back in
    session.send(batch(&[(kv("a", 1), -1)]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(pair("a", 1), -1), (pair("a", 3), 1)]
    );

    assert_eq!(
        capture.consolidated(),
        vec![(pair("a", 0), 1), (pair("a", 3), 1)]
    );
    Ok(())
}

#[test]
fn test_top_k_honors_offset() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k(
        |lhs, rhs| lhs.cmp(rhs),
        TopKOptions {
            offset: 1,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[
        (kv("a", 10), 1),
        (kv("a", 20), 1),
        (kv("a", 30), 1),
        (kv("a", 40), 1),
    ]));
    graph.run()?;

    assert_eq!(
        capture.consolidated(),
        vec![(pair("a", 20), 1), (pair("a", 30), 1)]
    );
    Ok(())
}

#[test]
fn test_top_k_change_beyond_window_is_silent() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k(
        |lhs, rhs| lhs.cmp(rhs),
        TopKOptions {
            offset: 0,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[(kv("a", 1), 1), (kv("a", 2), 1)]));
    graph.run()?;
    assert_eq!(capture.batches().len(), 1);

    session.send(batch(&[(kv("a", 9), 1)]));
    graph.run()?;
    assert_eq!(capture.batches().len(), 1);
    Ok(())
}

#[test]
fn test_top_k_counts_rows_once() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k(|lhs, rhs| lhs.cmp(rhs), TopKOptions::default())?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[(kv("a", 1), 3), (kv("a", 2), 1)]));
    graph.run()?;

    assert_eq!(
        capture.consolidated(),
        vec![(pair("a", 1), 1), (pair("a", 2), 1)]
    );
    Ok(())
}

#[test]
fn test_top_k_breaks_comparator_ties_by_value() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    // a comparator that cannot tell values apart still slices reproducibly
    let top = stream.top_k(
        |_, _| Ordering::Equal,
        TopKOptions {
            offset: 0,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[
        (kv("a", 30), 1),
        (kv("a", 10), 1),
        (kv("a", 20), 1),
    ]));
    graph.run()?;

    assert_eq!(
        capture.consolidated(),
        vec![(pair("a", 10), 1), (pair("a", 20), 1)]
    );
    Ok(())
}

#[test]
fn test_top_k_descending() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k(
        |lhs, rhs| rhs.cmp(lhs),
        TopKOptions {
            offset: 0,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[
        (kv("a", 1), 1),
        (kv("a", 2), 1),
        (kv("a", 3), 1),
        (kv("a", 4), 1),
    ]));
    graph.run()?;

    assert_eq!(
        capture.consolidated(),
        vec![(pair("a", 3), 1), (pair("a", 4), 1)]
    );
    Ok(())
}

#[test]
fn test_top_k_with_index_reports_absolute_positions() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let top = stream.top_k_with_index(
        |lhs, rhs| lhs.cmp(rhs),
        TopKOptions {
            offset: 1,
            limit: 2,
        },
    )?;
    capture.attach(&top)?;
    graph.finalize()?;

    session.send(batch(&[
        (kv("a", 10), 1),
        (kv("a", 20), 1),
        (kv("a", 30), 1),
        (kv("a", 40), 1),
    ]));
    graph.run()?;

    assert_eq!(
        capture.consolidated(),
        vec![
            (Value::pair(Value::from("a"), positioned(20, 1)), 1),
            (Value::pair(Value::from("a"), positioned(30, 2)), 1),
        ]
    );
    Ok(())
}

#[test]
fn test_order_by_maintains_window() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let ordered = stream.order_by(
        |lhs, rhs| lhs.cmp(rhs),
        TopKOptions {
            offset: 0,
            limit: 3,
        },
    )?;
    capture.attach(&ordered)?;
    graph.finalize()?;

    session.send(batch(&[
        (Value::Int(5), 1),
        (Value::Int(1), 1),
        (Value::Int(4), 1),
        (Value::Int(2), 1),
    ]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(Value::Int(1), 1), (Value::Int(2), 1), (Value::Int(4), 1)]
    );

    session.send(batch(&[(Value::Int(3), 1)]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(Value::Int(3), 1), (Value::Int(4), -1)]
    );

    session.send(batch(&[(Value::Int(1), -1)]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(Value::Int(1), -1), (Value::Int(4), 1)]
    );

    assert_eq!(
        capture.consolidated(),
        vec![(Value::Int(2), 1), (Value::Int(3), 1), (Value::Int(4), 1)]
    );
    Ok(())
}

#[test]
fn test_order_by_with_index() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let ordered = stream.order_by_with_index(|lhs, rhs| lhs.cmp(rhs), TopKOptions::default())?;
    capture.attach(&ordered)?;
    graph.finalize()?;

    session.send(batch(&[
        (Value::Int(3), 1),
        (Value::Int(1), 1),
        (Value::Int(2), 1),
    ]));
    graph.run()?;
    assert_eq!(
        capture.consolidated(),
        vec![
            (positioned(1, 0), 1),
            (positioned(2, 1), 1),
            (positioned(3, 2), 1),
        ]
    );

    // removing the first value shifts every later position down
    session.send(batch(&[(Value::Int(1), -1)]));
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![
            (positioned(1, 0), -1),
            (positioned(2, 0), 1),
            (positioned(2, 1), -1),
            (positioned(3, 1), 1),
            (positioned(3, 2), -1),
        ]
    );
    Ok(())
}

#[test]
fn test_order_by_with_fractional_index() -> eyre::Result<()> {
    let graph = DataflowGraph::new();
    let (session, stream) = graph.new_input()?;
    let capture = Capture::default();
    let (ordered, handle) = stream
        .order_by_with_fractional_index(|lhs, rhs| lhs.cmp(rhs), FractionalTopKOptions::default())?;
    capture.attach(&ordered)?;
    graph.finalize()?;

    session.send(batch(&[
        (Value::Int(10), 1),
        (Value::Int(20), 1),
        (Value::Int(30), 1),
    ]));
    graph.run()?;
    assert_eq!(
        capture.consolidated(),
        vec![
            (indexed(10, "V"), 1),
            (indexed(20, "l"), 1),
            (indexed(30, "t"), 1),
        ]
    );

    // a value between two neighbors gets an index between theirs
    session.send(batch(&[(Value::Int(15), 1)]));
    graph.run()?;
    assert_eq!(capture.last_batch(), vec![(indexed(15, "d"), 1)]);

    // narrowing the window through the handle needs no new data
    handle.move_window(1, 2);
    graph.run()?;
    assert_eq!(
        capture.last_batch(),
        vec![(indexed(10, "V"), -1), (indexed(30, "t"), -1)]
    );
    assert_eq!(
        capture.consolidated(),
        vec![(indexed(15, "d"), 1), (indexed(20, "l"), 1)]
    );
    Ok(())
}
