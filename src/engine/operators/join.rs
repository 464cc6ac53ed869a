// Copyright © 2024 Pathway

use std::collections::HashSet;

use log::debug;

use crate::engine::graph::{Operator, Stream, StreamReader, StreamWriter};
use crate::engine::{Diff, Index, Key, MultiSet, Result, Value};

/// Which unmatched sides produce null-padded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
    /// Left rows with no right match, null-padded; no inner matches.
    Anti,
}

impl JoinType {
    fn emits_matches(self) -> bool {
        !matches!(self, Self::Anti)
    }

    fn pads_left(self) -> bool {
        matches!(self, Self::Left | Self::Full | Self::Anti)
    }

    fn pads_right(self) -> bool {
        matches!(self, Self::Right | Self::Full)
    }
}

struct JoinOperator {
    join_type: JoinType,
    left: StreamReader,
    right: StreamReader,
    output: StreamWriter,
    left_state: Index,
    right_state: Index,
}

impl Operator for JoinOperator {
    fn name(&self) -> &str {
        "join"
    }

    fn run(&mut self) {
        let left_delta = drain_to_index(&self.left);
        let right_delta = drain_to_index(&self.right);
        if left_delta.is_empty() && right_delta.is_empty() {
            return;
        }

        let mut out = MultiSet::new();
        // Matches split three ways so no pair is double counted; state
        // absorbs the deltas only after emission.
        if self.join_type.emits_matches() {
            out.extend(left_delta.join(&self.right_state));
            out.extend(self.left_state.join(&right_delta));
            out.extend(left_delta.join(&right_delta));
        }

        for key in touched_keys(&left_delta, &right_delta) {
            if self.join_type.pads_left() {
                pad_side(
                    &mut out,
                    &key,
                    &self.left_state,
                    &left_delta,
                    &self.right_state,
                    &right_delta,
                    pad_left,
                );
            }
            if self.join_type.pads_right() {
                pad_side(
                    &mut out,
                    &key,
                    &self.right_state,
                    &right_delta,
                    &self.left_state,
                    &left_delta,
                    pad_right,
                );
            }
        }

        self.left_state.append(left_delta);
        self.right_state.append(right_delta);

        debug!("join: emitting {} rows", out.len());
        self.output.send(out.consolidate());
    }

    fn has_pending_work(&self) -> bool {
        self.left.has_batches() || self.right.has_batches()
    }
}

fn drain_to_index(reader: &StreamReader) -> Index {
    let mut delta = Index::new();
    for batch in reader.drain() {
        delta.add_keyed_batch(batch);
    }
    delta
}

fn touched_keys(left: &Index, right: &Index) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for key in left.keys().chain(right.keys()) {
        if seen.insert(Key::for_value(key)) {
            keys.push(key.clone());
        }
    }
    keys
}

fn pad_left(key: &Value, value: &Value) -> Value {
    Value::pair(key.clone(), Value::pair(value.clone(), Value::None))
}

fn pad_right(key: &Value, value: &Value) -> Value {
    Value::pair(key.clone(), Value::pair(Value::None, value.clone()))
}

/// Null-row compensation for one side of the join. `my` is the padded
/// side, `their` the side whose presence gates the padding. Transitions of
/// their presence across zero retract or emit whole row sets, keeping the
/// cumulative null rows equal to the currently unmatched rows.
fn pad_side(
    out: &mut MultiSet,
    key: &Value,
    my_state: &Index,
    my_delta: &Index,
    their_state: &Index,
    their_delta: &Index,
    pad: impl Fn(&Value, &Value) -> Value,
) {
    let before = their_state.presence(key) != 0;
    let after = their_state.presence(key) + their_delta.presence(key) != 0;
    match (before, after) {
        // still unmatched: only my delta needs new null rows
        (false, false) => {
            for (value, diff) in my_delta.values_for(key) {
                out.add(pad(key, &value), diff);
            }
        }
        // their side appeared: retract every null row emitted so far
        (false, true) => {
            for (value, diff) in my_state.values_for(key) {
                out.add(pad(key, &value), -diff);
            }
        }
        // their side vanished: all of my current rows become unmatched
        (true, false) => {
            for (value, diff) in merged_rows(my_state, my_delta, key) {
                out.add(pad(key, &value), diff);
            }
        }
        (true, true) => {}
    }
}

fn merged_rows(state: &Index, delta: &Index, key: &Value) -> Vec<(Value, Diff)> {
    let mut batch = MultiSet::new();
    for (value, diff) in state.values_for(key) {
        batch.add(value, diff);
    }
    for (value, diff) in delta.values_for(key) {
        batch.add(value, diff);
    }
    batch.consolidate().into_entries()
}

impl Stream {
    /// Keyed incremental join. Both inputs carry `[key, value]` pairs;
    /// output rows are `[key, [left, right]]` with `None` padding on the
    /// unmatched side, multiplicities are products.
    pub fn join(&self, other: &Self, join_type: JoinType) -> Result<Self> {
        self.add_binary(other, |left, right, output| JoinOperator {
            join_type,
            left,
            right,
            output,
            left_state: Index::new(),
            right_state: Index::new(),
        })
    }
}
