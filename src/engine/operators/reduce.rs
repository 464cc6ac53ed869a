use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;

use crate::engine::graph::{Operator, Stream, StreamReader, StreamWriter};
use crate::engine::{Aggregate, Diff, Index, Key, MultiSet, Result, Value};

/// Recomputes a keyed fold per dirty key, emitting only the difference
/// against what was previously emitted for that key.
struct ReduceOperator<F> {
    name: &'static str,
    input: StreamReader,
    output: StreamWriter,
    /// Full input rows per key.
    state: Index,
    /// Shadow of the emitted output per key.
    previous: Index,
    logic: F,
}

impl<F> Operator for ReduceOperator<F>
where
    F: FnMut(&[(Value, Diff)]) -> Vec<(Value, Diff)>,
{
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self) {
        let mut delta = Index::new();
        for batch in self.input.drain() {
            delta.add_keyed_batch(batch);
        }
        if delta.is_empty() {
            return;
        }

        let keys: Vec<Value> = delta.keys().cloned().collect();
        self.state.append(delta);

        let mut out = MultiSet::new();
        for key in keys {
            let current = self.state.values_for(&key);
            // A key left without positively supported rows loses its group.
            let result = if current.iter().any(|(_, diff)| *diff > 0) {
                (self.logic)(&current)
            } else {
                Vec::new()
            };
            for (value, diff) in diff_previous(&self.previous, &key, result) {
                self.previous.add_value(key.clone(), value.clone(), diff);
                out.add(Value::pair(key.clone(), value), diff);
            }
        }
        debug!("{}: emitting {} changes", self.name, out.len());
        self.output.send(out);
    }

    fn has_pending_work(&self) -> bool {
        self.input.has_batches()
    }
}

/// Subtracts the previously emitted rows from `result` under structural
/// keys; a recomputation that lands on the same output emits nothing.
fn diff_previous(previous: &Index, key: &Value, result: Vec<(Value, Diff)>) -> Vec<(Value, Diff)> {
    let mut order: Vec<Key> = Vec::new();
    let mut buckets: HashMap<Key, (Value, Diff)> = HashMap::new();
    for (value, diff) in result {
        let bucket = Key::for_value(&value);
        match buckets.entry(bucket) {
            Entry::Occupied(mut slot) => slot.get_mut().1 += diff,
            Entry::Vacant(slot) => {
                order.push(bucket);
                slot.insert((value, diff));
            }
        }
    }
    for (value, diff) in previous.values_for(key) {
        let bucket = Key::for_value(&value);
        match buckets.entry(bucket) {
            Entry::Occupied(mut slot) => slot.get_mut().1 -= diff,
            Entry::Vacant(slot) => {
                order.push(bucket);
                slot.insert((value, -diff));
            }
        }
    }
    order
        .into_iter()
        .filter_map(|bucket| {
            let (value, diff) = buckets.remove(&bucket).expect("bucket order is unique");
            (diff != 0).then_some((value, diff))
        })
        .collect()
}

fn collect_column(rows: &[(Value, Diff)], position: usize) -> Vec<(Value, Diff)> {
    let mut column = MultiSet::new();
    for (row, diff) in rows {
        let columns = row
            .as_tuple()
            .expect("group_by premaps rows to column tuples");
        column.add(columns[position].clone(), *diff);
    }
    column.consolidate().into_entries()
}

// Lifts the group key's own fields into the result object; aggregate
// names win on collision.
fn merge_key_fields(entry: Value) -> Value {
    let Some((key, result)) = entry.as_pair() else {
        panic!("keyed operator expects [key, value] pairs, got {entry}");
    };
    let (Value::Object(key_fields), Value::Object(result_fields)) = (key, result) else {
        return entry;
    };
    let merged = Value::object(key_fields.iter().cloned().chain(result_fields.iter().cloned()));
    Value::pair(key.clone(), merged)
}

impl Stream {
    pub(crate) fn add_reduce(
        &self,
        name: &'static str,
        logic: impl FnMut(&[(Value, Diff)]) -> Vec<(Value, Diff)> + 'static,
    ) -> Result<Self> {
        self.add_unary(|input, output| ReduceOperator {
            name,
            input,
            output,
            state: Index::new(),
            previous: Index::new(),
            logic,
        })
    }

    /// Per dirty key, recomputes `f` over the key's full current rows and
    /// emits only the difference against the previous output. `f` only runs
    /// for keys with at least one positively supported row; a key left
    /// without any retracts its output.
    pub fn reduce(
        &self,
        f: impl FnMut(&[(Value, Diff)]) -> Vec<(Value, Diff)> + 'static,
    ) -> Result<Self> {
        self.add_reduce("reduce", f)
    }

    /// Row count per key, emitted as `[key, Int(n)]`.
    pub fn count(&self) -> Result<Self> {
        self.add_reduce("count", |rows| {
            let total: Diff = rows.iter().map(|(_, diff)| *diff).sum();
            vec![(Value::Int(total), 1)]
        })
    }

    /// Groups rows by `key_fn` and computes `aggregates` per group; output
    /// rows are `[group_key, Object{aggregate results}]`.
    pub fn group_by(
        &self,
        key_fn: impl Fn(&Value) -> Value + 'static,
        aggregates: Vec<Aggregate>,
    ) -> Result<Self> {
        let aggregates: Rc<[Aggregate]> = aggregates.into();
        let premapped = {
            let aggregates = aggregates.clone();
            self.map(move |value| {
                let columns: Vec<Value> = aggregates
                    .iter()
                    .map(|aggregate| aggregate.extract(&value))
                    .collect();
                Value::pair(key_fn(&value), Value::from(columns))
            })?
        };
        let reduced = premapped.add_reduce("group_by", move |rows| {
            // Rows below zero are not in the group and feed no column.
            let present: Vec<(Value, Diff)> = rows
                .iter()
                .filter(|(_, diff)| *diff > 0)
                .cloned()
                .collect();
            let fields = aggregates.iter().enumerate().map(|(position, aggregate)| {
                let column = collect_column(&present, position);
                (
                    aggregate.name().clone(),
                    aggregate.reducer().combine(&column),
                )
            });
            vec![(Value::object(fields), 1)]
        })?;
        reduced.map(merge_key_fields)
    }
}
