use std::cmp::Ordering;
use std::rc::Rc;

use arcstr::ArcStr;
use ordered_float::OrderedFloat;

use super::{Diff, Value};

/// Builtin combiners for grouped columns.
///
/// A column is the consolidated multiset of one aggregate's input values
/// within a group: distinct values with their net multiplicities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Median,
    Mode,
}

impl Reducer {
    /// Combines one column. Values carried below a positive multiplicity
    /// are not part of the group and are dropped first; the remainder must
    /// not be empty.
    pub fn combine(self, column: &[(Value, Diff)]) -> Value {
        let present: Vec<(Value, Diff)> = column
            .iter()
            .filter(|(_, diff)| *diff > 0)
            .cloned()
            .collect();
        assert!(!present.is_empty(), "values should not be empty");
        match self {
            Self::Count => Value::Int(total_count(&present)),
            Self::Sum => sum(&present),
            Self::Avg => avg(&present),
            Self::Min => extremum(&present, Ordering::Less),
            Self::Max => extremum(&present, Ordering::Greater),
            Self::Median => median(&present),
            Self::Mode => mode(&present),
        }
    }
}

/// One output column of `group_by`: a name, a combiner, and an extractor
/// pulling the combiner's input out of each row.
#[derive(Clone)]
pub struct Aggregate {
    name: ArcStr,
    reducer: Reducer,
    input: Rc<dyn Fn(&Value) -> Value>,
}

impl Aggregate {
    pub fn new(
        name: impl Into<ArcStr>,
        reducer: Reducer,
        input: impl Fn(&Value) -> Value + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            reducer,
            input: Rc::new(input),
        }
    }

    /// Count ignores its input column.
    pub fn count(name: impl Into<ArcStr>) -> Self {
        Self::new(name, Reducer::Count, |_| Value::None)
    }

    pub fn sum(name: impl Into<ArcStr>, input: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(name, Reducer::Sum, input)
    }

    pub fn avg(name: impl Into<ArcStr>, input: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(name, Reducer::Avg, input)
    }

    pub fn min(name: impl Into<ArcStr>, input: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(name, Reducer::Min, input)
    }

    pub fn max(name: impl Into<ArcStr>, input: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(name, Reducer::Max, input)
    }

    pub fn median(name: impl Into<ArcStr>, input: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(name, Reducer::Median, input)
    }

    pub fn mode(name: impl Into<ArcStr>, input: impl Fn(&Value) -> Value + 'static) -> Self {
        Self::new(name, Reducer::Mode, input)
    }

    pub fn name(&self) -> &ArcStr {
        &self.name
    }

    pub fn reducer(&self) -> Reducer {
        self.reducer
    }

    pub fn extract(&self, row: &Value) -> Value {
        (self.input)(row)
    }
}

fn total_count(column: &[(Value, Diff)]) -> i64 {
    column.iter().map(|(_, diff)| *diff).sum()
}

#[allow(clippy::cast_precision_loss)]
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::BigInt(i) => Some(*i as f64),
        Value::Float(OrderedFloat(f)) => Some(*f),
        _ => None,
    }
}

/// Numbers compare numerically across `Int`, `BigInt` and `Float`;
/// everything else falls back to the structural value order.
fn value_order(lhs: &Value, rhs: &Value) -> Ordering {
    match (as_number(lhs), as_number(rhs)) {
        (Some(lhs), Some(rhs)) => OrderedFloat(lhs).cmp(&OrderedFloat(rhs)),
        _ => lhs.cmp(rhs),
    }
}

#[allow(clippy::cast_precision_loss)]
fn sum(column: &[(Value, Diff)]) -> Value {
    let exact = column
        .iter()
        .try_fold(0i128, |acc, (value, diff)| match value {
            Value::Int(i) => Some(acc + i128::from(*i) * i128::from(*diff)),
            Value::BigInt(i) => Some(acc + i * i128::from(*diff)),
            Value::Float(_) => None,
            other => panic!("unsupported type for sum: {other}"),
        });
    match exact {
        Some(total) => match i64::try_from(total) {
            Ok(total) => Value::Int(total),
            Err(_) => Value::BigInt(total),
        },
        None => {
            let total: f64 = column
                .iter()
                .map(|(value, diff)| match as_number(value) {
                    Some(number) => number * *diff as f64,
                    None => panic!("unsupported type for sum: {value}"),
                })
                .sum();
            Value::from(total)
        }
    }
}

// The column is all-positive by the time it gets here, so the count
// below cannot be zero.
#[allow(clippy::cast_precision_loss)]
fn avg(column: &[(Value, Diff)]) -> Value {
    let count = total_count(column);
    let total: f64 = column
        .iter()
        .map(|(value, diff)| match as_number(value) {
            Some(number) => number * *diff as f64,
            None => panic!("unsupported type for avg: {value}"),
        })
        .sum();
    Value::from(total / count as f64)
}

fn extremum(column: &[(Value, Diff)], keep: Ordering) -> Value {
    column
        .iter()
        .map(|(value, _)| value)
        .reduce(|best, value| {
            if value_order(value, best) == keep {
                value
            } else {
                best
            }
        })
        .expect("values should not be empty")
        .clone()
}

// Multiplicity-expanded median. Even cardinality averages the two middle
// values when both are numeric, otherwise keeps the lower one.
fn median(column: &[(Value, Diff)]) -> Value {
    let mut ordered: Vec<&(Value, Diff)> = column.iter().collect();
    ordered.sort_by(|(lhs, _), (rhs, _)| value_order(lhs, rhs));
    let total: Diff = ordered.iter().map(|(_, diff)| *diff).sum();
    assert!(total > 0, "values should not be empty");
    let upper = total / 2;
    let lower = if total % 2 == 0 { upper - 1 } else { upper };
    let mut lower_value: Option<&Value> = None;
    let mut seen = 0;
    for (value, diff) in ordered {
        seen += *diff;
        if lower_value.is_none() && seen > lower {
            lower_value = Some(value);
        }
        if seen > upper {
            let lower_value = lower_value.expect("lower middle precedes upper middle");
            if lower_value == value {
                return value.clone();
            }
            return match (as_number(lower_value), as_number(value)) {
                (Some(lo), Some(hi)) => Value::from((lo + hi) / 2.0),
                _ => lower_value.clone(),
            };
        }
    }
    unreachable!("median target not reached")
}

fn mode(column: &[(Value, Diff)]) -> Value {
    let mut best: Option<(&Value, Diff)> = None;
    for (value, diff) in column {
        let better = match best {
            None => true,
            Some((best_value, best_diff)) => {
                *diff > best_diff
                    || (*diff == best_diff && value_order(value, best_value) == Ordering::Less)
            }
        };
        if better {
            best = Some((value, *diff));
        }
    }
    best.expect("values should not be empty").0.clone()
}
