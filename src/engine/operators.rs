// Copyright © 2024 Pathway

use itertools::{EitherOrBoth, Itertools};
use log::debug;

use super::error::Result;
use super::graph::{Operator, Stream, StreamReader, StreamWriter};
use super::multiset::MultiSet;
use super::value::Value;

pub mod distinct;
pub mod join;
pub mod reduce;
pub mod topk;

pub use self::join::JoinType;
pub use self::topk::{
    FractionalTopKOptions, TopKBacking, TopKOptions, TopKWindowHandle,
};

/// Shared core of the stateless unary operators: every drained batch goes
/// through one transform.
struct LinearUnaryOperator<F> {
    name: &'static str,
    input: StreamReader,
    output: StreamWriter,
    transform: F,
}

impl<F> Operator for LinearUnaryOperator<F>
where
    F: FnMut(MultiSet) -> MultiSet,
{
    fn name(&self) -> &str {
        self.name
    }

    fn run(&mut self) {
        for batch in self.input.drain() {
            self.output.send((self.transform)(batch));
        }
    }

    fn has_pending_work(&self) -> bool {
        self.input.has_batches()
    }
}

/// Merges all batches queued in a run into one consolidated batch.
struct ConsolidateOperator {
    input: StreamReader,
    output: StreamWriter,
}

impl Operator for ConsolidateOperator {
    fn name(&self) -> &str {
        "consolidate"
    }

    fn run(&mut self) {
        let mut union = MultiSet::new();
        for batch in self.input.drain() {
            union.extend(batch);
        }
        self.output.send(union.consolidate());
    }

    fn has_pending_work(&self) -> bool {
        self.input.has_batches()
    }
}

/// Pairs up the two inputs' queued batches positionally; a leftover batch
/// on either side passes through unchanged.
struct ConcatOperator {
    left: StreamReader,
    right: StreamReader,
    output: StreamWriter,
}

impl Operator for ConcatOperator {
    fn name(&self) -> &str {
        "concat"
    }

    fn run(&mut self) {
        let left = self.left.drain();
        let right = self.right.drain();
        for pair in left.into_iter().zip_longest(right) {
            let batch = match pair {
                EitherOrBoth::Both(lhs, rhs) => lhs.concat(rhs),
                EitherOrBoth::Left(batch) | EitherOrBoth::Right(batch) => batch,
            };
            self.output.send(batch);
        }
    }

    fn has_pending_work(&self) -> bool {
        self.left.has_batches() || self.right.has_batches()
    }
}

impl Stream {
    fn add_linear(
        &self,
        name: &'static str,
        transform: impl FnMut(MultiSet) -> MultiSet + 'static,
    ) -> Result<Self> {
        self.add_unary(|input, output| LinearUnaryOperator {
            name,
            input,
            output,
            transform,
        })
    }

    pub fn map(&self, mut f: impl FnMut(Value) -> Value + 'static) -> Result<Self> {
        self.add_linear("map", move |batch| batch.map(&mut f))
    }

    pub fn filter(&self, mut f: impl FnMut(&Value) -> bool + 'static) -> Result<Self> {
        self.add_linear("filter", move |batch| batch.filter(&mut f))
    }

    pub fn negate(&self) -> Result<Self> {
        self.add_linear("negate", MultiSet::negate)
    }

    /// Wraps each value as a `[key, value]` pair keyed by `key_fn`.
    pub fn key_by(&self, mut key_fn: impl FnMut(&Value) -> Value + 'static) -> Result<Self> {
        self.add_linear("key_by", move |batch| {
            batch.map(|value| {
                let key = key_fn(&value);
                Value::pair(key, value)
            })
        })
    }

    /// Side-effecting tap; data passes through unchanged.
    pub fn inspect(&self, mut f: impl FnMut(&MultiSet) + 'static) -> Result<Self> {
        self.add_linear("inspect", move |batch| {
            f(&batch);
            batch
        })
    }

    /// Logs every batch under `tag` at debug level.
    pub fn debug(&self, tag: impl Into<String>) -> Result<Self> {
        let tag = tag.into();
        self.add_linear("debug", move |batch| {
            debug!("{tag}: {batch:?}");
            batch
        })
    }

    /// Terminal callback receiving each batch; data still passes through.
    pub fn output(&self, mut f: impl FnMut(&MultiSet) + 'static) -> Result<Self> {
        self.add_linear("output", move |batch| {
            f(&batch);
            batch
        })
    }

    pub fn consolidate(&self) -> Result<Self> {
        self.add_unary(|input, output| ConsolidateOperator { input, output })
    }

    pub fn concat(&self, other: &Self) -> Result<Self> {
        self.add_binary(other, |left, right, output| ConcatOperator {
            left,
            right,
            output,
        })
    }
}
