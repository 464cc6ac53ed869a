// Copyright © 2024 Pathway

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::value::Key;
use super::Value;

/// Signed multiplicity of a single entry.
pub type Diff = i64;

/// A batch of weighted values. Entry order carries no meaning; duplicates
/// and negative multiplicities are allowed until consolidation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiSet {
    entries: Vec<(Value, Diff)>,
}

impl MultiSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<(Value, Diff)>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(Value, Diff)] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<(Value, Diff)> {
        self.entries
    }

    pub fn iter(&self) -> std::slice::Iter<'_, (Value, Diff)> {
        self.entries.iter()
    }

    pub fn add(&mut self, value: Value, diff: Diff) {
        if diff != 0 {
            self.entries.push((value, diff));
        }
    }

    #[must_use]
    pub fn map(self, mut f: impl FnMut(Value) -> Value) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(value, diff)| (f(value), diff))
                .collect(),
        }
    }

    #[must_use]
    pub fn filter(self, mut f: impl FnMut(&Value) -> bool) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .filter(|(value, _)| f(value))
                .collect(),
        }
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self {
            entries: self
                .entries
                .into_iter()
                .map(|(value, diff)| (value, -diff))
                .collect(),
        }
    }

    pub fn extend(&mut self, other: Self) {
        self.entries.extend(other.entries);
    }

    #[must_use]
    pub fn concat(mut self, other: Self) -> Self {
        self.extend(other);
        self
    }

    /// Sums multiplicities of structurally equal values and drops entries
    /// that net out to zero, keeping the first-seen representative of each
    /// bucket. Batches of `[key, value]` pairs with scalar keys are bucketed
    /// by direct comparison; everything else goes through structural hashing.
    #[must_use]
    pub fn consolidate(self) -> Self {
        if self.entries.iter().all(is_scalar_keyed_pair) {
            self.consolidate_keyed()
        } else {
            self.consolidate_hashed()
        }
    }

    fn consolidate_keyed(self) -> Self {
        let mut order: Vec<(Value, Diff)> = Vec::with_capacity(self.entries.len());
        let mut buckets: HashMap<(Value, Value), usize> = HashMap::new();
        for (value, diff) in self.entries {
            let (key, val) = value.as_pair().expect("entry shape checked above");
            match buckets.entry((key.clone(), val.clone())) {
                Entry::Occupied(slot) => order[*slot.get()].1 += diff,
                Entry::Vacant(slot) => {
                    slot.insert(order.len());
                    order.push((value, diff));
                }
            }
        }
        order.retain(|(_, diff)| *diff != 0);
        Self { entries: order }
    }

    fn consolidate_hashed(self) -> Self {
        let mut order: Vec<(Value, Diff)> = Vec::with_capacity(self.entries.len());
        let mut buckets: HashMap<Key, usize> = HashMap::new();
        for (value, diff) in self.entries {
            match buckets.entry(Key::for_value(&value)) {
                Entry::Occupied(slot) => order[*slot.get()].1 += diff,
                Entry::Vacant(slot) => {
                    slot.insert(order.len());
                    order.push((value, diff));
                }
            }
        }
        order.retain(|(_, diff)| *diff != 0);
        Self { entries: order }
    }
}

fn is_scalar_keyed_pair(entry: &(Value, Diff)) -> bool {
    entry
        .0
        .as_pair()
        .is_some_and(|(key, _)| key.is_scalar())
}

impl FromIterator<(Value, Diff)> for MultiSet {
    fn from_iter<I: IntoIterator<Item = (Value, Diff)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for MultiSet {
    type Item = (Value, Diff);
    type IntoIter = std::vec::IntoIter<(Value, Diff)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a MultiSet {
    type Item = &'a (Value, Diff);
    type IntoIter = std::slice::Iter<'a, (Value, Diff)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
