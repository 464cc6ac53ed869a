use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::mem;

use smallvec::SmallVec;

use super::multiset::{Diff, MultiSet};
use super::value::Key;
use super::Value;

/// Consolidated rows of one key; almost always exactly one.
pub type ValueRows = SmallVec<[(Value, Diff); 1]>;

pub(crate) fn split_pair(value: Value) -> (Value, Value) {
    match value {
        Value::Tuple(entries) if entries.len() == 2 => {
            (entries[0].clone(), entries[1].clone())
        }
        other => panic!("keyed operator expects [key, value] pairs, got {other}"),
    }
}

/// Persistent keyed state. Per-key storage starts as an inline single row
/// and widens only when a key accumulates distinct rows, so the common
/// one-row-per-key case stays allocation-light.
#[derive(Clone, Debug, Default)]
pub struct Index {
    entries: HashMap<Value, KeyEntry>,
}

#[derive(Clone, Debug)]
struct KeyEntry {
    // net multiplicity across every row of the key
    presence: Diff,
    store: ValueStore,
}

#[derive(Clone, Debug)]
enum ValueStore {
    Single(Value, Diff),
    /// Rows grouped by the scalar head of their `[head, rest]` shape.
    Prefixed(HashMap<Value, PrefixSlot>),
    /// Arbitrary rows bucketed by structural key.
    Hashed(HashMap<Key, (Value, Diff)>),
}

#[derive(Clone, Debug)]
enum PrefixSlot {
    Single(Value, Diff),
    Hashed(HashMap<Key, (Value, Diff)>),
}

fn prefix_of(value: &Value) -> Option<&Value> {
    value
        .as_pair()
        .and_then(|(head, _)| head.is_scalar().then_some(head))
}

// A row netting to zero frees its slot instead of lingering in the map.
fn upsert(rows: &mut HashMap<Key, (Value, Diff)>, value: Value, diff: Diff) {
    match rows.entry(Key::for_value(&value)) {
        Entry::Occupied(mut slot) => {
            slot.get_mut().1 += diff;
            if slot.get().1 == 0 {
                slot.remove();
            }
        }
        Entry::Vacant(slot) => {
            if diff != 0 {
                slot.insert((value, diff));
            }
        }
    }
}

impl ValueStore {
    fn add(&mut self, value: Value, diff: Diff) {
        match self {
            Self::Single(row, d) if *row == value => *d += diff,
            Self::Single(..) => {
                let Self::Single(row, d) = mem::replace(self, Self::Single(Value::None, 0))
                else {
                    unreachable!()
                };
                *self = Self::promoted(row, d, value, diff);
            }
            Self::Prefixed(slots) => {
                if let Some(prefix) = prefix_of(&value) {
                    let prefix = prefix.clone();
                    match slots.entry(prefix) {
                        Entry::Occupied(mut slot) => {
                            slot.get_mut().add(value, diff);
                            if slot.get().is_empty() {
                                slot.remove();
                            }
                        }
                        Entry::Vacant(slot) => {
                            slot.insert(PrefixSlot::Single(value, diff));
                        }
                    }
                } else {
                    // a row without a usable prefix forces the general layout
                    self.demote_to_hashed(value, diff);
                }
            }
            Self::Hashed(rows) => upsert(rows, value, diff),
        }
    }

    // second distinct row of a key decides the wider layout
    fn promoted(row0: Value, diff0: Diff, row1: Value, diff1: Diff) -> Self {
        match (prefix_of(&row0), prefix_of(&row1)) {
            (Some(prefix0), Some(prefix1)) if prefix0 == prefix1 => {
                let prefix = prefix0.clone();
                let mut rows = HashMap::new();
                upsert(&mut rows, row0, diff0);
                upsert(&mut rows, row1, diff1);
                let mut slots = HashMap::new();
                slots.insert(prefix, PrefixSlot::Hashed(rows));
                Self::Prefixed(slots)
            }
            (Some(prefix0), Some(prefix1)) => {
                let (prefix0, prefix1) = (prefix0.clone(), prefix1.clone());
                let mut slots = HashMap::new();
                slots.insert(prefix0, PrefixSlot::Single(row0, diff0));
                slots.insert(prefix1, PrefixSlot::Single(row1, diff1));
                Self::Prefixed(slots)
            }
            _ => {
                let mut rows = HashMap::new();
                upsert(&mut rows, row0, diff0);
                upsert(&mut rows, row1, diff1);
                Self::Hashed(rows)
            }
        }
    }

    fn demote_to_hashed(&mut self, value: Value, diff: Diff) {
        let Self::Prefixed(slots) = mem::replace(self, Self::Single(Value::None, 0)) else {
            unreachable!()
        };
        let mut rows = HashMap::new();
        for slot in slots.into_values() {
            match slot {
                PrefixSlot::Single(row, d) => upsert(&mut rows, row, d),
                PrefixSlot::Hashed(sub) => {
                    for (row, d) in sub.into_values() {
                        upsert(&mut rows, row, d);
                    }
                }
            }
        }
        upsert(&mut rows, value, diff);
        *self = Self::Hashed(rows);
    }

    // Rows and slots netting to zero are removed on write, so emptiness
    // is structural.
    fn is_empty(&self) -> bool {
        match self {
            Self::Single(_, diff) => *diff == 0,
            Self::Prefixed(slots) => slots.is_empty(),
            Self::Hashed(rows) => rows.is_empty(),
        }
    }

    fn collect_rows(&self, rows: &mut ValueRows) {
        match self {
            Self::Single(row, diff) => {
                if *diff != 0 {
                    rows.push((row.clone(), *diff));
                }
            }
            Self::Prefixed(slots) => {
                for slot in slots.values() {
                    match slot {
                        PrefixSlot::Single(row, diff) => {
                            if *diff != 0 {
                                rows.push((row.clone(), *diff));
                            }
                        }
                        PrefixSlot::Hashed(sub) => {
                            rows.extend(
                                sub.values()
                                    .filter(|(_, diff)| *diff != 0)
                                    .cloned(),
                            );
                        }
                    }
                }
            }
            Self::Hashed(sub) => {
                rows.extend(sub.values().filter(|(_, diff)| *diff != 0).cloned());
            }
        }
    }

    fn into_rows(self) -> Vec<(Value, Diff)> {
        let mut rows = Vec::new();
        match self {
            Self::Single(row, diff) => {
                if diff != 0 {
                    rows.push((row, diff));
                }
            }
            Self::Prefixed(slots) => {
                for slot in slots.into_values() {
                    match slot {
                        PrefixSlot::Single(row, diff) => {
                            if diff != 0 {
                                rows.push((row, diff));
                            }
                        }
                        PrefixSlot::Hashed(sub) => {
                            rows.extend(sub.into_values().filter(|(_, diff)| *diff != 0));
                        }
                    }
                }
            }
            Self::Hashed(sub) => {
                rows.extend(sub.into_values().filter(|(_, diff)| *diff != 0));
            }
        }
        rows
    }
}

impl PrefixSlot {
    fn add(&mut self, value: Value, diff: Diff) {
        match self {
            Self::Single(row, d) if *row == value => *d += diff,
            Self::Single(..) => {
                let Self::Single(row, d) = mem::replace(self, Self::Single(Value::None, 0))
                else {
                    unreachable!()
                };
                let mut rows = HashMap::new();
                upsert(&mut rows, row, d);
                upsert(&mut rows, value, diff);
                *self = Self::Hashed(rows);
            }
            Self::Hashed(rows) => upsert(rows, value, diff),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Single(_, diff) => *diff == 0,
            Self::Hashed(rows) => rows.is_empty(),
        }
    }
}

impl KeyEntry {
    fn rows(&self) -> ValueRows {
        let mut rows = ValueRows::new();
        self.store.collect_rows(&mut rows);
        rows
    }
}

impl Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_batch(batch: MultiSet) -> Self {
        let mut index = Self::new();
        index.add_keyed_batch(batch);
        index
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &Value> {
        self.entries.keys()
    }

    /// Net multiplicity of the key across all of its rows; zero means the
    /// key has no presence.
    pub fn presence(&self, key: &Value) -> Diff {
        self.entries.get(key).map_or(0, |entry| entry.presence)
    }

    /// Consolidated rows of the key with non-zero multiplicity.
    pub fn values_for(&self, key: &Value) -> ValueRows {
        self.entries
            .get(key)
            .map_or_else(ValueRows::new, KeyEntry::rows)
    }

    pub fn add_value(&mut self, key: Value, value: Value, diff: Diff) {
        if diff == 0 {
            return;
        }
        match self.entries.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(KeyEntry {
                    presence: diff,
                    store: ValueStore::Single(value, diff),
                });
            }
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.presence += diff;
                entry.store.add(value, diff);
                if entry.presence == 0 && entry.store.is_empty() {
                    slot.remove();
                }
            }
        }
    }

    /// Folds a batch of `[key, value]` entries in.
    pub fn add_keyed_batch(&mut self, batch: MultiSet) {
        for (value, diff) in batch {
            let (key, row) = split_pair(value);
            self.add_value(key, row, diff);
        }
    }

    /// Equi-join over shared keys, iterating the side with fewer keys.
    /// Emits `[key, [left, right]]` with multiplied diffs.
    pub fn join(&self, other: &Self) -> MultiSet {
        let mut result = MultiSet::new();
        let flipped = self.entries.len() > other.entries.len();
        let (smaller, larger) = if flipped { (other, self) } else { (self, other) };
        for (key, entry) in &smaller.entries {
            let Some(other_entry) = larger.entries.get(key) else {
                continue;
            };
            let rows = entry.rows();
            let other_rows = other_entry.rows();
            for (row, diff) in &rows {
                for (other_row, other_diff) in &other_rows {
                    let (left, right) = if flipped { (other_row, row) } else { (row, other_row) };
                    result.add(
                        Value::pair(key.clone(), Value::pair(left.clone(), right.clone())),
                        diff * other_diff,
                    );
                }
            }
        }
        result
    }

    /// Absorbs another index, typically a per-run delta.
    pub fn append(&mut self, other: Self) {
        for (key, entry) in other.entries {
            for (row, diff) in entry.store.into_rows() {
                self.add_value(key.clone(), row, diff);
            }
        }
    }
}
