// Copyright © 2024 Pathway

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::engine::btree::{EntryCmp, RankTree};
use crate::engine::fractional::key_between;
use crate::engine::graph::{Operator, Stream, StreamReader, StreamWriter};
use crate::engine::index::split_pair;
use crate::engine::{Diff, Key, MultiSet, Result, Value};

/// Slice of the per-key ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopKOptions {
    pub offset: usize,
    pub limit: usize,
}

impl Default for TopKOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopKBacking {
    /// Binary search plus O(n) shifts; fine for small windows.
    #[default]
    SortedVec,
    /// Order-statistic B+ tree; O(log n) everywhere.
    Tree,
}

/// Options of the live fractional-index window.
pub struct FractionalTopKOptions {
    pub offset: usize,
    pub limit: usize,
    pub backing: TopKBacking,
    /// Called with the new total of tracked entries whenever it changes
    /// during a run.
    pub on_size: Option<Box<dyn FnMut(usize)>>,
}

impl Default for FractionalTopKOptions {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
            backing: TopKBacking::default(),
            on_size: None,
        }
    }
}

/// Control handle of a fractional topK window. Requests are applied at
/// the operator's next run and count as pending work.
#[derive(Clone)]
pub struct TopKWindowHandle {
    requests: Rc<RefCell<VecDeque<(usize, usize)>>>,
}

impl TopKWindowHandle {
    pub fn move_window(&self, offset: usize, limit: usize) {
        self.requests.borrow_mut().push_back((offset, limit));
    }
}

/// One tracked row of the global ordering: business key part, value part.
#[derive(Clone, PartialEq, Eq)]
struct SortEntry {
    key: Value,
    value: Value,
}

// Caller comparator on the value, then key and value as deterministic
// tie-breaks; distinct entries never compare equal.
fn entry_cmp(cmp: Rc<dyn Fn(&Value, &Value) -> Ordering>) -> EntryCmp<SortEntry> {
    Rc::new(move |lhs: &SortEntry, rhs: &SortEntry| {
        cmp(&lhs.value, &rhs.value)
            .then_with(|| lhs.key.cmp(&rhs.key))
            .then_with(|| lhs.value.cmp(&rhs.value))
    })
}

/// Ordered container behind the window; both backings keep one row per
/// entry with its fractional index string.
trait WindowStore {
    fn len(&self) -> usize;

    fn get(&self, rank: usize) -> Option<(&SortEntry, &str)>;

    fn locate(&self, entry: &SortEntry) -> Result<usize, usize>;

    fn insert(&mut self, entry: SortEntry, frac: String) -> usize;

    fn remove(&mut self, entry: &SortEntry) -> Option<(usize, String)>;
}

struct VecStore {
    cmp: EntryCmp<SortEntry>,
    rows: Vec<(SortEntry, String)>,
}

impl WindowStore for VecStore {
    fn len(&self) -> usize {
        self.rows.len()
    }

    fn get(&self, rank: usize) -> Option<(&SortEntry, &str)> {
        self.rows.get(rank).map(|(entry, frac)| (entry, frac.as_str()))
    }

    fn locate(&self, entry: &SortEntry) -> Result<usize, usize> {
        self.rows.binary_search_by(|(stored, _)| (self.cmp)(stored, entry))
    }

    fn insert(&mut self, entry: SortEntry, frac: String) -> usize {
        match self.locate(&entry) {
            Err(rank) => {
                self.rows.insert(rank, (entry, frac));
                rank
            }
            Ok(_) => panic!("duplicate entry in window ordering"),
        }
    }

    fn remove(&mut self, entry: &SortEntry) -> Option<(usize, String)> {
        match self.locate(entry) {
            Ok(rank) => {
                let (_, frac) = self.rows.remove(rank);
                Some((rank, frac))
            }
            Err(_) => None,
        }
    }
}

struct TreeStore {
    tree: RankTree<SortEntry, String>,
}

impl WindowStore for TreeStore {
    fn len(&self) -> usize {
        self.tree.len()
    }

    fn get(&self, rank: usize) -> Option<(&SortEntry, &str)> {
        self.tree.get(rank).map(|(entry, frac)| (entry, frac.as_str()))
    }

    fn locate(&self, entry: &SortEntry) -> Result<usize, usize> {
        self.tree.locate(entry)
    }

    fn insert(&mut self, entry: SortEntry, frac: String) -> usize {
        self.tree.insert(entry, frac)
    }

    fn remove(&mut self, entry: &SortEntry) -> Option<(usize, String)> {
        self.tree.remove(entry)
    }
}

struct TrackedEntry {
    key: Value,
    value: Value,
    mult: Diff,
}

/// Live window `[offset, offset + limit)` over one global ordering of all
/// tracked entries. Entries enter the ordering when their running
/// multiplicity turns positive and keep their fractional index string for
/// their whole tracked life, so re-entering the window re-emits the same
/// string and neighbors are never re-indexed.
struct FractionalTopKOperator {
    input: StreamReader,
    output: StreamWriter,
    offset: usize,
    limit: usize,
    store: Box<dyn WindowStore>,
    tracked: HashMap<Key, TrackedEntry>,
    requests: Rc<RefCell<VecDeque<(usize, usize)>>>,
    on_size: Option<Box<dyn FnMut(usize)>>,
}

impl Operator for FractionalTopKOperator {
    fn name(&self) -> &str {
        "top_k_with_fractional_index"
    }

    fn run(&mut self) {
        let mut out = MultiSet::new();
        let size_before = self.store.len();

        let mut order: Vec<Key> = Vec::new();
        let mut changes: HashMap<Key, (Value, Value, Diff)> = HashMap::new();
        for batch in self.input.drain() {
            for (entry, diff) in batch.into_entries() {
                let entry_key = Key::for_value(&entry);
                let (key, value) = split_pair(entry);
                match changes.entry(entry_key) {
                    Entry::Occupied(mut slot) => slot.get_mut().2 += diff,
                    Entry::Vacant(slot) => {
                        order.push(entry_key);
                        slot.insert((key, value, diff));
                    }
                }
            }
        }

        for entry_key in order {
            let (key, value, change) = changes.remove(&entry_key).expect("change order is unique");
            if change == 0 {
                continue;
            }
            let before = self.tracked.get(&entry_key).map_or(0, |tracked| tracked.mult);
            let after = before + change;
            let (key, value) = match self.tracked.get(&entry_key) {
                // the first-seen representative identifies the stored row
                Some(tracked) => (tracked.key.clone(), tracked.value.clone()),
                None => (key, value),
            };
            if after == 0 {
                self.tracked.remove(&entry_key);
            } else {
                match self.tracked.entry(entry_key) {
                    Entry::Occupied(slot) => slot.into_mut().mult = after,
                    Entry::Vacant(slot) => {
                        slot.insert(TrackedEntry {
                            key: key.clone(),
                            value: value.clone(),
                            mult: after,
                        });
                    }
                }
            }
            if before <= 0 && after > 0 {
                self.insert_entry(key, value, &mut out);
            } else if before > 0 && after <= 0 {
                self.remove_entry(key, value, &mut out);
            }
        }

        let size_after = self.store.len();
        if size_after != size_before {
            if let Some(on_size) = &mut self.on_size {
                on_size(size_after);
            }
        }

        let moves: Vec<(usize, usize)> = self.requests.borrow_mut().drain(..).collect();
        for (offset, limit) in moves {
            self.move_window(offset, limit, &mut out);
        }

        if !out.is_empty() {
            debug!("fractional top_k: emitting {} window events", out.len());
        }
        self.output.send(out.consolidate());
    }

    fn has_pending_work(&self) -> bool {
        self.input.has_batches() || !self.requests.borrow().is_empty()
    }
}

impl FractionalTopKOperator {
    fn event_at(&self, rank: usize) -> Option<Value> {
        let (entry, frac) = self.store.get(rank)?;
        Some(Value::pair(
            entry.key.clone(),
            Value::pair(entry.value.clone(), Value::from(frac)),
        ))
    }

    fn insert_entry(&mut self, key: Value, value: Value, out: &mut MultiSet) {
        let entry = SortEntry { key, value };
        let rank = match self.store.locate(&entry) {
            Err(rank) => rank,
            Ok(_) => panic!("entry already present in window ordering"),
        };
        let below = rank
            .checked_sub(1)
            .and_then(|rank| self.store.get(rank))
            .map(|(_, frac)| frac.to_string());
        let above = self.store.get(rank).map(|(_, frac)| frac.to_string());
        let frac = key_between(below.as_deref(), above.as_deref())
            .expect("window neighbors are ordered");
        let rank = self.store.insert(entry, frac);

        if self.limit == 0 {
            return;
        }
        let end = self.offset.saturating_add(self.limit);
        if rank >= end {
            return;
        }
        // the former last row of the window got pushed beyond the limit
        if let Some(event) = self.event_at(end) {
            out.add(event, -1);
        }
        let moved_in = if rank >= self.offset {
            self.event_at(rank)
        } else {
            // inserting below the offset shifts a pre-offset row in
            self.event_at(self.offset)
        };
        if let Some(event) = moved_in {
            out.add(event, 1);
        }
    }

    fn remove_entry(&mut self, key: Value, value: Value, out: &mut MultiSet) {
        let entry = SortEntry { key, value };
        let (rank, frac) = self
            .store
            .remove(&entry)
            .expect("tracked entry present in window ordering");

        if self.limit == 0 {
            return;
        }
        let end = self.offset.saturating_add(self.limit);
        if rank >= end {
            return;
        }
        if rank >= self.offset {
            out.add(
                Value::pair(entry.key, Value::pair(entry.value, Value::from(frac))),
                -1,
            );
        } else if let Some(event) = self.event_at(self.offset - 1) {
            // deleting below the offset shifts the first window row out
            out.add(event, -1);
        }
        if let Some(event) = self.event_at(end - 1) {
            out.add(event, 1);
        }
    }

    fn move_window(&mut self, offset: usize, limit: usize, out: &mut MultiSet) {
        let old_start = self.offset;
        let old_end = self.offset.saturating_add(self.limit);
        let new_start = offset;
        let new_end = offset.saturating_add(limit);
        self.offset = offset;
        self.limit = limit;
        debug!("window moved to offset {offset} limit {limit}");

        // symmetric difference of the two rank ranges
        self.emit_range(old_start, old_end.min(new_start), -1, out);
        self.emit_range(old_start.max(new_end), old_end, -1, out);
        self.emit_range(new_start, new_end.min(old_start), 1, out);
        self.emit_range(new_start.max(old_end), new_end, 1, out);
    }

    fn emit_range(&self, start: usize, end: usize, diff: Diff, out: &mut MultiSet) {
        let end = end.min(self.store.len());
        for rank in start..end {
            let event = self.event_at(rank).expect("rank below store length");
            out.add(event, diff);
        }
    }
}

fn sliced<'a>(
    rows: &'a [(Value, Diff)],
    cmp: &impl Fn(&Value, &Value) -> Ordering,
    offset: usize,
    limit: usize,
) -> impl Iterator<Item = &'a Value> {
    let mut values: Vec<&Value> = rows
        .iter()
        .filter(|(_, diff)| *diff > 0)
        .map(|(value, _)| value)
        .collect();
    // Comparator ties fall back to the value order, keeping the slice
    // boundary independent of row storage order.
    values.sort_by(|lhs, rhs| cmp(lhs, rhs).then_with(|| lhs.cmp(rhs)));
    values.into_iter().skip(offset).take(limit)
}

fn strip_sentinel(entry: Value) -> Value {
    let Some((_, payload)) = entry.as_pair() else {
        panic!("keyed operator expects [key, value] pairs, got {entry}");
    };
    payload.clone()
}

fn strip_sentinel_and_index(entry: Value) -> Value {
    let payload = strip_sentinel(entry);
    let Some((value, _)) = payload.as_pair() else {
        panic!("window events carry [value, index] payloads, got {payload}");
    };
    value.clone()
}

impl Stream {
    /// Per key: positive rows sorted by `cmp` with ties broken by the value
    /// order, sliced to `[offset, offset + limit)`, each surviving value
    /// emitted once.
    pub fn top_k(
        &self,
        cmp: impl Fn(&Value, &Value) -> Ordering + 'static,
        options: TopKOptions,
    ) -> Result<Self> {
        let TopKOptions { offset, limit } = options;
        self.add_reduce("top_k", move |rows| {
            sliced(rows, &cmp, offset, limit)
                .map(|value| (value.clone(), 1))
                .collect()
        })
    }

    /// Like `top_k`, with each value wrapped as
    /// `[value, Int(absolute position)]`.
    pub fn top_k_with_index(
        &self,
        cmp: impl Fn(&Value, &Value) -> Ordering + 'static,
        options: TopKOptions,
    ) -> Result<Self> {
        let TopKOptions { offset, limit } = options;
        self.add_reduce("top_k_with_index", move |rows| {
            sliced(rows, &cmp, offset, limit)
                .enumerate()
                .map(|(position, value)| {
                    let position =
                        i64::try_from(offset + position).expect("window position fits an i64");
                    (Value::pair(value.clone(), Value::Int(position)), 1)
                })
                .collect()
        })
    }

    /// Live window over one global ordering of all tracked entries;
    /// events are `[key, [value, String(frac)]]` with `±1` diffs.
    pub fn top_k_with_fractional_index(
        &self,
        cmp: impl Fn(&Value, &Value) -> Ordering + 'static,
        options: FractionalTopKOptions,
    ) -> Result<(Self, TopKWindowHandle)> {
        let FractionalTopKOptions {
            offset,
            limit,
            backing,
            on_size,
        } = options;
        let cmp = entry_cmp(Rc::new(cmp));
        let store: Box<dyn WindowStore> = match backing {
            TopKBacking::SortedVec => Box::new(VecStore {
                cmp,
                rows: Vec::new(),
            }),
            TopKBacking::Tree => Box::new(TreeStore {
                tree: RankTree::new(cmp),
            }),
        };
        let handle = TopKWindowHandle {
            requests: Rc::default(),
        };
        let requests = handle.requests.clone();
        let stream = self.add_unary(|input, output| FractionalTopKOperator {
            input,
            output,
            offset,
            limit,
            store,
            tracked: HashMap::new(),
            requests,
            on_size,
        })?;
        Ok((stream, handle))
    }

    /// Orders the whole stream under one sentinel key and emits the bare
    /// values of the window.
    pub fn order_by(
        &self,
        cmp: impl Fn(&Value, &Value) -> Ordering + 'static,
        options: TopKOptions,
    ) -> Result<Self> {
        let fractional = FractionalTopKOptions {
            offset: options.offset,
            limit: options.limit,
            ..Default::default()
        };
        let (windowed, _) = self
            .key_by(|_| Value::None)?
            .top_k_with_fractional_index(cmp, fractional)?;
        windowed.map(strip_sentinel_and_index)
    }

    /// Whole-stream ordering emitting `[value, String(frac)]` events.
    pub fn order_by_with_fractional_index(
        &self,
        cmp: impl Fn(&Value, &Value) -> Ordering + 'static,
        options: FractionalTopKOptions,
    ) -> Result<(Self, TopKWindowHandle)> {
        let (windowed, handle) = self
            .key_by(|_| Value::None)?
            .top_k_with_fractional_index(cmp, options)?;
        let stream = windowed.map(strip_sentinel)?;
        Ok((stream, handle))
    }

    /// Whole-stream ordering emitting `[value, Int(position)]` rows.
    pub fn order_by_with_index(
        &self,
        cmp: impl Fn(&Value, &Value) -> Ordering + 'static,
        options: TopKOptions,
    ) -> Result<Self> {
        self.key_by(|_| Value::None)?
            .top_k_with_index(cmp, options)?
            .map(strip_sentinel)
    }
}
