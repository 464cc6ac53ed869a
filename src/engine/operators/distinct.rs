use std::collections::hash_map::Entry;
use std::collections::HashMap;

use log::debug;

use crate::engine::graph::{Operator, Stream, StreamReader, StreamWriter};
use crate::engine::{Diff, Key, MultiSet, Result, Value};

/// Set semantics across batch boundaries: an entry is visible while its
/// running multiplicity is positive, however many batches and runs
/// contributed to it.
struct DistinctOperator {
    input: StreamReader,
    output: StreamWriter,
    /// Running multiplicity per structural entry key, with the first-seen
    /// representative entry. Zeroed entries are dropped.
    state: HashMap<Key, (Value, Diff)>,
}

impl Operator for DistinctOperator {
    fn name(&self) -> &str {
        "distinct"
    }

    fn run(&mut self) {
        let mut order: Vec<Key> = Vec::new();
        let mut changes: HashMap<Key, (Value, Diff)> = HashMap::new();
        for batch in self.input.drain() {
            for (value, diff) in batch.into_entries() {
                let entry_key = Key::for_value(&value);
                match changes.entry(entry_key) {
                    Entry::Occupied(mut slot) => slot.get_mut().1 += diff,
                    Entry::Vacant(slot) => {
                        order.push(entry_key);
                        slot.insert((value, diff));
                    }
                }
            }
        }

        let mut out = MultiSet::new();
        for entry_key in order {
            let (value, change) = changes.remove(&entry_key).expect("change order is unique");
            if change == 0 {
                continue;
            }
            let before = self.state.get(&entry_key).map_or(0, |(_, mult)| *mult);
            let after = before + change;
            let representative = if after == 0 {
                match self.state.remove(&entry_key) {
                    Some((representative, _)) => representative,
                    None => value,
                }
            } else {
                match self.state.entry(entry_key) {
                    Entry::Occupied(slot) => {
                        let stored = slot.into_mut();
                        stored.1 = after;
                        stored.0.clone()
                    }
                    Entry::Vacant(slot) => slot.insert((value, after)).0.clone(),
                }
            };
            if before <= 0 && after > 0 {
                out.add(representative, 1);
            } else if before > 0 && after <= 0 {
                out.add(representative, -1);
            }
        }
        debug!("distinct: emitting {} transitions", out.len());
        self.output.send(out);
    }

    fn has_pending_work(&self) -> bool {
        self.input.has_batches()
    }
}

impl Stream {
    /// Emits `+1` when an entry's running multiplicity first turns
    /// positive and `-1` when it falls back, nothing in between.
    pub fn distinct(&self) -> Result<Self> {
        self.add_unary(|input, output| DistinctOperator {
            input,
            output,
            state: HashMap::new(),
        })
    }
}
