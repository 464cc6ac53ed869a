// Copyright © 2024 Pathway

//! Counted B+ tree: a sorted set with O(log n) rank queries, keyed by a
//! caller-supplied comparator.

use std::cmp::Ordering;
use std::rc::Rc;

pub type EntryCmp<K> = Rc<dyn Fn(&K, &K) -> Ordering>;

/// Rows per leaf and children per internal node before a split.
const BRANCHING: usize = 64;

enum Node<K, V> {
    Leaf {
        rows: Vec<(K, V)>,
    },
    Internal {
        /// `seps[i]` routes keys to `children[i + 1]` when they compare
        /// greater or equal. Removals leave separators in place, so one may
        /// drift below the actual minimum of its subtree; routing stays
        /// correct because keys never move between siblings.
        seps: Vec<K>,
        children: Vec<usize>,
        /// Entry count of each child's subtree, aligned with `children`.
        counts: Vec<usize>,
    },
}

/// Order-statistic tree over unique keys.
///
/// Nodes live in an arena indexed by `usize`; removal drops emptied nodes
/// onto a free list instead of rebalancing.
pub struct RankTree<K, V> {
    cmp: EntryCmp<K>,
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    root: usize,
    len: usize,
}

impl<K: Clone, V> RankTree<K, V> {
    pub fn new(cmp: EntryCmp<K>) -> Self {
        Self {
            cmp,
            nodes: vec![Some(Node::Leaf { rows: Vec::new() })],
            free: Vec::new(),
            root: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn node(&self, id: usize) -> &Node<K, V> {
        self.nodes[id].as_ref().expect("use of freed tree node")
    }

    fn node_mut(&mut self, id: usize) -> &mut Node<K, V> {
        self.nodes[id].as_mut().expect("use of freed tree node")
    }

    fn alloc(&mut self, node: Node<K, V>) -> usize {
        if let Some(id) = self.free.pop() {
            self.nodes[id] = Some(node);
            id
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn release(&mut self, id: usize) {
        self.nodes[id] = None;
        self.free.push(id);
    }

    fn count_of(&self, id: usize) -> usize {
        match self.node(id) {
            Node::Leaf { rows } => rows.len(),
            Node::Internal { counts, .. } => counts.iter().sum(),
        }
    }

    /// Rank of `key` if present, otherwise the rank it would occupy.
    pub fn locate(&self, key: &K) -> Result<usize, usize> {
        let mut id = self.root;
        let mut base = 0;
        loop {
            match self.node(id) {
                Node::Leaf { rows } => {
                    return match rows.binary_search_by(|(k, _)| (self.cmp)(k, key)) {
                        Ok(pos) => Ok(base + pos),
                        Err(pos) => Err(base + pos),
                    };
                }
                Node::Internal {
                    seps,
                    children,
                    counts,
                } => {
                    let pos = match seps.binary_search_by(|sep| (self.cmp)(sep, key)) {
                        Ok(pos) => pos + 1,
                        Err(pos) => pos,
                    };
                    base += counts[..pos].iter().sum::<usize>();
                    id = children[pos];
                }
            }
        }
    }

    /// Entry at `rank` in comparator order.
    pub fn get(&self, rank: usize) -> Option<(&K, &V)> {
        if rank >= self.len {
            return None;
        }
        let mut id = self.root;
        let mut rank = rank;
        loop {
            match self.node(id) {
                Node::Leaf { rows } => {
                    let (key, value) = &rows[rank];
                    return Some((key, value));
                }
                Node::Internal {
                    children, counts, ..
                } => {
                    let mut pos = 0;
                    while rank >= counts[pos] {
                        rank -= counts[pos];
                        pos += 1;
                    }
                    id = children[pos];
                }
            }
        }
    }

    /// Inserts a new entry and returns the rank it landed at.
    ///
    /// Keys are unique under the comparator; a duplicate means the caller
    /// lost track of its entries and panics.
    pub fn insert(&mut self, key: K, value: V) -> usize {
        let (rank, split) = self.insert_at(self.root, key, value, 0);
        if let Some((sep, right)) = split {
            let left = self.root;
            let counts = vec![self.count_of(left), self.count_of(right)];
            self.root = self.alloc(Node::Internal {
                seps: vec![sep],
                children: vec![left, right],
                counts,
            });
        }
        self.len += 1;
        rank
    }

    fn insert_at(&mut self, id: usize, key: K, value: V, base: usize) -> (usize, Option<(K, usize)>) {
        if matches!(self.node(id), Node::Internal { .. }) {
            self.insert_into_internal(id, key, value, base)
        } else {
            self.insert_into_leaf(id, key, value, base)
        }
    }

    fn insert_into_leaf(
        &mut self,
        id: usize,
        key: K,
        value: V,
        base: usize,
    ) -> (usize, Option<(K, usize)>) {
        let cmp = self.cmp.clone();
        let (rank, staged) = {
            let Node::Leaf { rows } = self.node_mut(id) else {
                unreachable!()
            };
            let pos = match rows.binary_search_by(|(k, _)| cmp(k, &key)) {
                Err(pos) => pos,
                Ok(_) => panic!("duplicate entry in rank tree"),
            };
            rows.insert(pos, (key, value));
            debug_assert!(pos == 0 || cmp(&rows[pos - 1].0, &rows[pos].0) == Ordering::Less);
            debug_assert!(
                pos + 1 == rows.len() || cmp(&rows[pos].0, &rows[pos + 1].0) == Ordering::Less
            );
            if rows.len() > BRANCHING {
                let right_rows = rows.split_off(rows.len() / 2);
                let sep = right_rows[0].0.clone();
                (base + pos, Some((sep, right_rows)))
            } else {
                (base + pos, None)
            }
        };
        match staged {
            Some((sep, right_rows)) => {
                let right = self.alloc(Node::Leaf { rows: right_rows });
                (rank, Some((sep, right)))
            }
            None => (rank, None),
        }
    }

    fn insert_into_internal(
        &mut self,
        id: usize,
        key: K,
        value: V,
        base: usize,
    ) -> (usize, Option<(K, usize)>) {
        let cmp = self.cmp.clone();
        let (child, pos, below) = {
            let Node::Internal {
                seps,
                children,
                counts,
            } = self.node(id)
            else {
                unreachable!()
            };
            let pos = match seps.binary_search_by(|sep| cmp(sep, &key)) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            };
            (children[pos], pos, counts[..pos].iter().sum::<usize>())
        };
        let (rank, child_split) = self.insert_at(child, key, value, base + below);

        let Some((sep, right)) = child_split else {
            let Node::Internal { counts, .. } = self.node_mut(id) else {
                unreachable!()
            };
            counts[pos] += 1;
            return (rank, None);
        };

        let right_count = self.count_of(right);
        let staged = {
            let Node::Internal {
                seps,
                children,
                counts,
            } = self.node_mut(id)
            else {
                unreachable!()
            };
            counts[pos] = counts[pos] + 1 - right_count;
            seps.insert(pos, sep);
            children.insert(pos + 1, right);
            counts.insert(pos + 1, right_count);
            if children.len() > BRANCHING {
                let mid = seps.len() / 2;
                let right_seps = seps.split_off(mid + 1);
                let promoted = seps.pop().expect("separator list nonempty at split");
                let right_children = children.split_off(mid + 1);
                let right_counts = counts.split_off(mid + 1);
                Some((promoted, right_seps, right_children, right_counts))
            } else {
                None
            }
        };
        match staged {
            Some((promoted, right_seps, right_children, right_counts)) => {
                let right = self.alloc(Node::Internal {
                    seps: right_seps,
                    children: right_children,
                    counts: right_counts,
                });
                (rank, Some((promoted, right)))
            }
            None => (rank, None),
        }
    }

    /// Removes `key`, returning its former rank and payload.
    pub fn remove(&mut self, key: &K) -> Option<(usize, V)> {
        let removed = self.remove_at(self.root, key, 0)?;
        self.len -= 1;
        if self.len == 0 {
            self.nodes.clear();
            self.free.clear();
            self.nodes.push(Some(Node::Leaf { rows: Vec::new() }));
            self.root = 0;
        } else {
            self.collapse_root();
        }
        Some(removed)
    }

    fn remove_at(&mut self, id: usize, key: &K, base: usize) -> Option<(usize, V)> {
        let cmp = self.cmp.clone();
        if matches!(self.node(id), Node::Leaf { .. }) {
            let Node::Leaf { rows } = self.node_mut(id) else {
                unreachable!()
            };
            return match rows.binary_search_by(|(k, _)| cmp(k, key)) {
                Ok(pos) => {
                    let (_, value) = rows.remove(pos);
                    Some((base + pos, value))
                }
                Err(_) => None,
            };
        }

        let (child, pos, below) = {
            let Node::Internal {
                seps,
                children,
                counts,
            } = self.node(id)
            else {
                unreachable!()
            };
            let pos = match seps.binary_search_by(|sep| cmp(sep, key)) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            };
            (children[pos], pos, counts[..pos].iter().sum::<usize>())
        };
        let removed = self.remove_at(child, key, base + below)?;

        let child_empty = self.count_of(child) == 0;
        {
            let Node::Internal {
                seps,
                children,
                counts,
            } = self.node_mut(id)
            else {
                unreachable!()
            };
            if child_empty {
                children.remove(pos);
                counts.remove(pos);
                if pos < seps.len() {
                    seps.remove(pos);
                } else {
                    seps.pop();
                }
            } else {
                counts[pos] -= 1;
            }
        }
        if child_empty {
            self.release(child);
        }
        Some(removed)
    }

    // A root left with a single child loses a level.
    fn collapse_root(&mut self) {
        loop {
            let only = match self.node(self.root) {
                Node::Internal { children, .. } if children.len() == 1 => children[0],
                _ => return,
            };
            let old = self.root;
            self.root = only;
            self.release(old);
        }
    }
}
