//! Traversal engines (spec §4.J): a plain ascending-key DFS used for
//! iteration and `starts_with`'s continuation, and a beam-search DFS with a
//! per-byte penalty and a spending budget that the query façades in
//! `query.rs` build on for wildcard/regexp/near-neighbour/range lookups.
//!
//! Both walk the tree with an explicit stack rather than recursion, since a
//! long shared-prefix chain can nest arbitrarily deep.

use crate::error::Result;
use crate::node::{io, Constants, NodeClass};
use crate::stream::Stream;

struct Frame {
    /// `key` length to truncate back to once every child of this frame has
    /// been visited -- i.e. the length *before* this node's own prefix.
    key_len_before: usize,
    /// `key` length right after this node's own prefix was appended, and
    /// before any child's dispatch byte. Each child visit truncates back to
    /// this point first, undoing whatever the previous child contributed.
    key_len_after_prefix: usize,
    children: Vec<(u8, u64)>,
    next_idx: usize,
}

/// Ascending-key DFS over every leaf reachable from `start_addr`, prepending
/// `seed` to every yielded key. `seed` is the portion of the key already
/// consumed by ancestors above `start_addr` (empty when starting at the
/// root).
pub struct ChildrenIter<'s, S: Stream> {
    stream: &'s S,
    c: Constants,
    stack: Vec<Frame>,
    key: Vec<u8>,
    pending: Option<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

impl<'s, S: Stream> ChildrenIter<'s, S> {
    pub fn new(stream: &'s S, c: &Constants, seed: Vec<u8>, start_addr: u64) -> Result<Self> {
        let mut it = ChildrenIter {
            stream,
            c: *c,
            stack: Vec::new(),
            key: seed,
            pending: None,
            done: false,
        };
        it.pending = it.enter(start_addr)?;
        Ok(it)
    }

    fn enter(&mut self, addr: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let class = io::read_tag(self.stream, addr)?;
        if class == NodeClass::Leaf {
            let leaf = io::read_leaf(self.stream, addr)?;
            let stored = &leaf.partial_key[..leaf.partial_key.len() - 1];
            self.key.extend_from_slice(stored);
            let out = (self.key.clone(), leaf.value.clone());
            self.key.truncate(self.key.len() - stored.len());
            return Ok(Some(out));
        }
        let node = io::read_inner(self.stream, addr, &self.c, class)?;
        let before = self.key.len();
        self.key.extend_from_slice(&node.prefix);
        let after = self.key.len();
        self.stack.push(Frame {
            key_len_before: before,
            key_len_after_prefix: after,
            children: node.children_ascending(),
            next_idx: 0,
        });
        Ok(None)
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some(item) = self.pending.take() {
            return Ok(Some(item));
        }
        loop {
            let frame = match self.stack.last_mut() {
                Some(f) => f,
                None => return Ok(None),
            };
            if frame.next_idx >= frame.children.len() {
                let before = frame.key_len_before;
                self.stack.pop();
                self.key.truncate(before);
                continue;
            }
            let after_prefix = frame.key_len_after_prefix;
            let (byte, addr) = frame.children[frame.next_idx];
            frame.next_idx += 1;
            self.key.truncate(after_prefix);
            self.key.push(byte);
            if let Some(item) = self.enter(addr)? {
                return Ok(Some(item));
            }
        }
    }
}

impl<'s, S: Stream> Iterator for ChildrenIter<'s, S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// What kind of byte a [`FilterItem`] penalty call is being asked about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    /// One byte of an inner node's prefix, or a child dispatch byte.
    Byte,
    /// One final call against a whole leaf key, after all of its bytes have
    /// individually passed (or been admitted despite failing). Lets a
    /// penalty function apply whole-key corrections -- e.g. penalising a
    /// match that came out shorter than the pattern it was scored against.
    LeafFinal,
}

/// What a penalty closure sees at each step of a [`FilterableDfs`] walk.
pub struct FilterItem<'a> {
    /// The key built so far, including the byte this call is about (for
    /// `Byte`) or the complete leaf key (for `LeafFinal`).
    pub accumulated: &'a [u8],
    /// Length of `accumulated` before this call's own contribution.
    pub accepted_len: usize,
    pub kind: FilterKind,
}

struct FFrame {
    key_len_before: usize,
    key_len_after_prefix: usize,
    budget_after_prefix: i64,
    children: Vec<(u8, u64)>,
    next_idx: usize,
}

/// Beam-search DFS: every byte visited (inner-node prefix, child dispatch,
/// or leaf tail) is charged a non-negative cost by `penalty`; a subtree is
/// pruned the moment its running budget would go negative. Leaves get one
/// extra `LeafFinal` call once all of their bytes have been charged, so a
/// penalty function can apply whole-key corrections before a match is
/// accepted.
pub struct FilterableDfs<'s, S: Stream> {
    stream: &'s S,
    c: Constants,
    stack: Vec<FFrame>,
    key: Vec<u8>,
    penalty: Box<dyn FnMut(&FilterItem) -> i64 + 's>,
    pending: Option<(Vec<u8>, Vec<u8>)>,
    done: bool,
}

fn charge_bytes(
    key: &mut Vec<u8>,
    bytes: &[u8],
    mut budget: i64,
    accepted_len: usize,
    penalty: &mut dyn FnMut(&FilterItem) -> i64,
) -> Option<i64> {
    for &b in bytes {
        key.push(b);
        let item = FilterItem {
            accumulated: key.as_slice(),
            accepted_len,
            kind: FilterKind::Byte,
        };
        budget -= penalty(&item);
        if budget < 0 {
            return None;
        }
    }
    Some(budget)
}

impl<'s, S: Stream> FilterableDfs<'s, S> {
    pub fn new(
        stream: &'s S,
        c: &Constants,
        seed: Vec<u8>,
        start_addr: u64,
        budget: i64,
        penalty: impl FnMut(&FilterItem) -> i64 + 's,
    ) -> Result<Self> {
        let mut it = FilterableDfs {
            stream,
            c: *c,
            stack: Vec::new(),
            key: seed,
            penalty: Box::new(penalty),
            pending: None,
            done: false,
        };
        it.pending = it.enter(start_addr, budget)?;
        Ok(it)
    }

    fn enter(&mut self, addr: u64, budget: i64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let class = io::read_tag(self.stream, addr)?;
        let accepted_len = self.key.len();
        let saved = self.key.len();

        if class == NodeClass::Leaf {
            let leaf = io::read_leaf(self.stream, addr)?;
            let stored = &leaf.partial_key[..leaf.partial_key.len() - 1];
            let after_bytes = match charge_bytes(&mut self.key, stored, budget, accepted_len, self.penalty.as_mut()) {
                Some(b) => b,
                None => {
                    self.key.truncate(saved);
                    return Ok(None);
                }
            };
            let final_item = FilterItem {
                accumulated: self.key.as_slice(),
                accepted_len,
                kind: FilterKind::LeafFinal,
            };
            let remaining = after_bytes - (self.penalty)(&final_item);
            if remaining < 0 {
                self.key.truncate(saved);
                return Ok(None);
            }
            let out = (self.key.clone(), leaf.value.clone());
            self.key.truncate(saved);
            return Ok(Some(out));
        }

        let node = io::read_inner(self.stream, addr, &self.c, class)?;
        let after_prefix_budget =
            match charge_bytes(&mut self.key, &node.prefix, budget, accepted_len, self.penalty.as_mut()) {
                Some(b) => b,
                None => {
                    self.key.truncate(saved);
                    return Ok(None);
                }
            };
        let key_len_after_prefix = self.key.len();
        self.stack.push(FFrame {
            key_len_before: saved,
            key_len_after_prefix,
            budget_after_prefix: after_prefix_budget,
            children: node.children_ascending(),
            next_idx: 0,
        });
        Ok(None)
    }

    fn advance(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if let Some(item) = self.pending.take() {
            return Ok(Some(item));
        }
        loop {
            let frame = match self.stack.last_mut() {
                Some(f) => f,
                None => return Ok(None),
            };
            if frame.next_idx >= frame.children.len() {
                let before = frame.key_len_before;
                self.stack.pop();
                self.key.truncate(before);
                continue;
            }
            let (byte, addr) = frame.children[frame.next_idx];
            let budget = frame.budget_after_prefix;
            let after_prefix = frame.key_len_after_prefix;
            frame.next_idx += 1;
            self.key.truncate(after_prefix);
            let accepted_len = self.key.len();
            self.key.push(byte);
            let cost = {
                let item = FilterItem {
                    accumulated: self.key.as_slice(),
                    accepted_len,
                    kind: FilterKind::Byte,
                };
                (self.penalty)(&item)
            };
            let child_budget = budget - cost;
            if child_budget < 0 {
                self.key.truncate(after_prefix);
                continue;
            }
            if let Some(item) = self.enter(addr, child_budget)? {
                return Ok(Some(item));
            }
        }
    }
}

impl<'s, S: Stream> Iterator for FilterableDfs<'s, S> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insert::insert;
    use crate::node::Constants;
    use crate::store::Store;
    use crate::stream::MemStream;

    fn build(pairs: &[(&[u8], &[u8])]) -> (MemStream, Constants) {
        let c = Constants::default();
        let mut stream = MemStream::new();
        let mut store = Store::new(c.p as u64, &c);
        for &(k, v) in pairs {
            let mut ek = Vec::new();
            c.escape_alphabet().escape(k, &mut ek);
            insert(&mut stream, &mut store, &c, &ek, v, false).unwrap();
        }
        (stream, c)
    }

    #[test]
    fn children_iter_visits_every_leaf_in_ascending_order() {
        let (stream, c) = build(&[
            (b"banana", b"1"),
            (b"bandana", b"2"),
            (b"bank", b"3"),
            (b"apple", b"0"),
        ]);
        let root = io::read_root(&stream, &c).unwrap();
        let items: Vec<_> = ChildrenIter::new(&stream, &c, Vec::new(), root)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        let keys: Vec<Vec<u8>> = items.into_iter().map(|(k, _)| k).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(keys.iter().any(|k| k == b"banana"));
        assert!(keys.iter().any(|k| k == b"bandana"));
        assert!(keys.iter().any(|k| k == b"bank"));
        assert!(keys.iter().any(|k| k == b"apple"));
    }

    #[test]
    fn children_iter_handles_a_single_leaf_root() {
        let (stream, c) = build(&[(b"solo", b"1")]);
        let root = io::read_root(&stream, &c).unwrap();
        let items: Vec<_> = ChildrenIter::new(&stream, &c, Vec::new(), root)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(items, vec![(b"solo".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn filterable_dfs_prunes_everything_when_budget_is_exhausted() {
        let (stream, c) = build(&[(b"banana", b"1"), (b"bandana", b"2")]);
        let root = io::read_root(&stream, &c).unwrap();
        let iter = FilterableDfs::new(&stream, &c, Vec::new(), root, 0, |item: &FilterItem| {
            if matches!(item.kind, FilterKind::Byte) {
                1
            } else {
                0
            }
        })
        .unwrap();
        let items: Vec<_> = iter.collect::<Result<_>>().unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn filterable_dfs_accepts_within_budget() {
        let (stream, c) = build(&[(b"banana", b"1"), (b"bandana", b"2")]);
        let root = io::read_root(&stream, &c).unwrap();
        let iter = FilterableDfs::new(&stream, &c, Vec::new(), root, i64::MAX / 4, |_: &FilterItem| 0).unwrap();
        let items: Vec<_> = iter.collect::<Result<_>>().unwrap();
        assert_eq!(items.len(), 2);
    }
}
