//! Compaction and reload (spec §4.L). `optimise` rebuilds a tree
//! breadth-first into a fresh stream with no fragmentation, downgrading any
//! node whose child count never earned its current class along the way.
//! `reload` walks an already-built tree to recover its allocator state from
//! nothing but the root pointer, the way a process picking up an existing
//! file has to.

use std::collections::VecDeque;

use crate::allocator::Span;
use crate::error::{ArtError, Result};
use crate::node::{io, Constants, NodeClass};
use crate::store::Store;
use crate::stream::Stream;

/// Copies every reachable node from `src` into `dst`, starting at a bare
/// root pointer, in breadth-first order. Each node is allocated at `dst`'s
/// next free offset (a simple bump allocator -- there is no fragmentation to
/// manage in a fresh copy) before its children are visited, so the
/// destination offset of every child is already known by the time its
/// parent's slot needs rewriting; no separate address-remapping pass is
/// needed. Returns the final watermark, i.e. the size `dst` ends up with.
pub fn optimise<S: Stream, D: Stream>(src: &S, c: &Constants, dst: &mut D) -> Result<u64> {
    let mut watermark = c.p as u64;

    let root = io::read_root(src, c)?;
    if root == 0 {
        io::write_root(dst, 0, c)?;
        return Ok(watermark);
    }

    let mut queue: VecDeque<(u64, u64)> = VecDeque::new();
    queue.push_back((root, 0));

    while let Some((old_addr, dst_parent_ptr_addr)) = queue.pop_front() {
        let class = io::read_tag(src, old_addr)?;

        if class == NodeClass::Leaf {
            let leaf = io::read_leaf(src, old_addr)?;
            let new_addr = watermark;
            watermark += leaf.encoded_len();
            io::write_leaf(dst, new_addr, &leaf)?;
            io::write_pointer_at(dst, dst_parent_ptr_addr, new_addr, c)?;
            continue;
        }

        let mut node = io::read_inner(src, old_addr, c, class)?;
        while node.child_count() < node.class.downgrade_threshold() {
            node = node.downgraded();
        }

        let new_addr = watermark;
        watermark += node.class.node_size(c);
        io::write_inner(dst, new_addr, &node, c)?;
        io::write_pointer_at(dst, dst_parent_ptr_addr, new_addr, c)?;

        for (byte, old_child_addr) in node.children_ascending() {
            let slot_off = node
                .child_pointer_offset(byte, c)
                .expect("byte came from this node's own children_ascending()");
            queue.push_back((old_child_addr, new_addr + slot_off));
        }
    }

    Ok(watermark)
}

/// Recovers a [`Store`] for an already-written tree by walking every
/// reachable node from the root pointer and recording its span. Overlapping
/// spans mean the file is corrupt. `item_count` is the number of leaves
/// found.
pub fn reload<S: Stream>(stream: &S, c: &Constants) -> Result<(Store, u64)> {
    let capacity = stream.len();
    let root = io::read_root(stream, c)?;

    let mut spans: Vec<(u64, u64)> = Vec::new();
    let mut item_count = 0u64;

    if root != 0 {
        let mut stack = vec![root];
        while let Some(addr) = stack.pop() {
            let class = io::read_tag(stream, addr)?;
            if class == NodeClass::Leaf {
                let leaf = io::read_leaf(stream, addr)?;
                spans.push((addr, leaf.encoded_len()));
                item_count += 1;
            } else {
                let node = io::read_inner(stream, addr, c, class)?;
                spans.push((addr, node.class.node_size(c)));
                for (_, child_addr) in node.children_ascending() {
                    stack.push(child_addr);
                }
            }
        }
    }

    spans.sort_by_key(|&(start, _)| start);
    for w in spans.windows(2) {
        let (s0, l0) = w[0];
        let (s1, _) = w[1];
        if s0 + l0 > s1 {
            return Err(ArtError::FormatError(format!(
                "overlapping node spans at offset {s0} (len {l0}) and {s1}"
            )));
        }
    }

    let used: Vec<Span> = spans.iter().map(|&(start, len)| Span { start, len }).collect();
    let store = Store::load(&used, capacity, c);
    Ok((store, item_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delete::remove;
    use crate::insert::insert;
    use crate::path::find_path;
    use crate::stream::MemStream;

    fn fresh() -> (MemStream, Store, Constants) {
        let c = Constants::default();
        let store = Store::new(c.p as u64, &c);
        (MemStream::new(), store, c)
    }

    fn escaped(c: &Constants, raw: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        c.escape_alphabet().escape(raw, &mut out);
        out
    }

    #[test]
    fn optimise_preserves_every_key_and_value() {
        let (mut stream, mut store, c) = fresh();
        let pairs: &[(&[u8], &[u8])] = &[
            (b"banana", b"1"),
            (b"bandana", b"2"),
            (b"bank", b"3"),
            (b"apple", b"4"),
        ];
        for &(k, v) in pairs {
            let ek = escaped(&c, k);
            insert(&mut stream, &mut store, &c, &ek, v, false).unwrap();
        }
        // Delete one key so the compacted copy also exercises a tree that
        // isn't simply "every insert kept".
        let dead = escaped(&c, b"bank");
        remove(&mut stream, &mut store, &c, &dead).unwrap();

        let mut compacted = MemStream::new();
        optimise(&stream, &c, &mut compacted).unwrap();

        for &(k, v) in &[(b"banana".as_ref(), b"1".as_ref()), (b"bandana", b"2"), (b"apple", b"4")] {
            let ek = escaped(&c, k);
            let path = find_path(&compacted, &c, &ek).unwrap();
            assert!(path.is_exact());
            let leaf = io::read_leaf(&compacted, path.last().unwrap().address).unwrap();
            assert_eq!(leaf.value, v);
        }
        let ek = escaped(&c, b"bank");
        assert!(!find_path(&compacted, &c, &ek).unwrap().is_exact());
    }

    #[test]
    fn reload_recovers_item_count_and_a_usable_allocator() {
        let (mut stream, mut store, c) = fresh();
        for k in [b"banana".as_ref(), b"bandana", b"bank"] {
            let ek = escaped(&c, k);
            insert(&mut stream, &mut store, &c, &ek, b"v", false).unwrap();
        }
        let (mut reloaded_store, count) = reload(&stream, &c).unwrap();
        assert_eq!(count, 3);

        let ek = escaped(&c, b"cherry");
        insert(&mut stream, &mut reloaded_store, &c, &ek, b"v2", false).unwrap();
        let path = find_path(&stream, &c, &ek).unwrap();
        assert!(path.is_exact());
    }

    #[test]
    fn reload_of_empty_tree_has_zero_items() {
        let (stream, _store, c) = fresh();
        let (_store, count) = reload(&stream, &c).unwrap();
        assert_eq!(count, 0);
    }
}
