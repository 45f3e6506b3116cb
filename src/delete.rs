//! Delete engine (spec §4.I). Mirrors the insert engine's allocate -> write
//! -> rewrite-parent -> free ordering, but has to additionally cope with the
//! leaf's immediate parent itself becoming empty: that only happens to the
//! single-child stub chains insert's case 3 builds out of prefixes longer
//! than `L`, and has to cascade upward until it reaches an ancestor that
//! still has other children (or the root).

use log::trace;

use crate::error::Result;
use crate::insert::merge_single_child_if_possible;
use crate::node::{io, Constants, NodeClass};
use crate::path::find_path;
use crate::store::Store;
use crate::stream::Stream;

/// Remove `key` (already encoded and escaped). Returns `false` if the key
/// was not present; the tree is left untouched in that case.
pub fn remove<S: Stream>(stream: &mut S, store: &mut Store, c: &Constants, key: &[u8]) -> Result<bool> {
    let path = find_path(stream, c, key)?;
    if !path.is_exact() {
        return Ok(false);
    }

    let leaf_step = path.last().unwrap().clone();
    let old_leaf = io::read_leaf(stream, leaf_step.address)?;
    store.free_leaf(leaf_step.address, old_leaf.encoded_len());

    if path.steps.len() == 1 {
        io::write_root(stream, 0, c)?;
        trace!("remove: emptied tree (removed sole root leaf)");
        return Ok(true);
    }

    // Walk the trail upward from the leaf's parent, removing `child` from
    // each ancestor in turn. An ancestor whose only child was `child`
    // collapses entirely (spec's "uniqueness_start" is the first ancestor,
    // scanning upward, that does *not* collapse) and is itself folded into
    // the removal one level further up.
    let mut child_to_remove = leaf_step.address;
    let mut idx = path.steps.len() - 2;
    loop {
        let anc = path.steps[idx].clone();
        let mut node = io::read_inner(stream, anc.address, c, anc.class)?;
        let byte = node
            .children_ascending()
            .into_iter()
            .find(|&(_, addr)| addr == child_to_remove)
            .map(|(b, _)| b)
            .expect("child_to_remove must be a child of its recorded ancestor");
        node.remove_child(byte);

        if node.child_count() == 0 {
            store.free_inner(anc.class, anc.address);
            trace!("remove: ancestor {:?} at {} emptied, cascading up", anc.class, anc.address);
            if idx == 0 {
                io::write_root(stream, 0, c)?;
                trace!("remove: cascaded all the way to an empty tree");
                return Ok(true);
            }
            child_to_remove = anc.address;
            idx -= 1;
            continue;
        }

        if node.child_count() < node.class.downgrade_threshold() {
            trace!("remove: downgrading {:?} at {}", anc.class, anc.address);
            node = node.downgraded();
        }

        let new_addr = if node.child_count() == 1 {
            match merge_single_child_if_possible(stream, store, c, &node, &node.prefix.clone())? {
                Some(addr) => addr,
                None => {
                    let addr = store.alloc_inner(node.class);
                    io::write_inner(stream, addr, &node, c)?;
                    addr
                }
            }
        } else {
            let addr = store.alloc_inner(node.class);
            io::write_inner(stream, addr, &node, c)?;
            addr
        };

        io::write_pointer_at(stream, anc.parent_pointer_address, new_addr, c)?;
        store.free_inner(anc.class, anc.address);
        trace!("remove: rewrote {:?} at {} -> {}", anc.class, anc.address, new_addr);
        return Ok(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insert::insert;
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

    fn get<S: Stream>(stream: &S, c: &Constants, key: &[u8]) -> Option<Vec<u8>> {
        let path = find_path(stream, c, key).unwrap();
        if path.is_exact() {
            let leaf = io::read_leaf(stream, path.last().unwrap().address).unwrap();
            Some(leaf.value)
        } else {
            None
        }
    }

    #[test]
    fn removing_the_sole_root_leaf_empties_the_tree() {
        let (mut stream, mut store, c) = fresh();
        let key = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &key, b"v1", false).unwrap();
        assert!(remove(&mut stream, &mut store, &c, &key).unwrap());
        assert_eq!(io::read_root(&stream, &c).unwrap(), 0);
        assert_eq!(get(&stream, &c, &key), None);
    }

    #[test]
    fn removing_a_missing_key_returns_false() {
        let (mut stream, mut store, c) = fresh();
        let key = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &key, b"v1", false).unwrap();
        let missing = escaped(&c, b"apple");
        assert!(!remove(&mut stream, &mut store, &c, &missing).unwrap());
        assert_eq!(get(&stream, &c, &key), Some(b"v1".to_vec()));
    }

    #[test]
    fn removing_one_of_two_siblings_leaves_the_other_reachable() {
        let (mut stream, mut store, c) = fresh();
        let k1 = escaped(&c, b"banana");
        let k2 = escaped(&c, b"bandana");
        insert(&mut stream, &mut store, &c, &k1, b"1", false).unwrap();
        insert(&mut stream, &mut store, &c, &k2, b"2", false).unwrap();

        assert!(remove(&mut stream, &mut store, &c, &k1).unwrap());
        assert_eq!(get(&stream, &c, &k1), None);
        assert_eq!(get(&stream, &c, &k2), Some(b"2".to_vec()));
    }

    #[test]
    fn removing_an_extended_leaf_sibling_collapses_back_to_one_leaf() {
        let (mut stream, mut store, c) = fresh();
        let k1 = escaped(&c, b"ban");
        let k2 = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &k1, b"short", false).unwrap();
        insert(&mut stream, &mut store, &c, &k2, b"long", false).unwrap();

        assert!(remove(&mut stream, &mut store, &c, &k2).unwrap());
        assert_eq!(get(&stream, &c, &k2), None);
        assert_eq!(get(&stream, &c, &k1), Some(b"short".to_vec()));
    }

    #[test]
    fn removing_after_upgrade_downgrades_the_node_back() {
        let (mut stream, mut store, c) = fresh();
        for b in 0u8..6 {
            let key = escaped(&c, &[b'a', b]);
            insert(&mut stream, &mut store, &c, &key, &[b], false).unwrap();
        }
        // Six children triggered an N4 -> N8 upgrade; removing three should
        // bring it back under N8's downgrade threshold.
        for b in 0u8..3 {
            let key = escaped(&c, &[b'a', b]);
            assert!(remove(&mut stream, &mut store, &c, &key).unwrap());
        }
        for b in 0u8..3 {
            let key = escaped(&c, &[b'a', b]);
            assert_eq!(get(&stream, &c, &key), None);
        }
        for b in 3u8..6 {
            let key = escaped(&c, &[b'a', b]);
            assert_eq!(get(&stream, &c, &key), Some(vec![b]));
        }
    }

    #[test]
    fn removing_all_keys_empties_the_tree() {
        let (mut stream, mut store, c) = fresh();
        let k1 = escaped(&c, b"banana");
        let k2 = escaped(&c, b"bandana");
        insert(&mut stream, &mut store, &c, &k1, b"1", false).unwrap();
        insert(&mut stream, &mut store, &c, &k2, b"2", false).unwrap();
        assert!(remove(&mut stream, &mut store, &c, &k1).unwrap());
        assert!(remove(&mut stream, &mut store, &c, &k2).unwrap());
        assert_eq!(io::read_root(&stream, &c).unwrap(), 0);
    }
}
