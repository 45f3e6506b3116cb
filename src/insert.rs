//! Insert engine (spec §4.H). Every structural rewrite follows the
//! allocate -> write -> rewrite-parent-pointer -> free ordering from §5.

use log::trace;

use crate::error::{ArtError, Result};
use crate::node::{self, io, Constants, InnerNode, LeafNode, NodeClass};
use crate::path::{find_path, Path};
use crate::store::Store;
use crate::stream::Stream;

fn alloc_leaf<S: Stream>(stream: &mut S, store: &mut Store, leaf: &LeafNode) -> Result<u64> {
    let addr = store.alloc_leaf(leaf.encoded_len());
    io::write_leaf(stream, addr, leaf)?;
    Ok(addr)
}

fn alloc_inner<S: Stream>(stream: &mut S, store: &mut Store, c: &Constants, node: &InnerNode) -> Result<u64> {
    let addr = store.alloc_inner(node.class);
    io::write_inner(stream, addr, node, c)?;
    Ok(addr)
}

fn rewrite_pointer<S: Stream>(stream: &mut S, parent_ptr_addr: u64, new_addr: u64, c: &Constants) -> Result<()> {
    io::write_pointer_at(stream, parent_ptr_addr, new_addr, c)
}

/// Insert `(key, value)` where `key` is already encoded and escaped.
/// `overwrite` selects indexer-set semantics (replace) over `Add` semantics
/// (fail with `KeyExists`) when the key is already present.
pub fn insert<S: Stream>(
    stream: &mut S,
    store: &mut Store,
    c: &Constants,
    key: &[u8],
    value: &[u8],
    overwrite: bool,
) -> Result<()> {
    if key.is_empty() {
        return Err(ArtError::EmptyKey);
    }

    let path = find_path(stream, c, key)?;

    if path.steps.is_empty() {
        let mut partial = key.to_vec();
        partial.push(c.terminator);
        let leaf = LeafNode::new(partial, value.to_vec());
        let addr = alloc_leaf(stream, store, &leaf)?;
        io::write_root(stream, addr, c)?;
        trace!("insert: created root leaf at {addr}");
        return Ok(());
    }

    if path.is_exact() {
        if !overwrite {
            return Err(ArtError::KeyExists);
        }
        let last = path.last().unwrap();
        let old_leaf = io::read_leaf(stream, last.address)?;
        let new_leaf = LeafNode::new(old_leaf.partial_key.clone(), value.to_vec());
        let new_addr = alloc_leaf(stream, store, &new_leaf)?;
        rewrite_pointer(stream, last.parent_pointer_address, new_addr, c)?;
        store.free_leaf(last.address, old_leaf.encoded_len());
        trace!("insert: overwrote leaf at {} -> {}", last.address, new_addr);
        return Ok(());
    }

    let last = path.last().unwrap().clone();
    match last.class {
        NodeClass::Leaf => {
            if last.matched_len == last.prefix_len {
                insert_leaf_extend(stream, store, c, &path, value)
            } else {
                insert_leaf_split(stream, store, c, &path, value)
            }
        }
        _ => {
            if last.matched_len == last.prefix_len {
                insert_inner_add_child(stream, store, c, &path, value)
            } else {
                insert_inner_split(stream, store, c, &path, value)
            }
        }
    }
}

/// Case 1: inner node, full prefix match, the dispatch byte is simply
/// absent. Add the child (upgrading the class first if already full). If
/// the new key ends exactly at this node (`path.consumed == path.key.len()`,
/// i.e. the key is itself a prefix of every key already below this node),
/// there is no next key byte to dispatch on: the new leaf is added at the
/// reserved terminator byte instead, per spec §4.H's `T` child convention.
fn insert_inner_add_child<S: Stream>(
    stream: &mut S,
    store: &mut Store,
    c: &Constants,
    path: &Path,
    value: &[u8],
) -> Result<()> {
    let last = path.last().unwrap();
    let node = io::read_inner(stream, last.address, c, last.class)?;
    let (dispatch_byte, leaf_rest_start) = if path.consumed < path.key.len() {
        (path.key[path.consumed], path.consumed + 1)
    } else {
        (c.terminator, path.consumed)
    };
    let mut leaf_partial = path.key[leaf_rest_start..].to_vec();
    leaf_partial.push(c.terminator);
    let leaf = LeafNode::new(leaf_partial, value.to_vec());
    let leaf_addr = alloc_leaf(stream, store, &leaf)?;

    let mut new_node = if node.is_full() {
        trace!("insert: upgrading {:?} at {}", node.class, last.address);
        node.upgraded()
    } else {
        node.clone()
    };
    new_node.add_child(dispatch_byte, leaf_addr);
    let new_addr = alloc_inner(stream, store, c, &new_node)?;
    rewrite_pointer(stream, last.parent_pointer_address, new_addr, c)?;
    store.free_inner(node.class, last.address);
    Ok(())
}

/// Case 2: inner node, prefix mismatch partway through. Split into a new N4
/// parent holding the shared prefix, with the (shortened) old node and a
/// new leaf as its two children.
fn insert_inner_split<S: Stream>(
    stream: &mut S,
    store: &mut Store,
    c: &Constants,
    path: &Path,
    value: &[u8],
) -> Result<()> {
    let last = path.last().unwrap();
    let node = io::read_inner(stream, last.address, c, last.class)?;
    let matched = last.matched_len;
    let shared = node.prefix[..matched].to_vec();
    let diverge_in_node = node.prefix[matched];
    let diverge_in_key = path.key[path.consumed + matched];

    let new_leaf_partial = path.key[path.consumed + matched + 1..].to_vec();
    let new_leaf = LeafNode::new(new_leaf_partial, value.to_vec());
    let new_leaf_addr = alloc_leaf(stream, store, &new_leaf)?;

    let shortened_prefix = node.prefix[matched + 1..].to_vec();
    let old_child_addr = if node.child_count() == 1 {
        merge_single_child_if_possible(stream, store, c, &node, &shortened_prefix)?
    } else {
        None
    };
    let old_branch_addr = match old_child_addr {
        Some(addr) => addr,
        None => {
            let mut shortened = node.clone();
            shortened.prefix = shortened_prefix;
            alloc_inner(stream, store, c, &shortened)?
        }
    };

    let mut parent = InnerNode::new(NodeClass::N4, shared);
    parent.add_child(diverge_in_node, old_branch_addr);
    parent.add_child(diverge_in_key, new_leaf_addr);
    let parent_addr = alloc_inner(stream, store, c, &parent)?;

    rewrite_pointer(stream, last.parent_pointer_address, parent_addr, c)?;
    store.free_inner(node.class, last.address);
    trace!("insert: split {:?} at {} into N4 {}", node.class, last.address, parent_addr);
    Ok(())
}

/// Optimisation from spec §4.H case 2: if the node being split has exactly
/// one child and that child is itself an inner node whose prefix still fits
/// in `L` once the cut-off bytes are prepended, skip writing a one-child
/// stub and merge directly into the grandchild.
pub(crate) fn merge_single_child_if_possible<S: Stream>(
    stream: &mut S,
    store: &mut Store,
    c: &Constants,
    node: &InnerNode,
    shortened_prefix: &[u8],
) -> Result<Option<u64>> {
    let (dispatch_byte, child_addr) = node.min_child().expect("child_count == 1");
    let child_class = io::read_tag(stream, child_addr)?;
    if child_class == NodeClass::Leaf {
        return Ok(None);
    }
    let child = io::read_inner(stream, child_addr, c, child_class)?;
    let merged_len = shortened_prefix.len() + 1 + child.prefix.len();
    if merged_len > c.l as usize {
        return Ok(None);
    }
    let mut merged_prefix = shortened_prefix.to_vec();
    merged_prefix.push(dispatch_byte);
    merged_prefix.extend_from_slice(&child.prefix);

    let mut merged = child.clone();
    merged.prefix = merged_prefix;
    let merged_addr = alloc_inner(stream, store, c, &merged)?;
    store.free_inner(child.class, child_addr);
    trace!("insert: merged single-child stub into grandchild at {merged_addr}");
    Ok(Some(merged_addr))
}

/// Case 3/5: leaf whose stored key only partially matches (including the
/// zero-match root-leaf case). Build a chain of N4 nodes covering the
/// shared bytes, chunked to at most `L` each, terminating in a node with
/// the two diverging leaves as children.
fn insert_leaf_split<S: Stream>(
    stream: &mut S,
    store: &mut Store,
    c: &Constants,
    path: &Path,
    value: &[u8],
) -> Result<()> {
    let last = path.last().unwrap();
    let old_leaf = io::read_leaf(stream, last.address)?;
    let stored = &old_leaf.partial_key[..old_leaf.partial_key.len() - 1];
    let matched = last.matched_len;
    let shared = stored[..matched].to_vec();
    let diverge_old = stored[matched];
    // `path.consumed` already includes this leaf step's `matched_len`.
    let diverge_new = path.key[path.consumed];

    let mut old_new_partial = stored[matched + 1..].to_vec();
    old_new_partial.push(c.terminator);
    let old_new_leaf = LeafNode::new(old_new_partial, old_leaf.value.clone());
    let old_new_addr = alloc_leaf(stream, store, &old_new_leaf)?;

    let mut new_leaf_partial = path.key[path.consumed + 1..].to_vec();
    new_leaf_partial.push(c.terminator);
    let new_leaf = LeafNode::new(new_leaf_partial, value.to_vec());
    let new_leaf_addr = alloc_leaf(stream, store, &new_leaf)?;

    let l = c.l as usize;
    let mut chunks: Vec<(Vec<u8>, Option<u8>)> = Vec::new();
    let mut idx = 0usize;
    while shared.len() - idx > l {
        let prefix = shared[idx..idx + l].to_vec();
        idx += l;
        let dispatch = shared[idx];
        idx += 1;
        chunks.push((prefix, Some(dispatch)));
    }
    chunks.push((shared[idx..].to_vec(), None));

    let mut next_addr: Option<u64> = None;
    for (prefix, dispatch) in chunks.into_iter().rev() {
        let mut node = InnerNode::new(NodeClass::N4, prefix);
        match (dispatch, next_addr) {
            (Some(byte), Some(addr)) => node.add_child(byte, addr),
            (None, None) => {
                node.add_child(diverge_old, old_new_addr);
                node.add_child(diverge_new, new_leaf_addr);
            }
            _ => unreachable!("dispatch presence must match chain position"),
        }
        next_addr = Some(alloc_inner(stream, store, c, &node)?);
    }
    let top_addr = next_addr.unwrap();

    rewrite_pointer(stream, last.parent_pointer_address, top_addr, c)?;
    store.free_leaf(last.address, old_leaf.encoded_len());
    trace!("insert: split leaf at {} into chain rooted at {}", last.address, top_addr);
    Ok(())
}

/// Case 4: the existing leaf's whole stored key matched and the new key
/// keeps going -- the old leaf's value moves under a `T` child, the new
/// key's extra bytes become a sibling leaf.
fn insert_leaf_extend<S: Stream>(
    stream: &mut S,
    store: &mut Store,
    c: &Constants,
    path: &Path,
    value: &[u8],
) -> Result<()> {
    let last = path.last().unwrap();
    let old_leaf = io::read_leaf(stream, last.address)?;
    let stored = old_leaf.partial_key[..old_leaf.partial_key.len() - 1].to_vec();

    let moved_leaf = LeafNode::new(vec![c.terminator], old_leaf.value.clone());
    let moved_addr = alloc_leaf(stream, store, &moved_leaf)?;

    // `path.consumed` already includes this leaf step's full `stored.len()` match.
    let extra_byte = path.key[path.consumed];
    let mut new_leaf_partial = path.key[path.consumed + 1..].to_vec();
    new_leaf_partial.push(c.terminator);
    let new_leaf = LeafNode::new(new_leaf_partial, value.to_vec());
    let new_leaf_addr = alloc_leaf(stream, store, &new_leaf)?;

    let mut parent = InnerNode::new(NodeClass::N4, stored);
    parent.add_child(c.terminator, moved_addr);
    parent.add_child(extra_byte, new_leaf_addr);
    let parent_addr = alloc_inner(stream, store, c, &parent)?;

    rewrite_pointer(stream, last.parent_pointer_address, parent_addr, c)?;
    store.free_leaf(last.address, old_leaf.encoded_len());
    trace!("insert: extended leaf at {} into N4 {}", last.address, parent_addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn insert_into_empty_tree_creates_root_leaf() {
        let (mut stream, mut store, c) = fresh();
        let key = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &key, b"v1", false).unwrap();
        assert_eq!(get(&stream, &c, &key), Some(b"v1".to_vec()));
    }

    #[test]
    fn insert_duplicate_without_overwrite_fails() {
        let (mut stream, mut store, c) = fresh();
        let key = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &key, b"v1", false).unwrap();
        let err = insert(&mut stream, &mut store, &c, &key, b"v2", false).unwrap_err();
        assert!(matches!(err, ArtError::KeyExists));
    }

    #[test]
    fn insert_duplicate_with_overwrite_replaces_value() {
        let (mut stream, mut store, c) = fresh();
        let key = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &key, b"v1", false).unwrap();
        insert(&mut stream, &mut store, &c, &key, b"v2", true).unwrap();
        assert_eq!(get(&stream, &c, &key), Some(b"v2".to_vec()));
    }

    #[test]
    fn insert_diverging_leaf_splits_root() {
        let (mut stream, mut store, c) = fresh();
        let k1 = escaped(&c, b"banana");
        let k2 = escaped(&c, b"bandana");
        insert(&mut stream, &mut store, &c, &k1, b"1", false).unwrap();
        insert(&mut stream, &mut store, &c, &k2, b"2", false).unwrap();
        assert_eq!(get(&stream, &c, &k1), Some(b"1".to_vec()));
        assert_eq!(get(&stream, &c, &k2), Some(b"2".to_vec()));
    }

    #[test]
    fn insert_key_extending_existing_leaf() {
        let (mut stream, mut store, c) = fresh();
        let k1 = escaped(&c, b"ban");
        let k2 = escaped(&c, b"banana");
        insert(&mut stream, &mut store, &c, &k1, b"short", false).unwrap();
        insert(&mut stream, &mut store, &c, &k2, b"long", false).unwrap();
        assert_eq!(get(&stream, &c, &k1), Some(b"short".to_vec()));
        assert_eq!(get(&stream, &c, &k2), Some(b"long".to_vec()));
    }

    #[test]
    fn insert_many_children_triggers_upgrade() {
        let (mut stream, mut store, c) = fresh();
        for b in 0u8..6 {
            let key = vec![b'a', b];
            let escaped_key = escaped(&c, &key);
            insert(&mut stream, &mut store, &c, &escaped_key, &[b], false).unwrap();
        }
        for b in 0u8..6 {
            let key = vec![b'a', b];
            let escaped_key = escaped(&c, &key);
            assert_eq!(get(&stream, &c, &escaped_key), Some(vec![b]));
        }
    }

    #[test]
    fn insert_rejects_empty_key() {
        let (mut stream, mut store, c) = fresh();
        let err = insert(&mut stream, &mut store, &c, &[], b"v", false).unwrap_err();
        assert!(matches!(err, ArtError::EmptyKey));
    }
}
