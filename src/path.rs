//! Path finder (spec §4.G): walks the root chain and records a full trail,
//! whether or not the key is actually present.

use crate::error::Result;
use crate::node::{self, io, Constants, NodeClass};
use crate::stream::Stream;

/// One visited node along a trail.
#[derive(Debug, Clone)]
pub struct PathStep {
    pub class: NodeClass,
    pub address: u64,
    /// Absolute stream offset of the pointer cell that currently holds
    /// `address` -- the root cell (0) for the first step, otherwise a
    /// P-byte slot inside the previous step's node record.
    pub parent_pointer_address: u64,
    pub child_count: usize,
    pub prefix_len: usize,
    /// Leaf value length; 0 for inner nodes.
    pub value_len: usize,
    /// Longest common prefix, in bytes, between this node's stored prefix
    /// (or the leaf's partial key excluding the terminator) and the search
    /// key starting at the offset already consumed by ancestors.
    pub matched_len: usize,
}

#[derive(Debug, Clone)]
pub struct Path {
    pub steps: Vec<PathStep>,
    pub key: Vec<u8>,
    /// Total key bytes consumed across the whole trail.
    pub consumed: usize,
}

impl Path {
    /// Last step is a leaf that fully matches the search key: every leaf
    /// byte before the terminator was matched, and the search key is fully
    /// consumed.
    pub fn is_exact(&self) -> bool {
        match self.steps.last() {
            Some(step) if step.class == NodeClass::Leaf => {
                step.matched_len == step.prefix_len && self.consumed == self.key.len()
            }
            _ => false,
        }
    }

    /// Last step is a leaf and the search key was fully consumed, whether or
    /// not the leaf carries additional bytes beyond it.
    pub fn starts_with(&self) -> bool {
        match self.steps.last() {
            Some(step) if step.class == NodeClass::Leaf => self.consumed == self.key.len(),
            _ => false,
        }
    }

    pub fn last(&self) -> Option<&PathStep> {
        self.steps.last()
    }
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

/// Walk from the root looking for `key` (already encoded and escaped).
/// Always returns a trail; absence is signalled by `is_exact()`/
/// `starts_with()` on the result, not by an error.
pub fn find_path<S: Stream>(stream: &S, c: &Constants, key: &[u8]) -> Result<Path> {
    let mut steps = Vec::new();
    let mut consumed = 0usize;
    let mut parent_ptr_addr = 0u64;

    let root = io::read_root(stream, c)?;
    if root == 0 {
        return Ok(Path {
            steps,
            key: key.to_vec(),
            consumed,
        });
    }

    let mut cur_addr = root;
    loop {
        let class = io::read_tag(stream, cur_addr)?;
        if class == NodeClass::Leaf {
            let leaf = io::read_leaf(stream, cur_addr)?;
            let stored = &leaf.partial_key[..leaf.partial_key.len() - 1];
            let matched = common_prefix_len(stored, &key[consumed.min(key.len())..]);
            steps.push(PathStep {
                class,
                address: cur_addr,
                parent_pointer_address: parent_ptr_addr,
                child_count: 0,
                prefix_len: stored.len(),
                value_len: leaf.value.len(),
                matched_len: matched,
            });
            consumed += matched;
            break;
        }

        let node = io::read_inner(stream, cur_addr, c, class)?;
        let matched = common_prefix_len(&node.prefix, &key[consumed.min(key.len())..]);
        steps.push(PathStep {
            class,
            address: cur_addr,
            parent_pointer_address: parent_ptr_addr,
            child_count: node.child_count(),
            prefix_len: node.prefix.len(),
            value_len: 0,
            matched_len: matched,
        });

        if matched < node.prefix.len() {
            break;
        }
        consumed += matched;
        if consumed >= key.len() {
            break;
        }

        let next_byte = key[consumed];
        match (
            node.find_child(next_byte),
            node.child_pointer_offset(next_byte, c),
        ) {
            (Some(child_addr), Some(slot_off)) => {
                parent_ptr_addr = cur_addr + slot_off;
                cur_addr = child_addr;
                consumed += 1;
            }
            _ => break,
        }
    }

    Ok(Path {
        steps,
        key: key.to_vec(),
        consumed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{InnerNode, LeafNode};
    use crate::stream::MemStream;

    fn consts() -> Constants {
        Constants::default()
    }

    fn write_leaf_as_root(stream: &mut MemStream, c: &Constants, key: &[u8], value: &[u8]) -> u64 {
        let mut partial = key.to_vec();
        partial.push(c.terminator);
        let leaf = LeafNode::new(partial, value.to_vec());
        let addr = c.p as u64;
        io::write_leaf(stream, addr, &leaf).unwrap();
        io::write_root(stream, addr, c).unwrap();
        addr
    }

    #[test]
    fn empty_tree_has_no_steps_and_is_not_exact() {
        let stream = MemStream::new();
        let c = consts();
        let path = find_path(&stream, &c, b"x").unwrap();
        assert!(path.steps.is_empty());
        assert!(!path.is_exact());
        assert!(!path.starts_with());
    }

    #[test]
    fn single_leaf_root_matches_exactly() {
        let mut stream = MemStream::new();
        let c = consts();
        write_leaf_as_root(&mut stream, &c, b"banana", b"\x01\0\0\0");
        let path = find_path(&stream, &c, b"banana").unwrap();
        assert!(path.is_exact());
        assert_eq!(path.steps.len(), 1);
        assert_eq!(path.steps[0].parent_pointer_address, 0);
    }

    #[test]
    fn single_leaf_root_detects_prefix_only() {
        let mut stream = MemStream::new();
        let c = consts();
        write_leaf_as_root(&mut stream, &c, b"banana", b"\x01\0\0\0");
        let path = find_path(&stream, &c, b"ban").unwrap();
        assert!(!path.is_exact());
        // "ban" is a proper prefix of the stored "banana".
        assert!(path.starts_with());
        assert_eq!(path.steps[0].matched_len, 3);
    }

    #[test]
    fn descends_through_inner_node_to_matching_leaf() {
        let mut stream = MemStream::new();
        let c = consts();
        // Build: root N4 with prefix "ba", children 'n' -> leaf "ana"+T (for
        // "banana"), 'r' -> leaf T (for "bar"). The dispatch byte itself
        // ('n'/'r') is consumed by the child-pointer lookup, not stored
        // again in the leaf's own partial key.
        let leaf1 = LeafNode::new(vec![b'a', b'n', b'a', c.terminator], b"\x01\0\0\0".to_vec());
        let leaf2 = LeafNode::new(vec![c.terminator], b"\x02\0\0\0".to_vec());
        let leaf1_addr = 100u64;
        let leaf2_addr = 200u64;
        io::write_leaf(&mut stream, leaf1_addr, &leaf1).unwrap();
        io::write_leaf(&mut stream, leaf2_addr, &leaf2).unwrap();

        let mut root_node = InnerNode::new(NodeClass::N4, vec![b'b', b'a']);
        root_node.add_child(b'n', leaf1_addr);
        root_node.add_child(b'r', leaf2_addr);
        let root_addr = c.p as u64;
        io::write_inner(&mut stream, root_addr, &root_node, &c).unwrap();
        io::write_root(&mut stream, root_addr, &c).unwrap();

        let path = find_path(&stream, &c, b"banana").unwrap();
        assert!(path.is_exact());
        assert_eq!(path.steps.len(), 2);
        assert_eq!(path.steps[0].address, root_addr);
        assert_eq!(path.steps[1].address, leaf1_addr);
        assert_ne!(path.steps[1].parent_pointer_address, 0);
    }
}
