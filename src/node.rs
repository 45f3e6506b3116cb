//! Node record layout and the class up/downgrade transforms (spec §3, §4.F).
//!
//! Every node is decoded off the stream into one of these owned structs,
//! mutated in memory, then re-encoded and written to a freshly allocated
//! address -- per spec §3's "Lifecycle", there is no in-place structural
//! mutation of a *live* (reachable) node, so upgrade/downgrade are just
//! "decode as the old class, build the new class, write it somewhere new".

use crate::error::{ArtError, Result};
use crate::varint;

/// Tree-wide format constants, fixed at construction or read back from the
/// persistent header on reload.
#[derive(Debug, Clone, Copy)]
pub struct Constants {
    /// Width, in bytes, of an on-stream child/root pointer.
    pub p: u8,
    /// Max inline prefix length stored on an inner node.
    pub l: u8,
    pub terminator: u8,
    pub escape_lead: u8,
    pub escape_follow: u8,
}

impl Default for Constants {
    fn default() -> Self {
        Constants {
            p: 5,
            l: 8,
            terminator: 0,
            escape_lead: 255,
            escape_follow: 1,
        }
    }
}

impl Constants {
    pub fn escape_alphabet(&self) -> crate::escape::EscapeAlphabet {
        crate::escape::EscapeAlphabet::new(self.terminator, self.escape_lead, self.escape_follow)
    }

    pub fn read_addr(&self, buf: &[u8]) -> u64 {
        let mut raw = [0u8; 8];
        raw[..self.p as usize].copy_from_slice(&buf[..self.p as usize]);
        u64::from_le_bytes(raw)
    }

    pub fn write_addr(&self, addr: u64, buf: &mut [u8]) {
        let raw = addr.to_le_bytes();
        buf[..self.p as usize].copy_from_slice(&raw[..self.p as usize]);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    N4,
    N8,
    N16,
    N32,
    N64,
    N128,
    N256,
    Leaf,
}

use NodeClass::*;

const INNER_CLASSES: [NodeClass; 7] = [N4, N8, N16, N32, N64, N128, N256];

impl NodeClass {
    pub fn tag(self) -> u8 {
        match self {
            N4 => 0,
            N8 => 1,
            N16 => 2,
            N32 => 3,
            N64 => 4,
            N128 => 5,
            N256 => 6,
            Leaf => 7,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self> {
        Ok(match tag {
            0 => N4,
            1 => N8,
            2 => N16,
            3 => N32,
            4 => N64,
            5 => N128,
            6 => N256,
            7 => Leaf,
            _ => return Err(ArtError::FormatError(format!("unknown node tag {tag}"))),
        })
    }

    pub fn max_children(self) -> usize {
        match self {
            N4 => 4,
            N8 => 8,
            N16 => 16,
            N32 => 32,
            N64 => 64,
            N128 => 128,
            N256 => 256,
            Leaf => 0,
        }
    }

    /// Child count strictly below this triggers a downgrade (spec §3).
    /// `N4` never downgrades.
    pub fn downgrade_threshold(self) -> usize {
        match self {
            N4 => 0,
            N8 => 3,
            N16 => 7,
            N32 => 13,
            N64 => 25,
            N128 => 49,
            N256 => 97,
            Leaf => 0,
        }
    }

    pub fn next_class(self) -> Option<NodeClass> {
        match self {
            N4 => Some(N8),
            N8 => Some(N16),
            N16 => Some(N32),
            N32 => Some(N64),
            N64 => Some(N128),
            N128 => Some(N256),
            N256 => None,
            Leaf => None,
        }
    }

    pub fn prev_class(self) -> Option<NodeClass> {
        match self {
            N4 => None,
            N8 => Some(N4),
            N16 => Some(N8),
            N32 => Some(N16),
            N64 => Some(N32),
            N128 => Some(N64),
            N256 => Some(N128),
            Leaf => None,
        }
    }

    /// Smallest class that still has room for `child_count` children.
    pub fn for_child_count(child_count: usize) -> NodeClass {
        for class in INNER_CLASSES {
            if child_count <= class.max_children() {
                return class;
            }
        }
        N256
    }

    const HEADER_LEN: u64 = 3;

    /// Fixed size, in bytes, of an inner-node record of this class. Not
    /// meaningful for `Leaf` (use `LeafNode::encoded_len` instead).
    pub fn node_size(self, c: &Constants) -> u64 {
        let header = Self::HEADER_LEN + c.l as u64;
        let p = c.p as u64;
        match self {
            N4 => header + 4 + 4 * p,
            N8 => header + 8 + 8 * p,
            N16 => header + 16 + 16 * p,
            N32 => header + 32 + 32 * p,
            N64 => header + 256 + 64 * p,
            N128 => header + 256 + 128 * p,
            N256 => header + 256 * p,
            Leaf => 0,
        }
    }

    /// Byte offset, from the start of the record, where the key/slot region
    /// begins (spec §4.F `keys_offset`).
    pub fn keys_offset(self, c: &Constants) -> u64 {
        Self::HEADER_LEN + c.l as u64
    }

    pub fn min_children(self) -> usize {
        match self {
            N4 => 0,
            other => other.downgrade_threshold(),
        }
    }
}

/// Sufficient initial read, in bytes, to determine a node's class and (for
/// leaves) the full varint-framed lengths (spec §4.F `prefetch_size`).
pub fn prefetch_size(class: NodeClass, c: &Constants) -> u64 {
    match class {
        NodeClass::Leaf => (2 * varint::MAX_VARINT_LEN + 1) as u64,
        inner => inner.node_size(c),
    }
}

/// A decoded inner node. `keys` holds `child_count` key bytes for
/// N4/N8/N16/N32 (ascending-sorted for N16/N32), 256 one-byte slots for
/// N64/N128 (0 = unused, else `index + 1` into `children`), or is empty for
/// N256. `children` holds `child_count` addresses for N4..N128, or always
/// 256 addresses (0 = absent) for N256.
#[derive(Debug, Clone)]
pub struct InnerNode {
    pub class: NodeClass,
    pub prefix: Vec<u8>,
    pub keys: Vec<u8>,
    pub children: Vec<u64>,
}

impl InnerNode {
    pub fn new(class: NodeClass, prefix: Vec<u8>) -> Self {
        let children = if class == NodeClass::N256 {
            vec![0u64; 256]
        } else {
            Vec::new()
        };
        let keys = if matches!(class, NodeClass::N64 | NodeClass::N128) {
            vec![0u8; 256]
        } else {
            Vec::new()
        };
        InnerNode {
            class,
            prefix,
            keys,
            children,
        }
    }

    pub fn child_count(&self) -> usize {
        match self.class {
            NodeClass::N4 | NodeClass::N8 | NodeClass::N16 | NodeClass::N32 => self.keys.len(),
            NodeClass::N64 | NodeClass::N128 => self.children.len(),
            NodeClass::N256 => self.children.iter().filter(|&&a| a != 0).count(),
            NodeClass::Leaf => 0,
        }
    }

    pub fn find_child(&self, byte: u8) -> Option<u64> {
        match self.class {
            NodeClass::N4 | NodeClass::N8 => self
                .keys
                .iter()
                .position(|&k| k == byte)
                .map(|i| self.children[i]),
            NodeClass::N16 | NodeClass::N32 => self
                .keys
                .binary_search(&byte)
                .ok()
                .map(|i| self.children[i]),
            NodeClass::N64 | NodeClass::N128 => {
                let slot = self.keys[byte as usize];
                if slot == 0 {
                    None
                } else {
                    Some(self.children[slot as usize - 1])
                }
            }
            NodeClass::N256 => {
                let addr = self.children[byte as usize];
                if addr == 0 {
                    None
                } else {
                    Some(addr)
                }
            }
            NodeClass::Leaf => None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.child_count() >= self.class.max_children()
    }

    /// Insert a new child, assuming the node is not already full. Preserves
    /// insertion order for N4/N8 and ascending sort order for N16/N32.
    pub fn add_child(&mut self, byte: u8, addr: u64) {
        debug_assert!(!self.is_full());
        debug_assert!(self.find_child(byte).is_none());
        match self.class {
            NodeClass::N4 | NodeClass::N8 => {
                self.keys.push(byte);
                self.children.push(addr);
            }
            NodeClass::N16 | NodeClass::N32 => {
                let pos = self.keys.partition_point(|&k| k < byte);
                self.keys.insert(pos, byte);
                self.children.insert(pos, addr);
            }
            NodeClass::N64 | NodeClass::N128 => {
                self.children.push(addr);
                self.keys[byte as usize] = self.children.len() as u8;
            }
            NodeClass::N256 => {
                self.children[byte as usize] = addr;
            }
            NodeClass::Leaf => unreachable!(),
        }
    }

    /// Overwrite the child pointer for an existing key byte.
    pub fn set_child(&mut self, byte: u8, addr: u64) {
        match self.class {
            NodeClass::N4 | NodeClass::N8 => {
                let i = self.keys.iter().position(|&k| k == byte).unwrap();
                self.children[i] = addr;
            }
            NodeClass::N16 | NodeClass::N32 => {
                let i = self.keys.binary_search(&byte).unwrap();
                self.children[i] = addr;
            }
            NodeClass::N64 | NodeClass::N128 => {
                let slot = self.keys[byte as usize];
                self.children[slot as usize - 1] = addr;
            }
            NodeClass::N256 => {
                self.children[byte as usize] = addr;
            }
            NodeClass::Leaf => unreachable!(),
        }
    }

    /// Remove the child slot for `byte`. Spec §4.I: linear downshift for
    /// N4/N8, binary-search downshift for N16/N32, swap-with-last compaction
    /// plus moved-slot index rewrite for N64/N128, direct zero for N256.
    pub fn remove_child(&mut self, byte: u8) {
        match self.class {
            NodeClass::N4 | NodeClass::N8 => {
                let i = self.keys.iter().position(|&k| k == byte).unwrap();
                self.keys.remove(i);
                self.children.remove(i);
            }
            NodeClass::N16 | NodeClass::N32 => {
                let i = self.keys.binary_search(&byte).unwrap();
                self.keys.remove(i);
                self.children.remove(i);
            }
            NodeClass::N64 | NodeClass::N128 => {
                let slot = self.keys[byte as usize] as usize - 1;
                let last = self.children.len() - 1;
                if slot != last {
                    self.children[slot] = self.children[last];
                    // Find whichever byte pointed at `last` and repoint it at `slot`.
                    if let Some(moved_byte) = self
                        .keys
                        .iter()
                        .position(|&s| s as usize == last + 1)
                    {
                        self.keys[moved_byte] = (slot + 1) as u8;
                    }
                }
                self.children.pop();
                self.keys[byte as usize] = 0;
            }
            NodeClass::N256 => {
                self.children[byte as usize] = 0;
            }
            NodeClass::Leaf => unreachable!(),
        }
    }

    /// Smallest/largest key byte present, with the child address at that
    /// byte. Class-specific scans per spec §4.F.
    pub fn min_child(&self) -> Option<(u8, u64)> {
        match self.class {
            NodeClass::N4 | NodeClass::N8 => self
                .keys
                .iter()
                .enumerate()
                .min_by_key(|&(_, &k)| k)
                .map(|(i, &k)| (k, self.children[i])),
            NodeClass::N16 | NodeClass::N32 => {
                self.keys.first().map(|&k| (k, self.children[0]))
            }
            NodeClass::N64 | NodeClass::N128 => (0u8..=255).find_map(|b| {
                let slot = self.keys[b as usize];
                (slot != 0).then(|| (b, self.children[slot as usize - 1]))
            }),
            NodeClass::N256 => (0u8..=255).find_map(|b| {
                let addr = self.children[b as usize];
                (addr != 0).then_some((b, addr))
            }),
            NodeClass::Leaf => None,
        }
    }

    pub fn max_child(&self) -> Option<(u8, u64)> {
        match self.class {
            NodeClass::N4 | NodeClass::N8 => self
                .keys
                .iter()
                .enumerate()
                .max_by_key(|&(_, &k)| k)
                .map(|(i, &k)| (k, self.children[i])),
            NodeClass::N16 | NodeClass::N32 => {
                self.keys.last().map(|&k| (k, *self.children.last().unwrap()))
            }
            NodeClass::N64 | NodeClass::N128 => (0u8..=255).rev().find_map(|b| {
                let slot = self.keys[b as usize];
                (slot != 0).then(|| (b, self.children[slot as usize - 1]))
            }),
            NodeClass::N256 => (0u8..=255).rev().find_map(|b| {
                let addr = self.children[b as usize];
                (addr != 0).then_some((b, addr))
            }),
            NodeClass::Leaf => None,
        }
    }

    /// Children in ascending key-byte order, as `(byte, address)` pairs.
    pub fn children_ascending(&self) -> Vec<(u8, u64)> {
        match self.class {
            NodeClass::N4 | NodeClass::N8 => {
                let mut pairs: Vec<(u8, u64)> = self
                    .keys
                    .iter()
                    .zip(self.children.iter())
                    .map(|(&k, &a)| (k, a))
                    .collect();
                pairs.sort_by_key(|&(k, _)| k);
                pairs
            }
            NodeClass::N16 | NodeClass::N32 => self
                .keys
                .iter()
                .zip(self.children.iter())
                .map(|(&k, &a)| (k, a))
                .collect(),
            NodeClass::N64 | NodeClass::N128 => (0u8..=255)
                .filter_map(|b| {
                    let slot = self.keys[b as usize];
                    (slot != 0).then(|| (b, self.children[slot as usize - 1]))
                })
                .collect(),
            NodeClass::N256 => (0u8..=255)
                .filter_map(|b| {
                    let addr = self.children[b as usize];
                    (addr != 0).then_some((b, addr))
                })
                .collect(),
            NodeClass::Leaf => Vec::new(),
        }
    }

    pub fn encode(&self, c: &Constants) -> Vec<u8> {
        let size = self.class.node_size(c) as usize;
        let mut buf = vec![0u8; size];
        buf[0] = self.class.tag();
        buf[1] = self.child_count() as u8;
        buf[2] = self.prefix.len() as u8;
        buf[3..3 + self.prefix.len()].copy_from_slice(&self.prefix);

        let keys_off = self.class.keys_offset(c) as usize;
        let p = c.p as usize;
        match self.class {
            NodeClass::N4 | NodeClass::N8 | NodeClass::N16 | NodeClass::N32 => {
                let n = self.keys.len();
                buf[keys_off..keys_off + n].copy_from_slice(&self.keys);
                let ptrs_off = keys_off + self.class.max_children();
                for (i, &addr) in self.children.iter().enumerate() {
                    c.write_addr(addr, &mut buf[ptrs_off + i * p..ptrs_off + (i + 1) * p]);
                }
            }
            NodeClass::N64 | NodeClass::N128 => {
                buf[keys_off..keys_off + 256].copy_from_slice(&self.keys);
                let ptrs_off = keys_off + 256;
                for (i, &addr) in self.children.iter().enumerate() {
                    c.write_addr(addr, &mut buf[ptrs_off + i * p..ptrs_off + (i + 1) * p]);
                }
            }
            NodeClass::N256 => {
                for (i, &addr) in self.children.iter().enumerate() {
                    c.write_addr(addr, &mut buf[keys_off + i * p..keys_off + (i + 1) * p]);
                }
            }
            NodeClass::Leaf => unreachable!(),
        }
        buf
    }

    pub fn decode(buf: &[u8], c: &Constants) -> Result<Self> {
        let class = NodeClass::from_tag(buf[0])?;
        let child_count = buf[1] as usize;
        let prefix_len = buf[2] as usize;
        if prefix_len > c.l as usize {
            return Err(ArtError::FormatError(format!(
                "prefix length {prefix_len} exceeds L={}",
                c.l
            )));
        }
        let prefix = buf[3..3 + prefix_len].to_vec();
        let keys_off = class.keys_offset(c) as usize;
        let p = c.p as usize;

        let (keys, children) = match class {
            NodeClass::N4 | NodeClass::N8 | NodeClass::N16 | NodeClass::N32 => {
                let keys = buf[keys_off..keys_off + child_count].to_vec();
                let ptrs_off = keys_off + class.max_children();
                let children = (0..child_count)
                    .map(|i| c.read_addr(&buf[ptrs_off + i * p..ptrs_off + (i + 1) * p]))
                    .collect();
                (keys, children)
            }
            NodeClass::N64 | NodeClass::N128 => {
                let keys = buf[keys_off..keys_off + 256].to_vec();
                let ptrs_off = keys_off + 256;
                let children = (0..child_count)
                    .map(|i| c.read_addr(&buf[ptrs_off + i * p..ptrs_off + (i + 1) * p]))
                    .collect();
                (keys, children)
            }
            NodeClass::N256 => {
                let children = (0..256)
                    .map(|i| c.read_addr(&buf[keys_off + i * p..keys_off + (i + 1) * p]))
                    .collect();
                (Vec::new(), children)
            }
            NodeClass::Leaf => return Err(ArtError::FormatError("not an inner node".into())),
        };

        Ok(InnerNode {
            class,
            prefix,
            keys,
            children,
        })
    }

    /// Rebuild this node as the next-larger class, preserving all children.
    /// Spec §4.F upgrade transforms.
    pub fn upgraded(&self) -> InnerNode {
        let next = self.class.next_class().expect("upgrade past N256");
        let mut node = InnerNode::new(next, self.prefix.clone());
        for (byte, addr) in self.children_ascending() {
            node.add_child(byte, addr);
        }
        node
    }

    /// Rebuild this node as the next-smaller class. Spec §4.I downgrade,
    /// mirror image of `upgraded`.
    pub fn downgraded(&self) -> InnerNode {
        let prev = self.class.prev_class().expect("downgrade past N4");
        let mut node = InnerNode::new(prev, self.prefix.clone());
        for (byte, addr) in self.children_ascending() {
            node.add_child(byte, addr);
        }
        node
    }

    /// Absolute-within-record offset of the P-byte pointer cell that holds
    /// the child for `byte`, if present. Used by the path finder to record
    /// a `parent_pointer_address` precise enough to rewrite in place.
    pub fn child_pointer_offset(&self, byte: u8, c: &Constants) -> Option<u64> {
        let keys_off = self.class.keys_offset(c);
        let p = c.p as u64;
        match self.class {
            NodeClass::N4 | NodeClass::N8 => self
                .keys
                .iter()
                .position(|&k| k == byte)
                .map(|i| keys_off + self.class.max_children() as u64 + i as u64 * p),
            NodeClass::N16 | NodeClass::N32 => self
                .keys
                .binary_search(&byte)
                .ok()
                .map(|i| keys_off + self.class.max_children() as u64 + i as u64 * p),
            NodeClass::N64 | NodeClass::N128 => {
                let slot = self.keys[byte as usize];
                (slot != 0).then(|| keys_off + 256 + (slot as u64 - 1) * p)
            }
            NodeClass::N256 => Some(keys_off + byte as u64 * p),
            NodeClass::Leaf => None,
        }
    }
}

/// Stream I/O helpers: every structural algorithm reads/writes whole node
/// records through these rather than poking at the `Stream` directly.
pub mod io {
    use super::*;
    use crate::stream::Stream;
    use crate::varint;

    pub fn read_tag<S: Stream>(stream: &S, addr: u64) -> Result<NodeClass> {
        let mut tag = [0u8; 1];
        stream.read_at(addr, &mut tag)?;
        NodeClass::from_tag(tag[0])
    }

    pub fn read_inner<S: Stream>(stream: &S, addr: u64, c: &Constants, class: NodeClass) -> Result<InnerNode> {
        let size = class.node_size(c) as usize;
        let mut buf = vec![0u8; size];
        stream.read_at(addr, &mut buf)?;
        InnerNode::decode(&buf, c)
    }

    pub fn write_inner<S: Stream>(stream: &mut S, addr: u64, node: &InnerNode, c: &Constants) -> Result<()> {
        let buf = node.encode(c);
        stream.write_at(addr, &buf)?;
        Ok(())
    }

    pub fn read_leaf<S: Stream>(stream: &S, addr: u64) -> Result<LeafNode> {
        let prefetch = prefetch_size(NodeClass::Leaf, &Constants::default()) as usize;
        let mut buf = vec![0u8; prefetch];
        stream.read_at(addr, &mut buf)?;
        let mut pos = 1usize;
        let partial_len = varint::decode_cursor(&buf, &mut pos)? as usize;
        let value_len = varint::decode_cursor(&buf, &mut pos)? as usize;
        let total = pos + partial_len + value_len;
        if total > buf.len() {
            buf.resize(total, 0);
            stream.read_at(addr + prefetch as u64, &mut buf[prefetch..])?;
        }
        LeafNode::decode(&buf[..total])
    }

    pub fn write_leaf<S: Stream>(stream: &mut S, addr: u64, leaf: &LeafNode) -> Result<()> {
        let buf = leaf.encode();
        stream.write_at(addr, &buf)?;
        Ok(())
    }

    pub fn read_root<S: Stream>(stream: &S, c: &Constants) -> Result<u64> {
        if stream.len() < c.p as u64 {
            return Ok(0);
        }
        let mut buf = vec![0u8; c.p as usize];
        stream.read_at(0, &mut buf)?;
        Ok(c.read_addr(&buf))
    }

    pub fn write_root<S: Stream>(stream: &mut S, addr: u64, c: &Constants) -> Result<()> {
        write_pointer_at(stream, 0, addr, c)
    }

    /// Write a P-byte pointer cell at an arbitrary stream offset -- the root
    /// cell (offset 0) and a child pointer slot inside some parent's node
    /// record are both just this.
    pub fn write_pointer_at<S: Stream>(stream: &mut S, addr: u64, value: u64, c: &Constants) -> Result<()> {
        let mut buf = vec![0u8; c.p as usize];
        c.write_addr(value, &mut buf);
        stream.write_at(addr, &buf)?;
        Ok(())
    }
}

/// A decoded leaf record (spec §3 Leaf node layout).
#[derive(Debug, Clone)]
pub struct LeafNode {
    /// Remaining key bytes not covered by ancestor prefixes, including the
    /// trailing terminator byte. Never empty.
    pub partial_key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LeafNode {
    pub fn new(partial_key: Vec<u8>, value: Vec<u8>) -> Self {
        debug_assert!(!partial_key.is_empty());
        LeafNode { partial_key, value }
    }

    pub fn encoded_len(&self) -> u64 {
        1 + varint::length(self.partial_key.len() as u64) as u64
            + varint::length(self.value.len() as u64) as u64
            + self.partial_key.len() as u64
            + self.value.len() as u64
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![NodeClass::Leaf.tag()];
        out.extend(varint::encode(self.partial_key.len() as u64));
        out.extend(varint::encode(self.value.len() as u64));
        out.extend(&self.partial_key);
        out.extend(&self.value);
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.is_empty() || NodeClass::from_tag(buf[0])? != NodeClass::Leaf {
            return Err(ArtError::FormatError("not a leaf record".into()));
        }
        let mut pos = 1usize;
        let partial_len = varint::decode_cursor(buf, &mut pos)? as usize;
        let value_len = varint::decode_cursor(buf, &mut pos)? as usize;
        if buf.len() < pos + partial_len + value_len {
            return Err(ArtError::FormatError("leaf record truncated".into()));
        }
        let partial_key = buf[pos..pos + partial_len].to_vec();
        let value = buf[pos + partial_len..pos + partial_len + value_len].to_vec();
        if partial_key.is_empty() {
            return Err(ArtError::FormatError("leaf partial key is empty".into()));
        }
        Ok(LeafNode { partial_key, value })
    }
}
