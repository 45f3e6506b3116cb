//! A stream-backed adaptive radix tree index for billion-entry key/value
//! data (spec §1-§2). Every structural mutation follows the
//! allocate/write/rewrite-parent/free ordering in §5, so a crash between any
//! two steps leaves either the old or the new tree intact, never a mix.
//!
//! [`ArtTree`] is the façade over the free-standing engines in the other
//! modules: [`insert`], [`delete`], [`path`], [`enumerator`], [`query`],
//! [`optimise`] and [`header`] operate on a bare [`stream::Stream`] plus
//! [`node::Constants`]; this module adds the typed key/value codec layer and
//! bundles the allocator ([`store::Store`]) next to the stream so callers
//! only ever see one handle.

pub mod allocator;
pub mod codec;
pub mod delete;
pub mod enumerator;
pub mod error;
pub mod escape;
pub mod header;
pub mod insert;
pub mod node;
pub mod optimise;
pub mod path;
pub mod pool;
pub mod query;
pub mod store;
pub mod stream;
pub mod varint;

use std::marker::PhantomData;

use log::info;

use crate::codec::Codec;
use crate::error::{ArtError, Result};
use crate::node::{io, Constants};
use crate::query::{MatchMode, RangeMode};
use crate::store::Store;
use crate::stream::Stream;

/// A stream-backed adaptive radix tree mapping typed keys to typed values.
///
/// `KC`/`VC` are the [`Codec`]s used to turn `K`/`V` into the raw byte
/// strings the tree actually stores; key bytes are additionally run through
/// [`escape::EscapeAlphabet`] so the on-stream terminator byte never
/// collides with stored key content.
pub struct ArtTree<K, V, S, KC, VC> {
    stream: S,
    store: Store,
    c: Constants,
    item_count: u64,
    _types: PhantomData<fn() -> (K, V, KC, VC)>,
}

impl<K, V, S, KC, VC> ArtTree<K, V, S, KC, VC>
where
    S: Stream,
    KC: Codec<K>,
    VC: Codec<V>,
{
    /// Build a brand new, empty tree over `stream` (which must itself be
    /// empty) with the given format constants.
    pub fn create(stream: S, c: Constants) -> Self {
        ArtTree {
            stream,
            store: Store::new(c.p as u64, &c),
            c,
            item_count: 0,
            _types: PhantomData,
        }
    }

    /// Reopen an already-built tree image, recovering the allocator state
    /// from the tree's own nodes (spec §4.L `reload`).
    pub fn reload(stream: S, c: Constants) -> Result<Self> {
        let (store, item_count) = optimise::reload(&stream, &c)?;
        Ok(ArtTree {
            stream,
            store,
            c,
            item_count,
            _types: PhantomData,
        })
    }

    fn encode_key(&self, key: &K) -> Vec<u8> {
        let mut raw = Vec::new();
        KC::encode(key, &mut raw);
        let mut escaped = Vec::new();
        self.c.escape_alphabet().escape(&raw, &mut escaped);
        escaped
    }

    fn decode_key(&self, stored: &[u8]) -> Result<K> {
        let raw = self.c.escape_alphabet().unescape(stored, true)?;
        KC::decode(&raw)
    }

    fn decode_value(bytes: &[u8]) -> Result<V> {
        VC::decode(bytes)
    }

    pub fn count(&self) -> u64 {
        self.item_count
    }

    pub fn is_empty(&self) -> bool {
        self.item_count == 0
    }

    fn first_last(&self, want_max: bool) -> Result<Option<(K, V)>> {
        let root = io::read_root(&self.stream, &self.c)?;
        if root == 0 {
            return Ok(None);
        }
        let mut addr = root;
        let mut key = Vec::new();
        loop {
            let class = io::read_tag(&self.stream, addr)?;
            if class == crate::node::NodeClass::Leaf {
                let leaf = io::read_leaf(&self.stream, addr)?;
                let stored = &leaf.partial_key[..leaf.partial_key.len() - 1];
                key.extend_from_slice(stored);
                let decoded = self.decode_key(&key)?;
                let value = Self::decode_value(&leaf.value)?;
                return Ok(Some((decoded, value)));
            }
            let node = io::read_inner(&self.stream, addr, &self.c, class)?;
            key.extend_from_slice(&node.prefix);
            let child = if want_max { node.max_child() } else { node.min_child() };
            let (byte, child_addr) = child.expect("inner node always has at least one child");
            key.push(byte);
            addr = child_addr;
        }
    }

    /// Smallest key in the tree, if any.
    pub fn min_key(&self) -> Result<Option<(K, V)>> {
        self.first_last(false)
    }

    /// Largest key in the tree, if any.
    pub fn max_key(&self) -> Result<Option<(K, V)>> {
        self.first_last(true)
    }

    /// Look up `key`. `None` if absent.
    pub fn get(&self, key: &K) -> Result<Option<V>> {
        let ek = self.encode_key(key);
        let path = path::find_path(&self.stream, &self.c, &ek)?;
        if !path.is_exact() {
            return Ok(None);
        }
        let leaf = io::read_leaf(&self.stream, path.last().unwrap().address)?;
        Ok(Some(Self::decode_value(&leaf.value)?))
    }

    pub fn contains_key(&self, key: &K) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Insert or overwrite `key` with `value` (indexer-set semantics).
    pub fn set(&mut self, key: &K, value: &V) -> Result<()> {
        let ek = self.encode_key(key);
        let mut raw_value = Vec::new();
        VC::encode(value, &mut raw_value);
        let existed = self.contains_key(key)?;
        insert::insert(&mut self.stream, &mut self.store, &self.c, &ek, &raw_value, true)?;
        if !existed {
            self.item_count += 1;
        }
        Ok(())
    }

    /// Insert `key`, failing with [`ArtError::KeyExists`] if already present.
    pub fn add(&mut self, key: &K, value: &V) -> Result<()> {
        self.try_add(key, value)
    }

    pub fn try_add(&mut self, key: &K, value: &V) -> Result<()> {
        let ek = self.encode_key(key);
        let mut raw_value = Vec::new();
        VC::encode(value, &mut raw_value);
        insert::insert(&mut self.stream, &mut self.store, &self.c, &ek, &raw_value, false)?;
        self.item_count += 1;
        Ok(())
    }

    /// Insert every pair in `items`, stopping at the first failure (an
    /// already-present key). Pairs inserted before the failure stay inserted.
    pub fn add_range<'a, I>(&mut self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a (K, V)>,
        K: 'a,
        V: 'a,
    {
        for (k, v) in items {
            self.add(k, v)?;
        }
        Ok(())
    }

    /// Remove `key`. Returns whether it was present.
    pub fn remove(&mut self, key: &K) -> Result<bool> {
        let ek = self.encode_key(key);
        let removed = delete::remove(&mut self.stream, &mut self.store, &self.c, &ek)?;
        if removed {
            self.item_count -= 1;
        }
        Ok(removed)
    }

    /// Remove every key in `keys`. Returns the count actually removed.
    pub fn remove_range<'a, I>(&mut self, keys: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut removed = 0;
        for k in keys {
            if self.remove(k)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every key, leaving an empty tree with the same format
    /// constants.
    pub fn clear(&mut self) -> Result<()> {
        io::write_root(&mut self.stream, 0, &self.c)?;
        self.store = Store::new(self.stream.len().max(self.c.p as u64), &self.c);
        self.item_count = 0;
        Ok(())
    }

    fn decode_pairs(&self, raw: Vec<(Vec<u8>, Vec<u8>)>) -> Result<Vec<(K, V)>> {
        raw.into_iter()
            .map(|(k, v)| Ok((self.decode_key(&k)?, Self::decode_value(&v)?)))
            .collect()
    }

    /// Every key in the tree, ascending.
    pub fn keys(&self) -> Result<Vec<K>> {
        Ok(self.items()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Every value in the tree, in key order.
    pub fn values(&self) -> Result<Vec<V>> {
        Ok(self.items()?.into_iter().map(|(_, v)| v).collect())
    }

    /// Every `(key, value)` pair, ascending by key.
    pub fn items(&self) -> Result<Vec<(K, V)>> {
        let root = io::read_root(&self.stream, &self.c)?;
        if root == 0 {
            return Ok(Vec::new());
        }
        let raw: Result<Vec<_>> = enumerator::ChildrenIter::new(&self.stream, &self.c, Vec::new(), root)?.collect();
        self.decode_pairs(raw?)
    }

    /// Every key with `prefix` as a byte prefix.
    pub fn starts_with(&self, prefix: &K) -> Result<Vec<(K, V)>> {
        let ek = self.encode_key(prefix);
        let raw = query::starts_with(&self.stream, &self.c, &ek)?;
        self.decode_pairs(raw)
    }

    /// Match every key against a fixed-length wildcard `pattern`, where
    /// `wildcard` stands for "any byte" at that position.
    pub fn partial_match(&self, pattern: &[u8], wildcard: u8, mode: MatchMode) -> Result<Vec<(K, V)>> {
        let bitmap = query::wildcard_bitmap(pattern, wildcard);
        let raw = query::pattern_match(&self.stream, &self.c, &bitmap, mode)?;
        self.decode_pairs(raw)
    }

    /// Match every key against a small regexp subset (literals, `[...]`
    /// classes, `[*]` any-byte; see [`query::parse_regex`]).
    pub fn regexp_match(&self, pattern: &str, mode: MatchMode) -> Result<Vec<(K, V)>> {
        let bitmap = query::parse_regex(pattern)?;
        let raw = query::pattern_match(&self.stream, &self.c, &bitmap, mode)?;
        self.decode_pairs(raw)
    }

    /// Keys within `hamming` total mismatches of `pattern`, charging
    /// `cost_missing`/`cost_extra` per byte of length difference.
    pub fn regexp_near_neighbors(
        &self,
        pattern: &str,
        hamming: i64,
        cost_missing: i64,
        cost_extra: i64,
    ) -> Result<Vec<(K, V)>> {
        let bitmap = query::parse_regex(pattern)?;
        let raw = query::regexp_near_neighbors(&self.stream, &self.c, &bitmap, hamming, cost_missing, cost_extra)?;
        self.decode_pairs(raw)
    }

    /// Every key in `[start, end]`. Either bound is unbounded when `None`.
    pub fn range(&self, start: Option<&K>, end: Option<&K>, mode: RangeMode) -> Result<Vec<(K, V)>> {
        let start_bytes = start.map(|k| self.encode_key(k));
        let end_bytes = end.map(|k| self.encode_key(k));
        let raw = query::range(
            &self.stream,
            &self.c,
            start_bytes.as_deref(),
            end_bytes.as_deref(),
            mode,
        )?;
        self.decode_pairs(raw)
    }

    /// The shortest prefix of `key` that no other stored key shares, if
    /// `key` is present. This is exactly the key bytes consumed up to and
    /// including the last ancestor on its path with more than one child: any
    /// shorter prefix would still be ambiguous with a sibling, and nothing
    /// past that point can ever be shared, by the radix-tree dispatch
    /// invariant.
    pub fn calculate_shortest_unique_key(&self, key: &K) -> Result<Option<K>> {
        let ek = self.encode_key(key);
        let found = path::find_path(&self.stream, &self.c, &ek)?;
        if !found.is_exact() {
            return Ok(None);
        }
        let last = found.last().unwrap();
        let seed_len = found.consumed - last.matched_len;
        let raw = self.c.escape_alphabet().unescape(&ek[..seed_len], true)?;
        Ok(Some(KC::decode(&raw)?))
    }

    /// Compact this tree's reachable nodes into `dst` (a fresh, empty
    /// stream), eliminating fragmentation and any node classes that have
    /// shrunk since they were last downgraded. The caller is expected to
    /// follow up with [`ArtTree::reload`] on `dst` to obtain a usable tree.
    pub fn optimise_into<D: Stream>(&self, dst: &mut D) -> Result<u64> {
        info!("optimise: compacting {} item(s)", self.item_count);
        optimise::optimise(&self.stream, &self.c, dst)
    }

    pub fn constants(&self) -> Constants {
        self.c
    }

    pub fn into_stream(self) -> S {
        self.stream
    }
}

pub use crate::error::ArtError as Error;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{BytesCodec, StringCodec};
    use crate::stream::MemStream;

    type StrTree = ArtTree<String, String, MemStream, StringCodec, StringCodec>;

    fn fresh() -> StrTree {
        ArtTree::create(MemStream::new(), Constants::default())
    }

    #[test]
    fn set_then_get_roundtrips() {
        let mut t = fresh();
        t.set(&"banana".to_string(), &"yellow".to_string()).unwrap();
        assert_eq!(t.get(&"banana".to_string()).unwrap(), Some("yellow".to_string()));
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn add_duplicate_fails_but_set_overwrites() {
        let mut t = fresh();
        t.add(&"a".to_string(), &"1".to_string()).unwrap();
        assert!(matches!(
            t.add(&"a".to_string(), &"2".to_string()).unwrap_err(),
            ArtError::KeyExists
        ));
        t.set(&"a".to_string(), &"2".to_string()).unwrap();
        assert_eq!(t.get(&"a".to_string()).unwrap(), Some("2".to_string()));
        assert_eq!(t.count(), 1);
    }

    #[test]
    fn remove_updates_count_and_presence() {
        let mut t = fresh();
        t.add(&"a".to_string(), &"1".to_string()).unwrap();
        t.add(&"b".to_string(), &"2".to_string()).unwrap();
        assert!(t.remove(&"a".to_string()).unwrap());
        assert!(!t.remove(&"a".to_string()).unwrap());
        assert_eq!(t.count(), 1);
        assert!(!t.contains_key(&"a".to_string()).unwrap());
    }

    #[test]
    fn clear_empties_the_tree() {
        let mut t = fresh();
        t.add(&"a".to_string(), &"1".to_string()).unwrap();
        t.add(&"b".to_string(), &"2".to_string()).unwrap();
        t.clear().unwrap();
        assert_eq!(t.count(), 0);
        assert_eq!(t.items().unwrap(), Vec::new());
    }

    #[test]
    fn min_and_max_key_track_insert_order_independent_bounds() {
        let mut t = fresh();
        for k in ["banana", "apple", "cherry"] {
            t.add(&k.to_string(), &k.to_string()).unwrap();
        }
        assert_eq!(t.min_key().unwrap().map(|(k, _)| k), Some("apple".to_string()));
        assert_eq!(t.max_key().unwrap().map(|(k, _)| k), Some("cherry".to_string()));
    }

    #[test]
    fn shortest_unique_key_is_the_first_diverging_prefix() {
        let mut t = fresh();
        t.add(&"banana".to_string(), &"1".to_string()).unwrap();
        t.add(&"bandana".to_string(), &"2".to_string()).unwrap();
        // "banana" and "bandana" share "ban"; the 4th byte ('a' vs 'd') is
        // where a lookup first has to choose a side.
        let short = t.calculate_shortest_unique_key(&"banana".to_string()).unwrap();
        assert_eq!(short, Some("bana".to_string()));
    }

    #[test]
    fn shortest_unique_key_of_a_missing_key_is_none() {
        let t = fresh();
        assert_eq!(t.calculate_shortest_unique_key(&"nope".to_string()).unwrap(), None);
    }

    #[test]
    fn optimise_into_then_reload_preserves_contents() {
        let mut t = fresh();
        for k in ["banana", "bandana", "bank", "apple"] {
            t.add(&k.to_string(), &k.to_string()).unwrap();
        }
        t.remove(&"bank".to_string()).unwrap();

        let mut dst = MemStream::new();
        t.optimise_into(&mut dst).unwrap();
        let reloaded: StrTree = ArtTree::reload(dst, t.constants()).unwrap();

        assert_eq!(reloaded.count(), 3);
        assert_eq!(reloaded.get(&"banana".to_string()).unwrap(), Some("banana".to_string()));
        assert_eq!(reloaded.get(&"bank".to_string()).unwrap(), None);
    }

    type BytesTree = ArtTree<Vec<u8>, Vec<u8>, MemStream, BytesCodec, BytesCodec>;

    #[test]
    fn bytes_codec_tree_supports_starts_with() {
        let mut t: BytesTree = ArtTree::create(MemStream::new(), Constants::default());
        t.add(&b"banana".to_vec(), &b"1".to_vec()).unwrap();
        t.add(&b"bandana".to_vec(), &b"2".to_vec()).unwrap();
        t.add(&b"apple".to_vec(), &b"0".to_vec()).unwrap();
        let hits = t.starts_with(&b"ban".to_vec()).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
