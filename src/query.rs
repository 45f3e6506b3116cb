//! Query façades (spec §4.K): `starts_with` reuses the path finder to land
//! on the right subtree and then hands off to a plain DFS; wildcard/regexp/
//! near-neighbour/range all compile down to a per-position byte set and a
//! spending budget fed into [`crate::enumerator::FilterableDfs`].

use crate::enumerator::{ChildrenIter, FilterItem, FilterKind, FilterableDfs};
use crate::error::{ArtError, Result};
use crate::node::{io, Constants, NodeClass};
use crate::path::find_path;
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// The match must account for the whole key: nothing may follow the
    /// pattern.
    Exact,
    /// The pattern only has to match a prefix of the key.
    StartsWith,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeMode {
    /// Prune a subtree once its accumulated key has lexicographically
    /// diverged outside `[start, end]`.
    Alphabetical,
    /// Same pruning, expressed in terms of the tree's own node boundaries
    /// rather than a full byte-by-byte compare at every step. Kept as a
    /// distinct mode for API fidelity; this implementation applies the same
    /// (always-correct) alphabetical pruning for both, since the tree-mode
    /// variant is a performance refinement rather than a different result
    /// set.
    Tree,
}

/// A per-position set of admissible bytes, shared by wildcard and regexp
/// patterns alike -- a wildcard position is just a set containing every
/// byte.
#[derive(Clone)]
pub struct ByteSet([u64; 4]);

impl ByteSet {
    pub fn empty() -> Self {
        ByteSet([0; 4])
    }

    pub fn full() -> Self {
        ByteSet([u64::MAX; 4])
    }

    pub fn single(b: u8) -> Self {
        let mut s = Self::empty();
        s.insert(b);
        s
    }

    pub fn insert(&mut self, b: u8) {
        self.0[(b / 64) as usize] |= 1u64 << (b % 64);
    }

    pub fn insert_range(&mut self, lo: u8, hi: u8) {
        for b in lo..=hi {
            self.insert(b);
        }
    }

    pub fn contains(&self, b: u8) -> bool {
        self.0[(b / 64) as usize] & (1u64 << (b % 64)) != 0
    }
}

/// Build a per-position bitmap from a literal pattern where `wildcard` means
/// "any byte". Operates directly on `pattern`'s bytes; this does not run
/// them through the key-terminator escape first (see DESIGN.md).
pub fn wildcard_bitmap(pattern: &[u8], wildcard: u8) -> Vec<ByteSet> {
    pattern
        .iter()
        .map(|&b| if b == wildcard { ByteSet::full() } else { ByteSet::single(b) })
        .collect()
}

/// Parse a small regexp subset into a per-position bitmap: literal bytes,
/// `\\`/`\[`/`\]` escapes, `[...]` character classes with `a-z` ranges, and
/// `[*]` meaning "any byte". There is no repetition or alternation -- every
/// token consumes exactly one byte of the matched key.
pub fn parse_regex(pattern: &str) -> Result<Vec<ByteSet>> {
    let bytes = pattern.as_bytes();
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                i += 1;
                let c = *bytes
                    .get(i)
                    .ok_or_else(|| ArtError::PatternError("trailing backslash".into()))?;
                if c == b'\\' || c == b'[' || c == b']' {
                    out.push(ByteSet::single(c));
                    i += 1;
                } else {
                    return Err(ArtError::PatternError(format!("invalid escape \\{}", c as char)));
                }
            }
            b'[' => {
                i += 1;
                if bytes[i..].starts_with(b"*]") {
                    out.push(ByteSet::full());
                    i += 2;
                    continue;
                }
                let mut set = ByteSet::empty();
                while i < bytes.len() && bytes[i] != b']' {
                    if i + 2 < bytes.len() && bytes[i + 1] == b'-' && bytes[i + 2] != b']' {
                        set.insert_range(bytes[i], bytes[i + 2]);
                        i += 3;
                    } else {
                        set.insert(bytes[i]);
                        i += 1;
                    }
                }
                if i >= bytes.len() {
                    return Err(ArtError::PatternError("unterminated character class".into()));
                }
                i += 1; // skip ']'
                out.push(set);
            }
            c => {
                out.push(ByteSet::single(c));
                i += 1;
            }
        }
    }
    Ok(out)
}

/// `starts_with`: land on the subtree whose every leaf has `query_key` as a
/// byte prefix, then enumerate it. Handles all three spec outcomes (no
/// results, a single leaf, or a whole subtree) uniformly by reusing the path
/// finder's trail instead of classifying them up front.
pub fn starts_with<S: Stream>(stream: &S, c: &Constants, query_key: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let root = io::read_root(stream, c)?;
    if root == 0 {
        return Ok(Vec::new());
    }
    if query_key.is_empty() {
        return ChildrenIter::new(stream, c, Vec::new(), root)?.collect();
    }

    let path = find_path(stream, c, query_key)?;
    let last = match path.last() {
        Some(step) => step.clone(),
        None => return Ok(Vec::new()),
    };

    if last.class == NodeClass::Leaf {
        if !path.starts_with() {
            return Ok(Vec::new());
        }
        let leaf = io::read_leaf(stream, last.address)?;
        let stored = &leaf.partial_key[..leaf.partial_key.len() - 1];
        let mut full_key = query_key.to_vec();
        full_key.extend_from_slice(&stored[last.matched_len..]);
        return Ok(vec![(full_key, leaf.value)]);
    }

    if path.consumed != query_key.len() {
        return Ok(Vec::new());
    }
    let seed_len = path.consumed - last.matched_len;
    let seed = query_key[..seed_len].to_vec();
    ChildrenIter::new(stream, c, seed, last.address)?.collect()
}

/// Shared wildcard/regexp engine: any byte within the pattern's length that
/// misses its bitmap costs 1 (an immediate prune, since the whole call runs
/// with budget 0); a byte equal to the terminator is always admitted for
/// free, since it can only ever appear at a key's own end. Bytes past the
/// pattern length are free in `StartsWith` mode and cost 1 (again an
/// immediate prune) in `Exact` mode. A leaf whose key came out shorter than
/// the pattern is rejected at `LeafFinal` regardless of mode.
pub fn pattern_match<S: Stream>(
    stream: &S,
    c: &Constants,
    bitmap: &[ByteSet],
    mode: MatchMode,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let root = io::read_root(stream, c)?;
    if root == 0 {
        return Ok(Vec::new());
    }
    let terminator = c.terminator;
    let pattern_len = bitmap.len();
    let bitmap = bitmap.to_vec();
    let penalty = move |item: &FilterItem| -> i64 {
        match item.kind {
            FilterKind::Byte => {
                let byte = *item.accumulated.last().unwrap();
                if byte == terminator {
                    return 0;
                }
                let pos = item.accumulated.len() - 1;
                if pos < pattern_len {
                    if bitmap[pos].contains(byte) {
                        0
                    } else {
                        1
                    }
                } else {
                    match mode {
                        MatchMode::StartsWith => 0,
                        MatchMode::Exact => 1,
                    }
                }
            }
            FilterKind::LeafFinal => {
                if item.accumulated.len() < pattern_len {
                    i64::MAX / 4
                } else {
                    0
                }
            }
        }
    };
    FilterableDfs::new(stream, c, Vec::new(), root, 0, penalty)?.collect()
}

/// `regexp_near_neighbors`: same bitmap as `pattern_match`, but scored as a
/// Hamming-style distance instead of a hard pass/fail -- an in-range
/// mismatch costs 1, a byte past the pattern costs `cost_extra`, and a key
/// that ends up shorter than the pattern is charged `cost_missing` once per
/// missing byte at `LeafFinal`. `hamming` is the total budget.
pub fn regexp_near_neighbors<S: Stream>(
    stream: &S,
    c: &Constants,
    bitmap: &[ByteSet],
    hamming: i64,
    cost_missing: i64,
    cost_extra: i64,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let root = io::read_root(stream, c)?;
    if root == 0 {
        return Ok(Vec::new());
    }
    let terminator = c.terminator;
    let pattern_len = bitmap.len();
    let bitmap = bitmap.to_vec();
    let penalty = move |item: &FilterItem| -> i64 {
        match item.kind {
            FilterKind::Byte => {
                let byte = *item.accumulated.last().unwrap();
                if byte == terminator {
                    return 0;
                }
                let pos = item.accumulated.len() - 1;
                if pos < pattern_len {
                    if bitmap[pos].contains(byte) {
                        0
                    } else {
                        1
                    }
                } else {
                    cost_extra
                }
            }
            FilterKind::LeafFinal => {
                let key_len = item.accumulated.len();
                if key_len < pattern_len {
                    cost_missing * (pattern_len - key_len) as i64
                } else {
                    0
                }
            }
        }
    };
    FilterableDfs::new(stream, c, Vec::new(), root, hamming, penalty)?.collect()
}

fn definitely_below(key: &[u8], bound: &[u8]) -> bool {
    for (a, b) in key.iter().zip(bound.iter()) {
        if a < b {
            return true;
        }
        if a > b {
            return false;
        }
    }
    false
}

fn definitely_above(key: &[u8], bound: &[u8]) -> bool {
    for (a, b) in key.iter().zip(bound.iter()) {
        if a > b {
            return true;
        }
        if a < b {
            return false;
        }
    }
    // Equal up to the shorter length: a strictly longer continuation of
    // `bound` is lexicographically greater than it (e.g. "banana" > "ban"),
    // and that conclusion only gets stronger as more bytes are appended. A
    // `key` that is merely a (so-far) proper prefix of `bound` isn't
    // decided yet -- it may still grow past `bound` or stop short of it.
    key.len() > bound.len()
}

/// `range`: enumerate every key in `[start, end]` (either bound optional,
/// meaning unbounded on that side). Pruned during the walk whenever the
/// accumulated bytes already prove the final key will fall outside the
/// bounds; a post-filter on the (rare) results whose length alone doesn't
/// yet prove divergence catches the rest.
pub fn range<S: Stream>(
    stream: &S,
    c: &Constants,
    start: Option<&[u8]>,
    end: Option<&[u8]>,
    _mode: RangeMode,
) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let root = io::read_root(stream, c)?;
    if root == 0 {
        return Ok(Vec::new());
    }
    if start.is_none() && end.is_none() {
        return ChildrenIter::new(stream, c, Vec::new(), root)?.collect();
    }

    let terminator = c.terminator;
    let start_v = start.map(|s| s.to_vec());
    let end_v = end.map(|s| s.to_vec());
    let penalty = move |item: &FilterItem| -> i64 {
        if matches!(item.kind, FilterKind::LeafFinal) {
            return 0;
        }
        let byte = *item.accumulated.last().unwrap();
        if byte == terminator {
            return 0;
        }
        let key = item.accumulated;
        let below = start_v.as_deref().map_or(false, |s| definitely_below(key, s));
        let above = end_v.as_deref().map_or(false, |e| definitely_above(key, e));
        if below || above {
            i64::MAX / 4
        } else {
            0
        }
    };
    let mut out = Vec::new();
    for item in FilterableDfs::new(stream, c, Vec::new(), root, 0, penalty)? {
        let (key, value) = item?;
        if let Some(s) = &start_v {
            if key.as_slice() < s.as_slice() {
                continue;
            }
        }
        if let Some(e) = &end_v {
            if key.as_slice() > e.as_slice() {
                continue;
            }
        }
        out.push((key, value));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insert::insert;
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

    fn keys_of(mut v: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<Vec<u8>> {
        v.sort();
        v.into_iter().map(|(k, _)| k).collect()
    }

    #[test]
    fn starts_with_empty_query_returns_everything() {
        let (stream, c) = build(&[(b"banana", b"1"), (b"apple", b"2")]);
        let hits = starts_with(&stream, &c, b"").unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn starts_with_pointer_case_returns_the_whole_subtree() {
        let (stream, c) = build(&[(b"banana", b"1"), (b"bandana", b"2"), (b"bank", b"3"), (b"apple", b"0")]);
        let hits = starts_with(&stream, &c, b"ban").unwrap();
        assert_eq!(
            keys_of(hits),
            vec![b"banana".to_vec(), b"bandana".to_vec(), b"bank".to_vec()]
        );
    }

    #[test]
    fn starts_with_exact_leaf_case_returns_one_item() {
        let (stream, c) = build(&[(b"banana", b"1"), (b"ban", b"2")]);
        let hits = starts_with(&stream, &c, b"banana").unwrap();
        assert_eq!(hits, vec![(b"banana".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn starts_with_no_match_returns_nothing() {
        let (stream, c) = build(&[(b"banana", b"1")]);
        assert!(starts_with(&stream, &c, b"xyz").unwrap().is_empty());
    }

    #[test]
    fn wildcard_pattern_matches_fixed_length_with_one_free_position() {
        let (stream, c) = build(&[(b"bat", b"1"), (b"bit", b"2"), (b"big", b"3")]);
        let bitmap = wildcard_bitmap(b"b.t", b'.');
        let hits = pattern_match(&stream, &c, &bitmap, MatchMode::Exact).unwrap();
        assert_eq!(keys_of(hits), vec![b"bat".to_vec(), b"bit".to_vec()]);
    }

    #[test]
    fn regex_character_class_matches_any_listed_byte() {
        let (stream, c) = build(&[(b"bat", b"1"), (b"bit", b"2"), (b"but", b"3"), (b"bet", b"4")]);
        let bitmap = parse_regex("b[aiu]t").unwrap();
        let hits = pattern_match(&stream, &c, &bitmap, MatchMode::Exact).unwrap();
        assert_eq!(
            keys_of(hits),
            vec![b"bat".to_vec(), b"but".to_vec(), b"bit".to_vec()]
        );
    }

    #[test]
    fn regex_any_byte_token_matches_everything_at_that_position() {
        let (stream, c) = build(&[(b"cat", b"1"), (b"cot", b"2")]);
        let bitmap = parse_regex("c[*]t").unwrap();
        let hits = pattern_match(&stream, &c, &bitmap, MatchMode::Exact).unwrap();
        assert_eq!(keys_of(hits), vec![b"cat".to_vec(), b"cot".to_vec()]);
    }

    #[test]
    fn near_neighbors_admits_one_substitution_within_budget() {
        let (stream, c) = build(&[(b"bank", b"1"), (b"bend", b"2"), (b"bonk", b"3")]);
        let bitmap = parse_regex("bank").unwrap();
        let hits = regexp_near_neighbors(&stream, &c, &bitmap, 1, 1, 1).unwrap();
        let keys = keys_of(hits);
        assert!(keys.contains(&b"bank".to_vec()));
        assert!(keys.contains(&b"bonk".to_vec()));
        assert!(!keys.contains(&b"bend".to_vec()));
    }

    #[test]
    fn range_returns_only_keys_within_bounds() {
        let (stream, c) = build(&[(b"apple", b"0"), (b"banana", b"1"), (b"cherry", b"2"), (b"date", b"3")]);
        let hits = range(&stream, &c, Some(b"banana"), Some(b"cherry"), RangeMode::Alphabetical).unwrap();
        assert_eq!(keys_of(hits), vec![b"banana".to_vec(), b"cherry".to_vec()]);
    }

    #[test]
    fn range_with_no_bounds_is_a_full_scan() {
        let (stream, c) = build(&[(b"apple", b"0"), (b"banana", b"1")]);
        let hits = range(&stream, &c, None, None, RangeMode::Alphabetical).unwrap();
        assert_eq!(hits.len(), 2);
    }
}
