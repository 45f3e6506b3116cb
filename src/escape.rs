//! Key-terminator escaping (spec §4.E): an injective byte-stream mapping
//! that removes the leaf terminator `T` from the stored alphabet.

use crate::error::{ArtError, Result};

/// The three reserved bytes a tree is constructed with. `T` never appears in
/// a stored key; `lead`/`follow` form the two-byte escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscapeAlphabet {
    pub terminator: u8,
    pub lead: u8,
    pub follow: u8,
}

impl EscapeAlphabet {
    pub fn new(terminator: u8, lead: u8, follow: u8) -> Self {
        debug_assert!(terminator != lead && terminator != follow && lead != follow);
        EscapeAlphabet {
            terminator,
            lead,
            follow,
        }
    }

    /// `T -> lead follow`, `lead -> lead lead`, anything else -> itself.
    pub fn escape(&self, raw: &[u8], out: &mut Vec<u8>) {
        out.reserve(raw.len());
        for &b in raw {
            if b == self.terminator {
                out.push(self.lead);
                out.push(self.follow);
            } else if b == self.lead {
                out.push(self.lead);
                out.push(self.lead);
            } else {
                out.push(b);
            }
        }
    }

    /// Inverse of `escape`. `complete` signals whether `stored` is the full
    /// available buffer (in which case a trailing lone `lead` byte is a
    /// format error) or merely a prefix that may be extended (in which case
    /// the routine returns what it could decode and the caller is
    /// expected to supply more bytes before finishing).
    pub fn unescape(&self, stored: &[u8], complete: bool) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(stored.len());
        let mut i = 0;
        while i < stored.len() {
            let b = stored[i];
            if b == self.lead {
                if i + 1 >= stored.len() {
                    if complete {
                        return Err(ArtError::FormatError(
                            "escape sequence truncated at end of buffer".into(),
                        ));
                    }
                    break;
                }
                let next = stored[i + 1];
                if next == self.follow {
                    out.push(self.terminator);
                } else if next == self.lead {
                    out.push(self.lead);
                } else {
                    return Err(ArtError::FormatError(format!(
                        "invalid escape continuation byte {next:#x}"
                    )));
                }
                i += 2;
            } else {
                out.push(b);
                i += 1;
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn alphabet() -> EscapeAlphabet {
        EscapeAlphabet::new(0, 255, 1)
    }

    #[test]
    fn escapes_terminator_and_lead() {
        let a = alphabet();
        let mut out = Vec::new();
        a.escape(&[1, 0, 255, 2], &mut out);
        assert_eq!(out, vec![1, 255, 1, 255, 255, 2]);
        assert!(!out.contains(&a.terminator));
    }

    #[test]
    fn unescape_inverts_escape() {
        let a = alphabet();
        let raw = b"ban\x00ana\xff";
        let mut escaped = Vec::new();
        a.escape(raw, &mut escaped);
        assert!(!escaped.contains(&0));
        let back = a.unescape(&escaped, true).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn partial_prefix_stops_before_incomplete_pair() {
        let a = alphabet();
        // A lone trailing lead byte, not yet complete, should just be held back.
        let partial = [1u8, 2, 255];
        let out = a.unescape(&partial, false).unwrap();
        assert_eq!(out, vec![1, 2]);
    }

    #[test]
    fn incomplete_pair_at_true_end_is_format_error() {
        let a = alphabet();
        let partial = [1u8, 2, 255];
        assert!(a.unescape(&partial, true).is_err());
    }

    proptest! {
        #[test]
        fn roundtrip_any_bytes(raw in proptest::collection::vec(any::<u8>(), 0..64)) {
            let a = alphabet();
            let mut escaped = Vec::new();
            a.escape(&raw, &mut escaped);
            prop_assert!(!escaped.contains(&a.terminator));
            let back = a.unescape(&escaped, true).unwrap();
            prop_assert_eq!(back, raw);
        }
    }
}
