//! Persistent file header (spec §4.O), grounded in the teacher's
//! `bkfile.rs`: a magic line, a checksum line, then a CBOR-encoded
//! descriptor, followed by the tree's raw stream bytes. Unlike the teacher's
//! fixed section table (built for a flat node/key/distance array layout),
//! the descriptor here only needs to record the `Constants` the tree was
//! built with plus a couple of informational fields -- the tree body is
//! self-describing from its root pointer onward.

use std::io::BufRead;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ArtError, Result};
use crate::node::Constants;

pub const MAGIC_VERSION: &str = "ARTSTREAM: 0001";
const HASH_HEADER_NAME: &str = "SHA256";

/// Everything needed to reopen a tree image besides the bytes themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderDescr {
    #[serde(rename = "Created-On")]
    pub created_on: String,

    #[serde(rename = "Item-Count")]
    pub item_count: u64,

    #[serde(rename = "P")]
    pub p: u8,
    #[serde(rename = "L")]
    pub l: u8,
    #[serde(rename = "Terminator")]
    pub terminator: u8,
    #[serde(rename = "Escape-Lead")]
    pub escape_lead: u8,
    #[serde(rename = "Escape-Follow")]
    pub escape_follow: u8,
}

impl HeaderDescr {
    pub fn new(created_on: String, item_count: u64, c: &Constants) -> Self {
        HeaderDescr {
            created_on,
            item_count,
            p: c.p,
            l: c.l,
            terminator: c.terminator,
            escape_lead: c.escape_lead,
            escape_follow: c.escape_follow,
        }
    }

    pub fn constants(&self) -> Constants {
        Constants {
            p: self.p,
            l: self.l,
            terminator: self.terminator,
            escape_lead: self.escape_lead,
            escape_follow: self.escape_follow,
        }
    }
}

/// Writes `MAGIC\nSHA256: <hex of body>\n` followed by the CBOR descriptor
/// and then `body` verbatim.
pub fn write(descr: &HeaderDescr, body: &[u8]) -> Result<Vec<u8>> {
    let mut hasher = Sha256::new();
    let cbor = serde_cbor::to_vec(descr)?;
    hasher.input(&cbor);
    hasher.input(body);
    let checksum = format!("{:x}", hasher.result());

    let mut out = Vec::with_capacity(MAGIC_VERSION.len() + 1 + checksum.len() + 16 + cbor.len() + body.len());
    out.extend_from_slice(MAGIC_VERSION.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(HASH_HEADER_NAME.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(checksum.as_bytes());
    out.push(b'\n');
    out.extend_from_slice(&cbor);
    out.extend_from_slice(body);
    Ok(out)
}

/// Parses the magic and checksum lines, decodes the descriptor, and
/// optionally verifies the checksum against the CBOR bytes plus whatever
/// follows. Returns the descriptor and a slice of `data` positioned at the
/// start of the tree body.
pub fn read(data: &[u8], verify_checksum: bool) -> Result<(HeaderDescr, &[u8])> {
    let mut reader = data;

    let mut magic_line = Vec::new();
    read_line(&mut reader, &mut magic_line)?;
    if magic_line != MAGIC_VERSION.as_bytes() {
        return Err(ArtError::FormatError(format!(
            "unrecognized file format (expected {MAGIC_VERSION:?})"
        )));
    }

    let mut checksum_line = Vec::new();
    read_line(&mut reader, &mut checksum_line)?;
    let prefix = format!("{HASH_HEADER_NAME}: ");
    if !checksum_line.starts_with(prefix.as_bytes()) {
        return Err(ArtError::FormatError(format!(
            "unrecognized checksum header (expected {HASH_HEADER_NAME:?})"
        )));
    }
    let expected_checksum = &checksum_line[prefix.len()..];

    let descr_start = data.len() - reader.len();
    let mut de = serde_cbor::Deserializer::from_slice(reader);
    let descr = HeaderDescr::deserialize(&mut de)?;
    let descr_end = descr_start + de.byte_offset();

    if verify_checksum {
        let mut hasher = Sha256::new();
        hasher.input(&data[descr_start..]);
        let found = format!("{:x}", hasher.result());
        if found.as_bytes() != expected_checksum {
            return Err(ArtError::FormatError(format!(
                "checksum mismatch: found {found}, expected {}",
                String::from_utf8_lossy(expected_checksum)
            )));
        }
    }

    Ok((descr, &data[descr_end..]))
}

fn read_line(reader: &mut &[u8], out: &mut Vec<u8>) -> Result<()> {
    let consumed = reader.read_until(b'\n', out)?;
    if consumed == 0 || out.last() != Some(&b'\n') {
        return Err(ArtError::FormatError("truncated header".into()));
    }
    out.pop();
    Ok(())
}
