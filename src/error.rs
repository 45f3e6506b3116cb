//! Error taxonomy for the tree. See spec §7.

use std::io;

/// Every fallible tree operation returns this. Point lookup and iteration
/// never allocate to construct an error on their hot path -- `KeyNotFound`
/// and friends are plain unit/owned-string variants.
#[derive(thiserror::Error, Debug)]
pub enum ArtError {
    #[error("key not found")]
    KeyNotFound,

    #[error("key already exists")]
    KeyExists,

    #[error("key is empty")]
    EmptyKey,

    #[error("malformed data: {0}")]
    FormatError(String),

    #[error("malformed pattern: {0}")]
    PatternError(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("header decode failed: {0}")]
    Header(#[from] serde_cbor::Error),
}

pub type Result<T> = std::result::Result<T, ArtError>;
