use std::path::PathBuf;

use crypter_crypto::CipherError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("reading key store {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The sealed token failed to open: wrong master key, truncation, or tampering.
    #[error("key store {} could not be decrypted: {source}", .path.display())]
    Corrupt { path: PathBuf, source: CipherError },

    /// The token opened but its JSON content is not a valid key map.
    #[error("key store {} is malformed: {reason}", .path.display())]
    Malformed { path: PathBuf, reason: String },

    #[error("writing key store {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("sealing key store: {0}")]
    Seal(CipherError),

    #[error("serializing key store: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl StoreError {
    /// True when a store file exists but its content is unusable.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. } | Self::Malformed { .. })
    }
}
