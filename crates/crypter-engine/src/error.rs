use std::path::PathBuf;

use crypter_crypto::CipherError;
use crypter_store::StoreError;
use thiserror::Error;

/// Per-file failure. Reported for that file only, never fatal to a batch.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no key found for {0}")]
    NoKeyFound(String),

    /// The on-disk ciphertext is too different from the stored copy to recover.
    #[error(
        "encrypted file {identifier} does not match stored data (similarity {ratio:.3}), decryption aborted"
    )]
    CiphertextMismatch { identifier: String, ratio: f64 },

    /// `IntegrityError` / `FormatError` from the cipher adapter.
    #[error(transparent)]
    Cipher(#[from] CipherError),

    /// The key could not be persisted; the plaintext must not be overwritten.
    #[error("key store not updated, file left as is: {0}")]
    Store(#[from] StoreError),

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Identifiers are exact paths; a lossy conversion could merge two files.
    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("recovery threshold must be in (0.0, 1.0], got {0}")]
    InvalidThreshold(f64),
}

impl EngineError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
