use thiserror::Error;

/// Failures of the cipher adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// The authentication tag did not verify: wrong key, truncated data, or tampering.
    #[error("integrity check failed: wrong key, truncated data, or tampering")]
    Integrity,

    /// The token could not be parsed at all.
    #[error("malformed ciphertext: {0}")]
    Format(String),

    /// Plaintext larger than XChaCha20-Poly1305 can seal in one message (~256 GiB).
    #[error("plaintext of {len} bytes exceeds the AEAD message limit")]
    Oversized { len: usize },

    /// A textual key did not decode to exactly 32 bytes.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
