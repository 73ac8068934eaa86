//! crypter-crypto: cipher adapter for the crypter key store
//!
//! Every encrypted file gets its own random 256-bit key. Ciphertexts are
//! self-describing text tokens:
//!
//! ```text
//! base64url( 0x81 | timestamp (8 bytes, BE) | nonce (24 bytes) | ciphertext | tag (16 bytes) )
//! AAD = 0x81 | timestamp
//! ```
//!
//! The key store itself is sealed with a key derived from the master key:
//!
//! ```text
//! Master Key (256-bit, embedded in the application unless overridden)
//!   └── Store Key (HKDF-SHA256, domain="crypter-keystore")
//!         └── key store token (same format as file tokens)
//! ```
//!
//! The embedded master key ships with the binary and is therefore not a
//! secret. Anyone holding the application can open a key store sealed with it.

pub mod error;
pub mod keys;
pub mod token;

pub use error::CipherError;
pub use keys::{derive_store_key, generate_key, FileKey, MasterKey};
pub use token::{decrypt, encrypt, token_timestamp, MAX_PLAINTEXT};

/// Size of a key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
