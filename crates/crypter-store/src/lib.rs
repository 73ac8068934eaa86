//! crypter-store: the per-file key store
//!
//! One [`KeyRecord`] per encrypted file: the random file key plus the token
//! produced at encryption time (kept so a damaged copy on disk can still be
//! recovered). The whole mapping is serialized to JSON, sealed into a single
//! token under a key derived from the master key, and rewritten in full after
//! every mutation via temp file + rename.
//!
//! [`KeyStore::load`] is strict. Best-effort loading lives in one place,
//! [`KeyStoreBackend::open`], which degrades an unreadable store to an empty
//! one and hands the error back so the caller can warn about it.

pub mod atomic;
pub mod backend;
pub mod error;
pub mod record;
pub mod store;

pub use atomic::write_atomic;
pub use backend::{EncryptedStoreFile, KeyStoreBackend, MemoryBackend};
pub use error::StoreError;
pub use record::KeyRecord;
pub use store::KeyStore;
