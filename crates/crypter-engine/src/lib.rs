//! crypter-engine: encrypt/decrypt orchestration over the key store
//!
//!   - `engine`: byte-level `encrypt_file` / `decrypt_file` and their
//!     file-replacing counterparts `encrypt_path` / `decrypt_path`
//!   - `recovery`: similarity-based fallback to the stored ciphertext
//!   - `walker`: best-effort batches over a flat directory

pub mod engine;
pub mod error;
pub mod recovery;
pub mod walker;

pub use engine::{identifier_for, Completed, Crypter, Decrypted};
pub use error::EngineError;
pub use recovery::{reconcile, similarity_ratio, Decision, RecoveryMatcher};
pub use walker::{collect_files, BatchReport, FileOutcome, ProgressFn};
