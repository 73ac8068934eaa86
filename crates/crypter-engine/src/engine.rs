//! Per-file encrypt/decrypt over a caller-owned key store.
//!
//! Byte-level operations (`encrypt_file`, `decrypt_file`) never touch the
//! filesystem except through the backend. The path-level helpers read the
//! file, run the byte-level operation and replace the file atomically only
//! once it succeeded.

use std::path::{Path, PathBuf};

use crypter_crypto::{decrypt, encrypt, generate_key, CipherError, MAX_PLAINTEXT};
use crypter_store::{write_atomic, KeyStore, KeyStoreBackend};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::recovery::{Decision, RecoveryMatcher};

/// Identifier a file's key is recorded under: its canonical absolute path,
/// or the path as given when it cannot be canonicalized.
///
/// Paths that are not valid UTF-8 are rejected rather than lossily
/// converted, so two distinct files never share an identifier.
pub fn identifier_for(path: &Path) -> Result<String, EngineError> {
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .into_os_string()
        .into_string()
        .map_err(|raw| EngineError::NonUtf8Path(PathBuf::from(raw)))
}

/// The file `path` names, symlinks followed. Reads, identifiers and the
/// final write all go through this one path.
fn resolve(path: &Path) -> Result<PathBuf, EngineError> {
    std::fs::canonicalize(path).map_err(|e| EngineError::io(path, e))
}

/// Result of a successful `decrypt_file`.
#[derive(Debug, Clone, PartialEq)]
pub struct Decrypted {
    pub plaintext: Vec<u8>,
    /// `None` when the record kept no ciphertext to compare against.
    pub decision: Option<Decision>,
}

impl Decrypted {
    /// Similarity ratio, if the stored copy was used instead of the input.
    pub fn recovered(&self) -> Option<f64> {
        match self.decision {
            Some(Decision::UseStored { ratio }) => Some(ratio),
            _ => None,
        }
    }
}

/// What a path-level operation did to the file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Completed {
    Encrypted,
    Decrypted,
    /// Decrypted from the stored ciphertext; the on-disk bytes were damaged.
    Recovered { ratio: f64 },
}

impl std::fmt::Display for Completed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encrypted => write!(f, "encrypted"),
            Self::Decrypted => write!(f, "decrypted"),
            Self::Recovered { ratio } => write!(f, "recovered (similarity {ratio:.3})"),
        }
    }
}

/// Encrypt/decrypt operations bound to one key store and its backend.
pub struct Crypter<'s, B: KeyStoreBackend> {
    store: &'s mut KeyStore,
    backend: &'s B,
    matcher: RecoveryMatcher,
}

impl<'s, B: KeyStoreBackend> Crypter<'s, B> {
    pub fn new(store: &'s mut KeyStore, backend: &'s B) -> Self {
        Self {
            store,
            backend,
            matcher: RecoveryMatcher::default(),
        }
    }

    pub fn with_matcher(mut self, matcher: RecoveryMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    pub fn store(&self) -> &KeyStore {
        &*self.store
    }

    pub(crate) fn backend(&self) -> &B {
        self.backend
    }

    pub fn matcher(&self) -> &RecoveryMatcher {
        &self.matcher
    }

    /// Encrypt `plaintext` under a fresh key and record it.
    ///
    /// The key store is persisted before the ciphertext is returned. If that
    /// fails, the in-memory store is rolled back and the error returned: the
    /// caller must then leave the plaintext in place.
    pub fn encrypt_file(
        &mut self,
        identifier: &str,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, EngineError> {
        let key = generate_key();
        let ciphertext = encrypt(&key, plaintext)?;

        let previous = self.store.put(identifier, key, ciphertext.clone());
        if let Err(e) = self.backend.save(&*self.store) {
            match previous {
                Some(record) => self.store.restore(record),
                None => {
                    self.store.remove(identifier);
                }
            }
            warn!(
                identifier,
                location = %self.backend.location(),
                "key store save failed, encryption discarded: {e}"
            );
            return Err(e.into());
        }

        debug!(identifier, bytes = plaintext.len(), "encrypted");
        Ok(ciphertext)
    }

    /// Decrypt `on_disk`, falling back to the stored ciphertext when the two
    /// differ but are similar enough.
    pub fn decrypt_file(&self, identifier: &str, on_disk: &[u8]) -> Result<Decrypted, EngineError> {
        let record = self
            .store
            .get(identifier)
            .ok_or_else(|| EngineError::NoKeyFound(identifier.to_string()))?;

        let Some(stored) = record.last_ciphertext.as_deref() else {
            debug!(identifier, "no stored ciphertext, decrypting input as is");
            let plaintext = decrypt(&record.key, on_disk)?;
            return Ok(Decrypted {
                plaintext,
                decision: None,
            });
        };

        let decision = self.matcher.reconcile(stored, on_disk);
        let chosen = match decision {
            Decision::UseOnDisk => on_disk,
            Decision::UseStored { ratio } => {
                warn!(
                    identifier,
                    ratio,
                    "on-disk ciphertext differs from stored copy, using stored copy"
                );
                stored
            }
            Decision::Abort { ratio } => {
                return Err(EngineError::CiphertextMismatch {
                    identifier: identifier.to_string(),
                    ratio,
                });
            }
        };

        let plaintext = decrypt(&record.key, chosen)?;
        Ok(Decrypted {
            plaintext,
            decision: Some(decision),
        })
    }

    /// Encrypt the file at `path` in place.
    ///
    /// A symlink is followed: the file it points to is encrypted and recorded
    /// under its own canonical path, and the link is left as is.
    pub fn encrypt_path(&mut self, path: &Path) -> Result<Completed, EngineError> {
        let target = resolve(path)?;
        let identifier = identifier_for(&target)?;

        let len = std::fs::metadata(&target)
            .map_err(|e| EngineError::io(&target, e))?
            .len();
        if len > MAX_PLAINTEXT {
            return Err(CipherError::Oversized {
                len: usize::try_from(len).unwrap_or(usize::MAX),
            }
            .into());
        }

        let plaintext = std::fs::read(&target).map_err(|e| EngineError::io(&target, e))?;
        let ciphertext = self.encrypt_file(&identifier, &plaintext)?;
        write_atomic(&target, &ciphertext).map_err(|e| EngineError::io(&target, e))?;

        info!(path = %path.display(), "file encrypted");
        Ok(Completed::Encrypted)
    }

    /// Decrypt the file at `path` in place, following symlinks like
    /// [`Crypter::encrypt_path`].
    pub fn decrypt_path(&self, path: &Path) -> Result<Completed, EngineError> {
        let target = resolve(path)?;
        let identifier = identifier_for(&target)?;

        let on_disk = std::fs::read(&target).map_err(|e| EngineError::io(&target, e))?;
        let decrypted = self.decrypt_file(&identifier, &on_disk)?;
        write_atomic(&target, &decrypted.plaintext).map_err(|e| EngineError::io(&target, e))?;

        let completed = match decrypted.recovered() {
            Some(ratio) => Completed::Recovered { ratio },
            None => Completed::Decrypted,
        };
        info!(path = %path.display(), "file {completed}");
        Ok(completed)
    }
}
