//! Where a key store is persisted.
//!
//! Callers own the [`KeyStore`] value and hand it to a backend after every
//! mutation. Two implementations:
//!   - [`EncryptedStoreFile`]: sealed file on disk (the normal case).
//!   - [`MemoryBackend`]: sealed bytes kept in memory, for tests and embedding.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};

use crypter_crypto::MasterKey;

use crate::error::StoreError;
use crate::store::KeyStore;

pub trait KeyStoreBackend {
    /// Load the persisted store. Nothing persisted yet is an empty store.
    fn load(&self) -> Result<KeyStore, StoreError>;

    /// Persist the full store, replacing whatever was there.
    fn save(&self, store: &KeyStore) -> Result<(), StoreError>;

    /// Human-readable location, for logs.
    fn location(&self) -> String;

    /// The file holding the store, when there is one.
    fn file_path(&self) -> Option<&Path> {
        None
    }

    /// Best-effort load: degrade to an empty store and hand back the error.
    ///
    /// An unreadable store is treated as "no keys yet". Every key it held is
    /// lost for this session, and the next save overwrites it.
    fn open(&self) -> (KeyStore, Option<StoreError>) {
        match self.load() {
            Ok(store) => (store, None),
            Err(e) => {
                tracing::warn!(
                    location = %self.location(),
                    "failed to load key store, starting fresh: {e}"
                );
                (KeyStore::new(), Some(e))
            }
        }
    }
}

/// Key store sealed into a single file.
#[derive(Debug, Clone)]
pub struct EncryptedStoreFile {
    path: PathBuf,
    master: MasterKey,
}

impl EncryptedStoreFile {
    pub fn new(path: impl Into<PathBuf>, master: MasterKey) -> Self {
        Self {
            path: path.into(),
            master,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyStoreBackend for EncryptedStoreFile {
    fn load(&self) -> Result<KeyStore, StoreError> {
        KeyStore::load(&self.path, &self.master)
    }

    fn save(&self, store: &KeyStore) -> Result<(), StoreError> {
        store.save(&self.path, &self.master)
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn file_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Sealed key store held in memory.
///
/// Saves go through the same seal/unseal path as the file backend, so a
/// reload observes exactly what a file round-trip would.
#[derive(Debug)]
pub struct MemoryBackend {
    master: MasterKey,
    sealed: RefCell<Option<Vec<u8>>>,
    saves: Cell<usize>,
}

impl MemoryBackend {
    pub fn new(master: MasterKey) -> Self {
        Self {
            master,
            sealed: RefCell::new(None),
            saves: Cell::new(0),
        }
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.saves.get()
    }

    /// Last sealed bytes, if anything was saved.
    pub fn sealed_bytes(&self) -> Option<Vec<u8>> {
        self.sealed.borrow().clone()
    }

    /// Overwrite the sealed bytes directly (simulates on-disk damage).
    pub fn set_sealed_bytes(&self, bytes: Vec<u8>) {
        *self.sealed.borrow_mut() = Some(bytes);
    }
}

impl KeyStoreBackend for MemoryBackend {
    fn load(&self) -> Result<KeyStore, StoreError> {
        match self.sealed.borrow().as_deref() {
            Some(sealed) => KeyStore::unseal(sealed, &self.master, Path::new("<memory>")),
            None => Ok(KeyStore::new()),
        }
    }

    fn save(&self, store: &KeyStore) -> Result<(), StoreError> {
        let sealed = store.seal(&self.master)?;
        *self.sealed.borrow_mut() = Some(sealed);
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }

    fn location(&self) -> String {
        "<memory>".into()
    }
}
