//! In-memory key store, sealed to a single encrypted file on disk.

use std::collections::BTreeMap;
use std::path::Path;

use crypter_crypto::{derive_store_key, FileKey, MasterKey};

use crate::atomic::write_atomic;
use crate::error::StoreError;
use crate::record::{KeyRecord, StoredRecord};

/// Mapping from file identifier to [`KeyRecord`].
///
/// Ordered by identifier so that the same logical content always serializes
/// to the same JSON bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    records: BTreeMap<String, KeyRecord>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `identifier`.
    ///
    /// Returns the record that was replaced, if any.
    pub fn put(
        &mut self,
        identifier: impl Into<String>,
        key: FileKey,
        ciphertext: Vec<u8>,
    ) -> Option<KeyRecord> {
        let record = KeyRecord::new(identifier, key, ciphertext);
        self.records.insert(record.identifier.clone(), record)
    }

    /// Put back a full record (used to roll back a failed mutation).
    pub fn restore(&mut self, record: KeyRecord) {
        self.records.insert(record.identifier.clone(), record);
    }

    pub fn get(&self, identifier: &str) -> Option<&KeyRecord> {
        self.records.get(identifier)
    }

    /// Remove a record on explicit request. Records are never removed implicitly.
    pub fn remove(&mut self, identifier: &str) -> Option<KeyRecord> {
        self.records.remove(identifier)
    }

    /// All records, in identifier order.
    pub fn records(&self) -> impl Iterator<Item = &KeyRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize the whole mapping to compact JSON.
    pub fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        let stored: BTreeMap<&str, StoredRecord> = self
            .records
            .iter()
            .map(|(id, record)| (id.as_str(), record.to_stored()))
            .collect();
        Ok(serde_json::to_vec(&stored)?)
    }

    /// Parse the JSON produced by [`KeyStore::to_json`].
    ///
    /// `origin` only labels errors.
    pub fn from_json(json: &[u8], origin: &Path) -> Result<Self, StoreError> {
        let malformed = |reason: String| StoreError::Malformed {
            path: origin.to_path_buf(),
            reason,
        };

        let stored: BTreeMap<String, StoredRecord> =
            serde_json::from_slice(json).map_err(|e| malformed(e.to_string()))?;

        let records = stored
            .iter()
            .map(|(id, s)| KeyRecord::from_stored(id, s).map(|r| (id.clone(), r)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(malformed)?;

        Ok(Self { records })
    }

    /// Serialize and encrypt the store under a key derived from `master`.
    pub fn seal(&self, master: &MasterKey) -> Result<Vec<u8>, StoreError> {
        let json = self.to_json()?;
        let store_key = derive_store_key(master).map_err(StoreError::Seal)?;
        crypter_crypto::encrypt(&store_key, &json).map_err(StoreError::Seal)
    }

    /// Decrypt and parse a sealed store.
    pub fn unseal(sealed: &[u8], master: &MasterKey, origin: &Path) -> Result<Self, StoreError> {
        let corrupt = |source: crypter_crypto::CipherError| StoreError::Corrupt {
            path: origin.to_path_buf(),
            source,
        };
        let store_key = derive_store_key(master).map_err(corrupt)?;
        let json = crypter_crypto::decrypt(&store_key, sealed).map_err(corrupt)?;
        Self::from_json(&json, origin)
    }

    /// Load the store at `path`. A missing file is an empty store; anything
    /// else that goes wrong is reported.
    pub fn load(path: &Path, master: &MasterKey) -> Result<Self, StoreError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no key store yet, starting empty");
            return Ok(Self::new());
        }

        let sealed = std::fs::read(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::unseal(&sealed, master, path)?;
        tracing::debug!(path = %path.display(), records = store.len(), "key store loaded");
        Ok(store)
    }

    /// Seal the full store and atomically replace the file at `path`.
    pub fn save(&self, path: &Path, master: &MasterKey) -> Result<(), StoreError> {
        let sealed = self.seal(master)?;
        write_atomic(path, &sealed).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), records = self.len(), "key store saved");
        Ok(())
    }
}
