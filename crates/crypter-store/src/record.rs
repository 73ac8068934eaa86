//! A single key store entry and its JSON form

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypter_crypto::FileKey;
use serde::{Deserialize, Serialize};

/// Key material and last-known ciphertext for one encrypted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRecord {
    /// File path or stable logical name; unique within a store
    pub identifier: String,
    /// Random key the file was encrypted with
    pub key: FileKey,
    /// Token produced when the file was encrypted, if recorded
    pub last_ciphertext: Option<Vec<u8>>,
}

impl KeyRecord {
    pub fn new(identifier: impl Into<String>, key: FileKey, ciphertext: Vec<u8>) -> Self {
        Self {
            identifier: identifier.into(),
            key,
            last_ciphertext: Some(ciphertext),
        }
    }

    /// Short BLAKE3 fingerprint of the key, safe to display.
    pub fn fingerprint(&self) -> String {
        blake3::hash(self.key.as_bytes()).to_hex().as_str()[..16].to_string()
    }

    pub(crate) fn to_stored(&self) -> StoredRecord {
        StoredRecord {
            key: self.key.to_base64(),
            encrypted: self.last_ciphertext.as_ref().map(|c| STANDARD.encode(c)),
        }
    }

    pub(crate) fn from_stored(identifier: &str, stored: &StoredRecord) -> Result<Self, String> {
        let key = FileKey::from_base64(&stored.key)
            .map_err(|e| format!("record {identifier:?}: {e}"))?;
        let last_ciphertext = stored
            .encrypted
            .as_deref()
            .map(|c| STANDARD.decode(c))
            .transpose()
            .map_err(|e| format!("record {identifier:?}: ciphertext is not base64: {e}"))?;

        Ok(Self {
            identifier: identifier.to_string(),
            key,
            last_ciphertext,
        })
    }
}

/// On-disk JSON shape of a record: `{ "key": "...", "encrypted": "..." }`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredRecord {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypter_crypto::generate_key;

    #[test]
    fn test_stored_roundtrip() {
        let record = KeyRecord::new("/home/u/report.pdf", generate_key(), b"gAAAAB-token".to_vec());
        let stored = record.to_stored();
        let back = KeyRecord::from_stored("/home/u/report.pdf", &stored).unwrap();
        assert_eq!(record, back);
    }

    #[test]
    fn test_missing_ciphertext_is_allowed() {
        let key = generate_key();
        let stored: StoredRecord =
            serde_json::from_str(&format!(r#"{{"key":"{}"}}"#, key.to_base64())).unwrap();
        let record = KeyRecord::from_stored("legacy.txt", &stored).unwrap();
        assert_eq!(record.key, key);
        assert!(record.last_ciphertext.is_none());
    }

    #[test]
    fn test_bad_key_is_rejected() {
        let stored = StoredRecord {
            key: "short".into(),
            encrypted: None,
        };
        let err = KeyRecord::from_stored("a.txt", &stored).unwrap_err();
        assert!(err.contains("a.txt"));
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let record = KeyRecord::new("a", generate_key(), Vec::new());
        let fp = record.fingerprint();
        assert_eq!(fp.len(), 16);
        assert_eq!(fp, record.fingerprint());
        assert!(!fp.contains(&record.key.to_base64()));
    }
}
