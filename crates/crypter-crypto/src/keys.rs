//! Key types: per-file keys, the master key, and the derived store key

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{CipherError, KEY_SIZE};

/// The application master key, identical in every installation.
const EMBEDDED_MASTER_KEY: [u8; KEY_SIZE] = [
    0xa4, 0x75, 0x34, 0xe8, 0x3e, 0xe3, 0xc2, 0x5b, 0x6c, 0xcc, 0x4a, 0x8a, 0xbc, 0xa0, 0x45, 0x52,
    0xd0, 0x76, 0xb1, 0x73, 0x89, 0x9e, 0xda, 0x92, 0x0e, 0x5b, 0xf5, 0x5d, 0x88, 0x5a, 0x2d, 0xe1,
];

/// A per-file 256-bit encryption key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Encode as padded base64url, the form stored in the key store JSON.
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        decode_key(encoded).map(Self::from_bytes)
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// The 256-bit key the key store is sealed under.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// The master key compiled into the application.
    ///
    /// This key is **not a secret**: it is the same for every copy of the
    /// program, so a key store sealed with it only protects against casual
    /// inspection. Supply a private key with [`MasterKey::from_base64`] when
    /// that matters.
    pub fn embedded() -> Self {
        Self::from_bytes(EMBEDDED_MASTER_KEY)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, CipherError> {
        decode_key(encoded).map(Self::from_bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit file encryption key.
pub fn generate_key() -> FileKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    FileKey::from_bytes(bytes)
}

/// Derive the key store encryption key from the master key via HKDF-SHA256.
pub fn derive_store_key(master: &MasterKey) -> Result<FileKey, CipherError> {
    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = [0u8; KEY_SIZE];
    hkdf.expand(b"crypter-keystore", &mut okm)
        .map_err(|e| CipherError::InvalidKey(format!("HKDF expand failed: {e}")))?;
    Ok(FileKey::from_bytes(okm))
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_SIZE], CipherError> {
    let mut decoded = URL_SAFE
        .decode(encoded.trim())
        .map_err(|e| CipherError::InvalidKey(format!("not base64url: {e}")))?;

    if decoded.len() != KEY_SIZE {
        let len = decoded.len();
        decoded.zeroize();
        return Err(CipherError::InvalidKey(format!(
            "decoded to {len} bytes (expected {KEY_SIZE})"
        )));
    }

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&decoded);
    decoded.zeroize();
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_generation() {
        let k1 = generate_key();
        let k2 = generate_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_file_key_base64_roundtrip() {
        let key = generate_key();
        let encoded = key.to_base64();
        // 32 bytes -> 44 padded base64 chars
        assert_eq!(encoded.len(), 44);
        let decoded = FileKey::from_base64(&encoded).unwrap();
        assert_eq!(key, decoded);
    }

    #[test]
    fn test_embedded_master_key_matches_published_constant() {
        let published = MasterKey::from_base64("pHU06D7jwltszEqKvKBFUtB2sXOJntqSDlv1XYhaLeE=").unwrap();
        assert_eq!(MasterKey::embedded().as_bytes(), published.as_bytes());
    }

    #[test]
    fn test_key_wrong_length_rejected() {
        let short = URL_SAFE.encode([7u8; 16]);
        let err = FileKey::from_base64(&short).unwrap_err();
        assert!(matches!(err, CipherError::InvalidKey(_)));
    }

    #[test]
    fn test_key_not_base64_rejected() {
        assert!(MasterKey::from_base64("not a key!").is_err());
    }

    #[test]
    fn test_store_key_deterministic_and_distinct() {
        let master = MasterKey::from_bytes([42u8; KEY_SIZE]);
        let a = derive_store_key(&master).unwrap();
        let b = derive_store_key(&master).unwrap();
        assert_eq!(a, b, "derivation must be deterministic");
        assert_ne!(a.as_bytes(), master.as_bytes(), "store key must not equal master key");

        let other = derive_store_key(&MasterKey::from_bytes([43u8; KEY_SIZE])).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_debug_redacts() {
        let dbg = format!("{:?} {:?}", generate_key(), MasterKey::embedded());
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("164"), "raw key bytes must not be printed");
    }
}
