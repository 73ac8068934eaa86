//! Authenticated, non-deterministic file tokens (XChaCha20-Poly1305)
//!
//! Token format (before base64url encoding):
//! ```text
//! [1 byte: version 0x81][8 bytes: unix seconds, BE][24 bytes: random nonce][N bytes: ciphertext][16 bytes: tag]
//! AAD = version || timestamp
//! ```
//!
//! The random nonce makes two encryptions of the same plaintext differ; the
//! timestamp records when the token was minted and is covered by the tag.

use base64::{engine::general_purpose::URL_SAFE, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::keys::FileKey;
use crate::{CipherError, NONCE_SIZE, TAG_SIZE};

/// Token version byte
pub const TOKEN_VERSION: u8 = 0x81;

/// version (1) + timestamp (8)
const HEADER_SIZE: usize = 1 + 8;

/// Smallest valid raw token: header + nonce + tag (empty plaintext)
const MIN_RAW_SIZE: usize = HEADER_SIZE + NONCE_SIZE + TAG_SIZE;

/// XChaCha20-Poly1305 per-message plaintext limit (2^38 - 64 bytes)
pub const MAX_PLAINTEXT: u64 = (1 << 38) - 64;

/// Encrypt `plaintext` under `key`, returning a base64url token.
///
/// Each call draws a fresh nonce, so identical inputs never produce the same
/// token. The only failure is [`CipherError::Oversized`], for a plaintext
/// longer than [`MAX_PLAINTEXT`] (about 256 GiB); any input that fits in
/// memory below that limit encrypts.
pub fn encrypt(key: &FileKey, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    encrypt_at(key, plaintext, now)
}

fn encrypt_at(key: &FileKey, plaintext: &[u8], timestamp: u64) -> Result<Vec<u8>, CipherError> {
    if plaintext.len() as u64 > MAX_PLAINTEXT {
        return Err(CipherError::Oversized {
            len: plaintext.len(),
        });
    }

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let header = build_header(timestamp);

    let sealed = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &header,
            },
        )
        .map_err(|_| CipherError::Oversized {
            len: plaintext.len(),
        })?;

    let mut raw = Vec::with_capacity(HEADER_SIZE + NONCE_SIZE + sealed.len());
    raw.extend_from_slice(&header);
    raw.extend_from_slice(&nonce_bytes);
    raw.extend_from_slice(&sealed);

    Ok(URL_SAFE.encode(raw).into_bytes())
}

/// Decrypt a token produced by [`encrypt`].
///
/// Returns [`CipherError::Format`] if the token cannot be parsed and
/// [`CipherError::Integrity`] if authentication fails. No plaintext is ever
/// returned on failure.
pub fn decrypt(key: &FileKey, token: &[u8]) -> Result<Vec<u8>, CipherError> {
    let raw = decode_raw(token)?;

    let (header, rest) = raw.split_at(HEADER_SIZE);
    let (nonce_bytes, sealed) = rest.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: sealed,
                aad: header,
            },
        )
        .map_err(|_| {
            tracing::debug!(token_len = token.len(), "token authentication failed");
            CipherError::Integrity
        })
}

/// Read the (unauthenticated) creation time of a token, in unix seconds.
pub fn token_timestamp(token: &[u8]) -> Result<u64, CipherError> {
    let raw = decode_raw(token)?;
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&raw[1..HEADER_SIZE]);
    Ok(u64::from_be_bytes(ts))
}

/// base64url-decode a token and check its framing.
fn decode_raw(token: &[u8]) -> Result<Vec<u8>, CipherError> {
    let raw = URL_SAFE
        .decode(token)
        .map_err(|e| CipherError::Format(format!("token is not base64url: {e}")))?;

    if raw.len() < MIN_RAW_SIZE {
        return Err(CipherError::Format(format!(
            "token too short: {} bytes (minimum {MIN_RAW_SIZE})",
            raw.len()
        )));
    }

    if raw[0] != TOKEN_VERSION {
        return Err(CipherError::Format(format!(
            "unsupported token version 0x{:02x}",
            raw[0]
        )));
    }

    Ok(raw)
}

/// Build the header / AAD: version (1 byte) || timestamp (8 bytes BE)
fn build_header(timestamp: u64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = TOKEN_VERSION;
    header[1..].copy_from_slice(&timestamp.to_be_bytes());
    header
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_key;
    use proptest::prelude::*;

    fn raw_of(token: &[u8]) -> Vec<u8> {
        URL_SAFE.decode(token).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = generate_key();
        let plaintext = b"hello, encrypted world!";

        let token = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &token).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let key = generate_key();

        let token = encrypt(&key, b"").unwrap();
        let decrypted = decrypt(&key, &token).unwrap();

        assert_eq!(decrypted, b"");
    }

    #[test]
    fn test_encryption_is_non_deterministic() {
        let key = generate_key();
        let t1 = encrypt(&key, b"same input").unwrap();
        let t2 = encrypt(&key, b"same input").unwrap();
        assert_ne!(t1, t2, "fresh nonce must change every token");
    }

    #[test]
    fn test_token_is_base64url_text() {
        let key = generate_key();
        let token = encrypt(&key, &[0xFFu8; 100]).unwrap();
        assert!(token
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'=')));
    }

    #[test]
    fn test_raw_token_size() {
        let key = generate_key();
        let token = encrypt(&key, &[0u8; 1000]).unwrap();

        // header (9) + nonce (24) + plaintext (1000) + tag (16) = 1049
        assert_eq!(raw_of(&token).len(), 9 + 24 + 1000 + 16);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let token = encrypt(&generate_key(), b"secret data").unwrap();
        let result = decrypt(&generate_key(), &token);
        assert_eq!(result, Err(CipherError::Integrity));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let key = generate_key();
        let token = encrypt(&key, b"secret data").unwrap();

        let mut raw = raw_of(&token);
        raw[HEADER_SIZE + NONCE_SIZE + 1] ^= 0xFF;
        let tampered = URL_SAFE.encode(raw).into_bytes();

        assert_eq!(decrypt(&key, &tampered), Err(CipherError::Integrity));
    }

    #[test]
    fn test_tampered_timestamp_fails_tag() {
        let key = generate_key();
        let token = encrypt_at(&key, b"secret data", 1_700_000_000).unwrap();

        let mut raw = raw_of(&token);
        raw[8] ^= 0x01;
        let tampered = URL_SAFE.encode(raw).into_bytes();

        assert_eq!(decrypt(&key, &tampered), Err(CipherError::Integrity));
    }

    #[test]
    fn test_truncated_token_is_integrity_or_format_error() {
        let key = generate_key();
        let token = encrypt(&key, &[1u8; 64]).unwrap();

        let mut raw = raw_of(&token);
        raw.truncate(raw.len() - 4);
        let truncated = URL_SAFE.encode(raw).into_bytes();
        assert_eq!(decrypt(&key, &truncated), Err(CipherError::Integrity));

        // Cutting the base64 text itself breaks the encoding
        let cut = &token[..token.len() - 3];
        assert!(matches!(decrypt(&key, cut), Err(CipherError::Format(_))));
    }

    #[test]
    fn test_short_token_is_format_error() {
        let key = generate_key();
        let short = URL_SAFE.encode([TOKEN_VERSION; 10]).into_bytes();
        assert!(matches!(decrypt(&key, &short), Err(CipherError::Format(_))));
        assert!(matches!(decrypt(&key, b""), Err(CipherError::Format(_))));
    }

    #[test]
    fn test_wrong_version_is_format_error() {
        let key = generate_key();
        let token = encrypt(&key, b"data").unwrap();
        let mut raw = raw_of(&token);
        raw[0] = 0x80;
        let bad = URL_SAFE.encode(raw).into_bytes();

        let err = decrypt(&key, &bad).unwrap_err();
        assert!(matches!(err, CipherError::Format(msg) if msg.contains("0x80")));
    }

    #[test]
    fn test_token_timestamp() {
        let key = generate_key();
        let token = encrypt_at(&key, b"data", 1_234_567_890).unwrap();
        assert_eq!(token_timestamp(&token).unwrap(), 1_234_567_890);
    }

    proptest! {
        #[test]
        fn test_roundtrip_any_plaintext(data in proptest::collection::vec(any::<u8>(), 0..=4096)) {
            let key = generate_key();
            let token = encrypt(&key, &data).unwrap();
            prop_assert_eq!(decrypt(&key, &token).unwrap(), data);
        }
    }
}
