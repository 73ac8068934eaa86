//! End-to-end encrypt/decrypt through the file-backed key store.
//!
//! Each test plays the part of a fresh process where it matters: the key
//! store is reopened from disk before decrypting.

use std::path::{Path, PathBuf};

use crypter_crypto::{CipherError, MasterKey, KEY_SIZE};
use crypter_engine::{identifier_for, Completed, Crypter, EngineError};
use crypter_store::{EncryptedStoreFile, KeyStore, KeyStoreBackend, StoreError};
use tempfile::TempDir;

fn master() -> MasterKey {
    MasterKey::from_bytes([42u8; KEY_SIZE])
}

fn write_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write test file");
    path
}

#[test]
fn encrypt_decrypt_file_roundtrip_across_sessions() {
    let tmp = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(tmp.path().join("keys.json"), master());
    let original = b"quarterly numbers, do not share";
    let file = write_test_file(tmp.path(), "report.txt", original);

    {
        let (mut store, warning) = backend.open();
        assert!(warning.is_none());
        let mut crypter = Crypter::new(&mut store, &backend);
        assert_eq!(crypter.encrypt_path(&file).unwrap(), Completed::Encrypted);
    }

    let on_disk = std::fs::read(&file).unwrap();
    assert_ne!(on_disk.as_slice(), original.as_slice());
    assert!(
        on_disk.iter().all(|b| b.is_ascii_graphic()),
        "encrypted file is a text token"
    );

    let (mut store, warning) = backend.open();
    assert!(warning.is_none());
    assert!(store.get(&identifier_for(&file).unwrap()).is_some());

    let crypter = Crypter::new(&mut store, &backend);
    assert_eq!(crypter.decrypt_path(&file).unwrap(), Completed::Decrypted);
    assert_eq!(std::fs::read(&file).unwrap(), original);
}

#[test]
fn empty_file_roundtrip() {
    let tmp = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(tmp.path().join("keys.json"), master());
    let file = write_test_file(tmp.path(), "empty", b"");

    let mut store = KeyStore::new();
    let mut crypter = Crypter::new(&mut store, &backend);
    crypter.encrypt_path(&file).unwrap();
    assert!(!std::fs::read(&file).unwrap().is_empty());

    crypter.decrypt_path(&file).unwrap();
    assert!(std::fs::read(&file).unwrap().is_empty());
}

#[test]
fn byte_level_roundtrip_preserves_binary_content() {
    let tmp = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(tmp.path().join("keys.json"), master());
    let plaintext: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();

    let mut store = KeyStore::new();
    let mut crypter = Crypter::new(&mut store, &backend);
    let ct = crypter.encrypt_file("blob.bin", &plaintext).unwrap();
    let out = crypter.decrypt_file("blob.bin", &ct).unwrap();

    assert_eq!(out.plaintext, plaintext);
    assert_eq!(out.recovered(), None);
}

#[test]
fn decrypt_without_record_is_no_key_found() {
    let tmp = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(tmp.path().join("keys.json"), master());
    let file = write_test_file(tmp.path(), "stranger.txt", b"never encrypted here");

    let mut store = KeyStore::new();
    let crypter = Crypter::new(&mut store, &backend);
    let err = crypter.decrypt_path(&file).unwrap_err();

    assert!(matches!(err, EngineError::NoKeyFound(ref id) if *id == identifier_for(&file).unwrap()));
    assert_eq!(std::fs::read(&file).unwrap(), b"never encrypted here");
}

#[test]
fn wrong_key_in_record_is_integrity_error() {
    let tmp = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(tmp.path().join("keys.json"), master());

    let mut store = KeyStore::new();
    let ct = Crypter::new(&mut store, &backend)
        .encrypt_file("doc", b"secret")
        .unwrap();

    // Same ciphertext, different key: reconcile passes, the tag does not.
    store.put("doc", crypter_crypto::generate_key(), ct.clone());
    let crypter = Crypter::new(&mut store, &backend);
    let err = crypter.decrypt_file("doc", &ct).unwrap_err();
    assert!(matches!(err, EngineError::Cipher(CipherError::Integrity)));
}

#[test]
fn corrupt_store_degrades_to_empty_and_is_rewritten() {
    let tmp = TempDir::new().unwrap();
    let store_path = tmp.path().join("keys.json");
    let backend = EncryptedStoreFile::new(&store_path, master());
    let file = write_test_file(tmp.path(), "a.txt", b"alpha");

    let mut store = KeyStore::new();
    Crypter::new(&mut store, &backend).encrypt_path(&file).unwrap();

    let sealed = std::fs::read(&store_path).unwrap();
    std::fs::write(&store_path, &sealed[..sealed.len() - 10]).unwrap();

    let (mut store, warning) = backend.open();
    assert!(store.is_empty());
    assert!(warning.expect("corruption is reported").is_corrupt());

    // The key for a.txt is gone.
    let err = Crypter::new(&mut store, &backend)
        .decrypt_path(&file)
        .unwrap_err();
    assert!(matches!(err, EngineError::NoKeyFound(_)));

    // The next mutation overwrites the damaged store with a valid one.
    let other = write_test_file(tmp.path(), "b.txt", b"beta");
    Crypter::new(&mut store, &backend).encrypt_path(&other).unwrap();
    let (reloaded, warning) = backend.open();
    assert!(warning.is_none());
    assert_eq!(reloaded.len(), 1);
}

#[test]
fn wrong_master_key_sees_empty_store() {
    let tmp = TempDir::new().unwrap();
    let store_path = tmp.path().join("keys.json");
    let file = write_test_file(tmp.path(), "a.txt", b"alpha");

    let backend = EncryptedStoreFile::new(&store_path, master());
    let mut store = KeyStore::new();
    Crypter::new(&mut store, &backend).encrypt_path(&file).unwrap();

    let other = EncryptedStoreFile::new(&store_path, MasterKey::from_bytes([1u8; KEY_SIZE]));
    let (store, warning) = other.open();
    assert!(store.is_empty());
    assert!(matches!(warning, Some(StoreError::Corrupt { .. })));
}

#[test]
fn store_save_failure_keeps_plaintext() {
    let tmp = TempDir::new().unwrap();
    // A directory sits where the store file should go, so every save fails.
    let store_path = tmp.path().join("keys.json");
    std::fs::create_dir(&store_path).unwrap();
    let backend = EncryptedStoreFile::new(&store_path, master());
    let file = write_test_file(tmp.path(), "precious.txt", b"only copy");

    let mut store = KeyStore::new();
    let mut crypter = Crypter::new(&mut store, &backend);
    let err = crypter.encrypt_path(&file).unwrap_err();

    assert!(matches!(err, EngineError::Store(StoreError::Write { .. })));
    assert_eq!(std::fs::read(&file).unwrap(), b"only copy");
    assert!(crypter.store().is_empty(), "failed encryption is not recorded");
}

#[cfg(unix)]
#[test]
fn symlinked_file_roundtrip_keeps_the_link() {
    let tmp = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(tmp.path().join("keys.json"), master());
    std::fs::create_dir(tmp.path().join("data")).unwrap();
    let target = write_test_file(&tmp.path().join("data"), "real.txt", b"linked content");
    let link = tmp.path().join("link.txt");
    std::os::unix::fs::symlink("data/real.txt", &link).unwrap();

    {
        let (mut store, _) = backend.open();
        let mut crypter = Crypter::new(&mut store, &backend);
        crypter.encrypt_path(&link).unwrap();
        assert_eq!(
            crypter.store().records().next().unwrap().identifier,
            identifier_for(&target).unwrap()
        );
    }

    assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_ne!(std::fs::read(&target).unwrap(), b"linked content");

    // Decrypting through the target name finds the same record
    let (mut store, _) = backend.open();
    let crypter = Crypter::new(&mut store, &backend);
    assert_eq!(crypter.decrypt_path(&target).unwrap(), Completed::Decrypted);
    assert_eq!(std::fs::read(&link).unwrap(), b"linked content");
    assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
}

#[cfg(unix)]
#[test]
fn link_and_target_in_one_directory_are_encrypted_once() {
    let tmp = TempDir::new().unwrap();
    let store_dir = TempDir::new().unwrap();
    let backend = EncryptedStoreFile::new(store_dir.path().join("keys.json"), master());
    let target = write_test_file(tmp.path(), "b_real.txt", b"only once");
    std::os::unix::fs::symlink("b_real.txt", tmp.path().join("a_alias.txt")).unwrap();

    {
        let (mut store, _) = backend.open();
        let mut crypter = Crypter::new(&mut store, &backend);
        let report = crypter.encrypt_directory(tmp.path(), None).unwrap();
        assert_eq!(report.outcomes.len(), 1);
        assert!(report.is_success());
        assert_eq!(crypter.store().len(), 1);
    }

    let (mut store, _) = backend.open();
    let crypter = Crypter::new(&mut store, &backend);
    let report = crypter.decrypt_directory(tmp.path(), None).unwrap();
    assert!(report.is_success());
    assert_eq!(std::fs::read(&target).unwrap(), b"only once");
}
