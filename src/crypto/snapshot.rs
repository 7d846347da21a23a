//! Whole-bundle snapshot codec.
//!
//! A snapshot is the user's entire [`SyncBundle`] serialized to JSON and
//! sealed with the buffer cipher, written as a single opaque file. There
//! is no header, version, or checksum: opening a snapshot with the wrong
//! passphrase fails only when the garbage plaintext refuses to parse as
//! JSON.

use std::path::Path;

use anyhow::Context;

use super::cipher::{decrypt_bytes, encrypt_bytes};
use super::CryptoError;
use crate::model::SyncBundle;

/// Serialize and seal a bundle into snapshot bytes.
pub fn export_bundle(bundle: &SyncBundle, passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    let plain = serde_json::to_vec(bundle)?;
    encrypt_bytes(&plain, passphrase)
}

/// Unseal snapshot bytes and parse the bundle back out.
pub fn import_bundle(sealed: &[u8], passphrase: &str) -> Result<SyncBundle, CryptoError> {
    let plain = decrypt_bytes(sealed, passphrase)?;
    Ok(serde_json::from_slice(&plain)?)
}

/// Seal a bundle and write it to `path`, replacing any existing file.
pub fn write_snapshot(path: &Path, bundle: &SyncBundle, passphrase: &str) -> anyhow::Result<()> {
    let sealed = export_bundle(bundle, passphrase)?;
    std::fs::write(path, &sealed)
        .with_context(|| format!("Failed to write snapshot: {}", path.display()))?;
    Ok(())
}

/// Read a snapshot file from `path` and unseal it.
pub fn read_snapshot(path: &Path, passphrase: &str) -> anyhow::Result<SyncBundle> {
    let sealed = std::fs::read(path)
        .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
    let bundle = import_bundle(&sealed, passphrase)
        .with_context(|| format!("Failed to open snapshot: {}", path.display()))?;
    Ok(bundle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Record;
    use serde_json::json;
    use tempfile::TempDir;

    const KEY: &str = "vault-passphrase";

    fn sample_bundle() -> SyncBundle {
        let mut bundle = SyncBundle::default();
        bundle.text.push(Record {
            id: "11111111-1111-4111-8111-111111111111".into(),
            username: "alice".into(),
            data: json!("remember the milk"),
            metadata: Default::default(),
        });
        bundle.credentials.push(Record {
            id: "22222222-2222-4222-8222-222222222222".into(),
            username: "alice".into(),
            data: json!({"login": "alice", "password": "hunter2"}),
            metadata: [("site".to_string(), "example.com".to_string())]
                .into_iter()
                .collect(),
        });
        bundle
    }

    #[test]
    fn bundle_roundtrip() {
        let bundle = sample_bundle();
        let sealed = export_bundle(&bundle, KEY).unwrap();
        let restored = import_bundle(&sealed, KEY).unwrap();
        assert_eq!(restored, bundle);
    }

    #[test]
    fn empty_bundle_roundtrip() {
        let bundle = SyncBundle::default();
        let sealed = export_bundle(&bundle, KEY).unwrap();
        let restored = import_bundle(&sealed, KEY).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn sealed_bytes_do_not_leak_plaintext() {
        let bundle = sample_bundle();
        let sealed = export_bundle(&bundle, KEY).unwrap();
        let haystack = String::from_utf8_lossy(&sealed);
        assert!(!haystack.contains("hunter2"));
        assert!(!haystack.contains("alice"));
    }

    #[test]
    fn wrong_passphrase_fails_to_parse() {
        let sealed = export_bundle(&sample_bundle(), KEY).unwrap();
        let err = import_bundle(&sealed, "not-the-passphrase").unwrap_err();
        assert!(matches!(err, CryptoError::Json(_)));
    }

    #[test]
    fn truncated_snapshot_is_too_short() {
        let err = import_bundle(&[0u8; 7], KEY).unwrap_err();
        assert!(matches!(err, CryptoError::TooShort(7)));
    }

    #[test]
    fn empty_passphrase_is_rejected() {
        let err = export_bundle(&sample_bundle(), "").unwrap_err();
        assert!(matches!(err, CryptoError::EmptyKey));
    }

    #[test]
    fn file_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vault.bin");

        let bundle = sample_bundle();
        write_snapshot(&path, &bundle, KEY).unwrap();
        let restored = read_snapshot(&path, KEY).unwrap();
        assert_eq!(restored, bundle);
    }

    #[test]
    fn reading_missing_file_names_the_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.bin");
        let err = read_snapshot(&path, KEY).unwrap_err();
        assert!(err.to_string().contains("absent.bin"));
    }
}
