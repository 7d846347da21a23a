//! Encryption engine: key derivation, buffer cipher, record and snapshot codecs.
//!
//! Four layers, leaves first:
//!
//! - **kdf** — passphrase → AES-128 key (PBKDF2-HMAC-SHA256, salt-less)
//! - **cipher** — `[random nonce][AES-128-CFB stream]` buffer encryption
//! - **record** — per-collection selective field encryption for at-rest storage
//! - **snapshot** — whole-bundle encryption for portable export files
//!
//! ## Design
//! The scheme is deliberately state-free: no stored salt, no key file, no
//! integrity tag. Everything needed to decrypt is the passphrase itself,
//! which is what makes snapshot files portable between devices. The flip
//! side is that a wrong passphrase produces garbage bytes instead of a
//! clean error; callers see it as a deserialization failure downstream.
//! All operations are pure and safe to call from any number of tasks.

pub mod cipher;
pub mod kdf;
pub mod record;
pub mod snapshot;

pub use cipher::{decrypt_bytes, decrypt_str, encrypt_bytes, encrypt_str, NONCE_SIZE};
pub use kdf::{derive_key, KEY_SIZE};
pub use record::{decode_record, encode_record};
pub use snapshot::{export_bundle, import_bundle, read_snapshot, write_snapshot};

use crate::model::CollectionKind;

/// Errors produced by the encryption engine.
///
/// `EmptyKey`/`EmptyData` reject caller misuse before any ciphertext is
/// produced. `TooShort` is the only decryption-side cipher error — there
/// is no integrity check, so wrong-key decryption surfaces (if at all) as
/// a `Json` error from whatever tried to parse the garbage.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("encryption key is empty")]
    EmptyKey,
    #[error("nothing to encrypt: data is empty")]
    EmptyData,
    #[error("ciphertext too short: {0} bytes")]
    TooShort(usize),
    #[error("{kind} payload must be {expected}")]
    TypeMismatch {
        kind: CollectionKind,
        expected: &'static str,
    },
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload deserialization failed: {0}")]
    Json(#[from] serde_json::Error),
}
