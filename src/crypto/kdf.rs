//! Passphrase-to-key derivation.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

/// Symmetric key length in bytes (AES-128).
pub const KEY_SIZE: usize = 16;

/// PBKDF2 round count. Fixed so every device derives the same key from
/// the same passphrase without coordination.
const PBKDF2_ROUNDS: u32 = 1000;

/// Derive the symmetric key for `passphrase`.
///
/// Deterministic and salt-less: the same passphrase always yields the same
/// key, so a snapshot file needs nothing but the passphrase to decrypt.
/// An empty passphrase is accepted here; encryption rejects it upstream.
pub fn derive_key(passphrase: &str) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), b"", PBKDF2_ROUNDS, &mut key);
    key
}
