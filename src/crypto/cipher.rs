//! Buffer cipher: AES-128-CFB with a random nonce prefix.
//!
//! Ciphertext layout is `[16-byte nonce][keystream-combined payload]`.
//! The nonce is drawn fresh from the OS RNG on every call, so encrypting
//! identical plaintext twice yields different ciphertexts. There is no
//! integrity tag: decrypting with the wrong key returns garbage rather
//! than an error, and only a downstream parse can notice.

use aes::cipher::{AsyncStreamCipher, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;

use super::kdf::derive_key;
use super::CryptoError;

type Aes128CfbEnc = cfb_mode::Encryptor<aes::Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<aes::Aes128>;

/// Nonce length in bytes; equal to the AES block size.
pub const NONCE_SIZE: usize = 16;

/// Encrypt `data` under a key derived from `passphrase`.
///
/// Rejects an empty passphrase (`EmptyKey`) and an empty buffer
/// (`EmptyData`) — encrypting nothing is always caller error.
pub fn encrypt_bytes(data: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    if passphrase.is_empty() {
        return Err(CryptoError::EmptyKey);
    }
    if data.is_empty() {
        return Err(CryptoError::EmptyData);
    }

    let key = derive_key(passphrase);
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let mut out = Vec::with_capacity(NONCE_SIZE + data.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(data);
    Aes128CfbEnc::new(&key.into(), &nonce.into()).encrypt(&mut out[NONCE_SIZE..]);
    Ok(out)
}

/// Decrypt a `[nonce][payload]` buffer produced by [`encrypt_bytes`].
///
/// The only failure detected here is a buffer too short to carry the
/// nonce; any 16-byte-or-longer input "succeeds" no matter the key.
pub fn decrypt_bytes(ciphertext: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < NONCE_SIZE {
        return Err(CryptoError::TooShort(ciphertext.len()));
    }

    let key = derive_key(passphrase);
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&ciphertext[..NONCE_SIZE]);

    let mut out = ciphertext[NONCE_SIZE..].to_vec();
    Aes128CfbDec::new(&key.into(), &nonce.into()).decrypt(&mut out);
    Ok(out)
}

/// Encrypt a string value and base64-encode the result for transport-safe
/// storage in JSON documents.
pub fn encrypt_str(value: &str, passphrase: &str) -> Result<String, CryptoError> {
    Ok(BASE64.encode(encrypt_bytes(value.as_bytes(), passphrase)?))
}

/// Reverse of [`encrypt_str`].
///
/// Wrong-key plaintext is rarely valid UTF-8; it is replaced lossily
/// instead of failing, keeping the garbage-not-error contract of the
/// underlying cipher.
pub fn decrypt_str(encoded: &str, passphrase: &str) -> Result<String, CryptoError> {
    let raw = BASE64.decode(encoded)?;
    let plain = decrypt_bytes(&raw, passphrase)?;
    Ok(String::from_utf8_lossy(&plain).into_owned())
}
