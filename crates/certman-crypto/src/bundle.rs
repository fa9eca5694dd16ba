//! Password-sealed certificate bundles.
//!
//! A bundle is a PEM document (leaf certificate, issuing chain, private key)
//! encrypted under a key derived from the bundle password.
//!
//! This is the container the simulated authority hands out and the manager
//! opens. It is not PKCS#12 and a production CA's download would need its
//! own reader in place of [`open`].
//!
//! Layout: `MAGIC (4) | salt (16) | nonce (12) | ciphertext + tag`.
//! The key is derived with Argon2id and the payload sealed with
//! ChaCha20-Poly1305, the magic bytes bound as associated data.

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::CryptoError;

const MAGIC: &[u8; 4] = b"CMB1";
const SALT_SIZE: usize = 16;
/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;
const HEADER_SIZE: usize = MAGIC.len() + SALT_SIZE + NONCE_SIZE;

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut key = [0u8; 32];
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

fn cipher_for(password: &str, salt: &[u8]) -> Result<ChaCha20Poly1305, CryptoError> {
    let mut key_bytes = derive_key(password, salt)?;
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    key_bytes.zeroize();
    Ok(cipher)
}

/// Seal a PEM bundle with the given password.
pub fn seal(pem_bundle: &str, password: &str) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::EncryptionFailed("empty bundle password".into()));
    }

    let mut salt = [0u8; SALT_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let cipher = cipher_for(password, &salt)?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: pem_bundle.as_bytes(),
                aad: MAGIC,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    sealed.extend_from_slice(MAGIC);
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed bundle, returning the PEM document.
///
/// A wrong password and a tampered bundle are indistinguishable and both
/// yield `DecryptionFailed`.
pub fn open(sealed: &[u8], password: &str) -> Result<String, CryptoError> {
    if sealed.len() <= HEADER_SIZE {
        return Err(CryptoError::InvalidBundle(format!(
            "bundle too short: {} bytes",
            sealed.len()
        )));
    }
    let (magic, rest) = sealed.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(CryptoError::InvalidBundle("unrecognized bundle header".into()));
    }
    let (salt, rest) = rest.split_at(SALT_SIZE);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    let cipher = cipher_for(password, salt)?;
    let mut plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: MAGIC,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;

    let pem = String::from_utf8(plaintext.clone())
        .map_err(|e| CryptoError::InvalidBundle(e.to_string()));
    plaintext.zeroize();
    pem
}
