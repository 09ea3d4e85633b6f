//! At-rest sealing for secret content and voiceprint embeddings.
//!
//! ChaCha20-Poly1305 AEAD with a fresh key and nonce per sealed value,
//! hex-armored for storage in TEXT columns. Key material travels with the
//! record it seals and must never be persisted next to plaintext logs.

use crate::error::CoreError;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use serde::{Deserialize, Serialize};

/// A sealed value: per-value key, nonce, and ciphertext, all hex.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBox {
    pub key: String,
    pub nonce: String,
    pub ciphertext: String,
}

/// Seal `plaintext` under a freshly generated key.
pub fn seal(plaintext: &[u8]) -> Result<SealedBox, CoreError> {
    let key = ChaCha20Poly1305::generate_key(&mut OsRng);
    let cipher = ChaCha20Poly1305::new(&key);
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CoreError::Capability("AEAD encryption failed".into()))?;
    Ok(SealedBox {
        key: hex::encode(key),
        nonce: hex::encode(nonce),
        ciphertext: hex::encode(ciphertext),
    })
}

/// Open a sealed value. Any failure — malformed hex, wrong lengths, or an
/// authentication-tag mismatch — is reported as `DecryptionFailed`.
pub fn open(sealed: &SealedBox) -> Result<Vec<u8>, CoreError> {
    let key_bytes =
        hex::decode(&sealed.key).map_err(|_| CoreError::DecryptionFailed("bad key hex".into()))?;
    let nonce_bytes = hex::decode(&sealed.nonce)
        .map_err(|_| CoreError::DecryptionFailed("bad nonce hex".into()))?;
    let ciphertext = hex::decode(&sealed.ciphertext)
        .map_err(|_| CoreError::DecryptionFailed("bad ciphertext hex".into()))?;
    if key_bytes.len() != 32 {
        return Err(CoreError::DecryptionFailed("bad key length".into()));
    }
    if nonce_bytes.len() != 12 {
        return Err(CoreError::DecryptionFailed("bad nonce length".into()));
    }
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
    cipher
        .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
        .map_err(|_| CoreError::DecryptionFailed("AEAD tag mismatch".into()))
}

/// Open a sealed value and decode it as UTF-8.
pub fn open_utf8(sealed: &SealedBox) -> Result<String, CoreError> {
    let bytes = open(sealed)?;
    String::from_utf8(bytes).map_err(|_| CoreError::DecryptionFailed("invalid UTF-8".into()))
}
