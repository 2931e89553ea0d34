//! Hybrid encryption: AES-256-GCM for the message, RSA-OAEP (SHA-256) for
//! the per-message AES key.
//!
//! The sealed blob is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! Every call draws a fresh key and nonce, so encrypting the same plaintext
//! twice never yields the same blob.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand_core::{OsRng, RngCore};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use super::CryptoError;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Output of [`encrypt`]: the sealed message and the RSA-wrapped AES key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HybridCiphertext {
    /// `nonce || ciphertext || tag`.
    pub blob: Vec<u8>,
    /// AES key encrypted to the recipient with RSA-OAEP.
    pub wrapped_key: Vec<u8>,
}

/// Seal `plaintext` for the holder of `recipient`'s private key.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if sealing or key wrapping fails.
pub fn encrypt(plaintext: &[u8], recipient: &RsaPublicKey) -> Result<HybridCiphertext, CryptoError> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut());
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(key.as_ref())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let wrapped_key = recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_ref())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&sealed);

    Ok(HybridCiphertext { blob, wrapped_key })
}

/// Open a blob produced by [`encrypt`].
///
/// # Errors
///
/// Returns [`CryptoError::TruncatedInput`] if `blob` cannot hold a nonce,
/// and [`CryptoError::Decryption`] if the key cannot be unwrapped, has the
/// wrong length, or the tag does not verify.
pub fn decrypt(
    blob: &[u8],
    wrapped_key: &[u8],
    private: &RsaPrivateKey,
) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN {
        return Err(CryptoError::TruncatedInput {
            len: blob.len(),
            min: NONCE_LEN,
        });
    }

    let key = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), wrapped_key)
            .map_err(|_| CryptoError::Decryption)?,
    );
    if key.len() != KEY_LEN {
        return Err(CryptoError::Decryption);
    }

    let (nonce, sealed) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| CryptoError::Decryption)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Decryption)
}
