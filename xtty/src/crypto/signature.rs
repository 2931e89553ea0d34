//! RSA PKCS#1 v1.5 signatures over SHA-256.
//!
//! Senders sign the sealed blob, not the plaintext, so a recipient can
//! reject a forged frame before spending an RSA decryption on it.

use rsa::{Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::CryptoError;

/// Sign `data` with `key`.
///
/// # Errors
///
/// Returns [`CryptoError::Signing`] if the key cannot produce a signature.
pub fn sign(data: &[u8], key: &RsaPrivateKey) -> Result<Vec<u8>, CryptoError> {
    let digest = Sha256::digest(data);
    key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
        .map_err(|e| CryptoError::Signing(e.to_string()))
}

/// Verify that `signature` was made over `data` by the holder of `key`.
///
/// # Errors
///
/// Returns [`CryptoError::Verification`] on any mismatch.
pub fn verify(data: &[u8], signature: &[u8], key: &RsaPublicKey) -> Result<(), CryptoError> {
    let digest = Sha256::digest(data);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| CryptoError::Verification)
}
