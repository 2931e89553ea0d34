//! Cryptographic primitives for Xtty.
//!
//! Everything here is stateless apart from drawing randomness from the OS:
//! [`keys`] generates and (de)serializes RSA keypairs, [`hybrid`] seals a
//! message under a fresh AES-256-GCM key wrapped with RSA-OAEP, and
//! [`signature`] signs and verifies ciphertext with PKCS#1 v1.5.
//!
//! Plaintext only exists on either side of [`hybrid::encrypt`] and
//! [`hybrid::decrypt`]. Nothing above this layer puts plaintext on the wire.

pub mod hybrid;
pub mod keys;
pub mod signature;

use std::path::PathBuf;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The RSA keypair could not be generated.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// A key could not be decoded (bad PEM framing, wrong key type).
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// Sealing or key wrapping failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// The wrapped key could not be unwrapped or the AEAD tag did not match.
    #[error("decryption failed: ciphertext or wrapped key is invalid")]
    Decryption,

    /// The ciphertext is too short to hold a nonce.
    #[error("ciphertext truncated: {len} bytes is shorter than the {min}-byte nonce")]
    TruncatedInput {
        /// Length that was supplied.
        len: usize,
        /// Minimum acceptable length.
        min: usize,
    },

    /// Producing a signature failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// The signature does not match the data and key.
    #[error("signature verification failed")]
    Verification,

    /// A key file could not be read or written.
    #[error("key file {path}: {source}")]
    KeyFile {
        /// File that was accessed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}
