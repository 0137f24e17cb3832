//! Cryptographic primitives for TP-Link Tapo device communication.
//!
//! This module provides the cipher engines for the two protocols spoken by
//! Tapo firmware:
//!
//! - [`klap`]: KLAP seed-exchange key derivation and sequence-numbered AES-CBC frames
//! - [`passthrough`]: RSA-bootstrapped AES-CBC used by the `securePassthrough` envelope
//!
//! Nothing in here performs I/O.

pub mod klap;
pub mod passthrough;

pub use klap::{KlapCipher, generate_auth_hash};
pub use passthrough::{HandshakeKeyPair, PassthroughCipher};

use thiserror::Error;

/// Error type for cipher operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Ciphertext length or PKCS#7 padding was invalid.
    #[error("invalid padding or ciphertext length")]
    Unpad,
    /// Decrypted bytes were not valid UTF-8.
    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
    /// Base64 payload could not be decoded.
    #[error("base64 decode failed: {0}")]
    Base64(String),
    /// RSA key generation, encoding or decryption failed.
    #[error("RSA error: {0}")]
    Rsa(String),
    /// Key exchange blob was shorter than key + IV.
    #[error("session key too short: {0} bytes")]
    KeyTooShort(usize),
}
