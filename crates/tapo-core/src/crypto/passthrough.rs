//! Passthrough session encryption.
//!
//! The client generates an RSA keypair per handshake and sends the public
//! half to the device. The device answers with a 32-byte blob (`key ‖ iv`)
//! encrypted under RSA-PKCS#1 v1.5. Every subsequent request is AES-128-CBC
//! encrypted with that fixed key and IV and carried base64-encoded inside a
//! `securePassthrough` envelope.

use aes::Aes128;
use base64::{Engine, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use rsa::{
    Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey, pkcs8::EncodePublicKey, rand_core::OsRng,
};

use crate::crypto::CipherError;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// RSA modulus size used for the key exchange.
pub const RSA_KEY_BITS: usize = 1024;

/// AES key and IV pair used for one Passthrough session.
#[derive(Clone)]
pub struct PassthroughCipher {
    key: [u8; 16],
    iv: [u8; 16],
}

impl PassthroughCipher {
    /// Creates a cipher from an explicit key and IV.
    pub fn new(key: [u8; 16], iv: [u8; 16]) -> Self {
        Self { key, iv }
    }

    /// Splits a decrypted handshake blob into key (`[0..16]`) and IV (`[16..32]`).
    pub fn from_session_key(blob: &[u8]) -> Result<Self, CipherError> {
        if blob.len() < 32 {
            return Err(CipherError::KeyTooShort(blob.len()));
        }
        let mut key = [0u8; 16];
        let mut iv = [0u8; 16];
        key.copy_from_slice(&blob[..16]);
        iv.copy_from_slice(&blob[16..32]);
        Ok(Self { key, iv })
    }

    /// Encrypts a JSON request and returns it base64 encoded.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        STANDARD.encode(ciphertext)
    }

    /// Decodes and decrypts a base64 response.
    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let ciphertext = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::Base64(e.to_string()))?;
        let plaintext = Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Unpad)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }
}

impl std::fmt::Debug for PassthroughCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassthroughCipher")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}

/// Ephemeral RSA keypair for one Passthrough handshake.
pub struct HandshakeKeyPair {
    private: RsaPrivateKey,
}

impl HandshakeKeyPair {
    /// Generates a fresh 1024-bit keypair.
    pub fn generate() -> Result<Self, CipherError> {
        // OsRng comes from rsa's own rand_core to avoid a version clash with `rand`
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .map_err(|e| CipherError::Rsa(e.to_string()))?;
        Ok(Self { private })
    }

    /// Public key as base64 DER `SubjectPublicKeyInfo`, without PEM armour.
    ///
    /// P100 firmware parses this form as well as the PKCS#1 `RSAPublicKey`
    /// encoding, and it is the one other P100 clients send.
    pub fn public_key_base64(&self) -> Result<String, CipherError> {
        let der = RsaPublicKey::from(&self.private)
            .to_public_key_der()
            .map_err(|e| CipherError::Rsa(e.to_string()))?;
        Ok(STANDARD.encode(der.as_bytes()))
    }

    /// Decrypts the device's base64 `result.key` into a session cipher.
    pub fn decrypt_session_key(&self, encoded: &str) -> Result<PassthroughCipher, CipherError> {
        let ciphertext = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CipherError::Base64(e.to_string()))?;
        let blob = self
            .private
            .decrypt(Pkcs1v15Encrypt, &ciphertext)
            .map_err(|e| CipherError::Rsa(e.to_string()))?;
        PassthroughCipher::from_session_key(&blob)
    }
}

impl std::fmt::Debug for HandshakeKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKeyPair")
            .field("bits", &RSA_KEY_BITS)
            .finish_non_exhaustive()
    }
}
