//! KLAP key derivation and frame encryption.
//!
//! Both sides of a KLAP session derive every key from the same 64-byte
//! `local_hash = local_seed ‖ remote_seed ‖ auth_hash`:
//!
//! | material        | derivation                          | size |
//! |-----------------|-------------------------------------|------|
//! | AES key         | `sha256("lsk" ‖ local_hash)[..16]`  | 16   |
//! | IV base         | `sha256("iv" ‖ local_hash)[..12]`   | 12   |
//! | initial seq     | `sha256("iv" ‖ local_hash)[28..]`   | i32 BE |
//! | signature key   | `sha256("ldk" ‖ local_hash)[..28]`  | 28   |
//!
//! Each request uses `iv_base ‖ seq_be` as its AES-128-CBC IV and is framed
//! as `sha256(signature_key ‖ seq_be ‖ ciphertext) ‖ ciphertext`.

use aes::Aes128;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::{Credentials, crypto::CipherError};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Length of the local and remote handshake seeds.
pub const SEED_LEN: usize = 16;

/// Length of the SHA-256 signature prefixed to every request frame.
pub const SIGNATURE_LEN: usize = 32;

/// Length of the handshake1 response: remote seed followed by server hash.
pub const HANDSHAKE1_RESPONSE_LEN: usize = SEED_LEN + 32;

/// Length of `local_seed ‖ remote_seed ‖ auth_hash`.
pub const LOCAL_HASH_LEN: usize = SEED_LEN * 2 + 32;

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

fn sha1(data: &[u8]) -> [u8; 20] {
    Sha1::digest(data).into()
}

/// Generates the KLAP authentication hash.
///
/// `auth_hash = sha256(sha1(username) ‖ sha1(password))`
pub fn generate_auth_hash(credentials: &Credentials) -> [u8; 32] {
    sha256(&[
        &sha1(credentials.username.as_bytes()),
        &sha1(credentials.expose_password().as_bytes()),
    ])
}

/// Hash the device returns in handshake1: `sha256(local_seed ‖ remote_seed ‖ auth_hash)`.
pub fn handshake1_server_hash(
    local_seed: &[u8; SEED_LEN],
    remote_seed: &[u8; SEED_LEN],
    auth_hash: &[u8; 32],
) -> [u8; 32] {
    sha256(&[local_seed, remote_seed, auth_hash])
}

/// Hash the client proves itself with in handshake2:
/// `sha256(remote_seed ‖ local_seed ‖ auth_hash)`.
pub fn handshake2_client_hash(
    local_seed: &[u8; SEED_LEN],
    remote_seed: &[u8; SEED_LEN],
    auth_hash: &[u8; 32],
) -> [u8; 32] {
    sha256(&[remote_seed, local_seed, auth_hash])
}

/// Concatenates the seeds and auth hash into the derivation input.
pub fn local_hash(
    local_seed: &[u8; SEED_LEN],
    remote_seed: &[u8; SEED_LEN],
    auth_hash: &[u8; 32],
) -> [u8; LOCAL_HASH_LEN] {
    let mut out = [0u8; LOCAL_HASH_LEN];
    out[..SEED_LEN].copy_from_slice(local_seed);
    out[SEED_LEN..SEED_LEN * 2].copy_from_slice(remote_seed);
    out[SEED_LEN * 2..].copy_from_slice(auth_hash);
    out
}

/// Derives the 16-byte AES key.
pub fn derive_key(local_hash: &[u8]) -> [u8; 16] {
    let hash = sha256(&[b"lsk", local_hash]);
    let mut key = [0u8; 16];
    key.copy_from_slice(&hash[..16]);
    key
}

/// Derives the 12-byte IV base and the initial sequence number.
pub fn derive_iv(local_hash: &[u8]) -> ([u8; 12], i32) {
    let hash = sha256(&[b"iv", local_hash]);
    let mut iv_base = [0u8; 12];
    iv_base.copy_from_slice(&hash[..12]);
    let seq = i32::from_be_bytes([hash[28], hash[29], hash[30], hash[31]]);
    (iv_base, seq)
}

/// Derives the 28-byte signature key.
pub fn derive_signature_key(local_hash: &[u8]) -> [u8; 28] {
    let hash = sha256(&[b"ldk", local_hash]);
    let mut sig = [0u8; 28];
    sig.copy_from_slice(&hash[..28]);
    sig
}

/// KLAP cipher engine for one authenticated session.
///
/// Holds the derived keys and the request sequence counter. The counter is
/// advanced once per [`encrypt`](Self::encrypt) call; responses are decrypted
/// with the sequence of the request they answer.
#[derive(Clone)]
pub struct KlapCipher {
    key: [u8; 16],
    iv_base: [u8; 12],
    signature_key: [u8; 28],
    seq: i32,
}

impl KlapCipher {
    /// Builds the cipher from the handshake material.
    pub fn new(
        local_seed: &[u8; SEED_LEN],
        remote_seed: &[u8; SEED_LEN],
        auth_hash: &[u8; 32],
    ) -> Self {
        Self::from_local_hash(&local_hash(local_seed, remote_seed, auth_hash))
    }

    /// Builds the cipher from a precomputed `local_hash`.
    pub fn from_local_hash(local_hash: &[u8]) -> Self {
        let (iv_base, seq) = derive_iv(local_hash);
        Self {
            key: derive_key(local_hash),
            iv_base,
            signature_key: derive_signature_key(local_hash),
            seq,
        }
    }

    /// Current sequence number (the one used by the most recent request).
    pub fn seq(&self) -> i32 {
        self.seq
    }

    /// Advances the sequence and encrypts a request.
    ///
    /// Returns `signature ‖ ciphertext` and the sequence number the device
    /// expects in the `seq` query parameter.
    pub fn encrypt(&mut self, plaintext: &str) -> (Vec<u8>, i32) {
        self.seq = self.seq.wrapping_add(1);
        (self.seal(self.seq, plaintext.as_bytes()), self.seq)
    }

    /// Encrypts and signs at an explicit sequence without advancing the counter.
    pub fn seal(&self, seq: i32, plaintext: &[u8]) -> Vec<u8> {
        let ciphertext = Aes128CbcEnc::new(&self.key.into(), &self.iv_for(seq).into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        let signature = sha256(&[&self.signature_key, &seq.to_be_bytes(), &ciphertext]);

        let mut payload = Vec::with_capacity(SIGNATURE_LEN + ciphertext.len());
        payload.extend_from_slice(&signature);
        payload.extend_from_slice(&ciphertext);
        payload
    }

    /// Decrypts a response body (signature already stripped) for `seq`.
    pub fn decrypt(&self, seq: i32, ciphertext: &[u8]) -> Result<String, CipherError> {
        let plaintext = Aes128CbcDec::new(&self.key.into(), &self.iv_for(seq).into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::Unpad)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }

    fn iv_for(&self, seq: i32) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..12].copy_from_slice(&self.iv_base);
        iv[12..].copy_from_slice(&seq.to_be_bytes());
        iv
    }
}

impl std::fmt::Debug for KlapCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KlapCipher")
            .field("seq", &self.seq)
            .field("key", &"[REDACTED]")
            .finish()
    }
}
