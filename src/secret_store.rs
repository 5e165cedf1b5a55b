//! In-process AEAD encryption for client secrets and cached access tokens
//! (spec §4.1).
//!
//! Each [`SecretStore`] owns a freshly generated AES-256-GCM key for its
//! lifetime; the key never leaves process memory and is never persisted.
//! Ciphertext produced by one instance cannot be decrypted by another
//! (I6) — this is what gives each [`crate::token_manager::TokenManager`]
//! its own encryption domain.

use crate::error::SecretError;
use ring::aead::{Aad, LessSafeKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM, NONCE_LEN};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::atomic::{AtomicU64, Ordering};
use zeroize::Zeroize;

/// Opaque encrypted bytes. The first [`NONCE_LEN`] bytes are the nonce used
/// for that encryption; the remainder is ciphertext + AEAD tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Monotonic per-instance nonce counter. AES-GCM requires a unique nonce per
/// encryption under the same key; a random-entropy-seeded counter gives us
/// that without a shared mutable cursor across encrypt calls.
struct CounterNonceSequence {
    prefix: [u8; 4],
    counter: u64,
}

impl NonceSequence for CounterNonceSequence {
    fn advance(&mut self) -> Result<Nonce, ring::error::Unspecified> {
        let mut buf = [0u8; NONCE_LEN];
        buf[..4].copy_from_slice(&self.prefix);
        buf[4..].copy_from_slice(&self.counter.to_be_bytes());
        self.counter = self.counter.wrapping_add(1);
        Nonce::try_assume_unique_for_key(&buf)
    }
}

/// Encrypts and decrypts secrets with a key that lives only for the life of
/// this instance.
pub struct SecretStore {
    key: LessSafeKey,
    nonce_prefix: [u8; 4],
    nonce_counter: AtomicU64,
}

impl SecretStore {
    /// Generate a fresh key from the system CSPRNG. Fatal at startup if the
    /// platform cannot supply entropy (spec §4.1 "construction failure is
    /// fatal").
    pub fn new() -> Result<Self, SecretError> {
        let rng = SystemRandom::new();
        let mut key_bytes = [0u8; 32];
        rng.fill(&mut key_bytes).map_err(|_| SecretError::KeyGeneration)?;
        let mut prefix = [0u8; 4];
        rng.fill(&mut prefix).map_err(|_| SecretError::KeyGeneration)?;

        let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
            .map_err(|_| SecretError::KeyGeneration)?;
        key_bytes.zeroize();

        Ok(Self {
            key: LessSafeKey::new(unbound),
            nonce_prefix: prefix,
            nonce_counter: AtomicU64::new(0),
        })
    }

    /// Encrypt a UTF-8 plaintext. Each call yields a distinct ciphertext
    /// even for identical plaintext, because the nonce is never reused.
    pub fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, SecretError> {
        let counter = self.nonce_counter.fetch_add(1, Ordering::Relaxed);
        let mut sequence = CounterNonceSequence {
            prefix: self.nonce_prefix,
            counter,
        };
        let nonce = sequence
            .advance()
            .map_err(|_| SecretError::KeyGeneration)?;
        let nonce_bytes = *nonce.as_ref();

        let mut in_out = plaintext.as_bytes().to_vec();
        self.key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::KeyGeneration)?;

        let mut out = Vec::with_capacity(NONCE_LEN + in_out.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&in_out);
        Ok(Ciphertext(out))
    }

    /// Decrypt a ciphertext produced by `encrypt` on *this* instance.
    /// Ciphertext produced by a different instance fails to authenticate
    /// and returns [`SecretError::Decryption`] (I6, P4).
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, SecretError> {
        let bytes = ciphertext.as_bytes();
        if bytes.len() < NONCE_LEN {
            return Err(SecretError::Decryption);
        }
        let (nonce_bytes, body) = bytes.split_at(NONCE_LEN);
        let nonce =
            Nonce::try_assume_unique_for_key(nonce_bytes).map_err(|_| SecretError::Decryption)?;

        let mut in_out = body.to_vec();
        let plaintext = self
            .key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| SecretError::Decryption)?;

        let result = String::from_utf8(plaintext.to_vec()).map_err(|_| SecretError::Decryption);
        in_out.zeroize();
        result
    }
}
