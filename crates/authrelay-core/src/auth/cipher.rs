//! Passphrase sealing for credentials persisted to disk.
//!
//! Layout of a sealed blob: `salt (16) || nonce (12) || ciphertext`.
//! The key is derived per blob with Argon2id from the passphrase and salt.

use argon2::Argon2;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;

use super::slots::SlotError;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct SealKey {
    passphrase: Vec<u8>,
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealKey").finish_non_exhaustive()
    }
}

impl SealKey {
    pub fn new(passphrase: &str) -> Self {
        Self {
            passphrase: passphrase.as_bytes().to_vec(),
        }
    }

    fn derive(&self, salt: &[u8]) -> Result<[u8; KEY_LEN], SlotError> {
        let mut key = [0u8; KEY_LEN];
        Argon2::default()
            .hash_password_into(&self.passphrase, salt, &mut key)
            .map_err(|e| SlotError::Cipher(format!("key derivation failed: {}", e)))?;
        Ok(key)
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, SlotError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = self.derive(&salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| SlotError::Cipher("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, SlotError> {
        if sealed.len() < SALT_LEN + NONCE_LEN {
            return Err(SlotError::Corrupt("sealed blob too short".to_string()));
        }
        let (salt, rest) = sealed.split_at(SALT_LEN);
        let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

        let key = self.derive(salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key));
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SlotError::Cipher("wrong passphrase or tampered data".to_string()))
    }
}
