//! Per-event encryption at rest.
//!
//! Writers encrypt every event independently before framing it, so a crash
//! or a damaged record never affects the decryptability of its neighbours.
//!
//! ## Security Model
//!
//! - The capability is supplied by the caller through [`DataEncryption`]
//! - [`AesGcmEncryption`] uses AES-256-GCM with a random nonce per event
//! - Output format: `nonce (12 bytes) || ciphertext || tag (16 bytes)`
//! - Keys are zeroized on drop and never logged

use crate::error::{StorageError, StorageResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// An encryption capability applied to each event independently.
///
/// Implementations must be deterministic in the sense that
/// `decrypt(encrypt(x)) == x` across process restarts.
pub trait DataEncryption: Send + Sync {
    /// Encrypts one event.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Encryption`] if the event cannot be encrypted.
    fn encrypt(&self, data: &[u8]) -> StorageResult<Vec<u8>>;

    /// Decrypts one event previously produced by [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Encryption`] on a wrong key or damaged data.
    fn decrypt(&self, data: &[u8]) -> StorageResult<Vec<u8>>;
}

/// Encryption key for AES-256-GCM.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random encryption key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes slice is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> StorageResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(StorageError::InvalidKeySize {
                expected: KEY_SIZE,
                actual: bytes.len(),
            });
        }
        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);
        Ok(Self { bytes: key_bytes })
    }

    /// Derives a key from a high-entropy passphrase using HKDF-SHA256.
    ///
    /// HKDF is not a password hash; the input is expected to already carry
    /// enough entropy (a generated secret, a platform keychain item).
    ///
    /// # Errors
    ///
    /// Returns an error if HKDF expansion fails.
    pub fn derive_from_passphrase(passphrase: &[u8], salt: &[u8]) -> StorageResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), passphrase);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"eventstash-batch-key-v1", &mut bytes)
            .map_err(|_| StorageError::encryption("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    /// Returns the key as a byte slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM implementation of [`DataEncryption`].
pub struct AesGcmEncryption {
    cipher: Aes256Gcm,
}

impl AesGcmEncryption {
    /// Creates a new cipher with the given key.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }
}

impl fmt::Debug for AesGcmEncryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmEncryption").finish_non_exhaustive()
    }
}

impl DataEncryption for AesGcmEncryption {
    fn encrypt(&self, plaintext: &[u8]) -> StorageResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| StorageError::encryption("encryption error"))?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend(ciphertext);
        Ok(result)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> StorageResult<Vec<u8>> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(StorageError::encryption("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&ciphertext[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &ciphertext[NONCE_SIZE..])
            .map_err(|_| StorageError::encryption("authentication failed"))
    }
}
