//! Encryption of secret material at rest.
//!
//! Every secret part of a credential version (private keys, passwords,
//! values) passes through an [`Encryptor`] before it reaches the store. The
//! shipped implementation, [`AesGcmEncryptor`], uses AES-256-GCM with a fresh
//! 96-bit nonce per value. Keys are zeroized on drop and never appear in
//! `Debug` output.

use std::fmt;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Nonce length for AES-256-GCM (96 bits).
const NONCE_LEN: usize = 12;

/// HKDF `info` used when deriving the value-encryption key from a master key.
pub const VALUE_KEY_INFO: &[u8] = b"credvault-value-encryption-v1";

/// A 256-bit encryption key that is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    /// Create a key from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Generate a new random key using the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&key);
        Self(bytes)
    }

    /// Borrow the raw key bytes. Never log or persist them.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive a purpose-bound key from master key material using HKDF-SHA256.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] if HKDF expansion fails.
pub fn derive_key(
    master: &[u8],
    salt: Option<&[u8]>,
    info: &[u8],
) -> Result<EncryptionKey, CryptoError> {
    let hk = Hkdf::<Sha256>::new(salt, master);
    let mut derived = [0u8; 32];
    hk.expand(info, &mut derived)
        .map_err(|e| CryptoError::KeyDerivation {
            context: String::from_utf8_lossy(info).into_owned(),
            reason: e.to_string(),
        })?;
    Ok(EncryptionKey::from_bytes(derived))
}

/// Ciphertext of one secret value plus what is needed to decrypt it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedValue {
    /// Identifier of the key the value was encrypted under.
    pub encryption_key_uuid: Uuid,
    /// Base64 ciphertext including the GCM tag.
    pub encrypted_value: String,
    /// Base64 96-bit nonce.
    pub nonce: String,
}

/// Encrypts and decrypts secret material.
pub trait Encryptor: Send + Sync {
    /// Encrypt `plaintext` under the active key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Encryption`] if the AEAD operation fails.
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedValue, CryptoError>;

    /// Decrypt a value produced by [`encrypt`](Encryptor::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] if the key is unknown, the encoding is
    /// malformed, or authentication fails.
    fn decrypt(&self, value: &EncryptedValue) -> Result<Vec<u8>, CryptoError>;
}

/// AES-256-GCM [`Encryptor`] holding a single active key.
pub struct AesGcmEncryptor {
    key_uuid: Uuid,
    key: EncryptionKey,
}

impl AesGcmEncryptor {
    /// Create an encryptor for `key`, identified by `key_uuid`.
    #[must_use]
    pub fn new(key_uuid: Uuid, key: EncryptionKey) -> Self {
        Self { key_uuid, key }
    }

    /// Create an encryptor with a random key. Values do not survive a restart.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self::new(Uuid::new_v4(), EncryptionKey::generate())
    }

    /// Identifier of the active key.
    #[must_use]
    pub fn key_uuid(&self) -> Uuid {
        self.key_uuid
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(self.key.as_bytes()))
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedValue, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext =
            self.cipher()
                .encrypt(&nonce, plaintext)
                .map_err(|e| CryptoError::Encryption {
                    reason: e.to_string(),
                })?;

        Ok(EncryptedValue {
            encryption_key_uuid: self.key_uuid,
            encrypted_value: B64.encode(ciphertext),
            nonce: B64.encode(nonce),
        })
    }

    fn decrypt(&self, value: &EncryptedValue) -> Result<Vec<u8>, CryptoError> {
        if value.encryption_key_uuid != self.key_uuid {
            return Err(CryptoError::UnknownKey {
                key_uuid: value.encryption_key_uuid.to_string(),
            });
        }

        let nonce_bytes = B64
            .decode(&value.nonce)
            .map_err(|e| CryptoError::Malformed {
                reason: format!("nonce: {e}"),
            })?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::Malformed {
                reason: format!("nonce must be {NONCE_LEN} bytes, got {}", nonce_bytes.len()),
            });
        }
        let ciphertext = B64
            .decode(&value.encrypted_value)
            .map_err(|e| CryptoError::Malformed {
                reason: format!("ciphertext: {e}"),
            })?;

        self.cipher()
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_slice())
            .map_err(|e| CryptoError::Decryption {
                reason: e.to_string(),
            })
    }
}

impl fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AesGcmEncryptor")
            .field("key_uuid", &self.key_uuid)
            .finish_non_exhaustive()
    }
}
