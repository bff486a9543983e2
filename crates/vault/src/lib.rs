//! Envelope encryption for upstream provider credentials.
//!
//! Secrets at rest are AES-256-GCM ciphertexts with the 16-byte authentication
//! tag appended, under a data-encryption key derived once per process from the
//! operator's master secret with Argon2id and a fixed salt. Each encryption uses
//! a fresh 16-byte random IV; the IV and the ciphertext are stored as separate
//! base64 fields.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// AES-256-GCM parameterized with a 16-byte nonce.
type Cipher = AesGcm<Aes256, U16>;

const IV_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Salt for the master-secret KDF. Changing it invalidates every stored secret.
const KDF_SALT: &[u8] = b"gatehouse/vault/dek/v1";

/// Environment variable the master secret is read from by [`Vault::from_env`].
pub const MASTER_SECRET_ENV: &str = "GATEHOUSE_MASTER_SECRET";

/// An encrypted secret as persisted: base64 ciphertext+tag and base64 IV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    pub encrypted_key: String,
    pub key_iv: String,
}

/// Holds the derived data-encryption key for the process lifetime.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Vault {
    key: [u8; 32],
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// The master secret is unset or empty.
    #[error("master secret is missing")]
    MissingMasterSecret,
    /// The KDF rejected its parameters; indicates a build misconfiguration.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Raised by [`Vault::open`] when a stored secret cannot be recovered.
#[derive(Debug, thiserror::Error)]
pub enum VaultDecryptError {
    #[error("stored IV is not valid base64 or has the wrong length")]
    MalformedIv,
    #[error("stored ciphertext is not valid base64 or is truncated")]
    MalformedCiphertext,
    /// Wrong master secret, or the ciphertext was tampered with.
    #[error("authentication failed")]
    AuthenticationFailed,
}

impl Vault {
    /// Derives the data-encryption key from `master_secret`.
    pub fn new(master_secret: &[u8]) -> Result<Self, VaultError> {
        if master_secret.is_empty() {
            return Err(VaultError::MissingMasterSecret);
        }
        let mut key = [0u8; 32];
        argon2::Argon2::default()
            .hash_password_into(master_secret, KDF_SALT, &mut key)
            .map_err(|e| VaultError::KeyDerivation(e.to_string()))?;
        Ok(Vault { key })
    }

    /// Builds a vault from the [`MASTER_SECRET_ENV`] environment variable.
    pub fn from_env() -> Result<Self, VaultError> {
        let secret = std::env::var(MASTER_SECRET_ENV)
            .map_err(|_| VaultError::MissingMasterSecret)?;
        let secret = Zeroizing::new(secret);
        Vault::new(secret.as_bytes())
    }

    /// Encrypts `plaintext` under a fresh random IV.
    pub fn seal(&self, plaintext: &[u8]) -> SealedSecret {
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let cipher = Cipher::new(Key::<Cipher>::from_slice(&self.key));
        // Encrypting an in-memory buffer cannot fail for this cipher.
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .expect("AES-GCM encryption of an in-memory buffer");

        SealedSecret {
            encrypted_key: BASE64.encode(ciphertext),
            key_iv: BASE64.encode(iv),
        }
    }

    /// Decrypts a stored secret. The plaintext is zeroized when dropped.
    pub fn open(&self, sealed: &SealedSecret) -> Result<Zeroizing<Vec<u8>>, VaultDecryptError> {
        let iv = BASE64
            .decode(&sealed.key_iv)
            .map_err(|_| VaultDecryptError::MalformedIv)?;
        if iv.len() != IV_LEN {
            return Err(VaultDecryptError::MalformedIv);
        }
        let ciphertext = BASE64
            .decode(&sealed.encrypted_key)
            .map_err(|_| VaultDecryptError::MalformedCiphertext)?;
        if ciphertext.len() < TAG_LEN {
            return Err(VaultDecryptError::MalformedCiphertext);
        }

        let cipher = Cipher::new(Key::<Cipher>::from_slice(&self.key));
        cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| VaultDecryptError::AuthenticationFailed)
    }

    /// Convenience for string secrets (API keys are UTF-8 in practice).
    pub fn open_string(&self, sealed: &SealedSecret) -> Result<Zeroizing<String>, VaultDecryptError> {
        let bytes = self.open(sealed)?;
        String::from_utf8(bytes.to_vec())
            .map(Zeroizing::new)
            .map_err(|_| VaultDecryptError::MalformedCiphertext)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault").finish_non_exhaustive()
    }
}
