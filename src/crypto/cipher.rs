//! Envelope encryption for stored values.
//!
//! Symmetric keys are derived from a passphrase with Argon2id and used with
//! AES-256-GCM. Asymmetric keys are age x25519 key pairs. Every ciphertext is
//! wrapped in a versioned envelope naming its algorithm:
//!
//! - `vaulter:v1:aes256gcm:<base64(nonce || ciphertext)>`
//! - `vaulter:v1:age:<base64(age payload)>`

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use age::secrecy::ExposeSecret;
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::config::{EncryptionMode, KdfConfig};
use crate::error::{DecryptionError, KeyError, Result};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// 12-byte nonce for AES-GCM (96 bits is the standard).
pub const NONCE_SIZE: usize = 12;

/// Salt length fed to Argon2.
const SALT_SIZE: usize = 16;

/// Envelope prefix shared by every format.
const ENVELOPE_PREFIX: &str = "vaulter:v1:";

/// Envelope tag for AES-256-GCM payloads.
const AES_TAG: &str = "aes256gcm";

/// Envelope tag for age payloads.
const AGE_TAG: &str = "age";

/// Resolved key material for one (project, environment).
///
/// Cloning is cheap; the secret parts live behind an `Arc` and are zeroized
/// when the last clone drops.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Project the key belongs to.
    project: String,
    /// Environment the key was resolved for.
    environment: String,
    /// Human-readable origin (`env:VAULTER_KEY_PRD`, a file path, ...).
    source: String,
    /// Secret parts.
    secret: Arc<Secret>,
}

/// Secret parts of a key.
enum Secret {
    /// Derived AES-256 key.
    Symmetric(Zeroizing<[u8; KEY_SIZE]>),
    /// age key pair; the identity is absent for encrypt-only material.
    Asymmetric {
        recipient: age::x25519::Recipient,
        identity: Option<age::x25519::Identity>,
    },
}

/// Derives the Argon2 salt from the project name.
fn project_salt(project: &str) -> [u8; SALT_SIZE] {
    let digest = Sha256::digest(format!("vaulter:{project}").as_bytes());
    let mut salt = [0u8; SALT_SIZE];
    salt.copy_from_slice(&digest[..SALT_SIZE]);
    salt
}

/// Returns the encryption mode an envelope was produced with, if recognised.
#[must_use]
pub fn envelope_mode(stored: &str) -> Option<EncryptionMode> {
    let rest = stored.strip_prefix(ENVELOPE_PREFIX)?;
    if rest.starts_with(AES_TAG) && rest[AES_TAG.len()..].starts_with(':') {
        Some(EncryptionMode::Symmetric)
    } else if rest.starts_with(AGE_TAG) && rest[AGE_TAG.len()..].starts_with(':') {
        Some(EncryptionMode::Asymmetric)
    } else {
        None
    }
}

impl KeyMaterial {
    /// Derives symmetric material from a passphrase using Argon2id.
    ///
    /// # Errors
    ///
    /// Returns an error if the passphrase is empty or the KDF parameters are invalid.
    pub fn symmetric(
        project: &str,
        environment: &str,
        source: &str,
        passphrase: &str,
        kdf: &KdfConfig,
    ) -> std::result::Result<Self, KeyError> {
        if passphrase.is_empty() {
            return Err(KeyError::invalid(source, "passphrase is empty"));
        }

        let params = Params::new(kdf.memory_kib, kdf.iterations, kdf.parallelism, Some(KEY_SIZE))
            .map_err(|e| KeyError::invalid(source, format!("invalid Argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        argon2
            .hash_password_into(passphrase.as_bytes(), &project_salt(project), &mut *key)
            .map_err(|e| KeyError::invalid(source, format!("Argon2 failed: {e}")))?;

        Ok(Self {
            project: project.to_string(),
            environment: environment.to_string(),
            source: source.to_string(),
            secret: Arc::new(Secret::Symmetric(key)),
        })
    }

    /// Builds asymmetric material from an age recipient and/or identity.
    ///
    /// When only the identity is given, the recipient is derived from it.
    ///
    /// # Errors
    ///
    /// Returns an error if neither key is given or either fails to parse.
    pub fn asymmetric(
        project: &str,
        environment: &str,
        source: &str,
        public_key: Option<&str>,
        private_key: Option<&str>,
    ) -> std::result::Result<Self, KeyError> {
        let identity = private_key
            .map(|raw| {
                raw.trim()
                    .parse::<age::x25519::Identity>()
                    .map_err(|e| KeyError::invalid(source, format!("invalid private key: {e}")))
            })
            .transpose()?;

        let recipient = match (public_key, &identity) {
            (Some(raw), _) => raw
                .trim()
                .parse::<age::x25519::Recipient>()
                .map_err(|e| KeyError::invalid(source, format!("invalid public key: {e}")))?,
            (None, Some(identity)) => identity.to_public(),
            (None, None) => return Err(KeyError::invalid(source, "no public or private key")),
        };

        Ok(Self {
            project: project.to_string(),
            environment: environment.to_string(),
            source: source.to_string(),
            secret: Arc::new(Secret::Asymmetric {
                recipient,
                identity,
            }),
        })
    }

    /// Returns the encryption mode.
    #[must_use]
    pub fn mode(&self) -> EncryptionMode {
        match *self.secret {
            Secret::Symmetric(_) => EncryptionMode::Symmetric,
            Secret::Asymmetric { .. } => EncryptionMode::Asymmetric,
        }
    }

    /// Returns the algorithm name.
    #[must_use]
    pub fn algorithm(&self) -> &'static str {
        match *self.secret {
            Secret::Symmetric(_) => "aes-256-gcm",
            Secret::Asymmetric { .. } => "age-x25519",
        }
    }

    /// Returns where the material was resolved from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Returns the environment the material was resolved for.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Returns true if the material can decrypt.
    #[must_use]
    pub fn can_decrypt(&self) -> bool {
        match &*self.secret {
            Secret::Symmetric(_) => true,
            Secret::Asymmetric { identity, .. } => identity.is_some(),
        }
    }

    /// Returns the age recipient string for asymmetric material.
    #[must_use]
    pub fn public_key(&self) -> Option<String> {
        match &*self.secret {
            Secret::Symmetric(_) => None,
            Secret::Asymmetric { recipient, .. } => Some(recipient.to_string()),
        }
    }

    /// Returns a short stable identifier of the key, safe to persist.
    ///
    /// Two materials share a fingerprint exactly when they encrypt to the
    /// same key.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"vaulter:fp:");
        match &*self.secret {
            Secret::Symmetric(key) => hasher.update(&key[..]),
            Secret::Asymmetric { recipient, .. } => hasher.update(recipient.to_string().as_bytes()),
        }
        let mut fingerprint = hex::encode(hasher.finalize());
        fingerprint.truncate(16);
        fingerprint
    }

    /// Encrypts a plaintext value into an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the cipher fails.
    pub fn encrypt(&self, plaintext: &str) -> std::result::Result<String, KeyError> {
        match &*self.secret {
            Secret::Symmetric(key) => {
                let cipher = Aes256Gcm::new_from_slice(&key[..]).map_err(|e| {
                    KeyError::EncryptionFailed {
                        message: format!("invalid key: {e}"),
                    }
                })?;

                let mut nonce_bytes = [0u8; NONCE_SIZE];
                rand::thread_rng().fill_bytes(&mut nonce_bytes);

                let ciphertext = cipher
                    .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
                    .map_err(|e| KeyError::EncryptionFailed {
                        message: e.to_string(),
                    })?;

                let mut payload = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
                payload.extend_from_slice(&nonce_bytes);
                payload.extend_from_slice(&ciphertext);

                Ok(format!("{ENVELOPE_PREFIX}{AES_TAG}:{}", STANDARD.encode(payload)))
            }
            Secret::Asymmetric { recipient, .. } => {
                let encryptor = age::Encryptor::with_recipients(vec![Box::new(recipient.clone())])
                    .ok_or_else(|| KeyError::EncryptionFailed {
                        message: String::from("no recipients"),
                    })?;

                let mut payload = vec![];
                let mut writer = encryptor
                    .wrap_output(&mut payload)
                    .map_err(|e| KeyError::EncryptionFailed {
                        message: e.to_string(),
                    })?;
                writer
                    .write_all(plaintext.as_bytes())
                    .map_err(|e| KeyError::EncryptionFailed {
                        message: e.to_string(),
                    })?;
                writer.finish().map_err(|e| KeyError::EncryptionFailed {
                    message: e.to_string(),
                })?;

                Ok(format!("{ENVELOPE_PREFIX}{AGE_TAG}:{}", STANDARD.encode(payload)))
            }
        }
    }

    /// Decrypts an envelope back into the plaintext value.
    ///
    /// # Errors
    ///
    /// Returns a `DecryptionError` for unknown formats, mode mismatches and
    /// authentication failures, and `KeyError::PrivateKeyMissing` when the
    /// material is encrypt-only.
    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let found = envelope_mode(stored).ok_or(DecryptionError::UnknownFormat)?;
        if found != self.mode() {
            return Err(DecryptionError::ModeMismatch {
                expected: self.mode().to_string(),
                found: found.to_string(),
            }
            .into());
        }

        let tag = match found {
            EncryptionMode::Symmetric => AES_TAG,
            EncryptionMode::Asymmetric => AGE_TAG,
        };
        let encoded = &stored[ENVELOPE_PREFIX.len() + tag.len() + 1..];
        let payload = STANDARD
            .decode(encoded)
            .map_err(|e| DecryptionError::Malformed {
                message: format!("invalid base64: {e}"),
            })?;

        let plaintext = match &*self.secret {
            Secret::Symmetric(key) => Self::open_aes(key, &payload)?,
            Secret::Asymmetric { identity, .. } => {
                let identity = identity.as_ref().ok_or_else(|| KeyError::PrivateKeyMissing {
                    project: self.project.clone(),
                    environment: self.environment.clone(),
                })?;
                Self::open_age(identity, &payload)?
            }
        };

        String::from_utf8(plaintext).map_err(|e| {
            DecryptionError::Malformed {
                message: format!("plaintext is not UTF-8: {e}"),
            }
            .into()
        })
    }

    /// Opens an AES-256-GCM payload.
    fn open_aes(
        key: &[u8; KEY_SIZE],
        payload: &[u8],
    ) -> std::result::Result<Vec<u8>, DecryptionError> {
        if payload.len() < NONCE_SIZE {
            return Err(DecryptionError::Malformed {
                message: format!("payload shorter than the {NONCE_SIZE}-byte nonce"),
            });
        }

        let (nonce, ciphertext) = payload.split_at(NONCE_SIZE);
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| DecryptionError::Malformed {
            message: format!("invalid key: {e}"),
        })?;

        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| DecryptionError::AuthenticationFailed)
    }

    /// Opens an age payload.
    fn open_age(
        identity: &age::x25519::Identity,
        payload: &[u8],
    ) -> std::result::Result<Vec<u8>, DecryptionError> {
        let decryptor = match age::Decryptor::new(payload).map_err(|e| DecryptionError::Malformed {
            message: e.to_string(),
        })? {
            age::Decryptor::Recipients(d) => d,
            _ => {
                return Err(DecryptionError::Malformed {
                    message: String::from("unexpected passphrase encryption"),
                });
            }
        };

        let mut reader = decryptor
            .decrypt(std::iter::once(identity as &dyn age::Identity))
            .map_err(|_| DecryptionError::AuthenticationFailed)?;

        let mut plaintext = vec![];
        reader
            .read_to_end(&mut plaintext)
            .map_err(|_| DecryptionError::AuthenticationFailed)?;
        Ok(plaintext)
    }
}

/// Generates a fresh age identity, returning `(private, public)` strings.
#[must_use]
pub fn generate_age_keypair() -> (Zeroizing<String>, String) {
    let identity = age::x25519::Identity::generate();
    let private = Zeroizing::new(identity.to_string().expose_secret().clone());
    (private, identity.to_public().to_string())
}

/// Generates a random 32-byte passphrase, base64-encoded.
#[must_use]
pub fn generate_passphrase() -> Zeroizing<String> {
    let mut bytes = Zeroizing::new([0u8; KEY_SIZE]);
    rand::thread_rng().fill_bytes(&mut *bytes);
    Zeroizing::new(STANDARD.encode(&bytes[..]))
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("project", &self.project)
            .field("environment", &self.environment)
            .field("source", &self.source)
            .field("algorithm", &self.algorithm())
            .field("can_decrypt", &self.can_decrypt())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::VaulterError;

    fn fast_kdf() -> KdfConfig {
        KdfConfig {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        }
    }

    fn symmetric(passphrase: &str) -> KeyMaterial {
        KeyMaterial::symmetric("app", "dev", "test", passphrase, &fast_kdf()).expect("key")
    }

    #[test]
    fn test_symmetric_roundtrip() {
        let key = symmetric("correct horse");
        let stored = key.encrypt("postgres://user:pw@host/db").expect("encrypt");
        assert!(stored.starts_with("vaulter:v1:aes256gcm:"));
        assert!(!stored.contains("postgres"));
        assert_eq!(key.decrypt(&stored).expect("decrypt"), "postgres://user:pw@host/db");
    }

    #[test]
    fn test_each_encryption_unique_nonce() {
        let key = symmetric("correct horse");
        let a = key.encrypt("same").expect("encrypt");
        let b = key.encrypt("same").expect("encrypt");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = symmetric("correct horse");
        let stored = key.encrypt("").expect("encrypt");
        assert_eq!(key.decrypt(&stored).expect("decrypt"), "");
    }

    #[test]
    fn test_wrong_passphrase_fails_authentication() {
        let stored = symmetric("one").encrypt("secret").expect("encrypt");
        let err = symmetric("two").decrypt(&stored).expect_err("wrong key");
        assert!(matches!(
            err,
            VaulterError::Decryption(DecryptionError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_salt_is_project_bound() {
        let a = KeyMaterial::symmetric("app-a", "dev", "test", "pw", &fast_kdf()).expect("key");
        let b = KeyMaterial::symmetric("app-b", "dev", "test", "pw", &fast_kdf()).expect("key");
        let stored = a.encrypt("secret").expect("encrypt");
        assert!(b.decrypt(&stored).is_err());
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = symmetric("pw");
        let stored = key.encrypt("secret").expect("encrypt");
        let mut payload = STANDARD
            .decode(&stored["vaulter:v1:aes256gcm:".len()..])
            .expect("base64");
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        let tampered = format!("vaulter:v1:aes256gcm:{}", STANDARD.encode(payload));
        assert!(matches!(
            key.decrypt(&tampered),
            Err(VaulterError::Decryption(DecryptionError::AuthenticationFailed))
        ));
    }

    #[test]
    fn test_unknown_format() {
        let key = symmetric("pw");
        assert!(matches!(
            key.decrypt("plain-value"),
            Err(VaulterError::Decryption(DecryptionError::UnknownFormat))
        ));
        assert!(matches!(
            key.decrypt("vaulter:v1:aes256gcm:!!!"),
            Err(VaulterError::Decryption(DecryptionError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(KeyMaterial::symmetric("app", "dev", "test", "", &fast_kdf()).is_err());
    }

    #[test]
    fn test_asymmetric_roundtrip() {
        let (private, public) = generate_age_keypair();
        let key = KeyMaterial::asymmetric("app", "prd", "test", Some(&public), Some(&private))
            .expect("key");
        let stored = key.encrypt("sk_live_123").expect("encrypt");
        assert!(stored.starts_with("vaulter:v1:age:"));
        assert_eq!(key.decrypt(&stored).expect("decrypt"), "sk_live_123");
    }

    #[test]
    fn test_fingerprint_tracks_key() {
        let a = symmetric("one");
        assert_eq!(a.fingerprint(), symmetric("one").fingerprint());
        assert_ne!(a.fingerprint(), symmetric("two").fingerprint());
        assert_eq!(a.fingerprint().len(), 16);

        let (private, public) = generate_age_keypair();
        let full = KeyMaterial::asymmetric("app", "prd", "test", None, Some(&private)).expect("key");
        let encrypt_only = KeyMaterial::asymmetric("app", "prd", "test", Some(&public), None).expect("key");
        assert_eq!(full.fingerprint(), encrypt_only.fingerprint());
    }

    #[test]
    fn test_public_key_derived_from_private() {
        let (private, public) = generate_age_keypair();
        let key = KeyMaterial::asymmetric("app", "prd", "test", None, Some(&private)).expect("key");
        assert_eq!(key.public_key().as_deref(), Some(public.as_str()));
    }

    #[test]
    fn test_encrypt_only_material_cannot_decrypt() {
        let (private, public) = generate_age_keypair();
        let full = KeyMaterial::asymmetric("app", "prd", "test", None, Some(&private)).expect("key");
        let encrypt_only =
            KeyMaterial::asymmetric("app", "prd", "test", Some(&public), None).expect("key");

        let stored = encrypt_only.encrypt("value").expect("encrypt");
        assert!(!encrypt_only.can_decrypt());
        assert!(matches!(
            encrypt_only.decrypt(&stored),
            Err(VaulterError::Key(KeyError::PrivateKeyMissing { .. }))
        ));
        assert_eq!(full.decrypt(&stored).expect("decrypt"), "value");
    }

    #[test]
    fn test_mode_mismatch() {
        let (private, _) = generate_age_keypair();
        let age_key = KeyMaterial::asymmetric("app", "dev", "test", None, Some(&private)).expect("key");
        let stored = symmetric("pw").encrypt("value").expect("encrypt");
        assert!(matches!(
            age_key.decrypt(&stored),
            Err(VaulterError::Decryption(DecryptionError::ModeMismatch { .. }))
        ));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let key = symmetric("super-secret-passphrase");
        let debug = format!("{key:?}");
        assert!(debug.contains("aes-256-gcm"));
        assert!(!debug.contains("super-secret-passphrase"));
    }

    #[test]
    fn test_envelope_mode() {
        assert_eq!(envelope_mode("vaulter:v1:age:abc"), Some(EncryptionMode::Asymmetric));
        assert_eq!(envelope_mode("vaulter:v1:aes256gcm:abc"), Some(EncryptionMode::Symmetric));
        assert_eq!(envelope_mode("vaulter:v1:ageX:abc"), None);
        assert_eq!(envelope_mode("plain"), None);
    }
}
