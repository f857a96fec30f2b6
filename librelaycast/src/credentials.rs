//! Destination credential resolution
//!
//! Campaigns and routes store their destination credential sealed. The
//! engine only ever asks a [`CredentialResolver`] to open it right before a
//! send, and keeps the result in a [`SecretString`] so it is zeroed on drop.
//!
//! # Sealed format
//!
//! `v1:` followed by base64 of `salt (16) || nonce (12) || ciphertext+tag`.
//! The AES-256-GCM key is `SHA-256(master key || salt)`, so each sealed value
//! uses its own key.
//!
//! ```no_run
//! use librelaycast::credentials::{CredentialResolver, SealedSecretResolver};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let resolver = SealedSecretResolver::from_env("RELAYCAST_SECRET_KEY")?;
//! let sealed = resolver.seal("bot-api-key")?;
//! let token = resolver.decrypt(&sealed).await?;
//! # Ok(())
//! # }
//! ```

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::Aes256Gcm;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::CredentialError;

const SEALED_PREFIX: &str = "v1:";
const SALT_BYTES: usize = 16;
const NONCE_BYTES: usize = 12;
const MIN_MASTER_KEY_LEN: usize = 16;

/// Opens sealed per-owner secrets into usable destination tokens
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Decrypt `sealed` into the token expected by the destination sender
    ///
    /// # Errors
    ///
    /// Returns `CredentialError::Decryption` when the value is malformed or
    /// was sealed under a different master key.
    async fn decrypt(&self, sealed: &str) -> Result<SecretString, CredentialError>;
}

/// AES-256-GCM resolver keyed by a process-wide master secret
pub struct SealedSecretResolver {
    master: SecretString,
}

impl std::fmt::Debug for SealedSecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedSecretResolver")
            .field("master", &"[REDACTED]")
            .finish()
    }
}

impl SealedSecretResolver {
    pub fn new(master: SecretString) -> Result<Self, CredentialError> {
        if master.expose_secret().trim().len() < MIN_MASTER_KEY_LEN {
            return Err(CredentialError::MissingKey(format!(
                "master key must be at least {} characters",
                MIN_MASTER_KEY_LEN
            )));
        }
        Ok(Self { master })
    }

    /// Read the master key from the environment variable `var`
    pub fn from_env(var: &str) -> Result<Self, CredentialError> {
        let value = std::env::var(var)
            .map_err(|_| CredentialError::MissingKey(format!("{} is not set", var)))?;
        Self::new(SecretString::from(value))
    }

    /// Seal a plaintext credential for storage
    pub fn seal(&self, plaintext: &str) -> Result<String, CredentialError> {
        if plaintext.trim().is_empty() {
            return Err(CredentialError::Encryption(
                "credential must not be empty".to_string(),
            ));
        }

        let mut salt = [0u8; SALT_BYTES];
        let mut nonce = [0u8; NONCE_BYTES];
        let mut rng = rand::thread_rng();
        rng.fill_bytes(&mut salt);
        rng.fill_bytes(&mut nonce);

        let key = derive_key(&self.master, &salt);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|_| CredentialError::Encryption("invalid key length".to_string()))?;
        let ciphertext = cipher
            .encrypt((&nonce).into(), plaintext.as_bytes())
            .map_err(|_| CredentialError::Encryption("cipher failure".to_string()))?;

        let mut payload = Vec::with_capacity(SALT_BYTES + NONCE_BYTES + ciphertext.len());
        payload.extend_from_slice(&salt);
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);

        Ok(format!("{}{}", SEALED_PREFIX, BASE64_STANDARD.encode(payload)))
    }

    fn open(&self, sealed: &str) -> Result<SecretString, CredentialError> {
        let encoded = sealed
            .trim()
            .strip_prefix(SEALED_PREFIX)
            .ok_or_else(|| CredentialError::Decryption("unsupported credential format".to_string()))?;
        let raw = BASE64_STANDARD
            .decode(encoded)
            .map_err(|_| CredentialError::Decryption("credential encoding is invalid".to_string()))?;
        if raw.len() <= SALT_BYTES + NONCE_BYTES {
            return Err(CredentialError::Decryption("credential is truncated".to_string()));
        }

        let (salt, rest) = raw.split_at(SALT_BYTES);
        let (nonce, ciphertext) = rest.split_at(NONCE_BYTES);

        let key = derive_key(&self.master, salt);
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|_| CredentialError::Decryption("invalid key length".to_string()))?;
        let plaintext = Zeroizing::new(
            cipher
                .decrypt(nonce.into(), ciphertext)
                .map_err(|_| CredentialError::Decryption("integrity check failed".to_string()))?,
        );

        let token = std::str::from_utf8(&plaintext)
            .map_err(|_| CredentialError::Decryption("credential is not valid UTF-8".to_string()))?;
        Ok(SecretString::from(token.to_string()))
    }
}

#[async_trait]
impl CredentialResolver for SealedSecretResolver {
    async fn decrypt(&self, sealed: &str) -> Result<SecretString, CredentialError> {
        self.open(sealed)
    }
}

fn derive_key(master: &SecretString, salt: &[u8]) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(master.expose_secret().as_bytes());
    hasher.update(salt);
    let digest = hasher.finalize();

    let mut key = Zeroizing::new([0u8; 32]);
    key.copy_from_slice(&digest);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn resolver() -> SealedSecretResolver {
        SealedSecretResolver::new(SecretString::from("unit-test-master-key".to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_seal_then_decrypt() {
        let resolver = resolver();
        let sealed = resolver.seal("bot-api-key-123").unwrap();

        assert!(sealed.starts_with(SEALED_PREFIX));
        assert!(!sealed.contains("bot-api-key-123"));

        let token = resolver.decrypt(&sealed).await.unwrap();
        assert_eq!(token.expose_secret(), "bot-api-key-123");
    }

    #[test]
    fn test_sealing_is_salted() {
        let resolver = resolver();
        let first = resolver.seal("same").unwrap();
        let second = resolver.seal("same").unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_wrong_master_key_fails() {
        let sealed = resolver().seal("token").unwrap();
        let other =
            SealedSecretResolver::new(SecretString::from("a-different-master-key".to_string()))
                .unwrap();

        let result = other.decrypt(&sealed).await;
        assert!(matches!(result, Err(CredentialError::Decryption(_))));
    }

    #[tokio::test]
    async fn test_malformed_values_fail() {
        let resolver = resolver();
        for value in ["plaintext-token", "v1:***", "v1:AAAA", ""] {
            let result = resolver.decrypt(value).await;
            assert!(
                matches!(result, Err(CredentialError::Decryption(_))),
                "expected decryption error for {:?}",
                value
            );
        }
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails() {
        let resolver = resolver();
        let sealed = resolver.seal("token").unwrap();
        let mut raw = BASE64_STANDARD
            .decode(sealed.strip_prefix(SEALED_PREFIX).unwrap())
            .unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let tampered = format!("{}{}", SEALED_PREFIX, BASE64_STANDARD.encode(raw));

        assert!(resolver.decrypt(&tampered).await.is_err());
    }

    #[test]
    fn test_short_master_key_rejected() {
        let result = SealedSecretResolver::new(SecretString::from("short".to_string()));
        assert!(matches!(result, Err(CredentialError::MissingKey(_))));
    }

    #[test]
    fn test_empty_plaintext_rejected() {
        assert!(matches!(
            resolver().seal("  "),
            Err(CredentialError::Encryption(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        std::env::remove_var("RELAYCAST_TEST_MASTER_KEY");
        assert!(matches!(
            SealedSecretResolver::from_env("RELAYCAST_TEST_MASTER_KEY"),
            Err(CredentialError::MissingKey(_))
        ));

        std::env::set_var("RELAYCAST_TEST_MASTER_KEY", "env-provided-master-key");
        let resolver = SealedSecretResolver::from_env("RELAYCAST_TEST_MASTER_KEY");
        std::env::remove_var("RELAYCAST_TEST_MASTER_KEY");
        assert!(resolver.is_ok());
    }

    #[test]
    fn test_debug_redacts_master_key() {
        let debug = format!("{:?}", resolver());
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("unit-test-master-key"));
    }
}
