//! Credential vault - gateway credentials encrypted at rest
//!
//! AES-256-GCM with a key derived as SHA-256 of the operator secret. Output
//! format is `base64(iv):base64(tag):base64(ciphertext)`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::result::{Error, Result};

/// Shortest secret accepted from the operator
pub const MIN_SECRET_LEN: usize = 16;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Encrypts and decrypts credential objects
///
/// Holds only the derived cipher, never the secret itself.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// Build a vault from the operator secret
    pub fn new(secret: &str) -> Result<Self> {
        if secret.chars().count() < MIN_SECRET_LEN {
            return Err(Error::configuration(format!(
                "credentials secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        let key = Sha256::digest(secret.as_bytes());
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::Crypto(format!("invalid key length: {}", e)))?;
        Ok(Self { cipher })
    }

    /// Build a vault from an optional secret, as read from the environment
    pub fn from_secret(secret: Option<&str>) -> Result<Self> {
        match secret {
            Some(secret) => Self::new(secret),
            None => Err(Error::configuration(format!(
                "no credentials secret configured (set {})",
                crate::config::CREDENTIALS_SECRET_ENV
            ))),
        }
    }

    /// Serialize `value` to JSON and seal it
    pub fn encrypt<T: Serialize>(&self, value: &T) -> Result<String> {
        let plaintext = serde_json::to_vec(value)?;

        let nonce_bytes: [u8; NONCE_LEN] = rand::thread_rng().gen();
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext
        let mut sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|_| Error::Crypto("encryption failed".to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}:{}:{}",
            STANDARD.encode(nonce_bytes),
            STANDARD.encode(tag),
            STANDARD.encode(sealed)
        ))
    }

    /// Verify and open a sealed value
    ///
    /// Any tampering, truncation or wrong key fails without yielding data.
    pub fn decrypt<T: DeserializeOwned>(&self, sealed: &str) -> Result<T> {
        let mut parts = sealed.trim().split(':');
        let (Some(iv), Some(tag), Some(ciphertext), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(Error::Crypto(
                "sealed credentials must have three ':'-separated parts".to_string(),
            ));
        };

        let iv = decode_part("iv", iv)?;
        let tag = decode_part("tag", tag)?;
        let mut combined = decode_part("ciphertext", ciphertext)?;

        if iv.len() != NONCE_LEN {
            return Err(Error::Crypto(format!("iv must be {} bytes", NONCE_LEN)));
        }
        if tag.len() != TAG_LEN {
            return Err(Error::Crypto(format!("tag must be {} bytes", TAG_LEN)));
        }
        combined.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&iv), combined.as_ref())
            .map_err(|_| Error::Crypto("credentials failed authentication".to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

fn decode_part(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::Crypto(format!("{} is not valid base64: {}", name, e)))
}
