//! Manager-password storage
//!
//! The venue password is kept two ways: a salted PBKDF2 hash used to verify
//! operator input, and an AES-256-GCM ciphertext that is decrypted only at
//! connect time.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{GatewayError, Result};

const HASH_ALGORITHM: &str = "pbkdf2_sha256";
const SALT_LEN: usize = 22;
const NONCE_LEN: usize = 12;

/// String that is wiped from memory on drop and never printed
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString(***)")
    }
}

impl<'de> serde::Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value)
    }
}

fn derive(secret: &str, salt: &str, iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt.as_bytes(), iterations, &mut out);
    out
}

/// Hash a secret as `pbkdf2_sha256$<iterations>$<salt>$<base64 hash>`
pub fn hash_secret(secret: &SecretString, iterations: u32) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();
    let hash = derive(secret.expose(), &salt, iterations);
    format!(
        "{}${}${}${}",
        HASH_ALGORITHM,
        iterations,
        salt,
        BASE64.encode(hash)
    )
}

/// Check a secret against an encoded hash
pub fn verify_secret(secret: &SecretString, encoded: &str) -> Result<bool> {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [algorithm, iterations, salt, expected] = parts.as_slice() else {
        return Err(GatewayError::Crypto("malformed secret hash".to_string()));
    };
    if *algorithm != HASH_ALGORITHM {
        return Err(GatewayError::Crypto(format!(
            "unsupported hash algorithm: {algorithm}"
        )));
    }
    let iterations: u32 = iterations
        .parse()
        .map_err(|_| GatewayError::Crypto("invalid iteration count".to_string()))?;
    let expected = BASE64
        .decode(expected)
        .map_err(|e| GatewayError::Crypto(format!("invalid hash encoding: {e}")))?;

    let actual = derive(secret.expose(), salt, iterations);
    Ok(constant_time_eq(&actual, &expected))
}

/// Length-independent comparison of two byte strings
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let a = Sha256::digest(a);
    let b = Sha256::digest(b);
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Reversible encryption for the copy handed to the venue
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(GatewayError::Crypto(format!(
                "master key must be 32 bytes, got {}",
                key.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Build from a base64 master key stored in `env_var`
    pub fn from_env(env_var: &str) -> Result<Self> {
        let mut raw = std::env::var(env_var)
            .map_err(|_| GatewayError::Config(config::ConfigError::NotFound(env_var.to_string())))?;
        let decoded = BASE64
            .decode(raw.trim())
            .map_err(|e| GatewayError::Crypto(format!("master key is not base64: {e}")));
        raw.zeroize();
        let mut key = decoded?;
        let cipher = Self::new(&key);
        key.zeroize();
        cipher
    }

    /// Fresh random key, base64 encoded (used by `tradegate gen-key`)
    pub fn generate_key() -> String {
        let key: [u8; 32] = rand::random();
        BASE64.encode(key)
    }

    pub fn encrypt(&self, secret: &SecretString) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, secret.expose().as_bytes())
            .map_err(|_| GatewayError::Crypto("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    pub fn decrypt(&self, blob: &str) -> Result<SecretString> {
        let raw = BASE64
            .decode(blob.trim())
            .map_err(|e| GatewayError::Crypto(format!("ciphertext is not base64: {e}")))?;
        if raw.len() <= NONCE_LEN {
            return Err(GatewayError::Crypto("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let mut plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| GatewayError::Crypto("decryption failed (wrong master key?)".to_string()))?;
        let secret = String::from_utf8(plain.clone())
            .map_err(|_| GatewayError::Crypto("decrypted secret is not UTF-8".to_string()));
        plain.zeroize();
        secret.map(SecretString::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip_and_format() {
        let secret = SecretString::new("Manager#2024");
        let encoded = hash_secret(&secret, 1_000);

        let parts: Vec<&str> = encoded.split('$').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "pbkdf2_sha256");
        assert_eq!(parts[1], "1000");

        assert!(verify_secret(&secret, &encoded).unwrap());
        assert!(!verify_secret(&SecretString::new("wrong"), &encoded).unwrap());
    }

    #[test]
    fn verify_rejects_malformed_hash() {
        let secret = SecretString::new("x");
        assert!(verify_secret(&secret, "md5$abc").is_err());
        assert!(verify_secret(&secret, "sha1$1$salt$hash").is_err());
    }

    #[test]
    fn cipher_decrypts_what_it_encrypts() {
        let key: [u8; 32] = [7; 32];
        let cipher = SecretCipher::new(&key).unwrap();
        let blob = cipher.encrypt(&SecretString::new("venue-pass")).unwrap();
        assert_ne!(blob, "venue-pass");
        assert_eq!(cipher.decrypt(&blob).unwrap().expose(), "venue-pass");

        let other = SecretCipher::new(&[8; 32]).unwrap();
        assert!(other.decrypt(&blob).is_err());
    }

    #[test]
    fn cipher_rejects_short_keys() {
        assert!(SecretCipher::new(&[1; 16]).is_err());
    }

    #[test]
    fn debug_never_prints_secret() {
        let secret = SecretString::new("hunter2");
        assert_eq!(format!("{secret:?}"), "SecretString(***)");
    }
}
