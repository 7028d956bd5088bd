//! Symmetric encryption for secret variables.
//!
//! Keys are derived from a passphrase with PBKDF2-HMAC-SHA256 and a
//! per-variable salt, so equal plaintexts never produce equal ciphertexts.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;
use sha2::Sha256;

use crate::error::VariablesError;

pub const DEFAULT_KDF_ITERATIONS: u32 = 100_000;
const NONCE_LEN: usize = 12;
const SALT_LEN: usize = 16;

pub trait Encryption: Send + Sync {
  /// Recorded in `encryption_method` of every variable this encrypts.
  fn name(&self) -> &'static str;

  fn encrypt(&self, plaintext: &str, salt: &str) -> Result<String, VariablesError>;

  fn decrypt(&self, ciphertext: &str, salt: &str) -> Result<String, VariablesError>;
}

/// Random base64 salt for a new secret.
pub fn generate_salt() -> String {
  let mut salt = [0u8; SALT_LEN];
  rand::thread_rng().fill_bytes(&mut salt);
  STANDARD.encode(salt)
}

fn derive_key(passphrase: &str, salt: &str, iterations: u32) -> [u8; 32] {
  let mut key = [0u8; 32];
  pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt.as_bytes(), iterations, &mut key);
  key
}

fn decode(ciphertext: &str) -> Result<Vec<u8>, VariablesError> {
  STANDARD
    .decode(ciphertext)
    .map_err(|e| VariablesError::Decryption {
      key: String::new(),
      message: format!("invalid base64: {e}"),
    })
}

/// Authenticated encryption: AES-256-GCM, output is `base64(nonce || ciphertext)`.
pub struct AesGcmEncryption {
  passphrase: String,
  iterations: u32,
}

impl AesGcmEncryption {
  pub const NAME: &'static str = "aes-256-gcm";

  pub fn new(passphrase: impl Into<String>) -> Self {
    Self::with_iterations(passphrase, DEFAULT_KDF_ITERATIONS)
  }

  pub fn with_iterations(passphrase: impl Into<String>, iterations: u32) -> Self {
    Self {
      passphrase: passphrase.into(),
      iterations,
    }
  }

  fn cipher(&self, salt: &str) -> Aes256Gcm {
    let key = derive_key(&self.passphrase, salt, self.iterations);
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
  }
}

impl Encryption for AesGcmEncryption {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn encrypt(&self, plaintext: &str, salt: &str) -> Result<String, VariablesError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let sealed = self
      .cipher(salt)
      .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
      .map_err(|e| VariablesError::Encryption {
        message: e.to_string(),
      })?;
    let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(STANDARD.encode(out))
  }

  fn decrypt(&self, ciphertext: &str, salt: &str) -> Result<String, VariablesError> {
    let raw = decode(ciphertext)?;
    if raw.len() < NONCE_LEN {
      return Err(VariablesError::Decryption {
        key: String::new(),
        message: "ciphertext too short".to_string(),
      });
    }
    let (nonce, sealed) = raw.split_at(NONCE_LEN);
    let plain = self
      .cipher(salt)
      .decrypt(Nonce::from_slice(nonce), sealed)
      .map_err(|_| VariablesError::Decryption {
        key: String::new(),
        message: "authentication failed".to_string(),
      })?;
    String::from_utf8(plain).map_err(|e| VariablesError::Decryption {
      key: String::new(),
      message: e.to_string(),
    })
  }
}

/// XOR with a PBKDF2-derived keystream. Unauthenticated; a wrong key shows up
/// as garbage that fails to decode further up.
pub struct SimpleEncryption {
  passphrase: String,
  iterations: u32,
}

impl SimpleEncryption {
  pub const NAME: &'static str = "simple-xor";

  pub fn new(passphrase: impl Into<String>) -> Self {
    Self {
      passphrase: passphrase.into(),
      iterations: DEFAULT_KDF_ITERATIONS,
    }
  }

  pub fn with_iterations(mut self, iterations: u32) -> Self {
    self.iterations = iterations;
    self
  }

  fn xor(&self, data: &[u8], salt: &str) -> Vec<u8> {
    let key = derive_key(&self.passphrase, salt, self.iterations);
    data
      .iter()
      .zip(key.iter().cycle())
      .map(|(b, k)| b ^ k)
      .collect()
  }
}

impl Encryption for SimpleEncryption {
  fn name(&self) -> &'static str {
    Self::NAME
  }

  fn encrypt(&self, plaintext: &str, salt: &str) -> Result<String, VariablesError> {
    Ok(STANDARD.encode(self.xor(plaintext.as_bytes(), salt)))
  }

  fn decrypt(&self, ciphertext: &str, salt: &str) -> Result<String, VariablesError> {
    let plain = self.xor(&decode(ciphertext)?, salt);
    String::from_utf8(plain).map_err(|e| VariablesError::Decryption {
      key: String::new(),
      message: e.to_string(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_aes_gcm_round_trip() {
    let enc = AesGcmEncryption::with_iterations("passphrase", 1_000);
    let salt = generate_salt();
    let sealed = enc.encrypt("sk-secret", &salt).unwrap();
    assert_ne!(sealed, "sk-secret");
    assert_eq!(enc.decrypt(&sealed, &salt).unwrap(), "sk-secret");
  }

  #[test]
  fn test_aes_gcm_nonce_varies() {
    let enc = AesGcmEncryption::with_iterations("passphrase", 1_000);
    let salt = generate_salt();
    assert_ne!(enc.encrypt("x", &salt).unwrap(), enc.encrypt("x", &salt).unwrap());
  }

  #[test]
  fn test_aes_gcm_wrong_key_fails() {
    let salt = generate_salt();
    let sealed = AesGcmEncryption::with_iterations("right", 1_000)
      .encrypt("secret", &salt)
      .unwrap();
    let err = AesGcmEncryption::with_iterations("wrong", 1_000)
      .decrypt(&sealed, &salt)
      .unwrap_err();
    assert!(matches!(err, VariablesError::Decryption { .. }));
  }

  #[test]
  fn test_simple_round_trip() {
    let enc = SimpleEncryption::new("passphrase").with_iterations(1_000);
    let salt = generate_salt();
    let sealed = enc.encrypt("hello world", &salt).unwrap();
    assert_eq!(enc.decrypt(&sealed, &salt).unwrap(), "hello world");
  }

  #[test]
  fn test_salts_are_random() {
    assert_ne!(generate_salt(), generate_salt());
  }
}
