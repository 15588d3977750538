// Symmetric encryption for credentials at rest.
//
// Service keys and connection passwords are AES-256-GCM encrypted in the
// core store. The key comes from ENCRYPTION_KEY, or is generated once
// and persisted under the data directory.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use tracing::info;

const NONCE_LEN: usize = 12;
const KEY_FILE: &str = "encryption_key.txt";

/// Holds the process encryption key and performs envelope operations.
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    /// Build from ENCRYPTION_KEY (base64, 32 bytes decoded) when set,
    /// otherwise load or generate a key file under `data_dir`.
    pub fn load_or_generate(data_dir: &Path) -> Result<Self> {
        if let Ok(raw) = std::env::var("ENCRYPTION_KEY") {
            return Self::from_base64(raw.trim());
        }

        let key_path = data_dir.join(KEY_FILE);
        if key_path.exists() {
            let raw = std::fs::read_to_string(&key_path)
                .with_context(|| format!("failed to read {}", key_path.display()))?;
            return Self::from_base64(raw.trim());
        }

        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let encoded = BASE64.encode(key);
        std::fs::write(&key_path, &encoded)
            .with_context(|| format!("failed to persist {}", key_path.display()))?;
        info!("Generated new encryption key at {}", key_path.display());
        Self::from_base64(&encoded)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = BASE64
            .decode(encoded)
            .context("ENCRYPTION_KEY is not valid base64")?;
        if bytes.len() != 32 {
            bail!("encryption key must decode to 32 bytes, got {}", bytes.len());
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    /// Encrypt a secret; output is base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String> {
        let raw = BASE64
            .decode(encoded)
            .context("stored secret is not valid base64")?;
        if raw.len() < NONCE_LEN {
            bail!("stored secret is truncated");
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| anyhow::anyhow!("decryption failed: {e}"))?;
        String::from_utf8(plaintext).context("decrypted secret is not UTF-8")
    }

    /// Encrypt an optional secret, passing None through.
    pub fn encrypt_opt(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|p| self.encrypt(p)).transpose()
    }

    /// Decrypt an optional stored secret, passing None through.
    pub fn decrypt_opt(&self, encoded: Option<&str>) -> Result<Option<String>> {
        encoded.map(|e| self.decrypt(e)).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trip() {
        let dir = TempDir::new().unwrap();
        let secrets = SecretBox::load_or_generate(dir.path()).unwrap();
        let ct = secrets.encrypt("service-role-key").unwrap();
        assert_ne!(ct, "service-role-key");
        assert_eq!(secrets.decrypt(&ct).unwrap(), "service-role-key");
    }

    #[test]
    fn key_file_is_reused_across_instances() {
        let dir = TempDir::new().unwrap();
        let a = SecretBox::load_or_generate(dir.path()).unwrap();
        let ct = a.encrypt("hello").unwrap();
        let b = SecretBox::load_or_generate(dir.path()).unwrap();
        assert_eq!(b.decrypt(&ct).unwrap(), "hello");
    }

    #[test]
    fn nonces_differ_between_calls() {
        let dir = TempDir::new().unwrap();
        let secrets = SecretBox::load_or_generate(dir.path()).unwrap();
        let a = secrets.encrypt("x").unwrap();
        let b = secrets.encrypt("x").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_short_keys() {
        assert!(SecretBox::from_base64(&BASE64.encode([0u8; 16])).is_err());
    }
}
