//! Relayer secrets: EVM wallets, the listen valid-signer key and fee payers.
//!
//! Read from `RELAYER_KEYS_JSON` when set, otherwise from a key file that is
//! AES-256-GCM encrypted in production and plaintext in dev.

use std::path::PathBuf;
use tracing::info;

/// One custodial wallet as configured: address plus hex private key.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WalletSecret {
    #[serde(alias = "publicKey")]
    pub public_key: String,
    #[serde(alias = "privateKey")]
    pub private_key: String,
}

/// Everything the relayer signs with.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RelayerSecrets {
    /// Data chain relayer wallets.
    #[serde(default)]
    pub wallets: Vec<WalletSecret>,
    /// ETH mainnet relayer wallets (wormhole transfers).
    #[serde(default)]
    pub eth_wallets: Vec<WalletSecret>,
    /// Hex secp256k1 key registered as the listen program's valid signer.
    #[serde(default)]
    pub listen_signer_key: Option<String>,
    /// 64-byte keypairs (secret || public) paying listen fees.
    #[serde(default)]
    pub fee_payers: Vec<Vec<u8>>,
}

impl RelayerSecrets {
    pub fn from_json(json: &str) -> Result<Self, crate::Error> {
        serde_json::from_str(json)
            .map_err(|e| crate::Error::Config(format!("Invalid keys JSON: {e}")))
    }
}

/// Key store: encrypted (AES-256-GCM) for production, plaintext for dev.
pub struct KeyStore {
    path: PathBuf,
    encryption_key: Option<[u8; 32]>,
}

impl KeyStore {
    pub fn new_plaintext(path: PathBuf) -> Self {
        Self {
            path,
            encryption_key: None,
        }
    }

    pub fn new_encrypted(path: PathBuf, key_b64: &str) -> Result<Self, crate::Error> {
        let key_bytes = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, key_b64)
            .map_err(|e| crate::Error::Config(format!("Invalid encryption key base64: {e}")))?;

        if key_bytes.len() != 32 {
            return Err(crate::Error::Config(format!(
                "Encryption key must be 32 bytes, got {}",
                key_bytes.len()
            )));
        }

        let mut key = [0u8; 32];
        key.copy_from_slice(&key_bytes);

        Ok(Self {
            path,
            encryption_key: Some(key),
        })
    }

    /// Store for the configured path, encrypted when a key is configured.
    pub fn from_config(config: &crate::Config) -> Result<Self, crate::Error> {
        let path = PathBuf::from(&config.keys_path);
        match config.keys_encryption_key.as_deref() {
            Some(key) if !key.is_empty() => Self::new_encrypted(path, key),
            _ => Ok(Self::new_plaintext(path)),
        }
    }

    pub fn save(&self, secrets: &RelayerSecrets) -> Result<(), crate::Error> {
        let json = serde_json::to_string_pretty(secrets)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize keys: {e}")))?;

        let data = if let Some(key) = &self.encryption_key {
            encrypt_aes256gcm(key, json.as_bytes())?
        } else {
            json.into_bytes()
        };

        // tmp + rename
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = tmp.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::Error::Config(format!("Failed to create key store directory: {e}"))
            })?;
        }
        std::fs::write(&tmp, &data)
            .map_err(|e| crate::Error::Config(format!("Failed to write key store: {e}")))?;
        std::fs::rename(&tmp, &self.path)
            .map_err(|e| crate::Error::Config(format!("Failed to rename key store: {e}")))?;

        info!(path = %self.path.display(), wallets = secrets.wallets.len(), "Key store saved");
        Ok(())
    }

    pub fn load(&self) -> Result<RelayerSecrets, crate::Error> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "No key store found, no relayer wallets loaded");
            return Ok(RelayerSecrets::default());
        }

        let data = std::fs::read(&self.path)
            .map_err(|e| crate::Error::Config(format!("Failed to read key store: {e}")))?;

        let json_bytes = if let Some(key) = &self.encryption_key {
            decrypt_aes256gcm(key, &data)?
        } else {
            data
        };

        let secrets: RelayerSecrets = serde_json::from_slice(&json_bytes)
            .map_err(|e| crate::Error::Config(format!("Failed to parse key store: {e}")))?;

        info!(
            path = %self.path.display(),
            wallets = secrets.wallets.len(),
            eth_wallets = secrets.eth_wallets.len(),
            fee_payers = secrets.fee_payers.len(),
            "Key store loaded"
        );
        Ok(secrets)
    }
}

/// `RELAYER_KEYS_JSON` wins over the key file.
pub fn load_secrets(config: &crate::Config) -> Result<RelayerSecrets, crate::Error> {
    if let Ok(json) = std::env::var("RELAYER_KEYS_JSON") {
        info!("Loading relayer keys from RELAYER_KEYS_JSON");
        return RelayerSecrets::from_json(&json);
    }
    KeyStore::from_config(config)?.load()
}

/// Encrypt a plaintext key file in place with the configured key.
/// Returns the number of data chain wallets sealed.
pub fn seal_key_file(config: &crate::Config) -> Result<usize, crate::Error> {
    let key = config
        .keys_encryption_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| crate::Error::Config("keys_encryption_key is not set".into()))?;
    let path = PathBuf::from(&config.keys_path);
    if !path.exists() {
        return Err(crate::Error::Config(format!(
            "No key file at {}",
            path.display()
        )));
    }
    let secrets = KeyStore::new_plaintext(path.clone()).load()?;
    KeyStore::new_encrypted(path, key)?.save(&secrets)?;
    Ok(secrets.wallets.len())
}

fn encrypt_aes256gcm(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>, crate::Error> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};
    use rand::RngCore;

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| crate::Error::Config(format!("AES init failed: {e}")))?;

    let mut nonce_bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| crate::Error::Config(format!("Encryption failed: {e}")))?;

    // nonce || ciphertext
    let mut result = Vec::with_capacity(12 + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

fn decrypt_aes256gcm(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>, crate::Error> {
    use aes_gcm::aead::{Aead, KeyInit};
    use aes_gcm::{Aes256Gcm, Nonce};

    if data.len() < 12 {
        return Err(crate::Error::Config(
            "Encrypted data too short (missing nonce)".into(),
        ));
    }

    let (nonce_bytes, ciphertext) = data.split_at(12);
    let nonce = Nonce::from_slice(nonce_bytes);

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| crate::Error::Config(format!("AES init failed: {e}")))?;

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| crate::Error::Config(format!("Decryption failed (wrong key?): {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RelayerSecrets {
        RelayerSecrets {
            wallets: vec![WalletSecret {
                public_key: "0x1111111111111111111111111111111111111111".into(),
                private_key: "aa".repeat(32),
            }],
            eth_wallets: vec![],
            listen_signer_key: Some("bb".repeat(32)),
            fee_payers: vec![vec![7u8; 64]],
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let key1 = [42u8; 32];
        let key2 = [99u8; 32];
        let encrypted = encrypt_aes256gcm(&key1, b"secret data").unwrap();
        assert!(decrypt_aes256gcm(&key2, &encrypted).is_err());
        assert!(decrypt_aes256gcm(&key1, &encrypted[..8]).is_err());
    }

    #[test]
    fn test_encrypted_store_reloads_secrets() {
        let path = std::env::temp_dir().join(format!("relayer_keys_{}.bin", rand::random::<u64>()));
        let key_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [3u8; 32]);
        let store = KeyStore::new_encrypted(path.clone(), &key_b64).unwrap();
        store.save(&sample()).unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert!(serde_json::from_slice::<serde_json::Value>(&raw).is_err());

        let loaded = store.load().unwrap();
        assert_eq!(loaded.wallets.len(), 1);
        assert_eq!(loaded.fee_payers[0].len(), 64);
        assert_eq!(loaded.listen_signer_key, sample().listen_signer_key);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_seal_plaintext_key_file() {
        let path = std::env::temp_dir().join(format!("relayer_keys_{}.json", rand::random::<u64>()));
        KeyStore::new_plaintext(path.clone()).save(&sample()).unwrap();
        let key_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [5u8; 32]);
        let mut config = crate::Config::default();
        config.keys_path = path.display().to_string();

        assert!(seal_key_file(&config).is_err());
        config.keys_encryption_key = Some(key_b64.clone());
        assert_eq!(seal_key_file(&config).unwrap(), 1);

        assert!(KeyStore::new_plaintext(path.clone()).load().is_err());
        let loaded = KeyStore::new_encrypted(path.clone(), &key_b64).unwrap().load().unwrap();
        assert_eq!(loaded.wallets[0].private_key, "aa".repeat(32));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let store = KeyStore::new_plaintext(std::env::temp_dir().join("relayer_keys_absent.json"));
        assert!(store.load().unwrap().wallets.is_empty());
    }

    #[test]
    fn test_bad_encryption_key_length() {
        let short = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, [1u8; 16]);
        assert!(KeyStore::new_encrypted(PathBuf::from("x"), &short).is_err());
    }

    #[test]
    fn test_camel_case_wallets() {
        let secrets = RelayerSecrets::from_json(
            r#"{"wallets":[{"publicKey":"0xabc","privateKey":"00"}]}"#,
        )
        .unwrap();
        assert_eq!(secrets.wallets[0].public_key, "0xabc");
        assert!(secrets.listen_signer_key.is_none());
    }
}
