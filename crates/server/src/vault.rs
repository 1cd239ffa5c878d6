// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Encrypted store for remote-shell credentials.
//!
//! Secrets are AES-256-GCM encrypted under a key derived from the master
//! password with scrypt and a fixed deployment salt. Records are kept in a
//! JSON file, written atomically; ciphertext fields use the
//! `iv:authTag:ciphertext` format, all hex. Plaintext secrets exist only in
//! memory between decrypt and use.

use std::collections::HashMap;
use std::path::PathBuf;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, GatewayError};
use crate::id::{self, IdKind};

/// Fixed deployment salt for scrypt key derivation.
const KDF_SALT: &[u8] = b"quay-vault-salt-v1";

/// A stored credential. Secret fields are ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialRecord {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_private_key: Option<String>,
}

/// A record with its secrets decrypted, handed out for immediate use.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
    pub password: Option<String>,
    pub private_key: Option<String>,
}

/// Redacted listing entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialSummary {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VaultFile {
    credentials: Vec<CredentialRecord>,
}

pub struct CredentialVault {
    path: PathBuf,
    key: Mutex<Option<[u8; 32]>>,
    records: RwLock<HashMap<String, CredentialRecord>>,
}

impl CredentialVault {
    pub fn new(path: PathBuf) -> Self {
        Self { path, key: Mutex::new(None), records: RwLock::new(HashMap::new()) }
    }

    /// Derive the vault key from the master password and load any existing
    /// records from disk.
    pub fn initialize(&self, master_password: &str) -> anyhow::Result<()> {
        let params = scrypt::Params::new(15, 8, 1, 32)
            .map_err(|e| anyhow::anyhow!("scrypt params: {e}"))?;
        let mut key = [0u8; 32];
        scrypt::scrypt(master_password.as_bytes(), KDF_SALT, &params, &mut key)
            .map_err(|e| anyhow::anyhow!("key derivation failed: {e}"))?;
        *self.key.lock() = Some(key);

        if self.path.exists() {
            let text = std::fs::read_to_string(&self.path)?;
            let file: VaultFile = serde_json::from_str(&text)?;
            let mut records = self.records.write();
            for record in file.credentials {
                records.insert(record.id.clone(), record);
            }
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.key.lock().is_some()
    }

    fn require_key(&self) -> Result<[u8; 32], GatewayError> {
        self.key.lock().as_ref().copied().ok_or_else(|| {
            GatewayError::new(ErrorCode::SshAuthFailed, "vault not initialized")
        })
    }

    /// Encrypt secrets and store a new record. Returns its id.
    pub fn store(
        &self,
        name: &str,
        host: &str,
        port: u16,
        username: &str,
        auth_method: &str,
        password: Option<&str>,
        private_key: Option<&str>,
    ) -> Result<String, GatewayError> {
        let key = self.require_key()?;
        let record = CredentialRecord {
            id: id::generate(IdKind::Ssh),
            name: name.to_owned(),
            host: host.to_owned(),
            port,
            username: username.to_owned(),
            auth_method: auth_method.to_owned(),
            encrypted_password: password.map(|p| encrypt(&key, p)).transpose()?,
            encrypted_private_key: private_key.map(|k| encrypt(&key, k)).transpose()?,
        };
        let credential_id = record.id.clone();
        self.records.write().insert(credential_id.clone(), record);
        self.save()?;
        Ok(credential_id)
    }

    /// Fetch and decrypt a record.
    pub fn get(&self, credential_id: &str) -> Result<DecryptedCredential, GatewayError> {
        let key = self.require_key()?;
        let records = self.records.read();
        let record = records.get(credential_id).ok_or_else(|| {
            GatewayError::new(ErrorCode::SshAuthFailed, "unknown credential")
        })?;
        Ok(DecryptedCredential {
            id: record.id.clone(),
            name: record.name.clone(),
            host: record.host.clone(),
            port: record.port,
            username: record.username.clone(),
            auth_method: record.auth_method.clone(),
            password: record
                .encrypted_password
                .as_deref()
                .map(|c| decrypt(&key, c))
                .transpose()?,
            private_key: record
                .encrypted_private_key
                .as_deref()
                .map(|c| decrypt(&key, c))
                .transpose()?,
        })
    }

    /// Redacted listing.
    pub fn list(&self) -> Vec<CredentialSummary> {
        self.records
            .read()
            .values()
            .map(|r| CredentialSummary {
                id: r.id.clone(),
                name: r.name.clone(),
                host: r.host.clone(),
                port: r.port,
                username: r.username.clone(),
                auth_method: r.auth_method.clone(),
            })
            .collect()
    }

    pub fn delete(&self, credential_id: &str) -> Result<bool, GatewayError> {
        let removed = self.records.write().remove(credential_id).is_some();
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Write the vault file atomically (temp file + rename).
    fn save(&self) -> Result<(), GatewayError> {
        let file = VaultFile {
            credentials: self.records.read().values().cloned().collect(),
        };
        let text = serde_json::to_string_pretty(&file)
            .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, text)
            .and_then(|()| std::fs::rename(&tmp, &self.path))
            .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))
    }
}

/// AES-256-GCM encrypt, producing `iv:authTag:ciphertext` in hex.
fn encrypt(key: &[u8; 32], plaintext: &str) -> Result<String, GatewayError> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
    let mut iv = [0u8; 12];
    rand::rng().fill_bytes(&mut iv);
    let nonce = Nonce::from_slice(&iv);

    // The aead crate appends the 16-byte tag to the ciphertext.
    let sealed = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
    let (ciphertext, tag) = sealed.split_at(sealed.len() - 16);

    Ok(format!("{}:{}:{}", hex::encode(iv), hex::encode(tag), hex::encode(ciphertext)))
}

/// Reverse of [`encrypt`].
fn decrypt(key: &[u8; 32], encoded: &str) -> Result<String, GatewayError> {
    let parts: Vec<&str> = encoded.split(':').collect();
    if parts.len() != 3 {
        return Err(GatewayError::new(ErrorCode::Internal, "malformed ciphertext"));
    }
    let iv = hex::decode(parts[0])
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
    let tag = hex::decode(parts[1])
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
    let ciphertext = hex::decode(parts[2])
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;

    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))?;
    let mut sealed = ciphertext;
    sealed.extend_from_slice(&tag);
    let plain = cipher
        .decrypt(Nonce::from_slice(&iv), sealed.as_ref())
        .map_err(|_| GatewayError::new(ErrorCode::SshAuthFailed, "vault decryption failed"))?;
    String::from_utf8(plain)
        .map_err(|e| GatewayError::new(ErrorCode::Internal, e.to_string()))
}

#[cfg(test)]
#[path = "vault_tests.rs"]
mod tests;
