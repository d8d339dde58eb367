//! Storage-service record encryption
//!
//! Format: `[12-byte nonce][AES-256-GCM ciphertext + 16-byte tag]`
//!
//! Every record is sealed under its own item key and every manifest under
//! the key for its version (see [`crate::keys::StorageKey`]), so a leaked
//! record key exposes exactly one record.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{CipherError, CipherResult};
use crate::keys::{StorageItemKey, StorageKey, StorageManifestKey};
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// A key that can seal storage-service payloads.
pub trait RecordKey {
    fn record_key_bytes(&self) -> &[u8; KEY_SIZE];
}

impl RecordKey for StorageItemKey {
    fn record_key_bytes(&self) -> &[u8; KEY_SIZE] {
        self.as_bytes()
    }
}

impl RecordKey for StorageManifestKey {
    fn record_key_bytes(&self) -> &[u8; KEY_SIZE] {
        self.as_bytes()
    }
}

/// Seal a record or manifest with a random nonce.
pub fn encrypt<K: RecordKey>(key: &K, plaintext: &[u8]) -> CipherResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.record_key_bytes().into());

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CipherError::InvalidCiphertext)?;

    let mut result = Vec::with_capacity(NONCE_SIZE + sealed.len());
    result.extend_from_slice(&nonce);
    result.extend_from_slice(&sealed);
    Ok(result)
}

/// Open a sealed record or manifest.
pub fn decrypt<K: RecordKey>(key: &K, blob: &[u8]) -> CipherResult<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CipherError::InvalidCiphertext);
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(key.record_key_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| {
            tracing::warn!(blob_len = blob.len(), "storage record tag mismatch");
            CipherError::AuthenticationFailed
        })
}

impl StorageKey {
    /// Derive the item key for `raw_id` and seal `plaintext` with it.
    pub fn encrypt_item(&self, raw_id: &[u8], plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        encrypt(&self.derive_item_key(raw_id)?, plaintext)
    }

    pub fn decrypt_item(&self, raw_id: &[u8], blob: &[u8]) -> CipherResult<Vec<u8>> {
        decrypt(&self.derive_item_key(raw_id)?, blob)
    }

    pub fn encrypt_manifest(&self, version: u64, plaintext: &[u8]) -> CipherResult<Vec<u8>> {
        encrypt(&self.derive_manifest_key(version)?, plaintext)
    }

    pub fn decrypt_manifest(&self, version: u64, blob: &[u8]) -> CipherResult<Vec<u8>> {
        decrypt(&self.derive_manifest_key(version)?, blob)
    }
}
