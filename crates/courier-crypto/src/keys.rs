//! Key hierarchy: master key, storage-service keys, profile and access keys,
//! attachment key material

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{CipherError, CipherResult};
use crate::kdf::{hkdf_sha256, hmac_sha256};
use crate::{ACCESS_KEY_SIZE, COMBINED_KEY_SIZE, KEY_SIZE, NONCE_SIZE};

/// Fixed-size secret with zeroize-on-drop and a redacted `Debug`.
macro_rules! secret_bytes {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            bytes: [u8; $len],
        }

        impl $name {
            pub fn from_bytes(bytes: [u8; $len]) -> Self {
                Self { bytes }
            }

            /// Copy from a slice, rejecting the wrong length.
            pub fn from_slice(bytes: &[u8]) -> CipherResult<Self> {
                let bytes: [u8; $len] =
                    bytes
                        .try_into()
                        .map_err(|_| CipherError::InvalidKeyLength {
                            expected: $len,
                            actual: bytes.len(),
                        })?;
                Ok(Self { bytes })
            }

            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.bytes
            }
        }

        impl Drop for $name {
            fn drop(&mut self) {
                self.bytes.zeroize();
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("bytes", &"[REDACTED]")
                    .finish()
            }
        }
    };
}

secret_bytes!(
    /// Account root key. Zeroized on drop.
    MasterKey,
    KEY_SIZE
);

secret_bytes!(
    /// Storage-service root, derived from the master key.
    StorageKey,
    KEY_SIZE
);

secret_bytes!(
    /// Key for one storage manifest version.
    StorageManifestKey,
    KEY_SIZE
);

secret_bytes!(
    /// Key for one storage record, bound to its raw id.
    StorageItemKey,
    KEY_SIZE
);

secret_bytes!(
    /// Per-account profile key shared with contacts.
    ProfileKey,
    KEY_SIZE
);

secret_bytes!(
    /// Sealed-sender delivery credential derived from a profile key.
    AccessKey,
    ACCESS_KEY_SIZE
);

impl MasterKey {
    pub fn derive_storage_service_key(&self) -> CipherResult<StorageKey> {
        hmac_sha256(&self.bytes, b"Storage Service Encryption").map(StorageKey::from_bytes)
    }

    /// Registration-lock token, lowercase hex.
    pub fn derive_registration_lock(&self) -> CipherResult<String> {
        let mut token = hmac_sha256(&self.bytes, b"Registration Lock")?;
        let encoded = hex::encode(token);
        token.zeroize();
        Ok(encoded)
    }

    /// Registration recovery password, standard base64 with padding.
    pub fn derive_registration_recovery_password(&self) -> CipherResult<String> {
        let mut okm: [u8; KEY_SIZE] = hkdf_sha256(&self.bytes, b"Registration Recovery")?;
        let encoded = STANDARD.encode(okm);
        okm.zeroize();
        Ok(encoded)
    }
}

impl StorageKey {
    pub fn derive_manifest_key(&self, version: u64) -> CipherResult<StorageManifestKey> {
        let label = format!("Manifest_{version}");
        hmac_sha256(&self.bytes, label.as_bytes()).map(StorageManifestKey::from_bytes)
    }

    pub fn derive_item_key(&self, raw_id: &[u8]) -> CipherResult<StorageItemKey> {
        let label = format!("Item_{}", STANDARD.encode(raw_id));
        hmac_sha256(&self.bytes, label.as_bytes()).map(StorageItemKey::from_bytes)
    }
}

impl ProfileKey {
    /// AES-256-GCM of sixteen zero bytes under a zero nonce, truncated to
    /// the first 16 bytes.
    pub fn derive_access_key(&self) -> CipherResult<AccessKey> {
        let cipher = Aes256Gcm::new((&self.bytes).into());
        let nonce = [0u8; NONCE_SIZE];
        let mut output = cipher
            .encrypt(Nonce::from_slice(&nonce), [0u8; ACCESS_KEY_SIZE].as_ref())
            .map_err(|_| CipherError::AuthenticationFailed)?;

        let result = AccessKey::from_slice(&output[..ACCESS_KEY_SIZE]);
        output.zeroize();
        result
    }

    /// Constant-time check of a presented access key against this profile key.
    pub fn verify_access_key(&self, presented: &[u8]) -> CipherResult<bool> {
        let expected = self.derive_access_key()?;
        Ok(expected.as_bytes().ct_eq(presented).into())
    }
}

/// Attachment key material: AES-256 key followed by HMAC-SHA256 key.
#[derive(Clone)]
pub struct CombinedKeyMaterial {
    bytes: [u8; COMBINED_KEY_SIZE],
}

impl CombinedKeyMaterial {
    pub fn from_bytes(bytes: [u8; COMBINED_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> CipherResult<Self> {
        let bytes: [u8; COMBINED_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CipherError::InvalidKeyLength {
                    expected: COMBINED_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self { bytes })
    }

    /// Expand a sticker pack key into the attachment key pair.
    pub fn from_sticker_pack_key(pack_key: &[u8]) -> CipherResult<Self> {
        hkdf_sha256(pack_key, b"Sticker Pack").map(Self::from_bytes)
    }

    pub fn as_bytes(&self) -> &[u8; COMBINED_KEY_SIZE] {
        &self.bytes
    }

    pub fn aes_key(&self) -> &[u8] {
        &self.bytes[..KEY_SIZE]
    }

    pub fn mac_key(&self) -> &[u8] {
        &self.bytes[KEY_SIZE..]
    }
}

impl Drop for CombinedKeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for CombinedKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CombinedKeyMaterial")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate fresh attachment key material.
pub fn generate_combined_key() -> CombinedKeyMaterial {
    let mut bytes = [0u8; COMBINED_KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    CombinedKeyMaterial::from_bytes(bytes)
}

/// Generate a random 256-bit profile key.
pub fn generate_profile_key() -> ProfileKey {
    let mut bytes = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut bytes);
    ProfileKey::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_storage_key_is_hmac_of_label() {
        let master = test_master_key();
        let storage = master.derive_storage_service_key().unwrap();
        let expected = hmac_sha256(&[42u8; KEY_SIZE], b"Storage Service Encryption").unwrap();
        assert_eq!(storage.as_bytes(), &expected);
    }

    #[test]
    fn test_manifest_keys_differ_per_version() {
        let storage = test_master_key().derive_storage_service_key().unwrap();
        let v1 = storage.derive_manifest_key(1).unwrap();
        let v2 = storage.derive_manifest_key(2).unwrap();
        assert_ne!(v1.as_bytes(), v2.as_bytes());

        let expected = hmac_sha256(storage.as_bytes(), b"Manifest_1").unwrap();
        assert_eq!(v1.as_bytes(), &expected);
    }

    #[test]
    fn test_item_key_uses_base64_id() {
        let storage = StorageKey::from_bytes([3u8; KEY_SIZE]);
        let item = storage.derive_item_key(&[0xff, 0x00, 0x10]).unwrap();
        let expected = hmac_sha256(&[3u8; KEY_SIZE], b"Item_/wAQ").unwrap();
        assert_eq!(item.as_bytes(), &expected);
    }

    #[test]
    fn test_registration_lock_is_hex() {
        let token = test_master_key().derive_registration_lock().unwrap();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_recovery_password_is_padded_base64() {
        let password = test_master_key()
            .derive_registration_recovery_password()
            .unwrap();
        // 32 bytes → 44 base64 chars with one '=' pad
        assert_eq!(password.len(), 44);
        assert!(password.ends_with('='));
        assert_eq!(STANDARD.decode(&password).unwrap().len(), 32);
    }

    #[test]
    fn test_access_key_deterministic_and_verifiable() {
        let profile = ProfileKey::from_bytes([5u8; KEY_SIZE]);
        let a = profile.derive_access_key().unwrap();
        let b = profile.derive_access_key().unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());

        assert!(profile.verify_access_key(a.as_bytes()).unwrap());
        assert!(!profile.verify_access_key(&[0u8; ACCESS_KEY_SIZE]).unwrap());
        assert!(!profile.verify_access_key(&a.as_bytes()[..8]).unwrap());

        let other = ProfileKey::from_bytes([6u8; KEY_SIZE]);
        assert!(!other.verify_access_key(a.as_bytes()).unwrap());
    }

    #[test]
    fn test_combined_key_split() {
        let mut raw = [0u8; COMBINED_KEY_SIZE];
        raw[..KEY_SIZE].fill(1);
        raw[KEY_SIZE..].fill(2);
        let key = CombinedKeyMaterial::from_bytes(raw);
        assert_eq!(key.aes_key(), &[1u8; KEY_SIZE][..]);
        assert_eq!(key.mac_key(), &[2u8; KEY_SIZE][..]);
    }

    #[test]
    fn test_combined_key_rejects_wrong_length() {
        let err = CombinedKeyMaterial::from_slice(&[0u8; 32]).unwrap_err();
        assert!(matches!(
            err,
            CipherError::InvalidKeyLength {
                expected: 64,
                actual: 32
            }
        ));
    }

    #[test]
    fn test_sticker_key_expansion_deterministic() {
        let pack = [8u8; 32];
        let a = CombinedKeyMaterial::from_sticker_pack_key(&pack).unwrap();
        let b = CombinedKeyMaterial::from_sticker_pack_key(&pack).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.aes_key(), a.mac_key());
    }

    #[test]
    fn test_debug_redacts() {
        let rendered = format!("{:?}", test_master_key());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("42"));
    }

    #[test]
    fn test_generated_keys_differ() {
        let k1 = generate_combined_key();
        let k2 = generate_combined_key();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
        assert_ne!(
            generate_profile_key().as_bytes(),
            generate_profile_key().as_bytes()
        );
    }
}
