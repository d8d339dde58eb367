//! courier-crypto: the client's cryptographic envelope primitives
//!
//! Every byte that crosses the network or touches disk passes through one of
//! these ciphers:
//!
//! - attachments: `IV || AES-256-CBC || HMAC-SHA256`, streamed with
//!   whole-stream or incremental (per-chunk) verification plus an
//!   out-of-band SHA-256 digest
//! - profile fields: AES-256-GCM over zero-padded, length-bucketed plaintext
//! - storage-service records: AES-256-GCM under per-item derived keys
//!
//! Key hierarchy:
//! ```text
//! Master Key (32 bytes, account root)
//!   ├── Storage Service Key  HMAC(master, "Storage Service Encryption")
//!   │   ├── Manifest Key     HMAC(storage, "Manifest_" || version)
//!   │   └── Item Key         HMAC(storage, "Item_" || base64(item_id))
//!   ├── Registration Lock    HMAC(master, "Registration Lock")
//!   └── Recovery Password    HKDF(master, info="Registration Recovery")
//! Profile Key (32 bytes)
//!   └── Access Key           AES-GCM(profile, nonce=0, 0^16)[..16]
//! Sticker Pack Key
//!   └── Combined Key (64)    HKDF(pack, info="Sticker Pack")
//! ```

pub mod attachment;
pub mod digest;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod profile;
pub mod storage;

pub use attachment::{
    AttachmentReader, AttachmentWriter, ChunkSizePolicy, EncryptedAttachment, IncrementalDigest,
    StreamParams,
};
pub use digest::DigestingWriter;
pub use error::{CipherError, CipherResult};
pub use keys::{
    generate_combined_key, generate_profile_key, AccessKey, CombinedKeyMaterial, MasterKey,
    ProfileKey, StorageItemKey, StorageKey, StorageManifestKey,
};
pub use profile::{ProfileCipher, ProfileCipherReader, ProfileCipherWriter};

/// Size of every 256-bit root and derived key
pub const KEY_SIZE: usize = 32;

/// Combined attachment key material: AES key followed by HMAC key
pub const COMBINED_KEY_SIZE: usize = 64;

/// AES block size, also the CBC IV size
pub const BLOCK_SIZE: usize = 16;

/// CBC initialization vector length
pub const IV_SIZE: usize = 16;

/// HMAC-SHA256 tag length
pub const MAC_SIZE: usize = 32;

/// SHA-256 digest length
pub const DIGEST_SIZE: usize = 32;

/// AES-GCM nonce length (96-bit)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag length
pub const TAG_SIZE: usize = 16;

/// Sealed-sender access key length
pub const ACCESS_KEY_SIZE: usize = 16;
