//! Attachment stream cipher: encrypt-then-MAC CBC blobs with an
//! out-of-band digest, optional incremental MACs, upload padding, and the
//! archive and sticker variants.

mod block;
pub mod decrypt;
pub mod encrypt;
pub mod incremental;
pub mod padding;

pub use decrypt::{
    decrypt_attachment, decrypt_sticker, open_archived, AttachmentReader, StreamParams,
};
pub use encrypt::{ciphertext_len, encrypt_attachment, AttachmentWriter, EncryptedAttachment};
pub use incremental::{ChunkSizePolicy, IncrementalDigest, IncrementalMacWriter};
pub use padding::{padded_size, padding_len, write_padding};
