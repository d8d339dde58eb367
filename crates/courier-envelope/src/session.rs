//! Seams to the ratchet, sealed-sender and sender-key primitives.
//!
//! Implementations take `&self` and manage their own interior state; the
//! envelope cipher serializes access per protocol address through
//! [`crate::locks::SessionLocks`].

use courier_core::types::ProtocolAddress;

use crate::error::ProtocolError;
use crate::types::{CiphertextMessage, UnidentifiedSenderMessageContent};

/// Double-ratchet session operations for one local identity.
pub trait SessionCipher {
    /// Encrypt an already padded plaintext for `remote`.
    fn encrypt(
        &self,
        remote: &ProtocolAddress,
        padded: &[u8],
    ) -> Result<CiphertextMessage, ProtocolError>;

    /// Decrypt a pre-key message, establishing a session if needed.
    fn decrypt_prekey(
        &self,
        remote: &ProtocolAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ProtocolError>;

    fn decrypt_message(
        &self,
        remote: &ProtocolAddress,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ProtocolError>;

    fn contains_session(&self, remote: &ProtocolAddress) -> bool;

    fn remote_registration_id(&self, remote: &ProtocolAddress) -> Result<u32, ProtocolError>;
}

/// Sealed-sender wrapping. `unseal` only removes the outer layer; the
/// embedded message is still ratchet-encrypted (or plaintext framed).
pub trait SealedSenderCipher {
    fn seal(
        &self,
        destination: &ProtocolAddress,
        content: &UnidentifiedSenderMessageContent,
    ) -> Result<Vec<u8>, ProtocolError>;

    fn unseal(
        &self,
        ciphertext: &[u8],
        server_timestamp: u64,
    ) -> Result<UnidentifiedSenderMessageContent, ProtocolError>;
}

pub trait SenderKeyStore {
    /// Forget which group sender keys were shared with `address`, forcing
    /// a fresh distribution after the peer re-established its session.
    fn clear_sender_key_shared_with(&self, address: &ProtocolAddress);
}

/// Everything the envelope cipher needs from the protocol layer.
pub trait ProtocolStore: SessionCipher + SealedSenderCipher + SenderKeyStore {}

impl<T: SessionCipher + SealedSenderCipher + SenderKeyStore> ProtocolStore for T {}
