use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};

use courier_core::types::{ContentHint, EnvelopeType, ServiceAddress};
use courier_crypto::{AccessKey, CipherResult, ProfileKey};

/// An envelope as received from the service.
///
/// `envelope_type` stays a raw wire value so that unknown types surface as
/// [`crate::EnvelopeError::UnknownType`] instead of failing to deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub envelope_type: i32,
    pub source: Option<ServiceAddress>,
    pub source_device: u32,
    pub timestamp: u64,
    pub server_timestamp: u64,
    pub content: Vec<u8>,
}

impl Envelope {
    pub fn kind(&self) -> Option<EnvelopeType> {
        EnvelopeType::from_wire(self.envelope_type)
    }
}

/// Who sent a decrypted envelope and how to acknowledge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeMetadata {
    pub sender: ServiceAddress,
    pub sender_device: u32,
    pub timestamp: u64,
    pub server_timestamp: u64,
    /// Sealed envelopes delivered without a source need an explicit
    /// delivery receipt.
    pub needs_receipt: bool,
    pub content_hint: ContentHint,
    pub group_id: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedEnvelope {
    pub metadata: EnvelopeMetadata,
    pub content: Vec<u8>,
}

/// One per-device ciphertext ready for submission to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    #[serde(rename = "type")]
    pub message_type: i32,
    pub destination_device_id: u32,
    pub destination_registration_id: u32,
    /// Base64 (standard alphabet, padded) ciphertext body.
    pub content: String,
}

impl OutgoingMessage {
    pub fn new(
        envelope_type: EnvelopeType,
        destination_device_id: u32,
        destination_registration_id: u32,
        body: &[u8],
    ) -> Self {
        Self {
            message_type: envelope_type.wire_value(),
            destination_device_id,
            destination_registration_id,
            content: STANDARD.encode(body),
        }
    }

    pub fn body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(&self.content)
    }
}

/// A server-signed statement binding a sender identity to a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderCertificate {
    pub sender: ServiceAddress,
    pub sender_device: u32,
    pub expires: u64,
    pub serialized: Vec<u8>,
}

/// Credentials for delivering without revealing the sender to the service.
#[derive(Debug)]
pub struct SealedSenderAccess {
    pub sender_certificate: SenderCertificate,
    pub access_key: AccessKey,
}

impl SealedSenderAccess {
    pub fn new(sender_certificate: SenderCertificate, access_key: AccessKey) -> Self {
        Self {
            sender_certificate,
            access_key,
        }
    }

    /// Derive the recipient's access key from their profile key.
    pub fn for_profile(
        sender_certificate: SenderCertificate,
        recipient_profile_key: &ProfileKey,
    ) -> CipherResult<Self> {
        Ok(Self::new(
            sender_certificate,
            recipient_profile_key.derive_access_key()?,
        ))
    }
}

/// The kind of payload carried inside a ratchet or sealed-sender message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerMessageType {
    PreKey,
    Whisper,
    Plaintext,
}

impl InnerMessageType {
    /// The envelope type used when this payload is sent identified.
    pub fn envelope_type(self) -> EnvelopeType {
        match self {
            InnerMessageType::PreKey => EnvelopeType::PrekeyBundle,
            InnerMessageType::Whisper => EnvelopeType::Ciphertext,
            InnerMessageType::Plaintext => EnvelopeType::PlaintextContent,
        }
    }
}

/// Output of a ratchet encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CiphertextMessage {
    pub message_type: InnerMessageType,
    pub serialized: Vec<u8>,
}

/// The payload a sealed-sender envelope unwraps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnidentifiedSenderMessageContent {
    pub message_type: InnerMessageType,
    pub sender_certificate: SenderCertificate,
    pub content: Vec<u8>,
    pub content_hint: ContentHint,
    pub group_id: Option<Vec<u8>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outgoing_message_json_shape() {
        let msg = OutgoingMessage::new(EnvelopeType::PrekeyBundle, 2, 4242, b"\x01\x02\x03");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], 3);
        assert_eq!(json["destinationDeviceId"], 2);
        assert_eq!(json["destinationRegistrationId"], 4242);
        assert_eq!(json["content"], "AQID");
        assert_eq!(msg.body().unwrap(), b"\x01\x02\x03");
    }

    #[test]
    fn test_inner_type_maps_to_envelope_type() {
        assert_eq!(InnerMessageType::PreKey.envelope_type().wire_value(), 3);
        assert_eq!(InnerMessageType::Whisper.envelope_type().wire_value(), 1);
        assert_eq!(InnerMessageType::Plaintext.envelope_type().wire_value(), 8);
    }

    #[test]
    fn test_access_from_profile_key() {
        let cert = SenderCertificate {
            sender: ServiceAddress::from_uuid("sender"),
            sender_device: 1,
            expires: u64::MAX,
            serialized: vec![],
        };
        let profile_key = ProfileKey::from_bytes([9; 32]);
        let access = SealedSenderAccess::for_profile(cert, &profile_key).unwrap();
        assert!(profile_key
            .verify_access_key(access.access_key.as_bytes())
            .unwrap());
    }
}
