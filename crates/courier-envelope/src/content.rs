use courier_core::types::{ContentHint, ProtocolAddress};

use crate::error::ProtocolError;
use crate::padding::{frame_plaintext, PaddingScheme};
use crate::session::{SealedSenderCipher, SessionCipher};
use crate::types::{
    CiphertextMessage, InnerMessageType, SenderCertificate, UnidentifiedSenderMessageContent,
};

/// A message body about to be encrypted for one recipient device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeContent {
    /// Ratchet-encrypted after transport padding.
    Encrypted {
        content: Vec<u8>,
        content_hint: ContentHint,
        group_id: Option<Vec<u8>>,
    },
    /// Sent framed but unencrypted, e.g. a decryption error receipt.
    Plaintext {
        content: Vec<u8>,
        group_id: Option<Vec<u8>>,
    },
}

impl EnvelopeContent {
    pub fn encrypted(content: impl Into<Vec<u8>>) -> Self {
        EnvelopeContent::Encrypted {
            content: content.into(),
            content_hint: ContentHint::Default,
            group_id: None,
        }
    }

    pub fn plaintext(content: impl Into<Vec<u8>>) -> Self {
        EnvelopeContent::Plaintext {
            content: content.into(),
            group_id: None,
        }
    }

    pub fn with_content_hint(mut self, hint: ContentHint) -> Self {
        if let EnvelopeContent::Encrypted { content_hint, .. } = &mut self {
            *content_hint = hint;
        }
        self
    }

    pub fn with_group_id(mut self, id: impl Into<Vec<u8>>) -> Self {
        match &mut self {
            EnvelopeContent::Encrypted { group_id, .. }
            | EnvelopeContent::Plaintext { group_id, .. } => *group_id = Some(id.into()),
        }
        self
    }

    pub fn content(&self) -> &[u8] {
        match self {
            EnvelopeContent::Encrypted { content, .. }
            | EnvelopeContent::Plaintext { content, .. } => content,
        }
    }

    pub fn content_hint(&self) -> ContentHint {
        match self {
            EnvelopeContent::Encrypted { content_hint, .. } => *content_hint,
            EnvelopeContent::Plaintext { .. } => ContentHint::Default,
        }
    }

    pub fn group_id(&self) -> Option<&[u8]> {
        match self {
            EnvelopeContent::Encrypted { group_id, .. }
            | EnvelopeContent::Plaintext { group_id, .. } => group_id.as_deref(),
        }
    }

    /// Approximate body size before ratchet and sealing overhead, for
    /// batching decisions.
    pub fn size_estimate(&self, padding: &impl PaddingScheme) -> usize {
        match self {
            EnvelopeContent::Encrypted { content, .. } => padding.padded_len(content.len()),
            EnvelopeContent::Plaintext { content, .. } => content.len() + 2,
        }
    }

    /// Produce the identified payload for `destination`.
    pub fn encrypt_identified<S: SessionCipher>(
        &self,
        session: &S,
        padding: &impl PaddingScheme,
        destination: &ProtocolAddress,
    ) -> Result<CiphertextMessage, ProtocolError> {
        match self {
            EnvelopeContent::Encrypted { content, .. } => {
                session.encrypt(destination, &padding.pad(content))
            }
            EnvelopeContent::Plaintext { content, .. } => Ok(CiphertextMessage {
                message_type: InnerMessageType::Plaintext,
                serialized: frame_plaintext(content),
            }),
        }
    }

    /// Produce the identified payload, wrap it with the sender certificate
    /// and seal it for `destination`.
    pub fn seal_for<S: SessionCipher + SealedSenderCipher>(
        &self,
        store: &S,
        padding: &impl PaddingScheme,
        destination: &ProtocolAddress,
        sender_certificate: &SenderCertificate,
    ) -> Result<Vec<u8>, ProtocolError> {
        let inner = self.encrypt_identified(store, padding, destination)?;
        let usmc = UnidentifiedSenderMessageContent {
            message_type: inner.message_type,
            sender_certificate: sender_certificate.clone(),
            content: inner.serialized,
            content_hint: self.content_hint(),
            group_id: self.group_id().map(<[u8]>::to_vec),
        };
        store.seal(destination, &usmc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::padding::TransportPadding;

    #[test]
    fn test_builders() {
        let content = EnvelopeContent::encrypted(b"hi".to_vec())
            .with_content_hint(ContentHint::Resendable)
            .with_group_id(b"group".to_vec());
        assert_eq!(content.content(), b"hi");
        assert_eq!(content.content_hint(), ContentHint::Resendable);
        assert_eq!(content.group_id(), Some(&b"group"[..]));

        let plain = EnvelopeContent::plaintext(b"receipt".to_vec())
            .with_content_hint(ContentHint::Resendable);
        assert_eq!(plain.content_hint(), ContentHint::Default);
        assert_eq!(plain.group_id(), None);
    }

    #[test]
    fn test_size_estimate() {
        let padding = TransportPadding::default();
        assert_eq!(
            EnvelopeContent::encrypted(vec![0u8; 10]).size_estimate(&padding),
            159
        );
        assert_eq!(
            EnvelopeContent::plaintext(vec![0u8; 10]).size_estimate(&padding),
            12
        );
    }
}
