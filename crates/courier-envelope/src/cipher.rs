//! Envelope encryption and type dispatch
//!
//! Outgoing content is padded, ratchet-encrypted and optionally sealed;
//! incoming envelopes are routed by wire type to the pre-key, message,
//! plaintext or sealed-sender path. Every ratchet operation runs under the
//! session lock for the address it touches.

use courier_core::types::{ContentHint, EnvelopeType, ProtocolAddress, ServiceAddress};

use crate::certificate::CertificateValidator;
use crate::content::EnvelopeContent;
use crate::error::{EnvelopeError, EnvelopeResult, ProtocolError};
use crate::locks::SessionLocks;
use crate::padding::{unframe_plaintext, PaddingScheme, TransportPadding};
use crate::session::ProtocolStore;
use crate::types::{
    DecryptedEnvelope, Envelope, EnvelopeMetadata, InnerMessageType, OutgoingMessage,
    SealedSenderAccess,
};

pub struct EnvelopeCipher<'a, S, V, P = TransportPadding> {
    local_address: ServiceAddress,
    local_device_id: u32,
    store: &'a S,
    validator: &'a V,
    locks: &'a SessionLocks,
    padding: P,
}

impl<'a, S, V> EnvelopeCipher<'a, S, V> {
    pub fn new(
        local_address: ServiceAddress,
        local_device_id: u32,
        store: &'a S,
        validator: &'a V,
        locks: &'a SessionLocks,
    ) -> Self {
        Self {
            local_address,
            local_device_id,
            store,
            validator,
            locks,
            padding: TransportPadding::default(),
        }
    }
}

impl<'a, S, V, P> EnvelopeCipher<'a, S, V, P> {
    pub fn with_padding<Q: PaddingScheme>(self, padding: Q) -> EnvelopeCipher<'a, S, V, Q> {
        EnvelopeCipher {
            local_address: self.local_address,
            local_device_id: self.local_device_id,
            store: self.store,
            validator: self.validator,
            locks: self.locks,
            padding,
        }
    }

    pub fn padding(&self) -> &P {
        &self.padding
    }
}

impl<S, V, P> EnvelopeCipher<'_, S, V, P>
where
    S: ProtocolStore,
    V: CertificateValidator,
    P: PaddingScheme,
{
    /// Encrypt `content` for one device, sealed when `access` is given.
    pub fn encrypt(
        &self,
        destination: &ProtocolAddress,
        access: Option<&SealedSenderAccess>,
        content: &EnvelopeContent,
    ) -> EnvelopeResult<OutgoingMessage> {
        let _guard = self.locks.acquire(destination);
        self.encrypt_locked(destination, access, content)
    }

    /// Encrypt `content` for several devices, holding all their session
    /// locks for the duration.
    pub fn encrypt_for_devices(
        &self,
        destinations: &[ProtocolAddress],
        access: Option<&SealedSenderAccess>,
        content: &EnvelopeContent,
    ) -> EnvelopeResult<Vec<OutgoingMessage>> {
        let _guard = self.locks.acquire_all(destinations);
        destinations
            .iter()
            .map(|destination| self.encrypt_locked(destination, access, content))
            .collect()
    }

    fn encrypt_locked(
        &self,
        destination: &ProtocolAddress,
        access: Option<&SealedSenderAccess>,
        content: &EnvelopeContent,
    ) -> EnvelopeResult<OutgoingMessage> {
        let outgoing_error = |kind: ProtocolError| {
            EnvelopeError::protocol(kind, Some(destination.name.as_str()), destination.device_id)
        };

        let registration_id = self
            .store
            .remote_registration_id(destination)
            .map_err(outgoing_error)?;

        match access {
            Some(access) => {
                let body = content
                    .seal_for(
                        self.store,
                        &self.padding,
                        destination,
                        &access.sender_certificate,
                    )
                    .map_err(outgoing_error)?;
                tracing::debug!(%destination, len = body.len(), "sealed outgoing message");
                Ok(OutgoingMessage::new(
                    EnvelopeType::UnidentifiedSender,
                    destination.device_id,
                    registration_id,
                    &body,
                ))
            }
            None => {
                let message = content
                    .encrypt_identified(self.store, &self.padding, destination)
                    .map_err(outgoing_error)?;
                tracing::debug!(
                    %destination,
                    message_type = ?message.message_type,
                    "encrypted outgoing message"
                );
                Ok(OutgoingMessage::new(
                    message.message_type.envelope_type(),
                    destination.device_id,
                    registration_id,
                    &message.serialized,
                ))
            }
        }
    }

    /// Decrypt an incoming envelope.
    pub fn decrypt(&self, envelope: &Envelope) -> EnvelopeResult<DecryptedEnvelope> {
        let kind = envelope
            .kind()
            .ok_or(EnvelopeError::UnknownType(envelope.envelope_type))?;
        tracing::debug!(
            envelope_type = envelope.envelope_type,
            timestamp = envelope.timestamp,
            "decrypting envelope"
        );

        let inner = match kind {
            EnvelopeType::UnidentifiedSender => return self.decrypt_sealed(envelope),
            EnvelopeType::PrekeyBundle => InnerMessageType::PreKey,
            EnvelopeType::Ciphertext => InnerMessageType::Whisper,
            EnvelopeType::PlaintextContent => InnerMessageType::Plaintext,
        };

        let source = envelope
            .source
            .as_ref()
            .filter(|s| s.is_valid())
            .ok_or(EnvelopeError::MissingSource)?;
        let content = self.open_inner(inner, source, envelope.source_device, &envelope.content)?;

        Ok(DecryptedEnvelope {
            metadata: EnvelopeMetadata {
                sender: source.clone(),
                sender_device: envelope.source_device,
                timestamp: envelope.timestamp,
                server_timestamp: envelope.server_timestamp,
                needs_receipt: false,
                content_hint: ContentHint::Default,
                group_id: None,
            },
            content,
        })
    }

    fn decrypt_sealed(&self, envelope: &Envelope) -> EnvelopeResult<DecryptedEnvelope> {
        let usmc = self
            .store
            .unseal(&envelope.content, envelope.server_timestamp)
            .map_err(|kind| {
                tracing::warn!(error = %kind, "failed to unseal envelope");
                EnvelopeError::protocol(kind, None, envelope.source_device)
            })?;

        let certificate = &usmc.sender_certificate;
        let claimed = certificate.sender.identifier().map(str::to_owned);
        self.validator
            .validate(certificate, envelope.server_timestamp)
            .map_err(|reason| EnvelopeError::InvalidCertificate {
                reason,
                sender: claimed.clone(),
                device: certificate.sender_device,
            })?;

        if certificate.sender.matches(&self.local_address)
            && certificate.sender_device == self.local_device_id
        {
            tracing::warn!("dropping sealed envelope sent by this device");
            return Err(EnvelopeError::SelfSend {
                sender: claimed,
                device: certificate.sender_device,
            });
        }

        let content = self.open_inner(
            usmc.message_type,
            &certificate.sender,
            certificate.sender_device,
            &usmc.content,
        )?;

        Ok(DecryptedEnvelope {
            metadata: EnvelopeMetadata {
                sender: certificate.sender.clone(),
                sender_device: certificate.sender_device,
                timestamp: envelope.timestamp,
                server_timestamp: envelope.server_timestamp,
                needs_receipt: envelope.source.is_none(),
                content_hint: usmc.content_hint,
                group_id: usmc.group_id.clone(),
            },
            content,
        })
    }

    fn open_inner(
        &self,
        inner: InnerMessageType,
        sender: &ServiceAddress,
        device: u32,
        body: &[u8],
    ) -> EnvelopeResult<Vec<u8>> {
        if inner == InnerMessageType::Plaintext {
            return unframe_plaintext(body);
        }

        let address = self.preferred_address(sender, device)?;
        let incoming_error = |kind: ProtocolError| {
            tracing::warn!(%address, error = %kind, "ratchet decrypt failed");
            EnvelopeError::protocol(kind, sender.identifier(), device)
        };

        let _guard = self.locks.acquire(&address);
        let padded = match inner {
            InnerMessageType::PreKey => {
                let padded = self
                    .store
                    .decrypt_prekey(&address, body)
                    .map_err(incoming_error)?;
                self.store.clear_sender_key_shared_with(&address);
                padded
            }
            _ => self
                .store
                .decrypt_message(&address, body)
                .map_err(incoming_error)?,
        };
        self.padding
            .unpad(&padded)
            .map_err(|e| e.with_sender(sender.identifier(), device))
    }

    /// The session address for a sender: whichever identifier already has a
    /// session, UUID first, falling back to the preferred identifier.
    pub fn preferred_address(
        &self,
        sender: &ServiceAddress,
        device: u32,
    ) -> EnvelopeResult<ProtocolAddress> {
        for name in [sender.uuid.as_deref(), sender.e164.as_deref()]
            .into_iter()
            .flatten()
        {
            let address = ProtocolAddress::new(name, device);
            if self.store.contains_session(&address) {
                return Ok(address);
            }
        }
        sender
            .identifier()
            .map(|name| ProtocolAddress::new(name, device))
            .ok_or_else(|| EnvelopeError::InvalidMetadata("sender has no identifier".into()))
    }
}
