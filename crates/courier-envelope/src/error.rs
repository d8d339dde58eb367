use thiserror::Error;

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Failures reported by the ratchet and sealed-sender primitives.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("duplicate message")]
    DuplicateMessage,

    #[error("legacy message")]
    LegacyMessage,

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("untrusted identity: {0}")]
    UntrustedIdentity(String),

    #[error("no session: {0}")]
    NoSession(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid key id: {0}")]
    InvalidKeyId(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

/// Envelope cipher errors.
///
/// Failures tied to a known sender carry its identifier and device so the
/// caller can decide between a safety-number prompt and a silent drop.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("{kind} (sender: {}, device: {device})", .sender.as_deref().unwrap_or("unknown"))]
    Protocol {
        kind: ProtocolError,
        sender: Option<String>,
        device: u32,
    },

    #[error(
        "invalid sender certificate: {reason} (sender: {}, device: {device})",
        .sender.as_deref().unwrap_or("unknown")
    )]
    InvalidCertificate {
        reason: String,
        sender: Option<String>,
        device: u32,
    },

    #[error(
        "message from this device to itself (sender: {}, device: {device})",
        .sender.as_deref().unwrap_or("unknown")
    )]
    SelfSend { sender: Option<String>, device: u32 },

    #[error("non-sealed envelope is missing a source")]
    MissingSource,

    #[error("unknown envelope type {0}")]
    UnknownType(i32),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error(
        "malformed transport padding (sender: {}, device: {device})",
        .sender.as_deref().unwrap_or("unknown")
    )]
    MalformedPadding { sender: Option<String>, device: u32 },
}

impl EnvelopeError {
    pub(crate) fn protocol(kind: ProtocolError, sender: Option<&str>, device: u32) -> Self {
        EnvelopeError::Protocol {
            kind,
            sender: sender.map(str::to_owned),
            device,
        }
    }

    /// Attach the sender to an error raised before it was known. Errors that
    /// already name a sender are returned unchanged.
    pub(crate) fn with_sender(self, sender: Option<&str>, device: u32) -> Self {
        match self {
            EnvelopeError::MalformedPadding { sender: None, .. } => {
                EnvelopeError::MalformedPadding {
                    sender: sender.map(str::to_owned),
                    device,
                }
            }
            other => other,
        }
    }

    /// Sender identifier and device, when the failure is tied to one.
    pub fn sender(&self) -> Option<(&str, u32)> {
        match self {
            EnvelopeError::Protocol { sender, device, .. }
            | EnvelopeError::InvalidCertificate { sender, device, .. }
            | EnvelopeError::SelfSend { sender, device }
            | EnvelopeError::MalformedPadding { sender, device } => {
                sender.as_deref().map(|s| (s, *device))
            }
            _ => None,
        }
    }

    /// The underlying protocol failure, if this is one.
    pub fn protocol_kind(&self) -> Option<&ProtocolError> {
        match self {
            EnvelopeError::Protocol { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self.protocol_kind(), Some(ProtocolError::DuplicateMessage))
    }
}
