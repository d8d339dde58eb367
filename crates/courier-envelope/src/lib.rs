//! courier-envelope: message envelope encryption and dispatch
//!
//! Sits between the transport and the ratchet primitives:
//!
//! ```text
//! outgoing:  content ─pad─► SessionCipher::encrypt ─┬─► identified (type 1/3/8)
//!                                                  └─► seal ─► sealed (type 6)
//! incoming:  envelope ─type─► prekey / message / plaintext / unseal+validate
//!                             ─► unpad ─► DecryptedEnvelope
//! ```
//!
//! The ratchet itself is reached through the traits in [`session`].

pub mod certificate;
pub mod cipher;
pub mod content;
pub mod error;
pub mod locks;
pub mod padding;
pub mod session;
pub mod types;

pub use certificate::{CertificateValidator, ExpiryValidator};
pub use cipher::EnvelopeCipher;
pub use content::EnvelopeContent;
pub use error::{EnvelopeError, EnvelopeResult, ProtocolError};
pub use locks::{SessionGuard, SessionLocks};
pub use padding::{PaddingScheme, TransportPadding};
pub use session::{ProtocolStore, SealedSenderCipher, SenderKeyStore, SessionCipher};
pub use types::{
    CiphertextMessage, DecryptedEnvelope, Envelope, EnvelopeMetadata, InnerMessageType,
    OutgoingMessage, SealedSenderAccess, SenderCertificate, UnidentifiedSenderMessageContent,
};
