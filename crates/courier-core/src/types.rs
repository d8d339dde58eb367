use serde::{Deserialize, Serialize};
use std::fmt;

/// A service-level account address: ACI/UUID, phone number, or both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceAddress {
    pub uuid: Option<String>,
    pub e164: Option<String>,
}

impl ServiceAddress {
    pub fn from_uuid(uuid: impl Into<String>) -> Self {
        Self {
            uuid: Some(uuid.into()),
            e164: None,
        }
    }

    pub fn new(uuid: Option<String>, e164: Option<String>) -> Self {
        Self { uuid, e164 }
    }

    /// At least one identifier must be present for the address to be usable.
    pub fn is_valid(&self) -> bool {
        self.uuid.is_some() || self.e164.is_some()
    }

    /// Preferred identifier: the UUID when known, otherwise the phone number.
    pub fn identifier(&self) -> Option<&str> {
        self.uuid.as_deref().or(self.e164.as_deref())
    }

    /// Two addresses match when they share any identifier.
    pub fn matches(&self, other: &ServiceAddress) -> bool {
        let uuid_match = matches!((&self.uuid, &other.uuid), (Some(a), Some(b)) if a == b);
        let e164_match = matches!((&self.e164, &other.e164), (Some(a), Some(b)) if a == b);
        uuid_match || e164_match
    }
}

/// Address of one device's ratchet session: account identifier + device id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolAddress {
    pub name: String,
    pub device_id: u32,
}

impl ProtocolAddress {
    pub fn new(name: impl Into<String>, device_id: u32) -> Self {
        Self {
            name: name.into(),
            device_id,
        }
    }
}

impl fmt::Display for ProtocolAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.name, self.device_id)
    }
}

/// Envelope type discriminant as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvelopeType {
    Ciphertext,
    PrekeyBundle,
    UnidentifiedSender,
    PlaintextContent,
}

impl EnvelopeType {
    pub fn wire_value(self) -> i32 {
        match self {
            EnvelopeType::Ciphertext => 1,
            EnvelopeType::PrekeyBundle => 3,
            EnvelopeType::UnidentifiedSender => 6,
            EnvelopeType::PlaintextContent => 8,
        }
    }

    /// Map a wire value back to a known type; unknown values yield `None`.
    pub fn from_wire(value: i32) -> Option<Self> {
        match value {
            1 => Some(EnvelopeType::Ciphertext),
            3 => Some(EnvelopeType::PrekeyBundle),
            6 => Some(EnvelopeType::UnidentifiedSender),
            8 => Some(EnvelopeType::PlaintextContent),
            _ => None,
        }
    }
}

/// Sender hint about how the recipient should treat a failed decryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentHint {
    #[default]
    Default,
    Resendable,
    Implicit,
}

impl ContentHint {
    pub fn wire_value(self) -> u32 {
        match self {
            ContentHint::Default => 0,
            ContentHint::Resendable => 1,
            ContentHint::Implicit => 2,
        }
    }

    pub fn from_wire(value: u32) -> Self {
        match value {
            1 => ContentHint::Resendable,
            2 => ContentHint::Implicit,
            _ => ContentHint::Default,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_identifier_prefers_uuid() {
        let addr = ServiceAddress::new(Some("a-uuid".into()), Some("+15550100".into()));
        assert_eq!(addr.identifier(), Some("a-uuid"));

        let phone_only = ServiceAddress::new(None, Some("+15550100".into()));
        assert_eq!(phone_only.identifier(), Some("+15550100"));

        assert!(!ServiceAddress::new(None, None).is_valid());
    }

    #[test]
    fn test_address_matches_on_any_identifier() {
        let full = ServiceAddress::new(Some("u1".into()), Some("+1".into()));
        assert!(full.matches(&ServiceAddress::from_uuid("u1")));
        assert!(full.matches(&ServiceAddress::new(None, Some("+1".into()))));
        assert!(!full.matches(&ServiceAddress::from_uuid("u2")));
        assert!(!ServiceAddress::new(None, None).matches(&ServiceAddress::new(None, None)));
    }

    #[test]
    fn test_envelope_type_wire_values() {
        for ty in [
            EnvelopeType::Ciphertext,
            EnvelopeType::PrekeyBundle,
            EnvelopeType::UnidentifiedSender,
            EnvelopeType::PlaintextContent,
        ] {
            assert_eq!(EnvelopeType::from_wire(ty.wire_value()), Some(ty));
        }
        assert_eq!(EnvelopeType::from_wire(0), None);
        assert_eq!(EnvelopeType::from_wire(5), None);
    }

    #[test]
    fn test_protocol_address_display() {
        assert_eq!(ProtocolAddress::new("alice", 2).to_string(), "alice.2");
    }
}
