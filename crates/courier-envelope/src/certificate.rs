use crate::types::SenderCertificate;

/// Decides whether a sender certificate is acceptable at a given time.
///
/// Signature checking against the service trust root lives with whoever
/// deserialized the certificate; validators here see the parsed form.
pub trait CertificateValidator {
    fn validate(&self, certificate: &SenderCertificate, server_timestamp: u64)
        -> Result<(), String>;
}

/// Accepts certificates that name a sender and have not expired.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExpiryValidator;

impl CertificateValidator for ExpiryValidator {
    fn validate(
        &self,
        certificate: &SenderCertificate,
        server_timestamp: u64,
    ) -> Result<(), String> {
        if !certificate.sender.is_valid() {
            return Err("certificate has no sender identifier".into());
        }
        if certificate.expires < server_timestamp {
            return Err(format!(
                "certificate expired at {} (server time {server_timestamp})",
                certificate.expires
            ));
        }
        Ok(())
    }
}
