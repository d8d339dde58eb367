use std::io;

use thiserror::Error;

pub type CipherResult<T> = Result<T, CipherError>;

/// Failure conditions of every cipher in this crate.
///
/// Malformed input, authentication failure and integrity failure are kept
/// apart so callers can tell "drop it" from "ask for a resend" from "the
/// server handed us corrupted bytes".
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key length: {actual} bytes (expected {expected})")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("malformed input: {0}")]
    Malformed(String),

    /// Too short or failed the AEAD tag check; the two are not distinguished.
    #[error("invalid ciphertext")]
    InvalidCiphertext,

    #[error("authentication failed: MAC or tag mismatch")]
    AuthenticationFailed,

    #[error("integrity check failed: ciphertext digest mismatch")]
    IntegrityFailed,

    #[error("incremental MAC mismatch at chunk {chunk_index}")]
    ChunkMacMismatch { chunk_index: u64 },

    #[error("incremental digest does not cover the stream: {0}")]
    IncrementalDigestMismatch(String),

    #[error("plaintext of {len} bytes exceeds padded length {padded_len}")]
    PlaintextTooLong { len: usize, padded_len: usize },

    #[error("stream already finalized")]
    StreamFinalized,

    #[error("stream aborted by an earlier verification failure")]
    Poisoned,

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl CipherError {
    /// Borrow the cipher error carried inside an `io::Error` returned by one
    /// of this crate's `Read`/`Write` adapters.
    pub fn from_io(err: &io::Error) -> Option<&CipherError> {
        err.get_ref()?.downcast_ref::<CipherError>()
    }

    /// True for failures that mean the bytes were forged or altered.
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            CipherError::AuthenticationFailed
                | CipherError::InvalidCiphertext
                | CipherError::ChunkMacMismatch { .. }
        )
    }
}

impl From<io::Error> for CipherError {
    fn from(err: io::Error) -> Self {
        let wraps_cipher = err
            .get_ref()
            .is_some_and(|inner| inner.is::<CipherError>());
        if !wraps_cipher {
            return CipherError::Io(err);
        }
        match err.into_inner().map(|inner| inner.downcast::<CipherError>()) {
            Some(Ok(cipher)) => *cipher,
            _ => CipherError::Malformed("unrecoverable wrapped stream error".into()),
        }
    }
}

impl From<CipherError> for io::Error {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Io(inner) => inner,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
