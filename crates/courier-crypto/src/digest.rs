//! Digesting writer: SHA-256 over exactly the bytes forwarded to the sink

use std::io::{self, Write};

use sha2::{Digest, Sha256};

use crate::error::CipherError;
use crate::DIGEST_SIZE;

/// Forwards writes to `inner` while hashing every byte the sink accepted.
///
/// `flush` only flushes the sink. The digest is produced by `finalize`,
/// which may be called any number of times; once it has been called,
/// further writes fail with [`CipherError::StreamFinalized`].
pub struct DigestingWriter<W> {
    inner: W,
    hasher: Sha256,
    digest: Option<[u8; DIGEST_SIZE]>,
    bytes_written: u64,
}

impl<W: Write> DigestingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            digest: None,
            bytes_written: 0,
        }
    }

    /// Close the hash and return the digest of everything written so far.
    pub fn finalize(&mut self) -> [u8; DIGEST_SIZE] {
        if let Some(digest) = self.digest {
            return digest;
        }
        let digest: [u8; DIGEST_SIZE] = std::mem::take(&mut self.hasher).finalize().into();
        self.digest = Some(digest);
        digest
    }

    /// The digest, if `finalize` has been called.
    pub fn transmitted_digest(&self) -> Option<[u8; DIGEST_SIZE]> {
        self.digest
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for DigestingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.digest.is_some() {
            return Err(CipherError::StreamFinalized.into());
        }
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that accepts at most `limit` bytes per call.
    struct Trickle {
        out: Vec<u8>,
        limit: usize,
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_digest_matches_sha256_of_forwarded_bytes() {
        let mut writer = DigestingWriter::new(Vec::new());
        writer.write_all(b"hello ").unwrap();
        writer.write_all(b"world").unwrap();
        let digest = writer.finalize();

        assert_eq!(digest, <[u8; 32]>::from(Sha256::digest(b"hello world")));
        assert_eq!(writer.bytes_written(), 11);
        assert_eq!(writer.into_inner(), b"hello world");
    }

    #[test]
    fn test_partial_writes_hash_only_accepted_bytes() {
        let mut writer = DigestingWriter::new(Trickle {
            out: Vec::new(),
            limit: 3,
        });
        let n = writer.write(b"abcdefgh").unwrap();
        assert_eq!(n, 3);
        writer.write_all(b"defgh").unwrap();

        let digest = writer.finalize();
        assert_eq!(digest, <[u8; 32]>::from(Sha256::digest(b"abcdefgh")));
        assert_eq!(writer.get_ref().out, b"abcdefgh");
    }

    #[test]
    fn test_flush_does_not_finalize() {
        let mut writer = DigestingWriter::new(Vec::new());
        writer.write_all(b"one").unwrap();
        writer.flush().unwrap();
        assert!(writer.transmitted_digest().is_none());

        writer.write_all(b"two").unwrap();
        let digest = writer.finalize();
        assert_eq!(digest, <[u8; 32]>::from(Sha256::digest(b"onetwo")));
    }

    #[test]
    fn test_finalize_idempotent_and_blocks_writes() {
        let mut writer = DigestingWriter::new(Vec::new());
        writer.write_all(b"data").unwrap();
        let first = writer.finalize();
        let second = writer.finalize();
        assert_eq!(first, second);
        assert_eq!(writer.transmitted_digest(), Some(first));

        let err = writer.write(b"late").unwrap_err();
        assert!(matches!(
            CipherError::from_io(&err),
            Some(CipherError::StreamFinalized)
        ));
        assert_eq!(writer.get_ref().as_slice(), b"data");
    }

    #[test]
    fn test_empty_stream_digest() {
        let mut writer = DigestingWriter::new(Vec::new());
        assert_eq!(writer.finalize(), <[u8; 32]>::from(Sha256::digest(b"")));
    }
}
