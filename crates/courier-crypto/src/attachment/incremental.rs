//! Incremental MAC: per-chunk checkpoints of a running HMAC over the
//! encrypted stream
//!
//! The stream (IV, CBC body and trailing MAC) is cut into fixed-size chunks;
//! the last chunk may be short. A single HMAC-SHA256 keyed with the
//! attachment's MAC key runs over the whole stream, and its value is
//! captured at every chunk boundary:
//!
//! ```text
//! stream:  |---- chunk 0 ----|---- chunk 1 ----|-- chunk 2 --|
//! digest:  HMAC(c0)  ||  HMAC(c0 c1)  ||  HMAC(c0 c1 c2)
//! ```
//!
//! A reader can therefore release each chunk's plaintext as soon as the
//! chunk is verified, long before the whole-stream MAC is known.

use std::io::{self, Write};

use hmac::Mac;
use subtle::ConstantTimeEq;

use courier_core::config::{AttachmentConfig, MAX_INCREMENTAL_CHUNK_SIZE};

use crate::error::{CipherError, CipherResult};
use crate::kdf::{new_mac, HmacSha256};
use crate::MAC_SIZE;

/// Chunk size plus the concatenated per-chunk MACs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncrementalDigest {
    pub chunk_size: usize,
    pub digest: Vec<u8>,
}

impl IncrementalDigest {
    /// Number of MAC entries a stream of `stream_len` bytes requires.
    pub fn expected_entries(chunk_size: usize, stream_len: u64) -> u64 {
        stream_len.div_ceil(chunk_size as u64)
    }

    pub fn entries(&self) -> usize {
        self.digest.len() / MAC_SIZE
    }
}

/// Picks the incremental MAC chunk size for a stream.
#[derive(Debug, Clone, Copy)]
pub struct ChunkSizePolicy {
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub target_digest_size: usize,
}

impl Default for ChunkSizePolicy {
    fn default() -> Self {
        Self::from(&AttachmentConfig::default())
    }
}

impl From<&AttachmentConfig> for ChunkSizePolicy {
    fn from(config: &AttachmentConfig) -> Self {
        Self {
            min_chunk_size: config.min_chunk_size,
            max_chunk_size: config.max_chunk_size,
            target_digest_size: config.target_digest_size,
        }
    }
}

impl ChunkSizePolicy {
    /// Smallest chunk size that keeps the digest near the target size,
    /// clamped to `[min_chunk_size, max_chunk_size]`.
    ///
    /// An inverted policy resolves to `max_chunk_size`. The result never
    /// exceeds [`MAX_INCREMENTAL_CHUNK_SIZE`] and is never zero.
    pub fn chunk_size_for(&self, stream_len: u64) -> usize {
        let target_entries = (self.target_digest_size / MAC_SIZE).max(1) as u64;
        let wanted = stream_len.div_ceil(target_entries);
        let clamped = wanted
            .max(self.min_chunk_size as u64)
            .min(self.max_chunk_size as u64)
            .min(MAX_INCREMENTAL_CHUNK_SIZE as u64);
        (clamped as usize).max(1)
    }
}

/// Write adapter that records the incremental digest of everything passing
/// through it.
pub struct IncrementalMacWriter<W> {
    inner: W,
    mac: HmacSha256,
    chunk_size: usize,
    in_chunk: usize,
    digest: Vec<u8>,
}

impl<W: Write> IncrementalMacWriter<W> {
    pub fn new(inner: W, mac_key: &[u8], chunk_size: usize) -> CipherResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_INCREMENTAL_CHUNK_SIZE {
            return Err(CipherError::Malformed(format!(
                "incremental chunk size {chunk_size} outside 1..={MAX_INCREMENTAL_CHUNK_SIZE}"
            )));
        }
        Ok(Self {
            inner,
            mac: new_mac(mac_key)?,
            chunk_size,
            in_chunk: 0,
            digest: Vec::new(),
        })
    }

    fn absorb(&mut self, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let take = (self.chunk_size - self.in_chunk).min(bytes.len());
            self.mac.update(&bytes[..take]);
            self.in_chunk += take;
            bytes = &bytes[take..];
            if self.in_chunk == self.chunk_size {
                self.checkpoint();
            }
        }
    }

    fn checkpoint(&mut self) {
        self.digest
            .extend_from_slice(&self.mac.clone().finalize().into_bytes());
        self.in_chunk = 0;
    }

    /// Close the trailing partial chunk and return the sink and digest.
    pub fn finish(mut self) -> (W, IncrementalDigest) {
        if self.in_chunk > 0 {
            self.checkpoint();
        }
        let digest = IncrementalDigest {
            chunk_size: self.chunk_size,
            digest: std::mem::take(&mut self.digest),
        };
        (self.inner, digest)
    }
}

impl<W: Write> Write for IncrementalMacWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.absorb(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Checks chunks of a received stream against an incremental digest.
pub(crate) struct IncrementalMacVerifier {
    mac: HmacSha256,
    expected: IncrementalDigest,
    next_index: u64,
}

impl IncrementalMacVerifier {
    /// Fails up front when the digest cannot cover `stream_len` bytes or
    /// names a chunk size no reader should buffer.
    pub(crate) fn new(
        mac_key: &[u8],
        expected: IncrementalDigest,
        stream_len: u64,
    ) -> CipherResult<Self> {
        if expected.chunk_size == 0 {
            return Err(CipherError::IncrementalDigestMismatch(
                "chunk size is zero".into(),
            ));
        }
        if expected.chunk_size > MAX_INCREMENTAL_CHUNK_SIZE {
            tracing::warn!(
                chunk_size = expected.chunk_size,
                "incremental chunk size above reader limit"
            );
            return Err(CipherError::IncrementalDigestMismatch(format!(
                "chunk size {} exceeds {MAX_INCREMENTAL_CHUNK_SIZE}",
                expected.chunk_size
            )));
        }
        let entries = IncrementalDigest::expected_entries(expected.chunk_size, stream_len);
        if expected.digest.len() as u64 != entries * MAC_SIZE as u64 {
            return Err(CipherError::IncrementalDigestMismatch(format!(
                "{} digest bytes for {entries} chunks of {} bytes",
                expected.digest.len(),
                expected.chunk_size
            )));
        }
        Ok(Self {
            mac: new_mac(mac_key)?,
            expected,
            next_index: 0,
        })
    }

    pub(crate) fn chunk_size(&self) -> usize {
        self.expected.chunk_size
    }

    /// Verify the next chunk; nothing from it may be used on failure.
    pub(crate) fn verify_chunk(&mut self, chunk: &[u8]) -> CipherResult<()> {
        let index = self.next_index;
        let start = index as usize * MAC_SIZE;
        let Some(expected) = self.expected.digest.get(start..start + MAC_SIZE) else {
            return Err(CipherError::IncrementalDigestMismatch(format!(
                "no MAC entry for chunk {index}"
            )));
        };

        self.mac.update(chunk);
        let computed = self.mac.clone().finalize().into_bytes();
        if !bool::from(computed.as_slice().ct_eq(expected)) {
            tracing::warn!(chunk_index = index, "incremental MAC mismatch");
            return Err(CipherError::ChunkMacMismatch { chunk_index: index });
        }
        self.next_index += 1;
        Ok(())
    }

    /// Every digest entry must have been consumed.
    pub(crate) fn finish(&self) -> CipherResult<()> {
        if self.next_index as usize != self.expected.entries() {
            return Err(CipherError::IncrementalDigestMismatch(format!(
                "verified {} of {} chunks",
                self.next_index,
                self.expected.entries()
            )));
        }
        Ok(())
    }
}
