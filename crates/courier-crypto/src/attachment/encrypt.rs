//! Attachment upload path: `IV || AES-256-CBC-PKCS7 || HMAC-SHA256`

use std::io::{self, Write};

use aes::cipher::{BlockEncryptMut, KeyIvInit};
use aes::Aes256;
use hmac::Mac;
use rand::RngCore;

use crate::attachment::incremental::{IncrementalDigest, IncrementalMacWriter};
use crate::digest::DigestingWriter;
use crate::error::{CipherError, CipherResult};
use crate::kdf::{new_mac, HmacSha256};
use crate::keys::CombinedKeyMaterial;
use crate::{BLOCK_SIZE, DIGEST_SIZE, IV_SIZE, MAC_SIZE};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;

/// Metadata the uploader publishes alongside the ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedAttachment {
    /// SHA-256 of the complete encrypted stream.
    pub digest: [u8; DIGEST_SIZE],
    pub incremental: Option<IncrementalDigest>,
    pub ciphertext_len: u64,
}

/// Encrypted stream length for `plaintext_len` input bytes.
pub fn ciphertext_len(plaintext_len: u64) -> u64 {
    let body = (plaintext_len / BLOCK_SIZE as u64 + 1) * BLOCK_SIZE as u64;
    IV_SIZE as u64 + body + MAC_SIZE as u64
}

/// Sink below the digest layer: plain, or recording incremental MACs.
enum MacSink<W> {
    Plain(W),
    Incremental(IncrementalMacWriter<W>),
}

impl<W: Write> Write for MacSink<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MacSink::Plain(w) => w.write(buf),
            MacSink::Incremental(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MacSink::Plain(w) => w.flush(),
            MacSink::Incremental(w) => w.flush(),
        }
    }
}

/// Streaming attachment encryptor.
///
/// Plaintext written here is encrypted block by block; `flush` pushes the
/// completed blocks to the sink but never closes the stream. `finish`
/// applies PKCS#7 padding, appends the MAC and returns the digests.
pub struct AttachmentWriter<W: Write> {
    out: DigestingWriter<MacSink<W>>,
    encryptor: Aes256CbcEnc,
    mac: HmacSha256,
    pending: Vec<u8>,
}

impl<W: Write> AttachmentWriter<W> {
    /// Start a stream with a fresh random IV.
    pub fn new(
        inner: W,
        key: &CombinedKeyMaterial,
        incremental_chunk_size: Option<usize>,
    ) -> CipherResult<Self> {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        Self::with_iv(inner, key, iv, incremental_chunk_size)
    }

    /// Start a stream with a caller-chosen IV.
    pub fn with_iv(
        inner: W,
        key: &CombinedKeyMaterial,
        iv: [u8; IV_SIZE],
        incremental_chunk_size: Option<usize>,
    ) -> CipherResult<Self> {
        let sink = match incremental_chunk_size {
            Some(chunk_size) => MacSink::Incremental(IncrementalMacWriter::new(
                inner,
                key.mac_key(),
                chunk_size,
            )?),
            None => MacSink::Plain(inner),
        };
        let encryptor = Aes256CbcEnc::new_from_slices(key.aes_key(), &iv).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: 32,
                actual: key.aes_key().len(),
            }
        })?;

        let mut writer = Self {
            out: DigestingWriter::new(sink),
            encryptor,
            mac: new_mac(key.mac_key())?,
            pending: Vec::with_capacity(BLOCK_SIZE),
        };
        writer.emit(&iv)?;
        Ok(writer)
    }

    /// Send ciphertext bytes to the sink and the MAC.
    fn emit(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.mac.update(bytes);
        Ok(())
    }

    fn encrypt_blocks(&mut self, data: &mut [u8]) {
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.encryptor
                .encrypt_block_mut(aes::Block::from_mut_slice(block));
        }
    }

    /// Pad, append the MAC and return the sink with the upload metadata.
    pub fn finish(mut self) -> CipherResult<(W, EncryptedAttachment)> {
        let pad = BLOCK_SIZE - self.pending.len();
        let mut last = std::mem::take(&mut self.pending);
        last.resize(BLOCK_SIZE, pad as u8);
        self.encrypt_blocks(&mut last);
        self.emit(&last)?;

        let tag = self.mac.clone().finalize().into_bytes();
        self.out.write_all(&tag)?;
        self.out.flush()?;

        let digest = self.out.finalize();
        let ciphertext_len = self.out.bytes_written();
        let (inner, incremental) = match self.out.into_inner() {
            MacSink::Plain(w) => (w, None),
            MacSink::Incremental(w) => {
                let (w, digest) = w.finish();
                (w, Some(digest))
            }
        };

        tracing::debug!(
            ciphertext_len,
            incremental = incremental.is_some(),
            "attachment encrypted"
        );
        Ok((
            inner,
            EncryptedAttachment {
                digest,
                incremental,
                ciphertext_len,
            },
        ))
    }
}

impl<W: Write> Write for AttachmentWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = buf;
        if !self.pending.is_empty() {
            let take = (BLOCK_SIZE - self.pending.len()).min(input.len());
            self.pending.extend_from_slice(&input[..take]);
            input = &input[take..];
            if self.pending.len() < BLOCK_SIZE {
                return Ok(buf.len());
            }
            let mut block = std::mem::take(&mut self.pending);
            self.encrypt_blocks(&mut block);
            self.emit(&block)?;
        }

        let whole = input.len() - input.len() % BLOCK_SIZE;
        if whole > 0 {
            let mut blocks = input[..whole].to_vec();
            self.encrypt_blocks(&mut blocks);
            self.emit(&blocks)?;
        }
        self.pending.extend_from_slice(&input[whole..]);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Encrypt an in-memory attachment with a random IV.
pub fn encrypt_attachment(
    plaintext: &[u8],
    key: &CombinedKeyMaterial,
    incremental_chunk_size: Option<usize>,
) -> CipherResult<(Vec<u8>, EncryptedAttachment)> {
    let capacity = ciphertext_len(plaintext.len() as u64) as usize;
    let mut writer =
        AttachmentWriter::new(Vec::with_capacity(capacity), key, incremental_chunk_size)?;
    writer.write_all(plaintext)?;
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha2::{Digest, Sha256};

    fn test_key() -> CombinedKeyMaterial {
        CombinedKeyMaterial::from_bytes([0x33; 64])
    }

    #[test]
    fn test_layout_and_length() {
        for len in [0usize, 1, 15, 16, 17, 1000] {
            let (blob, meta) = encrypt_attachment(&vec![9u8; len], &test_key(), None).unwrap();
            assert_eq!(blob.len() as u64, ciphertext_len(len as u64), "len {len}");
            assert_eq!(meta.ciphertext_len, blob.len() as u64);
            assert_eq!((blob.len() - IV_SIZE - MAC_SIZE) % BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn test_mac_and_digest_cover_expected_bytes() {
        let key = test_key();
        let (blob, meta) = encrypt_attachment(b"attachment body", &key, None).unwrap();

        let mac_offset = blob.len() - MAC_SIZE;
        let mut mac = new_mac(key.mac_key()).unwrap();
        mac.update(&blob[..mac_offset]);
        assert_eq!(&blob[mac_offset..], mac.finalize().into_bytes().as_slice());

        assert_eq!(meta.digest, <[u8; 32]>::from(Sha256::digest(&blob)));
        assert!(meta.incremental.is_none());
    }

    #[test]
    fn test_write_slicing_is_irrelevant() {
        let key = test_key();
        let plaintext: Vec<u8> = (0..777u32).map(|i| (i * 7) as u8).collect();
        let iv = [4u8; IV_SIZE];

        let mut whole = AttachmentWriter::with_iv(Vec::new(), &key, iv, None).unwrap();
        whole.write_all(&plaintext).unwrap();
        let (expected, _) = whole.finish().unwrap();

        let mut sliced = AttachmentWriter::with_iv(Vec::new(), &key, iv, None).unwrap();
        for piece in plaintext.chunks(5) {
            sliced.write_all(piece).unwrap();
            sliced.flush().unwrap();
        }
        let (actual, _) = sliced.finish().unwrap();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_incremental_digest_covers_whole_stream() {
        let (blob, meta) = encrypt_attachment(&[1u8; 5000], &test_key(), Some(1024)).unwrap();
        let incremental = meta.incremental.unwrap();
        assert_eq!(incremental.chunk_size, 1024);
        assert_eq!(
            incremental.entries() as u64,
            IncrementalDigest::expected_entries(1024, blob.len() as u64)
        );
    }

    #[test]
    fn test_random_iv_differs() {
        let (a, _) = encrypt_attachment(b"same", &test_key(), None).unwrap();
        let (b, _) = encrypt_attachment(b"same", &test_key(), None).unwrap();
        assert_ne!(a[..IV_SIZE], b[..IV_SIZE]);
    }
}
