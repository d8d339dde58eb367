//! Attachment download path: verified streaming decryption
//!
//! ```text
//! [IV 16][AES-256-CBC body, n × 16][HMAC-SHA256(IV || body) 32]
//! |<-------------------- ciphertext_len ---------------------->|
//! digest = SHA-256 over all of it
//! ```
//!
//! Whole-stream mode makes one full pass over the source to check the MAC
//! and digest, then rewinds and decrypts. Incremental mode verifies each
//! chunk against the sender's incremental digest before decrypting it, and
//! checks the trailing MAC and digest once the last chunk has arrived.

use std::io::{self, Cursor, Read, Seek, SeekFrom};

use hmac::Mac;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use courier_core::config::AttachmentConfig;

use crate::attachment::block::BlockDecryptState;
use crate::attachment::encrypt::EncryptedAttachment;
use crate::attachment::incremental::{IncrementalDigest, IncrementalMacVerifier};
use crate::error::{CipherError, CipherResult};
use crate::kdf::{new_mac, HmacSha256};
use crate::keys::CombinedKeyMaterial;
use crate::{BLOCK_SIZE, DIGEST_SIZE, IV_SIZE, MAC_SIZE};

const DEFAULT_READ_BUFFER: usize = 8 * 1024;

/// What the caller knows about the stream before opening it.
#[derive(Debug, Clone)]
pub struct StreamParams {
    /// Exact encrypted length; nothing past it is read.
    pub ciphertext_len: u64,
    /// Original plaintext length, used to cut off upload padding.
    pub plaintext_len: Option<u64>,
    /// Expected SHA-256 of the encrypted stream.
    pub digest: Option<[u8; DIGEST_SIZE]>,
    /// Sender-supplied incremental digest; selects incremental mode.
    pub incremental: Option<IncrementalDigest>,
    pub read_buffer_size: usize,
}

impl StreamParams {
    pub fn new(ciphertext_len: u64) -> Self {
        Self {
            ciphertext_len,
            plaintext_len: None,
            digest: None,
            incremental: None,
            read_buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Everything the uploader published: length, digest and incremental
    /// digest if one was produced.
    pub fn for_upload(meta: &EncryptedAttachment) -> Self {
        Self {
            digest: Some(meta.digest),
            incremental: meta.incremental.clone(),
            ..Self::new(meta.ciphertext_len)
        }
    }

    pub fn with_digest(mut self, digest: [u8; DIGEST_SIZE]) -> Self {
        self.digest = Some(digest);
        self
    }

    pub fn with_plaintext_len(mut self, len: u64) -> Self {
        self.plaintext_len = Some(len);
        self
    }

    pub fn with_incremental(mut self, incremental: IncrementalDigest) -> Self {
        self.incremental = Some(incremental);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    pub fn with_config(self, config: &AttachmentConfig) -> Self {
        self.with_read_buffer_size(config.read_buffer_size)
    }
}

/// Running checks over the bytes as they are consumed.
struct StreamCheck {
    chunks: Option<IncrementalMacVerifier>,
    mac: HmacSha256,
    hasher: Sha256,
}

/// Decrypting reader over an encrypted attachment.
///
/// Plaintext is only ever handed out from bytes that passed verification:
/// the whole stream in whole-stream mode, the enclosing chunk in
/// incremental mode. Any error poisons the reader; later reads fail with
/// [`CipherError::Poisoned`] until it is rewound.
///
/// `Seek` supports `SeekFrom::Start(0)` only, which restarts decryption.
/// That is enough for one `AttachmentReader` to serve as the source of
/// another (archived attachments).
pub struct AttachmentReader<R> {
    source: R,
    key: CombinedKeyMaterial,
    params: StreamParams,
    check: Option<StreamCheck>,
    iv: Vec<u8>,
    body: Option<BlockDecryptState>,
    trailing_mac: Vec<u8>,
    position: u64,
    emitted: u64,
    buffer: Vec<u8>,
    poisoned: bool,
}

impl<R: Read + Seek> AttachmentReader<R> {
    /// Open a stream. In whole-stream mode this reads the entire source
    /// once and fails unless MAC and digest both match.
    pub fn open(source: R, key: &CombinedKeyMaterial, params: StreamParams) -> CipherResult<Self> {
        validate_layout(params.ciphertext_len)?;

        let mut reader = Self {
            source,
            key: key.clone(),
            buffer: vec![0u8; params.read_buffer_size.max(1)],
            params,
            check: None,
            iv: Vec::with_capacity(IV_SIZE),
            body: None,
            trailing_mac: Vec::with_capacity(MAC_SIZE),
            position: 0,
            emitted: 0,
            poisoned: false,
        };

        if reader.params.incremental.is_none() {
            reader.verify_whole_stream()?;
        }
        reader.restart()?;

        tracing::debug!(
            ciphertext_len = reader.params.ciphertext_len,
            incremental = reader.params.incremental.is_some(),
            "attachment stream opened"
        );
        Ok(reader)
    }

    /// Plaintext bytes handed out so far.
    pub fn plaintext_read(&self) -> u64 {
        self.emitted
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// First pass of whole-stream mode.
    fn verify_whole_stream(&mut self) -> CipherResult<()> {
        self.source.rewind()?;
        let total = self.params.ciphertext_len;
        let mac_offset = total - MAC_SIZE as u64;
        let mut mac = new_mac(self.key.mac_key())?;
        let mut hasher = Sha256::new();
        let mut their_mac = Vec::with_capacity(MAC_SIZE);

        let mut position = 0u64;
        while position < total {
            let want = (total - position).min(self.buffer.len() as u64) as usize;
            let n = read_some(&mut self.source, &mut self.buffer[..want])?;
            if n == 0 {
                return Err(truncated(position, total));
            }
            let bytes = &self.buffer[..n];
            hasher.update(bytes);
            let mac_part = mac_offset.saturating_sub(position).min(n as u64) as usize;
            mac.update(&bytes[..mac_part]);
            their_mac.extend_from_slice(&bytes[mac_part..]);
            position += n as u64;
        }

        if mac.verify_slice(&their_mac).is_err() {
            tracing::warn!(ciphertext_len = total, "attachment MAC mismatch");
            return Err(CipherError::AuthenticationFailed);
        }
        check_digest(self.params.digest.as_ref(), hasher)
    }

    /// Rewind the source and reset all decryption state.
    fn restart(&mut self) -> CipherResult<()> {
        self.source.rewind()?;

        let chunks = match &self.params.incremental {
            Some(expected) => {
                let verifier = IncrementalMacVerifier::new(
                    self.key.mac_key(),
                    expected.clone(),
                    self.params.ciphertext_len,
                )?;
                let needed = (verifier.chunk_size() as u64).min(self.params.ciphertext_len);
                if (self.buffer.len() as u64) < needed {
                    self.buffer.resize(needed as usize, 0);
                }
                Some(verifier)
            }
            None => None,
        };
        self.check = Some(StreamCheck {
            chunks,
            mac: new_mac(self.key.mac_key())?,
            hasher: Sha256::new(),
        });

        self.iv.clear();
        self.body = None;
        self.trailing_mac.clear();
        self.position = 0;
        self.emitted = 0;
        self.poisoned = false;
        Ok(())
    }

    /// Pull the next verified run of bytes from the source and route it.
    fn pull(&mut self) -> CipherResult<()> {
        let mut buffer = std::mem::take(&mut self.buffer);
        let result = self.pull_into(&mut buffer);
        self.buffer = buffer;
        result
    }

    fn pull_into(&mut self, buffer: &mut [u8]) -> CipherResult<()> {
        let total = self.params.ciphertext_len;
        let remaining = total - self.position;
        let mac_offset = total - MAC_SIZE as u64;
        let position = self.position;
        let check = self
            .check
            .as_mut()
            .ok_or_else(|| CipherError::Malformed("stream not initialised".into()))?;

        let n = match check.chunks.as_mut() {
            Some(verifier) => {
                let len = (verifier.chunk_size() as u64).min(remaining) as usize;
                read_full(&mut self.source, &mut buffer[..len], position, total)?;
                verifier.verify_chunk(&buffer[..len])?;
                len
            }
            None => {
                let want = (buffer.len() as u64).min(remaining) as usize;
                let n = read_some(&mut self.source, &mut buffer[..want])?;
                if n == 0 {
                    return Err(truncated(position, total));
                }
                n
            }
        };

        let bytes = &buffer[..n];
        check.hasher.update(bytes);
        let mac_part = mac_offset.saturating_sub(position).min(n as u64) as usize;
        check.mac.update(&bytes[..mac_part]);

        self.route(bytes)?;
        if self.position == total {
            self.finish_stream()?;
        }
        Ok(())
    }

    /// Split consumed bytes into IV, CBC body and trailing MAC.
    fn route(&mut self, mut bytes: &[u8]) -> CipherResult<()> {
        let mac_offset = self.params.ciphertext_len - MAC_SIZE as u64;
        while !bytes.is_empty() {
            let take = if self.position < IV_SIZE as u64 {
                let take = (IV_SIZE - self.iv.len()).min(bytes.len());
                self.iv.extend_from_slice(&bytes[..take]);
                if self.iv.len() == IV_SIZE {
                    let mut iv = [0u8; IV_SIZE];
                    iv.copy_from_slice(&self.iv);
                    self.body = Some(BlockDecryptState::new(
                        self.key.aes_key(),
                        &iv,
                        mac_offset - IV_SIZE as u64,
                    )?);
                }
                take
            } else if self.position < mac_offset {
                let take = (mac_offset - self.position).min(bytes.len() as u64) as usize;
                self.body
                    .as_mut()
                    .ok_or_else(|| CipherError::Malformed("missing IV".into()))?
                    .feed(&bytes[..take])?;
                take
            } else {
                self.trailing_mac.extend_from_slice(bytes);
                bytes.len()
            };
            self.position += take as u64;
            bytes = &bytes[take..];
        }
        Ok(())
    }

    /// End-of-stream checks, run before the final plaintext is released.
    fn finish_stream(&mut self) -> CipherResult<()> {
        let check = self
            .check
            .take()
            .ok_or_else(|| CipherError::Malformed("stream not initialised".into()))?;

        if let Some(verifier) = &check.chunks {
            verifier.finish()?;
        }
        if check.mac.verify_slice(&self.trailing_mac).is_err() {
            tracing::warn!(
                ciphertext_len = self.params.ciphertext_len,
                "attachment MAC mismatch at end of stream"
            );
            return Err(CipherError::AuthenticationFailed);
        }
        check_digest(self.params.digest.as_ref(), check.hasher)?;

        match &self.body {
            Some(body) if body.is_finished() => {
                tracing::debug!(
                    ciphertext_len = self.params.ciphertext_len,
                    "attachment stream verified"
                );
                Ok(())
            }
            _ => Err(CipherError::Malformed("CBC body incomplete".into())),
        }
    }

    fn read_plaintext(&mut self, out: &mut [u8]) -> CipherResult<usize> {
        if self.poisoned {
            return Err(CipherError::Poisoned);
        }
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let limit = self
                .params
                .plaintext_len
                .map(|len| len.saturating_sub(self.emitted));
            if let Some(body) = self.body.as_mut() {
                if body.has_output() {
                    if limit == Some(0) {
                        // Upload padding; consumed for verification only.
                        body.discard();
                    } else {
                        let max = limit.map_or(out.len(), |l| l.min(out.len() as u64) as usize);
                        let n = body.drain(&mut out[..max]);
                        self.emitted += n as u64;
                        return Ok(n);
                    }
                }
            }

            if self.position == self.params.ciphertext_len {
                if let Some(declared) = self.params.plaintext_len {
                    if self.emitted < declared {
                        return Err(CipherError::Malformed(format!(
                            "declared plaintext length {declared} exceeds decrypted {}",
                            self.emitted
                        )));
                    }
                }
                return Ok(0);
            }
            self.pull()?;
        }
    }
}

impl<R: Read + Seek> Read for AttachmentReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_plaintext(buf).map_err(|e| {
            self.poisoned = true;
            e.into()
        })
    }
}

impl<R: Read + Seek> Seek for AttachmentReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(0) => {
                self.restart()?;
                Ok(0)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "attachment streams only support rewinding to the start",
            )),
        }
    }
}

/// Open a re-wrapped (archived) attachment: the outer layer is verified
/// by MAC alone and its plaintext, cut to the original ciphertext length,
/// feeds a normal reader for the inner layer.
pub fn open_archived<R: Read + Seek>(
    source: R,
    outer_key: &CombinedKeyMaterial,
    outer_ciphertext_len: u64,
    inner_key: &CombinedKeyMaterial,
    inner: StreamParams,
) -> CipherResult<AttachmentReader<AttachmentReader<R>>> {
    let outer_params = StreamParams::new(outer_ciphertext_len)
        .with_plaintext_len(inner.ciphertext_len)
        .with_read_buffer_size(inner.read_buffer_size);
    let outer = AttachmentReader::open(source, outer_key, outer_params)?;
    AttachmentReader::open(outer, inner_key, inner)
}

/// Decrypt an in-memory attachment.
pub fn decrypt_attachment(
    ciphertext: &[u8],
    key: &CombinedKeyMaterial,
    params: StreamParams,
) -> CipherResult<Vec<u8>> {
    let mut reader = AttachmentReader::open(Cursor::new(ciphertext), key, params)?;
    let mut plaintext = Vec::new();
    reader.read_to_end(&mut plaintext)?;
    Ok(plaintext)
}

/// Decrypt a sticker: key material comes from the pack key, no digest.
pub fn decrypt_sticker(ciphertext: &[u8], pack_key: &[u8]) -> CipherResult<Vec<u8>> {
    let key = CombinedKeyMaterial::from_sticker_pack_key(pack_key)?;
    decrypt_attachment(ciphertext, &key, StreamParams::new(ciphertext.len() as u64))
}

fn validate_layout(ciphertext_len: u64) -> CipherResult<()> {
    let overhead = (IV_SIZE + MAC_SIZE) as u64;
    if ciphertext_len < overhead + BLOCK_SIZE as u64 {
        return Err(CipherError::Malformed(format!(
            "attachment of {ciphertext_len} bytes is shorter than IV, one block and MAC"
        )));
    }
    if (ciphertext_len - overhead) % BLOCK_SIZE as u64 != 0 {
        return Err(CipherError::Malformed(format!(
            "attachment body of {} bytes is not block aligned",
            ciphertext_len - overhead
        )));
    }
    Ok(())
}

fn check_digest(expected: Option<&[u8; DIGEST_SIZE]>, hasher: Sha256) -> CipherResult<()> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let computed = hasher.finalize();
    if !bool::from(computed.as_slice().ct_eq(expected)) {
        tracing::warn!("attachment digest mismatch");
        return Err(CipherError::IntegrityFailed);
    }
    Ok(())
}

fn truncated(position: u64, total: u64) -> CipherError {
    CipherError::Malformed(format!("stream truncated at byte {position} of {total}"))
}

fn read_some<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match source.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

fn read_full<R: Read>(
    source: &mut R,
    buf: &mut [u8],
    position: u64,
    total: u64,
) -> CipherResult<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = read_some(source, &mut buf[filled..])?;
        if n == 0 {
            return Err(truncated(position + filled as u64, total));
        }
        filled += n;
    }
    Ok(())
}
