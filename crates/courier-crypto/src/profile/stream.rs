//! Streaming AES-256-GCM for avatars.
//!
//! Same wire format as the other profile fields (`nonce || ct || tag`), but
//! built from AES-CTR and GHASH so the payload never has to sit in memory.
//! The reader cannot tell ciphertext from tag until the source ends, so it
//! keeps the last 16 bytes back and checks the tag at EOF. Plaintext
//! returned before that final read is provisional: a caller must discard it
//! if the stream ends in an error.

use std::io::{self, Read, Write};

use aes::cipher::{BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes256;
use ghash::universal_hash::UniversalHash;
use ghash::GHash;
use rand::RngCore;
use subtle::ConstantTimeEq;

use crate::error::{CipherError, CipherResult};
use crate::keys::ProfileKey;
use crate::{BLOCK_SIZE, NONCE_SIZE, TAG_SIZE};

type Aes256Ctr32 = ctr::Ctr32BE<Aes256>;

const READ_CHUNK: usize = 8 * 1024;

/// Encrypted size of a `plaintext_len`-byte avatar.
pub fn encrypted_avatar_len(plaintext_len: u64) -> u64 {
    (NONCE_SIZE + TAG_SIZE) as u64 + plaintext_len
}

/// GCM state shared by both directions.
struct GcmCore {
    keystream: Aes256Ctr32,
    ghash: GHash,
    /// Ciphertext not yet forming a full GHASH block.
    partial: Vec<u8>,
    tag_mask: [u8; TAG_SIZE],
    ciphertext_len: u64,
}

impl GcmCore {
    fn new(key: &ProfileKey, nonce: &[u8; NONCE_SIZE]) -> Self {
        let aes = Aes256::new(key.as_bytes().into());

        let mut hash_key = aes::Block::default();
        aes.encrypt_block(&mut hash_key);

        // J0 = nonce || 0x00000001; payload counters start at J0 + 1.
        let mut j0 = [0u8; BLOCK_SIZE];
        j0[..NONCE_SIZE].copy_from_slice(nonce);
        j0[BLOCK_SIZE - 1] = 1;
        let mut tag_mask = aes::Block::from(j0);
        aes.encrypt_block(&mut tag_mask);

        let mut counter = j0;
        counter[BLOCK_SIZE - 1] = 2;

        Self {
            keystream: Aes256Ctr32::new(key.as_bytes().into(), &counter.into()),
            ghash: GHash::new(&hash_key),
            partial: Vec::with_capacity(BLOCK_SIZE),
            tag_mask: tag_mask.into(),
            ciphertext_len: 0,
        }
    }

    fn absorb(&mut self, mut ciphertext: &[u8]) {
        self.ciphertext_len += ciphertext.len() as u64;
        if !self.partial.is_empty() {
            let take = (BLOCK_SIZE - self.partial.len()).min(ciphertext.len());
            self.partial.extend_from_slice(&ciphertext[..take]);
            ciphertext = &ciphertext[take..];
            if self.partial.len() < BLOCK_SIZE {
                return;
            }
            self.ghash
                .update(&[ghash::Block::clone_from_slice(&self.partial)]);
            self.partial.clear();
        }
        let mut blocks = ciphertext.chunks_exact(BLOCK_SIZE);
        for block in &mut blocks {
            self.ghash.update(&[ghash::Block::clone_from_slice(block)]);
        }
        self.partial.extend_from_slice(blocks.remainder());
    }

    fn tag(&self) -> [u8; TAG_SIZE] {
        let mut ghash = self.ghash.clone();
        ghash.update_padded(&self.partial);

        let mut lengths = ghash::Block::default();
        // no associated data: the first eight bytes stay zero
        lengths[8..].copy_from_slice(&(self.ciphertext_len * 8).to_be_bytes());
        ghash.update(&[lengths]);

        let mut tag: [u8; TAG_SIZE] = ghash.finalize().into();
        for (t, m) in tag.iter_mut().zip(self.tag_mask.iter()) {
            *t ^= m;
        }
        tag
    }
}

/// Decrypting reader for `nonce || ct || tag` streams.
pub struct ProfileCipherReader<R> {
    source: R,
    gcm: GcmCore,
    /// Trailing bytes that may still turn out to be the tag.
    window: Vec<u8>,
    scratch: Vec<u8>,
    finished: bool,
    poisoned: bool,
}

impl<R: Read> ProfileCipherReader<R> {
    /// Read the nonce and the first tag-sized window.
    pub fn new(mut source: R, key: &ProfileKey) -> CipherResult<Self> {
        let mut nonce = [0u8; NONCE_SIZE];
        read_exact_or_invalid(&mut source, &mut nonce)?;
        let mut window = vec![0u8; TAG_SIZE];
        read_exact_or_invalid(&mut source, &mut window)?;

        Ok(Self {
            source,
            gcm: GcmCore::new(key, &nonce),
            window,
            scratch: Vec::new(),
            finished: false,
            poisoned: false,
        })
    }

    fn read_plaintext(&mut self, out: &mut [u8]) -> CipherResult<usize> {
        if self.poisoned {
            return Err(CipherError::Poisoned);
        }
        if self.finished || out.is_empty() {
            return Ok(0);
        }

        let want = out.len().min(READ_CHUNK);
        self.scratch.resize(want, 0);
        let n = loop {
            match self.source.read(&mut self.scratch[..want]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other?,
            }
        };

        if n == 0 {
            let expected = self.gcm.tag();
            if !bool::from(expected.ct_eq(self.window.as_slice())) {
                tracing::warn!(
                    ciphertext_len = self.gcm.ciphertext_len,
                    "avatar tag mismatch"
                );
                return Err(CipherError::AuthenticationFailed);
            }
            self.finished = true;
            return Ok(0);
        }

        // The oldest n bytes of window || fresh are now known ciphertext.
        self.window.extend_from_slice(&self.scratch[..n]);
        out[..n].copy_from_slice(&self.window[..n]);
        self.window.drain(..n);

        self.gcm.absorb(&out[..n]);
        self.gcm.keystream.apply_keystream(&mut out[..n]);
        Ok(n)
    }
}

impl<R: Read> Read for ProfileCipherReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_plaintext(buf).map_err(|e| {
            self.poisoned = true;
            e.into()
        })
    }
}

/// Encrypting writer producing `nonce || ct || tag`.
pub struct ProfileCipherWriter<W: Write> {
    sink: W,
    gcm: GcmCore,
    scratch: Vec<u8>,
}

impl<W: Write> ProfileCipherWriter<W> {
    /// Start a stream with a random nonce.
    pub fn new(sink: W, key: &ProfileKey) -> CipherResult<Self> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        Self::with_nonce(sink, key, nonce)
    }

    pub fn with_nonce(
        mut sink: W,
        key: &ProfileKey,
        nonce: [u8; NONCE_SIZE],
    ) -> CipherResult<Self> {
        sink.write_all(&nonce)?;
        Ok(Self {
            sink,
            gcm: GcmCore::new(key, &nonce),
            scratch: Vec::new(),
        })
    }

    /// Append the tag and return the sink.
    pub fn finish(mut self) -> CipherResult<W> {
        let tag = self.gcm.tag();
        self.sink.write_all(&tag)?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for ProfileCipherWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.scratch.clear();
        self.scratch.extend_from_slice(buf);
        self.gcm.keystream.apply_keystream(&mut self.scratch);
        self.sink.write_all(&self.scratch)?;
        self.gcm.absorb(&self.scratch);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

fn read_exact_or_invalid<R: Read>(source: &mut R, buf: &mut [u8]) -> CipherResult<()> {
    source.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => CipherError::InvalidCiphertext,
        _ => CipherError::Io(e),
    })
}
