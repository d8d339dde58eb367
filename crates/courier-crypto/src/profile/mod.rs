//! Profile field encryption: AES-256-GCM over zero-padded plaintext
//!
//! Format: `[12-byte nonce][ciphertext][16-byte tag]`
//!
//! Field values are padded to fixed buckets so the ciphertext length only
//! reveals which bucket the value fell into.

mod stream;

pub use stream::{encrypted_avatar_len, ProfileCipherReader, ProfileCipherWriter};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::{CipherError, CipherResult};
use crate::keys::ProfileKey;
use crate::{NONCE_SIZE, TAG_SIZE};

/// Name buckets (given name, NUL, family name).
pub const NAME_PADDED_LENGTHS: [usize; 2] = [53, 257];
/// About-text buckets.
pub const ABOUT_PADDED_LENGTHS: [usize; 3] = [128, 254, 512];
pub const EMOJI_PADDED_LENGTH: usize = 32;
pub const PAYMENT_ADDRESS_PADDED_LENGTH: usize = 554;

const LENGTH_PREFIX_SIZE: usize = 4;

/// Smallest bucket that fits `len` bytes, or the largest one if none does.
fn pick_bucket(buckets: &[usize], len: usize) -> usize {
    buckets
        .iter()
        .copied()
        .find(|&bucket| len <= bucket)
        .unwrap_or_else(|| buckets.last().copied().unwrap_or(len))
}

/// Padded length for an encoded profile name.
pub fn name_padded_length(encoded_name: &str) -> usize {
    pick_bucket(&NAME_PADDED_LENGTHS, encoded_name.len())
}

/// Padded length for an about text.
pub fn about_padded_length(about: &str) -> usize {
    pick_bucket(&ABOUT_PADDED_LENGTHS, about.len())
}

/// A profile name as stored: given and optional family name joined by NUL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileName {
    pub given: String,
    pub family: Option<String>,
}

impl ProfileName {
    pub fn new(given: impl Into<String>, family: Option<String>) -> Self {
        Self {
            given: given.into(),
            family,
        }
    }

    pub fn encode(&self) -> String {
        match &self.family {
            Some(family) if !family.is_empty() => format!("{}\0{}", self.given, family),
            _ => self.given.clone(),
        }
    }

    pub fn decode(encoded: &str) -> Self {
        match encoded.split_once('\0') {
            Some((given, family)) => Self::new(given, Some(family.to_string())),
            None => Self::new(encoded, None),
        }
    }
}

/// Encrypts and decrypts profile fields under one profile key.
pub struct ProfileCipher {
    key: ProfileKey,
}

impl ProfileCipher {
    pub fn new(key: ProfileKey) -> Self {
        Self { key }
    }

    fn aead(&self) -> Aes256Gcm {
        Aes256Gcm::new(self.key.as_bytes().into())
    }

    /// Zero-pad `input` to `padded_len` and seal it.
    pub fn encrypt(&self, input: &[u8], padded_len: usize) -> CipherResult<Vec<u8>> {
        if input.len() > padded_len {
            return Err(CipherError::PlaintextTooLong {
                len: input.len(),
                padded_len,
            });
        }
        let mut padded = vec![0u8; padded_len];
        padded[..input.len()].copy_from_slice(input);

        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .aead()
            .encrypt(Nonce::from_slice(&nonce), padded.as_ref())
            .map_err(|_| CipherError::InvalidCiphertext);
        padded.zeroize();
        let sealed = sealed?;

        let mut result = Vec::with_capacity(NONCE_SIZE + sealed.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&sealed);
        Ok(result)
    }

    /// Open a field and return the padded plaintext.
    pub fn decrypt(&self, input: &[u8]) -> CipherResult<Vec<u8>> {
        if input.len() < NONCE_SIZE + TAG_SIZE + 1 {
            return Err(CipherError::InvalidCiphertext);
        }
        let (nonce, ciphertext) = input.split_at(NONCE_SIZE);
        self.aead()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::InvalidCiphertext)
    }

    pub fn encrypt_string(&self, value: &str, padded_len: usize) -> CipherResult<Vec<u8>> {
        self.encrypt(value.as_bytes(), padded_len)
    }

    /// Decrypt and strip trailing zero padding.
    pub fn decrypt_string(&self, input: &[u8]) -> CipherResult<String> {
        let mut padded = self.decrypt(input)?;
        let end = padded.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        padded.truncate(end);
        String::from_utf8(padded)
            .map_err(|_| CipherError::Malformed("profile field is not UTF-8".into()))
    }

    pub fn encrypt_name(&self, name: &ProfileName) -> CipherResult<Vec<u8>> {
        let encoded = name.encode();
        self.encrypt_string(&encoded, name_padded_length(&encoded))
    }

    pub fn decrypt_name(&self, input: &[u8]) -> CipherResult<ProfileName> {
        self.decrypt_string(input).map(|s| ProfileName::decode(&s))
    }

    pub fn encrypt_about(&self, about: &str) -> CipherResult<Vec<u8>> {
        self.encrypt_string(about, about_padded_length(about))
    }

    pub fn encrypt_emoji(&self, emoji: &str) -> CipherResult<Vec<u8>> {
        self.encrypt_string(emoji, EMOJI_PADDED_LENGTH)
    }

    /// Seal `[len: i32 LE][input]`, zero-padded to `padded_len`.
    pub fn encrypt_with_length(&self, input: &[u8], padded_len: usize) -> CipherResult<Vec<u8>> {
        let len = i32::try_from(input.len()).map_err(|_| CipherError::PlaintextTooLong {
            len: input.len(),
            padded_len,
        })?;
        let mut framed = Vec::with_capacity(LENGTH_PREFIX_SIZE + input.len());
        framed.extend_from_slice(&len.to_le_bytes());
        framed.extend_from_slice(input);
        let result = self.encrypt(&framed, padded_len);
        framed.zeroize();
        result
    }

    pub fn decrypt_with_length(&self, input: &[u8]) -> CipherResult<Vec<u8>> {
        let padded = self.decrypt(input)?;
        let Some((prefix, content)) = padded.split_first_chunk::<LENGTH_PREFIX_SIZE>() else {
            return Err(CipherError::Malformed("missing length prefix".into()));
        };
        let len = i32::from_le_bytes(*prefix);
        if len < 0 {
            return Err(CipherError::Malformed(format!("negative encoded length {len}")));
        }
        let len = len as usize;
        if len > content.len() {
            return Err(CipherError::Malformed(format!(
                "encoded length {len} exceeds content length {}",
                content.len()
            )));
        }
        Ok(content[..len].to_vec())
    }

    pub fn encrypt_payment_address(&self, address: &[u8]) -> CipherResult<Vec<u8>> {
        self.encrypt_with_length(address, PAYMENT_ADDRESS_PADDED_LENGTH)
    }

    pub fn encrypt_boolean(&self, value: bool) -> CipherResult<Vec<u8>> {
        self.encrypt(&[u8::from(value)], 1)
    }

    /// `None` when the plaintext is not a single 0 or 1 byte.
    pub fn decrypt_boolean(&self, input: &[u8]) -> CipherResult<Option<bool>> {
        let plaintext = self.decrypt(input)?;
        Ok(match plaintext.as_slice() {
            [0] => Some(false),
            [1] => Some(true),
            _ => None,
        })
    }

    /// Streaming decryptor for an encrypted avatar.
    pub fn avatar_reader<R: std::io::Read>(
        &self,
        source: R,
    ) -> CipherResult<ProfileCipherReader<R>> {
        ProfileCipherReader::new(source, &self.key)
    }

    /// Streaming encryptor for an avatar upload.
    pub fn avatar_writer<W: std::io::Write>(
        &self,
        sink: W,
    ) -> CipherResult<ProfileCipherWriter<W>> {
        ProfileCipherWriter::new(sink, &self.key)
    }
}
