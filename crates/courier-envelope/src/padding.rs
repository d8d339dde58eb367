//! Transport padding and plaintext-content framing
//!
//! Ratchet payloads are padded with a `0x80` terminator followed by zeros so
//! that the version-prefixed ciphertext body lands on a multiple of the block
//! size. Plaintext-content envelopes (retry receipts and similar) are framed
//! as `0xC0 || body || 0x80` and never padded beyond the terminator.

use courier_core::config::EnvelopeConfig;

use crate::error::{EnvelopeError, EnvelopeResult};

pub const PADDING_TERMINATOR: u8 = 0x80;
pub const PLAINTEXT_CONTENT_MARKER: u8 = 0xC0;

/// Pads outgoing ratchet plaintexts and strips padding from incoming ones.
pub trait PaddingScheme {
    fn pad(&self, message: &[u8]) -> Vec<u8>;

    fn unpad(&self, padded: &[u8]) -> EnvelopeResult<Vec<u8>>;

    /// Length `pad` produces for a message of `len` bytes.
    fn padded_len(&self, len: usize) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPadding {
    block_size: usize,
}

impl Default for TransportPadding {
    fn default() -> Self {
        Self { block_size: 160 }
    }
}

impl TransportPadding {
    /// A zero block size is clamped to one, which degenerates to
    /// terminator-only padding.
    pub fn new(block_size: usize) -> Self {
        Self {
            block_size: block_size.max(1),
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}

impl From<&EnvelopeConfig> for TransportPadding {
    fn from(config: &EnvelopeConfig) -> Self {
        Self::new(config.padding_block_size)
    }
}

impl PaddingScheme for TransportPadding {
    fn padded_len(&self, len: usize) -> usize {
        // One byte for the terminator, one for the session version prefix
        // the ratchet adds after padding.
        let parts = (len + 2).div_ceil(self.block_size);
        parts * self.block_size - 1
    }

    fn pad(&self, message: &[u8]) -> Vec<u8> {
        let mut padded = vec![0u8; self.padded_len(message.len())];
        padded[..message.len()].copy_from_slice(message);
        padded[message.len()] = PADDING_TERMINATOR;
        padded
    }

    fn unpad(&self, padded: &[u8]) -> EnvelopeResult<Vec<u8>> {
        strip_terminator(padded)
    }
}

/// Scan back over zero bytes to the terminator. Anything else is rejected.
fn strip_terminator(padded: &[u8]) -> EnvelopeResult<Vec<u8>> {
    for (i, &b) in padded.iter().enumerate().rev() {
        match b {
            PADDING_TERMINATOR => return Ok(padded[..i].to_vec()),
            0 => continue,
            _ => break,
        }
    }
    Err(EnvelopeError::MalformedPadding {
        sender: None,
        device: 0,
    })
}

/// Frame a body as plaintext content.
pub fn frame_plaintext(body: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(body.len() + 2);
    framed.push(PLAINTEXT_CONTENT_MARKER);
    framed.extend_from_slice(body);
    framed.push(PADDING_TERMINATOR);
    framed
}

/// Strip plaintext-content framing, returning the inner body.
pub fn unframe_plaintext(framed: &[u8]) -> EnvelopeResult<Vec<u8>> {
    match framed.split_first() {
        Some((&PLAINTEXT_CONTENT_MARKER, rest)) => strip_terminator(rest),
        _ => Err(EnvelopeError::InvalidMetadata(
            "plaintext content missing marker byte".into(),
        )),
    }
}
