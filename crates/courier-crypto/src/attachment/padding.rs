//! Plaintext size buckets for uploaded attachments
//!
//! Uploads are zero-padded to the next power of 1.05 (minimum 541 bytes) so
//! the ciphertext length leaks only a coarse size class.

use std::io::{self, Read, Write};

const MIN_PADDED_SIZE: u64 = 541;
const BUCKET_BASE: f64 = 1.05;

/// Padded plaintext size for an attachment of `len` bytes.
pub fn padded_size(len: u64) -> u64 {
    if len == 0 {
        return MIN_PADDED_SIZE;
    }
    let exponent = ((len as f64).ln() / BUCKET_BASE.ln()).ceil();
    let bucket = BUCKET_BASE.powf(exponent).floor() as u64;
    // Guard against float rounding landing a hair below `len`.
    bucket.max(len).max(MIN_PADDED_SIZE)
}

/// Number of zero bytes to append after `len` bytes of plaintext.
pub fn padding_len(len: u64) -> u64 {
    padded_size(len) - len
}

/// Write the zero padding for a `len`-byte plaintext into `out`.
pub fn write_padding<W: Write>(out: &mut W, len: u64) -> io::Result<u64> {
    io::copy(&mut io::repeat(0).take(padding_len(len)), out)
}
