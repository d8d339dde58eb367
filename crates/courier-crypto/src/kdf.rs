//! Derivation primitives: HMAC-SHA256 and HKDF-SHA256 with domain labels

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{CipherError, CipherResult};
use crate::MAC_SIZE;

pub(crate) type HmacSha256 = Hmac<Sha256>;

/// Build an HMAC-SHA256 instance keyed with `key`.
pub(crate) fn new_mac(key: &[u8]) -> CipherResult<HmacSha256> {
    HmacSha256::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength {
        expected: MAC_SIZE,
        actual: key.len(),
    })
}

/// One-shot HMAC-SHA256 of `data` under `key`.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> CipherResult<[u8; MAC_SIZE]> {
    let mut mac = new_mac(key)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HKDF-SHA256 expansion without salt.
///
/// `N` must not exceed 255 * 32 bytes; longer outputs are reported as an
/// invalid key length.
pub fn hkdf_sha256<const N: usize>(ikm: &[u8], info: &[u8]) -> CipherResult<[u8; N]> {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; N];
    hkdf.expand(info, &mut okm)
        .map_err(|_| CipherError::InvalidKeyLength {
            expected: 255 * MAC_SIZE,
            actual: N,
        })?;
    Ok(okm)
}
