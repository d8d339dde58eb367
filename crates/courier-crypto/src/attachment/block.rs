//! Incremental AES-256-CBC decryption with deferred PKCS#7 unpadding
//!
//! Ciphertext arrives in arbitrary slices. Whole blocks are decrypted as soon
//! as they are complete, but the most recent plaintext block is held back
//! until more ciphertext proves it is not the padded final block.

use aes::cipher::{BlockDecryptMut, KeyIvInit};
use aes::Aes256;
use zeroize::Zeroize;

use crate::error::{CipherError, CipherResult};
use crate::{BLOCK_SIZE, IV_SIZE};

type Aes256CbcDec = cbc::Decryptor<Aes256>;

pub(crate) struct BlockDecryptState {
    decryptor: Aes256CbcDec,
    /// Ciphertext bytes short of a full block.
    pending: Vec<u8>,
    /// Last decrypted block, released once a successor arrives.
    held: Option<[u8; BLOCK_SIZE]>,
    /// Plaintext ready for the caller.
    ready: Vec<u8>,
    ready_pos: usize,
    consumed: u64,
    total: u64,
    finished: bool,
}

impl BlockDecryptState {
    /// `total` is the CBC body length (IV and MAC excluded).
    pub(crate) fn new(aes_key: &[u8], iv: &[u8; IV_SIZE], total: u64) -> CipherResult<Self> {
        if total == 0 || total % BLOCK_SIZE as u64 != 0 {
            return Err(CipherError::Malformed(format!(
                "CBC body of {total} bytes is not a positive multiple of {BLOCK_SIZE}"
            )));
        }
        let decryptor = Aes256CbcDec::new_from_slices(aes_key, iv).map_err(|_| {
            CipherError::InvalidKeyLength {
                expected: 32,
                actual: aes_key.len(),
            }
        })?;
        Ok(Self {
            decryptor,
            pending: Vec::with_capacity(BLOCK_SIZE),
            held: None,
            ready: Vec::new(),
            ready_pos: 0,
            consumed: 0,
            total,
            finished: false,
        })
    }

    /// Decrypt the next slice of CBC body bytes.
    pub(crate) fn feed(&mut self, mut ciphertext: &[u8]) -> CipherResult<()> {
        if self.consumed + ciphertext.len() as u64 > self.total {
            return Err(CipherError::Malformed(
                "ciphertext exceeds declared length".into(),
            ));
        }
        self.consumed += ciphertext.len() as u64;

        if !self.pending.is_empty() {
            let need = BLOCK_SIZE - self.pending.len();
            let take = need.min(ciphertext.len());
            self.pending.extend_from_slice(&ciphertext[..take]);
            ciphertext = &ciphertext[take..];
            if self.pending.len() == BLOCK_SIZE {
                let mut block = [0u8; BLOCK_SIZE];
                block.copy_from_slice(&self.pending);
                self.pending.clear();
                self.decrypt_block(block);
            }
        }

        let mut blocks = ciphertext.chunks_exact(BLOCK_SIZE);
        for chunk in &mut blocks {
            let mut block = [0u8; BLOCK_SIZE];
            block.copy_from_slice(chunk);
            self.decrypt_block(block);
        }
        self.pending.extend_from_slice(blocks.remainder());

        if self.consumed == self.total {
            self.finish()?;
        }
        Ok(())
    }

    fn decrypt_block(&mut self, mut block: [u8; BLOCK_SIZE]) {
        self.decryptor
            .decrypt_block_mut(aes::Block::from_mut_slice(&mut block));
        if let Some(mut previous) = self.held.replace(block) {
            self.ready.extend_from_slice(&previous);
            previous.zeroize();
        }
    }

    fn finish(&mut self) -> CipherResult<()> {
        let Some(mut last) = self.held.take() else {
            return Err(CipherError::Malformed("empty CBC body".into()));
        };
        let pad = last[BLOCK_SIZE - 1] as usize;
        let valid = (1..=BLOCK_SIZE).contains(&pad)
            && last[BLOCK_SIZE - pad..].iter().all(|&b| b as usize == pad);
        if !valid {
            last.zeroize();
            return Err(CipherError::Malformed("invalid PKCS#7 padding".into()));
        }
        self.ready.extend_from_slice(&last[..BLOCK_SIZE - pad]);
        last.zeroize();
        self.finished = true;
        Ok(())
    }

    pub(crate) fn has_output(&self) -> bool {
        self.ready_pos < self.ready.len()
    }

    /// Copy ready plaintext into `out`, returning the byte count.
    pub(crate) fn drain(&mut self, out: &mut [u8]) -> usize {
        let available = &self.ready[self.ready_pos..];
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.ready_pos += n;
        if self.ready_pos == self.ready.len() {
            self.ready.zeroize();
            self.ready.clear();
            self.ready_pos = 0;
        }
        n
    }

    /// Drop ready plaintext without handing it out.
    pub(crate) fn discard(&mut self) {
        self.ready.zeroize();
        self.ready.clear();
        self.ready_pos = 0;
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for BlockDecryptState {
    fn drop(&mut self) {
        self.ready.zeroize();
        if let Some(held) = self.held.as_mut() {
            held.zeroize();
        }
    }
}
