//! Incremental codec use over a byte stream.
//!
//! Transport chunk sizes are not multiples of the block sizes, so both sides
//! carry the remainder of a partial block into the next call.

use crate::codec::Codec;
use crate::error::{CryptoError, CryptoResult};
use crate::PLAINTEXT_BLOCK_SIZE;

/// Feeds plaintext in arbitrary slices, emits whole cipher blocks.
#[derive(Debug)]
pub struct BlockEncryptor {
    codec: Codec,
    pending: Vec<u8>,
}

impl BlockEncryptor {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            pending: Vec::with_capacity(PLAINTEXT_BLOCK_SIZE),
        }
    }

    /// Encrypt all complete plaintext blocks seen so far. May return empty.
    pub fn update(&mut self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        if self.codec.is_identity() {
            return Ok(input.to_vec());
        }
        self.pending.extend_from_slice(input);
        let whole = self.pending.len() / PLAINTEXT_BLOCK_SIZE * PLAINTEXT_BLOCK_SIZE;
        if whole == 0 {
            return Ok(Vec::new());
        }
        let out = self.codec.encrypt(&self.pending[..whole])?;
        self.pending.drain(..whole);
        Ok(out)
    }

    /// Seal the trailing short block, if any.
    pub fn finish(&mut self) -> CryptoResult<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        if rest.is_empty() {
            return Ok(Vec::new());
        }
        self.codec.encrypt(&rest)
    }
}

/// Feeds ciphertext in arbitrary slices, emits plaintext per whole cipher block.
#[derive(Debug)]
pub struct BlockDecryptor {
    codec: Codec,
    pending: Vec<u8>,
}

impl BlockDecryptor {
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            pending: Vec::new(),
        }
    }

    pub fn update(&mut self, input: &[u8]) -> CryptoResult<Vec<u8>> {
        let Some(block_size) = self.codec.cipher_block_size() else {
            return Ok(input.to_vec());
        };
        self.pending.extend_from_slice(input);
        let whole = self.pending.len() / block_size * block_size;
        if whole == 0 {
            return Ok(Vec::new());
        }
        let out = self.codec.decrypt(&self.pending[..whole])?;
        self.pending.drain(..whole);
        Ok(out)
    }

    /// Errors if the stream ended inside a cipher block.
    pub fn finish(&mut self) -> CryptoResult<Vec<u8>> {
        let rest = std::mem::take(&mut self.pending);
        match self.codec.cipher_block_size() {
            Some(block_size) if !rest.is_empty() => Err(CryptoError::MalformedCiphertext {
                len: rest.len(),
                block_size,
            }),
            _ => Ok(Vec::new()),
        }
    }
}
