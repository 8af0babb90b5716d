use std::path::PathBuf;

use lockbox_core::VaultError;
use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(
        "key too small: a {modulus}-byte modulus cannot seal {block}-byte blocks with OAEP-SHA256 (need at least {required} bytes)"
    )]
    KeyTooSmall {
        modulus: usize,
        block: usize,
        required: usize,
    },

    #[error("malformed ciphertext: {len} bytes is not a multiple of the {block_size}-byte cipher block")]
    MalformedCiphertext { len: usize, block_size: usize },

    #[error("encrypting block {index}: {source}")]
    Encrypt {
        index: usize,
        #[source]
        source: rsa::Error,
    },

    #[error("decrypting block {index}: {source}")]
    Decrypt {
        index: usize,
        #[source]
        source: rsa::Error,
    },

    #[error("invalid key: {0}")]
    Key(String),

    #[error("reading key {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<CryptoError> for VaultError {
    fn from(err: CryptoError) -> Self {
        VaultError::Crypto(Box::new(err))
    }
}
