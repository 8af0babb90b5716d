//! lockbox-crypto: the client-side codec for lockbox
//!
//! Every confidential payload is encrypted under a single static RSA key pair
//! that only the client holds. Payloads of any length are split into 128-byte
//! plaintext blocks; each block is sealed independently with RSA-OAEP
//! (SHA-256, fixed application label) into one cipher block the size of the
//! key modulus:
//!
//! ```text
//! plaintext  |  128  |  128  |  128  | 57 |
//!                |       |       |      |
//!             RSA-OAEP per block (public key)
//!                v       v       v      v
//! ciphertext |  256  |  256  |  256  | 256 |      (2048-bit key)
//! ```
//!
//! A codec without a key is the identity. That is how the server handles
//! ciphertext as opaque bytes without ever being able to read it.
//!
//! [`BlockEncryptor`] and [`BlockDecryptor`] are the streaming forms: they
//! buffer partial blocks across calls so transport chunk boundaries never
//! need to line up with cipher blocks.

pub mod codec;
pub mod error;
pub mod stream;

pub use codec::{Codec, KeyPair};
pub use error::{CryptoError, CryptoResult};
pub use stream::{BlockDecryptor, BlockEncryptor};

/// Plaintext bytes consumed per encryption call
pub const PLAINTEXT_BLOCK_SIZE: usize = 128;

/// OAEP label bound into every cipher block
pub const OAEP_LABEL: &str = "lockbox/block/v1";

/// OAEP-SHA256 padding overhead: 2 * digest length + 2
pub const OAEP_OVERHEAD: usize = 2 * 32 + 2;
