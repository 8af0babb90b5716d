//! Block codec: RSA-OAEP applied independently to each 128-byte plaintext block

use std::path::Path;
use std::sync::Arc;

use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};
use crate::stream::{BlockDecryptor, BlockEncryptor};
use crate::{OAEP_LABEL, OAEP_OVERHEAD, PLAINTEXT_BLOCK_SIZE};

/// The client's static RSA key pair. Never leaves the client.
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        let public = private.to_public_key();
        Self { private, public }
    }

    /// Parse a PEM private key, PKCS#1 (`RSA PRIVATE KEY`) or PKCS#8 (`PRIVATE KEY`).
    pub fn from_pem(pem: &str) -> CryptoResult<Self> {
        let private = match RsaPrivateKey::from_pkcs1_pem(pem) {
            Ok(key) => key,
            Err(pkcs1_err) => RsaPrivateKey::from_pkcs8_pem(pem).map_err(|pkcs8_err| {
                CryptoError::Key(format!(
                    "not a PKCS#1 ({pkcs1_err}) or PKCS#8 ({pkcs8_err}) RSA private key"
                ))
            })?,
        };
        Ok(Self::from_private_key(private))
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let pem = Zeroizing::new(std::fs::read_to_string(path).map_err(|source| {
            CryptoError::Io {
                path: path.to_path_buf(),
                source,
            }
        })?);
        let key = Self::from_pem(&pem)?;
        tracing::debug!(
            path = %path.display(),
            modulus_bytes = key.modulus_size(),
            "loaded private key"
        );
        Ok(key)
    }

    pub fn generate(bits: usize) -> CryptoResult<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| CryptoError::Key(format!("generating {bits}-bit key: {e}")))?;
        Ok(Self::from_private_key(private))
    }

    /// PKCS#1 PEM encoding of the private key
    pub fn to_pem(&self) -> CryptoResult<Zeroizing<String>> {
        self.private
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Key(format!("encoding key: {e}")))
    }

    /// Modulus size in bytes; also the cipher block size.
    pub fn modulus_size(&self) -> usize {
        self.public.size()
    }

    fn check_capacity(&self) -> CryptoResult<()> {
        let required = PLAINTEXT_BLOCK_SIZE + OAEP_OVERHEAD;
        let modulus = self.modulus_size();
        if modulus < required {
            return Err(CryptoError::KeyTooSmall {
                modulus,
                block: PLAINTEXT_BLOCK_SIZE,
                required,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("modulus_bytes", &self.modulus_size())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

fn padding() -> Oaep {
    Oaep::new_with_label::<Sha256, _>(OAEP_LABEL)
}

/// Block-wise encryption of arbitrary-length payloads.
///
/// Without a key the codec is the identity, which is how the server side
/// passes ciphertext through untouched. Cloning is cheap.
#[derive(Clone, Debug, Default)]
pub struct Codec {
    key: Option<Arc<KeyPair>>,
}

impl Codec {
    pub fn new(key: KeyPair) -> Self {
        Self {
            key: Some(Arc::new(key)),
        }
    }

    pub fn identity() -> Self {
        Self { key: None }
    }

    pub fn is_identity(&self) -> bool {
        self.key.is_none()
    }

    /// Cipher block size in bytes, `None` for the identity codec.
    pub fn cipher_block_size(&self) -> Option<usize> {
        self.key.as_deref().map(KeyPair::modulus_size)
    }

    /// Ciphertext length produced for `plaintext_len` bytes of input.
    pub fn ciphertext_len(&self, plaintext_len: u64) -> u64 {
        match self.cipher_block_size() {
            Some(block) => plaintext_len.div_ceil(PLAINTEXT_BLOCK_SIZE as u64) * block as u64,
            None => plaintext_len,
        }
    }

    /// Seal every 128-byte block of `plaintext` (the last may be shorter).
    ///
    /// Output length is `ceil(len / 128) * modulus_size`. OAEP is randomized,
    /// so equal inputs give different ciphertexts.
    pub fn encrypt(&self, plaintext: &[u8]) -> CryptoResult<Vec<u8>> {
        let Some(key) = self.key.as_deref() else {
            return Ok(plaintext.to_vec());
        };
        key.check_capacity()?;

        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(
            plaintext.len().div_ceil(PLAINTEXT_BLOCK_SIZE) * key.modulus_size(),
        );
        for (index, block) in plaintext.chunks(PLAINTEXT_BLOCK_SIZE).enumerate() {
            let sealed = key
                .public
                .encrypt(&mut rng, padding(), block)
                .map_err(|source| CryptoError::Encrypt { index, source })?;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }

    /// Open every cipher block of `ciphertext`. Fails as a whole if any block
    /// fails; no partial plaintext is returned.
    pub fn decrypt(&self, ciphertext: &[u8]) -> CryptoResult<Vec<u8>> {
        let Some(key) = self.key.as_deref() else {
            return Ok(ciphertext.to_vec());
        };
        let block_size = key.modulus_size();
        if ciphertext.len() % block_size != 0 {
            return Err(CryptoError::MalformedCiphertext {
                len: ciphertext.len(),
                block_size,
            });
        }

        let mut out = Vec::with_capacity(ciphertext.len() / block_size * PLAINTEXT_BLOCK_SIZE);
        for (index, block) in ciphertext.chunks(block_size).enumerate() {
            let opened = Zeroizing::new(
                key.private
                    .decrypt(padding(), block)
                    .map_err(|source| CryptoError::Decrypt { index, source })?,
            );
            out.extend_from_slice(&opened);
        }
        Ok(out)
    }

    pub fn encryptor(&self) -> BlockEncryptor {
        BlockEncryptor::new(self.clone())
    }

    pub fn decryptor(&self) -> BlockDecryptor {
        BlockDecryptor::new(self.clone())
    }
}
