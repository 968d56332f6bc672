//! Symmetric payload cipher for response and request bodies.
//!
//! Envelope wire format:
//!   base64( base64( "Salted__" | salt (8 bytes) | AES-256-CBC ciphertext ) )
//!
//! Key and IV are derived from the shared passphrase and the salt with
//! OpenSSL's `EVP_BytesToKey` (MD5, single iteration), which is what
//! passphrase-mode AES produces on the server side.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const SALT_MAGIC: &[u8] = b"Salted__";
const SALT_LEN: usize = 8;
const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),
}

/// Pure string-to-string transform keyed by a pre-shared passphrase.
/// Clone is cheap enough to hand one to every pipeline.
#[derive(Clone)]
pub struct PayloadCipher {
    secret: Vec<u8>,
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}

impl PayloadCipher {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into().into_bytes(),
        }
    }

    /// Encrypt a string payload verbatim
    pub fn encrypt_str(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Ok(self.seal(plaintext.as_bytes(), salt))
    }

    /// Encrypt any serializable value. Strings are used as-is, everything
    /// else is serialized to compact JSON first.
    pub fn encrypt<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, CipherError> {
        let value = serde_json::to_value(value)
            .map_err(|e| CipherError::Encryption(format!("serialization: {}", e)))?;
        match value {
            Value::String(s) => self.encrypt_str(&s),
            other => {
                let text = serde_json::to_string(&other)
                    .map_err(|e| CipherError::Encryption(format!("serialization: {}", e)))?;
                self.encrypt_str(&text)
            }
        }
    }

    /// Decrypt an envelope to its plaintext string
    pub fn decrypt_str(&self, envelope: &str) -> Result<String, CipherError> {
        let inner = STANDARD
            .decode(envelope.trim())
            .map_err(|e| CipherError::Decryption(format!("outer encoding: {}", e)))?;
        let raw = STANDARD
            .decode(trim_ascii(&inner))
            .map_err(|e| CipherError::Decryption(format!("inner encoding: {}", e)))?;

        if raw.len() < SALT_MAGIC.len() + SALT_LEN || !raw.starts_with(SALT_MAGIC) {
            return Err(CipherError::Decryption("missing salt header".to_string()));
        }
        let (salt, ciphertext) = raw[SALT_MAGIC.len()..].split_at(SALT_LEN);
        let (key, iv) = derive_key_iv(&self.secret, salt);

        let plaintext = Aes256CbcDec::new(&key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| CipherError::Decryption("bad key or corrupted ciphertext".to_string()))?;

        String::from_utf8(plaintext)
            .map_err(|_| CipherError::Decryption("plaintext is not valid UTF-8".to_string()))
    }

    /// Decrypt an envelope and parse the plaintext as JSON, falling back to
    /// the raw decrypted string when it is not JSON.
    pub fn decrypt(&self, envelope: &str) -> Result<Value, CipherError> {
        let plaintext = self.decrypt_str(envelope)?;
        Ok(serde_json::from_str(&plaintext).unwrap_or(Value::String(plaintext)))
    }

    fn seal(&self, plaintext: &[u8], salt: [u8; SALT_LEN]) -> String {
        let (key, iv) = derive_key_iv(&self.secret, &salt);
        let ciphertext =
            Aes256CbcEnc::new(&key.into(), &iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

        let mut raw = Vec::with_capacity(SALT_MAGIC.len() + SALT_LEN + ciphertext.len());
        raw.extend_from_slice(SALT_MAGIC);
        raw.extend_from_slice(&salt);
        raw.extend_from_slice(&ciphertext);

        STANDARD.encode(STANDARD.encode(raw))
    }
}

/// OpenSSL EVP_BytesToKey with MD5 and one round
fn derive_key_iv(secret: &[u8], salt: &[u8]) -> ([u8; KEY_LEN], [u8; IV_LEN]) {
    let mut derived = Vec::with_capacity(KEY_LEN + IV_LEN + 16);
    let mut block: Vec<u8> = Vec::new();
    while derived.len() < KEY_LEN + IV_LEN {
        let mut hasher = Md5::new();
        hasher.update(&block);
        hasher.update(secret);
        hasher.update(salt);
        block = hasher.finalize().to_vec();
        derived.extend_from_slice(&block);
    }

    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    key.copy_from_slice(&derived[..KEY_LEN]);
    iv.copy_from_slice(&derived[KEY_LEN..KEY_LEN + IV_LEN]);
    (key, iv)
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
    &bytes[start..end]
}
