use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{rngs::OsRng, RngCore};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AppError, Result};

/// The size of a freshly generated AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// The size of the AES-CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Length of each big-endian length prefix in the serialized form.
const LEN_PREFIX: usize = 4;

/// Per-session symmetric key material.
///
/// Serialized into the session token so that only the token holder can
/// decrypt that session's stored metadata. Never persisted server-side.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyMaterial {
    key: Vec<u8>,
    iv: Vec<u8>,
}

impl fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeyMaterial")
            .field("key_len", &self.key.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

impl SessionKeyMaterial {
    /// Generates a new random AES-256 key and IV.
    pub fn generate() -> Self {
        let mut key = vec![0u8; KEY_SIZE];
        let mut iv = vec![0u8; IV_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);

        Self { key, iv }
    }

    /// Returns the raw key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Returns the raw IV bytes.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Serializes the key material as
    /// `[u32 BE key length][key][u32 BE iv length][iv]`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.key.len() + self.iv.len() + 2 * LEN_PREFIX);
        out.extend_from_slice(&(self.key.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.key);
        out.extend_from_slice(&(self.iv.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.iv);
        out
    }

    /// Reconstructs key material from the bytes produced by [`Self::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Format` if a length prefix is truncated, a declared
    /// length exceeds the available bytes, or bytes remain after the IV.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let (key, rest) = read_length_prefixed(bytes, "key")?;
        let (iv, rest) = read_length_prefixed(rest, "iv")?;

        if !rest.is_empty() {
            return Err(AppError::Format(format!(
                "{} unexpected trailing bytes after key material",
                rest.len()
            )));
        }

        Ok(Self {
            key: key.to_vec(),
            iv: iv.to_vec(),
        })
    }

    /// Pads (PKCS#7) and encrypts `plaintext` with AES-CBC.
    ///
    /// The key length selects AES-128, AES-192 or AES-256.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let ciphertext = match self.key.len() {
            16 => cbc::Encryptor::<::aes::Aes128>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            24 => cbc::Encryptor::<::aes::Aes192>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            32 => cbc::Encryptor::<::aes::Aes256>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            n => return Err(invalid_key_length(n)),
        };

        ciphertext.map_err(|e| AppError::Encryption(format!("Cipher setup failed: {}", e)))
    }

    /// Decrypts AES-CBC `ciphertext` and strips its PKCS#7 padding.
    ///
    /// Malformed padding is reported as an error, but CBC carries no
    /// integrity tag: callers must still treat a failure to parse the
    /// returned plaintext as a decryption failure.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let plaintext = match self.key.len() {
            16 => cbc::Decryptor::<::aes::Aes128>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            24 => cbc::Decryptor::<::aes::Aes192>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            32 => cbc::Decryptor::<::aes::Aes256>::new_from_slices(&self.key, &self.iv)
                .map(|c| c.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)),
            n => return Err(invalid_key_length(n)),
        };

        plaintext
            .map_err(|e| AppError::Encryption(format!("Cipher setup failed: {}", e)))?
            .map_err(|_| AppError::Format("Invalid ciphertext or padding".to_string()))
    }
}

fn invalid_key_length(len: usize) -> AppError {
    AppError::Encryption(format!("Invalid AES key length: {} bytes", len))
}

fn read_length_prefixed<'a>(bytes: &'a [u8], what: &str) -> Result<(&'a [u8], &'a [u8])> {
    if bytes.len() < LEN_PREFIX {
        return Err(AppError::Format(format!("Truncated {} length prefix", what)));
    }

    let (prefix, rest) = bytes.split_at(LEN_PREFIX);
    let mut len_bytes = [0u8; LEN_PREFIX];
    len_bytes.copy_from_slice(prefix);
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > rest.len() {
        return Err(AppError::Format(format!(
            "Unexpected {} length: declared {} bytes, {} available",
            what,
            len,
            rest.len()
        )));
    }

    Ok(rest.split_at(len))
}
