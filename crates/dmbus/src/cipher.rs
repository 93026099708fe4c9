//! Notification payloads are encrypted with `AES` in `CBC` mode and
//! transported as base64 text.
//!
//! Before encryption, a producer right-pads the plaintext with the `{`
//! character until its length is a multiple of the cipher block size,
//! always appending at least one padding byte. Decryption removes **all**
//! trailing `{` bytes, hence a plaintext which legitimately ends with `{`
//! is truncated. Payload alphabets must exclude that character.
//!
//! A [`CipherContext`] holds the key and the initialization vector shared
//! by a whole session. Neither is derived per message nor rotated.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use core::fmt;

use aes::{Aes128, Aes192, Aes256};

use base64::{Engine as _, engine::general_purpose::STANDARD};

use cbc::cipher::{BlockDecryptMut, KeyIvInit, block_padding::NoPadding};

use zeroize::Zeroizing;

use crate::envelope::ResultRecord;
use crate::error::{Error, ErrorKind, Result};
use crate::value::PayloadValue;

/// The cipher block size, which is also the initialization vector length.
pub const BLOCK_SIZE: usize = 16;

/// The byte used to pad a plaintext to a multiple of [`BLOCK_SIZE`].
pub const PADDING: u8 = b'{';

type Aes128CbcDec = cbc::Decryptor<Aes128>;
type Aes192CbcDec = cbc::Decryptor<Aes192>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// The supported cipher algorithms, selected by the key length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// `AES-128` in `CBC` mode, with a 16-byte key.
    Aes128Cbc,
    /// `AES-192` in `CBC` mode, with a 24-byte key.
    Aes192Cbc,
    /// `AES-256` in `CBC` mode, with a 32-byte key.
    Aes256Cbc,
}

impl Algorithm {
    const fn from_key_len(len: usize) -> Option<Self> {
        match len {
            16 => Some(Self::Aes128Cbc),
            24 => Some(Self::Aes192Cbc),
            32 => Some(Self::Aes256Cbc),
            _ => None,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aes128Cbc => "AES-128-CBC",
            Self::Aes192Cbc => "AES-192-CBC",
            Self::Aes256Cbc => "AES-256-CBC",
        }
        .fmt(f)
    }
}

/// The symmetric key and initialization vector used to decrypt payloads.
///
/// The key is wiped from memory when the context is dropped.
#[derive(Clone)]
pub struct CipherContext {
    algorithm: Algorithm,
    key: Zeroizing<Vec<u8>>,
    iv: [u8; BLOCK_SIZE],
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("algorithm", &self.algorithm)
            .finish_non_exhaustive()
    }
}

impl CipherContext {
    /// Creates a [`CipherContext`] from a key and an initialization vector.
    ///
    /// # Errors
    ///
    /// The key is not 16, 24, or 32 bytes long, or the initialization vector
    /// is not [`BLOCK_SIZE`] bytes long.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self> {
        let algorithm = Algorithm::from_key_len(key.len()).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidKey,
                format!(
                    "Key is {} bytes long, expected 16, 24, or 32 bytes",
                    key.len()
                ),
            )
        })?;

        let iv = <[u8; BLOCK_SIZE]>::try_from(iv).map_err(|_| {
            Error::new(
                ErrorKind::InvalidIv,
                format!(
                    "Initialization vector is {} bytes long, expected {BLOCK_SIZE} bytes",
                    iv.len()
                ),
            )
        })?;

        Ok(Self {
            algorithm,
            key: Zeroizing::new(key.to_vec()),
            iv,
        })
    }

    /// Returns the [`Algorithm`] selected by the key length.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Decrypts a base64 payload and removes its padding.
    ///
    /// # Errors
    ///
    /// - The payload is not base64, or its decoded length is not a positive
    ///   multiple of [`BLOCK_SIZE`]
    /// - The decrypted data does not end with [`PADDING`], which usually
    ///   means the key or the initialization vector are wrong.
    pub fn decrypt(&self, payload: &str) -> Result<Vec<u8>> {
        let mut data = STANDARD.decode(payload).map_err(|e| {
            Error::new(
                ErrorKind::Encoding,
                format!("Payload is not valid base64: {e}"),
            )
        })?;

        if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
            return Err(Error::new(
                ErrorKind::Encoding,
                format!(
                    "Ciphertext is {} bytes long, expected a positive multiple of {BLOCK_SIZE}",
                    data.len()
                ),
            ));
        }

        let (key, iv) = (self.key.as_slice(), self.iv.as_slice());
        let decrypted = match self.algorithm {
            Algorithm::Aes128Cbc => Aes128CbcDec::new_from_slices(key, iv)
                .map(|cipher| cipher.decrypt_padded_mut::<NoPadding>(&mut data).is_ok()),
            Algorithm::Aes192Cbc => Aes192CbcDec::new_from_slices(key, iv)
                .map(|cipher| cipher.decrypt_padded_mut::<NoPadding>(&mut data).is_ok()),
            Algorithm::Aes256Cbc => Aes256CbcDec::new_from_slices(key, iv)
                .map(|cipher| cipher.decrypt_padded_mut::<NoPadding>(&mut data).is_ok()),
        }
        .map_err(|e| Error::new(ErrorKind::InvalidKey, format!("{}: {e}", self.algorithm)))?;

        if !decrypted {
            return Err(Error::new(
                ErrorKind::Decryption,
                format!("{} rejected the ciphertext", self.algorithm),
            ));
        }

        if data.last() != Some(&PADDING) {
            return Err(Error::new(
                ErrorKind::Decryption,
                "Decrypted payload does not end with the padding byte",
            ));
        }

        let len = data
            .iter()
            .rposition(|byte| *byte != PADDING)
            .map_or(0, |last| last + 1);
        data.truncate(len);

        Ok(data)
    }

    /// Pads, encrypts, and base64-encodes a plaintext.
    ///
    /// # Errors
    ///
    /// The plaintext ends with [`PADDING`], so it could not be recovered by
    /// a decoder.
    #[cfg(feature = "encrypt")]
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        use cbc::cipher::BlockEncryptMut;

        if plaintext.last() == Some(&PADDING) {
            return Err(Error::new(
                ErrorKind::Encoding,
                "Plaintext ends with the padding byte",
            ));
        }

        let len = (plaintext.len() / BLOCK_SIZE + 1) * BLOCK_SIZE;
        let mut data = plaintext.to_vec();
        data.resize(len, PADDING);

        let (key, iv) = (self.key.as_slice(), self.iv.as_slice());
        let encrypted = match self.algorithm {
            Algorithm::Aes128Cbc => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
                .map(|cipher| cipher.encrypt_padded_mut::<NoPadding>(&mut data, len).is_ok()),
            Algorithm::Aes192Cbc => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
                .map(|cipher| cipher.encrypt_padded_mut::<NoPadding>(&mut data, len).is_ok()),
            Algorithm::Aes256Cbc => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
                .map(|cipher| cipher.encrypt_padded_mut::<NoPadding>(&mut data, len).is_ok()),
        }
        .map_err(|e| Error::new(ErrorKind::InvalidKey, format!("{}: {e}", self.algorithm)))?;

        if !encrypted {
            return Err(Error::new(
                ErrorKind::Encoding,
                format!("{} rejected the plaintext", self.algorithm),
            ));
        }

        Ok(STANDARD.encode(&data))
    }
}

/// The plaintext recovered from a [`ResultRecord`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    resource_path: String,
    plaintext: Vec<u8>,
}

impl fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resource_path = if self.resource_path.is_empty() {
            "<unknown resource>"
        } else {
            &self.resource_path
        };
        write!(f, "{resource_path}: {}", self.value())
    }
}

impl DecodedEvent {
    /// Creates a [`DecodedEvent`].
    #[must_use]
    pub fn new(resource_path: impl Into<String>, plaintext: Vec<u8>) -> Self {
        Self {
            resource_path: resource_path.into(),
            plaintext,
        }
    }

    /// Decrypts the payload of a [`ResultRecord`].
    ///
    /// # Errors
    ///
    /// See [`CipherContext::decrypt`].
    pub fn decode(record: &ResultRecord, context: &CipherContext) -> Result<Self> {
        let plaintext = context.decrypt(record.payload())?;
        Ok(Self::new(record.resource_path(), plaintext))
    }

    /// Returns the path of the resource which produced the event.
    #[must_use]
    pub fn resource_path(&self) -> &str {
        &self.resource_path
    }

    /// Returns the plaintext, padding excluded.
    #[must_use]
    pub fn plaintext(&self) -> &[u8] {
        &self.plaintext
    }

    /// Returns the plaintext as text, if it is valid `UTF-8`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        core::str::from_utf8(&self.plaintext).ok()
    }

    /// Interprets the plaintext as a [`PayloadValue`].
    #[must_use]
    pub fn value(&self) -> PayloadValue {
        PayloadValue::from_plaintext(&self.plaintext)
    }
}

/// Decrypts a base64 payload with the given [`CipherContext`].
///
/// # Errors
///
/// See [`CipherContext::decrypt`].
#[inline]
pub fn decrypt(payload: &str, context: &CipherContext) -> Result<Vec<u8>> {
    context.decrypt(payload)
}

/// Encrypts a plaintext with the given [`CipherContext`].
///
/// # Errors
///
/// See [`CipherContext::encrypt`].
#[cfg(feature = "encrypt")]
#[inline]
pub fn encrypt(plaintext: &[u8], context: &CipherContext) -> Result<String> {
    context.encrypt(plaintext)
}
