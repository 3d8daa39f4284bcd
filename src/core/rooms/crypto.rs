//! Confidentiality sealing for outbound room snapshots.
//!
//! Snapshots are AES-256-CBC encrypted with a key derived once at startup
//! (SHA-256 of the configured secret) and a fresh random IV per call. The
//! canonical wire format, used by both directions, is
//! `base64(iv) ":" base64(ciphertext)`.

use aes::Aes256;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

const IV_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CipherError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed sealed payload")]
    Malformed,

    #[error("payload decryption failed")]
    Decrypt,
}

/// Process-wide payload cipher. Built once from configuration at startup
/// and shared immutably afterwards.
#[derive(Clone)]
pub struct PayloadCipher {
    key: [u8; 32],
}

impl PayloadCipher {
    pub fn new(secret: &str) -> Self {
        Self {
            key: Sha256::digest(secret.as_bytes()).into(),
        }
    }

    /// Serialize and encrypt a value into the canonical wire format.
    pub fn seal<T: Serialize>(&self, value: &T) -> Result<String, CipherError> {
        let plain = serde_json::to_vec(value)?;

        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);

        let ciphertext = Aes256CbcEnc::new(&self.key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(&plain);

        Ok(format!("{}:{}", BASE64.encode(iv), BASE64.encode(ciphertext)))
    }

    /// Decrypt a payload produced by [`seal`](Self::seal) back into JSON.
    pub fn open(&self, payload: &str) -> Result<serde_json::Value, CipherError> {
        let (iv_b64, ct_b64) = payload.split_once(':').ok_or(CipherError::Malformed)?;

        let iv: [u8; IV_LEN] = BASE64
            .decode(iv_b64)
            .map_err(|_| CipherError::Malformed)?
            .try_into()
            .map_err(|_| CipherError::Malformed)?;
        let ciphertext = BASE64.decode(ct_b64).map_err(|_| CipherError::Malformed)?;

        let plain = Aes256CbcDec::new(&self.key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| CipherError::Decrypt)?;

        Ok(serde_json::from_slice(&plain)?)
    }
}
