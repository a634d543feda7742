//! Payload cipher
//!
//! AES-128 in ECB mode with PKCS#7 padding, keyed directly by the device's
//! local key. ECB is what protocol 3.1 devices speak; identical plaintext
//! blocks produce identical ciphertext blocks.
//!
//! ## Envelope (v3.1)
//! ```text
//! ┌────────────┬──────────────────┬──────────────────────────────┐
//! │ "3.1" (3)  │ Signature (16)   │ base64(AES-ECB(payload))     │
//! └────────────┴──────────────────┴──────────────────────────────┘
//! ```
//! Signature = md5_hex("data=" + b64 + "||lpv=3.1||" + key)[8..24]

use aes::Aes128;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use cipher::block_padding::Pkcs7;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};

use crate::config::{ProtocolVersion, SHARED_KEY_LEN};
use crate::error::{Result, StubError};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Length of the hex signature that follows the version tag
pub const SIGNATURE_LEN: usize = 16;

/// Symmetric cipher bound to one device key
#[derive(Clone)]
pub struct Cipher {
    aes: Aes128,
    key: [u8; SHARED_KEY_LEN],
    version: ProtocolVersion,
}

impl Cipher {
    /// Create a cipher for the given key and protocol version
    pub fn new(key: &[u8; SHARED_KEY_LEN], version: ProtocolVersion) -> Self {
        Self {
            aes: Aes128::new(GenericArray::from_slice(key)),
            key: *key,
            version,
        }
    }

    /// Encrypt raw bytes (ECB, PKCS#7)
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        self.aes.encrypt_padded_vec::<Pkcs7>(plaintext)
    }

    /// Decrypt raw bytes (ECB, PKCS#7)
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(StubError::Decryption(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        self.aes
            .decrypt_padded_vec::<Pkcs7>(ciphertext)
            .map_err(|_| StubError::Decryption("invalid PKCS#7 padding".to_string()))
    }

    /// Wrap a plaintext payload in the versioned, signed envelope
    pub fn seal(&self, plaintext: &[u8]) -> Vec<u8> {
        let encoded = STANDARD.encode(self.encrypt(plaintext));
        let signature = self.signature(&encoded);

        let version = self.version.as_str();
        let mut envelope = Vec::with_capacity(version.len() + SIGNATURE_LEN + encoded.len());
        envelope.extend_from_slice(version.as_bytes());
        envelope.extend_from_slice(signature.as_bytes());
        envelope.extend_from_slice(encoded.as_bytes());
        envelope
    }

    /// Check whether a payload starts with this version's envelope tag
    pub fn is_sealed(&self, payload: &[u8]) -> bool {
        payload.starts_with(self.version.as_str().as_bytes())
    }

    /// Verify and unwrap an envelope produced by `seal`
    pub fn open(&self, envelope: &[u8]) -> Result<Vec<u8>> {
        let version = self.version.as_str().as_bytes();
        let body_start = version.len() + SIGNATURE_LEN;

        if !envelope.starts_with(version) || envelope.len() < body_start {
            return Err(StubError::Decryption(format!(
                "missing {} envelope header",
                self.version.as_str()
            )));
        }

        let signature = &envelope[version.len()..body_start];
        let encoded = std::str::from_utf8(&envelope[body_start..])
            .map_err(|_| StubError::Decryption("envelope body is not ASCII".to_string()))?;

        if signature != self.signature(encoded).as_bytes() {
            return Err(StubError::Decryption("envelope signature mismatch".to_string()));
        }

        let ciphertext = STANDARD
            .decode(encoded)
            .map_err(|e| StubError::Decryption(format!("invalid base64: {}", e)))?;

        self.decrypt(&ciphertext)
    }

    /// Middle 16 hex digits of the MD5 over the encoded body, version and key
    fn signature(&self, encoded: &str) -> String {
        let mut input = Vec::with_capacity(encoded.len() + 32);
        input.extend_from_slice(b"data=");
        input.extend_from_slice(encoded.as_bytes());
        input.extend_from_slice(b"||lpv=");
        input.extend_from_slice(self.version.as_str().as_bytes());
        input.extend_from_slice(b"||");
        input.extend_from_slice(&self.key);

        let digest = format!("{:x}", md5::compute(&input));
        digest[8..8 + SIGNATURE_LEN].to_string()
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Keep the key out of logs
        f.debug_struct("Cipher")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}
