//! Application message encryption under the effective cluster key using
//! `XChaCha20-Poly1305`.
//!
//! All functions are pure - the nonce must be provided by the caller.

use std::fmt;

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// `XChaCha20` nonce size.
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size.
pub const TAG_SIZE: usize = 16;

/// The key a cluster uses for application traffic. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct ClusterKey([u8; 32]);

impl ClusterKey {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl Drop for ClusterKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for ClusterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClusterKey(..)")
    }
}

/// A sealed application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedMessage {
    /// Random 24-byte nonce
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext including the 16-byte Poly1305 tag
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` from `sender_index`. The sender index is bound as
/// associated data so a message cannot be replayed under another sender.
pub fn seal(
    key: &ClusterKey,
    sender_index: u32,
    plaintext: &[u8],
    nonce: [u8; NONCE_SIZE],
) -> SealedMessage {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let aad = sender_index.to_be_bytes();

    let Ok(ciphertext) =
        cipher.encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: &aad })
    else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    SealedMessage { nonce, ciphertext }
}

/// Decrypt a message sealed by `sender_index`.
///
/// # Errors
///
/// - `Aead`: wrong key, wrong sender, or tampered ciphertext
pub fn open(
    key: &ClusterKey,
    sender_index: u32,
    sealed: &SealedMessage,
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let aad = sender_index.to_be_bytes();

    cipher
        .decrypt(XNonce::from_slice(&sealed.nonce), Payload { msg: &sealed.ciphertext, aad: &aad })
        .map_err(|_| CryptoError::Aead { reason: "message authentication failed".to_string() })
}
