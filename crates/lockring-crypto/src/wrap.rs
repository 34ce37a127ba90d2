//! Hierarchical key wrapping.
//!
//! A cluster leader redistributes its leader-level key into its cluster by
//! masking it with a pad derived from the cluster's own group key and tagging
//! the masked bytes with HMAC-SHA256.
//!
//! ```text
//! wk     = HKDF-SHA256(ikm = cluster key, salt = cluster session id)   (64 bytes)
//! masked = leader key ⊕ wk[0..32]
//! tag    = HMAC-SHA256(wk[32..64], masked)
//! ```
//!
//! The receiver checks the tag before unmasking; a failed check is reported
//! and the key is never returned.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{derivation::GroupKey, error::CryptoError};

type HmacSha256 = Hmac<Sha256>;

/// Label for the wrapping key derivation
const WRAP_LABEL: &[u8] = b"lockringWrapV1";

/// Size of the masked key.
pub const MASKED_KEY_SIZE: usize = 32;

/// Size of the HMAC-SHA256 tag.
pub const WRAP_TAG_SIZE: usize = 32;

/// Pad and MAC key derived from a cluster group key. Zeroized on drop.
pub struct WrappingKey {
    pad: [u8; MASKED_KEY_SIZE],
    mac_key: [u8; 32],
}

impl WrappingKey {
    /// Derive the wrapping key for the cluster that established `cluster_key`.
    pub fn derive(cluster_key: &GroupKey) -> Self {
        let hkdf = Hkdf::<Sha256>::new(Some(cluster_key.session_id()), cluster_key.key());

        let mut okm = [0u8; 64];
        let Ok(()) = hkdf.expand(WRAP_LABEL, &mut okm) else {
            unreachable!("64 bytes is a valid HKDF-SHA256 output length");
        };

        let mut pad = [0u8; MASKED_KEY_SIZE];
        let mut mac_key = [0u8; 32];
        pad.copy_from_slice(&okm[..32]);
        mac_key.copy_from_slice(&okm[32..]);
        okm.zeroize();

        Self { pad, mac_key }
    }

    fn tag(&self, masked: &[u8; MASKED_KEY_SIZE]) -> HmacSha256 {
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.mac_key) else {
            unreachable!("HMAC-SHA256 accepts any key size");
        };
        mac.update(masked);
        mac
    }
}

impl Drop for WrappingKey {
    fn drop(&mut self) {
        self.pad.zeroize();
        self.mac_key.zeroize();
    }
}

/// A masked key plus its authentication tag, as carried in WRAPPED_KEY.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WrappedKey {
    /// Leader key XOR the wrapping pad
    pub masked_key: [u8; MASKED_KEY_SIZE],
    /// HMAC-SHA256 over `masked_key`
    pub tag: [u8; WRAP_TAG_SIZE],
}

/// Mask and authenticate `key` under `wrapping`.
pub fn wrap_key(key: &[u8; MASKED_KEY_SIZE], wrapping: &WrappingKey) -> WrappedKey {
    let mut masked_key = [0u8; MASKED_KEY_SIZE];
    for (m, (k, p)) in masked_key.iter_mut().zip(key.iter().zip(&wrapping.pad)) {
        *m = k ^ p;
    }

    let mut tag = [0u8; WRAP_TAG_SIZE];
    tag.copy_from_slice(&wrapping.tag(&masked_key).finalize().into_bytes());

    WrappedKey { masked_key, tag }
}

/// Verify the tag in constant time, then unmask.
///
/// # Errors
///
/// - `WrappedKeyAuthentication`: the tag does not match the masked bytes
pub fn unwrap_key(
    wrapped: &WrappedKey,
    wrapping: &WrappingKey,
) -> Result<[u8; MASKED_KEY_SIZE], CryptoError> {
    wrapping
        .tag(&wrapped.masked_key)
        .verify_slice(&wrapped.tag)
        .map_err(|_| CryptoError::WrappedKeyAuthentication)?;

    let mut key = [0u8; MASKED_KEY_SIZE];
    for (k, (m, p)) in key.iter_mut().zip(wrapped.masked_key.iter().zip(&wrapping.pad)) {
        *k = m ^ p;
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_key() -> GroupKey {
        GroupKey::from_parts([0x11; 32], [0x22; 32])
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        let wrapping = WrappingKey::derive(&cluster_key());
        let leader_key = [0x77; 32];

        let wrapped = wrap_key(&leader_key, &wrapping);
        assert_eq!(unwrap_key(&wrapped, &wrapping), Ok(leader_key));
    }

    #[test]
    fn masked_key_hides_leader_key() {
        let wrapping = WrappingKey::derive(&cluster_key());
        let wrapped = wrap_key(&[0x77; 32], &wrapping);
        assert_ne!(wrapped.masked_key, [0x77; 32]);
    }

    #[test]
    fn any_flipped_masked_byte_fails() {
        let wrapping = WrappingKey::derive(&cluster_key());
        let wrapped = wrap_key(&[0x77; 32], &wrapping);

        for i in 0..MASKED_KEY_SIZE {
            let mut tampered = wrapped;
            tampered.masked_key[i] ^= 0x01;
            assert_eq!(
                unwrap_key(&tampered, &wrapping),
                Err(CryptoError::WrappedKeyAuthentication),
                "byte {i}"
            );
        }
    }

    #[test]
    fn any_flipped_tag_byte_fails() {
        let wrapping = WrappingKey::derive(&cluster_key());
        let wrapped = wrap_key(&[0x77; 32], &wrapping);

        for i in 0..WRAP_TAG_SIZE {
            let mut tampered = wrapped;
            tampered.tag[i] ^= 0x80;
            assert!(unwrap_key(&tampered, &wrapping).is_err(), "byte {i}");
        }
    }

    #[test]
    fn different_cluster_cannot_unwrap() {
        let wrapping = WrappingKey::derive(&cluster_key());
        let other = WrappingKey::derive(&GroupKey::from_parts([0x11; 32], [0x23; 32]));

        let wrapped = wrap_key(&[0x77; 32], &wrapping);
        assert!(unwrap_key(&wrapped, &other).is_err());
    }
}
