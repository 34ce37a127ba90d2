//! Group key and session id derivation.

use std::fmt;

use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::{error::CryptoError, provider::SharedSecret};

/// Fixed width of a party identifier on the wire and in the key derivation.
pub const PARTY_ID_SIZE: usize = 20;

/// Size of the derived group key.
pub const GROUP_KEY_SIZE: usize = 32;

/// Size of the derived session identifier.
pub const SESSION_ID_SIZE: usize = 32;

/// A party name, zero-padded to [`PARTY_ID_SIZE`] bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PartyId([u8; PARTY_ID_SIZE]);

impl PartyId {
    /// Build an id from a name of 1 to 20 bytes.
    pub fn new(name: &str) -> Result<Self, CryptoError> {
        let bytes = name.as_bytes();
        if bytes.is_empty() || bytes.len() > PARTY_ID_SIZE {
            return Err(CryptoError::InvalidPartyId { name: name.to_string(), max: PARTY_ID_SIZE });
        }

        let mut id = [0u8; PARTY_ID_SIZE];
        id[..bytes.len()].copy_from_slice(bytes);
        Ok(Self(id))
    }

    /// Padded identifier bytes.
    pub fn as_bytes(&self) -> &[u8; PARTY_ID_SIZE] {
        &self.0
    }

    /// The name with padding removed.
    pub fn name(&self) -> String {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(PARTY_ID_SIZE);
        String::from_utf8_lossy(&self.0[..end]).into_owned()
    }
}

impl fmt::Debug for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartyId({:?})", self.name())
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The established group key and session identifier. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct GroupKey {
    key: [u8; GROUP_KEY_SIZE],
    session_id: [u8; SESSION_ID_SIZE],
}

impl GroupKey {
    /// Assemble from raw parts.
    pub fn from_parts(key: [u8; GROUP_KEY_SIZE], session_id: [u8; SESSION_ID_SIZE]) -> Self {
        Self { key, session_id }
    }

    /// Symmetric group key.
    pub fn key(&self) -> &[u8; GROUP_KEY_SIZE] {
        &self.key
    }

    /// Identifier of the run that produced this key.
    pub fn session_id(&self) -> &[u8; SESSION_ID_SIZE] {
        &self.session_id
    }

    /// Short hex prefix of the session id, safe to log.
    pub fn fingerprint(&self) -> String {
        self.session_id[..6].iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl Drop for GroupKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupKey(session {})", self.fingerprint())
    }
}

/// Derive the group key from every party's left key and identifier, both in
/// ring order.
///
/// `SHA-512(L_0 ‖ … ‖ L_{n-1} ‖ id_0 ‖ … ‖ id_{n-1})`; the first half is the
/// key and the second half the session id.
pub fn derive_group_key(left_keys: &[SharedSecret], ids: &[PartyId]) -> GroupKey {
    debug_assert_eq!(left_keys.len(), ids.len(), "one identifier per left key");

    let mut hasher = Sha512::new();
    for left in left_keys {
        hasher.update(left.as_bytes());
    }
    for id in ids {
        hasher.update(id.as_bytes());
    }
    let mut digest = hasher.finalize();

    let mut key = [0u8; GROUP_KEY_SIZE];
    let mut session_id = [0u8; SESSION_ID_SIZE];
    key.copy_from_slice(&digest[..GROUP_KEY_SIZE]);
    session_id.copy_from_slice(&digest[GROUP_KEY_SIZE..]);
    digest.as_mut_slice().zeroize();

    GroupKey { key, session_id }
}
