//! XOR share algebra over a ring of neighbor secrets.
//!
//! Party `i` holds `L_i` (shared with its left neighbor) and `R_i` (shared
//! with its right neighbor), where `R_i == L_{i+1}`. Its share is
//! `x_i = R_i ⊕ L_i`. Because every neighbor secret appears in exactly two
//! shares, the XOR of all shares is zero, and any party can walk the ring from
//! its own left key to recover everyone else's:
//!
//! ```text
//! L_{me+1} = L_me ⊕ x_me
//! L_{me+2} = L_me ⊕ x_me ⊕ x_{me+1}
//! ...
//! ```

use std::fmt;

use zeroize::Zeroize;

use crate::provider::{SHARE_MESSAGE_SIZE, SHARED_SECRET_SIZE, SharedSecret};

/// Size of a broadcast share.
pub const SHARE_SIZE: usize = SHARED_SECRET_SIZE;

/// A party's public ring contribution `x_i = key_right ⊕ key_left`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Share([u8; SHARE_SIZE]);

impl Share {
    /// Compute the share from both neighbor secrets.
    pub fn from_neighbor_keys(key_right: &SharedSecret, key_left: &SharedSecret) -> Self {
        Self(xor(key_right.as_bytes(), key_left.as_bytes()))
    }

    /// Wrap raw share bytes.
    pub fn from_bytes(bytes: [u8; SHARE_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw share bytes.
    pub fn as_bytes(&self) -> &[u8; SHARE_SIZE] {
        &self.0
    }

    /// The message committed to by party `index`: share followed by the
    /// big-endian index.
    pub fn commitment_message(&self, index: u32) -> [u8; SHARE_MESSAGE_SIZE] {
        let mut message = [0u8; SHARE_MESSAGE_SIZE];
        message[..SHARE_SIZE].copy_from_slice(&self.0);
        message[SHARE_SIZE..].copy_from_slice(&index.to_be_bytes());
        message
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Share({:02x?}..)", &self.0[..4])
    }
}

/// XOR of every share, in any order.
pub fn xor_all<'a>(shares: impl IntoIterator<Item = &'a Share>) -> [u8; SHARE_SIZE] {
    shares.into_iter().fold([0u8; SHARE_SIZE], |acc, share| xor(&acc, &share.0))
}

/// Whether the shares XOR to zero.
pub fn check_closure(shares: &[Share]) -> bool {
    xor_all(shares) == [0u8; SHARE_SIZE]
}

/// Recover every party's left key from this party's own left key and the
/// full set of shares. The result is indexed by ring position.
///
/// `shares.len()` is the ring size and `own_index` must be below it.
pub fn reconstruct_left_keys(
    own_index: usize,
    own_key_left: &SharedSecret,
    shares: &[Share],
) -> Vec<SharedSecret> {
    let n = shares.len();
    debug_assert!(own_index < n, "own index {own_index} outside ring of {n}");

    let mut slots: Vec<Option<SharedSecret>> = vec![None; n];
    let mut acc = *own_key_left.as_bytes();
    slots[own_index] = Some(own_key_left.clone());

    for step in 1..n {
        let previous = (own_index + step - 1) % n;
        acc = xor(&acc, &shares[previous].0);
        slots[(own_index + step) % n] = Some(SharedSecret::from_bytes(acc));
    }
    acc.zeroize();

    slots.into_iter().flatten().collect()
}

fn xor(a: &[u8; SHARE_SIZE], b: &[u8; SHARE_SIZE]) -> [u8; SHARE_SIZE] {
    let mut out = [0u8; SHARE_SIZE];
    for (o, (x, y)) in out.iter_mut().zip(a.iter().zip(b)) {
        *o = x ^ y;
    }
    out
}
