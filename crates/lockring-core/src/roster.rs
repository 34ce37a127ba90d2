//! Ring membership.

use std::collections::HashSet;

use lockring_crypto::{PartyId, PublicKey};

use crate::error::SessionError;

/// Smallest ring the share scheme supports.
pub const MIN_RING_SIZE: usize = 3;

/// A ring member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Party {
    /// Identifier, unique within the ring
    pub id: PartyId,
    /// Long-term encapsulation key
    pub public_key: PublicKey,
}

/// An ordered ring of parties. Position in the list is the ring index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Roster {
    name: String,
    parties: Vec<Party>,
}

impl Roster {
    /// Build a ring named `name` (used only for logging).
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: fewer than [`MIN_RING_SIZE`] parties, more than
    ///   `u32::MAX`, or duplicate identifiers
    pub fn new(name: impl Into<String>, parties: Vec<Party>) -> Result<Self, SessionError> {
        let name = name.into();
        if parties.len() < MIN_RING_SIZE {
            return Err(SessionError::InvalidRoster {
                reason: format!(
                    "ring {name} has {} parties, need at least {MIN_RING_SIZE}",
                    parties.len()
                ),
            });
        }
        if u32::try_from(parties.len()).is_err() {
            return Err(SessionError::InvalidRoster {
                reason: format!("ring {name} is too large"),
            });
        }

        let mut seen = HashSet::with_capacity(parties.len());
        for party in &parties {
            if !seen.insert(party.id) {
                return Err(SessionError::InvalidRoster {
                    reason: format!("ring {name} lists {} twice", party.id),
                });
            }
        }

        Ok(Self { name, parties })
    }

    /// Ring name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of parties.
    pub fn len(&self) -> usize {
        self.parties.len()
    }

    /// Always false: construction rejects small rings.
    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }

    /// Party at `index`.
    pub fn party(&self, index: usize) -> Option<&Party> {
        self.parties.get(index)
    }

    /// All parties in ring order.
    pub fn parties(&self) -> &[Party] {
        &self.parties
    }

    /// Identifiers in ring order.
    pub fn ids(&self) -> Vec<PartyId> {
        self.parties.iter().map(|p| p.id).collect()
    }

    /// Ring index of `id`.
    pub fn position(&self, id: &PartyId) -> Option<usize> {
        self.parties.iter().position(|p| p.id == *id)
    }

    /// Index of the left neighbor of `index`.
    pub fn left_of(&self, index: usize) -> usize {
        (index + self.len() - 1) % self.len()
    }

    /// Index of the right neighbor of `index`.
    pub fn right_of(&self, index: usize) -> usize {
        (index + 1) % self.len()
    }
}
