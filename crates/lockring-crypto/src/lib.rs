//! Lockring Cryptographic Primitives
//!
//! Building blocks for the ring group key exchange. Everything here is a pure
//! function of its inputs; callers supply randomness as explicit seeds, coins,
//! and nonces so that seeded simulations replay exactly.
//!
//! # Key Lifecycle
//!
//! ```text
//! Long-term ML-KEM keypairs
//!        │
//!        ▼
//! Ring AKE with each neighbor → key_left, key_right
//!        │
//!        ▼
//! Share x_i = key_right ⊕ key_left, committed and broadcast
//!        │
//!        ▼
//! Closure + commitment checks → left keys of every party
//!        │
//!        ▼
//! SHA-512 → group key ‖ session id
//!        │
//!        ▼
//! (leader) wrap leader key under cluster key → cluster key
//!        │
//!        ▼
//! XChaCha20-Poly1305 application messages
//! ```
//!
//! # Security
//!
//! Verification before trust:
//! - A share set that does not XOR to zero is never used
//! - Every share must match the commitment its sender published
//! - A wrapped key is unmasked only after its HMAC verifies
//!
//! Secret hygiene:
//! - Secret keys, neighbor secrets, transcripts and group keys are zeroized
//!   on drop and redacted in `Debug` output

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod cipher;
pub mod derivation;
pub mod error;
pub mod mlkem;
pub mod provider;
pub mod ring;
pub mod wrap;

pub use cipher::{ClusterKey, SealedMessage, open, seal};
pub use derivation::{GroupKey, PARTY_ID_SIZE, PartyId, derive_group_key};
pub use error::CryptoError;
pub use mlkem::MlKemProvider;
pub use provider::{
    AkeInitMessage, AkeResponseMessage, AkeTranscript, COIN_SIZE, Ciphertext, Coin, Commitment,
    CryptoProvider, Keypair, PublicKey, SEED_SIZE, SecretKey, SharedSecret,
};
pub use ring::{Share, check_closure, reconstruct_left_keys, xor_all};
pub use wrap::{WrappedKey, WrappingKey, unwrap_key, wrap_key};
