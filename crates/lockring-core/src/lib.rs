//! Lockring Core
//!
//! Sans-IO ring group key exchange. Nothing in this crate performs I/O or
//! reads the clock; randomness comes from an injected [`Environment`].
//!
//! # Architecture
//!
//! ```text
//!             NodeEvent                          NodeAction
//!  transport ──────────> Node ──────────────────────────────> transport
//!                         │  (Level, MessageKind)               / app
//!          ┌──────────────┼───────────────────┐
//!          ▼              ▼                   ▼
//!   cluster session   leader session   KeyDistributor + cipher
//!   (GakeSession)     (GakeSession)    (wrap / unwrap / seal / open)
//! ```
//!
//! - [`GakeSession`]: one protocol run over one ring, from AKE to group key
//! - [`KeyDistributor`]: turns established keys into the effective cluster key
//! - [`Node`]: composes both for a position in the hierarchy
//!
//! # Failure Model
//!
//! Malformed or out-of-place input is dropped and reported as a non-fatal
//! [`SessionError`]. A failed closure, commitment, or wrapped-key check is
//! fatal for the run: the session or distributor aborts and stays aborted.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod hierarchy;
pub mod node;
pub mod roster;
pub mod session;

pub use env::Environment;
pub use error::{SessionError, VerificationFailure};
pub use hierarchy::{DistributorAction, KeyDistributor, Role};
pub use node::{Level, Node, NodeAction, NodeEvent, NodeLayout};
pub use roster::{MIN_RING_SIZE, Party, Roster};
pub use session::{GakeSession, SessionAction, SessionEvent, SessionState};
