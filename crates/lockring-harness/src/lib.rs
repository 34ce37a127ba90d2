//! Deterministic simulation harness for lockring.
//!
//! Two layers of simulation:
//!
//! - [`SimWorld`] drives sans-IO [`lockring_core::Node`]s directly over a
//!   seeded [`SimNetwork`] that can reorder and duplicate packets. A seed
//!   reproduces a run exactly.
//! - The turmoil tests in `tests/` run the real `lockring-node` runtime and
//!   relay over turmoil's simulated TCP.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties against a
//! [`SystemSnapshot`] of the world. Use [`InvariantRegistry::standard()`]
//! after any run.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod invariants;
pub mod sim_env;
pub mod sim_network;
pub mod world;

pub use invariants::{
    AbortedHoldsNoKey, ClusterKeyConvergence, EffectiveKeySource, Invariant, InvariantRegistry,
    InvariantResult, NodeSnapshot, RingKeyAgreement, RingSnapshot, SessionSnapshot,
    SingleCompletion, SystemSnapshot, Violation,
};
pub use sim_env::SimEnv;
pub use sim_network::{NetworkConfig, Packet, SimNetwork};
pub use world::{NodeLog, RingLayout, SimNode, SimWorld};
