//! Seeded environment for deterministic simulation.
//!
//! All randomness comes from a `ChaCha20Rng` seeded once. Clones share the
//! generator, so a node and everything it spawns draw from one sequence and a
//! run with the same seed and the same delivery schedule replays exactly.

use std::sync::{Arc, Mutex, PoisonError};

use lockring_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
}

impl SimEnv {
    /// Create an environment from a seed.
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))) }
    }

    /// An independent environment for a sub-component, seeded from this one.
    pub fn fork(&self) -> Self {
        let mut seed = [0u8; 32];
        self.random_bytes(&mut seed);
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::from_seed(seed))) }
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SimEnv(..)")
    }
}

impl Environment for SimEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner).fill_bytes(buffer);
    }
}
