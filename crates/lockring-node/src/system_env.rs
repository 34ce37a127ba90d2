//! Production environment backed by the OS RNG.
//!
//! Every ephemeral KEM seed, commitment coin, and message nonce a production
//! node uses comes from here. Output is not reproducible; simulations use the
//! seeded environment in `lockring-harness` instead.

use lockring_core::Environment;

/// Production environment using getrandom.
///
/// # Security
///
/// getrandom provides OS-level cryptographic randomness (for example
/// `/dev/urandom` on Linux, `BCryptGenRandom` on Windows).
///
/// # Panics
///
/// Panics if the OS RNG fails. A node without working randomness would reuse
/// KEM seeds and nonces, so there is no safe way to continue.
#[derive(Debug, Clone, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer)
            .expect("invariant: OS RNG failure is unrecoverable - node cannot operate securely");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_bytes_differ_between_calls() {
        let env = SystemEnv::new();
        let a: [u8; 32] = env.random_array();
        let b: [u8; 32] = env.random_array();
        assert_ne!(a, b, "Random bytes should differ");
    }

    #[test]
    fn random_bytes_fill_buffer() {
        let env = SystemEnv::new();
        let mut bytes = [0u8; 64];
        env.random_bytes(&mut bytes);

        let non_zero = bytes.iter().filter(|&&b| b != 0).count();
        assert!(non_zero > 32, "Most bytes should be non-zero");
    }
}
