//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must hold after any delivery schedule,
//! including reordered, duplicated, and tampered ones.
//!
//! # Architecture
//!
//! [`crate::SimWorld::snapshot`] extracts observable state into a
//! [`SystemSnapshot`], then the registered [`Invariant`] checks run against
//! it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! registry.check_all(&world.snapshot())?;
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{
    AbortedHoldsNoKey, ClusterKeyConvergence, EffectiveKeySource, RingKeyAgreement,
    SingleCompletion,
};
pub use snapshot::{NodeSnapshot, RingSnapshot, SessionSnapshot, SystemSnapshot};

/// Outcome of a single check.
pub type InvariantResult = Result<(), Violation>;

/// A failed check and what it saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the check that failed
    pub invariant: &'static str,
    /// What was observed
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a [`SystemSnapshot`].
pub trait Invariant: Send + Sync {
    /// Stable name used in reports.
    fn name(&self) -> &'static str;

    /// Inspect `state`; `Err` carries the first counterexample found.
    fn check(&self, state: &SystemSnapshot) -> InvariantResult;
}

/// An ordered set of checks run together.
#[derive(Default)]
pub struct InvariantRegistry {
    checks: Vec<Box<dyn Invariant>>,
}

impl InvariantRegistry {
    /// No checks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every check this crate ships:
    ///
    /// - [`RingKeyAgreement`]: one group key per ring
    /// - [`ClusterKeyConvergence`]: one effective key per deployment
    /// - [`EffectiveKeySource`]: effective keys come from the right ring
    /// - [`SingleCompletion`]: nothing completes twice
    /// - [`AbortedHoldsNoKey`]: failed verification leaves no key
    pub fn standard() -> Self {
        Self::new()
            .with(RingKeyAgreement)
            .with(ClusterKeyConvergence)
            .with(EffectiveKeySource)
            .with(SingleCompletion)
            .with(AbortedHoldsNoKey)
    }

    /// Append a check.
    #[must_use]
    pub fn with<I: Invariant + 'static>(mut self, invariant: I) -> Self {
        self.checks.push(Box::new(invariant));
        self
    }

    /// Run every check; `Err` lists each one that failed.
    pub fn check_all(&self, state: &SystemSnapshot) -> Result<(), Vec<Violation>> {
        let failed: Vec<Violation> =
            self.checks.iter().filter_map(|check| check.check(state).err()).collect();
        if failed.is_empty() { Ok(()) } else { Err(failed) }
    }

    /// [`InvariantRegistry::check_all`] for tests: panics listing every
    /// failure, prefixed with `context`.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SystemSnapshot, context: &str) {
        if let Err(failed) = self.check_all(state) {
            let report = failed.iter().map(ToString::to_string).collect::<Vec<_>>().join("\n  ");
            panic!("invariants violated {context}:\n  {report}");
        }
    }

    /// Number of checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether there are no checks.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
