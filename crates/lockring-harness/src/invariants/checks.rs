//! Standard invariant checks.

use lockring_core::{Level, Role, SessionState};

use super::{Invariant, InvariantResult, SystemSnapshot, Violation};

/// Every established session on a ring holds the same group key.
///
/// Two members of one ring with different keys means the closure or
/// commitment checks let an inconsistent share set through.
pub struct RingKeyAgreement;

impl Invariant for RingKeyAgreement {
    fn name(&self) -> &'static str {
        "ring_key_agreement"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for (ring, layout) in state.rings.iter().enumerate() {
            let mut keys = state
                .sessions_on(ring)
                .filter_map(|(node, session)| session.group_key.as_ref().map(|k| (node, k)));
            let Some((first_node, first_key)) = keys.next() else {
                continue;
            };
            for (node, key) in keys {
                if key != first_key {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "ring {}: {} holds {:?}, {} holds {:?}",
                            layout.name, first_node.name, first_key, node.name, key
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Every installed effective key is the same across the deployment.
pub struct ClusterKeyConvergence;

impl Invariant for ClusterKeyConvergence {
    fn name(&self) -> &'static str {
        "cluster_key_convergence"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        let mut keys = state.nodes.iter().filter_map(|n| n.effective_key.as_ref().map(|k| (n, k)));
        let Some((first_node, first_key)) = keys.next() else {
            return Ok(());
        };
        for (node, key) in keys {
            if key != first_key {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{} and {} installed different effective keys",
                        first_node.name, node.name
                    ),
                });
            }
        }
        Ok(())
    }
}

/// The effective key comes from the ring the role says it comes from.
///
/// - Standalone: the cluster-ring group key
/// - Leader: the leader-ring group key
/// - Member: only after its own cluster session is established
pub struct EffectiveKeySource;

impl Invariant for EffectiveKeySource {
    fn name(&self) -> &'static str {
        "effective_key_source"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for node in &state.nodes {
            let Some(effective) = &node.effective_key else {
                continue;
            };

            let cluster = node.session(Level::Cluster);
            let source = match node.role {
                Role::Standalone => cluster,
                Role::Leader => node.session(Level::Leader),
                Role::Member => {
                    if cluster.map(|s| s.state) != Some(SessionState::Established) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "member {} installed a key before its cluster ring finished",
                                node.name
                            ),
                        });
                    }
                    continue;
                },
            };

            let matches = source
                .and_then(|s| s.group_key.as_ref())
                .is_some_and(|k| k.key() == effective.as_bytes());
            if !matches {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{:?} {} installed a key its source ring did not establish",
                        node.role, node.name
                    ),
                });
            }
        }
        Ok(())
    }
}

/// Each session completes at most once and each node announces its effective
/// key at most once.
pub struct SingleCompletion;

impl Invariant for SingleCompletion {
    fn name(&self) -> &'static str {
        "single_completion"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for node in &state.nodes {
            if node.key_announcements > 1 {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "{} announced its effective key {} times",
                        node.name, node.key_announcements
                    ),
                });
            }
            for session in &node.sessions {
                if session.completions > 1 {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{} {:?} session completed {} times",
                            node.name, session.level, session.completions
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Failed verification never leaves a key behind.
pub struct AbortedHoldsNoKey;

impl Invariant for AbortedHoldsNoKey {
    fn name(&self) -> &'static str {
        "aborted_holds_no_key"
    }

    fn check(&self, state: &SystemSnapshot) -> InvariantResult {
        for node in &state.nodes {
            for session in &node.sessions {
                if session.state == SessionState::Aborted && session.group_key.is_some() {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "{} {:?} session aborted but kept its key",
                            node.name, session.level
                        ),
                    });
                }
            }
            if node.distributor_aborted && node.effective_key.is_some() {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("{} rejected a wrapped key but holds a key", node.name),
                });
            }
        }
        Ok(())
    }
}
