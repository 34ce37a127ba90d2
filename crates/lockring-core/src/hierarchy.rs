//! Hierarchical key distribution.
//!
//! A cluster leader sits in two rings. Once it holds both group keys it wraps
//! the leader-ring key under a key derived from the cluster-ring key and
//! broadcasts it into the cluster; members unwrap it and from then on every
//! node in every cluster shares one effective key.
//!
//! ```text
//!           leader ring (L0 .. Ln)
//!                  │ leader key
//!      ┌───────────┴───────────┐
//!   wrap under             wrap under
//!   cluster key A          cluster key B
//!      │                        │
//!  cluster A members      cluster B members
//! ```

use lockring_crypto::{ClusterKey, GroupKey, WrappedKey, WrappingKey, unwrap_key, wrap_key};
use tracing::{debug, error, info, warn};

use crate::error::{SessionError, VerificationFailure};

/// Position of a node in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Plain ring or leader-only node: the cluster-ring key is the effective
    /// key.
    Standalone,
    /// Cluster member: the effective key arrives wrapped from the leader.
    Member,
    /// Cluster leader: runs the leader ring and wraps its key for the cluster.
    Leader,
}

/// Outputs of the distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributorAction {
    /// Broadcast this wrapped key into the cluster ring.
    BroadcastWrapped(WrappedKey),
    /// The effective cluster key is now known. Emitted once.
    EffectiveKey(ClusterKey),
}

/// Turns established group keys into the effective cluster key.
#[derive(Debug)]
pub struct KeyDistributor {
    role: Role,
    cluster_key: Option<GroupKey>,
    leader_key: Option<GroupKey>,
    /// Wrapped key that arrived before the cluster key (member only)
    pending: Option<(u32, WrappedKey)>,
    effective: Option<ClusterKey>,
    aborted: bool,
}

impl KeyDistributor {
    /// Create a distributor for `role`.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            cluster_key: None,
            leader_key: None,
            pending: None,
            effective: None,
            aborted: false,
        }
    }

    /// The configured role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The effective cluster key, once known.
    pub fn effective_key(&self) -> Option<&ClusterKey> {
        self.effective.as_ref()
    }

    /// Whether a wrapped key failed authentication.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// The cluster-ring session established `key`.
    ///
    /// # Errors
    ///
    /// - `Aborted`: a previous unwrap failed
    /// - `Verification(WrappedKeyTag)`: a buffered wrapped key failed
    ///   authentication
    pub fn cluster_established(
        &mut self,
        key: GroupKey,
    ) -> Result<Vec<DistributorAction>, SessionError> {
        self.ensure_live()?;
        if self.cluster_key.is_some() {
            debug!(role = ?self.role, "cluster key already recorded");
            return Ok(Vec::new());
        }

        let session = key.fingerprint();
        self.cluster_key = Some(key.clone());

        match self.role {
            Role::Standalone => {
                info!(role = ?self.role, session = %session, "cluster key is the effective key");
                Ok(self.install(ClusterKey::from_bytes(*key.key())).into_iter().collect())
            },
            Role::Leader => Ok(self.try_wrap()),
            Role::Member => match self.pending.take() {
                Some((sender, wrapped)) => {
                    debug!(role = ?self.role, sender, "unwrapping buffered wrapped key");
                    self.unwrap_from(sender, &wrapped)
                },
                None => Ok(Vec::new()),
            },
        }
    }

    /// The leader-ring session established `key`.
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: this node is not a leader
    /// - `Aborted`: a previous unwrap failed
    pub fn leader_established(
        &mut self,
        key: GroupKey,
    ) -> Result<Vec<DistributorAction>, SessionError> {
        self.ensure_live()?;
        if self.role != Role::Leader {
            return Err(SessionError::InvalidRoster {
                reason: format!("{:?} node received a leader-ring key", self.role),
            });
        }
        if self.leader_key.is_some() {
            debug!(role = ?self.role, "leader key already recorded");
            return Ok(Vec::new());
        }

        self.leader_key = Some(key);
        Ok(self.try_wrap())
    }

    /// A WRAPPED_KEY arrived from cluster party `sender`.
    ///
    /// Before the cluster key exists it is buffered, replacing any earlier
    /// buffered one.
    ///
    /// # Errors
    ///
    /// - `Aborted`: a previous unwrap failed
    /// - `Verification(WrappedKeyTag)`: HMAC mismatch; the distributor aborts
    pub fn wrapped_key_received(
        &mut self,
        sender: u32,
        wrapped: WrappedKey,
    ) -> Result<Vec<DistributorAction>, SessionError> {
        self.ensure_live()?;
        if self.role != Role::Member {
            warn!(role = ?self.role, sender, "dropping wrapped key sent to a non-member");
            return Ok(Vec::new());
        }
        if self.effective.is_some() {
            debug!(role = ?self.role, sender, "effective key already installed");
            return Ok(Vec::new());
        }
        if self.cluster_key.is_none() {
            if self.pending.is_some() {
                warn!(role = ?self.role, sender, "replacing buffered wrapped key");
            } else {
                debug!(role = ?self.role, sender, "wrapped key buffered until cluster key exists");
            }
            self.pending = Some((sender, wrapped));
            return Ok(Vec::new());
        }

        self.unwrap_from(sender, &wrapped)
    }

    fn try_wrap(&mut self) -> Vec<DistributorAction> {
        if self.effective.is_some() {
            return Vec::new();
        }
        let (Some(cluster_key), Some(leader_key)) = (&self.cluster_key, &self.leader_key) else {
            return Vec::new();
        };

        let wrapping = WrappingKey::derive(cluster_key);
        let wrapped = wrap_key(leader_key.key(), &wrapping);
        let effective = ClusterKey::from_bytes(*leader_key.key());
        info!(
            role = ?self.role,
            cluster = %cluster_key.fingerprint(),
            leader = %leader_key.fingerprint(),
            "distributing leader key to cluster"
        );

        let mut actions = vec![DistributorAction::BroadcastWrapped(wrapped)];
        actions.extend(self.install(effective));
        actions
    }

    fn unwrap_from(
        &mut self,
        sender: u32,
        wrapped: &WrappedKey,
    ) -> Result<Vec<DistributorAction>, SessionError> {
        let Some(cluster_key) = &self.cluster_key else {
            return Ok(Vec::new());
        };

        let wrapping = WrappingKey::derive(cluster_key);
        match unwrap_key(wrapped, &wrapping) {
            Ok(key) => {
                info!(role = ?self.role, sender, "installed leader key from cluster leader");
                Ok(self.install(ClusterKey::from_bytes(key)).into_iter().collect())
            },
            Err(e) => {
                error!(role = ?self.role, sender, error = %e, "wrapped key rejected, aborting");
                self.aborted = true;
                self.pending = None;
                Err(SessionError::Verification(VerificationFailure::WrappedKeyTag))
            },
        }
    }

    fn install(&mut self, key: ClusterKey) -> Option<DistributorAction> {
        if self.effective.is_some() {
            return None;
        }
        self.effective = Some(key.clone());
        Some(DistributorAction::EffectiveKey(key))
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.aborted { Err(SessionError::Aborted) } else { Ok(()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_key(seed: u8) -> GroupKey {
        GroupKey::from_parts([seed; 32], [seed.wrapping_add(1); 32])
    }

    fn leader_wraps(cluster: &GroupKey, leader: &GroupKey) -> WrappedKey {
        let mut distributor = KeyDistributor::new(Role::Leader);
        distributor.cluster_established(cluster.clone()).unwrap();
        let actions = distributor.leader_established(leader.clone()).unwrap();
        match &actions[0] {
            DistributorAction::BroadcastWrapped(wrapped) => *wrapped,
            other => panic!("expected wrapped key, got {other:?}"),
        }
    }

    #[test]
    fn standalone_uses_cluster_key() {
        let mut distributor = KeyDistributor::new(Role::Standalone);
        let actions = distributor.cluster_established(group_key(1)).unwrap();

        let expected = ClusterKey::from_bytes(*group_key(1).key());
        assert_eq!(actions, vec![DistributorAction::EffectiveKey(expected.clone())]);
        assert_eq!(distributor.effective_key(), Some(&expected));
    }

    #[test]
    fn leader_waits_for_both_keys_in_either_order() {
        for leader_first in [false, true] {
            let mut distributor = KeyDistributor::new(Role::Leader);
            let first = if leader_first {
                distributor.leader_established(group_key(9)).unwrap()
            } else {
                distributor.cluster_established(group_key(1)).unwrap()
            };
            assert!(first.is_empty());

            let second = if leader_first {
                distributor.cluster_established(group_key(1)).unwrap()
            } else {
                distributor.leader_established(group_key(9)).unwrap()
            };
            assert_eq!(second.len(), 2);
            assert_eq!(
                distributor.effective_key(),
                Some(&ClusterKey::from_bytes(*group_key(9).key()))
            );
        }
    }

    #[test]
    fn member_recovers_leader_key() {
        let wrapped = leader_wraps(&group_key(1), &group_key(9));

        let mut member = KeyDistributor::new(Role::Member);
        member.cluster_established(group_key(1)).unwrap();
        let actions = member.wrapped_key_received(0, wrapped).unwrap();

        let expected = ClusterKey::from_bytes(*group_key(9).key());
        assert_eq!(actions, vec![DistributorAction::EffectiveKey(expected)]);
    }

    #[test]
    fn early_wrapped_key_is_buffered() {
        let wrapped = leader_wraps(&group_key(1), &group_key(9));

        let mut member = KeyDistributor::new(Role::Member);
        assert!(member.wrapped_key_received(0, wrapped).unwrap().is_empty());
        assert!(member.effective_key().is_none());

        let actions = member.cluster_established(group_key(1)).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(member.effective_key(), Some(&ClusterKey::from_bytes(*group_key(9).key())));
    }

    #[test]
    fn buffered_wrapped_key_is_last_write_wins() {
        let stale = leader_wraps(&group_key(2), &group_key(8));
        let fresh = leader_wraps(&group_key(1), &group_key(9));

        let mut member = KeyDistributor::new(Role::Member);
        member.wrapped_key_received(0, stale).unwrap();
        member.wrapped_key_received(0, fresh).unwrap();

        member.cluster_established(group_key(1)).unwrap();
        assert_eq!(member.effective_key(), Some(&ClusterKey::from_bytes(*group_key(9).key())));
    }

    #[test]
    fn tampered_wrapped_key_aborts() {
        let mut wrapped = leader_wraps(&group_key(1), &group_key(9));
        wrapped.masked_key[5] ^= 0x01;

        let mut member = KeyDistributor::new(Role::Member);
        member.cluster_established(group_key(1)).unwrap();
        let result = member.wrapped_key_received(0, wrapped);

        assert_eq!(result, Err(SessionError::Verification(VerificationFailure::WrappedKeyTag)));
        assert!(member.is_aborted());
        assert!(member.effective_key().is_none());
        assert_eq!(member.wrapped_key_received(0, wrapped), Err(SessionError::Aborted));
    }

    #[test]
    fn wrapped_key_from_another_cluster_fails() {
        let wrapped = leader_wraps(&group_key(3), &group_key(9));

        let mut member = KeyDistributor::new(Role::Member);
        member.cluster_established(group_key(1)).unwrap();
        let result = member.wrapped_key_received(0, wrapped);
        assert!(result.is_err_and(|e| e.is_fatal()));
    }

    #[test]
    fn only_leaders_accept_leader_keys() {
        let mut member = KeyDistributor::new(Role::Member);
        let result = member.leader_established(group_key(9));
        assert!(matches!(result, Err(SessionError::InvalidRoster { .. })));
    }

    #[test]
    fn duplicate_wrapped_key_after_install_is_ignored() {
        let wrapped = leader_wraps(&group_key(1), &group_key(9));

        let mut member = KeyDistributor::new(Role::Member);
        member.cluster_established(group_key(1)).unwrap();
        member.wrapped_key_received(0, wrapped).unwrap();
        assert!(member.wrapped_key_received(0, wrapped).unwrap().is_empty());
    }

    #[test]
    fn non_members_drop_wrapped_keys_and_stay_live() {
        let forged = WrappedKey { masked_key: [1; 32], tag: [2; 32] };
        for role in [Role::Leader, Role::Standalone] {
            let mut distributor = KeyDistributor::new(role);
            distributor.cluster_established(group_key(1)).unwrap();
            let before = distributor.effective_key().cloned();

            assert!(distributor.wrapped_key_received(2, forged).unwrap().is_empty());
            assert!(!distributor.is_aborted(), "{role:?}");
            assert_eq!(distributor.effective_key().cloned(), before, "{role:?}");
        }
    }
}
