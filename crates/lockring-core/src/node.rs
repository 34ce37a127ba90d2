//! One hierarchy node: ring sessions, key distribution, and app messages.
//!
//! [`Node`] is the sans-IO unit the async runtime drives. It owns the
//! cluster-ring session, the leader-ring session for cluster leaders, the
//! [`KeyDistributor`], and the message cipher, and routes every inbound
//! envelope by `(Level, MessageKind)`.

use std::sync::Arc;

use lockring_crypto::{ClusterKey, CryptoProvider, GroupKey, MlKemProvider, SecretKey, open, seal};
use lockring_proto::{Envelope, MessageKind, Payload, ProtocolError, Recipient};
use tracing::{debug, warn};

use crate::{
    env::Environment,
    error::SessionError,
    hierarchy::{DistributorAction, KeyDistributor, Role},
    roster::Roster,
    session::{GakeSession, SessionAction, SessionEvent},
};

/// Which ring an envelope travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// The node's own cluster ring (or the only ring of a flat deployment)
    Cluster,
    /// The ring of cluster leaders
    Leader,
}

/// Where a node sits: its cluster ring, its index there, and for leaders the
/// leader ring and index.
#[derive(Debug, Clone)]
pub struct NodeLayout {
    /// Cluster ring
    pub cluster: Arc<Roster>,
    /// Own index in the cluster ring
    pub cluster_index: usize,
    /// Leader ring and own index there. Present iff `role` is `Leader`.
    pub leader: Option<(Arc<Roster>, usize)>,
    /// Role in the hierarchy
    pub role: Role,
}

/// Inputs to a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// Start every ring session
    Start,
    /// An envelope arrived on the transport for `level`
    Received {
        /// Ring the envelope arrived on
        level: Level,
        /// The envelope
        envelope: Envelope,
    },
}

/// Outputs of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeAction {
    /// Send `envelope` on the transport for `level`
    Send {
        /// Ring to send on
        level: Level,
        /// The envelope
        envelope: Envelope,
    },
    /// A ring session completed
    SessionEstablished {
        /// Ring that completed
        level: Level,
        /// The group key it derived
        key: GroupKey,
    },
    /// The effective cluster key is known; app messages can flow
    ClusterKeyReady(ClusterKey),
    /// An application message was decrypted
    Deliver {
        /// Cluster index of the sender
        sender: u32,
        /// Decrypted bytes
        plaintext: Vec<u8>,
    },
    /// Key distribution failed after a ring session completed. Sends in the
    /// same batch still belong to the completed session and must go out.
    DistributionFailed(SessionError),
}

/// A hierarchy node.
pub struct Node<E: Environment, P: CryptoProvider = MlKemProvider> {
    env: E,
    cluster: GakeSession<E, P>,
    leader: Option<GakeSession<E, P>>,
    distributor: KeyDistributor,
}

impl<E: Environment, P: CryptoProvider> Node<E, P> {
    /// Create a node. The same long-term secret key is used on both rings.
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: an index is outside its ring, or the presence of a
    ///   leader ring does not match the role
    pub fn new(
        env: E,
        provider: P,
        layout: NodeLayout,
        secret_key: SecretKey,
    ) -> Result<Self, SessionError> {
        let leader = match (layout.role, layout.leader) {
            (Role::Leader, Some((roster, index))) => Some(GakeSession::new(
                env.clone(),
                provider.clone(),
                roster,
                index,
                secret_key.clone(),
            )?),
            (Role::Leader, None) => {
                return Err(SessionError::InvalidRoster {
                    reason: "leader role requires a leader ring".to_string(),
                });
            },
            (role, Some(_)) => {
                return Err(SessionError::InvalidRoster {
                    reason: format!("{role:?} node cannot join a leader ring"),
                });
            },
            (_, None) => None,
        };
        let cluster = GakeSession::new(
            env.clone(),
            provider,
            layout.cluster,
            layout.cluster_index,
            secret_key,
        )?;

        Ok(Self { env, cluster, leader, distributor: KeyDistributor::new(layout.role) })
    }

    /// Role in the hierarchy.
    pub fn role(&self) -> Role {
        self.distributor.role()
    }

    /// The cluster-ring session.
    pub fn cluster_session(&self) -> &GakeSession<E, P> {
        &self.cluster
    }

    /// The leader-ring session, for leaders.
    pub fn leader_session(&self) -> Option<&GakeSession<E, P>> {
        self.leader.as_ref()
    }

    /// The key distributor.
    pub fn distributor(&self) -> &KeyDistributor {
        &self.distributor
    }

    /// The effective cluster key, once known.
    pub fn cluster_key(&self) -> Option<&ClusterKey> {
        self.distributor.effective_key()
    }

    /// Process one event.
    ///
    /// # Errors
    ///
    /// Errors from the ring sessions and the distributor pass through
    /// unchanged; see [`SessionError::is_fatal`].
    pub fn handle(&mut self, event: NodeEvent) -> Result<Vec<NodeAction>, SessionError> {
        match event {
            NodeEvent::Start => {
                let mut actions = Vec::new();
                let cluster = self.cluster.handle(SessionEvent::Start)?;
                self.apply_session(Level::Cluster, cluster, &mut actions);
                if let Some(leader) = self.leader.as_mut() {
                    let leader = leader.handle(SessionEvent::Start)?;
                    self.apply_session(Level::Leader, leader, &mut actions);
                }
                Ok(actions)
            },
            NodeEvent::Received { level, envelope } => self.handle_envelope(level, envelope),
        }
    }

    /// Encrypt `plaintext` under the effective cluster key as an APP_MESSAGE
    /// for the cluster ring.
    ///
    /// # Errors
    ///
    /// - `NoKeyAvailable`: the effective key is not known yet
    pub fn seal_message(&self, plaintext: &[u8]) -> Result<Envelope, SessionError> {
        let key = self.distributor.effective_key().ok_or(SessionError::NoKeyAvailable)?;
        let sender = self.cluster_index();
        let sealed = seal(key, sender, plaintext, self.env.random_array());
        Ok(Payload::AppMessage(sealed).to_envelope(sender, Recipient::Broadcast)?)
    }

    fn handle_envelope(
        &mut self,
        level: Level,
        envelope: Envelope,
    ) -> Result<Vec<NodeAction>, SessionError> {
        match envelope.kind {
            MessageKind::AkeInit | MessageKind::AkeRespond | MessageKind::ShareBroadcast => {
                let session = match level {
                    Level::Cluster => &mut self.cluster,
                    Level::Leader => match self.leader.as_mut() {
                        Some(session) => session,
                        None => {
                            return Err(SessionError::UnexpectedKind {
                                kind: envelope.kind,
                                layer: "node without a leader ring",
                            });
                        },
                    },
                };
                let session_actions = session.handle(SessionEvent::Received(envelope))?;
                let mut actions = Vec::new();
                self.apply_session(level, session_actions, &mut actions);
                Ok(actions)
            },
            MessageKind::WrappedKey => {
                let Some(sender) = self.cluster_payload_sender(level, &envelope)? else {
                    return Ok(Vec::new());
                };
                let Payload::WrappedKey(wrapped) = Payload::from_envelope(&envelope)? else {
                    return Err(ProtocolError::UnknownKind(i64::from(envelope.kind.code())).into());
                };
                let distributed = self.distributor.wrapped_key_received(sender, wrapped)?;
                let mut actions = Vec::new();
                self.apply_distributor(distributed, &mut actions)?;
                Ok(actions)
            },
            MessageKind::AppMessage => {
                let Some(sender) = self.cluster_payload_sender(level, &envelope)? else {
                    return Ok(Vec::new());
                };
                let Payload::AppMessage(sealed) = Payload::from_envelope(&envelope)? else {
                    return Err(ProtocolError::UnknownKind(i64::from(envelope.kind.code())).into());
                };
                let key = self.distributor.effective_key().ok_or_else(|| {
                    debug!(sender, "app message before the cluster key is known");
                    SessionError::NoKeyAvailable
                })?;
                let plaintext = open(key, sender, &sealed).map_err(|e| {
                    warn!(sender, error = %e, "dropping app message that failed to open");
                    SessionError::from(e)
                })?;
                Ok(vec![NodeAction::Deliver { sender, plaintext }])
            },
        }
    }

    /// Filter for cluster-only kinds. `Ok(None)` means "not for us".
    fn cluster_payload_sender(
        &self,
        level: Level,
        envelope: &Envelope,
    ) -> Result<Option<u32>, SessionError> {
        if level != Level::Cluster {
            return Err(SessionError::UnexpectedKind { kind: envelope.kind, layer: "leader ring" });
        }
        let roster = self.cluster.roster();
        if envelope.sender_index as usize >= roster.len() {
            return Err(ProtocolError::InvalidIndex(i64::from(envelope.sender_index)).into());
        }
        let own = self.cluster_index();
        if envelope.sender_index == own || !envelope.recipient.includes(own) {
            return Ok(None);
        }
        Ok(Some(envelope.sender_index))
    }

    /// Distributor failures become [`NodeAction::DistributionFailed`] so the
    /// session's own sends are never lost.
    fn apply_session(
        &mut self,
        level: Level,
        session_actions: Vec<SessionAction>,
        actions: &mut Vec<NodeAction>,
    ) {
        for action in session_actions {
            match action {
                SessionAction::Send(envelope) => actions.push(NodeAction::Send { level, envelope }),
                SessionAction::Established(key) => {
                    actions.push(NodeAction::SessionEstablished { level, key: key.clone() });
                    let distributed = match level {
                        Level::Cluster => self.distributor.cluster_established(key),
                        Level::Leader => self.distributor.leader_established(key),
                    };
                    if let Err(e) = distributed.and_then(|d| self.apply_distributor(d, actions)) {
                        warn!(level = ?level, error = %e, "key distribution failed");
                        actions.push(NodeAction::DistributionFailed(e));
                    }
                },
            }
        }
    }

    fn apply_distributor(
        &self,
        distributed: Vec<DistributorAction>,
        actions: &mut Vec<NodeAction>,
    ) -> Result<(), SessionError> {
        for action in distributed {
            match action {
                DistributorAction::BroadcastWrapped(wrapped) => {
                    let envelope = Payload::WrappedKey(wrapped)
                        .to_envelope(self.cluster_index(), Recipient::Broadcast)?;
                    actions.push(NodeAction::Send { level: Level::Cluster, envelope });
                },
                DistributorAction::EffectiveKey(key) => {
                    actions.push(NodeAction::ClusterKeyReady(key));
                },
            }
        }
        Ok(())
    }

    fn cluster_index(&self) -> u32 {
        self.cluster.own_index() as u32
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use lockring_crypto::{PartyId, SEED_SIZE, WrappedKey};

    use super::*;
    use crate::{
        env::test_utils::TestEnv, error::VerificationFailure, roster::Party,
        session::SessionState,
    };

    type TestNode = Node<TestEnv>;

    fn flat_ring(n: usize) -> Vec<TestNode> {
        ring_of(n, Role::Standalone)
    }

    fn ring_of(n: usize, role: Role) -> Vec<TestNode> {
        let provider = MlKemProvider;
        let keypairs: Vec<_> = (0..n)
            .map(|i| provider.generate_keypair([0x40 + i as u8; SEED_SIZE]).unwrap())
            .collect();
        let parties = keypairs
            .iter()
            .enumerate()
            .map(|(i, kp)| Party {
                id: PartyId::new(&format!("n{i}")).unwrap(),
                public_key: kp.public.clone(),
            })
            .collect();
        let roster = Arc::new(Roster::new("flat", parties).unwrap());
        let env = TestEnv::default();

        keypairs
            .into_iter()
            .enumerate()
            .map(|(i, kp)| {
                let layout = NodeLayout {
                    cluster: roster.clone(),
                    cluster_index: i,
                    leader: None,
                    role,
                };
                Node::new(env.clone(), provider, layout, kp.secret).unwrap()
            })
            .collect()
    }

    /// Drive to quiescence; returns every non-send action per node.
    fn run(nodes: &mut [TestNode], initial: Vec<(usize, NodeAction)>) -> Vec<Vec<NodeAction>> {
        let (outputs, _) = run_holding(nodes, initial, |_, _| false);
        outputs
    }

    /// Like [`run`], but sends matching `hold` are set aside undelivered.
    fn run_holding(
        nodes: &mut [TestNode],
        initial: Vec<(usize, NodeAction)>,
        hold: impl Fn(usize, &Envelope) -> bool,
    ) -> (Vec<Vec<NodeAction>>, Vec<(usize, NodeAction)>) {
        let mut outputs = vec![Vec::new(); nodes.len()];
        let mut held = Vec::new();
        let mut queue: VecDeque<_> = initial.into();
        while let Some((from, action)) = queue.pop_front() {
            match action {
                NodeAction::Send { level, envelope } if hold(from, &envelope) => {
                    held.push((from, NodeAction::Send { level, envelope }));
                },
                NodeAction::Send { level, envelope } => {
                    for to in (0..nodes.len()).filter(|to| *to != from) {
                        let event = NodeEvent::Received { level, envelope: envelope.clone() };
                        for next in nodes[to].handle(event).unwrap() {
                            queue.push_back((to, next));
                        }
                    }
                },
                other => outputs[from].push(other),
            }
        }
        (outputs, held)
    }

    fn start_all(nodes: &mut [TestNode]) -> Vec<Vec<NodeAction>> {
        let mut initial = Vec::new();
        for (i, node) in nodes.iter_mut().enumerate() {
            initial.extend(node.handle(NodeEvent::Start).unwrap().into_iter().map(|a| (i, a)));
        }
        run(nodes, initial)
    }

    #[test]
    fn flat_ring_reaches_shared_cluster_key() {
        let mut nodes = flat_ring(3);
        let outputs = start_all(&mut nodes);

        let key = nodes[0].cluster_key().unwrap().clone();
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.cluster_key(), Some(&key));
            assert!(outputs[i].contains(&NodeAction::ClusterKeyReady(key.clone())));
            assert!(outputs[i].iter().any(|a| matches!(
                a,
                NodeAction::SessionEstablished { level: Level::Cluster, .. }
            )));
        }
    }

    #[test]
    fn app_message_reaches_every_other_node() {
        let mut nodes = flat_ring(4);
        start_all(&mut nodes);

        let envelope = nodes[2].seal_message(b"ring says hi").unwrap();
        let outputs =
            run(&mut nodes, vec![(2, NodeAction::Send { level: Level::Cluster, envelope })]);

        for (i, output) in outputs.iter().enumerate() {
            if i == 2 {
                assert!(output.is_empty());
            } else {
                assert_eq!(
                    output,
                    &vec![NodeAction::Deliver { sender: 2, plaintext: b"ring says hi".to_vec() }]
                );
            }
        }
    }

    #[test]
    fn sealing_before_key_is_declined() {
        let nodes = flat_ring(3);
        assert_eq!(nodes[0].seal_message(b"too early"), Err(SessionError::NoKeyAvailable));
    }

    #[test]
    fn app_message_before_key_is_declined() {
        let mut nodes = flat_ring(3);
        let mut established = flat_ring(3);
        start_all(&mut established);

        let envelope = established[1].seal_message(b"hello").unwrap();
        let result = nodes[0].handle(NodeEvent::Received { level: Level::Cluster, envelope });
        assert_eq!(result, Err(SessionError::NoKeyAvailable));
    }

    #[test]
    fn forged_sender_fails_to_open() {
        let mut nodes = flat_ring(3);
        start_all(&mut nodes);

        let mut envelope = nodes[1].seal_message(b"hello").unwrap();
        envelope.sender_index = 2;
        let result = nodes[0].handle(NodeEvent::Received { level: Level::Cluster, envelope });
        assert!(matches!(result, Err(SessionError::Crypto(_))));
    }

    #[test]
    fn leader_level_traffic_needs_a_leader_ring() {
        let mut nodes = flat_ring(3);
        let envelope = Envelope::new(1, Recipient::Broadcast, MessageKind::ShareBroadcast, vec![]);
        let result = nodes[0].handle(NodeEvent::Received { level: Level::Leader, envelope });
        assert!(matches!(result, Err(SessionError::UnexpectedKind { .. })));
    }

    #[test]
    fn layout_must_match_role() {
        let provider = MlKemProvider;
        let nodes = flat_ring(3);
        let roster = Arc::new(nodes[0].cluster_session().roster().clone());
        let secret = provider.generate_keypair([1; SEED_SIZE]).unwrap().secret;

        let missing_leader_ring = NodeLayout {
            cluster: roster.clone(),
            cluster_index: 0,
            leader: None,
            role: Role::Leader,
        };
        let result = Node::new(TestEnv::default(), provider, missing_leader_ring, secret.clone());
        assert!(result.is_err());

        let member_in_leader_ring = NodeLayout {
            cluster: roster.clone(),
            cluster_index: 0,
            leader: Some((roster, 1)),
            role: Role::Member,
        };
        assert!(Node::new(TestEnv::default(), provider, member_in_leader_ring, secret).is_err());
    }

    #[test]
    fn failed_unwrap_still_sends_own_share() {
        let mut nodes = ring_of(3, Role::Member);

        // A forged wrapped key waits in node 1's buffer until its cluster
        // session completes
        let forged = Payload::WrappedKey(WrappedKey { masked_key: [1; 32], tag: [2; 32] })
            .to_envelope(0, Recipient::Broadcast)
            .unwrap();
        let buffered =
            nodes[1].handle(NodeEvent::Received { level: Level::Cluster, envelope: forged });
        assert_eq!(buffered, Ok(Vec::new()));

        let mut initial = Vec::new();
        for (i, node) in nodes.iter_mut().enumerate() {
            initial.extend(node.handle(NodeEvent::Start).unwrap().into_iter().map(|a| (i, a)));
        }

        // Node 2 answers node 1 last, so node 1 completes and broadcasts its
        // share in the same call
        let (mut outputs, held) = run_holding(&mut nodes, initial, |from, envelope| {
            from == 2 && envelope.kind == MessageKind::AkeRespond
        });
        assert_eq!(held.len(), 1);
        for (i, output) in run(&mut nodes, held).into_iter().enumerate() {
            outputs[i].extend(output);
        }

        let failure = SessionError::Verification(VerificationFailure::WrappedKeyTag);
        assert!(outputs[1].contains(&NodeAction::DistributionFailed(failure)));
        assert!(nodes[1].distributor().is_aborted());

        let key = nodes[1].cluster_session().group_key().unwrap().clone();
        for (i, node) in nodes.iter().enumerate() {
            assert_eq!(node.cluster_session().state(), SessionState::Established, "node {i}");
            assert_eq!(node.cluster_session().group_key(), Some(&key), "node {i}");
        }
    }
}
