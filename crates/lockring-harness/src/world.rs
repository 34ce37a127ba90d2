//! Simulated deployments: flat rings and leader/cluster hierarchies.
//!
//! A [`SimWorld`] owns every node, the ring layouts, and one [`SimNetwork`].
//! A packet sent on a ring is delivered to every other member of that ring,
//! mirroring a relay. Nodes are driven synchronously, so a seed plus a
//! network configuration fully determines a run.
//!
//! # Hierarchy Layout
//!
//! ```text
//! ring 0 (leader ring):  leader0  leader1  ...  leaderL
//!                           │        │
//! ring 1 (cluster 0):    leader0  c0m1  c0m2 ...
//! ring 2 (cluster 1):    leader1  c1m1  c1m2 ...
//! ```
//!
//! Leaders without a cluster are leader-only nodes: their cluster ring is the
//! leader ring itself.

use std::sync::Arc;

use lockring_core::{
    Environment, Level, Node, NodeAction, NodeEvent, NodeLayout, Party, Role, Roster,
    SessionError,
};
use lockring_crypto::{
    ClusterKey, CryptoProvider, GroupKey, Keypair, MlKemProvider, PartyId,
};
use tracing::debug;

use crate::{
    invariants::{NodeSnapshot, RingSnapshot, SessionSnapshot, SystemSnapshot},
    sim_env::SimEnv,
    sim_network::{NetworkConfig, Packet, SimNetwork},
};

/// What a node observed during a run.
#[derive(Debug, Clone, Default)]
pub struct NodeLog {
    /// Ring completions in order
    pub established: Vec<(Level, GroupKey)>,
    /// Effective cluster keys announced
    pub cluster_keys: Vec<ClusterKey>,
    /// Decrypted application messages
    pub delivered: Vec<(u32, Vec<u8>)>,
    /// Errors returned by the node
    pub errors: Vec<SessionError>,
}

impl NodeLog {
    /// Whether any returned error was fatal.
    pub fn has_fatal_error(&self) -> bool {
        self.errors.iter().any(SessionError::is_fatal)
    }
}

/// A node and its place in the world.
pub struct SimNode {
    /// Party name
    pub name: String,
    /// The sans-IO node
    pub node: Node<SimEnv>,
    /// World ring index of the node's cluster ring
    pub cluster_ring: usize,
    /// World ring index of the leader ring, for leaders
    pub leader_ring: Option<usize>,
    /// Observations
    pub log: NodeLog,
}

impl SimNode {
    /// The level at which this node participates in `ring`.
    pub fn level_for(&self, ring: usize) -> Option<Level> {
        if self.cluster_ring == ring {
            Some(Level::Cluster)
        } else if self.leader_ring == Some(ring) {
            Some(Level::Leader)
        } else {
            None
        }
    }

    /// The effective cluster key, once known.
    pub fn cluster_key(&self) -> Option<&ClusterKey> {
        self.node.cluster_key()
    }
}

/// Membership of one ring.
#[derive(Debug, Clone)]
pub struct RingLayout {
    /// The roster every member uses
    pub roster: Arc<Roster>,
    /// World node index of each ring index
    pub members: Vec<usize>,
}

/// Every node, ring, and in-flight packet of a simulation.
pub struct SimWorld {
    /// Nodes by world index
    pub nodes: Vec<SimNode>,
    /// Rings by world ring index
    pub rings: Vec<RingLayout>,
    /// The shared medium
    pub network: SimNetwork,
}

struct NodePlan {
    name: String,
    role: Role,
    cluster_ring: usize,
    leader_ring: Option<usize>,
}

impl SimWorld {
    /// A single ring of `size` standalone nodes with reliable delivery.
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: `size` is below the minimum ring size
    pub fn flat(seed: u64, size: usize) -> Result<Self, SessionError> {
        Self::flat_with(seed, size, NetworkConfig::reliable())
    }

    /// A single ring of `size` standalone nodes.
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: `size` is below the minimum ring size
    pub fn flat_with(seed: u64, size: usize, network: NetworkConfig) -> Result<Self, SessionError> {
        let plans = (0..size)
            .map(|i| NodePlan {
                name: format!("n{i}"),
                role: Role::Standalone,
                cluster_ring: 0,
                leader_ring: None,
            })
            .collect();
        Self::build(seed, network, plans, vec![(0..size).collect()], "flat")
    }

    /// A leader ring of `leader_count` leaders where leader `c` heads a
    /// cluster of `cluster_sizes[c]` nodes (itself included), with reliable
    /// delivery.
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: more clusters than leaders, or a ring below the
    ///   minimum size
    pub fn hierarchical(
        seed: u64,
        leader_count: usize,
        cluster_sizes: &[usize],
    ) -> Result<Self, SessionError> {
        Self::hierarchical_with(seed, leader_count, cluster_sizes, NetworkConfig::reliable())
    }

    /// See [`SimWorld::hierarchical`].
    ///
    /// # Errors
    ///
    /// - `InvalidRoster`: more clusters than leaders, or a ring below the
    ///   minimum size
    pub fn hierarchical_with(
        seed: u64,
        leader_count: usize,
        cluster_sizes: &[usize],
        network: NetworkConfig,
    ) -> Result<Self, SessionError> {
        if cluster_sizes.len() > leader_count {
            return Err(SessionError::InvalidRoster {
                reason: format!("{} clusters but {leader_count} leaders", cluster_sizes.len()),
            });
        }

        let mut plans: Vec<NodePlan> = (0..leader_count)
            .map(|l| {
                if l < cluster_sizes.len() {
                    NodePlan {
                        name: format!("leader{l}"),
                        role: Role::Leader,
                        cluster_ring: 1 + l,
                        leader_ring: Some(0),
                    }
                } else {
                    NodePlan {
                        name: format!("leader{l}"),
                        role: Role::Standalone,
                        cluster_ring: 0,
                        leader_ring: None,
                    }
                }
            })
            .collect();

        let mut rings = vec![(0..leader_count).collect::<Vec<_>>()];
        for (c, &size) in cluster_sizes.iter().enumerate() {
            let mut members = vec![c];
            for m in 1..size {
                members.push(plans.len());
                plans.push(NodePlan {
                    name: format!("c{c}m{m}"),
                    role: Role::Member,
                    cluster_ring: 1 + c,
                    leader_ring: None,
                });
            }
            rings.push(members);
        }

        Self::build(seed, network, plans, rings, "hier")
    }

    fn build(
        seed: u64,
        network: NetworkConfig,
        plans: Vec<NodePlan>,
        ring_members: Vec<Vec<usize>>,
        prefix: &str,
    ) -> Result<Self, SessionError> {
        let env = SimEnv::with_seed(seed);
        let provider = MlKemProvider;

        let keypairs = plans
            .iter()
            .map(|_| provider.generate_keypair(env.random_seed()))
            .collect::<Result<Vec<Keypair>, _>>()?;

        let rings = ring_members
            .into_iter()
            .enumerate()
            .map(|(r, members)| {
                let parties = members
                    .iter()
                    .map(|&id| {
                        Ok(Party {
                            id: PartyId::new(&plans[id].name)?,
                            public_key: keypairs[id].public.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, SessionError>>()?;
                let roster = Roster::new(format!("{prefix}-ring{r}"), parties)?;
                Ok(RingLayout { roster: Arc::new(roster), members })
            })
            .collect::<Result<Vec<_>, SessionError>>()?;

        let nodes = plans
            .into_iter()
            .zip(keypairs)
            .enumerate()
            .map(|(id, (plan, keypair))| {
                let position = |ring: usize| {
                    let layout = &rings[ring];
                    let index = layout.members.iter().position(|&m| m == id).ok_or_else(|| {
                        SessionError::InvalidRoster {
                            reason: format!("{} missing from ring {ring}", plan.name),
                        }
                    })?;
                    Ok::<_, SessionError>((Arc::clone(&layout.roster), index))
                };

                let (cluster, cluster_index) = position(plan.cluster_ring)?;
                let leader = plan.leader_ring.map(position).transpose()?;
                let layout = NodeLayout { cluster, cluster_index, leader, role: plan.role };
                let node = Node::new(env.fork(), provider, layout, keypair.secret)?;

                Ok(SimNode {
                    name: plan.name,
                    node,
                    cluster_ring: plan.cluster_ring,
                    leader_ring: plan.leader_ring,
                    log: NodeLog::default(),
                })
            })
            .collect::<Result<Vec<_>, SessionError>>()?;

        Ok(Self { nodes, rings, network: SimNetwork::new(env.random_u64(), network) })
    }

    /// Start every node.
    pub fn start_all(&mut self) {
        for id in 0..self.nodes.len() {
            self.start(id);
        }
    }

    /// Start one node.
    pub fn start(&mut self, id: usize) {
        let result = self.nodes[id].node.handle(NodeEvent::Start);
        self.apply(id, result);
    }

    /// Deliver one packet. Returns false when nothing was in flight.
    pub fn step(&mut self) -> bool {
        self.step_with(|_| {})
    }

    /// Deliver one packet after letting `hook` rewrite it.
    pub fn step_with(&mut self, hook: impl FnOnce(&mut Packet)) -> bool {
        let Some(mut packet) = self.network.take_next() else {
            return false;
        };
        hook(&mut packet);
        self.deliver(&packet);
        true
    }

    /// Deliver until the network is idle or `max_steps` packets went out.
    /// Returns the number of packets delivered.
    pub fn run(&mut self, max_steps: usize) -> usize {
        self.run_with(max_steps, |_| {})
    }

    /// [`SimWorld::run`] with a rewrite hook applied to every packet.
    pub fn run_with(&mut self, max_steps: usize, mut hook: impl FnMut(&mut Packet)) -> usize {
        let mut steps = 0;
        while steps < max_steps && self.step_with(&mut hook) {
            steps += 1;
        }
        steps
    }

    /// Encrypt and send an application message from node `id`.
    ///
    /// # Errors
    ///
    /// - `NoKeyAvailable`: the node has no effective key yet
    pub fn send_app_message(&mut self, id: usize, plaintext: &[u8]) -> Result<(), SessionError> {
        let envelope = self.nodes[id].node.seal_message(plaintext)?;
        self.network.send(id, Level::Cluster, envelope);
        Ok(())
    }

    /// The world ring a node uses at `level`.
    pub fn ring_of(&self, id: usize, level: Level) -> Option<usize> {
        let node = &self.nodes[id];
        match level {
            Level::Cluster => Some(node.cluster_ring),
            Level::Leader => node.leader_ring,
        }
    }

    /// World index of the node named `name`.
    pub fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.name == name)
    }

    /// Capture the observable state for invariant checks.
    pub fn snapshot(&self) -> SystemSnapshot {
        let rings = self
            .rings
            .iter()
            .map(|r| RingSnapshot { name: r.roster.name().to_string(), members: r.members.clone() })
            .collect();

        let nodes = self
            .nodes
            .iter()
            .enumerate()
            .map(|(id, sim)| {
                let completions = |level: Level| {
                    sim.log.established.iter().filter(|(l, _)| *l == level).count()
                };
                let mut sessions = vec![SessionSnapshot {
                    ring: sim.cluster_ring,
                    level: Level::Cluster,
                    state: sim.node.cluster_session().state(),
                    group_key: sim.node.cluster_session().group_key().cloned(),
                    completions: completions(Level::Cluster),
                }];
                if let (Some(ring), Some(session)) = (sim.leader_ring, sim.node.leader_session()) {
                    sessions.push(SessionSnapshot {
                        ring,
                        level: Level::Leader,
                        state: session.state(),
                        group_key: session.group_key().cloned(),
                        completions: completions(Level::Leader),
                    });
                }

                NodeSnapshot {
                    id,
                    name: sim.name.clone(),
                    role: sim.node.role(),
                    sessions,
                    effective_key: sim.node.cluster_key().cloned(),
                    key_announcements: sim.log.cluster_keys.len(),
                    distributor_aborted: sim.node.distributor().is_aborted(),
                }
            })
            .collect();

        SystemSnapshot { nodes, rings }
    }

    fn deliver(&mut self, packet: &Packet) {
        let Some(ring) = self.ring_of(packet.from, packet.level) else {
            debug!(from = packet.from, level = ?packet.level, "sender has no such ring");
            return;
        };

        let members = self.rings[ring].members.clone();
        for member in members {
            if member == packet.from {
                continue;
            }
            let Some(level) = self.nodes[member].level_for(ring) else {
                continue;
            };
            let event = NodeEvent::Received { level, envelope: packet.envelope.clone() };
            let result = self.nodes[member].node.handle(event);
            self.apply(member, result);
        }
    }

    fn apply(&mut self, id: usize, result: Result<Vec<NodeAction>, SessionError>) {
        let actions = match result {
            Ok(actions) => actions,
            Err(e) => {
                debug!(node = %self.nodes[id].name, error = %e, "node rejected input");
                self.nodes[id].log.errors.push(e);
                return;
            },
        };

        for action in actions {
            let log = &mut self.nodes[id].log;
            match action {
                NodeAction::Send { level, envelope } => self.network.send(id, level, envelope),
                NodeAction::SessionEstablished { level, key } => log.established.push((level, key)),
                NodeAction::ClusterKeyReady(key) => log.cluster_keys.push(key),
                NodeAction::Deliver { sender, plaintext } => {
                    log.delivered.push((sender, plaintext));
                },
                NodeAction::DistributionFailed(e) => log.errors.push(e),
            }
        }
    }
}
