//! Observable state snapshots for invariant checking.
//!
//! Invariants run against a snapshot rather than the live world so every
//! check sees the same instant.

use lockring_core::{Level, Role, SessionState};
use lockring_crypto::{ClusterKey, GroupKey};

/// Snapshot of every node and ring.
#[derive(Debug, Clone, Default)]
pub struct SystemSnapshot {
    /// Per-node state.
    pub nodes: Vec<NodeSnapshot>,
    /// Ring memberships, indexed by world ring index.
    pub rings: Vec<RingSnapshot>,
}

impl SystemSnapshot {
    /// Create an empty snapshot.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every session that runs on world ring `ring`.
    pub fn sessions_on(
        &self,
        ring: usize,
    ) -> impl Iterator<Item = (&NodeSnapshot, &SessionSnapshot)> {
        self.nodes
            .iter()
            .flat_map(|node| node.sessions.iter().map(move |session| (node, session)))
            .filter(move |(_, session)| session.ring == ring)
    }
}

/// Membership of one ring.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    /// Roster name
    pub name: String,
    /// World node index at each ring index
    pub members: Vec<usize>,
}

/// One node's observable state.
#[derive(Debug, Clone)]
pub struct NodeSnapshot {
    /// World index
    pub id: usize,
    /// Party name
    pub name: String,
    /// Hierarchy role
    pub role: Role,
    /// One entry per ring the node participates in
    pub sessions: Vec<SessionSnapshot>,
    /// Effective cluster key, if installed
    pub effective_key: Option<ClusterKey>,
    /// How many times the node announced an effective key
    pub key_announcements: usize,
    /// Whether wrapped-key verification failed
    pub distributor_aborted: bool,
}

impl NodeSnapshot {
    /// The session at `level`, if the node has one.
    pub fn session(&self, level: Level) -> Option<&SessionSnapshot> {
        self.sessions.iter().find(|s| s.level == level)
    }
}

/// One ring session's observable state.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// World ring index
    pub ring: usize,
    /// Level within the node
    pub level: Level,
    /// Current state
    pub state: SessionState,
    /// Group key, once established
    pub group_key: Option<GroupKey>,
    /// How many times the node reported this session established
    pub completions: usize,
}
