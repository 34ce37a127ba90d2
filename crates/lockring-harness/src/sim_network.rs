//! Simulated broadcast medium with seeded reordering and duplication.
//!
//! Packets are queued per send; [`SimNetwork::take_next`] picks which in-flight
//! packet is delivered next. With reordering enabled the pick is uniform over
//! everything in flight, which covers every interleaving the ring protocol can
//! observe (including shares overtaking AKE messages).

use lockring_core::Level;
use lockring_proto::Envelope;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// One sent envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// World index of the sending node
    pub from: usize,
    /// Ring level the sender used
    pub level: Level,
    /// The envelope
    pub envelope: Envelope,
    /// Whether this copy was produced by duplication
    pub duplicate: bool,
}

/// Delivery behaviour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NetworkConfig {
    /// Deliver in random order instead of FIFO
    pub reorder: bool,
    /// Probability that a delivered packet is delivered again later
    pub duplicate_rate: f64,
}

impl NetworkConfig {
    /// FIFO, no duplicates.
    pub fn reliable() -> Self {
        Self { reorder: false, duplicate_rate: 0.0 }
    }

    /// Random order with occasional duplicates.
    pub fn chaotic() -> Self {
        Self { reorder: true, duplicate_rate: 0.2 }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::reliable()
    }
}

/// In-flight packets and the scheduler that orders them.
pub struct SimNetwork {
    config: NetworkConfig,
    rng: ChaCha20Rng,
    in_flight: Vec<Packet>,
    delivered: usize,
}

impl SimNetwork {
    /// Create a network with its own seeded scheduler.
    pub fn new(seed: u64, config: NetworkConfig) -> Self {
        Self { config, rng: ChaCha20Rng::seed_from_u64(seed), in_flight: Vec::new(), delivered: 0 }
    }

    /// Queue a packet.
    pub fn send(&mut self, from: usize, level: Level, envelope: Envelope) {
        self.in_flight.push(Packet { from, level, envelope, duplicate: false });
    }

    /// Pick the next packet to deliver. Duplication re-queues a copy of the
    /// picked packet; copies are never duplicated again.
    pub fn take_next(&mut self) -> Option<Packet> {
        if self.in_flight.is_empty() {
            return None;
        }

        let index =
            if self.config.reorder { self.rng.gen_range(0..self.in_flight.len()) } else { 0 };
        let packet = self.in_flight.remove(index);

        if !packet.duplicate
            && self.config.duplicate_rate > 0.0
            && self.rng.gen_bool(self.config.duplicate_rate.min(1.0))
        {
            self.in_flight.push(Packet { duplicate: true, ..packet.clone() });
        }

        self.delivered += 1;
        Some(packet)
    }

    /// Packets still in flight.
    pub fn in_flight(&self) -> &[Packet] {
        &self.in_flight
    }

    /// Mutable access to in-flight packets, for adversarial tests.
    pub fn in_flight_mut(&mut self) -> &mut Vec<Packet> {
        &mut self.in_flight
    }

    /// Number of packets delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Whether nothing is in flight.
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }
}
