//! Fuzz target for the ring session state machine
//!
//! # Strategy
//!
//! - Three honest sessions exchange real traffic in a fuzzer-chosen order
//! - Messages may be delivered twice, dropped, or bit-flipped
//! - Forged envelopes with arbitrary sender, kind, and content are injected
//!
//! # Invariants
//!
//! - `handle` never panics
//! - Established sessions hold the same group key
//! - An aborted session holds no key and rejects every later event

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lockring_core::{
    env::test_utils::TestEnv, Environment, GakeSession, Party, Roster, SessionAction,
    SessionError, SessionEvent, SessionState,
};
use lockring_crypto::{CryptoProvider, MlKemProvider, PartyId};
use lockring_proto::{Envelope, MessageKind, Recipient};

const RING_SIZE: usize = 3;

#[derive(Debug, Clone, Arbitrary)]
enum Op {
    Start { party: u8 },
    Deliver { pick: u8 },
    Duplicate { pick: u8 },
    Drop { pick: u8 },
    Corrupt { pick: u8, byte: u16, mask: u8 },
    Inject { to: u8, sender: u32, kind: u8, broadcast: bool, content: Vec<u8> },
}

struct Ring {
    sessions: Vec<GakeSession<TestEnv>>,
    in_flight: Vec<(usize, Envelope)>,
}

impl Ring {
    fn new() -> Self {
        let keypairs: Vec<_> = (0..RING_SIZE)
            .map(|i| {
                let seed = TestEnv::starting_at(i as u64 * 7).random_seed();
                MlKemProvider.generate_keypair(seed).expect("seeded keygen")
            })
            .collect();
        let parties = keypairs
            .iter()
            .enumerate()
            .map(|(i, kp)| Party {
                id: PartyId::new(&format!("p{i}")).expect("short id"),
                public_key: kp.public.clone(),
            })
            .collect();
        let roster = Arc::new(Roster::new("fuzz", parties).expect("valid ring"));

        let sessions = keypairs
            .into_iter()
            .enumerate()
            .map(|(i, kp)| {
                let env = TestEnv::starting_at(1000 * (i as u64 + 1));
                GakeSession::new(env, MlKemProvider, Arc::clone(&roster), i, kp.secret)
                    .expect("index in range")
            })
            .collect();

        Self { sessions, in_flight: Vec::new() }
    }

    fn handle(&mut self, to: usize, event: SessionEvent) {
        let was_aborted = self.sessions[to].state() == SessionState::Aborted;
        let result = self.sessions[to].handle(event);

        if was_aborted {
            assert_eq!(result, Err(SessionError::Aborted));
        }
        if let Ok(actions) = result {
            for action in actions {
                if let SessionAction::Send(envelope) = action {
                    self.in_flight.push((to, envelope));
                }
            }
        }
    }

    fn deliver(&mut self, from: usize, envelope: &Envelope) {
        for to in 0..RING_SIZE {
            if to != from {
                self.handle(to, SessionEvent::Received(envelope.clone()));
            }
        }
    }

    fn take(&mut self, pick: u8) -> Option<(usize, Envelope)> {
        if self.in_flight.is_empty() {
            return None;
        }
        let index = pick as usize % self.in_flight.len();
        Some(self.in_flight.remove(index))
    }

    fn check(&self) {
        let mut keys = self.sessions.iter().filter_map(GakeSession::group_key);
        if let Some(first) = keys.next() {
            for key in keys {
                assert_eq!(key, first, "established sessions disagree");
            }
        }
        for session in &self.sessions {
            if session.state() == SessionState::Aborted {
                assert!(session.group_key().is_none(), "aborted session kept a key");
            }
            assert_eq!(session.is_established(), session.group_key().is_some());
        }
    }
}

fuzz_target!(|ops: Vec<Op>| {
    let mut ring = Ring::new();

    for op in ops.into_iter().take(256) {
        match op {
            Op::Start { party } => {
                ring.handle(party as usize % RING_SIZE, SessionEvent::Start);
            },
            Op::Deliver { pick } => {
                if let Some((from, envelope)) = ring.take(pick) {
                    ring.deliver(from, &envelope);
                }
            },
            Op::Duplicate { pick } => {
                if let Some((from, envelope)) = ring.take(pick) {
                    ring.deliver(from, &envelope);
                    ring.in_flight.push((from, envelope));
                }
            },
            Op::Drop { pick } => {
                let _ = ring.take(pick);
            },
            Op::Corrupt { pick, byte, mask } => {
                if let Some((from, envelope)) = ring.take(pick) {
                    let mut content = envelope.content.to_vec();
                    if !content.is_empty() {
                        let index = byte as usize % content.len();
                        content[index] ^= mask.max(1);
                    }
                    let forged = Envelope::new(
                        envelope.sender_index,
                        envelope.recipient,
                        envelope.kind,
                        content,
                    );
                    ring.deliver(from, &forged);
                }
            },
            Op::Inject { to, sender, kind, broadcast, content } => {
                let Some(kind) = MessageKind::from_code(i64::from(kind % 6)) else {
                    continue;
                };
                let recipient =
                    if broadcast { Recipient::Broadcast } else { Recipient::Party(u32::from(to)) };
                let envelope = Envelope::new(sender, recipient, kind, content);
                let to = to as usize % RING_SIZE;
                ring.handle(to, SessionEvent::Received(envelope));
            },
        }
        ring.check();
    }
});
