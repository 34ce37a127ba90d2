//! Tampered traffic: verification failures abort, and nothing keyed survives.

use lockring_core::{SessionError, SessionState, VerificationFailure};
use lockring_crypto::Share;
use lockring_harness::{InvariantRegistry, Packet, SimWorld};
use lockring_proto::{MessageKind, Payload, Recipient, ShareBroadcast};

const MAX_STEPS: usize = 50_000;

fn rewrite_share(packet: &mut Packet, victim: usize, edit: impl FnOnce(&mut ShareBroadcast)) {
    if packet.from != victim || packet.envelope.kind != MessageKind::ShareBroadcast {
        return;
    }
    let Payload::ShareBroadcast(mut broadcast) = Payload::from_envelope(&packet.envelope).unwrap()
    else {
        unreachable!("share envelope");
    };
    edit(&mut broadcast);
    packet.envelope = Payload::ShareBroadcast(broadcast)
        .to_envelope(packet.envelope.sender_index, Recipient::Broadcast)
        .unwrap();
}

#[test]
fn flipped_share_aborts_every_receiver() {
    let mut world = SimWorld::flat(21, 4).unwrap();
    world.start_all();
    world.run_with(MAX_STEPS, |packet| {
        rewrite_share(packet, 1, |b| {
            let mut bytes = *b.share.as_bytes();
            bytes[7] ^= 0x80;
            b.share = Share::from_bytes(bytes);
        });
    });

    for id in [0, 2, 3] {
        let sim = &world.nodes[id];
        assert_eq!(sim.node.cluster_session().state(), SessionState::Aborted, "{}", sim.name);
        assert!(sim.cluster_key().is_none());
        assert!(
            sim.log
                .errors
                .contains(&SessionError::Verification(VerificationFailure::Closure))
        );
    }
    InvariantRegistry::standard().assert_all(&world.snapshot(), "after share tampering");
}

#[test]
fn forged_commitment_names_the_offender() {
    let mut world = SimWorld::flat(22, 3).unwrap();
    world.start_all();
    world.run_with(MAX_STEPS, |packet| {
        rewrite_share(packet, 2, |b| b.commitment.tag[3] ^= 0x01);
    });

    let expected = SessionError::Verification(VerificationFailure::Commitment { index: 2 });
    for id in [0, 1] {
        assert!(world.nodes[id].log.errors.contains(&expected), "{}", world.nodes[id].name);
        assert_eq!(world.nodes[id].node.cluster_session().state(), SessionState::Aborted);
    }
    InvariantRegistry::standard().assert_all(&world.snapshot(), "after commitment tampering");
}

#[test]
fn tampered_wrapped_key_fails_only_that_cluster() {
    let mut world = SimWorld::hierarchical(23, 3, &[3, 3]).unwrap();
    world.start_all();
    world.run_with(MAX_STEPS, |packet| {
        if packet.from != 0 || packet.envelope.kind != MessageKind::WrappedKey {
            return;
        }
        let Payload::WrappedKey(mut wrapped) = Payload::from_envelope(&packet.envelope).unwrap()
        else {
            unreachable!("wrapped key envelope");
        };
        wrapped.tag[0] ^= 0xff;
        packet.envelope =
            Payload::WrappedKey(wrapped).to_envelope(0, Recipient::Broadcast).unwrap();
    });

    let tampered = world.rings[1].members[1..].to_vec();
    let healthy = world.rings[2].members[1..].to_vec();

    for id in tampered {
        let sim = &world.nodes[id];
        assert!(sim.node.distributor().is_aborted(), "{}", sim.name);
        assert!(sim.cluster_key().is_none());
        assert!(
            sim.log
                .errors
                .contains(&SessionError::Verification(VerificationFailure::WrappedKeyTag))
        );
        // The ring run itself succeeded
        assert_eq!(sim.node.cluster_session().state(), SessionState::Established);
    }
    for id in healthy {
        assert!(world.nodes[id].cluster_key().is_some(), "{}", world.nodes[id].name);
    }
    InvariantRegistry::standard().assert_all(&world.snapshot(), "after wrapped key tampering");
}

#[test]
fn dropped_share_stalls_without_a_key() {
    let mut world = SimWorld::flat(24, 3).unwrap();
    world.start_all();

    let mut steps = 0;
    while steps < MAX_STEPS {
        world
            .network
            .in_flight_mut()
            .retain(|p| !(p.from == 0 && p.envelope.kind == MessageKind::ShareBroadcast));
        if !world.step() {
            break;
        }
        steps += 1;
    }

    for sim in &world.nodes[1..] {
        assert_eq!(sim.node.cluster_session().state(), SessionState::AwaitingShares);
        assert!(sim.cluster_key().is_none());
    }
    InvariantRegistry::standard().assert_all(&world.snapshot(), "after dropped share");
}
