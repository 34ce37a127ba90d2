//! Agreement under reordered and duplicated delivery.
//!
//! Every schedule the seeded network produces must end with one key per ring
//! and one effective key per deployment.

use lockring_core::SessionState;
use lockring_harness::{InvariantRegistry, NetworkConfig, SimWorld};
use proptest::prelude::*;

const MAX_STEPS: usize = 50_000;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn flat_ring_converges(seed in any::<u64>(), size in 3usize..=5) {
        let mut world = SimWorld::flat_with(seed, size, NetworkConfig::chaotic()).unwrap();
        world.start_all();
        world.run(MAX_STEPS);

        prop_assert!(world.network.is_idle());
        for sim in &world.nodes {
            prop_assert_eq!(sim.node.cluster_session().state(), SessionState::Established);
            prop_assert!(!sim.log.has_fatal_error(), "{}: {:?}", sim.name, sim.log.errors);
        }
        InvariantRegistry::standard().assert_all(&world.snapshot(), "after chaotic flat run");
    }

    #[test]
    fn hierarchy_converges(seed in any::<u64>(), members in 3usize..=4) {
        let mut world = SimWorld::hierarchical_with(
            seed,
            3,
            &[members, members],
            NetworkConfig::chaotic(),
        )
        .unwrap();
        world.start_all();
        world.run(MAX_STEPS);

        prop_assert!(world.nodes.iter().all(|n| n.cluster_key().is_some()));
        InvariantRegistry::standard().assert_all(&world.snapshot(), "after chaotic hierarchy");
    }
}

#[test]
fn duplicates_do_not_change_the_key() {
    let mut reliable = SimWorld::flat(5, 4).unwrap();
    reliable.start_all();
    reliable.run(MAX_STEPS);

    let config = NetworkConfig { reorder: false, duplicate_rate: 1.0 };
    let mut duplicated = SimWorld::flat_with(5, 4, config).unwrap();
    duplicated.start_all();
    duplicated.run(MAX_STEPS);

    assert_eq!(duplicated.network.delivered(), 2 * reliable.network.delivered());
    for (a, b) in reliable.nodes.iter().zip(&duplicated.nodes) {
        assert_eq!(a.cluster_key(), b.cluster_key());
        assert_eq!(b.log.cluster_keys.len(), 1);
    }
}
