//! Property tests for the ring share algebra and key wrapping.
//!
//! Neighbor secrets are arbitrary 32-byte values; the properties hold for any
//! ring size and any secret assignment.

use lockring_crypto::{
    GroupKey, PartyId, Share, SharedSecret, WrappingKey, check_closure, derive_group_key,
    reconstruct_left_keys, unwrap_key, wrap_key, xor_all,
};
use proptest::prelude::*;

fn shares_for(secrets: &[SharedSecret]) -> Vec<Share> {
    let n = secrets.len();
    (0..n).map(|i| Share::from_neighbor_keys(&secrets[i], &secrets[(i + n - 1) % n])).collect()
}

fn secrets_strategy() -> impl Strategy<Value = Vec<SharedSecret>> {
    prop::collection::vec(any::<[u8; 32]>(), 3..=8)
        .prop_map(|raw| raw.into_iter().map(SharedSecret::from_bytes).collect())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn closure_holds_in_any_order(secrets in secrets_strategy(), seed in any::<u64>()) {
        let mut shares = shares_for(&secrets);
        let n = shares.len();
        shares.rotate_left((seed as usize) % n);
        if seed % 2 == 0 {
            shares.reverse();
        }

        prop_assert_eq!(xor_all(&shares), [0u8; 32]);
    }

    #[test]
    fn single_bit_flip_breaks_closure(
        secrets in secrets_strategy(),
        party in any::<prop::sample::Index>(),
        bit in 0usize..256,
    ) {
        let mut shares = shares_for(&secrets);
        let victim = party.index(shares.len());
        let mut bytes = *shares[victim].as_bytes();
        bytes[bit / 8] ^= 1 << (bit % 8);
        shares[victim] = Share::from_bytes(bytes);

        prop_assert!(!check_closure(&shares));
    }

    #[test]
    fn every_party_derives_the_same_group_key(secrets in secrets_strategy()) {
        let n = secrets.len();
        let shares = shares_for(&secrets);
        let ids: Vec<PartyId> =
            (0..n).map(|i| PartyId::new(&format!("party-{i}")).unwrap()).collect();

        let keys: Vec<GroupKey> = (0..n)
            .map(|me| {
                let own_left = &secrets[(me + n - 1) % n];
                derive_group_key(&reconstruct_left_keys(me, own_left, &shares), &ids)
            })
            .collect();

        for key in &keys[1..] {
            prop_assert_eq!(key, &keys[0]);
        }
    }

    #[test]
    fn wrap_unwrap_recovers_key(
        cluster in any::<[u8; 32]>(),
        session in any::<[u8; 32]>(),
        leader in any::<[u8; 32]>(),
    ) {
        let wrapping = WrappingKey::derive(&GroupKey::from_parts(cluster, session));
        let wrapped = wrap_key(&leader, &wrapping);

        prop_assert_eq!(unwrap_key(&wrapped, &wrapping).unwrap(), leader);
    }

    #[test]
    fn tampered_wrap_never_unwraps(
        cluster in any::<[u8; 32]>(),
        leader in any::<[u8; 32]>(),
        position in 0usize..64,
        flip in 1u8..=255,
    ) {
        let wrapping = WrappingKey::derive(&GroupKey::from_parts(cluster, [0; 32]));
        let mut wrapped = wrap_key(&leader, &wrapping);
        if position < 32 {
            wrapped.masked_key[position] ^= flip;
        } else {
            wrapped.tag[position - 32] ^= flip;
        }

        prop_assert!(unwrap_key(&wrapped, &wrapping).is_err());
    }
}
