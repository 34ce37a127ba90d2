//! ML-KEM-768 implementation of [`CryptoProvider`].
//!
//! # Ring AKE
//!
//! ```text
//! A (initiator)                              B (responder)
//!   (ek_e, dk_e) = KeyGen
//!   (k1, ct_b)   = Encaps(pk_B)
//!          ── ek_e ‖ ct_b ──────────────────▶
//!                                             (k2, ct_e) = Encaps(ek_e)
//!                                             (k3, ct_a) = Encaps(pk_A)
//!                                             k1         = Decaps(sk_B, ct_b)
//!          ◀────────────────── ct_e ‖ ct_a ──
//!   k2 = Decaps(dk_e, ct_e)
//!   k3 = Decaps(sk_A, ct_a)
//!
//!   key = HKDF-SHA256(k1 ‖ k2 ‖ k3)          key = HKDF-SHA256(k1 ‖ k2 ‖ k3)
//! ```
//!
//! `k1` authenticates B (only B can decapsulate `ct_b`), `k3` authenticates A,
//! and `k2` gives forward secrecy through the discarded ephemeral key.
//!
//! # Commitment
//!
//! `coin[0..32]` seeds the encapsulation under the committer's public key; the
//! resulting shared secret keys ChaCha20-Poly1305 with nonce `coin[32..44]`
//! over the 36-byte share message. Anyone holding the coin recomputes the
//! exact same bytes.

use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{AeadInPlace, KeyInit},
};
use fips203::{
    ml_kem_768,
    traits::{Decaps, Encaps, KeyGen, SerDes},
};
use hkdf::Hkdf;
use rand_chacha::{ChaCha20Rng, rand_core::SeedableRng};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::{
    error::CryptoError,
    provider::{
        AkeInitMessage, AkeResponseMessage, AkeTranscript, COMMITMENT_TAG_SIZE, Ciphertext,
        Coin, Commitment, CryptoProvider, Keypair, PublicKey, SEED_SIZE, SHARE_MESSAGE_SIZE,
        SHARED_SECRET_SIZE, SecretKey, SharedSecret,
    },
};

/// Label binding the AKE key derivation to this protocol.
const AKE_LABEL: &[u8] = b"lockringAkeV1";

/// Associated data for the symmetric half of a commitment.
const COMMIT_LABEL: &[u8] = b"lockringCommitV1";

/// ML-KEM-768 provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlKemProvider;

impl MlKemProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

impl CryptoProvider for MlKemProvider {
    fn generate_keypair(&self, seed: [u8; SEED_SIZE]) -> Result<Keypair, CryptoError> {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let (ek, dk) =
            ml_kem_768::KG::try_keygen_with_rng(&mut rng).map_err(CryptoError::kem("keygen"))?;

        Ok(Keypair {
            public: PublicKey::from_bytes(ek.into_bytes()),
            secret: SecretKey::from_bytes(dk.into_bytes()),
        })
    }

    fn ake_initiate(
        &self,
        peer: &PublicKey,
        seed: [u8; SEED_SIZE],
    ) -> Result<(AkeInitMessage, AkeTranscript), CryptoError> {
        let mut rng = ChaCha20Rng::from_seed(seed);
        let (ek_e, dk_e) = ml_kem_768::KG::try_keygen_with_rng(&mut rng)
            .map_err(CryptoError::kem("ephemeral keygen"))?;

        let peer_ek = encaps_key(peer)?;
        let (k1, ct_b) =
            peer_ek.try_encaps_with_rng(&mut rng).map_err(CryptoError::kem("encaps to peer"))?;

        let message = AkeInitMessage {
            ephemeral_key: PublicKey::from_bytes(ek_e.into_bytes()),
            ciphertext: Ciphertext::from_bytes(ct_b.into_bytes()),
        };
        let transcript = AkeTranscript {
            encapsulated: k1.into_bytes(),
            ephemeral_secret: SecretKey::from_bytes(dk_e.into_bytes()),
        };

        Ok((message, transcript))
    }

    fn ake_respond(
        &self,
        init: &AkeInitMessage,
        own_secret: &SecretKey,
        peer: &PublicKey,
        seed: [u8; SEED_SIZE],
    ) -> Result<(AkeResponseMessage, SharedSecret), CryptoError> {
        let mut rng = ChaCha20Rng::from_seed(seed);

        let ephemeral_ek = encaps_key(&init.ephemeral_key)?;
        let (k2, ct_e) = ephemeral_ek
            .try_encaps_with_rng(&mut rng)
            .map_err(CryptoError::kem("encaps to ephemeral"))?;

        let peer_ek = encaps_key(peer)?;
        let (k3, ct_a) =
            peer_ek.try_encaps_with_rng(&mut rng).map_err(CryptoError::kem("encaps to peer"))?;

        let k1 = decapsulate(own_secret, &init.ciphertext)?;

        let secret = combine(&k1, &k2.into_bytes(), &k3.into_bytes());
        let response = AkeResponseMessage {
            ephemeral_ciphertext: Ciphertext::from_bytes(ct_e.into_bytes()),
            static_ciphertext: Ciphertext::from_bytes(ct_a.into_bytes()),
        };

        Ok((response, secret))
    }

    fn ake_finalize(
        &self,
        response: &AkeResponseMessage,
        transcript: &AkeTranscript,
        own_secret: &SecretKey,
    ) -> Result<SharedSecret, CryptoError> {
        let k2 = decapsulate(&transcript.ephemeral_secret, &response.ephemeral_ciphertext)?;
        let k3 = decapsulate(own_secret, &response.static_ciphertext)?;

        Ok(combine(&transcript.encapsulated, &k2, &k3))
    }

    fn commit(
        &self,
        public_key: &PublicKey,
        message: &[u8; SHARE_MESSAGE_SIZE],
        coin: &Coin,
    ) -> Result<Commitment, CryptoError> {
        let mut rng = ChaCha20Rng::from_seed(coin.kem_seed());
        let ek = encaps_key(public_key)?;
        let (shared, kem_ct) =
            ek.try_encaps_with_rng(&mut rng).map_err(CryptoError::kem("commitment encaps"))?;

        let mut dem_key = shared.into_bytes();
        let cipher = ChaCha20Poly1305::new((&dem_key).into());
        dem_key.zeroize();

        let mut dem_ciphertext = *message;
        let nonce = coin.dem_nonce();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), COMMIT_LABEL, &mut dem_ciphertext)
            .map_err(|_| CryptoError::Aead { reason: "commitment encryption".to_string() })?;

        let mut tag_bytes = [0u8; COMMITMENT_TAG_SIZE];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(Commitment {
            kem_ciphertext: Ciphertext::from_bytes(kem_ct.into_bytes()),
            dem_ciphertext,
            tag: tag_bytes,
        })
    }
}

fn encaps_key(key: &PublicKey) -> Result<ml_kem_768::EncapsKey, CryptoError> {
    ml_kem_768::EncapsKey::try_from_bytes(*key.as_bytes())
        .map_err(CryptoError::kem("parse encapsulation key"))
}

fn decapsulate(
    secret: &SecretKey,
    ciphertext: &Ciphertext,
) -> Result<[u8; SHARED_SECRET_SIZE], CryptoError> {
    let dk = ml_kem_768::DecapsKey::try_from_bytes(*secret.as_bytes())
        .map_err(CryptoError::kem("parse decapsulation key"))?;
    let ct = ml_kem_768::CipherText::try_from_bytes(*ciphertext.as_bytes())
        .map_err(CryptoError::kem("parse ciphertext"))?;
    let shared = dk.try_decaps(&ct).map_err(CryptoError::kem("decaps"))?;
    Ok(shared.into_bytes())
}

fn combine(
    k1: &[u8; SHARED_SECRET_SIZE],
    k2: &[u8; SHARED_SECRET_SIZE],
    k3: &[u8; SHARED_SECRET_SIZE],
) -> SharedSecret {
    let mut ikm = [0u8; 3 * SHARED_SECRET_SIZE];
    ikm[..SHARED_SECRET_SIZE].copy_from_slice(k1);
    ikm[SHARED_SECRET_SIZE..2 * SHARED_SECRET_SIZE].copy_from_slice(k2);
    ikm[2 * SHARED_SECRET_SIZE..].copy_from_slice(k3);

    let hkdf = Hkdf::<Sha256>::new(None, &ikm);
    let mut okm = [0u8; SHARED_SECRET_SIZE];
    let Ok(()) = hkdf.expand(AKE_LABEL, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    ikm.zeroize();

    let secret = SharedSecret::from_bytes(okm);
    okm.zeroize();
    secret
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::COIN_SIZE;

    fn keypair(tag: u8) -> Keypair {
        MlKemProvider.generate_keypair([tag; SEED_SIZE]).unwrap()
    }

    #[test]
    fn keygen_is_deterministic_in_seed() {
        let a = keypair(1);
        let b = keypair(1);
        let c = keypair(2);

        assert_eq!(a.public, b.public);
        assert_ne!(a.public, c.public);
    }

    #[test]
    fn ake_both_sides_agree() {
        let provider = MlKemProvider;
        let alice = keypair(1);
        let bob = keypair(2);

        let (init, transcript) = provider.ake_initiate(&bob.public, [3; SEED_SIZE]).unwrap();
        let (response, bob_key) =
            provider.ake_respond(&init, &bob.secret, &alice.public, [4; SEED_SIZE]).unwrap();
        let alice_key = provider.ake_finalize(&response, &transcript, &alice.secret).unwrap();

        assert_eq!(alice_key, bob_key);
    }

    #[test]
    fn ake_with_wrong_initiator_key_disagrees() {
        let provider = MlKemProvider;
        let alice = keypair(1);
        let bob = keypair(2);
        let mallory = keypair(3);

        let (init, transcript) = provider.ake_initiate(&bob.public, [3; SEED_SIZE]).unwrap();
        // Bob believes the initiator is Mallory
        let (response, bob_key) =
            provider.ake_respond(&init, &bob.secret, &mallory.public, [4; SEED_SIZE]).unwrap();
        let alice_key = provider.ake_finalize(&response, &transcript, &alice.secret).unwrap();

        assert_ne!(alice_key, bob_key);
    }

    #[test]
    fn commitment_is_deterministic() {
        let provider = MlKemProvider;
        let alice = keypair(1);
        let message = [7u8; SHARE_MESSAGE_SIZE];
        let coin = Coin::from_bytes([9; COIN_SIZE]);

        let first = provider.commit(&alice.public, &message, &coin).unwrap();
        let second = provider.commit(&alice.public, &message, &coin).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn commitment_changes_with_coin_or_message() {
        let provider = MlKemProvider;
        let alice = keypair(1);
        let message = [7u8; SHARE_MESSAGE_SIZE];
        let coin = Coin::from_bytes([9; COIN_SIZE]);
        let original = provider.commit(&alice.public, &message, &coin).unwrap();

        let mut other_coin = *coin.as_bytes();
        other_coin[COIN_SIZE - 1] ^= 1;
        let with_other_coin =
            provider.commit(&alice.public, &message, &Coin::from_bytes(other_coin)).unwrap();
        assert_ne!(original, with_other_coin);

        let mut other_message = message;
        other_message[0] ^= 1;
        let with_other_message = provider.commit(&alice.public, &other_message, &coin).unwrap();
        assert_ne!(original, with_other_message);
    }

    #[test]
    fn commitment_does_not_reveal_message_in_clear() {
        let provider = MlKemProvider;
        let alice = keypair(1);
        let message = [0u8; SHARE_MESSAGE_SIZE];
        let commitment =
            provider.commit(&alice.public, &message, &Coin::from_bytes([5; COIN_SIZE])).unwrap();

        assert_ne!(commitment.dem_ciphertext, message);
    }
}
