//! Crypto primitive provider seam.
//!
//! The session layer consumes key generation, the three-message ring AKE, and
//! the commitment primitive through [`CryptoProvider`]. All randomness is
//! passed in as explicit seeds so a seeded environment replays a run exactly.

use std::fmt;

use fips203::ml_kem_768;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// ML-KEM-768 encapsulation key size.
pub const PUBLIC_KEY_SIZE: usize = ml_kem_768::EK_LEN;

/// ML-KEM-768 decapsulation key size.
pub const SECRET_KEY_SIZE: usize = ml_kem_768::DK_LEN;

/// ML-KEM-768 ciphertext size.
pub const CIPHERTEXT_SIZE: usize = ml_kem_768::CT_LEN;

/// Size of every neighbor-pair shared secret.
pub const SHARED_SECRET_SIZE: usize = 32;

/// Size of a randomness seed handed to the provider.
pub const SEED_SIZE: usize = 32;

/// Share (32 bytes) followed by the big-endian ring index (4 bytes).
pub const SHARE_MESSAGE_SIZE: usize = 36;

/// Commitment randomness: 32-byte KEM seed followed by a 12-byte AEAD nonce.
pub const COIN_SIZE: usize = 44;

/// Poly1305 tag carried with the symmetric half of a commitment.
pub const COMMITMENT_TAG_SIZE: usize = 16;

/// An ML-KEM-768 encapsulation key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey([u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    /// Wrap raw encapsulation key bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw encapsulation key bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        fixed(bytes, "public key").map(Self)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({:02x?}..)", &self.0[..4])
    }
}

/// An ML-KEM-768 decapsulation key. Zeroized on drop.
#[derive(Clone)]
pub struct SecretKey([u8; SECRET_KEY_SIZE]);

impl SecretKey {
    /// Wrap raw decapsulation key bytes.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw decapsulation key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.0
    }
}

impl TryFrom<&[u8]> for SecretKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        fixed(bytes, "secret key").map(Self)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// A long-term keypair.
#[derive(Clone, Debug)]
pub struct Keypair {
    /// Encapsulation key, distributed to every ring member
    pub public: PublicKey,
    /// Decapsulation key, never leaves the owner
    pub secret: SecretKey,
}

/// An ML-KEM-768 ciphertext.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext([u8; CIPHERTEXT_SIZE]);

impl Ciphertext {
    /// Wrap raw ciphertext bytes.
    pub fn from_bytes(bytes: [u8; CIPHERTEXT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw ciphertext bytes.
    pub fn as_bytes(&self) -> &[u8; CIPHERTEXT_SIZE] {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext({:02x?}..)", &self.0[..4])
    }
}

/// Secret shared with one ring neighbor. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; SHARED_SECRET_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl Drop for SharedSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// First AKE message: ephemeral encapsulation key plus a ciphertext to the
/// responder's static key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AkeInitMessage {
    /// Initiator's ephemeral encapsulation key
    pub ephemeral_key: PublicKey,
    /// Encapsulation to the responder's long-term key
    pub ciphertext: Ciphertext,
}

/// Second AKE message: ciphertexts to the initiator's ephemeral and static keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AkeResponseMessage {
    /// Encapsulation to the initiator's ephemeral key
    pub ephemeral_ciphertext: Ciphertext,
    /// Encapsulation to the initiator's long-term key
    pub static_ciphertext: Ciphertext,
}

/// Initiator-side state retained between [`CryptoProvider::ake_initiate`] and
/// [`CryptoProvider::ake_finalize`]. Zeroized on drop.
pub struct AkeTranscript {
    pub(crate) encapsulated: [u8; SHARED_SECRET_SIZE],
    pub(crate) ephemeral_secret: SecretKey,
}

impl Drop for AkeTranscript {
    fn drop(&mut self) {
        self.encapsulated.zeroize();
    }
}

impl fmt::Debug for AkeTranscript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AkeTranscript(..)")
    }
}

/// Randomness used to produce a commitment, revealed alongside the opening.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Coin([u8; COIN_SIZE]);

impl Coin {
    /// Wrap raw coin bytes.
    pub fn from_bytes(bytes: [u8; COIN_SIZE]) -> Self {
        Self(bytes)
    }

    /// Raw coin bytes.
    pub fn as_bytes(&self) -> &[u8; COIN_SIZE] {
        &self.0
    }

    /// Seed for the KEM half of the commitment.
    pub fn kem_seed(&self) -> [u8; SEED_SIZE] {
        let mut seed = [0u8; SEED_SIZE];
        seed.copy_from_slice(&self.0[..SEED_SIZE]);
        seed
    }

    /// Nonce for the symmetric half of the commitment.
    pub fn dem_nonce(&self) -> [u8; COIN_SIZE - SEED_SIZE] {
        let mut nonce = [0u8; COIN_SIZE - SEED_SIZE];
        nonce.copy_from_slice(&self.0[SEED_SIZE..]);
        nonce
    }
}

impl fmt::Debug for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Coin({:02x?}..)", &self.0[..4])
    }
}

/// Public-key commitment to a 36-byte share message.
///
/// Equality is byte-for-byte over all three parts, which is exactly the
/// comparison performed when a commitment is re-derived.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commitment {
    /// KEM ciphertext under the committer's public key
    pub kem_ciphertext: Ciphertext,
    /// Symmetric encryption of the share message
    pub dem_ciphertext: [u8; SHARE_MESSAGE_SIZE],
    /// Poly1305 tag over the symmetric part
    pub tag: [u8; COMMITMENT_TAG_SIZE],
}

/// Key generation, ring AKE, and commitment primitives.
///
/// Implementations must be deterministic in their seed arguments.
pub trait CryptoProvider: Clone + Send + Sync + 'static {
    /// Generate a long-term keypair.
    fn generate_keypair(&self, seed: [u8; SEED_SIZE]) -> Result<Keypair, CryptoError>;

    /// Start an AKE toward `peer`. Returns the wire message and the transcript
    /// the initiator must keep until the response arrives.
    fn ake_initiate(
        &self,
        peer: &PublicKey,
        seed: [u8; SEED_SIZE],
    ) -> Result<(AkeInitMessage, AkeTranscript), CryptoError>;

    /// Answer an AKE from `peer`, deriving the responder's copy of the secret.
    fn ake_respond(
        &self,
        init: &AkeInitMessage,
        own_secret: &SecretKey,
        peer: &PublicKey,
        seed: [u8; SEED_SIZE],
    ) -> Result<(AkeResponseMessage, SharedSecret), CryptoError>;

    /// Complete an AKE on the initiator side.
    fn ake_finalize(
        &self,
        response: &AkeResponseMessage,
        transcript: &AkeTranscript,
        own_secret: &SecretKey,
    ) -> Result<SharedSecret, CryptoError>;

    /// Commit to `message` under `public_key` using `coin` as all randomness.
    fn commit(
        &self,
        public_key: &PublicKey,
        message: &[u8; SHARE_MESSAGE_SIZE],
        coin: &Coin,
    ) -> Result<Commitment, CryptoError>;
}

fn fixed<const N: usize>(bytes: &[u8], what: &'static str) -> Result<[u8; N], CryptoError> {
    <[u8; N]>::try_from(bytes).map_err(|_| CryptoError::InvalidLength {
        what,
        expected: N,
        actual: bytes.len(),
    })
}
