//! Key files, roster files, and runtime limits.
//!
//! Key material is stored as base64 inside small JSON documents:
//!
//! ```text
//! key file:    {"name":"alice","publicKey":"<b64>","secretKey":"<b64>"}
//! roster file: {"name":"cluster-a","parties":[{"name":"alice","publicKey":"<b64>"}, ...]}
//! ```
//!
//! Party order in a roster file is ring order.

use std::{path::Path, sync::Arc};

use base64::{Engine, engine::general_purpose::STANDARD};
use lockring_core::{Party, Roster};
use lockring_crypto::{CryptoProvider, Keypair, PartyId, PublicKey, SecretKey};
use lockring_proto::MAX_LINE_SIZE;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::NodeError;

/// Runtime limits for nodes and relays.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Longest accepted line on any connection
    pub max_line_bytes: usize,
    /// Capacity of the internal queues between tasks
    pub channel_capacity: usize,
    /// Lines a relay keeps for replay within one run
    pub max_history_lines: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { max_line_bytes: MAX_LINE_SIZE, channel_capacity: 1024, max_history_lines: 4096 }
    }
}

/// A party's long-term keypair on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyFile {
    /// Party name, unique within each ring it joins
    pub name: String,
    /// Base64 encapsulation key
    pub public_key: String,
    /// Base64 decapsulation key
    pub secret_key: String,
}

impl KeyFile {
    /// Generate a fresh keypair for `name` from `seed`.
    ///
    /// # Errors
    ///
    /// - `Config`: `name` is not a valid party id
    /// - `Session`: key generation failed
    pub fn generate<P: CryptoProvider>(
        name: &str,
        provider: &P,
        seed: [u8; 32],
    ) -> Result<Self, NodeError> {
        PartyId::new(name).map_err(|e| NodeError::Config(e.to_string()))?;
        let keypair = provider.generate_keypair(seed).map_err(lockring_core::SessionError::from)?;
        Ok(Self {
            name: name.to_string(),
            public_key: STANDARD.encode(keypair.public.as_bytes()),
            secret_key: STANDARD.encode(keypair.secret.as_bytes()),
        })
    }

    /// Decode the stored keypair.
    ///
    /// # Errors
    ///
    /// - `Config`: bad base64 or wrong key lengths
    pub fn keypair(&self) -> Result<Keypair, NodeError> {
        let public = decode_public_key(&self.public_key, &self.name)?;
        let secret_bytes = decode_base64(&self.secret_key, &self.name)?;
        let secret = SecretKey::try_from(secret_bytes.as_slice())
            .map_err(|e| NodeError::Config(format!("secret key of {}: {e}", self.name)))?;
        Ok(Keypair { public, secret })
    }

    /// Read a key file.
    ///
    /// # Errors
    ///
    /// - `Config`: unreadable file or malformed JSON
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        read_json(path)
    }

    /// Write this key file.
    ///
    /// # Errors
    ///
    /// - `Config`: the file cannot be written
    pub fn save(&self, path: &Path) -> Result<(), NodeError> {
        write_json(path, self)
    }
}

/// One roster entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// Party name
    pub name: String,
    /// Base64 encapsulation key
    pub public_key: String,
}

/// A ring on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterFile {
    /// Ring name (used in logs)
    pub name: String,
    /// Parties in ring order
    pub parties: Vec<RosterEntry>,
}

impl RosterFile {
    /// Assemble a roster from key files, keeping their order.
    pub fn from_keys(name: &str, keys: &[KeyFile]) -> Self {
        Self {
            name: name.to_string(),
            parties: keys
                .iter()
                .map(|k| RosterEntry { name: k.name.clone(), public_key: k.public_key.clone() })
                .collect(),
        }
    }

    /// Validate and convert to a [`Roster`].
    ///
    /// # Errors
    ///
    /// - `Config`: bad names or keys, too few parties, duplicate names
    pub fn to_roster(&self) -> Result<Arc<Roster>, NodeError> {
        let parties = self
            .parties
            .iter()
            .map(|entry| {
                Ok(Party {
                    id: PartyId::new(&entry.name).map_err(|e| NodeError::Config(e.to_string()))?,
                    public_key: decode_public_key(&entry.public_key, &entry.name)?,
                })
            })
            .collect::<Result<Vec<_>, NodeError>>()?;

        Roster::new(self.name.clone(), parties)
            .map(Arc::new)
            .map_err(|e| NodeError::Config(e.to_string()))
    }

    /// Ring index of the party called `name`.
    ///
    /// # Errors
    ///
    /// - `Config`: `name` is not in this roster
    pub fn position(&self, name: &str) -> Result<usize, NodeError> {
        self.parties.iter().position(|p| p.name == name).ok_or_else(|| {
            NodeError::Config(format!("{name} is not a member of ring {}", self.name))
        })
    }

    /// Read a roster file.
    ///
    /// # Errors
    ///
    /// - `Config`: unreadable file or malformed JSON
    pub fn load(path: &Path) -> Result<Self, NodeError> {
        read_json(path)
    }

    /// Write this roster file.
    ///
    /// # Errors
    ///
    /// - `Config`: the file cannot be written
    pub fn save(&self, path: &Path) -> Result<(), NodeError> {
        write_json(path, self)
    }
}

fn decode_base64(value: &str, owner: &str) -> Result<Vec<u8>, NodeError> {
    STANDARD.decode(value).map_err(|e| NodeError::Config(format!("key of {owner}: {e}")))
}

fn decode_public_key(value: &str, owner: &str) -> Result<PublicKey, NodeError> {
    let bytes = decode_base64(value, owner)?;
    PublicKey::try_from(bytes.as_slice())
        .map_err(|e| NodeError::Config(format!("public key of {owner}: {e}")))
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, NodeError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| NodeError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&text)
        .map_err(|e| NodeError::Config(format!("cannot parse {}: {e}", path.display())))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), NodeError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| NodeError::Config(format!("cannot encode {}: {e}", path.display())))?;
    std::fs::write(path, text + "\n")
        .map_err(|e| NodeError::Config(format!("cannot write {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use lockring_crypto::MlKemProvider;

    use super::*;

    fn key(name: &str, seed: u8) -> KeyFile {
        KeyFile::generate(name, &MlKemProvider, [seed; 32]).unwrap()
    }

    #[test]
    fn key_file_survives_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.json");

        let original = key("alice", 1);
        original.save(&path).unwrap();
        let loaded = KeyFile::load(&path).unwrap();

        assert_eq!(loaded, original);
        let keypair = loaded.keypair().unwrap();
        assert_eq!(STANDARD.encode(keypair.public.as_bytes()), original.public_key);
    }

    #[test]
    fn roster_from_keys_keeps_order() {
        let keys = [key("a", 1), key("b", 2), key("c", 3)];
        let file = RosterFile::from_keys("ring", &keys);

        let roster = file.to_roster().unwrap();
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.name(), "ring");
        assert_eq!(file.position("b").unwrap(), 1);
        assert!(file.position("z").is_err());
    }

    #[test]
    fn roster_with_two_parties_is_rejected() {
        let file = RosterFile::from_keys("small", &[key("a", 1), key("b", 2)]);
        assert!(matches!(file.to_roster(), Err(NodeError::Config(_))));
    }

    #[test]
    fn truncated_public_key_is_rejected() {
        let mut file = RosterFile::from_keys("ring", &[key("a", 1), key("b", 2), key("c", 3)]);
        file.parties[1].public_key = STANDARD.encode([0u8; 16]);
        assert!(matches!(file.to_roster(), Err(NodeError::Config(_))));
    }

    #[test]
    fn overlong_name_is_rejected() {
        let result = KeyFile::generate("a-name-that-is-far-too-long", &MlKemProvider, [1; 32]);
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn missing_file_is_config_error() {
        let result = KeyFile::load(Path::new("/nonexistent/lockring/key.json"));
        assert!(matches!(result, Err(NodeError::Config(_))));
    }

    #[test]
    fn defaults_match_wire_limit() {
        assert_eq!(NodeConfig::default().max_line_bytes, MAX_LINE_SIZE);
    }
}
