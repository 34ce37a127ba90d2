//! Lockring node runtime.
//!
//! Production glue around [`lockring_core`]: the sans-IO [`Node`] is driven
//! by tokio tasks that talk newline-delimited JSON to one relay per ring.
//!
//! # Components
//!
//! - [`spawn_node`] / [`NodeHandle`]: run a node and await its cluster key
//! - [`Relay`]: per-ring hub that fans lines out and replays history
//! - [`LineTransport`]: envelope framing over any async byte stream
//! - [`KeyFile`] / [`RosterFile`]: on-disk key material and ring layouts
//! - [`SystemEnv`]: OS randomness
//!
//! [`Node`]: lockring_core::Node

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod error;
pub mod relay;
pub mod runtime;
mod system_env;
pub mod transport;

pub use config::{KeyFile, NodeConfig, RosterEntry, RosterFile};
pub use error::NodeError;
pub use relay::Relay;
pub use runtime::{AppMessage, KeyStatus, NodeHandle, spawn_node};
pub use system_env::SystemEnv;
pub use transport::{LineReader, LineTransport, LineWriter};
