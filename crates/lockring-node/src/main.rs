//! Lockring node binary.
//!
//! # Usage
//!
//! ```bash
//! # One relay per ring
//! lockring-node relay --bind 127.0.0.1:7000
//!
//! # Keys and a ring layout
//! lockring-node keygen --name alice --out alice.json
//! lockring-node roster --name cluster-a --out cluster-a.json alice.json bob.json carol.json
//!
//! # Join the ring; lines typed on stdin are sent as app messages
//! lockring-node run --key alice.json --cluster-roster cluster-a.json --cluster-relay 127.0.0.1:7000
//!
//! # A cluster leader also joins the leader ring
//! lockring-node run --key alice.json --role leader \
//!     --cluster-roster cluster-a.json --cluster-relay 127.0.0.1:7000 \
//!     --leader-roster leaders.json --leader-relay 127.0.0.1:7100
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use lockring_core::{Environment, Node, NodeLayout, Role};
use lockring_crypto::MlKemProvider;
use lockring_node::{KeyFile, NodeConfig, NodeError, Relay, RosterFile, SystemEnv, spawn_node};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Lockring ring group key exchange node
#[derive(Parser, Debug)]
#[command(name = "lockring-node")]
#[command(about = "Post-quantum ring group key exchange with hierarchical key wrapping")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a ring relay
    Relay {
        /// Address to bind to
        #[arg(short, long, default_value = "127.0.0.1:7000")]
        bind: String,
    },

    /// Generate a long-term keypair
    Keygen {
        /// Party name (1 to 20 bytes)
        #[arg(short, long)]
        name: String,

        /// Output key file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Assemble a ring roster from key files, in ring order
    Roster {
        /// Ring name
        #[arg(short, long)]
        name: String,

        /// Output roster file
        #[arg(short, long)]
        out: PathBuf,

        /// Key files of the ring members
        #[arg(required = true)]
        keys: Vec<PathBuf>,
    },

    /// Join a ring (and the leader ring, for leaders)
    Run {
        /// Own key file
        #[arg(long)]
        key: PathBuf,

        /// Cluster ring roster
        #[arg(long)]
        cluster_roster: PathBuf,

        /// Cluster ring relay address
        #[arg(long)]
        cluster_relay: String,

        /// Role in the hierarchy
        #[arg(long, value_enum, default_value_t = RoleArg::Standalone)]
        role: RoleArg,

        /// Leader ring roster (leaders only)
        #[arg(long)]
        leader_roster: Option<PathBuf>,

        /// Leader ring relay address (leaders only)
        #[arg(long)]
        leader_relay: Option<String>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum RoleArg {
    Standalone,
    Member,
    Leader,
}

impl From<RoleArg> for Role {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Standalone => Role::Standalone,
            RoleArg::Member => Role::Member,
            RoleArg::Leader => Role::Leader,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    match args.command {
        Command::Relay { bind } => relay(&bind).await?,
        Command::Keygen { name, out } => keygen(&name, &out)?,
        Command::Roster { name, out, keys } => roster(&name, &out, &keys)?,
        Command::Run { key, cluster_roster, cluster_relay, role, leader_roster, leader_relay } => {
            let leader = match (leader_roster, leader_relay) {
                (Some(roster), Some(relay)) => Some((roster, relay)),
                (None, None) => None,
                _ => {
                    return Err(NodeError::Config(
                        "--leader-roster and --leader-relay go together".to_string(),
                    )
                    .into());
                },
            };
            run(&key, &cluster_roster, &cluster_relay, role.into(), leader).await?;
        },
    }

    Ok(())
}

async fn relay(bind: &str) -> Result<(), NodeError> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| NodeError::Config(format!("cannot bind {bind}: {e}")))?;
    tracing::info!("Relay listening on {}", listener.local_addr()?);

    Relay::new(NodeConfig::default()).run(listener).await
}

fn keygen(name: &str, out: &std::path::Path) -> Result<(), NodeError> {
    let seed = SystemEnv::new().random_seed();
    let key = KeyFile::generate(name, &MlKemProvider, seed)?;
    key.save(out)?;
    tracing::info!("Wrote key for {} to {}", name, out.display());
    Ok(())
}

fn roster(name: &str, out: &std::path::Path, keys: &[PathBuf]) -> Result<(), NodeError> {
    let keys = keys.iter().map(|path| KeyFile::load(path)).collect::<Result<Vec<_>, _>>()?;
    let file = RosterFile::from_keys(name, &keys);
    file.to_roster()?;
    file.save(out)?;
    tracing::info!("Wrote ring {} with {} parties to {}", name, keys.len(), out.display());
    Ok(())
}

async fn run(
    key_path: &std::path::Path,
    cluster_roster: &std::path::Path,
    cluster_relay: &str,
    role: Role,
    leader: Option<(PathBuf, String)>,
) -> Result<(), NodeError> {
    let key = KeyFile::load(key_path)?;
    let keypair = key.keypair()?;

    let (cluster, cluster_index) = load_ring(cluster_roster, &key)?;
    let leader_ring = match &leader {
        Some((roster, _)) => Some(load_ring(roster, &key)?),
        None => None,
    };

    let layout = NodeLayout { cluster, cluster_index, leader: leader_ring, role };
    let node = Node::new(SystemEnv::new(), MlKemProvider, layout, keypair.secret)?;

    let cluster_stream = connect(cluster_relay).await?;
    let leader_stream = match &leader {
        Some((_, relay)) => Some(connect(relay).await?),
        None => None,
    };

    let config = NodeConfig::default();
    let mut handle = spawn_node(node, cluster_stream, leader_stream, &config);
    tracing::info!("{} joined as {:?}, waiting for cluster key", key.name, role);

    handle.wait_for_cluster_key().await?;
    tracing::info!("Cluster key ready, type lines to send them to the cluster");

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(line) => {
                    if let Err(e) = handle.send_message(line).await {
                        tracing::warn!("Message not sent: {}", e);
                    }
                },
                None => break,
            },
            message = handle.next_message() => match message {
                Some(message) => tracing::info!(
                    sender = message.sender,
                    "{}",
                    String::from_utf8_lossy(&message.plaintext)
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

fn load_ring(
    path: &std::path::Path,
    key: &KeyFile,
) -> Result<(std::sync::Arc<lockring_core::Roster>, usize), NodeError> {
    let file = RosterFile::load(path)?;
    let index = file.position(&key.name)?;
    if file.parties[index].public_key != key.public_key {
        return Err(NodeError::Config(format!(
            "ring {} lists a different public key for {}",
            file.name, key.name
        )));
    }
    Ok((file.to_roster()?, index))
}

async fn connect(address: &str) -> Result<TcpStream, NodeError> {
    TcpStream::connect(address)
        .await
        .map_err(|e| NodeError::Transport(format!("cannot reach relay {address}: {e}")))
}
