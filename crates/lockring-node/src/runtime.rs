//! Async runtime around a sans-IO [`Node`].
//!
//! # Architecture
//!
//! ```text
//!   cluster relay ⇄ ring task (Cluster) ─┐
//!                                        ├─ inbound ─> coordinator ── watch ──> NodeHandle
//!   leader relay  ⇄ ring task (Leader) ──┘              (Node)     ── mpsc ───> next_message
//!                          ^                               │
//!                          └────────── outbound ───────────┘
//! ```
//!
//! Each ring has its own task doing transport I/O, so the cluster ring and
//! the leader ring progress independently. The coordinator owns the [`Node`]
//! (both ring sessions and the key distributor), executes its actions, and
//! publishes the effective cluster key on a `watch` channel.

use lockring_core::{Environment, Level, Node, NodeAction, NodeEvent, SessionError};
use lockring_crypto::{ClusterKey, CryptoProvider};
use lockring_proto::Envelope;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{config::NodeConfig, error::NodeError, transport::LineTransport};

/// Progress toward an effective cluster key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyStatus {
    /// Ring sessions still running
    Pending,
    /// The effective cluster key
    Ready(ClusterKey),
    /// A fatal error ended the run before a key was available
    Failed(SessionError),
}

/// A decrypted application message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppMessage {
    /// Cluster index of the sender
    pub sender: u32,
    /// Decrypted bytes
    pub plaintext: Vec<u8>,
}

enum Command {
    Seal { plaintext: Vec<u8>, reply: oneshot::Sender<Result<(), SessionError>> },
}

/// Handle to a running node. Dropping it stops the node's tasks.
pub struct NodeHandle {
    status: watch::Receiver<KeyStatus>,
    commands: mpsc::Sender<Command>,
    messages: mpsc::Receiver<AppMessage>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeHandle {
    /// Wait until the effective cluster key is known.
    ///
    /// # Errors
    ///
    /// - `Session`: a fatal verification failure ended the run
    /// - `Closed`: the node stopped first
    pub async fn wait_for_cluster_key(&mut self) -> Result<ClusterKey, NodeError> {
        let status = self
            .status
            .wait_for(|s| !matches!(s, KeyStatus::Pending))
            .await
            .map_err(|_| NodeError::Closed)?;

        match &*status {
            KeyStatus::Ready(key) => Ok(key.clone()),
            KeyStatus::Failed(err) => Err(NodeError::Session(err.clone())),
            KeyStatus::Pending => Err(NodeError::Closed),
        }
    }

    /// The effective cluster key, if already known.
    pub fn cluster_key(&self) -> Option<ClusterKey> {
        match &*self.status.borrow() {
            KeyStatus::Ready(key) => Some(key.clone()),
            KeyStatus::Pending | KeyStatus::Failed(_) => None,
        }
    }

    /// Current key status.
    pub fn status(&self) -> KeyStatus {
        self.status.borrow().clone()
    }

    /// Encrypt and broadcast an application message to the cluster.
    ///
    /// # Errors
    ///
    /// - `Session(NoKeyAvailable)`: no effective key yet
    /// - `Closed`: the node stopped
    pub async fn send_message(&self, plaintext: impl Into<Vec<u8>>) -> Result<(), NodeError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Seal { plaintext: plaintext.into(), reply })
            .await
            .map_err(|_| NodeError::Closed)?;
        response.await.map_err(|_| NodeError::Closed)?.map_err(NodeError::from)
    }

    /// Next decrypted application message, or `None` once the node stopped.
    pub async fn next_message(&mut self) -> Option<AppMessage> {
        self.messages.recv().await
    }
}

impl Drop for NodeHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Run `node` over the given relay connections.
///
/// `leader` must be present exactly when the node is a cluster leader; it is
/// ignored otherwise.
pub fn spawn_node<E, P, S>(
    node: Node<E, P>,
    cluster: S,
    leader: Option<S>,
    config: &NodeConfig,
) -> NodeHandle
where
    E: Environment,
    P: CryptoProvider,
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let capacity = config.channel_capacity.max(1);
    let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
    let (commands_tx, commands_rx) = mpsc::channel(capacity);
    let (messages_tx, messages_rx) = mpsc::channel(capacity);
    let (status_tx, status_rx) = watch::channel(KeyStatus::Pending);

    let mut tasks = Vec::new();

    let (cluster_tx, cluster_rx) = mpsc::channel(capacity);
    tasks.push(tokio::spawn(run_ring(
        Level::Cluster,
        cluster,
        config.max_line_bytes,
        inbound_tx.clone(),
        cluster_rx,
    )));

    let leader_tx = match leader {
        Some(stream) if node.leader_session().is_some() => {
            let (leader_tx, leader_rx) = mpsc::channel(capacity);
            tasks.push(tokio::spawn(run_ring(
                Level::Leader,
                stream,
                config.max_line_bytes,
                inbound_tx,
                leader_rx,
            )));
            Some(leader_tx)
        },
        Some(_) => {
            warn!("leader connection given to a node without a leader ring, ignoring it");
            None
        },
        None => None,
    };

    let sink = ActionSink {
        cluster: cluster_tx,
        leader: leader_tx,
        status: status_tx,
        messages: messages_tx,
    };
    tasks.push(tokio::spawn(coordinate(node, inbound_rx, commands_rx, sink)));

    NodeHandle { status: status_rx, commands: commands_tx, messages: messages_rx, tasks }
}

/// Executes node actions against the runtime's channels.
struct ActionSink {
    cluster: mpsc::Sender<Envelope>,
    leader: Option<mpsc::Sender<Envelope>>,
    status: watch::Sender<KeyStatus>,
    messages: mpsc::Sender<AppMessage>,
}

impl ActionSink {
    async fn apply(&self, result: Result<Vec<NodeAction>, SessionError>) {
        let actions = match result {
            Ok(actions) => actions,
            Err(e) if e.is_fatal() => {
                self.fail(e);
                return;
            },
            Err(e) => {
                debug!(error = %e, "input dropped");
                return;
            },
        };

        for action in actions {
            match action {
                NodeAction::Send { level, envelope } => self.send(level, envelope).await,
                NodeAction::SessionEstablished { level, key } => {
                    info!(level = ?level, session = %key.fingerprint(), "ring session established");
                },
                NodeAction::ClusterKeyReady(key) => {
                    info!("effective cluster key ready");
                    self.status.send_replace(KeyStatus::Ready(key));
                },
                NodeAction::Deliver { sender, plaintext } => {
                    if self.messages.send(AppMessage { sender, plaintext }).await.is_err() {
                        debug!(sender, "no reader for application messages");
                    }
                },
                NodeAction::DistributionFailed(e) => self.fail(e),
            }
        }
    }

    fn fail(&self, e: SessionError) {
        error!(error = %e, "ring run failed");
        self.status.send_if_modified(|status| match status {
            KeyStatus::Pending => {
                *status = KeyStatus::Failed(e);
                true
            },
            KeyStatus::Ready(_) | KeyStatus::Failed(_) => false,
        });
    }

    async fn send(&self, level: Level, envelope: Envelope) {
        let sender = match level {
            Level::Cluster => Some(&self.cluster),
            Level::Leader => self.leader.as_ref(),
        };
        let Some(sender) = sender else {
            warn!(level = ?level, "no transport for ring, dropping envelope");
            return;
        };
        if sender.send(envelope).await.is_err() {
            warn!(level = ?level, "ring transport closed, dropping envelope");
        }
    }
}

async fn coordinate<E, P>(
    mut node: Node<E, P>,
    mut inbound: mpsc::Receiver<(Level, Envelope)>,
    mut commands: mpsc::Receiver<Command>,
    sink: ActionSink,
) where
    E: Environment,
    P: CryptoProvider,
{
    sink.apply(node.handle(NodeEvent::Start)).await;

    loop {
        tokio::select! {
            Some((level, envelope)) = inbound.recv() => {
                sink.apply(node.handle(NodeEvent::Received { level, envelope })).await;
            },
            Some(command) = commands.recv() => match command {
                Command::Seal { plaintext, reply } => {
                    let outcome = match node.seal_message(&plaintext) {
                        Ok(envelope) => {
                            sink.send(Level::Cluster, envelope).await;
                            Ok(())
                        },
                        Err(e) => Err(e),
                    };
                    let _ = reply.send(outcome);
                },
            },
            else => break,
        }
    }

    debug!("coordinator stopped");
}

async fn run_ring<S>(
    level: Level,
    stream: S,
    max_line_bytes: usize,
    inbound: mpsc::Sender<(Level, Envelope)>,
    mut outbound: mpsc::Receiver<Envelope>,
) where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = LineTransport::new(stream, max_line_bytes).into_split();

    loop {
        tokio::select! {
            received = reader.recv() => match received {
                Ok(Some(envelope)) => {
                    if inbound.send((level, envelope)).await.is_err() {
                        break;
                    }
                },
                Ok(None) => {
                    info!(level = ?level, "relay closed the connection");
                    break;
                },
                Err(e) => {
                    warn!(level = ?level, error = %e, "ring transport failed");
                    break;
                },
            },
            Some(envelope) = outbound.recv() => {
                if let Err(e) = writer.send(&envelope).await {
                    warn!(level = ?level, error = %e, "ring transport failed");
                    break;
                }
            },
        }
    }
}
