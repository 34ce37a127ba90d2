//! Ring relay hub.
//!
//! Every line received on one connection is forwarded to all other
//! connections. The relay is the broadcast medium of one ring: it does not
//! look at recipients, so point-to-point messages reach everyone and nodes
//! filter by `receiverIndex`.
//!
//! The relay keeps the run's history and replays it to late joiners, and to
//! connections that fell behind. Ring sessions ignore duplicates, so replay
//! is always safe within a run. A run ends when the last connection closes:
//! the history is cleared then, so a restarted ring never sees the previous
//! run's handshake. History holds at most `max_history_lines` lines; later
//! lines are still forwarded live.

use std::sync::{Arc, Mutex};

use lockring_proto::Envelope;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::broadcast::{self, error::RecvError},
};
use tracing::{debug, info, warn};

use crate::{config::NodeConfig, error::NodeError, transport::LineTransport};

#[derive(Debug, Clone)]
struct Forward {
    origin: u64,
    line: Arc<str>,
}

struct RelayState {
    history: Vec<Arc<str>>,
    next_connection: u64,
    live: usize,
    history_full: bool,
}

/// A relay for one ring.
pub struct Relay {
    config: NodeConfig,
    sender: broadcast::Sender<Forward>,
    state: Mutex<RelayState>,
}

impl Relay {
    /// Create a relay.
    pub fn new(config: NodeConfig) -> Arc<Self> {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Arc::new(Self {
            config,
            sender,
            state: Mutex::new(RelayState {
                history: Vec::new(),
                next_connection: 0,
                live: 0,
                history_full: false,
            }),
        })
    }

    /// Number of lines kept for replay in the current run.
    pub fn history_len(&self) -> usize {
        self.lock().history.len()
    }

    /// Accept TCP connections forever, serving each on its own task.
    ///
    /// # Errors
    ///
    /// - `Transport`: accepting failed
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<(), NodeError> {
        loop {
            let (stream, addr) = listener.accept().await?;
            debug!(%addr, "relay accepted connection");
            let relay = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = relay.serve(stream).await {
                    warn!(%addr, error = %e, "relay connection failed");
                }
            });
        }
    }

    /// Serve one connection until it closes.
    ///
    /// # Errors
    ///
    /// - `Transport`: I/O failure or oversized line on this connection
    pub async fn serve<S>(self: Arc<Self>, stream: S) -> Result<(), NodeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (id, backlog, forwards) = self.join();
        let result = self.relay_lines(id, backlog, forwards, stream).await;
        self.leave(id);
        result
    }

    async fn relay_lines<S>(
        &self,
        id: u64,
        backlog: Vec<Arc<str>>,
        mut forwards: broadcast::Receiver<Forward>,
        stream: S,
    ) -> Result<(), NodeError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) =
            LineTransport::new(stream, self.config.max_line_bytes).into_split();
        info!(connection = id, replay = backlog.len(), "relay connection joined");

        for line in backlog {
            writer.send_line(&line).await?;
        }

        loop {
            tokio::select! {
                line = reader.recv_line() => match line? {
                    Some(line) => self.publish(id, line),
                    None => break,
                },
                forward = forwards.recv() => match forward {
                    Ok(forward) if forward.origin != id => writer.send_line(&forward.line).await?,
                    Ok(_) => {},
                    Err(RecvError::Lagged(missed)) => {
                        warn!(
                            connection = id,
                            missed,
                            "relay connection lagged, replaying history"
                        );
                        for line in self.snapshot() {
                            writer.send_line(&line).await?;
                        }
                    },
                    Err(RecvError::Closed) => break,
                },
            }
        }

        info!(connection = id, "relay connection closed");
        Ok(())
    }

    /// Register a connection: id, history so far, and a subscription that
    /// starts exactly after that history.
    fn join(&self) -> (u64, Vec<Arc<str>>, broadcast::Receiver<Forward>) {
        let mut state = self.lock();
        let id = state.next_connection;
        state.next_connection += 1;
        state.live += 1;
        (id, state.history.clone(), self.sender.subscribe())
    }

    fn leave(&self, id: u64) {
        let mut state = self.lock();
        state.live = state.live.saturating_sub(1);
        if state.live == 0 {
            info!(connection = id, lines = state.history.len(), "last connection left, run ended");
            state.history.clear();
            state.history_full = false;
        }
    }

    fn publish(&self, origin: u64, line: String) {
        if let Err(e) = Envelope::from_json(&line) {
            warn!(connection = origin, error = %e, "relay dropping undecodable line");
            return;
        }

        let line: Arc<str> = Arc::from(line + "\n");
        let mut state = self.lock();
        if state.history.len() < self.config.max_history_lines {
            state.history.push(Arc::clone(&line));
        } else if !state.history_full {
            state.history_full = true;
            warn!(
                connection = origin,
                limit = self.config.max_history_lines,
                "relay history full, later lines are not replayed"
            );
        }
        // No subscribers is fine: the history covers later joiners
        let _ = self.sender.send(Forward { origin, line });
    }

    fn snapshot(&self) -> Vec<Arc<str>> {
        self.lock().history.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RelayState> {
        // A poisoned lock only means another connection task panicked while
        // appending; the history itself is still a valid prefix
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use lockring_proto::{Envelope, MessageKind, Recipient};
    use tokio::{io::duplex, time::timeout};

    use super::*;

    fn connect(relay: &Arc<Relay>) -> LineTransport<tokio::io::DuplexStream> {
        let (client, server) = duplex(64 * 1024);
        tokio::spawn(Arc::clone(relay).serve(server));
        LineTransport::new(client, 64 * 1024)
    }

    fn envelope(sender: u32) -> Envelope {
        Envelope::new(sender, Recipient::Broadcast, MessageKind::ShareBroadcast, vec![sender as u8])
    }

    #[tokio::test]
    async fn forwards_to_everyone_but_the_sender() {
        let relay = Relay::new(NodeConfig::default());
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        let mut c = connect(&relay);
        tokio::task::yield_now().await;

        a.send(&envelope(0)).await.unwrap();

        assert_eq!(b.recv().await.unwrap(), Some(envelope(0)));
        assert_eq!(c.recv().await.unwrap(), Some(envelope(0)));
        let echoed = timeout(Duration::from_millis(50), a.recv()).await;
        assert!(echoed.is_err(), "sender must not receive its own line");
    }

    #[tokio::test]
    async fn late_joiner_receives_history() {
        let relay = Relay::new(NodeConfig::default());
        let mut a = connect(&relay);
        let mut b = connect(&relay);

        a.send(&envelope(0)).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(envelope(0)));
        b.send(&envelope(1)).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), Some(envelope(1)));

        let mut late = connect(&relay);
        assert_eq!(late.recv().await.unwrap(), Some(envelope(0)));
        assert_eq!(late.recv().await.unwrap(), Some(envelope(1)));
        assert_eq!(relay.history_len(), 2);
    }

    #[tokio::test]
    async fn undecodable_lines_are_not_relayed() {
        let relay = Relay::new(NodeConfig::default());
        let (client, server) = duplex(4096);
        tokio::spawn(Arc::clone(&relay).serve(server));
        let (_reader, mut writer) = LineTransport::new(client, 4096).into_split();

        writer.send_line("garbage\n").await.unwrap();
        writer.send_line(&envelope(2).to_line().unwrap()).await.unwrap();

        let mut observer = connect(&relay);
        assert_eq!(observer.recv().await.unwrap(), Some(envelope(2)));
        assert_eq!(relay.history_len(), 1);
    }

    async fn wait_for_run_end(relay: &Arc<Relay>) {
        timeout(Duration::from_secs(5), async {
            while relay.history_len() > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("relay never cleared its history");
    }

    #[tokio::test]
    async fn next_run_starts_with_empty_history() {
        let relay = Relay::new(NodeConfig::default());
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        a.send(&envelope(0)).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), Some(envelope(0)));
        assert_eq!(relay.history_len(), 1);

        drop(a);
        drop(b);
        wait_for_run_end(&relay).await;

        let mut c = connect(&relay);
        let mut d = connect(&relay);
        tokio::task::yield_now().await;
        d.send(&envelope(1)).await.unwrap();

        // The first line c sees belongs to the new run
        assert_eq!(c.recv().await.unwrap(), Some(envelope(1)));
        assert_eq!(relay.history_len(), 1);
    }

    #[tokio::test]
    async fn history_is_capped_but_lines_still_flow() {
        let config = NodeConfig { max_history_lines: 2, ..NodeConfig::default() };
        let relay = Relay::new(config);
        let mut a = connect(&relay);
        let mut b = connect(&relay);
        tokio::task::yield_now().await;

        for sender in 0..3 {
            a.send(&envelope(sender)).await.unwrap();
            assert_eq!(b.recv().await.unwrap(), Some(envelope(sender)));
        }
        assert_eq!(relay.history_len(), 2);

        let mut late = connect(&relay);
        assert_eq!(late.recv().await.unwrap(), Some(envelope(0)));
        assert_eq!(late.recv().await.unwrap(), Some(envelope(1)));
        let third = timeout(Duration::from_millis(50), late.recv()).await;
        assert!(third.is_err(), "lines past the cap are not replayed");
    }
}
