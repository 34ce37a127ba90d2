//! Newline-delimited envelope transport over any byte stream.
//!
//! Each envelope is one JSON object followed by `\n`. The same framing is
//! used between nodes and the relay, over TCP in production and over
//! simulated streams in tests.
//!
//! # Limits
//!
//! Lines longer than `max_line_bytes` are a transport error: the stream
//! cannot be resynchronised, so the connection is dropped. Lines that are
//! well-framed but do not decode are logged and skipped.

use lockring_proto::{Envelope, ProtocolError};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
    WriteHalf,
};
use tracing::warn;

use crate::error::NodeError;

/// Reading half of a line transport.
pub struct LineReader<R> {
    inner: BufReader<R>,
    max_line_bytes: usize,
    /// Partial line carried across cancelled reads
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a reader.
    pub fn new(reader: R, max_line_bytes: usize) -> Self {
        Self { inner: BufReader::new(reader), max_line_bytes, buf: Vec::new() }
    }

    /// Next raw line without its terminator, or `None` at end of stream.
    ///
    /// Cancel safe: a partially read line is kept for the next call.
    ///
    /// # Errors
    ///
    /// - `Transport`: I/O failure, oversized line, or invalid UTF-8
    pub async fn recv_line(&mut self) -> Result<Option<String>, NodeError> {
        loop {
            let budget = (self.max_line_bytes + 1).saturating_sub(self.buf.len()) as u64;
            let read = (&mut self.inner).take(budget).read_until(b'\n', &mut self.buf).await?;

            if self.buf.last() == Some(&b'\n') {
                let mut line = std::mem::take(&mut self.buf);
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if line.is_empty() {
                    continue;
                }
                return String::from_utf8(line)
                    .map(Some)
                    .map_err(|_| NodeError::Transport("line is not valid UTF-8".to_string()));
            }
            if self.buf.len() > self.max_line_bytes {
                return Err(NodeError::Transport(format!(
                    "line exceeds {} bytes",
                    self.max_line_bytes
                )));
            }
            if read == 0 {
                if !self.buf.is_empty() {
                    warn!(bytes = self.buf.len(), "discarding unterminated final line");
                    self.buf.clear();
                }
                return Ok(None);
            }
        }
    }

    /// Next decodable envelope, or `None` at end of stream. Undecodable lines
    /// are logged and skipped.
    ///
    /// # Errors
    ///
    /// - `Transport`: see [`LineReader::recv_line`]
    pub async fn recv(&mut self) -> Result<Option<Envelope>, NodeError> {
        while let Some(line) = self.recv_line().await? {
            match Envelope::from_json(&line) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(ProtocolError::UnknownKind(code)) => {
                    warn!(code, "dropping envelope of unknown kind");
                },
                Err(e) => warn!(error = %e, "dropping undecodable envelope"),
            }
        }
        Ok(None)
    }
}

/// Writing half of a line transport.
pub struct LineWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Write one envelope as a line and flush.
    ///
    /// # Errors
    ///
    /// - `Session(Decode(TooLarge))`: the envelope does not fit in a line
    /// - `Transport`: I/O failure
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), NodeError> {
        let line = envelope.to_line().map_err(lockring_core::SessionError::from)?;
        self.send_line(&line).await
    }

    /// Write an already terminated line and flush.
    ///
    /// # Errors
    ///
    /// - `Transport`: I/O failure
    pub async fn send_line(&mut self, line: &str) -> Result<(), NodeError> {
        self.inner.write_all(line.as_bytes()).await?;
        self.inner.flush().await?;
        Ok(())
    }
}

/// Both halves of a line transport over one stream.
pub struct LineTransport<S> {
    reader: LineReader<ReadHalf<S>>,
    writer: LineWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> LineTransport<S> {
    /// Wrap a bidirectional stream.
    pub fn new(stream: S, max_line_bytes: usize) -> Self {
        let (read, write) = tokio::io::split(stream);
        Self { reader: LineReader::new(read, max_line_bytes), writer: LineWriter::new(write) }
    }

    /// Send one envelope.
    ///
    /// # Errors
    ///
    /// See [`LineWriter::send`].
    pub async fn send(&mut self, envelope: &Envelope) -> Result<(), NodeError> {
        self.writer.send(envelope).await
    }

    /// Receive one envelope.
    ///
    /// # Errors
    ///
    /// See [`LineReader::recv`].
    pub async fn recv(&mut self) -> Result<Option<Envelope>, NodeError> {
        self.reader.recv().await
    }

    /// Split into independently owned halves.
    pub fn into_split(self) -> (LineReader<ReadHalf<S>>, LineWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }
}
