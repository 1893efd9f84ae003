//! Connection establishment, abstracted behind [`ConnectionFactory`] so that
//! tests can substitute an in-memory loopback stream for the real transport.
//!
//! The spec's "OS named pipe" has no single cross-platform tokio type; this
//! crate stands in a Unix domain socket for it ([`UnixSocketFactory`]), the
//! same substitution made throughout the retrieval pack's own local-IPC
//! examples. A named-pipe-backed factory for Windows would implement the
//! same trait without touching anything above this module.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use pipe_rpc_core::Error;

/// "Accept one server side" / "connect one client side with timeout",
/// generic over the concrete duplex stream type. Spec §4 calls for exactly
/// this abstraction.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    /// Blocks until one peer connects to `pipe_name`, then returns its stream.
    /// Callers loop on this to accept connections one at a time.
    async fn accept_one(&self, pipe_name: &str) -> Result<Self::Stream, Error>;

    /// Connects to `pipe_name` as a client, failing with [`Error::Transport`]
    /// if `timeout` elapses first.
    async fn connect(&self, pipe_name: &str, timeout: Duration) -> Result<Self::Stream, Error>;
}

fn timed_out() -> Error {
    Error::Transport(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
}

/// Production factory: one named pipe maps to one Unix domain socket file
/// under `socket_dir`, named `<pipe_name>.sock`. The listener for a given
/// pipe name is created lazily on first `accept_one` and reused afterwards,
/// so a registry's accept loop can call `accept_one` repeatedly to serve an
/// unbounded number of worker connections.
pub struct UnixSocketFactory {
    socket_dir: PathBuf,
    listeners: DashMap<String, Arc<UnixListener>>,
}

impl UnixSocketFactory {
    pub fn new(socket_dir: impl Into<PathBuf>) -> Self {
        UnixSocketFactory {
            socket_dir: socket_dir.into(),
            listeners: DashMap::new(),
        }
    }

    fn socket_path(&self, pipe_name: &str) -> PathBuf {
        self.socket_dir.join(format!("{pipe_name}.sock"))
    }

    fn listener_for(&self, pipe_name: &str) -> Result<Arc<UnixListener>, Error> {
        match self.listeners.entry(pipe_name.to_string()) {
            Entry::Occupied(existing) => Ok(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                let path = self.socket_path(pipe_name);
                // A stale socket file from a previous, uncleanly-terminated
                // run would otherwise make bind() fail with AddrInUse.
                let _ = std::fs::remove_file(&path);
                let listener = Arc::new(UnixListener::bind(&path).map_err(Error::Transport)?);
                slot.insert(Arc::clone(&listener));
                Ok(listener)
            }
        }
    }
}

#[async_trait]
impl ConnectionFactory for UnixSocketFactory {
    type Stream = UnixStream;

    async fn accept_one(&self, pipe_name: &str) -> Result<Self::Stream, Error> {
        let listener = self.listener_for(pipe_name)?;
        let (stream, _addr) = listener.accept().await.map_err(Error::Transport)?;
        Ok(stream)
    }

    async fn connect(&self, pipe_name: &str, timeout: Duration) -> Result<Self::Stream, Error> {
        let path = self.socket_path(pipe_name);
        tokio::time::timeout(timeout, UnixStream::connect(&path))
            .await
            .map_err(|_| timed_out())?
            .map_err(Error::Transport)
    }
}

/// In-memory loopback fake built on [`tokio::io::duplex`]. `connect` creates
/// a fresh duplex pair, hands the server half to whichever task next calls
/// `accept_one`, and returns the client half immediately — so a test can
/// drive both a registry and a worker in one process without touching the
/// filesystem.
pub struct DuplexFactory {
    pending: Mutex<tokio::sync::mpsc::UnboundedReceiver<DuplexStream>>,
    incoming: tokio::sync::mpsc::UnboundedSender<DuplexStream>,
    buffer_size: usize,
}

impl DuplexFactory {
    pub fn new() -> Self {
        Self::with_buffer_size(64 * 1024)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (incoming, pending) = tokio::sync::mpsc::unbounded_channel();
        DuplexFactory {
            pending: Mutex::new(pending),
            incoming,
            buffer_size,
        }
    }
}

impl Default for DuplexFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionFactory for DuplexFactory {
    type Stream = DuplexStream;

    async fn accept_one(&self, _pipe_name: &str) -> Result<Self::Stream, Error> {
        let mut pending = self.pending.lock().await;
        pending.recv().await.ok_or_else(|| {
            Error::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "factory dropped"))
        })
    }

    async fn connect(&self, _pipe_name: &str, _timeout: Duration) -> Result<Self::Stream, Error> {
        let (client, server) = tokio::io::duplex(self.buffer_size);
        self.incoming
            .send(server)
            .map_err(|_| Error::Transport(io::Error::new(io::ErrorKind::BrokenPipe, "factory dropped")))?;
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duplex_factory_pairs_connect_with_accept() {
        let factory = DuplexFactory::new();

        let client = factory.connect("ignored", Duration::from_secs(1)).await.unwrap();
        let server = factory.accept_one("ignored").await.unwrap();

        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut client_r, mut client_w) = tokio::io::split(client);
        let (mut server_r, mut server_w) = tokio::io::split(server);

        client_w.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server_r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server_w.write_all(b"pong").await.unwrap();
        client_r.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    }
}
