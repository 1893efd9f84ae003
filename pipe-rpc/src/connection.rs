//! One established duplex stream, plus the listen loop that drives it.
//! Spec §4.3.

use std::future::Future;
use std::sync::Arc;

use tokio::io::{split, AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use pipe_rpc_core::codec::{self, DEFAULT_MAX_FRAME_LEN};
use pipe_rpc_core::{Error, PipeMessage};

/// Identifies one accepted/established stream, independent of whichever
/// worker id (if any) later registers over it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        ConnectionId(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An established stream plus the write-side mutex that serializes frames
/// written by concurrent senders. Cheaply cloned via `Arc` so both the
/// listen loop and every in-flight call-site can hold a reference.
pub struct Connection<S> {
    id: ConnectionId,
    write_half: Mutex<WriteHalf<S>>,
    max_frame_len: u32,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Splits `stream` into independent read/write halves, wrapping the
    /// write half for serialized access. The caller drives the read half
    /// through [`listen_loop`].
    pub fn new(stream: S, max_frame_len: u32) -> (Arc<Connection<S>>, ReadHalf<S>) {
        let (read_half, write_half) = split(stream);
        let connection = Arc::new(Connection {
            id: ConnectionId::new(),
            write_half: Mutex::new(write_half),
            max_frame_len,
        });
        (connection, read_half)
    }

    pub fn with_default_frame_limit(stream: S) -> (Arc<Connection<S>>, ReadHalf<S>) {
        Self::new(stream, DEFAULT_MAX_FRAME_LEN)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl<S> Connection<S>
where
    S: AsyncWrite + Unpin,
{
    /// Writes one frame for `message`, holding the write mutex only across
    /// the bytes of that frame so concurrent senders never interleave.
    pub async fn send(&self, message: &PipeMessage) -> Result<(), Error> {
        let mut writer = self.write_half.lock().await;
        codec::write_frame(&mut *writer, message).await
    }
}

/// Reads exactly one frame off a freshly accepted/established stream,
/// before a [`Connection`] or its listen loop exists for it. Used only for
/// the first frame of a connection's lifetime, which the registration
/// state machine (spec §4.6) must inspect before deciding whether to keep
/// the connection at all.
pub async fn read_registration<R>(read_half: &mut R) -> Result<PipeMessage, Error>
where
    R: AsyncRead + Unpin,
{
    codec::read_frame(read_half, DEFAULT_MAX_FRAME_LEN).await
}

/// Runs the read/dispatch loop for one connection: reads frames off
/// `read_half`, passes each to `handler`, and writes back whatever reply (if
/// any) the handler returns.
///
/// Terminates cleanly (returns `Ok(())`) on cancellation or a clean EOF at a
/// frame boundary (logged as "peer closed"); returns `Err` on any other I/O
/// or protocol error. Per spec §4.3, reads are not serialized against
/// writes, but this function must not be called twice concurrently for the
/// same connection.
pub async fn listen_loop<S, R, H, Fut>(
    connection: Arc<Connection<S>>,
    mut read_half: R,
    cancellation: CancellationToken,
    mut handler: H,
) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
    H: FnMut(PipeMessage) -> Fut,
    Fut: Future<Output = Option<PipeMessage>>,
{
    loop {
        let frame_bytes = tokio::select! {
            _ = cancellation.cancelled() => {
                log::debug!(target: "pipe_rpc::connection", "connection {} cancelled", connection.id());
                return Ok(());
            }
            bytes = codec::try_read_frame_bytes(&mut read_half, DEFAULT_MAX_FRAME_LEN) => bytes?,
        };

        let Some(bytes) = frame_bytes else {
            log::debug!(target: "pipe_rpc::connection", "connection {} peer closed", connection.id());
            return Ok(());
        };

        let message: PipeMessage =
            serde_json::from_slice(&bytes).map_err(|e| Error::PayloadMalformed(e.to_string()))?;

        if let Some(reply) = handler(message).await {
            connection.send(&reply).await?;
        }
    }
}
