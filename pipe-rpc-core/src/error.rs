use thiserror::Error;

/// Every error kind named by the protocol, independent of which side of the
/// pipe (registry or worker) observes it.
#[derive(Debug, Error)]
pub enum Error {
    /// A frame's length header was zero, negative, or exceeded the configured ceiling.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The stream closed (or errored) before a full frame could be read or written.
    #[error("unexpected end of stream")]
    UnexpectedEndOfStream,

    /// A frame's declared length exceeded the configured maximum.
    #[error("frame of {declared} bytes exceeds the {max} byte limit")]
    MaxFrameExceeded { declared: u32, max: u32 },

    /// Underlying I/O failure on the stream.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The payload did not deserialize as the requested single value.
    #[error("payload malformed: {0}")]
    PayloadMalformed(String),

    /// The payload array did not have exactly the expected number of elements.
    #[error("arity mismatch: expected {expected} arguments, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    /// A `wait` was requested for a `MessageId` that already has a pending entry.
    #[error("duplicate pending entry for message {0}")]
    DuplicatePending(uuid::Uuid),

    /// No response arrived within the per-call deadline.
    #[error("timed out waiting for a response")]
    Timeout,

    /// A send referenced a worker id not currently registered.
    #[error("worker '{0}' is not registered")]
    WorkerNotRegistered(String),

    /// The worker was registered but its bearing connection is already gone.
    #[error("connection for worker '{0}' is gone")]
    ConnectionGone(String),

    /// No handler method matched the request's `Type`.
    #[error("method not found: {0}")]
    HandlerNotFound(String),

    /// The first frame on a new connection was not `RegisterWorker`.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
}
