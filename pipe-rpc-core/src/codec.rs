use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::envelope::PipeMessage;
use crate::error::Error;

/// Default ceiling on a single frame's body, guarding against an adversarial
/// or corrupt length header triggering an unbounded allocation (see
/// SPEC_FULL.md §7, the one REDESIGN FLAG this crate takes).
pub const DEFAULT_MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

/// Reads exactly one frame (`<u32 LE length><length bytes of UTF-8 JSON>`)
/// from `reader` and decodes it as a [`PipeMessage`].
///
/// A clean EOF before any byte of the length header is read is reported to
/// the caller as an `UnexpectedEndOfStream` error; callers that want to treat
/// a clean-EOF-at-a-frame-boundary as "peer closed" rather than an error
/// should check for that condition before calling `read_frame` again (the
/// connection listen loop does this).
pub async fn read_frame<R>(reader: &mut R, max_frame_len: u32) -> Result<PipeMessage, Error>
where
    R: AsyncRead + Unpin,
{
    let len = read_frame_bytes(reader, max_frame_len).await?;
    serde_json::from_slice(&len).map_err(|e| Error::PayloadMalformed(e.to_string()))
}

/// Reads exactly one frame's body off `reader`, returning the raw UTF-8 JSON
/// bytes without decoding them. Returns `Ok(None)` if the stream is at a
/// clean frame boundary (zero bytes of the length header were read before
/// EOF) — this is the "peer closed" case the connection's listen loop treats
/// as a normal exit rather than a transport error.
pub async fn try_read_frame_bytes<R>(
    reader: &mut R,
    max_frame_len: u32,
) -> Result<Option<Vec<u8>>, Error>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    let mut read = 0;
    while read < len_buf.len() {
        let n = reader
            .read(&mut len_buf[read..])
            .await
            .map_err(Error::Transport)?;
        if n == 0 {
            if read == 0 {
                return Ok(None);
            }
            return Err(Error::UnexpectedEndOfStream);
        }
        read += n;
    }

    let len = u32::from_le_bytes(len_buf);
    if len == 0 {
        return Err(Error::InvalidFrame("frame length must be greater than zero".into()));
    }
    if len > max_frame_len {
        return Err(Error::MaxFrameExceeded {
            declared: len,
            max: max_frame_len,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::UnexpectedEndOfStream,
            _ => Error::Transport(e),
        })?;

    Ok(Some(body))
}

async fn read_frame_bytes<R>(reader: &mut R, max_frame_len: u32) -> Result<Vec<u8>, Error>
where
    R: AsyncRead + Unpin,
{
    match try_read_frame_bytes(reader, max_frame_len).await? {
        Some(bytes) => Ok(bytes),
        None => Err(Error::UnexpectedEndOfStream),
    }
}

/// Writes one frame for `message` to `writer`. The length header and body
/// are written back-to-back and flushed before returning; callers are
/// responsible for holding a per-stream write lock across this call so that
/// concurrent senders on the same connection never interleave their bytes
/// (spec §4.1/§4.3).
pub async fn write_frame<W>(writer: &mut W, message: &PipeMessage) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(message).map_err(|e| Error::PayloadMalformed(e.to_string()))?;
    write_frame_bytes(writer, &body).await
}

async fn write_frame_bytes<W>(writer: &mut W, body: &[u8]) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(body.len())
        .map_err(|_| Error::InvalidFrame("frame body too large to encode a u32 length".into()))?;

    writer.write_all(&len.to_le_bytes()).await.map_err(Error::Transport)?;
    writer.write_all(body).await.map_err(Error::Transport)?;
    writer.flush().await.map_err(Error::Transport)?;
    Ok(())
}
