//! Length-prefixed frame codec: `u32` little-endian length, then that many
//! opaque payload bytes. Used for every frame after the handshake
//! completes.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

/// Reads one complete frame's payload from `stream`, tolerating the
/// underlying socket delivering it in arbitrarily small chunks. Returns
/// `Ok(None)` on clean EOF before any bytes of a new frame arrive, and
/// `Err` on EOF mid-frame or a transport error.
pub async fn read_frame<R>(stream: &mut R) -> Result<Option<Vec<u8>>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match read_exact_or_eof(stream, &mut len_buf).await? {
        false => return Ok(None),
        true => {}
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Like `AsyncReadExt::read_exact`, but returns `Ok(false)` instead of an
/// error when EOF is hit before a single byte has been read (a clean
/// disconnect between frames rather than mid-frame).
async fn read_exact_or_eof<R>(stream: &mut R, buf: &mut [u8]) -> Result<bool>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }
    Ok(true)
}

pub async fn write_frame<W>(stream: &mut W, payload: &[u8]) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let len = payload.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_arbitrary_chunking() {
        let payload = vec![7u8; 5000];
        let mut wire = Vec::new();
        write_frame(&mut wire, &payload).await.unwrap();

        // Feed the encoded bytes back in one-byte-at-a-time reads by
        // wrapping them in a cursor; tokio's AsyncRead for &[u8] already
        // returns short reads are not guaranteed, so we simulate chunking
        // via a custom reader that only yields a few bytes at a time.
        struct Trickle<'a> {
            buf: &'a [u8],
            pos: usize,
        }
        impl<'a> tokio::io::AsyncRead for Trickle<'a> {
            fn poll_read(
                mut self: std::pin::Pin<&mut Self>,
                _cx: &mut std::task::Context<'_>,
                out: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                let remaining = &self.buf[self.pos..];
                let n = remaining.len().min(3).min(out.remaining());
                out.put_slice(&remaining[..n]);
                self.pos += n;
                std::task::Poll::Ready(Ok(()))
            }
        }
        let mut trickle = Trickle { buf: &wire, pos: 0 };
        let decoded = read_frame(&mut trickle).await.unwrap().unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn clean_eof_before_frame_is_none() {
        let mut empty: &[u8] = &[];
        let result = read_frame(&mut empty).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn eof_mid_frame_is_error() {
        let mut partial: &[u8] = &[10, 0, 0, 0, 1, 2];
        let result = read_frame(&mut partial).await;
        assert!(result.is_err());
    }
}
