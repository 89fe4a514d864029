//! 64-byte handshake exchanged before any framed traffic.
//!
//! Client sends `HELLO_PREFIX || ascii-decimal(version)`, NUL-padded to 64
//! bytes; server replies with `ACCEPT_MESSAGE`, NUL-padded to 64 bytes, if
//! it accepts the version, and otherwise simply closes the socket.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::Result;

pub const FRAME_SIZE: usize = 64;
const HELLO_PREFIX: &[u8] = b"dvdyellow hello: ";
const ACCEPT_MESSAGE: &[u8] = b"dvdyellow accepted";

/// Server side: read the client's hello frame and return the version it
/// advertised, or `None` if the frame was malformed (caller should close).
pub async fn read_hello<R>(stream: &mut R) -> Result<Option<u32>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    if stream.read_exact(&mut buf).await.is_err() {
        return Ok(None);
    }
    if !buf.starts_with(HELLO_PREFIX) {
        return Ok(None);
    }
    let rest = &buf[HELLO_PREFIX.len()..];
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let digits = match std::str::from_utf8(&rest[..end]) {
        Ok(s) => s,
        Err(_) => return Ok(None),
    };
    match digits.parse::<u32>() {
        Ok(v) => Ok(Some(v)),
        Err(_) => Ok(None),
    }
}

pub async fn write_accept<W>(stream: &mut W) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut frame = [0u8; FRAME_SIZE];
    frame[..ACCEPT_MESSAGE.len()].copy_from_slice(ACCEPT_MESSAGE);
    stream.write_all(&frame).await?;
    stream.flush().await?;
    Ok(())
}

/// Client side, used by integration tests acting as a test client: build
/// the outgoing hello frame for a given protocol version.
pub fn build_hello(version: u32) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    let digits = version.to_string();
    frame[..HELLO_PREFIX.len()].copy_from_slice(HELLO_PREFIX);
    let start = HELLO_PREFIX.len();
    frame[start..start + digits.len()].copy_from_slice(digits.as_bytes());
    frame
}

/// Client side: read the server's response and confirm it is exactly the
/// accept frame.
pub async fn read_accept<R>(stream: &mut R) -> Result<bool>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    if stream.read_exact(&mut buf).await.is_err() {
        return Ok(false);
    }
    let mut expected = [0u8; FRAME_SIZE];
    expected[..ACCEPT_MESSAGE.len()].copy_from_slice(ACCEPT_MESSAGE);
    Ok(buf == expected)
}

/// Runs the server half of the handshake against a predicate deciding
/// which versions are acceptable. Returns an error only on transport
/// failure; a rejected/malformed hello is reported as `Ok(false)` so the
/// caller can close the connection without treating it as exceptional.
pub async fn perform_server_side<S>(stream: &mut S, accepts_version: impl Fn(u32) -> bool) -> Result<bool>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let version = match read_hello(stream).await? {
        Some(v) => v,
        None => return Ok(false),
    };
    if !accepts_version(version) {
        return Ok(false);
    }
    write_accept(stream).await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn accepts_matching_version() {
        let (mut client, mut server) = duplex(256);
        let client_task = tokio::spawn(async move {
            let hello = build_hello(1);
            client.write_all(&hello).await.unwrap();
            read_accept(&mut client).await.unwrap()
        });
        let accepted = perform_server_side(&mut server, |v| v == 1).await.unwrap();
        assert!(accepted);
        assert!(client_task.await.unwrap());
    }

    #[tokio::test]
    async fn rejects_wrong_version() {
        let (mut client, mut server) = duplex(256);
        tokio::spawn(async move {
            let hello = build_hello(99);
            client.write_all(&hello).await.unwrap();
        });
        let accepted = perform_server_side(&mut server, |v| v == 1).await.unwrap();
        assert!(!accepted);
    }

    #[tokio::test]
    async fn rejects_bad_prefix() {
        let (mut client, mut server) = duplex(256);
        tokio::spawn(async move {
            let frame = [b'x'; FRAME_SIZE];
            client.write_all(&frame).await.unwrap();
        });
        let accepted = perform_server_side(&mut server, |_| true).await.unwrap();
        assert!(!accepted);
    }
}
