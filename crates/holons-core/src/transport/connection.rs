//! Connection variants and the uniform byte-stream contract.
//!
//! Every variant is `Unpin`, so [`Connection`] implements `AsyncRead` and
//! `AsyncWrite` by delegating to the wrapped stream. The RPC layer splits a
//! connection with `tokio::io::split` and owns both halves for exactly one
//! connection generation.

use crate::{HolonError, Result};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;

use super::uri::Scheme;

/// The process's standard input/output pair as one duplex stream.
#[derive(Debug)]
pub struct StdioStream {
    stdin: tokio::io::Stdin,
    stdout: tokio::io::Stdout,
}

impl StdioStream {
    pub fn new() -> Self {
        Self {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioStream {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncRead for StdioStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for StdioStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdout).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_shutdown(cx)
    }
}

/// A live byte-stream connection over one of the runtime transports.
#[derive(Debug)]
pub enum Connection {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
    Stdio(StdioStream),
    Mem(DuplexStream),
}

impl Connection {
    /// Transport scheme of this connection.
    pub fn scheme(&self) -> Scheme {
        match self {
            Connection::Tcp(_) => Scheme::Tcp,
            #[cfg(unix)]
            Connection::Unix(_) => Scheme::Unix,
            Connection::Stdio(_) => Scheme::Stdio,
            Connection::Mem(_) => Scheme::Mem,
        }
    }

    /// Read exactly `n` bytes.
    ///
    /// Fails with `ConnectionClosed` when the stream ends first.
    pub async fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Write all of `bytes` and flush.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes).await?;
        self.flush().await?;
        Ok(())
    }

    /// Shut down the write side, signalling EOF to the peer.
    ///
    /// Calling this more than once is harmless: errors from an already
    /// closed stream are swallowed.
    pub async fn close(&mut self) -> Result<()> {
        match self.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) if is_already_closed(&e) => Ok(()),
            Err(e) => Err(HolonError::from(e)),
        }
    }
}

pub(crate) fn is_already_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

impl AsyncRead for Connection {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Stdio(s) => Pin::new(s).poll_read(cx, buf),
            Connection::Mem(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for Connection {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Stdio(s) => Pin::new(s).poll_write(cx, buf),
            Connection::Mem(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_flush(cx),
            Connection::Stdio(s) => Pin::new(s).poll_flush(cx),
            Connection::Mem(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Connection::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            Connection::Unix(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Stdio(s) => Pin::new(s).poll_shutdown(cx),
            Connection::Mem(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mem_connection_read_write() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = Connection::Mem(a);
        let mut server = Connection::Mem(b);

        client.write(b"ping").await.unwrap();
        assert_eq!(server.read(4).await.unwrap(), b"ping");
        assert_eq!(server.scheme(), Scheme::Mem);
    }

    #[tokio::test]
    async fn test_read_after_peer_close_is_connection_closed() {
        let (a, b) = tokio::io::duplex(64);
        let mut client = Connection::Mem(a);
        let mut server = Connection::Mem(b);

        client.write(b"ab").await.unwrap();
        client.close().await.unwrap();

        let result = server.read(4).await;
        assert!(matches!(result, Err(HolonError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = tokio::io::duplex(64);
        let mut conn = Connection::Mem(a);
        conn.close().await.unwrap();
        conn.close().await.unwrap();
    }
}
