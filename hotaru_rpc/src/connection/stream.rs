//! An abstraction over plain TCP and TLS connections using Tokio,
//! generalized from the teacher's client-only `TcpConnectionStream` to
//! also hold a server-side TLS stream (the credential exchange in §6.2
//! runs on either role).

use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

/// Represents a connection which can be plain TCP or secured with TLS on
/// either side of the handshake.
pub enum TcpConnectionStream {
    Tcp(TcpStream),
    TlsClient(ClientTlsStream<TcpStream>),
    TlsServer(ServerTlsStream<TcpStream>),
}

impl TcpConnectionStream {
    pub fn new_tcp(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    pub fn new_tls_client(stream: ClientTlsStream<TcpStream>) -> Self {
        Self::TlsClient(stream)
    }

    pub fn new_tls_server(stream: ServerTlsStream<TcpStream>) -> Self {
        Self::TlsServer(stream)
    }

    /// Gracefully shuts down the connection by closing the write half.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(stream) => stream.shutdown().await,
            Self::TlsClient(stream) => stream.shutdown().await,
            Self::TlsServer(stream) => stream.shutdown().await,
        }
    }

    pub fn peer_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Self::Tcp(stream) => stream.peer_addr(),
            Self::TlsClient(stream) => stream.get_ref().0.peer_addr(),
            Self::TlsServer(stream) => stream.get_ref().0.peer_addr(),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Self::Tcp(stream) => stream.local_addr(),
            Self::TlsClient(stream) => stream.get_ref().0.local_addr(),
            Self::TlsServer(stream) => stream.get_ref().0.local_addr(),
        }
    }

    pub fn is_tls(&self) -> bool {
        !matches!(self, Self::Tcp(_))
    }
}

impl AsyncRead for TcpConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::TlsClient(stream) => Pin::new(stream).poll_read(cx, buf),
            Self::TlsServer(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TcpConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::TlsClient(stream) => Pin::new(stream).poll_write(cx, buf),
            Self::TlsServer(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            Self::TlsClient(stream) => Pin::new(stream).poll_flush(cx),
            Self::TlsServer(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::TlsClient(stream) => Pin::new(stream).poll_shutdown(cx),
            Self::TlsServer(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Splits the connection into owned read/write halves usable from
/// separate tasks, mirroring `tokio::io::split`.
pub fn split_connection(
    conn: TcpConnectionStream,
) -> (io::ReadHalf<TcpConnectionStream>, io::WriteHalf<TcpConnectionStream>) {
    io::split(conn)
}
