//! Raw TCP transport: listen, accept, dial, bounded read, write, close.
//!
//! Deadlines are per operation. A connection accepted or dialed with a
//! positive `timeout_ms` applies that limit to each subsequent read and write
//! on its own; `timeout_ms <= 0` means no limit. Nothing here retries: every
//! failure is returned to the caller.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Transport failures.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("accept failed: {0}")]
    Accept(io::Error),
    #[error("cannot connect to {address}: {source}")]
    Dial { address: String, source: io::Error },
    #[error("read failed: {0}")]
    Read(io::Error),
    #[error("write failed: {0}")]
    Write(io::Error),
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("bytes read out of limit ({0})")]
    Oversized(usize),
    #[error("read limit must be greater than 0")]
    InvalidLimit,
    #[error("resource already closed")]
    Closed,
}

fn deadline_from_ms(timeout_ms: i64) -> Option<Duration> {
    u64::try_from(timeout_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

async fn bounded<T, F>(deadline: Option<Duration>, op: F) -> Result<T, TransportError>
where
    F: std::future::Future<Output = Result<T, TransportError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, op)
            .await
            .map_err(|_| TransportError::Timeout(limit))?,
        None => op.await,
    }
}

/// A listening socket.
#[derive(Debug)]
pub struct Listener {
    inner: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl Listener {
    /// Binds all interfaces on `port`. Port `0` picks a free port.
    pub async fn bind(port: u16) -> Result<Self, TransportError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let inner = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { port, source })?;
        let local_addr = inner
            .local_addr()
            .map_err(|source| TransportError::Bind { port, source })?;
        Ok(Self {
            inner: Some(inner),
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Waits for the next inbound connection.
    pub async fn accept(&self, timeout_ms: i64) -> Result<Connection, TransportError> {
        let listener = self.inner.as_ref().ok_or(TransportError::Closed)?;
        let (stream, peer) = listener.accept().await.map_err(TransportError::Accept)?;
        Ok(Connection {
            stream: Some(stream),
            peer,
            deadline: deadline_from_ms(timeout_ms),
        })
    }

    /// Stops listening. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!(addr = %self.local_addr, "Listener closed");
        }
    }
}

/// One TCP connection, owned by a single request/response exchange.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
    deadline: Option<Duration>,
}

impl Connection {
    /// Connects to `address` (`host:port`).
    pub async fn dial(address: &str, timeout_ms: i64) -> Result<Self, TransportError> {
        let deadline = deadline_from_ms(timeout_ms);
        let stream = bounded(deadline, async {
            TcpStream::connect(address)
                .await
                .map_err(|source| TransportError::Dial {
                    address: address.to_string(),
                    source,
                })
        })
        .await?;
        let peer = stream.peer_addr().map_err(|source| TransportError::Dial {
            address: address.to_string(),
            source,
        })?;
        Ok(Self {
            stream: Some(stream),
            peer,
            deadline,
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Reads at most `limit` bytes in one read.
    ///
    /// Returns an empty buffer when the peer closed the connection cleanly and
    /// [`TransportError::Oversized`] when more than `limit` bytes were ready.
    pub async fn read(&mut self, limit: usize) -> Result<Vec<u8>, TransportError> {
        if limit == 0 {
            return Err(TransportError::InvalidLimit);
        }
        let deadline = self.deadline;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let mut buf = vec![0u8; limit + 1];
        let n = bounded(deadline, async {
            stream.read(&mut buf).await.map_err(TransportError::Read)
        })
        .await?;
        if n > limit {
            return Err(TransportError::Oversized(limit));
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Writes all of `bytes`.
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let deadline = self.deadline;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        bounded(deadline, async {
            stream.write_all(bytes).await.map_err(TransportError::Write)?;
            stream.flush().await.map_err(TransportError::Write)
        })
        .await
    }

    /// Shuts the connection down. Calling it again does nothing.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                tracing::debug!(peer = %self.peer, "Shutdown after close: {e}");
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

/// Shorthand for [`Listener::bind`].
pub async fn listen(port: u16) -> Result<Listener, TransportError> {
    Listener::bind(port).await
}

/// Shorthand for [`Connection::dial`].
pub async fn dial(address: &str, timeout_ms: i64) -> Result<Connection, TransportError> {
    Connection::dial(address, timeout_ms).await
}
