// Stream transport for RESP2 connections.
//
// A connection is split into a read half and a write half so that one task can
// sit in `decode` while others `encode` commands. Each half has its own lock;
// the read half keeps a scratch buffer so that a frame interrupted by a read
// timeout is resumed, not lost, on the next `decode`.
use async_trait::async_trait;
use bytes::BytesMut;
use respmux_wire::Value;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    // Transient: no complete frame within the read timeout.
    #[error("read timed out")]
    Timeout,
    #[error("connection closed")]
    Closed,
    #[error("connection closed by peer")]
    PeerClosed,
    #[error("frame too large: {buffered} bytes buffered (cap {limit})")]
    FrameTooLarge { buffered: usize, limit: usize },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] respmux_wire::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

/// Transport-level configuration defaults.
///
/// ```
/// use respmux_transport::TransportConfig;
///
/// let config = TransportConfig::default();
/// assert!(config.max_frame_bytes > 0);
/// assert!(config.read_timeout.is_some());
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    // None blocks reads indefinitely.
    pub read_timeout: Option<Duration>,
    pub connect_timeout: Duration,
    pub max_frame_bytes: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: Some(Duration::from_secs(10)),
            connect_timeout: Duration::from_secs(5),
            max_frame_bytes: 64 * 1024 * 1024,
        }
    }
}

/// A bidirectional RESP2 connection.
///
/// `decode` must report a read timeout as `TransportError::Timeout` so callers
/// can tell it apart from a dead connection.
#[async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Write one protocol value.
    async fn encode(&self, value: &Value) -> Result<()>;
    /// Block until one full value has been parsed.
    async fn decode(&self) -> Result<Value>;
    async fn close(&self) -> Result<()>;
}

struct ReadState<R> {
    stream: R,
    scratch: BytesMut,
}

/// Connection over any split async byte stream.
pub struct StreamConn<R, W> {
    reader: Mutex<ReadState<R>>,
    writer: Mutex<Option<W>>,
    closed: AtomicBool,
    config: TransportConfig,
}

pub type TcpConn = StreamConn<OwnedReadHalf, OwnedWriteHalf>;

impl<R, W> StreamConn<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, config: TransportConfig) -> Self {
        Self {
            reader: Mutex::new(ReadState {
                stream: reader,
                scratch: BytesMut::with_capacity(16 * 1024),
            }),
            writer: Mutex::new(Some(writer)),
            closed: AtomicBool::new(false),
            config,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl TcpConn {
    pub async fn connect(addr: SocketAddr, config: TransportConfig) -> Result<Self> {
        let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {addr} timed out"),
                )
            })??;
        Self::from_stream(stream, config)
    }

    pub fn from_stream(stream: TcpStream, config: TransportConfig) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        tracing::debug!(%peer, "tcp connection established");
        let (reader, writer) = stream.into_split();
        Ok(Self::new(reader, writer, config))
    }
}

#[async_trait]
impl<R, W> Conn for StreamConn<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn encode(&self, value: &Value) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(TransportError::Closed);
        };
        let frame = value.to_bytes();
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn decode(&self) -> Result<Value> {
        let mut state = self.reader.lock().await;
        let ReadState { stream, scratch } = &mut *state;
        loop {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            if let Some(value) = Value::decode(scratch)? {
                return Ok(value);
            }
            // Safety: cap buffered bytes so a peer cannot grow the buffer without bound.
            if scratch.len() > self.config.max_frame_bytes {
                return Err(TransportError::FrameTooLarge {
                    buffered: scratch.len(),
                    limit: self.config.max_frame_bytes,
                });
            }
            // `read_buf` is cancel safe, so a timeout never drops bytes.
            let read = match self.config.read_timeout {
                Some(limit) => match tokio::time::timeout(limit, stream.read_buf(scratch)).await {
                    Ok(read) => read?,
                    Err(_) => return Err(TransportError::Timeout),
                },
                None => stream.read_buf(scratch).await?,
            };
            if read == 0 {
                return Err(TransportError::PeerClosed);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        let writer = self.writer.lock().await.take();
        match writer {
            Some(mut stream) => match stream.shutdown().await {
                Ok(()) => Ok(()),
                // The peer may already be gone; the connection is closed either way.
                Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
                Err(err) => Err(err.into()),
            },
            None => Ok(()),
        }
    }
}
