// Pub/sub connection facade.
//
// Locking order: `ops` (serializes registry bookkeeping calls), then the
// correlator's issuer lock, then `registries`. The registry lock is never held
// across a command round-trip, so fan-out continues while a call waits on acks.
mod correlator;
mod keepalive;
mod reader;
mod registry;

pub use registry::{MessageSink, SubscriptionSet};

use anyhow::{Context, Result as AnyResult};
use parking_lot::Mutex as SyncMutex;
use respmux_transport::{Conn, TcpConn, TransportError};
use respmux_wire::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, RwLock, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::PubSubConfig;
use crate::error::{PubSubError, Result};
use correlator::{Correlator, IssueError};

/// Receives the teardown cause once; `None` means an explicit close.
pub type CloseObserver = oneshot::Receiver<Option<Arc<TransportError>>>;

type CloseResult = std::result::Result<(), Arc<TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Channel,
    Pattern,
}

impl Scope {
    fn subscribe_command(self) -> &'static str {
        match self {
            Scope::Channel => "SUBSCRIBE",
            Scope::Pattern => "PSUBSCRIBE",
        }
    }

    fn unsubscribe_command(self) -> &'static str {
        match self {
            Scope::Channel => "UNSUBSCRIBE",
            Scope::Pattern => "PUNSUBSCRIBE",
        }
    }
}

#[derive(Default)]
pub(crate) struct Registries {
    pub(crate) channels: SubscriptionSet,
    pub(crate) patterns: SubscriptionSet,
}

impl Registries {
    fn scope(&self, scope: Scope) -> &SubscriptionSet {
        match scope {
            Scope::Channel => &self.channels,
            Scope::Pattern => &self.patterns,
        }
    }

    fn sorted_keys(&self, scope: Scope) -> Vec<String> {
        let mut keys: Vec<String> = self.scope(scope).keys().map(str::to_string).collect();
        keys.sort();
        keys
    }

    fn scope_mut(&mut self, scope: Scope) -> &mut SubscriptionSet {
        match scope {
            Scope::Channel => &mut self.channels,
            Scope::Pattern => &mut self.patterns,
        }
    }
}

pub(crate) struct Inner {
    pub(crate) conn: Box<dyn Conn>,
    // None once the connection is closed.
    pub(crate) registries: RwLock<Option<Registries>>,
    ops: Mutex<()>,
    pub(crate) correlator: Correlator,
    pub(crate) shutdown: CancellationToken,
    close_result: OnceCell<CloseResult>,
    observer: SyncMutex<Option<oneshot::Sender<Option<Arc<TransportError>>>>>,
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) async fn ping(&self) -> Result<()> {
        self.command(1, "PING", &[] as &[String]).await
    }

    async fn command(&self, expected: usize, name: &str, keys: &[String]) -> Result<()> {
        if self.is_closed() {
            return Err(PubSubError::Closed);
        }
        let command = Value::command(name, keys);
        match self
            .correlator
            .issue(self.conn.as_ref(), &self.shutdown, expected, &command)
            .await
        {
            Ok(()) => Ok(()),
            Err(IssueError::Ack(err)) => Err(err),
            Err(IssueError::Write(cause)) => {
                tracing::debug!(command = name, error = %cause, "command write failed");
                let _ = self.terminate(Some(cause.clone())).await;
                Err(PubSubError::Transport(cause))
            }
        }
    }

    async fn subscribe<S: AsRef<str>>(
        &self,
        scope: Scope,
        sink: &MessageSink,
        keys: &[S],
    ) -> Result<()> {
        let _ops = self.ops.lock().await;
        let missing = {
            let registries = self.registries.read().await;
            let registries = registries.as_ref().ok_or(PubSubError::Closed)?;
            registries.scope(scope).missing(keys)
        };
        if !missing.is_empty() {
            self.command(missing.len(), scope.subscribe_command(), &missing)
                .await?;
        }
        let mut registries = self.registries.write().await;
        let registries = registries.as_mut().ok_or(PubSubError::Closed)?;
        let set = registries.scope_mut(scope);
        for key in keys {
            set.add(key.as_ref(), sink);
        }
        tracing::debug!(
            sink = sink.id(),
            ?scope,
            keys = keys.len(),
            issued = missing.len(),
            "subscribed"
        );
        Ok(())
    }

    async fn unsubscribe<S: AsRef<str>>(
        &self,
        scope: Scope,
        sink: &MessageSink,
        keys: &[S],
    ) -> Result<()> {
        let _ops = self.ops.lock().await;
        let emptied = {
            let mut registries = self.registries.write().await;
            let registries = registries.as_mut().ok_or(PubSubError::Closed)?;
            let set = registries.scope_mut(scope);
            let mut emptied = Vec::new();
            for key in keys.iter().map(AsRef::as_ref) {
                if set.contains(key) && set.remove(key, sink) {
                    emptied.push(key.to_string());
                }
            }
            emptied
        };
        tracing::debug!(
            sink = sink.id(),
            ?scope,
            keys = keys.len(),
            issued = emptied.len(),
            "unsubscribed"
        );
        if emptied.is_empty() {
            return Ok(());
        }
        self.command(emptied.len(), scope.unsubscribe_command(), &emptied)
            .await
    }

    /// The one-time terminal transition. Later callers get the cached result.
    pub(crate) async fn terminate(&self, cause: Option<Arc<TransportError>>) -> Result<()> {
        let result = self
            .close_result
            .get_or_init(|| async move {
                self.shutdown.cancel();
                self.correlator.close(cause.clone());
                self.registries.write().await.take();
                let closed = self.conn.close().await.map_err(Arc::new);
                if let Some(observer) = self.observer.lock().take() {
                    let _ = observer.send(cause.clone());
                }
                match &cause {
                    Some(cause) => tracing::debug!(error = %cause, "pubsub connection torn down"),
                    None => tracing::debug!("pubsub connection closed"),
                }
                closed
            })
            .await;
        result.clone().map_err(PubSubError::CloseFailed)
    }
}

/// A connection dedicated to pub/sub traffic.
///
/// Published messages are fanned out to [`MessageSink`]s by a background
/// reader task. Delivery waits for sink capacity, and while it waits no other
/// frame is processed, including acks for pending commands. Keep sinks
/// drained.
///
/// ```no_run
/// use respmux_client::{MessageSink, PubSubConfig, PubSubConn};
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = PubSubConfig::default();
/// let conn = PubSubConn::connect("127.0.0.1:6379".parse()?, &config).await?;
/// let (sink, mut rx) = MessageSink::channel(64);
/// conn.subscribe(&sink, &["news"]).await?;
/// while let Some(message) = rx.recv().await {
///     println!("{}: {:?}", message.channel, message.payload);
/// }
/// conn.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct PubSubConn {
    inner: Arc<Inner>,
}

impl PubSubConn {
    pub async fn connect(addr: SocketAddr, config: &PubSubConfig) -> AnyResult<Self> {
        let conn = TcpConn::connect(addr, config.transport_config())
            .await
            .with_context(|| format!("connect pubsub to {addr}"))?;
        Ok(Self::new(conn, config))
    }

    /// Takes ownership of `conn`; it should not carry any other traffic.
    pub fn new<C: Conn>(conn: C, config: &PubSubConfig) -> Self {
        Self::build(Box::new(conn), config, None)
    }

    pub fn with_close_observer<C: Conn>(conn: C, config: &PubSubConfig) -> (Self, CloseObserver) {
        let (tx, rx) = oneshot::channel();
        (Self::build(Box::new(conn), config, Some(tx)), rx)
    }

    fn build(
        conn: Box<dyn Conn>,
        config: &PubSubConfig,
        observer: Option<oneshot::Sender<Option<Arc<TransportError>>>>,
    ) -> Self {
        let inner = Arc::new(Inner {
            conn,
            registries: RwLock::new(Some(Registries::default())),
            ops: Mutex::new(()),
            correlator: Correlator::new(),
            shutdown: CancellationToken::new(),
            close_result: OnceCell::new(),
            observer: SyncMutex::new(observer),
        });
        tokio::spawn(reader::run_reader(inner.clone()));
        if let Some(period) = config.keepalive() {
            tokio::spawn(keepalive::run_keepalive(inner.clone(), period));
        }
        Self { inner }
    }

    pub async fn subscribe<S: AsRef<str>>(&self, sink: &MessageSink, channels: &[S]) -> Result<()> {
        self.inner.subscribe(Scope::Channel, sink, channels).await
    }

    pub async fn unsubscribe<S: AsRef<str>>(
        &self,
        sink: &MessageSink,
        channels: &[S],
    ) -> Result<()> {
        self.inner.unsubscribe(Scope::Channel, sink, channels).await
    }

    pub async fn psubscribe<S: AsRef<str>>(&self, sink: &MessageSink, patterns: &[S]) -> Result<()> {
        self.inner.subscribe(Scope::Pattern, sink, patterns).await
    }

    pub async fn punsubscribe<S: AsRef<str>>(
        &self,
        sink: &MessageSink,
        patterns: &[S],
    ) -> Result<()> {
        self.inner.unsubscribe(Scope::Pattern, sink, patterns).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    /// Closes the connection. Safe to call repeatedly and concurrently; every
    /// call returns the result of the first.
    pub async fn close(&self) -> Result<()> {
        self.inner.terminate(None).await
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Subscribed channels, sorted. Empty once closed.
    pub async fn subscriptions(&self) -> Vec<String> {
        let registries = self.inner.registries.read().await;
        registries
            .as_ref()
            .map(|registries| registries.sorted_keys(Scope::Channel))
            .unwrap_or_default()
    }

    /// Subscribed patterns, sorted. Empty once closed.
    pub async fn pattern_subscriptions(&self) -> Vec<String> {
        let registries = self.inner.registries.read().await;
        registries
            .as_ref()
            .map(|registries| registries.sorted_keys(Scope::Pattern))
            .unwrap_or_default()
    }
}

impl Drop for PubSubConn {
    fn drop(&mut self) {
        // Stops the reader and keepalive tasks and wakes a command still
        // waiting on acks; the transport closes when they release it.
        self.inner.shutdown.cancel();
        self.inner.correlator.close(None);
    }
}
