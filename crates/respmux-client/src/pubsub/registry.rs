// Subscription bookkeeping: key -> set of local sinks.
use respmux_wire::PubSubMessage;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Caller-owned delivery target for published messages.
///
/// Identity is the id assigned at construction; clones are the same sink.
///
/// ```
/// use respmux_client::MessageSink;
///
/// let (sink, _rx) = MessageSink::channel(8);
/// let same = sink.clone();
/// let (other, _other_rx) = MessageSink::channel(8);
/// assert_eq!(sink, same);
/// assert_ne!(sink, other);
/// ```
#[derive(Debug, Clone)]
pub struct MessageSink {
    id: u64,
    tx: mpsc::Sender<PubSubMessage>,
}

impl MessageSink {
    pub fn new(tx: mpsc::Sender<PubSubMessage>) -> Self {
        Self {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PubSubMessage>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits for capacity and hands the message over. Returns false when the
    /// receiving side is gone.
    pub(crate) async fn deliver(&self, message: PubSubMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }
}

impl PartialEq for MessageSink {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageSink {}

impl Hash for MessageSink {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Map from subscription key to the sinks registered under it.
///
/// A key with no sinks is never stored, so `contains` answers whether the key
/// is subscribed on the wire. Not synchronized; the owner holds the lock.
#[derive(Debug, Default)]
pub struct SubscriptionSet {
    entries: HashMap<String, HashSet<MessageSink>>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, sink: &MessageSink) {
        self.entries
            .entry(key.to_string())
            .or_default()
            .insert(sink.clone());
    }

    /// Removes the pair and reports whether `key` is now absent, either
    /// because its last sink left or because it was never present.
    pub fn remove(&mut self, key: &str, sink: &MessageSink) -> bool {
        let Some(sinks) = self.entries.get_mut(key) else {
            return true;
        };
        sinks.remove(sink);
        if sinks.is_empty() {
            self.entries.remove(key);
            return true;
        }
        false
    }

    /// Keys from `candidates` with no entry yet, in input order.
    pub fn missing<S: AsRef<str>>(&self, candidates: &[S]) -> Vec<String> {
        candidates
            .iter()
            .map(AsRef::as_ref)
            .filter(|key| !self.entries.contains_key(*key))
            .map(str::to_string)
            .collect()
    }

    pub fn sinks(&self, key: &str) -> Vec<MessageSink> {
        self.entries
            .get(key)
            .map(|sinks| sinks.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Sink -> keys it is registered under.
    pub fn inverse(&self) -> HashMap<MessageSink, Vec<String>> {
        let mut out: HashMap<MessageSink, Vec<String>> = HashMap::new();
        for (key, sinks) in &self.entries {
            for sink in sinks {
                out.entry(sink.clone()).or_default().push(key.clone());
            }
        }
        out
    }
}
