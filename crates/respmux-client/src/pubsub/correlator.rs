// Command issuance and acknowledgement correlation.
//
// One command is in flight at a time. The reader loop pushes every non-push
// frame into a single-slot channel; the issuer holding the receiver consumes
// exactly as many acks as the command addresses keys.
use parking_lot::Mutex as SyncMutex;
use respmux_transport::{Conn, TransportError};
use respmux_wire::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::PubSubError;

pub(crate) type Ack = std::result::Result<(), PubSubError>;

#[derive(Debug)]
pub(crate) enum IssueError {
    // The command never reached the wire; the connection is unusable.
    Write(Arc<TransportError>),
    // Rejected by the server, or interrupted by teardown.
    Ack(PubSubError),
}

pub(crate) struct Correlator {
    issuer: Mutex<mpsc::Receiver<Ack>>,
    slot: SyncMutex<Option<mpsc::Sender<Ack>>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            issuer: Mutex::new(rx),
            slot: SyncMutex::new(Some(tx)),
        }
    }

    pub(crate) async fn issue(
        &self,
        conn: &dyn Conn,
        shutdown: &CancellationToken,
        expected: usize,
        command: &Value,
    ) -> Result<(), IssueError> {
        let mut acks = self.issuer.lock().await;
        if shutdown.is_cancelled() {
            return Err(IssueError::Ack(PubSubError::ConnectionClosed));
        }
        // Acks for an earlier command that returned on its first error.
        while acks.try_recv().is_ok() {}

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                return Err(IssueError::Ack(PubSubError::ConnectionClosed));
            }
            written = conn.encode(command) => {
                written.map_err(|err| IssueError::Write(Arc::new(err)))?;
            }
        }

        for _ in 0..expected {
            match acks.recv().await {
                Some(Ok(())) => {}
                Some(Err(err)) => return Err(IssueError::Ack(err)),
                None => return Err(IssueError::Ack(PubSubError::ConnectionClosed)),
            }
        }
        Ok(())
    }

    /// Hands one ack to the waiting issuer. Gives up once shutdown starts.
    pub(crate) async fn forward(&self, ack: Ack, shutdown: &CancellationToken) {
        let Some(tx) = self.slot.lock().clone() else {
            return;
        };
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {}
            _ = tx.send(ack) => {}
        }
    }

    /// Offers `cause` to a waiting issuer without blocking, then closes the slot.
    pub(crate) fn close(&self, cause: Option<Arc<TransportError>>) {
        let mut slot = self.slot.lock();
        if let (Some(tx), Some(cause)) = (slot.as_ref(), cause) {
            let _ = tx.try_send(Err(PubSubError::Transport(cause)));
        }
        slot.take();
    }
}
