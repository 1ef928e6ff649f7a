// Application-level keepalive: PING on a fixed interval until the first failure.
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

use super::Inner;

pub(crate) async fn run_keepalive(inner: Arc<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => return,
            _ = ticker.tick() => {}
        }
        if let Err(err) = inner.ping().await {
            tracing::debug!(error = %err, "keepalive stopping");
            return;
        }
        t_counter!("respmux_pubsub_keepalive_pings_total").increment(1);
    }
}
