use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::warn;

use super::Inner;

/// Closes the session once inbound traffic has been silent for longer than
/// the staleness timeout. Exits as soon as the session is closed.
pub(super) async fn run(inner: Arc<Inner>) {
    inner.touch();
    let timeout = inner.config.staleness_timeout;
    let mut stop = inner.stop.subscribe();
    let mut ticker = tokio::time::interval(inner.config.watchdog_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.wait_for(|stopped| *stopped) => return,
        }
        if inner.is_closed() {
            return;
        }
        let silent = inner.last_receive.lock().elapsed();
        if silent > timeout {
            warn!(
                session = %inner.id,
                timeout_secs = timeout.as_secs_f64(),
                "no messages received, closing stale connection"
            );
            inner.close().await;
            return;
        }
    }
}
