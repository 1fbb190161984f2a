use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficSnapshot {
    pub inbound_bytes: u64,
    pub outbound_bytes: u64,
    pub inbound_events: u64,
    pub outbound_events: u64,
}

/// Byte and event counters for one session.
#[derive(Debug, Default)]
pub struct TrafficStats {
    total: Counters,
    interval: Counters,
}

#[derive(Debug, Default)]
struct Counters {
    inbound_bytes: AtomicU64,
    outbound_bytes: AtomicU64,
    inbound_events: AtomicU64,
    outbound_events: AtomicU64,
}

impl Counters {
    fn add_inbound(&self, bytes: usize) {
        self.inbound_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.inbound_events.fetch_add(1, Ordering::Relaxed);
    }

    fn add_outbound(&self, bytes: usize) {
        self.outbound_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.outbound_events.fetch_add(1, Ordering::Relaxed);
    }

    fn load(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            inbound_bytes: self.inbound_bytes.load(Ordering::Relaxed),
            outbound_bytes: self.outbound_bytes.load(Ordering::Relaxed),
            inbound_events: self.inbound_events.load(Ordering::Relaxed),
            outbound_events: self.outbound_events.load(Ordering::Relaxed),
        }
    }

    fn take(&self) -> TrafficSnapshot {
        TrafficSnapshot {
            inbound_bytes: self.inbound_bytes.swap(0, Ordering::Relaxed),
            outbound_bytes: self.outbound_bytes.swap(0, Ordering::Relaxed),
            inbound_events: self.inbound_events.swap(0, Ordering::Relaxed),
            outbound_events: self.outbound_events.swap(0, Ordering::Relaxed),
        }
    }
}

impl TrafficStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_inbound(&self, bytes: usize) {
        self.total.add_inbound(bytes);
        self.interval.add_inbound(bytes);
    }

    pub fn add_outbound(&self, bytes: usize) {
        self.total.add_outbound(bytes);
        self.interval.add_outbound(bytes);
    }

    pub fn snapshot(&self) -> TrafficSnapshot {
        self.total.load()
    }

    /// Counts since the previous call.
    pub fn take_interval(&self) -> TrafficSnapshot {
        self.interval.take()
    }
}

/// Logs interval totals until `stop` flips to true.
pub fn spawn_reporter(
    session: String,
    stats: Arc<TrafficStats>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = stop.wait_for(|stopped| *stopped) => break,
            }
            let window = stats.take_interval();
            if window == TrafficSnapshot::default() {
                continue;
            }
            info!(
                session = %session,
                inbound_bytes = window.inbound_bytes,
                outbound_bytes = window.outbound_bytes,
                inbound_events = window.inbound_events,
                outbound_events = window.outbound_events,
                "traffic"
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_resets_but_total_accumulates() {
        let stats = TrafficStats::new();
        stats.add_inbound(10);
        stats.add_outbound(3);
        stats.add_outbound(4);

        let window = stats.take_interval();
        assert_eq!(window.inbound_bytes, 10);
        assert_eq!(window.outbound_bytes, 7);
        assert_eq!(window.outbound_events, 2);
        assert_eq!(stats.take_interval(), TrafficSnapshot::default());

        stats.add_inbound(1);
        let total = stats.snapshot();
        assert_eq!(total.inbound_bytes, 11);
        assert_eq!(total.inbound_events, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_stops_on_signal() {
        let stats = Arc::new(TrafficStats::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = spawn_reporter(
            "flake-test".into(),
            stats.clone(),
            Duration::from_secs(5),
            stop_rx,
        );
        stats.add_inbound(42);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(stats.take_interval(), TrafficSnapshot::default());

        stop_tx.send_replace(true);
        handle.await.unwrap();
    }
}
