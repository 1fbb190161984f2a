use std::io;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::{invariant_violation, Inner};
use crate::descriptor::SessionDescription;
use crate::engine::{ChannelEvents, ConnectionEvents};
use crate::slot::SlotError;

/// Peer connection events for one connect attempt.
pub(super) struct ConnectionHooks {
    session: Weak<Inner>,
    attempt: u64,
}

impl ConnectionHooks {
    pub(super) fn new(session: Weak<Inner>, attempt: u64) -> Self {
        Self { session, attempt }
    }

    fn live(&self) -> Option<Arc<Inner>> {
        let inner = self.session.upgrade()?;
        if inner.is_current(self.attempt) && !inner.is_closed() {
            Some(inner)
        } else {
            debug!(attempt = self.attempt, "ignoring event from a replaced connection");
            None
        }
    }
}

#[async_trait]
impl ConnectionEvents for ConnectionHooks {
    async fn on_negotiation_needed(&self) {
        let Some(inner) = self.live() else {
            return;
        };
        info!(session = %inner.id, "negotiation needed");
        // Offer creation waits on the engine; keep it off the callback.
        tokio::spawn(async move {
            let connection = match inner.current_connection().await {
                Ok(connection) => connection,
                Err(_) => return,
            };
            let prepared = match connection.create_offer().await {
                Ok(offer) => connection.set_local_description(offer).await,
                Err(err) => Err(err),
            };
            if let Err(err) = prepared {
                warn!(session = %inner.id, error = %err, "failed to prepare offer");
                let _ = inner.fatal_error.fill(err);
            }
        });
    }

    async fn on_ice_candidate(&self, candidate: String) {
        // Candidates accumulate in the local description until gathering ends.
        if let Some(inner) = self.live() {
            trace!(session = %inner.id, candidate = %candidate, "ice candidate");
        }
    }

    async fn on_gathering_complete(&self, local: SessionDescription) {
        let Some(inner) = self.live() else {
            return;
        };
        info!(session = %inner.id, "ice gathering complete");
        inner.local_offer.send_replace(Some(local.clone()));
        if let Err(SlotError::Occupied) = inner.offer_ready.fill(local) {
            warn!(session = %inner.id, "gathering completed twice; keeping the first offer");
        }
    }

    async fn on_remote_channel(&self, label: String) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        // This side always creates the channel.
        invariant_violation(
            &inner.id,
            &format!("unexpected data channel {label} offered by remote"),
        );
    }
}

/// Data channel events for one connect attempt.
pub(super) struct ChannelHooks {
    session: Weak<Inner>,
    attempt: u64,
}

impl ChannelHooks {
    pub(super) fn new(session: Weak<Inner>, attempt: u64) -> Self {
        Self { session, attempt }
    }
}

#[async_trait]
impl ChannelEvents for ChannelHooks {
    async fn on_open(&self) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        info!(session = %inner.id, "data channel open");
        let mut state = inner.state.lock().await;
        if state.closed || state.attempt != self.attempt {
            return;
        }
        if state.channel.is_some() {
            drop(state);
            invariant_violation(&inner.id, "data channel opened while one is already active");
        }
        let Some(channel) = state.pending_channel.take() else {
            warn!(session = %inner.id, "open event without a pending data channel");
            return;
        };
        if let Some(buffered) = state.buffer.drain() {
            let bytes = buffered.len();
            match channel.send(buffered).await {
                Ok(()) => info!(session = %inner.id, bytes, "flushed buffered bytes"),
                Err(err) => {
                    warn!(session = %inner.id, bytes, error = %err, "failed to flush buffered bytes")
                }
            }
        }
        state.channel = Some(channel);
    }

    async fn on_close(&self) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        let mut state = inner.state.lock().await;
        if state.attempt != self.attempt {
            return;
        }
        if state.channel.take().is_none() {
            debug!(session = %inner.id, "data channel closed locally");
            return;
        }
        drop(state);
        info!(session = %inner.id, "data channel closed remotely");
        // Closing waits on the engine, which is busy delivering this event.
        tokio::spawn(async move {
            inner.close().await;
        });
    }

    async fn on_message(&self, data: Bytes) {
        let Some(inner) = self.session.upgrade() else {
            return;
        };
        if !inner.is_current(self.attempt) {
            return;
        }
        if data.is_empty() {
            debug!(session = %inner.id, "zero length message");
        }
        inner.traffic.add_inbound(data.len());
        if let Err(err) = inner.bridge.deliver(data).await {
            warn!(session = %inner.id, error = %err, "error writing to stream bridge");
            inner
                .bridge
                .close_with_error(io::ErrorKind::BrokenPipe, err);
        }
        inner.touch();
    }

    async fn on_error(&self, error: String) {
        if let Some(inner) = self.session.upgrade() {
            warn!(session = %inner.id, error = %error, "data channel error");
        }
    }
}
