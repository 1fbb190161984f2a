use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Inner;
use crate::broker::Broker;
use crate::descriptor::SessionDescription;
use crate::error::{SessionError, SessionResult};
use crate::slot::SlotError;

impl Inner {
    /// Waits for the local offer, trades it for an answer and applies it.
    pub(super) async fn exchange_sdp(self: &Arc<Self>) -> SessionResult<()> {
        let offer = tokio::select! {
            offer = self.offer_ready.take() => offer.ok_or(SessionError::Closed)?,
            err = self.fatal_error.take() => {
                let Some(err) = err else {
                    return Err(SessionError::Closed);
                };
                warn!(session = %self.id, error = %err, "failed to prepare offer");
                self.close().await;
                return Err(SessionError::Offer(err));
            }
        };

        if self.broker.is_none() {
            info!(
                session = %self.id,
                "no broker configured; copy the offer below to the remote peer\n----------------\n\n{}\n\n----------------",
                offer.serialize()
            );
        }

        let answer = self.await_answer(&offer).await?;
        debug!(session = %self.id, sdp = %answer.sdp, "received answer");

        let connection = self.current_connection().await?;
        if let Err(err) = connection.set_remote_description(answer).await {
            warn!(session = %self.id, error = %err, "unable to apply remote description");
            self.close().await;
            return Err(SessionError::Engine(err));
        }
        info!(session = %self.id, "negotiation complete");
        Ok(())
    }

    /// Submits the same offer until a usable answer arrives. There is no retry
    /// limit; only closing the session ends the loop early.
    async fn await_answer(
        self: &Arc<Self>,
        offer: &SessionDescription,
    ) -> SessionResult<SessionDescription> {
        let mut stop = self.stop.subscribe();
        loop {
            if self.is_closed() {
                return Err(SessionError::Closed);
            }
            if let Some(broker) = &self.broker {
                tokio::spawn(submit_offer(self.clone(), broker.clone(), offer.clone()));
            }
            match self.answer_ready.take().await {
                None => return Err(SessionError::Closed),
                Some(Some(answer)) => return Ok(answer),
                Some(None) => {
                    let backoff = self.config.retry_backoff;
                    warn!(
                        session = %self.id,
                        retry_in_secs = backoff.as_secs_f64(),
                        "failed to retrieve answer, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = stop.wait_for(|stopped| *stopped) => return Err(SessionError::Closed),
                    }
                }
            }
        }
    }
}

/// One broker round-trip. The outcome lands in the answer slot; a failure is
/// recorded as `None` so the negotiation loop backs off and retries.
async fn submit_offer(inner: Arc<Inner>, broker: Arc<dyn Broker>, offer: SessionDescription) {
    let answer = match broker.negotiate(&offer).await {
        Ok(Some(answer)) => Some(answer),
        Ok(None) => {
            warn!(session = %inner.id, "broker returned no answer");
            None
        }
        Err(err) => {
            warn!(session = %inner.id, error = %err, "broker negotiation failed");
            None
        }
    };
    match inner.answer_ready.fill(answer) {
        Ok(()) => {}
        Err(SlotError::Occupied) => {
            warn!(session = %inner.id, "duplicate answer for this attempt; discarding")
        }
        Err(SlotError::Closed) => {
            debug!(session = %inner.id, "session closed before the broker replied")
        }
    }
}
