//! Signaling broker seam: relays a local offer and returns the remote answer.

use async_trait::async_trait;

use crate::descriptor::SessionDescription;
use crate::error::BrokerError;

pub mod http;

pub use http::HttpBroker;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Submits `offer`. `Ok(None)` means the broker answered without a usable
    /// description; callers treat it like a failure and retry.
    async fn negotiate(
        &self,
        offer: &SessionDescription,
    ) -> Result<Option<SessionDescription>, BrokerError>;
}
