//! Seam between the session and the transport engine that negotiates and
//! carries the peer connection.
//!
//! The session registers a [`ConnectionEvents`] sink when it creates a
//! connection and a [`ChannelEvents`] sink when it creates the data channel.
//! Engines call those hooks from their own tasks; hooks only update session state
//! or spawn the slow work, so they never stall the engine.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::SessionConfig;
use crate::descriptor::SessionDescription;
use crate::error::EngineError;

pub mod mock;
pub mod rtc;

pub type EngineResult<T> = Result<T, EngineError>;

#[async_trait]
pub trait Engine: Send + Sync {
    async fn create_connection(
        &self,
        config: &SessionConfig,
        events: Arc<dyn ConnectionEvents>,
    ) -> EngineResult<Arc<dyn EngineConnection>>;
}

#[async_trait]
pub trait EngineConnection: Send + Sync {
    async fn create_offer(&self) -> EngineResult<SessionDescription>;

    async fn set_local_description(&self, description: SessionDescription) -> EngineResult<()>;

    async fn local_description(&self) -> Option<SessionDescription>;

    async fn set_remote_description(&self, description: SessionDescription) -> EngineResult<()>;

    /// Creates a data channel. The first channel on a connection makes the
    /// engine fire `on_negotiation_needed`.
    async fn create_channel(
        &self,
        label: &str,
        events: Arc<dyn ChannelEvents>,
    ) -> EngineResult<Arc<dyn DataChannel>>;

    async fn close(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send(&self, data: Bytes) -> EngineResult<()>;

    /// Requests closure; `on_close` follows asynchronously.
    async fn close(&self) -> EngineResult<()>;
}

#[async_trait]
pub trait ConnectionEvents: Send + Sync {
    async fn on_negotiation_needed(&self);

    async fn on_ice_candidate(&self, candidate: String);

    /// Candidate gathering finished; `local` is the complete local description.
    async fn on_gathering_complete(&self, local: SessionDescription);

    /// The remote peer opened a channel towards us.
    async fn on_remote_channel(&self, label: String);
}

#[async_trait]
pub trait ChannelEvents: Send + Sync {
    async fn on_open(&self);

    async fn on_close(&self);

    async fn on_message(&self, data: Bytes);

    async fn on_error(&self, error: String);
}
