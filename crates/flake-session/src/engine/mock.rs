//! Scripted in-memory engine.
//!
//! Records what the session asks of the engine and lets a driver fire the
//! events a real peer connection would produce.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;

use super::{
    ChannelEvents, ConnectionEvents, DataChannel, Engine, EngineConnection, EngineResult,
};
use crate::config::SessionConfig;
use crate::descriptor::SessionDescription;
use crate::error::EngineError;

#[derive(Debug, Clone, Default)]
struct Script {
    /// Fire gathering-complete with this offer as soon as it is set locally.
    auto_gather: bool,
    offer_sdp: String,
    fail_connection: bool,
    fail_channel: bool,
    fail_offer: bool,
    fail_remote_description: bool,
}

#[derive(Clone, Default)]
pub struct MockEngine {
    script: Arc<Mutex<Script>>,
    connections: Arc<Mutex<Vec<Arc<MockConnection>>>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completes gathering with `sdp` as soon as the session applies its offer.
    pub fn with_offer(self, sdp: impl Into<String>) -> Self {
        {
            let mut script = self.script.lock();
            script.auto_gather = true;
            script.offer_sdp = sdp.into();
        }
        self
    }

    pub fn failing_connection(self) -> Self {
        self.script.lock().fail_connection = true;
        self
    }

    pub fn failing_channel(self) -> Self {
        self.script.lock().fail_channel = true;
        self
    }

    pub fn failing_offer(self) -> Self {
        self.script.lock().fail_offer = true;
        self
    }

    pub fn failing_remote_description(self) -> Self {
        self.script.lock().fail_remote_description = true;
        self
    }

    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections.lock().clone()
    }

    pub fn last_connection(&self) -> Option<Arc<MockConnection>> {
        self.connections.lock().last().cloned()
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn create_connection(
        &self,
        _config: &SessionConfig,
        events: Arc<dyn ConnectionEvents>,
    ) -> EngineResult<Arc<dyn EngineConnection>> {
        let script = self.script.lock().clone();
        if script.fail_connection {
            return Err(EngineError::Connection("scripted failure".into()));
        }
        let connection = Arc::new(MockConnection {
            script,
            events,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            channels: Mutex::new(Vec::new()),
            candidates: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        });
        self.connections.lock().push(connection.clone());
        Ok(connection)
    }
}

pub struct MockConnection {
    script: Script,
    events: Arc<dyn ConnectionEvents>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    channels: Mutex<Vec<Arc<MockChannel>>>,
    candidates: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl MockConnection {
    pub fn channel(&self) -> Option<Arc<MockChannel>> {
        self.channels.lock().last().cloned()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn candidates(&self) -> Vec<String> {
        self.candidates.lock().clone()
    }

    pub async fn fire_negotiation_needed(&self) {
        self.events.on_negotiation_needed().await;
    }

    pub async fn fire_candidate(&self, candidate: impl Into<String>) {
        let candidate = candidate.into();
        self.candidates.lock().push(candidate.clone());
        self.events.on_ice_candidate(candidate).await;
    }

    pub async fn fire_gathering_complete(&self, local: SessionDescription) {
        self.events.on_gathering_complete(local).await;
    }

    pub async fn fire_remote_channel(&self, label: impl Into<String>) {
        self.events.on_remote_channel(label.into()).await;
    }
}

#[async_trait]
impl EngineConnection for MockConnection {
    async fn create_offer(&self) -> EngineResult<SessionDescription> {
        if self.script.fail_offer {
            return Err(EngineError::Offer("scripted failure".into()));
        }
        Ok(SessionDescription::offer(self.script.offer_sdp.clone()))
    }

    async fn set_local_description(&self, description: SessionDescription) -> EngineResult<()> {
        *self.local.lock() = Some(description.clone());
        if self.script.auto_gather {
            let events = self.events.clone();
            tokio::spawn(async move {
                events.on_gathering_complete(description).await;
            });
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    async fn set_remote_description(&self, description: SessionDescription) -> EngineResult<()> {
        if self.script.fail_remote_description {
            return Err(EngineError::RemoteDescription("scripted failure".into()));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn create_channel(
        &self,
        label: &str,
        events: Arc<dyn ChannelEvents>,
    ) -> EngineResult<Arc<dyn DataChannel>> {
        if self.script.fail_channel {
            return Err(EngineError::Channel("scripted failure".into()));
        }
        let channel = Arc::new(MockChannel {
            label: label.to_string(),
            events,
            sent: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            down: AtomicBool::new(false),
        });
        let first = {
            let mut channels = self.channels.lock();
            channels.push(channel.clone());
            channels.len() == 1
        };
        if first {
            let events = self.events.clone();
            tokio::spawn(async move {
                events.on_negotiation_needed().await;
            });
        }
        Ok(channel)
    }

    async fn close(&self) -> EngineResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let channels = self.channels.lock().clone();
        for channel in channels {
            channel.shut();
        }
        Ok(())
    }
}

pub struct MockChannel {
    label: String,
    events: Arc<dyn ChannelEvents>,
    sent: Mutex<Vec<Bytes>>,
    /// Explicit `close` calls made by the session.
    closes: AtomicUsize,
    down: AtomicBool,
}

impl MockChannel {
    /// Every payload handed to `send`, one entry per call.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.lock().iter().flat_map(|b| b.iter().copied()).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub async fn open(&self) {
        self.events.on_open().await;
    }

    pub async fn receive(&self, data: impl Into<Bytes>) {
        self.events.on_message(data.into()).await;
    }

    /// The remote side hung up.
    pub async fn remote_close(&self) {
        self.down.store(true, Ordering::SeqCst);
        self.events.on_close().await;
    }

    pub async fn fail(&self, error: impl Into<String>) {
        self.events.on_error(error.into()).await;
    }

    /// Fires `on_close` the first time the channel goes down, however that happens.
    fn shut(&self) {
        if !self.down.swap(true, Ordering::SeqCst) {
            let events = self.events.clone();
            tokio::spawn(async move {
                events.on_close().await;
            });
        }
    }
}

#[async_trait]
impl DataChannel for MockChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send(&self, data: Bytes) -> EngineResult<()> {
        self.sent.lock().push(data);
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.shut();
        Ok(())
    }
}
