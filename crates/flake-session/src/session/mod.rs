//! One logical peer session: a single engine connection carrying a single
//! data channel, negotiated through the broker (or by hand), bridged onto a
//! byte stream, and torn down through exactly one close path.
//!
//! All mutation of the channel, the outbound buffer and the closed flag goes
//! through the `state` lock. The close path clears the channel reference
//! before asking the engine to close it, so the channel's close hook can tell
//! a local close from a remote one.

mod hooks;
mod negotiate;
mod watchdog;

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::{distributions::Alphanumeric, Rng};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::bridge::StreamBridge;
use crate::broker::Broker;
use crate::config::SessionConfig;
use crate::descriptor::SessionDescription;
use crate::engine::{DataChannel, Engine, EngineConnection};
use crate::error::{EngineError, SessionError, SessionResult};
use crate::outbound::OutboundBuffer;
use crate::slot::{ResetSignal, Slot, SlotError};
use crate::traffic::{self, TrafficSnapshot, TrafficStats};

use hooks::{ChannelHooks, ConnectionHooks};

const ID_SUFFIX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Handle to a peer session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    id: String,
    config: SessionConfig,
    engine: Arc<dyn Engine>,
    broker: Option<Arc<dyn Broker>>,
    state: AsyncMutex<State>,
    /// Lock-free mirror of `State::closed` for hooks and the watchdog.
    closed: AtomicBool,
    attempt: AtomicU64,
    phase: Mutex<SessionState>,
    bridge: StreamBridge,
    offer_ready: Slot<SessionDescription>,
    /// `None` marks a failed broker round-trip.
    answer_ready: Slot<Option<SessionDescription>>,
    fatal_error: Slot<EngineError>,
    local_offer: watch::Sender<Option<SessionDescription>>,
    reset: ResetSignal,
    last_receive: Mutex<Instant>,
    traffic: Arc<TrafficStats>,
    stop: watch::Sender<bool>,
    tasks: Mutex<Tasks>,
}

#[derive(Default)]
struct State {
    connection: Option<Arc<dyn EngineConnection>>,
    /// Open channel; the only write destination.
    channel: Option<Arc<dyn DataChannel>>,
    /// Created but not yet open.
    pending_channel: Option<Arc<dyn DataChannel>>,
    buffer: OutboundBuffer,
    closed: bool,
    attempt: u64,
}

#[derive(Default)]
struct Tasks {
    watchdog: Option<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
}

impl Session {
    /// Creates an idle session. Without a broker the offer has to be carried
    /// to the remote peer by hand and the answer handed back via
    /// [`Session::inject_answer`].
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn Engine>,
        broker: Option<Arc<dyn Broker>>,
    ) -> Self {
        let id = generate_id(&config.channel_prefix);
        let (local_offer, _) = watch::channel(None);
        let (stop, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                id,
                config,
                engine,
                broker,
                state: AsyncMutex::new(State::default()),
                closed: AtomicBool::new(false),
                attempt: AtomicU64::new(0),
                phase: Mutex::new(SessionState::Idle),
                bridge: StreamBridge::new(),
                offer_ready: Slot::new(),
                answer_ready: Slot::new(),
                fatal_error: Slot::new(),
                local_offer,
                reset: ResetSignal::new(),
                last_receive: Mutex::new(Instant::now()),
                traffic: Arc::new(TrafficStats::new()),
                stop,
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        *self.inner.phase.lock()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn traffic(&self) -> TrafficSnapshot {
        self.inner.traffic.snapshot()
    }

    /// Prepares a fresh engine connection and data channel, negotiates it and
    /// starts the staleness watchdog.
    ///
    /// Blocks until an answer has been applied. With a broker, failed round-trips
    /// are retried forever with a fixed backoff; [`Session::close`] is the way to
    /// give up, and makes this return [`SessionError::Closed`].
    pub async fn connect(&self) -> SessionResult<()> {
        let inner = &self.inner;
        if inner.is_closed() {
            return Err(SessionError::Closed);
        }
        inner.set_phase(SessionState::Connecting);
        info!(session = %inner.id, "connecting");

        let attempt = inner.attempt.fetch_add(1, Ordering::AcqRel) + 1;
        let result = async {
            inner.prepare(attempt).await?;
            inner.establish_channel(attempt).await?;
            inner.exchange_sdp().await
        }
        .await;

        if let Err(err) = result {
            let phase = if inner.is_closed() {
                SessionState::Closed
            } else {
                SessionState::Idle
            };
            inner.set_phase(phase);
            return Err(err);
        }

        inner.spawn_background();
        inner.set_phase(SessionState::Open);
        Ok(())
    }

    /// Reads inbound bytes. `Ok(0)` means the stream has ended.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.bridge.read(buf).await
    }

    /// Sends bytes to the remote peer, or buffers them until the data channel
    /// opens. Buffered bytes always go out ahead of later writes.
    pub async fn write(&self, data: &[u8]) -> SessionResult<usize> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        inner.traffic.add_outbound(data.len());
        match state.channel.clone() {
            Some(channel) => channel
                .send(Bytes::copy_from_slice(data))
                .await
                .map_err(SessionError::Engine)?,
            None => {
                state.buffer.push(data);
                debug!(session = %inner.id, bytes = data.len(), "buffered outbound bytes");
            }
        }
        Ok(data.len())
    }

    /// Tears the session down and fires the reset signal. Later calls do nothing.
    pub async fn close(&self) {
        self.inner.close().await;
    }

    /// Tells the supervisor this session should be replaced. Never blocks.
    pub fn reset(&self) {
        self.inner.reset.fire();
    }

    pub async fn wait_for_reset(&self) {
        self.inner.reset.wait().await;
    }

    /// Hands the remote answer to a negotiation running without a broker.
    pub fn inject_answer(&self, answer: SessionDescription) -> SessionResult<()> {
        self.inner
            .answer_ready
            .fill(Some(answer))
            .map_err(|err| match err {
                SlotError::Occupied => SessionError::DuplicateAnswer,
                SlotError::Closed => SessionError::Closed,
            })
    }

    /// Waits for the complete local offer of the current attempt, or `None`
    /// once the session is closed.
    pub async fn local_offer(&self) -> Option<SessionDescription> {
        let mut offers = self.inner.local_offer.subscribe();
        let mut stop = self.inner.stop.subscribe();
        tokio::select! {
            offer = offers.wait_for(Option::is_some) => offer.ok().and_then(|offer| offer.clone()),
            _ = stop.wait_for(|stopped| *stopped) => None,
        }
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn is_current(&self, attempt: u64) -> bool {
        self.attempt.load(Ordering::Acquire) == attempt
    }

    fn set_phase(&self, phase: SessionState) {
        let mut current = self.phase.lock();
        if *current != SessionState::Closed {
            *current = phase;
        }
    }

    fn touch(&self) {
        *self.last_receive.lock() = Instant::now();
    }

    async fn current_connection(&self) -> SessionResult<Arc<dyn EngineConnection>> {
        let state = self.state.lock().await;
        if state.closed {
            return Err(SessionError::Closed);
        }
        state.connection.clone().ok_or(SessionError::Closed)
    }

    /// Replaces the engine connection, closing any previous one first.
    async fn prepare(self: &Arc<Self>, attempt: u64) -> SessionResult<()> {
        let (channels, previous) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(SessionError::Closed);
            }
            // Detached before the attempt switch so writes buffer for the new
            // channel instead of reaching the old one.
            let channels: Vec<_> = [state.channel.take(), state.pending_channel.take()]
                .into_iter()
                .flatten()
                .collect();
            state.attempt = attempt;
            (channels, state.connection.take())
        };
        for channel in channels {
            debug!(session = %self.id, "closing previous data channel");
            if let Err(err) = channel.close().await {
                warn!(session = %self.id, error = %err, "error closing previous data channel");
            }
        }
        if let Some(previous) = previous {
            debug!(session = %self.id, "closing previous peer connection");
            if let Err(err) = previous.close().await {
                warn!(session = %self.id, error = %err, "error closing previous peer connection");
            }
        }
        self.offer_ready.clear();
        self.answer_ready.clear();
        self.fatal_error.clear();
        self.local_offer.send_replace(None);

        let hooks = Arc::new(ConnectionHooks::new(Arc::downgrade(self), attempt));
        let connection = self
            .engine
            .create_connection(&self.config, hooks)
            .await
            .map_err(|err| {
                warn!(session = %self.id, error = %err, "peer connection setup failed");
                SessionError::Engine(err)
            })?;

        let mut state = self.state.lock().await;
        if state.closed {
            drop(state);
            let _ = connection.close().await;
            return Err(SessionError::Closed);
        }
        state.connection = Some(connection);
        info!(session = %self.id, "peer connection created");
        Ok(())
    }

    /// Creates the session's data channel, labelled with the session id.
    async fn establish_channel(self: &Arc<Self>, attempt: u64) -> SessionResult<()> {
        let connection = {
            let state = self.state.lock().await;
            if state.channel.is_some() {
                drop(state);
                invariant_violation(&self.id, "data channel already exists");
            }
            if state.closed {
                return Err(SessionError::Closed);
            }
            state.connection.clone().ok_or(SessionError::Closed)?
        };

        let hooks = Arc::new(ChannelHooks::new(Arc::downgrade(self), attempt));
        let channel = connection
            .create_channel(&self.id, hooks)
            .await
            .map_err(|err| {
                warn!(session = %self.id, error = %err, "data channel setup failed");
                SessionError::Channel(err)
            })?;

        let mut state = self.state.lock().await;
        if state.closed || state.attempt != attempt {
            drop(state);
            let _ = channel.close().await;
            return Err(SessionError::Closed);
        }
        state.pending_channel = Some(channel);
        info!(session = %self.id, "data channel created");
        Ok(())
    }

    fn spawn_background(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();
        if let Some(previous) = tasks.watchdog.take() {
            previous.abort();
        }
        tasks.watchdog = Some(tokio::spawn(watchdog::run(self.clone())));

        if tasks.reporter.is_none() {
            if let Some(every) = self.config.traffic_report_interval {
                tasks.reporter = Some(traffic::spawn_reporter(
                    self.id.clone(),
                    self.traffic.clone(),
                    every,
                    self.stop.subscribe(),
                ));
            }
        }
    }

    async fn close(&self) {
        let (channels, connection) = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            self.closed.store(true, Ordering::Release);

            self.offer_ready.close();
            self.answer_ready.close();
            self.fatal_error.close();
            self.bridge.close_writer();
            self.stop.send_replace(true);

            // Cleared before the engine hears about it: `on_close` reads an
            // empty slot as a local close.
            let channels: Vec<_> = [state.channel.take(), state.pending_channel.take()]
                .into_iter()
                .flatten()
                .collect();
            (channels, state.connection.take())
        };

        for channel in channels {
            info!(session = %self.id, "closing data channel");
            if let Err(err) = channel.close().await {
                warn!(session = %self.id, error = %err, "error closing data channel");
            }
        }
        if let Some(connection) = connection {
            info!(session = %self.id, "closing peer connection");
            if let Err(err) = connection.close().await {
                warn!(session = %self.id, error = %err, "error closing peer connection");
            }
        }

        *self.phase.lock() = SessionState::Closed;
        self.reset.fire();
        info!(session = %self.id, "closed");
    }
}

fn generate_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{prefix}-{suffix}")
}

/// The engine broke its contract with the session. Not recoverable.
fn invariant_violation(session: &str, what: &str) -> ! {
    error!(session = %session, "{what}");
    panic!("{session}: {what}");
}
