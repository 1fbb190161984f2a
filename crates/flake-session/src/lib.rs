//! Flake session: one peer-to-peer data session over a negotiated WebRTC
//! transport.
//!
//! Responsibilities:
//! - preparing the engine connection and its single data channel
//! - trading the local offer for an answer through a signaling broker, or by hand
//! - bridging the data channel onto a plain read/write byte stream
//! - closing stale sessions and reporting every teardown through one reset signal

pub mod bridge;
pub mod broker;
pub mod config;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod outbound;
pub mod session;
pub mod slot;
pub mod traffic;

pub use broker::{Broker, HttpBroker};
pub use config::{IceServer, SessionConfig, SessionConfigBuilder};
pub use descriptor::{SdpKind, SessionDescription};
pub use engine::{rtc::RtcEngine, Engine};
pub use error::{BrokerError, ConfigError, DescriptorError, EngineError, SessionError, SessionResult};
pub use session::{Session, SessionState};
pub use traffic::TrafficSnapshot;
