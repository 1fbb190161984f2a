use thiserror::Error;

/// Failures reported by a transport engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("peer connection setup failed: {0}")]
    Connection(String),
    #[error("data channel setup failed: {0}")]
    Channel(String),
    #[error("offer creation failed: {0}")]
    Offer(String),
    #[error("set local description failed: {0}")]
    LocalDescription(String),
    #[error("set remote description failed: {0}")]
    RemoteDescription(String),
    #[error("data channel send failed: {0}")]
    Send(String),
    #[error("engine close failed: {0}")]
    Close(String),
}

/// Failures reported by a signaling broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker request failed: {0}")]
    Request(String),
    #[error("no remote peers currently available")]
    Unavailable,
    #[error("broker rejected the offer")]
    Rejected,
    #[error("unexpected broker status {0}")]
    UnexpectedStatus(u16),
    #[error("broker answer could not be decoded: {0}")]
    Decode(#[from] DescriptorError),
}

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("empty session description")]
    Empty,
    #[error("malformed session description: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected {expected} description, got {actual}")]
    UnexpectedKind {
        expected: &'static str,
        actual: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("ice server entry has a missing or blank url")]
    EmptyIceServer,
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,
    #[error("could not establish data channel: {0}")]
    Channel(#[source] EngineError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("failed to prepare offer: {0}")]
    Offer(#[source] EngineError),
    #[error("an answer is already pending for this attempt")]
    DuplicateAnswer,
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
}

pub type SessionResult<T> = Result<T, SessionError>;
