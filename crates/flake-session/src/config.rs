use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default STUN server used for NAT traversal.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";
/// Seconds of inbound silence before a session is considered dead.
pub const DEFAULT_STALENESS_TIMEOUT: Duration = Duration::from_secs(30);
/// Seconds to wait between failed broker round-trips.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_WATCHDOG_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_CHANNEL_PREFIX: &str = "flake";

const ENV_ICE_SERVERS: &str = "FLAKE_ICE_SERVERS";
const ENV_LOCALHOST_ONLY: &str = "FLAKE_LOCALHOST_ONLY";
const ENV_STALENESS_TIMEOUT: &str = "FLAKE_STALENESS_TIMEOUT_SECS";
const ENV_RETRY_BACKOFF: &str = "FLAKE_RETRY_BACKOFF_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub credential: String,
}

impl IceServer {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            ..Default::default()
        }
    }
}

/// Options handed to the transport engine plus the session timing constants.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// ICE servers for connection establishment
    pub ice_servers: Vec<IceServer>,
    /// Prefix of the generated session identifier (and data channel label)
    pub channel_prefix: String,
    pub staleness_timeout: Duration,
    pub retry_backoff: Duration,
    pub watchdog_interval: Duration,
    /// Emit periodic traffic totals when set
    pub traffic_report_interval: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServer::new(DEFAULT_STUN_SERVER)],
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
            staleness_timeout: DEFAULT_STALENESS_TIMEOUT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            watchdog_interval: DEFAULT_WATCHDOG_INTERVAL,
            traffic_report_interval: None,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `FLAKE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(list) = lookup(ENV_ICE_SERVERS).filter(|v| !v.trim().is_empty()) {
            config.ice_servers = parse_ice_list(&list);
        }
        if lookup(ENV_LOCALHOST_ONLY).is_some() {
            config.ice_servers.clear();
        }
        if let Some(raw) = lookup(ENV_STALENESS_TIMEOUT) {
            config.staleness_timeout = parse_secs(ENV_STALENESS_TIMEOUT, &raw)?;
        }
        if let Some(raw) = lookup(ENV_RETRY_BACKOFF) {
            config.retry_backoff = parse_secs(ENV_RETRY_BACKOFF, &raw)?;
        }
        Ok(config)
    }

    /// Configuration with no STUN/TURN servers, for loopback peers.
    pub fn localhost() -> Self {
        Self {
            ice_servers: vec![],
            ..Default::default()
        }
    }

    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }
}

/// Splits a comma separated url list into one ICE server per url.
pub fn parse_ice_list(list: &str) -> Vec<IceServer> {
    list.split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(IceServer::new)
        .collect()
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw.to_string(),
    })?;
    if secs == 0 {
        return Err(ConfigError::ZeroDuration(key));
    }
    Ok(Duration::from_secs(secs))
}

#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    ice_servers: Vec<IceServer>,
    channel_prefix: Option<String>,
    staleness_timeout: Option<Duration>,
    retry_backoff: Option<Duration>,
    watchdog_interval: Option<Duration>,
    traffic_report_interval: Option<Duration>,
}

impl SessionConfigBuilder {
    pub fn add_ice_server(mut self, urls: Vec<String>) -> Self {
        self.ice_servers.push(IceServer {
            urls,
            ..Default::default()
        });
        self
    }

    pub fn add_ice_server_with_credentials(
        mut self,
        urls: Vec<String>,
        username: String,
        credential: String,
    ) -> Self {
        self.ice_servers.push(IceServer {
            urls,
            username,
            credential,
        });
        self
    }

    pub fn channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = Some(prefix.into());
        self
    }

    pub fn staleness_timeout(mut self, timeout: Duration) -> Self {
        self.staleness_timeout = Some(timeout);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = Some(backoff);
        self
    }

    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = Some(interval);
        self
    }

    pub fn traffic_report_interval(mut self, interval: Duration) -> Self {
        self.traffic_report_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<SessionConfig, ConfigError> {
        let mut config = SessionConfig::default();

        if !self.ice_servers.is_empty() {
            let unusable = |server: &IceServer| {
                server.urls.is_empty() || server.urls.iter().any(|url| url.trim().is_empty())
            };
            if self.ice_servers.iter().any(unusable) {
                return Err(ConfigError::EmptyIceServer);
            }
            config.ice_servers = self.ice_servers;
        }
        if let Some(prefix) = self.channel_prefix {
            config.channel_prefix = prefix;
        }
        if let Some(timeout) = self.staleness_timeout {
            config.staleness_timeout = non_zero("staleness_timeout", timeout)?;
        }
        if let Some(backoff) = self.retry_backoff {
            config.retry_backoff = non_zero("retry_backoff", backoff)?;
        }
        if let Some(interval) = self.watchdog_interval {
            config.watchdog_interval = non_zero("watchdog_interval", interval)?;
        }
        if let Some(interval) = self.traffic_report_interval {
            config.traffic_report_interval =
                Some(non_zero("traffic_report_interval", interval)?);
        }

        Ok(config)
    }
}

fn non_zero(name: &'static str, value: Duration) -> Result<Duration, ConfigError> {
    if value.is_zero() {
        Err(ConfigError::ZeroDuration(name))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_uses_public_stun() {
        let config = SessionConfig::default();
        assert_eq!(config.ice_servers, vec![IceServer::new(DEFAULT_STUN_SERVER)]);
        assert_eq!(config.staleness_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_backoff, Duration::from_secs(10));
        assert!(config.traffic_report_interval.is_none());
    }

    #[test]
    fn env_overrides_ice_and_timing() {
        let config = SessionConfig::from_lookup(lookup_from(&[
            (ENV_ICE_SERVERS, "stun:a.example:3478, stun:b.example:3478,"),
            (ENV_STALENESS_TIMEOUT, "5"),
            (ENV_RETRY_BACKOFF, "2"),
        ]))
        .expect("config");
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].urls, vec!["stun:b.example:3478"]);
        assert_eq!(config.staleness_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_backoff, Duration::from_secs(2));
    }

    #[test]
    fn localhost_only_clears_servers() {
        let config =
            SessionConfig::from_lookup(lookup_from(&[(ENV_LOCALHOST_ONLY, "1")])).expect("config");
        assert!(config.ice_servers.is_empty());
    }

    #[test]
    fn env_rejects_bad_numbers() {
        let err = SessionConfig::from_lookup(lookup_from(&[(ENV_RETRY_BACKOFF, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        let err = SessionConfig::from_lookup(lookup_from(&[(ENV_STALENESS_TIMEOUT, "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroDuration(_)));
    }

    #[test]
    fn builder_validates() {
        assert!(matches!(
            SessionConfig::builder()
                .retry_backoff(Duration::ZERO)
                .build(),
            Err(ConfigError::ZeroDuration("retry_backoff"))
        ));
        assert!(matches!(
            SessionConfig::builder().add_ice_server(vec![]).build(),
            Err(ConfigError::EmptyIceServer)
        ));
        assert!(matches!(
            SessionConfig::builder()
                .add_ice_server(vec!["stun:ok.example:3478".into(), "  ".into()])
                .build(),
            Err(ConfigError::EmptyIceServer)
        ));

        let config = SessionConfig::builder()
            .add_ice_server(vec!["stun:x.example:1".into()])
            .channel_prefix("probe")
            .watchdog_interval(Duration::from_millis(250))
            .build()
            .expect("valid");
        assert_eq!(config.channel_prefix, "probe");
        assert_eq!(config.ice_servers[0].urls, vec!["stun:x.example:1"]);
        assert_eq!(config.watchdog_interval, Duration::from_millis(250));
    }
}
