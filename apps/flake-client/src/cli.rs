use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use flake_session::config::parse_ice_list;
use flake_session::SessionConfig;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "flake-client")]
#[command(about = "Tunnels local TCP clients to a remote peer over WebRTC data channels")]
pub struct Cli {
    /// Local address accepting client connections
    #[arg(long, env = "FLAKE_LISTEN", default_value = "127.0.0.1:1080")]
    pub listen: SocketAddr,

    /// Signaling broker base url; without it descriptors are exchanged by hand
    #[arg(long, env = "FLAKE_BROKER")]
    pub broker: Option<Url>,

    /// Front domain to connect to instead of the broker host
    #[arg(long, env = "FLAKE_FRONT", requires = "broker")]
    pub front: Option<String>,

    /// ICE server urls, comma separated (overrides FLAKE_ICE_SERVERS)
    #[arg(long, value_delimiter = ',')]
    pub ice: Vec<String>,

    /// Concurrent sessions
    #[arg(long, env = "FLAKE_MAX_SESSIONS", default_value_t = 1)]
    pub max_sessions: usize,

    /// Tracing filter directives
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_filter: String,

    /// Seconds without inbound traffic before a session is dropped
    #[arg(long, env = "FLAKE_STALENESS_TIMEOUT_SECS")]
    pub staleness_timeout: Option<u64>,

    /// Seconds between broker attempts
    #[arg(long, env = "FLAKE_RETRY_BACKOFF_SECS")]
    pub retry_backoff: Option<u64>,

    /// Log per-session traffic totals every N seconds
    #[arg(long)]
    pub traffic_report: Option<u64>,
}

impl Cli {
    /// Environment defaults with command line overrides applied on top.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut config = SessionConfig::from_env().context("invalid FLAKE_* environment")?;

        if !self.ice.is_empty() {
            config.ice_servers = parse_ice_list(&self.ice.join(","));
        }
        if let Some(secs) = self.staleness_timeout {
            config.staleness_timeout = secs_arg("--staleness-timeout", secs)?;
        }
        if let Some(secs) = self.retry_backoff {
            config.retry_backoff = secs_arg("--retry-backoff", secs)?;
        }
        if let Some(secs) = self.traffic_report {
            config.traffic_report_interval = Some(secs_arg("--traffic-report", secs)?);
        }
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_sessions > 0, "--max-sessions must be at least 1");
        Ok(())
    }
}

fn secs_arg(flag: &str, secs: u64) -> Result<Duration> {
    ensure!(secs > 0, "{flag} must be greater than zero");
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["flake-client"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).expect("arguments parse")
    }

    #[test]
    fn overrides_apply_to_session_config() {
        let cli = parse(&[
            "--ice",
            "stun:a.example:3478,stun:b.example:3478",
            "--staleness-timeout",
            "45",
            "--retry-backoff",
            "3",
            "--traffic-report",
            "60",
        ]);
        let config = cli.session_config().unwrap();
        assert_eq!(config.ice_servers.len(), 2);
        assert_eq!(config.ice_servers[1].urls, vec!["stun:b.example:3478"]);
        assert_eq!(config.staleness_timeout, Duration::from_secs(45));
        assert_eq!(config.retry_backoff, Duration::from_secs(3));
        assert_eq!(config.traffic_report_interval, Some(Duration::from_secs(60)));
    }

    #[test]
    fn zero_durations_are_rejected() {
        let cli = parse(&["--retry-backoff", "0"]);
        assert!(cli.session_config().is_err());
    }

    #[test]
    fn front_requires_broker() {
        assert!(Cli::try_parse_from(["flake-client", "--front", "cdn.example"]).is_err());
        let cli = parse(&[
            "--broker",
            "https://broker.example/",
            "--front",
            "cdn.example",
        ]);
        assert_eq!(cli.front.as_deref(), Some("cdn.example"));
    }

    #[test]
    fn max_sessions_must_be_positive() {
        assert!(parse(&["--max-sessions", "0"]).validate().is_err());
        assert!(parse(&["--max-sessions", "4"]).validate().is_ok());
    }
}
