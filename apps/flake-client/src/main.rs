mod cli;
mod proxy;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use flake_session::{Broker, HttpBroker, RtcEngine};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;
use crate::proxy::Proxy;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli.validate()?;
    let config = cli.session_config()?;

    let broker: Option<Arc<dyn Broker>> = match &cli.broker {
        Some(url) => {
            let mut broker = HttpBroker::new(url.clone()).context("invalid broker url")?;
            if let Some(front) = &cli.front {
                broker = broker.with_front(front.clone());
            }
            info!(endpoint = %broker.endpoint(), front = ?cli.front, "using signaling broker");
            Some(Arc::new(broker))
        }
        None => {
            info!("no broker configured; descriptors are exchanged over stdin/stdout");
            None
        }
    };

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(
        listen = %cli.listen,
        max_sessions = cli.max_sessions,
        ice_servers = config.ice_servers.len(),
        "accepting clients"
    );

    let proxy = Proxy::new(config, Arc::new(RtcEngine::new()), broker, cli.max_sessions);
    tokio::select! {
        res = proxy.serve(listener) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}
