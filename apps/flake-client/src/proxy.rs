//! Accepts local clients and carries each one over its own peer session.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use flake_session::{Broker, Engine, Session, SessionConfig, SessionDescription};
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, Lines, Stdin,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

const COPY_BUFFER: usize = 16 * 1024;

#[derive(Clone)]
pub struct Proxy {
    config: SessionConfig,
    engine: Arc<dyn Engine>,
    broker: Option<Arc<dyn Broker>>,
    permits: Arc<Semaphore>,
    answers: Arc<Mutex<Lines<BufReader<Stdin>>>>,
}

impl Proxy {
    pub fn new(
        config: SessionConfig,
        engine: Arc<dyn Engine>,
        broker: Option<Arc<dyn Broker>>,
        max_sessions: usize,
    ) -> Self {
        Self {
            config,
            engine,
            broker,
            permits: Arc::new(Semaphore::new(max_sessions)),
            answers: Arc::new(Mutex::new(BufReader::new(tokio::io::stdin()).lines())),
        }
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        loop {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .context("session limiter closed")?;
            let (stream, peer) = listener.accept().await.context("accepting client")?;
            info!(%peer, "client connected");

            let proxy = self.clone();
            tokio::spawn(async move {
                if let Err(err) = proxy.handle(stream, peer).await {
                    warn!(%peer, error = %format!("{err:#}"), "client session failed");
                }
                drop(permit);
            });
        }
    }

    async fn handle(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        let session = Session::new(self.config.clone(), self.engine.clone(), self.broker.clone());
        info!(%peer, session = %session.id(), "starting session");

        if self.broker.is_none() {
            tokio::spawn(exchange_by_hand(session.clone(), self.answers.clone()));
        }

        if let Err(err) = session.connect().await {
            session.close().await;
            return Err(err).context("negotiating session");
        }

        let (reader, writer) = stream.into_split();
        let result = tokio::select! {
            res = upstream(&session, reader) => res.context("client to peer"),
            res = downstream(&session, writer) => res.context("peer to client"),
            _ = session.wait_for_reset() => {
                debug!(session = %session.id(), "session reset");
                Ok(())
            }
        };

        session.close().await;
        let traffic = session.traffic();
        info!(
            %peer,
            session = %session.id(),
            inbound_bytes = traffic.inbound_bytes,
            outbound_bytes = traffic.outbound_bytes,
            "client disconnected"
        );
        result
    }
}

async fn upstream<R>(session: &Session, mut reader: R) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        session.write(&buf[..n]).await?;
    }
}

async fn downstream<W>(session: &Session, mut writer: W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER];
    loop {
        let n = session.read(&mut buf).await?;
        if n == 0 {
            writer.shutdown().await.ok();
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
    }
}

/// Prints the session's offer and feeds the next stdin line back as its answer.
async fn exchange_by_hand(session: Session, answers: Arc<Mutex<Lines<BufReader<Stdin>>>>) {
    let Some(offer) = session.local_offer().await else {
        return;
    };
    // One prompt at a time; stdin lines are handed out in order.
    let mut answers = answers.lock().await;
    println!("{}", offer.serialize());
    info!(session = %session.id(), "paste the remote answer as a single JSON line");

    loop {
        let line = match answers.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                warn!(session = %session.id(), "stdin closed before an answer arrived");
                return;
            }
            Err(err) => {
                warn!(session = %session.id(), error = %err, "failed to read answer");
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match SessionDescription::parse_answer(&line) {
            Ok(answer) => {
                if let Err(err) = session.inject_answer(answer) {
                    warn!(session = %session.id(), error = %err, "answer not accepted");
                }
                return;
            }
            Err(err) => warn!(session = %session.id(), error = %err, "invalid answer, try again"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use flake_session::engine::mock::MockEngine;
    use flake_session::BrokerError;

    struct Answering;

    #[async_trait]
    impl Broker for Answering {
        async fn negotiate(
            &self,
            _offer: &SessionDescription,
        ) -> Result<Option<SessionDescription>, BrokerError> {
            Ok(Some(SessionDescription::answer("ANSWER")))
        }
    }

    #[tokio::test]
    async fn pumps_bytes_both_ways() {
        let engine = MockEngine::new().with_offer("OFFER");
        let session = Session::new(
            SessionConfig::default(),
            Arc::new(engine.clone()),
            Some(Arc::new(Answering)),
        );
        session.connect().await.unwrap();
        let channel = engine.last_connection().unwrap().channel().unwrap();
        channel.open().await;

        let (client, proxy_side) = tokio::io::duplex(64);
        let (proxy_read, proxy_write) = tokio::io::split(proxy_side);
        let pump = {
            let session = session.clone();
            tokio::spawn(async move {
                tokio::select! {
                    res = upstream(&session, proxy_read) => res,
                    res = downstream(&session, proxy_write) => res,
                }
            })
        };

        let (mut client_read, mut client_write) = tokio::io::split(client);
        client_write.write_all(b"request").await.unwrap();
        channel.receive(Bytes::from_static(b"response")).await;

        let mut buf = [0u8; 8];
        client_read.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response");

        while channel.sent_bytes() != b"request" {
            tokio::task::yield_now().await;
        }

        session.close().await;
        pump.await.unwrap().unwrap();
    }
}
