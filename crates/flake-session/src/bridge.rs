//! Push-to-pull adapter between inbound data channel messages and the consumer.
//!
//! Each message is handed over whole, so a reader never observes part of one
//! message followed by part of another. At most one undelivered message sits in
//! the pipe; `deliver` waits for the reader to make room.

use std::io;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("stream bridge write end is closed")]
    Closed,
    #[error("stream bridge reader is gone")]
    ReaderGone,
}

#[derive(Debug, Clone)]
struct CloseReason {
    kind: io::ErrorKind,
    message: String,
}

pub struct StreamBridge {
    writer: Mutex<Option<mpsc::Sender<Bytes>>>,
    reason: Mutex<Option<CloseReason>>,
    closed_tx: watch::Sender<bool>,
    reader: AsyncMutex<BridgeReader>,
}

struct BridgeReader {
    rx: mpsc::Receiver<Bytes>,
    pending: Bytes,
    reason_reported: bool,
}

impl StreamBridge {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        let (closed_tx, _) = watch::channel(false);
        Self {
            writer: Mutex::new(Some(tx)),
            reason: Mutex::new(None),
            closed_tx,
            reader: AsyncMutex::new(BridgeReader {
                rx,
                pending: Bytes::new(),
                reason_reported: false,
            }),
        }
    }

    /// Hands one inbound message to the reader side.
    pub async fn deliver(&self, data: Bytes) -> Result<(), BridgeError> {
        let sender = self.writer.lock().clone().ok_or(BridgeError::Closed)?;
        let mut closed_rx = self.closed_tx.subscribe();
        tokio::select! {
            biased;
            _ = closed_rx.wait_for(|closed| *closed) => Err(BridgeError::Closed),
            sent = sender.send(data) => sent.map_err(|_| BridgeError::ReaderGone),
        }
    }

    /// Reads buffered inbound bytes. `Ok(0)` marks end-of-stream.
    pub async fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut reader = self.reader.lock().await;
        loop {
            if reader.pending.has_remaining() {
                let n = reader.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&reader.pending[..n]);
                reader.pending.advance(n);
                return Ok(n);
            }
            match reader.rx.recv().await {
                Some(chunk) => reader.pending = chunk,
                None => {
                    if !reader.reason_reported {
                        reader.reason_reported = true;
                        if let Some(reason) = self.reason.lock().clone() {
                            return Err(io::Error::new(reason.kind, reason.message));
                        }
                    }
                    return Ok(0);
                }
            }
        }
    }

    /// Closes the write end. Only the first close has any effect.
    pub fn close_writer(&self) {
        self.close_inner(None);
    }

    /// Closes the write end; the next read reports `err` before end-of-stream.
    pub fn close_with_error(&self, kind: io::ErrorKind, err: impl ToString) {
        self.close_inner(Some(CloseReason {
            kind,
            message: err.to_string(),
        }));
    }

    pub fn is_writer_closed(&self) -> bool {
        self.writer.lock().is_none()
    }

    fn close_inner(&self, reason: Option<CloseReason>) {
        let Some(sender) = self.writer.lock().take() else {
            return;
        };
        if reason.is_some() {
            *self.reason.lock() = reason;
        }
        drop(sender);
        self.closed_tx.send_replace(true);
    }
}

impl Default for StreamBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn delivers_messages_in_order_across_short_reads() {
        let bridge = Arc::new(StreamBridge::new());
        let producer = {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                bridge.deliver(Bytes::from_static(b"hello ")).await.unwrap();
                bridge.deliver(Bytes::from_static(b"world")).await.unwrap();
                bridge.close_writer();
            })
        };

        let mut out = Vec::new();
        let mut buf = [0u8; 4];
        loop {
            let n = bridge.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        producer.await.unwrap();
        assert_eq!(out, b"hello world");
    }

    #[tokio::test]
    async fn deliver_after_close_fails() {
        let bridge = StreamBridge::new();
        bridge.close_writer();
        bridge.close_writer();
        assert_eq!(
            bridge.deliver(Bytes::from_static(b"late")).await,
            Err(BridgeError::Closed)
        );
        let mut buf = [0u8; 8];
        assert_eq!(bridge.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_unblocks_a_waiting_deliver() {
        let bridge = Arc::new(StreamBridge::new());
        bridge.deliver(Bytes::from_static(b"fills the slot")).await.unwrap();
        let blocked = {
            let bridge = bridge.clone();
            tokio::spawn(async move { bridge.deliver(Bytes::from_static(b"waits")).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!blocked.is_finished());

        bridge.close_writer();
        assert_eq!(blocked.await.unwrap(), Err(BridgeError::Closed));
    }

    #[tokio::test]
    async fn close_with_error_surfaces_once_then_eof() {
        let bridge = StreamBridge::new();
        bridge.close_with_error(io::ErrorKind::BrokenPipe, "socks pipe failed");
        bridge.close_writer();

        let mut buf = [0u8; 8];
        let err = bridge.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(err.to_string(), "socks pipe failed");
        assert_eq!(bridge.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn buffered_message_is_readable_after_close() {
        let bridge = StreamBridge::new();
        bridge.deliver(Bytes::from_static(b"tail")).await.unwrap();
        bridge.close_writer();
        assert!(bridge.is_writer_closed());

        let mut buf = [0u8; 8];
        let n = bridge.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"tail");
        assert_eq!(bridge.read(&mut buf).await.unwrap(), 0);
    }
}
