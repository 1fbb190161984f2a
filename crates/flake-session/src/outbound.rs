use bytes::{Bytes, BytesMut};

/// Bytes written by the consumer while no data channel is available.
///
/// Lives inside the session state lock; the owner drains it exactly once, in the
/// same critical section that installs the new channel.
#[derive(Debug, Default)]
pub struct OutboundBuffer {
    pending: BytesMut,
    writes: usize,
}

impl OutboundBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
        self.writes += 1;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Number of writes merged into the pending bytes.
    pub fn writes(&self) -> usize {
        self.writes
    }

    /// Removes everything buffered so far, in write order.
    pub fn drain(&mut self) -> Option<Bytes> {
        self.writes = 0;
        if self.pending.is_empty() {
            return None;
        }
        Some(self.pending.split().freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_writes_in_order_once() {
        let mut buffer = OutboundBuffer::new();
        buffer.push(b"GET / ");
        buffer.push(b"");
        buffer.push(b"HTTP/1.1");
        assert_eq!(buffer.len(), 14);
        assert_eq!(buffer.writes(), 3);

        assert_eq!(buffer.drain(), Some(Bytes::from_static(b"GET / HTTP/1.1")));
        assert!(buffer.is_empty());
        assert_eq!(buffer.drain(), None);
        assert_eq!(buffer.writes(), 0);
    }
}
