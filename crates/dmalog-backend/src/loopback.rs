use std::collections::VecDeque;

use crate::{BackendError, BackendStats, ByteStreamBackend};

/// In-memory backend: transmitted bytes are appended to a buffer, received bytes come from a
/// host-filled queue.
///
/// Used by tests and by host glue that wants to inspect the stream without a real endpoint.
#[derive(Debug, Default)]
pub struct LoopbackBackend {
    tx: Vec<u8>,
    rx: VecDeque<u8>,
    stats: BackendStats,
}

impl LoopbackBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue host → guest bytes.
    pub fn push_rx(&mut self, bytes: &[u8]) {
        self.rx.extend(bytes.iter().copied());
    }

    pub fn pending_rx(&self) -> usize {
        self.rx.len()
    }

    /// Bytes transmitted so far.
    pub fn tx(&self) -> &[u8] {
        &self.tx
    }

    pub fn take_tx(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tx)
    }
}

impl ByteStreamBackend for LoopbackBackend {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        self.tx.extend_from_slice(bytes);
        self.stats.tx_chunks += 1;
        self.stats.tx_bytes += bytes.len() as u64;
        Ok(())
    }

    fn poll_receive(&mut self, max_len: usize) -> Option<Vec<u8>> {
        if max_len == 0 || self.rx.is_empty() {
            return None;
        }
        let take = max_len.min(self.rx.len());
        let chunk: Vec<u8> = self.rx.drain(..take).collect();
        self.stats.rx_chunks += 1;
        self.stats.rx_bytes += chunk.len() as u64;
        Some(chunk)
    }

    fn stats(&self) -> Option<BackendStats> {
        Some(self.stats)
    }
}
