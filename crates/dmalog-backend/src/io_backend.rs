use std::io::Write;

use crate::{BackendError, BackendStats, ByteStreamBackend};

/// Outbound-only backend over any [`std::io::Write`] sink (file, pipe, connected socket).
///
/// Every [`ByteStreamBackend::transmit`] is a blocking `write_all` followed by a flush, so the
/// bytes have left the device once the call returns.
#[derive(Debug)]
pub struct IoBackend<W: Write> {
    sink: W,
    stats: BackendStats,
}

impl<W: Write> IoBackend<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            stats: BackendStats::default(),
        }
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}

impl<W: Write> ByteStreamBackend for IoBackend<W> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        if let Err(err) = self.sink.write_all(bytes).and_then(|()| self.sink.flush()) {
            tracing::warn!(len = bytes.len(), "backend write failed: {err}");
            return Err(BackendError::Io(err));
        }
        self.stats.tx_chunks += 1;
        self.stats.tx_bytes += bytes.len() as u64;
        Ok(())
    }

    fn stats(&self) -> Option<BackendStats> {
        Some(self.stats)
    }
}
