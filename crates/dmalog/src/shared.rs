//! Thread-shareable device handle and the stream pump that feeds it.
//!
//! Register accesses arrive on the vCPU thread while backend bytes arrive on whatever thread the
//! host I/O runs on. Both go through the same lock, held for the whole operation, so a delivery
//! can never interleave with a registration or an acknowledge.

use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard};

use dmalog_backend::ByteStreamBackend;
use memory::{GuestMemory, MmioHandler};
use thiserror::Error;

use crate::device::{DmalogDevice, DmalogStats};
use crate::error::{DmalogError, Result};
use crate::inbound::DeliveryOutcome;
use crate::notify::Direction;

/// Default upper bound on a single pump read.
pub const DEFAULT_PUMP_CHUNK: usize = 4096;

pub struct SharedDmalog<M, B> {
    inner: Arc<Mutex<DmalogDevice<M, B>>>,
}

impl<M, B> Clone for SharedDmalog<M, B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: GuestMemory, B: ByteStreamBackend> SharedDmalog<M, B> {
    pub fn new(device: DmalogDevice<M, B>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(device)),
        }
    }

    /// Lock the device. A poisoned lock is recovered: the device state is always consistent
    /// between operations.
    pub fn lock(&self) -> MutexGuard<'_, DmalogDevice<M, B>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn capacity(&self) -> u64 {
        self.lock().capacity()
    }

    pub fn deliver(&self, bytes: &[u8]) -> Result<DeliveryOutcome> {
        self.lock().deliver(bytes)
    }

    pub fn poll_backend(&self) -> Result<usize> {
        self.lock().poll_backend()
    }

    pub fn acknowledge(&self, value: u64) -> Option<Direction> {
        self.lock().acknowledge(value)
    }

    pub fn reset(&self) {
        self.lock().reset();
    }

    pub fn irq_level(&self) -> bool {
        self.lock().irq_level()
    }

    pub fn stats(&self) -> DmalogStats {
        self.lock().stats()
    }

    pub fn mmio_read(&self, offset: u64, size: usize) -> u64 {
        self.lock().mmio_read(offset, size)
    }

    pub fn mmio_write(&self, offset: u64, size: usize, value: u64) {
        self.lock().mmio_write(offset, size, value);
    }
}

impl<M: GuestMemory, B: ByteStreamBackend> MmioHandler for SharedDmalog<M, B> {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        self.mmio_read(offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        self.mmio_write(offset, size, value);
    }
}

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("inbound source read failed: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Device(#[from] DmalogError),
}

/// Move bytes from `source` into the device until it stops accepting them or the source hits
/// end of stream. Returns the number of bytes delivered.
///
/// Each read asks for no more than the current capacity (and at most `max_chunk`). The read
/// itself happens without the device lock held; if the guest re-registers a smaller descriptor
/// while it is in flight, the delivery fails with [`DmalogError::Overrun`] and the chunk is lost.
pub fn pump_inbound<M, B, R>(
    shared: &SharedDmalog<M, B>,
    source: &mut R,
    max_chunk: usize,
) -> std::result::Result<u64, PumpError>
where
    M: GuestMemory,
    B: ByteStreamBackend,
    R: Read + ?Sized,
{
    let mut buf = vec![0u8; max_chunk.max(1)];
    let mut total = 0u64;
    loop {
        let capacity = shared.capacity();
        if capacity == 0 {
            break;
        }
        let len = usize::try_from(capacity)
            .unwrap_or(usize::MAX)
            .min(buf.len());

        let n = match source.read(&mut buf[..len]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };

        match shared.deliver(&buf[..n])? {
            DeliveryOutcome::Completed { bytes, .. } => total += bytes as u64,
            DeliveryOutcome::Dropped => break,
        }
    }
    Ok(total)
}
