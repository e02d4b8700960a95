//! The device model: register file, transfer engines and notification state behind one owner.

use dmalog_backend::ByteStreamBackend;
use memory::{GuestMemory, MmioHandler};

use crate::config::DmalogConfig;
use crate::error::{DmalogError, Result};
use crate::inbound::{DeliveryOutcome, InboundEngine, InboundTransfer, Registration};
use crate::irq::Interrupt;
use crate::notify::{Direction, NotificationController, NotifyOutcome, PendingFlags};
use crate::outbound::{OutboundCompletion, OutboundEngine};
use crate::regs::{RegisterWrite, TagRegister};

/// Best-effort device counters. Never reset by [`DmalogDevice::reset`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DmalogStats {
    pub outbound_submissions: u64,
    pub outbound_bytes: u64,
    pub inbound_registrations: u64,
    pub inbound_bytes: u64,
    /// Registrations that replaced a descriptor the device had not completed yet.
    pub stale_registrations: u64,
    /// Deliveries discarded because no pending registration existed.
    pub dropped_deliveries: u64,
    pub malformed_descriptors: u64,
    pub overruns: u64,
    pub backend_failures: u64,
    pub guest_memory_failures: u64,
    pub interrupts_raised: u64,
    pub interrupts_coalesced: u64,
}

impl DmalogStats {
    fn record_error(&mut self, err: &DmalogError) {
        match err {
            DmalogError::MalformedDescriptor { .. } => self.malformed_descriptors += 1,
            DmalogError::Overrun { .. } => self.overruns += 1,
            DmalogError::BackendWriteFailure(_) => self.backend_failures += 1,
            DmalogError::GuestMemory(_) => self.guest_memory_failures += 1,
        }
    }

    fn record_notify(&mut self, outcome: NotifyOutcome) {
        match outcome {
            NotifyOutcome::Raised => self.interrupts_raised += 1,
            NotifyOutcome::Coalesced => self.interrupts_coalesced += 1,
            NotifyOutcome::NotRequested => {}
        }
    }
}

/// Virtual streaming DMA device.
///
/// `M` is the guest memory the descriptors and buffers live in; `B` is the byte-stream backend
/// outbound data is pushed to and inbound data comes from. Every entry point runs to completion
/// on the caller's thread; wrap the device in [`crate::SharedDmalog`] when register accesses and
/// backend deliveries come from different threads.
pub struct DmalogDevice<M, B> {
    tag: TagRegister,
    mem: M,
    backend: B,
    notifier: NotificationController,
    outbound: OutboundEngine,
    inbound: InboundEngine,
    stats: DmalogStats,
}

impl<M: GuestMemory, B: ByteStreamBackend> DmalogDevice<M, B> {
    pub(crate) fn new(config: &DmalogConfig, mem: M, backend: B, interrupt: Interrupt) -> Self {
        Self {
            tag: TagRegister::new(&config.tag),
            mem,
            backend,
            notifier: NotificationController::new(interrupt),
            outbound: OutboundEngine::new(),
            inbound: InboundEngine::new(),
            stats: DmalogStats::default(),
        }
    }

    /// Drain the outbound descriptor at `addr` to the backend.
    pub fn submit_outbound(&mut self, addr: u64) -> Result<OutboundCompletion> {
        let result = self.outbound.submit(
            &mut self.mem,
            &mut self.backend,
            &mut self.notifier,
            addr,
        );
        match result {
            Ok(done) => {
                self.stats.outbound_submissions += 1;
                self.stats.outbound_bytes += done.bytes;
                self.stats.record_notify(done.notify);
                tracing::debug!(
                    addr,
                    buffers = done.buffers,
                    bytes = done.bytes,
                    "outbound descriptor drained"
                );
                Ok(done)
            }
            Err(err) => Err(self.fail("outbound submit", addr, err)),
        }
    }

    /// Register the inbound descriptor at `addr`, replacing any previous registration.
    pub fn register_inbound(&mut self, addr: u64) -> Result<Registration> {
        let abandoning = self.inbound.transfer().is_some_and(InboundTransfer::is_pending);
        match self.inbound.register(&self.mem, addr) {
            Ok(registration) => {
                self.stats.inbound_registrations += 1;
                if registration == Registration::ReplacedUnfinished {
                    self.stats.stale_registrations += 1;
                    tracing::warn!(addr, "inbound registration replaced an unfinished descriptor");
                }
                tracing::debug!(addr, capacity = self.inbound.capacity(), "inbound descriptor registered");
                Ok(registration)
            }
            Err(err) => {
                if abandoning {
                    self.stats.stale_registrations += 1;
                    tracing::warn!(addr, "inbound registration abandoned an unfinished descriptor");
                }
                Err(self.fail("inbound register", addr, err))
            }
        }
    }

    /// Bytes the backend may deliver right now (0 without a live pending registration).
    pub fn capacity(&self) -> u64 {
        self.inbound.capacity()
    }

    /// Deliver backend bytes into the registered inbound buffers.
    ///
    /// The caller must not exceed [`DmalogDevice::capacity`]; doing so fails with
    /// [`DmalogError::Overrun`] without writing anything.
    pub fn deliver(&mut self, bytes: &[u8]) -> Result<DeliveryOutcome> {
        let addr = self
            .inbound
            .transfer()
            .map_or(0, InboundTransfer::descriptor_address);
        match self.inbound.deliver(&mut self.mem, &mut self.notifier, bytes) {
            Ok(DeliveryOutcome::Dropped) => {
                self.stats.dropped_deliveries += 1;
                tracing::debug!(len = bytes.len(), "inbound delivery dropped, no pending descriptor");
                Ok(DeliveryOutcome::Dropped)
            }
            Ok(outcome @ DeliveryOutcome::Completed { bytes: len, notify }) => {
                self.stats.inbound_bytes += len as u64;
                self.stats.record_notify(notify);
                tracing::debug!(addr, len, "inbound descriptor completed");
                Ok(outcome)
            }
            Err(err) => Err(self.fail("inbound deliver", addr, err)),
        }
    }

    /// Guest write to the acknowledge register.
    pub fn acknowledge(&mut self, value: u64) -> Option<Direction> {
        let cleared = self.notifier.acknowledge(value);
        tracing::debug!(value, ?cleared, "acknowledge");
        cleared
    }

    /// Pull at most [`DmalogDevice::capacity`] bytes from the backend and deliver them.
    ///
    /// Returns the number of bytes moved into guest memory.
    pub fn poll_backend(&mut self) -> Result<usize> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Ok(0);
        }
        let max_len = usize::try_from(capacity).unwrap_or(usize::MAX);
        let Some(bytes) = self.backend.poll_receive(max_len) else {
            return Ok(0);
        };
        if bytes.is_empty() {
            return Ok(0);
        }
        match self.deliver(&bytes)? {
            DeliveryOutcome::Completed { bytes, .. } => Ok(bytes),
            DeliveryOutcome::Dropped => Ok(0),
        }
    }

    /// Drop the inbound registration and all pending interrupt state. The tag and counters stay.
    pub fn reset(&mut self) {
        self.inbound.reset();
        self.notifier.reset();
        tracing::debug!("device reset");
    }

    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        self.notifier.set_interrupt(interrupt);
    }

    pub fn irq_level(&self) -> bool {
        self.notifier.irq_level()
    }

    pub fn pending(&self) -> PendingFlags {
        self.notifier.pending()
    }

    pub fn stats(&self) -> DmalogStats {
        self.stats
    }

    pub fn tag(&self) -> &[u8] {
        self.tag.as_bytes()
    }

    pub fn inbound_transfer(&self) -> Option<&InboundTransfer> {
        self.inbound.transfer()
    }

    pub fn memory(&self) -> &M {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.mem
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn mmio_read(&self, offset: u64, _size: usize) -> u64 {
        self.tag.read(offset)
    }

    /// Register write. Transfer failures are logged and counted; the guest only ever sees them
    /// as a descriptor whose status stays pending.
    pub fn mmio_write(&mut self, offset: u64, size: usize, value: u64) {
        let Some(write) = RegisterWrite::decode(offset, size, value) else {
            tracing::trace!(offset, size, value, "write to unmapped register ignored");
            return;
        };
        match write {
            RegisterWrite::OutboundSubmit(addr) => {
                let _ = self.submit_outbound(addr);
            }
            RegisterWrite::InboundRegister(addr) => {
                let _ = self.register_inbound(addr);
            }
            RegisterWrite::Acknowledge(value) => {
                self.acknowledge(value);
            }
        }
    }

    fn fail(&mut self, op: &'static str, addr: u64, err: DmalogError) -> DmalogError {
        self.stats.record_error(&err);
        tracing::warn!(op, addr, "{err}");
        err
    }
}

impl<M: GuestMemory, B: ByteStreamBackend> MmioHandler for DmalogDevice<M, B> {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        self.mmio_read(offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        self.mmio_write(offset, size, value);
    }
}

impl<M, B> std::fmt::Debug for DmalogDevice<M, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DmalogDevice")
            .field("tag", &self.tag)
            .field("notifier", &self.notifier)
            .field("inbound", &self.inbound)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}
