#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use dmalog::{
    DmalogBuilder, DmalogConfig, DmalogDevice, Interrupt, IrqLine, MsiMessage, MsiTrigger,
};
use dmalog_backend::{BackendError, ByteStreamBackend, LoopbackBackend};
use memory::{DenseMemory, GuestMemory};

pub const MEM_SIZE: u64 = 0x10_0000;

/// Level line shared with the test body.
#[derive(Clone, Default)]
pub struct TestIrq {
    level: Arc<AtomicBool>,
    edges: Arc<AtomicUsize>,
}

impl TestIrq {
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of low → high transitions observed.
    pub fn raises(&self) -> usize {
        self.edges.load(Ordering::SeqCst)
    }
}

impl IrqLine for TestIrq {
    fn set_level(&self, high: bool) {
        let was = self.level.swap(high, Ordering::SeqCst);
        if high && !was {
            self.edges.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Clone, Default)]
pub struct RecordingMsi(pub Arc<Mutex<Vec<MsiMessage>>>);

impl RecordingMsi {
    pub fn count(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

impl MsiTrigger for RecordingMsi {
    fn trigger_msi(&mut self, message: MsiMessage) {
        self.0.lock().unwrap().push(message);
    }
}

/// Backend that accepts `budget` pushes and then reports a broken stream.
#[derive(Default)]
pub struct FailingBackend {
    pub budget: usize,
    pub accepted: Vec<u8>,
}

impl ByteStreamBackend for FailingBackend {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        if self.budget == 0 {
            return Err(BackendError::Disconnected);
        }
        self.budget -= 1;
        self.accepted.extend_from_slice(bytes);
        Ok(())
    }
}

pub fn device() -> (DmalogDevice<DenseMemory, LoopbackBackend>, TestIrq) {
    device_with_backend(LoopbackBackend::new())
}

/// Route device logs to the test harness's captured output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

pub fn device_with_backend<B: ByteStreamBackend>(
    backend: B,
) -> (DmalogDevice<DenseMemory, B>, TestIrq) {
    init_tracing();
    let irq = TestIrq::default();
    let dev = DmalogBuilder::new(DmalogConfig::default())
        .memory(DenseMemory::new(MEM_SIZE).unwrap())
        .backend(backend)
        .interrupt(Interrupt::level(irq.clone()))
        .build()
        .unwrap();
    (dev, irq)
}

/// Lay out a descriptor the way a guest driver would: 24-byte header followed by
/// `(base, length)` pairs.
pub fn write_descriptor<M: GuestMemory + ?Sized>(
    mem: &mut M,
    addr: u64,
    notify: bool,
    buffers: &[(u64, u64)],
) {
    let mut raw = Vec::with_capacity(24 + buffers.len() * 16);
    raw.extend_from_slice(&u32::from(notify).to_le_bytes()); // flags
    raw.extend_from_slice(&0u32.to_le_bytes()); // status
    raw.extend_from_slice(&0u64.to_le_bytes()); // actual_length
    raw.extend_from_slice(&(buffers.len() as u64).to_le_bytes()); // buffer_count
    for &(base, length) in buffers {
        raw.extend_from_slice(&base.to_le_bytes());
        raw.extend_from_slice(&length.to_le_bytes());
    }
    mem.write_from(addr, &raw).unwrap();
}

pub fn status<M: GuestMemory + ?Sized>(mem: &M, addr: u64) -> u32 {
    mem.read_u32_le(addr + 4).unwrap()
}

pub fn actual_length<M: GuestMemory + ?Sized>(mem: &M, addr: u64) -> u64 {
    mem.read_u64_le(addr + 8).unwrap()
}
