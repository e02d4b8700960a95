//! Guest → backend transfers.
//!
//! A submission is fully synchronous: the register write that triggers it does not return until
//! every buffer has been pushed to the backend. Nothing survives between submissions except the
//! staging window, which is reused to bound peak memory.

use dmalog_backend::ByteStreamBackend;
use memory::GuestMemory;

use crate::error::{DmalogError, Result};
use crate::notify::{Direction, NotificationController, NotifyOutcome};
use crate::sgl::{Buffer, DescriptorStatus, Sgl};

/// Size of the staging window used to copy guest buffers to the backend.
pub const OUTBOUND_WINDOW: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutboundCompletion {
    pub buffers: usize,
    pub bytes: u64,
    pub notify: NotifyOutcome,
}

#[derive(Debug)]
pub struct OutboundEngine {
    window: Box<[u8]>,
}

impl Default for OutboundEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundEngine {
    pub fn new() -> Self {
        Self {
            window: vec![0u8; OUTBOUND_WINDOW].into_boxed_slice(),
        }
    }

    /// Drain the descriptor at `addr` to `backend`, mark it done and notify.
    ///
    /// On any failure the header is left untouched (still pending) and no interrupt is raised.
    /// A backend failure aborts the remaining copies; bytes already pushed stay pushed.
    pub fn submit<M, B>(
        &mut self,
        mem: &mut M,
        backend: &mut B,
        notifier: &mut NotificationController,
        addr: u64,
    ) -> Result<OutboundCompletion>
    where
        M: GuestMemory + ?Sized,
        B: ByteStreamBackend + ?Sized,
    {
        let sgl = Sgl::decode(mem, addr)?;
        let bytes = self.drain(mem, backend, sgl.buffers())?;

        let mut header = *sgl.header();
        header.status = DescriptorStatus::Done;
        header.write(mem, addr)?;

        let notify = notifier.notify(Direction::Outbound, header.notify());
        Ok(OutboundCompletion {
            buffers: sgl.buffers().len(),
            bytes,
            notify,
        })
    }

    fn drain<M, B>(&mut self, mem: &M, backend: &mut B, buffers: &[Buffer]) -> Result<u64>
    where
        M: GuestMemory + ?Sized,
        B: ByteStreamBackend + ?Sized,
    {
        let mut total = 0u64;
        for buffer in buffers {
            // `base + length` was range-checked when the descriptor was decoded.
            let mut paddr = buffer.base;
            let mut remaining = buffer.length;
            while remaining > 0 {
                let len = remaining.min(OUTBOUND_WINDOW as u64) as usize;
                let chunk = &mut self.window[..len];
                mem.read_into(paddr, chunk)?;
                backend
                    .transmit(chunk)
                    .map_err(DmalogError::BackendWriteFailure)?;
                paddr += len as u64;
                remaining -= len as u64;
                total += len as u64;
            }
        }
        Ok(total)
    }
}
