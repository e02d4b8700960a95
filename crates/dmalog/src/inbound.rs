//! Backend → guest transfers.
//!
//! The guest registers one receive descriptor at a time. Bytes arrive asynchronously from the
//! backend and are scattered across the descriptor's buffers in list order, starting at a cursor
//! that persists between deliveries. The backend must ask [`InboundEngine::capacity`] first and
//! never deliver more than it reports; a delivery that would not fit is rejected as a whole.

use memory::GuestMemory;

use crate::error::{DmalogError, Result};
use crate::notify::{Direction, NotificationController, NotifyOutcome};
use crate::sgl::{DescriptorStatus, Sgl};

/// The live receive registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTransfer {
    descriptor: Sgl,
    descriptor_address: u64,
    cursor_buffer: usize,
    cursor_offset: u64,
    consumed: u64,
}

impl InboundTransfer {
    fn new(descriptor: Sgl, descriptor_address: u64) -> Self {
        Self {
            descriptor,
            descriptor_address,
            cursor_buffer: 0,
            cursor_offset: 0,
            consumed: 0,
        }
    }

    /// Cached copy of the registered descriptor (the header reflects what the device last wrote).
    pub fn descriptor(&self) -> &Sgl {
        &self.descriptor
    }

    pub fn descriptor_address(&self) -> u64 {
        self.descriptor_address
    }

    /// `(buffer index, offset within that buffer)` of the next byte to be written.
    pub fn cursor(&self) -> (usize, u64) {
        (self.cursor_buffer, self.cursor_offset)
    }

    pub fn total_capacity(&self) -> u64 {
        self.descriptor.total_len()
    }

    pub fn is_pending(&self) -> bool {
        self.descriptor.header().status == DescriptorStatus::Pending
    }

    /// Unconsumed bytes from the cursor to the end of the last buffer.
    pub fn remaining_capacity(&self) -> u64 {
        self.total_capacity() - self.consumed
    }
}

/// Result of registering a receive descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// No unfinished registration was replaced.
    Fresh,
    /// A previous registration was still pending and has been abandoned.
    ReplacedUnfinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No live pending registration; the bytes were discarded.
    Dropped,
    /// The bytes were scattered and the descriptor completed.
    Completed { bytes: usize, notify: NotifyOutcome },
}

#[derive(Debug, Default)]
pub struct InboundEngine {
    transfer: Option<InboundTransfer>,
}

impl InboundEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer(&self) -> Option<&InboundTransfer> {
        self.transfer.as_ref()
    }

    /// Register the receive descriptor at `addr`, replacing any previous registration.
    ///
    /// A descriptor that fails to decode leaves no registration behind: the guest has moved on
    /// from the previous one either way.
    pub fn register<M: GuestMemory + ?Sized>(&mut self, mem: &M, addr: u64) -> Result<Registration> {
        let previous = self.transfer.take();
        let descriptor = Sgl::decode(mem, addr)?;

        self.transfer = Some(InboundTransfer::new(descriptor, addr));
        Ok(match previous {
            Some(prev) if prev.is_pending() => Registration::ReplacedUnfinished,
            _ => Registration::Fresh,
        })
    }

    /// How many bytes the backend may deliver right now.
    pub fn capacity(&self) -> u64 {
        match &self.transfer {
            Some(transfer) if transfer.is_pending() => transfer.remaining_capacity(),
            _ => 0,
        }
    }

    /// Scatter `bytes` into the registered buffers, complete the descriptor and notify.
    ///
    /// Fails with [`DmalogError::Overrun`] before touching guest memory if `bytes` does not fit in
    /// the remaining capacity. On any error the cursor and capacity are left as they were, so the
    /// same bytes can be delivered again.
    pub fn deliver<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        notifier: &mut NotificationController,
        bytes: &[u8],
    ) -> Result<DeliveryOutcome> {
        let Some(transfer) = self.transfer.as_mut().filter(|t| t.is_pending()) else {
            return Ok(DeliveryOutcome::Dropped);
        };

        let capacity = transfer.remaining_capacity();
        let overrun = DmalogError::Overrun {
            len: bytes.len(),
            capacity,
        };
        if bytes.len() as u64 > capacity {
            return Err(overrun);
        }

        let buffers = transfer.descriptor.buffers();
        let (mut index, mut offset) = transfer.cursor();
        let mut input = bytes;
        while !input.is_empty() {
            let Some(buffer) = buffers.get(index) else {
                return Err(overrun);
            };
            let space = buffer.length - offset;
            let take = (input.len() as u64).min(space) as usize;
            if take > 0 {
                mem.write_from(buffer.base + offset, &input[..take])?;
                input = &input[take..];
                offset += take as u64;
            }
            if offset == buffer.length {
                index += 1;
                offset = 0;
            }
        }

        // The transfer state only moves once the completion is visible to the guest.
        let mut header = *transfer.descriptor.header();
        header.status = DescriptorStatus::Done;
        header.actual_length = bytes.len() as u64;
        header.write(mem, transfer.descriptor_address)?;

        *transfer.descriptor.header_mut() = header;
        transfer.cursor_buffer = index;
        transfer.cursor_offset = offset;
        transfer.consumed += bytes.len() as u64;

        let notify = notifier.notify(Direction::Inbound, header.notify());
        Ok(DeliveryOutcome::Completed {
            bytes: bytes.len(),
            notify,
        })
    }

    pub fn reset(&mut self) {
        self.transfer = None;
    }
}
