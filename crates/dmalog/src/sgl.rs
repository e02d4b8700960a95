//! Scatter/gather descriptor codec.
//!
//! Guest layout (little-endian):
//!
//! ```text
//! +0   flags          u32   non-zero: raise an interrupt on completion
//! +4   status         u32   0 = pending, written as 1 by the device on completion
//! +8   actual_length  u64   bytes transferred (inbound only)
//! +16  buffer_count   u64
//! +24  buffers[buffer_count] { base: u64, length: u64 }
//! ```
//!
//! Only the 24-byte header is ever written back; the buffer table belongs to the guest.

use memory::GuestMemory;

use crate::error::{DmalogError, MalformedReason, Result};

/// Maximum number of buffers in one descriptor.
pub const MAX_BUFFERS: usize = 64;

pub const HEADER_LEN: usize = 24;
pub const BUFFER_ENTRY_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorStatus {
    Pending,
    Done,
}

impl DescriptorStatus {
    pub const RAW_PENDING: u32 = 0;
    pub const RAW_DONE: u32 = 1;

    pub fn from_raw(raw: u32) -> Self {
        if raw == Self::RAW_PENDING {
            Self::Pending
        } else {
            Self::Done
        }
    }

    pub fn to_raw(self) -> u32 {
        match self {
            Self::Pending => Self::RAW_PENDING,
            Self::Done => Self::RAW_DONE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorHeader {
    /// Raw flags word, written back unchanged.
    pub flags: u32,
    pub status: DescriptorStatus,
    pub actual_length: u64,
    pub buffer_count: u64,
}

impl DescriptorHeader {
    pub fn new(notify: bool, buffer_count: u64) -> Self {
        Self {
            flags: u32::from(notify),
            status: DescriptorStatus::Pending,
            actual_length: 0,
            buffer_count,
        }
    }

    /// Whether the guest asked for an interrupt on completion.
    pub fn notify(&self) -> bool {
        self.flags != 0
    }

    pub fn from_bytes(bytes: &[u8; HEADER_LEN]) -> Self {
        let u32_at = |off: usize| {
            u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
        };
        let u64_at = |off: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[off..off + 8]);
            u64::from_le_bytes(raw)
        };
        Self {
            flags: u32_at(0),
            status: DescriptorStatus::from_raw(u32_at(4)),
            actual_length: u64_at(8),
            buffer_count: u64_at(16),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.flags.to_le_bytes());
        out[4..8].copy_from_slice(&self.status.to_raw().to_le_bytes());
        out[8..16].copy_from_slice(&self.actual_length.to_le_bytes());
        out[16..24].copy_from_slice(&self.buffer_count.to_le_bytes());
        out
    }

    pub fn read<M: GuestMemory + ?Sized>(mem: &M, addr: u64) -> Result<Self> {
        let mut raw = [0u8; HEADER_LEN];
        mem.read_into(addr, &mut raw)?;
        Ok(Self::from_bytes(&raw))
    }

    /// Encode the header back to `addr`.
    pub fn write<M: GuestMemory + ?Sized>(&self, mem: &mut M, addr: u64) -> Result<()> {
        mem.write_from(addr, &self.to_bytes())?;
        Ok(())
    }
}

/// One guest memory region of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Buffer {
    pub base: u64,
    pub length: u64,
}

impl Buffer {
    pub fn new(base: u64, length: u64) -> Self {
        Self { base, length }
    }

    fn from_bytes(bytes: &[u8]) -> Self {
        let mut base = [0u8; 8];
        let mut length = [0u8; 8];
        base.copy_from_slice(&bytes[0..8]);
        length.copy_from_slice(&bytes[8..16]);
        Self {
            base: u64::from_le_bytes(base),
            length: u64::from_le_bytes(length),
        }
    }

    fn to_bytes(self) -> [u8; BUFFER_ENTRY_LEN] {
        let mut out = [0u8; BUFFER_ENTRY_LEN];
        out[0..8].copy_from_slice(&self.base.to_le_bytes());
        out[8..16].copy_from_slice(&self.length.to_le_bytes());
        out
    }
}

/// A decoded descriptor: header plus an owned, bounds-checked buffer list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sgl {
    header: DescriptorHeader,
    buffers: Vec<Buffer>,
    total_len: u64,
}

impl Sgl {
    /// Build a descriptor in host memory, e.g. to lay it out in guest RAM with
    /// [`Sgl::write_table`].
    ///
    /// Validation happens on [`Sgl::decode`]; this constructor accepts anything so tests and
    /// guest-side tooling can produce hostile layouts too.
    pub fn new(notify: bool, buffers: Vec<Buffer>) -> Self {
        let total_len = buffers
            .iter()
            .fold(0u64, |acc, b| acc.saturating_add(b.length));
        Self {
            header: DescriptorHeader::new(notify, buffers.len() as u64),
            buffers,
            total_len,
        }
    }

    /// Decode the header at `addr` and the `buffer_count` entries that follow it.
    ///
    /// The count is checked against [`MAX_BUFFERS`] before the table is read, and every buffer
    /// range is checked for address wrap-around, so nothing downstream has to trust guest sizes.
    pub fn decode<M: GuestMemory + ?Sized>(mem: &M, addr: u64) -> Result<Self> {
        let malformed = |reason| DmalogError::MalformedDescriptor { addr, reason };

        let table_addr = addr
            .checked_add(HEADER_LEN as u64)
            .ok_or(malformed(MalformedReason::TableAddressOverflow))?;
        let header = DescriptorHeader::read(mem, addr)?;

        if header.buffer_count > MAX_BUFFERS as u64 {
            return Err(malformed(MalformedReason::TooManyBuffers {
                count: header.buffer_count,
                max: MAX_BUFFERS,
            }));
        }
        // Bounded by MAX_BUFFERS above.
        let count = header.buffer_count as usize;
        let table_len = count * BUFFER_ENTRY_LEN;
        table_addr
            .checked_add(table_len as u64)
            .ok_or(malformed(MalformedReason::TableAddressOverflow))?;

        let mut table = [0u8; MAX_BUFFERS * BUFFER_ENTRY_LEN];
        mem.read_into(table_addr, &mut table[..table_len])?;

        let mut buffers = Vec::with_capacity(count);
        let mut total_len = 0u64;
        for (index, entry) in table[..table_len].chunks_exact(BUFFER_ENTRY_LEN).enumerate() {
            let buffer = Buffer::from_bytes(entry);
            buffer
                .base
                .checked_add(buffer.length)
                .ok_or(malformed(MalformedReason::BufferAddressOverflow { index }))?;
            total_len = total_len
                .checked_add(buffer.length)
                .ok_or(malformed(MalformedReason::TotalLengthOverflow))?;
            buffers.push(buffer);
        }

        Ok(Self {
            header,
            buffers,
            total_len,
        })
    }

    /// Lay out the header and the full buffer table at `addr` (the guest driver's side of the
    /// protocol; the device itself only ever rewrites the header).
    pub fn write_table<M: GuestMemory + ?Sized>(&self, mem: &mut M, addr: u64) -> Result<()> {
        self.header.write(mem, addr)?;
        let mut entry_addr = addr + HEADER_LEN as u64;
        for buffer in &self.buffers {
            mem.write_from(entry_addr, &buffer.to_bytes())?;
            entry_addr += BUFFER_ENTRY_LEN as u64;
        }
        Ok(())
    }

    pub fn header(&self) -> &DescriptorHeader {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut DescriptorHeader {
        &mut self.header
    }

    pub fn buffers(&self) -> &[Buffer] {
        &self.buffers
    }

    /// Sum of all buffer lengths.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }
}
