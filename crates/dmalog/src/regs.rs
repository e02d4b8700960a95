//! MMIO register map.
//!
//! | Offset        | Access | Meaning                                              |
//! |---------------|--------|------------------------------------------------------|
//! | `0x00`        | write  | guest address of an outbound descriptor (drain now)  |
//! | `0x08`        | write  | guest address of an inbound descriptor (register)    |
//! | `0x10`        | write  | acknowledge: bit0 = outbound, bit1 = inbound         |
//! | `0x10..0x50`  | read   | identification tag, one byte per offset              |

pub const REG_OUTBOUND_SUBMIT: u64 = 0x00;
pub const REG_INBOUND_REGISTER: u64 = 0x08;
pub const REG_ACK: u64 = 0x10;

pub const TAG_OFFSET: u64 = 0x10;
pub const TAG_WINDOW_LEN: usize = 64;

/// A decoded register write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWrite {
    OutboundSubmit(u64),
    InboundRegister(u64),
    Acknowledge(u64),
}

impl RegisterWrite {
    /// Decode a write of `size` bytes at `offset`. Writes to anything but the three command
    /// offsets are ignored.
    pub fn decode(offset: u64, size: usize, value: u64) -> Option<Self> {
        let value = value & width_mask(size);
        match offset {
            REG_OUTBOUND_SUBMIT => Some(Self::OutboundSubmit(value)),
            REG_INBOUND_REGISTER => Some(Self::InboundRegister(value)),
            REG_ACK => Some(Self::Acknowledge(value)),
            _ => None,
        }
    }
}

fn width_mask(size: usize) -> u64 {
    match size {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

/// Read-only identification string, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRegister {
    bytes: Box<[u8]>,
}

impl TagRegister {
    pub fn new(tag: &str) -> Self {
        Self {
            bytes: tag.as_bytes().into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Register read at `offset`: the tag byte for offsets inside the window, zero elsewhere
    /// (including window offsets past the end of the tag). One byte per access regardless of
    /// width.
    pub fn read(&self, offset: u64) -> u64 {
        let Some(index) = offset.checked_sub(TAG_OFFSET) else {
            return 0;
        };
        if index >= TAG_WINDOW_LEN as u64 {
            return 0;
        }
        self.bytes
            .get(index as usize)
            .copied()
            .map_or(0, u64::from)
    }
}
