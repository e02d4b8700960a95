//! Virtual streaming DMA device.
//!
//! The guest describes transfers with scatter-gather descriptors in its own memory and hands
//! their addresses to the device through three write-only registers:
//!
//! * outbound submit: the device drains every listed buffer to the byte-stream backend before
//!   the register write returns, then marks the descriptor done;
//! * inbound register: the device remembers the descriptor and scatters backend bytes into it as
//!   they arrive;
//! * acknowledge: clears the per-direction interrupt-pending flag, re-arming notifications.
//!
//! A read-only identification tag is exposed in the same register window.
#![forbid(unsafe_code)]

mod config;
mod device;
mod error;
mod inbound;
mod irq;
mod notify;
mod outbound;
mod regs;
mod sgl;
mod shared;

pub use config::{
    DmalogBuilder, DmalogConfig, DEFAULT_TAG, MMIO_REGION_SIZE, PCI_DEVICE_ID, PCI_REVISION,
    PCI_VENDOR_ID,
};
pub use device::{DmalogDevice, DmalogStats};
pub use error::{ConfigError, DmalogError, MalformedReason, Result};
pub use inbound::{DeliveryOutcome, InboundTransfer, Registration};
pub use irq::{Interrupt, IrqLine, MsiMessage, MsiTrigger};
pub use notify::{AckBits, Direction, NotifyOutcome, PendingFlags};
pub use outbound::{OutboundCompletion, OUTBOUND_WINDOW};
pub use regs::{
    RegisterWrite, REG_ACK, REG_INBOUND_REGISTER, REG_OUTBOUND_SUBMIT, TAG_OFFSET, TAG_WINDOW_LEN,
};
pub use sgl::{
    Buffer, DescriptorHeader, DescriptorStatus, Sgl, BUFFER_ENTRY_LEN, HEADER_LEN, MAX_BUFFERS,
};
pub use shared::{pump_inbound, PumpError, SharedDmalog, DEFAULT_PUMP_CHUNK};
