use dmalog_backend::ByteStreamBackend;
use memory::GuestMemory;
use serde::{Deserialize, Serialize};

use crate::device::DmalogDevice;
use crate::error::ConfigError;
use crate::irq::Interrupt;

pub const DEFAULT_TAG: &str = "dmalog";

/// Identity the host fabric should give the device's PCI function.
pub const PCI_VENDOR_ID: u16 = 0x1234;
pub const PCI_DEVICE_ID: u16 = 0x69e8;
pub const PCI_REVISION: u8 = 0x12;
/// Size of the MMIO region the register file should be mapped with.
pub const MMIO_REGION_SIZE: u64 = 0x10_0000;

/// User-facing device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DmalogConfig {
    /// Identification string exposed through the tag window. Only the first 64 bytes are
    /// guest-visible.
    pub tag: String,
}

impl Default for DmalogConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
        }
    }
}

impl DmalogConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(index) = self.tag.bytes().position(|b| b == 0) {
            return Err(ConfigError::TagContainsNul { index });
        }
        Ok(())
    }
}

/// Assembles a [`DmalogDevice`] from its configuration and the three collaborators it consumes.
///
/// Every missing piece is reported by [`DmalogBuilder::build`]; a built device has no further
/// configuration failure modes.
pub struct DmalogBuilder<M, B> {
    config: DmalogConfig,
    memory: Option<M>,
    backend: Option<B>,
    interrupt: Option<Interrupt>,
}

impl<M: GuestMemory, B: ByteStreamBackend> DmalogBuilder<M, B> {
    pub fn new(config: DmalogConfig) -> Self {
        Self {
            config,
            memory: None,
            backend: None,
            interrupt: None,
        }
    }

    pub fn memory(mut self, memory: M) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn backend(mut self, backend: B) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn build(self) -> Result<DmalogDevice<M, B>, ConfigError> {
        self.config.validate()?;
        let memory = self.memory.ok_or(ConfigError::MissingMemory)?;
        let backend = self.backend.ok_or(ConfigError::MissingBackend)?;
        let interrupt = self.interrupt.ok_or(ConfigError::MissingInterrupt)?;
        Ok(DmalogDevice::new(&self.config, memory, backend, interrupt))
    }
}
