use dmalog_backend::BackendError;
use memory::GuestMemoryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DmalogError>;

/// Why a descriptor read from guest memory was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedReason {
    #[error("buffer count {count} exceeds the device capacity of {max}")]
    TooManyBuffers { count: u64, max: usize },

    #[error("descriptor table wraps the guest address space")]
    TableAddressOverflow,

    #[error("buffer {index} wraps the guest address space")]
    BufferAddressOverflow { index: usize },

    #[error("total buffer length overflows u64")]
    TotalLengthOverflow,
}

/// Failures of the transfer engines.
///
/// None of these reach the guest directly: the descriptor wire format has no error status, so a
/// failed transfer is only visible to the guest as `status` never becoming `Done`.
#[derive(Debug, Error)]
pub enum DmalogError {
    #[error("malformed descriptor at 0x{addr:x}: {reason}")]
    MalformedDescriptor { addr: u64, reason: MalformedReason },

    #[error("delivery of {len} bytes overruns the {capacity} bytes of registered buffer space")]
    Overrun { len: usize, capacity: u64 },

    #[error("backend write failed: {0}")]
    BackendWriteFailure(#[source] BackendError),

    #[error(transparent)]
    GuestMemory(#[from] GuestMemoryError),
}

/// Construction-time configuration errors. A built device never produces these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("no guest memory attached")]
    MissingMemory,

    #[error("no backend attached")]
    MissingBackend,

    #[error("no interrupt attached")]
    MissingInterrupt,

    #[error("tag contains a NUL byte at index {index}")]
    TagContainsNul { index: usize },
}
