//! Guest physical memory and register-region abstractions shared by device models.
//!
//! Device models never hold raw pointers into guest RAM. Every DMA access goes through the
//! fallible copy-based [`GuestMemory`] API so an untrusted guest address can only ever produce a
//! [`GuestMemoryError`], never an out-of-bounds host access.
#![forbid(unsafe_code)]

mod mmio;
mod phys;

pub use mmio::MmioHandler;
pub use phys::{DenseMemory, GuestMemory, GuestMemoryError, GuestMemoryResult, SparseMemory};
