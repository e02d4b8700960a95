//! Byte-stream backends for the dmalog DMA device.
//!
//! A backend is the host side of the device's data channel: guest → host bytes are pushed with
//! [`ByteStreamBackend::transmit`], host → guest bytes are pulled with
//! [`ByteStreamBackend::poll_receive`], never more than the device says it can take.
//!
//! Connection setup and teardown are the host's business; this crate only models an already open
//! stream.
#![forbid(unsafe_code)]

pub mod io_backend;
pub mod loopback;

pub use io_backend::IoBackend;
pub use loopback::LoopbackBackend;

use thiserror::Error;

/// Errors surfaced by [`ByteStreamBackend::transmit`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("backend is disconnected")]
    Disconnected,
}

/// Best-effort byte/chunk counters exposed by backends that track them.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BackendStats {
    pub tx_chunks: u64,
    pub tx_bytes: u64,
    pub rx_chunks: u64,
    pub rx_bytes: u64,
}

/// Host endpoint of a byte stream (e.g. a virtual serial line, a log file, a socket).
pub trait ByteStreamBackend {
    /// Push guest → host bytes. Either every byte is accepted or an error is returned; there is
    /// no partial write.
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError>;

    /// Poll for host → guest bytes, at most `max_len` of them.
    ///
    /// Returns `None` when nothing is available or `max_len == 0`. Backends that only ever push
    /// data out can rely on the default.
    fn poll_receive(&mut self, _max_len: usize) -> Option<Vec<u8>> {
        None
    }

    fn stats(&self) -> Option<BackendStats> {
        None
    }
}

impl<T: ByteStreamBackend + ?Sized> ByteStreamBackend for Box<T> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        <T as ByteStreamBackend>::transmit(&mut **self, bytes)
    }

    fn poll_receive(&mut self, max_len: usize) -> Option<Vec<u8>> {
        <T as ByteStreamBackend>::poll_receive(&mut **self, max_len)
    }

    fn stats(&self) -> Option<BackendStats> {
        <T as ByteStreamBackend>::stats(&**self)
    }
}

impl<T: ByteStreamBackend + ?Sized> ByteStreamBackend for &mut T {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        <T as ByteStreamBackend>::transmit(&mut **self, bytes)
    }

    fn poll_receive(&mut self, max_len: usize) -> Option<Vec<u8>> {
        <T as ByteStreamBackend>::poll_receive(&mut **self, max_len)
    }

    fn stats(&self) -> Option<BackendStats> {
        <T as ByteStreamBackend>::stats(&**self)
    }
}

impl<B: ByteStreamBackend> ByteStreamBackend for Option<B> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        match self.as_mut() {
            Some(backend) => backend.transmit(bytes),
            None => Err(BackendError::Disconnected),
        }
    }

    fn poll_receive(&mut self, max_len: usize) -> Option<Vec<u8>> {
        self.as_mut().and_then(|backend| backend.poll_receive(max_len))
    }

    fn stats(&self) -> Option<BackendStats> {
        self.as_ref().and_then(|backend| backend.stats())
    }
}

impl<T: ByteStreamBackend + ?Sized> ByteStreamBackend for std::rc::Rc<std::cell::RefCell<T>> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        self.borrow_mut().transmit(bytes)
    }

    fn poll_receive(&mut self, max_len: usize) -> Option<Vec<u8>> {
        self.borrow_mut().poll_receive(max_len)
    }

    fn stats(&self) -> Option<BackendStats> {
        self.borrow().stats()
    }
}

impl<T: ByteStreamBackend + ?Sized> ByteStreamBackend for std::sync::Arc<std::sync::Mutex<T>> {
    fn transmit(&mut self, bytes: &[u8]) -> Result<(), BackendError> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .transmit(bytes)
    }

    fn poll_receive(&mut self, max_len: usize) -> Option<Vec<u8>> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .poll_receive(max_len)
    }

    fn stats(&self) -> Option<BackendStats> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .stats()
    }
}
