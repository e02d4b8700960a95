use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// Errors returned by [`GuestMemory`] backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestMemoryError {
    /// The requested address range is outside the guest physical memory size (or wraps the
    /// 64-bit address space).
    #[error("guest memory access out of range: paddr=0x{paddr:x} len={len} size=0x{size:x}")]
    OutOfRange { paddr: u64, len: usize, size: u64 },

    /// The requested size cannot be represented by the current platform's `usize`.
    #[error("guest memory size {size} does not fit in usize")]
    SizeTooLarge { size: u64 },

    /// The chosen chunk size is invalid (e.g. zero).
    #[error("invalid guest memory chunk size {chunk_size}")]
    InvalidChunkSize { chunk_size: usize },
}

pub type GuestMemoryResult<T> = Result<T, GuestMemoryError>;

/// Guest *physical* memory, as seen by a DMA-capable device.
///
/// All addresses are guest physical addresses. Accesses are copy-based and fallible: a backend
/// must reject any range that is not fully backed instead of truncating it.
pub trait GuestMemory {
    fn size(&self) -> u64;

    /// Reads bytes from guest physical memory into `dst`.
    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()>;

    /// Writes bytes from `src` into guest physical memory.
    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()>;

    fn read_vec(&self, paddr: u64, len: usize) -> GuestMemoryResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(paddr, &mut buf)?;
        Ok(buf)
    }

    fn read_u32_le(&self, paddr: u64) -> GuestMemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(paddr, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64_le(&self, paddr: u64) -> GuestMemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read_into(paddr, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn write_u32_le(&mut self, paddr: u64, value: u32) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }

    fn write_u64_le(&mut self, paddr: u64, value: u64) -> GuestMemoryResult<()> {
        self.write_from(paddr, &value.to_le_bytes())
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for Box<T> {
    fn size(&self) -> u64 {
        <T as GuestMemory>::size(&**self)
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::read_into(&**self, paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::write_from(&mut **self, paddr, src)
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for &mut T {
    fn size(&self) -> u64 {
        <T as GuestMemory>::size(&**self)
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::read_into(&**self, paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        <T as GuestMemory>::write_from(&mut **self, paddr, src)
    }
}

impl<T: GuestMemory + ?Sized> GuestMemory for Rc<RefCell<T>> {
    fn size(&self) -> u64 {
        self.borrow().size()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        self.borrow().read_into(paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        self.borrow_mut().write_from(paddr, src)
    }
}

// Shared RAM handles let the host keep inspecting guest memory while a device owns a clone.
impl<T: GuestMemory + ?Sized> GuestMemory for Arc<Mutex<T>> {
    fn size(&self) -> u64 {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .size()
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .read_into(paddr, dst)
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        self.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .write_from(paddr, src)
    }
}

fn check_range(size: u64, paddr: u64, len: usize) -> GuestMemoryResult<()> {
    let end = paddr
        .checked_add(len as u64)
        .ok_or(GuestMemoryError::OutOfRange { paddr, len, size })?;
    if end > size {
        return Err(GuestMemoryError::OutOfRange { paddr, len, size });
    }
    Ok(())
}

/// Dense (contiguous) guest memory.
#[derive(Debug, Clone)]
pub struct DenseMemory {
    data: Box<[u8]>,
}

impl DenseMemory {
    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        let size_usize =
            usize::try_from(size).map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            data: vec![0u8; size_usize].into_boxed_slice(),
        })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn range_to_usize(&self, paddr: u64, len: usize) -> GuestMemoryResult<(usize, usize)> {
        check_range(self.size(), paddr, len)?;
        let out_of_range = || GuestMemoryError::OutOfRange {
            paddr,
            len,
            size: self.size(),
        };
        let start = usize::try_from(paddr).map_err(|_| out_of_range())?;
        let end = start.checked_add(len).ok_or_else(out_of_range)?;
        Ok((start, end))
    }
}

impl GuestMemory for DenseMemory {
    fn size(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, dst.len())?;
        dst.copy_from_slice(&self.data[start..end]);
        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        let (start, end) = self.range_to_usize(paddr, src.len())?;
        self.data[start..end].copy_from_slice(src);
        Ok(())
    }
}

/// Sparse guest memory backed by lazily-allocated fixed-size chunks.
///
/// Unwritten chunks read as zero. Useful for large guest address spaces where only a few pages
/// (descriptor tables, DMA buffers) are ever touched.
#[derive(Debug, Clone)]
pub struct SparseMemory {
    size: u64,
    chunk_size: usize,
    chunks: Vec<Option<Box<[u8]>>>,
}

impl SparseMemory {
    pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

    pub fn new(size: u64) -> GuestMemoryResult<Self> {
        Self::with_chunk_size(size, Self::DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(size: u64, chunk_size: usize) -> GuestMemoryResult<Self> {
        if chunk_size == 0 {
            return Err(GuestMemoryError::InvalidChunkSize { chunk_size });
        }
        let chunk_size_u64 = chunk_size as u64;
        let chunk_count_u64 = size
            .checked_add(chunk_size_u64 - 1)
            .ok_or(GuestMemoryError::SizeTooLarge { size })?
            / chunk_size_u64;
        let chunk_count = usize::try_from(chunk_count_u64)
            .map_err(|_| GuestMemoryError::SizeTooLarge { size })?;
        Ok(Self {
            size,
            chunk_size,
            chunks: vec![None; chunk_count],
        })
    }

    /// Number of chunks that have been materialized by writes.
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Splits `paddr` into (chunk index, offset in chunk). Callers range-check first.
    #[inline]
    fn split(&self, paddr: u64) -> (usize, usize) {
        let chunk_size_u64 = self.chunk_size as u64;
        let chunk = paddr / chunk_size_u64;
        let offset = paddr % chunk_size_u64;
        // `paddr < size` so both fit: chunk < chunks.len() and offset < chunk_size.
        (chunk as usize, offset as usize)
    }
}

impl GuestMemory for SparseMemory {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_into(&self, paddr: u64, dst: &mut [u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, dst.len())?;
        let mut remaining = dst;
        let mut cur = paddr;

        while !remaining.is_empty() {
            let (chunk_idx, chunk_off) = self.split(cur);
            let take = (self.chunk_size - chunk_off).min(remaining.len());

            match self.chunks.get(chunk_idx).and_then(|c| c.as_ref()) {
                Some(chunk) => {
                    remaining[..take].copy_from_slice(&chunk[chunk_off..chunk_off + take])
                }
                None => remaining[..take].fill(0),
            }

            cur += take as u64;
            remaining = &mut remaining[take..];
        }

        Ok(())
    }

    fn write_from(&mut self, paddr: u64, src: &[u8]) -> GuestMemoryResult<()> {
        check_range(self.size, paddr, src.len())?;
        let mut remaining = src;
        let mut cur = paddr;

        while !remaining.is_empty() {
            let (chunk_idx, chunk_off) = self.split(cur);
            let take = (self.chunk_size - chunk_off).min(remaining.len());
            let chunk_size = self.chunk_size;

            let slot = self
                .chunks
                .get_mut(chunk_idx)
                .ok_or(GuestMemoryError::OutOfRange {
                    paddr: cur,
                    len: take,
                    size: self.size,
                })?;
            let chunk = slot.get_or_insert_with(|| vec![0u8; chunk_size].into_boxed_slice());
            chunk[chunk_off..chunk_off + take].copy_from_slice(&remaining[..take]);

            cur += take as u64;
            remaining = &remaining[take..];
        }

        Ok(())
    }
}
