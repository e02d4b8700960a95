/// A memory-mapped register region.
///
/// `offset` is relative to the start of the region and `size` is the access width in bytes
/// (1, 2, 4 or 8). Reads return the value zero-extended to `u64`; writes pass the value in the
/// low `size` bytes of `value`.
///
/// Both methods take `&mut self` because register reads may have side effects on real hardware.
pub trait MmioHandler {
    fn read(&mut self, offset: u64, size: usize) -> u64;
    fn write(&mut self, offset: u64, size: usize, value: u64);
}

impl<T: MmioHandler + ?Sized> MmioHandler for Box<T> {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        <T as MmioHandler>::read(&mut **self, offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        <T as MmioHandler>::write(&mut **self, offset, size, value);
    }
}

impl<T: MmioHandler + ?Sized> MmioHandler for &mut T {
    fn read(&mut self, offset: u64, size: usize) -> u64 {
        <T as MmioHandler>::read(&mut **self, offset, size)
    }

    fn write(&mut self, offset: u64, size: usize, value: u64) {
        <T as MmioHandler>::write(&mut **self, offset, size, value);
    }
}
