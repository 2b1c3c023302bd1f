//! Growable aligned buffer.

use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

use super::allocator::{default_allocator, Allocator};
use crate::error::{MarlinError, MarlinResult};

mod sealed {
    pub trait Sealed {}
}

/// Plain-old-data element types whose all-zero bit pattern is a valid value.
pub trait Element: sealed::Sealed + Copy + Default + Send + Sync + 'static {}

macro_rules! impl_element {
    ($($t:ty),*) => {
        $(
            impl sealed::Sealed for $t {}
            impl Element for $t {}
        )*
    };
}

impl_element!(f32, u8, u16, u32, u64, i32);

/// Aligned, growable array of `T` backed by an injected allocator.
pub struct Buffer<T: Element> {
    ptr: NonNull<T>,
    len: usize,
    cap: usize,
    alloc: Arc<dyn Allocator>,
}

// SAFETY: Buffer exclusively owns its allocation; T is Send + Sync.
unsafe impl<T: Element> Send for Buffer<T> {}
unsafe impl<T: Element> Sync for Buffer<T> {}

impl<T: Element> Buffer<T> {
    pub fn new_in(alloc: Arc<dyn Allocator>) -> Self {
        Self { ptr: NonNull::dangling(), len: 0, cap: 0, alloc }
    }

    pub fn new() -> Self {
        Self::new_in(default_allocator())
    }

    /// `len` zero-initialized elements.
    pub fn zeroed_in(alloc: Arc<dyn Allocator>, len: usize) -> MarlinResult<Self> {
        let mut buf = Self::new_in(alloc);
        buf.resize(len)?;
        Ok(buf)
    }

    pub fn from_slice_in(alloc: Arc<dyn Allocator>, src: &[T]) -> MarlinResult<Self> {
        let mut buf = Self::new_in(alloc);
        buf.extend_from_slice(src)?;
        Ok(buf)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn allocator(&self) -> &Arc<dyn Allocator> {
        &self.alloc
    }

    #[inline]
    pub fn as_slice(&self) -> &[T] {
        // SAFETY: [0, len) is initialized; dangling is fine for len == 0.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: as above, and &mut self guarantees uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    /// Grow to at least `new_cap` elements, preserving existing data.
    pub fn reserve(&mut self, new_cap: usize) -> MarlinResult<()> {
        if new_cap <= self.cap {
            return Ok(());
        }
        let elem = std::mem::size_of::<T>();
        if self.alloc.alignment() < std::mem::align_of::<T>() {
            return Err(MarlinError::invalid(format!(
                "allocator alignment {} below element alignment {}",
                self.alloc.alignment(),
                std::mem::align_of::<T>()
            )));
        }
        let bytes = new_cap.checked_mul(elem).ok_or_else(|| {
            MarlinError::Resource(format!("buffer of {new_cap} elements overflows"))
        })?;
        let raw = self.alloc.allocate(bytes)?;
        let new_ptr = raw.cast::<T>();
        if self.len > 0 {
            // SAFETY: both regions are valid for len elements and distinct.
            unsafe {
                std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), new_ptr.as_ptr(), self.len);
            }
        }
        self.release();
        self.ptr = new_ptr;
        self.cap = new_cap;
        Ok(())
    }

    /// Set the length; new elements are zero.
    pub fn resize(&mut self, len: usize) -> MarlinResult<()> {
        if len > self.cap {
            self.reserve(len)?;
        }
        if len > self.len {
            // SAFETY: [self.len, len) is within capacity; zero is a valid T.
            unsafe {
                std::ptr::write_bytes(self.ptr.as_ptr().add(self.len), 0, len - self.len);
            }
        }
        self.len = len;
        Ok(())
    }

    pub fn push(&mut self, value: T) -> MarlinResult<()> {
        if self.len == self.cap {
            self.reserve((self.cap * 2).max(16))?;
        }
        // SAFETY: len < cap after the reserve above.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
        Ok(())
    }

    pub fn extend_from_slice(&mut self, src: &[T]) -> MarlinResult<()> {
        let need = self.len + src.len();
        if need > self.cap {
            self.reserve(need.max(self.cap * 2))?;
        }
        // SAFETY: capacity covers need; src cannot alias our allocation
        // because we hold &mut self.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.ptr.as_ptr().add(self.len), src.len());
        }
        self.len = need;
        Ok(())
    }

    /// Drop contents, keep capacity.
    pub fn clear(&mut self) {
        self.len = 0;
    }

    fn release(&mut self) {
        if self.cap > 0 {
            let bytes = self.cap * std::mem::size_of::<T>();
            // SAFETY: ptr/bytes are exactly what reserve obtained from alloc.
            unsafe { self.alloc.deallocate(self.ptr.cast::<u8>(), bytes) };
        }
    }
}

impl<T: Element> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: Element> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Element> Deref for Buffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Element> DerefMut for Buffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Element + std::fmt::Debug> std::fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len)
            .field("cap", &self.cap)
            .field("alloc", &self.alloc)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::CpuAllocator;

    #[test]
    fn test_push_and_grow() {
        let mut buf: Buffer<u32> = Buffer::new();
        for i in 0..100 {
            buf.push(i).unwrap();
        }
        assert_eq!(buf.len(), 100);
        assert!(buf.capacity() >= 100);
        assert_eq!(buf[57], 57);
        assert_eq!(buf.as_ptr() as usize % CpuAllocator::DEFAULT_ALIGN, 0);
    }

    #[test]
    fn test_resize_zero_fills() {
        let mut buf = Buffer::from_slice_in(default_allocator(), &[1.0f32, 2.0]).unwrap();
        buf.resize(5).unwrap();
        assert_eq!(buf.as_slice(), &[1.0, 2.0, 0.0, 0.0, 0.0]);
        buf.resize(1).unwrap();
        assert_eq!(buf.as_slice(), &[1.0]);
        buf.resize(3).unwrap();
        assert_eq!(buf.as_slice(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buf: Buffer<u8> = Buffer::zeroed_in(default_allocator(), 4096).unwrap();
        let cap = buf.capacity();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);
    }

    #[test]
    fn test_injected_allocator_alignment() {
        let alloc: Arc<dyn Allocator> = Arc::new(CpuAllocator::new(256).unwrap());
        let buf: Buffer<f32> = Buffer::zeroed_in(alloc, 33).unwrap();
        assert_eq!(buf.as_ptr() as usize % 256, 0);
        assert_eq!(buf.allocator().alignment(), 256);
    }
}
