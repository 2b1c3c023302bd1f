//! Aligned allocation behind an injectable trait.
//!
//! Containers take an `Arc<dyn Allocator>` at construction. There is no
//! process-wide allocator object; [`default_allocator`] builds the standard
//! 64-byte aligned CPU allocator on demand.

use std::alloc::Layout;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::{MarlinError, MarlinResult};

pub trait Allocator: Send + Sync + fmt::Debug {
    /// Alignment in bytes of every block returned by [`Allocator::allocate`].
    fn alignment(&self) -> usize;

    /// Allocate `bytes` (> 0) uninitialized bytes.
    fn allocate(&self, bytes: usize) -> MarlinResult<NonNull<u8>>;

    /// Release a block.
    ///
    /// # Safety
    /// `ptr` must come from `allocate` on this allocator with the same `bytes`,
    /// and must not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize);
}

/// System-heap allocator with a fixed power-of-two alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuAllocator {
    align: usize,
}

impl CpuAllocator {
    /// One cache line; also the width of a zmm register.
    pub const DEFAULT_ALIGN: usize = 64;

    pub fn new(align: usize) -> MarlinResult<Self> {
        if align == 0 || !align.is_power_of_two() {
            return Err(MarlinError::invalid(format!(
                "allocator alignment must be a power of two, got {align}"
            )));
        }
        Ok(Self { align })
    }

    fn layout(&self, bytes: usize) -> MarlinResult<Layout> {
        Layout::from_size_align(bytes, self.align).map_err(|e| {
            MarlinError::Resource(format!("bad layout for {bytes} bytes: {e}"))
        })
    }
}

impl Default for CpuAllocator {
    fn default() -> Self {
        Self { align: Self::DEFAULT_ALIGN }
    }
}

impl Allocator for CpuAllocator {
    fn alignment(&self) -> usize {
        self.align
    }

    fn allocate(&self, bytes: usize) -> MarlinResult<NonNull<u8>> {
        if bytes == 0 {
            return Err(MarlinError::invalid("zero-sized allocation"));
        }
        let layout = self.layout(bytes)?;
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { std::alloc::alloc(layout) };
        NonNull::new(ptr).ok_or_else(|| {
            MarlinError::Resource(format!("allocation of {bytes} bytes failed"))
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        if let Ok(layout) = self.layout(bytes) {
            std::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// The default aligned CPU allocator.
pub fn default_allocator() -> Arc<dyn Allocator> {
    Arc::new(CpuAllocator::default())
}
