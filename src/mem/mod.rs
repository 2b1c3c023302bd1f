//! Memory containers: injectable aligned allocator and growable buffers.

pub mod allocator;
pub mod buffer;

pub use allocator::{default_allocator, Allocator, CpuAllocator};
pub use buffer::{Buffer, Element};
