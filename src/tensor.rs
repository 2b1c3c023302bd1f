//! NCHW f32 tensor over owned or borrowed storage.

use std::sync::Arc;

use crate::error::{MarlinError, MarlinResult};
use crate::mem::{default_allocator, Allocator, Buffer};

/// Backing store of a [`Tensor`].
pub enum Storage<'a> {
    Owned(Buffer<f32>),
    Borrowed(&'a [f32]),
    BorrowedMut(&'a mut [f32]),
}

impl Storage<'_> {
    fn capacity(&self) -> usize {
        match self {
            Storage::Owned(b) => b.len(),
            Storage::Borrowed(s) => s.len(),
            Storage::BorrowedMut(s) => s.len(),
        }
    }
}

pub struct Tensor<'a> {
    storage: Storage<'a>,
    shape: Vec<usize>,
}

impl Tensor<'static> {
    /// Empty owned tensor using `alloc` for its storage.
    pub fn new_in(alloc: Arc<dyn Allocator>) -> Self {
        Tensor { storage: Storage::Owned(Buffer::new_in(alloc)), shape: vec![0] }
    }

    pub fn new() -> Self {
        Self::new_in(default_allocator())
    }

    pub fn zeros(shape: &[usize]) -> MarlinResult<Self> {
        let mut t = Self::new();
        t.resize(shape)?;
        Ok(t)
    }

    /// Owned tensor initialized from `data`, which must hold exactly
    /// `shape.product()` values.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> MarlinResult<Self> {
        check_exact(shape, data.len())?;
        let buf = Buffer::from_slice_in(default_allocator(), &data)?;
        Ok(Tensor { storage: Storage::Owned(buf), shape: shape.to_vec() })
    }
}

impl Default for Tensor<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Tensor<'a> {
    /// Read-only view of caller memory.
    pub fn borrowed(shape: &[usize], data: &'a [f32]) -> MarlinResult<Self> {
        check_fits(shape, data.len())?;
        Ok(Tensor { storage: Storage::Borrowed(data), shape: shape.to_vec() })
    }

    /// Writable view of caller memory.
    pub fn borrowed_mut(shape: &[usize], data: &'a mut [f32]) -> MarlinResult<Self> {
        check_fits(shape, data.len())?;
        Ok(Tensor { storage: Storage::BorrowedMut(data), shape: shape.to_vec() })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Extent of `axis`.
    ///
    /// # Panics
    /// If `axis >= rank()`.
    pub fn dim(&self, axis: usize) -> usize {
        self.shape[axis]
    }

    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Whether the tensor owns its storage.
    pub fn is_owner(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    pub fn data(&self) -> &[f32] {
        let n = self.numel();
        match &self.storage {
            Storage::Owned(b) => &b[..n],
            Storage::Borrowed(s) => &s[..n],
            Storage::BorrowedMut(s) => &s[..n],
        }
    }

    pub fn mutable_data(&mut self) -> MarlinResult<&mut [f32]> {
        let n = self.numel();
        match &mut self.storage {
            Storage::Owned(b) => Ok(&mut b[..n]),
            Storage::BorrowedMut(s) => Ok(&mut s[..n]),
            Storage::Borrowed(_) => {
                Err(MarlinError::invalid("tensor is a read-only borrowed view"))
            }
        }
    }

    /// Change the shape, growing owned storage as needed. Borrowed storage
    /// cannot grow, so the new shape must fit the existing slice.
    pub fn resize(&mut self, shape: &[usize]) -> MarlinResult<()> {
        let need = numel_of(shape)?;
        match &mut self.storage {
            Storage::Owned(b) => {
                if need > b.len() {
                    b.resize(need)?;
                }
            }
            other => check_fits(shape, other.capacity())?,
        }
        self.shape = shape.to_vec();
        Ok(())
    }

    /// Reinterpret the same elements under a new shape.
    pub fn reshape(&mut self, shape: &[usize]) -> MarlinResult<()> {
        let need = numel_of(shape)?;
        if need != self.numel() {
            return Err(MarlinError::invalid(format!(
                "cannot reshape {:?} ({} elements) into {:?} ({} elements)",
                self.shape,
                self.numel(),
                shape,
                need
            )));
        }
        self.shape = shape.to_vec();
        Ok(())
    }

    /// Zero the visible elements.
    pub fn clear(&mut self) -> MarlinResult<()> {
        self.mutable_data()?.fill(0.0);
        Ok(())
    }
}

impl std::fmt::Debug for Tensor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("owner", &self.is_owner())
            .finish()
    }
}

fn numel_of(shape: &[usize]) -> MarlinResult<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| MarlinError::invalid(format!("shape {shape:?} overflows")))
}

fn check_fits(shape: &[usize], available: usize) -> MarlinResult<()> {
    let need = numel_of(shape)?;
    if need > available {
        return Err(MarlinError::invalid(format!(
            "shape {shape:?} needs {} bytes, backing store has {}",
            need * std::mem::size_of::<f32>(),
            available * std::mem::size_of::<f32>()
        )));
    }
    Ok(())
}

fn check_exact(shape: &[usize], available: usize) -> MarlinResult<()> {
    let need = numel_of(shape)?;
    if need != available {
        return Err(MarlinError::invalid(format!(
            "shape {shape:?} needs {need} values, got {available}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_resize_and_dims() {
        let mut t = Tensor::new();
        t.resize(&[2, 3, 4, 5]).unwrap();
        assert_eq!(t.dim(0), 2);
        assert_eq!(t.dim(3), 5);
        assert_eq!(t.numel(), 120);
        assert!(t.data().iter().all(|&v| v == 0.0));
        t.mutable_data().unwrap()[119] = 7.0;
        t.resize(&[1, 1, 2, 2]).unwrap();
        assert_eq!(t.data().len(), 4);
    }

    #[test]
    fn test_borrowed_is_read_only() {
        let data = vec![1.0f32; 8];
        let mut t = Tensor::borrowed(&[2, 4], &data).unwrap();
        assert!(!t.is_owner());
        assert_eq!(t.data()[7], 1.0);
        assert!(t.mutable_data().is_err());
    }

    #[test]
    fn test_borrowed_cannot_outgrow() {
        let mut data = vec![0.0f32; 6];
        let mut t = Tensor::borrowed_mut(&[2, 3], &mut data).unwrap();
        assert!(t.resize(&[1, 4]).is_ok());
        assert!(matches!(t.resize(&[7]), Err(MarlinError::InvalidArgument(_))));
        t.mutable_data().unwrap()[0] = 3.0;
        drop(t);
        assert_eq!(data[0], 3.0);
    }

    #[test]
    fn test_reshape_requires_same_count() {
        let mut t = Tensor::from_vec(&[2, 6], (0..12).map(|v| v as f32).collect()).unwrap();
        t.reshape(&[3, 4]).unwrap();
        assert_eq!(t.shape(), &[3, 4]);
        assert!(t.reshape(&[5, 5]).is_err());
        assert!(Tensor::from_vec(&[2, 2], vec![0.0; 3]).is_err());
    }
}
