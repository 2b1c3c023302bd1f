//! Generated instruction bytes plus the offset of every fragment.

use std::ops::Range;
use std::sync::Arc;

use crate::error::{MarlinError, MarlinResult};
use crate::mem::{default_allocator, Allocator, Buffer};

/// `code` holds the concatenated fragments; `offsets[i]..offsets[i + 1]` is
/// fragment `i`. `offsets[0] == 0` and `offsets.last() == code.len()`.
pub struct ByteCode {
    code: Buffer<u8>,
    offsets: Buffer<u64>,
}

impl ByteCode {
    pub fn new_in(alloc: Arc<dyn Allocator>) -> Self {
        Self { code: Buffer::new_in(alloc.clone()), offsets: Buffer::new_in(alloc) }
    }

    pub fn new() -> Self {
        Self::new_in(default_allocator())
    }

    /// Rebuild from persisted parts, checking the layout invariants.
    pub fn from_parts(code: &[u8], offsets: &[u64], alloc: Arc<dyn Allocator>) -> MarlinResult<Self> {
        let bc = Self {
            code: Buffer::from_slice_in(alloc.clone(), code)?,
            offsets: Buffer::from_slice_in(alloc, offsets)?,
        };
        bc.validate()?;
        Ok(bc)
    }

    /// Reset for a program of exactly `code_size` bytes and `fragments` fragments.
    pub(crate) fn begin(&mut self, code_size: usize, fragments: usize) -> MarlinResult<()> {
        self.code.clear();
        self.offsets.clear();
        self.code.reserve(code_size)?;
        self.offsets.reserve(fragments + 1)?;
        self.offsets.push(0)
    }

    /// Append one complete fragment and record where the next one starts.
    pub(crate) fn push_fragment(&mut self, bytes: &[u8]) -> MarlinResult<()> {
        self.code.extend_from_slice(bytes)?;
        self.offsets.push(self.code.len() as u64)
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn fragment_range(&self, idx: usize) -> MarlinResult<Range<usize>> {
        if idx >= self.fragment_count() {
            return Err(MarlinError::OutOfRange { requested: idx, limit: self.fragment_count() });
        }
        Ok(self.offsets[idx] as usize..self.offsets[idx + 1] as usize)
    }

    pub fn fragment(&self, idx: usize) -> MarlinResult<&[u8]> {
        let r = self.fragment_range(idx)?;
        Ok(&self.code[r])
    }

    /// Check the offset table against the code buffer.
    pub fn validate(&self) -> MarlinResult<()> {
        validate_offsets(&self.offsets, self.code.len())
    }

    /// FNV-1a over the code bytes.
    pub fn content_hash(&self) -> u64 {
        fnv1a(&self.code)
    }
}

impl Default for ByteCode {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ByteCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteCode")
            .field("code_len", &self.code.len())
            .field("fragments", &self.fragment_count())
            .field("hash", &format_args!("{:016x}", self.content_hash()))
            .finish()
    }
}

pub(crate) fn validate_offsets(offsets: &[u64], code_len: usize) -> MarlinResult<()> {
    match offsets.first() {
        Some(0) => {}
        Some(&o) => {
            return Err(MarlinError::Internal(format!("first offset is {o}, expected 0")));
        }
        None => return Err(MarlinError::Internal("empty offset table".into())),
    }
    if let Some(i) = offsets.windows(2).position(|w| w[1] < w[0]) {
        return Err(MarlinError::Internal(format!(
            "offsets decrease at fragment {i}: {} -> {}",
            offsets[i],
            offsets[i + 1]
        )));
    }
    let last = offsets[offsets.len() - 1];
    if last != code_len as u64 {
        return Err(MarlinError::Internal(format!(
            "last offset {last} does not match code length {code_len}"
        )));
    }
    Ok(())
}

pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325; // FNV offset basis
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3); // FNV prime
    }
    h
}
