//! Executable pages holding one generated program.
//!
//! A program is committed by mapping an anonymous RW region, copying the code
//! in and flipping the region to RX, or by mapping a persisted `.cs` file
//! read+execute. Either way the region is immutable once a [`Codelet`] exists.

use std::fs::File;

use memmap2::{Mmap, MmapOptions};

use crate::error::{MarlinError, MarlinResult};

enum Region {
    Anonymous { ptr: *mut u8, len: usize },
    File(Mmap),
}

/// Single owner of one executable mapping. Not `Clone`; dropping unmaps.
pub struct Codelet {
    region: Region,
    code_len: usize,
}

// SAFETY: the mapping is owned exclusively and is read+execute only after
// construction, so shared references never observe a write.
unsafe impl Send for Codelet {}
unsafe impl Sync for Codelet {}

impl Codelet {
    /// Copy `code` into a fresh executable page.
    pub fn commit(code: &[u8]) -> MarlinResult<Self> {
        if code.is_empty() {
            return Err(MarlinError::invalid("cannot commit an empty program"));
        }
        let len = round_to_page(code.len());

        // SAFETY: private anonymous mapping, no fd; MAP_FAILED is checked.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MarlinError::Resource(format!(
                "mmap of {len} bytes failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        let ptr = ptr as *mut u8;

        // SAFETY: the region is at least code.len() bytes and writable.
        unsafe {
            std::ptr::copy_nonoverlapping(code.as_ptr(), ptr, code.len());
        }

        let ret = unsafe { libc::mprotect(ptr as *mut _, len, libc::PROT_READ | libc::PROT_EXEC) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            unsafe {
                libc::munmap(ptr as *mut _, len);
            }
            return Err(MarlinError::Resource(format!("mprotect to RX failed: {err}")));
        }

        log::debug!("committed {} code bytes to a {len} byte page", code.len());
        Ok(Codelet { region: Region::Anonymous { ptr, len }, code_len: code.len() })
    }

    /// Map a persisted program read+execute. The file must hold exactly
    /// `code_len` bytes.
    pub fn map_file(file: &File, code_len: usize) -> MarlinResult<Self> {
        let on_disk = file.metadata()?.len();
        if code_len == 0 || on_disk != code_len as u64 {
            return Err(MarlinError::Domain(format!(
                "code file holds {on_disk} bytes, offsets describe {code_len}"
            )));
        }
        // SAFETY: the mapping is read-only; the file is not expected to be
        // modified while mapped.
        let map = unsafe { MmapOptions::new().len(code_len).map_exec(file) }
            .map_err(|e| MarlinError::Resource(format!("executable file mapping failed: {e}")))?;
        Ok(Codelet { region: Region::File(map), code_len })
    }

    #[inline]
    pub fn as_ptr(&self) -> *const u8 {
        match &self.region {
            Region::Anonymous { ptr, .. } => *ptr as *const u8,
            Region::File(map) => map.as_ptr(),
        }
    }

    /// Mapped size; `code_len` rounded up to whole pages.
    pub fn page_size_bytes(&self) -> usize {
        match &self.region {
            Region::Anonymous { len, .. } => *len,
            Region::File(_) => round_to_page(self.code_len),
        }
    }

    pub fn code_len(&self) -> usize {
        self.code_len
    }

    /// The committed instruction bytes.
    pub fn code(&self) -> &[u8] {
        // SAFETY: the first code_len bytes of the region are initialized and
        // stay readable for the lifetime of self.
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.code_len) }
    }
}

impl Drop for Codelet {
    fn drop(&mut self) {
        if let Region::Anonymous { ptr, len } = self.region {
            unsafe {
                libc::munmap(ptr as *mut _, len);
            }
        }
    }
}

impl std::fmt::Debug for Codelet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Codelet")
            .field("addr", &self.as_ptr())
            .field("code_len", &self.code_len)
            .field("page_size_bytes", &self.page_size_bytes())
            .field("file_backed", &matches!(self.region, Region::File(_)))
            .finish()
    }
}

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

fn round_to_page(len: usize) -> usize {
    let page = page_size();
    len.div_ceil(page) * page
}
