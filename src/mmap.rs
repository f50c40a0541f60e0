//! Thin wrapper over a read-write memory mapping of a single file.

use std::fs::{File, OpenOptions};
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

use crate::error::Result;

pub struct MmapFile {
    file: File,
    mmap: MmapMut,
}

impl MmapFile {
    /// Create (or truncate) `path` to exactly `len` bytes and map it.
    pub fn create(path: &Path, len: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file.set_len(len)?;
        let mmap = unsafe { MmapOptions::new().len(len as usize).map_mut(&file)? };
        Ok(Self { file, mmap })
    }

    /// Open an existing file and map its first `len` bytes.
    pub fn open(path: &Path, len: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapOptions::new().len(len as usize).map_mut(&file)? };
        Ok(Self { file, mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap[..]
    }

    pub fn range_mut(&mut self, start: usize, end: usize) -> &mut [u8] {
        &mut self.mmap[start..end]
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }

    pub fn sync(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    pub fn flush_async(&self) -> Result<()> {
        self.mmap.flush_async()?;
        Ok(())
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn truncate(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    pub fn mlock(&self) -> Result<()> {
        let ret = unsafe { libc::mlock(self.mmap.as_ptr() as *const libc::c_void, self.mmap.len()) };
        if ret != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn mlock(&self) -> Result<()> {
        Ok(())
    }
}
