//! Memory Mapping
//!
//! Thin wrapper around a memory-mapped backing file. The producer side
//! maps the whole file once and hands out raw access to disjoint byte
//! spans plus atomic views of the cursor words embedded in the header.
//! Concurrent writers only ever touch spans they reserved through a
//! cursor, so plain pointer copies are safe without a lock around the
//! mapping itself.

use memmap2::MmapRaw;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64};
use tracing::{debug, info, warn};

use crate::error::{ExporterError, ExporterResult};

/// A memory-mapped file sized once at creation
#[derive(Debug)]
pub struct MappedFile {
    /// The file path
    pub path: PathBuf,
    /// Keeps the mapping's backing file open
    file: File,
    /// The raw memory map
    map: MmapRaw,
    /// File size in bytes
    size: u64,
}

impl MappedFile {
    /// Create a new backing file of `size` bytes and map it.
    ///
    /// An existing file at `path` is truncated. The fresh mapping reads
    /// as all zeroes.
    pub fn create<P: AsRef<Path>>(path: P, size: u64) -> ExporterResult<Self> {
        let path = path.as_ref().to_path_buf();

        info!("creating exporter file at {:?} with size {} bytes", path, size);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| ExporterError::io(e, &path))?;

        file.set_len(size)
            .map_err(|e| ExporterError::io(e, &path))?;

        let map = MmapRaw::map_raw(&file).map_err(|e| ExporterError::io(e, &path))?;

        Ok(MappedFile {
            path,
            file,
            map,
            size,
        })
    }

    /// Map an existing exporter file read-write.
    pub fn open<P: AsRef<Path>>(path: P) -> ExporterResult<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            return Err(ExporterError::io(
                std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
                &path,
            ));
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| ExporterError::io(e, &path))?;

        let size = file
            .metadata()
            .map_err(|e| ExporterError::io(e, &path))?
            .len();
        if size == 0 {
            return Err(ExporterError::CorruptFile {
                path: path.clone(),
                detail: "file is empty".to_string(),
            });
        }

        let map = MmapRaw::map_raw(&file).map_err(|e| ExporterError::io(e, &path))?;

        debug!("opened exporter file at {:?} with size {} bytes", path, size);

        Ok(MappedFile {
            path,
            file,
            map,
            size,
        })
    }

    /// Size of the mapping in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn check_span(&self, offset: u64, len: usize) -> ExporterResult<()> {
        if offset + len as u64 > self.size {
            return Err(ExporterError::invalid(format!(
                "access of {len} bytes at offset {offset} beyond mapped size {}",
                self.size
            )));
        }
        Ok(())
    }

    /// Copy `data` into the mapping at `offset`.
    ///
    /// Callers must hold a reservation for the span (or be the only
    /// writer, as during header initialization).
    pub fn write_at(&self, offset: u64, data: &[u8]) -> ExporterResult<()> {
        self.check_span(offset, data.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.map.as_mut_ptr().add(offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// Copy `len` bytes out of the mapping at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> ExporterResult<Vec<u8>> {
        self.check_span(offset, len)?;
        let mut out = vec![0u8; len];
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.map.as_ptr().add(offset as usize),
                out.as_mut_ptr(),
                len,
            );
        }
        Ok(out)
    }

    /// Atomic view of the 64-bit word at `offset`. The offset must be
    /// 8-byte aligned and inside the mapping.
    pub fn atomic_u64(&self, offset: u64) -> &AtomicU64 {
        debug_assert!(offset % 8 == 0, "unaligned u64 at offset {offset}");
        debug_assert!(offset + 8 <= self.size);
        unsafe { &*(self.map.as_ptr().add(offset as usize) as *const AtomicU64) }
    }

    /// Atomic view of the 32-bit word at `offset`. The offset must be
    /// 4-byte aligned and inside the mapping.
    pub fn atomic_u32(&self, offset: u64) -> &AtomicU32 {
        debug_assert!(offset % 4 == 0, "unaligned u32 at offset {offset}");
        debug_assert!(offset + 4 <= self.size);
        unsafe { &*(self.map.as_ptr().add(offset as usize) as *const AtomicU32) }
    }

    /// Flush the mapping to disk.
    pub fn flush(&self) -> ExporterResult<()> {
        self.map
            .flush()
            .map_err(|e| ExporterError::io(e, &self.path))?;
        self.file
            .sync_all()
            .map_err(|e| ExporterError::io(e, &self.path))?;
        debug!("flushed exporter file {:?}", self.path);
        Ok(())
    }
}

impl Drop for MappedFile {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!("failed to flush exporter file {:?} on drop: {}", self.path, e);
        }
    }
}
