//! Memory-mapped node storage.
//!
//! The file is mapped read/write shared, so the in-memory graph and the
//! on-disk graph are the same bytes: there is no serialization step, and a
//! flush is just the OS writing dirty pages back. The file has no header:
//! byte `i * NODE_SIZE` is the `i`-th record, and zero-filled regions from
//! file extension are absent nodes.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::Result;

/// A file owned and mapped in its entirety.
pub struct MmapFile {
    path: PathBuf,
    file: File,
    map: MmapMut,
}

impl MmapFile {
    /// Open or create `path`, grow it to at least `min_size` bytes, and map
    /// the full length read/write shared. Parent directories are created if
    /// needed.
    pub fn open<P: AsRef<Path>>(path: P, min_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if file.metadata()?.len() < min_size {
            file.set_len(min_size)?;
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        tracing::debug!(path = %path.display(), bytes = map.len(), "mapped node file");

        Ok(Self { path, file, map })
    }

    /// Current mapped length in bytes.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    /// Base address of the mapping.
    ///
    /// The region is shared mutable state: record creation writes through
    /// this pointer before the record is published, and later neighbor-list
    /// edits go through the atomics embedded in each record. Callers must
    /// not hold a derived pointer across [`resize`](Self::resize).
    pub fn as_ptr(&self) -> *mut u8 {
        self.map.as_ptr().cast_mut()
    }

    /// Grow the file to `new_size` and remap.
    ///
    /// Invalidates every pointer previously derived from the mapping. The
    /// engine serializes this behind its resize lock and re-derives node
    /// pointers from the base on every access.
    pub fn resize(&mut self, new_size: u64) -> Result<()> {
        self.map.flush()?;
        self.file.set_len(new_size)?;
        self.map = unsafe { MmapMut::map_mut(&self.file)? };
        tracing::debug!(path = %self.path.display(), bytes = new_size, "grew node file");
        Ok(())
    }

    /// Flush dirty pages and unmap. Consuming `self` makes a double close
    /// unrepresentable; dropping without calling this still unmaps, relying
    /// on the OS to write back.
    pub fn close(self) -> Result<()> {
        self.map.flush()?;
        Ok(())
    }
}
