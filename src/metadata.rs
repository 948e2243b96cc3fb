//! Append-only metadata side store.
//!
//! Payloads are opaque bytes framed as `(u32 little-endian length, bytes)`
//! records in append order, with an in-memory table mapping identifier to
//! `(offset, length)`. The file carries no identifiers: recovery assigns
//! `0, 1, 2, …` in file order, which is only correct when records were
//! appended in identifier order starting at zero. The store is a side
//! channel: the engine never reads it during graph traversal.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use parking_lot::Mutex;

use crate::error::Result;

const LEN_PREFIX: u64 = 4;

struct StoreInner {
    file: File,
    /// `(offset, length)` per identifier slot; length 0 means no payload.
    offsets: Vec<(u64, u32)>,
}

/// Variable-length per-identifier payload store.
///
/// Saves and reads both serialize through one writer lock, matching the
/// short critical sections of a side-channel lookup.
pub struct MetadataStore {
    inner: Mutex<StoreInner>,
}

impl MetadataStore {
    /// Open or create the store and rebuild the offset table by scanning
    /// the file from the start.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let offsets = rebuild_offsets(&mut file)?;
        if !offsets.is_empty() {
            tracing::debug!(path = %path.display(), records = offsets.len(), "recovered metadata offsets");
        }

        Ok(Self {
            inner: Mutex::new(StoreInner { file, offsets }),
        })
    }

    /// Append a payload for `id`. An empty payload is a no-op. A later save
    /// for the same identifier appends a new record and shadows the earlier
    /// offset.
    pub fn save(&self, id: u32, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let offset = inner.file.seek(SeekFrom::End(0))?;
        inner.file.write_u32::<LittleEndian>(payload.len() as u32)?;
        inner.file.write_all(payload)?;
        inner.file.flush()?;

        let slot = id as usize;
        if slot >= inner.offsets.len() {
            inner.offsets.resize(slot + 1, (0, 0));
        }
        inner.offsets[slot] = (offset, payload.len() as u32);
        Ok(())
    }

    /// The most recently saved payload for `id`, or empty if none exists.
    pub fn get(&self, id: u32) -> Vec<u8> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let (offset, length) = match inner.offsets.get(id as usize) {
            Some(&entry) => entry,
            None => return Vec::new(),
        };
        if length == 0 {
            return Vec::new();
        }

        let mut payload = vec![0u8; length as usize];
        let read = inner
            .file
            .seek(SeekFrom::Start(offset + LEN_PREFIX))
            .and_then(|_| inner.file.read_exact(&mut payload));
        match read {
            Ok(()) => payload,
            Err(err) => {
                tracing::error!(id, %err, "failed to read metadata record");
                Vec::new()
            }
        }
    }
}

/// Scan `(length, bytes)` records from the start, assigning identifiers in
/// file order. A truncated tail record ends the scan.
fn rebuild_offsets(file: &mut File) -> Result<Vec<(u64, u32)>> {
    let total = file.metadata()?.len();
    let mut offsets = Vec::new();
    let mut pos = 0u64;

    file.seek(SeekFrom::Start(0))?;
    while pos + LEN_PREFIX <= total {
        let length = file.read_u32::<LittleEndian>()? as u64;
        if pos + LEN_PREFIX + length > total {
            break;
        }
        offsets.push((pos, length as u32));
        pos += LEN_PREFIX + length;
        file.seek(SeekFrom::Start(pos))?;
    }

    Ok(offsets)
}
