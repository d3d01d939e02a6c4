use memmap2::{Mmap, MmapMut};
use parking_lot::RwLock;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use stratadb_core::{Result, StrataError};

/// Configuration for a segmented store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Byte size of every segment file.
    pub segment_size: u64,
    pub read_only: bool,
    /// Try to lock mapped pages in memory; falls back with a warning when
    /// the process lacks the privilege.
    pub lock_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            segment_size: 16 * 1024 * 1024, // 16MB
            read_only: false,
            lock_memory: false,
        }
    }
}

enum Mapping {
    ReadWrite(MmapMut),
    ReadOnly(Mmap),
}

impl Mapping {
    fn len(&self) -> usize {
        match self {
            Mapping::ReadWrite(map) => map.len(),
            Mapping::ReadOnly(map) => map.len(),
        }
    }

    fn as_ptr(&self) -> *const u8 {
        match self {
            Mapping::ReadWrite(map) => map.as_ptr(),
            Mapping::ReadOnly(map) => map.as_ptr(),
        }
    }

    fn flush(&self) -> Result<()> {
        if let Mapping::ReadWrite(map) = self {
            map.flush()?;
        }
        Ok(())
    }
}

/// A logical file that grows as fixed-size, zero-filled, memory-mapped
/// segments named `<base>_0`, `<base>_1`, … inside one directory.
///
/// Offsets are global: segment `offset / segment_size`, in-segment offset
/// `offset % segment_size`. `read_at`/`write_at` split across segment
/// boundaries; `slice_at` must land inside a single segment (callers size
/// their records so that this is automatic).
pub struct SegmentStore {
    dir: PathBuf,
    base: String,
    segment_size: u64,
    read_only: bool,
    lock_memory: bool,
    segments: RwLock<Vec<Mapping>>,
    closed: AtomicBool,
}

impl SegmentStore {
    /// Open the store, mapping every existing segment in order. Missing
    /// segments are created later by `ensure`.
    pub fn open(dir: &Path, base: &str, config: StoreConfig) -> Result<Self> {
        let store = Self {
            dir: dir.to_path_buf(),
            base: base.to_string(),
            segment_size: config.segment_size,
            read_only: config.read_only,
            lock_memory: config.lock_memory,
            segments: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        let mut segments = store.segments.write();
        loop {
            let path = store.segment_path(segments.len());
            if !path.exists() {
                break;
            }
            segments.push(store.map_segment(&path)?);
        }
        drop(segments);

        Ok(store)
    }

    fn segment_path(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}_{}", self.base, index))
    }

    fn map_segment(&self, path: &Path) -> Result<Mapping> {
        if self.read_only {
            let file = OpenOptions::new().read(true).open(path)?;
            let len = file.metadata()?.len();
            if len != self.segment_size {
                return Err(StrataError::Corrupt(format!(
                    "segment {} is {} bytes, expected {}",
                    path.display(),
                    len,
                    self.segment_size
                )));
            }
            let map = unsafe { Mmap::map(&file)? };
            Ok(Mapping::ReadOnly(map))
        } else {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .open(path)?;
            if file.metadata()?.len() != self.segment_size {
                // set_len zero-fills, so fresh segments read as empty records
                file.set_len(self.segment_size)?;
            }
            let map = unsafe { MmapMut::map_mut(&file)? };
            if self.lock_memory {
                if let Err(err) = map.lock() {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "cannot lock segment pages, continuing unlocked"
                    );
                }
            }
            Ok(Mapping::ReadWrite(map))
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    /// Total mapped bytes.
    pub fn size(&self) -> u64 {
        self.segments.read().len() as u64 * self.segment_size
    }

    /// Grow the store until `offset` falls inside a mapped segment.
    pub fn ensure(&self, offset: u64) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(StrataError::Io(
                "cannot grow a read-only segment store".to_string(),
            ));
        }

        {
            let segments = self.segments.read();
            if segments.len() as u64 * self.segment_size > offset {
                return Ok(());
            }
        }

        let mut segments = self.segments.write();
        while segments.len() as u64 * self.segment_size <= offset {
            let path = self.segment_path(segments.len());
            segments.push(self.map_segment(&path)?);
        }
        Ok(())
    }

    /// Borrow `len` bytes at `offset`. The range must lie inside a single
    /// segment. Mappings stay alive until `close`, which drains all readers
    /// through the segment list lock; callers copy out before yielding.
    pub fn slice_at(&self, len: usize, offset: u64) -> Result<&[u8]> {
        self.check_open()?;
        let segments = self.segments.read();
        let index = (offset / self.segment_size) as usize;
        let in_off = (offset % self.segment_size) as usize;
        let segment = segments
            .get(index)
            .ok_or(StrataError::ShortRead { wanted: len, got: 0 })?;
        if in_off + len > segment.len() {
            return Err(StrataError::ShortRead {
                wanted: len,
                got: segment.len().saturating_sub(in_off),
            });
        }
        Ok(unsafe { std::slice::from_raw_parts(segment.as_ptr().add(in_off), len) })
    }

    /// Raw pointer variant of `slice_at` for writable views. The pointed-to
    /// words must only be accessed through atomic operations.
    pub fn ptr_at(&self, len: usize, offset: u64) -> Result<*mut u8> {
        self.check_open()?;
        if self.read_only {
            return Err(StrataError::Io(
                "cannot take a writable view of a read-only segment store".to_string(),
            ));
        }
        let slice = self.slice_at(len, offset)?;
        Ok(slice.as_ptr() as *mut u8)
    }

    /// Copy bytes out of the store, splitting across segments as needed.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.check_open()?;
        let segments = self.segments.read();
        let total = segments.len() as u64 * self.segment_size;
        if offset + buf.len() as u64 > total {
            return Err(StrataError::ShortRead {
                wanted: buf.len(),
                got: total.saturating_sub(offset) as usize,
            });
        }

        let mut copied = 0usize;
        while copied < buf.len() {
            let pos = offset + copied as u64;
            let index = (pos / self.segment_size) as usize;
            let in_off = (pos % self.segment_size) as usize;
            let n = (buf.len() - copied).min(self.segment_size as usize - in_off);
            let segment = &segments[index];
            unsafe {
                std::ptr::copy_nonoverlapping(
                    segment.as_ptr().add(in_off),
                    buf.as_mut_ptr().add(copied),
                    n,
                );
            }
            copied += n;
        }
        Ok(())
    }

    /// Copy bytes into the store, splitting across segments as needed. The
    /// target range must already be covered by `ensure`.
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        self.check_open()?;
        if self.read_only {
            return Err(StrataError::Io(
                "cannot write to a read-only segment store".to_string(),
            ));
        }
        let segments = self.segments.read();
        let total = segments.len() as u64 * self.segment_size;
        if offset + data.len() as u64 > total {
            return Err(StrataError::ShortWrite {
                wanted: data.len(),
                wrote: 0,
            });
        }

        let mut written = 0usize;
        while written < data.len() {
            let pos = offset + written as u64;
            let index = (pos / self.segment_size) as usize;
            let in_off = (pos % self.segment_size) as usize;
            let n = (data.len() - written).min(self.segment_size as usize - in_off);
            let segment = &segments[index];
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr().add(written),
                    segment.as_ptr().add(in_off) as *mut u8,
                    n,
                );
            }
            written += n;
        }
        Ok(())
    }

    /// Flush every mapped segment to disk.
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        let segments = self.segments.read();
        for segment in segments.iter() {
            segment.flush()?;
        }
        Ok(())
    }

    /// Flush and unmap all segments. Further operations return `Closed`.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut segments = self.segments.write();
        let mut result = Ok(());
        for segment in segments.iter() {
            if let Err(err) = segment.flush() {
                result = Err(err);
            }
        }
        segments.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_config(read_only: bool) -> StoreConfig {
        StoreConfig {
            segment_size: 64,
            read_only,
            lock_memory: false,
        }
    }

    #[test]
    fn test_ensure_grows_by_segments() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), "block", small_config(false)).unwrap();
        assert_eq!(store.size(), 0);

        store.ensure(0).unwrap();
        assert_eq!(store.size(), 64);
        assert!(dir.path().join("block_0").exists());

        store.ensure(130).unwrap();
        assert_eq!(store.size(), 192);
        assert!(dir.path().join("block_2").exists());
    }

    #[test]
    fn test_write_read_across_boundary() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), "block", small_config(false)).unwrap();
        store.ensure(127).unwrap();

        let data: Vec<u8> = (0..32).collect();
        store.write_at(&data, 48).unwrap();

        let mut buf = vec![0u8; 32];
        store.read_at(&mut buf, 48).unwrap();
        assert_eq!(buf, data);
    }

    #[test]
    fn test_slice_within_segment() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), "block", small_config(false)).unwrap();
        store.ensure(0).unwrap();
        store.write_at(&[7u8; 16], 16).unwrap();

        let slice = store.slice_at(16, 16).unwrap();
        assert_eq!(slice, &[7u8; 16]);

        // crossing the segment boundary is a short read
        assert!(matches!(
            store.slice_at(32, 48),
            Err(StrataError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_read_only_refuses_growth() {
        let dir = TempDir::new().unwrap();
        {
            let store = SegmentStore::open(dir.path(), "block", small_config(false)).unwrap();
            store.ensure(0).unwrap();
            store.write_at(&[1u8; 8], 0).unwrap();
            store.close().unwrap();
        }

        let store = SegmentStore::open(dir.path(), "block", small_config(true)).unwrap();
        assert_eq!(store.size(), 64);
        assert!(store.ensure(100).is_err());
        assert!(store.write_at(&[0u8; 4], 0).is_err());

        let mut buf = vec![0u8; 8];
        store.read_at(&mut buf, 0).unwrap();
        assert_eq!(buf, [1u8; 8]);
    }

    #[test]
    fn test_short_read_past_end() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), "block", small_config(false)).unwrap();
        store.ensure(0).unwrap();

        let mut buf = vec![0u8; 16];
        assert!(matches!(
            store.read_at(&mut buf, 56),
            Err(StrataError::ShortRead { wanted: 16, got: 8 })
        ));
    }

    #[test]
    fn test_closed_store_errors() {
        let dir = TempDir::new().unwrap();
        let store = SegmentStore::open(dir.path(), "block", small_config(false)).unwrap();
        store.ensure(0).unwrap();
        store.close().unwrap();

        assert!(matches!(store.ensure(0), Err(StrataError::Closed)));
        let mut buf = [0u8; 4];
        assert!(matches!(
            store.read_at(&mut buf, 0),
            Err(StrataError::Closed)
        ));
    }
}
