use crossbeam::channel::{bounded, tick, Sender};
use crossbeam::select;
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use stratadb_core::{DatabaseParams, Result, StrataError};

/// On-disk size of the metadata record: seven little-endian 64-bit fields
/// at offsets 0..56, crc32 of those 56 bytes at offset 56, zero padding to
/// the end.
pub const METADATA_LEN: usize = 64;

const FLUSH_INTERVAL: Duration = Duration::from_millis(200);

struct MetadataInner {
    map: Mutex<MmapMut>,
    record: RwLock<DatabaseParams>,
    dirty: AtomicBool,
}

impl MetadataInner {
    fn flush(&self) -> Result<()> {
        // coalesce: one msync covers every write since the last flush
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.map.lock().flush()?;
        }
        Ok(())
    }
}

struct Flusher {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// The durable parameter record, memory-mapped and mutated in place. A
/// background flusher coalesces sync requests behind a dirty flag.
pub struct Metadata {
    inner: Arc<MetadataInner>,
    flusher: Mutex<Option<Flusher>>,
}

impl Metadata {
    /// Open or create the metadata file. An empty file is initialized with
    /// the all-zero template; the caller fills zero fields with defaults
    /// and validates the result.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            file.set_len(METADATA_LEN as u64)?;
        } else if len != METADATA_LEN as u64 {
            return Err(StrataError::Corrupt(format!(
                "metadata file is {} bytes, expected {}",
                len, METADATA_LEN
            )));
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        let record = decode(&map)?;
        let inner = Arc::new(MetadataInner {
            map: Mutex::new(map),
            record: RwLock::new(record),
            dirty: AtomicBool::new(false),
        });

        Ok(Self {
            flusher: Mutex::new(Some(spawn_flusher(Arc::clone(&inner)))),
            inner,
        })
    }

    pub fn read(&self) -> DatabaseParams {
        *self.inner.record.read()
    }

    /// Mutate the record in place and re-encode it into the map. The write
    /// hits disk on the next flusher tick (or an explicit `flush`).
    pub fn update(&self, apply: impl FnOnce(&mut DatabaseParams)) -> Result<()> {
        let mut record = self.inner.record.write();
        apply(&mut record);
        encode(&record, &mut self.inner.map.lock());
        self.inner.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    /// Stop the flusher and issue a final flush.
    pub fn close(&self) -> Result<()> {
        if let Some(flusher) = self.flusher.lock().take() {
            drop(flusher.shutdown);
            let _ = flusher.handle.join();
        }
        self.inner.flush()
    }
}

fn spawn_flusher(inner: Arc<MetadataInner>) -> Flusher {
    let (shutdown, shutdown_rx) = bounded::<()>(0);
    let handle = std::thread::Builder::new()
        .name("strata-metadata-flush".to_string())
        .spawn(move || {
            let ticker = tick(FLUSH_INTERVAL);
            loop {
                select! {
                    recv(ticker) -> _ => {
                        if let Err(err) = inner.flush() {
                            tracing::warn!(error = %err, "metadata flush failed");
                        }
                    }
                    recv(shutdown_rx) -> _ => break,
                }
            }
        })
        .expect("failed to spawn metadata flusher");
    Flusher { shutdown, handle }
}

fn decode(map: &MmapMut) -> Result<DatabaseParams> {
    let word = |i: usize| -> u64 {
        u64::from_le_bytes(map[i * 8..(i + 1) * 8].try_into().unwrap())
    };
    let record = DatabaseParams {
        duration: word(0) as i64,
        retention: word(1) as i64,
        resolution: word(2) as i64,
        payload_size: word(3),
        segment_size: word(4),
        max_ro_epochs: word(5),
        max_rw_epochs: word(6),
    };

    let any_set = map[..56].iter().any(|&b| b != 0);
    if any_set {
        let stored = u32::from_le_bytes(map[56..60].try_into().unwrap());
        let computed = crc32fast::hash(&map[..56]);
        if stored != computed {
            return Err(StrataError::Corrupt(format!(
                "metadata checksum mismatch: stored {:08x}, computed {:08x}",
                stored, computed
            )));
        }
    }
    Ok(record)
}

fn encode(record: &DatabaseParams, map: &mut MmapMut) {
    let mut buf = [0u8; METADATA_LEN];
    buf[0..8].copy_from_slice(&(record.duration as u64).to_le_bytes());
    buf[8..16].copy_from_slice(&(record.retention as u64).to_le_bytes());
    buf[16..24].copy_from_slice(&(record.resolution as u64).to_le_bytes());
    buf[24..32].copy_from_slice(&record.payload_size.to_le_bytes());
    buf[32..40].copy_from_slice(&record.segment_size.to_le_bytes());
    buf[40..48].copy_from_slice(&record.max_ro_epochs.to_le_bytes());
    buf[48..56].copy_from_slice(&record.max_rw_epochs.to_le_bytes());
    let crc = crc32fast::hash(&buf[..56]);
    buf[56..60].copy_from_slice(&crc.to_le_bytes());
    map[..METADATA_LEN].copy_from_slice(&buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fresh_file_is_zero_template() {
        let dir = TempDir::new().unwrap();
        let metadata = Metadata::open(&dir.path().join("metadata")).unwrap();
        let record = metadata.read();
        assert_eq!(record.duration, 0);
        assert_eq!(record.max_rw_epochs, 0);
        metadata.close().unwrap();
    }

    #[test]
    fn test_update_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata");
        {
            let metadata = Metadata::open(&path).unwrap();
            metadata
                .update(|record| *record = DatabaseParams::default())
                .unwrap();
            metadata.close().unwrap();
        }

        let metadata = Metadata::open(&path).unwrap();
        assert_eq!(metadata.read(), DatabaseParams::default());
        metadata.close().unwrap();
    }

    #[test]
    fn test_corrupt_checksum_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata");
        {
            let metadata = Metadata::open(&path).unwrap();
            metadata
                .update(|record| *record = DatabaseParams::default())
                .unwrap();
            metadata.close().unwrap();
        }

        // flip one parameter byte behind the engine's back
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Metadata::open(&path),
            Err(StrataError::Corrupt(_))
        ));
    }

    #[test]
    fn test_wrong_size_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata");
        std::fs::write(&path, b"tiny").unwrap();
        assert!(matches!(
            Metadata::open(&path),
            Err(StrataError::Corrupt(_))
        ));
    }
}
