use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stratadb_core::params::NANOS_PER_SECOND;
use stratadb_core::{Clock, Point, Result, Series, StrataError};

use crate::block::{Block, BlockConfig};
use crate::index::{Index, IndexConfig};

const UPDATED_LEN: usize = 20;

/// The tiny `updated` file: last-update epoch-seconds as zero-padded
/// decimal ASCII in a memory-mapped 20-byte file.
struct Updated {
    map: Mutex<MmapMut>,
}

impl Updated {
    fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        if file.metadata()?.len() != UPDATED_LEN as u64 {
            file.set_len(UPDATED_LEN as u64)?;
        }
        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(Self {
            map: Mutex::new(map),
        })
    }

    fn set(&self, seconds: i64) {
        let text = format!("{:020}", seconds);
        let mut map = self.map.lock();
        map[..UPDATED_LEN].copy_from_slice(&text.as_bytes()[..UPDATED_LEN]);
    }

    #[cfg(test)]
    fn get(&self) -> i64 {
        let map = self.map.lock();
        std::str::from_utf8(&map[..UPDATED_LEN])
            .ok()
            .and_then(|s| s.trim_start_matches('0').parse().ok())
            .unwrap_or(0)
    }
}

/// Configuration for one epoch.
#[derive(Debug, Clone)]
pub struct EpochConfig {
    /// Points per record (`duration / resolution`).
    pub record_len: usize,
    /// Byte size of segment files.
    pub segment_size: u64,
    pub read_only: bool,
    pub lock_memory: bool,
}

/// One epoch: an index and a block under a fixed time window, living in a
/// single `epoch_<start-ns>` directory, plus the `updated` stamp file.
///
/// Read-write epochs create their directory on open; read-only epochs
/// require it to already exist and never mutate anything inside it.
pub struct Epoch {
    dir: PathBuf,
    index: Index,
    block: Block,
    updated: Option<Updated>,
    read_only: bool,
    clock: Arc<dyn Clock>,
}

impl Epoch {
    pub fn open(dir: &Path, clock: Arc<dyn Clock>, config: EpochConfig) -> Result<Self> {
        if config.read_only {
            if !dir.is_dir() {
                return Err(StrataError::NotFound);
            }
        } else {
            std::fs::create_dir_all(dir)?;
        }

        let index = Index::open(
            dir,
            IndexConfig {
                segment_size: config.segment_size,
                read_only: config.read_only,
                lock_memory: config.lock_memory,
            },
        )?;
        let block = Block::open(
            dir,
            BlockConfig {
                record_len: config.record_len,
                segment_size: config.segment_size,
                read_only: config.read_only,
                lock_memory: config.lock_memory,
            },
        )?;

        let updated = if config.read_only {
            None
        } else {
            let updated = Updated::open(&dir.join("updated"))?;
            updated.set(clock.now() / NANOS_PER_SECOND);
            Some(updated)
        };

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            block,
            updated,
            read_only: config.read_only,
            clock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Accumulate one point for a field tuple at `slot`.
    pub fn track(&self, slot: usize, fields: &[String], total: f64, count: u64) -> Result<()> {
        assert!(!self.read_only, "track called on a read-only epoch");
        let node = self.index.ensure(fields)?;
        self.block.track(node.record_id(), slot, total, count)?;
        if let Some(updated) = &self.updated {
            updated.set(self.clock.now() / NANOS_PER_SECOND);
        }
        Ok(())
    }

    /// Points of one exact tuple for `[from, to)`. A tuple this epoch never
    /// saw reads as zeros.
    pub fn fetch_one(&self, fields: &[String], from: usize, to: usize) -> Result<Vec<Point>> {
        if from > to || to > self.block.record_len() {
            return Err(StrataError::Bounds(to));
        }
        match self.index.find_one(fields) {
            Ok(node) => self.block.fetch(node.record_id(), from, to),
            Err(StrataError::NotFound) => Ok(vec![Point::ZERO; to - from]),
            Err(err) => Err(err),
        }
    }

    /// All series matching `pattern` for `[from, to)`.
    pub fn fetch(&self, pattern: &[String], from: usize, to: usize) -> Result<Vec<Series>> {
        let nodes = self.index.find(pattern)?;
        let mut series = Vec::with_capacity(nodes.len());
        for node in nodes {
            let points = self.block.fetch(node.record_id(), from, to)?;
            series.push(Series::new(node.fields().to_vec(), points));
        }
        Ok(series)
    }

    pub fn sync(&self) -> Result<()> {
        self.index.sync()?;
        self.block.sync()
    }

    /// Close index then block. Each close is attempted even if the other
    /// fails; the first error wins.
    pub fn close(&self) -> Result<()> {
        let index = self.index.close();
        let block = self.block.close();
        index.and(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratadb_core::ManualClock;
    use tempfile::TempDir;

    fn config(read_only: bool) -> EpochConfig {
        EpochConfig {
            record_len: 100,
            segment_size: 4096,
            read_only,
            lock_memory: false,
        }
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(5 * NANOS_PER_SECOND))
    }

    fn tuple(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_track_and_fetch_one() {
        let dir = TempDir::new().unwrap();
        let epoch = Epoch::open(&dir.path().join("epoch_0"), clock(), config(false)).unwrap();

        epoch.track(1, &tuple(&["a", "b", "c"]), 1.5, 1).unwrap();
        epoch.track(1, &tuple(&["a", "b", "c"]), 2.5, 2).unwrap();

        let points = epoch.fetch_one(&tuple(&["a", "b", "c"]), 1, 2).unwrap();
        assert_eq!(points, vec![Point::new(4.0, 3)]);

        // unseen tuples read as zeros
        let points = epoch.fetch_one(&tuple(&["a", "b", "z"]), 0, 3).unwrap();
        assert_eq!(points, vec![Point::ZERO; 3]);
    }

    #[test]
    fn test_fetch_pattern() {
        let dir = TempDir::new().unwrap();
        let epoch = Epoch::open(&dir.path().join("epoch_0"), clock(), config(false)).unwrap();

        epoch.track(0, &tuple(&["a", "b", "c"]), 1.0, 1).unwrap();
        epoch.track(0, &tuple(&["a", "b", "d"]), 2.0, 1).unwrap();

        let series = epoch.fetch(&tuple(&["a", "b", "*"]), 0, 1).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].fields, tuple(&["a", "b", "c"]));
        assert_eq!(series[0].points, vec![Point::new(1.0, 1)]);
        assert_eq!(series[1].fields, tuple(&["a", "b", "d"]));
    }

    #[test]
    fn test_read_only_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epoch_0");
        let tuples: Vec<Vec<String>> = (0..5).map(|i| tuple(&["host", &format!("cpu{}", i)])).collect();
        {
            let epoch = Epoch::open(&path, clock(), config(false)).unwrap();
            for (i, t) in tuples.iter().enumerate() {
                epoch.track(3, t, i as f64, 1).unwrap();
            }
            epoch.close().unwrap();
        }

        let epoch = Epoch::open(&path, clock(), config(true)).unwrap();
        for (i, t) in tuples.iter().enumerate() {
            let points = epoch.fetch_one(t, 3, 4).unwrap();
            assert_eq!(points, vec![Point::new(i as f64, 1)]);
        }
    }

    #[test]
    fn test_read_only_requires_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("epoch_404");
        assert!(matches!(
            Epoch::open(&missing, clock(), config(true)),
            Err(StrataError::NotFound)
        ));
    }

    #[test]
    fn test_updated_stamp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("epoch_0");
        let manual = Arc::new(ManualClock::new(42 * NANOS_PER_SECOND));
        let epoch = Epoch::open(&path, manual.clone(), config(false)).unwrap();

        manual.set(99 * NANOS_PER_SECOND);
        epoch.track(0, &tuple(&["a"]), 1.0, 1).unwrap();
        assert_eq!(epoch.updated.as_ref().unwrap().get(), 99);
    }
}
