use crossbeam::channel::{bounded, tick, Sender};
use crossbeam::select;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use stratadb_core::{
    floor_to, validate_fields, validate_pattern, Clock, DatabaseParams, Point, Result, Series,
    StrataError, SystemClock,
};
use stratadb_storage::{Epoch, EpochConfig, Metadata};

use crate::cache::{Cache, EvictHook};
use crate::config::DatabaseConfig;

const EPOCH_PREFIX: &str = "epoch_";
const RETENTION_INTERVAL: Duration = Duration::from_secs(60);

/// Options for opening one database.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub path: PathBuf,

    /// Defaults for any metadata field the on-disk record leaves zero.
    /// An existing database's persisted parameters win.
    pub params: DatabaseParams,

    /// Route every epoch through the read-write cache so historical data
    /// can be backfilled.
    pub recovery: bool,

    /// Ask for page-locked mappings (falls back with a warning).
    pub lock_memory: bool,
}

impl DatabaseOptions {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            params: DatabaseParams::default(),
            recovery: false,
            lock_memory: false,
        }
    }
}

/// One epoch's worth of a fetch response.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub from: i64,
    pub to: i64,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub params: DatabaseParams,
    pub ro_epochs: usize,
    pub rw_epochs: usize,
}

type EpochCache = Cache<Arc<Epoch>>;

/// State shared between the database handle and the retention reaper.
struct Shared {
    path: PathBuf,
    /// Immutable durations and sizes. The epoch-cache caps are read live
    /// from metadata because `edit` can change them.
    params: DatabaseParams,
    recovery: bool,
    lock_memory: bool,
    clock: Arc<dyn Clock>,
    metadata: Metadata,
    ro_cache: EpochCache,
    rw_cache: EpochCache,
    /// Serializes epoch creation and deletion across callers.
    epoch_lock: Mutex<()>,
}

impl Shared {
    fn epoch_dir(&self, start: i64) -> PathBuf {
        self.path.join(format!("{}{}", EPOCH_PREFIX, start))
    }

    /// Route an epoch start time to the read-write or read-only cache and
    /// load it on a miss. `write` demands a read-write epoch.
    fn epoch_for(&self, start: i64, write: bool) -> Result<Arc<Epoch>> {
        let duration = self.params.duration;
        let now = floor_to(self.clock.now(), duration);
        let rw_window_end = now + duration;
        if start >= rw_window_end {
            return Err(StrataError::Future(start));
        }

        let max_rw = self.metadata.read().max_rw_epochs as i64;
        let rw_window_start = now - (max_rw - 1) * duration;
        let read_write = start >= rw_window_start || self.recovery;
        if write && !read_write {
            return Err(StrataError::InvalidTime(start));
        }

        let cache = if read_write { &self.rw_cache } else { &self.ro_cache };
        if let Some(epoch) = cache.get(start) {
            return Ok(epoch);
        }

        // only one caller loads a given epoch; the rest wait here
        let _guard = self.epoch_lock.lock();
        if let Some(epoch) = cache.peek(start) {
            return Ok(epoch);
        }

        let epoch = Arc::new(Epoch::open(
            &self.epoch_dir(start),
            Arc::clone(&self.clock),
            EpochConfig {
                record_len: self.params.record_len(),
                segment_size: self.params.segment_size,
                read_only: !read_write,
                lock_memory: self.lock_memory,
            },
        )?);
        cache.add(start, Arc::clone(&epoch));
        Ok(epoch)
    }

    /// Remove every epoch directory whose window fell out of retention.
    fn expire(&self) {
        let now = floor_to(self.clock.now(), self.params.duration);
        let cutoff = now - self.params.retention;

        let entries = match std::fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "retention scan failed");
                return;
            }
        };

        let _guard = self.epoch_lock.lock();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let start = match name
                .to_string_lossy()
                .strip_prefix(EPOCH_PREFIX)
                .and_then(|s| s.parse::<i64>().ok())
            {
                Some(start) => start,
                None => continue,
            };
            if start > cutoff {
                continue;
            }

            for cache in [&self.ro_cache, &self.rw_cache] {
                if let Some(epoch) = cache.remove(start) {
                    if let Err(err) = epoch.close() {
                        tracing::warn!(start, error = %err, "failed to close expired epoch");
                    }
                }
            }
            match std::fs::remove_dir_all(entry.path()) {
                Ok(()) => tracing::debug!(start, "removed expired epoch"),
                Err(err) => {
                    tracing::warn!(start, error = %err, "failed to remove expired epoch")
                }
            }
        }
    }
}

struct Reaper {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// An embeddable time-series database: epochs of memory-mapped records
/// routed by timestamp, with bounded caches and retention expiry.
pub struct Database {
    shared: Arc<Shared>,
    reaper: Mutex<Option<Reaper>>,
    closed: AtomicBool,
}

impl Database {
    /// Create a new database; fails with `AlreadyExists` when a metadata
    /// file is already present.
    pub fn create(options: DatabaseOptions) -> Result<Self> {
        if options.path.join("metadata").exists() {
            return Err(StrataError::AlreadyExists(
                options.path.display().to_string(),
            ));
        }
        Self::open(options)
    }

    /// Open (or initialize) a database using the system wall clock.
    pub fn open(options: DatabaseOptions) -> Result<Self> {
        Self::open_with_clock(options, Arc::new(SystemClock))
    }

    pub fn open_with_clock(options: DatabaseOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        options.params.validate()?;
        std::fs::create_dir_all(&options.path)?;

        let metadata = Metadata::open(&options.path.join("metadata"))?;
        // fill any zero field with the caller's default; persisted values win
        metadata.update(|record| {
            let defaults = options.params;
            if record.duration == 0 {
                record.duration = defaults.duration;
            }
            if record.retention == 0 {
                record.retention = defaults.retention;
            }
            if record.resolution == 0 {
                record.resolution = defaults.resolution;
            }
            if record.payload_size == 0 {
                record.payload_size = defaults.payload_size;
            }
            if record.segment_size == 0 {
                record.segment_size = defaults.segment_size;
            }
            if record.max_ro_epochs == 0 {
                record.max_ro_epochs = defaults.max_ro_epochs;
            }
            if record.max_rw_epochs == 0 {
                record.max_rw_epochs = defaults.max_rw_epochs;
            }
        })?;

        let params = metadata.read();
        params.validate().map_err(|err| match err {
            StrataError::InvalidOptions(msg) => StrataError::Corrupt(msg),
            other => other,
        })?;

        let shared = Arc::new(Shared {
            path: options.path,
            params,
            recovery: options.recovery,
            lock_memory: options.lock_memory,
            clock,
            metadata,
            ro_cache: Cache::new(params.max_ro_epochs as usize, close_hook()),
            rw_cache: Cache::new(params.max_rw_epochs as usize, close_hook()),
            epoch_lock: Mutex::new(()),
        });

        Ok(Self {
            reaper: Mutex::new(Some(spawn_reaper(Arc::clone(&shared)))),
            shared,
            closed: AtomicBool::new(false),
        })
    }

    /// Open every database under `root`: each subdirectory carrying a
    /// `params.json` becomes one database keyed by its directory name.
    pub fn load_all(root: &Path) -> anyhow::Result<HashMap<String, Database>> {
        let mut databases = HashMap::new();
        for entry in std::fs::read_dir(root)?.flatten() {
            let params_file = entry.path().join("params.json");
            if !params_file.is_file() {
                continue;
            }
            let config = DatabaseConfig::from_file(&params_file)?;
            let mut options = DatabaseOptions::new(entry.path());
            options.params = config.to_params()?;
            let name = entry.file_name().to_string_lossy().to_string();
            databases.insert(name, Database::open(options)?);
        }
        Ok(databases)
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StrataError::Closed);
        }
        Ok(())
    }

    /// Accumulate one measurement at `ts` for a field tuple.
    pub fn track(&self, ts: i64, fields: &[String], total: f64, count: u64) -> Result<()> {
        self.check_open()?;
        validate_fields(fields)?;
        if ts < 0 {
            return Err(StrataError::InvalidTime(ts));
        }

        let params = &self.shared.params;
        let ts = floor_to(ts, params.resolution);
        let start = floor_to(ts, params.duration);
        let slot = ((ts - start) / params.resolution) as usize;

        let epoch = self.shared.epoch_for(start, true)?;
        epoch.track(slot, fields, total, count)
    }

    /// Fetch all series matching `pattern` over `[from, to)`: one chunk per
    /// touched epoch, in ascending time order. Epochs missing from disk
    /// contribute an empty chunk and a warning; `future` is terminal.
    pub fn fetch(&self, from: i64, to: i64, pattern: &[String]) -> Result<Vec<Chunk>> {
        self.check_open()?;
        validate_pattern(pattern)?;

        let params = &self.shared.params;
        let from = floor_to(from, params.resolution);
        let to = floor_to(to, params.resolution);
        if from < 0 || to <= from {
            return Err(StrataError::Range(from, to));
        }

        // a fetch ending exactly on an epoch boundary excludes the later epoch
        let first = floor_to(from, params.duration);
        let last = floor_to(to - params.resolution, params.duration);

        let mut chunks = Vec::new();
        let mut start = first;
        while start <= last {
            let chunk_from = from.max(start);
            let chunk_to = to.min(start + params.duration);
            let slot_from = ((chunk_from - start) / params.resolution) as usize;
            let slot_to = ((chunk_to - start) / params.resolution) as usize;

            let series = match self.shared.epoch_for(start, false) {
                Ok(epoch) => match epoch.fetch(pattern, slot_from, slot_to) {
                    Ok(series) => series,
                    Err(err) => {
                        tracing::warn!(start, error = %err, "epoch fetch failed, returning zeros");
                        Vec::new()
                    }
                },
                Err(StrataError::Future(ts)) => return Err(StrataError::Future(ts)),
                Err(StrataError::NotFound) => {
                    tracing::warn!(start, "epoch missing, returning zeros");
                    Vec::new()
                }
                Err(err) => {
                    tracing::warn!(start, error = %err, "epoch open failed, returning zeros");
                    Vec::new()
                }
            };

            chunks.push(Chunk {
                from: chunk_from,
                to: chunk_to,
                series,
            });
            start += params.duration;
        }
        Ok(chunks)
    }

    /// Fetch one exact tuple over `[start, end)` merged across epochs into
    /// a single buffer of `(end - start) / resolution` points. Missing
    /// epochs leave zeros.
    pub fn one(&self, start: i64, end: i64, fields: &[String]) -> Result<Vec<Point>> {
        self.check_open()?;
        validate_fields(fields)?;

        let params = &self.shared.params;
        let start = floor_to(start, params.resolution);
        let end = floor_to(end, params.resolution);
        if start < 0 || end <= start {
            return Err(StrataError::Range(start, end));
        }

        let total_len = ((end - start) / params.resolution) as usize;
        let mut out = vec![Point::ZERO; total_len];

        let first = floor_to(start, params.duration);
        let last = floor_to(end - params.resolution, params.duration);
        let mut epoch_start = first;
        while epoch_start <= last {
            let window_from = start.max(epoch_start);
            let window_to = end.min(epoch_start + params.duration);
            let slot_from = ((window_from - epoch_start) / params.resolution) as usize;
            let slot_to = ((window_to - epoch_start) / params.resolution) as usize;

            match self.shared.epoch_for(epoch_start, false) {
                Ok(epoch) => match epoch.fetch_one(fields, slot_from, slot_to) {
                    Ok(points) => {
                        let offset = ((window_from - start) / params.resolution) as usize;
                        out[offset..offset + points.len()].copy_from_slice(&points);
                    }
                    Err(err) => {
                        tracing::warn!(start = epoch_start, error = %err, "epoch fetch failed, leaving zeros");
                    }
                },
                Err(StrataError::Future(ts)) => return Err(StrataError::Future(ts)),
                Err(err) => {
                    tracing::warn!(start = epoch_start, error = %err, "epoch missing, leaving zeros");
                }
            }
            epoch_start += params.duration;
        }
        Ok(out)
    }

    /// Flush every open read-write epoch and the metadata record.
    pub fn sync(&self) -> Result<()> {
        self.check_open()?;
        for epoch in self.shared.rw_cache.values() {
            if let Err(err) = epoch.sync() {
                tracing::warn!(dir = %epoch.dir().display(), error = %err, "epoch sync failed");
            }
        }
        self.shared.metadata.flush()
    }

    pub fn info(&self) -> Result<DatabaseInfo> {
        self.check_open()?;
        Ok(DatabaseInfo {
            params: self.shared.metadata.read(),
            ro_epochs: self.shared.ro_cache.len(),
            rw_epochs: self.shared.rw_cache.len(),
        })
    }

    /// Adjust the epoch cache caps, persisting them and resizing both
    /// caches (which may evict and close epochs immediately).
    pub fn edit(&self, max_ro_epochs: usize, max_rw_epochs: usize) -> Result<()> {
        self.check_open()?;
        if max_ro_epochs == 0 || max_rw_epochs == 0 {
            return Err(StrataError::InvalidOptions(
                "epoch cache capacities must be non-zero".to_string(),
            ));
        }
        self.shared.metadata.update(|record| {
            record.max_ro_epochs = max_ro_epochs as u64;
            record.max_rw_epochs = max_rw_epochs as u64;
        })?;
        self.shared.ro_cache.resize(max_ro_epochs);
        self.shared.rw_cache.resize(max_rw_epochs);
        Ok(())
    }

    /// Run one retention pass now. The background reaper does this every
    /// minute; tests and operational tooling can force it.
    pub fn expire_epochs(&self) -> Result<()> {
        self.check_open()?;
        self.shared.expire();
        Ok(())
    }

    /// Stop the reaper, close every cached epoch, and close metadata.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(reaper) = self.reaper.lock().take() {
            drop(reaper.shutdown);
            let _ = reaper.handle.join();
        }
        self.shared.rw_cache.purge();
        self.shared.ro_cache.purge();
        self.shared.metadata.close()
    }
}

fn close_hook() -> EvictHook<Arc<Epoch>> {
    Box::new(|start, epoch: Arc<Epoch>| {
        if let Err(err) = epoch.close() {
            tracing::warn!(start, error = %err, "failed to close evicted epoch");
        }
    })
}

fn spawn_reaper(shared: Arc<Shared>) -> Reaper {
    let (shutdown, shutdown_rx) = bounded::<()>(0);
    let handle = std::thread::Builder::new()
        .name("strata-retention".to_string())
        .spawn(move || {
            let ticker = tick(RETENTION_INTERVAL);
            loop {
                select! {
                    recv(ticker) -> _ => shared.expire(),
                    recv(shutdown_rx) -> _ => break,
                }
            }
        })
        .expect("failed to spawn retention reaper");
    Reaper { shutdown, handle }
}
