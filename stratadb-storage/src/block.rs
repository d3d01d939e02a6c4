use parking_lot::RwLock;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use stratadb_core::{Point, Result, StrataError, POINT_SIZE};

use crate::segment::{SegmentStore, StoreConfig};

/// Configuration for a record block.
#[derive(Debug, Clone)]
pub struct BlockConfig {
    /// Points per record (`duration / resolution`).
    pub record_len: usize,
    /// Byte size of one segment file before record-boundary trimming.
    pub segment_size: u64,
    pub read_only: bool,
    pub lock_memory: bool,
}

/// A fixed-length window into one mapped record. The pointed-to cells are
/// shared between threads and only ever touched through atomic operations.
struct RecordView {
    ptr: *mut Point,
    len: usize,
}

unsafe impl Send for RecordView {}
unsafe impl Sync for RecordView {}

impl RecordView {
    /// Accumulate one point: float add-CAS on `total`, integer add on
    /// `count`. `count` is released after `total` so a reader that loads
    /// `count` first always observes the matching `total`.
    fn accumulate(&self, slot: usize, delta_total: f64, delta_count: u64) {
        debug_assert!(slot < self.len);
        unsafe {
            let cell = self.ptr.add(slot);
            let total = &*(std::ptr::addr_of!((*cell).total) as *const AtomicU64);
            let mut current = total.load(Ordering::Relaxed);
            loop {
                let next = (f64::from_bits(current) + delta_total).to_bits();
                match total.compare_exchange_weak(
                    current,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => break,
                    Err(observed) => current = observed,
                }
            }
            let count = &*(std::ptr::addr_of!((*cell).count) as *const AtomicU64);
            count.fetch_add(delta_count, Ordering::Release);
        }
    }

    fn load(&self, slot: usize) -> Point {
        debug_assert!(slot < self.len);
        unsafe {
            let cell = self.ptr.add(slot);
            let count =
                (*(std::ptr::addr_of!((*cell).count) as *const AtomicU64)).load(Ordering::Acquire);
            let total =
                (*(std::ptr::addr_of!((*cell).total) as *const AtomicU64)).load(Ordering::Acquire);
            Point {
                total: f64::from_bits(total),
                count,
            }
        }
    }

    fn copy_range(&self, from: usize, to: usize) -> Vec<Point> {
        (from..to).map(|slot| self.load(slot)).collect()
    }
}

/// An array of records over a segmented store.
///
/// The read-write variant keeps an append-only list of record views borrowed
/// from the mapped segments and replays new ones whenever the store grows.
/// The read-only variant never allocates records; it copies points out of
/// the map on every fetch.
pub struct Block {
    store: SegmentStore,
    record_len: usize,
    record_size: u64,
    read_only: bool,
    records: RwLock<Vec<RecordView>>,
}

impl Block {
    pub fn open(dir: &Path, config: BlockConfig) -> Result<Self> {
        let record_size = (config.record_len * POINT_SIZE) as u64;
        if config.record_len == 0 {
            return Err(StrataError::InvalidOptions(
                "record length must be non-zero".to_string(),
            ));
        }
        if record_size > config.segment_size {
            return Err(StrataError::InvalidOptions(
                "segment size must hold at least one record".to_string(),
            ));
        }

        // trim the segment so a record never straddles two files
        let data_size = config.segment_size - config.segment_size % record_size;
        let store = SegmentStore::open(
            dir,
            "block",
            StoreConfig {
                segment_size: data_size,
                read_only: config.read_only,
                lock_memory: config.lock_memory,
            },
        )?;

        let block = Self {
            store,
            record_len: config.record_len,
            record_size,
            read_only: config.read_only,
            records: RwLock::new(Vec::new()),
        };

        if !block.read_only {
            let mut records = block.records.write();
            block.replay_locked(&mut records)?;
            drop(records);
        }

        Ok(block)
    }

    /// Points per record.
    pub fn record_len(&self) -> usize {
        self.record_len
    }

    /// Accumulate one point into `(record_id, slot)`. Read-write blocks
    /// only; calling this on a read-only block is a contract violation.
    pub fn track(&self, record_id: u64, slot: usize, total: f64, count: u64) -> Result<()> {
        assert!(!self.read_only, "track called on a read-only block");
        if slot >= self.record_len {
            return Err(StrataError::Bounds(slot));
        }

        loop {
            {
                let records = self.records.read();
                if let Some(view) = records.get(record_id as usize) {
                    view.accumulate(slot, total, count);
                    return Ok(());
                }
            }
            self.extend_to(record_id)?;
        }
    }

    /// Copy out `[from, to)` points of a record. Records past the current
    /// end read as zeros on the read-write side.
    pub fn fetch(&self, record_id: u64, from: usize, to: usize) -> Result<Vec<Point>> {
        if from > to || to > self.record_len {
            return Err(StrataError::Bounds(to));
        }
        if from == to {
            return Ok(Vec::new());
        }

        if self.read_only {
            return self.fetch_read_only(record_id, from, to);
        }

        let records = self.records.read();
        match records.get(record_id as usize) {
            Some(view) => Ok(view.copy_range(from, to)),
            None => Ok(vec![Point::ZERO; to - from]),
        }
    }

    fn fetch_read_only(&self, record_id: u64, from: usize, to: usize) -> Result<Vec<Point>> {
        let offset = record_id * self.record_size + (from * POINT_SIZE) as u64;
        let len = (to - from) * POINT_SIZE;
        let bytes = match self.store.slice_at(len, offset) {
            Ok(bytes) => bytes,
            // past the end of a read-only block: the record was never written
            Err(StrataError::ShortRead { .. }) => return Err(StrataError::NotFound),
            Err(err) => return Err(err),
        };

        // copy out: the mapped borrow must not outlive this call
        let mut points = vec![Point::ZERO; to - from];
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), points.as_mut_ptr() as *mut u8, len);
        }
        Ok(points)
    }

    fn extend_to(&self, record_id: u64) -> Result<()> {
        let mut records = self.records.write();
        if (record_id as usize) < records.len() {
            return Ok(());
        }
        self.store.ensure((record_id + 1) * self.record_size - 1)?;
        self.replay_locked(&mut records)
    }

    /// Re-borrow mapped bytes as record views from the current scan point to
    /// the end of the store.
    fn replay_locked(&self, records: &mut Vec<RecordView>) -> Result<()> {
        let total = (self.store.size() / self.record_size) as usize;
        while records.len() < total {
            let offset = records.len() as u64 * self.record_size;
            let ptr = self.store.ptr_at(self.record_size as usize, offset)? as *mut Point;
            records.push(RecordView {
                ptr,
                len: self.record_len,
            });
        }
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    /// Drop all record views, then flush and unmap the store.
    pub fn close(&self) -> Result<()> {
        self.records.write().clear();
        self.store.close()
    }
}
