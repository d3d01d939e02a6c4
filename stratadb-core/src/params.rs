use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::point::POINT_SIZE;

pub const NANOS_PER_SECOND: i64 = 1_000_000_000;
pub const NANOS_PER_MINUTE: i64 = 60 * NANOS_PER_SECOND;
pub const NANOS_PER_HOUR: i64 = 60 * NANOS_PER_MINUTE;
pub const NANOS_PER_DAY: i64 = 24 * NANOS_PER_HOUR;

/// Floor `ts` to a `step` boundary. Works for negative timestamps too, so
/// epochs before the UNIX epoch land on the boundary below them.
#[inline]
pub fn floor_to(ts: i64, step: i64) -> i64 {
    ts - ts.rem_euclid(step)
}

/// Durable parameters of one database. All durations are nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseParams {
    /// Length of one epoch.
    pub duration: i64,

    /// How long epochs are kept before the reaper removes them.
    pub retention: i64,

    /// Length of one point slot within a record.
    pub resolution: i64,

    /// Bytes per stored point. Must equal the compiled `Point` size.
    pub payload_size: u64,

    /// Byte size of one segment file before record-boundary trimming.
    pub segment_size: u64,

    /// Capacity of the read-only epoch cache.
    pub max_ro_epochs: u64,

    /// Capacity of the read-write epoch cache.
    pub max_rw_epochs: u64,
}

impl Default for DatabaseParams {
    fn default() -> Self {
        Self {
            duration: NANOS_PER_HOUR,           // 1h epochs
            retention: 7 * NANOS_PER_DAY,       // keep one week
            resolution: NANOS_PER_MINUTE,       // one point per minute
            payload_size: POINT_SIZE as u64,    // 16
            segment_size: 16 * 1024 * 1024,     // 16MB segment files
            max_ro_epochs: 2,
            max_rw_epochs: 2,
        }
    }
}

impl DatabaseParams {
    /// Points per record: `duration / resolution`.
    #[inline]
    pub fn record_len(&self) -> usize {
        (self.duration / self.resolution) as usize
    }

    /// Bytes per record.
    #[inline]
    pub fn record_size(&self) -> u64 {
        self.record_len() as u64 * self.payload_size
    }

    pub fn validate(&self) -> Result<()> {
        if self.duration <= 0
            || self.retention <= 0
            || self.resolution <= 0
            || self.payload_size == 0
            || self.segment_size == 0
            || self.max_ro_epochs == 0
            || self.max_rw_epochs == 0
        {
            return Err(StrataError::InvalidOptions(
                "all parameters must be non-zero".to_string(),
            ));
        }
        if self.payload_size != POINT_SIZE as u64 {
            return Err(StrataError::InvalidOptions(format!(
                "payload size must be {} bytes, got {}",
                POINT_SIZE, self.payload_size
            )));
        }
        if self.duration % self.resolution != 0 {
            return Err(StrataError::InvalidOptions(
                "duration must be a multiple of resolution".to_string(),
            ));
        }
        if self.retention % self.duration != 0 {
            return Err(StrataError::InvalidOptions(
                "retention must be a multiple of duration".to_string(),
            ));
        }
        if self.segment_size < self.record_size() {
            return Err(StrataError::InvalidOptions(
                "segment size must hold at least one record".to_string(),
            ));
        }
        Ok(())
    }
}
