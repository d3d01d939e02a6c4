use serde::{Deserialize, Serialize};

/// Size in bytes of one stored point.
pub const POINT_SIZE: usize = 16;

/// A single time-series cell: the running sum of tracked values and the
/// number of values that went into it.
///
/// Points live inside memory-mapped record arrays, so the layout is fixed:
/// little-endian `{ f64 total; u64 count }`, exactly 16 bytes, 8-byte
/// aligned. Both fields are updated through `AtomicU64` views over the
/// mapped words.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub total: f64,
    pub count: u64,
}

// The engine refuses to build on a target where the cell is not a plain
// 16-byte, 8-aligned pair of 64-bit words.
const _: () = assert!(std::mem::size_of::<Point>() == POINT_SIZE);
const _: () = assert!(std::mem::align_of::<Point>() == 8);

impl Point {
    pub const ZERO: Point = Point {
        total: 0.0,
        count: 0,
    };

    #[inline]
    pub fn new(total: f64, count: u64) -> Self {
        Point { total, count }
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.total == 0.0 && self.count == 0
    }
}
