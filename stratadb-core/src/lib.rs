//! stratadb core - fundamental types for the stratadb time-series engine
//!
//! This crate provides the types shared by the storage engine and the
//! database facade: the 16-byte `Point` cell, field-tuple validation, the
//! durable database parameters, the error enum, and the wall-clock seam.

pub mod clock;
pub mod error;
pub mod fields;
pub mod params;
pub mod point;
pub mod series;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Result, StrataError};
pub use fields::{validate_fields, validate_pattern, WILDCARD};
pub use params::{floor_to, DatabaseParams};
pub use point::{Point, POINT_SIZE};
pub use series::Series;
