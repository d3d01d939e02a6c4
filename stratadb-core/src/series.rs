use serde::{Deserialize, Serialize};

use crate::point::Point;

/// One matched time series: the full field tuple and its points for the
/// requested slot range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub fields: Vec<String>,
    pub points: Vec<Point>,
}

impl Series {
    pub fn new(fields: Vec<String>, points: Vec<Point>) -> Self {
        Series { fields, points }
    }
}
