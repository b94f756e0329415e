use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::numeric;

/// Summary statistics over the numeric readings of a sequence.
///
/// Non-numeric entries are skipped. An empty summary has `count == 0`,
/// zero `sum` and `avg`, and no `min` or `max`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub sum: f64,
    pub avg: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: usize,
}

pub fn aggregate(values: &[Value]) -> Aggregate {
    let mut sum = 0.0;
    let mut min: Option<f64> = None;
    let mut max: Option<f64> = None;
    let mut count = 0usize;

    for reading in values.iter().filter_map(numeric) {
        sum += reading;
        count += 1;
        min = Some(min.map_or(reading, |current| current.min(reading)));
        max = Some(max.map_or(reading, |current| current.max(reading)));
    }

    let avg = if count == 0 { 0.0 } else { sum / count as f64 };
    Aggregate {
        sum,
        avg,
        min,
        max,
        count,
    }
}
