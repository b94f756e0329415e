use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{numeric, x_coordinate};
use crate::error::ReduceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleMethod {
    Uniform,
    Random,
    /// Largest-Triangle-Three-Buckets.
    Lttb,
}

/// How many points to keep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleTarget {
    Count(usize),
    /// Fraction of the input length, rounded to the nearest count.
    Rate(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleOptions {
    pub method: SampleMethod,
    pub target: SampleTarget,
    /// Seed for [`SampleMethod::Random`]; fresh entropy when `None`.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SampleOptions {
    pub fn count(method: SampleMethod, count: usize) -> Self {
        Self {
            method,
            target: SampleTarget::Count(count),
            seed: None,
        }
    }

    pub fn rate(method: SampleMethod, rate: f64) -> Self {
        Self {
            method,
            target: SampleTarget::Rate(rate),
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Reduce `values` to the target count. Inputs already at or below the
/// target are returned unchanged.
pub fn sample(values: Vec<Value>, options: &SampleOptions) -> Result<Vec<Value>, ReduceError> {
    let count = target_count(options.target, values.len())?;
    if count >= values.len() {
        return Ok(values);
    }

    let sampled = match options.method {
        SampleMethod::Uniform => uniform(&values, count),
        SampleMethod::Random => random(&values, count, options.seed),
        SampleMethod::Lttb => lttb(&values, count),
    };
    Ok(sampled)
}

fn target_count(target: SampleTarget, len: usize) -> Result<usize, ReduceError> {
    match target {
        SampleTarget::Count(count) => Ok(count),
        SampleTarget::Rate(rate) if rate.is_finite() && rate >= 0.0 => {
            Ok(((len as f64 * rate).round() as usize).min(len))
        }
        SampleTarget::Rate(rate) => Err(ReduceError::InvalidOptions(format!(
            "sample rate must be a non-negative finite number, got {rate}"
        ))),
    }
}

/// Index `⌊i·len/count⌋` for `i` in `[0, count)`.
fn uniform(values: &[Value], count: usize) -> Vec<Value> {
    let len = values.len();
    (0..count).map(|i| values[i * len / count].clone()).collect()
}

/// `count` distinct indices, kept in input order.
fn random(values: &[Value], count: usize, seed: Option<u64>) -> Vec<Value> {
    let mut rng = match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    };
    // Partial Fisher-Yates: the first `count` slots end up a uniform sample.
    let mut indices: Vec<usize> = (0..values.len()).collect();
    for slot in 0..count {
        let pick = rng.usize(slot..indices.len());
        indices.swap(slot, pick);
    }
    indices.truncate(count);
    indices.sort_unstable();
    indices.into_iter().map(|i| values[i].clone()).collect()
}

/// Largest-Triangle-Three-Buckets downsampling to `threshold` points.
///
/// The first and last points are always kept. The points between them are
/// split into `threshold - 2` buckets of near-equal width; from each bucket
/// the point forming the largest triangle with the previously kept point and
/// the average point of the next bucket is kept.
pub fn lttb(values: &[Value], threshold: usize) -> Vec<Value> {
    let len = values.len();
    if threshold >= len {
        return values.to_vec();
    }
    match threshold {
        0 => return Vec::new(),
        1 => return vec![values[0].clone()],
        2 => return vec![values[0].clone(), values[len - 1].clone()],
        _ => {}
    }

    let points: Vec<(f64, f64)> = values
        .iter()
        .enumerate()
        .map(|(i, value)| (x_coordinate(i, value), numeric(value).unwrap_or(0.0)))
        .collect();

    // Bucket `b` covers `[bound(b), bound(b + 1))`. Integer bounds partition
    // the interior points exactly; `bound(threshold - 2) == len - 1`.
    let interior = len - 2;
    let buckets = threshold - 2;
    let bound = |bucket: usize| bucket * interior / buckets + 1;

    let mut sampled = Vec::with_capacity(threshold);
    sampled.push(values[0].clone());
    let mut anchor = 0usize;

    for bucket in 0..buckets {
        let next_start = bound(bucket + 1);
        let next_end = bound(bucket + 2).min(len);
        let (avg_x, avg_y) = if bucket + 1 < buckets {
            let span = &points[next_start..next_end];
            let n = span.len() as f64;
            let (sx, sy) = span
                .iter()
                .fold((0.0, 0.0), |(sx, sy), (x, y)| (sx + x, sy + y));
            (sx / n, sy / n)
        } else {
            points[len - 1]
        };

        let start = bound(bucket);
        let end = bound(bucket + 1);
        let (ax, ay) = points[anchor];

        let mut chosen = start;
        let mut max_area = f64::NEG_INFINITY;
        for (offset, &(x, y)) in points[start..end].iter().enumerate() {
            let area = ((ax - avg_x) * (y - ay) - (ax - x) * (avg_y - ay)).abs() * 0.5;
            if area > max_area {
                max_area = area;
                chosen = start + offset;
            }
        }

        sampled.push(values[chosen].clone());
        anchor = chosen;
    }

    sampled.push(values[len - 1].clone());
    sampled
}
