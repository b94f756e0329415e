use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::numeric;
use crate::error::ReduceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownsampleMethod {
    Average,
    Max,
    Min,
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownsampleOptions {
    pub window: usize,
    pub method: DownsampleMethod,
}

impl DownsampleOptions {
    pub fn new(window: usize, method: DownsampleMethod) -> Self {
        Self { window, method }
    }
}

/// Reduce each fixed-size window to one value. The trailing window may be
/// shorter than `window`.
///
/// `Max` and `Min` keep the winning entry as-is (records keep their shape);
/// `Average` yields a plain number, or `null` for a window without readings.
pub fn downsample(
    values: Vec<Value>,
    options: &DownsampleOptions,
) -> Result<Vec<Value>, ReduceError> {
    if options.window == 0 {
        return Err(ReduceError::InvalidOptions(
            "downsample window must be at least 1".to_string(),
        ));
    }
    Ok(values
        .chunks(options.window)
        .map(|window| reduce_window(window, options.method))
        .collect())
}

fn reduce_window(window: &[Value], method: DownsampleMethod) -> Value {
    match method {
        DownsampleMethod::First => window.first().cloned().unwrap_or(Value::Null),
        DownsampleMethod::Last => window.last().cloned().unwrap_or(Value::Null),
        DownsampleMethod::Average => {
            let (sum, count) = window
                .iter()
                .filter_map(numeric)
                .fold((0.0, 0usize), |(sum, count), reading| (sum + reading, count + 1));
            if count == 0 {
                Value::Null
            } else {
                Value::from(sum / count as f64)
            }
        }
        DownsampleMethod::Max => extreme(window, |candidate, best| candidate > best),
        DownsampleMethod::Min => extreme(window, |candidate, best| candidate < best),
    }
}

/// First entry whose reading beats every earlier one under `wins`.
fn extreme(window: &[Value], wins: impl Fn(f64, f64) -> bool) -> Value {
    let mut best: Option<(&Value, f64)> = None;
    for value in window {
        let Some(reading) = numeric(value) else {
            continue;
        };
        if best.map_or(true, |(_, current)| wins(reading, current)) {
            best = Some((value, reading));
        }
    }
    best.map_or(Value::Null, |(value, _)| value.clone())
}
