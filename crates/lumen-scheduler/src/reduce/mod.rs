//! Dataset reduction algorithms.
//!
//! Every algorithm is a pure function over a sequence of JSON values, so the
//! worker path and the synchronous fallback produce identical results.
//!
//! A value's numeric reading is the value itself when it is a number, or its
//! `y` (then `value`) field when it is an object. The x coordinate used by
//! LTTB is the object's `x` field, falling back to the sequence index.

mod aggregate;
mod downsample;
mod rle;
mod sample;
mod transform;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ReduceError;

pub use aggregate::{aggregate, Aggregate};
pub use downsample::{downsample, DownsampleMethod, DownsampleOptions};
pub use rle::{compress, decompress, Run};
pub use sample::{lttb, sample, SampleMethod, SampleOptions, SampleTarget};
pub use transform::{drop_missing, optimize, transform, TransformOptions};

/// The closed set of reductions a task can request, with their options.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// Like `Filter`, and also drops records whose reading is `null`.
    Optimize,
    Transform(TransformOptions),
    Aggregate,
    /// Drop missing (`null`) entries.
    Filter,
    Sample(SampleOptions),
    Downsample(DownsampleOptions),
    Compress,
    Decompress,
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Optimize => "optimize",
            TaskKind::Transform(_) => "transform",
            TaskKind::Aggregate => "aggregate",
            TaskKind::Filter => "filter",
            TaskKind::Sample(_) => "sample",
            TaskKind::Downsample(_) => "downsample",
            TaskKind::Compress => "compress",
            TaskKind::Decompress => "decompress",
        }
    }
}

/// Input to a task.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Values(Vec<Value>),
    Runs(Vec<Run>),
}

impl Payload {
    pub fn numbers(numbers: impl IntoIterator<Item = f64>) -> Self {
        Payload::Values(numbers.into_iter().map(Value::from).collect())
    }

    fn into_values(self, kind: &TaskKind) -> Result<Vec<Value>, ReduceError> {
        match self {
            Payload::Values(values) => Ok(values),
            Payload::Runs(_) => Err(ReduceError::UnexpectedRuns { kind: kind.name() }),
        }
    }

    /// Runs may also arrive as their JSON form, e.g. `{"value": 1, "count": 3}`.
    fn into_runs(self) -> Result<Vec<Run>, ReduceError> {
        match self {
            Payload::Runs(runs) => Ok(runs),
            Payload::Values(values) => values
                .into_iter()
                .enumerate()
                .map(|(index, value)| {
                    serde_json::from_value(value).map_err(|err| ReduceError::InvalidRun {
                        index,
                        message: err.to_string(),
                    })
                })
                .collect(),
        }
    }
}

impl From<Vec<Value>> for Payload {
    fn from(values: Vec<Value>) -> Self {
        Payload::Values(values)
    }
}

impl From<Vec<Run>> for Payload {
    fn from(runs: Vec<Run>) -> Self {
        Payload::Runs(runs)
    }
}

/// Result of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutput {
    Values(Vec<Value>),
    Summary(Aggregate),
    Runs(Vec<Run>),
}

impl TaskOutput {
    pub fn into_values(self) -> Option<Vec<Value>> {
        match self {
            TaskOutput::Values(values) => Some(values),
            _ => None,
        }
    }

    pub fn summary(&self) -> Option<&Aggregate> {
        match self {
            TaskOutput::Summary(summary) => Some(summary),
            _ => None,
        }
    }

    pub fn into_runs(self) -> Option<Vec<Run>> {
        match self {
            TaskOutput::Runs(runs) => Some(runs),
            _ => None,
        }
    }
}

/// Run `kind` over `payload`.
pub fn run(kind: &TaskKind, payload: Payload) -> Result<TaskOutput, ReduceError> {
    let output = match kind {
        TaskKind::Decompress => TaskOutput::Values(decompress(&payload.into_runs()?)),
        TaskKind::Optimize => TaskOutput::Values(optimize(payload.into_values(kind)?)),
        TaskKind::Transform(options) => {
            TaskOutput::Values(transform(payload.into_values(kind)?, options))
        }
        TaskKind::Aggregate => TaskOutput::Summary(aggregate(&payload.into_values(kind)?)),
        TaskKind::Filter => TaskOutput::Values(drop_missing(payload.into_values(kind)?)),
        TaskKind::Sample(options) => {
            TaskOutput::Values(sample(payload.into_values(kind)?, options)?)
        }
        TaskKind::Downsample(options) => {
            TaskOutput::Values(downsample(payload.into_values(kind)?, options)?)
        }
        TaskKind::Compress => TaskOutput::Runs(compress(&payload.into_values(kind)?)),
    };
    Ok(output)
}

pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::Object(map) => numeric_field(map).and_then(|field| map[field].as_f64()),
        _ => None,
    }
}

/// The object field holding a record's numeric reading.
pub(crate) fn numeric_field(map: &Map<String, Value>) -> Option<&'static str> {
    ["y", "value"]
        .into_iter()
        .find(|field| map.get(*field).is_some_and(Value::is_number))
}

pub(crate) fn x_coordinate(index: usize, value: &Value) -> f64 {
    value
        .get("x")
        .and_then(Value::as_f64)
        .unwrap_or(index as f64)
}
