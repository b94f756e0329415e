use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{numeric, numeric_field};

/// Element-wise numeric mapping. Entries without a numeric reading pass
/// through untouched; object records keep every other field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum TransformOptions {
    /// `reading * factor + offset`
    Scale { factor: f64, offset: f64 },
    /// Map readings linearly onto `[0, 1]`. A constant series maps to `0`.
    Normalize,
}

pub fn transform(values: Vec<Value>, options: &TransformOptions) -> Vec<Value> {
    match *options {
        TransformOptions::Scale { factor, offset } => values
            .into_iter()
            .map(|value| map_reading(value, |reading| reading * factor + offset))
            .collect(),
        TransformOptions::Normalize => {
            let (min, max) = values.iter().filter_map(numeric).fold(
                (f64::INFINITY, f64::NEG_INFINITY),
                |(min, max), reading| (min.min(reading), max.max(reading)),
            );
            let range = max - min;
            values
                .into_iter()
                .map(|value| {
                    map_reading(value, |reading| {
                        if range > 0.0 {
                            (reading - min) / range
                        } else {
                            0.0
                        }
                    })
                })
                .collect()
        }
    }
}

/// Drop `null` entries.
pub fn drop_missing(values: Vec<Value>) -> Vec<Value> {
    values.into_iter().filter(|value| !value.is_null()).collect()
}

/// Drop `null` entries and records whose numeric field is `null`.
pub fn optimize(values: Vec<Value>) -> Vec<Value> {
    values
        .into_iter()
        .filter(|value| match value {
            Value::Null => false,
            Value::Object(map) => !["y", "value"]
                .into_iter()
                .any(|field| map.get(field).is_some_and(Value::is_null)),
            _ => true,
        })
        .collect()
}

fn map_reading(value: Value, f: impl Fn(f64) -> f64) -> Value {
    match value {
        Value::Number(ref number) => match number.as_f64() {
            Some(reading) => Value::from(f(reading)),
            None => value,
        },
        Value::Object(mut map) => {
            if let Some(field) = numeric_field(&map) {
                if let Some(reading) = map.get(field).and_then(Value::as_f64) {
                    map.insert(field.to_string(), Value::from(f(reading)));
                }
            }
            Value::Object(map)
        }
        other => other,
    }
}
