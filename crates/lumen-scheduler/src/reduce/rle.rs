use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A run of `count` consecutive equal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub value: Value,
    pub count: usize,
}

pub fn compress(values: &[Value]) -> Vec<Run> {
    let mut runs: Vec<Run> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some(run) if run.value == *value => run.count += 1,
            _ => runs.push(Run {
                value: value.clone(),
                count: 1,
            }),
        }
    }
    runs
}

/// Expand runs back into values. A run with `count == 0` contributes nothing.
pub fn decompress(runs: &[Run]) -> Vec<Value> {
    let total = runs.iter().map(|run| run.count).sum();
    let mut values = Vec::with_capacity(total);
    for run in runs {
        values.extend(std::iter::repeat(run.value.clone()).take(run.count));
    }
    values
}
