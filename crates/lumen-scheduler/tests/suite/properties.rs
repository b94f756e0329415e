use lumen_scheduler::reduce::{compress, decompress, lttb, sample};
use lumen_scheduler::{SampleMethod, SampleOptions};
use proptest::prelude::*;
use serde_json::Value;

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        (0i64..4).prop_map(Value::from),
        prop::sample::select(vec!["a", "b"]).prop_map(Value::from),
    ]
}

proptest! {
    #[test]
    fn rle_round_trips(values in prop::collection::vec(value(), 0..64)) {
        let runs = compress(&values);
        prop_assert!(runs.iter().all(|run| run.count > 0));
        prop_assert!(runs.windows(2).all(|pair| pair[0].value != pair[1].value));
        prop_assert_eq!(decompress(&runs), values);
    }

    #[test]
    fn lttb_keeps_both_endpoints(
        readings in prop::collection::vec(-1e6f64..1e6, 2..200),
        threshold in 2usize..300,
    ) {
        let values: Vec<Value> = readings.iter().copied().map(Value::from).collect();
        let sampled = lttb(&values, threshold);
        prop_assert_eq!(sampled.len(), threshold.min(values.len()));
        prop_assert_eq!(sampled.first(), values.first());
        prop_assert_eq!(sampled.last(), values.last());
    }

    #[test]
    fn uniform_sampling_hits_the_target_count(
        len in 0usize..500,
        count in 0usize..600,
    ) {
        let values: Vec<Value> = (0..len).map(Value::from).collect();
        let options = SampleOptions::count(SampleMethod::Uniform, count);
        let sampled = sample(values.clone(), &options).unwrap();
        prop_assert_eq!(sampled.len(), count.min(len));
        prop_assert_eq!(sample(values, &options).unwrap(), sampled);
    }
}
