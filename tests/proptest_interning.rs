//! Property tests for the interning dictionary and record framing:
//! canonicalization is order-insensitive, handles are stable for the life
//! of the exporter, and lane records survive a write/read round trip.

use proptest::prelude::*;
use tempfile::TempDir;

use otlp_mmap::protocol::{decode_lane_record, LaneRecord};
use otlp_mmap::{
    Aggregation, AttributeValue, ExporterConfig, MeasurementValue, MmapReader, OtlpMmapExporter,
    SpanContext,
};

fn test_config() -> ExporterConfig {
    ExporterConfig::builder()
        .dictionary_capacity(256 * 1024)
        .metric_lane_capacity(256 * 1024)
        .span_lane_capacity(64 * 1024)
        .event_lane_capacity(64 * 1024)
        .build()
        .unwrap()
}

fn scalar_value() -> impl Strategy<Value = AttributeValue> {
    prop_oneof![
        "[a-z]{0,8}".prop_map(AttributeValue::String),
        any::<i64>().prop_map(AttributeValue::Int),
        (-1.0e9..1.0e9f64).prop_map(AttributeValue::Double),
        any::<bool>().prop_map(AttributeValue::Bool),
        proptest::collection::vec(any::<u8>(), 0..16).prop_map(AttributeValue::Bytes),
        proptest::collection::vec(any::<i64>(), 0..4)
            .prop_map(|items| AttributeValue::Array(items.into_iter().map(Into::into).collect())),
    ]
}

fn attribute_map() -> impl Strategy<Value = Vec<(String, AttributeValue)>> {
    proptest::collection::btree_map("[a-z]{1,6}", scalar_value(), 0..6)
        .prop_map(|map| map.into_iter().collect())
}

fn as_borrowed(attributes: &[(String, AttributeValue)]) -> Vec<(&str, AttributeValue)> {
    attributes
        .iter()
        .map(|(key, value)| (key.as_str(), value.clone()))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Logically equal attribute maps collapse to one handle no matter
    /// how the entries are ordered.
    #[test]
    fn attribute_interning_is_order_insensitive(
        attributes in attribute_map(),
        seed in any::<u64>(),
    ) {
        let dir = TempDir::new().unwrap();
        let exporter =
            OtlpMmapExporter::with_config(dir.path().join("prop.mmap"), test_config()).unwrap();

        let forward = as_borrowed(&attributes);
        let mut shuffled = forward.clone();
        // Cheap deterministic shuffle driven by the seed.
        if !shuffled.is_empty() {
            for i in (1..shuffled.len()).rev() {
                let j = (seed as usize).wrapping_mul(31).wrapping_add(i) % (i + 1);
                shuffled.swap(i, j);
            }
        }

        let h1 = exporter.intern_attribute_set(&forward).unwrap();
        let h2 = exporter.intern_attribute_set(&shuffled).unwrap();
        prop_assert_eq!(h1, h2);

        // The shared handle resolves back to the original content.
        let mut reader = MmapReader::open(exporter.path()).unwrap();
        let resolved = reader.resolve_attribute_set(h1).unwrap();
        prop_assert_eq!(resolved.len(), attributes.len());
        for (key, value) in &attributes {
            let found = resolved.iter().find(|(k, _)| k == key);
            prop_assert_eq!(found.map(|(_, v)| v), Some(value));
        }

        exporter.close().unwrap();
    }

    /// Handles returned earlier keep resolving to the same entity no
    /// matter what is interned afterwards.
    #[test]
    fn handles_are_stable_across_later_interning(
        first in proptest::collection::vec("[a-z0-9.]{1,12}", 1..8),
        second in proptest::collection::vec("[a-z0-9.]{1,12}", 1..8),
    ) {
        let dir = TempDir::new().unwrap();
        let exporter =
            OtlpMmapExporter::with_config(dir.path().join("stable.mmap"), test_config()).unwrap();

        let mut minted: Vec<(String, u32)> = Vec::new();
        for value in &first {
            let handle = exporter.intern_string(value).unwrap();
            if !minted.iter().any(|(v, _)| v == value) {
                minted.push((value.clone(), handle));
            }
        }
        for value in &second {
            exporter.intern_string(value).unwrap();
        }

        // Earlier handles are unchanged by later interning.
        for (value, handle) in &minted {
            prop_assert_eq!(exporter.intern_string(value).unwrap(), *handle);
        }
        let mut reader = MmapReader::open(exporter.path()).unwrap();
        for (value, handle) in &minted {
            prop_assert_eq!(&reader.resolve_string(*handle).unwrap(), value);
        }

        exporter.close().unwrap();
    }

    /// Measurements survive the file round trip bit for bit.
    #[test]
    fn measurements_round_trip_through_the_file(
        time_ns in any::<u64>(),
        int_value in any::<i64>(),
        double_value in (-1.0e12..1.0e12f64),
        attributes in attribute_map(),
        with_context in any::<bool>(),
        trace_id in any::<[u8; 16]>(),
        span_id in any::<[u8; 8]>(),
    ) {
        let dir = TempDir::new().unwrap();
        let exporter =
            OtlpMmapExporter::with_config(dir.path().join("roundtrip.mmap"), test_config())
                .unwrap();

        let resource = exporter.create_resource(&[], None).unwrap();
        let scope = exporter
            .create_instrumentation_scope(resource, "prop", None, None)
            .unwrap();
        let stream = exporter
            .create_metric_stream(scope, "m", "", "1", Aggregation::Gauge)
            .unwrap();

        let context = with_context.then_some(SpanContext {
            trace_id,
            span_id,
            flags: 1,
        });
        let borrowed = as_borrowed(&attributes);
        exporter
            .record_measurement(stream, &borrowed, time_ns, MeasurementValue::Int(int_value), context)
            .unwrap();
        exporter
            .record_measurement(
                stream,
                &borrowed,
                time_ns,
                MeasurementValue::Double(double_value),
                context,
            )
            .unwrap();

        let mut reader = MmapReader::open(exporter.path()).unwrap();

        let bytes = reader.read_metric().unwrap().expect("int measurement");
        let LaneRecord::Measurement(m) = decode_lane_record(&bytes).unwrap() else {
            panic!("expected a measurement");
        };
        prop_assert_eq!(m.stream, stream);
        prop_assert_eq!(m.time_ns, time_ns);
        prop_assert_eq!(m.value, MeasurementValue::Int(int_value));
        prop_assert_eq!(m.span_context, context);

        let bytes = reader.read_metric().unwrap().expect("double measurement");
        let LaneRecord::Measurement(m) = decode_lane_record(&bytes).unwrap() else {
            panic!("expected a measurement");
        };
        prop_assert_eq!(m.value, MeasurementValue::Double(double_value));

        // Both measurements share one interned attribute set.
        let resolved = reader.resolve_attribute_set(m.attributes).unwrap();
        prop_assert_eq!(resolved.len(), attributes.len());

        prop_assert!(reader.read_metric().unwrap().is_none());
        exporter.close().unwrap();
    }
}
