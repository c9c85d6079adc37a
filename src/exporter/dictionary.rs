//! Interning Dictionary
//!
//! Deduplication tables for strings, attribute sets, resources,
//! instrumentation scopes and metric streams. Each table maps a canonical
//! key to a 32-bit handle minted from 1; the first time a handle is minted
//! the corresponding dictionary record is appended to the dictionary
//! region, before the table lock is released. A record that references a
//! handle therefore can never be published ahead of the dictionary entry
//! that defines it.
//!
//! Canonicalization: strings compare by byte identity; attribute sets are
//! sorted by key handle and compare structurally, with doubles compared by
//! IEEE-754 bit pattern; aggregation descriptors compare structurally with
//! histogram boundaries element-wise.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::{ExporterError, ExporterResult};
use crate::exporter::lane::LaneWriter;
use crate::exporter::layout::{FileLayout, Region};
use crate::exporter::memory_map::MappedFile;
use crate::protocol::{
    self, Aggregation, AttributeSetHandle, AttributeValue, DictionaryRecord, MetricStreamHandle,
    MetricStreamRecord, ResourceHandle, ResourceRecord, ScopeHandle, ScopeRecord, StringHandle,
    ValueRef, HANDLE_ABSENT,
};

/// Intern table: canonical key to handle, next handle to mint
struct InternTable<K> {
    map: HashMap<K, u32>,
    next: u32,
}

impl<K: std::hash::Hash + Eq> InternTable<K> {
    fn new() -> Self {
        Self {
            map: HashMap::new(),
            next: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResourceKey {
    attributes: u32,
    schema_url: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScopeKey {
    resource: u32,
    name: u32,
    version: u32,
    attributes: u32,
}

/// Hashable form of an aggregation descriptor; doubles as bits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AggregationKey {
    Sum { temporality: u8, is_monotonic: bool },
    Gauge,
    Histogram { temporality: u8, boundaries: Vec<u64> },
}

impl AggregationKey {
    fn from_aggregation(aggregation: &Aggregation) -> Self {
        match aggregation {
            Aggregation::Sum {
                temporality,
                is_monotonic,
            } => Self::Sum {
                temporality: *temporality as u8,
                is_monotonic: *is_monotonic,
            },
            Aggregation::Gauge => Self::Gauge,
            Aggregation::Histogram {
                temporality,
                bucket_boundaries,
            } => Self::Histogram {
                temporality: *temporality as u8,
                boundaries: bucket_boundaries.iter().map(|b| b.to_bits()).collect(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    scope: u32,
    name: u32,
    description: u32,
    unit: u32,
    aggregation: AggregationKey,
}

/// The five intern tables plus the dictionary-region appender
pub struct Dictionary {
    writer: LaneWriter,
    strings: Mutex<InternTable<String>>,
    attribute_sets: Mutex<InternTable<Vec<(StringHandle, ValueRef)>>>,
    resources: Mutex<InternTable<ResourceKey>>,
    scopes: Mutex<InternTable<ScopeKey>>,
    metric_streams: Mutex<InternTable<StreamKey>>,
    // Highest minted handle per table, readable without the table lock.
    strings_minted: AtomicU32,
    attribute_sets_minted: AtomicU32,
    resources_minted: AtomicU32,
    scopes_minted: AtomicU32,
    metric_streams_minted: AtomicU32,
}

impl Dictionary {
    pub fn new(file: Arc<MappedFile>, layout: &FileLayout) -> Self {
        Self {
            writer: LaneWriter::new(file, Region::Dictionary, layout),
            strings: Mutex::new(InternTable::new()),
            attribute_sets: Mutex::new(InternTable::new()),
            resources: Mutex::new(InternTable::new()),
            scopes: Mutex::new(InternTable::new()),
            metric_streams: Mutex::new(InternTable::new()),
            strings_minted: AtomicU32::new(0),
            attribute_sets_minted: AtomicU32::new(0),
            resources_minted: AtomicU32::new(0),
            scopes_minted: AtomicU32::new(0),
            metric_streams_minted: AtomicU32::new(0),
        }
    }

    /// Intern a string, returning the existing handle on a cache hit.
    pub fn intern_string(&self, value: &str) -> ExporterResult<StringHandle> {
        let mut table = self.strings.lock();
        if let Some(&handle) = table.map.get(value) {
            return Ok(handle);
        }
        let handle = table.next;
        self.writer
            .append(&protocol::encode_string_entry(handle, value))?;
        table.map.insert(value.to_string(), handle);
        table.next += 1;
        self.strings_minted.store(handle, Ordering::Release);
        Ok(handle)
    }

    /// Intern an attribute map. Entry order does not matter; logically
    /// equal maps collapse to the same handle.
    pub fn intern_attribute_set(
        &self,
        attributes: &[(&str, AttributeValue)],
    ) -> ExporterResult<AttributeSetHandle> {
        let mut entries = Vec::with_capacity(attributes.len());
        for (key, value) in attributes {
            let key_handle = self.intern_string(key)?;
            entries.push((key_handle, self.encode_value(value)?));
        }
        entries.sort_by_key(|(key, _)| *key);
        for pair in entries.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(ExporterError::invalid(format!(
                    "duplicate attribute key (handle {})",
                    pair[0].0
                )));
            }
        }

        let mut table = self.attribute_sets.lock();
        if let Some(&handle) = table.map.get(&entries) {
            return Ok(handle);
        }
        let handle = table.next;
        self.writer
            .append(&protocol::encode_attribute_set_entry(handle, &entries))?;
        table.map.insert(entries, handle);
        table.next += 1;
        self.attribute_sets_minted.store(handle, Ordering::Release);
        Ok(handle)
    }

    /// Intern a resource: an attribute set plus an optional schema URL.
    pub fn intern_resource(
        &self,
        attributes: AttributeSetHandle,
        schema_url: Option<StringHandle>,
    ) -> ExporterResult<ResourceHandle> {
        self.check_attribute_set(attributes)?;
        let schema_url = schema_url.unwrap_or(HANDLE_ABSENT);

        let key = ResourceKey {
            attributes,
            schema_url,
        };
        let mut table = self.resources.lock();
        if let Some(&handle) = table.map.get(&key) {
            return Ok(handle);
        }
        let handle = table.next;
        self.writer.append(&protocol::encode_resource_entry(
            &ResourceRecord {
                handle,
                attributes,
                schema_url,
            },
        ))?;
        table.map.insert(key, handle);
        table.next += 1;
        self.resources_minted.store(handle, Ordering::Release);
        Ok(handle)
    }

    /// Intern an instrumentation scope. Version and attributes are
    /// optional; `HANDLE_ABSENT` marks them missing.
    pub fn intern_scope(
        &self,
        resource: ResourceHandle,
        name: StringHandle,
        version: StringHandle,
        attributes: AttributeSetHandle,
    ) -> ExporterResult<ScopeHandle> {
        self.check_resource(resource)?;
        if attributes != HANDLE_ABSENT {
            self.check_attribute_set(attributes)?;
        }

        let key = ScopeKey {
            resource,
            name,
            version,
            attributes,
        };
        let mut table = self.scopes.lock();
        if let Some(&handle) = table.map.get(&key) {
            return Ok(handle);
        }
        let handle = table.next;
        self.writer.append(&protocol::encode_scope_entry(&ScopeRecord {
            handle,
            resource,
            name,
            version,
            attributes,
        }))?;
        table.map.insert(key, handle);
        table.next += 1;
        self.scopes_minted.store(handle, Ordering::Release);
        Ok(handle)
    }

    /// Intern a metric stream descriptor.
    pub fn intern_metric_stream(
        &self,
        scope: ScopeHandle,
        name: StringHandle,
        description: StringHandle,
        unit: StringHandle,
        aggregation: &Aggregation,
    ) -> ExporterResult<MetricStreamHandle> {
        self.check_scope(scope)?;
        validate_aggregation(aggregation)?;

        let key = StreamKey {
            scope,
            name,
            description,
            unit,
            aggregation: AggregationKey::from_aggregation(aggregation),
        };
        let mut table = self.metric_streams.lock();
        if let Some(&handle) = table.map.get(&key) {
            return Ok(handle);
        }
        let handle = table.next;
        self.writer
            .append(&protocol::encode_metric_stream_entry(&MetricStreamRecord {
                handle,
                scope,
                name,
                description,
                unit,
                aggregation: aggregation.clone(),
            }))?;
        table.map.insert(key, handle);
        table.next += 1;
        self.metric_streams_minted.store(handle, Ordering::Release);
        Ok(handle)
    }

    /// Convert a caller-supplied value into its interned form, interning
    /// nested strings. Arrays must be homogeneous and flat.
    fn encode_value(&self, value: &AttributeValue) -> ExporterResult<ValueRef> {
        Ok(match value {
            AttributeValue::String(s) => ValueRef::String(self.intern_string(s)?),
            AttributeValue::Int(v) => ValueRef::Int(*v),
            AttributeValue::Double(v) => ValueRef::Double(v.to_bits()),
            AttributeValue::Bool(v) => ValueRef::Bool(*v),
            AttributeValue::Bytes(v) => ValueRef::Bytes(v.clone()),
            AttributeValue::Array(items) => {
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    if matches!(item, AttributeValue::Array(_)) {
                        return Err(ExporterError::invalid("nested array attribute value"));
                    }
                    refs.push(self.encode_value(item)?);
                }
                if let Some(first) = refs.first() {
                    let first = std::mem::discriminant(first);
                    if refs.iter().any(|r| std::mem::discriminant(r) != first) {
                        return Err(ExporterError::invalid(
                            "array attribute values must be homogeneous",
                        ));
                    }
                }
                ValueRef::Array(refs)
            }
        })
    }

    pub fn check_string(&self, handle: StringHandle) -> ExporterResult<()> {
        self.check_handle(handle, &self.strings_minted, "string")
    }

    pub fn check_attribute_set(&self, handle: AttributeSetHandle) -> ExporterResult<()> {
        self.check_handle(handle, &self.attribute_sets_minted, "attribute set")
    }

    pub fn check_resource(&self, handle: ResourceHandle) -> ExporterResult<()> {
        self.check_handle(handle, &self.resources_minted, "resource")
    }

    pub fn check_scope(&self, handle: ScopeHandle) -> ExporterResult<()> {
        self.check_handle(handle, &self.scopes_minted, "scope")
    }

    pub fn check_metric_stream(&self, handle: MetricStreamHandle) -> ExporterResult<()> {
        self.check_handle(handle, &self.metric_streams_minted, "metric stream")
    }

    fn check_handle(
        &self,
        handle: u32,
        minted: &AtomicU32,
        what: &'static str,
    ) -> ExporterResult<()> {
        if handle == HANDLE_ABSENT || handle > minted.load(Ordering::Acquire) {
            return Err(ExporterError::invalid(format!(
                "{what} handle {handle} was never interned"
            )));
        }
        Ok(())
    }

    /// Rebuild one table entry from a dictionary record read back out of
    /// an existing file. Handles must arrive in mint order per table.
    pub fn restore_entry(&self, record: DictionaryRecord) -> ExporterResult<()> {
        match record {
            DictionaryRecord::String { handle, value } => {
                let mut table = self.strings.lock();
                check_restored_handle(handle, table.next, "string")?;
                table.map.insert(value, handle);
                table.next = handle + 1;
                self.strings_minted.store(handle, Ordering::Release);
            }
            DictionaryRecord::AttributeSet { handle, entries } => {
                let mut table = self.attribute_sets.lock();
                check_restored_handle(handle, table.next, "attribute set")?;
                table.map.insert(entries, handle);
                table.next = handle + 1;
                self.attribute_sets_minted.store(handle, Ordering::Release);
            }
            DictionaryRecord::Resource(record) => {
                let mut table = self.resources.lock();
                check_restored_handle(record.handle, table.next, "resource")?;
                table.map.insert(
                    ResourceKey {
                        attributes: record.attributes,
                        schema_url: record.schema_url,
                    },
                    record.handle,
                );
                table.next = record.handle + 1;
                self.resources_minted.store(record.handle, Ordering::Release);
            }
            DictionaryRecord::Scope(record) => {
                let mut table = self.scopes.lock();
                check_restored_handle(record.handle, table.next, "scope")?;
                table.map.insert(
                    ScopeKey {
                        resource: record.resource,
                        name: record.name,
                        version: record.version,
                        attributes: record.attributes,
                    },
                    record.handle,
                );
                table.next = record.handle + 1;
                self.scopes_minted.store(record.handle, Ordering::Release);
            }
            DictionaryRecord::MetricStream(record) => {
                let mut table = self.metric_streams.lock();
                check_restored_handle(record.handle, table.next, "metric stream")?;
                table.map.insert(
                    StreamKey {
                        scope: record.scope,
                        name: record.name,
                        description: record.description,
                        unit: record.unit,
                        aggregation: AggregationKey::from_aggregation(&record.aggregation),
                    },
                    record.handle,
                );
                table.next = record.handle + 1;
                self.metric_streams_minted
                    .store(record.handle, Ordering::Release);
            }
        }
        Ok(())
    }
}

fn check_restored_handle(handle: u32, expected: u32, table: &'static str) -> ExporterResult<()> {
    if handle != expected {
        return Err(ExporterError::decode(format!(
            "{table} dictionary entry out of order: handle {handle}, expected {expected}"
        )));
    }
    Ok(())
}

/// Histogram boundaries must be finite and strictly ascending; an empty
/// list is allowed and means sum-and-count only.
fn validate_aggregation(aggregation: &Aggregation) -> ExporterResult<()> {
    if let Aggregation::Histogram {
        bucket_boundaries, ..
    } = aggregation
    {
        for boundary in bucket_boundaries {
            if !boundary.is_finite() {
                return Err(ExporterError::invalid(format!(
                    "histogram bucket boundary {boundary} is not finite"
                )));
            }
        }
        if bucket_boundaries.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(ExporterError::invalid(
                "histogram bucket boundaries must be strictly ascending",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use crate::exporter::layout::{self, HEADER_SIZE};
    use crate::protocol::Temporality;
    use tempfile::TempDir;

    fn dictionary() -> (TempDir, Dictionary, Arc<MappedFile>) {
        let dir = TempDir::new().unwrap();
        let config = ExporterConfig::builder()
            .dictionary_capacity(64 * 1024)
            .metric_lane_capacity(256)
            .span_lane_capacity(256)
            .event_lane_capacity(256)
            .build()
            .unwrap();
        let layout = FileLayout::from_config(&config);
        let file = Arc::new(
            MappedFile::create(dir.path().join("dict.mmap"), layout.file_size()).unwrap(),
        );
        let mut header = vec![0u8; HEADER_SIZE as usize];
        layout::write_header(&mut header, &layout, 0);
        file.write_at(0, &header).unwrap();
        let dictionary = Dictionary::new(Arc::clone(&file), &layout);
        (dir, dictionary, file)
    }

    fn dictionary_cursor(file: &MappedFile) -> u64 {
        file.atomic_u64(Region::Dictionary.cursor_offset())
            .load(Ordering::Acquire)
    }

    #[test]
    fn strings_dedup_by_content() {
        let (_dir, dict, file) = dictionary();
        let a = dict.intern_string("service.name").unwrap();
        let cursor = dictionary_cursor(&file);
        let b = dict.intern_string("service.name").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, 1);
        // no second dictionary record was written
        assert_eq!(dictionary_cursor(&file), cursor);

        let c = dict.intern_string("service.version").unwrap();
        assert_eq!(c, 2);
    }

    #[test]
    fn attribute_sets_dedup_regardless_of_order() {
        let (_dir, dict, file) = dictionary();
        let a = dict
            .intern_attribute_set(&[("a", 1i64.into()), ("b", 2i64.into())])
            .unwrap();
        let cursor = dictionary_cursor(&file);
        let b = dict
            .intern_attribute_set(&[("b", 2i64.into()), ("a", 1i64.into())])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(dictionary_cursor(&file), cursor);
    }

    #[test]
    fn attribute_sets_distinguish_values() {
        let (_dir, dict, _file) = dictionary();
        let a = dict.intern_attribute_set(&[("a", 1i64.into())]).unwrap();
        let b = dict.intern_attribute_set(&[("a", 2i64.into())]).unwrap();
        let c = dict
            .intern_attribute_set(&[("a", AttributeValue::Double(1.0))])
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let (_dir, dict, _file) = dictionary();
        let result = dict.intern_attribute_set(&[("a", 1i64.into()), ("a", 2i64.into())]);
        assert!(matches!(
            result,
            Err(ExporterError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn nested_and_mixed_arrays_are_rejected() {
        let (_dir, dict, _file) = dictionary();
        let nested = AttributeValue::Array(vec![AttributeValue::Array(vec![1i64.into()])]);
        assert!(dict.intern_attribute_set(&[("a", nested)]).is_err());

        let mixed = AttributeValue::Array(vec![1i64.into(), "x".into()]);
        assert!(dict.intern_attribute_set(&[("a", mixed)]).is_err());
    }

    #[test]
    fn resources_dedup_and_validate_handles() {
        let (_dir, dict, _file) = dictionary();
        let attrs = dict.intern_attribute_set(&[("a", 1i64.into())]).unwrap();
        let r1 = dict.intern_resource(attrs, None).unwrap();
        let r2 = dict.intern_resource(attrs, None).unwrap();
        assert_eq!(r1, r2);

        let schema = dict.intern_string("https://example.com/schema").unwrap();
        let r3 = dict.intern_resource(attrs, Some(schema)).unwrap();
        assert_ne!(r1, r3);

        assert!(dict.intern_resource(99, None).is_err());
    }

    #[test]
    fn metric_streams_dedup_on_full_identity() {
        let (_dir, dict, _file) = dictionary();
        let attrs = dict.intern_attribute_set(&[]).unwrap();
        let resource = dict.intern_resource(attrs, None).unwrap();
        let name = dict.intern_string("scope").unwrap();
        let scope = dict
            .intern_scope(resource, name, HANDLE_ABSENT, HANDLE_ABSENT)
            .unwrap();

        let metric_name = dict.intern_string("requests").unwrap();
        let desc = dict.intern_string("").unwrap();
        let unit = dict.intern_string("1").unwrap();
        let sum = Aggregation::Sum {
            temporality: Temporality::Delta,
            is_monotonic: true,
        };
        let m1 = dict
            .intern_metric_stream(scope, metric_name, desc, unit, &sum)
            .unwrap();
        let m2 = dict
            .intern_metric_stream(scope, metric_name, desc, unit, &sum)
            .unwrap();
        assert_eq!(m1, m2);

        let gauge = dict
            .intern_metric_stream(scope, metric_name, desc, unit, &Aggregation::Gauge)
            .unwrap();
        assert_ne!(m1, gauge);
    }

    #[test]
    fn histogram_boundaries_are_validated() {
        let (_dir, dict, _file) = dictionary();
        let attrs = dict.intern_attribute_set(&[]).unwrap();
        let resource = dict.intern_resource(attrs, None).unwrap();
        let name = dict.intern_string("scope").unwrap();
        let scope = dict
            .intern_scope(resource, name, HANDLE_ABSENT, HANDLE_ABSENT)
            .unwrap();
        let s = dict.intern_string("h").unwrap();

        let nan = Aggregation::Histogram {
            temporality: Temporality::Delta,
            bucket_boundaries: vec![1.0, f64::NAN],
        };
        assert!(dict.intern_metric_stream(scope, s, s, s, &nan).is_err());

        let unsorted = Aggregation::Histogram {
            temporality: Temporality::Delta,
            bucket_boundaries: vec![2.0, 1.0],
        };
        assert!(dict
            .intern_metric_stream(scope, s, s, s, &unsorted)
            .is_err());

        // Repeated boundaries would define an empty bucket.
        let repeated = Aggregation::Histogram {
            temporality: Temporality::Delta,
            bucket_boundaries: vec![1.0, 1.0, 2.0],
        };
        assert!(dict
            .intern_metric_stream(scope, s, s, s, &repeated)
            .is_err());

        let empty = Aggregation::Histogram {
            temporality: Temporality::Delta,
            bucket_boundaries: vec![],
        };
        assert!(dict.intern_metric_stream(scope, s, s, s, &empty).is_ok());
    }

    #[test]
    fn restore_rebuilds_handle_sequence() {
        let (_dir, dict, _file) = dictionary();
        dict.restore_entry(DictionaryRecord::String {
            handle: 1,
            value: "endpoint".to_string(),
        })
        .unwrap();
        dict.restore_entry(DictionaryRecord::String {
            handle: 2,
            value: "/".to_string(),
        })
        .unwrap();

        // existing content resolves to the restored handles
        assert_eq!(dict.intern_string("endpoint").unwrap(), 1);
        // fresh content continues the sequence
        assert_eq!(dict.intern_string("latency").unwrap(), 3);

        // out-of-order restore is rejected
        let result = dict.restore_entry(DictionaryRecord::String {
            handle: 9,
            value: "gap".to_string(),
        });
        assert!(result.is_err());
    }
}
