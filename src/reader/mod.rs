//! Lane Reader
//!
//! Consumer side of the shared file, intended to run in a separate
//! collector process. One reader replays each lane in publication order
//! and resolves record handles against the dictionary region, which it
//! scans lazily: only when a handle is not cached yet does the reader
//! walk the dictionary forward. The reader never writes to the file; the
//! only synchronization with the producer is acquire loads of the cursor
//! and length words.

use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use tracing::debug;

use crate::error::{ExporterError, ExporterResult};
use crate::exporter::lane::{frame_len, FRAME_PREFIX, READY_BIT};
use crate::exporter::layout::{self, FileLayout, Region};
use crate::protocol::{
    self, AttributeSetHandle, AttributeValue, DictionaryRecord, MetricStreamHandle,
    MetricStreamRecord, ResourceHandle, ResourceRecord, ScopeHandle, ScopeRecord, StringHandle,
    ValueRef, HANDLE_ABSENT,
};

/// Index into the per-table handle sequence validators
const TABLE_STRING: usize = 0;
const TABLE_ATTRIBUTE_SET: usize = 1;
const TABLE_RESOURCE: usize = 2;
const TABLE_SCOPE: usize = 3;
const TABLE_METRIC_STREAM: usize = 4;

/// Replays records written by an [`crate::OtlpMmapExporter`]
pub struct MmapReader {
    path: PathBuf,
    map: Mmap,
    layout: FileLayout,
    /// Next read offset per region, in region-relative bytes
    read_offsets: [u64; 4],
    /// Next expected handle per dictionary table
    next_expected: [u32; 5],
    strings: HashMap<StringHandle, String>,
    attribute_sets: HashMap<AttributeSetHandle, Vec<(StringHandle, ValueRef)>>,
    resources: HashMap<ResourceHandle, ResourceRecord>,
    scopes: HashMap<ScopeHandle, ScopeRecord>,
    metric_streams: HashMap<MetricStreamHandle, MetricStreamRecord>,
}

impl MmapReader {
    /// Map an exporter file read-only and validate its header.
    pub fn open<P: AsRef<Path>>(path: P) -> ExporterResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| ExporterError::io(e, &path))?;
        let map = unsafe { Mmap::map(&file) }.map_err(|e| ExporterError::io(e, &path))?;
        let header = layout::read_header(&map, map.len() as u64, &path)?;

        debug!("reader attached to {:?}", path);

        Ok(Self {
            path,
            map,
            layout: header.layout,
            read_offsets: [0; 4],
            next_expected: [1; 5],
            strings: HashMap::new(),
            attribute_sets: HashMap::new(),
            resources: HashMap::new(),
            scopes: HashMap::new(),
            metric_streams: HashMap::new(),
        })
    }

    /// Path of the mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Next record from the metric lane, or `None` when caught up.
    pub fn read_metric(&mut self) -> ExporterResult<Option<Vec<u8>>> {
        self.read_next(Region::MetricLane)
    }

    /// Next record from the span lane, or `None` when caught up.
    pub fn read_span(&mut self) -> ExporterResult<Option<Vec<u8>>> {
        self.read_next(Region::SpanLane)
    }

    /// Next record from the event lane, or `None` when caught up.
    pub fn read_event(&mut self) -> ExporterResult<Option<Vec<u8>>> {
        self.read_next(Region::EventLane)
    }

    fn cursor(&self, region: Region) -> u64 {
        let offset = region.cursor_offset() as usize;
        let word = unsafe { &*(self.map.as_ptr().add(offset) as *const AtomicU64) };
        word.load(Ordering::Acquire)
    }

    fn length_word(&self, offset: u64) -> u32 {
        let word = unsafe { &*(self.map.as_ptr().add(offset as usize) as *const AtomicU32) };
        word.load(Ordering::Acquire)
    }

    /// Pop the next published frame of a region. Returns the record body
    /// (kind byte plus payload). `None` means caught up or the next frame
    /// is still mid-publish.
    fn read_next(&mut self, region: Region) -> ExporterResult<Option<Vec<u8>>> {
        let descriptor = self.layout.region(region);
        let offset = self.read_offsets[region as usize];
        let cursor = self.cursor(region).min(descriptor.capacity);
        if offset >= cursor {
            return Ok(None);
        }

        let word = self.length_word(descriptor.offset + offset);
        if word == 0 || word & READY_BIT == 0 {
            // Reserved but not yet published.
            return Ok(None);
        }
        let len = (word & !READY_BIT) as u64;
        if len == 0 || offset + frame_len(len as usize) > descriptor.capacity {
            return Err(ExporterError::CorruptFile {
                path: self.path.clone(),
                detail: format!(
                    "{} region frame of {len} bytes at offset {offset} does not fit",
                    region.name()
                ),
            });
        }

        let start = (descriptor.offset + offset + FRAME_PREFIX) as usize;
        let body = self.map[start..start + len as usize].to_vec();
        self.read_offsets[region as usize] = offset + frame_len(len as usize);
        Ok(Some(body))
    }

    /// Consume one dictionary record into the caches. Returns `false`
    /// when the dictionary is drained.
    fn scan_dictionary_step(&mut self) -> ExporterResult<bool> {
        let Some(body) = self.read_next(Region::Dictionary)? else {
            return Ok(false);
        };
        let record = protocol::decode_dictionary_record(&body)?;
        self.cache_record(record)?;
        Ok(true)
    }

    /// Dictionary records carry their handle explicitly; per table the
    /// sequence must be gapless and ascending.
    fn check_sequence(&mut self, table: usize, handle: u32, name: &'static str) -> ExporterResult<()> {
        if handle != self.next_expected[table] {
            return Err(ExporterError::CorruptFile {
                path: self.path.clone(),
                detail: format!(
                    "{name} dictionary entry out of sequence: handle {handle}, expected {}",
                    self.next_expected[table]
                ),
            });
        }
        self.next_expected[table] = handle + 1;
        Ok(())
    }

    fn cache_record(&mut self, record: DictionaryRecord) -> ExporterResult<()> {
        match record {
            DictionaryRecord::String { handle, value } => {
                self.check_sequence(TABLE_STRING, handle, "string")?;
                self.strings.insert(handle, value);
            }
            DictionaryRecord::AttributeSet { handle, entries } => {
                self.check_sequence(TABLE_ATTRIBUTE_SET, handle, "attribute set")?;
                self.attribute_sets.insert(handle, entries);
            }
            DictionaryRecord::Resource(record) => {
                self.check_sequence(TABLE_RESOURCE, record.handle, "resource")?;
                self.resources.insert(record.handle, record);
            }
            DictionaryRecord::Scope(record) => {
                self.check_sequence(TABLE_SCOPE, record.handle, "scope")?;
                self.scopes.insert(record.handle, record);
            }
            DictionaryRecord::MetricStream(record) => {
                self.check_sequence(TABLE_METRIC_STREAM, record.handle, "metric stream")?;
                self.metric_streams.insert(record.handle, record);
            }
        }
        Ok(())
    }

    /// Resolve a string handle, walking the dictionary forward as needed.
    pub fn resolve_string(&mut self, handle: StringHandle) -> ExporterResult<String> {
        while !self.strings.contains_key(&handle) {
            if handle == HANDLE_ABSENT || !self.scan_dictionary_step()? {
                return Err(ExporterError::UnknownHandle {
                    table: "string",
                    handle,
                });
            }
        }
        Ok(self.strings[&handle].clone())
    }

    /// Resolve an attribute set into decoded key-value pairs, sorted by
    /// key handle.
    pub fn resolve_attribute_set(
        &mut self,
        handle: AttributeSetHandle,
    ) -> ExporterResult<Vec<(String, AttributeValue)>> {
        while !self.attribute_sets.contains_key(&handle) {
            if handle == HANDLE_ABSENT || !self.scan_dictionary_step()? {
                return Err(ExporterError::UnknownHandle {
                    table: "attribute set",
                    handle,
                });
            }
        }
        let entries = self.attribute_sets[&handle].clone();
        let mut resolved = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let key = self.resolve_string(key)?;
            let value = self.resolve_value(&value)?;
            resolved.push((key, value));
        }
        Ok(resolved)
    }

    fn resolve_value(&mut self, value: &ValueRef) -> ExporterResult<AttributeValue> {
        Ok(match value {
            ValueRef::String(handle) => AttributeValue::String(self.resolve_string(*handle)?),
            ValueRef::Int(v) => AttributeValue::Int(*v),
            ValueRef::Double(bits) => AttributeValue::Double(f64::from_bits(*bits)),
            ValueRef::Bool(v) => AttributeValue::Bool(*v),
            ValueRef::Bytes(v) => AttributeValue::Bytes(v.clone()),
            ValueRef::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    resolved.push(self.resolve_value(item)?);
                }
                AttributeValue::Array(resolved)
            }
        })
    }

    /// Resolve a resource handle to its dictionary entry.
    pub fn resolve_resource(&mut self, handle: ResourceHandle) -> ExporterResult<ResourceRecord> {
        while !self.resources.contains_key(&handle) {
            if handle == HANDLE_ABSENT || !self.scan_dictionary_step()? {
                return Err(ExporterError::UnknownHandle {
                    table: "resource",
                    handle,
                });
            }
        }
        Ok(self.resources[&handle].clone())
    }

    /// Resolve a scope handle to its dictionary entry.
    pub fn resolve_scope(&mut self, handle: ScopeHandle) -> ExporterResult<ScopeRecord> {
        while !self.scopes.contains_key(&handle) {
            if handle == HANDLE_ABSENT || !self.scan_dictionary_step()? {
                return Err(ExporterError::UnknownHandle {
                    table: "scope",
                    handle,
                });
            }
        }
        Ok(self.scopes[&handle].clone())
    }

    /// Resolve a metric stream handle to its dictionary entry.
    pub fn resolve_metric_stream(
        &mut self,
        handle: MetricStreamHandle,
    ) -> ExporterResult<MetricStreamRecord> {
        while !self.metric_streams.contains_key(&handle) {
            if handle == HANDLE_ABSENT || !self.scan_dictionary_step()? {
                return Err(ExporterError::UnknownHandle {
                    table: "metric stream",
                    handle,
                });
            }
        }
        Ok(self.metric_streams[&handle].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExporterConfig;
    use crate::exporter::OtlpMmapExporter;
    use crate::protocol::{LaneRecord, MeasurementValue};
    use tempfile::TempDir;

    fn small_config() -> ExporterConfig {
        ExporterConfig::builder()
            .dictionary_capacity(64 * 1024)
            .metric_lane_capacity(64 * 1024)
            .span_lane_capacity(64 * 1024)
            .event_lane_capacity(64 * 1024)
            .build()
            .unwrap()
    }

    #[test]
    fn fresh_file_reads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.mmap");
        let exporter = OtlpMmapExporter::with_config(&path, small_config()).unwrap();

        let mut reader = MmapReader::open(&path).unwrap();
        assert!(reader.read_metric().unwrap().is_none());
        assert!(reader.read_span().unwrap().is_none());
        assert!(reader.read_event().unwrap().is_none());

        exporter.close().unwrap();
    }

    #[test]
    fn reader_catches_up_and_reports_empty_again() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catchup.mmap");
        let exporter = OtlpMmapExporter::with_config(&path, small_config()).unwrap();

        let resource = exporter.create_resource(&[], None).unwrap();
        let scope = exporter
            .create_instrumentation_scope(resource, "scope", None, None)
            .unwrap();
        let stream = exporter
            .create_metric_stream(scope, "m", "", "1", crate::protocol::Aggregation::Gauge)
            .unwrap();

        let mut reader = MmapReader::open(&path).unwrap();
        assert!(reader.read_metric().unwrap().is_none());

        exporter
            .record_measurement(stream, &[], 10, MeasurementValue::Int(1), None)
            .unwrap();
        exporter
            .record_measurement(stream, &[], 20, MeasurementValue::Int(2), None)
            .unwrap();

        let first = reader.read_metric().unwrap().unwrap();
        let second = reader.read_metric().unwrap().unwrap();
        assert!(reader.read_metric().unwrap().is_none());

        match protocol::decode_lane_record(&first).unwrap() {
            LaneRecord::Measurement(m) => assert_eq!(m.time_ns, 10),
            other => panic!("unexpected record {other:?}"),
        }
        match protocol::decode_lane_record(&second).unwrap() {
            LaneRecord::Measurement(m) => assert_eq!(m.time_ns, 20),
            other => panic!("unexpected record {other:?}"),
        }

        exporter.close().unwrap();
    }

    #[test]
    fn unknown_handle_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("unknown.mmap");
        let exporter = OtlpMmapExporter::with_config(&path, small_config()).unwrap();

        let mut reader = MmapReader::open(&path).unwrap();
        assert!(matches!(
            reader.resolve_string(7),
            Err(ExporterError::UnknownHandle { .. })
        ));
        assert!(matches!(
            reader.resolve_string(HANDLE_ABSENT),
            Err(ExporterError::UnknownHandle { .. })
        ));

        exporter.close().unwrap();
    }

    #[test]
    fn dictionary_is_scanned_lazily() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lazy.mmap");
        let exporter = OtlpMmapExporter::with_config(&path, small_config()).unwrap();

        let early = exporter.intern_string("early").unwrap();
        let mut reader = MmapReader::open(&path).unwrap();

        // Interned after the reader attached; the lazy walk still finds it.
        let late = exporter.intern_string("late").unwrap();
        assert_eq!(reader.resolve_string(late).unwrap(), "late");
        assert_eq!(reader.resolve_string(early).unwrap(), "early");

        exporter.close().unwrap();
    }
}
