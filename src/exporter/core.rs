//! Core Exporter Implementation
//!
//! The recording façade that instrumentation adapters call, and the
//! process-wide registry that guarantees a single exporter instance per
//! backing file path. The façade resolves every attribute map and name
//! through the dictionary, then appends a fixed-size record to the
//! matching lane. Capacity exhaustion on a lane is absorbed here: the
//! record is discarded, the lane's drop counter is bumped, and the
//! accumulated count is surfaced as an internal metric on the next
//! successful append.

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::config::ExporterConfig;
use crate::error::{ExporterError, ExporterResult};
use crate::exporter::collector::{AsyncCollector, CallbackId, Observation};
use crate::exporter::dictionary::Dictionary;
use crate::exporter::lane::{frame_len, LaneStats, LaneWriter, READY_BIT};
use crate::exporter::layout::{self, FileLayout, Region, HEADER_SIZE};
use crate::exporter::memory_map::MappedFile;
use crate::exporter::Lane;
use crate::protocol::{
    self, Aggregation, AttributeSetHandle, AttributeValue, EventRecord, MeasurementRecord,
    MeasurementValue, MetricStreamHandle, ResourceHandle, ScopeHandle, SpanContext, SpanKind,
    SpanStartRecord, StringHandle, HANDLE_ABSENT,
};

/// Scope name under which the exporter's own telemetry is recorded
const INTERNAL_SCOPE_NAME: &str = "otlp.mmap.exporter";

/// Metric stream counting records dropped on full lanes
const DROPPED_RECORDS_METRIC: &str = "otlp.mmap.dropped_records";

/// One exporter per canonical file path per process
static EXPORTERS: Lazy<DashMap<PathBuf, Arc<OtlpMmapExporter>>> = Lazy::new(DashMap::new);

/// Event name given either inline or as a pre-interned handle
#[derive(Debug, Clone, Copy)]
pub enum EventName<'a> {
    Str(&'a str),
    Handle(StringHandle),
}

impl<'a> From<&'a str> for EventName<'a> {
    fn from(value: &'a str) -> Self {
        Self::Str(value)
    }
}

impl From<StringHandle> for EventName<'_> {
    fn from(value: StringHandle) -> Self {
        Self::Handle(value)
    }
}

/// Lazily interned handles for the drop-counter metric
struct DropsInstrument {
    stream: MetricStreamHandle,
    lane_attributes: [AttributeSetHandle; 3],
}

/// State shared between the façade and the collector worker
pub(crate) struct ExporterShared {
    file: Arc<MappedFile>,
    dictionary: Dictionary,
    metric_lane: LaneWriter,
    span_lane: LaneWriter,
    event_lane: LaneWriter,
    drops_instrument: OnceCell<DropsInstrument>,
}

impl ExporterShared {
    fn lane_writer(&self, lane: Lane) -> &LaneWriter {
        match lane {
            Lane::Metric => &self.metric_lane,
            Lane::Span => &self.span_lane,
            Lane::Event => &self.event_lane,
        }
    }

    /// Append a record body to a lane, absorbing capacity exhaustion.
    fn append_or_drop(&self, lane: Lane, body: &[u8]) -> ExporterResult<()> {
        let writer = self.lane_writer(lane);
        match writer.append(body) {
            Ok(()) => {
                self.report_pending_drops();
                Ok(())
            }
            Err(ExporterError::LaneFull { .. }) => {
                writer.count_drop();
                debug!("dropped record on full {} lane", writer.name());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Intern an attribute map for a record heading to `lane`. A full
    /// dictionary is treated like a full lane: the record is dropped.
    fn intern_record_attributes(
        &self,
        lane: Lane,
        attributes: &[(&str, AttributeValue)],
    ) -> ExporterResult<Option<AttributeSetHandle>> {
        match self.dictionary.intern_attribute_set(attributes) {
            Ok(handle) => Ok(Some(handle)),
            Err(ExporterError::LaneFull { .. }) => {
                self.lane_writer(lane).count_drop();
                debug!(
                    "dropped {} record: dictionary region full",
                    lane.name()
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn record_measurement(
        &self,
        stream: MetricStreamHandle,
        attributes: &[(&str, AttributeValue)],
        time_ns: u64,
        value: MeasurementValue,
        span_context: Option<SpanContext>,
    ) -> ExporterResult<()> {
        self.dictionary.check_metric_stream(stream)?;
        let Some(attributes) = self.intern_record_attributes(Lane::Metric, attributes)? else {
            return Ok(());
        };
        let body = protocol::encode_measurement(&MeasurementRecord {
            stream,
            attributes,
            time_ns,
            value,
            span_context,
        });
        self.append_or_drop(Lane::Metric, &body)
    }

    /// Record one collector observation. Failures never propagate out of
    /// the collector tick; they are counted as metric-lane drops.
    pub(crate) fn record_observation(&self, stream: MetricStreamHandle, observation: &Observation) {
        let attributes: Vec<(&str, AttributeValue)> = observation
            .attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.clone()))
            .collect();
        let result = self.record_measurement(
            stream,
            &attributes,
            now_unix_ns(),
            observation.value,
            None,
        );
        if let Err(e) = result {
            debug!("dropped observation for metric stream {stream}: {e}");
            self.metric_lane.count_drop();
        }
    }

    /// Count a failed observable callback as a metric-lane drop.
    pub(crate) fn count_callback_drop(&self) {
        self.metric_lane.count_drop();
    }

    /// Surface accumulated drop counts as measurements on the internal
    /// drop-counter stream. Failures re-bank the counts for a later
    /// attempt; this path never recurses into itself.
    fn report_pending_drops(&self) {
        for lane in Lane::ALL {
            let writer = self.lane_writer(lane);
            let pending = writer.take_unreported_drops();
            if pending == 0 {
                continue;
            }
            let Some(instrument) = self.drops_instrument() else {
                writer.restore_unreported_drops(pending);
                continue;
            };
            let body = protocol::encode_measurement(&MeasurementRecord {
                stream: instrument.stream,
                attributes: instrument.lane_attributes[lane as usize],
                time_ns: now_unix_ns(),
                value: MeasurementValue::Int(writer.dropped_total() as i64),
                span_context: None,
            });
            if self.metric_lane.append(&body).is_err() {
                writer.restore_unreported_drops(pending);
            }
        }
    }

    fn drops_instrument(&self) -> Option<&DropsInstrument> {
        self.drops_instrument
            .get_or_try_init(|| {
                let attributes = self.dictionary.intern_attribute_set(&[])?;
                let resource = self.dictionary.intern_resource(attributes, None)?;
                let scope_name = self.dictionary.intern_string(INTERNAL_SCOPE_NAME)?;
                let scope = self.dictionary.intern_scope(
                    resource,
                    scope_name,
                    HANDLE_ABSENT,
                    HANDLE_ABSENT,
                )?;
                let name = self.dictionary.intern_string(DROPPED_RECORDS_METRIC)?;
                let description = self
                    .dictionary
                    .intern_string("Records discarded because a lane was full")?;
                let unit = self.dictionary.intern_string("1")?;
                let stream = self.dictionary.intern_metric_stream(
                    scope,
                    name,
                    description,
                    unit,
                    &Aggregation::Sum {
                        temporality: crate::protocol::Temporality::Cumulative,
                        is_monotonic: true,
                    },
                )?;
                let mut lane_attributes = [HANDLE_ABSENT; 3];
                for lane in Lane::ALL {
                    lane_attributes[lane as usize] = self
                        .dictionary
                        .intern_attribute_set(&[("lane", lane.name().into())])?;
                }
                Ok::<_, ExporterError>(DropsInstrument {
                    stream,
                    lane_attributes,
                })
            })
            .ok()
    }
}

/// Shared-memory telemetry exporter
///
/// All providers of a process that point at the same backing file share
/// one instance; obtain it through [`OtlpMmapExporter::create`] or
/// [`OtlpMmapExporter::open`].
pub struct OtlpMmapExporter {
    registry_key: PathBuf,
    config: ExporterConfig,
    shared: Arc<ExporterShared>,
    collector: AsyncCollector,
}

impl OtlpMmapExporter {
    /// Create (or fetch) the exporter for `path` with the default
    /// configuration, initializing a fresh backing file.
    pub fn create<P: AsRef<Path>>(path: P) -> ExporterResult<Arc<Self>> {
        Self::with_config(path, ExporterConfig::default())
    }

    /// Create (or fetch) the exporter for `path`. When another provider
    /// already created an exporter for the same path, that instance is
    /// returned and `config` is ignored.
    pub fn with_config<P: AsRef<Path>>(
        path: P,
        config: ExporterConfig,
    ) -> ExporterResult<Arc<Self>> {
        let key = registry_key(path.as_ref())?;
        match EXPORTERS.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!("reusing exporter for {:?}", key);
                Ok(Arc::clone(entry.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let exporter = Arc::new(Self::build_fresh(key, config)?);
                entry.insert(Arc::clone(&exporter));
                Ok(exporter)
            }
        }
    }

    /// Attach to an existing backing file, rebuilding the intern tables
    /// from its dictionary region so previously minted handles keep their
    /// meaning after a process restart.
    pub fn open<P: AsRef<Path>>(path: P) -> ExporterResult<Arc<Self>> {
        let key = registry_key(path.as_ref())?;
        match EXPORTERS.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                debug!("reusing exporter for {:?}", key);
                Ok(Arc::clone(entry.get()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let exporter = Arc::new(Self::build_attached(key)?);
                entry.insert(Arc::clone(&exporter));
                Ok(exporter)
            }
        }
    }

    fn build_fresh(key: PathBuf, config: ExporterConfig) -> ExporterResult<Self> {
        config.validate()?;
        let layout = FileLayout::from_config(&config);
        let file = Arc::new(MappedFile::create(&key, layout.file_size())?);

        let mut header = vec![0u8; HEADER_SIZE as usize];
        layout::write_header(&mut header, &layout, now_unix_ns());
        file.write_at(0, &header)?;
        file.flush()?;

        info!(
            "exporter ready at {:?}: dictionary {} B, lanes {}/{}/{} B",
            key,
            layout.region(Region::Dictionary).capacity,
            layout.region(Region::MetricLane).capacity,
            layout.region(Region::SpanLane).capacity,
            layout.region(Region::EventLane).capacity,
        );

        Ok(Self::assemble(key, config, file, &layout))
    }

    fn build_attached(key: PathBuf) -> ExporterResult<Self> {
        let file = Arc::new(MappedFile::open(&key)?);
        let header_bytes = file.read_at(0, HEADER_SIZE as usize)?;
        let header = layout::read_header(&header_bytes, file.size(), &key)?;
        let layout = header.layout;

        let config = ExporterConfig {
            dictionary_capacity: layout.region(Region::Dictionary).capacity,
            metric_lane_capacity: layout.region(Region::MetricLane).capacity,
            span_lane_capacity: layout.region(Region::SpanLane).capacity,
            event_lane_capacity: layout.region(Region::EventLane).capacity,
            ..ExporterConfig::default()
        };

        let exporter = Self::assemble(key.clone(), config, Arc::clone(&file), &layout);
        exporter.restore_dictionary(&layout)?;
        info!("attached to existing exporter file at {:?}", key);
        Ok(exporter)
    }

    fn assemble(
        key: PathBuf,
        config: ExporterConfig,
        file: Arc<MappedFile>,
        layout: &FileLayout,
    ) -> Self {
        let shared = Arc::new(ExporterShared {
            dictionary: Dictionary::new(Arc::clone(&file), layout),
            metric_lane: LaneWriter::new(Arc::clone(&file), Region::MetricLane, layout),
            span_lane: LaneWriter::new(Arc::clone(&file), Region::SpanLane, layout),
            event_lane: LaneWriter::new(Arc::clone(&file), Region::EventLane, layout),
            file,
            drops_instrument: OnceCell::new(),
        });
        let collector = AsyncCollector::new(Arc::clone(&shared), config.collection_interval);
        Self {
            registry_key: key,
            config,
            shared,
            collector,
        }
    }

    /// Replay the dictionary region into the intern tables.
    fn restore_dictionary(&self, layout: &FileLayout) -> ExporterResult<()> {
        let descriptor = layout.region(Region::Dictionary);
        let cursor = self
            .shared
            .file
            .atomic_u64(Region::Dictionary.cursor_offset())
            .load(std::sync::atomic::Ordering::Acquire)
            .min(descriptor.capacity);

        let mut offset = 0u64;
        let mut restored = 0usize;
        while offset < cursor {
            let word = self
                .shared
                .file
                .atomic_u32(descriptor.offset + offset)
                .load(std::sync::atomic::Ordering::Acquire);
            if word & READY_BIT == 0 {
                // Unpublished tail left by an interrupted writer.
                warn!(
                    "dictionary replay stopped at unpublished frame, offset {offset} of {cursor}"
                );
                break;
            }
            let len = (word & !READY_BIT) as usize;
            let body = self.shared.file.read_at(descriptor.offset + offset + 4, len)?;
            self.shared
                .dictionary
                .restore_entry(protocol::decode_dictionary_record(&body)?)?;
            restored += 1;
            offset += frame_len(len);
        }
        debug!("restored {restored} dictionary entries");
        Ok(())
    }

    /// Path this exporter is registered under.
    pub fn path(&self) -> &Path {
        &self.registry_key
    }

    /// The configuration the exporter was built with.
    pub fn config(&self) -> &ExporterConfig {
        &self.config
    }

    /// Intern a string and return its stable handle.
    pub fn intern_string(&self, value: &str) -> ExporterResult<StringHandle> {
        self.shared.dictionary.intern_string(value)
    }

    /// Intern an attribute map and return its stable handle.
    pub fn intern_attribute_set(
        &self,
        attributes: &[(&str, AttributeValue)],
    ) -> ExporterResult<AttributeSetHandle> {
        self.shared.dictionary.intern_attribute_set(attributes)
    }

    /// Create (or fetch) a resource from an attribute map and an optional
    /// schema URL.
    pub fn create_resource(
        &self,
        attributes: &[(&str, AttributeValue)],
        schema_url: Option<&str>,
    ) -> ExporterResult<ResourceHandle> {
        let attributes = self.shared.dictionary.intern_attribute_set(attributes)?;
        let schema_url = schema_url
            .map(|url| self.shared.dictionary.intern_string(url))
            .transpose()?;
        self.shared.dictionary.intern_resource(attributes, schema_url)
    }

    /// Create (or fetch) an instrumentation scope under a resource.
    pub fn create_instrumentation_scope(
        &self,
        resource: ResourceHandle,
        name: &str,
        version: Option<&str>,
        attributes: Option<&[(&str, AttributeValue)]>,
    ) -> ExporterResult<ScopeHandle> {
        if name.is_empty() {
            return Err(ExporterError::invalid("scope name cannot be empty"));
        }
        let name = self.shared.dictionary.intern_string(name)?;
        let version = match version {
            Some(version) => self.shared.dictionary.intern_string(version)?,
            None => HANDLE_ABSENT,
        };
        let attributes = match attributes {
            Some(attributes) => self.shared.dictionary.intern_attribute_set(attributes)?,
            None => HANDLE_ABSENT,
        };
        self.shared
            .dictionary
            .intern_scope(resource, name, version, attributes)
    }

    /// Create (or fetch) a metric stream under a scope.
    pub fn create_metric_stream(
        &self,
        scope: ScopeHandle,
        name: &str,
        description: &str,
        unit: &str,
        aggregation: Aggregation,
    ) -> ExporterResult<MetricStreamHandle> {
        if name.is_empty() {
            return Err(ExporterError::invalid("metric stream name cannot be empty"));
        }
        let name = self.shared.dictionary.intern_string(name)?;
        let description = self.shared.dictionary.intern_string(description)?;
        let unit = self.shared.dictionary.intern_string(unit)?;
        self.shared
            .dictionary
            .intern_metric_stream(scope, name, description, unit, &aggregation)
    }

    /// Record one measurement on a metric stream.
    ///
    /// A full lane or dictionary silently drops the record and bumps the
    /// lane's drop counter; only malformed input is surfaced.
    pub fn record_measurement(
        &self,
        stream: MetricStreamHandle,
        attributes: &[(&str, AttributeValue)],
        time_ns: u64,
        value: MeasurementValue,
        span_context: Option<SpanContext>,
    ) -> ExporterResult<()> {
        self.shared
            .record_measurement(stream, attributes, time_ns, value, span_context)
    }

    /// Record an event, optionally bound to a span context. The event
    /// name may be passed pre-interned for hot call sites.
    #[allow(clippy::too_many_arguments)]
    pub fn record_event<'a>(
        &self,
        scope: ScopeHandle,
        span_context: Option<SpanContext>,
        name: impl Into<EventName<'a>>,
        time_ns: u64,
        severity_number: u8,
        severity_text: &str,
        attributes: &[(&str, AttributeValue)],
    ) -> ExporterResult<()> {
        self.shared.dictionary.check_scope(scope)?;
        let name = match name.into() {
            EventName::Str(name) => {
                if name.is_empty() {
                    return Err(ExporterError::invalid("event name cannot be empty"));
                }
                match self.shared.dictionary.intern_string(name) {
                    Ok(handle) => handle,
                    Err(ExporterError::LaneFull { .. }) => {
                        self.shared.event_lane.count_drop();
                        return Ok(());
                    }
                    Err(e) => return Err(e),
                }
            }
            EventName::Handle(handle) => {
                self.shared.dictionary.check_string(handle)?;
                handle
            }
        };
        let severity_text = match self.shared.dictionary.intern_string(severity_text) {
            Ok(handle) => handle,
            Err(ExporterError::LaneFull { .. }) => {
                self.shared.event_lane.count_drop();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let Some(attributes) = self
            .shared
            .intern_record_attributes(Lane::Event, attributes)?
        else {
            return Ok(());
        };
        let body = protocol::encode_event(&EventRecord {
            scope,
            span_context,
            name,
            time_ns,
            severity_number,
            severity_text,
            attributes,
        });
        self.shared.append_or_drop(Lane::Event, &body)
    }

    /// Record the start of a span.
    #[allow(clippy::too_many_arguments)]
    pub fn record_span_start(
        &self,
        scope: ScopeHandle,
        trace_id: [u8; 16],
        span_id: [u8; 8],
        parent_span_id: Option<[u8; 8]>,
        flags: u8,
        name: &str,
        kind: SpanKind,
        start_time_ns: u64,
        attributes: &[(&str, AttributeValue)],
    ) -> ExporterResult<()> {
        self.shared.dictionary.check_scope(scope)?;
        if name.is_empty() {
            return Err(ExporterError::invalid("span name cannot be empty"));
        }
        let name = match self.shared.dictionary.intern_string(name) {
            Ok(handle) => handle,
            Err(ExporterError::LaneFull { .. }) => {
                self.shared.span_lane.count_drop();
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let Some(attributes) = self
            .shared
            .intern_record_attributes(Lane::Span, attributes)?
        else {
            return Ok(());
        };
        let body = protocol::encode_span_start(&SpanStartRecord {
            scope,
            trace_id,
            span_id,
            parent_span_id,
            flags,
            name,
            kind,
            start_time_ns,
            attributes,
        });
        self.shared.append_or_drop(Lane::Span, &body)
    }

    /// Record the end of a span.
    pub fn record_span_end(
        &self,
        scope: ScopeHandle,
        trace_id: [u8; 16],
        span_id: [u8; 8],
        end_time_ns: u64,
    ) -> ExporterResult<()> {
        self.shared.dictionary.check_scope(scope)?;
        let body = protocol::encode_span_end(&protocol::SpanEndRecord {
            scope,
            trace_id,
            span_id,
            end_time_ns,
        });
        self.shared.append_or_drop(Lane::Span, &body)
    }

    /// Register a callback for an observable instrument.
    pub fn register_callback<F, I>(
        &self,
        stream: MetricStreamHandle,
        callback: F,
    ) -> ExporterResult<CallbackId>
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Observation>,
        I::IntoIter: Send + 'static,
    {
        self.shared.dictionary.check_metric_stream(stream)?;
        Ok(self.collector.register(stream, callback))
    }

    /// Remove a previously registered callback.
    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.collector.unregister(id)
    }

    /// Start the collector worker. Idempotent.
    pub fn start_collector(&self) -> ExporterResult<()> {
        self.collector.start()
    }

    /// Stop and join the collector worker. Idempotent.
    pub fn stop_collector(&self) {
        self.collector.stop()
    }

    /// Run one collection pass synchronously, outside the worker's
    /// schedule.
    pub fn collect_now(&self) {
        self.collector.collect_now()
    }

    /// Flush the mapping to disk.
    pub fn flush(&self) -> ExporterResult<()> {
        self.shared.file.flush()
    }

    /// Append and drop counters for one lane.
    pub fn lane_stats(&self, lane: Lane) -> LaneStats {
        self.shared.lane_writer(lane).stats()
    }

    /// Stop the collector, flush, and drop this exporter from the
    /// process-wide registry. The backing file stays behind for readers.
    pub fn close(&self) -> ExporterResult<()> {
        self.collector.stop();
        self.flush()?;
        EXPORTERS.remove(&self.registry_key);
        info!("closed exporter for {:?}", self.registry_key);
        Ok(())
    }
}

impl Drop for OtlpMmapExporter {
    fn drop(&mut self) {
        self.collector.stop();
    }
}

fn registry_key(path: &Path) -> ExporterResult<PathBuf> {
    std::path::absolute(path).map_err(|e| ExporterError::io(e, path))
}

/// Nanoseconds since the Unix epoch.
pub(crate) fn now_unix_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn registry_returns_one_instance_per_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.mmap");

        let a = OtlpMmapExporter::with_config(&path, small_config()).unwrap();
        let b = OtlpMmapExporter::create(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        a.close().unwrap();
    }

    #[test]
    fn close_allows_recreation() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("close.mmap");

        let a = OtlpMmapExporter::with_config(&path, small_config()).unwrap();
        a.close().unwrap();

        let b = OtlpMmapExporter::with_config(&path, small_config()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        b.close().unwrap();
    }

    #[test]
    fn empty_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let exporter =
            OtlpMmapExporter::with_config(dir.path().join("names.mmap"), small_config()).unwrap();

        let resource = exporter.create_resource(&[], None).unwrap();
        assert!(exporter
            .create_instrumentation_scope(resource, "", None, None)
            .is_err());

        let scope = exporter
            .create_instrumentation_scope(resource, "scope", None, None)
            .unwrap();
        assert!(exporter
            .create_metric_stream(scope, "", "", "1", Aggregation::Gauge)
            .is_err());
        assert!(exporter
            .record_span_start(
                scope,
                [0x11; 16],
                [0x22; 8],
                None,
                0,
                "",
                SpanKind::Internal,
                1,
                &[],
            )
            .is_err());
        assert!(exporter
            .record_event(scope, None, "", 1, 0, "", &[])
            .is_err());

        exporter.close().unwrap();
    }

    #[test]
    fn unknown_handles_are_rejected() {
        let dir = TempDir::new().unwrap();
        let exporter =
            OtlpMmapExporter::with_config(dir.path().join("handles.mmap"), small_config())
                .unwrap();

        assert!(exporter
            .record_measurement(42, &[], 1, MeasurementValue::Int(1), None)
            .is_err());
        assert!(exporter.record_span_end(42, [0; 16], [0; 8], 1).is_err());

        exporter.close().unwrap();
    }

    #[test]
    fn reopen_preserves_handles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reopen.mmap");

        let first = OtlpMmapExporter::with_config(&path, small_config()).unwrap();
        let resource = first
            .create_resource(&[("service.name", "svc".into())], None)
            .unwrap();
        let scope = first
            .create_instrumentation_scope(resource, "scope", Some("1.0"), None)
            .unwrap();
        first.close().unwrap();
        drop(first);

        let second = OtlpMmapExporter::open(&path).unwrap();
        let resource_again = second
            .create_resource(&[("service.name", "svc".into())], None)
            .unwrap();
        let scope_again = second
            .create_instrumentation_scope(resource_again, "scope", Some("1.0"), None)
            .unwrap();
        assert_eq!(resource, resource_again);
        assert_eq!(scope, scope_again);
        second.close().unwrap();
    }
}
