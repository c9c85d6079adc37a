//! otlp-mmap - Shared-Memory Telemetry Exporter
//!
//! A telemetry exporter that writes traces, metrics and logs from an
//! instrumented process into a shared memory-mapped file, from which an
//! external collector process reads them asynchronously. The design goal
//! is minimal in-process observability overhead: no serialization on the
//! hot path, no blocking I/O, and no background work beyond a bounded
//! collection tick for asynchronous instruments.
//!
//! # Architecture
//!
//! The backing file holds a page-aligned header, an append-only
//! dictionary region and three independent record lanes (metrics, spans,
//! events). Strings, attribute sets, resources, scopes and metric
//! streams are interned once and addressed by stable 32-bit handles, so
//! lane records are small and fixed-shape. Producers reserve lane space
//! with an atomic fetch-add and publish with a release store; a reader in
//! another process replays each lane in publication order and resolves
//! handles against the dictionary lazily.
//!
//! # Quick Start
//!
//! ```no_run
//! use otlp_mmap::{Aggregation, MeasurementValue, OtlpMmapExporter, Temporality};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let exporter = OtlpMmapExporter::create("/tmp/telemetry.mmap")?;
//!
//!     let resource = exporter.create_resource(&[("service.name", "svc".into())], None)?;
//!     let scope = exporter.create_instrumentation_scope(resource, "svc-scope", None, None)?;
//!     let requests = exporter.create_metric_stream(
//!         scope,
//!         "requests_total",
//!         "Handled requests",
//!         "1",
//!         Aggregation::Sum {
//!             temporality: Temporality::Delta,
//!             is_monotonic: true,
//!         },
//!     )?;
//!
//!     exporter.record_measurement(
//!         requests,
//!         &[("endpoint", "/".into())],
//!         1_000,
//!         MeasurementValue::Double(1.0),
//!         None,
//!     )?;
//!     exporter.close()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exporter;
pub mod protocol;
pub mod reader;

pub use config::{ConfigBuilder, ExporterConfig};
pub use error::{ExporterError, ExporterResult};
pub use exporter::core::{EventName, OtlpMmapExporter};
pub use exporter::{AsyncCollector, CallbackId, Lane, LaneStats, Observation};
pub use protocol::{
    Aggregation, AttributeSetHandle, AttributeValue, MeasurementValue, MetricStreamHandle,
    ResourceHandle, ScopeHandle, SpanContext, SpanKind, StringHandle, Temporality,
    SPAN_FLAG_SAMPLED,
};
pub use reader::MmapReader;
