//! Exporter Engine
//!
//! Producer side of the shared-memory telemetry file: file and region
//! management, the interning dictionary, the append-only record lanes, the
//! recording façade and the asynchronous instrument collector.

pub mod collector;
pub mod core;
pub mod dictionary;
pub mod lane;
pub mod layout;
pub mod memory_map;

pub use self::collector::{AsyncCollector, CallbackId, Observation};
pub use self::core::OtlpMmapExporter;
pub use self::lane::LaneStats;

/// One of the three record lanes.
///
/// The dictionary region is not a lane; lane records reference dictionary
/// handles but the two kinds of region are written and drained separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Metric,
    Span,
    Event,
}

impl Lane {
    /// All lanes, in region order.
    pub const ALL: [Lane; 3] = [Lane::Metric, Lane::Span, Lane::Event];

    /// Lane name used in drop-counter attributes and log output.
    pub fn name(&self) -> &'static str {
        match self {
            Lane::Metric => "metric",
            Lane::Span => "span",
            Lane::Event => "event",
        }
    }
}
