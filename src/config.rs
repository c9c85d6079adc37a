//! Exporter Configuration
//!
//! Region sizing and collector timing for the exporter, with validated
//! defaults and a builder. The backing file holds a fixed-size header
//! followed by four contiguous regions (dictionary plus three record
//! lanes); the total file size is derived from the region capacities.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ExporterError, ExporterResult};
use crate::exporter::layout::HEADER_SIZE;

/// Default capacity for each of the four regions (16 MiB)
pub const DEFAULT_REGION_CAPACITY: u64 = 16 * 1024 * 1024;

/// Default tick interval for the asynchronous instrument collector
pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(30);

/// Configuration for a shared-memory exporter instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Capacity of the dictionary region in bytes
    pub dictionary_capacity: u64,

    /// Capacity of the metric lane in bytes
    pub metric_lane_capacity: u64,

    /// Capacity of the span lane in bytes
    pub span_lane_capacity: u64,

    /// Capacity of the event lane in bytes
    pub event_lane_capacity: u64,

    /// Tick interval for the asynchronous instrument collector
    pub collection_interval: Duration,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            dictionary_capacity: DEFAULT_REGION_CAPACITY,
            metric_lane_capacity: DEFAULT_REGION_CAPACITY,
            span_lane_capacity: DEFAULT_REGION_CAPACITY,
            event_lane_capacity: DEFAULT_REGION_CAPACITY,
            collection_interval: DEFAULT_COLLECTION_INTERVAL,
        }
    }
}

impl ExporterConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Total size of the backing file described by this configuration.
    pub fn file_size(&self) -> u64 {
        HEADER_SIZE
            + self.dictionary_capacity
            + self.metric_lane_capacity
            + self.span_lane_capacity
            + self.event_lane_capacity
    }

    /// Validate region capacities and timing.
    pub fn validate(&self) -> ExporterResult<()> {
        let regions = [
            ("dictionary_capacity", self.dictionary_capacity),
            ("metric_lane_capacity", self.metric_lane_capacity),
            ("span_lane_capacity", self.span_lane_capacity),
            ("event_lane_capacity", self.event_lane_capacity),
        ];
        for (field, capacity) in regions {
            if capacity == 0 {
                return Err(ExporterError::Configuration {
                    field: field.to_string(),
                    message: "region capacity cannot be 0".to_string(),
                });
            }
            if capacity % 8 != 0 {
                return Err(ExporterError::Configuration {
                    field: field.to_string(),
                    message: format!("region capacity {capacity} is not 8-byte aligned"),
                });
            }
        }
        if self.collection_interval.is_zero() {
            return Err(ExporterError::Configuration {
                field: "collection_interval".to_string(),
                message: "collection interval cannot be zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Builder for [`ExporterConfig`] with validation on `build`
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: ExporterConfig,
}

impl ConfigBuilder {
    /// Set the dictionary region capacity in bytes.
    pub fn dictionary_capacity(mut self, capacity: u64) -> Self {
        self.config.dictionary_capacity = capacity;
        self
    }

    /// Set the metric lane capacity in bytes.
    pub fn metric_lane_capacity(mut self, capacity: u64) -> Self {
        self.config.metric_lane_capacity = capacity;
        self
    }

    /// Set the span lane capacity in bytes.
    pub fn span_lane_capacity(mut self, capacity: u64) -> Self {
        self.config.span_lane_capacity = capacity;
        self
    }

    /// Set the event lane capacity in bytes.
    pub fn event_lane_capacity(mut self, capacity: u64) -> Self {
        self.config.event_lane_capacity = capacity;
        self
    }

    /// Set the collector tick interval.
    pub fn collection_interval(mut self, interval: Duration) -> Self {
        self.config.collection_interval = interval;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> ExporterResult<ExporterConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
