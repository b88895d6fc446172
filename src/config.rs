//! Configuration system for the simulation engine.
//!
//! This module provides YAML/JSON configuration file support for defining
//! a network, its partitioning and the departure schedule declaratively.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   horizon: 3600
//!   window_width: 10
//!   partition_count: 2
//!   heartbeat_interval: 600
//!
//! units:
//!   - id: 1
//!     type: Link
//!     partition: 0
//!     attrs:
//!       free_flow_time: "12"
//!   - id: 2
//!     type: Link
//!     partition: 1
//!     attrs:
//!       free_flow_time: "10"
//!
//! departures:
//!   - time: 5
//!     vehicle: 100
//!     route: [1, 2]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use thiserror::Error;

use crate::scheduler::EngineParams;
use crate::types::{PartitionId, SimTime, UnitId, VehicleId};

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown file format: {0}")]
    UnknownFormat(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Global simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Simulated time at which the run ends
    #[serde(default = "default_horizon")]
    pub horizon: SimTime,

    /// Window width (lookahead)
    #[serde(default = "default_window_width")]
    pub window_width: SimTime,

    /// Number of partitions (worker threads)
    #[serde(default = "default_partition_count")]
    pub partition_count: usize,

    /// Declared minimum cause → effect delay between units
    #[serde(default)]
    pub min_causal_delay: Option<SimTime>,

    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether to collect per-unit statistics
    #[serde(default)]
    pub collect_stats: bool,

    /// Interval of the progress heartbeat on partition 0
    #[serde(default)]
    pub heartbeat_interval: Option<SimTime>,
}

fn default_horizon() -> SimTime {
    1000
}

fn default_window_width() -> SimTime {
    10
}

fn default_partition_count() -> usize {
    1
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            horizon: default_horizon(),
            window_width: default_window_width(),
            partition_count: default_partition_count(),
            min_causal_delay: None,
            log_level: default_log_level(),
            collect_stats: false,
            heartbeat_interval: None,
        }
    }
}

impl SimulationParams {
    /// Engine parameters described by this section.
    pub fn engine_params(&self) -> EngineParams {
        EngineParams {
            horizon: self.horizon,
            window_width: self.window_width,
            partition_count: self.partition_count,
            min_causal_delay: self.min_causal_delay,
            collect_stats: self.collect_stats,
        }
    }

    /// Validates the simulation parameters.
    ///
    /// Engine-level checks are the ones [`EngineParams::validate`] runs.
    pub fn validate(&self) -> ConfigResult<()> {
        self.engine_params()
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        if self.heartbeat_interval == Some(0) {
            return Err(ConfigError::Validation(
                "heartbeat_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration for a receiving unit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Unique unit identifier
    pub id: UnitId,

    /// Unit type name, resolved through the unit registry
    #[serde(rename = "type")]
    pub unit_type: String,

    /// Partition owning the unit
    #[serde(default)]
    pub partition: PartitionId,

    /// Custom attributes as key-value pairs
    #[serde(default)]
    pub attrs: HashMap<String, String>,
}

/// A scheduled vehicle departure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepartureConfig {
    /// Departure time
    pub time: SimTime,

    pub vehicle: VehicleId,

    /// Links the vehicle traverses, in order
    pub route: Vec<UnitId>,
}

/// Complete simulation configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SimConfig {
    /// Global simulation parameters
    #[serde(default)]
    pub simulation: SimulationParams,

    /// Unit definitions
    #[serde(default)]
    pub units: Vec<UnitConfig>,

    /// Departure schedule
    #[serde(default)]
    pub departures: Vec<DepartureConfig>,
}

impl SimConfig {
    /// Creates a new empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON file.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file, auto-detecting format.
    pub fn from_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");

        match ext.to_lowercase().as_str() {
            "yaml" | "yml" => Self::from_yaml_file(path),
            "json" => Self::from_json_file(path),
            _ => Err(ConfigError::UnknownFormat(ext.to_string())),
        }
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        self.simulation.validate()?;

        // Units: unique IDs on existing partitions
        let mut unit_ids = HashSet::new();
        for unit in &self.units {
            if !unit_ids.insert(unit.id) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate unit ID: {}",
                    unit.id
                )));
            }
            if unit.partition >= self.simulation.partition_count {
                return Err(ConfigError::Validation(format!(
                    "Unit {} assigned to partition {}, but partition_count is {}",
                    unit.id, unit.partition, self.simulation.partition_count
                )));
            }
        }

        // Departures: routes made of known units
        for departure in &self.departures {
            if departure.route.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "Vehicle {} has an empty route",
                    departure.vehicle
                )));
            }
            if let Some(unknown) = departure.route.iter().find(|id| !unit_ids.contains(*id)) {
                return Err(ConfigError::Validation(format!(
                    "Route of vehicle {} references non-existent unit: {}",
                    departure.vehicle, unknown
                )));
            }
        }

        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn to_yaml_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Saves configuration to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Converts to JSON string.
    pub fn to_json(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn departure_count(&self) -> usize {
        self.departures.len()
    }

    /// Finds a unit configuration by ID.
    pub fn find_unit(&self, id: UnitId) -> Option<&UnitConfig> {
        self.units.iter().find(|u| u.id == id)
    }
}

/// Builder for creating SimConfig programmatically.
#[derive(Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn horizon(mut self, time: SimTime) -> Self {
        self.config.simulation.horizon = time;
        self
    }

    pub fn window_width(mut self, width: SimTime) -> Self {
        self.config.simulation.window_width = width;
        self
    }

    pub fn partition_count(mut self, count: usize) -> Self {
        self.config.simulation.partition_count = count;
        self
    }

    pub fn min_causal_delay(mut self, delay: SimTime) -> Self {
        self.config.simulation.min_causal_delay = Some(delay);
        self
    }

    /// Sets the log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.simulation.log_level = level.into();
        self
    }

    /// Enables statistics collection.
    pub fn collect_stats(mut self, enable: bool) -> Self {
        self.config.simulation.collect_stats = enable;
        self
    }

    pub fn heartbeat_interval(mut self, interval: SimTime) -> Self {
        self.config.simulation.heartbeat_interval = Some(interval);
        self
    }

    /// Adds a unit without attributes.
    pub fn add_unit(mut self, id: UnitId, unit_type: impl Into<String>, partition: PartitionId) -> Self {
        self.config.units.push(UnitConfig {
            id,
            unit_type: unit_type.into(),
            partition,
            attrs: HashMap::new(),
        });
        self
    }

    /// Adds a free-flow link.
    pub fn add_link(mut self, id: UnitId, partition: PartitionId, free_flow_time: SimTime) -> Self {
        self.config.units.push(UnitConfig {
            id,
            unit_type: "Link".to_string(),
            partition,
            attrs: HashMap::from([("free_flow_time".to_string(), free_flow_time.to_string())]),
        });
        self
    }

    /// Schedules a vehicle departure.
    pub fn add_departure(mut self, time: SimTime, vehicle: VehicleId, route: Vec<UnitId>) -> Self {
        self.config.departures.push(DepartureConfig {
            time,
            vehicle,
            route,
        });
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
