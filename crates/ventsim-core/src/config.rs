//! Engine configuration: step size, history window, unit set shape.
//!
//! Loaded from JSON when a host provides a file, otherwise defaults apply.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ventsim_logic::multi_compartment::mechanics::DEFAULT_GRAVITY_GRADIENT;
use ventsim_logic::presets::UnitVariation;
use ventsim_logic::{SimError, SimResult};

/// Upper bound on snapshots a history window may span at the fixed step.
pub const MAX_HISTORY_SNAPSHOTS: usize = 1_000_000;

/// Errors from reading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] SimError),
}

/// Engine-level tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Step used by `tick(None)` and by the real-time accumulator (s).
    pub fixed_step: f64,
    /// Snapshots older than `now - history_window` are evicted (s).
    pub history_window: f64,
    /// Time constant of the delivered-pressure lag (s). 0 disables the lag.
    pub pressure_response_time: f64,
    /// Alveolar units in the advanced model.
    pub unit_count: usize,
    /// Superimposed pressure at the most dorsal unit (cmH2O).
    pub gravity_gradient: f64,
    /// Deterministic or seeded unit properties.
    pub unit_variation: UnitVariation,
    /// Upper bound on fixed steps run for one real-time advance.
    pub max_catch_up_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fixed_step: 0.01,
            history_window: 10.0,
            pressure_response_time: 0.05,
            unit_count: 10,
            gravity_gradient: DEFAULT_GRAVITY_GRADIENT,
            unit_variation: UnitVariation::Deterministic,
            max_catch_up_steps: 25,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> SimResult<()> {
        if !(self.fixed_step.is_finite() && self.fixed_step > 0.0) {
            return Err(SimError::InvalidTimeStep(self.fixed_step));
        }
        if !(self.history_window.is_finite() && self.history_window > 0.0) {
            return Err(SimError::InvalidSettings(format!(
                "history window must be positive, got {}",
                self.history_window
            )));
        }
        if !(self.history_window / self.fixed_step <= MAX_HISTORY_SNAPSHOTS as f64) {
            return Err(SimError::InvalidSettings(format!(
                "history window of {}s at a {}s step exceeds {} snapshots",
                self.history_window, self.fixed_step, MAX_HISTORY_SNAPSHOTS
            )));
        }
        if !(self.pressure_response_time.is_finite() && self.pressure_response_time >= 0.0) {
            return Err(SimError::InvalidSettings(format!(
                "pressure response time must not be negative, got {}",
                self.pressure_response_time
            )));
        }
        if self.unit_count == 0 {
            return Err(SimError::InvalidModelState(
                "unit count must be at least 1".into(),
            ));
        }
        if !(self.gravity_gradient.is_finite() && self.gravity_gradient >= 0.0) {
            return Err(SimError::InvalidParameters(format!(
                "gravity gradient must not be negative, got {}",
                self.gravity_gradient
            )));
        }
        if self.max_catch_up_steps == 0 {
            return Err(SimError::InvalidSettings(
                "max catch-up steps must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&contents)
    }

    /// Read a JSON file, falling back to defaults when it is missing or invalid.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => {
                log::info!("Loaded engine config from {:?}", path.as_ref());
                config
            }
            Err(ConfigError::Io(_)) => {
                log::info!("Engine config {:?} not found, using defaults", path.as_ref());
                Self::default()
            }
            Err(e) => {
                log::warn!("Failed to load engine config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Number of snapshots retained at the fixed step, capped at
    /// `MAX_HISTORY_SNAPSHOTS + 1`.
    pub fn history_capacity(&self) -> usize {
        let span = (self.history_window / self.fixed_step).ceil();
        if span.is_finite() && span >= 0.0 {
            span.min(MAX_HISTORY_SNAPSHOTS as f64) as usize + 1
        } else {
            MAX_HISTORY_SNAPSHOTS + 1
        }
    }
}
