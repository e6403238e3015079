//! Ventilator settings and the breath timing derived from them.
//!
//! Settings are replaced wholesale: a partial [`VentilatorSettingsUpdate`] is
//! merged into a copy, the copy is validated, and only then does it become
//! the active configuration. A rejected update never leaves a half-applied
//! merge behind.

use serde::{Deserialize, Serialize};

use crate::error::{require_non_negative, require_positive, SimError, SimResult};

/// Ventilation mode selected on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum VentilationMode {
    /// Pressure-controlled breaths. The only fully modelled mode.
    #[default]
    PressureControl,
    /// Volume-controlled breaths. Delivered with the pressure-control waveform.
    VolumeControl,
    /// Patient-triggered pressure support. Delivered with the pressure-control waveform.
    PressureSupport,
}

impl VentilationMode {
    /// Whether the waveform generator models this mode faithfully.
    pub fn is_fully_modelled(self) -> bool {
        matches!(self, Self::PressureControl)
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::PressureControl => "PC",
            Self::VolumeControl => "VC",
            Self::PressureSupport => "PS",
        }
    }
}

/// Settings bounds.
pub mod limits {
    /// Room air.
    pub const FIO2_MIN: f64 = 0.21;
    /// Pure oxygen.
    pub const FIO2_MAX: f64 = 1.0;
}

/// Complete ventilator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VentilatorSettings {
    pub mode: VentilationMode,
    /// Pressure above PEEP delivered at end of inspiration (cmH2O).
    pub driving_pressure: f64,
    /// Positive end-expiratory pressure (cmH2O).
    pub peep: f64,
    /// Breaths per minute.
    pub respiratory_rate: f64,
    /// Inspiratory:expiratory ratio as a fraction (0.5 means 1:2).
    pub ie_ratio: f64,
    /// Inspired oxygen fraction (0.21..=1.0).
    pub fio2: f64,
    /// Patient trigger threshold (cmH2O). Stored for display only.
    pub trigger_sensitivity: f64,
    /// Rise time (ms). Stored for display only; the ramp is curved.
    pub rise_time: f64,
}

impl Default for VentilatorSettings {
    fn default() -> Self {
        Self {
            mode: VentilationMode::PressureControl,
            driving_pressure: 15.0,
            peep: 5.0,
            respiratory_rate: 15.0,
            ie_ratio: 0.5,
            fio2: 0.4,
            trigger_sensitivity: 2.0,
            rise_time: 100.0,
        }
    }
}

impl VentilatorSettings {
    /// Peak inspiratory pressure (PEEP + driving pressure).
    pub fn pip(&self) -> f64 {
        self.peep + self.driving_pressure
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> SimResult<()> {
        let invalid = SimError::InvalidSettings;
        require_positive(self.respiratory_rate, "respiratory rate", invalid)?;
        require_positive(self.ie_ratio, "I:E ratio", invalid)?;
        require_non_negative(self.peep, "PEEP", invalid)?;
        require_non_negative(self.driving_pressure, "driving pressure", invalid)?;
        require_non_negative(self.rise_time, "rise time", invalid)?;
        require_non_negative(self.trigger_sensitivity, "trigger sensitivity", invalid)?;
        if !(limits::FIO2_MIN..=limits::FIO2_MAX).contains(&self.fio2) {
            return Err(SimError::InvalidSettings(format!(
                "FiO2 must be within {}..={}, got {}",
                limits::FIO2_MIN,
                limits::FIO2_MAX,
                self.fio2
            )));
        }
        Ok(())
    }

    /// Merge `update` into a copy of these settings and validate the result.
    ///
    /// Returns the merged settings without touching `self`.
    pub fn merged(&self, update: &VentilatorSettingsUpdate) -> SimResult<Self> {
        let merged = Self {
            mode: update.mode.unwrap_or(self.mode),
            driving_pressure: update.driving_pressure.unwrap_or(self.driving_pressure),
            peep: update.peep.unwrap_or(self.peep),
            respiratory_rate: update.respiratory_rate.unwrap_or(self.respiratory_rate),
            ie_ratio: update.ie_ratio.unwrap_or(self.ie_ratio),
            fio2: update.fio2.unwrap_or(self.fio2),
            trigger_sensitivity: update
                .trigger_sensitivity
                .unwrap_or(self.trigger_sensitivity),
            rise_time: update.rise_time.unwrap_or(self.rise_time),
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial settings update. `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VentilatorSettingsUpdate {
    pub mode: Option<VentilationMode>,
    pub driving_pressure: Option<f64>,
    pub peep: Option<f64>,
    pub respiratory_rate: Option<f64>,
    pub ie_ratio: Option<f64>,
    pub fio2: Option<f64>,
    pub trigger_sensitivity: Option<f64>,
    pub rise_time: Option<f64>,
}

impl From<VentilatorSettings> for VentilatorSettingsUpdate {
    fn from(s: VentilatorSettings) -> Self {
        Self {
            mode: Some(s.mode),
            driving_pressure: Some(s.driving_pressure),
            peep: Some(s.peep),
            respiratory_rate: Some(s.respiratory_rate),
            ie_ratio: Some(s.ie_ratio),
            fio2: Some(s.fio2),
            trigger_sensitivity: Some(s.trigger_sensitivity),
            rise_time: Some(s.rise_time),
        }
    }
}

/// Relative tolerance for snapping a cycle time onto the breath boundary.
const BOUNDARY_EPSILON: f64 = 1e-12;

/// Breath-cycle timing derived from rate and I:E ratio (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BreathTiming {
    pub period: f64,
    pub inspiration_time: f64,
    pub expiration_time: f64,
}

impl BreathTiming {
    /// Derive timing from validated settings.
    pub fn from_settings(settings: &VentilatorSettings) -> Self {
        let period = 60.0 / settings.respiratory_rate;
        let ie_fraction = settings.ie_ratio / (settings.ie_ratio + 1.0);
        let inspiration_time = period * ie_fraction;
        Self {
            period,
            inspiration_time,
            expiration_time: period - inspiration_time,
        }
    }

    /// Position within the current breath for an absolute time.
    pub fn cycle_time(&self, time: f64) -> f64 {
        let cycle = time.rem_euclid(self.period);
        // Rounding residue just below a breath boundary belongs to the next breath
        if self.period - cycle <= self.period * BOUNDARY_EPSILON {
            0.0
        } else {
            cycle
        }
    }
}
