//! Ventilator pressure waveform: simulated time in, target airway pressure out.
//!
//! The generator is a two-state machine (Inspiration / Expiration) driven
//! purely by the position of `time` inside the breath cycle. Inspiration
//! follows a curved ramp from PEEP to PIP; expiration decays exponentially
//! from PIP back toward PEEP.
//!
//! ```
//! use ventsim_logic::settings::VentilatorSettings;
//! use ventsim_logic::waveform::{BreathPhase, VentilatorWaveformGenerator};
//!
//! let gen = VentilatorWaveformGenerator::new(VentilatorSettings::default()).unwrap();
//! let start = gen.target_pressure(0.0);
//! assert_eq!(start.phase, BreathPhase::Inspiration);
//! assert!((start.pressure - 5.0).abs() < 1e-9);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::settings::{BreathTiming, VentilatorSettings, VentilatorSettingsUpdate};

/// Exponent of the inspiratory ramp. Values below 1 front-load the rise.
pub const RAMP_EXPONENT: f64 = 0.7;

/// Rate of the expiratory decay over normalised expiration progress.
pub const EXPIRATORY_DECAY_RATE: f64 = 5.0;

/// Respiratory phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreathPhase {
    Inspiration,
    Expiration,
}

impl BreathPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Inspiration => "inspiration",
            Self::Expiration => "expiration",
        }
    }
}

/// Pressure target for a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PressureSample {
    /// Target airway pressure (cmH2O).
    pub pressure: f64,
    pub phase: BreathPhase,
    /// Seconds since the current phase began.
    pub phase_elapsed: f64,
}

/// Inspiratory ramp: `peep + driving × p^0.7` with `p` clamped to [0, 1].
pub fn inspiratory_pressure(peep: f64, driving_pressure: f64, progress: f64) -> f64 {
    peep + driving_pressure * progress.clamp(0.0, 1.0).powf(RAMP_EXPONENT)
}

/// Expiratory decay from `pip` toward `peep` with `progress` clamped to [0, 1].
pub fn expiratory_pressure(pip: f64, peep: f64, progress: f64) -> f64 {
    let p = progress.clamp(0.0, 1.0);
    pip - (pip - peep) * (1.0 - (-EXPIRATORY_DECAY_RATE * p).exp())
}

/// Pressure waveform generator with phase bookkeeping.
#[derive(Debug, Clone)]
pub struct VentilatorWaveformGenerator {
    settings: VentilatorSettings,
    timing: BreathTiming,
    phase: BreathPhase,
    breaths_started: u64,
    expirations_started: u64,
}

impl VentilatorWaveformGenerator {
    /// Create a generator idling at PEEP in expiration.
    pub fn new(settings: VentilatorSettings) -> SimResult<Self> {
        settings.validate()?;
        Ok(Self {
            timing: BreathTiming::from_settings(&settings),
            settings,
            phase: BreathPhase::Expiration,
            breaths_started: 0,
            expirations_started: 0,
        })
    }

    /// Merge a partial update and recompute timing.
    ///
    /// On error the previous settings and timing stay in effect.
    pub fn update_settings(&mut self, update: &VentilatorSettingsUpdate) -> SimResult<()> {
        let merged = self.settings.merged(update)?;
        if merged.mode != self.settings.mode && !merged.mode.is_fully_modelled() {
            log::warn!(
                "{} mode is delivered with the pressure-control waveform",
                merged.mode.label()
            );
        }
        self.settings = merged;
        self.timing = BreathTiming::from_settings(&merged);
        Ok(())
    }

    pub fn settings(&self) -> &VentilatorSettings {
        &self.settings
    }

    pub fn timing(&self) -> &BreathTiming {
        &self.timing
    }

    /// Phase recorded by the most recent [`advance`](Self::advance).
    pub fn phase(&self) -> BreathPhase {
        self.phase
    }

    /// Number of Expiration→Inspiration transitions observed.
    pub fn breaths_started(&self) -> u64 {
        self.breaths_started
    }

    /// Number of Inspiration→Expiration transitions observed.
    pub fn expirations_started(&self) -> u64 {
        self.expirations_started
    }

    /// Target pressure at `time`. Pure: does not touch phase bookkeeping.
    pub fn target_pressure(&self, time: f64) -> PressureSample {
        let s = &self.settings;
        let t = &self.timing;
        let cycle = t.cycle_time(time);

        if cycle < t.inspiration_time {
            PressureSample {
                pressure: inspiratory_pressure(
                    s.peep,
                    s.driving_pressure,
                    cycle / t.inspiration_time,
                ),
                phase: BreathPhase::Inspiration,
                phase_elapsed: cycle,
            }
        } else {
            let elapsed = cycle - t.inspiration_time;
            let progress = if t.expiration_time > 0.0 {
                elapsed / t.expiration_time
            } else {
                1.0
            };
            PressureSample {
                pressure: expiratory_pressure(s.pip(), s.peep, progress),
                phase: BreathPhase::Expiration,
                phase_elapsed: elapsed,
            }
        }
    }

    /// Target pressure at `time`, recording any phase transition.
    pub fn advance(&mut self, time: f64) -> PressureSample {
        let sample = self.target_pressure(time);
        if sample.phase != self.phase {
            match sample.phase {
                BreathPhase::Inspiration => self.breaths_started += 1,
                BreathPhase::Expiration => self.expirations_started += 1,
            }
            self.phase = sample.phase;
        }
        sample
    }

    /// Return to the idle state without changing settings.
    pub fn reset(&mut self) {
        self.phase = BreathPhase::Expiration;
        self.breaths_started = 0;
        self.expirations_started = 0;
    }
}

impl Default for VentilatorWaveformGenerator {
    fn default() -> Self {
        let settings = VentilatorSettings::default();
        Self {
            timing: BreathTiming::from_settings(&settings),
            settings,
            phase: BreathPhase::Expiration,
            breaths_started: 0,
            expirations_started: 0,
        }
    }
}
