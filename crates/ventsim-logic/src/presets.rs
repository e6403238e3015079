//! Lung presets: full rebuilds of the alveolar unit set.
//!
//! Unit properties are deterministic functions of position by default, so
//! the same preset always yields the same lung. Seeded jitter is opt-in via
//! [`UnitVariation::Seeded`].
//!
//! | Preset | Thresholds | Total compliance | Resistance | Pathology |
//! |--------|------------|------------------|------------|-----------|
//! | Normal | 1× | 50 | 10 | none |
//! | ARDS mild / moderate / severe | 1.5× / 2× / 3× | 40 / 30 / 20 | 12 / 14 / 16 | dorsal 10 / 20 / 40 % consolidated |
//! | COPD | 0.7× | 80 | 20 | every third unit air-trapped |

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::alveolar::{AlveolarUnit, Pathology};
use crate::error::{SimError, SimResult};

/// Preset constants.
pub mod preset_constants {
    /// Total compliance of a healthy lung (mL/cmH2O).
    pub const NORMAL_TOTAL_COMPLIANCE: f64 = 50.0;
    /// Airway resistance of a healthy lung (cmH2O·s/L).
    pub const NORMAL_RESISTANCE: f64 = 10.0;
    /// Opening pressure of the most ventral unit (cmH2O).
    pub const OPENING_BASE: f64 = 2.0;
    /// Opening pressure increase from ventral to dorsal.
    pub const OPENING_SPAN: f64 = 3.0;
    /// Closing pressure of the most ventral unit (cmH2O).
    pub const CLOSING_BASE: f64 = 1.0;
    /// Closing pressure increase from ventral to dorsal.
    pub const CLOSING_SPAN: f64 = 2.0;
    /// Compliance divisor applied to consolidated units.
    pub const CONSOLIDATION_COMPLIANCE_DIVISOR: f64 = 10.0;
    /// Extra opening pressure of consolidated units (cmH2O).
    pub const CONSOLIDATION_OPENING_OFFSET: f64 = 25.0;
    /// Threshold scale for COPD (easier recruitment).
    pub const COPD_THRESHOLD_SCALE: f64 = 0.7;
    pub const COPD_TOTAL_COMPLIANCE: f64 = 80.0;
    pub const COPD_RESISTANCE: f64 = 20.0;
    /// Every Nth unit counted from the dorsal end is air-trapped in COPD.
    pub const COPD_AIR_TRAP_STRIDE: usize = 3;
    /// Relative spread of seeded jitter.
    pub const JITTER: f64 = 0.1;
}

/// ARDS severity grades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArdsSeverity {
    Mild,
    Moderate,
    Severe,
}

impl ArdsSeverity {
    /// Multiplier on opening and closing pressures.
    pub fn threshold_factor(self) -> f64 {
        match self {
            Self::Mild => 1.5,
            Self::Moderate => 2.0,
            Self::Severe => 3.0,
        }
    }

    /// Fraction of units, counted from the dorsal end, that start consolidated.
    pub fn consolidated_fraction(self) -> f64 {
        match self {
            Self::Mild => 0.1,
            Self::Moderate => 0.2,
            Self::Severe => 0.4,
        }
    }

    /// Total compliance relative to a healthy lung.
    pub fn compliance_scale(self) -> f64 {
        match self {
            Self::Mild => 0.8,
            Self::Moderate => 0.6,
            Self::Severe => 0.4,
        }
    }

    pub fn resistance(self) -> f64 {
        match self {
            Self::Mild => 12.0,
            Self::Moderate => 14.0,
            Self::Severe => 16.0,
        }
    }
}

/// Lung preset selected by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LungPreset {
    #[default]
    Normal,
    Ards(ArdsSeverity),
    Copd,
}

impl LungPreset {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Ards(ArdsSeverity::Mild) => "ARDS (mild)",
            Self::Ards(ArdsSeverity::Moderate) => "ARDS (moderate)",
            Self::Ards(ArdsSeverity::Severe) => "ARDS (severe)",
            Self::Copd => "COPD",
        }
    }

    /// Airway resistance for this preset (cmH2O·s/L).
    pub fn resistance(self) -> f64 {
        use preset_constants::*;
        match self {
            Self::Normal => NORMAL_RESISTANCE,
            Self::Ards(severity) => severity.resistance(),
            Self::Copd => COPD_RESISTANCE,
        }
    }

    fn threshold_factor(self) -> f64 {
        match self {
            Self::Normal => 1.0,
            Self::Ards(severity) => severity.threshold_factor(),
            Self::Copd => preset_constants::COPD_THRESHOLD_SCALE,
        }
    }

    fn total_compliance(self) -> f64 {
        use preset_constants::*;
        match self {
            Self::Normal => NORMAL_TOTAL_COMPLIANCE,
            Self::Ards(severity) => NORMAL_TOTAL_COMPLIANCE * severity.compliance_scale(),
            Self::Copd => COPD_TOTAL_COMPLIANCE,
        }
    }
}

/// How per-unit properties are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum UnitVariation {
    /// Pure functions of position.
    #[default]
    Deterministic,
    /// Position formulas with ±10 % jitter from a seeded generator.
    Seeded(u64),
}

/// Position of unit `index` out of `count`, 0.0 ventral to 1.0 dorsal.
pub fn unit_position(index: usize, count: usize) -> f64 {
    if count <= 1 {
        0.5
    } else {
        index as f64 / (count - 1) as f64
    }
}

/// Number of dorsal units consolidated for `severity` with `count` units.
pub fn consolidated_count(severity: ArdsSeverity, count: usize) -> usize {
    ((severity.consolidated_fraction() * count as f64).ceil() as usize).min(count)
}

/// Build the unit set for `preset`.
pub fn build_units(
    preset: LungPreset,
    count: usize,
    variation: UnitVariation,
) -> SimResult<Vec<AlveolarUnit>> {
    use preset_constants::*;

    if count == 0 {
        return Err(SimError::InvalidModelState(
            "a multi-compartment lung needs at least one unit".into(),
        ));
    }

    let mut rng = match variation {
        UnitVariation::Deterministic => None,
        UnitVariation::Seeded(seed) => Some(StdRng::seed_from_u64(seed)),
    };
    let mut jitter = || match rng.as_mut() {
        Some(rng) => rng.gen_range(1.0 - JITTER..=1.0 + JITTER),
        None => 1.0,
    };

    // Ventral units are slightly more compliant
    let weights: Vec<f64> = (0..count)
        .map(|i| 0.8 + 0.4 * (1.0 - unit_position(i, count)))
        .collect();
    let weight_sum: f64 = weights.iter().sum();
    let total_compliance = preset.total_compliance();
    let factor = preset.threshold_factor();

    let consolidated_from = match preset {
        LungPreset::Ards(severity) => count - consolidated_count(severity, count),
        _ => count,
    };

    let mut units = Vec::with_capacity(count);
    for (i, weight) in weights.iter().enumerate() {
        let position = unit_position(i, count);
        let mut unit = AlveolarUnit {
            id: i,
            position,
            opening_pressure: (OPENING_BASE + OPENING_SPAN * position) * factor * jitter(),
            closing_pressure: (CLOSING_BASE + CLOSING_SPAN * position) * factor * jitter(),
            compliance: total_compliance * weight / weight_sum * jitter(),
            is_open: true,
            volume: 0.0,
            flow: 0.0,
            perfusion: 0.5 + position,
            pathology: Pathology::Normal,
        };

        if i >= consolidated_from {
            unit.pathology = Pathology::Consolidated;
            unit.is_open = false;
            unit.compliance /= CONSOLIDATION_COMPLIANCE_DIVISOR;
            unit.opening_pressure += CONSOLIDATION_OPENING_OFFSET;
        } else if preset == LungPreset::Copd && (count - 1 - i) % COPD_AIR_TRAP_STRIDE == 0 {
            unit.pathology = Pathology::AirTrapped;
        }

        unit.validate()?;
        units.push(unit);
    }

    log::debug!(
        "built {} preset: {} units, {} consolidated",
        preset.label(),
        count,
        count - consolidated_from
    );
    Ok(units)
}
