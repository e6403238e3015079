//! Multi-compartment lung: independently gated alveolar units.
//!
//! Each unit sees airway pressure minus a gravitational superimposed
//! pressure that grows toward the dorsal side. Its recruitment gate is
//! evaluated first, then its volume moves:
//!
//! - **open**: first-order approach to `(effective − PEEP) × compliance`
//!   with a time constant that lengthens dorsally
//! - **closed, air-trapped**: retains 90 % of its volume per 10 ms
//! - **closed, otherwise**: empties quickly
//!
//! Totals are the baseline volume plus the sum of unit volumes, and the
//! sum of unit flows.

use serde::{Deserialize, Serialize};

use crate::alveolar::{AlveolarUnit, GateChange, Pathology, UnitState};
use crate::error::{require_non_negative, require_positive, SimError, SimResult};
use crate::presets::{build_units, LungPreset, UnitVariation};
use crate::single_compartment::{approach_fraction, LungStep};

/// Mechanics constants.
pub mod mechanics {
    /// Superimposed pressure at the most dorsal unit (cmH2O).
    pub const DEFAULT_GRAVITY_GRADIENT: f64 = 1.5;
    /// Time constant of a collapsing unit (s).
    pub const COLLAPSE_TIME_CONSTANT: f64 = 0.05;
    /// Volume fraction an air-trapped closed unit keeps per reference step.
    pub const AIR_TRAPPING_RETENTION: f64 = 0.9;
    /// Step length the retention fraction is expressed against (s).
    pub const REFERENCE_STEP: f64 = 0.01;
    /// Time constant multiplier for open air-trapped units.
    pub const AIR_TRAPPED_TAU_FACTOR: f64 = 2.5;
    /// Ventral end of the time constant position scaling.
    pub const TAU_POSITION_BASE: f64 = 0.8;
    /// Increase of the time constant scaling toward the dorsal end.
    pub const TAU_POSITION_SPAN: f64 = 0.4;
}

/// Recruitment activity during one step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecruitmentEvents {
    pub opened: usize,
    pub closed: usize,
}

/// Lung made of `N` alveolar units sharing one airway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiCompartmentLungModel {
    units: Vec<AlveolarUnit>,
    /// Airway resistance (cmH2O·s/L).
    resistance: f64,
    /// End-expiratory volume the unit volumes sit on (mL).
    baseline_volume: f64,
    gravity_gradient: f64,
    total_flow: f64,
    last_events: RecruitmentEvents,
}

impl MultiCompartmentLungModel {
    /// Build a model from an explicit unit set.
    pub fn new(
        units: Vec<AlveolarUnit>,
        resistance: f64,
        baseline_volume: f64,
        gravity_gradient: f64,
    ) -> SimResult<Self> {
        if units.is_empty() {
            return Err(SimError::InvalidModelState(
                "a multi-compartment lung needs at least one unit".into(),
            ));
        }
        for unit in &units {
            unit.validate()?;
        }
        let invalid = SimError::InvalidParameters;
        require_positive(resistance, "resistance", invalid)?;
        require_non_negative(baseline_volume, "baseline volume", invalid)?;
        require_non_negative(gravity_gradient, "gravity gradient", invalid)?;

        Ok(Self {
            units,
            resistance,
            baseline_volume,
            gravity_gradient,
            total_flow: 0.0,
            last_events: RecruitmentEvents::default(),
        })
    }

    /// Build a model from a preset.
    pub fn from_preset(
        preset: LungPreset,
        unit_count: usize,
        variation: UnitVariation,
        baseline_volume: f64,
        gravity_gradient: f64,
    ) -> SimResult<Self> {
        let units = build_units(preset, unit_count, variation)?;
        Self::new(units, preset.resistance(), baseline_volume, gravity_gradient)
    }

    pub fn units(&self) -> &[AlveolarUnit] {
        &self.units
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    pub fn unit_states(&self) -> Vec<UnitState> {
        self.units.iter().map(AlveolarUnit::state).collect()
    }

    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    pub fn baseline_volume(&self) -> f64 {
        self.baseline_volume
    }

    /// Move the baseline (e.g. after an ideal body weight change).
    pub fn set_baseline_volume(&mut self, baseline_volume: f64) -> SimResult<()> {
        require_non_negative(baseline_volume, "baseline volume", SimError::InvalidParameters)?;
        self.baseline_volume = baseline_volume;
        Ok(())
    }

    pub fn gravity_gradient(&self) -> f64 {
        self.gravity_gradient
    }

    pub fn total_compliance(&self) -> f64 {
        self.units.iter().map(|u| u.compliance).sum()
    }

    /// Whole-lung time constant before position scaling (s).
    pub fn base_time_constant(&self) -> f64 {
        self.resistance * self.total_compliance() * 0.001
    }

    /// Time constant of an open unit (s).
    pub fn unit_time_constant(&self, unit: &AlveolarUnit) -> f64 {
        use mechanics::*;
        let tau = self.base_time_constant()
            * (TAU_POSITION_BASE + unit.position * TAU_POSITION_SPAN);
        match unit.pathology {
            Pathology::AirTrapped => tau * AIR_TRAPPED_TAU_FACTOR,
            _ => tau,
        }
    }

    /// Airway pressure minus the gravitational load on `unit`.
    pub fn effective_pressure(&self, unit: &AlveolarUnit, airway_pressure: f64) -> f64 {
        gravity_adjusted(airway_pressure, unit.position, self.gravity_gradient)
    }

    pub fn total_volume(&self) -> f64 {
        self.baseline_volume + self.units.iter().map(|u| u.volume).sum::<f64>()
    }

    /// Volume above baseline (mL).
    pub fn tidal_volume(&self) -> f64 {
        (self.total_volume() - self.baseline_volume).max(0.0)
    }

    pub fn total_flow(&self) -> f64 {
        self.total_flow
    }

    pub fn open_unit_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_open).count()
    }

    /// Share of units currently open.
    pub fn recruited_fraction(&self) -> f64 {
        self.open_unit_count() as f64 / self.units.len() as f64
    }

    /// Perfusion-weighted share of closed units (blood flow past unventilated alveoli).
    pub fn shunt_fraction(&self) -> f64 {
        let total: f64 = self.units.iter().map(|u| u.perfusion).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let shunted: f64 = self
            .units
            .iter()
            .filter(|u| !u.is_open)
            .map(|u| u.perfusion)
            .sum();
        shunted / total
    }

    /// Gate changes from the most recent step.
    pub fn last_events(&self) -> RecruitmentEvents {
        self.last_events
    }

    /// Advance every unit by `dt` seconds.
    ///
    /// `airway_pressure` and `peep` are in cmH2O. `dt` must be positive.
    pub fn step(&mut self, airway_pressure: f64, peep: f64, dt: f64) -> LungStep {
        use mechanics::*;

        let taus: Vec<f64> = self
            .units
            .iter()
            .map(|u| self.unit_time_constant(u))
            .collect();
        let gravity = self.gravity_gradient;
        let collapse = approach_fraction(dt, COLLAPSE_TIME_CONSTANT);
        let retention = AIR_TRAPPING_RETENTION.powf(dt / REFERENCE_STEP);

        let mut events = RecruitmentEvents::default();
        let mut total_flow = 0.0;

        for (unit, tau) in self.units.iter_mut().zip(taus) {
            let effective = gravity_adjusted(airway_pressure, unit.position, gravity);
            match unit.update_gate(effective) {
                GateChange::Opened => events.opened += 1,
                GateChange::Closed => events.closed += 1,
                GateChange::Unchanged => {}
            }

            let previous = unit.volume;
            if unit.is_open {
                let target = ((effective - peep) * unit.compliance).max(0.0);
                unit.volume += (target - unit.volume) * approach_fraction(dt, tau);
            } else if unit.pathology == Pathology::AirTrapped {
                unit.volume *= retention;
            } else {
                unit.volume -= unit.volume * collapse;
            }

            unit.flow = (unit.volume - previous) / dt;
            total_flow += unit.flow;
        }

        self.total_flow = total_flow;
        self.last_events = events;

        LungStep {
            volume: self.total_volume(),
            flow: total_flow,
            tidal_volume: self.tidal_volume(),
        }
    }
}

fn gravity_adjusted(airway_pressure: f64, position: f64, gravity_gradient: f64) -> f64 {
    airway_pressure - position * gravity_gradient
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::ArdsSeverity;

    fn normal() -> MultiCompartmentLungModel {
        MultiCompartmentLungModel::from_preset(
            LungPreset::Normal,
            10,
            UnitVariation::Deterministic,
            168.0,
            mechanics::DEFAULT_GRAVITY_GRADIENT,
        )
        .unwrap()
    }

    fn single_unit(opening: f64, closing: f64, pathology: Pathology) -> MultiCompartmentLungModel {
        let unit = AlveolarUnit {
            id: 0,
            position: 0.0,
            opening_pressure: opening,
            closing_pressure: closing,
            compliance: 10.0,
            is_open: false,
            volume: 0.0,
            flow: 0.0,
            perfusion: 1.0,
            pathology,
        };
        MultiCompartmentLungModel::new(vec![unit], 10.0, 0.0, 1.5).unwrap()
    }

    #[test]
    fn test_empty_unit_set_rejected() {
        assert!(matches!(
            MultiCompartmentLungModel::new(vec![], 10.0, 0.0, 1.5),
            Err(SimError::InvalidModelState(_))
        ));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let mut units = build_units(LungPreset::Normal, 3, UnitVariation::Deterministic).unwrap();
        units[1].closing_pressure = units[1].opening_pressure + 1.0;
        assert!(matches!(
            MultiCompartmentLungModel::new(units, 10.0, 0.0, 1.5),
            Err(SimError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_starts_at_baseline() {
        let m = normal();
        assert_eq!(m.total_volume(), 168.0);
        assert_eq!(m.total_flow(), 0.0);
        assert_eq!(m.recruited_fraction(), 1.0);
        assert_eq!(m.shunt_fraction(), 0.0);
    }

    #[test]
    fn test_effective_pressure_drops_dorsally() {
        let m = normal();
        let ventral = m.effective_pressure(&m.units()[0], 20.0);
        let dorsal = m.effective_pressure(&m.units()[9], 20.0);
        assert_eq!(ventral, 20.0);
        assert!((dorsal - 18.5).abs() < 1e-12);
    }

    #[test]
    fn test_step_gates_on_effective_pressure() {
        let mut m = single_unit(19.0, 5.0, Pathology::Normal);
        m.units[0].position = 1.0;
        // 20 at the airway is only 18.5 at the dorsal unit
        m.step(20.0, 5.0, 0.01);
        assert!(!m.units()[0].is_open);
        let p = 20.6;
        assert!(m.effective_pressure(&m.units()[0], p) >= 19.0);
        m.step(p, 5.0, 0.01);
        assert!(m.units()[0].is_open);
    }

    #[test]
    fn test_dorsal_units_respond_slower() {
        let m = normal();
        let t0 = m.unit_time_constant(&m.units()[0]);
        let t9 = m.unit_time_constant(&m.units()[9]);
        assert!(t9 > t0);
        assert!((t0 - m.base_time_constant() * 0.8).abs() < 1e-12);
        assert!((t9 - m.base_time_constant() * 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_normal_lung_inflates_and_stays_recruited_at_peep() {
        let mut m = normal();
        for _ in 0..500 {
            m.step(20.0, 5.0, 0.01);
        }
        assert!(m.tidal_volume() > 500.0);
        for _ in 0..500 {
            m.step(5.0, 5.0, 0.01);
        }
        assert_eq!(m.open_unit_count(), 10);
        assert!(m.tidal_volume() < 1.0);
    }

    #[test]
    fn test_volume_and_flow_totals_agree() {
        let mut m = normal();
        let mut prev = m.total_volume();
        for i in 0..200 {
            let p = if i < 100 { 20.0 } else { 5.0 };
            let out = m.step(p, 5.0, 0.01);
            let sum_flow: f64 = m.units().iter().map(|u| u.flow).sum();
            assert!((out.flow - sum_flow).abs() < 1e-9);
            assert!(((out.volume - prev) - out.flow * 0.01).abs() < 1e-9);
            prev = out.volume;
        }
    }

    #[test]
    fn test_hysteresis_oscillation() {
        // Position 0 so effective pressure equals airway pressure
        let mut m = single_unit(10.0, 4.0, Pathology::Normal);
        let pressures = [2.0, 8.0, 11.0, 6.0, 5.0, 3.0, 9.0, 12.0, 4.5, 4.0];
        let expected = [false, false, true, true, true, false, false, true, true, false];
        for (p, want) in pressures.iter().zip(expected) {
            m.step(*p, 0.0, 0.01);
            assert_eq!(m.units()[0].is_open, want, "at pressure {}", p);
        }
    }

    #[test]
    fn test_closed_unit_collapses_fast() {
        let mut m = single_unit(10.0, 4.0, Pathology::Normal);
        for _ in 0..300 {
            m.step(15.0, 0.0, 0.01);
        }
        let full = m.units()[0].volume;
        assert!(full > 100.0);
        for _ in 0..30 {
            m.step(0.0, 0.0, 0.01);
        }
        assert!(!m.units()[0].is_open);
        assert!(m.units()[0].volume < full * 0.01);
    }

    #[test]
    fn test_air_trapped_unit_retains_volume() {
        let mut m = single_unit(10.0, 4.0, Pathology::AirTrapped);
        for _ in 0..1000 {
            m.step(15.0, 0.0, 0.01);
        }
        let full = m.units()[0].volume;
        m.step(0.0, 0.0, 0.01);
        assert!((m.units()[0].volume - full * 0.9).abs() < 1e-9);
        // Normalised per reference step: one 20 ms step equals two 10 ms steps
        let mut a = m.clone();
        let mut b = m.clone();
        a.step(0.0, 0.0, 0.02);
        b.step(0.0, 0.0, 0.01);
        b.step(0.0, 0.0, 0.01);
        assert!((a.units()[0].volume - b.units()[0].volume).abs() < 1e-9);
    }

    #[test]
    fn test_severe_ards_recruits_on_inspiration_and_derecruits_on_expiration() {
        let mut m = MultiCompartmentLungModel::from_preset(
            LungPreset::Ards(ArdsSeverity::Severe),
            10,
            UnitVariation::Deterministic,
            168.0,
            mechanics::DEFAULT_GRAVITY_GRADIENT,
        )
        .unwrap();
        m.step(5.0, 5.0, 0.01);
        let at_peep = m.open_unit_count();
        m.step(20.0, 5.0, 0.01);
        let at_pip = m.open_unit_count();
        assert!(at_pip > at_peep);
        // Consolidated units stay shut at ordinary pressures
        assert!(at_pip <= 6);
        assert!(m.shunt_fraction() > 0.0);
    }

    #[test]
    fn test_events_reported() {
        let mut m = single_unit(10.0, 4.0, Pathology::Normal);
        m.step(12.0, 0.0, 0.01);
        assert_eq!(m.last_events(), RecruitmentEvents { opened: 1, closed: 0 });
        m.step(1.0, 0.0, 0.01);
        assert_eq!(m.last_events(), RecruitmentEvents { opened: 0, closed: 1 });
    }

    #[test]
    fn test_baseline_update() {
        let mut m = normal();
        m.set_baseline_volume(240.0).unwrap();
        assert_eq!(m.total_volume(), 240.0);
        assert!(m.set_baseline_volume(-1.0).is_err());
        assert_eq!(m.baseline_volume(), 240.0);
    }
}
