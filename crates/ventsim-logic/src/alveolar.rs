//! A single alveolar unit with pressure-gated recruitment.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{require_positive, SimError, SimResult};

/// Local disease state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Pathology {
    #[default]
    Normal,
    /// Fluid-filled, stiff, starts collapsed.
    Consolidated,
    /// Slow to empty; retains gas when closed.
    AirTrapped,
}

/// One compartment of the multi-compartment lung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlveolarUnit {
    pub id: usize,
    /// 0.0 = ventral (non-dependent) .. 1.0 = dorsal (dependent).
    pub position: f64,
    /// Effective pressure at or above which a closed unit opens (cmH2O).
    pub opening_pressure: f64,
    /// Effective pressure at or below which an open unit collapses (cmH2O).
    pub closing_pressure: f64,
    /// This unit's share of total compliance (mL/cmH2O).
    pub compliance: f64,
    pub is_open: bool,
    /// Volume above baseline (mL).
    pub volume: f64,
    /// Flow over the last step (mL/s).
    pub flow: f64,
    /// Relative blood-flow weight.
    pub perfusion: f64,
    pub pathology: Pathology,
}

/// Outcome of evaluating a unit's recruitment gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateChange {
    Unchanged,
    Opened,
    Closed,
}

impl AlveolarUnit {
    /// Check the construction-time invariants.
    pub fn validate(&self) -> SimResult<()> {
        if !(0.0..=1.0).contains(&self.position) {
            return Err(SimError::InvalidParameters(format!(
                "unit {} position {} outside 0..=1",
                self.id, self.position
            )));
        }
        if self.opening_pressure.partial_cmp(&self.closing_pressure) != Some(Ordering::Greater) {
            return Err(SimError::InvalidParameters(format!(
                "unit {} opening pressure {} must exceed closing pressure {}",
                self.id, self.opening_pressure, self.closing_pressure
            )));
        }
        require_positive(self.compliance, "unit compliance", SimError::InvalidParameters)?;
        if !self.perfusion.is_finite() || self.perfusion < 0.0 {
            return Err(SimError::InvalidParameters(format!(
                "unit {} perfusion {} must not be negative",
                self.id, self.perfusion
            )));
        }
        Ok(())
    }

    /// Apply the hysteresis gate for the given effective pressure.
    pub fn update_gate(&mut self, effective_pressure: f64) -> GateChange {
        if !self.is_open && effective_pressure >= self.opening_pressure {
            self.is_open = true;
            GateChange::Opened
        } else if self.is_open && effective_pressure <= self.closing_pressure {
            self.is_open = false;
            GateChange::Closed
        } else {
            GateChange::Unchanged
        }
    }

    pub fn state(&self) -> UnitState {
        UnitState {
            id: self.id,
            is_open: self.is_open,
            volume: self.volume,
        }
    }
}

/// Per-unit view recorded in simulation snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UnitState {
    pub id: usize,
    pub is_open: bool,
    pub volume: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> AlveolarUnit {
        AlveolarUnit {
            id: 0,
            position: 0.5,
            opening_pressure: 10.0,
            closing_pressure: 4.0,
            compliance: 5.0,
            is_open: false,
            volume: 0.0,
            flow: 0.0,
            perfusion: 1.0,
            pathology: Pathology::Normal,
        }
    }

    #[test]
    fn test_opens_at_threshold() {
        let mut u = unit();
        assert_eq!(u.update_gate(9.99), GateChange::Unchanged);
        assert!(!u.is_open);
        assert_eq!(u.update_gate(10.0), GateChange::Opened);
        assert!(u.is_open);
    }

    #[test]
    fn test_stays_open_inside_hysteresis_band() {
        let mut u = unit();
        u.update_gate(12.0);
        for p in [9.0, 7.0, 5.0, 4.01] {
            assert_eq!(u.update_gate(p), GateChange::Unchanged);
            assert!(u.is_open, "closed above closing pressure at {}", p);
        }
        assert_eq!(u.update_gate(4.0), GateChange::Closed);
    }

    #[test]
    fn test_stays_closed_inside_hysteresis_band() {
        let mut u = unit();
        for p in [4.5, 6.0, 9.5] {
            u.update_gate(p);
            assert!(!u.is_open);
        }
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut u = unit();
        u.closing_pressure = 10.0;
        assert!(matches!(u.validate(), Err(SimError::InvalidParameters(_))));
        u.closing_pressure = 12.0;
        assert!(u.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_compliance_and_position() {
        let mut u = unit();
        u.compliance = 0.0;
        assert!(u.validate().is_err());
        let mut u = unit();
        u.position = 1.5;
        assert!(u.validate().is_err());
        assert!(unit().validate().is_ok());
    }
}
