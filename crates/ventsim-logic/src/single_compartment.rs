//! Single-compartment (resistance–compliance) lung model.
//!
//! Volume relaxes toward `residual + C × P` with time constant `R × C`.
//! Each step applies the exact first-order solution over `dt`, so the
//! result does not depend on how a span of time is sliced into ticks.

use serde::{Deserialize, Serialize};

use crate::error::SimResult;
use crate::patient::{PatientParameters, PatientParametersUpdate, PredictedVolumes};

/// Fraction of the remaining gap to `target` covered in `dt` with time constant `tau`.
pub fn approach_fraction(dt: f64, tau: f64) -> f64 {
    if tau <= 0.0 {
        1.0
    } else {
        1.0 - (-dt / tau).exp()
    }
}

/// Output of one model step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LungStep {
    /// Total lung volume (mL).
    pub volume: f64,
    /// Flow over the step (mL/s, positive into the lung).
    pub flow: f64,
    /// Volume above the baseline (mL).
    pub tidal_volume: f64,
}

/// First-order RC lung.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleCompartmentLungModel {
    params: PatientParameters,
    volume: f64,
    flow: f64,
}

impl SingleCompartmentLungModel {
    /// Build a model at rest at its residual volume.
    pub fn new(params: PatientParameters) -> SimResult<Self> {
        params.validate()?;
        Ok(Self {
            volume: params.residual_volume,
            flow: 0.0,
            params,
        })
    }

    pub fn params(&self) -> &PatientParameters {
        &self.params
    }

    pub fn predicted(&self) -> PredictedVolumes {
        self.params.predicted()
    }

    pub fn time_constant(&self) -> f64 {
        self.params.time_constant()
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    /// Flow from the last step (mL/s).
    pub fn flow(&self) -> f64 {
        self.flow
    }

    pub fn flow_l_per_min(&self) -> f64 {
        self.flow * 60.0 / 1000.0
    }

    pub fn tidal_volume(&self) -> f64 {
        (self.volume - self.params.residual_volume).max(0.0)
    }

    /// Apply a partial parameter update.
    ///
    /// A change of ideal body weight or residual volume moves the lung back
    /// to rest at the new residual volume. On error nothing changes.
    pub fn configure(&mut self, update: &PatientParametersUpdate) -> SimResult<()> {
        let merged = self.params.merged(update)?;
        let baseline_moved = merged.residual_volume != self.params.residual_volume
            || merged.ideal_body_weight != self.params.ideal_body_weight;
        self.params = merged;
        if baseline_moved {
            self.reset_volume();
        }
        Ok(())
    }

    /// Return to rest at the residual volume.
    pub fn reset_volume(&mut self) {
        self.volume = self.params.residual_volume;
        self.flow = 0.0;
    }

    /// Steady-state volume for a constant applied pressure.
    pub fn equilibrium_volume(&self, pressure: f64) -> f64 {
        self.params.residual_volume + self.params.compliance * pressure
    }

    /// Advance by `dt` seconds with `pressure` (cmH2O) applied.
    ///
    /// `dt` must be positive; the engine validates it before calling.
    pub fn step(&mut self, pressure: f64, dt: f64) -> LungStep {
        let target = self.equilibrium_volume(pressure);
        let change = (target - self.volume) * approach_fraction(dt, self.time_constant());
        self.volume += change;
        self.flow = change / dt;
        LungStep {
            volume: self.volume,
            flow: self.flow,
            tidal_volume: self.tidal_volume(),
        }
    }
}

impl Default for SingleCompartmentLungModel {
    fn default() -> Self {
        let params = PatientParameters::default();
        Self {
            volume: params.residual_volume,
            flow: 0.0,
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SimError;

    fn scenario_model() -> SingleCompartmentLungModel {
        SingleCompartmentLungModel::new(PatientParameters {
            compliance: 50.0,
            resistance: 10.0,
            ideal_body_weight: 70.0,
            residual_volume: 1000.0,
        })
        .unwrap()
    }

    #[test]
    fn test_default_is_valid_and_at_rest() {
        let m = SingleCompartmentLungModel::default();
        assert!(m.params().validate().is_ok());
        assert_eq!(m.volume(), m.params().residual_volume);
    }

    #[test]
    fn test_starts_at_rest() {
        let m = scenario_model();
        assert_eq!(m.volume(), 1000.0);
        assert_eq!(m.flow(), 0.0);
        assert_eq!(m.tidal_volume(), 0.0);
    }

    #[test]
    fn test_pressure_step_converges_within_one_percent() {
        let mut m = scenario_model();
        let tau = m.time_constant();
        assert!((tau - 0.5).abs() < 1e-12);
        let dt = 0.01;
        let steps = (5.0 * tau / dt).ceil() as usize;
        for _ in 0..steps {
            m.step(15.0, dt);
        }
        let expected = 1750.0;
        assert!(
            (m.volume() - expected).abs() / expected < 0.01,
            "volume {} not within 1% of {}",
            m.volume(),
            expected
        );
    }

    #[test]
    fn test_long_hold_reaches_equilibrium() {
        let mut m = scenario_model();
        for _ in 0..2000 {
            m.step(10.0, 0.01);
        }
        assert!((m.volume() - 1500.0).abs() < 1e-6);
        assert!(m.flow().abs() < 1e-6);
    }

    #[test]
    fn test_flow_integrates_to_volume_change() {
        let mut m = scenario_model();
        let mut prev = m.volume();
        for i in 0..100 {
            let dt = 0.005 + (i % 3) as f64 * 0.005;
            let out = m.step(if i < 50 { 20.0 } else { 5.0 }, dt);
            assert!(((out.volume - prev) - out.flow * dt).abs() < 1e-9);
            prev = out.volume;
        }
    }

    #[test]
    fn test_step_size_independent() {
        let mut a = scenario_model();
        let mut b = scenario_model();
        a.step(15.0, 0.2);
        b.step(15.0, 0.1);
        b.step(15.0, 0.1);
        assert!((a.volume() - b.volume()).abs() < 1e-9);
    }

    #[test]
    fn test_tidal_volume_never_negative() {
        let mut m = scenario_model();
        m.step(-5.0, 0.5);
        assert!(m.volume() < 1000.0);
        assert_eq!(m.tidal_volume(), 0.0);
    }

    #[test]
    fn test_invalid_parameters_rejected() {
        let bad = PatientParameters {
            compliance: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            SingleCompartmentLungModel::new(bad),
            Err(SimError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_rejected_configure_keeps_state() {
        let mut m = scenario_model();
        m.step(15.0, 0.1);
        let before = m.clone();
        assert!(m
            .configure(&PatientParametersUpdate {
                resistance: Some(0.0),
                ..Default::default()
            })
            .is_err());
        assert_eq!(m, before);
    }

    #[test]
    fn test_ibw_change_resets_to_frc() {
        let mut m = scenario_model();
        m.step(15.0, 0.5);
        m.configure(&PatientParametersUpdate {
            ideal_body_weight: Some(60.0),
            ..Default::default()
        })
        .unwrap();
        assert!((m.params().residual_volume - 144.0).abs() < 1e-9);
        assert_eq!(m.volume(), m.params().residual_volume);
    }

    #[test]
    fn test_mechanics_change_keeps_volume() {
        let mut m = scenario_model();
        m.step(15.0, 0.5);
        let v = m.volume();
        m.configure(&PatientParametersUpdate {
            compliance: Some(30.0),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(m.volume(), v);
        assert!((m.time_constant() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_flow_unit_conversion() {
        let mut m = scenario_model();
        m.step(15.0, 0.01);
        assert!((m.flow_l_per_min() - m.flow() * 0.06).abs() < 1e-9);
    }
}
