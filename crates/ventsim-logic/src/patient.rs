//! Patient parameters for the single-compartment model and the
//! body-weight-derived predicted lung volumes.

use serde::{Deserialize, Serialize};

use crate::error::{require_non_negative, require_positive, SimError, SimResult};

/// Predicted-volume coefficients per kg of ideal body weight (male reference).
pub mod predicted {
    pub const TLC_PER_KG: f64 = 7.99;
    pub const VC_PER_KG: f64 = 4.5;
    pub const RV_PER_KG: f64 = 1.31;
    pub const FRC_PER_KG: f64 = 2.4;
}

/// Reference lung volumes derived from ideal body weight (mL).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictedVolumes {
    /// Total lung capacity.
    pub tlc: f64,
    /// Vital capacity.
    pub vc: f64,
    /// Residual volume.
    pub rv: f64,
    /// Functional residual capacity.
    pub frc: f64,
}

impl PredictedVolumes {
    pub fn from_ideal_body_weight(ibw: f64) -> Self {
        use predicted::*;
        Self {
            tlc: TLC_PER_KG * ibw,
            vc: VC_PER_KG * ibw,
            rv: RV_PER_KG * ibw,
            frc: FRC_PER_KG * ibw,
        }
    }
}

/// Lung mechanics for the single-compartment model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatientParameters {
    /// mL/cmH2O
    pub compliance: f64,
    /// cmH2O·s/L
    pub resistance: f64,
    /// kg
    pub ideal_body_weight: f64,
    /// Baseline volume the model relaxes to at zero pressure (mL).
    pub residual_volume: f64,
}

impl Default for PatientParameters {
    fn default() -> Self {
        let ideal_body_weight = 70.0;
        Self {
            compliance: 50.0,
            resistance: 10.0,
            ideal_body_weight,
            residual_volume: PredictedVolumes::from_ideal_body_weight(ideal_body_weight).frc,
        }
    }
}

impl PatientParameters {
    pub fn validate(&self) -> SimResult<()> {
        let invalid = SimError::InvalidParameters;
        require_positive(self.compliance, "compliance", invalid)?;
        require_positive(self.resistance, "resistance", invalid)?;
        require_positive(self.ideal_body_weight, "ideal body weight", invalid)?;
        require_non_negative(self.residual_volume, "residual volume", invalid)?;
        Ok(())
    }

    pub fn predicted(&self) -> PredictedVolumes {
        PredictedVolumes::from_ideal_body_weight(self.ideal_body_weight)
    }

    /// RC time constant in seconds (R in cmH2O·s/L, C in mL/cmH2O).
    pub fn time_constant(&self) -> f64 {
        self.resistance * self.compliance * 0.001
    }

    /// Merge `update` into a copy and validate it.
    ///
    /// A new ideal body weight resets the residual volume to predicted FRC
    /// unless the same update also sets the residual volume explicitly.
    pub fn merged(&self, update: &PatientParametersUpdate) -> SimResult<Self> {
        let ideal_body_weight = update.ideal_body_weight.unwrap_or(self.ideal_body_weight);
        let residual_volume = match (update.residual_volume, update.ideal_body_weight) {
            (Some(rv), _) => rv,
            (None, Some(ibw)) => PredictedVolumes::from_ideal_body_weight(ibw).frc,
            (None, None) => self.residual_volume,
        };
        let merged = Self {
            compliance: update.compliance.unwrap_or(self.compliance),
            resistance: update.resistance.unwrap_or(self.resistance),
            ideal_body_weight,
            residual_volume,
        };
        merged.validate()?;
        Ok(merged)
    }
}

/// Partial patient update. `None` fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatientParametersUpdate {
    pub compliance: Option<f64>,
    pub resistance: Option<f64>,
    pub ideal_body_weight: Option<f64>,
    pub residual_volume: Option<f64>,
}

impl From<PatientParameters> for PatientParametersUpdate {
    fn from(p: PatientParameters) -> Self {
        Self {
            compliance: Some(p.compliance),
            resistance: Some(p.resistance),
            ideal_body_weight: Some(p.ideal_body_weight),
            residual_volume: Some(p.residual_volume),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicted_volumes() {
        let v = PredictedVolumes::from_ideal_body_weight(70.0);
        assert!((v.tlc - 559.3).abs() < 1e-9);
        assert!((v.vc - 315.0).abs() < 1e-9);
        assert!((v.rv - 91.7).abs() < 1e-9);
        assert!((v.frc - 168.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_residual_is_frc() {
        let p = PatientParameters::default();
        assert!((p.residual_volume - p.predicted().frc).abs() < 1e-12);
    }

    #[test]
    fn test_time_constant() {
        let p = PatientParameters::default();
        assert!((p.time_constant() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_ibw_change_resets_residual() {
        let p = PatientParameters::default();
        let merged = p
            .merged(&PatientParametersUpdate {
                ideal_body_weight: Some(80.0),
                ..Default::default()
            })
            .unwrap();
        assert!((merged.residual_volume - 192.0).abs() < 1e-9);
    }

    #[test]
    fn test_explicit_residual_wins() {
        let p = PatientParameters::default();
        let merged = p
            .merged(&PatientParametersUpdate {
                ideal_body_weight: Some(80.0),
                residual_volume: Some(1000.0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(merged.residual_volume, 1000.0);
        assert_eq!(merged.ideal_body_weight, 80.0);
    }

    #[test]
    fn test_non_positive_mechanics_rejected() {
        let p = PatientParameters::default();
        for update in [
            PatientParametersUpdate {
                compliance: Some(0.0),
                ..Default::default()
            },
            PatientParametersUpdate {
                resistance: Some(-5.0),
                ..Default::default()
            },
            PatientParametersUpdate {
                ideal_body_weight: Some(0.0),
                ..Default::default()
            },
        ] {
            assert!(matches!(
                p.merged(&update),
                Err(SimError::InvalidParameters(_))
            ));
        }
    }
}
