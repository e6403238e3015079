//! Validation errors shared by the waveform generator and the lung models.

use thiserror::Error;

/// Errors raised when a configuration call is rejected.
///
/// All of these are input errors detected synchronously at the point of the
/// offending call. A rejected call leaves the previous valid state untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    /// Ventilator settings out of range (non-positive rate or I:E ratio, etc).
    #[error("Invalid ventilator settings: {0}")]
    InvalidSettings(String),

    /// Patient or alveolar-unit parameters out of range.
    #[error("Invalid patient parameters: {0}")]
    InvalidParameters(String),

    /// A model was asked to do something its current shape cannot support.
    #[error("Invalid model state: {0}")]
    InvalidModelState(String),

    /// Tick called with a zero, negative, or non-finite step.
    #[error("Invalid time step: {0}")]
    InvalidTimeStep(f64),
}

/// Result alias used throughout the logic crate.
pub type SimResult<T> = Result<T, SimError>;

/// Require `value` to be finite and strictly positive.
pub(crate) fn require_positive(
    value: f64,
    name: &str,
    err: fn(String) -> SimError,
) -> SimResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(err(format!("{} must be positive, got {}", name, value)))
    }
}

/// Require `value` to be finite and not negative.
pub(crate) fn require_non_negative(
    value: f64,
    name: &str,
    err: fn(String) -> SimError,
) -> SimResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(err(format!("{} must not be negative, got {}", name, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_positive() {
        assert!(require_positive(1.0, "rate", SimError::InvalidSettings).is_ok());
        assert!(require_positive(0.0, "rate", SimError::InvalidSettings).is_err());
        assert!(require_positive(-2.0, "rate", SimError::InvalidSettings).is_err());
        assert!(require_positive(f64::NAN, "rate", SimError::InvalidSettings).is_err());
        assert!(require_positive(f64::INFINITY, "rate", SimError::InvalidSettings).is_err());
    }

    #[test]
    fn test_require_non_negative() {
        assert!(require_non_negative(0.0, "peep", SimError::InvalidSettings).is_ok());
        assert!(require_non_negative(-0.1, "peep", SimError::InvalidSettings).is_err());
    }

    #[test]
    fn test_error_message_names_field() {
        let err = require_positive(0.0, "compliance", SimError::InvalidParameters).unwrap_err();
        assert!(matches!(err, SimError::InvalidParameters(_)));
        assert!(err.to_string().contains("compliance"));
    }
}
