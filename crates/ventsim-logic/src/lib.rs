//! Pure ventilator and lung-mechanics logic for VentSim.
//!
//! Everything here is independent of scheduling, rendering, or I/O.
//! Functions and models take plain data and a time step and return plain
//! data, so they can be driven by a real-time loop, a headless harness, or a
//! unit test with identical arithmetic.
//!
//! # Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`alveolar`] | Single alveolar unit with recruitment hysteresis |
//! | [`error`] | Validation error taxonomy |
//! | [`multi_compartment`] | N gated units with gravity gradient and pathology |
//! | [`patient`] | Patient mechanics and predicted volumes from body weight |
//! | [`presets`] | Normal / ARDS / COPD unit-set construction |
//! | [`settings`] | Ventilator settings, partial updates, breath timing |
//! | [`single_compartment`] | First-order RC lung |
//! | [`waveform`] | Pressure waveform generator and phase state machine |

pub mod alveolar;
pub mod error;
pub mod multi_compartment;
pub mod patient;
pub mod presets;
pub mod settings;
pub mod single_compartment;
pub mod waveform;

pub use error::{SimError, SimResult};

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::alveolar::{AlveolarUnit, Pathology, UnitState};
    pub use crate::error::{SimError, SimResult};
    pub use crate::multi_compartment::MultiCompartmentLungModel;
    pub use crate::patient::{PatientParameters, PatientParametersUpdate, PredictedVolumes};
    pub use crate::presets::{ArdsSeverity, LungPreset, UnitVariation};
    pub use crate::settings::{
        BreathTiming, VentilationMode, VentilatorSettings, VentilatorSettingsUpdate,
    };
    pub use crate::single_compartment::{LungStep, SingleCompartmentLungModel};
    pub use crate::waveform::{BreathPhase, PressureSample, VentilatorWaveformGenerator};
}
