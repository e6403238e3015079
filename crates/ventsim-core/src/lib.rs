//! VentSim Core - Ventilator and Lung Mechanics Simulation Engine
//!
//! Couples a pressure-control ventilator waveform to either a
//! single-compartment RC lung or a multi-compartment recruitment lung and
//! advances them together in discrete time steps.
//!
//! # Architecture
//!
//! - **engine**: `SimulationEngine`, the owner of all simulation state
//! - **history**: snapshots and the bounded rolling window
//! - **driver**: optional wall-clock thread around a shared engine
//! - **config**: engine tuning loaded from JSON
//! - **persistence**: session save/load and history export
//!
//! The pure models live in `ventsim-logic`; nothing here keeps global state,
//! so any number of engines can run side by side.
//!
//! # Example
//!
//! ```rust
//! use ventsim_core::prelude::*;
//!
//! let mut engine = SimulationEngine::new();
//! engine.select_model(ModelKind::Advanced).unwrap();
//! engine
//!     .apply_lung_preset(LungPreset::Ards(ArdsSeverity::Moderate))
//!     .unwrap();
//!
//! // Four seconds of simulated time at the 10 ms fixed step
//! let last = engine.run_steps(400).unwrap().unwrap();
//! assert!((last.time - 4.0).abs() < 1e-9);
//! ```

pub mod config;
pub mod driver;
pub mod engine;
pub mod history;
pub mod persistence;

/// Commonly used types for convenient importing
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::driver::SimulationDriver;
    pub use crate::engine::{ActiveModel, ModelKind, SimulationEngine};
    pub use crate::history::{SimulationSnapshot, WindowSummary};
    pub use crate::persistence::{SaveError, SessionState};
    pub use ventsim_logic::prelude::*;
}
