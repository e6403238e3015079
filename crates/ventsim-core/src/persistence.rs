//! Save/Load of an engine's configuration.
//!
//! A session captures everything needed to rebuild an engine: engine config,
//! ventilator settings, patient parameters, lung preset, and the selected
//! model. Simulated state and history are not saved; a loaded session starts
//! from time zero. Retained history can be exported as JSON for display.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use ventsim_logic::patient::PatientParameters;
use ventsim_logic::presets::LungPreset;
use ventsim_logic::settings::VentilatorSettings;
use ventsim_logic::SimError;

use crate::config::EngineConfig;
use crate::engine::{ModelKind, SimulationEngine};
use crate::history::SimulationSnapshot;

/// Version number for the session format (increment when the format changes)
pub const SAVE_VERSION: u32 = 1;

/// Serializable engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub version: u32,
    pub config: EngineConfig,
    pub settings: VentilatorSettings,
    pub patient: PatientParameters,
    pub preset: LungPreset,
    pub model_kind: ModelKind,
}

/// Errors that can occur during save/load
#[derive(Debug, Error)]
pub enum SaveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Encode(#[from] Box<bincode::ErrorKind>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Save version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Saved session is not valid: {0}")]
    Sim(#[from] SimError),
}

/// Write a session to a writer
pub fn save_session<W: Write>(writer: W, session: &SessionState) -> Result<(), SaveError> {
    bincode::serialize_into(writer, session)?;
    Ok(())
}

/// Read a session from a reader, checking the format version
pub fn load_session<R: Read>(reader: R) -> Result<SessionState, SaveError> {
    let session: SessionState = bincode::deserialize_from(reader)?;
    if session.version != SAVE_VERSION {
        return Err(SaveError::VersionMismatch {
            expected: SAVE_VERSION,
            found: session.version,
        });
    }
    Ok(session)
}

/// Write snapshots as a pretty-printed JSON array.
pub fn export_history_json<W: Write>(
    writer: W,
    snapshots: &[SimulationSnapshot],
) -> Result<(), SaveError> {
    serde_json::to_writer_pretty(writer, snapshots)?;
    Ok(())
}

impl SimulationEngine {
    /// Current configuration as a saveable session.
    pub fn session(&self) -> SessionState {
        SessionState {
            version: SAVE_VERSION,
            config: self.config().clone(),
            settings: *self.settings(),
            patient: *self.patient(),
            preset: self.preset(),
            model_kind: self.model_kind(),
        }
    }

    /// Build a fresh engine from a session. Every part is revalidated.
    pub fn from_session(session: SessionState) -> Result<Self, SaveError> {
        let engine = Self::from_parts(
            session.config,
            session.settings,
            session.patient,
            session.preset,
            session.model_kind,
        )?;
        Ok(engine)
    }

    /// Save the engine configuration to a writer
    pub fn save<W: Write>(&self, writer: W) -> Result<(), SaveError> {
        save_session(writer, &self.session())
    }

    /// Replace this engine with one loaded from a reader.
    ///
    /// On error the engine is left untouched.
    pub fn load<R: Read>(&mut self, reader: R) -> Result<(), SaveError> {
        let session = load_session(reader)?;
        let loaded = Self::from_session(session)?;
        log::info!(
            "Loaded session: {:?} model, {} preset",
            loaded.model_kind(),
            loaded.preset().label()
        );
        *self = loaded;
        Ok(())
    }

    /// Write the retained history as JSON.
    pub fn export_history_json<W: Write>(&self, writer: W) -> Result<(), SaveError> {
        export_history_json(writer, &self.history())
    }
}
