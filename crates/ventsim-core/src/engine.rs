//! Simulation engine - owns the generator and the active lung model and
//! advances them in fixed or caller-supplied steps.

use serde::{Deserialize, Serialize};
use ventsim_logic::multi_compartment::MultiCompartmentLungModel;
use ventsim_logic::patient::{PatientParameters, PatientParametersUpdate};
use ventsim_logic::presets::LungPreset;
use ventsim_logic::settings::{BreathTiming, VentilatorSettings, VentilatorSettingsUpdate};
use ventsim_logic::single_compartment::{approach_fraction, SingleCompartmentLungModel};
use ventsim_logic::waveform::{BreathPhase, VentilatorWaveformGenerator};
use ventsim_logic::{SimError, SimResult};

use crate::config::EngineConfig;
use crate::history::{SimulationSnapshot, SnapshotHistory, WindowSummary};

/// Which lung model the engine drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelKind {
    /// Single-compartment RC lung.
    #[default]
    Basic,
    /// Multi-compartment recruitment lung.
    Advanced,
}

/// The model currently being stepped.
#[derive(Debug, Clone)]
pub enum ActiveModel {
    Basic(SingleCompartmentLungModel),
    Advanced(MultiCompartmentLungModel),
}

impl ActiveModel {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Basic(_) => ModelKind::Basic,
            Self::Advanced(_) => ModelKind::Advanced,
        }
    }
}

/// Main simulation engine
#[derive(Debug, Clone)]
pub struct SimulationEngine {
    config: EngineConfig,
    generator: VentilatorWaveformGenerator,
    patient: PatientParameters,
    preset: LungPreset,
    model: ActiveModel,
    /// Simulated time in seconds since the last reset
    current_time: f64,
    /// Pressure actually reaching the lung after the response lag
    delivered_pressure: f64,
    history: SnapshotHistory,
    running: bool,
    /// Wall-clock time not yet consumed by fixed steps
    pending_realtime: f64,
}

impl SimulationEngine {
    /// Create an engine with default settings and the basic model.
    pub fn new() -> Self {
        let config = EngineConfig::default();
        let settings = VentilatorSettings::default();
        let patient = PatientParameters::default();
        Self::assemble(
            config,
            VentilatorWaveformGenerator::default(),
            patient,
            LungPreset::Normal,
            ActiveModel::Basic(SingleCompartmentLungModel::default()),
            settings.peep,
        )
    }

    /// Create an engine with the basic model and the given configuration.
    pub fn with_config(config: EngineConfig) -> SimResult<Self> {
        config.validate()?;
        let mut engine = Self::new();
        engine.history = SnapshotHistory::new(config.history_window, config.history_capacity());
        engine.config = config;
        Ok(engine)
    }

    /// Create an engine from explicit parts, validating all of them.
    pub fn from_parts(
        config: EngineConfig,
        settings: VentilatorSettings,
        patient: PatientParameters,
        preset: LungPreset,
        kind: ModelKind,
    ) -> SimResult<Self> {
        config.validate()?;
        patient.validate()?;
        let generator = VentilatorWaveformGenerator::new(settings)?;
        let model = build_model(kind, &config, &patient, preset)?;
        Ok(Self::assemble(config, generator, patient, preset, model, settings.peep))
    }

    fn assemble(
        config: EngineConfig,
        generator: VentilatorWaveformGenerator,
        patient: PatientParameters,
        preset: LungPreset,
        model: ActiveModel,
        peep: f64,
    ) -> Self {
        Self {
            history: SnapshotHistory::new(config.history_window, config.history_capacity()),
            config,
            generator,
            patient,
            preset,
            model,
            current_time: 0.0,
            delivered_pressure: peep,
            running: false,
            pending_realtime: 0.0,
        }
    }

    // ── Configuration ──────────────────────────────────────────────────

    /// Apply a partial ventilator update. Derived timing follows immediately.
    pub fn configure_ventilator(&mut self, update: &VentilatorSettingsUpdate) -> SimResult<()> {
        self.generator.update_settings(update).map_err(|e| {
            log::warn!("Rejected ventilator update: {}", e);
            e
        })
    }

    /// Apply a partial patient update.
    ///
    /// The basic model takes the full parameter set. The advanced model only
    /// follows the baseline volume; its mechanics come from the lung preset.
    pub fn configure_patient(&mut self, update: &PatientParametersUpdate) -> SimResult<()> {
        let merged = self.patient.merged(update).map_err(|e| {
            log::warn!("Rejected patient update: {}", e);
            e
        })?;
        match &mut self.model {
            ActiveModel::Basic(model) => model.configure(update)?,
            ActiveModel::Advanced(model) => model.set_baseline_volume(merged.residual_volume)?,
        }
        self.patient = merged;
        Ok(())
    }

    /// Rebuild the alveolar unit set from a preset.
    ///
    /// With the basic model active the preset is stored and used the next
    /// time the advanced model is selected.
    pub fn apply_lung_preset(&mut self, preset: LungPreset) -> SimResult<()> {
        if let ActiveModel::Advanced(_) = self.model {
            let model = build_model(ModelKind::Advanced, &self.config, &self.patient, preset)?;
            self.model = model;
            log::debug!("Applied {} preset at t={:.2}s", preset.label(), self.current_time);
        } else {
            log::debug!("Stored {} preset for the advanced model", preset.label());
        }
        self.preset = preset;
        Ok(())
    }

    /// Switch lung model. Time and history restart from zero.
    pub fn select_model(&mut self, kind: ModelKind) -> SimResult<()> {
        let model = build_model(kind, &self.config, &self.patient, self.preset)?;
        self.model = model;
        self.restart_clock();
        log::debug!("Selected {:?} model", kind);
        Ok(())
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    /// Allow real-time advancement.
    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.pending_realtime = 0.0;
            log::info!("Simulation started at t={:.2}s", self.current_time);
        }
    }

    /// Stop real-time advancement, keeping all state. Idempotent.
    pub fn pause(&mut self) {
        if self.running {
            self.running = false;
            self.pending_realtime = 0.0;
            log::info!("Simulation paused at t={:.2}s", self.current_time);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Zero time and history and rebuild the generator and active model.
    ///
    /// Settings, patient parameters, and the preset are kept. The running
    /// state is unchanged.
    pub fn reset(&mut self) -> SimResult<()> {
        let model = build_model(self.model.kind(), &self.config, &self.patient, self.preset)?;
        self.model = model;
        self.restart_clock();
        log::debug!("Simulation reset");
        Ok(())
    }

    fn restart_clock(&mut self) {
        self.generator.reset();
        self.current_time = 0.0;
        self.delivered_pressure = self.generator.settings().peep;
        self.pending_realtime = 0.0;
        self.history.clear();
    }

    // ── Stepping ───────────────────────────────────────────────────────

    /// Advance one step. `None` uses the configured fixed step.
    pub fn tick(&mut self, delta_seconds: Option<f64>) -> SimResult<SimulationSnapshot> {
        let dt = delta_seconds.unwrap_or(self.config.fixed_step);
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimError::InvalidTimeStep(dt));
        }

        self.current_time += dt;
        let sample = self.generator.advance(self.current_time);

        // First-order lag between the generator and the airway
        let alpha = approach_fraction(dt, self.config.pressure_response_time);
        self.delivered_pressure += (sample.pressure - self.delivered_pressure) * alpha;

        let peep = self.generator.settings().peep;
        let (step, units) = match &mut self.model {
            ActiveModel::Basic(model) => (model.step(self.delivered_pressure, dt), Vec::new()),
            ActiveModel::Advanced(model) => {
                let step = model.step(self.delivered_pressure, peep, dt);
                (step, model.unit_states())
            }
        };

        let snapshot = SimulationSnapshot {
            time: self.current_time,
            phase: sample.phase,
            target_pressure: sample.pressure,
            airway_pressure: self.delivered_pressure,
            total_volume: step.volume,
            total_flow: step.flow,
            tidal_volume: step.tidal_volume,
            breath: self.generator.breaths_started(),
            units,
        };
        self.history.push(snapshot.clone());
        Ok(snapshot)
    }

    /// Advance by `count` fixed steps and return the last snapshot.
    pub fn run_steps(&mut self, count: usize) -> SimResult<Option<SimulationSnapshot>> {
        let mut last = None;
        for _ in 0..count {
            last = Some(self.tick(None)?);
        }
        Ok(last)
    }

    /// Consume elapsed wall-clock time in fixed steps while running.
    ///
    /// Leftover time below one step carries over to the next call. Time
    /// beyond `max_catch_up_steps` is dropped so a stalled host does not
    /// trigger a burst of work. Returns the number of ticks run.
    pub fn advance_realtime(&mut self, elapsed_seconds: f64) -> SimResult<usize> {
        if !self.running {
            return Ok(0);
        }
        if !(elapsed_seconds.is_finite() && elapsed_seconds >= 0.0) {
            return Err(SimError::InvalidTimeStep(elapsed_seconds));
        }

        let step = self.config.fixed_step;
        self.pending_realtime += elapsed_seconds;
        let mut ticks = 0;
        while self.pending_realtime >= step && ticks < self.config.max_catch_up_steps {
            self.tick(None)?;
            self.pending_realtime -= step;
            ticks += 1;
        }
        if self.pending_realtime >= step {
            log::debug!(
                "Dropping {:.3}s of real time after {} catch-up steps",
                self.pending_realtime,
                ticks
            );
            self.pending_realtime %= step;
        }
        Ok(ticks)
    }

    // ── Queries ────────────────────────────────────────────────────────

    /// Owned copy of the retained snapshots, oldest first.
    pub fn history(&self) -> Vec<SimulationSnapshot> {
        self.history.to_vec()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn latest(&self) -> Option<SimulationSnapshot> {
        self.history.latest().cloned()
    }

    /// Pressure, flow, and volume extremes over the retained window.
    pub fn summary(&self) -> Option<WindowSummary> {
        self.history.summary()
    }

    /// Simulated seconds since the last reset.
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn phase(&self) -> BreathPhase {
        self.generator.phase()
    }

    pub fn delivered_pressure(&self) -> f64 {
        self.delivered_pressure
    }

    pub fn settings(&self) -> &VentilatorSettings {
        self.generator.settings()
    }

    pub fn timing(&self) -> &BreathTiming {
        self.generator.timing()
    }

    pub fn patient(&self) -> &PatientParameters {
        &self.patient
    }

    pub fn preset(&self) -> LungPreset {
        self.preset
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn model_kind(&self) -> ModelKind {
        self.model.kind()
    }

    pub fn model(&self) -> &ActiveModel {
        &self.model
    }

    pub fn basic_model(&self) -> Option<&SingleCompartmentLungModel> {
        match &self.model {
            ActiveModel::Basic(model) => Some(model),
            ActiveModel::Advanced(_) => None,
        }
    }

    pub fn advanced_model(&self) -> Option<&MultiCompartmentLungModel> {
        match &self.model {
            ActiveModel::Advanced(model) => Some(model),
            ActiveModel::Basic(_) => None,
        }
    }
}

impl Default for SimulationEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Construct a fresh model of `kind`.
fn build_model(
    kind: ModelKind,
    config: &EngineConfig,
    patient: &PatientParameters,
    preset: LungPreset,
) -> SimResult<ActiveModel> {
    Ok(match kind {
        ModelKind::Basic => ActiveModel::Basic(SingleCompartmentLungModel::new(*patient)?),
        ModelKind::Advanced => ActiveModel::Advanced(MultiCompartmentLungModel::from_preset(
            preset,
            config.unit_count,
            config.unit_variation,
            patient.residual_volume,
            config.gravity_gradient,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ventsim_logic::presets::ArdsSeverity;

    #[test]
    fn test_engine_creation() {
        let engine = SimulationEngine::new();
        assert_eq!(engine.current_time(), 0.0);
        assert_eq!(engine.history_len(), 0);
        assert_eq!(engine.model_kind(), ModelKind::Basic);
        assert_eq!(engine.phase(), BreathPhase::Expiration);
        assert!(!engine.is_running());
    }

    #[test]
    fn test_tick_advances_time() {
        let mut engine = SimulationEngine::new();
        let snap = engine.tick(None).unwrap();
        assert!((snap.time - 0.01).abs() < 1e-12);
        let snap = engine.tick(Some(0.05)).unwrap();
        assert!((snap.time - 0.06).abs() < 1e-12);
        assert_eq!(engine.history_len(), 2);
    }

    #[test]
    fn test_invalid_step_rejected_without_side_effects() {
        let mut engine = SimulationEngine::new();
        engine.tick(None).unwrap();
        for bad in [0.0, -0.01, f64::NAN] {
            assert!(matches!(
                engine.tick(Some(bad)),
                Err(SimError::InvalidTimeStep(_))
            ));
        }
        assert_eq!(engine.history_len(), 1);
        assert!((engine.current_time() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_oversized_history_config_is_an_error() {
        for fixed_step in [1e-9, 1e-300] {
            let config = EngineConfig {
                fixed_step,
                ..Default::default()
            };
            assert!(matches!(
                SimulationEngine::with_config(config.clone()),
                Err(SimError::InvalidSettings(_))
            ));
            assert!(SimulationEngine::from_parts(
                config,
                VentilatorSettings::default(),
                PatientParameters::default(),
                LungPreset::Normal,
                ModelKind::Basic,
            )
            .is_err());
        }
    }

    #[test]
    fn test_first_breath_starts_on_first_tick() {
        let mut engine = SimulationEngine::new();
        let snap = engine.tick(None).unwrap();
        assert_eq!(snap.phase, BreathPhase::Inspiration);
        assert_eq!(snap.breath, 1);
    }

    #[test]
    fn test_pressure_lag_smooths_target() {
        let mut engine = SimulationEngine::new();
        let mut max_gap: f64 = 0.0;
        for _ in 0..400 {
            let s = engine.tick(None).unwrap();
            max_gap = max_gap.max((s.target_pressure - s.airway_pressure).abs());
            assert!(s.airway_pressure <= engine.settings().pip() + 1e-9);
        }
        assert!(max_gap > 0.0);
    }

    #[test]
    fn test_lag_disabled_delivers_target() {
        let config = EngineConfig {
            pressure_response_time: 0.0,
            ..Default::default()
        };
        let mut engine = SimulationEngine::with_config(config).unwrap();
        for _ in 0..50 {
            let s = engine.tick(None).unwrap();
            assert_eq!(s.airway_pressure, s.target_pressure);
        }
    }

    #[test]
    fn test_rejected_settings_keep_last_good() {
        let mut engine = SimulationEngine::new();
        engine
            .configure_ventilator(&VentilatorSettingsUpdate {
                respiratory_rate: Some(20.0),
                ..Default::default()
            })
            .unwrap();
        let timing = *engine.timing();
        let err = engine
            .configure_ventilator(&VentilatorSettingsUpdate {
                respiratory_rate: Some(12.0),
                ie_ratio: Some(0.0),
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidSettings(_)));
        assert_eq!(*engine.timing(), timing);
        assert_eq!(engine.settings().respiratory_rate, 20.0);
    }

    #[test]
    fn test_rejected_patient_keeps_last_good() {
        let mut engine = SimulationEngine::new();
        let before = *engine.patient();
        assert!(matches!(
            engine.configure_patient(&PatientParametersUpdate {
                compliance: Some(60.0),
                resistance: Some(0.0),
                ..Default::default()
            }),
            Err(SimError::InvalidParameters(_))
        ));
        assert_eq!(*engine.patient(), before);
        assert_eq!(engine.basic_model().unwrap().params(), &before);
    }

    #[test]
    fn test_select_model_resets_clock() {
        let mut engine = SimulationEngine::new();
        engine.run_steps(100).unwrap();
        engine.select_model(ModelKind::Advanced).unwrap();
        assert_eq!(engine.current_time(), 0.0);
        assert_eq!(engine.history_len(), 0);
        assert_eq!(engine.advanced_model().unwrap().unit_count(), 10);
        let snap = engine.tick(None).unwrap();
        assert_eq!(snap.units.len(), 10);
    }

    #[test]
    fn test_preset_stored_while_basic() {
        let mut engine = SimulationEngine::new();
        engine
            .apply_lung_preset(LungPreset::Ards(ArdsSeverity::Severe))
            .unwrap();
        assert!(engine.advanced_model().is_none());
        engine.select_model(ModelKind::Advanced).unwrap();
        let closed = engine
            .advanced_model()
            .unwrap()
            .units()
            .iter()
            .filter(|u| !u.is_open)
            .count();
        assert_eq!(closed, 4);
    }

    #[test]
    fn test_preset_rebuilds_units_without_resetting_time() {
        let mut engine = SimulationEngine::new();
        engine.select_model(ModelKind::Advanced).unwrap();
        engine.run_steps(50).unwrap();
        engine.apply_lung_preset(LungPreset::Copd).unwrap();
        assert!((engine.current_time() - 0.5).abs() < 1e-9);
        assert_eq!(engine.preset(), LungPreset::Copd);
        assert!(engine
            .advanced_model()
            .unwrap()
            .units()
            .iter()
            .all(|u| u.volume == 0.0));
    }

    #[test]
    fn test_reset_matches_fresh_engine() {
        let mut fresh = SimulationEngine::new();
        let first = fresh.tick(None).unwrap();

        let mut engine = SimulationEngine::new();
        engine.run_steps(321).unwrap();
        engine.reset().unwrap();
        assert_eq!(engine.current_time(), 0.0);
        assert_eq!(engine.history_len(), 0);
        assert_eq!(engine.tick(None).unwrap(), first);
    }

    #[test]
    fn test_realtime_requires_running() {
        let mut engine = SimulationEngine::new();
        assert_eq!(engine.advance_realtime(0.1).unwrap(), 0);
        engine.start();
        assert_eq!(engine.advance_realtime(0.035).unwrap(), 3);
        // 5 ms carried over
        assert_eq!(engine.advance_realtime(0.006).unwrap(), 1);
        engine.pause();
        engine.pause();
        assert!(!engine.is_running());
        assert_eq!(engine.advance_realtime(1.0).unwrap(), 0);
    }

    #[test]
    fn test_realtime_catch_up_is_bounded() {
        let mut engine = SimulationEngine::new();
        engine.start();
        let ticks = engine.advance_realtime(5.0).unwrap();
        assert_eq!(ticks, engine.config().max_catch_up_steps);
        assert_eq!(engine.advance_realtime(0.0).unwrap(), 0);
    }

    #[test]
    fn test_engines_are_independent() {
        let mut a = SimulationEngine::new();
        let mut b = SimulationEngine::new();
        a.configure_ventilator(&VentilatorSettingsUpdate {
            peep: Some(10.0),
            ..Default::default()
        })
        .unwrap();
        a.run_steps(10).unwrap();
        b.run_steps(3).unwrap();
        assert_eq!(a.settings().peep, 10.0);
        assert_eq!(b.settings().peep, 5.0);
        assert_eq!(a.history_len(), 10);
        assert_eq!(b.history_len(), 3);
    }
}
