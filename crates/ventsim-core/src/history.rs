//! Snapshots and the bounded rolling history the engine keeps.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use ventsim_logic::alveolar::UnitState;
use ventsim_logic::waveform::BreathPhase;

/// State of the simulation after one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSnapshot {
    /// Simulated time (s).
    pub time: f64,
    pub phase: BreathPhase,
    /// Generator output before the response lag (cmH2O).
    pub target_pressure: f64,
    /// Pressure delivered to the lung (cmH2O).
    pub airway_pressure: f64,
    /// mL
    pub total_volume: f64,
    /// mL/s, positive into the lung.
    pub total_flow: f64,
    /// Volume above baseline (mL).
    pub tidal_volume: f64,
    /// Breaths started so far.
    pub breath: u64,
    /// Per-unit states; empty for the single-compartment model.
    pub units: Vec<UnitState>,
}

impl SimulationSnapshot {
    pub fn flow_l_per_min(&self) -> f64 {
        self.total_flow * 60.0 / 1000.0
    }

    pub fn open_units(&self) -> usize {
        self.units.iter().filter(|u| u.is_open).count()
    }
}

/// Extremes over the retained window, for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowSummary {
    pub peak_pressure: f64,
    pub min_pressure: f64,
    pub peak_inspiratory_flow: f64,
    pub peak_expiratory_flow: f64,
    /// Largest minus smallest total volume (mL).
    pub volume_swing: f64,
    pub samples: usize,
}

/// Time-bounded, append-only snapshot buffer.
#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    window: f64,
    entries: VecDeque<SimulationSnapshot>,
}

impl SnapshotHistory {
    pub fn new(window: f64, capacity_hint: usize) -> Self {
        Self {
            window,
            entries: VecDeque::with_capacity(capacity_hint),
        }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    /// Append and evict everything older than the window.
    pub fn push(&mut self, snapshot: SimulationSnapshot) {
        let cutoff = snapshot.time - self.window;
        self.entries.push_back(snapshot);
        while self
            .entries
            .front()
            .is_some_and(|oldest| oldest.time < cutoff)
        {
            self.entries.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&SimulationSnapshot> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&SimulationSnapshot> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SimulationSnapshot> {
        self.entries.iter()
    }

    /// Owned copy of the retained snapshots, oldest first.
    pub fn to_vec(&self) -> Vec<SimulationSnapshot> {
        self.entries.iter().cloned().collect()
    }

    /// Extremes over the retained window. `None` when empty.
    pub fn summary(&self) -> Option<WindowSummary> {
        let first = self.entries.front()?;
        let mut s = WindowSummary {
            peak_pressure: first.airway_pressure,
            min_pressure: first.airway_pressure,
            peak_inspiratory_flow: first.total_flow.max(0.0),
            peak_expiratory_flow: first.total_flow.min(0.0),
            volume_swing: 0.0,
            samples: self.entries.len(),
        };
        let mut min_volume = first.total_volume;
        let mut max_volume = first.total_volume;
        for snap in self.entries.iter().skip(1) {
            s.peak_pressure = s.peak_pressure.max(snap.airway_pressure);
            s.min_pressure = s.min_pressure.min(snap.airway_pressure);
            s.peak_inspiratory_flow = s.peak_inspiratory_flow.max(snap.total_flow);
            s.peak_expiratory_flow = s.peak_expiratory_flow.min(snap.total_flow);
            min_volume = min_volume.min(snap.total_volume);
            max_volume = max_volume.max(snap.total_volume);
        }
        s.volume_swing = max_volume - min_volume;
        Some(s)
    }
}
