//! Wall-clock driver: a background thread that feeds elapsed real time to a
//! shared engine and reports each new snapshot.
//!
//! The engine itself never sleeps or spawns. Hosts that want a live
//! simulation wrap it in a driver; tests and batch runs call `tick` directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ventsim_logic::SimResult;

use crate::engine::SimulationEngine;
use crate::history::SimulationSnapshot;

fn lock(engine: &Mutex<SimulationEngine>) -> MutexGuard<'_, SimulationEngine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs an engine in real time on a worker thread.
pub struct SimulationDriver {
    engine: Arc<Mutex<SimulationEngine>>,
    interval: Duration,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulationDriver {
    /// Wrap `engine`, waking every `interval` while running.
    pub fn new(engine: SimulationEngine, interval: Duration) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            interval,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Shared handle for configuration and queries while running.
    pub fn engine(&self) -> Arc<Mutex<SimulationEngine>> {
        Arc::clone(&self.engine)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Start the worker. `on_tick` receives the latest snapshot after every
    /// wake that advanced the engine, outside the engine lock.
    ///
    /// Does nothing if already running.
    pub fn start<F>(&mut self, mut on_tick: F)
    where
        F: FnMut(&SimulationSnapshot) + Send + 'static,
    {
        if self.worker.is_some() {
            return;
        }
        lock(&self.engine).start();
        self.stop.store(false, Ordering::SeqCst);

        let engine = Arc::clone(&self.engine);
        let stop = Arc::clone(&self.stop);
        let interval = self.interval;
        self.worker = Some(thread::spawn(move || {
            let mut last = Instant::now();
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(interval);
                let now = Instant::now();
                let elapsed = now.duration_since(last).as_secs_f64();
                last = now;

                let latest = {
                    let mut engine = lock(&engine);
                    match engine.advance_realtime(elapsed) {
                        Ok(0) => None,
                        Ok(_) => engine.latest(),
                        Err(e) => {
                            log::warn!("Real-time advance failed: {}", e);
                            None
                        }
                    }
                };
                if let Some(snapshot) = latest {
                    on_tick(&snapshot);
                }
            }
        }));
    }

    /// Stop and join the worker, keeping engine state. Idempotent.
    pub fn pause(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("Simulation driver thread panicked");
            }
        }
        lock(&self.engine).pause();
    }

    /// Reset the engine. The worker keeps running if it was.
    pub fn reset(&mut self) -> SimResult<()> {
        lock(&self.engine).reset()
    }
}

impl Drop for SimulationDriver {
    fn drop(&mut self) {
        self.pause();
    }
}
