//! VentSim Headless Simulation Harness
//!
//! Validates the waveform, lung models, and engine end to end without a UI.
//! Runs entirely in-process: no threads, no files, no rendering.
//!
//! Usage:
//!   cargo run -p ventsim-simtest
//!   cargo run -p ventsim-simtest -- --verbose

use std::io::Cursor;

use ventsim_core::prelude::*;
use ventsim_logic::multi_compartment::mechanics::DEFAULT_GRAVITY_GRADIENT;
use ventsim_logic::waveform::{expiratory_pressure, inspiratory_pressure};

// ── Engine config used for the end-to-end runs ──────────────────────────
const ENGINE_CONFIG_JSON: &str = r#"{
    "fixed_step": 0.01,
    "history_window": 10.0,
    "unit_count": 20
}"#;

// ── Test harness ────────────────────────────────────────────────────────

struct TestResult {
    name: String,
    passed: bool,
    detail: String,
}

fn main() {
    let verbose = std::env::args().any(|a| a == "--verbose");
    println!("=== VentSim Simulation Harness ===\n");

    let mut results = Vec::new();

    // 1. Breath timing
    results.extend(validate_breath_timing(verbose));

    // 2. Pressure waveform
    results.extend(validate_waveform(verbose));

    // 3. Single-compartment lung
    results.extend(validate_single_compartment(verbose));

    // 4. Multi-compartment lung
    results.extend(validate_multi_compartment(verbose));

    // 5. Engine orchestration
    results.extend(validate_engine(verbose));

    // 6. Session persistence
    results.extend(validate_persistence(verbose));

    // ── Summary ──
    println!();
    let passed = results.iter().filter(|r| r.passed).count();
    let failed = results.iter().filter(|r| !r.passed).count();
    let total = results.len();

    for r in &results {
        let icon = if r.passed { "✓" } else { "✗" };
        if !r.passed || verbose {
            println!("  {} {}: {}", icon, r.name, r.detail);
        }
    }

    println!(
        "\n=== RESULT: {}/{} passed, {} failed ===",
        passed, total, failed
    );

    if failed > 0 {
        std::process::exit(1);
    }
}

fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

// ── 1. Breath Timing ────────────────────────────────────────────────────

fn validate_breath_timing(verbose: bool) -> Vec<TestResult> {
    println!("--- Breath Timing ---");
    let mut results = Vec::new();

    let t = BreathTiming::from_settings(&VentilatorSettings::default());
    results.push(TestResult {
        name: "timing_default_scenario".into(),
        passed: approx(t.period, 4.0, 1e-12)
            && approx(t.inspiration_time, 4.0 / 3.0, 1e-9)
            && approx(t.expiration_time, 8.0 / 3.0, 1e-9),
        detail: format!(
            "period {:.3}s, insp {:.3}s, exp {:.3}s",
            t.period, t.inspiration_time, t.expiration_time
        ),
    });

    // Phases partition the period across the clinical range
    let mut worst: f64 = 0.0;
    let mut combos = 0;
    for rate in [6.0, 10.0, 15.0, 20.0, 30.0, 40.0] {
        for ie in [0.25, 0.33, 0.5, 1.0, 2.0] {
            let t = BreathTiming::from_settings(&VentilatorSettings {
                respiratory_rate: rate,
                ie_ratio: ie,
                ..Default::default()
            });
            worst = worst.max((t.inspiration_time + t.expiration_time - t.period).abs());
            combos += 1;
        }
    }
    results.push(TestResult {
        name: "timing_partition".into(),
        passed: worst < 1e-12,
        detail: format!("{} combos, worst error {:.2e}s", combos, worst),
    });

    // Invalid settings are rejected
    let rejected = [
        VentilatorSettingsUpdate {
            respiratory_rate: Some(0.0),
            ..Default::default()
        },
        VentilatorSettingsUpdate {
            ie_ratio: Some(-1.0),
            ..Default::default()
        },
        VentilatorSettingsUpdate {
            fio2: Some(1.5),
            ..Default::default()
        },
    ]
    .iter()
    .filter(|u| VentilatorSettings::default().merged(u).is_err())
    .count();
    results.push(TestResult {
        name: "timing_rejects_invalid".into(),
        passed: rejected == 3,
        detail: format!("{}/3 invalid updates rejected", rejected),
    });

    if verbose {
        println!("  Inspiration time by rate (I:E 1:2):");
        for rate in [10.0, 15.0, 20.0, 30.0] {
            let t = BreathTiming::from_settings(&VentilatorSettings {
                respiratory_rate: rate,
                ..Default::default()
            });
            println!("    {:>4.0} bpm → {:.2}s", rate, t.inspiration_time);
        }
    }

    results
}

// ── 2. Pressure Waveform ────────────────────────────────────────────────

fn validate_waveform(_verbose: bool) -> Vec<TestResult> {
    println!("--- Pressure Waveform ---");
    let mut results = Vec::new();

    let gen = VentilatorWaveformGenerator::default();
    let period = gen.timing().period;

    let starts: Vec<f64> = (0..5)
        .map(|k| gen.target_pressure(k as f64 * period).pressure)
        .collect();
    results.push(TestResult {
        name: "waveform_cycle_start_peep".into(),
        passed: starts.iter().all(|p| approx(*p, 5.0, 1e-9)),
        detail: format!("{} cycle starts at PEEP", starts.len()),
    });

    let end = inspiratory_pressure(5.0, 15.0, 1.0);
    results.push(TestResult {
        name: "waveform_end_inspiration_pip".into(),
        passed: approx(end, 20.0, 1e-12),
        detail: format!("p=1 → {:.2} cmH2O", end),
    });

    // Ramp rises, decay falls, both stay between PEEP and PIP
    let mut monotone = true;
    let mut bounded = true;
    let mut prev_in = inspiratory_pressure(5.0, 15.0, 0.0);
    let mut prev_ex = expiratory_pressure(20.0, 5.0, 0.0);
    for i in 1..=100 {
        let p = i as f64 / 100.0;
        let rise = inspiratory_pressure(5.0, 15.0, p);
        let fall = expiratory_pressure(20.0, 5.0, p);
        monotone &= rise >= prev_in && fall <= prev_ex;
        bounded &= (5.0..=20.0).contains(&rise) && (5.0..=20.0).contains(&fall);
        prev_in = rise;
        prev_ex = fall;
    }
    results.push(TestResult {
        name: "waveform_shape".into(),
        passed: monotone && bounded,
        detail: format!("monotone: {}, bounded: {}", monotone, bounded),
    });

    // One expiration per period
    let mut gen = VentilatorWaveformGenerator::default();
    let steps = (5.0 * period / 0.01) as usize - 10;
    for i in 1..=steps {
        gen.advance(i as f64 * 0.01);
    }
    results.push(TestResult {
        name: "waveform_one_expiration_per_period".into(),
        passed: gen.expirations_started() == 5,
        detail: format!(
            "{} expirations in {:.1}s",
            gen.expirations_started(),
            steps as f64 * 0.01
        ),
    });

    results
}

// ── 3. Single-Compartment Lung ──────────────────────────────────────────

fn validate_single_compartment(verbose: bool) -> Vec<TestResult> {
    println!("--- Single-Compartment Lung ---");
    let mut results = Vec::new();

    let params = PatientParameters {
        compliance: 50.0,
        resistance: 10.0,
        ideal_body_weight: 70.0,
        residual_volume: 1000.0,
    };
    let mut model = match SingleCompartmentLungModel::new(params) {
        Ok(m) => m,
        Err(e) => {
            results.push(TestResult {
                name: "single_construct".into(),
                passed: false,
                detail: e.to_string(),
            });
            return results;
        }
    };

    let tau = model.time_constant();
    let steps = (5.0 * tau / 0.01).ceil() as usize;
    for _ in 0..steps {
        model.step(15.0, 0.01);
    }
    let error = (model.volume() - 1750.0).abs() / 1750.0;
    results.push(TestResult {
        name: "single_step_response".into(),
        passed: error < 0.01,
        detail: format!(
            "tau {:.2}s, {:.0} mL after {} steps ({:.2}% off)",
            tau,
            model.volume(),
            steps,
            error * 100.0
        ),
    });

    let mut worst: f64 = 0.0;
    model.reset_volume();
    let mut prev = model.volume();
    for i in 0..400 {
        let out = model.step(if i % 200 < 80 { 20.0 } else { 5.0 }, 0.01);
        worst = worst.max(((out.volume - prev) - out.flow * 0.01).abs());
        prev = out.volume;
    }
    results.push(TestResult {
        name: "single_flow_consistency".into(),
        passed: worst < 1e-9,
        detail: format!("worst |ΔV - Q·dt| {:.2e} mL", worst),
    });

    let predicted = PredictedVolumes::from_ideal_body_weight(70.0);
    results.push(TestResult {
        name: "single_predicted_volumes".into(),
        passed: predicted.rv < predicted.frc && predicted.frc < predicted.tlc,
        detail: format!(
            "RV {:.0} < FRC {:.0} < TLC {:.0} mL",
            predicted.rv, predicted.frc, predicted.tlc
        ),
    });

    if verbose {
        println!("  Time constant by mechanics:");
        for (c, r) in [(50.0, 10.0), (30.0, 15.0), (80.0, 20.0)] {
            println!("    C {:>3.0} R {:>3.0} → tau {:.2}s", c, r, c * r * 0.001);
        }
    }

    results
}

// ── 4. Multi-Compartment Lung ───────────────────────────────────────────

fn validate_multi_compartment(verbose: bool) -> Vec<TestResult> {
    println!("--- Multi-Compartment Lung ---");
    let mut results = Vec::new();

    // Hysteresis under a pressure sweep
    let unit = AlveolarUnit {
        id: 0,
        position: 0.0,
        opening_pressure: 12.0,
        closing_pressure: 6.0,
        compliance: 5.0,
        is_open: false,
        volume: 0.0,
        flow: 0.0,
        perfusion: 1.0,
        pathology: Pathology::Normal,
    };
    let mut sweep = unit.clone();
    let mut violations = 0;
    let pressures = (0..=40).chain((0..40).rev()).map(|i| i as f64 * 0.5);
    for p in pressures {
        let was_open = sweep.is_open;
        sweep.update_gate(p);
        if (!was_open && sweep.is_open && p < 12.0) || (was_open && !sweep.is_open && p > 6.0) {
            violations += 1;
        }
    }
    results.push(TestResult {
        name: "multi_hysteresis".into(),
        passed: violations == 0,
        detail: format!("{} threshold violations over a 0-20-0 sweep", violations),
    });

    // Consolidation grows with ARDS severity
    let counts: Vec<usize> = [ArdsSeverity::Mild, ArdsSeverity::Moderate, ArdsSeverity::Severe]
        .iter()
        .map(|s| ventsim_logic::presets::consolidated_count(*s, 20))
        .collect();
    results.push(TestResult {
        name: "multi_ards_consolidation".into(),
        passed: counts[0] < counts[1] && counts[1] < counts[2],
        detail: format!("mild/moderate/severe: {:?} of 20", counts),
    });

    // Recruitment at PIP vs PEEP
    let build = |preset| {
        MultiCompartmentLungModel::from_preset(
            preset,
            20,
            UnitVariation::Deterministic,
            2400.0,
            DEFAULT_GRAVITY_GRADIENT,
        )
    };
    let mut recruitment = Vec::new();
    for preset in [
        LungPreset::Normal,
        LungPreset::Ards(ArdsSeverity::Mild),
        LungPreset::Ards(ArdsSeverity::Severe),
        LungPreset::Copd,
    ] {
        let mut model = match build(preset) {
            Ok(m) => m,
            Err(e) => {
                results.push(TestResult {
                    name: format!("multi_build_{}", preset.label()),
                    passed: false,
                    detail: e.to_string(),
                });
                continue;
            }
        };
        for _ in 0..100 {
            model.step(20.0, 5.0, 0.01);
        }
        recruitment.push((preset, model.recruited_fraction(), model.shunt_fraction()));
    }
    let ordered = recruitment.len() == 4
        && recruitment[0].1 >= recruitment[1].1
        && recruitment[1].1 > recruitment[2].1;
    results.push(TestResult {
        name: "multi_recruitment_ordering".into(),
        passed: ordered,
        detail: recruitment
            .iter()
            .map(|(p, r, _)| format!("{} {:.0}%", p.label(), r * 100.0))
            .collect::<Vec<_>>()
            .join(", "),
    });

    // Air-trapped units hold volume after the airway drops
    if let Ok(mut copd) = build(LungPreset::Copd) {
        for _ in 0..150 {
            copd.step(20.0, 5.0, 0.01);
        }
        let trapped_before: f64 = copd
            .units()
            .iter()
            .filter(|u| u.pathology == Pathology::AirTrapped)
            .map(|u| u.volume)
            .sum();
        for _ in 0..10 {
            copd.step(0.0, 5.0, 0.01);
        }
        let trapped_after: f64 = copd
            .units()
            .iter()
            .filter(|u| u.pathology == Pathology::AirTrapped)
            .map(|u| u.volume)
            .sum();
        results.push(TestResult {
            name: "multi_air_trapping".into(),
            passed: trapped_before > 0.0 && trapped_after > 0.0 && trapped_after < trapped_before,
            detail: format!(
                "trapped volume {:.1} → {:.1} mL over 100 ms",
                trapped_before, trapped_after
            ),
        });
    }

    if verbose {
        println!("  Recruitment after 1s at 20 cmH2O:");
        for (preset, recruited, shunt) in &recruitment {
            println!(
                "    {:16} recruited {:>5.1}%  shunt {:>5.1}%",
                preset.label(),
                recruited * 100.0,
                shunt * 100.0
            );
        }
    }

    results
}

// ── 5. Engine ───────────────────────────────────────────────────────────

fn validate_engine(verbose: bool) -> Vec<TestResult> {
    println!("--- Engine ---");
    let mut results = Vec::new();

    let config = match EngineConfig::from_json_str(ENGINE_CONFIG_JSON) {
        Ok(c) => c,
        Err(e) => {
            results.push(TestResult {
                name: "engine_config_parse".into(),
                passed: false,
                detail: e.to_string(),
            });
            return results;
        }
    };
    results.push(TestResult {
        name: "engine_config_parse".into(),
        passed: config.unit_count == 20 && config.max_catch_up_steps == 25,
        detail: format!(
            "{} units, step {}s, window {}s",
            config.unit_count, config.fixed_step, config.history_window
        ),
    });

    let build = || {
        SimulationEngine::from_parts(
            config.clone(),
            VentilatorSettings::default(),
            PatientParameters::default(),
            LungPreset::Ards(ArdsSeverity::Moderate),
            ModelKind::Advanced,
        )
    };
    let (mut fresh, mut engine) = match (build(), build()) {
        (Ok(a), Ok(b)) => (a, b),
        (Err(e), _) | (_, Err(e)) => {
            results.push(TestResult {
                name: "engine_construct".into(),
                passed: false,
                detail: e.to_string(),
            });
            return results;
        }
    };

    // Reset restores the fresh trajectory
    let reset_ok = replays_after_reset(&mut fresh, &mut engine).unwrap_or(false);
    results.push(TestResult {
        name: "engine_reset_replays".into(),
        passed: reset_ok,
        detail: "20 ticks after reset match a fresh engine".into(),
    });

    // Rejected update leaves settings unchanged
    let before = *engine.settings();
    let rejected = engine
        .configure_ventilator(&VentilatorSettingsUpdate {
            peep: Some(8.0),
            ie_ratio: Some(0.0),
            ..Default::default()
        })
        .is_err();
    results.push(TestResult {
        name: "engine_atomic_settings".into(),
        passed: rejected && *engine.settings() == before,
        detail: "invalid multi-field update rejected as a whole".into(),
    });

    // Real-time accumulator matches fixed ticks
    let mut realtime = SimulationEngine::new();
    realtime.start();
    let ticks: usize = [0.016, 0.017, 0.016, 0.033, 0.001]
        .iter()
        .filter_map(|e| realtime.advance_realtime(*e).ok())
        .sum();
    results.push(TestResult {
        name: "engine_realtime_accumulator".into(),
        passed: ticks == 8 && realtime.history_len() == 8,
        detail: format!("83 ms of wall time → {} ticks", ticks),
    });

    // Window summary over a minute of ventilation
    if let Err(e) = engine.run_steps(6000) {
        results.push(TestResult {
            name: "engine_one_minute_run".into(),
            passed: false,
            detail: e.to_string(),
        });
        return results;
    }
    let summary = engine.summary();
    results.push(TestResult {
        name: "engine_history_window".into(),
        passed: engine.history_len() <= config.history_capacity() && summary.is_some(),
        detail: format!(
            "{} snapshots retained (capacity {})",
            engine.history_len(),
            config.history_capacity()
        ),
    });

    if verbose {
        if let Some(s) = summary {
            match serde_json::to_string(&s) {
                Ok(json) => println!("  Window summary: {}", json),
                Err(e) => println!("  Window summary unavailable: {}", e),
            }
        }
    }

    results
}

fn replays_after_reset(
    fresh: &mut SimulationEngine,
    engine: &mut SimulationEngine,
) -> SimResult<bool> {
    let expected: Vec<_> = (0..20).map(|_| fresh.tick(None)).collect::<SimResult<_>>()?;
    engine.run_steps(555)?;
    engine.reset()?;
    let replay: Vec<_> = (0..20).map(|_| engine.tick(None)).collect::<SimResult<_>>()?;
    Ok(replay == expected)
}

// ── 6. Session Persistence ──────────────────────────────────────────────

fn validate_persistence(_verbose: bool) -> Vec<TestResult> {
    println!("--- Session Persistence ---");
    let mut results = Vec::new();

    let mut original = SimulationEngine::new();
    let configured = original
        .configure_ventilator(&VentilatorSettingsUpdate {
            respiratory_rate: Some(22.0),
            fio2: Some(0.6),
            ..Default::default()
        })
        .and_then(|_| original.select_model(ModelKind::Advanced))
        .and_then(|_| original.apply_lung_preset(LungPreset::Copd));
    if let Err(e) = configured {
        results.push(TestResult {
            name: "persist_configure".into(),
            passed: false,
            detail: e.to_string(),
        });
        return results;
    }

    let mut buffer = Vec::new();
    let mut restored = SimulationEngine::new();
    let roundtrip = original
        .save(&mut buffer)
        .and_then(|_| restored.load(Cursor::new(&buffer)));
    results.push(TestResult {
        name: "persist_roundtrip".into(),
        passed: roundtrip.is_ok() && restored.session() == original.session(),
        detail: match roundtrip {
            Ok(()) => format!("{} bytes, session restored", buffer.len()),
            Err(e) => e.to_string(),
        },
    });

    if let Err(e) = original.run_steps(10) {
        results.push(TestResult {
            name: "persist_history_run".into(),
            passed: false,
            detail: e.to_string(),
        });
        return results;
    }
    let mut json = Vec::new();
    let exported = original.export_history_json(&mut json);
    let parsed = serde_json::from_slice::<Vec<SimulationSnapshot>>(&json);
    results.push(TestResult {
        name: "persist_history_export".into(),
        passed: exported.is_ok() && parsed.map(|v| v.len() == 10).unwrap_or(false),
        detail: format!("{} bytes of JSON for 10 snapshots", json.len()),
    });

    results
}
