//! End-to-end: the engine driving a simulated installation.

use std::sync::atomic::AtomicBool;
use std::time::Duration;

use diverter_core::mocks::NullOutputs;
use diverter_core::{
    BackgroundConfig, BoxedDiverter, Diverter, RotationPolicy, TelemetryReport, build_diverter,
    run_lockstep,
};
use diverter_hardware::sim::{
    BankOutputs, OutputBank, SimConfig, SimLoad, SimulatedMains, SurplusProfile,
};

const CONFIG: &str = r#"
[sampling]
startup_ms = 1000

[[loads]]
pin = 5
rating_w = 1000

[[loads]]
pin = 6
rating_w = 1000
"#;

fn simulate(surplus: SurplusProfile, seconds: u64) -> (Vec<TelemetryReport>, OutputBank) {
    simulate_with(surplus, seconds, |_| {})
}

fn simulate_with(
    surplus: SurplusProfile,
    seconds: u64,
    prepare: impl FnOnce(&Diverter<BankOutputs, NullOutputs>),
) -> (Vec<TelemetryReport>, OutputBank) {
    let cfg = diverter_config::load_toml(CONFIG).unwrap();
    cfg.validate().unwrap();
    let bank = OutputBank::new();
    let sim = SimulatedMains::new(
        SimConfig {
            surplus,
            loads: vec![
                SimLoad {
                    pin: 5,
                    rating_w: 1000.0,
                    metered: true,
                },
                SimLoad {
                    pin: 6,
                    rating_w: 1000.0,
                    metered: true,
                },
            ],
            duration: Some(Duration::from_secs(seconds)),
            ..SimConfig::default()
        },
        bank.clone(),
    );
    let diverter = build_diverter(&cfg, bank.outputs(), NullOutputs).unwrap();
    prepare(&diverter);
    let stop = AtomicBool::new(false);
    let mut reports = Vec::new();
    let summary = run_lockstep(sim, diverter, &stop, |r| {
        if let Some(t) = &r.telemetry {
            reports.push(t.clone());
        }
    })
    .unwrap();
    assert_eq!(summary.output_faults, 0);
    assert_eq!(summary.datalog_overruns, 0);
    (reports, bank)
}

#[test]
fn surplus_is_absorbed_by_the_loads() {
    let (reports, _) = simulate(SurplusProfile::Constant(1500.0), 41);
    assert!(reports.len() >= 7, "{} reports", reports.len());

    // skip the first period: the bucket is still filling
    for t in &reports[1..] {
        assert!(t.grid_w.abs() < 250.0, "grid {} W", t.grid_w);
        assert!((1000.0..=2000.0).contains(&t.diverted_w), "diverted {} W", t.diverted_w);
        assert!(t.vrms > 200.0 && t.vrms < 260.0, "vrms {}", t.vrms);
        assert!(t.lowest_sets_per_cycle >= 63);
        // first load carries the base, second load modulates
        assert!(t.load_on_ratio[0] > 0.95, "{:?}", t.load_on_ratio);
        assert!(t.load_on_ratio[1] > 0.2 && t.load_on_ratio[1] < 0.8, "{:?}", t.load_on_ratio);
    }
}

#[test]
fn import_keeps_every_load_off() {
    let (reports, bank) = simulate(SurplusProfile::Constant(-800.0), 16);
    assert!(!reports.is_empty());
    for t in &reports {
        assert!((t.grid_w - 800.0).abs() < 20.0, "grid {} W", t.grid_w);
        assert!(t.diverted_w.abs() < 5.0);
        assert_eq!(t.load_on_ratio, vec![0.0, 0.0]);
        assert_eq!(t.diverted_wh, 0);
    }
    assert!(!bank.is_on(5));
    assert!(!bank.is_on(6));
}

#[test]
fn loads_shed_when_surplus_disappears() {
    let profile = SurplusProfile::Steps(vec![
        (Duration::ZERO, 2500.0),
        (Duration::from_secs(16), 0.0),
    ]);
    let (reports, bank) = simulate(profile, 31);
    let last = reports.last().unwrap();
    assert!(last.grid_w.abs() < 20.0, "grid {} W", last.grid_w);
    assert_eq!(last.load_on_ratio, vec![0.0, 0.0]);
    assert!(!bank.is_on(5) && !bank.is_on(6));
    // energy metered while the loads ran is kept
    assert!(last.diverted_wh >= 5, "{} Wh", last.diverted_wh);
}

#[test]
fn disabled_diversion_holds_every_load_off() {
    let (reports, bank) = simulate_with(SurplusProfile::Constant(1500.0), 11, |d| {
        d.background.set_diversion_enabled(false);
    });
    assert!(!reports.is_empty());
    for t in &reports {
        assert!((t.grid_w + 1500.0).abs() < 30.0, "grid {} W", t.grid_w);
        assert_eq!(t.load_on_ratio, vec![0.0, 0.0]);
    }
    assert_eq!(bank.writes(), 2, "only the initial off writes");
}

#[test]
fn override_forces_a_load_on_without_surplus() {
    let (reports, bank) = simulate_with(SurplusProfile::Constant(0.0), 11, |d| {
        assert!(d.background.set_override(1, true));
        assert!(!d.background.set_override(2, true));
    });
    assert!(bank.is_on(6));
    assert!(!bank.is_on(5));
    let last = reports.last().unwrap();
    assert!((last.grid_w - 1000.0).abs() < 30.0, "grid {} W", last.grid_w);
    assert!(last.load_on_ratio[1] > 0.95, "{:?}", last.load_on_ratio);
}

#[test]
fn idle_rotation_hands_priority_to_the_second_load() {
    let cfg = diverter_config::load_toml(CONFIG).unwrap();
    let bank = OutputBank::new();
    // import for 5 s, then a surplus the first load in priority carries fully
    let sim = SimulatedMains::new(
        SimConfig {
            surplus: SurplusProfile::Steps(vec![
                (Duration::ZERO, -800.0),
                (Duration::from_secs(5), 1500.0),
            ]),
            loads: vec![
                SimLoad {
                    pin: 5,
                    rating_w: 1000.0,
                    metered: true,
                },
                SimLoad {
                    pin: 6,
                    rating_w: 1000.0,
                    metered: true,
                },
            ],
            duration: Some(Duration::from_secs(16)),
            ..SimConfig::default()
        },
        bank.clone(),
    );
    // 2.5 s without diversion: exactly one rotation fits in the import phase
    let diverter = BoxedDiverter::builder()
        .with_config(&cfg)
        .with_background(BackgroundConfig {
            rotation: RotationPolicy::Auto,
            rotation_after_cycles: 125,
            ..BackgroundConfig::from(&cfg)
        })
        .with_load_outputs(bank.outputs())
        .build()
        .unwrap();

    let stop = AtomicBool::new(false);
    let mut reports = Vec::new();
    run_lockstep(sim, diverter, &stop, |r| {
        if let Some(t) = &r.telemetry {
            reports.push(t.clone());
        }
    })
    .unwrap();

    let last = reports.last().unwrap();
    assert!(last.grid_w.abs() < 250.0, "grid {} W", last.grid_w);
    // rotated order: the second load carries the base, the first modulates
    assert!(last.load_on_ratio[1] > 0.95, "{:?}", last.load_on_ratio);
    assert!(last.load_on_ratio[0] < 0.8, "{:?}", last.load_on_ratio);
}
