//! Command execution: config loading, source/output assembly and report printing.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use diverter_config::Config;
use diverter_core::mocks::NullOutputs;
use diverter_core::{BackgroundReport, RunSummary, build_diverter, run_lockstep, run_threaded};
use diverter_hardware::sim::{OutputBank, ReplaySource, SimConfig, SimLoad, SimulatedMains, SurplusProfile};
use diverter_traits::{MonotonicClock, SampleSet};
use eyre::{Result, WrapErr};
use serde_json::json;

use crate::cli::Commands;
use crate::error_fmt::{INVALID_CONFIG, INVALID_TRACE};

/// Load rating assumed by the simulation when the config gives none.
const DEFAULT_RATING_W: f32 = 1000.0;
/// Background poll interval of the threaded runner.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn load_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config file {}", path.display()))
        .wrap_err(INVALID_CONFIG)?;
    let cfg = diverter_config::load_toml(&text).wrap_err(INVALID_CONFIG)?;
    cfg.validate().wrap_err(INVALID_CONFIG)?;
    Ok(cfg)
}

pub fn execute(cmd: &Commands, cfg: &Config, json: bool, stop: &AtomicBool) -> Result<()> {
    let printer = Printer { json };
    match cmd {
        Commands::Simulate {
            seconds,
            surplus_w,
            steps,
            realtime,
        } => {
            let surplus = if steps.is_empty() {
                SurplusProfile::Constant(*surplus_w)
            } else {
                SurplusProfile::Steps(parse_steps(steps)?)
            };
            let summary = simulate(cfg, surplus, *seconds, *realtime, stop, |r| printer.report(r))?;
            printer.summary(&summary);
        }
        Commands::Replay { trace, repeat } => {
            let summary = replay(cfg, trace, *repeat, stop, |r| printer.report(r))?;
            printer.summary(&summary);
        }
        Commands::Run => {
            let summary = run_hardware(cfg, stop, |r| printer.report(r))?;
            printer.summary(&summary);
        }
        Commands::SelfCheck => self_check(cfg, &printer)?,
    }
    Ok(())
}

/// Parse `SECONDS:WATTS` profile steps, sorted by start time.
pub fn parse_steps(raw: &[String]) -> Result<Vec<(Duration, f32)>> {
    let mut steps = raw
        .iter()
        .map(|s| {
            let (t, w) = s
                .split_once(':')
                .ok_or_else(|| eyre::eyre!("invalid --step {s:?}: expected SECONDS:WATTS"))?;
            let t: f64 = t
                .trim()
                .parse()
                .wrap_err_with(|| format!("invalid --step {s:?}: bad seconds"))?;
            let w: f32 = w
                .trim()
                .parse()
                .wrap_err_with(|| format!("invalid --step {s:?}: bad watts"))?;
            if !(t.is_finite() && t >= 0.0) {
                eyre::bail!("invalid --step {s:?}: seconds must be >= 0");
            }
            Ok((Duration::from_secs_f64(t), w))
        })
        .collect::<Result<Vec<_>>>()?;
    steps.sort_by_key(|(t, _)| *t);
    Ok(steps)
}

/// Simulated installation matching the configured loads and relays. Loads are
/// metered on the diverted channel, relays are not.
pub fn sim_config(cfg: &Config, surplus: SurplusProfile, seconds: u64) -> SimConfig {
    let mut loads: Vec<SimLoad> = cfg
        .loads
        .iter()
        .map(|l| SimLoad {
            pin: l.pin,
            rating_w: l.rating_w.unwrap_or(DEFAULT_RATING_W),
            metered: true,
        })
        .collect();
    loads.extend(cfg.relays.outputs.iter().map(|r| SimLoad {
        pin: r.pin,
        rating_w: r.rating_w.unwrap_or(DEFAULT_RATING_W),
        metered: false,
    }));
    SimConfig {
        frequency_hz: cfg.supply.frequency_hz as f32,
        sample_set_period_us: cfg.sampling.sample_set_period_us,
        power_cal_grid: cfg.calibration.power_cal_grid,
        power_cal_diverted: cfg.calibration.power_cal_diverted,
        surplus,
        loads,
        duration: Some(Duration::from_secs(seconds)),
        ..SimConfig::default()
    }
}

fn simulate(
    cfg: &Config,
    surplus: SurplusProfile,
    seconds: u64,
    realtime: bool,
    stop: &AtomicBool,
    on_report: impl FnMut(&BackgroundReport),
) -> Result<RunSummary> {
    let bank = OutputBank::new();
    let sim = SimulatedMains::new(sim_config(cfg, surplus, seconds), bank.clone());
    let diverter = build_diverter(cfg, bank.outputs(), bank.outputs())?;
    tracing::info!(seconds, realtime, loads = cfg.loads.len(), "simulation start");
    if realtime {
        let period = Duration::from_micros(u64::from(cfg.sampling.sample_set_period_us));
        run_threaded(
            sim,
            diverter,
            Some(period),
            MonotonicClock::new(),
            POLL_INTERVAL,
            stop,
            on_report,
        )
    } else {
        run_lockstep(sim, diverter, stop, on_report)
    }
}

fn replay(
    cfg: &Config,
    trace: &Path,
    repeat: u32,
    stop: &AtomicBool,
    on_report: impl FnMut(&BackgroundReport),
) -> Result<RunSummary> {
    let rows = diverter_config::load_trace_csv(trace).wrap_err(INVALID_TRACE)?;
    let sets: Vec<SampleSet> = rows
        .iter()
        .map(|r| SampleSet::new(r.voltage, r.grid, r.diverted))
        .collect();
    let total = sets.len() * repeat.max(1) as usize;
    let sets: Vec<SampleSet> = sets.into_iter().cycle().take(total).collect();
    tracing::info!(path = %trace.display(), sets = total, "replay start");
    let diverter = build_diverter(cfg, NullOutputs, NullOutputs)?;
    run_lockstep(ReplaySource::new(sets), diverter, stop, on_report)
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn hardware_parts(
    cfg: &Config,
) -> Result<(
    diverter_hardware::rpi::Mcp3008Source,
    diverter_hardware::rpi::GpioOutputs,
    diverter_hardware::rpi::GpioOutputs,
)> {
    use diverter_core::hw_error::map_hw_error;
    use diverter_hardware::rpi::{GpioOutputs, Mcp3008Source};

    let hw = &cfg.hardware;
    let load_pins: Vec<u8> = cfg.loads.iter().map(|l| l.pin).collect();
    let relay_pins: Vec<u8> = cfg.relays.outputs.iter().map(|r| r.pin).collect();
    let loads = GpioOutputs::new(&load_pins, hw.outputs_active_low)
        .map_err(|e| eyre::Report::new(map_hw_error(&e)))?;
    let relays = GpioOutputs::new(&relay_pins, hw.outputs_active_low)
        .map_err(|e| eyre::Report::new(map_hw_error(&e)))?;
    let source = Mcp3008Source::new(
        hw.spi_clock_hz,
        [hw.voltage_channel, hw.grid_channel, hw.diverted_channel],
    )
    .map_err(|e| eyre::Report::new(map_hw_error(&e)))?;
    Ok((source, loads, relays))
}

#[cfg(all(feature = "hardware", target_os = "linux"))]
fn run_hardware(
    cfg: &Config,
    stop: &AtomicBool,
    on_report: impl FnMut(&BackgroundReport),
) -> Result<RunSummary> {
    let (source, loads, relays) = hardware_parts(cfg)?;
    let diverter = build_diverter(cfg, loads, relays)?;
    let period = Duration::from_micros(u64::from(cfg.sampling.sample_set_period_us));
    run_threaded(
        source,
        diverter,
        Some(period),
        MonotonicClock::new(),
        POLL_INTERVAL,
        stop,
        on_report,
    )
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn run_hardware(
    _cfg: &Config,
    _stop: &AtomicBool,
    _on_report: impl FnMut(&BackgroundReport),
) -> Result<RunSummary> {
    eyre::bail!("{}; use `simulate` or `replay`", crate::error_fmt::NO_HARDWARE)
}

/// Config valid, engine builds, and either the hardware opens or a short
/// closed-loop simulation diverts without faults.
fn self_check(cfg: &Config, printer: &Printer) -> Result<()> {
    build_diverter(cfg, NullOutputs, NullOutputs).wrap_err("engine build")?;

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    let probe = {
        hardware_parts(cfg)?;
        "hardware"
    };

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    let probe = {
        let surplus = cfg
            .loads
            .first()
            .and_then(|l| l.rating_w)
            .unwrap_or(DEFAULT_RATING_W)
            / 2.0;
        let startup_s = u64::from(cfg.sampling.startup_ms).div_ceil(1000);
        let seconds = startup_s + u64::from(cfg.datalog.period_s) + 1;
        let stop = AtomicBool::new(false);
        let summary = simulate(cfg, SurplusProfile::Constant(surplus), seconds, false, &stop, |_| {})?;
        if summary.output_faults > 0 || summary.datalog_reports == 0 {
            eyre::bail!(
                "simulated self-check failed: {} output faults, {} reports",
                summary.output_faults,
                summary.datalog_reports
            );
        }
        "simulation"
    };

    if printer.json {
        println!(
            "{}",
            json!({
                "type": "self_check",
                "ok": true,
                "probe": probe,
                "loads": cfg.loads.len(),
                "relays": cfg.relays.outputs.len(),
            })
        );
    } else {
        println!(
            "OK: config valid, {} load(s), {} relay(s), {probe} check passed",
            cfg.loads.len(),
            cfg.relays.outputs.len()
        );
    }
    Ok(())
}

/// Writes reports to stdout as text or JSON lines.
#[derive(Debug, Clone, Copy)]
pub struct Printer {
    pub json: bool,
}

impl Printer {
    pub fn report(&self, report: &BackgroundReport) {
        if let Some(t) = &report.telemetry {
            if self.json {
                println!(
                    "{}",
                    json!({
                        "type": "datalog",
                        "t_s": report.elapsed_s,
                        "grid_w": t.grid_w,
                        "diverted_w": t.diverted_w,
                        "vrms": t.vrms,
                        "bucket_level": t.bucket_level,
                        "sample_sets": t.sample_sets,
                        "lowest_sets_per_cycle": t.lowest_sets_per_cycle,
                        "load_on_ratio": t.load_on_ratio,
                        "diverted_wh": t.diverted_wh,
                        "relays_on": t.relays_on,
                    })
                );
            } else {
                let ratios: Vec<String> = t
                    .load_on_ratio
                    .iter()
                    .map(|r| format!("{:.0}%", r * 100.0))
                    .collect();
                println!(
                    "t={:>5}s grid={:>7.0}W diverted={:>6.0}W vrms={:>5.1}V bucket={:>6} loads=[{}] wh={}",
                    report.elapsed_s,
                    t.grid_w,
                    t.diverted_w,
                    t.vrms,
                    t.bucket_level,
                    ratios.join(" "),
                    t.diverted_wh
                );
            }
        }
        for tr in &report.relay_transitions {
            if self.json {
                println!(
                    "{}",
                    json!({
                        "type": "relay",
                        "t_s": report.elapsed_s,
                        "index": tr.index,
                        "pin": tr.pin,
                        "on": tr.on,
                    })
                );
            } else {
                println!(
                    "t={:>5}s relay {} (pin {}) {}",
                    report.elapsed_s,
                    tr.index,
                    tr.pin,
                    if tr.on { "ON" } else { "OFF" }
                );
            }
        }
    }

    pub fn summary(&self, s: &RunSummary) {
        if self.json {
            println!(
                "{}",
                json!({
                    "type": "summary",
                    "sample_sets": s.sample_sets,
                    "cycles": s.cycles,
                    "seconds": s.seconds,
                    "datalog_reports": s.datalog_reports,
                    "relay_transitions": s.relay_transitions,
                    "diverted_wh": s.diverted_wh,
                    "output_faults": s.output_faults,
                    "relay_faults": s.relay_faults,
                    "read_errors": s.read_errors,
                    "datalog_overruns": s.datalog_overruns,
                })
            );
        } else {
            println!(
                "done: {} sample sets, {} cycles, {} s, {} reports, {} relay switches, {} Wh diverted",
                s.sample_sets,
                s.cycles,
                s.seconds,
                s.datalog_reports,
                s.relay_transitions,
                s.diverted_wh
            );
            if s.output_faults + s.relay_faults + s.read_errors + s.datalog_overruns > 0 {
                println!(
                    "faults: {} output, {} relay, {} read, {} datalog overruns",
                    s.output_faults, s.relay_faults, s.read_errors, s.datalog_overruns
                );
            }
        }
    }
}
