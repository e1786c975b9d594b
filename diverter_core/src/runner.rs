//! Drive both contexts to completion.
//!
//! - [`run_lockstep`]: one thread, deterministic; the background is polled
//!   after every completed mains cycle. Used for simulation and replay.
//! - [`run_threaded`]: the sampling context runs in a [`Sampler`] thread, the
//!   background loop in the caller's thread.
//!
//! Both stop when the source is exhausted or `stop` is raised.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use diverter_traits::clock::Clock;
use diverter_traits::{DigitalOutputs, SampleSource};

use crate::background::{Background, BackgroundReport};
use crate::builder::Diverter;
use crate::core::DiverterCore;
use crate::error::{DiverterError, Result};
use crate::hw_error::map_hw_error;
use crate::sampler::Sampler;

/// End-of-run totals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub sample_sets: u64,
    pub cycles: u64,
    pub seconds: u64,
    pub datalog_reports: u64,
    pub relay_transitions: u64,
    pub diverted_wh: u32,
    pub output_faults: u32,
    pub relay_faults: u32,
    pub read_errors: u32,
    pub datalog_overruns: u32,
}

fn tally(summary: &mut RunSummary, report: &BackgroundReport) {
    summary.datalog_reports += u64::from(report.telemetry.is_some());
    summary.relay_transitions += report.relay_transitions.len() as u64;
}

fn finish<O: DigitalOutputs, R: DigitalOutputs>(
    mut summary: RunSummary,
    core: &DiverterCore<O>,
    background: &Background<R>,
) -> RunSummary {
    let shared = core.shared();
    summary.cycles = core.cycles_completed();
    summary.seconds = background.seconds();
    summary.diverted_wh = core.diverted_wh();
    summary.output_faults = shared.output_faults();
    summary.relay_faults = background.relay_faults();
    summary.datalog_overruns = shared.datalog.overruns();
    tracing::info!(
        sets = summary.sample_sets,
        cycles = summary.cycles,
        reports = summary.datalog_reports,
        wh = summary.diverted_wh,
        "run finished"
    );
    summary
}

/// Single-threaded run. A source read error ends the run with an error.
pub fn run_lockstep<S, O, R>(
    mut source: S,
    diverter: Diverter<O, R>,
    stop: &AtomicBool,
    mut on_report: impl FnMut(&BackgroundReport),
) -> Result<RunSummary>
where
    S: SampleSource,
    O: DigitalOutputs,
    R: DigitalOutputs,
{
    let (mut core, mut background) = diverter.into_parts();
    let mut summary = RunSummary::default();
    tracing::info!(mode = "lockstep", "run start");

    while !stop.load(Ordering::Relaxed) {
        let set = match source.read_set() {
            Ok(Some(set)) => set,
            Ok(None) => break,
            Err(e) => return Err(eyre::Report::new(map_hw_error(e.as_ref()))),
        };
        summary.sample_sets += 1;
        if core.process_sample_set(set).cycle_completed {
            let report = background.poll();
            tally(&mut summary, &report);
            on_report(&report);
        }
    }

    let report = background.poll();
    tally(&mut summary, &report);
    on_report(&report);
    Ok(finish(summary, &core, &background))
}

/// Two-context run: sampling thread plus background polling every
/// `poll_interval`. `pacing` holds the sampling thread to a fixed sample-set
/// period on `clock`; `None` lets the source set the pace.
pub fn run_threaded<S, O, R, C>(
    source: S,
    diverter: Diverter<O, R>,
    pacing: Option<Duration>,
    clock: C,
    poll_interval: Duration,
    stop: &AtomicBool,
    mut on_report: impl FnMut(&BackgroundReport),
) -> Result<RunSummary>
where
    S: SampleSource + Send + 'static,
    O: DigitalOutputs + Send + 'static,
    R: DigitalOutputs,
    C: Clock + Clone + Send + Sync + 'static,
{
    let (core, mut background) = diverter.into_parts();
    let mut summary = RunSummary::default();
    tracing::info!(mode = "threaded", paced = pacing.is_some(), "run start");

    let sampler = match pacing {
        Some(period) => Sampler::spawn_paced(source, core, period, clock.clone()),
        None => Sampler::spawn(source, core),
    };
    let stats = sampler.stats().clone();

    while !stop.load(Ordering::Relaxed) && !sampler.is_finished() {
        let report = background.poll();
        tally(&mut summary, &report);
        on_report(&report);
        clock.sleep(poll_interval);
    }

    let core = sampler
        .stop()
        .ok_or_else(|| eyre::Report::new(DiverterError::State("sampling thread panicked".into())))?;
    let report = background.poll();
    tally(&mut summary, &report);
    on_report(&report);

    summary.sample_sets = stats.sample_sets();
    summary.read_errors = stats.read_errors();
    Ok(finish(summary, &core, &background))
}
