//! Simulated installation: a sine mains supply, a PV surplus profile and the
//! loads wired to an [`OutputBank`], closed through the engine's own outputs.
//!
//! Currents are synthesised in phase with the voltage so that the mean of
//! `v * i` over a cycle equals the configured power in integer energy units:
//! `i_amp = 2 * (P / power_cal) / v_amp`. Grid current is positive while
//! exporting, diverted current is positive while a metered load is on.
//!
//! With the default 400-count voltage amplitude the grid channel saturates
//! around 4.4 kW of net export or import.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use diverter_traits::{ADC_FULL_SCALE, ADC_MID_SCALE, DigitalOutputs, SampleSet, SampleSource};

use crate::error::HwError;

/// Number of addressable lines in a simulated output bank.
pub const BANK_PINS: usize = 64;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared state of simulated output lines. Clones refer to the same bank.
#[derive(Debug, Clone)]
pub struct OutputBank {
    lines: Arc<[AtomicBool; BANK_PINS]>,
    writes: Arc<AtomicU64>,
}

impl Default for OutputBank {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputBank {
    pub fn new() -> Self {
        Self {
            lines: Arc::new([const { AtomicBool::new(false) }; BANK_PINS]),
            writes: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_on(&self, pin: u8) -> bool {
        self.lines
            .get(usize::from(pin))
            .is_some_and(|l| l.load(Ordering::Acquire))
    }

    /// Total number of line writes since creation.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// A `DigitalOutputs` handle writing into this bank.
    pub fn outputs(&self) -> BankOutputs {
        BankOutputs { bank: self.clone() }
    }

    fn set(&self, pin: u8, on: bool) -> Result<(), HwError> {
        let line = self
            .lines
            .get(usize::from(pin))
            .ok_or(HwError::InvalidPin(pin))?;
        line.store(on, Ordering::Release);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Output driver backed by an [`OutputBank`].
#[derive(Debug, Clone)]
pub struct BankOutputs {
    bank: OutputBank,
}

impl DigitalOutputs for BankOutputs {
    fn set_on(&mut self, id: u8) -> Result<(), BoxError> {
        self.bank.set(id, true).map_err(Into::into)
    }
    fn set_off(&mut self, id: u8) -> Result<(), BoxError> {
        self.bank.set(id, false).map_err(Into::into)
    }
}

/// One simulated appliance.
#[derive(Debug, Clone, Copy)]
pub struct SimLoad {
    pub pin: u8,
    pub rating_w: f32,
    /// Seen by the diverted-power CT (dump loads are, relay-driven appliances are not).
    pub metered: bool,
}

/// Surplus (PV generation minus house consumption) over time.
#[derive(Debug, Clone)]
pub enum SurplusProfile {
    Constant(f32),
    /// `(start, watts)` steps; the last step whose start has passed applies.
    Steps(Vec<(Duration, f32)>),
}

impl SurplusProfile {
    pub fn at(&self, t: Duration) -> f32 {
        match self {
            Self::Constant(w) => *w,
            Self::Steps(steps) => steps
                .iter()
                .take_while(|(start, _)| *start <= t)
                .last()
                .map_or(0.0, |(_, w)| *w),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub frequency_hz: f32,
    pub sample_set_period_us: u32,
    pub power_cal_grid: f32,
    pub power_cal_diverted: f32,
    /// Peak of the voltage channel, in converter counts around mid-scale.
    pub voltage_amplitude: f32,
    pub surplus: SurplusProfile,
    pub loads: Vec<SimLoad>,
    /// Stop producing samples after this much simulated time.
    pub duration: Option<Duration>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50.0,
            sample_set_period_us: 312,
            power_cal_grid: 0.0435,
            power_cal_diverted: 0.0435,
            voltage_amplitude: 400.0,
            surplus: SurplusProfile::Constant(0.0),
            loads: Vec::new(),
            duration: None,
        }
    }
}

/// Closed-loop mains simulation implementing [`SampleSource`].
#[derive(Debug)]
pub struct SimulatedMains {
    cfg: SimConfig,
    bank: OutputBank,
    sets: u64,
}

impl SimulatedMains {
    pub fn new(cfg: SimConfig, bank: OutputBank) -> Self {
        Self { cfg, bank, sets: 0 }
    }

    /// Simulated time of the next sample set.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.sets * u64::from(self.cfg.sample_set_period_us))
    }

    pub fn sample_sets(&self) -> u64 {
        self.sets
    }

    /// Net export at `t` given the current output states (negative is import).
    pub fn net_export_w(&self, t: Duration) -> f32 {
        let consumed: f32 = self
            .cfg
            .loads
            .iter()
            .filter(|l| self.bank.is_on(l.pin))
            .map(|l| l.rating_w)
            .sum();
        self.cfg.surplus.at(t) - consumed
    }

    /// Power currently drawn by metered (diverted) loads.
    pub fn diverted_w(&self) -> f32 {
        self.cfg
            .loads
            .iter()
            .filter(|l| l.metered && self.bank.is_on(l.pin))
            .map(|l| l.rating_w)
            .sum()
    }

    fn current_amplitude(&self, watts: f32, power_cal: f32) -> f64 {
        let ieu = f64::from(watts) / f64::from(power_cal);
        2.0 * ieu / f64::from(self.cfg.voltage_amplitude)
    }
}

fn to_raw(counts: f64) -> u16 {
    let raw = (f64::from(ADC_MID_SCALE) + counts).round();
    raw.clamp(0.0, f64::from(ADC_FULL_SCALE)) as u16
}

impl SampleSource for SimulatedMains {
    fn read_set(&mut self) -> Result<Option<SampleSet>, BoxError> {
        let t = self.elapsed();
        if self.cfg.duration.is_some_and(|d| t >= d) {
            return Ok(None);
        }
        let s = (TAU * f64::from(self.cfg.frequency_hz) * t.as_secs_f64()).sin();

        let grid_amp = self.current_amplitude(self.net_export_w(t), self.cfg.power_cal_grid);
        let div_amp = self.current_amplitude(self.diverted_w(), self.cfg.power_cal_diverted);

        self.sets += 1;
        Ok(Some(SampleSet {
            voltage: to_raw(f64::from(self.cfg.voltage_amplitude) * s),
            grid: to_raw(grid_amp * s),
            diverted: to_raw(div_amp * s),
        }))
    }
}

/// Replays a fixed list of sample sets, then reports exhaustion.
#[derive(Debug, Clone)]
pub struct ReplaySource {
    sets: Vec<SampleSet>,
    pos: usize,
}

impl ReplaySource {
    pub fn new(sets: Vec<SampleSet>) -> Self {
        Self { sets, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.sets.len() - self.pos
    }
}

impl SampleSource for ReplaySource {
    fn read_set(&mut self) -> Result<Option<SampleSet>, BoxError> {
        let next = self.sets.get(self.pos).copied();
        if next.is_some() {
            self.pos += 1;
        }
        Ok(next)
    }
}

/// Records every output write as `(id, on)`; clones share the log.
#[derive(Debug, Clone, Default)]
pub struct RecordingOutputs {
    log: Arc<Mutex<Vec<(u8, bool)>>>,
}

impl RecordingOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<(u8, bool)> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Last state written to `id`, if any.
    pub fn last_state(&self, id: u8) -> Option<bool> {
        self.writes()
            .iter()
            .rev()
            .find(|(pin, _)| *pin == id)
            .map(|(_, on)| *on)
    }

    fn push(&self, id: u8, on: bool) -> Result<(), BoxError> {
        let mut log = self
            .log
            .lock()
            .map_err(|_| HwError::Gpio("recording log poisoned".into()))?;
        log.push((id, on));
        Ok(())
    }
}

impl DigitalOutputs for RecordingOutputs {
    fn set_on(&mut self, id: u8) -> Result<(), BoxError> {
        self.push(id, true)
    }
    fn set_off(&mut self, id: u8) -> Result<(), BoxError> {
        self.push(id, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mean_power_ieu(sets: &[SampleSet], pick: impl Fn(&SampleSet) -> u16) -> f64 {
        let sum: f64 = sets
            .iter()
            .map(|s| {
                let v = f64::from(s.voltage) - 512.0;
                let i = f64::from(pick(s)) - 512.0;
                v * i
            })
            .sum();
        sum / sets.len() as f64
    }

    fn one_second(src: &mut SimulatedMains) -> Vec<SampleSet> {
        let n = 1_000_000 / 312;
        (0..n).filter_map(|_| src.read_set().unwrap()).collect()
    }

    #[test]
    fn export_produces_positive_grid_power() {
        let cfg = SimConfig {
            surplus: SurplusProfile::Constant(1500.0),
            ..SimConfig::default()
        };
        let mut src = SimulatedMains::new(cfg, OutputBank::new());
        let sets = one_second(&mut src);
        let watts = mean_power_ieu(&sets, |s| s.grid) * 0.0435;
        assert!((watts - 1500.0).abs() < 60.0, "got {watts} W");
        let diverted = mean_power_ieu(&sets, |s| s.diverted);
        assert!(diverted.abs() < 1.0);
    }

    #[test]
    fn switching_a_load_closes_the_loop() {
        let bank = OutputBank::new();
        let cfg = SimConfig {
            surplus: SurplusProfile::Constant(1500.0),
            loads: vec![SimLoad {
                pin: 5,
                rating_w: 1000.0,
                metered: true,
            }],
            ..SimConfig::default()
        };
        let mut src = SimulatedMains::new(cfg, bank.clone());
        bank.outputs().set_on(5).unwrap();
        assert_eq!(src.net_export_w(Duration::ZERO), 500.0);
        assert_eq!(src.diverted_w(), 1000.0);

        let sets = one_second(&mut src);
        let grid = mean_power_ieu(&sets, |s| s.grid) * 0.0435;
        let diverted = mean_power_ieu(&sets, |s| s.diverted) * 0.0435;
        assert!((grid - 500.0).abs() < 40.0, "grid {grid} W");
        assert!((diverted - 1000.0).abs() < 50.0, "diverted {diverted} W");
    }

    #[test]
    fn unmetered_load_reduces_export_only() {
        let bank = OutputBank::new();
        let cfg = SimConfig {
            surplus: SurplusProfile::Constant(2000.0),
            loads: vec![SimLoad {
                pin: 20,
                rating_w: 800.0,
                metered: false,
            }],
            ..SimConfig::default()
        };
        let src = SimulatedMains::new(cfg, bank.clone());
        bank.outputs().set_on(20).unwrap();
        assert_eq!(src.net_export_w(Duration::ZERO), 1200.0);
        assert_eq!(src.diverted_w(), 0.0);
    }

    #[test]
    fn duration_bounds_the_stream() {
        let cfg = SimConfig {
            duration: Some(Duration::from_millis(20)),
            ..SimConfig::default()
        };
        let mut src = SimulatedMains::new(cfg, OutputBank::new());
        let mut n = 0;
        while src.read_set().unwrap().is_some() {
            n += 1;
        }
        // 20 ms / 312 us, rounded up
        assert_eq!(n, 65);
    }

    #[test]
    fn step_profile_picks_latest_started_step() {
        let p = SurplusProfile::Steps(vec![
            (Duration::ZERO, 100.0),
            (Duration::from_secs(10), 2000.0),
        ]);
        assert_eq!(p.at(Duration::from_secs(3)), 100.0);
        assert_eq!(p.at(Duration::from_secs(10)), 2000.0);
        assert_eq!(p.at(Duration::from_secs(99)), 2000.0);
    }

    #[test]
    fn bank_rejects_out_of_range_pin() {
        let mut out = OutputBank::new().outputs();
        let err = out.set_on(200).unwrap_err();
        assert!(err.to_string().contains("output pin 200"));
    }

    #[test]
    fn replay_source_reports_exhaustion() {
        let mut src = ReplaySource::new(vec![SampleSet::idle(); 2]);
        assert!(src.read_set().unwrap().is_some());
        assert_eq!(src.remaining(), 1);
        assert!(src.read_set().unwrap().is_some());
        assert!(src.read_set().unwrap().is_none());
    }

    #[test]
    fn recording_outputs_keep_order() {
        let rec = RecordingOutputs::new();
        let mut handle = rec.clone();
        handle.set_on(3).unwrap();
        handle.set_off(3).unwrap();
        handle.set_state(4, true).unwrap();
        assert_eq!(rec.writes(), vec![(3, true), (3, false), (4, true)]);
        assert_eq!(rec.last_state(3), Some(false));
        assert_eq!(rec.last_state(9), None);
    }
}
