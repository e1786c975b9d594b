//! The interrupt-context engine (`DiverterCore`).
//!
//! One call to [`DiverterCore::process_sample_set`] is one sampling tick. The
//! conditioner runs first, then the bucket, then the dispatcher, so a dispatch
//! decision always sees the freshest completed half-cycle. Nothing here blocks,
//! allocates or returns an error: output faults are logged and counted.

use std::sync::Arc;

use diverter_traits::{DigitalOutputs, SampleSet};

use crate::MAX_LOADS;
use crate::bucket::EnergyBucket;
use crate::config::CoreConfig;
use crate::dispatch::{DispatchDecision, LoadDispatcher};
use crate::hw_error::map_hw_error;
use crate::sample::{ConditionerCfg, Crossing, CycleTotals, Polarity, SampleConditioner};
use crate::shared::{DatalogSnapshot, SharedState};

/// What happened during one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub crossing: Option<Crossing>,
    /// A rising crossing closed a mains cycle.
    pub cycle_completed: bool,
    /// Set on the tick that reached the dispatch point.
    pub dispatch: Option<DispatchDecision>,
    pub datalog_published: bool,
}

/// Energy metered through the diverted-current channel.
#[derive(Debug, Clone, Copy, Default)]
struct DivertedMeter {
    recent_ieu: i64,
    wh: u32,
}

pub struct DiverterCore<O: DigitalOutputs> {
    pub(crate) cfg: CoreConfig,
    pub(crate) outputs: O,
    pub(crate) shared: Arc<SharedState>,

    pub(crate) conditioner: SampleConditioner,
    pub(crate) bucket: EnergyBucket,
    pub(crate) dispatcher: LoadDispatcher,

    beyond_startup: bool,
    startup_cycles_seen: u32,
    datalog_cycles: u32,
    cycles_completed: u64,

    load_on_cycles: [u32; MAX_LOADS],
    written: [Option<bool>; MAX_LOADS],

    meter: DivertedMeter,
    diversion_active: bool,
    absence_cycles: u32,
}

impl<O: DigitalOutputs> core::fmt::Debug for DiverterCore<O> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DiverterCore")
            .field("beyond_startup", &self.beyond_startup)
            .field("bucket_level", &self.bucket.level())
            .field("capacity", &self.bucket.capacity())
            .field("loads", &self.dispatcher.slots())
            .field("diverted_wh", &self.meter.wh)
            .finish()
    }
}

impl<O: DigitalOutputs> DiverterCore<O> {
    /// Unvalidated constructor; go through `builder` for checked construction.
    pub(crate) fn new(cfg: CoreConfig, outputs: O, shared: Arc<SharedState>) -> Self {
        let conditioner = SampleConditioner::new(ConditionerCfg {
            persistence: cfg.persistence,
            lpf_alpha_q16: cfg.lpf_alpha_q16,
            lpf_gain_q8: cfg.lpf_gain_q8,
        });
        let bucket = EnergyBucket::new(cfg.capacity_ieu, cfg.required_export_ieu);
        let dispatcher = LoadDispatcher::new(
            cfg.load_pins.len(),
            cfg.capacity_ieu,
            cfg.post_transition_cycles,
        );
        Self {
            beyond_startup: cfg.startup_cycles == 0,
            cfg,
            outputs,
            shared,
            conditioner,
            bucket,
            dispatcher,
            startup_cycles_seen: 0,
            datalog_cycles: 0,
            cycles_completed: 0,
            load_on_cycles: [0; MAX_LOADS],
            written: [None; MAX_LOADS],
            meter: DivertedMeter::default(),
            diversion_active: false,
            absence_cycles: 0,
        }
    }

    /// Process one raw sample set.
    pub fn process_sample_set(&mut self, set: SampleSet) -> TickReport {
        let mut report = TickReport {
            crossing: self.conditioner.process_voltage(set.voltage),
            ..TickReport::default()
        };

        match report.crossing {
            Some(Crossing::Rising) => {
                report.cycle_completed = true;
                report.datalog_published = self.on_rising_crossing();
            }
            Some(Crossing::Falling) if self.beyond_startup => {
                let (sum, count) = self.conditioner.cycle_grid_sum();
                self.bucket.predict(sum, count);
            }
            _ => {}
        }

        if self.beyond_startup
            && self.conditioner.confirmed_polarity() == Polarity::Negative
            && self.conditioner.sets_in_negative_half() == self.cfg.arming_index
        {
            report.dispatch = Some(self.on_dispatch_point());
        }

        let meter_diverted = !self.shared.is_overridden(0);
        self.conditioner.accumulate(set, meter_diverted);
        tracing::trace!(
            v = set.voltage,
            grid = set.grid,
            diverted = set.diverted,
            "sample set"
        );
        report
    }

    /// Returns whether a datalog snapshot was published.
    fn on_rising_crossing(&mut self) -> bool {
        self.cycles_completed = self.cycles_completed.wrapping_add(1);
        self.shared.tick_cycle();

        if self.shared.take_reset_diverted_request() {
            self.meter = DivertedMeter::default();
            self.diversion_active = false;
            self.shared.publish_diverted_wh(0);
            self.shared.publish_detector(false, self.absence_cycles);
            tracing::debug!("diverted energy meter reset");
        }

        if !self.beyond_startup {
            self.startup_cycles_seen = self.startup_cycles_seen.saturating_add(1);
            if self.startup_cycles_seen >= self.cfg.startup_cycles {
                self.beyond_startup = true;
                self.conditioner.reset_after_startup();
                tracing::info!(
                    cycles = self.startup_cycles_seen,
                    dc_offset = self.conditioner.dc_offset(),
                    "start-up settling complete"
                );
            }
            return false;
        }

        let totals = self.conditioner.take_cycle();
        self.bucket.commit_sum(totals.sum_p_grid, totals.sample_sets);
        if self.diversion_active {
            self.meter_diverted_energy(&totals);
        }
        self.shared.publish_diverted_wh(self.meter.wh);

        self.datalog_cycles = self.datalog_cycles.saturating_add(1);
        if self.datalog_cycles >= self.cfg.datalog_period_cycles {
            self.datalog_cycles = 0;
            return self.publish_datalog();
        }
        false
    }

    fn meter_diverted_energy(&mut self, totals: &CycleTotals) {
        let Some(mut avg) = totals.average_diverted() else {
            return;
        };
        if avg < i64::from(self.cfg.anti_creep_ieu) {
            avg = 0;
        }
        self.meter.recent_ieu += avg;
        if self.meter.recent_ieu > self.cfg.ieu_per_wh {
            self.meter.recent_ieu -= self.cfg.ieu_per_wh;
            if !self.shared.is_overridden(0) {
                self.meter.wh = self.meter.wh.saturating_add(1);
            }
        }
    }

    fn publish_datalog(&mut self) -> bool {
        let period = self.conditioner.take_period();
        let snap = DatalogSnapshot {
            sum_p_grid: period.sum_p_grid,
            sum_p_diverted: period.sum_p_diverted,
            sum_v_squared: period.sum_v_squared,
            sample_sets: period.sample_sets,
            lowest_sets_per_cycle: period.lowest_sets_per_cycle,
            bucket_level: self.bucket.level(),
            load_on_cycles: self.load_on_cycles,
            diverted_wh: self.meter.wh,
        };
        self.load_on_cycles = [0; MAX_LOADS];
        let published = self.shared.datalog.publish(&snap);
        if !published {
            tracing::warn!(
                overruns = self.shared.datalog.overruns(),
                "datalog snapshot dropped: previous one not yet consumed"
            );
        }
        published
    }

    fn on_dispatch_point(&mut self) -> DispatchDecision {
        let decision = self.dispatcher.dispatch(self.bucket.prediction());

        if self.shared.take_rotation_request() {
            self.dispatcher.rotate();
            self.absence_cycles = 0;
        }

        let overrides = self.shared.overrides();
        let diversion_off = self.shared.diversion_off();
        self.dispatcher.apply_physical(&overrides, diversion_off);
        self.write_load_outputs();

        for (count, &on) in self.load_on_cycles.iter_mut().zip(self.dispatcher.physical()) {
            if on {
                *count = count.saturating_add(1);
            }
        }

        if self.dispatcher.slots().first().is_some_and(|s| s.on) {
            self.absence_cycles = 0;
            self.diversion_active = true;
        } else {
            self.absence_cycles = self.absence_cycles.saturating_add(1);
        }
        self.shared
            .publish_detector(self.diversion_active, self.absence_cycles);

        decision
    }

    /// Write changed load states. A failed write is retried next cycle.
    fn write_load_outputs(&mut self) {
        let mut faults = 0u32;
        for (id, &on) in self.dispatcher.physical().iter().enumerate() {
            if self.written[id] == Some(on) {
                continue;
            }
            let Some(&pin) = self.cfg.load_pins.get(id) else {
                continue;
            };
            match self.outputs.set_state(pin, on) {
                Ok(()) => self.written[id] = Some(on),
                Err(e) => {
                    self.written[id] = None;
                    faults += 1;
                    let err = map_hw_error(e.as_ref());
                    tracing::warn!(pin, on, error = %err, "load output write failed");
                }
            }
        }
        if faults > 0 {
            self.shared.add_output_faults(faults);
        }
    }

    // ── accessors ────────────────────────────────────────────────────────────

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn bucket(&self) -> &EnergyBucket {
        &self.bucket
    }

    pub fn dispatcher(&self) -> &LoadDispatcher {
        &self.dispatcher
    }

    pub fn conditioner(&self) -> &SampleConditioner {
        &self.conditioner
    }

    pub fn outputs(&self) -> &O {
        &self.outputs
    }

    pub fn beyond_startup(&self) -> bool {
        self.beyond_startup
    }

    /// Rising crossings seen since construction, start-up included.
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed
    }

    pub fn diverted_wh(&self) -> u32 {
        self.meter.wh
    }

    pub fn diversion_active(&self) -> bool {
        self.diversion_active
    }

    pub fn absence_cycles(&self) -> u32 {
        self.absence_cycles
    }
}
