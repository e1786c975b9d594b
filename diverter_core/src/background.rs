//! The cooperative background context.
//!
//! [`Background::poll`] is called from the slow loop as often as convenient.
//! It drains the datalog mailbox into a [`TelemetryReport`], feeds the relay
//! stage's power average and, once per elapsed second of mains cycles, runs
//! the idle policies and the relay sweep.

use std::sync::Arc;

use diverter_traits::DigitalOutputs;

use crate::MAX_RELAYS;
use crate::config::{BackgroundConfig, RotationPolicy};
use crate::fixed_point::watts_from_sum;
use crate::hw_error::map_hw_error;
use crate::relay::{RelayEngine, RelayTransition};
use crate::shared::{DatalogSnapshot, SharedState};

/// One datalog period, in physical units.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryReport {
    /// Grid power, import positive (W).
    pub grid_w: f32,
    pub diverted_w: f32,
    pub vrms: f32,
    pub bucket_level: i32,
    pub sample_sets: u32,
    pub lowest_sets_per_cycle: u32,
    /// Fraction of the period each physical load spent on.
    pub load_on_ratio: Vec<f32>,
    pub diverted_wh: u32,
    pub relays_on: Vec<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackgroundReport {
    pub telemetry: Option<TelemetryReport>,
    pub relay_transitions: Vec<RelayTransition>,
    /// Whole seconds of mains time handled by this poll.
    pub seconds: u32,
    /// Mains seconds since the background started, after this poll.
    pub elapsed_s: u64,
}

pub struct Background<R: DigitalOutputs> {
    cfg: BackgroundConfig,
    shared: Arc<SharedState>,
    relays: RelayEngine,
    outputs: R,
    last_cycles: u32,
    cycles_into_second: u32,
    seconds: u64,
    written: [Option<bool>; MAX_RELAYS],
    relay_faults: u32,
}

impl<R: DigitalOutputs> core::fmt::Debug for Background<R> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Background")
            .field("seconds", &self.seconds)
            .field("relays", &self.relays.relays())
            .field("relay_faults", &self.relay_faults)
            .finish()
    }
}

impl<R: DigitalOutputs> Background<R> {
    pub fn new(
        cfg: BackgroundConfig,
        shared: Arc<SharedState>,
        relays: RelayEngine,
        outputs: R,
    ) -> Self {
        let last_cycles = shared.cycles();
        Self {
            cfg,
            shared,
            relays,
            outputs,
            last_cycles,
            cycles_into_second: 0,
            seconds: 0,
            written: [None; MAX_RELAYS],
            relay_faults: 0,
        }
    }

    pub fn poll(&mut self) -> BackgroundReport {
        let mut report = BackgroundReport::default();

        if let Some(snap) = self.shared.datalog.take() {
            report.telemetry = self.telemetry_from(&snap);
            match &report.telemetry {
                Some(t) => {
                    self.relays.update_average(t.grid_w.round() as i32);
                    tracing::info!(
                        grid_w = t.grid_w,
                        diverted_w = t.diverted_w,
                        vrms = t.vrms,
                        bucket = t.bucket_level,
                        sets = t.sample_sets,
                        lowest = t.lowest_sets_per_cycle,
                        wh = t.diverted_wh,
                        "datalog"
                    );
                }
                None => tracing::warn!("datalog snapshot without samples skipped"),
            }
        }

        let now = self.shared.cycles();
        let delta = now.wrapping_sub(self.last_cycles);
        self.last_cycles = now;
        self.cycles_into_second = self.cycles_into_second.saturating_add(delta);

        let per_second = self.cfg.frequency_hz.max(1);
        while self.cycles_into_second >= per_second {
            self.cycles_into_second -= per_second;
            self.seconds += 1;
            report.seconds += 1;
            let transitions = self.on_second();
            report.relay_transitions.extend(transitions);
        }
        report.elapsed_s = self.seconds;
        report
    }

    /// Convert a snapshot; `None` when it holds no samples.
    pub fn telemetry_from(&self, snap: &DatalogSnapshot) -> Option<TelemetryReport> {
        let sets = snap.sample_sets;
        let grid_w = -watts_from_sum(snap.sum_p_grid, sets, self.cfg.power_cal_grid)?;
        let diverted_w = watts_from_sum(snap.sum_p_diverted, sets, self.cfg.power_cal_diverted)?;
        let mean_v2 = snap.sum_v_squared as f64 / f64::from(sets);
        let vrms = (f64::from(self.cfg.voltage_cal) * mean_v2.max(0.0).sqrt()) as f32;
        let period = self.cfg.datalog_period_cycles.max(1) as f32;
        let load_on_ratio = snap
            .load_on_cycles
            .iter()
            .take(self.cfg.load_count)
            .map(|&c| (c as f32 / period).min(1.0))
            .collect();
        Some(TelemetryReport {
            grid_w,
            diverted_w,
            vrms,
            bucket_level: snap.bucket_level,
            sample_sets: sets,
            lowest_sets_per_cycle: snap.lowest_sets_per_cycle,
            load_on_ratio,
            diverted_wh: snap.diverted_wh,
            relays_on: self.relays.relays().iter().map(|r| r.is_on()).collect(),
        })
    }

    fn on_second(&mut self) -> Vec<RelayTransition> {
        let absence = self.shared.absence_cycles();

        if absence > self.cfg.display_shutdown_cycles && self.shared.diversion_active() {
            tracing::info!(absence, "no diversion for the shutdown window; resetting energy meter");
            self.shared.request_diverted_reset();
        }

        if self.cfg.rotation == RotationPolicy::Auto
            && absence > self.cfg.rotation_after_cycles
            && !self.shared.rotation_pending()
        {
            tracing::info!(absence, "idle rotation requested");
            self.shared.request_rotation();
        }

        let transitions = self.relays.tick();
        self.write_relay_outputs();
        transitions
    }

    fn write_relay_outputs(&mut self) {
        for (i, relay) in self.relays.relays().iter().enumerate() {
            let on = relay.is_on();
            if self.written[i] == Some(on) {
                continue;
            }
            match self.outputs.set_state(relay.pin(), on) {
                Ok(()) => self.written[i] = Some(on),
                Err(e) => {
                    self.written[i] = None;
                    self.relay_faults = self.relay_faults.saturating_add(1);
                    let err = map_hw_error(e.as_ref());
                    tracing::warn!(pin = relay.pin(), on, error = %err, "relay output write failed");
                }
            }
        }
    }

    /// Rotate load priorities at the next dispatch point.
    pub fn request_rotation(&self) {
        self.shared.request_rotation();
    }

    /// Force physical load `id` on regardless of surplus; `false` for an
    /// unknown id.
    pub fn set_override(&self, id: usize, on: bool) -> bool {
        id < self.cfg.load_count && self.shared.set_override(id, on)
    }

    /// Global enable; while disabled every load is held off.
    pub fn set_diversion_enabled(&self, enabled: bool) {
        self.shared.set_diversion_off(!enabled);
    }

    pub fn relays(&self) -> &RelayEngine {
        &self.relays
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    pub fn relay_faults(&self) -> u32 {
        self.relay_faults
    }

    pub fn outputs(&self) -> &R {
        &self.outputs
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }
}
