//! `From` implementations bridging `diverter_config` types to `diverter_core` types.
//!
//! Floating-point calibration is turned into integer engine constants here,
//! once, so nothing downstream of the sampler sees a float.

use crate::config::{BackgroundConfig, CoreConfig, RelayConfig, RelaySpec, RotationPolicy};
use crate::fixed_point::{capacity_ieu, ieu_from_watts, ieu_per_wh, q8_from_f32, q16_from_f32};
use crate::util::{cycles_from_hours, cycles_from_ms};

// ── CoreConfig ───────────────────────────────────────────────────────────────

impl From<&diverter_config::Config> for CoreConfig {
    fn from(c: &diverter_config::Config) -> Self {
        let f = c.supply.frequency_hz;
        let cal = &c.calibration;
        Self {
            frequency_hz: f,
            sample_set_period_us: c.sampling.sample_set_period_us,
            capacity_ieu: capacity_ieu(c.supply.working_zone_joules, f, cal.power_cal_grid),
            required_export_ieu: ieu_from_watts(c.supply.required_export_w as f32, cal.power_cal_grid),
            anti_creep_ieu: ieu_from_watts(c.supply.anti_creep_joules, cal.power_cal_grid),
            ieu_per_wh: ieu_per_wh(f, cal.power_cal_diverted),
            lpf_alpha_q16: q16_from_f32(cal.lpf_alpha),
            lpf_gain_q8: q8_from_f32(cal.lpf_gain),
            persistence: c.sampling.persistence,
            arming_index: u32::from(c.sampling.arming_sample_index),
            startup_cycles: cycles_from_ms(c.sampling.startup_ms, f),
            datalog_period_cycles: c.datalog.period_s.saturating_mul(f),
            post_transition_cycles: c.dispatch.post_transition_cycles,
            load_pins: c.loads.iter().map(|l| l.pin).collect(),
        }
    }
}

// ── RelayConfig ──────────────────────────────────────────────────────────────

impl From<&diverter_config::RelayOutputCfg> for RelaySpec {
    fn from(r: &diverter_config::RelayOutputCfg) -> Self {
        Self {
            pin: r.pin,
            surplus_w: r.surplus_w,
            import_w: r.import_w,
            min_on_s: u32::from(r.min_on_minutes) * 60,
            min_off_s: u32::from(r.min_off_minutes) * 60,
        }
    }
}

impl From<&diverter_config::Config> for RelayConfig {
    fn from(c: &diverter_config::Config) -> Self {
        Self {
            window_minutes: c.relays.window_minutes,
            tick_s: c.datalog.period_s,
            relays: c.relays.outputs.iter().map(RelaySpec::from).collect(),
        }
    }
}

// ── BackgroundConfig ─────────────────────────────────────────────────────────

impl From<diverter_config::RotationMode> for RotationPolicy {
    fn from(m: diverter_config::RotationMode) -> Self {
        match m {
            diverter_config::RotationMode::Off => Self::Off,
            diverter_config::RotationMode::Auto => Self::Auto,
            diverter_config::RotationMode::Pin => Self::OnRequest,
        }
    }
}

impl From<&diverter_config::Config> for BackgroundConfig {
    fn from(c: &diverter_config::Config) -> Self {
        let f = c.supply.frequency_hz;
        Self {
            frequency_hz: f,
            power_cal_grid: c.calibration.power_cal_grid,
            power_cal_diverted: c.calibration.power_cal_diverted,
            voltage_cal: c.calibration.voltage_cal,
            rotation: c.dispatch.rotation.into(),
            rotation_after_cycles: cycles_from_hours(c.dispatch.rotation_after_hours, f),
            display_shutdown_cycles: cycles_from_hours(c.dispatch.display_shutdown_hours, f),
            datalog_period_cycles: c.datalog.period_s.saturating_mul(f),
            load_count: c.loads.len(),
        }
    }
}
