//! Runtime configuration for the engine.
//!
//! These are the structs the engine runs on, with calibration already folded
//! into integer constants. They are separate from the TOML schema in
//! `diverter_config`; see `conversions` for the mapping.

use crate::fixed_point::{capacity_ieu, ieu_from_watts, ieu_per_wh, q16_from_f32};

/// Sampling-context configuration.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Nominal mains frequency (Hz).
    pub frequency_hz: u32,
    /// Time between sample sets; used for pacing and diagnostics only.
    pub sample_set_period_us: u32,
    /// Energy bucket capacity (IEU).
    pub capacity_ieu: i32,
    /// Subtracted from each cycle's average grid power (IEU).
    pub required_export_ieu: i32,
    /// Per-cycle diverted energy below this is ignored (IEU).
    pub anti_creep_ieu: i32,
    /// Diverted-energy accumulator content per watt-hour.
    pub ieu_per_wh: i64,
    /// CT compensation smoothing factor, Q16.
    pub lpf_alpha_q16: i32,
    /// CT compensation gain, Q8 (0 disables).
    pub lpf_gain_q8: i32,
    /// Extra opposite-sign samples before a crossing is confirmed.
    pub persistence: u8,
    /// Negative-half sample index at which loads are switched.
    pub arming_index: u32,
    /// Rising crossings to wait before the engine starts deciding.
    pub startup_cycles: u32,
    /// Mains cycles per datalog period.
    pub datalog_period_cycles: u32,
    /// Lockout length after a load toggles, in cycles.
    pub post_transition_cycles: u8,
    /// Output id of each physical load, in startup priority order.
    pub load_pins: Vec<u8>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50,
            sample_set_period_us: 312,
            capacity_ieu: capacity_ieu(360.0, 50, 0.0435),
            required_export_ieu: 0,
            anti_creep_ieu: ieu_from_watts(5.0, 0.0435),
            ieu_per_wh: ieu_per_wh(50, 0.0435),
            lpf_alpha_q16: q16_from_f32(0.002),
            lpf_gain_q8: 0,
            persistence: 1,
            arming_index: 3,
            startup_cycles: 150,
            datalog_period_cycles: 250,
            post_transition_cycles: 3,
            load_pins: vec![5],
        }
    }
}

/// One relay as configured, durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaySpec {
    pub pin: u8,
    pub surplus_w: i32,
    pub import_w: i32,
    pub min_on_s: u32,
    pub min_off_s: u32,
}

/// Relay stage configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Requested averaging window (minutes); rounded to a power of two of ticks.
    pub window_minutes: u32,
    /// Seconds between average updates (the datalog period).
    pub tick_s: u32,
    /// Relays in priority order.
    pub relays: Vec<RelaySpec>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            tick_s: 5,
            relays: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationPolicy {
    #[default]
    Off,
    /// Rotate once per `rotation_after_cycles` without diversion.
    Auto,
    /// Rotate only on explicit request.
    OnRequest,
}

/// Background-context configuration.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    pub frequency_hz: u32,
    /// Watts per IEU, grid CT.
    pub power_cal_grid: f32,
    /// Watts per IEU, diverted CT.
    pub power_cal_diverted: f32,
    /// Volts per count.
    pub voltage_cal: f32,
    pub rotation: RotationPolicy,
    pub rotation_after_cycles: u32,
    pub display_shutdown_cycles: u32,
    /// Mains cycles per datalog period, for the per-load on-ratio.
    pub datalog_period_cycles: u32,
    pub load_count: usize,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            frequency_hz: 50,
            power_cal_grid: 0.0435,
            power_cal_diverted: 0.0435,
            voltage_cal: 0.8151,
            rotation: RotationPolicy::Off,
            rotation_after_cycles: 8 * 3600 * 50,
            display_shutdown_cycles: 8 * 3600 * 50,
            datalog_period_cycles: 250,
            load_count: 1,
        }
    }
}
