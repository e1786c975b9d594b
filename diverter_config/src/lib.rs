#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema and recorded-trace parsing for the surplus diverter.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - The trace CSV loader enforces headers and the 10-bit converter range so a
//!   replay can be fed straight into the sampling engine.
use serde::Deserialize;

/// Upper bound on dump loads the engine's fixed arrays can hold.
pub const MAX_LOADS: usize = 8;
/// Upper bound on relay outputs.
pub const MAX_RELAYS: usize = 8;

/// Largest raw value a 10-bit converter produces.
const ADC_MAX: u16 = 1023;

/// Recorded sample trace schema.
///
/// Expected headers:
/// voltage,grid,diverted
///
/// Example:
/// voltage,grid,diverted
/// 512,512,512
/// 731,498,530
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TraceRow {
    pub voltage: u16,
    pub grid: u16,
    pub diverted: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Supply {
    /// Nominal mains frequency.
    pub frequency_hz: u32,
    /// Size of the energy bucket ("no cost" exchange zone with the meter).
    pub working_zone_joules: f32,
    /// Net power to keep flowing to the grid; negative forces a small import.
    pub required_export_w: i32,
    /// Per-cycle diverted energy below this is treated as meter creep.
    pub anti_creep_joules: f32,
}

impl Default for Supply {
    fn default() -> Self {
        Self {
            frequency_hz: 50,
            working_zone_joules: 360.0,
            required_export_w: 0,
            anti_creep_joules: 5.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Joules per integer energy unit, grid CT.
    pub power_cal_grid: f32,
    /// Joules per integer energy unit, diverted CT.
    pub power_cal_diverted: f32,
    /// Volts per voltage-channel count.
    pub voltage_cal: f32,
    /// CT phase compensation gain (0 disables the filter).
    pub lpf_gain: f32,
    /// CT phase compensation smoothing factor.
    pub lpf_alpha: f32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            power_cal_grid: 0.0435,
            power_cal_diverted: 0.0435,
            voltage_cal: 0.8151,
            lpf_gain: 0.0,
            lpf_alpha: 0.002,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Sampling {
    /// Time between two complete sample sets (all three channels).
    pub sample_set_period_us: u32,
    /// Consecutive opposite-sign samples required to confirm a zero crossing.
    pub persistence: u8,
    /// Sample index after the falling crossing at which loads are switched.
    pub arming_sample_index: u8,
    /// Settling time for the DC-offset filter after reset.
    pub startup_ms: u32,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            sample_set_period_us: 312,
            persistence: 1,
            arming_sample_index: 3,
            startup_ms: 3000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Datalog {
    pub period_s: u32,
}

impl Default for Datalog {
    fn default() -> Self {
        Self { period_s: 5 }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RotationMode {
    /// Fixed priority order.
    #[default]
    Off,
    /// Rotate once after a long period without diversion.
    Auto,
    /// Rotate on external request (push button or CLI).
    Pin,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Dispatch {
    /// Cycles after a toggle during which only the same load may toggle again.
    pub post_transition_cycles: u8,
    pub rotation: RotationMode,
    pub rotation_after_hours: u32,
    /// Diverted energy total is cleared after this long without diversion.
    pub display_shutdown_hours: u32,
}

impl Default for Dispatch {
    fn default() -> Self {
        Self {
            post_transition_cycles: 3,
            rotation: RotationMode::Off,
            rotation_after_hours: 8,
            display_shutdown_hours: 8,
        }
    }
}

/// One dump load. Array order is the startup priority order.
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct LoadCfg {
    pub pin: u8,
    /// Nominal rating, used by the simulated installation only.
    #[serde(default)]
    pub rating_w: Option<f32>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
pub struct RelayOutputCfg {
    pub pin: u8,
    /// Surplus (positive watts) at which the relay may switch on.
    pub surplus_w: i32,
    /// Import at which the relay may switch off.
    pub import_w: i32,
    #[serde(default = "default_min_minutes")]
    pub min_on_minutes: u16,
    #[serde(default = "default_min_minutes")]
    pub min_off_minutes: u16,
    /// Nominal rating, used by the simulated installation only.
    #[serde(default)]
    pub rating_w: Option<f32>,
}

const fn default_min_minutes() -> u16 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Relays {
    /// Sliding window of the grid power average, in minutes.
    pub window_minutes: u32,
    pub outputs: Vec<RelayOutputCfg>,
}

impl Default for Relays {
    fn default() -> Self {
        Self {
            window_minutes: 10,
            outputs: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Hardware {
    /// MCP3008 input used for each channel.
    pub voltage_channel: u8,
    pub grid_channel: u8,
    pub diverted_channel: u8,
    pub spi_clock_hz: u32,
    /// Drive outputs low to switch a load on.
    pub outputs_active_low: bool,
}

impl Default for Hardware {
    fn default() -> Self {
        Self {
            voltage_channel: 0,
            grid_channel: 1,
            diverted_channel: 2,
            spi_clock_hz: 1_350_000,
            outputs_active_low: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub supply: Supply,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub sampling: Sampling,
    #[serde(default)]
    pub datalog: Datalog,
    #[serde(default)]
    pub dispatch: Dispatch,
    /// Dump loads in startup priority order (highest priority first).
    pub loads: Vec<LoadCfg>,
    #[serde(default)]
    pub relays: Relays,
    #[serde(default)]
    pub logging: Logging,
    #[serde(default)]
    pub hardware: Hardware,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

pub fn load_trace_csv(path: &std::path::Path) -> eyre::Result<Vec<TraceRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open trace CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["voltage", "grid", "diverted"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "trace CSV must have headers 'voltage,grid,diverted', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    for (idx, rec) in rdr.deserialize::<TraceRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if row.voltage > ADC_MAX || row.grid > ADC_MAX || row.diverted > ADC_MAX {
            eyre::bail!(
                "CSV row {} out of converter range (max {}): {},{},{}",
                idx + 2,
                ADC_MAX,
                row.voltage,
                row.grid,
                row.diverted
            );
        }
        rows.push(row);
    }

    if rows.is_empty() {
        eyre::bail!("trace CSV {:?} contains no samples", path);
    }
    Ok(rows)
}

impl Config {
    /// Sample sets in one half mains cycle at the configured rate.
    pub fn sample_sets_per_half_cycle(&self) -> u32 {
        let half_cycle_us = 500_000 / self.supply.frequency_hz.max(1);
        half_cycle_us / self.sampling.sample_set_period_us.max(1)
    }

    /// Energy bucket capacity in integer energy units.
    pub fn bucket_capacity_ieu(&self) -> f64 {
        f64::from(self.supply.working_zone_joules) * f64::from(self.supply.frequency_hz)
            / f64::from(self.calibration.power_cal_grid)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Supply
        if !(45..=65).contains(&self.supply.frequency_hz) {
            eyre::bail!("supply.frequency_hz must be in [45, 65]");
        }
        if !(self.supply.working_zone_joules.is_finite() && self.supply.working_zone_joules > 0.0)
        {
            eyre::bail!("supply.working_zone_joules must be > 0");
        }
        if !(self.supply.anti_creep_joules.is_finite() && self.supply.anti_creep_joules >= 0.0) {
            eyre::bail!("supply.anti_creep_joules must be >= 0");
        }

        // Calibration
        let cal = &self.calibration;
        for (name, v) in [
            ("power_cal_grid", cal.power_cal_grid),
            ("power_cal_diverted", cal.power_cal_diverted),
            ("voltage_cal", cal.voltage_cal),
        ] {
            if !(v.is_finite() && v > 0.0) {
                eyre::bail!("calibration.{name} must be > 0");
            }
        }
        if !(cal.lpf_gain.is_finite() && (0.0..=8.0).contains(&cal.lpf_gain)) {
            eyre::bail!("calibration.lpf_gain must be in [0.0, 8.0]");
        }
        if !(cal.lpf_alpha > 0.0 && cal.lpf_alpha <= 1.0) {
            eyre::bail!("calibration.lpf_alpha must be in (0.0, 1.0]");
        }
        let capacity = self.bucket_capacity_ieu();
        if !(capacity >= 2.0 && capacity < f64::from(i32::MAX)) {
            eyre::bail!("supply.working_zone_joules yields an unusable bucket capacity");
        }

        // Sampling
        if self.sampling.sample_set_period_us == 0 {
            eyre::bail!("sampling.sample_set_period_us must be >= 1");
        }
        if self.sampling.persistence > 10 {
            eyre::bail!("sampling.persistence must be <= 10");
        }
        if self.sampling.arming_sample_index == 0 {
            eyre::bail!("sampling.arming_sample_index must be >= 1");
        }
        let half = self.sample_sets_per_half_cycle();
        if half < 4 {
            eyre::bail!("sampling.sample_set_period_us is too long for the mains frequency");
        }
        if u32::from(self.sampling.arming_sample_index) >= half {
            eyre::bail!(
                "sampling.arming_sample_index must be < {half} (sample sets per half cycle)"
            );
        }
        if self.sampling.startup_ms > 60_000 {
            eyre::bail!("sampling.startup_ms is unreasonably large (>60s)");
        }

        // Datalog
        if self.datalog.period_s == 0 {
            eyre::bail!("datalog.period_s must be >= 1");
        }
        if self.datalog.period_s > 3600 {
            eyre::bail!("datalog.period_s is unreasonably large (>1h)");
        }

        // Dispatch
        if self.dispatch.post_transition_cycles == 0 {
            eyre::bail!("dispatch.post_transition_cycles must be >= 1");
        }
        if self.dispatch.rotation == RotationMode::Auto && self.dispatch.rotation_after_hours == 0 {
            eyre::bail!("dispatch.rotation_after_hours must be >= 1 when rotation = \"auto\"");
        }
        if self.dispatch.display_shutdown_hours == 0 {
            eyre::bail!("dispatch.display_shutdown_hours must be >= 1");
        }

        // Loads
        if self.loads.is_empty() {
            eyre::bail!("at least one [[loads]] entry is required");
        }
        if self.loads.len() > MAX_LOADS {
            eyre::bail!("at most {MAX_LOADS} loads are supported");
        }
        for l in &self.loads {
            if let Some(w) = l.rating_w
                && !(w.is_finite() && w >= 0.0)
            {
                eyre::bail!("loads.rating_w must be >= 0");
            }
        }

        // Relays
        if self.relays.outputs.len() > MAX_RELAYS {
            eyre::bail!("at most {MAX_RELAYS} relays are supported");
        }
        if !self.relays.outputs.is_empty() && !(1..=120).contains(&self.relays.window_minutes) {
            eyre::bail!("relays.window_minutes must be in [1, 120]");
        }
        for r in &self.relays.outputs {
            if r.surplus_w <= 0 {
                eyre::bail!("relays.outputs.surplus_w must be > 0 (pin {})", r.pin);
            }
            if r.import_w < 0 {
                eyre::bail!("relays.outputs.import_w must be >= 0 (pin {})", r.pin);
            }
        }

        // Pins must be unique across loads and relays
        let mut pins: Vec<u8> = self.loads.iter().map(|l| l.pin).collect();
        pins.extend(self.relays.outputs.iter().map(|r| r.pin));
        pins.sort_unstable();
        if let Some(w) = pins.windows(2).find(|w| w[0] == w[1]) {
            eyre::bail!("output pin {} is assigned more than once", w[0]);
        }

        // Hardware
        let hw = &self.hardware;
        for (name, ch) in [
            ("voltage_channel", hw.voltage_channel),
            ("grid_channel", hw.grid_channel),
            ("diverted_channel", hw.diverted_channel),
        ] {
            if ch > 7 {
                eyre::bail!("hardware.{name} must be in [0, 7]");
            }
        }
        if hw.voltage_channel == hw.grid_channel
            || hw.voltage_channel == hw.diverted_channel
            || hw.grid_channel == hw.diverted_channel
        {
            eyre::bail!("hardware channels must be distinct");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }
}
