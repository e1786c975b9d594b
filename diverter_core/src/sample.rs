//! Per-sample conditioning: DC-offset removal, zero-crossing detection with a
//! persistence filter, CT phase compensation and power accumulation.
//!
//! Fixed-point layout (all values are converter counts scaled by 256):
//! - `v = (raw_v << 8) - dc_offset`
//! - `i = (raw_i - 512) << 8`, plus the compensation term on the grid channel
//! - instantaneous power `((v >> 2) * (i >> 2)) >> 12`, which equals the
//!   product of the two signals in plain counts
//!
//! Accumulators are `i64`; a whole datalog period of full-scale samples fits
//! comfortably.

use diverter_traits::{ADC_MID_SCALE, SampleSet};

use crate::fixed_point::{DC_OFFSET_MARGIN_X256, MID_SCALE_X256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Negative,
    Positive,
}

/// Confirmed polarity change seen on the current sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Crossing {
    /// Negative to positive: a full mains cycle has completed.
    Rising,
    /// Positive to negative: the first half of the cycle has completed.
    Falling,
}

/// Totals of a completed mains cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTotals {
    pub sum_p_grid: i64,
    pub sum_p_diverted: i64,
    pub sample_sets: u32,
}

impl CycleTotals {
    /// Truncating average grid power, `None` when no sample contributed.
    pub fn average_grid(&self) -> Option<i64> {
        (self.sample_sets > 0).then(|| self.sum_p_grid / i64::from(self.sample_sets))
    }

    pub fn average_diverted(&self) -> Option<i64> {
        (self.sample_sets > 0).then(|| self.sum_p_diverted / i64::from(self.sample_sets))
    }
}

/// Totals of a completed datalog period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodTotals {
    pub sum_p_grid: i64,
    pub sum_p_diverted: i64,
    pub sum_v_squared: i64,
    pub sample_sets: u32,
    pub lowest_sets_per_cycle: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ConditionerCfg {
    /// Extra consecutive opposite-sign samples before a crossing is confirmed.
    pub persistence: u8,
    /// Smoothing factor of the CT compensation filter, Q16.
    pub lpf_alpha_q16: i32,
    /// Gain of the CT compensation term, Q8. Zero disables compensation.
    pub lpf_gain_q8: i32,
}

impl Default for ConditionerCfg {
    fn default() -> Self {
        Self {
            persistence: 1,
            lpf_alpha_q16: 131,
            lpf_gain_q8: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleConditioner {
    cfg: ConditionerCfg,

    dc_offset_v: i32,
    cum_v_deltas: i64,
    sample_v: i32,

    raw_polarity: Polarity,
    confirmed: Polarity,
    last_confirmed: Polarity,
    persistence_count: u8,

    lpf: i64,

    // per mains cycle
    sum_p_grid: i64,
    sum_p_diverted: i64,
    sets_this_cycle: u32,
    sets_negative_half: u32,

    // per datalog period
    dl_sum_p_grid: i64,
    dl_sum_p_diverted: i64,
    dl_sum_v_squared: i64,
    dl_sets: u32,
    lowest_sets_per_cycle: u32,
}

#[inline]
fn inst_power(v: i32, i: i64) -> i64 {
    ((i64::from(v) >> 2) * (i >> 2)) >> 12
}

#[inline]
fn current_counts(raw: u16) -> i64 {
    (i64::from(raw) - i64::from(ADC_MID_SCALE)) << 8
}

impl SampleConditioner {
    pub fn new(cfg: ConditionerCfg) -> Self {
        Self {
            cfg,
            dc_offset_v: MID_SCALE_X256,
            cum_v_deltas: 0,
            sample_v: 0,
            raw_polarity: Polarity::Negative,
            confirmed: Polarity::Negative,
            last_confirmed: Polarity::Negative,
            persistence_count: 0,
            lpf: 0,
            sum_p_grid: 0,
            sum_p_diverted: 0,
            sets_this_cycle: 0,
            sets_negative_half: 0,
            dl_sum_p_grid: 0,
            dl_sum_p_diverted: 0,
            dl_sum_v_squared: 0,
            dl_sets: 0,
            lowest_sets_per_cycle: u32::MAX,
        }
    }

    /// First stage of a sample set: DC removal, polarity and crossing
    /// detection. A falling crossing also updates the DC-offset estimate.
    pub fn process_voltage(&mut self, raw: u16) -> Option<Crossing> {
        self.sample_v = (i32::from(raw) << 8) - self.dc_offset_v;
        self.raw_polarity = if self.sample_v > 0 {
            Polarity::Positive
        } else {
            Polarity::Negative
        };
        self.confirm_polarity();

        match (self.confirmed, self.last_confirmed) {
            (Polarity::Positive, Polarity::Negative) => Some(Crossing::Rising),
            (Polarity::Negative, Polarity::Positive) => {
                self.update_dc_offset();
                Some(Crossing::Falling)
            }
            _ => None,
        }
    }

    fn confirm_polarity(&mut self) {
        if self.raw_polarity == self.last_confirmed {
            self.persistence_count = 0;
            return;
        }
        self.persistence_count = self.persistence_count.saturating_add(1);
        if self.persistence_count > self.cfg.persistence {
            self.persistence_count = 0;
            self.confirmed = self.raw_polarity;
        }
    }

    fn update_dc_offset(&mut self) {
        let step = self.cum_v_deltas >> 12;
        self.cum_v_deltas = 0;
        let next = i64::from(self.dc_offset_v) + step;
        let lo = i64::from(MID_SCALE_X256 - DC_OFFSET_MARGIN_X256);
        let hi = i64::from(MID_SCALE_X256 + DC_OFFSET_MARGIN_X256);
        self.dc_offset_v = next.clamp(lo, hi) as i32;
    }

    /// Second stage of a sample set, after any crossing has been handled:
    /// accumulate voltage statistics and the power of both current channels.
    /// The diverted channel is ignored while `meter_diverted` is false.
    pub fn accumulate(&mut self, set: SampleSet, meter_diverted: bool) {
        if self.confirmed == Polarity::Negative {
            self.sets_negative_half = self.sets_negative_half.saturating_add(1);
        }

        let v4 = i64::from(self.sample_v >> 2);
        self.dl_sum_v_squared += (v4 * v4) >> 12;
        self.cum_v_deltas += i64::from(self.sample_v);
        self.last_confirmed = self.confirmed;
        self.sets_this_cycle = self.sets_this_cycle.saturating_add(1);
        self.dl_sets = self.dl_sets.saturating_add(1);

        let mut i_grid = current_counts(set.grid);
        let prev = self.lpf;
        self.lpf += (i64::from(self.cfg.lpf_alpha_q16) * (i_grid - prev)) >> 16;
        i_grid += (i64::from(self.cfg.lpf_gain_q8) * self.lpf) >> 8;
        let p = inst_power(self.sample_v, i_grid);
        self.sum_p_grid += p;
        self.dl_sum_p_grid += p;

        if meter_diverted {
            let p = inst_power(self.sample_v, current_counts(set.diverted));
            self.sum_p_diverted += p;
            self.dl_sum_p_diverted += p;
        }
    }

    /// Close the current mains cycle and start the next one.
    pub fn take_cycle(&mut self) -> CycleTotals {
        let totals = CycleTotals {
            sum_p_grid: self.sum_p_grid,
            sum_p_diverted: self.sum_p_diverted,
            sample_sets: self.sets_this_cycle,
        };
        self.lowest_sets_per_cycle = self.lowest_sets_per_cycle.min(self.sets_this_cycle);
        self.sum_p_grid = 0;
        self.sum_p_diverted = 0;
        self.sets_this_cycle = 0;
        self.sets_negative_half = 0;
        totals
    }

    /// Close the current datalog period.
    pub fn take_period(&mut self) -> PeriodTotals {
        let totals = PeriodTotals {
            sum_p_grid: self.dl_sum_p_grid,
            sum_p_diverted: self.dl_sum_p_diverted,
            sum_v_squared: self.dl_sum_v_squared,
            sample_sets: self.dl_sets,
            lowest_sets_per_cycle: self.lowest_sets_per_cycle,
        };
        self.dl_sum_p_grid = 0;
        self.dl_sum_p_diverted = 0;
        self.dl_sum_v_squared = 0;
        self.dl_sets = 0;
        self.lowest_sets_per_cycle = u32::MAX;
        totals
    }

    /// Discard everything measured while the DC filter was settling.
    pub fn reset_after_startup(&mut self) {
        self.sum_p_grid = 0;
        self.sum_p_diverted = 0;
        self.sets_this_cycle = 0;
        self.sets_negative_half = 0;
        self.dl_sum_p_grid = 0;
        self.dl_sum_p_diverted = 0;
        self.dl_sum_v_squared = 0;
        self.dl_sets = 0;
        self.lowest_sets_per_cycle = u32::MAX;
    }

    /// Grid power summed so far in the current cycle, with its sample count.
    pub fn cycle_grid_sum(&self) -> (i64, u32) {
        (self.sum_p_grid, self.sets_this_cycle)
    }

    pub fn confirmed_polarity(&self) -> Polarity {
        self.confirmed
    }

    /// Sample sets seen since the last falling crossing (0 at the crossing itself).
    pub fn sets_in_negative_half(&self) -> u32 {
        self.sets_negative_half
    }

    pub fn dc_offset(&self) -> i32 {
        self.dc_offset_v
    }
}
