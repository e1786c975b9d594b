//! Relay stage for non-resistive appliances.
//!
//! Relays switch on sustained surplus and off on sustained import, judged on
//! a slow average of grid power (import positive, watts) and gated by
//! minimum on/off durations counted in seconds.
//!
//! ## Averaging
//!
//! [`PowerAverage`] cascades three integer exponential averages and combines
//! them as `3*e1 - 3*e2 + e3`. The first stage smooths with `2^-A` per
//! datalog tick, the inner stages with `2^-(A-1)` and `2^-(A-2)`; the faster
//! inner stages keep the overshoot of the combination to about 3 %. Every
//! stage reaches its input exactly in integer arithmetic, so a constant input
//! is reproduced exactly after settling.
//!
//! The requested window is rounded to the nearest power-of-two number of
//! datalog ticks (ties round down), at least 2. With 5 s datalog ticks a
//! 10 minute request (120 ticks) becomes 128 ticks (10 min 40 s) and a
//! 15 minute request (180 ticks) also becomes 128. A step input
//! peaks near 103 % after two windows and stays within 1 % from about four.

use crate::MAX_RELAYS;

/// One relay output with its thresholds and duration gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Relay {
    pin: u8,
    surplus_w: i32,
    import_w: i32,
    min_on_s: u32,
    min_off_s: u32,
    on: bool,
    duration_s: u32,
}

impl Relay {
    /// `surplus_w` is a positive amount of export that allows switching on.
    pub fn new(pin: u8, surplus_w: i32, import_w: i32, min_on_s: u32, min_off_s: u32) -> Self {
        Self {
            pin,
            surplus_w: surplus_w.saturating_abs(),
            import_w: import_w.saturating_abs(),
            min_on_s,
            min_off_s,
            on: false,
            duration_s: 0,
        }
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn surplus_threshold(&self) -> i32 {
        self.surplus_w
    }

    pub fn import_threshold(&self) -> i32 {
        self.import_w
    }

    pub fn min_on(&self) -> u32 {
        self.min_on_s
    }

    pub fn min_off(&self) -> u32 {
        self.min_off_s
    }

    pub fn is_on(&self) -> bool {
        self.on
    }

    /// Seconds since the last transition (or since start).
    pub fn duration(&self) -> u32 {
        self.duration_s
    }

    pub fn inc_duration(&mut self) {
        self.duration_s = self.duration_s.saturating_add(1);
    }

    /// Switch on if off, `average <= -surplus` and the off time is served.
    pub fn try_turn_on(&mut self, average_w: i32) -> bool {
        if self.on || average_w > -self.surplus_w || self.duration_s < self.min_off_s {
            return false;
        }
        self.on = true;
        self.duration_s = 0;
        true
    }

    /// Switch off if on, `average >= import` and the on time is served.
    pub fn try_turn_off(&mut self, average_w: i32) -> bool {
        if !self.on || average_w < self.import_w || self.duration_s < self.min_on_s {
            return false;
        }
        self.on = false;
        self.duration_s = 0;
        true
    }

    /// Evaluate this relay alone; returns whether it changed state.
    pub fn proceed(&mut self, average_w: i32) -> bool {
        if self.on {
            self.try_turn_off(average_w)
        } else {
            self.try_turn_on(average_w)
        }
    }
}

/// Cascaded integer exponential average of grid power.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerAverage {
    shift: u8,
    raw: [i64; 3],
    ema: [i64; 3],
    samples: u32,
}

impl PowerAverage {
    pub fn new(shift: u8) -> Self {
        Self {
            shift: shift.clamp(1, 30),
            raw: [0; 3],
            ema: [0; 3],
            samples: 0,
        }
    }

    /// Average whose window approximates `window_minutes` with one update
    /// every `tick_s` seconds.
    pub fn for_window(window_minutes: u32, tick_s: u32) -> Self {
        let ticks = window_minutes.saturating_mul(60) / tick_s.max(1);
        Self::new(shift_for_ticks(ticks))
    }

    pub fn update(&mut self, input_w: i32) {
        let mut x = i64::from(input_w);
        for (stage, (raw, ema)) in self.raw.iter_mut().zip(self.ema.iter_mut()).enumerate() {
            *raw += x - *ema;
            *ema = *raw >> self.shift.saturating_sub(stage as u8);
            x = *ema;
        }
        self.samples = self.samples.saturating_add(1);
    }

    /// `None` until the first update.
    pub fn triple(&self) -> Option<i32> {
        (self.samples > 0).then(|| {
            let [e1, e2, e3] = self.ema;
            crate::fixed_point::clamp_to_i32(3 * e1 - 3 * e2 + e3)
        })
    }

    pub fn single(&self) -> i32 {
        crate::fixed_point::clamp_to_i32(self.ema[0])
    }

    pub fn double(&self) -> i32 {
        crate::fixed_point::clamp_to_i32(2 * self.ema[0] - self.ema[1])
    }

    pub fn shift(&self) -> u8 {
        self.shift
    }

    /// Achieved window, in datalog ticks.
    pub fn window_ticks(&self) -> u64 {
        1u64 << self.shift
    }

    pub fn samples(&self) -> u32 {
        self.samples
    }
}

/// `log2` of the power of two nearest to `ticks`, at least 1.
pub fn shift_for_ticks(ticks: u32) -> u8 {
    if ticks < 2 {
        return 1;
    }
    let below = ticks.ilog2();
    let lower = 1u64 << below;
    let upper = lower << 1;
    let t = u64::from(ticks);
    if upper - t < t - lower { (below + 1) as u8 } else { below as u8 }
}

/// A relay state change produced by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayTransition {
    pub index: usize,
    pub pin: u8,
    pub on: bool,
}

#[derive(Debug, Clone)]
pub struct RelayEngine {
    relays: [Relay; MAX_RELAYS],
    len: usize,
    average: PowerAverage,
}

impl RelayEngine {
    /// Relays in priority order; entries beyond `MAX_RELAYS` are dropped.
    pub fn new(relays: &[Relay], average: PowerAverage) -> Self {
        let mut slots = [Relay::default(); MAX_RELAYS];
        let len = relays.len().min(MAX_RELAYS);
        slots[..len].copy_from_slice(&relays[..len]);
        Self {
            relays: slots,
            len,
            average,
        }
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn average(&self) -> &PowerAverage {
        &self.average
    }

    /// Feed one datalog tick of grid power (import positive).
    pub fn update_average(&mut self, grid_w: i32) {
        self.average.update(grid_w);
    }

    pub fn inc_durations(&mut self) {
        for r in &mut self.relays[..self.len] {
            r.inc_duration();
        }
    }

    /// Once-per-second tick: advance durations, then sweep. Without any
    /// average yet the sweep is skipped.
    pub fn tick(&mut self) -> Vec<RelayTransition> {
        self.inc_durations();
        match self.average.triple() {
            Some(avg) => self.proceed_with(avg),
            None => {
                tracing::trace!("relay tick skipped: no power average yet");
                Vec::new()
            }
        }
    }

    /// Sweep with a given average: switch-on candidates in ascending order,
    /// then switch-off candidates in descending order. A relay that changed
    /// state in the first sweep is not reconsidered in the second.
    pub fn proceed_with(&mut self, average_w: i32) -> Vec<RelayTransition> {
        let mut changed = [false; MAX_RELAYS];
        let mut out = Vec::new();

        for (i, r) in self.relays[..self.len].iter_mut().enumerate() {
            if r.try_turn_on(average_w) {
                changed[i] = true;
                out.push(RelayTransition {
                    index: i,
                    pin: r.pin,
                    on: true,
                });
            }
        }
        for (i, r) in self.relays[..self.len].iter_mut().enumerate().rev() {
            if !changed[i] && r.try_turn_off(average_w) {
                out.push(RelayTransition {
                    index: i,
                    pin: r.pin,
                    on: false,
                });
            }
        }
        for t in &out {
            tracing::info!(relay = t.index, pin = t.pin, on = t.on, average_w, "relay switched");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_rounds_window_to_nearest_power_of_two() {
        assert_eq!(shift_for_ticks(0), 1);
        assert_eq!(shift_for_ticks(1), 1);
        assert_eq!(shift_for_ticks(2), 1);
        assert_eq!(shift_for_ticks(3), 1);
        assert_eq!(shift_for_ticks(95), 6);
        assert_eq!(shift_for_ticks(97), 7);
        assert_eq!(shift_for_ticks(120), 7);
        assert_eq!(shift_for_ticks(128), 7);
        assert_eq!(shift_for_ticks(180), 7);
        assert_eq!(shift_for_ticks(u32::MAX), 32);
        assert_eq!(PowerAverage::for_window(10, 5).window_ticks(), 128);
    }

    #[test]
    fn average_starts_invalid() {
        let mut a = PowerAverage::new(3);
        assert_eq!(a.triple(), None);
        a.update(100);
        assert!(a.triple().is_some());
    }

    #[test]
    fn average_converges_exactly_to_constant_input() {
        let mut a = PowerAverage::new(3);
        for _ in 0..1000 {
            a.update(-1500);
        }
        assert_eq!(a.single(), -1500);
        assert_eq!(a.double(), -1500);
        assert_eq!(a.triple(), Some(-1500));
    }

    #[test]
    fn average_lags_a_step() {
        let mut a = PowerAverage::new(6);
        for _ in 0..10 {
            a.update(1000);
        }
        let v = a.triple().unwrap();
        assert!(v > 0 && v < 1000, "got {v}");
    }

    #[test]
    fn relay_thresholds_are_stored_positive() {
        let r = Relay::new(3, -100, 20, 120, 180);
        assert_eq!(r.surplus_threshold(), 100);
        assert_eq!(r.import_threshold(), 20);
    }

    #[test]
    fn proceed_turns_on_then_off() {
        let mut r = Relay::new(3, 100, 20, 2, 3);
        for _ in 0..2 {
            r.inc_duration();
        }
        assert!(!r.proceed(-101));
        r.inc_duration();
        assert!(r.proceed(-101));
        assert!(r.is_on());
        assert_eq!(r.duration(), 0);

        r.inc_duration();
        assert!(!r.proceed(21));
        r.inc_duration();
        assert!(r.proceed(21));
        assert!(!r.is_on());
    }

    #[test]
    fn between_thresholds_nothing_moves() {
        let mut e = RelayEngine::new(&[Relay::new(2, 1000, 200, 0, 0)], PowerAverage::new(1));
        assert!(e.proceed_with(-999).is_empty());
        assert!(e.proceed_with(199).is_empty());
    }

    #[test]
    fn tick_without_average_only_counts() {
        let mut e = RelayEngine::new(&[Relay::new(2, 1000, 200, 0, 0)], PowerAverage::new(1));
        assert!(e.tick().is_empty());
        assert_eq!(e.relays()[0].duration(), 1);
        assert!(!e.relays()[0].is_on());
    }
}
