//! Time helpers. The engine has no clock; durations are counted in mains
//! cycles (interrupt context) or seconds (background).

/// Number of microseconds in one second.
pub const MICROS_PER_SEC: u64 = 1_000_000;
/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;
pub const SECS_PER_HOUR: u32 = 3_600;

/// Whole mains cycles in `ms` milliseconds.
#[inline]
pub fn cycles_from_ms(ms: u32, frequency_hz: u32) -> u32 {
    let cycles = u64::from(ms) * u64::from(frequency_hz) / MILLIS_PER_SEC;
    u32::try_from(cycles).unwrap_or(u32::MAX)
}

/// Mains cycles in `hours`, saturating.
#[inline]
pub fn cycles_from_hours(hours: u32, frequency_hz: u32) -> u32 {
    hours
        .saturating_mul(SECS_PER_HOUR)
        .saturating_mul(frequency_hz)
}

/// Nominal sample sets per mains cycle (integer, truncated).
/// - Clamps inputs to at least 1 to avoid division by zero.
#[inline]
pub fn sample_sets_per_cycle(period_us: u32, frequency_hz: u32) -> u32 {
    let cycle_us = MICROS_PER_SEC / u64::from(frequency_hz.max(1));
    u32::try_from(cycle_us / u64::from(period_us.max(1))).unwrap_or(u32::MAX)
}
