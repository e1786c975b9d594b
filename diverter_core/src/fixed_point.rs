//! Integer energy unit (IEU) arithmetic.
//!
//! The engine never converts to watts in the sampling path. A cycle's average
//! of `v * i` (both in converter counts) is "proportional to watts" and is
//! added to the bucket as-is, so one IEU of bucket content equals
//! `power_cal / frequency` joules. Calibration only appears here, once, when
//! configuration is turned into engine constants.

/// Nominal mid-scale value, scaled by 256 as the voltage filter works.
pub const MID_SCALE_X256: i32 = 512 << 8;
/// Allowed drift of the DC-offset estimate either side of mid-scale.
pub const DC_OFFSET_MARGIN_X256: i32 = 100 << 8;

const JOULES_PER_WATT_HOUR: f64 = 3600.0;

/// Truncate a finite float into `i32`, saturating; NaN maps to 0.
#[inline]
fn saturate_i32(x: f64) -> i32 {
    if x.is_nan() {
        0
    } else if x >= f64::from(i32::MAX) {
        i32::MAX
    } else if x <= f64::from(i32::MIN) {
        i32::MIN
    } else {
        x as i32
    }
}

/// Bucket capacity for a working zone of `joules` at `frequency_hz`.
#[inline]
pub fn capacity_ieu(joules: f32, frequency_hz: u32, power_cal: f32) -> i32 {
    saturate_i32(f64::from(joules) * f64::from(frequency_hz) / f64::from(power_cal))
}

/// Average-power value corresponding to `watts`.
#[inline]
pub fn ieu_from_watts(watts: f32, power_cal: f32) -> i32 {
    saturate_i32(f64::from(watts) / f64::from(power_cal))
}

/// Diverted-energy accumulator content worth one watt-hour.
#[inline]
pub fn ieu_per_wh(frequency_hz: u32, power_cal: f32) -> i64 {
    let v = JOULES_PER_WATT_HOUR * f64::from(frequency_hz) / f64::from(power_cal);
    i64::from(saturate_i32(v))
}

/// Average power over `count` sample sets, in watts.
#[inline]
pub fn watts_from_sum(sum: i64, count: u32, power_cal: f32) -> Option<f32> {
    if count == 0 {
        return None;
    }
    let avg = sum / i64::from(count);
    Some((avg as f64 * f64::from(power_cal)) as f32)
}

/// Q16 fixed-point representation of a factor in `[0, 1]`.
#[inline]
pub fn q16_from_f32(x: f32) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    saturate_i32((f64::from(x) * 65536.0).round()).clamp(0, 1 << 16)
}

/// Q8 fixed-point representation of a small non-negative gain.
#[inline]
pub fn q8_from_f32(x: f32) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    saturate_i32((f64::from(x) * 256.0).round()).max(0)
}

/// Clamp an `i64` intermediate back into `i32`.
#[inline]
pub fn clamp_to_i32(x: i64) -> i32 {
    x.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_default_constants() {
        assert_eq!(capacity_ieu(360.0, 50, 0.0435), 413_793);
        assert_eq!(ieu_per_wh(50, 0.0435), 4_137_931);
        assert_eq!(ieu_from_watts(5.0, 0.0435), 114);
    }

    #[test]
    fn required_export_truncates_toward_zero() {
        assert_eq!(ieu_from_watts(-5.0, 0.0435), -114);
        assert_eq!(ieu_from_watts(0.0, 0.0435), 0);
    }

    #[test]
    fn q_formats_round_and_clamp() {
        assert_eq!(q16_from_f32(0.002), 131);
        assert_eq!(q16_from_f32(1.0), 65536);
        assert_eq!(q16_from_f32(3.0), 65536);
        assert_eq!(q16_from_f32(f32::NAN), 0);
        assert_eq!(q8_from_f32(0.0), 0);
        assert_eq!(q8_from_f32(1.5), 384);
        assert_eq!(q8_from_f32(-1.0), 0);
    }

    #[test]
    fn watts_from_sum_guards_zero_count() {
        assert_eq!(watts_from_sum(1000, 0, 1.0), None);
        // integer average first, then calibration
        assert_eq!(watts_from_sum(-7, 2, 2.0), Some(-6.0));
    }

    #[test]
    fn clamp_to_i32_saturates() {
        assert_eq!(clamp_to_i32(i64::MAX), i32::MAX);
        assert_eq!(clamp_to_i32(i64::MIN), i32::MIN);
        assert_eq!(clamp_to_i32(-5), -5);
    }
}
