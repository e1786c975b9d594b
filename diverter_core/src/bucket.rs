//! Energy bucket: a bounded accumulator mimicking the meter's "no cost"
//! exchange zone, with a half-cycle-ahead prediction of its next value.

/// Bounded energy accumulator in integer energy units.
///
/// `0 <= level <= capacity` holds after every committed update; updates are
/// clamped, never rejected.
#[derive(Debug, Clone)]
pub struct EnergyBucket {
    level: i32,
    capacity: i32,
    required_export: i32,
    prediction: i32,
}

impl EnergyBucket {
    /// Empty bucket. `required_export` is subtracted from every cycle's
    /// average power; a negative value makes the engine settle on a small import.
    pub fn new(capacity: i32, required_export: i32) -> Self {
        Self::with_level(capacity, required_export, 0)
    }

    pub fn with_level(capacity: i32, required_export: i32, level: i32) -> Self {
        let capacity = capacity.max(0);
        let level = level.clamp(0, capacity);
        Self {
            level,
            capacity,
            required_export,
            prediction: level,
        }
    }

    /// Add a completed cycle's average power and clamp.
    pub fn commit_cycle(&mut self, average_power: i64) -> i32 {
        let next = i64::from(self.level)
            .saturating_add(average_power)
            .saturating_sub(i64::from(self.required_export));
        self.level = next.clamp(0, i64::from(self.capacity)) as i32;
        self.level
    }

    /// Commit `sum / count` for a completed cycle; a cycle without samples
    /// leaves the level untouched.
    pub fn commit_sum(&mut self, sum: i64, count: u32) -> Option<i32> {
        if count == 0 {
            return None;
        }
        Some(self.commit_cycle(sum / i64::from(count)))
    }

    /// Predict the end-of-cycle level from the first half-cycle:
    /// `level + sum / count`, truncating toward zero and deliberately not
    /// clamped. Returns `None` (prediction unchanged) when `count` is 0.
    pub fn predict(&mut self, half_cycle_sum: i64, count: u32) -> Option<i32> {
        if count == 0 {
            return None;
        }
        let p = i64::from(self.level) + half_cycle_sum / i64::from(count);
        self.prediction = crate::fixed_point::clamp_to_i32(p);
        Some(self.prediction)
    }

    pub fn level(&self) -> i32 {
        self.level
    }

    pub fn capacity(&self) -> i32 {
        self.capacity
    }

    pub fn midpoint(&self) -> i32 {
        self.capacity >> 1
    }

    pub fn prediction(&self) -> i32 {
        self.prediction
    }

    pub fn required_export(&self) -> i32 {
        self.required_export
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_with_midpoint_half_capacity() {
        let b = EnergyBucket::new(413_793, 0);
        assert_eq!(b.level(), 0);
        assert_eq!(b.midpoint(), 206_896);
    }

    #[test]
    fn commit_clamps_both_ends() {
        let mut b = EnergyBucket::new(1000, 0);
        assert_eq!(b.commit_cycle(-50), 0);
        assert_eq!(b.commit_cycle(5000), 1000);
        assert_eq!(b.commit_cycle(i64::MAX / 2), 1000);
    }

    #[test]
    fn required_export_is_subtracted() {
        let mut b = EnergyBucket::with_level(1000, 20, 500);
        assert_eq!(b.commit_cycle(50), 530);
        let mut b = EnergyBucket::with_level(1000, -20, 500);
        assert_eq!(b.commit_cycle(50), 570);
    }

    #[test]
    fn prediction_is_not_clamped() {
        let mut b = EnergyBucket::with_level(1000, 0, 900);
        assert_eq!(b.predict(500, 2), Some(1150));
        assert_eq!(b.predict(-4000, 2), Some(-1100));
    }

    #[test]
    fn prediction_truncates_toward_zero() {
        let mut b = EnergyBucket::with_level(1000, 0, 500);
        assert_eq!(b.predict(-7, 2), Some(497));
        assert_eq!(b.predict(7, 2), Some(503));
    }

    #[test]
    fn zero_count_is_skipped() {
        let mut b = EnergyBucket::with_level(1000, 0, 500);
        b.predict(100, 1);
        assert_eq!(b.predict(100, 0), None);
        assert_eq!(b.prediction(), 600);
        assert_eq!(b.commit_sum(100, 0), None);
        assert_eq!(b.level(), 500);
    }
}
