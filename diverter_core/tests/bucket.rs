use diverter_core::EnergyBucket;
use proptest::prelude::*;
use rstest::rstest;

proptest! {
    #[test]
    fn level_stays_within_capacity(
        capacity in 1i32..5_000_000,
        required in -10_000i32..10_000,
        start in any::<i32>(),
        contributions in prop::collection::vec(any::<i64>(), 0..400),
    ) {
        let mut b = EnergyBucket::with_level(capacity, required, start);
        prop_assert!((0..=capacity).contains(&b.level()));
        for p in contributions {
            let level = b.commit_cycle(p);
            prop_assert!((0..=capacity).contains(&level));
            prop_assert_eq!(level, b.level());
        }
    }

    #[test]
    fn committed_sums_stay_within_capacity(
        capacity in 1i32..5_000_000,
        cycles in prop::collection::vec((-(1i64 << 40)..(1i64 << 40), 0u32..200), 0..200),
    ) {
        let mut b = EnergyBucket::new(capacity, 0);
        for (sum, count) in cycles {
            let before = b.level();
            match b.commit_sum(sum, count) {
                Some(level) => prop_assert!((0..=capacity).contains(&level)),
                None => prop_assert_eq!(b.level(), before),
            }
        }
    }

    #[test]
    fn prediction_is_level_plus_truncated_mean(
        level in 0i32..1_000_000,
        sum in -(1i64 << 36)..(1i64 << 36),
        count in 1u32..200,
    ) {
        let mut b = EnergyBucket::with_level(1_000_000, 0, level);
        let expected = i64::from(level) + sum / i64::from(count);
        let expected = expected.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        prop_assert_eq!(b.predict(sum, count), Some(expected));
        prop_assert_eq!(b.prediction(), expected);
        // prediction never moves the level
        prop_assert_eq!(b.level(), level);
    }
}

#[test]
fn prediction_truncates_toward_zero() {
    let mut b = EnergyBucket::with_level(1000, 0, 500);
    assert_eq!(b.predict(-7, 2), Some(497));
    assert_eq!(b.predict(7, 2), Some(503));
}

#[test]
fn prediction_with_no_samples_is_skipped() {
    let mut b = EnergyBucket::with_level(1000, 0, 500);
    b.predict(100, 1);
    assert_eq!(b.predict(1_000, 0), None);
    assert_eq!(b.prediction(), 600);
}

#[test]
fn prediction_may_leave_the_bucket_range() {
    let mut b = EnergyBucket::with_level(1000, 0, 900);
    assert_eq!(b.predict(600, 2), Some(1200));
    let mut b = EnergyBucket::with_level(1000, 0, 100);
    assert_eq!(b.predict(-600, 2), Some(-200));
}

#[test]
fn four_cycles_of_constant_surplus_from_midpoint() {
    let mut b = EnergyBucket::with_level(1000, 0, 500);
    assert_eq!(b.midpoint(), 500);
    let levels: Vec<i32> = (0..4).map(|_| b.commit_cycle(50)).collect();
    assert_eq!(levels, vec![550, 600, 650, 700]);
    assert!(levels.iter().all(|l| (0..=1000).contains(l)));
}

#[rstest]
#[case(50, 1)]
#[case(50, 64)]
#[case(i64::MAX, 1)]
fn reapplying_at_capacity_is_idempotent(#[case] power: i64, #[case] count: u32) {
    let mut b = EnergyBucket::with_level(1000, 0, 1000);
    let sum = power.saturating_mul(i64::from(count));
    for _ in 0..3 {
        assert_eq!(b.commit_sum(sum, count), Some(1000));
    }
}

#[test]
fn required_export_shifts_the_balance_point() {
    let mut b = EnergyBucket::with_level(1000, 20, 500);
    assert_eq!(b.commit_cycle(20), 500);
    assert_eq!(b.commit_cycle(0), 480);
}
