//! Test sampler thread lifecycle and cleanup to prevent thread leaks.
//!
//! Verifies that:
//! - Threads are properly cleaned up when Sampler is dropped
//! - The core is handed back on stop
//! - Read errors are counted without ending the thread

use std::time::Duration;

use diverter_core::mocks::{FailingSource, NullOutputs};
use diverter_core::sampler::Sampler;
use diverter_core::{BoxedDiverter, DiverterCore, build_diverter};
use diverter_hardware::sim::ReplaySource;
use diverter_traits::{ManualClock, SampleSet};

fn core() -> DiverterCore<NullOutputs> {
    let cfg = diverter_config::load_toml("[[loads]]\npin = 5\n").unwrap();
    build_diverter(&cfg, NullOutputs, NullOutputs).unwrap().core
}

#[test]
fn sampler_thread_exits_on_drop() {
    let source = FailingSource { ok: usize::MAX };
    let sampler = Sampler::spawn(source, core());

    // Give thread time to start
    std::thread::sleep(Duration::from_millis(20));

    // Drop the sampler - thread should exit gracefully
    drop(sampler);
}

#[test]
fn finite_source_finishes_and_returns_the_core() {
    let sets = vec![SampleSet::idle(); 1000];
    let sampler = Sampler::spawn(ReplaySource::new(sets), core());
    while !sampler.is_finished() {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(sampler.stats().sample_sets(), 1000);
    let core = sampler.stop().expect("thread did not panic");
    assert!(!core.beyond_startup());
}

#[test]
fn read_errors_are_counted() {
    let sampler = Sampler::spawn(FailingSource { ok: 10 }, core());
    while sampler.stats().read_errors() < 5 {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(sampler.stats().sample_sets(), 10);
    assert!(!sampler.is_finished());
}

#[test]
fn paced_sampler_advances_the_clock_by_one_period_per_set() {
    let clock = ManualClock::new();
    let sets = vec![SampleSet::idle(); 100];
    let sampler = Sampler::spawn_paced(
        ReplaySource::new(sets),
        core(),
        Duration::from_micros(312),
        clock.clone(),
    );
    while !sampler.is_finished() {
        std::thread::sleep(Duration::from_millis(1));
    }
    drop(sampler);
    assert_eq!(clock.elapsed(), Duration::from_micros(312 * 100));
}

#[test]
fn multiple_samplers_dont_leak_threads() {
    for _ in 0..10 {
        let d = BoxedDiverter::builder()
            .with_load_outputs(NullOutputs)
            .build()
            .unwrap();
        let sampler = Sampler::spawn(FailingSource { ok: usize::MAX }, d.core);
        std::thread::sleep(Duration::from_millis(2));
        drop(sampler);
    }
}
