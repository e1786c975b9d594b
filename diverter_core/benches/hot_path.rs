use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use diverter_core::mocks::NullOutputs;
use diverter_core::{DiverterCore, LoadDispatcher, build_diverter};
use diverter_traits::SampleSet;

// One second of 50 Hz mains at 312 µs per set, with a little noise on the
// current channels so the accumulators do real work.
fn synth_second(seed: u32) -> Vec<SampleSet> {
    let mut state = seed.max(1);
    let mut noise = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        (x % 7) as f64 - 3.0
    };
    (0..3205)
        .map(|k| {
            let t = f64::from(k) * 312e-6;
            let s = (std::f64::consts::TAU * 50.0 * t).sin();
            let raw = |amp: f64, n: f64| (512.0 + amp * s + n).round().clamp(0.0, 1023.0) as u16;
            SampleSet::new(raw(400.0, 0.0), raw(120.0, noise()), raw(80.0, noise()))
        })
        .collect()
}

fn core() -> DiverterCore<NullOutputs> {
    let cfg = diverter_config::load_toml(
        "[sampling]\nstartup_ms = 0\n[[loads]]\npin = 5\n[[loads]]\npin = 6\n[[loads]]\npin = 7\n",
    )
    .expect("bench config parses");
    build_diverter(&cfg, NullOutputs, NullOutputs)
        .expect("bench config is valid")
        .core
}

fn group_settings(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    // Allow quick tweaking without CLI flags (Criterion 0.5):
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p diverter_core --bench hot_path
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE") {
        if let Ok(n) = ss.parse::<usize>() {
            g.sample_size(n.max(1));
        }
    } else {
        g.sample_size(50);
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms_u64) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms_u64));
    }
}

pub fn bench_sample_path(c: &mut Criterion) {
    let mut g = c.benchmark_group("sample_path");
    group_settings(&mut g);

    let second = synth_second(0xC0FFEE);
    g.bench_function("one_second_of_sets", |b| {
        b.iter_batched(
            core,
            |mut core| {
                for &set in &second {
                    black_box(core.process_sample_set(black_box(set)));
                }
                core
            },
            BatchSize::LargeInput,
        )
    });
    g.finish();
}

pub fn bench_dispatch(c: &mut Criterion) {
    let mut g = c.benchmark_group("dispatch");
    group_settings(&mut g);

    let predictions: Vec<i32> = (0..1000).map(|k| 150_000 + (k * 977) % 120_000).collect();
    g.bench_function("thousand_cycles_8_loads", |b| {
        b.iter_batched(
            || LoadDispatcher::new(8, 413_793, 3),
            |mut d| {
                for &p in &predictions {
                    black_box(d.dispatch(black_box(p)));
                }
                d
            },
            BatchSize::SmallInput,
        )
    });
    g.finish();
}

criterion_group!(hot_path, bench_sample_path, bench_dispatch);
criterion_main!(hot_path);
