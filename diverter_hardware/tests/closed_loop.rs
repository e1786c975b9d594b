use std::time::Duration;

use diverter_hardware::sim::{OutputBank, SimConfig, SimLoad, SimulatedMains, SurplusProfile};
use diverter_traits::{DigitalOutputs, SampleSource};
use rstest::rstest;

fn installation(surplus: f32, bank: &OutputBank) -> SimulatedMains {
    let cfg = SimConfig {
        surplus: SurplusProfile::Constant(surplus),
        loads: vec![
            SimLoad {
                pin: 5,
                rating_w: 1000.0,
                metered: true,
            },
            SimLoad {
                pin: 6,
                rating_w: 1000.0,
                metered: true,
            },
            SimLoad {
                pin: 20,
                rating_w: 500.0,
                metered: false,
            },
        ],
        ..SimConfig::default()
    };
    SimulatedMains::new(cfg, bank.clone())
}

#[rstest]
#[case(&[], 1500.0, 0.0)]
#[case(&[5], 500.0, 1000.0)]
#[case(&[5, 6], -500.0, 2000.0)]
#[case(&[5, 20], 0.0, 1000.0)]
fn outputs_feed_back_into_the_waveform(
    #[case] on: &[u8],
    #[case] export_w: f32,
    #[case] diverted_w: f32,
) {
    let bank = OutputBank::new();
    let src = installation(1500.0, &bank);
    let mut out = bank.outputs();
    for pin in on {
        out.set_on(*pin).unwrap();
    }
    assert_eq!(src.net_export_w(Duration::ZERO), export_w);
    assert_eq!(src.diverted_w(), diverted_w);
}

#[test]
fn samples_stay_in_converter_range_when_saturated() {
    let bank = OutputBank::new();
    let mut src = installation(20_000.0, &bank);
    for _ in 0..200 {
        let s = src.read_set().unwrap().unwrap();
        assert!(s.grid <= 1023);
        assert!(s.voltage <= 1023);
    }
}

#[test]
fn voltage_crosses_mid_scale_twice_per_cycle() {
    let bank = OutputBank::new();
    let mut src = installation(0.0, &bank);
    let mut crossings = 0;
    let mut prev_pos = false;
    // 10 cycles at 50 Hz
    for i in 0..641 {
        let s = src.read_set().unwrap().unwrap();
        let pos = s.voltage > 512;
        if i > 0 && pos != prev_pos {
            crossings += 1;
        }
        prev_pos = pos;
    }
    assert!((19..=21).contains(&crossings), "crossings {crossings}");
}
