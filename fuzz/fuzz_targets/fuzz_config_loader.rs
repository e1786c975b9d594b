#![no_main]
use libfuzzer_sys::fuzz_target;

use diverter_core::mocks::NullOutputs;

fuzz_target!(|data: &str| {
    // Parsing, validation and engine construction must reject bad input
    // without panicking.
    let Ok(cfg) = diverter_config::load_toml(data) else {
        return;
    };
    if cfg.validate().is_ok() {
        let _ = diverter_core::build_diverter(&cfg, NullOutputs, NullOutputs);
    }
});
