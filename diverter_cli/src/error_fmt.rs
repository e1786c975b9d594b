//! Human-readable error descriptions and structured JSON error formatting.

use diverter_core::error::{BuildError, DiverterError};

/// Context attached to configuration load/validation failures.
pub const INVALID_CONFIG: &str = "invalid configuration";
/// Context attached to trace loading failures.
pub const INVALID_TRACE: &str = "invalid trace";
/// Error raised by `run` in a build without the `hardware` feature.
pub const NO_HARDWARE: &str = "built without hardware support";

fn chain_text(err: &eyre::Report) -> String {
    err.chain()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    // Typed matches first
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingOutputs => {
                "What happened: No output driver was provided to the diverter.\nLikely causes: GPIO outputs failed to initialize, or relays are configured without relay outputs.\nHow to fix: Check the [[loads]] and [[relays.outputs]] pins and GPIO permissions.".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the TOML.\nHow to fix: Edit the config file, then rerun. See etc/diverter.toml for a sample."
            ),
        };
    }

    if let Some(de) = err.downcast_ref::<DiverterError>() {
        return match de {
            DiverterError::Hardware(m) | DiverterError::HardwareFault(m) => format!(
                "What happened: Hardware error ({m}).\nLikely causes: SPI not enabled, converter not wired or not powered, or insufficient permissions.\nHow to fix: Enable SPI, check the MCP3008 wiring and the [hardware] channels, and run with access to /dev/spidev* and /dev/gpiomem."
            ),
            DiverterError::Config(m) => format!(
                "What happened: Hardware configuration error ({m}).\nLikely causes: A pin or converter channel outside the supported range.\nHow to fix: Fix the pin numbers in [[loads]] / [[relays.outputs]] or the [hardware] channels."
            ),
            DiverterError::State(m) => format!(
                "What happened: {m}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // String-based heuristics for errors coming from config or trace loading
    let msg = chain_text(err);
    let lower = msg.to_ascii_lowercase();

    if lower.contains("read config file") {
        return format!(
            "What happened: The configuration file could not be read ({msg}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config <FILE>; etc/diverter.toml is the default."
        );
    }

    if lower.starts_with(INVALID_CONFIG) {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: A TOML syntax error, an unknown key, or an out-of-range value.\nHow to fix: Edit the TOML config and try again."
        );
    }

    if lower.starts_with(INVALID_TRACE) {
        if lower.contains("headers") {
            return "Invalid headers in trace CSV. Expected 'voltage,grid,diverted'.".to_string();
        }
        return format!(
            "What happened: The sample trace could not be used ({msg}).\nLikely causes: Wrong file, non-numeric values, or readings outside 0..=1023.\nHow to fix: Check the CSV; each row holds one raw converter reading per channel."
        );
    }

    if lower.contains(NO_HARDWARE) {
        return "What happened: This binary was built without hardware support.\nHow to fix: Rebuild with `--features hardware`, or use `simulate` / `replay`.".to_string();
    }

    // Generic fallback
    format!(
        "Something went wrong.\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: 2 configuration, 3 hardware, 4 runtime state, 1 anything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if err.downcast_ref::<BuildError>().is_some() {
        return 2;
    }
    if let Some(de) = err.downcast_ref::<DiverterError>() {
        return match de {
            DiverterError::Config(_) => 2,
            DiverterError::Hardware(_) | DiverterError::HardwareFault(_) => 3,
            DiverterError::State(_) => 4,
        };
    }
    let msg = err.to_string();
    if msg.starts_with(INVALID_CONFIG) || msg.starts_with(INVALID_TRACE) {
        return 2;
    }
    if msg.contains(NO_HARDWARE) {
        return 3;
    }
    1
}

fn reason_name(err: &eyre::Report) -> &'static str {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingOutputs => "MissingOutputs",
            BuildError::InvalidConfig(_) => "InvalidConfig",
        };
    }
    if let Some(de) = err.downcast_ref::<DiverterError>() {
        return match de {
            DiverterError::Hardware(_) => "Hardware",
            DiverterError::HardwareFault(_) => "HardwareFault",
            DiverterError::Config(_) => "Config",
            DiverterError::State(_) => "State",
        };
    }
    match exit_code_for_error(err) {
        2 => "InvalidConfig",
        3 => "Hardware",
        _ => "Error",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    use serde_json::json;

    json!({
        "type": "error",
        "reason": reason_name(err),
        "exit_code": exit_code_for_error(err),
        "message": humanize(err),
    })
    .to_string()
}
