//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "diverter", version, about = "Surplus power diverter")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/diverter.toml")]
    pub config: PathBuf,

    /// Print reports as JSON lines instead of text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Drive a simulated installation (closed loop)
    Simulate {
        /// Simulated time to run, in seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
        /// Constant surplus (PV minus house load) in watts; negative is import
        #[arg(long, value_name = "WATTS", default_value_t = 1500.0, allow_hyphen_values = true)]
        surplus_w: f32,
        /// Surplus step as SECONDS:WATTS; repeat for a profile (overrides --surplus-w)
        #[arg(long = "step", value_name = "SECONDS:WATTS", allow_hyphen_values = true)]
        steps: Vec<String>,
        /// Run the sampling context in its own thread, paced in real time
        #[arg(long, action = ArgAction::SetTrue)]
        realtime: bool,
    },
    /// Feed a recorded CSV trace (voltage,grid,diverted) through the engine
    Replay {
        /// Trace file with the exact header `voltage,grid,diverted`
        #[arg(long, value_name = "FILE")]
        trace: PathBuf,
        /// Play the trace this many times back to back
        #[arg(long, default_value_t = 1)]
        repeat: u32,
    },
    /// Run on the real converter and outputs (requires the `hardware` feature)
    Run,
    /// Quick health check (config, engine build, hardware presence / sim ok)
    SelfCheck,
}
