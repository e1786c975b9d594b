//! Sample sources and output drivers for the diverter engine.
//!
//! - [`sim`] holds a closed-loop simulated installation and in-memory helpers
//!   used by the CLI `simulate`/`replay` commands and by tests.
//! - With the `hardware` feature, [`rpi`] drives real GPIO lines through
//!   `rppal` and samples an MCP3008 converter over SPI.
pub mod error;
pub mod sim;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod rpi;

pub use error::HwError;
