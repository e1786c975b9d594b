use thiserror::Error;

/// Runtime errors surfaced outside the sampling hot path.
#[derive(Debug, Error, Clone)]
pub enum DiverterError {
    /// Converter or output driver failure of unknown kind.
    #[error("hardware error: {0}")]
    Hardware(String),
    /// A recognised driver fault (SPI, GPIO, I/O).
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    /// A pin or converter channel the driver cannot use.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing output driver")]
    MissingOutputs,
    #[error("invalid diverter config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
