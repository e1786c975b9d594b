#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core diversion logic (hardware-agnostic).
//!
//! This crate provides the hardware-independent surplus-power diversion
//! engine. All hardware interactions go through `diverter_traits::SampleSource`
//! and `diverter_traits::DigitalOutputs`.
//!
//! ## Architecture
//!
//! - **Sampling context** (`core`): per sample set, the `sample` conditioner
//!   removes the DC offset, confirms zero crossings and accumulates power; the
//!   `bucket` integrates each mains cycle and predicts the next; the `dispatch`
//!   state machine switches resistive loads once per cycle.
//! - **Background context** (`background`): turns datalog snapshots into
//!   telemetry, runs the `relay` stage once per second and the idle policies.
//! - **Hand-off** (`shared`): single-writer atomic cells and a flag-qualified
//!   snapshot mailbox between the two contexts.
//! - **Construction** (`builder`, `conversions`): validated wiring from
//!   `diverter_config` files.
//!
//! ## Fixed-Point Arithmetic
//!
//! The sampling path is integer-only. Power is kept in integer energy units
//! (IEU); see `fixed_point` for how calibration maps onto them.

// Module declarations
pub mod background;
pub mod bucket;
pub mod builder;
pub mod config;
pub mod conversions;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod fixed_point;
pub mod hw_error;
pub mod mocks;
pub mod relay;
pub mod runner;
pub mod sample;
pub mod sampler;
pub mod shared;
pub mod util;

pub use diverter_config::{MAX_LOADS, MAX_RELAYS};

pub use crate::background::{Background, BackgroundReport, TelemetryReport};
pub use crate::bucket::EnergyBucket;
pub use crate::builder::{BoxedDiverter, BoxedOutputs, Diverter, DiverterBuilder, build_diverter};
pub use crate::config::{BackgroundConfig, CoreConfig, RelayConfig, RelaySpec, RotationPolicy};
pub use crate::core::{DiverterCore, TickReport};
pub use crate::dispatch::{DispatchDecision, LoadDispatcher};
pub use crate::error::{BuildError, DiverterError, Result};
pub use crate::relay::{PowerAverage, Relay, RelayEngine, RelayTransition};
pub use crate::runner::{RunSummary, run_lockstep, run_threaded};
pub use crate::sample::{Crossing, Polarity, SampleConditioner};
pub use crate::shared::{DatalogMailbox, DatalogSnapshot, SharedState};
