//! Capability seams between the diverter engine and the outside world.
//!
//! The engine never touches ADC registers or output pins directly; it pulls
//! raw sample sets from a [`SampleSource`] and drives loads and relays through
//! [`DigitalOutputs`]. Active-low/active-high wiring is a property of the
//! implementation, not of the engine.

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

/// Full-scale value of the 10-bit converter the engine is calibrated for.
pub const ADC_FULL_SCALE: u16 = 1023;

/// Nominal mid-scale reading of a biased AC channel.
pub const ADC_MID_SCALE: u16 = 512;

/// One raw reading per monitored channel, taken within the same sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSet {
    pub voltage: u16,
    pub grid: u16,
    pub diverted: u16,
}

impl SampleSet {
    pub const fn new(voltage: u16, grid: u16, diverted: u16) -> Self {
        Self {
            voltage,
            grid,
            diverted,
        }
    }

    /// All three channels at mid-scale (no signal).
    pub const fn idle() -> Self {
        Self::new(ADC_MID_SCALE, ADC_MID_SCALE, ADC_MID_SCALE)
    }
}

/// Producer of raw sample sets.
///
/// `Ok(None)` means the source is exhausted (end of a recorded trace or of a
/// bounded simulation); a live converter never returns it.
pub trait SampleSource {
    fn read_set(&mut self) -> Result<Option<SampleSet>, Box<dyn std::error::Error + Send + Sync>>;
}

/// Drive lines for loads and relays, addressed by output id (pin number).
pub trait DigitalOutputs {
    fn set_on(&mut self, id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
    fn set_off(&mut self, id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    fn set_state(
        &mut self,
        id: u8,
        on: bool,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if on { self.set_on(id) } else { self.set_off(id) }
    }
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn read_set(&mut self) -> Result<Option<SampleSet>, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read_set()
    }
}

impl<T: DigitalOutputs + ?Sized> DigitalOutputs for Box<T> {
    fn set_on(&mut self, id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_on(id)
    }
    fn set_off(&mut self, id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_off(id)
    }
}
