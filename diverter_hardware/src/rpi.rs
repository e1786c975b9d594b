//! Raspberry Pi drivers: GPIO load/relay lines and an MCP3008 converter.
use std::collections::HashMap;

use rppal::gpio::{Gpio, OutputPin};
use rppal::spi::{Bus, Mode, SlaveSelect, Spi};
use tracing::{debug, trace};

use diverter_traits::{DigitalOutputs, SampleSet, SampleSource};

use crate::error::{HwError, Result};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// GPIO output lines, all driven low (off) at construction.
pub struct GpioOutputs {
    pins: HashMap<u8, OutputPin>,
    active_low: bool,
}

impl GpioOutputs {
    pub fn new(pins: &[u8], active_low: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut out = HashMap::with_capacity(pins.len());
        for &pin in pins {
            let mut line = gpio
                .get(pin)
                .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?
                .into_output();
            if active_low {
                line.set_high();
            } else {
                line.set_low();
            }
            out.insert(pin, line);
        }
        debug!(count = out.len(), active_low, "gpio outputs ready");
        Ok(Self {
            pins: out,
            active_low,
        })
    }

    fn drive(&mut self, id: u8, on: bool) -> Result<()> {
        let line = self.pins.get_mut(&id).ok_or(HwError::InvalidPin(id))?;
        if on != self.active_low {
            line.set_high();
        } else {
            line.set_low();
        }
        Ok(())
    }
}

impl DigitalOutputs for GpioOutputs {
    fn set_on(&mut self, id: u8) -> std::result::Result<(), BoxError> {
        self.drive(id, true).map_err(Into::into)
    }
    fn set_off(&mut self, id: u8) -> std::result::Result<(), BoxError> {
        self.drive(id, false).map_err(Into::into)
    }
}

/// Three-channel sampler on an MCP3008 (10-bit, single-ended).
pub struct Mcp3008Source {
    spi: Spi,
    channels: [u8; 3],
}

impl Mcp3008Source {
    /// `channels` are the converter inputs for voltage, grid CT and diverted CT.
    pub fn new(clock_hz: u32, channels: [u8; 3]) -> Result<Self> {
        if let Some(&ch) = channels.iter().find(|&&c| c > 7) {
            return Err(HwError::InvalidChannel(ch));
        }
        let spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, clock_hz, Mode::Mode0)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        Ok(Self { spi, channels })
    }

    fn read_channel(&mut self, ch: u8) -> Result<u16> {
        // start bit, single-ended + channel, clock out 10 bits
        let tx = [0x01, (0x08 | ch) << 4, 0x00];
        let mut rx = [0u8; 3];
        self.spi
            .transfer(&mut rx, &tx)
            .map_err(|e| HwError::Spi(e.to_string()))?;
        Ok((u16::from(rx[1] & 0x03) << 8) | u16::from(rx[2]))
    }
}

impl SampleSource for Mcp3008Source {
    fn read_set(&mut self) -> std::result::Result<Option<SampleSet>, BoxError> {
        let [v, g, d] = self.channels;
        let set = SampleSet {
            voltage: self.read_channel(v)?,
            grid: self.read_channel(g)?,
            diverted: self.read_channel(d)?,
        };
        trace!(?set, "mcp3008 sample set");
        Ok(Some(set))
    }
}
