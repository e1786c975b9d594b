//! Test and helper mocks for diverter_core

use diverter_traits::{DigitalOutputs, SampleSet, SampleSource};

/// Outputs that accept every write and drive nothing; useful for headless
/// replays where only the telemetry matters.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOutputs;

impl DigitalOutputs for NullOutputs {
    fn set_on(&mut self, _id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }

    fn set_off(&mut self, _id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Outputs whose every write fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingOutputs;

impl DigitalOutputs for FailingOutputs {
    fn set_on(&mut self, id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other(format!("output {id} stuck"))))
    }

    fn set_off(&mut self, id: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other(format!("output {id} stuck"))))
    }
}

/// A source that yields `ok` idle sample sets and then errors on every read.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingSource {
    pub ok: usize,
}

impl SampleSource for FailingSource {
    fn read_set(&mut self) -> Result<Option<SampleSet>, Box<dyn std::error::Error + Send + Sync>> {
        if self.ok == 0 {
            return Err(Box::new(std::io::Error::other("converter not responding")));
        }
        self.ok -= 1;
        Ok(Some(SampleSet::idle()))
    }
}
