//! Maps `Box<dyn Error>` from trait boundaries to typed `DiverterError`.
//!
//! The traits in `diverter_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `diverter_hardware::HwError` downcasting.

use crate::error::DiverterError;

/// Map a trait-boundary error to a typed `DiverterError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> DiverterError {
    #[cfg(feature = "hardware-errors")]
    {
        use diverter_hardware::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::InvalidPin(_) | HwError::InvalidChannel(_) => {
                    DiverterError::Config(hw.to_string())
                }
                other => DiverterError::HardwareFault(other.to_string()),
            };
        }
    }

    DiverterError::Hardware(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_errors_map_to_hardware() {
        let e = std::io::Error::other("bus glitch");
        assert!(matches!(map_hw_error(&e), DiverterError::Hardware(s) if s == "bus glitch"));
    }

    #[cfg(feature = "hardware-errors")]
    #[test]
    fn typed_hardware_errors_are_recognised() {
        use diverter_hardware::HwError;
        let e = HwError::InvalidPin(99);
        assert!(matches!(map_hw_error(&e), DiverterError::Config(_)));
        let e = HwError::Spi("no device".into());
        assert!(matches!(map_hw_error(&e), DiverterError::HardwareFault(_)));
    }
}
