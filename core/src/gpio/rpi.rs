//! Raspberry Pi GPIO through `rppal`.
//!
//! Pins are addressed by BCM number, as printed on Pi pinout charts. rppal
//! refuses a pin that is already held in this process and restores its
//! previous mode when the handle is dropped.

use super::{CoilPin, HalPin, PinProvider};
use crate::{PuppetError, Result};
use rppal::gpio::{Error as GpioError, Gpio};
use tracing::debug;

pub struct RppalGpio {
    gpio: Gpio,
}

impl RppalGpio {
    /// Open the Pi's GPIO peripheral
    pub fn open() -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| {
            PuppetError::HardwareUnavailable(format!(
                "Raspberry Pi GPIO unavailable ({}); run on a Pi or disable motors for simulation",
                e
            ))
        })?;
        Ok(Self { gpio })
    }
}

impl PinProvider for RppalGpio {
    fn acquire(&self, pin: u32) -> Result<CoilPin> {
        let bcm = u8::try_from(pin).map_err(|_| {
            PuppetError::HardwareUnavailable(format!("pin {} is not a BCM GPIO number", pin))
        })?;
        let output = self
            .gpio
            .get(bcm)
            .map_err(|e| acquire_error(pin, e))?
            .into_output_low();
        debug!(target: "gpio", pin, "Claimed output pin");
        Ok(Box::new(HalPin::new(pin, output)))
    }

    fn backend(&self) -> &'static str {
        "rppal"
    }
}

fn acquire_error(pin: u32, e: GpioError) -> PuppetError {
    match e {
        GpioError::PinUsed(_) => {
            PuppetError::HardwareUnavailable(format!("pin {} is already claimed", pin))
        }
        GpioError::PinNotAvailable(_) => PuppetError::HardwareUnavailable(format!(
            "pin {} is not available on this board",
            pin
        )),
        other => PuppetError::HardwareUnavailable(format!("pin {}: {}", pin, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_in_use_is_reported_as_claimed() {
        let err = acquire_error(17, GpioError::PinUsed(17));
        match err {
            PuppetError::HardwareUnavailable(msg) => assert!(msg.contains("already claimed")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(matches!(
            acquire_error(40, GpioError::PinNotAvailable(40)),
            PuppetError::HardwareUnavailable(_)
        ));
    }

    #[test]
    fn test_open_off_pi_is_hardware_unavailable() {
        // On a Pi this succeeds; anywhere else the error must be HardwareUnavailable
        if let Err(e) = RppalGpio::open() {
            assert!(matches!(e, PuppetError::HardwareUnavailable(_)));
        }
    }
}
