// GPIO output capability and its backends
//
// Coil handles are embedded-hal `OutputPin`s. `PinProvider` adds the one thing
// embedded-hal leaves to the platform: claiming a pin. Dropping a handle
// gives the pin back.

use crate::{PuppetError, Result};
use embedded_hal::digital::{ErrorType, OutputPin};

pub mod memory;
#[cfg(feature = "rpi")]
pub mod rpi;
pub mod sim;

pub use memory::{MemoryGpio, PinWrite};
#[cfg(feature = "rpi")]
pub use rpi::RppalGpio;
pub use sim::SimulatedGpio;

/// Output handle driving one coil input
pub type CoilPin = Box<dyn OutputPin<Error = PuppetError> + Send>;

/// Source of output pin handles (a platform GPIO driver or a stand-in)
pub trait PinProvider: Send + Sync {
    /// Claim `pin` as an output, initialized low.
    ///
    /// Fails with `HardwareUnavailable` when the driver is missing or the pin
    /// is already claimed.
    fn acquire(&self, pin: u32) -> Result<CoilPin>;

    /// Short backend name for logs (e.g. "rppal", "simulated")
    fn backend(&self) -> &'static str;
}

/// Open the board's GPIO driver
#[cfg(feature = "rpi")]
pub fn open_platform() -> Result<Box<dyn PinProvider>> {
    Ok(Box::new(RppalGpio::open()?))
}

#[cfg(not(feature = "rpi"))]
pub fn open_platform() -> Result<Box<dyn PinProvider>> {
    Err(PuppetError::HardwareUnavailable(
        "built without a GPIO driver; enable the `rpi` feature or disable motors for simulation"
            .into(),
    ))
}

/// Adapts any embedded-hal output so its errors name the pin
pub struct HalPin<P> {
    pin: u32,
    inner: P,
}

impl<P: OutputPin> HalPin<P> {
    pub fn new(pin: u32, inner: P) -> Self {
        Self { pin, inner }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }
}

fn gpio_error(pin: u32, e: impl embedded_hal::digital::Error) -> PuppetError {
    PuppetError::Gpio {
        pin,
        message: format!("{:?}", e),
    }
}

impl<P: OutputPin> ErrorType for HalPin<P> {
    type Error = PuppetError;
}

impl<P: OutputPin> OutputPin for HalPin<P> {
    fn set_low(&mut self) -> Result<()> {
        let pin = self.pin;
        self.inner.set_low().map_err(|e| gpio_error(pin, e))
    }

    fn set_high(&mut self) -> Result<()> {
        let pin = self.pin;
        self.inner.set_high().map_err(|e| gpio_error(pin, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_hal::digital::{ErrorKind, PinState};

    struct FlakyPin {
        fail: bool,
        high: bool,
    }

    impl ErrorType for FlakyPin {
        type Error = ErrorKind;
    }

    impl OutputPin for FlakyPin {
        fn set_low(&mut self) -> std::result::Result<(), ErrorKind> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            self.high = false;
            Ok(())
        }

        fn set_high(&mut self) -> std::result::Result<(), ErrorKind> {
            if self.fail {
                return Err(ErrorKind::Other);
            }
            self.high = true;
            Ok(())
        }
    }

    #[test]
    fn test_hal_pin_forwards_levels() {
        let mut pin = HalPin::new(
            4,
            FlakyPin {
                fail: false,
                high: false,
            },
        );
        pin.set_state(PinState::High).unwrap();
        assert!(pin.inner.high);
        pin.set_state(PinState::from(false)).unwrap();
        assert!(!pin.inner.high);
        assert_eq!(pin.pin(), 4);
    }

    #[test]
    fn test_hal_pin_errors_name_the_pin() {
        let mut pin: CoilPin = Box::new(HalPin::new(
            9,
            FlakyPin {
                fail: true,
                high: false,
            },
        ));
        assert!(matches!(pin.set_high(), Err(PuppetError::Gpio { pin: 9, .. })));
    }

    #[cfg(not(feature = "rpi"))]
    #[test]
    fn test_platform_without_driver_is_unavailable() {
        assert!(matches!(
            open_platform(),
            Err(PuppetError::HardwareUnavailable(_))
        ));
    }
}
