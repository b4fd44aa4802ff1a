//! No-op GPIO backend for development machines without actuators attached.

use super::{CoilPin, PinProvider};
use crate::{PuppetError, Result};
use embedded_hal::digital::{ErrorType, OutputPin};
use tracing::trace;

#[derive(Clone, Copy, Debug, Default)]
pub struct SimulatedGpio;

impl PinProvider for SimulatedGpio {
    fn acquire(&self, pin: u32) -> Result<CoilPin> {
        Ok(Box::new(SimulatedPin { pin }))
    }

    fn backend(&self) -> &'static str {
        "simulated"
    }
}

struct SimulatedPin {
    pin: u32,
}

impl ErrorType for SimulatedPin {
    type Error = PuppetError;
}

impl OutputPin for SimulatedPin {
    fn set_low(&mut self) -> Result<()> {
        trace!(target: "gpio", pin = self.pin, on = false, "(sim) set");
        Ok(())
    }

    fn set_high(&mut self) -> Result<()> {
        trace!(target: "gpio", pin = self.pin, on = true, "(sim) set");
        Ok(())
    }
}
