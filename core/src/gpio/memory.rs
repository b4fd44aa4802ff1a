//! In-memory GPIO bank.
//!
//! Records every write so callers can inspect exactly what an actuator would
//! have driven. Pins are claimed exclusively, like on real hardware, and
//! individual pins can be made to fail on write.

use super::{CoilPin, PinProvider};
use crate::{PuppetError, Result};
use embedded_hal::digital::{ErrorType, OutputPin};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One recorded output write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PinWrite {
    pub pin: u32,
    pub on: bool,
}

#[derive(Default)]
struct MemoryBank {
    claimed: HashSet<u32>,
    levels: HashMap<u32, bool>,
    writes: Vec<PinWrite>,
    failing: HashSet<u32>,
    acquires: usize,
}

/// Shared handle to an in-memory GPIO bank; clones observe the same pins
#[derive(Clone, Default)]
pub struct MemoryGpio {
    bank: Arc<Mutex<MemoryBank>>,
}

impl MemoryGpio {
    pub fn new() -> Self {
        Self::default()
    }

    fn bank(&self) -> MutexGuard<'_, MemoryBank> {
        self.bank.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All writes so far, oldest first
    pub fn writes(&self) -> Vec<PinWrite> {
        self.bank().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.bank().writes.len()
    }

    pub fn clear_writes(&self) {
        self.bank().writes.clear();
    }

    /// Current level of `pin`, `None` if it was never acquired
    pub fn level(&self, pin: u32) -> Option<bool> {
        self.bank().levels.get(&pin).copied()
    }

    /// True when every listed pin has been acquired at some point and is low
    pub fn all_low(&self, pins: &[u32]) -> bool {
        let bank = self.bank();
        pins.iter().all(|p| bank.levels.get(p) == Some(&false))
    }

    pub fn is_claimed(&self, pin: u32) -> bool {
        self.bank().claimed.contains(&pin)
    }

    pub fn acquire_count(&self) -> usize {
        self.bank().acquires
    }

    /// Make writes to `pin` fail (or succeed again)
    pub fn fail_writes(&self, pin: u32, failing: bool) {
        let mut bank = self.bank();
        if failing {
            bank.failing.insert(pin);
        } else {
            bank.failing.remove(&pin);
        }
    }
}

impl PinProvider for MemoryGpio {
    fn acquire(&self, pin: u32) -> Result<CoilPin> {
        let mut bank = self.bank();
        if !bank.claimed.insert(pin) {
            return Err(PuppetError::HardwareUnavailable(format!(
                "pin {} is already claimed",
                pin
            )));
        }
        bank.levels.insert(pin, false);
        bank.acquires += 1;
        Ok(Box::new(MemoryPin {
            pin,
            bank: Arc::clone(&self.bank),
        }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

struct MemoryPin {
    pin: u32,
    bank: Arc<Mutex<MemoryBank>>,
}

impl MemoryPin {
    fn bank(&self) -> MutexGuard<'_, MemoryBank> {
        self.bank.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&mut self, on: bool) -> Result<()> {
        let mut bank = self.bank();
        if bank.failing.contains(&self.pin) {
            return Err(PuppetError::Gpio {
                pin: self.pin,
                message: "injected write failure".into(),
            });
        }
        bank.levels.insert(self.pin, on);
        bank.writes.push(PinWrite { pin: self.pin, on });
        Ok(())
    }
}

impl ErrorType for MemoryPin {
    type Error = PuppetError;
}

impl OutputPin for MemoryPin {
    fn set_low(&mut self) -> Result<()> {
        self.write(false)
    }

    fn set_high(&mut self) -> Result<()> {
        self.write(true)
    }
}

impl Drop for MemoryPin {
    fn drop(&mut self) {
        let pin = self.pin;
        self.bank().claimed.remove(&pin);
    }
}
