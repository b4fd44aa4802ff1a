// Puppet Core Library
// Phase-sequence stepper actuators for animating a talking robot

pub mod actuator;
pub mod config;
pub mod controller;
pub mod delay;
pub mod gpio;
pub mod sequence;

// Export core types
pub use actuator::{angle_to_steps, Actuator, PhaseActuator, DEFAULT_STEPS_PER_REV};
pub use config::{ActuatorConfig, COIL_COUNT};
pub use controller::{MotorController, MotorControllerConfig, TalkingStyle};
pub use delay::{DelaySource, StdDelay};
pub use gpio::{CoilPin, MemoryGpio, PinProvider, SimulatedGpio};
pub use sequence::{Direction, HALF_STEP};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PuppetError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("Actuator busy: {0}")]
    Busy(String),

    #[error("Actuator released: {0}")]
    Released(String),

    #[error("GPIO error on pin {pin}: {message}")]
    Gpio { pin: u32, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
pub type Result<T> = std::result::Result<T, PuppetError>;

impl embedded_hal::digital::Error for PuppetError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}
