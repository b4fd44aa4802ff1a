use crate::{PuppetError, Result};
use std::collections::HashSet;
use std::time::Duration;

/// Number of coil inputs on a ULN2003 driver board (IN1..IN4)
pub const COIL_COUNT: usize = 4;

/// Configuration for a single phase-sequence actuator
#[derive(Clone, Debug)]
pub struct ActuatorConfig {
    /// Label used in logs (useful with several motors on one robot)
    pub name: String,
    /// BCM pin numbers in IN1..IN4 order
    pub coil_pins: Vec<u32>,
    /// Hold time per half-step; larger is slower
    pub step_delay: Duration,
    /// When false no pin is driven but all timing is preserved
    pub enabled: bool,
    /// Upper bound on waiting for the motion worker to wind down
    pub stop_timeout: Duration,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            name: "stepper".to_string(),
            coil_pins: vec![17, 27, 22, 23],
            step_delay: Duration::from_millis(2),
            enabled: true,
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl ActuatorConfig {
    pub fn new(name: impl Into<String>, coil_pins: impl Into<Vec<u32>>) -> Self {
        Self {
            name: name.into(),
            coil_pins: coil_pins.into(),
            ..Default::default()
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.coil_pins.len() != COIL_COUNT {
            return Err(PuppetError::InvalidConfiguration(format!(
                "{}: expected {} coil pins in IN1..IN4 order, got {}",
                self.name,
                COIL_COUNT,
                self.coil_pins.len()
            )));
        }
        let distinct: HashSet<u32> = self.coil_pins.iter().copied().collect();
        if distinct.len() != self.coil_pins.len() {
            return Err(PuppetError::InvalidConfiguration(format!(
                "{}: coil pins must be distinct, got {:?}",
                self.name, self.coil_pins
            )));
        }
        if self.step_delay.is_zero() {
            return Err(PuppetError::InvalidConfiguration(format!(
                "{}: step_delay must be greater than zero",
                self.name
            )));
        }
        if self.stop_timeout.is_zero() {
            return Err(PuppetError::InvalidConfiguration(format!(
                "{}: stop_timeout must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ActuatorConfig::default().validate().is_ok());
    }

    #[test]
    fn test_wrong_pin_count_rejected() {
        let cfg = ActuatorConfig::new("mouth", vec![17, 27, 22]);
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, PuppetError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("got 3"));

        let cfg = ActuatorConfig::new("mouth", vec![17, 27, 22, 23, 24]);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_duplicate_pins_rejected() {
        let cfg = ActuatorConfig::new("head", vec![5, 6, 6, 19]);
        assert!(matches!(
            cfg.validate(),
            Err(PuppetError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_zero_delays_rejected() {
        let cfg = ActuatorConfig::default().with_step_delay(Duration::ZERO);
        assert!(matches!(
            cfg.validate(),
            Err(PuppetError::InvalidConfiguration(_))
        ));

        let cfg = ActuatorConfig {
            stop_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }
}
