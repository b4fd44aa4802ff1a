//! Robot-level motion: a mouth that moves while the robot talks and an
//! optional head that nods.

use crate::actuator::{Actuator, PhaseActuator, DEFAULT_STEPS_PER_REV};
use crate::config::ActuatorConfig;
use crate::delay::StdDelay;
use crate::gpio::{self, PinProvider, SimulatedGpio};
use crate::sequence::Direction;
use crate::Result;
use embedded_hal::delay::DelayNs;
use std::time::Duration;
use tracing::{debug, warn};

/// How the mouth moves while speech is playing
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum TalkingStyle {
    /// Rotate continuously forward
    #[default]
    Spin,
    /// Open and close by `swing_degrees` around the rest position
    Oscillate { swing_degrees: f64 },
}

#[derive(Clone, Debug)]
pub struct MotorControllerConfig {
    pub mouth: ActuatorConfig,
    /// None when the robot has no head motor wired yet
    pub head: Option<ActuatorConfig>,
    pub talking: TalkingStyle,
    /// Half-steps per nod in each direction
    pub nod_steps: u32,
}

impl Default for MotorControllerConfig {
    fn default() -> Self {
        Self {
            mouth: ActuatorConfig {
                name: "mouth".into(),
                coil_pins: vec![17, 27, 22, 23],
                step_delay: Duration::from_millis(3),
                enabled: false,
                ..Default::default()
            },
            head: Some(ActuatorConfig {
                name: "head".into(),
                coil_pins: vec![5, 6, 13, 19],
                step_delay: Duration::from_millis(4),
                enabled: false,
                ..Default::default()
            }),
            talking: TalkingStyle::Spin,
            nod_steps: 150,
        }
    }
}

impl MotorControllerConfig {
    /// Switch hardware I/O on or off for every motor
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.mouth.enabled = enabled;
        if let Some(head) = self.head.as_mut() {
            head.enabled = enabled;
        }
        self
    }

    pub fn any_enabled(&self) -> bool {
        self.mouth.enabled || self.head.as_ref().is_some_and(|h| h.enabled)
    }
}

pub struct MotorController {
    mouth: Box<dyn Actuator>,
    head: Option<Box<dyn Actuator>>,
    talking: TalkingStyle,
    nod_steps: u32,
}

impl MotorController {
    pub fn new(
        mouth: Box<dyn Actuator>,
        head: Option<Box<dyn Actuator>>,
        talking: TalkingStyle,
        nod_steps: u32,
    ) -> Self {
        Self {
            mouth,
            head,
            talking,
            nod_steps,
        }
    }

    /// Build both motors on the platform GPIO driver (simulation when disabled)
    pub fn from_config(cfg: MotorControllerConfig) -> Result<Self> {
        if cfg.any_enabled() {
            let gpio = gpio::open_platform()?;
            Self::with_provider(cfg, gpio.as_ref(), StdDelay)
        } else {
            Self::with_provider(cfg, &SimulatedGpio, StdDelay)
        }
    }

    pub fn with_provider<D>(
        cfg: MotorControllerConfig,
        provider: &dyn PinProvider,
        delay: D,
    ) -> Result<Self>
    where
        D: DelayNs + Clone + Send + Sync + 'static,
    {
        let mouth = PhaseActuator::with_provider(cfg.mouth, provider, delay.clone())?;
        let head = match cfg.head {
            Some(head_cfg) => Some(Box::new(PhaseActuator::with_provider(
                head_cfg, provider, delay,
            )?) as Box<dyn Actuator>),
            None => None,
        };
        Ok(Self::new(Box::new(mouth), head, cfg.talking, cfg.nod_steps))
    }

    pub fn has_head(&self) -> bool {
        self.head.is_some()
    }

    pub fn is_talking(&self) -> bool {
        self.mouth.is_running()
    }

    pub fn start_talking_motion(&self) -> Result<()> {
        match self.talking {
            TalkingStyle::Spin => self.mouth.start_continuous(Direction::Forward),
            TalkingStyle::Oscillate { swing_degrees } => self.mouth.start_oscillating(
                swing_degrees,
                DEFAULT_STEPS_PER_REV,
                Direction::Forward,
            ),
        }
    }

    pub fn stop_talking_motion(&self) {
        self.mouth.stop_continuous();
    }

    /// Move the mouth for as long as `speak` runs.
    ///
    /// A motor that fails to start is logged and speech goes ahead anyway; the
    /// mouth is stopped afterwards even if `speak` panics.
    pub fn speak_with<T>(&self, speak: impl FnOnce() -> T) -> T {
        if let Err(e) = self.start_talking_motion() {
            warn!(target: "motor_controller", mouth = %self.mouth.name(), error = %e, "Mouth motion failed to start");
        }
        let _stop = StopTalking { controller: self };
        speak()
    }

    /// Short back-and-forth nods; no-op without a head motor
    pub fn nod_head(&self, times: u32) -> Result<()> {
        let Some(head) = self.head.as_ref() else {
            debug!(target: "motor_controller", "No head motor; skipping nod");
            return Ok(());
        };
        let steps = i64::from(self.nod_steps);
        for _ in 0..times {
            head.step(steps, Direction::Forward)?;
            head.step(steps, Direction::Reverse)?;
        }
        Ok(())
    }

    pub fn cleanup(&self) {
        self.mouth.cleanup();
        if let Some(head) = self.head.as_ref() {
            head.cleanup();
        }
    }
}

struct StopTalking<'a> {
    controller: &'a MotorController,
}

impl Drop for StopTalking<'_> {
    fn drop(&mut self) {
        self.controller.stop_talking_motion();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::MockActuator;
    use crate::PuppetError;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn mouth_expecting_talk(style_oscillate: bool) -> MockActuator {
        let mut mouth = MockActuator::new();
        let mut seq = Sequence::new();
        if style_oscillate {
            mouth
                .expect_start_oscillating()
                .with(eq(30.0), eq(DEFAULT_STEPS_PER_REV), eq(Direction::Forward))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
        } else {
            mouth
                .expect_start_continuous()
                .with(eq(Direction::Forward))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
        }
        mouth
            .expect_stop_continuous()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        mouth
    }

    #[test]
    fn test_speak_with_spins_mouth_around_speech() {
        let ctl = MotorController::new(
            Box::new(mouth_expecting_talk(false)),
            None,
            TalkingStyle::Spin,
            150,
        );
        let out = ctl.speak_with(|| "spoken");
        assert_eq!(out, "spoken");
    }

    #[test]
    fn test_speak_with_oscillating_style() {
        let ctl = MotorController::new(
            Box::new(mouth_expecting_talk(true)),
            None,
            TalkingStyle::Oscillate {
                swing_degrees: 30.0,
            },
            150,
        );
        ctl.speak_with(|| ());
    }

    #[test]
    fn test_speak_with_survives_motor_start_failure() {
        let mut mouth = MockActuator::new();
        mouth
            .expect_start_continuous()
            .returning(|_| Err(PuppetError::Released("mouth".into())));
        mouth.expect_name().return_const("mouth".to_string());
        mouth.expect_stop_continuous().times(1).return_const(());

        let ctl = MotorController::new(Box::new(mouth), None, TalkingStyle::Spin, 150);
        assert_eq!(ctl.speak_with(|| 42), 42);
    }

    #[test]
    fn test_nod_head_steps_forward_then_back() {
        let mouth = MockActuator::new();
        let mut head = MockActuator::new();
        let mut seq = Sequence::new();
        for _ in 0..2 {
            head.expect_step()
                .with(eq(150i64), eq(Direction::Forward))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
            head.expect_step()
                .with(eq(150i64), eq(Direction::Reverse))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));
        }

        let ctl = MotorController::new(
            Box::new(mouth),
            Some(Box::new(head)),
            TalkingStyle::Spin,
            150,
        );
        ctl.nod_head(2).unwrap();
    }

    #[test]
    fn test_nod_head_without_head_is_noop() {
        let ctl = MotorController::new(Box::new(MockActuator::new()), None, TalkingStyle::Spin, 150);
        assert!(!ctl.has_head());
        assert!(ctl.nod_head(3).is_ok());
    }

    #[test]
    fn test_nod_head_propagates_busy() {
        let mut head = MockActuator::new();
        head.expect_step()
            .times(1)
            .returning(|_, _| Err(PuppetError::Busy("head".into())));
        let ctl = MotorController::new(
            Box::new(MockActuator::new()),
            Some(Box::new(head)),
            TalkingStyle::Spin,
            150,
        );
        assert!(matches!(ctl.nod_head(1), Err(PuppetError::Busy(_))));
    }

    #[test]
    fn test_cleanup_reaches_both_motors() {
        let mut mouth = MockActuator::new();
        mouth.expect_cleanup().times(1).return_const(());
        let mut head = MockActuator::new();
        head.expect_cleanup().times(1).return_const(());
        let ctl = MotorController::new(
            Box::new(mouth),
            Some(Box::new(head)),
            TalkingStyle::Spin,
            150,
        );
        ctl.cleanup();
    }

    #[test]
    fn test_default_config_is_simulated_mouth_and_head() {
        let cfg = MotorControllerConfig::default();
        assert!(!cfg.any_enabled());
        assert_eq!(cfg.mouth.coil_pins, vec![17, 27, 22, 23]);
        assert_eq!(cfg.head.as_ref().map(|h| h.coil_pins.clone()), Some(vec![5, 6, 13, 19]));
        assert!(cfg.clone().with_enabled(true).any_enabled());
    }

    #[test]
    fn test_from_config_simulated_builds_real_actuators() {
        let ctl = MotorController::from_config(MotorControllerConfig {
            mouth: ActuatorConfig {
                name: "mouth".into(),
                step_delay: Duration::from_millis(1),
                enabled: false,
                ..Default::default()
            },
            head: None,
            talking: TalkingStyle::Spin,
            nod_steps: 4,
        })
        .unwrap();
        ctl.start_talking_motion().unwrap();
        assert!(ctl.is_talking());
        ctl.stop_talking_motion();
        assert!(!ctl.is_talking());
        ctl.cleanup();
    }
}
