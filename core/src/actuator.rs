//! Phase-sequence actuator for 4-coil steppers (28BYJ-48 + ULN2003 class).
//!
//! An actuator owns one output handle per coil. Bounded moves (`step`) run on
//! the caller's thread; continuous and oscillating motion run on a single
//! background worker that is cancelled cooperatively and joined on stop.
//!
//! Start, stop, step admission and cleanup are serialized by one state mutex.
//! The worker itself never takes that mutex: it polls a cancellation token
//! once per tick, so stop latency is bounded by one `step_delay`.

use crate::config::{ActuatorConfig, COIL_COUNT};
use crate::delay::{self, DelaySource, StdDelay};
use crate::gpio::{self, CoilPin, PinProvider, SimulatedGpio};
use crate::sequence::{self, Direction, HALF_STEP};
use crate::{PuppetError, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{OutputPin, PinState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Half-steps per output-shaft revolution of a geared 28BYJ-48
pub const DEFAULT_STEPS_PER_REV: u32 = 4096;

/// Convert an output-shaft angle to a half-step count.
///
/// The sign of `degrees` is ignored; halves round to even.
pub fn angle_to_steps(degrees: f64, steps_per_rev: u32) -> u64 {
    (degrees.abs() * f64::from(steps_per_rev) / 360.0).round_ties_even() as u64
}

/// Common surface of the robot's motion drivers
#[cfg_attr(test, mockall::automock)]
pub trait Actuator: Send + Sync {
    /// Label used in logs
    fn name(&self) -> String;

    /// Move a bounded number of half-steps, blocking until done.
    /// Negative `steps` invert `direction`.
    fn step(&self, steps: i64, direction: Direction) -> Result<()>;

    /// Rotate in the background until stopped. No-op if already moving.
    fn start_continuous(&self, direction: Direction) -> Result<()>;

    /// Swing back and forth by `swing_degrees` in the background until stopped.
    fn start_oscillating(
        &self,
        swing_degrees: f64,
        steps_per_rev: u32,
        start_direction: Direction,
    ) -> Result<()>;

    /// Stop background motion. No-op if idle.
    fn stop_continuous(&self);

    fn is_running(&self) -> bool;

    /// Stop, de-energize and release the coils. Safe to call repeatedly.
    fn cleanup(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Motion {
    Continuous { direction: Direction },
    Oscillate { swing_steps: u64, direction: Direction },
}

#[derive(Clone, Debug, Default)]
struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Coil outputs of one actuator, shared with its motion worker
struct CoilBank {
    pins: Mutex<Vec<CoilPin>>,
}

impl CoilBank {
    fn lock(&self) -> MutexGuard<'_, Vec<CoilPin>> {
        self.pins.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_lock(&self) -> Option<MutexGuard<'_, Vec<CoilPin>>> {
        match self.pins.try_lock() {
            Ok(pins) => Some(pins),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Drive every coil; all pins are attempted, the first failure is returned
    fn write_all(pins: &mut [CoilPin], levels: &[bool; COIL_COUNT]) -> Result<()> {
        let mut outcome = Ok(());
        for (pin, on) in pins.iter_mut().zip(levels.iter()) {
            if let Err(e) = pin.set_state(PinState::from(*on)) {
                if outcome.is_ok() {
                    outcome = Err(e);
                }
            }
        }
        outcome
    }

    fn apply(&self, levels: &[bool; COIL_COUNT]) -> Result<()> {
        Self::write_all(&mut self.lock(), levels)
    }

    fn deenergize(&self) -> Result<()> {
        self.apply(&[false; COIL_COUNT])
    }

    /// De-energize without waiting on a writer that may be wedged
    fn try_deenergize(&self) -> Option<Result<()>> {
        let mut pins = self.try_lock()?;
        Some(Self::write_all(&mut pins, &[false; COIL_COUNT]))
    }

    /// Drop every handle, giving the pins back to the driver
    fn release(&self) {
        self.lock().clear();
    }

    /// Release without waiting; false when a writer holds the coils
    fn try_release(&self) -> bool {
        match self.try_lock() {
            Some(mut pins) => {
                pins.clear();
                true
            }
            None => false,
        }
    }
}

struct Worker {
    cancel: CancelToken,
    // Disconnects when the worker thread exits, after coils are de-energized
    done: Receiver<()>,
    handle: JoinHandle<()>,
    motion: Motion,
}

#[derive(Default)]
struct MotionState {
    worker: Option<Worker>,
    stepping: bool,
    released: bool,
}

/// Stepper driven through the half-step coil table
pub struct PhaseActuator {
    cfg: ActuatorConfig,
    backend: &'static str,
    coils: Arc<CoilBank>,
    delay: Arc<dyn DelaySource>,
    phase: Arc<AtomicUsize>,
    state: Mutex<MotionState>,
}

impl std::fmt::Debug for PhaseActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseActuator")
            .field("name", &self.cfg.name)
            .field("pins", &self.cfg.coil_pins)
            .field("backend", &self.backend)
            .field("phase", &self.phase_index())
            .finish()
    }
}

impl PhaseActuator {
    /// Build an actuator on the platform GPIO driver, or in simulation when
    /// `config.enabled` is false.
    pub fn create(config: ActuatorConfig) -> Result<Self> {
        config.validate()?;
        if !config.enabled {
            return Self::build(config, &SimulatedGpio, Arc::new(StdDelay));
        }
        let gpio = gpio::open_platform()?;
        Self::build(config, gpio.as_ref(), Arc::new(StdDelay))
    }

    /// Build an actuator on an explicit pin provider and delay source.
    ///
    /// `config.enabled == false` always selects the simulation backend; the
    /// provider is not touched in that case.
    pub fn with_provider<D>(
        config: ActuatorConfig,
        provider: &dyn PinProvider,
        delay: D,
    ) -> Result<Self>
    where
        D: DelayNs + Clone + Send + Sync + 'static,
    {
        config.validate()?;
        let delay: Arc<dyn DelaySource> = Arc::new(delay);
        if config.enabled {
            Self::build(config, provider, delay)
        } else {
            Self::build(config, &SimulatedGpio, delay)
        }
    }

    fn build(
        config: ActuatorConfig,
        provider: &dyn PinProvider,
        delay: Arc<dyn DelaySource>,
    ) -> Result<Self> {
        let mut pins: Vec<CoilPin> = Vec::with_capacity(COIL_COUNT);
        for &pin in &config.coil_pins {
            match provider.acquire(pin) {
                Ok(handle) => pins.push(handle),
                Err(e) => {
                    // Handles acquired so far go back to the driver as `pins` drops
                    debug!(target: "actuator", actuator = %config.name, pin, released = pins.len(), "Pin claim failed; rolling back");
                    return Err(e);
                }
            }
        }

        if config.enabled {
            info!(target: "actuator", actuator = %config.name, pins = ?config.coil_pins, backend = provider.backend(), "Actuator initialized");
        } else {
            info!(target: "actuator", actuator = %config.name, pins = ?config.coil_pins, "(sim) Actuator initialized");
        }

        Ok(Self {
            backend: provider.backend(),
            coils: Arc::new(CoilBank {
                pins: Mutex::new(pins),
            }),
            delay,
            phase: Arc::new(AtomicUsize::new(0)),
            state: Mutex::new(MotionState::default()),
            cfg: config,
        })
    }

    pub fn name(&self) -> &str {
        &self.cfg.name
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.cfg
    }

    pub fn is_simulated(&self) -> bool {
        !self.cfg.enabled
    }

    /// Row of the half-step table the motion worker will drive next
    pub fn phase_index(&self) -> usize {
        self.phase.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.lock_state()
            .worker
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    fn lock_state(&self) -> MutexGuard<'_, MotionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join a worker that already exited on its own (it can only do so by panicking)
    fn reap_finished(&self, state: &mut MotionState) {
        if state.worker.as_ref().is_some_and(|w| w.handle.is_finished()) {
            if let Some(worker) = state.worker.take() {
                self.retire(worker);
            }
        }
    }

    /// Move `steps` half-steps, blocking for `|steps| * step_delay`.
    ///
    /// Returns `Busy` while background motion is active or another bounded
    /// move is in progress.
    pub fn step(&self, steps: i64, direction: Direction) -> Result<()> {
        if steps == 0 {
            return Ok(());
        }

        {
            let mut state = self.lock_state();
            if state.released {
                return Err(PuppetError::Released(self.cfg.name.clone()));
            }
            self.reap_finished(&mut state);
            if state.worker.is_some() {
                return Err(PuppetError::Busy(format!(
                    "{}: stop continuous motion before stepping",
                    self.cfg.name
                )));
            }
            if state.stepping {
                return Err(PuppetError::Busy(format!(
                    "{}: another step is in progress",
                    self.cfg.name
                )));
            }
            state.stepping = true;
        }
        let _admission = StepAdmission { state: &self.state };

        let (count, direction) = if steps < 0 {
            (steps.unsigned_abs(), direction.inverted())
        } else {
            (steps as u64, direction)
        };
        debug!(target: "actuator", actuator = %self.cfg.name, steps = count, ?direction, simulated = !self.cfg.enabled, "Stepping");

        let sign = direction.sign();
        let mut delay = self.delay.handle();
        let mut outcome = Ok(());
        for i in 0..count {
            let idx = (i % HALF_STEP.len() as u64) as i64 * sign;
            if let Err(e) = self.coils.apply(sequence::row(idx)) {
                outcome = Err(e);
                break;
            }
            delay::pause(&mut *delay, self.cfg.step_delay);
        }

        let off = self.coils.deenergize();
        if let Err(ref e) = off {
            error!(target: "actuator", actuator = %self.cfg.name, error = %e, "Failed to de-energize coils after stepping");
        }
        outcome.and(off)
    }

    /// Rotate in `direction` on a background worker until stopped.
    pub fn start_continuous(&self, direction: Direction) -> Result<()> {
        self.start_motion(Motion::Continuous { direction })
    }

    /// Swing `swing_degrees` one way, then back, repeating until stopped.
    ///
    /// A swing that rounds to zero half-steps is a no-op.
    pub fn start_oscillating(
        &self,
        swing_degrees: f64,
        steps_per_rev: u32,
        start_direction: Direction,
    ) -> Result<()> {
        let swing_steps = angle_to_steps(swing_degrees, steps_per_rev);
        if swing_steps == 0 {
            debug!(target: "actuator", actuator = %self.cfg.name, swing_degrees, "Swing rounds to zero steps; not oscillating");
            return Ok(());
        }
        self.start_motion(Motion::Oscillate {
            swing_steps,
            direction: start_direction,
        })
    }

    fn start_motion(&self, motion: Motion) -> Result<()> {
        let mut state = self.lock_state();
        if state.released {
            return Err(PuppetError::Released(self.cfg.name.clone()));
        }
        self.reap_finished(&mut state);
        if let Some(active) = state.worker.as_ref() {
            debug!(target: "actuator", actuator = %self.cfg.name, active = ?active.motion, requested = ?motion, "Already moving; start ignored");
            return Ok(());
        }
        if state.stepping {
            return Err(PuppetError::Busy(format!(
                "{}: a step is in progress",
                self.cfg.name
            )));
        }

        let cancel = CancelToken::default();
        let (done_tx, done_rx) = channel::bounded::<()>(1);
        let worker = MotionWorker {
            name: self.cfg.name.clone(),
            coils: Arc::clone(&self.coils),
            delay: self.delay.handle(),
            phase: Arc::clone(&self.phase),
            step_delay: self.cfg.step_delay,
            cancel: cancel.clone(),
            motion,
            _done: done_tx,
        };
        let handle = std::thread::Builder::new()
            .name(format!("{}-motion", self.cfg.name))
            .spawn(move || worker.run())?;

        if self.cfg.enabled {
            info!(target: "actuator", actuator = %self.cfg.name, ?motion, "Motion started");
        } else {
            info!(target: "actuator", actuator = %self.cfg.name, ?motion, "(sim) Motion started");
        }

        state.worker = Some(Worker {
            cancel,
            done: done_rx,
            handle,
            motion,
        });
        Ok(())
    }

    /// Stop background motion and wait (bounded by `stop_timeout`) for the
    /// worker to de-energize the coils. No-op if idle.
    pub fn stop_continuous(&self) {
        let mut state = self.lock_state();
        let Some(worker) = state.worker.take() else {
            return;
        };
        self.retire(worker);
        info!(target: "actuator", actuator = %self.cfg.name, "Motion stopped");
    }

    /// Cancel and join `worker`, waiting at most `stop_timeout`.
    ///
    /// Returns false when the worker was detached instead of joined; it may
    /// still hold the coil lock in that case.
    fn retire(&self, worker: Worker) -> bool {
        worker.cancel.cancel();
        match worker.done.recv_timeout(self.cfg.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!(target: "actuator", actuator = %self.cfg.name, "Motion worker panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    target: "actuator",
                    actuator = %self.cfg.name,
                    timeout_ms = self.cfg.stop_timeout.as_millis() as u64,
                    "Motion worker did not stop in time; detaching it"
                );
                drop(worker.handle);
                match self.coils.try_deenergize() {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        error!(target: "actuator", actuator = %self.cfg.name, error = %e, "Forced de-energize failed")
                    }
                    None => {
                        error!(target: "actuator", actuator = %self.cfg.name, "Coils held by detached worker; could not force de-energize")
                    }
                }
                false
            }
        }
    }

    /// Stop motion, de-energize and release every coil handle.
    ///
    /// Only this actuator's pins are touched; other actuators on the same
    /// GPIO driver keep running.
    pub fn cleanup(&self) {
        let mut state = self.lock_state();
        if state.released {
            return;
        }
        let joined = match state.worker.take() {
            Some(worker) => self.retire(worker),
            None => true,
        };
        state.released = true;

        if joined {
            if let Err(e) = self.coils.deenergize() {
                error!(target: "actuator", actuator = %self.cfg.name, error = %e, "Failed to de-energize coils during cleanup");
            }
            self.coils.release();
        } else if !self.coils.try_release() {
            // retire already tried to force the coils low
            error!(target: "actuator", actuator = %self.cfg.name, "Coils held by detached worker; pins are released when it exits");
        }
        info!(target: "actuator", actuator = %self.cfg.name, "Actuator cleaned up");
    }
}

impl Drop for PhaseActuator {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl Actuator for PhaseActuator {
    fn name(&self) -> String {
        self.cfg.name.clone()
    }

    fn step(&self, steps: i64, direction: Direction) -> Result<()> {
        PhaseActuator::step(self, steps, direction)
    }

    fn start_continuous(&self, direction: Direction) -> Result<()> {
        PhaseActuator::start_continuous(self, direction)
    }

    fn start_oscillating(
        &self,
        swing_degrees: f64,
        steps_per_rev: u32,
        start_direction: Direction,
    ) -> Result<()> {
        PhaseActuator::start_oscillating(self, swing_degrees, steps_per_rev, start_direction)
    }

    fn stop_continuous(&self) {
        PhaseActuator::stop_continuous(self)
    }

    fn is_running(&self) -> bool {
        PhaseActuator::is_running(self)
    }

    fn cleanup(&self) {
        PhaseActuator::cleanup(self)
    }
}

/// Clears the `stepping` flag when a bounded move ends, including by panic
struct StepAdmission<'a> {
    state: &'a Mutex<MotionState>,
}

impl Drop for StepAdmission<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .stepping = false;
    }
}

struct MotionWorker {
    name: String,
    coils: Arc<CoilBank>,
    delay: Box<dyn DelayNs + Send>,
    phase: Arc<AtomicUsize>,
    step_delay: Duration,
    cancel: CancelToken,
    motion: Motion,
    _done: Sender<()>,
}

impl MotionWorker {
    fn run(mut self) {
        let _off = DeenergizeOnExit {
            name: &self.name,
            coils: self.coils.as_ref(),
        };

        let (mut direction, swing_steps) = match self.motion {
            Motion::Continuous { direction } => (direction, None),
            Motion::Oscillate {
                swing_steps,
                direction,
            } => (direction, Some(swing_steps)),
        };
        let mut taken = 0u64;
        let mut failing = false;

        while !self.cancel.is_cancelled() {
            let idx = self.phase.load(Ordering::Relaxed);
            match self.coils.apply(&HALF_STEP[idx]) {
                Ok(()) if failing => {
                    failing = false;
                    info!(target: "actuator", actuator = %self.name, "Coil writes recovered");
                }
                Ok(()) => {}
                Err(e) if !failing => {
                    failing = true;
                    warn!(target: "actuator", actuator = %self.name, error = %e, "Coil write failed; continuing");
                }
                Err(e) => {
                    debug!(target: "actuator", actuator = %self.name, error = %e, "Coil write still failing");
                }
            }

            delay::pause(&mut *self.delay, self.step_delay);

            let next = (idx as i64 + direction.sign()).rem_euclid(HALF_STEP.len() as i64);
            self.phase.store(next as usize, Ordering::Relaxed);

            if let Some(swing) = swing_steps {
                taken += 1;
                if taken >= swing {
                    taken = 0;
                    direction = direction.inverted();
                }
            }
        }
    }
}

/// Turns the coils off when the worker exits, whether normally or by unwinding
struct DeenergizeOnExit<'a> {
    name: &'a str,
    coils: &'a CoilBank,
}

impl Drop for DeenergizeOnExit<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.coils.deenergize() {
            error!(target: "actuator", actuator = %self.name, error = %e, "Failed to de-energize coils on worker exit; current may still be flowing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_angle_to_steps_full_turn() {
        assert_eq!(angle_to_steps(360.0, DEFAULT_STEPS_PER_REV), 4096);
        assert_eq!(angle_to_steps(720.0, DEFAULT_STEPS_PER_REV), 8192);
        assert_eq!(angle_to_steps(0.0, DEFAULT_STEPS_PER_REV), 0);
    }

    #[test]
    fn test_angle_to_steps_ignores_sign() {
        let expected = (30.0_f64 * 4096.0 / 360.0).round() as u64;
        assert_eq!(angle_to_steps(-30.0, 4096), expected);
        assert_eq!(angle_to_steps(30.0, 4096), expected);
        assert_eq!(expected, 341);
    }

    #[test]
    fn test_angle_to_steps_rounds_halves_to_even() {
        // 1.5 and 2.5 half-steps
        assert_eq!(angle_to_steps(67.5, 8), 2);
        assert_eq!(angle_to_steps(112.5, 8), 2);
        assert_eq!(angle_to_steps(1.0, 4096), 11);
    }

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::default();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
