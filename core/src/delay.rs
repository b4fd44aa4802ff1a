//! Inter-step timing on embedded-hal's `DelayNs`.

use embedded_hal::delay::DelayNs;
use std::time::Duration;

/// Blocks the calling thread with `std::thread::sleep`
#[derive(Clone, Copy, Debug, Default)]
pub struct StdDelay;

impl DelayNs for StdDelay {
    fn delay_ns(&mut self, ns: u32) {
        if ns > 0 {
            std::thread::sleep(Duration::from_nanos(u64::from(ns)));
        }
    }
}

/// Hands out one `DelayNs` handle per thread that drives the motor
pub trait DelaySource: Send + Sync {
    fn handle(&self) -> Box<dyn DelayNs + Send>;
}

impl<D> DelaySource for D
where
    D: DelayNs + Clone + Send + Sync + 'static,
{
    fn handle(&self) -> Box<dyn DelayNs + Send> {
        Box::new(self.clone())
    }
}

/// Wait for `duration`, split into `delay_ns` calls that fit a `u32`
pub(crate) fn pause<D: DelayNs + ?Sized>(delay: &mut D, duration: Duration) {
    let mut remaining = duration.as_nanos();
    while remaining > 0 {
        let chunk = remaining.min(u128::from(u32::MAX)) as u32;
        delay.delay_ns(chunk);
        remaining -= u128::from(chunk);
    }
}
