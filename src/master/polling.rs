use core::time::Duration;
use embedded_hal::delay::DelayNs;


/// bounded polling: a number of attempts separated by a fixed interval
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Polling {
    pub interval: Duration,
    pub attempts: u32,
}
impl Polling {
    pub const fn new(interval: Duration, attempts: u32) -> Self {
        Self {interval, attempts}
    }
    /// longest time spent polling, ignoring the time taken by the checks themselves
    pub fn bound(&self) -> Duration {
        self.interval.saturating_mul(self.attempts.saturating_sub(1))
    }
    /// sleep one interval
    pub fn pause(&self, delay: &mut impl DelayNs) {
        delay.delay_us(u32::try_from(self.interval.as_micros()).unwrap_or(u32::MAX));
    }
    /**
        call `check` on `context` until it returns a value, sleeping between attempts

        returns `Ok(None)` once all attempts are exhausted, the first error from `check` stops polling immediately. The context is passed explicitly so the delay can live in the same structure as what the check accesses.
    */
    pub fn until<S, T, E>(
        &self,
        delay: &mut impl DelayNs,
        context: &mut S,
        mut check: impl FnMut(&mut S) -> Result<Option<T>, E>,
        ) -> Result<Option<T>, E>
    {
        for attempt in 0 .. self.attempts {
            if attempt != 0
                {self.pause(delay)}
            if let Some(value) = check(context)?
                {return Ok(Some(value))}
        }
        Ok(None)
    }
}

/// [DelayNs] sleeping the current thread
#[cfg(feature = "std")]
#[derive(Copy, Clone, Debug, Default)]
pub struct SleepDelay;

#[cfg(feature = "std")]
impl DelayNs for SleepDelay {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns.into()));
    }
}
