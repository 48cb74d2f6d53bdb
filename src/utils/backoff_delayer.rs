//! Delayer which increases delay time by provided multiplier on every delay
//! call.

use std::time::Duration;

use crate::platform;

/// Delayer which increases delay time by provided multiplier on every delay
/// call.
///
/// Delay time increasing will be stopped when [`BackoffDelayer::max_delay`]
/// of `current_delay` will be reached. First delay will be
/// [`BackoffDelayer::current_delay`].
#[derive(Debug)]
pub struct BackoffDelayer {
    /// Delay of next [`BackoffDelayer::delay`] call.
    ///
    /// Will be increased by [`BackoffDelayer::delay`] call.
    current_delay: Duration,

    /// Delay of the very first [`BackoffDelayer::delay`] call, restored on
    /// [`BackoffDelayer::reset`].
    initial_delay: Duration,

    /// Max delay for which this [`BackoffDelayer`] may delay.
    max_delay: Duration,

    /// The multiplier by which [`BackoffDelayer::current_delay`] will be
    /// multiplied on [`BackoffDelayer::delay`] call.
    multiplier: f64,
}

impl BackoffDelayer {
    /// Returns new [`BackoffDelayer`].
    pub fn new(
        starting_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Self {
        Self {
            current_delay: starting_delay,
            initial_delay: starting_delay,
            max_delay,
            multiplier: multiplier.max(0.0),
        }
    }

    /// Returns [`Duration`] for a next delay.
    pub fn get_delay(&mut self) -> Duration {
        if self.is_max_delay_reached() {
            self.max_delay
        } else {
            let delay = self.current_delay;
            self.current_delay = self.current_delay.mul_f64(self.multiplier);
            delay
        }
    }

    /// Restarts delays from the initial one.
    pub fn reset(&mut self) {
        self.current_delay = self.initial_delay;
    }

    /// Returns `true` when max delay ([`BackoffDelayer::max_delay`]) is
    /// reached.
    fn is_max_delay_reached(&self) -> bool {
        self.current_delay >= self.max_delay
    }

    /// Resolves after [`BackoffDelayer::current_delay`] delay.
    ///
    /// Next call of this function will delay
    /// [`BackoffDelayer::current_delay`] * [`BackoffDelayer::multiplier`].
    pub async fn delay(&mut self) {
        let delay = self.get_delay();
        platform::delay_for(delay).await;
    }
}
