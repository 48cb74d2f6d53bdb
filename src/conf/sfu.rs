//! SFU transport settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// SFU transport settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Sfu {
    /// Delay before the first transport ICE restart. Defaults to `1s`.
    #[default(Duration::from_secs(1))]
    #[serde(with = "humantime_serde")]
    pub ice_restart_base_delay: Duration,

    /// Upper bound of the delay between transport ICE restarts.
    /// Defaults to `60s`.
    #[default(Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub ice_restart_max_delay: Duration,

    /// Maximum number of consecutive transport ICE restarts.
    /// Defaults to `6`.
    #[default(6)]
    pub ice_restart_max_retries: u32,
}

impl Sfu {
    /// Returns delay before the ICE restart attempt number `retry` (starting
    /// from `0`): `base * 2^retry`, capped at
    /// [`Sfu::ice_restart_max_delay`].
    pub fn ice_restart_delay(&self, retry: u32) -> Duration {
        let multiplier = 2_u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.ice_restart_base_delay
            .checked_mul(multiplier)
            .map_or(self.ice_restart_max_delay, |d| {
                d.min(self.ice_restart_max_delay)
            })
    }
}
