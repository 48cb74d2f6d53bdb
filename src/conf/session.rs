//! P2P session settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// P2P session settings.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Session {
    /// Bandwidth cap (in kbps) applied once the connection turns out to be
    /// relayed and no explicit cap was requested. Defaults to `1000`.
    #[default(1000)]
    pub relay_bandwidth_kbps: u32,

    /// Minimal interval between two reverse offer requests sent to the same
    /// peer. Defaults to `10s`.
    #[default(Duration::from_secs(10))]
    #[serde(with = "humantime_serde")]
    pub reverse_offer_cooldown: Duration,

    /// Delay after which a `disconnected` connection is ICE-restarted if it
    /// didn't recover. Defaults to `2s`.
    #[default(Duration::from_secs(2))]
    #[serde(with = "humantime_serde")]
    pub ice_restart_delay: Duration,

    /// Grace window before releasing the statistics connection once the last
    /// peer is gone. Defaults to `60s`.
    #[default(Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub stats_release_delay: Duration,
}
