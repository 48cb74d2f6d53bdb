//! Glitch-free reconnect settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Glitch-free reconnect settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Reconnect {
    /// Fraction of the server disconnect timeout, after which a rejoin is
    /// treated as a cold join. Defaults to `0.8`.
    #[default(0.8)]
    pub glitch_free_threshold: f64,

    /// Interval between media activity checks of a client pending to leave.
    /// Defaults to `500ms`.
    #[default(Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub pending_leave_poll_interval: Duration,

    /// Number of media activity checks of a client pending to leave.
    /// Defaults to `3`.
    #[default(3)]
    pub pending_leave_max_attempts: u32,

    /// Bitrate (in bps) which has to be exceeded for a track to be considered
    /// active. Defaults to `0`.
    #[default(0)]
    pub min_active_bitrate: u64,

    /// Number of samples exceeding [`Reconnect::min_active_bitrate`] required
    /// for a track to be considered active. Defaults to `1`.
    #[default(1)]
    pub min_active_samples: usize,
}
