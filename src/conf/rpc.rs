//! SFU control channel settings.

use std::{borrow::Cow, time::Duration};

use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// SFU control channel settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Rpc {
    /// Base of the request timeout. Defaults to `1500ms`.
    #[default(Duration::from_millis(1500))]
    #[serde(with = "humantime_serde")]
    pub request_timeout_base: Duration,

    /// Constant factor of the request timeout. Defaults to `15`.
    #[default(15.0)]
    pub request_timeout_factor: f64,

    /// Request timeout growth per each outstanding request. Defaults to `0.1`.
    #[default(0.1)]
    pub request_timeout_per_outstanding: f64,

    /// Sub-protocol the SFU control connection is established with.
    /// Defaults to `sfu-control#v1`.
    #[default("sfu-control#v1")]
    pub sub_protocol: Cow<'static, str>,

    /// Delay before the first reconnection attempt. Defaults to `1s`.
    #[default(Duration::from_secs(1))]
    #[serde(with = "humantime_serde")]
    pub reconnect_initial_delay: Duration,

    /// Multiplier of the delay between consecutive reconnection attempts.
    /// Defaults to `2.0`.
    #[default(2.0)]
    pub reconnect_multiplier: f64,

    /// Upper bound of the delay between reconnection attempts.
    /// Defaults to `60s`.
    #[default(Duration::from_secs(60))]
    #[serde(with = "humantime_serde")]
    pub reconnect_max_delay: Duration,
}

impl Rpc {
    /// Calculates timeout of a request sent while `outstanding` other requests
    /// are awaiting their responses.
    ///
    /// Timeout grows with the load, so the channel throttles itself instead of
    /// spuriously failing many parallel requests.
    pub fn request_timeout(&self, outstanding: usize) -> Duration {
        #[allow(clippy::cast_precision_loss)]
        let factor = self.request_timeout_factor
            + self.request_timeout_per_outstanding * outstanding as f64;
        self.request_timeout_base.mul_f64(factor.max(0.0))
    }
}
