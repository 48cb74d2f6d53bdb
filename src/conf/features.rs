//! Behaviour toggles of the client.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use smart_default::SmartDefault;

/// Every recognized behaviour toggle of the client.
///
/// Validated once with [`Features::validate`] when [`Conf`] is loaded.
///
/// [`Conf`]: crate::conf::Conf
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize, SmartDefault)]
#[serde(default)]
pub struct Features {
    /// Asks the remote peer to become an offerer if a local offer cannot be
    /// created or applied.
    pub reverse_offer_on_failure: bool,

    /// Restricts ICE transport policy to relay candidates only.
    pub use_only_turn: bool,

    /// Prefers VP9 video codec.
    pub prefer_vp9: bool,

    /// Prefers AV1 video codec.
    pub prefer_av1: bool,

    /// Enables redundant audio encoding.
    pub use_red: bool,

    /// Overrides jitter buffer target of remote tracks (in milliseconds).
    pub jitter_buffer_target_ms: Option<u32>,

    /// Uses higher bandwidth tiers for small rooms.
    pub premium_bandwidth: bool,

    /// Lifts bandwidth restrictions for relay-only connections.
    pub unlimited_relay_bandwidth: bool,

    /// Scales computed bandwidth by `1.5`.
    pub bandwidth_multiplier: bool,

    /// Narrows bandwidth cap down to the one required by the local capture
    /// resolution.
    pub resolution_aware_bandwidth: bool,

    /// Applies a local offer only together with the remote answer.
    ///
    /// Required by engines failing to apply local offers with multiple video
    /// tracks before the remote side answered.
    pub defer_local_offer: bool,
}

/// Contradictory [`Features`] combination.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum FeaturesError {
    /// Both VP9 and AV1 codecs are preferred.
    #[display(fmt = "`prefer_vp9` and `prefer_av1` are mutually exclusive")]
    ConflictingCodecPreference,

    /// Jitter buffer target is out of the supported range.
    #[display(fmt = "`jitter_buffer_target_ms` must be within 0..=4000")]
    JitterBufferTargetOutOfRange,
}

impl Features {
    /// Maximum jitter buffer target engines accept.
    const MAX_JITTER_BUFFER_TARGET_MS: u32 = 4000;

    /// Checks that this [`Features`] combination is consistent.
    ///
    /// # Errors
    ///
    /// With [`FeaturesError`] describing the first found contradiction.
    pub fn validate(&self) -> Result<(), FeaturesError> {
        if self.prefer_vp9 && self.prefer_av1 {
            return Err(FeaturesError::ConflictingCodecPreference);
        }
        if matches!(
            self.jitter_buffer_target_ms,
            Some(ms) if ms > Self::MAX_JITTER_BUFFER_TARGET_MS
        ) {
            return Err(FeaturesError::JitterBufferTargetOutOfRange);
        }
        Ok(())
    }
}
