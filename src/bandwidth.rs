//! Target video bitrate selection.

use crate::{conf::Features, platform::VideoSettings};

/// Bits per pixel used to estimate bitrate required by a capture resolution.
const BITS_PER_PIXEL: f64 = 0.08;

/// Bitrate multiplier applied when [`Features::bandwidth_multiplier`] is on.
const MULTIPLIER: f64 = 1.5;

/// Maximum peer count the table distinguishes.
const MAX_PEERS: usize = 7;

/// Pure policy mapping room topology to a target video bitrate (in kbps).
///
/// `0` means "unrestricted".
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BandwidthPolicy {
    premium: bool,
    unlimited_relay: bool,
    multiplier: bool,
    resolution_aware: bool,
}

impl BandwidthPolicy {
    /// Creates [`BandwidthPolicy`] configured by the provided [`Features`].
    pub fn new(features: &Features) -> Self {
        Self {
            premium: features.premium_bandwidth,
            unlimited_relay: features.unlimited_relay_bandwidth
                && features.use_only_turn,
            multiplier: features.bandwidth_multiplier,
            resolution_aware: features.resolution_aware_bandwidth,
        }
    }

    /// Returns target bitrate for a room where the local client is connected
    /// to `peer_count` remote peers, optionally narrowed down to what the
    /// `capture` resolution needs.
    pub fn target_kbps(
        self,
        peer_count: usize,
        capture: Option<VideoSettings>,
    ) -> u32 {
        if peer_count == 0 || self.unlimited_relay {
            return 0;
        }
        let mut kbps = self.table_kbps(peer_count);
        if self.resolution_aware {
            if let Some(estimate) = capture.map(estimate_kbps) {
                kbps = if kbps == 0 { estimate } else { kbps.min(estimate) };
            }
        }
        if self.multiplier && kbps != 0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let scaled = (f64::from(kbps) * MULTIPLIER).round() as u32;
            kbps = scaled;
        }
        kbps
    }

    /// Base table value for the provided `peer_count` (clamped to `1..=7`).
    fn table_kbps(self, peer_count: usize) -> u32 {
        match peer_count.min(MAX_PEERS).max(1) {
            1 => 0,
            2 if self.premium => 768,
            2 => 384,
            3 if self.premium => 512,
            3 => 256,
            4 => 192,
            5 => 160,
            6 => 128,
            _ => 64,
        }
    }
}

/// Estimates bitrate (in kbps) a capture of the provided parameters needs.
fn estimate_kbps(settings: VideoSettings) -> u32 {
    let pixels_per_second = f64::from(settings.width)
        * f64::from(settings.height)
        * f64::from(settings.frame_rate);
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let kbps = (pixels_per_second * BITS_PER_PIXEL / 1000.0).round() as u32;
    kbps.max(1)
}
