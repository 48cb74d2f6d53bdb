//! Media statistics provider interface.

use derive_more::Display;
use futures::future::LocalBoxFuture;
use tracerr::Traced;

use crate::{platform::MediaKind, signalling::ClientId};

/// Direction of a measured track.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrackDirection {
    /// Track sent by the local client.
    Outbound,

    /// Track received from a remote client.
    Inbound,
}

/// Bitrate snapshots of a single RTP stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TrackStats {
    /// Kind of the measured track.
    pub kind: MediaKind,

    /// Direction of the measured track.
    pub direction: TrackDirection,

    /// SSRC of the RTP stream.
    pub ssrc: u32,

    /// Recent bitrate samples (in bps), oldest first.
    pub bitrate_samples: Vec<u64>,
}

/// Statistics of all the RTP streams exchanged with a remote client.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ClientStats {
    pub tracks: Vec<TrackStats>,
}

impl ClientStats {
    /// Indicates whether any [`TrackStats`] of the provided `kind` has at
    /// least `min_samples` samples exceeding `min_bitrate`.
    pub fn is_kind_active(
        &self,
        kind: MediaKind,
        min_bitrate: u64,
        min_samples: usize,
    ) -> bool {
        self.tracks.iter().filter(|t| t.kind == kind).any(|t| {
            t.bitrate_samples.iter().filter(|b| **b > min_bitrate).count()
                >= min_samples.max(1)
        })
    }

    /// Indicates whether any track is active in terms of
    /// [`ClientStats::is_kind_active`].
    pub fn is_any_active(&self, min_bitrate: u64, min_samples: usize) -> bool {
        self.is_kind_active(MediaKind::Audio, min_bitrate, min_samples)
            || self.is_kind_active(MediaKind::Video, min_bitrate, min_samples)
    }
}

/// Errors of a [`StatsProvider`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum StatsError {
    /// No statistics are collected for the requested client.
    #[display(fmt = "No statistics for client {}", _0)]
    UnknownClient(ClientId),

    /// Statistics collection failed.
    #[display(fmt = "Failed to collect statistics: {}", _0)]
    Collect(String),
}

/// Source of media statistics snapshots.
#[cfg_attr(test, mockall::automock)]
pub trait StatsProvider {
    /// Returns the latest statistics of media exchanged with the provided
    /// client.
    fn client_stats(
        &self,
        client_id: ClientId,
    ) -> LocalBoxFuture<'static, Result<ClientStats, Traced<StatsError>>>;

    /// Releases the statistics collection connection. It's re-established on
    /// the next [`StatsProvider::client_stats`] call.
    fn release(&self);
}

#[cfg(test)]
impl_debug_by_struct_name!(MockStatsProvider);
