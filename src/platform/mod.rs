//! Interfaces of the platform-owned capabilities consumed by the client:
//! peer connections, SDP post-processing, media statistics, SFU media engine
//! and control channel transport.

pub mod peer_connection;
pub mod sdp;
pub mod sfu;
pub mod stats;
pub mod transport;
pub mod websocket;

use std::{future::Future, time::Duration};

pub use tokio::time::Instant;

#[doc(inline)]
pub use self::{
    peer_connection::{
        CandidateType, IceCandidate, IceConnectionState, IceServer, LocalStream,
        MediaKind, MediaTrack, OfferOptions, PeerConnectionError,
        PeerConnectionEvent, PeerConnectionFactory, RtcConfiguration,
        RtcPeerConnection, RtpSender, SdpType, SenderId, SignalingState,
        VideoSettings,
    },
    sdp::{PassThroughSdp, SdpMunger, SdpTransform, VideoCodec},
    sfu::{
        AppData, ConsumerOptions, DtlsParameters, IceParameters, MediaSource,
        ProducerOptions, SfuConsumer, SfuDevice, SfuDeviceFactory, SfuError,
        SfuProducer, SfuTransport, TransportDirection, TransportHandler,
        TransportOptions,
    },
    stats::{ClientStats, StatsError, StatsProvider, TrackDirection, TrackStats},
    transport::{
        CloseMsg, RpcTransport, RpcTransportFactory, TransportError,
        TransportState,
    },
    websocket::WebSocketRpcTransport,
};
#[cfg(test)]
pub use self::stats::MockStatsProvider;

/// Spawns the provided [`Future`] on the current thread's [`LocalSet`].
///
/// # Panics
///
/// If called outside of a [`LocalSet`] context.
///
/// [`LocalSet`]: tokio::task::LocalSet
#[inline]
pub fn spawn<F>(task: F)
where
    F: Future<Output = ()> + 'static,
{
    drop(tokio::task::spawn_local(task));
}

/// [`Future`] which resolves after the provided [`Duration`].
#[inline]
pub async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await;
}
