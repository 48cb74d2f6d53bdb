//! SFU media engine interface.

use std::rc::Rc;

use derive_more::Display;
use futures::{future::LocalBoxFuture, stream::LocalBoxStream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracerr::Traced;

use crate::{
    platform::{IceConnectionState, MediaKind, MediaTrack},
    signalling::ClientId,
};

/// Opaque ICE parameters of an SFU transport.
pub type IceParameters = Value;

/// Opaque DTLS parameters of an SFU transport.
pub type DtlsParameters = Value;

/// Direction of an [`SfuTransport`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TransportDirection {
    /// Transport carrying local producers.
    #[display(fmt = "send")]
    Send,

    /// Transport carrying remote consumers.
    #[display(fmt = "recv")]
    Recv,
}

/// Logical source of a produced or consumed track.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaSource {
    Mic,
    Webcam,
    ScreenVideo,
    ScreenAudio,
}

impl MediaSource {
    /// Indicates whether this [`MediaSource`] belongs to a screen capture.
    pub fn is_screen(self) -> bool {
        matches!(self, Self::ScreenVideo | Self::ScreenAudio)
    }

    /// Returns [`MediaKind`] of tracks of this [`MediaSource`].
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Mic | Self::ScreenAudio => MediaKind::Audio,
            Self::Webcam | Self::ScreenVideo => MediaKind::Video,
        }
    }
}

/// Parameters of a transport created on the SFU.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOptions {
    /// ID of the transport on the SFU.
    pub id: String,

    /// ICE parameters of the SFU side.
    pub ice_parameters: IceParameters,

    /// ICE candidates of the SFU side.
    pub ice_candidates: Value,

    /// DTLS parameters of the SFU side.
    pub dtls_parameters: DtlsParameters,
}

/// Application data attached to producers and consumers.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    /// Client owning the produced track. Absent for local producers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,

    /// Source of the track.
    pub source: MediaSource,
}

/// Parameters of a new local producer.
#[derive(Clone, Debug, PartialEq)]
pub struct ProducerOptions {
    /// Track to produce.
    pub track: MediaTrack,

    /// Source of the track.
    pub source: MediaSource,

    /// Start the producer paused.
    pub paused: bool,
}

/// Parameters of a consumer announced by the SFU.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerOptions {
    /// ID of the consumer on the SFU.
    pub id: String,

    /// ID of the remote producer this consumer receives.
    pub producer_id: String,

    /// Kind of the consumed track.
    pub kind: MediaKind,

    /// RTP parameters of the consumer.
    pub rtp_parameters: Value,

    /// Owner and source of the consumed track.
    pub app_data: AppData,
}

/// Errors of the SFU media engine.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum SfuError {
    /// Engine rejected the operation.
    #[display(fmt = "SFU engine error: {}", _0)]
    Engine(String),

    /// Signalling round trip of a transport failed.
    #[display(fmt = "SFU signalling failed: {}", _0)]
    Signalling(String),

    /// Object is already closed.
    #[display(fmt = "SFU object is closed")]
    Closed,
}

/// Shortcut for results of SFU media engine operations.
pub type Result<T> = std::result::Result<T, Traced<SfuError>>;

/// Signalling round trips an [`SfuTransport`] requires from the client.
pub trait TransportHandler {
    /// Delivers local DTLS parameters of the transport to the SFU.
    fn connect(
        &self,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Registers a new producer on the SFU returning its ID.
    fn produce(
        &self,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> LocalBoxFuture<'static, Result<String>>;
}

/// Device loaded with the SFU router capabilities.
pub trait SfuDevice {
    /// Indicates whether [`SfuDevice::load`] succeeded already.
    fn is_loaded(&self) -> bool;

    /// Loads the SFU router RTP capabilities.
    fn load(
        &self,
        router_rtp_capabilities: Value,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Returns local RTP capabilities. Meaningful once loaded.
    fn rtp_capabilities(&self) -> Value;

    /// Creates local side of the provided SFU transport.
    fn create_transport(
        &self,
        direction: TransportDirection,
        options: TransportOptions,
        handler: Rc<dyn TransportHandler>,
    ) -> Result<Rc<dyn SfuTransport>>;
}

/// Creator of [`SfuDevice`]s, one per SFU session.
pub trait SfuDeviceFactory {
    /// Creates new unloaded [`SfuDevice`].
    fn create(&self) -> Rc<dyn SfuDevice>;
}

/// Local side of a transport to the SFU.
pub trait SfuTransport {
    /// ID of this transport on the SFU.
    fn id(&self) -> String;

    /// Direction of this transport.
    fn direction(&self) -> TransportDirection;

    /// Current connection state of this transport.
    fn connection_state(&self) -> IceConnectionState;

    /// Subscribes to the connection state changes of this transport.
    fn on_connection_state_change(
        &self,
    ) -> LocalBoxStream<'static, IceConnectionState>;

    /// Starts producing the provided track.
    fn produce(
        &self,
        options: ProducerOptions,
    ) -> LocalBoxFuture<'static, Result<Rc<dyn SfuProducer>>>;

    /// Starts consuming the provided remote producer.
    fn consume(
        &self,
        options: ConsumerOptions,
    ) -> LocalBoxFuture<'static, Result<Rc<dyn SfuConsumer>>>;

    /// Applies fresh ICE parameters of the SFU side.
    fn restart_ice(
        &self,
        ice_parameters: IceParameters,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Closes this transport with all its producers and consumers.
    fn close(&self);
}

/// Local track sent to the SFU.
pub trait SfuProducer {
    /// ID of this producer on the SFU.
    fn id(&self) -> String;

    /// Currently produced track.
    fn track(&self) -> Option<MediaTrack>;

    /// Swaps produced track without renegotiation.
    fn replace_track(
        &self,
        track: Option<MediaTrack>,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Stops sending media without closing this producer.
    fn pause(&self);

    /// Resumes sending media.
    fn resume(&self);

    /// Closes this producer.
    fn close(&self);
}

/// Remote track received from the SFU.
pub trait SfuConsumer {
    /// ID of this consumer on the SFU.
    fn id(&self) -> String;

    /// Received track.
    fn track(&self) -> MediaTrack;

    /// Closes this consumer.
    fn close(&self);
}
