//! Media connection managers reacting to signalling events: the P2P one
//! keeping a [`Session`] per remote client, and the SFU one keeping a
//! transport pair to a single SFU node.
//!
//! [`Session`]: crate::peer::Session

mod dispatcher;
pub mod p2p;
pub mod sfu;

use std::rc::Rc;

use async_trait::async_trait;
use derive_more::{Display, From};
use futures::stream::LocalBoxStream;

use crate::{
    conf::Conf,
    peer::ConnectionStatus,
    platform::{
        LocalStream, MediaKind, MediaTrack, PeerConnectionFactory,
        RpcTransportFactory, SdpMunger, SfuDeviceFactory, SfuError,
        StatsProvider,
    },
    rpc::RpcClientError,
    signalling::{ClientId, SignalingChannel, SignalingEvent},
};

#[doc(inline)]
pub use self::{
    dispatcher::RtcManagerDispatcher, p2p::P2pRtcManager, sfu::SfuRtcManager,
};

/// Platform collaborators and settings the [`RtcManager`]s are built with.
#[derive(Clone)]
pub struct Dependencies {
    /// Client configuration.
    pub conf: Rc<Conf>,

    /// Outbound side of the signalling channel.
    pub signaling: Rc<dyn SignalingChannel>,

    /// Creator of P2P peer connections.
    pub peer_connections: Rc<dyn PeerConnectionFactory>,

    /// SDP post-processor.
    pub sdp: Rc<dyn SdpMunger>,

    /// Source of media statistics.
    pub stats: Rc<dyn StatsProvider>,

    /// Creator of SFU media engine devices.
    pub sfu_devices: Rc<dyn SfuDeviceFactory>,

    /// Connector of the SFU control channel.
    pub rpc_transports: Rc<RpcTransportFactory>,
}

/// Errors of [`RtcManager`]s.
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum RtcManagerError {
    /// Local client ID is empty.
    #[display(fmt = "RtcManager cannot be created without client ID")]
    #[from(ignore)]
    MissingClientId,

    /// SFU control channel failed.
    #[display(fmt = "SFU RPC failed: {}", _0)]
    Rpc(RpcClientError),

    /// SFU media engine failed.
    #[display(fmt = "{}", _0)]
    Sfu(SfuError),

    /// SFU answered with unexpected data.
    #[display(fmt = "Malformed SFU response: {}", _0)]
    #[from(ignore)]
    BadResponse(String),

    /// SFU transports are not created yet.
    #[display(fmt = "SFU session is not ready")]
    #[from(ignore)]
    NotReady,
}

/// Events of [`RtcManager`]s and the [`RtcManagerDispatcher`].
#[derive(Clone, Debug, PartialEq)]
pub enum RtcManagerEvent {
    /// New [`RtcManager`] was installed.
    ManagerCreated {
        /// Whether the new manager works through an SFU.
        is_sfu: bool,
    },

    /// Current [`RtcManager`] was torn down.
    ManagerDestroyed,

    /// Remote track of an accepted stream is ready for the application.
    StreamAdded {
        client_id: ClientId,
        stream_id: String,
        track: MediaTrack,
    },

    /// Remote stream went away.
    StreamRemoved {
        client_id: ClientId,
        stream_id: String,
    },

    /// Connection to a remote client changed its status.
    ConnectionStatusChanged {
        client_id: ClientId,
        status: ConnectionStatus,
    },

    /// No candidate reachable from outside of the local network was
    /// gathered for the connection to a remote client.
    ConnectionBlockedByNetwork { client_id: ClientId },
}

/// Uniform contract of the P2P and SFU media connection managers.
#[async_trait(?Send)]
pub trait RtcManager {
    /// Indicates whether this [`RtcManager`] serves the provided room as the
    /// provided local client.
    fn is_initialized_with(
        &self,
        self_id: &ClientId,
        room_name: &str,
        is_sfu: bool,
    ) -> bool;

    /// Indicates whether a media connection to the provided remote client
    /// exists.
    fn has_connection(&self, client_id: &ClientId) -> bool;

    /// Subscribes to [`RtcManagerEvent`]s of this [`RtcManager`].
    fn subscribe(&self) -> LocalBoxStream<'static, RtcManagerEvent>;

    /// Reacts to the provided reconciled [`SignalingEvent`].
    async fn handle_signaling_event(&self, event: SignalingEvent);

    /// Accepts the provided stream of a remote client, connecting to it if
    /// needed.
    async fn accept_new_stream(&self, client_id: ClientId, stream_id: String);

    /// Starts sending the provided [`LocalStream`] (or replaces tracks of the
    /// camera one).
    async fn add_local_stream(&self, stream: LocalStream);

    /// Stops sending the [`LocalStream`] with the provided ID.
    async fn remove_local_stream(&self, stream_id: &str);

    /// Enables or disables sending of local media of the provided kind.
    async fn set_media_enabled(&self, kind: MediaKind, enabled: bool);

    /// Recomputes and applies the target video bandwidth.
    fn update_bandwidth(&self);

    /// Tears down the connection to the provided remote client.
    fn disconnect(&self, client_id: &ClientId);

    /// Tears down all the connections and timers of this [`RtcManager`].
    fn disconnect_all(&self);
}
