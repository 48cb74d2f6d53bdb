//! Signalling channel data contracts: inbound [`SignalingEvent`]s and
//! outbound [`SignalingMessage`]s.

use std::time::Duration;

use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::platform::{IceCandidate, IceServer};

/// ID of a room participant.
#[derive(
    Clone,
    Debug,
    Deserialize,
    Display,
    Eq,
    From,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
)]
#[serde(transparent)]
pub struct ClientId(pub String);

impl ClientId {
    /// Indicates whether this [`ClientId`] is empty, so identifies nobody.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ClientId {
    #[inline]
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Room participant as reported by the signalling server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Client {
    /// ID of this participant.
    pub id: ClientId,

    /// ID of the device this participant joined from.
    ///
    /// Survives the participant's reconnects.
    pub device_id: String,

    /// Whether the participant sends audio.
    pub is_audio_enabled: bool,

    /// Whether the participant sends video.
    pub is_video_enabled: bool,

    /// IDs of the streams the participant sends. The camera stream goes
    /// first, any other one is a screen share.
    pub streams: Vec<String>,

    /// Whether the server waits for this participant to reconnect before
    /// reporting it as left.
    pub is_pending_to_leave: bool,

    /// Whether the existing connection to this participant survived the
    /// signalling reconnect and must be kept as is.
    pub merge_with_old_client_state: bool,
}

impl Client {
    /// Creates new [`Client`] sending audio and video from its camera stream.
    pub fn new<I: Into<ClientId>, D: Into<String>>(id: I, device_id: D) -> Self {
        Self {
            id: id.into(),
            device_id: device_id.into(),
            is_audio_enabled: true,
            is_video_enabled: true,
            streams: vec!["0".to_owned()],
            is_pending_to_leave: false,
            merge_with_old_client_state: false,
        }
    }

    /// Indicates whether this [`Client`] shares its screen.
    #[inline]
    pub fn is_screenshare_enabled(&self) -> bool {
        self.streams.len() > 1
    }
}

/// SFU node a room is served by.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SfuServer {
    /// URL of the SFU control channel.
    pub url: Url,
}

/// Snapshot of a room the client joined.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Room {
    /// Name of the room.
    pub name: String,

    /// Participants of the room, the local one included.
    pub clients: Vec<Client>,

    /// SFU the room is served by. `None` for P2P rooms.
    pub sfu_server: Option<SfuServer>,

    /// Remote clients pending to leave which are held back from
    /// [`Room::clients`] until their leave is confirmed or retracted.
    ///
    /// Connections to them stay as they are. Always empty in snapshots sent
    /// by the server.
    pub held_back: Vec<ClientId>,
}

/// Events received from the signalling channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignalingEvent {
    /// Signalling connection established.
    Connected,

    /// Signalling connection lost.
    Disconnected,

    /// Room joined (or re-joined after a reconnect).
    RoomJoined {
        /// ID assigned to the local client.
        self_id: ClientId,

        /// Joined room. `None` if joining failed.
        room: Option<Room>,

        /// Time the server waits for a disconnected client before reporting
        /// it as left.
        disconnect_timeout: Duration,

        /// Reason of the join failure.
        error: Option<String>,
    },

    /// New participant joined.
    NewClient(Client),

    /// Participant left.
    ClientLeft { client_id: ClientId },

    /// Participant lost its signalling connection and may come back.
    PendingClientLeft { client_id: ClientId },

    /// Participant toggled its audio.
    AudioEnabled {
        client_id: ClientId,
        is_audio_enabled: bool,
    },

    /// Participant toggled its video.
    VideoEnabled {
        client_id: ClientId,
        is_video_enabled: bool,
    },

    /// Participant started sharing its screen.
    ScreenshareStarted {
        client_id: ClientId,
        stream_id: String,
    },

    /// Participant stopped sharing its screen.
    ScreenshareStopped {
        client_id: ClientId,
        stream_id: String,
    },

    /// SDP offer from a participant.
    SdpOffer { client_id: ClientId, sdp: String },

    /// SDP answer from a participant.
    SdpAnswer { client_id: ClientId, sdp: String },

    /// ICE candidate from a participant.
    IceCandidate {
        client_id: ClientId,
        candidate: IceCandidate,
    },

    /// Participant gathered all its ICE candidates.
    IceEndOfCandidates { client_id: ClientId },

    /// Participant is ready to receive an SDP offer from the local client.
    ReadyToReceiveOffer { client_id: ClientId },

    /// Refreshed media server configuration.
    MediaServerConfig { ice_servers: Vec<IceServer> },
}

impl SignalingEvent {
    /// Returns ID of the remote participant this [`SignalingEvent`] is about.
    pub fn client_id(&self) -> Option<&ClientId> {
        match self {
            Self::NewClient(client) => Some(&client.id),
            Self::ClientLeft { client_id }
            | Self::PendingClientLeft { client_id }
            | Self::AudioEnabled { client_id, .. }
            | Self::VideoEnabled { client_id, .. }
            | Self::ScreenshareStarted { client_id, .. }
            | Self::ScreenshareStopped { client_id, .. }
            | Self::SdpOffer { client_id, .. }
            | Self::SdpAnswer { client_id, .. }
            | Self::IceCandidate { client_id, .. }
            | Self::IceEndOfCandidates { client_id }
            | Self::ReadyToReceiveOffer { client_id } => Some(client_id),
            Self::Connected
            | Self::Disconnected
            | Self::RoomJoined { .. }
            | Self::MediaServerConfig { .. } => None,
        }
    }
}

/// Messages sent to a remote participant over the signalling channel.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SignalingMessage {
    /// Asks the receiver to send an SDP offer.
    ReadyToReceiveOffer { receiver_id: ClientId },

    /// SDP offer to the receiver.
    SdpOffer { receiver_id: ClientId, sdp: String },

    /// SDP answer to the receiver.
    SdpAnswer { receiver_id: ClientId, sdp: String },

    /// Local ICE candidate for the receiver.
    IceCandidate {
        receiver_id: ClientId,
        candidate: IceCandidate,
    },

    /// All local ICE candidates were gathered.
    IceEndOfCandidates { receiver_id: ClientId },
}

impl SignalingMessage {
    /// Returns ID of the receiver of this [`SignalingMessage`].
    pub fn receiver_id(&self) -> &ClientId {
        match self {
            Self::ReadyToReceiveOffer { receiver_id }
            | Self::SdpOffer { receiver_id, .. }
            | Self::SdpAnswer { receiver_id, .. }
            | Self::IceCandidate { receiver_id, .. }
            | Self::IceEndOfCandidates { receiver_id } => receiver_id,
        }
    }
}

/// Outbound side of the signalling channel.
#[cfg_attr(test, mockall::automock)]
pub trait SignalingChannel {
    /// Sends the provided [`SignalingMessage`].
    fn send(&self, msg: SignalingMessage);
}

#[cfg(test)]
impl_debug_by_struct_name!(MockSignalingChannel);
