//! Peer connection engine interface.

use std::rc::Rc;

use derive_more::{Display, From};
use futures::{future::LocalBoxFuture, stream::LocalBoxStream};
use serde::{Deserialize, Serialize};
use tracerr::Traced;

/// Representation of [RTCSdpType].
///
/// [RTCSdpType]: https://w3.org/TR/webrtc/#dom-rtcsdptype
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdpType {
    /// [`offer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-offer
    Offer(String),

    /// [`answer` type][1] of SDP.
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcsdptype-answer
    Answer(String),
}

impl SdpType {
    /// Returns SDP text of this [`SdpType`].
    pub fn sdp(&self) -> &str {
        match self {
            Self::Offer(sdp) | Self::Answer(sdp) => sdp,
        }
    }
}

/// [RTCIceCandidate][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtcicecandidate-interface
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// [`candidate` field][2] of the discovered [RTCIceCandidate][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-candidate
    pub candidate: String,

    /// [`sdpMLineIndex` field][2] of the discovered [RTCIceCandidate][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmlineindex
    pub sdp_m_line_index: Option<u16>,

    /// [`sdpMid` field][2] of the discovered [RTCIceCandidate][1].
    ///
    /// [1]: https://w3.org/TR/webrtc/#dom-rtcicecandidate
    /// [2]: https://w3.org/TR/webrtc/#dom-rtcicecandidate-sdpmid
    pub sdp_mid: Option<String>,
}

/// [RTCSignalingState][1] of a peer connection.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtcsignalingstate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    HaveLocalPranswer,
    HaveRemotePranswer,
    Closed,
}

/// [RTCIceConnectionState][1] of a peer connection.
///
/// [1]: https://w3.org/TR/webrtc/#dom-rtciceconnectionstate
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IceConnectionState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

/// Type of an ICE candidate (or of the selected candidate pair's local side).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CandidateType {
    /// Host candidate.
    Host,

    /// Server reflexive candidate (discovered via STUN).
    ServerReflexive,

    /// Peer reflexive candidate.
    PeerReflexive,

    /// Relayed candidate (allocated on a TURN server).
    Relay,
}

impl CandidateType {
    /// Parses [`CandidateType`] from its SDP token (`typ` attribute value).
    pub fn from_sdp_token(token: &str) -> Option<Self> {
        match token {
            "host" => Some(Self::Host),
            "srflx" => Some(Self::ServerReflexive),
            "prflx" => Some(Self::PeerReflexive),
            "relay" => Some(Self::Relay),
            _ => None,
        }
    }
}

/// Kind of a media track.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Handle to a local or remote media track owned by the media engine.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct MediaTrack {
    /// Engine-assigned unique ID of this track.
    pub id: String,

    /// Kind of this track.
    pub kind: MediaKind,

    /// Capture resolution and frame rate of a video track, if known.
    pub settings: Option<VideoSettings>,
}

impl MediaTrack {
    /// Creates new [`MediaTrack`] without known video settings.
    pub fn new<S: Into<String>>(id: S, kind: MediaKind) -> Self {
        Self {
            id: id.into(),
            kind,
            settings: None,
        }
    }
}

/// Actual capture parameters of a video track.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Set of local tracks sent together.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LocalStream {
    /// ID of this stream. Camera stream is always `0`.
    pub id: String,

    /// Tracks of this stream.
    pub tracks: Vec<MediaTrack>,
}

impl LocalStream {
    /// ID of the camera/microphone stream.
    pub const CAMERA_STREAM_ID: &'static str = "0";

    /// Indicates whether this [`LocalStream`] is a camera/microphone one
    /// rather than a screen capture.
    pub fn is_camera(&self) -> bool {
        self.id == Self::CAMERA_STREAM_ID
    }

    /// Returns the first video track of this [`LocalStream`].
    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind == MediaKind::Video)
    }
}

/// ID of an [`RtpSender`] assigned by the engine.
#[derive(Clone, Copy, Debug, Display, Eq, From, Hash, PartialEq)]
pub struct SenderId(pub u32);

/// [RTCRtpSender][1] snapshot.
///
/// [1]: https://w3.org/TR/webrtc/#rtcrtpsender-interface
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RtpSender {
    /// ID of this sender.
    pub id: SenderId,

    /// Kind of media this sender sends.
    pub kind: MediaKind,

    /// Track currently attached to this sender.
    pub track: Option<MediaTrack>,
}

/// Options of an SDP offer creation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OfferOptions {
    /// Gather fresh ICE credentials.
    pub ice_restart: bool,
}

/// [RTCIceServer][1] representation.
///
/// [1]: https://w3.org/TR/webrtc/#rtciceserver-dictionary
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct IceServer {
    /// URLs of this server.
    pub urls: Vec<String>,

    /// Username for authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Credential for authentication.
    #[serde(default)]
    pub credential: Option<String>,
}

/// Configuration a peer connection is created with.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RtcConfiguration {
    /// ICE servers to gather candidates from.
    pub ice_servers: Vec<IceServer>,

    /// Gather relay candidates only.
    pub relay_only: bool,

    /// Jitter buffer target of remote tracks (in milliseconds).
    pub jitter_buffer_target_ms: Option<u32>,
}

/// Events emitted by a peer connection engine.
#[derive(Clone, Debug, PartialEq)]
pub enum PeerConnectionEvent {
    /// New local ICE candidate discovered. `None` means the end of
    /// candidates.
    IceCandidate(Option<IceCandidate>),

    /// [`IceConnectionState`] changed.
    IceConnectionStateChanged(IceConnectionState),

    /// [`SignalingState`] changed.
    SignalingStateChanged(SignalingState),

    /// Local tracks changed in a way requiring renegotiation.
    NegotiationNeeded,

    /// Remote track received.
    RemoteTrack {
        /// Received track.
        track: MediaTrack,

        /// ID of the remote stream this track belongs to.
        stream_id: String,
    },
}

/// Errors that may occur while operating a peer connection.
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum PeerConnectionError {
    /// Peer connection cannot be created.
    #[display(fmt = "Failed to create peer connection: {}", _0)]
    Create(String),

    /// SDP offer cannot be created.
    #[display(fmt = "Failed to create SDP offer: {}", _0)]
    CreateOffer(String),

    /// SDP answer cannot be created.
    #[display(fmt = "Failed to create SDP answer: {}", _0)]
    CreateAnswer(String),

    /// Local description cannot be applied.
    #[display(fmt = "Failed to set local SDP description: {}", _0)]
    SetLocalDescription(String),

    /// Remote description cannot be applied.
    #[display(fmt = "Failed to set remote SDP description: {}", _0)]
    SetRemoteDescription(String),

    /// Remote ICE candidate cannot be added.
    #[display(fmt = "Failed to add ICE candidate: {}", _0)]
    AddIceCandidate(String),

    /// Track cannot be added to, removed from or replaced on a sender.
    #[display(fmt = "Failed to update sender: {}", _0)]
    Sender(String),

    /// Operation is not supported by the engine.
    #[display(fmt = "Operation is not supported by the engine")]
    Unsupported,

    /// Peer connection is already closed.
    #[display(fmt = "Peer connection is closed")]
    Closed,
}

/// Shortcut for results of [`RtcPeerConnection`] operations.
pub type Result<T> = std::result::Result<T, Traced<PeerConnectionError>>;

/// Peer connection engine owning the ICE, DTLS and SRTP machinery of a single
/// connection to a remote peer.
pub trait RtcPeerConnection {
    /// Obtains SDP offer from the engine without applying it.
    fn create_offer(
        &self,
        options: OfferOptions,
    ) -> LocalBoxFuture<'static, Result<String>>;

    /// Obtains SDP answer to the applied remote offer without applying it.
    fn create_answer(&self) -> LocalBoxFuture<'static, Result<String>>;

    /// Applies the provided local description.
    fn set_local_description(
        &self,
        sdp: SdpType,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Applies the provided remote description.
    fn set_remote_description(
        &self,
        sdp: SdpType,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Adds remote ICE candidate. `None` signals the end of candidates.
    fn add_ice_candidate(
        &self,
        candidate: Option<IceCandidate>,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Attaches the provided local track to a new sender.
    fn add_track(&self, track: MediaTrack) -> Result<SenderId>;

    /// Detaches track of the provided sender and removes it.
    fn remove_track(&self, sender: SenderId) -> Result<()>;

    /// Returns all the senders of this connection.
    fn senders(&self) -> Vec<RtpSender>;

    /// Swaps track of the provided sender without renegotiation.
    ///
    /// Errors with [`PeerConnectionError::Unsupported`] if the engine cannot
    /// do that in place.
    fn replace_sender_track(
        &self,
        sender: SenderId,
        track: Option<MediaTrack>,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Restricts bitrate of all the video senders via encoding parameters.
    /// `0` lifts the restriction.
    ///
    /// Errors with [`PeerConnectionError::Unsupported`] if only SDP
    /// renegotiation can do that.
    fn set_video_bandwidth(
        &self,
        kbps: u32,
    ) -> LocalBoxFuture<'static, Result<()>>;

    /// Returns type of the local side of the selected candidate pair.
    fn selected_candidate_pair_type(
        &self,
    ) -> LocalBoxFuture<'static, Option<CandidateType>>;

    /// Returns current [`SignalingState`].
    fn signaling_state(&self) -> SignalingState;

    /// Returns current [`IceConnectionState`].
    fn ice_connection_state(&self) -> IceConnectionState;

    /// Subscribes to [`PeerConnectionEvent`]s of this connection.
    fn subscribe(&self) -> LocalBoxStream<'static, PeerConnectionEvent>;

    /// Closes this connection. Idempotent.
    fn close(&self);
}

/// Creator of [`RtcPeerConnection`]s.
pub trait PeerConnectionFactory {
    /// Creates new [`RtcPeerConnection`] with the provided
    /// [`RtcConfiguration`].
    fn create(
        &self,
        config: RtcConfiguration,
    ) -> Result<Rc<dyn RtcPeerConnection>>;
}
