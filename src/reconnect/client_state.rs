//! Last known state of remote clients.

use crate::{platform::MediaKind, signalling::Client};

/// Remote client state as seen before a signalling outage.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientState {
    /// Device the client runs on.
    pub device_id: String,

    pub is_audio_enabled: bool,

    pub is_video_enabled: bool,

    pub is_screenshare_enabled: bool,

    /// Whether the server reported the client as possibly gone.
    pub is_pending_to_leave: bool,
}

impl From<&Client> for ClientState {
    fn from(client: &Client) -> Self {
        Self {
            device_id: client.device_id.clone(),
            is_audio_enabled: client.is_audio_enabled,
            is_video_enabled: client.is_video_enabled,
            is_screenshare_enabled: client.is_screenshare_enabled(),
            is_pending_to_leave: client.is_pending_to_leave,
        }
    }
}

impl ClientState {
    /// Indicates whether media flags of the provided fresh [`Client`] record
    /// differ from this [`ClientState`].
    pub fn differs_from(&self, client: &Client) -> bool {
        self.is_audio_enabled != client.is_audio_enabled
            || self.is_video_enabled != client.is_video_enabled
            || self.is_screenshare_enabled != client.is_screenshare_enabled()
    }

    /// Returns [`MediaKind`]s the client was sending.
    pub fn sent_kinds(&self) -> Vec<MediaKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.is_audio_enabled {
            kinds.push(MediaKind::Audio);
        }
        if self.is_video_enabled || self.is_screenshare_enabled {
            kinds.push(MediaKind::Video);
        }
        kinds
    }
}
