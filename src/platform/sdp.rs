//! SDP post-processing interface.

use crate::conf::Features;

/// Video codec which may be preferred over the others.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VideoCodec {
    Vp9,
    Av1,
}

/// Transformations requested from a [`SdpMunger`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SdpTransform {
    /// Video codec to move to the top of the payload type list.
    pub prefer_codec: Option<VideoCodec>,

    /// Inject redundant audio encoding.
    pub use_red: bool,

    /// Bandwidth line (in kbps) to put into video sections. `0` removes it.
    pub bandwidth_kbps: Option<u32>,
}

impl SdpTransform {
    /// Builds [`SdpTransform`] requested by the provided [`Features`].
    pub fn from_features(features: &Features) -> Self {
        let prefer_codec = if features.prefer_vp9 {
            Some(VideoCodec::Vp9)
        } else if features.prefer_av1 {
            Some(VideoCodec::Av1)
        } else {
            None
        };
        Self {
            prefer_codec,
            use_red: features.use_red,
            bandwidth_kbps: None,
        }
    }

    /// Indicates whether this [`SdpTransform`] changes nothing.
    pub fn is_noop(&self) -> bool {
        self == &Self::default()
    }
}

/// Pure SDP text transformations (codec reordering, header extensions
/// injection, bandwidth lines).
pub trait SdpMunger {
    /// Applies the provided [`SdpTransform`] to the `sdp` text.
    fn transform(&self, sdp: String, transform: &SdpTransform) -> String;
}

/// [`SdpMunger`] returning SDP untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughSdp;

impl SdpMunger for PassThroughSdp {
    #[inline]
    fn transform(&self, sdp: String, _: &SdpTransform) -> String {
        sdp
    }
}
