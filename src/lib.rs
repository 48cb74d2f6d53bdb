//! Client-side media session core: negotiates and repairs P2P and
//! SFU-relayed media connections over an unreliable signalling channel.
//!
//! All types here are `!Send` and expected to run on a single-threaded
//! executor (a [`tokio::task::LocalSet`]).

#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]

#[macro_use]
pub mod utils;
pub mod api;
pub mod bandwidth;
pub mod conf;
pub mod log;
pub mod peer;
pub mod platform;
pub mod reconnect;
pub mod rpc;
pub mod rtc;
pub mod signalling;

#[doc(inline)]
pub use self::{
    api::{RoomClient, RoomEvent},
    bandwidth::BandwidthPolicy,
    conf::Conf,
    peer::{ConnectionStatus, Session, SessionError, SessionEvent},
    reconnect::{ConnectionRegistry, ReconnectManager, ReconnectMetrics},
    rpc::{RpcClient, RpcClientError},
    rtc::{Dependencies, RtcManager, RtcManagerDispatcher, RtcManagerEvent},
    signalling::{ClientId, SignalingEvent},
};
