//! SFU control channel transport interface.

use std::rc::Rc;

use derive_more::Display;
use futures::{future::LocalBoxFuture, stream::LocalBoxStream};
use tracerr::Traced;
use url::Url;

/// Reason of a [`RpcTransport`] closure.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CloseMsg {
    /// Close code.
    pub code: u16,

    /// Human-readable close reason.
    pub reason: String,
}

impl CloseMsg {
    /// [`CloseMsg`] of a normal closure.
    pub fn normal() -> Self {
        Self {
            code: 1000,
            reason: String::new(),
        }
    }

    /// [`CloseMsg`] of a connection lost without a close frame.
    pub fn abnormal<S: Into<String>>(reason: S) -> Self {
        Self {
            code: 1006,
            reason: reason.into(),
        }
    }
}

/// [`RpcTransport`] states.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TransportState {
    /// Connection is being established.
    Connecting,

    /// The connection is open and ready to communicate.
    Open,

    /// The connection is in the process of closing.
    Closing,

    /// The connection is closed or couldn't be opened.
    ///
    /// [`CloseMsg`] is the reason of why [`RpcTransport`] went into
    /// this [`TransportState`].
    Closed(CloseMsg),
}

impl TransportState {
    /// Returns `true` if socket can be closed.
    pub fn can_close(&self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

/// Errors that may occur when working with [`RpcTransport`].
#[derive(Clone, Debug, Display, Eq, PartialEq)]
pub enum TransportError {
    /// Occurs when the connection cannot be established.
    #[display(fmt = "Failed to connect: {}", _0)]
    Connect(String),

    /// Occurs when the connection request cannot be built.
    #[display(fmt = "Invalid connection request: {}", _0)]
    Request(String),

    /// Occurs when a message cannot be send to server.
    #[display(fmt = "Failed to send message: {}", _0)]
    SendMessage(String),

    /// Occurs when message is sent to a closed socket.
    #[display(fmt = "Underlying socket is closed")]
    ClosedSocket,
}

/// Raw duplex text channel to the SFU.
#[cfg_attr(test, mockall::automock)]
pub trait RpcTransport {
    /// Returns [`LocalBoxStream`] of all text messages received by this
    /// transport.
    fn on_message(&self) -> LocalBoxStream<'static, String>;

    /// Sends the provided text message to the server.
    ///
    /// # Errors
    ///
    /// Errors if sending the message fails.
    fn send(&self, msg: String) -> Result<(), Traced<TransportError>>;

    /// Subscribes to a [`RpcTransport`]'s [`TransportState`] changes.
    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState>;

    /// Closes this transport with a normal close code.
    fn close(&self);
}

#[cfg(test)]
impl_debug_by_struct_name!(MockRpcTransport);

/// Connection establishing function used to (re)connect [`RpcTransport`]s.
pub type RpcTransportFactory = Box<
    dyn Fn(
        Url,
    ) -> LocalBoxFuture<
        'static,
        Result<Rc<dyn RpcTransport>, Traced<TransportError>>,
    >,
>;
