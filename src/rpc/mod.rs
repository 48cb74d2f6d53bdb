//! Client of the SFU control channel multiplexing correlated requests and
//! fire-and-forget messages over a single [`RpcTransport`].

pub mod protocol;

use std::{
    cell::RefCell,
    collections::HashMap,
    rc::{Rc, Weak},
};

use derive_more::{Display, From};
use futures::{
    channel::{mpsc, oneshot},
    stream::LocalBoxStream,
    StreamExt as _,
};
use medea_reactive::ObservableCell;
use serde_json::Value;
use tracerr::Traced;
use url::Url;

use crate::{
    conf,
    log::prelude::*,
    platform::{
        self, CloseMsg, RpcTransport, RpcTransportFactory, TransportError,
        TransportState,
    },
    utils::{spawn_abortable, TaskHandle},
};

#[doc(inline)]
pub use self::protocol::{Frame, RequestId, ResponseError};

/// Errors of [`RpcClient`] operations.
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum RpcClientError {
    /// Underlying [`RpcTransport`] failed.
    #[display(fmt = "Transport error: {}", _0)]
    Transport(TransportError),

    /// [`RpcClient`] has no open connection.
    #[display(fmt = "RPC client is not connected")]
    #[from(ignore)]
    NotConnected,

    /// Connection was closed before the response arrived.
    #[display(fmt = "Transport closed")]
    #[from(ignore)]
    TransportClosed,

    /// No response arrived in time.
    #[display(fmt = "Request `{}` timed out", _0)]
    #[from(ignore)]
    Timeout(String),

    /// Server answered with an error.
    #[display(fmt = "Request rejected: {}", _0)]
    Rejected(ResponseError),
}

/// Shortcut for results of [`RpcClient`] operations.
pub type Result<T> = std::result::Result<T, Traced<RpcClientError>>;

/// Connection state of an [`RpcClient`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RpcClientState {
    /// Connection is being established.
    Connecting,

    /// Connection is open.
    Open,

    /// Never connected, lost or closed.
    Closed,
}

/// Server-initiated traffic and connection notifications of an
/// [`RpcClient`].
#[derive(Clone, Debug, PartialEq)]
pub enum RpcEvent {
    /// Server sent a request, which should be answered with
    /// [`RpcClient::respond`].
    Request {
        id: RequestId,
        method: String,
        data: Value,
    },

    /// Server sent a fire-and-forget message.
    Message { method: String, data: Value },

    /// Connection was lost without [`RpcClient::close`] being called.
    ConnectionLost(CloseMsg),
}

/// Request waiting for its response.
struct PendingRequest {
    /// Method of the request.
    method: String,

    /// Resolver of the request.
    responder: oneshot::Sender<Result<Value>>,

    /// Timer rejecting the request once its deadline is reached.
    _timeout: TaskHandle,
}

/// Requests waiting for their responses, keyed by their IDs.
type PendingRequests = Rc<RefCell<HashMap<RequestId, PendingRequest>>>;

struct Inner {
    /// Factory establishing new [`RpcTransport`]s.
    transport_factory: RpcTransportFactory,

    /// [`Url`] of the latest connection attempt.
    url: Option<Url>,

    /// Currently open [`RpcTransport`].
    transport: Option<Rc<dyn RpcTransport>>,

    /// Subscribers of [`RpcEvent`]s.
    subs: Vec<mpsc::UnboundedSender<RpcEvent>>,

    /// Listeners of the current [`RpcTransport`].
    listeners: Vec<TaskHandle>,
}

/// Client of the SFU control channel.
///
/// Every request is resolved exactly once: with its response, with a timeout
/// error at its deadline, or with [`RpcClientError::TransportClosed`] as soon
/// as the connection goes away.
pub struct RpcClient {
    /// Settings of requests.
    conf: conf::Rpc,

    inner: RefCell<Inner>,

    /// Requests waiting for their responses.
    pending: PendingRequests,

    /// Current [`RpcClientState`].
    state: ObservableCell<RpcClientState>,
}

impl RpcClient {
    /// Creates new disconnected [`RpcClient`] establishing its connections
    /// with the provided [`RpcTransportFactory`].
    pub fn new(conf: conf::Rpc, transport_factory: RpcTransportFactory) -> Self {
        Self {
            conf,
            inner: RefCell::new(Inner {
                transport_factory,
                url: None,
                transport: None,
                subs: Vec::new(),
                listeners: Vec::new(),
            }),
            pending: PendingRequests::default(),
            state: ObservableCell::new(RpcClientState::Closed),
        }
    }

    /// Returns current [`RpcClientState`].
    #[inline]
    pub fn state(&self) -> RpcClientState {
        self.state.get()
    }

    /// Subscribes to [`RpcClientState`] changes. Current state is emitted
    /// first.
    pub fn on_state_change(&self) -> LocalBoxStream<'static, RpcClientState> {
        self.state.subscribe()
    }

    /// Subscribes to [`RpcEvent`]s of this [`RpcClient`].
    pub fn subscribe(&self) -> LocalBoxStream<'static, RpcEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.inner.borrow_mut().subs.push(tx);
        Box::pin(rx)
    }

    /// Returns the number of requests waiting for their responses.
    pub fn outstanding(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Connects to the provided [`Url`].
    ///
    /// Resolves instantly if already connected to the same [`Url`], and
    /// waits for the running attempt if one is in progress.
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::Transport`] if the connection fails.
    pub async fn connect(self: Rc<Self>, url: Url) -> Result<()> {
        let same_url = self.inner.borrow().url.as_ref() == Some(&url);
        match self.state.get() {
            RpcClientState::Open if same_url => Ok(()),
            RpcClientState::Connecting if same_url => {
                self.connecting_result().await
            }
            _ => self.establish_connection(url).await,
        }
    }

    /// Sends a request and waits for its response data.
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::NotConnected`] if there is no connection,
    /// [`RpcClientError::Timeout`] if no response arrived in time,
    /// [`RpcClientError::TransportClosed`] if the connection was lost while
    /// waiting, or [`RpcClientError::Rejected`] if the server responded with
    /// an error.
    pub async fn request(&self, method: &str, data: Value) -> Result<Value> {
        let response = self.send_request(method, data)?;
        response
            .await
            .map_err(|_| tracerr::new!(RpcClientError::TransportClosed))?
            .map_err(tracerr::wrap!())
    }

    /// Sends a fire-and-forget message.
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::NotConnected`] if there is no connection, or
    /// [`RpcClientError::Transport`] if sending fails.
    pub fn notify(&self, method: &str, data: Value) -> Result<()> {
        self.send_frame(&Frame::Message {
            method: method.to_owned(),
            data,
        })
    }

    /// Answers a request of the server.
    ///
    /// # Errors
    ///
    /// With [`RpcClientError::NotConnected`] if there is no connection, or
    /// [`RpcClientError::Transport`] if sending fails.
    pub fn respond(
        &self,
        id: RequestId,
        result: std::result::Result<Value, ResponseError>,
    ) -> Result<()> {
        self.send_frame(&Frame::Response { id, result })
    }

    /// Closes the connection rejecting all the outstanding requests.
    ///
    /// No [`RpcEvent::ConnectionLost`] is emitted.
    pub fn close(&self) {
        let (transport, _listeners) = {
            let mut inner = self.inner.borrow_mut();
            (inner.transport.take(), std::mem::take(&mut inner.listeners))
        };
        if let Some(transport) = transport {
            transport.close();
        }
        self.state.set(RpcClientState::Closed);
        self.reject_pending();
    }

    /// Opens new [`RpcTransport`] replacing the current one.
    async fn establish_connection(self: Rc<Self>, url: Url) -> Result<()> {
        self.close();
        self.inner.borrow_mut().url = Some(url.clone());
        self.state.set(RpcClientState::Connecting);

        let connecting = (self.inner.borrow().transport_factory)(url.clone());
        let transport = connecting.await.map_err(|e| {
            self.state.set(RpcClientState::Closed);
            tracerr::map_from_and_new!(e)
        })?;
        if self.inner.borrow().url.as_ref() != Some(&url) {
            // Another connection attempt superseded this one.
            transport.close();
            return Err(tracerr::new!(RpcClientError::TransportClosed));
        }

        let weak = Rc::downgrade(&self);
        let messages = transport.on_message();
        let reader = spawn_abortable(Self::read(Weak::clone(&weak), messages));
        let states = transport.on_state_change();
        let watcher = spawn_abortable(Self::watch(weak, states));
        {
            let mut inner = self.inner.borrow_mut();
            inner.transport = Some(transport);
            inner.listeners = vec![reader, watcher];
        }
        info!("SFU control channel connected to {}", url);
        self.state.set(RpcClientState::Open);

        Ok(())
    }

    /// Waits for the running connection attempt to finish.
    async fn connecting_result(&self) -> Result<()> {
        let mut states = self.state.subscribe();
        while let Some(state) = states.next().await {
            match state {
                RpcClientState::Open => return Ok(()),
                RpcClientState::Closed => {
                    return Err(tracerr::new!(RpcClientError::TransportClosed))
                }
                RpcClientState::Connecting => {}
            }
        }
        Err(tracerr::new!(RpcClientError::TransportClosed))
    }

    /// Feeds inbound messages of a transport to the [`RpcClient`].
    async fn read(this: Weak<Self>, mut messages: LocalBoxStream<'static, String>) {
        while let Some(text) = messages.next().await {
            match this.upgrade() {
                Some(this) => this.on_transport_message(&text),
                None => break,
            }
        }
    }

    /// Watches a transport for closure.
    async fn watch(
        this: Weak<Self>,
        mut states: LocalBoxStream<'static, TransportState>,
    ) {
        while let Some(state) = states.next().await {
            if let TransportState::Closed(msg) = state {
                if let Some(this) = this.upgrade() {
                    this.on_transport_closed(msg);
                }
                break;
            }
        }
    }

    /// Handles an inbound text message.
    fn on_transport_message(&self, text: &str) {
        let frame = match Frame::parse(text) {
            Some(frame) => frame,
            None => {
                debug!("Dropping malformed SFU frame: {}", text);
                return;
            }
        };
        match frame {
            Frame::Response { id, result } => {
                let request = self.pending.borrow_mut().remove(&id);
                match request {
                    Some(request) => {
                        trace!("Response to `{}` ({})", request.method, id);
                        let _ = request.responder.send(
                            result.map_err(|e| {
                                tracerr::new!(RpcClientError::Rejected(e))
                            }),
                        );
                    }
                    None => debug!("Response to unknown request {}", id),
                }
            }
            Frame::Request { id, method, data } => {
                self.emit(RpcEvent::Request { id, method, data });
            }
            Frame::Message { method, data } => {
                self.emit(RpcEvent::Message { method, data });
            }
        }
    }

    /// Handles closure of the current transport.
    fn on_transport_closed(&self, msg: CloseMsg) {
        warn!("SFU control channel closed: {:?}", msg);
        let _listeners = {
            let mut inner = self.inner.borrow_mut();
            inner.transport = None;
            std::mem::take(&mut inner.listeners)
        };
        self.state.set(RpcClientState::Closed);
        self.reject_pending();
        self.emit(RpcEvent::ConnectionLost(msg));
    }

    /// Registers a new [`PendingRequest`] and sends its [`Frame`].
    fn send_request(
        &self,
        method: &str,
        data: Value,
    ) -> Result<oneshot::Receiver<Result<Value>>> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut pending = self.pending.borrow_mut();
            let timeout = self.conf.request_timeout(pending.len());
            let id = loop {
                let id = RequestId(rand::random());
                if !pending.contains_key(&id) {
                    break id;
                }
            };
            let timer = spawn_abortable({
                let pending = Rc::downgrade(&self.pending);
                let method = method.to_owned();
                async move {
                    platform::delay_for(timeout).await;
                    let pending = match pending.upgrade() {
                        Some(pending) => pending,
                        None => return,
                    };
                    let request = pending.borrow_mut().remove(&id);
                    if let Some(request) = request {
                        warn!("Request `{}` ({}) timed out", method, id);
                        let _ = request.responder.send(Err(tracerr::new!(
                            RpcClientError::Timeout(method)
                        )));
                    }
                }
            });
            let _ = pending.insert(
                id,
                PendingRequest {
                    method: method.to_owned(),
                    responder: tx,
                    _timeout: timer,
                },
            );
            id
        };

        let frame = Frame::Request {
            id,
            method: method.to_owned(),
            data,
        };
        if let Err(e) = self.send_frame(&frame) {
            let _ = self.pending.borrow_mut().remove(&id);
            return Err(tracerr::new!(e));
        }
        Ok(rx)
    }

    /// Sends the provided [`Frame`] over the current transport.
    fn send_frame(&self, frame: &Frame) -> Result<()> {
        let transport = self
            .inner
            .borrow()
            .transport
            .clone()
            .ok_or_else(|| tracerr::new!(RpcClientError::NotConnected))?;
        transport
            .send(frame.to_json())
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Rejects all the outstanding requests with
    /// [`RpcClientError::TransportClosed`].
    fn reject_pending(&self) {
        let pending: Vec<_> = self.pending.borrow_mut().drain().collect();
        for (_, request) in pending {
            let _ = request
                .responder
                .send(Err(tracerr::new!(RpcClientError::TransportClosed)));
        }
    }

    /// Sends the provided [`RpcEvent`] to all the subscribers.
    fn emit(&self, event: RpcEvent) {
        self.inner
            .borrow_mut()
            .subs
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.close();
    }
}
