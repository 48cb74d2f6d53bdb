//! [WebSocket] implementation of [`RpcTransport`].
//!
//! [WebSocket]: https://tools.ietf.org/html/rfc6455

use std::{cell::RefCell, rc::Rc};

use futures::{
    channel::mpsc, future::LocalBoxFuture, stream::LocalBoxStream,
    SinkExt as _, StreamExt as _,
};
use medea_reactive::ObservableCell;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest as _,
        http::HeaderValue,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
};
use tracerr::Traced;
use url::Url;

use crate::{
    log::prelude::*,
    platform::transport::{
        CloseMsg, RpcTransport, RpcTransportFactory, TransportError,
        TransportState,
    },
    utils::{spawn_abortable, TaskHandle},
};

/// Header carrying the sub-protocol of the SFU control channel.
const SUB_PROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Subscribers of inbound text messages.
type Subscribers = Rc<RefCell<Vec<mpsc::UnboundedSender<String>>>>;

/// [`RpcTransport`] over a WebSocket connection.
pub struct WebSocketRpcTransport {
    /// Outbound frames queue drained by the writer task.
    outbound: mpsc::UnboundedSender<Message>,

    /// Subscribers of [`RpcTransport::on_message`].
    on_message_subs: Subscribers,

    /// Current [`TransportState`] of this [`WebSocketRpcTransport`].
    socket_state: Rc<ObservableCell<TransportState>>,

    /// Handles of the reader and writer tasks.
    _tasks: [TaskHandle; 2],
}

impl WebSocketRpcTransport {
    /// Opens new WebSocket connection to the provided [`Url`] negotiating the
    /// provided `sub_protocol`.
    ///
    /// # Errors
    ///
    /// With [`TransportError::Request`] if the handshake request cannot be
    /// built, or [`TransportError::Connect`] if the connection fails.
    pub async fn new(
        url: Url,
        sub_protocol: &str,
    ) -> Result<Self, Traced<TransportError>> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| tracerr::new!(TransportError::Request(e.to_string())))?;
        let protocol = HeaderValue::from_str(sub_protocol)
            .map_err(|e| tracerr::new!(TransportError::Request(e.to_string())))?;
        request.headers_mut().insert(SUB_PROTOCOL_HEADER, protocol);

        let (socket, _) = connect_async(request)
            .await
            .map_err(|e| tracerr::new!(TransportError::Connect(e.to_string())))?;
        debug!("WebSocket connected to {}", url);
        let (mut sink, mut stream) = socket.split();

        let socket_state = Rc::new(ObservableCell::new(TransportState::Open));
        let on_message_subs: Subscribers = Rc::default();
        let (outbound, mut outbound_rx) = mpsc::unbounded::<Message>();

        let writer = spawn_abortable({
            let socket_state = Rc::clone(&socket_state);
            async move {
                while let Some(msg) = outbound_rx.next().await {
                    let is_close = matches!(msg, Message::Close(_));
                    if let Err(e) = sink.send(msg).await {
                        warn!("Failed to write to WebSocket: {}", e);
                        socket_state.set(TransportState::Closed(
                            CloseMsg::abnormal(e.to_string()),
                        ));
                        break;
                    }
                    if is_close {
                        break;
                    }
                }
            }
        });

        let reader = spawn_abortable({
            let socket_state = Rc::clone(&socket_state);
            let subs = Rc::clone(&on_message_subs);
            async move {
                let mut close = CloseMsg::abnormal("Connection lost");
                while let Some(msg) = stream.next().await {
                    match msg {
                        Ok(Message::Text(text)) => {
                            subs.borrow_mut()
                                .retain(|s| s.unbounded_send(text.clone()).is_ok());
                        }
                        Ok(Message::Close(frame)) => {
                            close = frame.map_or_else(CloseMsg::normal, |f| {
                                CloseMsg {
                                    code: f.code.into(),
                                    reason: f.reason.into_owned(),
                                }
                            });
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            close = CloseMsg::abnormal(e.to_string());
                            break;
                        }
                    }
                }
                debug!("WebSocket closed: {:?}", close);
                socket_state.set(TransportState::Closed(close));
            }
        });

        Ok(Self {
            outbound,
            on_message_subs,
            socket_state,
            _tasks: [reader, writer],
        })
    }

    /// Returns [`RpcTransportFactory`] connecting [`WebSocketRpcTransport`]s
    /// with the provided `sub_protocol`.
    pub fn factory(sub_protocol: String) -> RpcTransportFactory {
        Box::new(move |url| {
            let sub_protocol = sub_protocol.clone();
            let fut: LocalBoxFuture<
                'static,
                Result<Rc<dyn RpcTransport>, Traced<TransportError>>,
            > = Box::pin(async move {
                let transport = Self::new(url, &sub_protocol).await?;
                Ok(Rc::new(transport) as Rc<dyn RpcTransport>)
            });
            fut
        })
    }
}

impl RpcTransport for WebSocketRpcTransport {
    fn on_message(&self) -> LocalBoxStream<'static, String> {
        let (tx, rx) = mpsc::unbounded();
        self.on_message_subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    fn send(&self, msg: String) -> Result<(), Traced<TransportError>> {
        if self.socket_state.get() != TransportState::Open {
            return Err(tracerr::new!(TransportError::ClosedSocket));
        }
        self.outbound
            .unbounded_send(Message::Text(msg))
            .map_err(|e| tracerr::new!(TransportError::SendMessage(e.to_string())))
    }

    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState> {
        self.socket_state.subscribe()
    }

    fn close(&self) {
        if !self.socket_state.get().can_close() {
            return;
        }
        self.socket_state.set(TransportState::Closing);
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if self.outbound.unbounded_send(Message::Close(Some(frame))).is_err() {
            self.socket_state
                .set(TransportState::Closed(CloseMsg::normal()));
        }
    }
}
