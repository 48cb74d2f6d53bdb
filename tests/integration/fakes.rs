//! In-memory implementations of the platform collaborators.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::Rc,
};

use futures::{
    channel::{mpsc, oneshot},
    future::{self, LocalBoxFuture},
    stream::LocalBoxStream,
    FutureExt as _,
};
use medea_rtc_client::{
    conf::Conf,
    platform::{
        AppData, CandidateType, ClientStats, CloseMsg, ConsumerOptions, IceCandidate,
        IceConnectionState, IceParameters, MediaKind, MediaTrack,
        OfferOptions, PassThroughSdp, PeerConnectionError,
        PeerConnectionEvent, PeerConnectionFactory, ProducerOptions,
        RtcConfiguration, RtcPeerConnection, RpcTransport,
        RpcTransportFactory, RtpSender, SdpType, SenderId, SfuConsumer,
        SfuDevice, SfuDeviceFactory, SfuError, SfuProducer, SfuTransport,
        SignalingState, StatsError, StatsProvider, TransportDirection,
        TransportError, TransportHandler, TransportOptions, TransportState,
    },
    signalling::{ClientId, SignalingChannel, SignalingMessage},
    Dependencies,
};
use serde_json::{json, Value};
use tracerr::Traced;
use url::Url;

/// Sends the provided event to every alive subscriber.
fn broadcast<T: Clone>(subs: &RefCell<Vec<mpsc::UnboundedSender<T>>>, v: T) {
    subs.borrow_mut()
        .retain(|sub| sub.unbounded_send(v.clone()).is_ok());
}

fn subscribe<T: 'static>(
    subs: &RefCell<Vec<mpsc::UnboundedSender<T>>>,
) -> LocalBoxStream<'static, T> {
    let (tx, rx) = mpsc::unbounded();
    subs.borrow_mut().push(tx);
    Box::pin(rx)
}

/// Call made to a [`FakePeerConnection`].
#[derive(Clone, Debug, PartialEq)]
pub enum PcCall {
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetLocal(SdpType),
    SetRemote(SdpType),
    AddCandidate(Option<IceCandidate>),
    SetBandwidth(u32),
}

/// [`RtcPeerConnection`] following the offer/answer state machine without
/// any media.
pub struct FakePeerConnection {
    pub config: RtcConfiguration,

    signaling: Cell<SignalingState>,

    ice: Cell<IceConnectionState>,

    subs: RefCell<Vec<mpsc::UnboundedSender<PeerConnectionEvent>>>,

    senders: RefCell<Vec<RtpSender>>,

    next_sender: Cell<u32>,

    calls: RefCell<Vec<PcCall>>,

    offers: Cell<u32>,

    fail_offers: Cell<bool>,

    encoding_bandwidth: bool,

    replace_in_place: bool,

    selected_pair: Cell<Option<CandidateType>>,

    offer_gate: RefCell<Option<oneshot::Receiver<()>>>,

    closed: Cell<bool>,
}

impl FakePeerConnection {
    fn new(config: RtcConfiguration, factory: &FakePeerConnectionFactory) -> Self {
        Self {
            config,
            signaling: Cell::new(SignalingState::Stable),
            ice: Cell::new(IceConnectionState::New),
            subs: RefCell::default(),
            senders: RefCell::default(),
            next_sender: Cell::new(0),
            calls: RefCell::default(),
            offers: Cell::new(0),
            fail_offers: Cell::new(factory.fail_offers.get()),
            encoding_bandwidth: factory.encoding_bandwidth.get(),
            replace_in_place: factory.replace_in_place.get(),
            selected_pair: Cell::new(factory.selected_pair.get()),
            offer_gate: RefCell::default(),
            closed: Cell::new(false),
        }
    }

    /// Returns all the calls made so far.
    pub fn calls(&self) -> Vec<PcCall> {
        self.calls.borrow().clone()
    }

    /// Returns the calls made since the previous invocation.
    pub fn take_calls(&self) -> Vec<PcCall> {
        std::mem::take(&mut *self.calls.borrow_mut())
    }

    /// Holds the next [`RtcPeerConnection::create_offer`] until the returned
    /// sender fires.
    pub fn hold_next_offer(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.offer_gate.borrow_mut() = Some(rx);
        tx
    }

    pub fn fail_offers(&self, fail: bool) {
        self.fail_offers.set(fail);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Moves the connection to the provided [`IceConnectionState`].
    pub fn set_ice_state(&self, state: IceConnectionState) {
        self.ice.set(state);
        self.emit(PeerConnectionEvent::IceConnectionStateChanged(state));
    }

    /// Reports a locally gathered candidate.
    pub fn gather(&self, candidate: Option<IceCandidate>) {
        self.emit(PeerConnectionEvent::IceCandidate(candidate));
    }

    /// Reports a received remote track.
    pub fn receive_track(&self, track: MediaTrack, stream_id: &str) {
        self.emit(PeerConnectionEvent::RemoteTrack {
            track,
            stream_id: stream_id.to_owned(),
        });
    }

    pub fn request_negotiation(&self) {
        self.emit(PeerConnectionEvent::NegotiationNeeded);
    }

    pub fn sent_tracks(&self) -> Vec<MediaTrack> {
        self.senders
            .borrow()
            .iter()
            .filter_map(|s| s.track.clone())
            .collect()
    }

    fn emit(&self, event: PeerConnectionEvent) {
        broadcast(&self.subs, event);
    }

    fn set_signaling(&self, state: SignalingState) {
        if self.signaling.replace(state) != state {
            self.emit(PeerConnectionEvent::SignalingStateChanged(state));
        }
    }

    fn record(&self, call: PcCall) {
        self.calls.borrow_mut().push(call);
    }
}

impl RtcPeerConnection for FakePeerConnection {
    fn create_offer(
        &self,
        options: OfferOptions,
    ) -> LocalBoxFuture<'static, Result<String, Traced<PeerConnectionError>>>
    {
        self.record(PcCall::CreateOffer {
            ice_restart: options.ice_restart,
        });
        let result = if self.fail_offers.get() {
            Err(tracerr::new!(PeerConnectionError::CreateOffer(
                "engine failure".to_owned()
            )))
        } else {
            self.offers.set(self.offers.get() + 1);
            Ok(format!("offer-{}", self.offers.get()))
        };
        let gate = self.offer_gate.borrow_mut().take();
        async move {
            if let Some(gate) = gate {
                let _ = gate.await;
            }
            result
        }
        .boxed_local()
    }

    fn create_answer(
        &self,
    ) -> LocalBoxFuture<'static, Result<String, Traced<PeerConnectionError>>>
    {
        self.record(PcCall::CreateAnswer);
        future::ok("answer".to_owned()).boxed_local()
    }

    fn set_local_description(
        &self,
        sdp: SdpType,
    ) -> LocalBoxFuture<'static, Result<(), Traced<PeerConnectionError>>> {
        self.set_signaling(match &sdp {
            SdpType::Offer(_) => SignalingState::HaveLocalOffer,
            SdpType::Answer(_) => SignalingState::Stable,
        });
        self.record(PcCall::SetLocal(sdp));
        future::ok(()).boxed_local()
    }

    fn set_remote_description(
        &self,
        sdp: SdpType,
    ) -> LocalBoxFuture<'static, Result<(), Traced<PeerConnectionError>>> {
        let next = match &sdp {
            SdpType::Offer(_) => SignalingState::HaveRemoteOffer,
            SdpType::Answer(_) => SignalingState::Stable,
        };
        let result = if matches!(sdp, SdpType::Answer(_))
            && self.signaling.get() != SignalingState::HaveLocalOffer
        {
            Err(tracerr::new!(PeerConnectionError::SetRemoteDescription(
                "no local offer".to_owned()
            )))
        } else {
            self.set_signaling(next);
            Ok(())
        };
        self.record(PcCall::SetRemote(sdp));
        future::ready(result).boxed_local()
    }

    fn add_ice_candidate(
        &self,
        candidate: Option<IceCandidate>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<PeerConnectionError>>> {
        self.record(PcCall::AddCandidate(candidate));
        future::ok(()).boxed_local()
    }

    fn add_track(
        &self,
        track: MediaTrack,
    ) -> Result<SenderId, Traced<PeerConnectionError>> {
        let id = SenderId(self.next_sender.get());
        self.next_sender.set(id.0 + 1);
        self.senders.borrow_mut().push(RtpSender {
            id,
            kind: track.kind,
            track: Some(track),
        });
        Ok(id)
    }

    fn remove_track(
        &self,
        sender: SenderId,
    ) -> Result<(), Traced<PeerConnectionError>> {
        self.senders.borrow_mut().retain(|s| s.id != sender);
        Ok(())
    }

    fn senders(&self) -> Vec<RtpSender> {
        self.senders.borrow().clone()
    }

    fn replace_sender_track(
        &self,
        sender: SenderId,
        track: Option<MediaTrack>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<PeerConnectionError>>> {
        if !self.replace_in_place {
            return future::err(tracerr::new!(PeerConnectionError::Unsupported))
                .boxed_local();
        }
        if let Some(s) =
            self.senders.borrow_mut().iter_mut().find(|s| s.id == sender)
        {
            s.track = track;
        }
        future::ok(()).boxed_local()
    }

    fn set_video_bandwidth(
        &self,
        kbps: u32,
    ) -> LocalBoxFuture<'static, Result<(), Traced<PeerConnectionError>>> {
        if !self.encoding_bandwidth {
            return future::err(tracerr::new!(PeerConnectionError::Unsupported))
                .boxed_local();
        }
        self.record(PcCall::SetBandwidth(kbps));
        future::ok(()).boxed_local()
    }

    fn selected_candidate_pair_type(
        &self,
    ) -> LocalBoxFuture<'static, Option<CandidateType>> {
        future::ready(self.selected_pair.get()).boxed_local()
    }

    fn signaling_state(&self) -> SignalingState {
        self.signaling.get()
    }

    fn ice_connection_state(&self) -> IceConnectionState {
        self.ice.get()
    }

    fn subscribe(&self) -> LocalBoxStream<'static, PeerConnectionEvent> {
        subscribe(&self.subs)
    }

    fn close(&self) {
        self.closed.set(true);
        self.signaling.set(SignalingState::Closed);
    }
}

/// [`PeerConnectionFactory`] keeping every created [`FakePeerConnection`].
pub struct FakePeerConnectionFactory {
    created: RefCell<Vec<Rc<FakePeerConnection>>>,

    pub fail_offers: Cell<bool>,

    pub encoding_bandwidth: Cell<bool>,

    pub replace_in_place: Cell<bool>,

    pub selected_pair: Cell<Option<CandidateType>>,
}

impl Default for FakePeerConnectionFactory {
    fn default() -> Self {
        Self {
            created: RefCell::default(),
            fail_offers: Cell::new(false),
            encoding_bandwidth: Cell::new(true),
            replace_in_place: Cell::new(true),
            selected_pair: Cell::new(Some(CandidateType::Host)),
        }
    }
}

impl FakePeerConnectionFactory {
    pub fn created(&self) -> Vec<Rc<FakePeerConnection>> {
        self.created.borrow().clone()
    }

    /// Returns the latest created [`FakePeerConnection`].
    pub fn last(&self) -> Rc<FakePeerConnection> {
        Rc::clone(self.created.borrow().last().expect("no peer connections"))
    }
}

impl PeerConnectionFactory for FakePeerConnectionFactory {
    fn create(
        &self,
        config: RtcConfiguration,
    ) -> Result<Rc<dyn RtcPeerConnection>, Traced<PeerConnectionError>> {
        let pc = Rc::new(FakePeerConnection::new(config, self));
        self.created.borrow_mut().push(Rc::clone(&pc));
        Ok(pc)
    }
}

/// [`SignalingChannel`] recording every sent message.
#[derive(Default)]
pub struct RecordingSignaling(RefCell<Vec<SignalingMessage>>);

impl RecordingSignaling {
    pub fn take(&self) -> Vec<SignalingMessage> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

impl SignalingChannel for RecordingSignaling {
    fn send(&self, msg: SignalingMessage) {
        self.0.borrow_mut().push(msg);
    }
}

/// [`StatsProvider`] serving preset snapshots.
#[derive(Default)]
pub struct FakeStats {
    snapshots: RefCell<HashMap<ClientId, ClientStats>>,

    released: Cell<usize>,
}

impl FakeStats {
    pub fn set(&self, client_id: &str, stats: ClientStats) {
        let _ = self.snapshots.borrow_mut().insert(client_id.into(), stats);
    }

    pub fn released(&self) -> usize {
        self.released.get()
    }
}

impl StatsProvider for FakeStats {
    fn client_stats(
        &self,
        client_id: ClientId,
    ) -> LocalBoxFuture<'static, Result<ClientStats, Traced<StatsError>>> {
        let result = match self.snapshots.borrow().get(&client_id) {
            Some(stats) => Ok(stats.clone()),
            None => Err(tracerr::new!(StatsError::UnknownClient(client_id))),
        };
        future::ready(result).boxed_local()
    }

    fn release(&self) {
        self.released.set(self.released.get() + 1);
    }
}

/// Control channel end of an in-memory SFU answering the client requests.
#[derive(Default)]
pub struct FakeSfuServer {
    requests: RefCell<Vec<(String, Value)>>,

    notifications: RefCell<Vec<(String, Value)>>,

    responses: RefCell<Vec<Value>>,

    inbound: RefCell<Vec<mpsc::UnboundedSender<String>>>,

    states: RefCell<Vec<mpsc::UnboundedSender<TransportState>>>,

    rejected: RefCell<HashMap<String, String>>,

    connections: Cell<usize>,

    next_id: Cell<u32>,
}

impl FakeSfuServer {
    /// Wraps this [`FakeSfuServer`] into a [`RpcTransportFactory`].
    pub fn factory(self: &Rc<Self>) -> RpcTransportFactory {
        let server = Rc::clone(self);
        Box::new(move |_: Url| {
            server.connections.set(server.connections.get() + 1);
            let transport: Rc<dyn RpcTransport> = Rc::<FakeSfuServer>::clone(&server);
            future::ok::<_, Traced<TransportError>>(transport).boxed_local()
        })
    }

    pub fn connections(&self) -> usize {
        self.connections.get()
    }

    /// Returns methods of the received requests in order.
    pub fn methods(&self) -> Vec<String> {
        self.requests.borrow().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Returns data of the received requests of the provided method.
    pub fn requests_of(&self, method: &str) -> Vec<Value> {
        self.requests
            .borrow()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, d)| d.clone())
            .collect()
    }

    pub fn notifications(&self) -> Vec<(String, Value)> {
        self.notifications.borrow().clone()
    }

    /// Returns responses the client sent to the server requests.
    pub fn responses(&self) -> Vec<Value> {
        self.responses.borrow().clone()
    }

    /// Makes requests of the provided method fail with the provided reason.
    pub fn reject(&self, method: &str, reason: &str) {
        let _ = self
            .rejected
            .borrow_mut()
            .insert(method.to_owned(), reason.to_owned());
    }

    /// Sends a request to the client.
    pub fn request(&self, method: &str, data: Value) {
        let id = self.next_id();
        self.push(json!({
            "request": true,
            "id": id,
            "method": method,
            "data": data,
        }));
    }

    /// Sends a notification to the client.
    pub fn message(&self, method: &str, data: Value) {
        self.push(json!({
            "message": true,
            "method": method,
            "data": data,
        }));
    }

    /// Announces a new consumer of the provided producer to the client.
    pub fn new_consumer(
        &self,
        consumer_id: &str,
        client_id: &str,
        kind: &str,
        source: &str,
    ) {
        self.request(
            "newConsumer",
            json!({
                "id": consumer_id,
                "producerId": format!("p-{}", consumer_id),
                "kind": kind,
                "rtpParameters": {},
                "appData": { "clientId": client_id, "source": source },
            }),
        );
    }

    /// Drops the current connection abnormally.
    pub fn drop_connection(&self) {
        broadcast(
            &self.states,
            TransportState::Closed(CloseMsg::abnormal("network")),
        );
        self.inbound.borrow_mut().clear();
        self.states.borrow_mut().clear();
    }

    fn next_id(&self) -> u32 {
        self.next_id.set(self.next_id.get() + 1);
        self.next_id.get()
    }

    fn push(&self, frame: Value) {
        broadcast(&self.inbound, frame.to_string());
    }

    fn answer(&self, method: &str, data: &Value) -> Result<Value, String> {
        if let Some(reason) = self.rejected.borrow().get(method) {
            return Err(reason.clone());
        }
        Ok(match method {
            "getCapabilities" => json!({ "routerRtpCapabilities": {} }),
            "createTransport" => {
                let producing = data["producing"].as_bool().unwrap_or(false);
                json!({
                    "id": format!(
                        "{}-{}",
                        if producing { "send" } else { "recv" },
                        self.next_id(),
                    ),
                    "iceParameters": {},
                    "iceCandidates": [],
                    "dtlsParameters": {},
                })
            }
            "produce" => json!({ "id": format!("producer-{}", self.next_id()) }),
            "restartIce" => json!({ "iceParameters": { "fresh": true } }),
            _ => json!({}),
        })
    }
}

impl RpcTransport for FakeSfuServer {
    fn on_message(&self) -> LocalBoxStream<'static, String> {
        subscribe(&self.inbound)
    }

    fn send(&self, msg: String) -> Result<(), Traced<TransportError>> {
        let frame: Value = serde_json::from_str(&msg)
            .map_err(|e| tracerr::new!(TransportError::SendMessage(e.to_string())))?;
        if frame["request"] == json!(true) {
            let method = frame["method"].as_str().unwrap_or_default().to_owned();
            let data = frame["data"].clone();
            let response = match self.answer(&method, &data) {
                Ok(data) => json!({
                    "response": true,
                    "id": frame["id"],
                    "ok": true,
                    "data": data,
                }),
                Err(reason) => json!({
                    "response": true,
                    "id": frame["id"],
                    "ok": false,
                    "errorReason": reason,
                }),
            };
            self.requests.borrow_mut().push((method, data));
            self.push(response);
        } else if frame["message"] == json!(true) {
            let method = frame["method"].as_str().unwrap_or_default().to_owned();
            self.notifications
                .borrow_mut()
                .push((method, frame["data"].clone()));
        } else {
            self.responses.borrow_mut().push(frame);
        }
        Ok(())
    }

    fn on_state_change(&self) -> LocalBoxStream<'static, TransportState> {
        subscribe(&self.states)
    }

    fn close(&self) {
        self.inbound.borrow_mut().clear();
        self.states.borrow_mut().clear();
    }
}

/// [`SfuDeviceFactory`] keeping every created [`FakeSfuTransport`].
#[derive(Default)]
pub struct FakeSfuDevices {
    transports: Rc<RefCell<Vec<Rc<FakeSfuTransport>>>>,
}

impl FakeSfuDevices {
    pub fn transports(&self) -> Vec<Rc<FakeSfuTransport>> {
        self.transports.borrow().clone()
    }

    /// Returns the latest created transport of the provided direction.
    pub fn last(&self, direction: TransportDirection) -> Rc<FakeSfuTransport> {
        let transports = self.transports.borrow();
        let transport = transports
            .iter()
            .rev()
            .find(|t| t.direction == direction)
            .expect("no such transport");
        Rc::clone(transport)
    }
}

impl SfuDeviceFactory for FakeSfuDevices {
    fn create(&self) -> Rc<dyn SfuDevice> {
        Rc::new(FakeSfuDevice {
            loaded: Cell::new(false),
            transports: Rc::clone(&self.transports),
        })
    }
}

struct FakeSfuDevice {
    loaded: Cell<bool>,

    transports: Rc<RefCell<Vec<Rc<FakeSfuTransport>>>>,
}

impl SfuDevice for FakeSfuDevice {
    fn is_loaded(&self) -> bool {
        self.loaded.get()
    }

    fn load(
        &self,
        _: Value,
    ) -> LocalBoxFuture<'static, Result<(), Traced<SfuError>>> {
        self.loaded.set(true);
        future::ok(()).boxed_local()
    }

    fn rtp_capabilities(&self) -> Value {
        json!({ "codecs": [] })
    }

    fn create_transport(
        &self,
        direction: TransportDirection,
        options: TransportOptions,
        handler: Rc<dyn TransportHandler>,
    ) -> Result<Rc<dyn SfuTransport>, Traced<SfuError>> {
        let transport = Rc::new(FakeSfuTransport {
            id: options.id,
            direction,
            handler,
            connected: Rc::new(Cell::new(false)),
            state: Cell::new(IceConnectionState::New),
            subs: RefCell::default(),
            ice_restarts: RefCell::default(),
            closed: Cell::new(false),
        });
        self.transports.borrow_mut().push(Rc::clone(&transport));
        Ok(transport)
    }
}

/// Local side of an SFU transport signalling through the real handler.
pub struct FakeSfuTransport {
    pub id: String,

    pub direction: TransportDirection,

    handler: Rc<dyn TransportHandler>,

    connected: Rc<Cell<bool>>,

    state: Cell<IceConnectionState>,

    subs: RefCell<Vec<mpsc::UnboundedSender<IceConnectionState>>>,

    ice_restarts: RefCell<Vec<IceParameters>>,

    closed: Cell<bool>,
}

impl FakeSfuTransport {
    pub fn set_state(&self, state: IceConnectionState) {
        self.state.set(state);
        broadcast(&self.subs, state);
    }

    pub fn ice_restarts(&self) -> Vec<IceParameters> {
        self.ice_restarts.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Runs the DTLS handshake signalling on the first use.
    fn ensure_connected(
        &self,
    ) -> LocalBoxFuture<'static, Result<(), Traced<SfuError>>> {
        if self.connected.replace(true) {
            return future::ok(()).boxed_local();
        }
        self.handler.connect(self.id.clone(), json!({ "role": "client" }))
    }
}

impl SfuTransport for FakeSfuTransport {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    fn connection_state(&self) -> IceConnectionState {
        self.state.get()
    }

    fn on_connection_state_change(
        &self,
    ) -> LocalBoxStream<'static, IceConnectionState> {
        subscribe(&self.subs)
    }

    fn produce(
        &self,
        options: ProducerOptions,
    ) -> LocalBoxFuture<'static, Result<Rc<dyn SfuProducer>, Traced<SfuError>>>
    {
        if self.closed.get() {
            return future::err(tracerr::new!(SfuError::Closed)).boxed_local();
        }
        let connect = self.ensure_connected();
        let handler = Rc::clone(&self.handler);
        let transport_id = self.id.clone();
        async move {
            connect.await?;
            let id = handler
                .produce(
                    transport_id,
                    options.track.kind,
                    json!({}),
                    AppData {
                        client_id: None,
                        source: options.source,
                    },
                )
                .await?;
            let producer: Rc<dyn SfuProducer> = Rc::new(FakeSfuProducer {
                id,
                track: RefCell::new(Some(options.track)),
                paused: Cell::new(options.paused),
                closed: Cell::new(false),
            });
            Ok(producer)
        }
        .boxed_local()
    }

    fn consume(
        &self,
        options: ConsumerOptions,
    ) -> LocalBoxFuture<'static, Result<Rc<dyn SfuConsumer>, Traced<SfuError>>>
    {
        if self.closed.get() {
            return future::err(tracerr::new!(SfuError::Closed)).boxed_local();
        }
        let connect = self.ensure_connected();
        async move {
            connect.await?;
            let consumer: Rc<dyn SfuConsumer> = Rc::new(FakeSfuConsumer {
                track: MediaTrack::new(
                    format!("remote-{}", options.id),
                    options.kind,
                ),
                id: options.id,
                closed: Cell::new(false),
            });
            Ok(consumer)
        }
        .boxed_local()
    }

    fn restart_ice(
        &self,
        ice_parameters: IceParameters,
    ) -> LocalBoxFuture<'static, Result<(), Traced<SfuError>>> {
        self.ice_restarts.borrow_mut().push(ice_parameters);
        future::ok(()).boxed_local()
    }

    fn close(&self) {
        self.closed.set(true);
        self.state.set(IceConnectionState::Closed);
    }
}

struct FakeSfuProducer {
    id: String,

    track: RefCell<Option<MediaTrack>>,

    paused: Cell<bool>,

    closed: Cell<bool>,
}

impl SfuProducer for FakeSfuProducer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track(&self) -> Option<MediaTrack> {
        self.track.borrow().clone()
    }

    fn replace_track(
        &self,
        track: Option<MediaTrack>,
    ) -> LocalBoxFuture<'static, Result<(), Traced<SfuError>>> {
        *self.track.borrow_mut() = track;
        future::ok(()).boxed_local()
    }

    fn pause(&self) {
        self.paused.set(true);
    }

    fn resume(&self) {
        self.paused.set(false);
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

struct FakeSfuConsumer {
    id: String,

    track: MediaTrack,

    closed: Cell<bool>,
}

impl SfuConsumer for FakeSfuConsumer {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn track(&self) -> MediaTrack {
        self.track.clone()
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

/// All the fakes behind a single [`Dependencies`] set.
pub struct Fakes {
    pub signaling: Rc<RecordingSignaling>,

    pub peer_connections: Rc<FakePeerConnectionFactory>,

    pub stats: Rc<FakeStats>,

    pub sfu: Rc<FakeSfuServer>,

    pub sfu_devices: Rc<FakeSfuDevices>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            signaling: Rc::default(),
            peer_connections: Rc::default(),
            stats: Rc::default(),
            sfu: Rc::default(),
            sfu_devices: Rc::default(),
        }
    }

    /// Builds [`Dependencies`] over these [`Fakes`] with the provided
    /// [`Conf`].
    pub fn deps(&self, conf: Conf) -> Dependencies {
        Dependencies {
            conf: Rc::new(conf),
            signaling: Rc::clone(&self.signaling) as _,
            peer_connections: Rc::clone(&self.peer_connections) as _,
            sdp: Rc::new(PassThroughSdp),
            stats: Rc::clone(&self.stats) as _,
            sfu_devices: Rc::clone(&self.sfu_devices) as _,
            rpc_transports: Rc::new(self.sfu.factory()),
        }
    }
}

/// Creates a camera track of the provided kind.
pub fn camera_track(kind: MediaKind) -> MediaTrack {
    let id = match kind {
        MediaKind::Audio => "mic",
        MediaKind::Video => "cam",
    };
    MediaTrack::new(id, kind)
}
