//! [`RtcManager`] exchanging media through a single SFU node.

mod client_state;
mod producer;

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::{Rc, Weak},
};

use async_trait::async_trait;
use futures::{
    channel::mpsc, future::LocalBoxFuture, stream::LocalBoxStream,
    StreamExt as _,
};
use serde_json::{json, Value};
use tracerr::Traced;
use url::Url;

use crate::{
    log::prelude::*,
    platform::{
        self, AppData, ConsumerOptions, DtlsParameters, IceConnectionState,
        LocalStream, MediaKind, MediaSource, SfuConsumer, SfuDevice, SfuError,
        SfuTransport, TransportDirection, TransportHandler, TransportOptions,
    },
    rpc::{RequestId, ResponseError, RpcClient, RpcClientError, RpcEvent},
    signalling::{Client, ClientId, SignalingEvent},
    utils::{spawn_abortable, BackoffDelayer, TaskHandle},
};

use self::{client_state::RemoteClientState, producer::ProducerSlots};

use super::{Dependencies, RtcManager, RtcManagerError, RtcManagerEvent};

type Result<T> = std::result::Result<T, Traced<RtcManagerError>>;

/// [`RtcManager`] sending local media to and receiving remote media from an
/// SFU over a send/recv transport pair.
pub struct SfuRtcManager(Rc<Inner>);

struct Inner {
    /// ID of the local client.
    self_id: ClientId,

    /// Name of the served room.
    room_name: String,

    /// [`Url`] of the SFU control channel.
    url: Url,

    deps: Dependencies,

    /// Control channel of the SFU.
    rpc: Rc<RpcClient>,

    /// Media engine device of this session.
    device: Rc<dyn SfuDevice>,

    /// Transport carrying local producers.
    send_transport: RefCell<Option<Rc<dyn SfuTransport>>>,

    /// Transport carrying remote consumers.
    recv_transport: RefCell<Option<Rc<dyn SfuTransport>>>,

    producers: ProducerSlots,

    /// Received media keyed by the remote client IDs.
    clients: RefCell<HashMap<ClientId, RemoteClientState>>,

    /// Owners of the consumers keyed by the consumer IDs.
    consumer_owners: RefCell<HashMap<String, ClientId>>,

    /// Sent local streams.
    local_streams: RefCell<Vec<LocalStream>>,

    /// Delays of the session re-establishment attempts.
    reconnect_delayer: RefCell<BackoffDelayer>,

    /// Running session (re-)establishment.
    connection_task: RefCell<Option<TaskHandle>>,

    /// Watchers of the transports connection states.
    transport_watchers: RefCell<Vec<TaskHandle>>,

    /// Running ICE restarts keyed by the transport IDs.
    ice_restarts: RefCell<HashMap<String, TaskHandle>>,

    /// Whether [`RtcManager::disconnect_all`] was called.
    closed: Cell<bool>,

    /// Subscribers of [`RtcManagerEvent`]s.
    subs: RefCell<Vec<mpsc::UnboundedSender<RtcManagerEvent>>>,

    /// Listener of the SFU control channel.
    listener: RefCell<Option<TaskHandle>>,
}

impl SfuRtcManager {
    /// Creates new [`SfuRtcManager`] and starts establishing the session with
    /// the SFU at the provided [`Url`].
    ///
    /// # Errors
    ///
    /// With [`RtcManagerError::MissingClientId`] if `self_id` is empty.
    pub fn new(
        self_id: ClientId,
        room_name: String,
        url: Url,
        deps: Dependencies,
    ) -> Result<Self> {
        if self_id.is_empty() {
            return Err(tracerr::new!(RtcManagerError::MissingClientId));
        }
        let factory = Rc::clone(&deps.rpc_transports);
        let rpc = Rc::new(RpcClient::new(
            deps.conf.rpc.clone(),
            Box::new(move |url: Url| (*factory)(url)),
        ));
        let producers = ProducerSlots::new(Box::new({
            let rpc = Rc::downgrade(&rpc);
            move |ids| {
                if let Some(rpc) = rpc.upgrade() {
                    if let Err(e) =
                        rpc.notify("closeProducers", json!({ "producerIds": ids }))
                    {
                        warn!("Failed to notify SFU about closed producers: {}", e);
                    }
                }
            }
        }));
        let reconnect_delayer = BackoffDelayer::new(
            deps.conf.rpc.reconnect_initial_delay,
            deps.conf.rpc.reconnect_multiplier,
            deps.conf.rpc.reconnect_max_delay,
        );
        let events = rpc.subscribe();
        let inner = Rc::new(Inner {
            self_id,
            room_name,
            url,
            device: deps.sfu_devices.create(),
            deps,
            rpc,
            send_transport: RefCell::default(),
            recv_transport: RefCell::default(),
            producers,
            clients: RefCell::default(),
            consumer_owners: RefCell::default(),
            local_streams: RefCell::default(),
            reconnect_delayer: RefCell::new(reconnect_delayer),
            connection_task: RefCell::default(),
            transport_watchers: RefCell::default(),
            ice_restarts: RefCell::default(),
            closed: Cell::new(false),
            subs: RefCell::default(),
            listener: RefCell::default(),
        });
        let listener =
            spawn_abortable(Inner::listen(Rc::downgrade(&inner), events));
        *inner.listener.borrow_mut() = Some(listener);
        inner.spawn_connect();

        Ok(Self(inner))
    }
}

#[async_trait(?Send)]
impl RtcManager for SfuRtcManager {
    fn is_initialized_with(
        &self,
        self_id: &ClientId,
        room_name: &str,
        is_sfu: bool,
    ) -> bool {
        is_sfu && &self.0.self_id == self_id && self.0.room_name == room_name
    }

    fn has_connection(&self, client_id: &ClientId) -> bool {
        self.0
            .clients
            .borrow()
            .get(client_id)
            .map_or(false, RemoteClientState::has_consumers)
    }

    fn subscribe(&self) -> LocalBoxStream<'static, RtcManagerEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.0.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    async fn handle_signaling_event(&self, event: SignalingEvent) {
        let this = &self.0;
        match event {
            SignalingEvent::RoomJoined {
                room: Some(room), ..
            } => {
                let present: HashSet<_> = room
                    .clients
                    .iter()
                    .map(|c| &c.id)
                    .chain(&room.held_back)
                    .cloned()
                    .collect();
                let gone: Vec<_> = this
                    .clients
                    .borrow()
                    .keys()
                    .filter(|id| !present.contains(*id))
                    .cloned()
                    .collect();
                for client_id in gone {
                    this.disconnect(&client_id);
                }
                for client in &room.clients {
                    if client.id != this.self_id {
                        this.on_client(client);
                    }
                }
            }
            SignalingEvent::NewClient(client) => this.on_client(&client),
            SignalingEvent::ClientLeft { client_id } => {
                this.disconnect(&client_id);
            }
            SignalingEvent::ScreenshareStarted {
                client_id,
                stream_id,
            } => {
                this.clients
                    .borrow_mut()
                    .entry(client_id)
                    .or_default()
                    .set_screen_stream(stream_id);
            }
            SignalingEvent::ScreenshareStopped {
                client_id,
                stream_id,
            } => this.stop_screenshare(client_id, stream_id),
            SignalingEvent::AudioEnabled {
                client_id,
                is_audio_enabled,
            } => {
                this.toggle_consumers(
                    &client_id,
                    MediaKind::Audio,
                    is_audio_enabled,
                )
                .await;
            }
            SignalingEvent::VideoEnabled {
                client_id,
                is_video_enabled,
            } => {
                this.toggle_consumers(
                    &client_id,
                    MediaKind::Video,
                    is_video_enabled,
                )
                .await;
            }
            SignalingEvent::RoomJoined { room: None, .. }
            | SignalingEvent::Connected
            | SignalingEvent::Disconnected
            | SignalingEvent::PendingClientLeft { .. }
            | SignalingEvent::SdpOffer { .. }
            | SignalingEvent::SdpAnswer { .. }
            | SignalingEvent::IceCandidate { .. }
            | SignalingEvent::IceEndOfCandidates { .. }
            | SignalingEvent::ReadyToReceiveOffer { .. }
            | SignalingEvent::MediaServerConfig { .. } => {}
        }
    }

    async fn accept_new_stream(&self, client_id: ClientId, stream_id: String) {
        let this = &self.0;
        let emissions = this
            .clients
            .borrow_mut()
            .entry(client_id.clone())
            .or_default()
            .accept(&stream_id);
        let ids: Vec<_> =
            emissions.iter().map(|e| e.consumer_id.clone()).collect();
        for emission in emissions {
            this.emit(RtcManagerEvent::StreamAdded {
                client_id: client_id.clone(),
                stream_id: emission.stream_id,
                track: emission.track,
            });
        }
        this.request_batch("resumeConsumers", "consumerIds", ids).await;
    }

    async fn add_local_stream(&self, stream: LocalStream) {
        let this = &self.0;
        {
            let mut streams = this.local_streams.borrow_mut();
            streams.retain(|s| s.id != stream.id);
            streams.push(stream.clone());
        }
        let is_camera = stream.is_camera();
        for track in stream.tracks {
            let source = source_of(is_camera, track.kind);
            let transport = this.send_transport.borrow().clone();
            if let Err(e) =
                this.producers.set_track(source, track, transport).await
            {
                error!("Failed to produce {:?}: {}", source, e);
            }
        }
    }

    async fn remove_local_stream(&self, stream_id: &str) {
        let this = &self.0;
        let removed = {
            let mut streams = this.local_streams.borrow_mut();
            let pos = streams.iter().position(|s| s.id == stream_id);
            pos.map(|pos| streams.remove(pos))
        };
        if let Some(stream) = removed {
            let is_camera = stream.is_camera();
            for kind in &[MediaKind::Audio, MediaKind::Video] {
                this.producers.remove(source_of(is_camera, *kind));
            }
        }
    }

    async fn set_media_enabled(&self, kind: MediaKind, enabled: bool) {
        let this = &self.0;
        let source = source_of(true, kind);
        if let Some(id) = this.producers.set_paused(source, !enabled) {
            let method = if enabled {
                "resumeProducers"
            } else {
                "pauseProducers"
            };
            this.request_batch(method, "producerIds", vec![id]).await;
        }
    }

    /// Sending bitrate of an SFU session is negotiated by the SFU itself.
    fn update_bandwidth(&self) {
        trace!("Bandwidth update skipped for SFU session");
    }

    fn disconnect(&self, client_id: &ClientId) {
        self.0.disconnect(client_id);
    }

    fn disconnect_all(&self) {
        self.0.disconnect_all();
    }
}

impl Inner {
    /// Handles [`RpcEvent`]s while the manager is alive.
    async fn listen(this: Weak<Self>, mut events: LocalBoxStream<'static, RpcEvent>) {
        while let Some(event) = events.next().await {
            match this.upgrade() {
                Some(this) => this.on_rpc_event(event),
                None => break,
            }
        }
    }

    fn on_rpc_event(self: &Rc<Self>, event: RpcEvent) {
        match event {
            RpcEvent::Message { method, data } => {
                self.on_sfu_message(None, &method, data);
            }
            RpcEvent::Request { id, method, data } => {
                self.on_sfu_message(Some(id), &method, data);
            }
            RpcEvent::ConnectionLost(msg) => {
                warn!("SFU connection lost: {}", msg.reason);
                self.spawn_connect();
            }
        }
    }

    fn on_sfu_message(
        self: &Rc<Self>,
        request: Option<RequestId>,
        method: &str,
        data: Value,
    ) {
        match method {
            "consumerReady" | "newConsumer" => {
                match serde_json::from_value::<ConsumerOptions>(data) {
                    Ok(options) => {
                        let this = Rc::clone(self);
                        platform::spawn(async move {
                            let result = this.consume(options).await;
                            if let Err(e) = &result {
                                error!("Failed to consume: {}", e);
                            }
                            this.respond(
                                request,
                                result.map_err(|e| e.into_inner().to_string()),
                            );
                        });
                    }
                    Err(e) => {
                        warn!("Malformed `{}`: {}", method, e);
                        self.respond(request, Err(e.to_string()));
                    }
                }
            }
            "consumerClosed" => {
                match data.get("consumerId").and_then(Value::as_str) {
                    Some(id) => self.close_consumer(id),
                    None => warn!("Malformed `consumerClosed`: {}", data),
                }
                self.respond(request, Ok(()));
            }
            "producerClosed" => {
                match data.get("producerId").and_then(Value::as_str) {
                    Some(id) => self.producers.on_closed_by_sfu(id),
                    None => warn!("Malformed `producerClosed`: {}", data),
                }
                self.respond(request, Ok(()));
            }
            _ => {
                debug!("Unsupported SFU method `{}`", method);
                self.respond(request, Err(format!("unsupported `{}`", method)));
            }
        }
    }

    /// Answers the SFU request, if any.
    fn respond(
        &self,
        request: Option<RequestId>,
        result: std::result::Result<(), String>,
    ) {
        if let Some(id) = request {
            let result = result
                .map(|()| json!({}))
                .map_err(|reason| ResponseError { code: None, reason });
            if let Err(e) = self.rpc.respond(id, result) {
                warn!("Failed to answer SFU request {}: {}", id, e);
            }
        }
    }

    /// Restarts session (re-)establishment.
    fn spawn_connect(self: &Rc<Self>) {
        let task = spawn_abortable(Self::keep_connected(Rc::downgrade(self)));
        *self.connection_task.borrow_mut() = Some(task);
    }

    /// Establishes the session, retrying with backoff until it succeeds.
    async fn keep_connected(this: Weak<Self>) {
        loop {
            let delay = {
                let inner = match this.upgrade() {
                    Some(inner) => inner,
                    None => return,
                };
                match inner.initialize().await {
                    Ok(()) => {
                        inner.reconnect_delayer.borrow_mut().reset();
                        return;
                    }
                    Err(e) => {
                        warn!("Failed to establish SFU session: {}", e);
                        inner.rpc.close();
                        inner.reconnect_delayer.borrow_mut().get_delay()
                    }
                }
            };
            platform::delay_for(delay).await;
        }
    }

    /// Connects the control channel, loads the device, creates the transport
    /// pair and produces the desired local tracks.
    async fn initialize(self: &Rc<Self>) -> Result<()> {
        Rc::clone(&self.rpc)
            .connect(self.url.clone())
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RtcManagerError))?;
        if !self.device.is_loaded() {
            let caps = self.request("getCapabilities", json!({})).await?;
            let router = caps
                .get("routerRtpCapabilities")
                .cloned()
                .ok_or_else(|| {
                    tracerr::new!(RtcManagerError::BadResponse(
                        "no `routerRtpCapabilities`".to_owned()
                    ))
                })?;
            self.device
                .load(router)
                .await
                .map_err(tracerr::map_from_and_wrap!(=> RtcManagerError))?;
        }
        self.request(
            "setCapabilities",
            json!({ "rtpCapabilities": self.device.rtp_capabilities() }),
        )
        .await?;

        self.close_transports();
        let send = self.create_transport(TransportDirection::Send).await?;
        let recv = self.create_transport(TransportDirection::Recv).await?;
        *self.send_transport.borrow_mut() = Some(Rc::clone(&send));
        *self.recv_transport.borrow_mut() = Some(recv);

        self.producers.forget_producers();
        self.producers.produce_all(&send).await;
        info!("SFU session with {} established", self.url);

        Ok(())
    }

    async fn create_transport(
        self: &Rc<Self>,
        direction: TransportDirection,
    ) -> Result<Rc<dyn SfuTransport>> {
        let producing = direction == TransportDirection::Send;
        let data = self
            .request(
                "createTransport",
                json!({ "producing": producing, "consuming": !producing }),
            )
            .await?;
        let options: TransportOptions = serde_json::from_value(data)
            .map_err(|e| {
                tracerr::new!(RtcManagerError::BadResponse(e.to_string()))
            })?;
        let handler: Rc<dyn TransportHandler> =
            Rc::new(TransportSignaller(Rc::downgrade(&self.rpc)));
        let transport = self
            .device
            .create_transport(direction, options, handler)
            .map_err(tracerr::map_from_and_wrap!(=> RtcManagerError))?;
        debug!("SFU {} transport {} created", direction, transport.id());

        let watcher = spawn_abortable(Self::watch_transport(
            Rc::downgrade(self),
            Rc::clone(&transport),
        ));
        self.transport_watchers.borrow_mut().push(watcher);

        Ok(transport)
    }

    /// Closes the current transports together with everything they carry.
    fn close_transports(&self) {
        self.transport_watchers.borrow_mut().clear();
        self.ice_restarts.borrow_mut().clear();
        let mut consumers = Vec::new();
        let mut removed = Vec::new();
        for (client_id, state) in self.clients.borrow_mut().iter_mut() {
            let (dropped, emitted) = state.drop_consumers();
            consumers.extend(dropped);
            removed.extend(emitted.into_iter().map(|s| (client_id.clone(), s)));
        }
        for consumer in consumers {
            consumer.close();
        }
        for (client_id, stream_id) in removed {
            self.emit(RtcManagerEvent::StreamRemoved {
                client_id,
                stream_id,
            });
        }
        self.consumer_owners.borrow_mut().clear();
        let send = self.send_transport.borrow_mut().take();
        let recv = self.recv_transport.borrow_mut().take();
        for transport in send.into_iter().chain(recv) {
            transport.close();
        }
    }

    /// Restarts ICE of the provided transport whenever it disconnects.
    async fn watch_transport(this: Weak<Self>, transport: Rc<dyn SfuTransport>) {
        let mut states = transport.on_connection_state_change();
        while let Some(state) = states.next().await {
            let inner = match this.upgrade() {
                Some(inner) => inner,
                None => break,
            };
            match state {
                IceConnectionState::Disconnected | IceConnectionState::Failed => {
                    let mut restarts = inner.ice_restarts.borrow_mut();
                    if !restarts.contains_key(&transport.id()) {
                        debug!("SFU transport {} is {:?}", transport.id(), state);
                        let task = spawn_abortable(Self::restart_ice(
                            Rc::downgrade(&inner),
                            Rc::clone(&transport),
                        ));
                        restarts.insert(transport.id(), task);
                    }
                }
                IceConnectionState::Connected | IceConnectionState::Completed => {
                    drop(inner.ice_restarts.borrow_mut().remove(&transport.id()));
                }
                IceConnectionState::New
                | IceConnectionState::Checking
                | IceConnectionState::Closed => {}
            }
        }
    }

    /// Requests fresh ICE parameters for the provided transport with
    /// exponential backoff until it reconnects.
    async fn restart_ice(this: Weak<Self>, transport: Rc<dyn SfuTransport>) {
        let conf = match this.upgrade() {
            Some(inner) => inner.deps.conf.sfu.clone(),
            None => return,
        };
        for retry in 0..conf.ice_restart_max_retries {
            platform::delay_for(conf.ice_restart_delay(retry)).await;
            if matches!(
                transport.connection_state(),
                IceConnectionState::Connected
                    | IceConnectionState::Completed
                    | IceConnectionState::Closed
            ) {
                return;
            }
            let inner = match this.upgrade() {
                Some(inner) => inner,
                None => return,
            };
            match inner.request_ice_restart(&*transport).await {
                Ok(()) => {
                    info!("ICE of SFU transport {} restarted", transport.id());
                    return;
                }
                Err(e) if is_transport_missing(e.as_ref()) => {
                    warn!("SFU forgot transport {}: {}", transport.id(), e);
                    return;
                }
                Err(e) => {
                    warn!(
                        "ICE restart #{} of SFU transport {} failed: {}",
                        retry + 1,
                        transport.id(),
                        e,
                    );
                }
            }
        }
        error!("Gave up restarting ICE of SFU transport {}", transport.id());
    }

    async fn request_ice_restart(&self, transport: &dyn SfuTransport) -> Result<()> {
        let data = self
            .request("restartIce", json!({ "transportId": transport.id() }))
            .await?;
        let params = data.get("iceParameters").cloned().ok_or_else(|| {
            tracerr::new!(RtcManagerError::BadResponse(
                "no `iceParameters`".to_owned()
            ))
        })?;
        transport
            .restart_ice(params)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RtcManagerError))
    }

    /// Starts consuming a remote track announced by the SFU.
    async fn consume(&self, options: ConsumerOptions) -> Result<()> {
        let client_id = options.app_data.client_id.clone().ok_or_else(|| {
            tracerr::new!(RtcManagerError::BadResponse(
                "consumer has no owner".to_owned()
            ))
        })?;
        let source = options.app_data.source;
        let transport = self
            .recv_transport
            .borrow()
            .clone()
            .ok_or_else(|| tracerr::new!(RtcManagerError::NotReady))?;
        let consumer = transport
            .consume(options)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RtcManagerError))?;
        if self.closed.get() {
            consumer.close();
            return Ok(());
        }
        debug!("Consuming {:?} of {} with {}", source, client_id, consumer.id());

        self.consumer_owners
            .borrow_mut()
            .insert(consumer.id(), client_id.clone());
        let emission = self
            .clients
            .borrow_mut()
            .entry(client_id.clone())
            .or_default()
            .add_consumer(consumer, source);
        if let Some(emission) = emission {
            self.emit(RtcManagerEvent::StreamAdded {
                client_id,
                stream_id: emission.stream_id,
                track: emission.track,
            });
            self.request_batch(
                "resumeConsumers",
                "consumerIds",
                vec![emission.consumer_id],
            )
            .await;
        }
        Ok(())
    }

    fn close_consumer(&self, consumer_id: &str) {
        let owner = self.consumer_owners.borrow_mut().remove(consumer_id);
        let consumer = owner.and_then(|client_id| {
            self.clients
                .borrow_mut()
                .get_mut(&client_id)
                .and_then(|c| c.remove_consumer(consumer_id))
        });
        match consumer {
            Some(consumer) => consumer.close(),
            None => debug!("SFU closed unknown consumer {}", consumer_id),
        }
    }

    fn on_client(&self, client: &Client) {
        let mut clients = self.clients.borrow_mut();
        let state = clients.entry(client.id.clone()).or_default();
        let screen = client
            .streams
            .iter()
            .find(|s| s.as_str() != LocalStream::CAMERA_STREAM_ID);
        if let Some(stream_id) = screen {
            state.set_screen_stream(stream_id.clone());
        }
    }

    fn stop_screenshare(&self, client_id: ClientId, stream_id: String) {
        let stopped = self
            .clients
            .borrow_mut()
            .get_mut(&client_id)
            .map(RemoteClientState::stop_screenshare);
        if let Some((consumers, emitted)) = stopped {
            self.close_consumers(consumers);
            if emitted {
                self.emit(RtcManagerEvent::StreamRemoved {
                    client_id,
                    stream_id,
                });
            }
        }
    }

    /// Pauses or resumes the emitted camera consumers of the provided kind.
    async fn toggle_consumers(
        &self,
        client_id: &ClientId,
        kind: MediaKind,
        enabled: bool,
    ) {
        let ids = self
            .clients
            .borrow()
            .get(client_id)
            .map(|c| c.webcam_consumer_ids(kind, true))
            .unwrap_or_default();
        let method = if enabled {
            "resumeConsumers"
        } else {
            "pauseConsumers"
        };
        self.request_batch(method, "consumerIds", ids).await;
    }

    fn close_consumers(&self, consumers: Vec<Rc<dyn SfuConsumer>>) {
        let mut owners = self.consumer_owners.borrow_mut();
        for consumer in consumers {
            owners.remove(&consumer.id());
            consumer.close();
        }
    }

    fn disconnect(&self, client_id: &ClientId) {
        let removed = self.clients.borrow_mut().remove(client_id);
        if let Some(mut state) = removed {
            let (consumers, emitted) = state.close();
            self.close_consumers(consumers);
            for stream_id in emitted {
                self.emit(RtcManagerEvent::StreamRemoved {
                    client_id: client_id.clone(),
                    stream_id,
                });
            }
        }
    }

    fn disconnect_all(&self) {
        self.closed.set(true);
        drop(self.connection_task.borrow_mut().take());
        drop(self.listener.borrow_mut().take());
        self.close_transports();
        self.clients.borrow_mut().clear();
        self.producers.close_all();
        self.rpc.close();
    }

    async fn request(&self, method: &str, data: Value) -> Result<Value> {
        self.rpc
            .request(method, data)
            .await
            .map_err(tracerr::map_from_and_wrap!(=> RtcManagerError))
    }

    /// Sends a single request carrying all the provided IDs.
    async fn request_batch(&self, method: &str, key: &str, ids: Vec<String>) {
        if ids.is_empty() {
            return;
        }
        let mut data = serde_json::Map::new();
        drop(data.insert(key.to_owned(), json!(ids)));
        if let Err(e) = self.request(method, Value::Object(data)).await {
            warn!("SFU `{}` failed: {}", method, e);
        }
    }

    fn emit(&self, event: RtcManagerEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}

/// [`TransportHandler`] relaying the transport round trips over the SFU
/// control channel.
struct TransportSignaller(Weak<RpcClient>);

impl TransportSignaller {
    fn request(
        &self,
        method: &'static str,
        data: Value,
    ) -> LocalBoxFuture<'static, platform::sfu::Result<Value>> {
        let rpc = Weak::clone(&self.0);
        Box::pin(async move {
            let rpc = rpc.upgrade().ok_or_else(|| tracerr::new!(SfuError::Closed))?;
            rpc.request(method, data).await.map_err(|e| {
                tracerr::new!(SfuError::Signalling(e.into_inner().to_string()))
            })
        })
    }
}

impl TransportHandler for TransportSignaller {
    fn connect(
        &self,
        transport_id: String,
        dtls_parameters: DtlsParameters,
    ) -> LocalBoxFuture<'static, platform::sfu::Result<()>> {
        let request = self.request(
            "connectTransport",
            json!({
                "transportId": transport_id,
                "dtlsParameters": dtls_parameters,
            }),
        );
        Box::pin(async move { request.await.map(drop) })
    }

    fn produce(
        &self,
        transport_id: String,
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: AppData,
    ) -> LocalBoxFuture<'static, platform::sfu::Result<String>> {
        let request = self.request(
            "produce",
            json!({
                "transportId": transport_id,
                "kind": kind,
                "rtpParameters": rtp_parameters,
                "appData": app_data,
            }),
        );
        Box::pin(async move {
            let data = request.await?;
            data.get("id")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
                .ok_or_else(|| {
                    tracerr::new!(SfuError::Signalling(
                        "`produce` answered without `id`".to_owned()
                    ))
                })
        })
    }
}

/// Returns [`MediaSource`] of a local track.
fn source_of(is_camera: bool, kind: MediaKind) -> MediaSource {
    match (is_camera, kind) {
        (true, MediaKind::Audio) => MediaSource::Mic,
        (true, MediaKind::Video) => MediaSource::Webcam,
        (false, MediaKind::Audio) => MediaSource::ScreenAudio,
        (false, MediaKind::Video) => MediaSource::ScreenVideo,
    }
}

/// Indicates whether the SFU rejected a request because it does not know
/// the transport anymore.
fn is_transport_missing(err: &RtcManagerError) -> bool {
    match err {
        RtcManagerError::Rpc(RpcClientError::Rejected(e)) => {
            let reason = e.reason.to_lowercase();
            reason.contains("missing transport")
                || reason.contains("no such transport")
        }
        _ => false,
    }
}
