//! [`RtcManager`] connecting to every remote client directly.

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, HashSet},
    rc::{Rc, Weak},
};

use async_trait::async_trait;
use futures::{
    channel::mpsc, future, stream::LocalBoxStream, StreamExt as _,
};
use tracerr::Traced;

use crate::{
    bandwidth::BandwidthPolicy,
    log::prelude::*,
    peer::{
        ConnectionStatus, Session, SessionContext, SessionError, SessionEvent,
    },
    platform::{
        self, IceCandidate, IceServer, Instant, LocalStream, MediaKind,
        MediaTrack, RtcConfiguration,
    },
    signalling::{ClientId, Room, SignalingEvent, SignalingMessage},
    utils::{spawn_abortable, TaskHandle},
};

use super::{Dependencies, RtcManager, RtcManagerError, RtcManagerEvent};

/// [`RtcManager`] keeping a [`Session`] per remote client.
pub struct P2pRtcManager(Rc<Inner>);

struct Inner {
    /// ID of the local client.
    self_id: ClientId,

    /// Name of the served room.
    room_name: String,

    deps: Dependencies,

    /// Target video bandwidth policy.
    bandwidth: BandwidthPolicy,

    /// Sink of [`SessionEvent`]s handed to every new [`Session`].
    session_events: mpsc::UnboundedSender<SessionEvent>,

    /// [`Session`]s keyed by the remote client IDs.
    sessions: RefCell<HashMap<ClientId, Rc<Session>>>,

    /// Sent local streams, camera one first.
    local_streams: RefCell<Vec<LocalStream>>,

    /// Whether local audio is sent.
    audio_enabled: Cell<bool>,

    /// Whether local video is sent.
    video_enabled: Cell<bool>,

    /// ICE servers new connections are configured with.
    ice_servers: RefCell<Vec<IceServer>>,

    /// Time of the latest reverse offer request per remote client.
    reverse_offers: RefCell<HashMap<ClientId, Instant>>,

    /// Pending ICE restart checks per remote client.
    restart_checks: RefCell<HashMap<ClientId, TaskHandle>>,

    /// Scheduled release of the statistics connection.
    stats_release: RefCell<Option<TaskHandle>>,

    /// Subscribers of [`RtcManagerEvent`]s.
    subs: RefCell<Vec<mpsc::UnboundedSender<RtcManagerEvent>>>,

    /// Listener of [`SessionEvent`]s.
    listener: RefCell<Option<TaskHandle>>,
}

impl P2pRtcManager {
    /// Creates new [`P2pRtcManager`] serving the provided room as the
    /// provided local client.
    ///
    /// # Errors
    ///
    /// With [`RtcManagerError::MissingClientId`] if `self_id` is empty.
    pub fn new(
        self_id: ClientId,
        room_name: String,
        deps: Dependencies,
    ) -> Result<Self, Traced<RtcManagerError>> {
        if self_id.is_empty() {
            return Err(tracerr::new!(RtcManagerError::MissingClientId));
        }
        let (session_events, events_rx) = mpsc::unbounded();
        let inner = Rc::new(Inner {
            self_id,
            room_name,
            bandwidth: BandwidthPolicy::new(&deps.conf.features),
            deps,
            session_events,
            sessions: RefCell::default(),
            local_streams: RefCell::default(),
            audio_enabled: Cell::new(true),
            video_enabled: Cell::new(true),
            ice_servers: RefCell::default(),
            reverse_offers: RefCell::default(),
            restart_checks: RefCell::default(),
            stats_release: RefCell::default(),
            subs: RefCell::default(),
            listener: RefCell::default(),
        });
        let listener =
            spawn_abortable(Inner::listen(Rc::downgrade(&inner), events_rx));
        *inner.listener.borrow_mut() = Some(listener);

        Ok(Self(inner))
    }

    /// Returns [`Session`] with the provided remote client, if any.
    pub fn session(&self, client_id: &ClientId) -> Option<Rc<Session>> {
        self.0.session(client_id)
    }
}

#[async_trait(?Send)]
impl RtcManager for P2pRtcManager {
    fn is_initialized_with(
        &self,
        self_id: &ClientId,
        room_name: &str,
        is_sfu: bool,
    ) -> bool {
        !is_sfu && &self.0.self_id == self_id && self.0.room_name == room_name
    }

    fn has_connection(&self, client_id: &ClientId) -> bool {
        self.0.sessions.borrow().contains_key(client_id)
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
            } => this.on_room_joined(&room),
            SignalingEvent::NewClient(client) => {
                if !client.merge_with_old_client_state
                    && this.sessions.borrow().contains_key(&client.id)
                {
                    debug!("Dropping stale session with {}", client.id);
                    this.disconnect(&client.id);
                }
            }
            SignalingEvent::ClientLeft { client_id } => {
                this.disconnect(&client_id);
            }
            SignalingEvent::ReadyToReceiveOffer { client_id } => {
                if let Some(session) = this.connect(&client_id) {
                    this.spawn_offer(session, false);
                }
            }
            SignalingEvent::SdpOffer { client_id, sdp } => {
                if let Some(session) = this.connect(&client_id) {
                    this.spawn_answer(session, sdp);
                }
            }
            SignalingEvent::SdpAnswer { client_id, sdp } => {
                match this.session(&client_id) {
                    Some(session) => this.spawn_answer_handling(session, sdp),
                    None => warn!("SDP answer from unknown client {}", client_id),
                }
            }
            SignalingEvent::IceCandidate {
                client_id,
                candidate,
            } => this.spawn_add_candidate(&client_id, Some(candidate)),
            SignalingEvent::IceEndOfCandidates { client_id } => {
                this.spawn_add_candidate(&client_id, None);
            }
            SignalingEvent::MediaServerConfig { ice_servers } => {
                debug!("ICE servers refreshed");
                *this.ice_servers.borrow_mut() = ice_servers;
            }
            SignalingEvent::RoomJoined { room: None, .. }
            | SignalingEvent::Connected
            | SignalingEvent::Disconnected
            | SignalingEvent::PendingClientLeft { .. }
            | SignalingEvent::AudioEnabled { .. }
            | SignalingEvent::VideoEnabled { .. }
            | SignalingEvent::ScreenshareStarted { .. }
            | SignalingEvent::ScreenshareStopped { .. } => {}
        }
    }

    async fn accept_new_stream(&self, client_id: ClientId, stream_id: String) {
        let this = &self.0;
        if this.sessions.borrow().contains_key(&client_id) {
            trace!("Stream {} of {} rides the existing session", stream_id, client_id);
            return;
        }
        if this.connect(&client_id).is_some() {
            this.signal(SignalingMessage::ReadyToReceiveOffer {
                receiver_id: client_id,
            });
        }
    }

    async fn add_local_stream(&self, stream: LocalStream) {
        let this = &self.0;
        {
            let mut streams = this.local_streams.borrow_mut();
            streams.retain(|s| s.id != stream.id);
            if stream.is_camera() {
                streams.insert(0, stream.clone());
            } else {
                streams.push(stream.clone());
            }
        }
        let sessions = this.all_sessions();

        if stream.is_camera() {
            let tracks: Vec<_> = stream
                .tracks
                .iter()
                .filter(|t| this.is_enabled(t.kind))
                .cloned()
                .collect();
            future::join_all(sessions.into_iter().map(|session| {
                let tracks = tracks.clone();
                async move {
                    for track in tracks {
                        if let Err(e) = session.replace_track(None, track).await
                        {
                            warn!("Failed to replace track: {}", e);
                        }
                    }
                }
            }))
            .await;
            this.update_bandwidth();
        } else {
            future::join_all(sessions.into_iter().map(|session| {
                let tracks = stream.tracks.clone();
                this.renegotiate_with(session, move |session| {
                    for track in tracks {
                        if let Err(e) =
                            session.peer_connection().add_track(track)
                        {
                            warn!("Failed to add screen share track: {}", e);
                        }
                    }
                })
            }))
            .await;
        }
    }

    async fn remove_local_stream(&self, stream_id: &str) {
        let this = &self.0;
        let removed = {
            let mut streams = this.local_streams.borrow_mut();
            let pos = streams.iter().position(|s| s.id == stream_id);
            pos.map(|pos| streams.remove(pos))
        };
        let stream = match removed {
            Some(stream) => stream,
            None => return,
        };
        let track_ids: HashSet<_> =
            stream.tracks.iter().map(|t| t.id.clone()).collect();

        future::join_all(this.all_sessions().into_iter().map(|session| {
            let track_ids = track_ids.clone();
            this.renegotiate_with(session, move |session| {
                let pc = session.peer_connection();
                for sender in pc.senders() {
                    let owned = sender
                        .track
                        .as_ref()
                        .map_or(false, |t| track_ids.contains(&t.id));
                    if owned {
                        if let Err(e) = pc.remove_track(sender.id) {
                            warn!("Failed to remove track: {}", e);
                        }
                    }
                }
            })
        }))
        .await;
        if stream.is_camera() {
            this.update_bandwidth();
        }
    }

    async fn set_media_enabled(&self, kind: MediaKind, enabled: bool) {
        let this = &self.0;
        match kind {
            MediaKind::Audio => this.audio_enabled.set(enabled),
            MediaKind::Video => this.video_enabled.set(enabled),
        }
        let track = this.camera_track(kind);
        future::join_all(this.all_sessions().into_iter().map(|session| {
            let track = track.clone();
            async move {
                let result = match (enabled, track) {
                    (true, Some(track)) => session.replace_track(None, track).await,
                    (false, Some(track)) => {
                        let pc = session.peer_connection();
                        let sender = pc.senders().into_iter().find(|s| {
                            s.track.as_ref().map_or(false, |t| t.id == track.id)
                        });
                        match sender {
                            Some(sender) => pc
                                .replace_sender_track(sender.id, None)
                                .await
                                .map_err(tracerr::map_from_and_wrap!(
                                    => SessionError
                                )),
                            None => Ok(()),
                        }
                    }
                    (_, None) => Ok(()),
                };
                if let Err(e) = result {
                    warn!("Failed to toggle {:?} of {}: {}", kind, session.peer_id(), e);
                }
            }
        }))
        .await;
    }

    fn update_bandwidth(&self) {
        self.0.update_bandwidth();
    }

    fn disconnect(&self, client_id: &ClientId) {
        self.0.disconnect(client_id);
    }

    fn disconnect_all(&self) {
        self.0.disconnect_all();
    }
}

impl Inner {
    /// Handles [`SessionEvent`]s while the manager is alive.
    async fn listen(
        this: Weak<Self>,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) {
        while let Some(event) = events.next().await {
            match this.upgrade() {
                Some(this) => this.on_session_event(event),
                None => break,
            }
        }
    }

    fn on_session_event(self: &Rc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::IceCandidate {
                peer_id,
                candidate: Some(candidate),
            } => self.signal(SignalingMessage::IceCandidate {
                receiver_id: peer_id,
                candidate,
            }),
            SessionEvent::IceCandidate {
                peer_id,
                candidate: None,
            } => self.signal(SignalingMessage::IceEndOfCandidates {
                receiver_id: peer_id,
            }),
            SessionEvent::StatusChanged { peer_id, status } => {
                if status == ConnectionStatus::Disconnected {
                    self.schedule_ice_restart(peer_id.clone());
                }
                self.emit(RtcManagerEvent::ConnectionStatusChanged {
                    client_id: peer_id,
                    status,
                });
            }
            SessionEvent::NegotiationNeeded { peer_id } => {
                if let Some(session) = self.session(&peer_id) {
                    // Initial negotiation carries all the tracks anyway.
                    if session.ever_connected() {
                        self.spawn_offer(session, false);
                    }
                }
            }
            SessionEvent::RemoteTrack {
                peer_id,
                track,
                stream_id,
            } => self.emit(RtcManagerEvent::StreamAdded {
                client_id: peer_id,
                stream_id,
                track,
            }),
            SessionEvent::ConnectionBlockedByNetwork { peer_id } => {
                self.emit(RtcManagerEvent::ConnectionBlockedByNetwork {
                    client_id: peer_id,
                });
            }
        }
    }

    fn session(&self, client_id: &ClientId) -> Option<Rc<Session>> {
        self.sessions.borrow().get(client_id).cloned()
    }

    fn all_sessions(&self) -> Vec<Rc<Session>> {
        self.sessions.borrow().values().cloned().collect()
    }

    fn is_enabled(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio_enabled.get(),
            MediaKind::Video => self.video_enabled.get(),
        }
    }

    /// Returns track of the provided kind of the camera stream.
    fn camera_track(&self, kind: MediaKind) -> Option<MediaTrack> {
        self.local_streams
            .borrow()
            .iter()
            .find(|s| s.is_camera())
            .and_then(|s| s.tracks.iter().find(|t| t.kind == kind).cloned())
    }

    /// Returns [`Session`] with the provided client, creating it if needed.
    fn connect(&self, client_id: &ClientId) -> Option<Rc<Session>> {
        if let Some(session) = self.session(client_id) {
            return Some(session);
        }
        match self.create_session(client_id.clone()) {
            Ok(session) => Some(session),
            Err(e) => {
                error!("Failed to connect to {}: {}", client_id, e);
                None
            }
        }
    }

    /// Creates new [`Session`] with the provided client sending all the
    /// enabled local tracks.
    fn create_session(
        &self,
        client_id: ClientId,
    ) -> Result<Rc<Session>, Traced<SessionError>> {
        let features = &self.deps.conf.features;
        let pc = self
            .deps
            .peer_connections
            .create(RtcConfiguration {
                ice_servers: self.ice_servers.borrow().clone(),
                relay_only: features.use_only_turn,
                jitter_buffer_target_ms: features.jitter_buffer_target_ms,
            })
            .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
        for stream in self.local_streams.borrow().iter() {
            for track in &stream.tracks {
                if self.is_enabled(track.kind) {
                    let _ = pc
                        .add_track(track.clone())
                        .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
                }
            }
        }
        let session = Session::new(
            client_id.clone(),
            pc,
            SessionContext {
                conf: self.deps.conf.session.clone(),
                features: features.clone(),
                sdp: Rc::clone(&self.deps.sdp),
                events: self.session_events.clone(),
            },
        )
        .map_err(tracerr::wrap!())?;
        debug!("Session with {} created", client_id);

        drop(self.stats_release.borrow_mut().take());
        let previous = self
            .sessions
            .borrow_mut()
            .insert(client_id, Rc::clone(&session));
        if let Some(previous) = previous {
            previous.close();
        }
        self.update_bandwidth();

        Ok(session)
    }

    /// Keeps [`Session`]s of the clients merged after a reconnect or held
    /// back as pending to leave, and drops all the others.
    fn on_room_joined(&self, room: &Room) {
        let kept: HashSet<_> = room
            .clients
            .iter()
            .filter(|c| c.merge_with_old_client_state)
            .map(|c| &c.id)
            .chain(&room.held_back)
            .cloned()
            .collect();
        let stale: Vec<_> = self
            .sessions
            .borrow()
            .keys()
            .filter(|id| !kept.contains(*id))
            .cloned()
            .collect();
        for client_id in stale {
            self.disconnect(&client_id);
        }
    }

    /// Requests a bandwidth matching the current number of [`Session`]s from
    /// all of them.
    fn update_bandwidth(&self) {
        let sessions = self.all_sessions();
        let capture = self.camera_track(MediaKind::Video).and_then(|t| t.settings);
        let kbps = self.bandwidth.target_kbps(sessions.len(), capture);
        for session in sessions {
            platform::spawn(async move {
                if let Err(e) = session.change_bandwidth(kbps).await {
                    if e.as_ref() != &SessionError::Closed {
                        warn!(
                            "Failed to change bandwidth of {}: {}",
                            session.peer_id(),
                            e,
                        );
                    }
                }
            });
        }
    }

    /// Creates and sends an offer in background.
    fn spawn_offer(self: &Rc<Self>, session: Rc<Session>, ice_restart: bool) {
        let this = Rc::downgrade(self);
        platform::spawn(async move {
            let result = session.negotiate(ice_restart).await;
            if let Some(this) = this.upgrade() {
                this.on_offer_result(&session, result);
            }
        });
    }

    /// Sends the created offer, or asks the remote side to become an
    /// offerer if it could not be created.
    fn on_offer_result(
        &self,
        session: &Session,
        result: Result<String, Traced<SessionError>>,
    ) {
        let peer_id = session.peer_id().clone();
        match result {
            Ok(sdp) => self.signal(SignalingMessage::SdpOffer {
                receiver_id: peer_id,
                sdp,
            }),
            Err(e) if e.as_ref() == &SessionError::Closed => {}
            Err(e) => {
                error!("Failed to create offer for {}: {}", peer_id, e);
                self.maybe_reverse_offer(&peer_id);
            }
        }
    }

    /// Answers the remote offer in background.
    fn spawn_answer(self: &Rc<Self>, session: Rc<Session>, sdp: String) {
        let this = Rc::downgrade(self);
        platform::spawn(async move {
            let result = session.handle_offer(sdp).await;
            let this = match this.upgrade() {
                Some(this) => this,
                None => return,
            };
            let peer_id = session.peer_id().clone();
            match result {
                Ok(sdp) => this.signal(SignalingMessage::SdpAnswer {
                    receiver_id: peer_id,
                    sdp,
                }),
                Err(e) if e.as_ref() == &SessionError::Closed => {}
                Err(e) => error!("Failed to answer {}: {}", peer_id, e),
            }
        });
    }

    /// Applies the remote answer in background.
    fn spawn_answer_handling(self: &Rc<Self>, session: Rc<Session>, sdp: String) {
        let this = Rc::downgrade(self);
        platform::spawn(async move {
            let result = session.handle_answer(sdp).await;
            let this = match this.upgrade() {
                Some(this) => this,
                None => return,
            };
            match result {
                Ok(()) => {}
                Err(e) if e.as_ref() == &SessionError::Closed => {}
                Err(e) => {
                    let peer_id = session.peer_id().clone();
                    error!("Failed to apply answer of {}: {}", peer_id, e);
                    this.maybe_reverse_offer(&peer_id);
                }
            }
        });
    }

    /// Adds the remote ICE candidate in background.
    fn spawn_add_candidate(
        &self,
        client_id: &ClientId,
        candidate: Option<IceCandidate>,
    ) {
        let session = match self.session(client_id) {
            Some(session) => session,
            None => {
                debug!("ICE candidate of unknown client {}", client_id);
                return;
            }
        };
        platform::spawn(async move {
            if let Err(e) = session.add_ice_candidate(candidate).await {
                if e.as_ref() != &SessionError::Closed {
                    warn!("Failed to add ICE candidate: {}", e);
                }
            }
        });
    }

    /// Mutates tracks of the [`Session`] in its negotiation turn and
    /// renegotiates it without reacting to the engine's own renegotiation
    /// requests.
    async fn renegotiate_with<F>(&self, session: Rc<Session>, mutate: F)
    where
        F: FnOnce(&Session),
    {
        session.mute_negotiation_needed(true);
        let result = session.negotiate_with(false, mutate).await;
        self.on_offer_result(&session, result);
        session.mute_negotiation_needed(false);
    }

    /// Asks the remote client to become an offerer, at most once per
    /// cooldown.
    fn maybe_reverse_offer(&self, client_id: &ClientId) {
        if !self.deps.conf.features.reverse_offer_on_failure {
            return;
        }
        let now = Instant::now();
        let cooldown = self.deps.conf.session.reverse_offer_cooldown;
        {
            let mut reverse_offers = self.reverse_offers.borrow_mut();
            if let Some(at) = reverse_offers.get(client_id) {
                if now.duration_since(*at) < cooldown {
                    warn!("Reverse offer to {} suppressed", client_id);
                    return;
                }
            }
            let _ = reverse_offers.insert(client_id.clone(), now);
        }
        info!("Asking {} to take over as offerer", client_id);
        self.signal(SignalingMessage::ReadyToReceiveOffer {
            receiver_id: client_id.clone(),
        });
    }

    /// Restarts ICE of a disconnected [`Session`] unless it recovers within
    /// the configured delay.
    ///
    /// Only the side which created the latest offer restarts.
    fn schedule_ice_restart(self: &Rc<Self>, client_id: ClientId) {
        let delay = self.deps.conf.session.ice_restart_delay;
        let this = Rc::downgrade(self);
        let task = spawn_abortable({
            let client_id = client_id.clone();
            async move {
                platform::delay_for(delay).await;
                let this = match this.upgrade() {
                    Some(this) => this,
                    None => return,
                };
                let session = match this.session(&client_id) {
                    Some(session) => session,
                    None => return,
                };
                if session.status() != ConnectionStatus::Disconnected {
                    return;
                }
                if !session.was_offerer() {
                    debug!("{} is in charge of ICE restart", client_id);
                    return;
                }
                info!("Restarting ICE with {}", client_id);
                session.reset_candidate_evidence();
                this.spawn_offer(session, true);
            }
        });
        drop(self.restart_checks.borrow_mut().insert(client_id, task));
    }

    fn disconnect(&self, client_id: &ClientId) {
        let session = self.sessions.borrow_mut().remove(client_id);
        drop(self.restart_checks.borrow_mut().remove(client_id));
        let _ = self.reverse_offers.borrow_mut().remove(client_id);
        let session = match session {
            Some(session) => session,
            None => return,
        };
        debug!("Disconnecting from {}", client_id);
        session.close();
        self.update_bandwidth();
        if self.sessions.borrow().is_empty() {
            self.schedule_stats_release();
        }
    }

    /// Releases the statistics connection unless a new [`Session`] appears
    /// within the configured delay.
    fn schedule_stats_release(&self) {
        let delay = self.deps.conf.session.stats_release_delay;
        let stats = Rc::clone(&self.deps.stats);
        let task = spawn_abortable(async move {
            platform::delay_for(delay).await;
            debug!("Releasing statistics connection");
            stats.release();
        });
        *self.stats_release.borrow_mut() = Some(task);
    }

    fn disconnect_all(&self) {
        let sessions: Vec<_> =
            self.sessions.borrow_mut().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close();
        }
        self.restart_checks.borrow_mut().clear();
        self.reverse_offers.borrow_mut().clear();
        drop(self.stats_release.borrow_mut().take());
        drop(self.listener.borrow_mut().take());
    }

    fn signal(&self, msg: SignalingMessage) {
        self.deps.signaling.send(msg);
    }

    fn emit(&self, event: RtcManagerEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
