//! Negotiation state machine of a single connection to a remote peer.

mod ice_candidates;

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    rc::{Rc, Weak},
};

use derive_more::{Display, From};
use futures::{
    channel::{mpsc, oneshot},
    stream::LocalBoxStream,
    StreamExt as _,
};
use medea_reactive::ObservableCell;
use tracerr::Traced;

use crate::{
    conf,
    log::prelude::*,
    platform::{
        CandidateType, IceCandidate, IceConnectionState, MediaTrack,
        OfferOptions, PeerConnectionError, PeerConnectionEvent,
        RtcPeerConnection, SdpMunger, SdpTransform, SdpType, SignalingState,
    },
    signalling::ClientId,
    utils::{spawn_abortable, TaskHandle},
};

#[doc(inline)]
pub use self::ice_candidates::CandidateEvidence;

/// Connectivity status of a [`Session`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum ConnectionStatus {
    #[display(fmt = "new")]
    New,
    #[display(fmt = "connecting")]
    Connecting,
    #[display(fmt = "connected")]
    Connected,
    #[display(fmt = "disconnected")]
    Disconnected,
    #[display(fmt = "failed")]
    Failed,
}

impl ConnectionStatus {
    /// Maps engine's [`IceConnectionState`] to a [`ConnectionStatus`].
    ///
    /// `None` for [`IceConnectionState::Closed`], which is reached on an
    /// explicit close only.
    fn from_ice(state: IceConnectionState) -> Option<Self> {
        Some(match state {
            IceConnectionState::New => Self::New,
            IceConnectionState::Checking => Self::Connecting,
            IceConnectionState::Connected | IceConnectionState::Completed => {
                Self::Connected
            }
            IceConnectionState::Disconnected => Self::Disconnected,
            IceConnectionState::Failed => Self::Failed,
            IceConnectionState::Closed => return None,
        })
    }
}

/// Events emitted by a [`Session`] to its owner.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    /// Local ICE candidate to be sent to the remote peer. `None` means the
    /// end of candidates.
    IceCandidate {
        peer_id: ClientId,
        candidate: Option<IceCandidate>,
    },

    /// [`ConnectionStatus`] changed.
    StatusChanged {
        peer_id: ClientId,
        status: ConnectionStatus,
    },

    /// Renegotiation must be started by the owner.
    NegotiationNeeded { peer_id: ClientId },

    /// Remote track received.
    RemoteTrack {
        peer_id: ClientId,
        track: MediaTrack,
        stream_id: String,
    },

    /// Candidates gathering finished without any candidate reachable from
    /// outside of the local network.
    ConnectionBlockedByNetwork { peer_id: ClientId },
}

/// Errors that may occur in a [`Session`].
#[derive(Clone, Debug, Display, From, PartialEq)]
pub enum SessionError {
    /// [`Session`] is requested for an empty peer ID.
    #[display(fmt = "Session cannot be created without peer ID")]
    #[from(ignore)]
    MissingPeerId,

    /// [`Session`] was closed before the operation could run.
    #[display(fmt = "Session is closed")]
    #[from(ignore)]
    Closed,

    /// Engine rejected the operation.
    #[display(fmt = "{}", _0)]
    PeerConnection(PeerConnectionError),
}

type Result<T> = std::result::Result<T, Traced<SessionError>>;

/// Settings shared by all [`Session`]s of a manager.
#[derive(Clone)]
pub struct SessionContext {
    /// Session settings.
    pub conf: conf::Session,

    /// Behaviour toggles.
    pub features: conf::Features,

    /// SDP post-processor.
    pub sdp: Rc<dyn SdpMunger>,

    /// Sink of [`SessionEvent`]s.
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

/// Connection to a single remote peer serializing negotiation operations
/// against the underlying [`RtcPeerConnection`].
///
/// At most one negotiation operation runs at a time. Operations issued while
/// another one runs, or while the engine is not in a stable signaling state,
/// are queued and resumed in FIFO order.
pub struct Session {
    /// ID of the remote peer.
    peer_id: ClientId,

    /// Underlying engine.
    pc: Rc<dyn RtcPeerConnection>,

    ctx: SessionContext,

    /// [`ConnectionStatus`] derived from the engine's ICE state.
    status: ObservableCell<ConnectionStatus>,

    /// Whether [`ConnectionStatus::Connected`] was ever reached.
    ever_connected: Cell<bool>,

    /// Requested video bandwidth (in kbps). `0` means unrestricted.
    bandwidth: Cell<u32>,

    /// Whether the engine cannot update encoding parameters, so bandwidth is
    /// applied through SDP on the next negotiation.
    bandwidth_via_sdp: Cell<bool>,

    /// Whether relayed connection check was done.
    relay_checked: Cell<bool>,

    /// Whether a negotiation operation is running.
    operation_pending: ObservableCell<bool>,

    /// Operations waiting for their turn.
    queue: RefCell<VecDeque<oneshot::Sender<()>>>,

    /// Remote ICE candidates received before the remote description.
    early_candidates: RefCell<VecDeque<Option<IceCandidate>>>,

    /// Whether remote description was applied and early candidates flushed.
    has_remote_description: Cell<bool>,

    /// Whether local description was applied.
    has_local_description: Cell<bool>,

    /// Local offer to be applied together with the remote answer.
    pending_local_offer: RefCell<Option<String>>,

    /// Evidence from locally gathered candidates.
    local_evidence: Cell<CandidateEvidence>,

    /// Evidence from remote candidates.
    remote_evidence: Cell<CandidateEvidence>,

    /// Whether the latest offer was created by this side.
    was_offerer: Cell<bool>,

    /// Whether engine's negotiation needed notifications are suppressed.
    negotiation_needed_muted: Cell<bool>,

    /// Track replacements waiting for the first connection.
    deferred_replacements: RefCell<Vec<(Option<MediaTrack>, MediaTrack)>>,

    /// Whether [`Session::close`] was called.
    closed: Cell<bool>,

    /// Background jobs of this [`Session`].
    tasks: RefCell<Vec<TaskHandle>>,
}

impl Session {
    /// Creates new [`Session`] with the remote peer `peer_id` over the
    /// provided [`RtcPeerConnection`] and starts listening to its events.
    ///
    /// # Errors
    ///
    /// With [`SessionError::MissingPeerId`] if `peer_id` is empty.
    pub fn new(
        peer_id: ClientId,
        pc: Rc<dyn RtcPeerConnection>,
        ctx: SessionContext,
    ) -> Result<Rc<Self>> {
        if peer_id.is_empty() {
            return Err(tracerr::new!(SessionError::MissingPeerId));
        }
        let this = Rc::new(Self {
            peer_id,
            ctx,
            status: ObservableCell::new(ConnectionStatus::New),
            ever_connected: Cell::new(false),
            bandwidth: Cell::new(0),
            bandwidth_via_sdp: Cell::new(false),
            relay_checked: Cell::new(false),
            operation_pending: ObservableCell::new(false),
            queue: RefCell::default(),
            early_candidates: RefCell::default(),
            has_remote_description: Cell::new(false),
            has_local_description: Cell::new(false),
            pending_local_offer: RefCell::default(),
            local_evidence: Cell::default(),
            remote_evidence: Cell::default(),
            was_offerer: Cell::new(false),
            negotiation_needed_muted: Cell::new(false),
            deferred_replacements: RefCell::default(),
            closed: Cell::new(false),
            tasks: RefCell::default(),
            pc,
        });

        let events = this.pc.subscribe();
        let listener = spawn_abortable(Self::listen(Rc::downgrade(&this), events));
        this.tasks.borrow_mut().push(listener);

        Ok(this)
    }

    /// Returns ID of the remote peer.
    #[inline]
    pub fn peer_id(&self) -> &ClientId {
        &self.peer_id
    }

    /// Returns current [`ConnectionStatus`].
    #[inline]
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Subscribes to [`ConnectionStatus`] changes. Current status is emitted
    /// first.
    pub fn on_status_change(&self) -> LocalBoxStream<'static, ConnectionStatus> {
        self.status.subscribe()
    }

    /// Indicates whether this [`Session`] was ever connected.
    #[inline]
    pub fn ever_connected(&self) -> bool {
        self.ever_connected.get()
    }

    /// Returns requested video bandwidth (in kbps).
    #[inline]
    pub fn bandwidth(&self) -> u32 {
        self.bandwidth.get()
    }

    /// Indicates whether this side created the latest offer, so it's in
    /// charge of ICE restarts.
    #[inline]
    pub fn was_offerer(&self) -> bool {
        self.was_offerer.get()
    }

    /// Returns evidence collected from locally gathered ICE candidates.
    #[inline]
    pub fn local_evidence(&self) -> CandidateEvidence {
        self.local_evidence.get()
    }

    /// Returns evidence collected from remote ICE candidates.
    #[inline]
    pub fn remote_evidence(&self) -> CandidateEvidence {
        self.remote_evidence.get()
    }

    /// Indicates whether a negotiation operation runs or the engine is not in
    /// a stable signaling state.
    pub fn is_negotiation_locked(&self) -> bool {
        !self.can_run()
    }

    /// Returns underlying [`RtcPeerConnection`].
    #[inline]
    pub fn peer_connection(&self) -> &Rc<dyn RtcPeerConnection> {
        &self.pc
    }

    /// Creates an SDP offer, applies it as local description and returns it
    /// for transmission.
    ///
    /// If local offers are deferred, the offer is kept pending until the
    /// remote answer arrives.
    ///
    /// # Errors
    ///
    /// If the [`Session`] is closed, or the engine fails to create or apply
    /// the offer.
    pub async fn negotiate(&self, ice_restart: bool) -> Result<String> {
        self.negotiate_with(ice_restart, |_| {}).await
    }

    /// Same as [`Session::negotiate`], but runs `mutate` over this [`Session`]
    /// right before creating the offer, once the operation lock is taken.
    ///
    /// # Errors
    ///
    /// Same as [`Session::negotiate`]. `mutate` is not run if the
    /// [`Session`] is closed before its turn.
    pub async fn negotiate_with<F>(
        &self,
        ice_restart: bool,
        mutate: F,
    ) -> Result<String>
    where
        F: FnOnce(&Self),
    {
        let _guard = self.acquire().await?;
        mutate(self);

        let offer = self
            .pc
            .create_offer(OfferOptions { ice_restart })
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        let offer = self.munge(offer);
        self.was_offerer.set(true);

        if self.ctx.features.defer_local_offer {
            *self.pending_local_offer.borrow_mut() = Some(offer.clone());
        } else {
            self.pc
                .set_local_description(SdpType::Offer(offer.clone()))
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            self.has_local_description.set(true);
        }
        debug!("Created offer for {}", self.peer_id);

        Ok(offer)
    }

    /// Applies the remote offer and returns a local answer for transmission.
    ///
    /// # Errors
    ///
    /// If the [`Session`] is closed, or the engine rejects the offer or fails
    /// to create the answer.
    pub async fn handle_offer(&self, sdp: String) -> Result<String> {
        let _guard = self.acquire().await?;

        self.pc
            .set_remote_description(SdpType::Offer(sdp))
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        self.was_offerer.set(false);
        self.flush_early_candidates().await;

        let answer = self
            .pc
            .create_answer()
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        let answer = self.munge(answer);
        self.pc
            .set_local_description(SdpType::Answer(answer.clone()))
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        self.has_local_description.set(true);
        self.apply_bandwidth(false).await?;

        Ok(answer)
    }

    /// Applies the remote answer to the latest local offer, applying the
    /// deferred local offer first if there is one.
    ///
    /// Only waits for a running operation to finish: the engine is expected
    /// to be in a non-stable state here.
    ///
    /// # Errors
    ///
    /// If the [`Session`] is closed, or the engine rejects the answer.
    pub async fn handle_answer(&self, sdp: String) -> Result<()> {
        let _guard = self.acquire_for_answer().await?;

        let pending_offer = self.pending_local_offer.borrow_mut().take();
        if let Some(offer) = pending_offer {
            self.pc
                .set_local_description(SdpType::Offer(offer))
                .await
                .map_err(tracerr::map_from_and_wrap!())?;
            self.has_local_description.set(true);
        }
        self.pc
            .set_remote_description(SdpType::Answer(sdp))
            .await
            .map_err(tracerr::map_from_and_wrap!())?;
        self.flush_early_candidates().await;

        Ok(())
    }

    /// Adds a remote ICE candidate. `None` signals the end of candidates.
    ///
    /// Candidates received before the remote description are buffered and
    /// applied in order right after it.
    ///
    /// # Errors
    ///
    /// If the engine rejects the candidate.
    pub async fn add_ice_candidate(
        &self,
        candidate: Option<IceCandidate>,
    ) -> Result<()> {
        if let Some(c) = &candidate {
            let mut evidence = self.remote_evidence.get();
            evidence.record(c);
            self.remote_evidence.set(evidence);
        }
        if self.closed.get() {
            return Err(tracerr::new!(SessionError::Closed));
        }
        if !self.has_remote_description.get() {
            self.early_candidates.borrow_mut().push_back(candidate);
            return Ok(());
        }
        self.pc
            .add_ice_candidate(candidate)
            .await
            .map_err(tracerr::map_from_and_wrap!())
    }

    /// Requests the provided video bandwidth cap (in kbps, `0` lifts it).
    ///
    /// Applied through encoding parameters when the engine supports that,
    /// otherwise renegotiation with an SDP bandwidth line is requested.
    ///
    /// # Errors
    ///
    /// If the [`Session`] is closed, or the engine fails to apply the cap.
    pub async fn change_bandwidth(&self, kbps: u32) -> Result<()> {
        if self.bandwidth.get() == kbps {
            return Ok(());
        }
        let _guard = self.acquire().await?;
        if self.bandwidth.replace(kbps) == kbps {
            return Ok(());
        }
        if !self.has_local_description.get() {
            return Ok(());
        }
        debug!("Changing bandwidth of {} to {} kbps", self.peer_id, kbps);
        self.apply_bandwidth(true).await
    }

    /// Restricts bandwidth of a relayed connection if no cap was requested.
    ///
    /// Checked once, after the first successful connection.
    ///
    /// # Errors
    ///
    /// If the restriction cannot be applied.
    pub async fn maybe_restrict_relay_bandwidth(&self) -> Result<()> {
        if self.relay_checked.replace(true)
            || self.bandwidth.get() != 0
            || self.ctx.features.unlimited_relay_bandwidth
        {
            return Ok(());
        }
        if self.pc.selected_candidate_pair_type().await
            == Some(CandidateType::Relay)
        {
            info!("Connection to {} is relayed, restricting", self.peer_id);
            self.change_bandwidth(self.ctx.conf.relay_bandwidth_kbps)
                .await?;
        }
        Ok(())
    }

    /// Swaps the `old` local track (or any track of the same kind if `old`
    /// is `None`) with the `new` one.
    ///
    /// Deferred until the first successful connection. Falls back to
    /// remove+add with a forced renegotiation when in place replacement is
    /// not supported.
    ///
    /// # Errors
    ///
    /// If the engine fails to update senders.
    pub async fn replace_track(
        &self,
        old: Option<MediaTrack>,
        new: MediaTrack,
    ) -> Result<()> {
        if self.closed.get() {
            return Err(tracerr::new!(SessionError::Closed));
        }
        if !self.ever_connected.get() {
            self.deferred_replacements.borrow_mut().push((old, new));
            return Ok(());
        }

        let senders = self.pc.senders();
        let sender = old
            .as_ref()
            .and_then(|old| {
                senders.iter().find(|s| {
                    s.track.as_ref().map_or(false, |t| t.id == old.id)
                })
            })
            .or_else(|| senders.iter().find(|s| s.kind == new.kind));

        let sender = match sender {
            Some(sender) => sender.id,
            None => {
                let _ = self
                    .pc
                    .add_track(new)
                    .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
                self.request_renegotiation();
                return Ok(());
            }
        };

        match self.pc.replace_sender_track(sender, Some(new.clone())).await {
            Ok(()) => Ok(()),
            Err(e) if e.as_ref() == &PeerConnectionError::Unsupported => {
                self.pc
                    .remove_track(sender)
                    .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
                let _ = self
                    .pc
                    .add_track(new)
                    .map_err(tracerr::map_from_and_wrap!(=> SessionError))?;
                self.request_renegotiation();
                Ok(())
            }
            Err(e) => Err(tracerr::map_from_and_new!(e)),
        }
    }

    /// Suppresses (or restores) renegotiation requests triggered by the
    /// engine itself.
    #[inline]
    pub fn mute_negotiation_needed(&self, mute: bool) {
        self.negotiation_needed_muted.set(mute);
    }

    /// Forgets all the collected candidate evidence. Used before an ICE
    /// restart.
    pub fn reset_candidate_evidence(&self) {
        self.local_evidence.set(CandidateEvidence::default());
        self.remote_evidence.set(CandidateEvidence::default());
    }

    /// Indicates whether [`Session::close`] was called.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Closes this [`Session`] and its [`RtcPeerConnection`], rejecting all
    /// the queued operations. Idempotent.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        debug!("Closing session with {}", self.peer_id);
        self.queue.borrow_mut().clear();
        self.early_candidates.borrow_mut().clear();
        self.deferred_replacements.borrow_mut().clear();
        self.tasks.borrow_mut().clear();
        self.pc.close();
    }

    /// Asks the owner to renegotiate this [`Session`].
    fn request_renegotiation(&self) {
        self.emit(SessionEvent::NegotiationNeeded {
            peer_id: self.peer_id.clone(),
        });
    }

    /// Applies current bandwidth through encoding parameters, falling back
    /// to SDP.
    ///
    /// Renegotiation is requested only if the bandwidth `changed` since the
    /// last negotiated SDP, or if the fallback is discovered with a cap the
    /// just negotiated SDP lacks.
    async fn apply_bandwidth(&self, changed: bool) -> Result<()> {
        let kbps = self.bandwidth.get();
        if self.bandwidth_via_sdp.get() {
            if changed {
                self.request_renegotiation();
            }
            return Ok(());
        }
        match self.pc.set_video_bandwidth(kbps).await {
            Ok(()) => Ok(()),
            Err(e) if e.as_ref() == &PeerConnectionError::Unsupported => {
                debug!("Falling back to SDP bandwidth for {}", self.peer_id);
                self.bandwidth_via_sdp.set(true);
                if changed || kbps != 0 {
                    self.request_renegotiation();
                }
                Ok(())
            }
            Err(e) => Err(tracerr::map_from_and_new!(e)),
        }
    }

    /// Post-processes local SDP.
    fn munge(&self, sdp: String) -> String {
        let mut transform = SdpTransform::from_features(&self.ctx.features);
        if self.bandwidth_via_sdp.get() {
            transform.bandwidth_kbps = Some(self.bandwidth.get());
        }
        if transform.is_noop() {
            sdp
        } else {
            self.ctx.sdp.transform(sdp, &transform)
        }
    }

    /// Applies buffered remote candidates in order, including the ones
    /// arriving while flushing.
    async fn flush_early_candidates(&self) {
        loop {
            let next = self.early_candidates.borrow_mut().pop_front();
            let candidate = match next {
                Some(candidate) => candidate,
                None => break,
            };
            if let Err(e) = self.pc.add_ice_candidate(candidate).await {
                warn!(
                    "Failed to add buffered ICE candidate of {}: {}",
                    self.peer_id, e,
                );
            }
        }
        self.has_remote_description.set(true);
    }

    /// Indicates whether a queued operation may run right now.
    fn can_run(&self) -> bool {
        !self.operation_pending.get()
            && self.pending_local_offer.borrow().is_none()
            && self.pc.signaling_state() == SignalingState::Stable
    }

    /// Takes the operation lock, waiting for the turn if needed.
    async fn acquire(&self) -> Result<OperationGuard<'_>> {
        if self.closed.get() {
            return Err(tracerr::new!(SessionError::Closed));
        }
        if self.queue.borrow().is_empty() && self.can_run() {
            self.operation_pending.set(true);
            return Ok(OperationGuard(self));
        }
        let (tx, rx) = oneshot::channel();
        self.queue.borrow_mut().push_back(tx);
        // Lock is taken on behalf of the waiter before it's woken.
        rx.await
            .map_err(|_| tracerr::new!(SessionError::Closed))
            .map(|_| OperationGuard(self))
    }

    /// Takes the operation lock ignoring the signaling state.
    async fn acquire_for_answer(&self) -> Result<OperationGuard<'_>> {
        loop {
            if self.closed.get() {
                return Err(tracerr::new!(SessionError::Closed));
            }
            if !self.operation_pending.get() {
                self.operation_pending.set(true);
                return Ok(OperationGuard(self));
            }
            self.operation_pending
                .when_eq(false)
                .await
                .map_err(|_| tracerr::new!(SessionError::Closed))?;
        }
    }

    /// Hands the lock to the next queued operation if it may run.
    fn try_drain(&self) {
        while self.can_run() {
            let next = self.queue.borrow_mut().pop_front();
            let waiter = match next {
                Some(waiter) => waiter,
                None => return,
            };
            self.operation_pending.set(true);
            if waiter.send(()).is_ok() {
                return;
            }
            // Waiter is gone, try the next one.
            self.operation_pending.set(false);
        }
    }

    /// Sends the provided [`SessionEvent`] to the owner.
    fn emit(&self, event: SessionEvent) {
        if self.closed.get() {
            return;
        }
        let _ = self.ctx.events.unbounded_send(event);
    }

    /// Handles [`PeerConnectionEvent`]s of the engine while the [`Session`]
    /// is alive.
    async fn listen(
        this: Weak<Self>,
        mut events: LocalBoxStream<'static, PeerConnectionEvent>,
    ) {
        while let Some(event) = events.next().await {
            let this = match this.upgrade() {
                Some(this) => this,
                None => break,
            };
            this.on_pc_event(event);
        }
    }

    fn on_pc_event(self: &Rc<Self>, event: PeerConnectionEvent) {
        let peer_id = self.peer_id.clone();
        match event {
            PeerConnectionEvent::IceCandidate(candidate) => {
                let mut evidence = self.local_evidence.get();
                match &candidate {
                    Some(c) => evidence.record(c),
                    None => {
                        if !evidence.has_reachable_candidate() {
                            warn!("No reachable ICE candidates for {}", peer_id);
                            self.emit(SessionEvent::ConnectionBlockedByNetwork {
                                peer_id: peer_id.clone(),
                            });
                        }
                    }
                }
                self.local_evidence.set(evidence);
                self.emit(SessionEvent::IceCandidate { peer_id, candidate });
            }
            PeerConnectionEvent::IceConnectionStateChanged(state) => {
                if let Some(status) = ConnectionStatus::from_ice(state) {
                    self.on_status(status);
                }
            }
            PeerConnectionEvent::SignalingStateChanged(state) => {
                if state == SignalingState::Stable {
                    self.try_drain();
                }
            }
            PeerConnectionEvent::NegotiationNeeded => {
                if !self.negotiation_needed_muted.get() {
                    self.emit(SessionEvent::NegotiationNeeded { peer_id });
                }
            }
            PeerConnectionEvent::RemoteTrack { track, stream_id } => {
                self.emit(SessionEvent::RemoteTrack {
                    peer_id,
                    track,
                    stream_id,
                });
            }
        }
    }

    /// Updates [`ConnectionStatus`] running first connection actions.
    fn on_status(self: &Rc<Self>, status: ConnectionStatus) {
        if self.status.replace(status) == status {
            return;
        }
        debug!("Session with {} is {}", self.peer_id, status);
        self.emit(SessionEvent::StatusChanged {
            peer_id: self.peer_id.clone(),
            status,
        });
        if status != ConnectionStatus::Connected
            || self.ever_connected.replace(true)
        {
            return;
        }

        let this = Rc::downgrade(self);
        let task = spawn_abortable(async move {
            let this = match this.upgrade() {
                Some(this) => this,
                None => return,
            };
            let deferred: Vec<_> =
                this.deferred_replacements.borrow_mut().drain(..).collect();
            for (old, new) in deferred {
                if let Err(e) = this.replace_track(old, new).await {
                    warn!("Deferred track replacement failed: {}", e);
                }
            }
            if let Err(e) = this.maybe_restrict_relay_bandwidth().await {
                warn!("Failed to restrict relay bandwidth: {}", e);
            }
        });
        self.tasks.borrow_mut().push(task);
    }

    /// Releases the operation lock.
    fn release(&self) {
        self.operation_pending.set(false);
        self.try_drain();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// Operation lock of a [`Session`], released on [`Drop`].
struct OperationGuard<'a>(&'a Session);

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.0.release();
    }
}
