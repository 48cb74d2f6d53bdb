//! Glitch-free reconciliation of the room state after a signalling
//! reconnect.
//!
//! After a short signalling outage the server sends a fresh room snapshot.
//! Every remote client whose media demonstrably kept flowing through the
//! outage is marked with [`Client::merge_with_old_client_state`], so the
//! [`RtcManager`] keeps its existing connection instead of renegotiating it.
//!
//! [`RtcManager`]: crate::rtc::RtcManager

mod client_state;

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    rc::{Rc, Weak},
    time::Duration,
};

use futures::{channel::mpsc, stream::LocalBoxStream};

use crate::{
    conf,
    log::prelude::*,
    platform::{self, Instant, StatsProvider},
    signalling::{Client, ClientId, Room, SignalingEvent},
    utils::{spawn_abortable, TaskHandle},
};

#[doc(inline)]
pub use self::client_state::ClientState;

/// Registry of the established media connections.
#[cfg_attr(test, mockall::automock)]
pub trait ConnectionRegistry {
    /// Indicates whether a media connection to the provided client exists.
    fn has_connection(&self, client_id: &ClientId) -> bool;
}

#[cfg(test)]
impl_debug_by_struct_name!(MockConnectionRegistry);

/// Counters of the reconciliation outcomes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconnectMetrics {
    /// Rooms joined.
    pub room_joined: u32,

    /// Rejoins treated as cold joins.
    pub room_joined_late: u32,

    /// Pending leaves cancelled by the client coming back.
    pub pending_client_canceled: u32,

    /// Clients pending to leave replaced by a new client of the same device.
    pub client_replaced: u32,
}

/// Reconciler of the [`SignalingEvent`]s flowing from the signalling channel
/// to the [`RtcManager`].
///
/// [`RtcManager`]: crate::rtc::RtcManager
pub struct ReconnectManager {
    conf: conf::Reconnect,

    /// Source of the media activity evidence.
    stats: Rc<dyn StatsProvider>,

    /// Established media connections.
    registry: Weak<dyn ConnectionRegistry>,

    /// Last known states of the remote clients.
    clients: RefCell<HashMap<ClientId, ClientState>>,

    /// Time the signalling connection was lost at.
    disconnected_at: Cell<Option<Instant>>,

    /// Media activity polls of the clients pending to leave.
    pending_leaves: RefCell<HashMap<ClientId, TaskHandle>>,

    metrics: Cell<ReconnectMetrics>,

    /// Subscribers of the reconciled [`SignalingEvent`]s.
    subs: RefCell<Vec<mpsc::UnboundedSender<SignalingEvent>>>,
}

impl ReconnectManager {
    /// Creates new [`ReconnectManager`].
    pub fn new(
        conf: conf::Reconnect,
        stats: Rc<dyn StatsProvider>,
        registry: Weak<dyn ConnectionRegistry>,
    ) -> Rc<Self> {
        Rc::new(Self {
            conf,
            stats,
            registry,
            clients: RefCell::default(),
            disconnected_at: Cell::new(None),
            pending_leaves: RefCell::default(),
            metrics: Cell::default(),
            subs: RefCell::default(),
        })
    }

    /// Subscribes to the reconciled [`SignalingEvent`]s.
    pub fn subscribe(&self) -> LocalBoxStream<'static, SignalingEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Returns current [`ReconnectMetrics`].
    #[inline]
    pub fn metrics(&self) -> ReconnectMetrics {
        self.metrics.get()
    }

    /// Returns last known state of the provided client.
    pub fn client_state(&self, client_id: &ClientId) -> Option<ClientState> {
        self.clients.borrow().get(client_id).cloned()
    }

    /// Reconciles the provided raw [`SignalingEvent`] emitting the result to
    /// the subscribers.
    pub async fn handle_event(self: &Rc<Self>, event: SignalingEvent) {
        match event {
            SignalingEvent::Disconnected => {
                self.disconnected_at.set(Some(Instant::now()));
                self.emit(SignalingEvent::Disconnected);
            }
            SignalingEvent::RoomJoined {
                self_id,
                room: Some(room),
                disconnect_timeout,
                error,
            } => {
                let room =
                    self.reconcile(&self_id, room, disconnect_timeout).await;
                self.emit(SignalingEvent::RoomJoined {
                    self_id,
                    room: Some(room),
                    disconnect_timeout,
                    error,
                });
            }
            SignalingEvent::PendingClientLeft { client_id } => {
                self.start_pending_leave(client_id.clone());
                self.emit(SignalingEvent::PendingClientLeft { client_id });
            }
            SignalingEvent::NewClient(client) => self.on_new_client(client),
            SignalingEvent::ClientLeft { client_id } => {
                drop(self.pending_leaves.borrow_mut().remove(&client_id));
                drop(self.clients.borrow_mut().remove(&client_id));
                self.emit(SignalingEvent::ClientLeft { client_id });
            }
            SignalingEvent::AudioEnabled {
                client_id,
                is_audio_enabled,
            } => {
                self.update(&client_id, |s| {
                    s.is_audio_enabled = is_audio_enabled;
                });
                self.emit(SignalingEvent::AudioEnabled {
                    client_id,
                    is_audio_enabled,
                });
            }
            SignalingEvent::VideoEnabled {
                client_id,
                is_video_enabled,
            } => {
                self.update(&client_id, |s| {
                    s.is_video_enabled = is_video_enabled;
                });
                self.emit(SignalingEvent::VideoEnabled {
                    client_id,
                    is_video_enabled,
                });
            }
            SignalingEvent::ScreenshareStarted {
                client_id,
                stream_id,
            } => {
                self.update(&client_id, |s| s.is_screenshare_enabled = true);
                self.emit(SignalingEvent::ScreenshareStarted {
                    client_id,
                    stream_id,
                });
            }
            SignalingEvent::ScreenshareStopped {
                client_id,
                stream_id,
            } => {
                self.update(&client_id, |s| s.is_screenshare_enabled = false);
                self.emit(SignalingEvent::ScreenshareStopped {
                    client_id,
                    stream_id,
                });
            }
            event => self.emit(event),
        }
    }

    /// Reconciles a fresh room snapshot with the cached client states.
    async fn reconcile(
        self: &Rc<Self>,
        self_id: &ClientId,
        mut room: Room,
        disconnect_timeout: Duration,
    ) -> Room {
        self.bump(|m| m.room_joined += 1);

        let self_device = room
            .clients
            .iter()
            .find(|c| &c.id == self_id)
            .map(|c| c.device_id.clone());
        room.clients.retain(|c| {
            let is_own_leftover = &c.id != self_id
                && c.is_pending_to_leave
                && Some(&c.device_id) == self_device.as_ref();
            if is_own_leftover {
                debug!("Dropping own leftover client {}", c.id);
            }
            !is_own_leftover
        });

        let is_fast_rejoin = match self.disconnected_at.take() {
            None => false,
            Some(at) => {
                let elapsed = at.elapsed();
                let threshold =
                    disconnect_timeout.mul_f64(self.conf.glitch_free_threshold);
                if elapsed > threshold {
                    info!(
                        "Rejoined after {:?} (threshold {:?}), cold join",
                        elapsed, threshold,
                    );
                    self.bump(|m| m.room_joined_late += 1);
                    false
                } else {
                    true
                }
            }
        };

        if is_fast_rejoin {
            let mut clients = Vec::with_capacity(room.clients.len());
            for mut client in room.clients {
                if &client.id == self_id {
                    clients.push(client);
                } else if client.is_pending_to_leave {
                    debug!("{} is pending to leave, holding it back", client.id);
                    drop(
                        self.clients
                            .borrow_mut()
                            .insert(client.id.clone(), ClientState::from(&client)),
                    );
                    room.held_back.push(client.id.clone());
                    self.start_pending_leave(client.id);
                } else {
                    client.merge_with_old_client_state =
                        self.can_merge(&client).await;
                    clients.push(client);
                }
            }
            room.clients = clients;
        } else {
            self.pending_leaves.borrow_mut().clear();
            self.clients.borrow_mut().clear();
        }

        let mut states = self.clients.borrow_mut();
        states.retain(|_, s| s.is_pending_to_leave);
        for client in room.clients.iter().filter(|c| &c.id != self_id) {
            drop(states.insert(client.id.clone(), ClientState::from(client)));
        }

        room
    }

    /// Decides whether the existing connection to the provided client may be
    /// kept.
    async fn can_merge(&self, client: &Client) -> bool {
        let cached = self.clients.borrow().get(&client.id).cloned();
        let cached = match cached {
            Some(cached) => cached,
            None => {
                debug!("{} is new", client.id);
                return false;
            }
        };
        let has_connection = self
            .registry
            .upgrade()
            .map_or(false, |r| r.has_connection(&client.id));
        if !has_connection {
            debug!("No connection to {} to merge with", client.id);
            return false;
        }
        if cached.differs_from(client) {
            debug!("{} changed its media while disconnected", client.id);
            return false;
        }
        let kinds = cached.sent_kinds();
        if kinds.is_empty() {
            return true;
        }
        match self.stats.client_stats(client.id.clone()).await {
            Ok(stats) => {
                let is_active = kinds.iter().all(|kind| {
                    stats.is_kind_active(
                        *kind,
                        self.conf.min_active_bitrate,
                        self.conf.min_active_samples,
                    )
                });
                debug!("Media of {} is active: {}", client.id, is_active);
                is_active
            }
            Err(e) => {
                warn!("Cannot check media of {}: {}", client.id, e);
                false
            }
        }
    }

    fn on_new_client(self: &Rc<Self>, client: Client) {
        let replaced = self
            .clients
            .borrow()
            .iter()
            .find(|(_, s)| {
                s.is_pending_to_leave && s.device_id == client.device_id
            })
            .map(|(id, _)| id.clone());
        match replaced {
            Some(old_id) if old_id == client.id => {
                info!("{} came back before leaving", client.id);
                drop(self.pending_leaves.borrow_mut().remove(&old_id));
                drop(
                    self.clients
                        .borrow_mut()
                        .insert(old_id, ClientState::from(&client)),
                );
                self.bump(|m| m.pending_client_canceled += 1);
            }
            Some(old_id) => {
                info!("{} replaces {} of the same device", client.id, old_id);
                drop(self.pending_leaves.borrow_mut().remove(&old_id));
                drop(self.clients.borrow_mut().remove(&old_id));
                self.bump(|m| m.client_replaced += 1);
                self.emit(SignalingEvent::ClientLeft { client_id: old_id });
                self.insert_and_emit(client);
            }
            None => self.insert_and_emit(client),
        }
    }

    fn insert_and_emit(&self, client: Client) {
        drop(
            self.clients
                .borrow_mut()
                .insert(client.id.clone(), ClientState::from(&client)),
        );
        self.emit(SignalingEvent::NewClient(client));
    }

    /// Starts checking whether media of a client pending to leave still
    /// flows.
    fn start_pending_leave(self: &Rc<Self>, client_id: ClientId) {
        if let Some(state) = self.clients.borrow_mut().get_mut(&client_id) {
            state.is_pending_to_leave = true;
        }
        let poll = spawn_abortable(Self::poll_pending_leave(
            Rc::downgrade(self),
            client_id.clone(),
        ));
        drop(self.pending_leaves.borrow_mut().insert(client_id, poll));
    }

    /// Confirms the leave of the provided client as soon as its media stops.
    async fn poll_pending_leave(this: Weak<Self>, client_id: ClientId) {
        let (interval, attempts) = match this.upgrade() {
            Some(this) => (
                this.conf.pending_leave_poll_interval,
                this.conf.pending_leave_max_attempts,
            ),
            None => return,
        };
        for attempt in 1..=attempts {
            platform::delay_for(interval).await;
            let this = match this.upgrade() {
                Some(this) => this,
                None => return,
            };
            let is_active = match this.stats.client_stats(client_id.clone()).await
            {
                Ok(stats) => stats.is_any_active(
                    this.conf.min_active_bitrate,
                    this.conf.min_active_samples,
                ),
                Err(e) => {
                    debug!("No media evidence of {}: {}", client_id, e);
                    false
                }
            };
            if !is_active {
                info!("{} left after {} check(s)", client_id, attempt);
                let _poll = this.pending_leaves.borrow_mut().remove(&client_id);
                drop(this.clients.borrow_mut().remove(&client_id));
                this.emit(SignalingEvent::ClientLeft { client_id });
                return;
            }
        }
        debug!("Media of {} still flows, keeping it", client_id);
        if let Some(this) = this.upgrade() {
            let _poll = this.pending_leaves.borrow_mut().remove(&client_id);
        }
    }

    fn update<F: FnOnce(&mut ClientState)>(&self, client_id: &ClientId, f: F) {
        if let Some(state) = self.clients.borrow_mut().get_mut(client_id) {
            f(state);
        }
    }

    fn bump<F: FnOnce(&mut ReconnectMetrics)>(&self, f: F) {
        let mut metrics = self.metrics.get();
        f(&mut metrics);
        self.metrics.set(metrics);
    }

    fn emit(&self, event: SignalingEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
