//! Owner of the current [`RtcManager`].

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt as _};
use tracerr::Traced;

use crate::{
    log::prelude::*,
    platform::{LocalStream, MediaKind},
    reconnect::ConnectionRegistry,
    signalling::{ClientId, Room, SignalingEvent},
    utils::{spawn_abortable, TaskHandle},
};

use super::{
    Dependencies, P2pRtcManager, RtcManager, RtcManagerError, RtcManagerEvent,
    SfuRtcManager,
};

/// Dispatcher of [`SignalingEvent`]s and local media operations to the
/// current [`RtcManager`].
///
/// On every room join the current manager is kept if it serves the joined
/// room as the same local client. Otherwise it is torn down before the
/// matching P2P or SFU one is installed.
pub struct RtcManagerDispatcher(Rc<Inner>);

struct Inner {
    deps: Dependencies,

    /// Installed [`RtcManager`].
    current: RefCell<Option<Rc<dyn RtcManager>>>,

    /// Forwarder of the [`RtcManagerEvent`]s of the installed manager.
    forwarder: RefCell<Option<TaskHandle>>,

    /// Subscribers of [`RtcManagerEvent`]s.
    subs: RefCell<Vec<mpsc::UnboundedSender<RtcManagerEvent>>>,
}

impl RtcManagerDispatcher {
    /// Creates new [`RtcManagerDispatcher`] without any [`RtcManager`].
    pub fn new(deps: Dependencies) -> Self {
        Self(Rc::new(Inner {
            deps,
            current: RefCell::default(),
            forwarder: RefCell::default(),
            subs: RefCell::default(),
        }))
    }

    /// Subscribes to [`RtcManagerEvent`]s of this dispatcher and of every
    /// installed [`RtcManager`].
    pub fn subscribe(&self) -> LocalBoxStream<'static, RtcManagerEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.0.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Returns the installed [`RtcManager`], if any.
    pub fn current(&self) -> Option<Rc<dyn RtcManager>> {
        self.0.current.borrow().clone()
    }

    /// Installs the matching [`RtcManager`] on a room join and forwards the
    /// provided [`SignalingEvent`] to the installed one.
    pub async fn handle_signaling_event(&self, event: SignalingEvent) {
        if let SignalingEvent::RoomJoined {
            self_id,
            room: Some(room),
            ..
        } = &event
        {
            self.0.ensure_manager(self_id, room);
        }
        if let Some(manager) = self.current() {
            manager.handle_signaling_event(event).await;
        }
    }

    /// Accepts the provided remote stream.
    pub async fn accept_new_stream(
        &self,
        client_id: ClientId,
        stream_id: String,
    ) {
        match self.current() {
            Some(manager) => {
                manager.accept_new_stream(client_id, stream_id).await;
            }
            None => warn!(
                "Stream {} of {} accepted outside of a room",
                stream_id, client_id,
            ),
        }
    }

    /// Starts sending the provided [`LocalStream`].
    pub async fn add_local_stream(&self, stream: LocalStream) {
        if let Some(manager) = self.current() {
            manager.add_local_stream(stream).await;
        }
    }

    /// Stops sending the [`LocalStream`] with the provided ID.
    pub async fn remove_local_stream(&self, stream_id: &str) {
        if let Some(manager) = self.current() {
            manager.remove_local_stream(stream_id).await;
        }
    }

    /// Enables or disables sending of local media of the provided kind.
    pub async fn set_media_enabled(&self, kind: MediaKind, enabled: bool) {
        if let Some(manager) = self.current() {
            manager.set_media_enabled(kind, enabled).await;
        }
    }

    /// Tears down the installed [`RtcManager`].
    pub fn destroy(&self) {
        self.0.destroy();
    }
}

impl ConnectionRegistry for RtcManagerDispatcher {
    fn has_connection(&self, client_id: &ClientId) -> bool {
        self.0
            .current
            .borrow()
            .as_ref()
            .map_or(false, |m| m.has_connection(client_id))
    }
}

impl Drop for RtcManagerDispatcher {
    fn drop(&mut self) {
        self.0.destroy();
    }
}

impl Inner {
    fn ensure_manager(self: &Rc<Self>, self_id: &ClientId, room: &Room) {
        let is_sfu = room.sfu_server.is_some();
        let is_same = self.current.borrow().as_ref().map_or(false, |m| {
            m.is_initialized_with(self_id, &room.name, is_sfu)
        });
        if is_same {
            debug!("Keeping RtcManager of room {}", room.name);
            return;
        }
        self.destroy();

        match self.create(self_id, room) {
            Ok(manager) => {
                info!(
                    "Installing {} RtcManager of room {}",
                    if is_sfu { "SFU" } else { "P2P" },
                    room.name,
                );
                let mut events = manager.subscribe();
                let this = Rc::downgrade(self);
                let forwarder = spawn_abortable(async move {
                    while let Some(event) = events.next().await {
                        match Weak::upgrade(&this) {
                            Some(this) => this.emit(event),
                            None => break,
                        }
                    }
                });
                *self.current.borrow_mut() = Some(manager);
                *self.forwarder.borrow_mut() = Some(forwarder);
                self.emit(RtcManagerEvent::ManagerCreated { is_sfu });
            }
            Err(e) => error!("Failed to create RtcManager: {}", e),
        }
    }

    fn create(
        &self,
        self_id: &ClientId,
        room: &Room,
    ) -> Result<Rc<dyn RtcManager>, Traced<RtcManagerError>> {
        let deps = self.deps.clone();
        let manager: Rc<dyn RtcManager> = match &room.sfu_server {
            Some(sfu) => Rc::new(SfuRtcManager::new(
                self_id.clone(),
                room.name.clone(),
                sfu.url.clone(),
                deps,
            )
            .map_err(tracerr::wrap!())?),
            None => Rc::new(P2pRtcManager::new(
                self_id.clone(),
                room.name.clone(),
                deps,
            )
            .map_err(tracerr::wrap!())?),
        };
        Ok(manager)
    }

    fn destroy(&self) {
        let manager = self.current.borrow_mut().take();
        if let Some(manager) = manager {
            drop(self.forwarder.borrow_mut().take());
            manager.disconnect_all();
            self.emit(RtcManagerEvent::ManagerDestroyed);
        }
    }

    fn emit(&self, event: RtcManagerEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
