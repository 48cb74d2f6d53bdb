//! Application-facing room client wiring the signalling events through the
//! [`ReconnectManager`] into the [`RtcManagerDispatcher`].

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt as _};

use crate::{
    platform::{LocalStream, MediaKind},
    reconnect::{ConnectionRegistry, ReconnectManager, ReconnectMetrics},
    rtc::{Dependencies, RtcManagerDispatcher, RtcManagerEvent},
    signalling::{ClientId, SignalingEvent},
    utils::{spawn_abortable, TaskHandle},
};

/// Events of a [`RoomClient`].
#[derive(Clone, Debug, PartialEq)]
pub enum RoomEvent {
    /// Reconciled [`SignalingEvent`] already applied to the media
    /// connections.
    Signaling(SignalingEvent),

    /// Event of the media connections.
    Rtc(RtcManagerEvent),
}

/// Client of a single room.
///
/// Dropping it tears down all the media connections.
pub struct RoomClient(Rc<Inner>);

struct Inner {
    reconnect: Rc<ReconnectManager>,

    dispatcher: Rc<RtcManagerDispatcher>,

    /// Subscribers of [`RoomEvent`]s.
    subs: RefCell<Vec<mpsc::UnboundedSender<RoomEvent>>>,

    /// Pumps of the inbound, reconciled and media events.
    tasks: RefCell<Vec<TaskHandle>>,
}

impl RoomClient {
    /// Creates new [`RoomClient`] consuming the provided inbound
    /// [`SignalingEvent`]s.
    ///
    /// # Panics
    ///
    /// If called outside of a [`LocalSet`] context.
    ///
    /// [`LocalSet`]: tokio::task::LocalSet
    pub fn new(
        deps: Dependencies,
        signaling_events: LocalBoxStream<'static, SignalingEvent>,
    ) -> Self {
        let stats = Rc::clone(&deps.stats);
        let reconnect_conf = deps.conf.reconnect.clone();
        let dispatcher = Rc::new(RtcManagerDispatcher::new(deps));
        let registry = Rc::clone(&dispatcher) as Rc<dyn ConnectionRegistry>;
        let reconnect = ReconnectManager::new(
            reconnect_conf,
            stats,
            Rc::downgrade(&registry),
        );
        let reconciled = reconnect.subscribe();
        let rtc_events = dispatcher.subscribe();

        let inner = Rc::new(Inner {
            reconnect,
            dispatcher,
            subs: RefCell::default(),
            tasks: RefCell::default(),
        });
        let tasks = vec![
            spawn_abortable(Inner::pump_inbound(
                Rc::downgrade(&inner),
                signaling_events,
            )),
            spawn_abortable(Inner::pump_reconciled(
                Rc::downgrade(&inner),
                reconciled,
            )),
            spawn_abortable(Inner::pump_rtc(Rc::downgrade(&inner), rtc_events)),
        ];
        *inner.tasks.borrow_mut() = tasks;

        Self(inner)
    }

    /// Subscribes to [`RoomEvent`]s.
    pub fn subscribe(&self) -> LocalBoxStream<'static, RoomEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.0.subs.borrow_mut().push(tx);
        Box::pin(rx)
    }

    /// Returns counters of the reconnect reconciliation.
    pub fn metrics(&self) -> ReconnectMetrics {
        self.0.reconnect.metrics()
    }

    /// Accepts the provided stream of a remote client.
    pub async fn accept_new_stream(
        &self,
        client_id: ClientId,
        stream_id: String,
    ) {
        self.0.dispatcher.accept_new_stream(client_id, stream_id).await;
    }

    /// Starts sending the provided [`LocalStream`].
    pub async fn add_local_stream(&self, stream: LocalStream) {
        self.0.dispatcher.add_local_stream(stream).await;
    }

    /// Stops sending the [`LocalStream`] with the provided ID.
    pub async fn remove_local_stream(&self, stream_id: &str) {
        self.0.dispatcher.remove_local_stream(stream_id).await;
    }

    /// Enables or disables sending of local media of the provided kind.
    pub async fn set_media_enabled(&self, kind: MediaKind, enabled: bool) {
        self.0.dispatcher.set_media_enabled(kind, enabled).await;
    }

    /// Stops processing signalling events and tears down all the media
    /// connections.
    pub fn close(&self) {
        self.0.tasks.borrow_mut().clear();
        self.0.dispatcher.destroy();
    }
}

impl Inner {
    /// Feeds inbound [`SignalingEvent`]s to the [`ReconnectManager`] one by
    /// one.
    async fn pump_inbound(
        this: Weak<Self>,
        mut events: LocalBoxStream<'static, SignalingEvent>,
    ) {
        while let Some(event) = events.next().await {
            let reconnect = match this.upgrade() {
                Some(this) => Rc::clone(&this.reconnect),
                None => break,
            };
            reconnect.handle_event(event).await;
        }
    }

    /// Applies reconciled [`SignalingEvent`]s to the media connections and
    /// then hands them to the application.
    async fn pump_reconciled(
        this: Weak<Self>,
        mut events: LocalBoxStream<'static, SignalingEvent>,
    ) {
        while let Some(event) = events.next().await {
            let this = match this.upgrade() {
                Some(this) => this,
                None => break,
            };
            this.dispatcher.handle_signaling_event(event.clone()).await;
            this.emit(RoomEvent::Signaling(event));
        }
    }

    async fn pump_rtc(
        this: Weak<Self>,
        mut events: LocalBoxStream<'static, RtcManagerEvent>,
    ) {
        while let Some(event) = events.next().await {
            match this.upgrade() {
                Some(this) => this.emit(RoomEvent::Rtc(event)),
                None => break,
            }
        }
    }

    fn emit(&self, event: RoomEvent) {
        self.subs
            .borrow_mut()
            .retain(|sub| sub.unbounded_send(event.clone()).is_ok());
    }
}
