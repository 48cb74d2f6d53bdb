//! [`RoomClient`] reconciling signalling reconnects end to end.

use std::time::Duration;

use futures::{channel::mpsc, stream::LocalBoxStream, StreamExt as _};
use medea_rtc_client::{
    conf::Conf,
    platform::{ClientStats, MediaKind, TrackDirection, TrackStats},
    rtc::RtcManagerEvent,
    signalling::{Client, Room, SfuServer, SignalingEvent},
    RoomClient, RoomEvent,
};
use tokio::time;
use url::Url;

use crate::{drain, fakes::Fakes, local, settle};

struct Fixture {
    fakes: Fakes,
    client: RoomClient,
    inbound: mpsc::UnboundedSender<SignalingEvent>,
    events: LocalBoxStream<'static, RoomEvent>,
}

impl Fixture {
    fn new() -> Self {
        let fakes = Fakes::new();
        let (inbound, rx) = mpsc::unbounded();
        let client = RoomClient::new(fakes.deps(Conf::default()), Box::pin(rx));
        let events = client.subscribe();
        Self {
            fakes,
            client,
            inbound,
            events,
        }
    }

    fn send(&self, event: SignalingEvent) {
        self.inbound.unbounded_send(event).unwrap();
    }
}

fn joined(clients: Vec<Client>, sfu: Option<&str>) -> SignalingEvent {
    let mut all = vec![Client::new("self", "dev-self")];
    all.extend(clients);
    SignalingEvent::RoomJoined {
        self_id: "self".into(),
        room: Some(Room {
            name: "room".to_owned(),
            clients: all,
            sfu_server: sfu.map(|url| SfuServer {
                url: Url::parse(url).unwrap(),
            }),
            held_back: Vec::new(),
        }),
        disconnect_timeout: Duration::from_secs(10),
        error: None,
    }
}

fn flowing_media() -> ClientStats {
    let track = |kind| TrackStats {
        kind,
        direction: TrackDirection::Inbound,
        ssrc: 1,
        bitrate_samples: vec![120, 130],
    };
    ClientStats {
        tracks: vec![track(MediaKind::Audio), track(MediaKind::Video)],
    }
}

fn rtc_events(events: Vec<RoomEvent>) -> Vec<RtcManagerEvent> {
    events
        .into_iter()
        .filter_map(|e| match e {
            RoomEvent::Rtc(e) => Some(e),
            RoomEvent::Signaling(_) => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn installs_manager_matching_joined_room() {
    local(async {
        let mut fx = Fixture::new();

        fx.send(joined(vec![], None));
        settle().await;
        assert_eq!(rtc_events(drain(&mut fx.events)), vec![
            RtcManagerEvent::ManagerCreated { is_sfu: false }
        ]);

        fx.send(joined(vec![], None));
        settle().await;
        assert!(rtc_events(drain(&mut fx.events)).is_empty());

        fx.send(joined(vec![], Some("wss://sfu.example.com/rpc")));
        settle().await;
        assert_eq!(rtc_events(drain(&mut fx.events)), vec![
            RtcManagerEvent::ManagerDestroyed,
            RtcManagerEvent::ManagerCreated { is_sfu: true },
        ]);
        assert_eq!(fx.fakes.sfu.connections(), 1);
        assert_eq!(fx.client.metrics().room_joined, 3);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn short_outage_keeps_connection_with_flowing_media() {
    local(async {
        let mut fx = Fixture::new();
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        fx.send(SignalingEvent::SdpOffer {
            client_id: "a".into(),
            sdp: "offer-of-a".to_owned(),
        });
        settle().await;
        let pc = fx.fakes.peer_connections.last();
        fx.fakes.stats.set("a", flowing_media());
        let _ = drain(&mut fx.events);

        fx.send(SignalingEvent::Disconnected);
        time::sleep(Duration::from_secs(3)).await;
        fx.send(joined(vec![Client::new("a", "dev-a")], None));

        let room = loop {
            if let Some(RoomEvent::Signaling(SignalingEvent::RoomJoined {
                room: Some(room),
                ..
            })) = fx.events.next().await
            {
                break room;
            }
        };
        let a = room.clients.iter().find(|c| c.id == "a".into());
        assert!(a.unwrap().merge_with_old_client_state);
        settle().await;
        assert!(!pc.is_closed());
        assert_eq!(fx.fakes.peer_connections.created().len(), 1);
        let metrics = fx.client.metrics();
        assert_eq!(metrics.room_joined, 2);
        assert_eq!(metrics.room_joined_late, 0);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn late_rejoin_drops_connection() {
    local(async {
        let fx = Fixture::new();
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        fx.send(SignalingEvent::SdpOffer {
            client_id: "a".into(),
            sdp: "offer-of-a".to_owned(),
        });
        settle().await;
        let pc = fx.fakes.peer_connections.last();
        fx.fakes.stats.set("a", flowing_media());

        fx.send(SignalingEvent::Disconnected);
        time::sleep(Duration::from_secs(9)).await;
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        settle().await;

        assert!(pc.is_closed());
        let metrics = fx.client.metrics();
        assert_eq!(metrics.room_joined, 2);
        assert_eq!(metrics.room_joined_late, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn pending_client_coming_back_is_not_reported_twice() {
    local(async {
        let mut fx = Fixture::new();
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        settle().await;
        let _ = drain(&mut fx.events);

        fx.send(SignalingEvent::PendingClientLeft {
            client_id: "a".into(),
        });
        fx.send(SignalingEvent::NewClient(Client::new("a", "dev-a")));
        fx.fakes.stats.set("a", flowing_media());
        time::sleep(Duration::from_secs(5)).await;

        let signaling: Vec<_> = drain(&mut fx.events)
            .into_iter()
            .filter_map(|e| match e {
                RoomEvent::Signaling(e) => Some(e),
                RoomEvent::Rtc(_) => None,
            })
            .collect();
        assert_eq!(signaling, vec![SignalingEvent::PendingClientLeft {
            client_id: "a".into(),
        }]);
        assert_eq!(fx.client.metrics().pending_client_canceled, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn closing_tears_down_connections() {
    local(async {
        let fx = Fixture::new();
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        fx.send(SignalingEvent::SdpOffer {
            client_id: "a".into(),
            sdp: "offer-of-a".to_owned(),
        });
        settle().await;
        let pc = fx.fakes.peer_connections.last();

        fx.client.close();
        settle().await;
        fx.send(SignalingEvent::SdpOffer {
            client_id: "b".into(),
            sdp: "offer-of-b".to_owned(),
        });
        settle().await;

        assert!(pc.is_closed());
        assert_eq!(fx.fakes.peer_connections.created().len(), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn pending_client_returning_after_rejoin_keeps_connection() {
    local(async {
        let fx = Fixture::new();
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        fx.send(SignalingEvent::SdpOffer {
            client_id: "a".into(),
            sdp: "offer-of-a".to_owned(),
        });
        settle().await;
        let pc = fx.fakes.peer_connections.last();
        fx.fakes.stats.set("a", flowing_media());

        fx.send(SignalingEvent::Disconnected);
        time::sleep(Duration::from_secs(1)).await;
        let mut pending = Client::new("a", "dev-a");
        pending.is_pending_to_leave = true;
        fx.send(joined(vec![pending], None));
        settle().await;
        assert!(!pc.is_closed());

        fx.send(SignalingEvent::NewClient(Client::new("a", "dev-a")));
        time::sleep(Duration::from_secs(5)).await;

        assert!(!pc.is_closed());
        assert_eq!(fx.fakes.peer_connections.created().len(), 1);
        assert_eq!(fx.client.metrics().pending_client_canceled, 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn held_back_client_without_media_is_disconnected() {
    local(async {
        let fx = Fixture::new();
        fx.send(joined(vec![Client::new("a", "dev-a")], None));
        fx.send(SignalingEvent::SdpOffer {
            client_id: "a".into(),
            sdp: "offer-of-a".to_owned(),
        });
        settle().await;
        let pc = fx.fakes.peer_connections.last();

        fx.send(SignalingEvent::Disconnected);
        time::sleep(Duration::from_secs(1)).await;
        let mut pending = Client::new("a", "dev-a");
        pending.is_pending_to_leave = true;
        fx.send(joined(vec![pending], None));
        settle().await;
        assert!(!pc.is_closed());

        time::sleep(Duration::from_secs(1)).await;

        assert!(pc.is_closed());
        assert_eq!(fx.fakes.peer_connections.created().len(), 1);
    })
    .await;
}
