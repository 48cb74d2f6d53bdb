//! [`SfuRtcManager`] talking to an in-memory SFU.

use std::time::Duration;

use medea_rtc_client::{
    conf::Conf,
    platform::{
        IceConnectionState, LocalStream, MediaKind, MediaTrack,
        TransportDirection,
    },
    rtc::{RtcManager as _, RtcManagerEvent, SfuRtcManager},
    signalling::{Client, Room, SignalingEvent},
};
use serde_json::json;
use tokio::time;
use url::Url;

use crate::{
    drain,
    fakes::{camera_track, Fakes},
    local, settle,
};

fn manager(fakes: &Fakes) -> SfuRtcManager {
    SfuRtcManager::new(
        "self".into(),
        "room".into(),
        Url::parse("wss://sfu.example.com/rpc").unwrap(),
        fakes.deps(Conf::default()),
    )
    .unwrap()
}

fn camera() -> LocalStream {
    LocalStream {
        id: LocalStream::CAMERA_STREAM_ID.to_owned(),
        tracks: vec![
            camera_track(MediaKind::Audio),
            camera_track(MediaKind::Video),
        ],
    }
}

fn count(methods: &[String], method: &str) -> usize {
    methods.iter().filter(|m| *m == method).count()
}

#[tokio::test(start_paused = true)]
async fn establishes_session_with_transport_pair() {
    local(async {
        let fakes = Fakes::new();
        let _manager = manager(&fakes);
        settle().await;

        assert_eq!(fakes.sfu.methods(), vec![
            "getCapabilities",
            "setCapabilities",
            "createTransport",
            "createTransport",
        ]);
        assert_eq!(fakes.sfu.requests_of("createTransport"), vec![
            json!({ "producing": true, "consuming": false }),
            json!({ "producing": false, "consuming": true }),
        ]);
        assert_eq!(fakes.sfu.requests_of("setCapabilities"), vec![json!({
            "rtpCapabilities": { "codecs": [] },
        })]);
        let _ = fakes.sfu_devices.last(TransportDirection::Send);
        let _ = fakes.sfu_devices.last(TransportDirection::Recv);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn tracks_added_early_are_produced_once_established() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);

        manager.add_local_stream(camera()).await;
        assert!(fakes.sfu.requests_of("produce").is_empty());
        settle().await;

        let produced = fakes.sfu.requests_of("produce");
        assert_eq!(produced.len(), 2);
        let mut sources: Vec<_> = produced
            .iter()
            .map(|p| p["appData"]["source"].as_str().unwrap().to_owned())
            .collect();
        sources.sort();
        assert_eq!(sources, vec!["mic", "webcam"]);
        assert_eq!(count(&fakes.sfu.methods(), "connectTransport"), 1);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn removed_stream_closes_its_producers_on_sfu() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        settle().await;
        manager.add_local_stream(camera()).await;
        settle().await;

        manager.remove_local_stream(LocalStream::CAMERA_STREAM_ID).await;

        let closed: Vec<_> = fakes
            .sfu
            .notifications()
            .into_iter()
            .filter(|(method, _)| method == "closeProducers")
            .flat_map(|(_, data)| {
                data["producerIds"].as_array().cloned().unwrap_or_default()
            })
            .collect();
        assert_eq!(closed.len(), 2);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn producer_closed_by_sfu_is_not_echoed() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        settle().await;
        manager
            .add_local_stream(LocalStream {
                id: LocalStream::CAMERA_STREAM_ID.to_owned(),
                tracks: vec![camera_track(MediaKind::Video)],
            })
            .await;
        settle().await;

        fakes
            .sfu
            .message("producerClosed", json!({ "producerId": "producer-3" }));
        settle().await;
        manager.remove_local_stream(LocalStream::CAMERA_STREAM_ID).await;

        assert!(fakes.sfu.notifications().is_empty());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn disabling_media_pauses_producer() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        settle().await;
        manager
            .add_local_stream(LocalStream {
                id: LocalStream::CAMERA_STREAM_ID.to_owned(),
                tracks: vec![camera_track(MediaKind::Video)],
            })
            .await;
        settle().await;

        manager.set_media_enabled(MediaKind::Video, false).await;
        manager.set_media_enabled(MediaKind::Video, true).await;

        let id = fakes.sfu.requests_of("pauseProducers")[0]["producerIds"]
            .clone();
        assert_eq!(id.as_array().map(Vec::len), Some(1));
        assert_eq!(fakes.sfu.requests_of("resumeProducers"), vec![json!({
            "producerIds": id,
        })]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn consumers_wait_for_stream_acceptance() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        let mut events = manager.subscribe();
        settle().await;

        fakes.sfu.new_consumer("c1", "a", "video", "webcam");
        settle().await;
        assert!(manager.has_connection(&"a".into()));
        assert!(drain(&mut events).is_empty());
        assert_eq!(fakes.sfu.responses()[0]["ok"], json!(true));

        manager.accept_new_stream("a".into(), "0".to_owned()).await;
        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamAdded {
            client_id: "a".into(),
            stream_id: "0".to_owned(),
            track: MediaTrack::new("remote-c1", MediaKind::Video),
        }]);
        assert_eq!(fakes.sfu.requests_of("resumeConsumers"), vec![json!({
            "consumerIds": ["c1"],
        })]);

        fakes.sfu.new_consumer("c2", "a", "audio", "mic");
        settle().await;
        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamAdded {
            client_id: "a".into(),
            stream_id: "0".to_owned(),
            track: MediaTrack::new("remote-c2", MediaKind::Audio),
        }]);

        manager
            .handle_signaling_event(SignalingEvent::AudioEnabled {
                client_id: "a".into(),
                is_audio_enabled: false,
            })
            .await;
        assert_eq!(fakes.sfu.requests_of("pauseConsumers"), vec![json!({
            "consumerIds": ["c2"],
        })]);

        manager
            .handle_signaling_event(SignalingEvent::ClientLeft {
                client_id: "a".into(),
            })
            .await;
        assert!(!manager.has_connection(&"a".into()));
        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamRemoved {
            client_id: "a".into(),
            stream_id: "0".to_owned(),
        }]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn screen_consumers_belong_to_announced_screen_stream() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        let mut events = manager.subscribe();
        settle().await;

        let mut client = Client::new("a", "dev-a");
        client.streams.push("screen-a".to_owned());
        manager
            .handle_signaling_event(SignalingEvent::NewClient(client))
            .await;
        fakes.sfu.new_consumer("s1", "a", "video", "screenvideo");
        settle().await;
        manager.accept_new_stream("a".into(), "screen-a".to_owned()).await;

        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamAdded {
            client_id: "a".into(),
            stream_id: "screen-a".to_owned(),
            track: MediaTrack::new("remote-s1", MediaKind::Video),
        }]);

        manager
            .handle_signaling_event(SignalingEvent::ScreenshareStopped {
                client_id: "a".into(),
                stream_id: "screen-a".to_owned(),
            })
            .await;
        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamRemoved {
            client_id: "a".into(),
            stream_id: "screen-a".to_owned(),
        }]);
        assert!(!manager.has_connection(&"a".into()));
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn disconnected_transport_restarts_ice_with_backoff() {
    local(async {
        let fakes = Fakes::new();
        let _manager = manager(&fakes);
        settle().await;
        let recv = fakes.sfu_devices.last(TransportDirection::Recv);

        recv.set_state(IceConnectionState::Disconnected);
        settle().await;
        assert!(fakes.sfu.requests_of("restartIce").is_empty());

        time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fakes.sfu.requests_of("restartIce"), vec![json!({
            "transportId": recv.id,
        })]);
        assert_eq!(recv.ice_restarts(), vec![json!({ "fresh": true })]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn ice_restart_stops_when_sfu_forgets_transport() {
    local(async {
        let fakes = Fakes::new();
        let _manager = manager(&fakes);
        settle().await;
        fakes.sfu.reject("restartIce", "No such transport");
        let send = fakes.sfu_devices.last(TransportDirection::Send);

        send.set_state(IceConnectionState::Failed);
        time::sleep(Duration::from_secs(120)).await;

        assert_eq!(fakes.sfu.requests_of("restartIce").len(), 1);
        assert!(send.ice_restarts().is_empty());
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn lost_control_channel_rebuilds_session() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        let mut events = manager.subscribe();
        settle().await;
        manager.add_local_stream(camera()).await;
        fakes.sfu.new_consumer("c1", "a", "video", "webcam");
        settle().await;
        manager.accept_new_stream("a".into(), "0".to_owned()).await;
        let _ = drain(&mut events);
        let old_send = fakes.sfu_devices.last(TransportDirection::Send);

        fakes.sfu.drop_connection();
        time::sleep(Duration::from_secs(5)).await;

        assert_eq!(fakes.sfu.connections(), 2);
        assert!(old_send.is_closed());
        let methods = fakes.sfu.methods();
        assert_eq!(count(&methods, "createTransport"), 4);
        assert_eq!(count(&methods, "produce"), 4);
        assert_eq!(count(&methods, "getCapabilities"), 1);
        assert!(!manager.has_connection(&"a".into()));
        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamRemoved {
            client_id: "a".into(),
            stream_id: "0".to_owned(),
        }]);

        fakes.sfu.new_consumer("c2", "a", "video", "webcam");
        settle().await;
        assert_eq!(drain(&mut events), vec![RtcManagerEvent::StreamAdded {
            client_id: "a".into(),
            stream_id: "0".to_owned(),
            track: MediaTrack::new("remote-c2", MediaKind::Video),
        }]);
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn held_back_clients_keep_consumers_on_rejoin() {
    local(async {
        let fakes = Fakes::new();
        let manager = manager(&fakes);
        settle().await;
        fakes.sfu.new_consumer("c1", "a", "video", "webcam");
        fakes.sfu.new_consumer("c2", "b", "video", "webcam");
        settle().await;

        manager
            .handle_signaling_event(SignalingEvent::RoomJoined {
                self_id: "self".into(),
                room: Some(Room {
                    name: "room".to_owned(),
                    clients: vec![Client::new("self", "dev-self")],
                    sfu_server: None,
                    held_back: vec!["a".into()],
                }),
                disconnect_timeout: Duration::from_secs(10),
                error: None,
            })
            .await;

        assert!(manager.has_connection(&"a".into()));
        assert!(!manager.has_connection(&"b".into()));
    })
    .await;
}
