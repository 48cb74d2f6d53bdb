//! Consumers of a remote client received through the SFU.

use std::rc::Rc;

use crate::platform::{LocalStream, MediaKind, MediaSource, MediaTrack, SfuConsumer};

/// Consumed track of a remote stream.
struct Consumed {
    consumer: Rc<dyn SfuConsumer>,

    /// Whether the track was handed to the application.
    emitted: bool,
}

/// Remote stream split into the SFU consumers.
///
/// Its tracks reach the application only after the stream is accepted.
#[derive(Default)]
struct StreamHandoff {
    has_accepted: bool,
    consumers: Vec<Consumed>,
}

impl StreamHandoff {
    fn has_emitted(&self) -> bool {
        self.consumers.iter().any(|c| c.emitted)
    }

    fn close(&mut self) -> Vec<Rc<dyn SfuConsumer>> {
        self.has_accepted = false;
        self.consumers.drain(..).map(|c| c.consumer).collect()
    }
}

/// Track which should be handed to the application.
#[derive(Clone)]
pub struct Emission {
    pub stream_id: String,
    pub consumer_id: String,
    pub track: MediaTrack,
}

/// Received media of a single remote client.
#[derive(Default)]
pub struct RemoteClientState {
    /// ID of the announced screen stream.
    screen_stream_id: Option<String>,

    webcam: StreamHandoff,
    screen: StreamHandoff,
}

impl RemoteClientState {
    /// Remembers ID of the screen stream of this client.
    pub fn set_screen_stream(&mut self, stream_id: String) {
        self.screen_stream_id = Some(stream_id);
    }

    /// Returns ID of the stream consumers of the provided source belong to.
    pub fn stream_id(&self, source: MediaSource) -> String {
        if source.is_screen() {
            self.screen_stream_id
                .clone()
                .unwrap_or_else(|| "screen".to_owned())
        } else {
            LocalStream::CAMERA_STREAM_ID.to_owned()
        }
    }

    /// Adds a new consumer. Returns its [`Emission`] if its stream is
    /// accepted already.
    pub fn add_consumer(
        &mut self,
        consumer: Rc<dyn SfuConsumer>,
        source: MediaSource,
    ) -> Option<Emission> {
        let stream_id = self.stream_id(source);
        let stream = self.stream_mut(source.is_screen());
        let emission = if stream.has_accepted {
            Some(Emission {
                stream_id,
                consumer_id: consumer.id(),
                track: consumer.track(),
            })
        } else {
            None
        };
        stream.consumers.push(Consumed {
            consumer,
            emitted: emission.is_some(),
        });
        emission
    }

    /// Accepts the provided stream returning [`Emission`]s of all its
    /// buffered tracks.
    pub fn accept(&mut self, stream_id: &str) -> Vec<Emission> {
        let is_screen = stream_id != LocalStream::CAMERA_STREAM_ID;
        let id = stream_id.to_owned();
        let stream = self.stream_mut(is_screen);
        stream.has_accepted = true;
        stream
            .consumers
            .iter_mut()
            .filter(|c| !c.emitted)
            .map(|c| {
                c.emitted = true;
                Emission {
                    stream_id: id.clone(),
                    consumer_id: c.consumer.id(),
                    track: c.consumer.track(),
                }
            })
            .collect()
    }

    /// Returns IDs of the emitted webcam consumers of the provided kind.
    pub fn webcam_consumer_ids(&self, kind: MediaKind, emitted_only: bool) -> Vec<String> {
        self.webcam
            .consumers
            .iter()
            .filter(|c| c.consumer.track().kind == kind)
            .filter(|c| !emitted_only || c.emitted)
            .map(|c| c.consumer.id())
            .collect()
    }

    /// Removes the consumer with the provided ID.
    pub fn remove_consumer(
        &mut self,
        consumer_id: &str,
    ) -> Option<Rc<dyn SfuConsumer>> {
        for stream in [&mut self.webcam, &mut self.screen].iter_mut() {
            let pos = stream
                .consumers
                .iter()
                .position(|c| c.consumer.id() == consumer_id);
            if let Some(pos) = pos {
                return Some(stream.consumers.remove(pos).consumer);
            }
        }
        None
    }

    /// Drops the screen stream returning its consumers and whether any of
    /// its tracks was emitted.
    pub fn stop_screenshare(&mut self) -> (Vec<Rc<dyn SfuConsumer>>, bool) {
        self.screen_stream_id = None;
        let emitted = self.screen.has_emitted();
        (self.screen.close(), emitted)
    }

    /// Drops all the streams returning their consumers and IDs of the
    /// emitted streams.
    pub fn close(&mut self) -> (Vec<Rc<dyn SfuConsumer>>, Vec<String>) {
        let mut emitted = Vec::new();
        if self.webcam.has_emitted() {
            emitted.push(LocalStream::CAMERA_STREAM_ID.to_owned());
        }
        if self.screen.has_emitted() {
            emitted.push(self.stream_id(MediaSource::ScreenVideo));
        }
        let mut consumers = self.webcam.close();
        consumers.extend(self.screen.close());
        (consumers, emitted)
    }

    /// Drops all the consumers keeping acceptance of the streams, so the
    /// re-announced consumers are emitted right away.
    ///
    /// Returns the dropped consumers and IDs of the streams whose tracks were
    /// emitted.
    pub fn drop_consumers(&mut self) -> (Vec<Rc<dyn SfuConsumer>>, Vec<String>) {
        let mut emitted = Vec::new();
        if self.webcam.has_emitted() {
            emitted.push(LocalStream::CAMERA_STREAM_ID.to_owned());
        }
        if self.screen.has_emitted() {
            emitted.push(self.stream_id(MediaSource::ScreenVideo));
        }
        let mut consumers: Vec<_> =
            self.webcam.consumers.drain(..).map(|c| c.consumer).collect();
        consumers.extend(self.screen.consumers.drain(..).map(|c| c.consumer));
        (consumers, emitted)
    }

    /// Indicates whether any consumer of this client exists.
    pub fn has_consumers(&self) -> bool {
        !self.webcam.consumers.is_empty() || !self.screen.consumers.is_empty()
    }

    fn stream_mut(&mut self, is_screen: bool) -> &mut StreamHandoff {
        if is_screen {
            &mut self.screen
        } else {
            &mut self.webcam
        }
    }
}
