//! Local producer slots of an SFU session.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use tracerr::Traced;

use crate::{
    log::prelude::*,
    platform::{
        MediaSource, MediaTrack, ProducerOptions, SfuError, SfuProducer,
        SfuTransport,
    },
};

/// State of a single [`MediaSource`] slot.
#[derive(Default)]
struct Slot {
    /// Live producer of this slot.
    producer: Option<Rc<dyn SfuProducer>>,

    /// Whether a producer creation is running.
    in_flight: bool,

    /// Track this slot should produce. `None` if the slot should be empty.
    desired: Option<MediaTrack>,

    /// Whether sending is paused.
    paused: bool,
}

/// Next step of a producer creation.
enum Step {
    /// Created producer matches the desired track.
    Done,

    /// Desired track changed while creating.
    Replace(MediaTrack),

    /// Slot was emptied while creating.
    Close,
}

/// Callback notifying the SFU about producers closed by the client.
pub type OnLocalClose = Box<dyn Fn(Vec<String>)>;

/// Producers of the [`MediaSource`]s of the local client.
///
/// Concurrent track updates of a slot collapse into a single in-flight
/// producer creation followed by track replacements.
pub struct ProducerSlots {
    slots: RefCell<HashMap<MediaSource, Slot>>,

    /// Notifies the SFU about locally closed producers.
    on_local_close: OnLocalClose,
}

impl ProducerSlots {
    /// Creates new empty [`ProducerSlots`].
    pub fn new(on_local_close: OnLocalClose) -> Self {
        Self {
            slots: RefCell::default(),
            on_local_close,
        }
    }

    /// Returns ID of the producer of the provided [`MediaSource`], if any.
    #[cfg(test)]
    pub fn producer_id(&self, source: MediaSource) -> Option<String> {
        self.slots
            .borrow()
            .get(&source)
            .and_then(|s| s.producer.as_ref().map(|p| p.id()))
    }

    /// Indicates whether a producer creation of the provided
    /// [`MediaSource`] is running.
    #[cfg(test)]
    pub fn is_in_flight(&self, source: MediaSource) -> bool {
        self.slots.borrow().get(&source).map_or(false, |s| s.in_flight)
    }

    /// Makes the provided [`MediaSource`] produce the provided track.
    ///
    /// Without `transport` the track is only remembered to be produced by
    /// [`ProducerSlots::produce_all`].
    ///
    /// # Errors
    ///
    /// If the producer cannot be created or its track replaced.
    pub async fn set_track(
        &self,
        source: MediaSource,
        track: MediaTrack,
        transport: Option<Rc<dyn SfuTransport>>,
    ) -> Result<(), Traced<SfuError>> {
        let producer = {
            let mut slots = self.slots.borrow_mut();
            let slot = slots.entry(source).or_default();
            slot.desired = Some(track.clone());
            if slot.in_flight {
                trace!("{:?} producer creation is in flight", source);
                return Ok(());
            }
            match (&slot.producer, &transport) {
                (Some(producer), _) => Some(Rc::clone(producer)),
                (None, Some(_)) => {
                    slot.in_flight = true;
                    None
                }
                (None, None) => return Ok(()),
            }
        };
        match (producer, transport) {
            (Some(producer), _) => producer
                .replace_track(Some(track))
                .await
                .map_err(tracerr::wrap!()),
            (None, Some(transport)) => {
                self.create(source, track, transport).await
            }
            (None, None) => Ok(()),
        }
    }

    /// Empties the provided [`MediaSource`] slot closing its producer.
    pub fn remove(&self, source: MediaSource) {
        let producer = {
            let mut slots = self.slots.borrow_mut();
            match slots.get_mut(&source) {
                Some(slot) => {
                    slot.desired = None;
                    slot.producer.take()
                }
                None => None,
            }
        };
        if let Some(producer) = producer {
            self.close_producer(&*producer, true);
        }
    }

    /// Pauses or resumes the provided [`MediaSource`] returning ID of the
    /// affected producer.
    pub fn set_paused(&self, source: MediaSource, paused: bool) -> Option<String> {
        let producer = {
            let mut slots = self.slots.borrow_mut();
            let slot = slots.entry(source).or_default();
            slot.paused = paused;
            slot.producer.clone()
        };
        producer.map(|producer| {
            if paused {
                producer.pause();
            } else {
                producer.resume();
            }
            producer.id()
        })
    }

    /// Handles a producer closed by the SFU. The SFU is not notified back.
    pub fn on_closed_by_sfu(&self, producer_id: &str) {
        let producer = self.slots.borrow_mut().values_mut().find_map(|slot| {
            let matches = slot
                .producer
                .as_ref()
                .map_or(false, |p| p.id() == producer_id);
            if matches {
                slot.producer.take()
            } else {
                None
            }
        });
        match producer {
            Some(producer) => self.close_producer(&*producer, false),
            None => debug!("SFU closed unknown producer {}", producer_id),
        }
    }

    /// Produces all the desired tracks over the provided transport.
    ///
    /// Producers of a previous transport are expected to be dropped with
    /// [`ProducerSlots::forget_producers`] first.
    pub async fn produce_all(&self, transport: &Rc<dyn SfuTransport>) {
        let desired: Vec<_> = self
            .slots
            .borrow()
            .iter()
            .filter_map(|(source, slot)| {
                slot.desired.clone().map(|track| (*source, track))
            })
            .collect();
        for (source, track) in desired {
            if let Err(e) = self
                .set_track(source, track, Some(Rc::clone(transport)))
                .await
            {
                error!("Failed to produce {:?}: {}", source, e);
            }
        }
    }

    /// Drops all the producers without notifying the SFU, keeping the
    /// desired tracks.
    pub fn forget_producers(&self) {
        for slot in self.slots.borrow_mut().values_mut() {
            slot.producer = None;
            slot.in_flight = false;
        }
    }

    /// Closes all the producers without notifying the SFU and empties all
    /// the slots.
    pub fn close_all(&self) {
        let producers: Vec<_> = self
            .slots
            .borrow_mut()
            .drain()
            .filter_map(|(_, slot)| slot.producer)
            .collect();
        for producer in producers {
            producer.close();
        }
    }

    /// Creates a producer of the provided slot and brings it to the latest
    /// desired track.
    async fn create(
        &self,
        source: MediaSource,
        track: MediaTrack,
        transport: Rc<dyn SfuTransport>,
    ) -> Result<(), Traced<SfuError>> {
        let paused = self.slots.borrow().get(&source).map_or(false, |s| s.paused);
        let created = transport
            .produce(ProducerOptions {
                track: track.clone(),
                source,
                paused,
            })
            .await;
        let producer = match created {
            Ok(producer) => producer,
            Err(e) => {
                if let Some(slot) = self.slots.borrow_mut().get_mut(&source) {
                    slot.in_flight = false;
                }
                return Err(tracerr::new!(e));
            }
        };
        debug!("{:?} producer {} created", source, producer.id());

        let mut current = track;
        loop {
            let step = {
                let mut slots = self.slots.borrow_mut();
                let slot = slots.entry(source).or_default();
                match slot.desired.clone() {
                    None => {
                        slot.in_flight = false;
                        Step::Close
                    }
                    Some(desired) if desired == current => {
                        slot.in_flight = false;
                        slot.producer = Some(Rc::clone(&producer));
                        Step::Done
                    }
                    Some(desired) => Step::Replace(desired),
                }
            };
            match step {
                Step::Done => return Ok(()),
                Step::Close => {
                    self.close_producer(&*producer, true);
                    return Ok(());
                }
                Step::Replace(desired) => {
                    if let Err(e) =
                        producer.replace_track(Some(desired.clone())).await
                    {
                        let mut slots = self.slots.borrow_mut();
                        let slot = slots.entry(source).or_default();
                        slot.in_flight = false;
                        slot.producer = Some(Rc::clone(&producer));
                        return Err(tracerr::new!(e));
                    }
                    current = desired;
                }
            }
        }
    }

    /// Closes the provided producer, notifying the SFU if `local_closed`.
    fn close_producer(&self, producer: &dyn SfuProducer, local_closed: bool) {
        producer.close();
        if local_closed {
            (self.on_local_close)(vec![producer.id()]);
        }
    }
}
