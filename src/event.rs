//! Player lifecycle events.
//!
//! Playback tasks never call into the host directly. They post events to
//! an [`EventQueue`]; the host drains the queue on its own update tick via
//! [`Dispatcher::tick`], which broadcasts each event once to every
//! [`Subscriber`].

use std::time::Duration;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlayerId(pub u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A session queued its first buffers and started the voice
    StartPlaying(PlayerId),

    /// A session was cancelled by `stop` or replaced by another `play`
    StopPlaying(PlayerId),

    /// A session reached the end of its source and drained
    FinishPlaying(PlayerId),

    /// A session wrapped around to its loop point
    Loop(PlayerId),

    /// A session was torn down because the device failed
    SessionFailed { player: PlayerId, error: String },
}

impl Event {
    pub fn player(&self) -> PlayerId {
        match self {
            Event::StartPlaying(player)
            | Event::StopPlaying(player)
            | Event::FinishPlaying(player)
            | Event::Loop(player) => *player,
            Event::SessionFailed { player, .. } => *player,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    pub fn send(&self, event: Event) {
        // No subscribers is fine, nobody is listening
        if self.tx.receiver_count() == 0 {
            trace!("Dropping {:?}, no subscribers", event);
            return;
        }

        if let Err(e) = self.tx.send(event) {
            error!("Error while sending event: {:?}", e);
        }
    }

    pub fn subscribe(&self) -> Subscriber {
        Subscriber::new(self.tx.subscribe())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

pub struct Subscriber {
    rx: Receiver<Event>,
}

impl Subscriber {
    pub fn new(rx: Receiver<Event>) -> Self {
        Self { rx }
    }

    pub fn try_recv(&mut self) -> Result<Event, TryRecvError> {
        self.rx.try_recv()
    }

    /// Drains everything delivered so far.
    pub fn drain(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagging behind, skipped {skipped} events");
                }
                Err(_) => break events,
            }
        }
    }

    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => break Some(event),
                Err(RecvError::Closed) => break None,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagging behind, skipped {skipped} events");
                }
            }
        }
    }
}

/// Sending half handed to players. Posting never blocks.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventQueue {
    pub fn post(&self, event: Event) {
        trace!("Queued event: {:?}", event);

        if self.tx.send(event).is_err() {
            debug!("Dispatcher dropped, discarding event");
        }
    }
}

/// Owns pending events until the host's next tick.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
    bus: EventBus,
}

impl Dispatcher {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            tx,
            rx,
            bus: EventBus::new(capacity),
        }
    }

    pub fn queue(&self) -> EventQueue {
        EventQueue {
            tx: self.tx.clone(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn subscribe(&self) -> Subscriber {
        self.bus.subscribe()
    }

    /// Delivers every event posted since the previous tick, in posting
    /// order. Returns the number delivered.
    pub fn tick(&mut self) -> usize {
        let mut delivered = 0;

        while let Ok(event) = self.rx.try_recv() {
            debug!("Dispatching event: {:?}", event);
            self.bus.send(event);
            delivered += 1;
        }

        delivered
    }

    /// Ticks on a fixed period from a background task, for hosts without
    /// an update loop of their own.
    pub fn run(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.tick();
            }
        })
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
