//! Outward notifications emitted by the modem engine.
//!
//! Events are sent from the demodulation worker or the caller thread that
//! triggered them, never from the audio callback. Subscribers must not
//! assume which thread delivers an event.

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModemEvent {
    /// Bytes of the packet being assembled, out of its declared length.
    Progress { received: usize, total: usize },

    /// A validated packet was queued for the application.
    PacketReceived,

    /// Synchronization dropped while a packet was being assembled.
    PacketLost,

    /// A packet was fully received but failed its checksum or length check.
    PacketCorrupted { id: u8 },

    /// New settings were adopted; stream and demodulation are stopped.
    ConfigurationChanged,
}

/// Fan-out of [`ModemEvent`]s to any number of subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ModemEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> Receiver<ModemEvent> {
        let (tx, rx) = channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to all live subscribers; dropped receivers are pruned.
    pub fn emit(&self, event: ModemEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
