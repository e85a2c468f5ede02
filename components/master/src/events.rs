//! Wires `lunch-supervisor`'s `EventSink` callback interface to a plain
//! channel the reconciler drains on its own tick (spec.md §9: supervisors
//! hold a callback back into the reconciler, never a strong pointer).

use lunch_supervisor::{Event, EventSink};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

pub struct ChannelSink {
    tx: Mutex<Sender<(String, Event)>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<(String, Event)>) -> Self {
        ChannelSink { tx: Mutex::new(tx) }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, identifier: &str, event: Event) {
        let tx = self.tx.lock().expect("event channel mutex poisoned");
        let _ = tx.send((identifier.to_string(), event));
    }
}
