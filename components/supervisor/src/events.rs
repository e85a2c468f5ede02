//! Event emission (spec.md §9): supervisors hold a callback interface
//! into the reconciler rather than a strong pointer back to it, so the
//! two can't form a reference cycle.

use crate::state::ChildState;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    SshError { message: String },
    CommandNotFound,
    ChildStateChanged { state: ChildState },
    CommandAdded,
    CommandRemoved,
}

/// Implemented by whatever owns a supervisor and wants to hear about its
/// asynchronous outcomes. `lunch-master` implements this over an
/// `mpsc::Sender` so the reconciler drains events on its own tick rather
/// than being called back into mid-traversal.
pub trait EventSink: Send {
    fn emit(&self, identifier: &str, event: Event);
}

/// An `EventSink` that discards everything; useful for tests and for
/// standalone use of a supervisor outside a master.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _identifier: &str, _event: Event) {}
}
