//! Two-phase slave termination (spec.md §4.4 `quitSlave`).
//!
//! Modeled as an explicit phase the reconciler drives forward on every
//! tick, rather than a genuine future — there is no executor here, just
//! the single-threaded loop spec.md §5 mandates.

use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitPhase {
    Idle,
    AwaitingChildStop(Instant),
    AwaitingTerm(Instant),
    Killed,
    Reaped,
}

impl QuitPhase {
    pub fn is_in_progress(&self) -> bool {
        !matches!(self, QuitPhase::Idle)
    }

    pub fn is_reaped(&self) -> bool {
        matches!(self, QuitPhase::Reaped)
    }
}
