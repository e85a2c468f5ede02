//! `CommandState` and its two coupled state machines (spec.md §3, §4.4).

use lunch_core::Pid;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ChildState {
    pub fn parse(name: &str) -> Option<ChildState> {
        match name {
            "STARTING" => Some(ChildState::Starting),
            "RUNNING" => Some(ChildState::Running),
            "STOPPED" => Some(ChildState::Stopped),
            _ => None,
        }
    }
}

/// The derived view exposed to the UI by `Supervisor::state_info`
/// (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateInfo {
    Starting,
    Running,
    Stopping,
    Todo,
    GaveUp,
    Done,
    Failed,
    Stopped,
}

impl fmt::Display for StateInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            StateInfo::Starting => "STARTING",
            StateInfo::Running => "RUNNING",
            StateInfo::Stopping => "STOPPING",
            StateInfo::Todo => "TODO",
            StateInfo::GaveUp => "GAVEUP",
            StateInfo::Done => "DONE",
            StateInfo::Failed => "FAILED",
            StateInfo::Stopped => "STOPPED",
        };
        f.write_str(s)
    }
}

/// Mutable, supervisor-owned state for one registered command
/// (spec.md §3).
#[derive(Debug, Clone)]
pub struct CommandState {
    pub slave_state: SlaveState,
    pub child_state: ChildState,
    pub run_count: u32,
    pub try_count: u32,
    pub gave_up: bool,
    pub enabled: bool,
    pub to_be_deleted: bool,
    pub current_backoff: Duration,
    pub next_try_time: Instant,
    pub child_pid: Option<Pid>,
    pub last_exit_code: Option<i32>,
    pub received_ready: bool,
}

impl CommandState {
    pub fn new(try_again_delay: Duration, now: Instant) -> Self {
        CommandState {
            slave_state: SlaveState::Stopped,
            child_state: ChildState::Stopped,
            run_count: 0,
            try_count: 0,
            gave_up: false,
            enabled: true,
            to_be_deleted: false,
            current_backoff: try_again_delay,
            next_try_time: now,
            child_pid: None,
            last_exit_code: None,
            received_ready: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_state_is_enabled_and_fully_stopped() {
        let now = Instant::now();
        let s = CommandState::new(Duration::from_millis(100), now);
        assert_eq!(s.slave_state, SlaveState::Stopped);
        assert_eq!(s.child_state, ChildState::Stopped);
        assert!(s.enabled);
        assert_eq!(s.run_count, 0);
    }

    #[test]
    fn child_state_parse_rejects_unknown_names() {
        assert_eq!(ChildState::parse("RUNNING"), Some(ChildState::Running));
        assert_eq!(ChildState::parse("bogus"), None);
    }

    #[test]
    fn state_info_display_matches_wire_tokens() {
        assert_eq!(StateInfo::GaveUp.to_string(), "GAVEUP");
        assert_eq!(StateInfo::Todo.to_string(), "TODO");
    }
}
