//! `Supervisor` — owns one slave process handle and drives the two
//! coupled state machines described in spec.md §4.4.

use crate::events::{Event, EventSink};
use crate::quit::QuitPhase;
use crate::spec::CommandSpec;
use crate::state::{ChildState, CommandState, SlaveState, StateInfo};
use crate::transport::SlaveHandle;
use lunch_core::process;
use lunch_core::outputln;
use lunch_core::Signal;
use lunch_protocol::{parse_inbound, ssh, Inbound, Outbound};
use std::sync::Arc;
use std::time::Instant;

pub struct Supervisor {
    spec: CommandSpec,
    state: CommandState,
    slave: Option<SlaveHandle>,
    quit_phase: QuitPhase,
    ssh_error_latched: bool,
    sink: Arc<dyn EventSink>,
}

impl Supervisor {
    pub fn new(spec: CommandSpec, sink: Arc<dyn EventSink>, now: Instant) -> Self {
        let state = CommandState::new(spec.try_again_delay, now);
        Supervisor {
            spec,
            state,
            slave: None,
            quit_phase: QuitPhase::Idle,
            ssh_error_latched: false,
            sink,
        }
    }

    pub fn identifier(&self) -> &str {
        &self.spec.identifier
    }

    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub fn slave_state(&self) -> SlaveState {
        self.state.slave_state
    }

    pub fn child_state(&self) -> ChildState {
        self.state.child_state
    }

    pub fn run_count(&self) -> u32 {
        self.state.run_count
    }

    pub fn enabled(&self) -> bool {
        self.state.enabled
    }

    pub fn to_be_deleted(&self) -> bool {
        self.state.to_be_deleted
    }

    pub fn mark_to_be_deleted(&mut self) {
        self.state.to_be_deleted = true;
    }

    pub fn slave_reaped(&self) -> bool {
        self.quit_phase.is_reaped()
    }

    fn emit(&self, event: Event) {
        self.sink.emit(&self.spec.identifier, event);
    }

    /// `stateInfo()` (spec.md §4.4). TODO and GAVEUP both fire off
    /// `runCount == 0`, which end-to-end scenario 1 (spec.md §8) resolves
    /// by checking `gaveUp` first: a command that gave up after zero
    /// successful runs reports GAVEUP, not TODO.
    pub fn state_info(&self) -> StateInfo {
        match self.state.child_state {
            ChildState::Starting => return StateInfo::Starting,
            ChildState::Running => return StateInfo::Running,
            ChildState::Stopping => return StateInfo::Stopping,
            ChildState::Stopped => {}
        }
        if self.state.gave_up {
            StateInfo::GaveUp
        } else if self.state.run_count == 0 {
            StateInfo::Todo
        } else if !self.spec.respawn {
            StateInfo::Done
        } else if !self.state.enabled {
            StateInfo::Stopped
        } else if self.state.last_exit_code.map_or(false, |c| c != 0) {
            StateInfo::Failed
        } else {
            StateInfo::Stopped
        }
    }

    pub fn is_ready_to_be_started(&self, now: Instant) -> bool {
        self.state.next_try_time <= now
            && self.state.child_state == ChildState::Stopped
            && (self.state.slave_state != SlaveState::Running || self.state.received_ready)
    }

    /// Start sequence requested by the reconciler (spec.md §4.4).
    pub fn start(&mut self) {
        if self.state.child_state == ChildState::Running {
            return;
        }
        if self.state.slave_state == SlaveState::Running && self.state.child_state == ChildState::Stopped {
            self.send_startup_sequence();
            return;
        }
        if self.state.slave_state == SlaveState::Stopped && self.state.child_state == ChildState::Stopped {
            self.spawn_slave();
            return;
        }
        log::warn!(
            "{}: start requested while slave={:?} child={:?}; ignoring",
            self.spec.identifier,
            self.state.slave_state,
            self.state.child_state
        );
    }

    fn spawn_slave(&mut self) {
        self.state.slave_state = SlaveState::Starting;
        match SlaveHandle::spawn(&self.spec) {
            Ok(handle) => self.slave = Some(handle),
            Err(err) => {
                log::error!("{}: failed to spawn slave: {}", self.spec.identifier, err);
                self.state.slave_state = SlaveState::Stopped;
            }
        }
    }

    fn send_startup_sequence(&mut self) {
        let identifier = self.spec.identifier.clone();
        let Some(slave) = self.slave.as_mut() else {
            log::warn!("{}: no slave handle to start the command on", identifier);
            return;
        };
        let _ = slave.write_line(&Outbound::Do(self.spec.command_line.clone()).to_string());
        let _ = slave.write_line(&Outbound::Logdir(self.spec.log_dir.display().to_string()).to_string());
        let _ = slave.write_line(&Outbound::Env(self.spec.env.clone()).to_string());
        let _ = slave.write_line(&Outbound::Run.to_string());
        self.state.child_state = ChildState::Starting;
        self.state.try_count += 1;
        outputln!(preamble identifier, "sent start sequence (attempt {})", self.state.try_count);
    }

    /// `Stop` (spec.md §4.4): resets back-off bookkeeping, disables
    /// restarts, and asks a live child to terminate.
    pub fn stop(&mut self, now: Instant) {
        self.reset(now);
        self.state.enabled = false;
        if matches!(self.state.child_state, ChildState::Running | ChildState::Starting) {
            self.send_stop();
        }
    }

    /// The reconciler's own dependency-driven stop (spec.md §4.5): a
    /// command whose dependency is no longer up gets told to stop, but
    /// unlike `stop` it is not disabled, so the reconciler restarts it on
    /// its own once the dependency is healthy again — the original's
    /// `Command.start()` re-enables on every start request for exactly
    /// this reason (original_source `lunch/commands.py`), so `enabled`
    /// should never latch false here in the first place.
    pub fn stop_for_dependency(&mut self, now: Instant) {
        self.state.next_try_time = now;
        if matches!(self.state.child_state, ChildState::Running | ChildState::Starting) {
            self.send_stop();
        }
    }

    fn send_stop(&mut self) {
        if let Some(slave) = self.slave.as_mut() {
            let _ = slave.write_line(&Outbound::Stop.to_string());
        }
        self.state.child_state = ChildState::Stopping;
    }

    pub fn reset(&mut self, now: Instant) {
        self.state.gave_up = false;
        self.state.next_try_time = now;
        self.state.current_backoff = self.spec.try_again_delay;
    }

    /// Re-enable a command that gave up or was stopped, without
    /// re-requesting a start — the next reconciler tick does that.
    pub fn restart(&mut self, now: Instant) {
        self.reset(now);
        self.state.enabled = true;
    }

    /// `quitSlave` (spec.md §4.4). A second call while one is already in
    /// progress escalates immediately to SIGKILL.
    pub fn quit_slave(&mut self, now: Instant) {
        match self.quit_phase {
            QuitPhase::Idle => {
                if matches!(self.state.child_state, ChildState::Running | ChildState::Starting) {
                    self.send_stop();
                    self.quit_phase = QuitPhase::AwaitingChildStop(now + self.spec.delay_before_kill);
                } else {
                    self.send_signal(Signal::TERM);
                    self.quit_phase = QuitPhase::AwaitingTerm(now + self.spec.delay_before_kill);
                }
            }
            QuitPhase::Reaped => {}
            _ => {
                self.send_signal(Signal::KILL);
                self.quit_phase = QuitPhase::Killed;
            }
        }
    }

    fn tick_quit(&mut self, now: Instant) {
        match self.quit_phase {
            QuitPhase::AwaitingChildStop(deadline) if now >= deadline => {
                self.send_signal(Signal::TERM);
                self.quit_phase = QuitPhase::AwaitingTerm(now + self.spec.delay_before_kill);
            }
            QuitPhase::AwaitingTerm(deadline) if now >= deadline => {
                self.send_signal(Signal::KILL);
                self.quit_phase = QuitPhase::Killed;
            }
            QuitPhase::Killed => {
                let reaped = match self.slave.as_mut() {
                    Some(slave) => slave.try_wait().unwrap_or(false),
                    None => true,
                };
                if reaped {
                    self.quit_phase = QuitPhase::Reaped;
                    self.state.slave_state = SlaveState::Stopped;
                }
            }
            _ => {}
        }
    }

    fn send_signal(&self, sig: Signal) {
        if let Some(slave) = &self.slave {
            if let Err(err) = process::signal(slave.pid(), sig) {
                log::warn!(
                    "{}: failed to send {} to slave pid {}: {}",
                    self.spec.identifier,
                    sig,
                    slave.pid(),
                    err
                );
            }
        }
    }

    /// Drains every buffered line from the slave, reacts to protocol
    /// messages, and advances any in-progress `quitSlave`. Called once
    /// per reconciler tick.
    pub fn poll(&mut self, now: Instant) {
        let lines: Vec<String> = match &self.slave {
            Some(slave) => std::iter::from_fn(|| slave.try_recv_line()).collect(),
            None => Vec::new(),
        };
        for line in lines {
            if !self.ssh_error_latched {
                if let Some(pattern) = ssh::sniff(&line) {
                    self.ssh_error_latched = true;
                    self.emit(Event::SshError {
                        message: format!("{} ({})", line.trim(), pattern),
                    });
                }
            }
            if let Some(msg) = parse_inbound(&line) {
                self.handle_inbound(msg, now);
            }
        }
        if self.quit_phase.is_in_progress() {
            self.tick_quit(now);
        }
    }

    fn handle_inbound(&mut self, msg: Inbound, now: Instant) {
        let identifier = self.spec.identifier.clone();
        match msg {
            Inbound::Ready => self.handle_ready(),
            Inbound::ChildPid(pid) => self.state.child_pid = Some(pid),
            Inbound::State { name, runtime } => self.handle_state(&name, runtime, now),
            Inbound::Retval(code) => self.state.last_exit_code = Some(code),
            Inbound::Msg(text) | Inbound::Log(text) => outputln!(preamble identifier, "{}", text),
            Inbound::Error(text) => log::error!("{}: {}", identifier, text),
            Inbound::Pong => {}
            Inbound::NotFound => {
                self.state.enabled = false;
                self.emit(Event::CommandNotFound);
            }
            Inbound::Bye => self.state.slave_state = SlaveState::Stopped,
            Inbound::Unknown { key, payload } => {
                log::warn!("{}: unrecognized protocol line '{} {}'", identifier, key, payload);
            }
        }
    }

    fn handle_ready(&mut self) {
        self.state.slave_state = SlaveState::Running;
        self.state.received_ready = true;
        if self.state.enabled {
            self.send_startup_sequence();
        }
    }

    fn handle_state(&mut self, name: &str, runtime: Option<f64>, now: Instant) {
        let Some(child_state) = ChildState::parse(name) else {
            log::warn!("{}: unrecognized child state '{}'", self.spec.identifier, name);
            return;
        };
        match child_state {
            ChildState::Running => {
                self.state.child_state = ChildState::Running;
                self.reset_transient_failure();
                self.emit(Event::ChildStateChanged {
                    state: ChildState::Running,
                });
            }
            ChildState::Stopped => self.on_child_stopped(runtime, now),
            other => {
                self.state.child_state = other;
                self.emit(Event::ChildStateChanged { state: other });
            }
        }
    }

    fn reset_transient_failure(&mut self) {
        self.state.try_count = 0;
        self.state.current_backoff = self.spec.try_again_delay;
    }

    /// `runCount` only advances once a run has proven itself past
    /// `minimumLifetime` — see spec.md §9's resolved open question and
    /// end-to-end scenario 1 (spec.md §8).
    fn on_child_stopped(&mut self, runtime: Option<f64>, now: Instant) {
        self.state.child_state = ChildState::Stopped;
        let lived = runtime.unwrap_or(0.0);
        let startup_failure =
            self.spec.respawn && self.state.enabled && lived < self.spec.minimum_lifetime.as_secs_f64();
        if startup_failure {
            self.apply_backoff(now);
        } else {
            self.state.run_count += 1;
        }
        self.emit(Event::ChildStateChanged {
            state: ChildState::Stopped,
        });
    }

    fn apply_backoff(&mut self, now: Instant) {
        if self.spec.give_up_after > 0 && self.state.try_count >= self.spec.give_up_after {
            self.state.gave_up = true;
            self.state.enabled = false;
            return;
        }
        self.state.next_try_time = now + self.state.current_backoff;
        self.state.current_backoff *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullSink;
    use std::path::PathBuf;
    use std::time::Duration;

    fn supervisor() -> Supervisor {
        let spec = CommandSpec::new("e", "false", PathBuf::from("/tmp"));
        Supervisor::new(spec, Arc::new(NullSink), Instant::now())
    }

    #[test]
    fn new_supervisor_reports_todo() {
        let sup = supervisor();
        assert_eq!(sup.state_info(), StateInfo::Todo);
    }

    #[test]
    fn startup_failure_does_not_count_as_a_run() {
        let mut sup = supervisor();
        sup.on_child_stopped(Some(0.01), Instant::now());
        assert_eq!(sup.run_count(), 0);
    }

    #[test]
    fn give_up_after_exhausting_retries_latches_gave_up_and_disables() {
        // End-to-end scenario 1 (spec.md §8): `give_up_after = 3` means the
        // third failed attempt is terminal, not the fourth.
        let mut sup = supervisor();
        sup.spec.give_up_after = 3;
        sup.spec.minimum_lifetime = Duration::from_millis(500);
        for _ in 0..3 {
            sup.state.try_count += 1;
            sup.on_child_stopped(Some(0.01), Instant::now());
        }
        assert!(sup.state.gave_up);
        assert!(!sup.state.enabled);
        assert_eq!(sup.run_count(), 0);
        assert_eq!(sup.state_info(), StateInfo::GaveUp);
    }

    #[test]
    fn a_real_run_increments_run_count_and_clears_backoff() {
        let mut sup = supervisor();
        sup.spec.minimum_lifetime = Duration::from_millis(100);
        sup.state.try_count = 2;
        sup.on_child_stopped(Some(5.0), Instant::now());
        assert_eq!(sup.run_count(), 1);
        assert_eq!(sup.state_info(), StateInfo::Stopped);
    }

    /// End-to-end scenario 2 (spec.md §8): a dependency-driven stop must
    /// not latch `enabled` off, or a dependent would never restart once
    /// its dependency comes back up.
    #[test]
    fn stop_for_dependency_leaves_the_command_enabled() {
        let mut sup = supervisor();
        sup.state.child_state = ChildState::Running;
        sup.stop_for_dependency(Instant::now());
        assert!(sup.state.enabled);
        assert_eq!(sup.state.child_state, ChildState::Stopping);
    }

    #[test]
    fn second_quit_slave_call_escalates_to_sigkill_phase() {
        let mut sup = supervisor();
        let now = Instant::now();
        sup.quit_phase = QuitPhase::AwaitingChildStop(now + Duration::from_secs(10));
        sup.quit_slave(now);
        assert_eq!(sup.quit_phase, QuitPhase::Killed);
    }
}
