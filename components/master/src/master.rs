//! `Master` — owns the dependency graph and the identifier→supervisor
//! map, and reconciles desired vs actual state on every tick (spec.md
//! §4.5).

use crate::events::ChannelSink;
use crate::registration::{CommandOptions, MasterError};
use lunch_core::validate_identifier;
use lunch_graph::Graph;
use lunch_supervisor::{ChildState, CommandSpec, Event, EventSink, Supervisor};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Master {
    graph: Graph,
    supervisors: HashMap<String, Supervisor>,
    /// Supervisors removed from `supervisors` that are mid-`quitSlave`,
    /// polled until their slave is reaped and then dropped.
    draining: Vec<Supervisor>,
    local_addresses: HashSet<String>,
    wants_to_live: bool,
    launch_next_time: Instant,
    default_log_dir: PathBuf,
    default_identifier_counter: u32,
    sink: Arc<dyn EventSink>,
    events_rx: Receiver<(String, Event)>,
}

impl Master {
    pub fn new(default_log_dir: PathBuf, now: Instant) -> Self {
        let (tx, rx) = mpsc::channel();
        let sink: Arc<dyn EventSink> = Arc::new(ChannelSink::new(tx));
        Master {
            graph: Graph::new(),
            supervisors: HashMap::new(),
            draining: Vec::new(),
            local_addresses: HashSet::new(),
            wants_to_live: true,
            launch_next_time: now,
            default_log_dir,
            default_identifier_counter: 0,
            sink,
            events_rx: rx,
        }
    }

    pub fn add_local_address(&mut self, addr: impl Into<String>) {
        self.local_addresses.insert(addr.into());
    }

    /// `addCommand` (spec.md §4.5, §6).
    pub fn add_command(&mut self, mut opts: CommandOptions, now: Instant) -> Result<String, MasterError> {
        if opts.command.trim().is_empty() {
            return Err(MasterError::EmptyCommand);
        }
        if let Some(host) = &opts.host {
            if self.local_addresses.contains(host) {
                opts.host = None;
            }
        }

        let identifier = self.resolve_identifier(opts.identifier.take())?;

        for dep in &opts.depends {
            if !self.supervisors.contains_key(dep) {
                return Err(MasterError::UnknownDependency(dep.clone()));
            }
        }

        let mut spec = CommandSpec::new(
            identifier.clone(),
            opts.command,
            opts.log_dir.unwrap_or_else(|| self.default_log_dir.clone()),
        );
        spec.env = opts.env;
        spec.user = opts.user;
        spec.host = opts.host;
        spec.ssh_port = opts.ssh_port;
        spec.depends = opts.depends.clone();
        spec.respawn = opts.respawn;
        spec.sleep_after = opts.sleep_after;
        spec.minimum_lifetime = opts.minimum_lifetime;
        spec.try_again_delay = opts.try_again_delay;
        spec.give_up_after = opts.give_up_after;
        spec.delay_before_kill = opts.delay_before_kill;

        self.graph
            .add_node(&identifier, &opts.depends)
            .map_err(|err| match err {
                lunch_graph::GraphError::Cycle { from, to } => MasterError::Cycle(from, to),
                lunch_graph::GraphError::UnknownNode(id) => MasterError::UnknownDependency(id),
            })?;

        let supervisor = Supervisor::new(spec, self.sink.clone(), now);
        self.supervisors.insert(identifier.clone(), supervisor);
        self.sink.emit(&identifier, Event::CommandAdded);
        Ok(identifier)
    }

    fn resolve_identifier(&mut self, requested: Option<String>) -> Result<String, MasterError> {
        let mut identifier = match requested {
            Some(id) => {
                validate_identifier(&id).map_err(|e| MasterError::InvalidIdentifier(e.to_string()))?;
                id
            }
            None => {
                let id = format!("default_{}", self.default_identifier_counter);
                self.default_identifier_counter += 1;
                id
            }
        };
        while self.supervisors.contains_key(&identifier) {
            identifier.push('X');
        }
        Ok(identifier)
    }

    /// `removeCommand` (spec.md §4.5): cooperative — marks for deletion,
    /// the tick performs the actual removal once the slave is stopped.
    pub fn remove_command(&mut self, identifier: &str, now: Instant) -> Result<(), MasterError> {
        let sup = self
            .supervisors
            .get_mut(identifier)
            .ok_or_else(|| MasterError::UnknownCommand(identifier.to_string()))?;
        if sup.child_state() == ChildState::Running {
            sup.stop(now);
        }
        sup.mark_to_be_deleted();
        Ok(())
    }

    pub fn supervisor(&self, identifier: &str) -> Option<&Supervisor> {
        self.supervisors.get(identifier)
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.supervisors.keys().map(String::as_str)
    }

    /// Drains every event raised since the last call.
    pub fn take_events(&mut self) -> Vec<(String, Event)> {
        self.events_rx.try_iter().collect()
    }

    /// The reconciler tick (spec.md §4.5), run roughly every 50 ms.
    pub fn tick(&mut self, now: Instant) {
        for sup in self.supervisors.values_mut() {
            sup.poll(now);
        }
        self.draining.retain_mut(|sup| {
            sup.poll(now);
            !sup.slave_reaped()
        });

        let order: Vec<String> = self
            .graph
            .iter_from_root_to_leaves()
            .filter(|id| *id != lunch_graph::ROOT)
            .map(str::to_string)
            .collect();

        for id in &order {
            self.tick_node(id, now);
        }

        self.reap_deleted(now);
    }

    fn tick_node(&mut self, id: &str, now: Instant) {
        let child_state = match self.supervisors.get(id) {
            Some(sup) => sup.child_state(),
            None => return,
        };
        match child_state {
            ChildState::Running => {
                if !self.wants_to_live {
                    self.supervisors.get_mut(id).unwrap().stop(now);
                } else if self.any_dependency_implies_stop(id) {
                    // Dependency-driven, not a real shutdown: must not
                    // disable the command, or it would never restart once
                    // the dependency comes back (see `stop_for_dependency`).
                    self.supervisors.get_mut(id).unwrap().stop_for_dependency(now);
                }
            }
            ChildState::Stopped => {
                if self.should_start(id, now) {
                    let sleep_after = self.supervisors[id].spec().sleep_after;
                    self.supervisors.get_mut(id).unwrap().start();
                    self.launch_next_time = now + sleep_after;
                }
            }
            ChildState::Starting | ChildState::Stopping => {}
        }
    }

    /// "a respawnable dep not RUNNING, or a non-respawnable dep that has
    /// never run" (spec.md §4.5). The traversal order is a DFS pre-order
    /// over `dependents`, not a topological sort, so a node's dependencies
    /// are not guaranteed final by the time it's ticked within the same
    /// pass (e.g. a diamond with `c` depending on both `a` and `b` can
    /// visit `c` before `b`). The cascade this check produces — a node
    /// stops itself once any dependency fails, and on the next tick its
    /// own dependents see *it* as no longer RUNNING and stop too — still
    /// converges, just potentially a tick later than a topological walk
    /// would, which is acceptable given the tick cadence (spec.md §5).
    fn any_dependency_implies_stop(&self, id: &str) -> bool {
        let Ok(deps) = self.graph.all_dependencies(id) else {
            return true;
        };
        deps.iter().any(|dep_id| match self.supervisors.get(dep_id) {
            Some(dep) => {
                if dep.spec().respawn {
                    dep.child_state() != ChildState::Running
                } else {
                    dep.run_count() == 0
                }
            }
            None => true,
        })
    }

    fn should_start(&self, id: &str, now: Instant) -> bool {
        let sup = &self.supervisors[id];
        if !(self.wants_to_live
            && self.launch_next_time <= now
            && sup.enabled()
            && sup.is_ready_to_be_started(now))
        {
            return false;
        }
        if !sup.spec().respawn && sup.run_count() >= 1 {
            return false;
        }

        let Ok(dependents) = self.graph.all_dependents(id) else {
            return false;
        };
        let any_dependent_alive = dependents.iter().any(|dep_id| {
            self.supervisors
                .get(dep_id)
                .map_or(false, |d| d.child_state() != ChildState::Stopped)
        });
        if any_dependent_alive {
            return false;
        }

        let Ok(deps) = self.graph.all_dependencies(id) else {
            return false;
        };
        deps.iter().all(|dep_id| {
            self.supervisors.get(dep_id).map_or(false, |dep| {
                if dep.spec().respawn {
                    dep.child_state() == ChildState::Running
                } else {
                    dep.run_count() >= 1 && dep.child_state() == ChildState::Stopped
                }
            })
        })
    }

    fn reap_deleted(&mut self, now: Instant) {
        let to_delete: Vec<String> = self
            .supervisors
            .iter()
            .filter(|(_, sup)| sup.to_be_deleted() && sup.child_state() == ChildState::Stopped)
            .map(|(id, _)| id.clone())
            .collect();

        for id in to_delete {
            let _ = self.graph.remove_node(&id);
            if let Some(mut sup) = self.supervisors.remove(&id) {
                sup.quit_slave(now);
                self.draining.push(sup);
            }
            self.sink.emit(&id, Event::CommandRemoved);
        }
    }

    /// Before-shutdown hook (spec.md §4.5): stop everything, tick until
    /// every command is `STOPPED` or the ceiling passes.
    pub fn shutdown(&mut self, ceiling: Duration, now: Instant) {
        self.wants_to_live = false;
        let deadline = now + ceiling;
        loop {
            let tick_now = Instant::now();
            self.tick(tick_now);
            let all_stopped = self
                .supervisors
                .values()
                .all(|sup| sup.child_state() == ChildState::Stopped);
            if all_stopped {
                break;
            }
            if tick_now >= deadline {
                for (id, sup) in &self.supervisors {
                    if sup.child_state() != ChildState::Stopped {
                        log::error!("{}: did not stop before the shutdown ceiling", id);
                    }
                }
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// Stops every command, waits for all to be `STOPPED`, then starts
    /// them all again.
    pub fn restart_all(&mut self, ceiling: Duration, now: Instant) {
        let ids: Vec<String> = self.supervisors.keys().cloned().collect();
        for id in &ids {
            if let Some(sup) = self.supervisors.get_mut(id) {
                sup.stop(now);
            }
        }
        let deadline = now + ceiling;
        loop {
            let tick_now = Instant::now();
            self.tick(tick_now);
            if self.supervisors.values().all(|s| s.child_state() == ChildState::Stopped) {
                break;
            }
            if tick_now >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        for id in &ids {
            if let Some(sup) = self.supervisors.get_mut(id) {
                sup.restart(Instant::now());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn master() -> Master {
        Master::new(PathBuf::from("/tmp"), Instant::now())
    }

    /// End-to-end scenario 5 (spec.md §8): a colliding identifier gets
    /// `X` appended until it's unique.
    #[test]
    fn duplicate_identifier_gets_suffixed() {
        let mut m = master();
        let now = Instant::now();
        let mut first = CommandOptions::new("true");
        first.identifier = Some("x".to_string());
        let mut second = CommandOptions::new("true");
        second.identifier = Some("x".to_string());

        let a = m.add_command(first, now).unwrap();
        let b = m.add_command(second, now).unwrap();
        assert_eq!(a, "x");
        assert_eq!(b, "xX");

        let ids: Vec<&str> = m.identifiers().collect();
        assert!(ids.contains(&"x"));
        assert!(ids.contains(&"xX"));
    }

    #[test]
    fn unnamed_commands_get_incrementing_default_identifiers() {
        let mut m = master();
        let now = Instant::now();
        let a = m.add_command(CommandOptions::new("true"), now).unwrap();
        let b = m.add_command(CommandOptions::new("true"), now).unwrap();
        assert_eq!(a, "default_0");
        assert_eq!(b, "default_1");
    }

    /// End-to-end scenario 3 (spec.md §8): a host in the local-address
    /// set is rewritten away, so the supervisor spawns locally.
    #[test]
    fn host_in_local_address_set_is_rewritten_to_local() {
        let mut m = master();
        m.add_local_address("example");
        let now = Instant::now();
        let mut opts = CommandOptions::new("true");
        opts.host = Some("example".to_string());

        let id = m.add_command(opts, now).unwrap();
        let sup = m.supervisor(&id).unwrap();
        assert!(sup.spec().host.is_none());
        assert!(!sup.spec().is_remote());
    }

    #[test]
    fn depending_on_an_unregistered_command_is_rejected() {
        let mut m = master();
        let now = Instant::now();
        let mut opts = CommandOptions::new("true");
        opts.depends = vec!["nonexistent".to_string()];

        assert_eq!(
            m.add_command(opts, now).unwrap_err(),
            MasterError::UnknownDependency("nonexistent".to_string())
        );
    }

    #[test]
    fn dependency_registered_earlier_is_accepted() {
        let mut m = master();
        let now = Instant::now();
        let a = m.add_command(CommandOptions::new("true"), now).unwrap();

        let mut opts = CommandOptions::new("true");
        opts.depends = vec![a];
        assert!(m.add_command(opts, now).is_ok());
    }

    #[test]
    fn invalid_identifier_characters_are_rejected() {
        let mut m = master();
        let now = Instant::now();
        let mut opts = CommandOptions::new("true");
        opts.identifier = Some("bad id".to_string());

        assert!(matches!(
            m.add_command(opts, now),
            Err(MasterError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn empty_command_line_is_rejected() {
        let mut m = master();
        let now = Instant::now();
        assert_eq!(
            m.add_command(CommandOptions::new("   "), now).unwrap_err(),
            MasterError::EmptyCommand
        );
    }

    /// A command that never started is `childState = STOPPED` from the
    /// moment it's registered, so `removeCommand` (spec.md §4.5) reaps it
    /// on the very next tick without ever having to wait on a slave.
    #[test]
    fn removing_a_never_started_command_is_reaped_on_the_next_tick() {
        let mut m = master();
        let now = Instant::now();
        let id = m.add_command(CommandOptions::new("true"), now).unwrap();

        m.remove_command(&id, now).unwrap();
        assert!(m.supervisor(&id).unwrap().to_be_deleted());

        m.tick(Instant::now());
        assert!(m.supervisor(&id).is_none());
        assert!(!m.identifiers().any(|i| i == id));
    }

    #[test]
    fn removing_an_unknown_command_is_an_error() {
        let mut m = master();
        assert_eq!(
            m.remove_command("nope", Instant::now()).unwrap_err(),
            MasterError::UnknownCommand("nope".to_string())
        );
    }

    /// Reconciler invariant (spec.md §8): if nothing was ever started,
    /// shutdown completes immediately rather than waiting out the
    /// ceiling.
    #[test]
    fn shutdown_with_nothing_running_completes_well_under_the_ceiling() {
        let mut m = master();
        let now = Instant::now();
        m.add_command(CommandOptions::new("true"), now).unwrap();

        let start = Instant::now();
        m.shutdown(Duration::from_secs(20), now);
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
