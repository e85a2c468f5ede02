//! The programmatic registration API consumed by a configuration loader
//! (spec.md §6): `CommandOptions` carries the same defaults as
//! `addCommand`, which `Master::add_command` turns into a `CommandSpec`
//! plus a graph node.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub command: String,
    pub identifier: Option<String>,
    pub env: Vec<(String, String)>,
    pub user: Option<String>,
    pub host: Option<String>,
    pub ssh_port: Option<u16>,
    pub depends: Vec<String>,
    pub respawn: bool,
    pub sleep_after: Duration,
    pub minimum_lifetime: Duration,
    pub try_again_delay: Duration,
    pub give_up_after: u32,
    pub delay_before_kill: Duration,
    pub log_dir: Option<PathBuf>,
}

impl CommandOptions {
    pub fn new(command: impl Into<String>) -> Self {
        CommandOptions {
            command: command.into(),
            identifier: None,
            env: Vec::new(),
            user: None,
            host: None,
            ssh_port: None,
            depends: Vec::new(),
            respawn: true,
            sleep_after: Duration::from_millis(250),
            minimum_lifetime: Duration::from_millis(500),
            try_again_delay: Duration::from_millis(250),
            give_up_after: 0,
            delay_before_kill: Duration::from_secs_f64(8.0),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MasterError {
    EmptyCommand,
    InvalidIdentifier(String),
    UnknownDependency(String),
    Cycle(String, String),
    UnknownCommand(String),
}

impl fmt::Display for MasterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MasterError::EmptyCommand => write!(f, "command must not be empty"),
            MasterError::InvalidIdentifier(reason) => write!(f, "invalid identifier: {}", reason),
            MasterError::UnknownDependency(id) => write!(f, "depends on unknown command {:?}", id),
            MasterError::Cycle(from, to) => {
                write!(f, "dependency {} -> {} would close a cycle", from, to)
            }
            MasterError::UnknownCommand(id) => write!(f, "no such command: {}", id),
        }
    }
}

impl std::error::Error for MasterError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_options_match_spec_defaults() {
        let opts = CommandOptions::new("sleep 1");
        assert_eq!(opts.command, "sleep 1");
        assert!(opts.identifier.is_none());
        assert!(opts.respawn);
        assert_eq!(opts.give_up_after, 0);
        assert_eq!(opts.sleep_after, Duration::from_millis(250));
        assert_eq!(opts.delay_before_kill, Duration::from_secs_f64(8.0));
    }

    #[test]
    fn error_messages_name_the_offending_identifier() {
        assert_eq!(
            MasterError::UnknownDependency("db".to_string()).to_string(),
            "depends on unknown command \"db\""
        );
        assert_eq!(
            MasterError::Cycle("a".to_string(), "b".to_string()).to_string(),
            "dependency a -> b would close a cycle"
        );
    }
}
