//! `CommandSpec` — the immutable registration record for one command
//! (spec.md §3). Defaults match the registration API in spec.md §6.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub identifier: String,
    pub command_line: String,
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
    pub log_dir: PathBuf,
}

impl CommandSpec {
    /// A new spec with every optional field at its spec.md §6 default,
    /// given the two fields that have none: the identifier (already
    /// resolved by the caller, see `lunch-master`'s registration logic)
    /// and the shell command line itself.
    pub fn new(identifier: impl Into<String>, command_line: impl Into<String>, log_dir: PathBuf) -> Self {
        CommandSpec {
            identifier: identifier.into(),
            command_line: command_line.into(),
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
            log_dir,
        }
    }

    pub fn is_remote(&self) -> bool {
        self.host.is_some()
    }

    pub fn slave_log_path(&self) -> PathBuf {
        self.log_dir.join(format!("lunch-slave-{}.log", self.identifier))
    }

    pub fn child_log_path(&self) -> PathBuf {
        self.log_dir.join(format!("lunch-child-{}.log", self.identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_registration_api() {
        let spec = CommandSpec::new("e", "true", PathBuf::from("/tmp"));
        assert!(spec.respawn);
        assert_eq!(spec.sleep_after, Duration::from_millis(250));
        assert_eq!(spec.minimum_lifetime, Duration::from_millis(500));
        assert_eq!(spec.try_again_delay, Duration::from_millis(250));
        assert_eq!(spec.give_up_after, 0);
        assert_eq!(spec.delay_before_kill, Duration::from_secs_f64(8.0));
        assert!(!spec.is_remote());
    }

    #[test]
    fn log_paths_are_named_by_identifier() {
        let spec = CommandSpec::new("audio", "true", PathBuf::from("/var/log/lunch"));
        assert_eq!(
            spec.slave_log_path(),
            PathBuf::from("/var/log/lunch/lunch-slave-audio.log")
        );
        assert_eq!(
            spec.child_log_path(),
            PathBuf::from("/var/log/lunch/lunch-child-audio.log")
        );
    }
}
