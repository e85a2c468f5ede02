//! Spawns the child command under `/bin/sh -c` (spec.md §4.3), writing
//! its combined stdout+stderr to the per-command child log and placing
//! it in its own process group so the supervisor's stop/kill reaches
//! every descendant it forks, not just the immediate shell.

use std::fs::OpenOptions;
use std::io;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, Command, Stdio};

pub fn spawn(command_line: &str, env: &[(String, String)], log_path: &Path) -> io::Result<Child> {
    let log_file = OpenOptions::new().create(true).append(true).open(log_path)?;
    let stderr_file = log_file.try_clone()?;

    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c").arg(command_line);
    cmd.envs(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::from(log_file));
    cmd.stderr(Stdio::from(stderr_file));
    // New process group rooted at the child itself, so a later signal to
    // -pid reaches anything it forked too.
    cmd.process_group(0);
    cmd.spawn()
}
