//! Slave spawning and the stdio channel to it (spec.md §4.4, §9 "PTY
//! requirement"). A pseudo-terminal is allocated for every spawn, local
//! or remote, so the slave sees identical line-buffered behaviour either
//! way and SSH never falls back to a password sub-prompt.

use crate::spec::CommandSpec;
use lunch_core::Pid;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::{self, BufRead, BufReader, Write};
use std::sync::mpsc;
use std::thread;

fn to_io_err(err: anyhow::Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// Builds the exec argument vector for a command's slave, local or
/// remote (spec.md §4.4).
pub fn build_argv(spec: &CommandSpec) -> (String, Vec<String>) {
    match &spec.host {
        None => (
            "lunch-slave".to_string(),
            vec!["--id".to_string(), spec.identifier.clone()],
        ),
        Some(host) => {
            let mut args = Vec::new();
            if let Some(port) = spec.ssh_port {
                args.push("-p".to_string());
                args.push(port.to_string());
            }
            if let Some(user) = &spec.user {
                args.push("-l".to_string());
                args.push(user.clone());
            }
            args.push(host.clone());
            args.push("lunch-slave".to_string());
            args.push("--id".to_string());
            args.push(spec.identifier.clone());
            ("ssh".to_string(), args)
        }
    }
}

/// A live slave process: its PTY-backed stdio and the reader thread
/// feeding lines back to the supervisor's own tick.
pub struct SlaveHandle {
    child: Box<dyn portable_pty::Child + Send + Sync>,
    writer: Box<dyn Write + Send>,
    lines_rx: mpsc::Receiver<String>,
    pid: Pid,
}

impl SlaveHandle {
    pub fn spawn(spec: &CommandSpec) -> io::Result<SlaveHandle> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: 24,
                cols: 80,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(to_io_err)?;

        let (program, args) = build_argv(spec);
        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);

        let child = pair.slave.spawn_command(cmd).map_err(to_io_err)?;
        // The slave end of the pty belongs to the child now; holding it
        // open here would keep the master side from ever seeing EOF.
        drop(pair.slave);

        let pid = child.process_id().map(|p| p as Pid).unwrap_or(-1);
        let writer = pair.master.take_writer().map_err(to_io_err)?;
        let reader = pair.master.try_clone_reader().map_err(to_io_err)?;

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut lines = BufReader::new(reader).lines();
            while let Some(Ok(line)) = lines.next() {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });

        Ok(SlaveHandle {
            child,
            writer,
            lines_rx: rx,
            pid,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.writer, "{}", line)
    }

    /// Drains at most one buffered line without blocking; the
    /// supervisor calls this in a loop each tick.
    pub fn try_recv_line(&self) -> Option<String> {
        self.lines_rx.try_recv().ok()
    }

    /// Non-blocking reap check for the slave process itself.
    pub fn try_wait(&mut self) -> io::Result<bool> {
        Ok(self.child.try_wait()?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn spec(host: Option<&str>) -> CommandSpec {
        let mut spec = CommandSpec::new("e", "true", PathBuf::from("/tmp"));
        spec.host = host.map(str::to_string);
        spec
    }

    #[test]
    fn local_argv_has_no_ssh() {
        let (program, args) = build_argv(&spec(None));
        assert_eq!(program, "lunch-slave");
        assert_eq!(args, vec!["--id".to_string(), "e".to_string()]);
    }

    #[test]
    fn remote_argv_includes_host_and_options() {
        let mut s = spec(Some("example.com"));
        s.ssh_port = Some(2222);
        s.user = Some("deploy".to_string());
        let (program, args) = build_argv(&s);
        assert_eq!(program, "ssh");
        assert_eq!(
            args,
            vec![
                "-p".to_string(),
                "2222".to_string(),
                "-l".to_string(),
                "deploy".to_string(),
                "example.com".to_string(),
                "lunch-slave".to_string(),
                "--id".to_string(),
                "e".to_string(),
            ]
        );
    }
}
