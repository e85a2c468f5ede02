//! OS process and signal primitives shared by the slave and the master.
//!
//! Ported from the teacher's `habitat_core::os::process` (the `Signal` enum
//! and its wire-code mapping) and `habitat-launcher::sys::unix::service`
//! (process-group signalling, non-blocking `waitpid`).

use std::fmt;
use std::io;
use std::ops::Neg;
use std::str::FromStr;

use libc::{self, c_int, pid_t};

pub type Pid = pid_t;

#[allow(non_snake_case)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    HUP,
    INT,
    QUIT,
    ILL,
    ABRT,
    FPE,
    KILL,
    USR1,
    SEGV,
    USR2,
    ALRM,
    TERM,
}

impl From<Signal> for c_int {
    fn from(value: Signal) -> c_int {
        match value {
            Signal::HUP => libc::SIGHUP,
            Signal::INT => libc::SIGINT,
            Signal::QUIT => libc::SIGQUIT,
            Signal::ILL => libc::SIGILL,
            Signal::ABRT => libc::SIGABRT,
            Signal::FPE => libc::SIGFPE,
            Signal::KILL => libc::SIGKILL,
            Signal::USR1 => libc::SIGUSR1,
            Signal::SEGV => libc::SIGSEGV,
            Signal::USR2 => libc::SIGUSR2,
            Signal::ALRM => libc::SIGALRM,
            Signal::TERM => libc::SIGTERM,
        }
    }
}

impl FromStr for Signal {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HUP" => Ok(Signal::HUP),
            "INT" => Ok(Signal::INT),
            "QUIT" => Ok(Signal::QUIT),
            "ILL" => Ok(Signal::ILL),
            "ABRT" => Ok(Signal::ABRT),
            "FPE" => Ok(Signal::FPE),
            "KILL" => Ok(Signal::KILL),
            "USR1" => Ok(Signal::USR1),
            "SEGV" => Ok(Signal::SEGV),
            "USR2" => Ok(Signal::USR2),
            "ALRM" => Ok(Signal::ALRM),
            "TERM" => Ok(Signal::TERM),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Signal::HUP => "HUP",
            Signal::INT => "INT",
            Signal::QUIT => "QUIT",
            Signal::ILL => "ILL",
            Signal::ABRT => "ABRT",
            Signal::FPE => "FPE",
            Signal::KILL => "KILL",
            Signal::USR1 => "USR1",
            Signal::SEGV => "SEGV",
            Signal::USR2 => "USR2",
            Signal::ALRM => "ALRM",
            Signal::TERM => "TERM",
        };
        write!(f, "{}", s)
    }
}

/// Send a signal to a process.
pub fn signal(pid: Pid, sig: Signal) -> io::Result<()> {
    let ret = unsafe { libc::kill(pid, c_int::from(sig)) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// True if `pid` names a live process (or zombie awaiting reap).
pub fn is_alive(pid: Pid) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

pub fn current_pid() -> Pid {
    unsafe { libc::getpid() }
}

/// When signalling a child we spawned in its own process group (see the
/// slave's `own_process_group`), determine whether we should target just
/// the PID or the whole group.
///
/// If `pid` is itself the process group leader, signal the negative of the
/// PID to reach every process in the group; otherwise target it directly.
/// This prevents descendants the child forked from surviving its own
/// termination.
pub fn pid_to_signal_target(pid: Pid) -> Pid {
    let pgid = unsafe { libc::getpgid(pid) };
    if pgid == pid {
        pid.neg()
    } else {
        pid
    }
}

/// Put the calling process into its own process group. Call this from a
/// `before_exec`/`pre_exec` hook right before `exec`.
pub fn own_process_group() -> io::Result<()> {
    let ret = unsafe { libc::setpgid(0, 0) };
    if ret == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// Non-blocking wait for a child PID. Returns `Ok(None)` if still running.
pub fn try_wait(pid: Pid) -> io::Result<Option<i32>> {
    let mut status: c_int = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
    match ret {
        0 => Ok(None),
        n if n == pid => Ok(Some(exit_code(status))),
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(None),
    }
}

/// Blocking wait for a child PID.
pub fn wait(pid: Pid) -> io::Result<i32> {
    let mut status: c_int = 0;
    let ret = unsafe { libc::waitpid(pid, &mut status, 0) };
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(exit_code(status))
    }
}

fn exit_code(status: c_int) -> i32 {
    unsafe {
        if libc::WIFEXITED(status) {
            libc::WEXITSTATUS(status)
        } else if libc::WIFSIGNALED(status) {
            -libc::WTERMSIG(status)
        } else {
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_pid_is_positive() {
        assert!(current_pid() > 0);
    }

    #[test]
    fn signal_display_round_trips_through_from_str() {
        for s in &[
            Signal::HUP,
            Signal::INT,
            Signal::QUIT,
            Signal::KILL,
            Signal::TERM,
            Signal::USR1,
            Signal::USR2,
        ] {
            let parsed: Signal = s.to_string().parse().unwrap();
            assert_eq!(parsed, *s);
        }
    }

    #[test]
    fn is_alive_is_true_for_self() {
        assert!(is_alive(current_pid()));
    }
}
