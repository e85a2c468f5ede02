//! The master's PID file (spec.md §6): `lunch-pid-master-<id>.pid`, mode
//! 0600, `O_EXCL`-created so two masters for the same id can't both
//! start, with stale-lock detection so a crashed master's leftover file
//! doesn't block a restart forever. Grounded on the obtain/read/write/
//! release-process-lock cycle `habitat_sup::manager` uses for its own
//! supervisor lock file.

use lunch_core::Pid;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum PidFileError {
    AlreadyRunning(Pid),
    Io(io::Error),
}

impl From<io::Error> for PidFileError {
    fn from(err: io::Error) -> Self {
        PidFileError::Io(err)
    }
}

impl fmt::Display for PidFileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PidFileError::AlreadyRunning(pid) => {
                write!(f, "a master is already running with pid {}", pid)
            }
            PidFileError::Io(err) => write!(f, "pid file error: {}", err),
        }
    }
}

impl std::error::Error for PidFileError {}

pub fn pidfile_path(pid_dir: &Path, id: &str) -> PathBuf {
    pid_dir.join(format!("lunch-pid-master-{}.pid", id))
}

/// A held PID file; removed when dropped.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Acquire the lock for `id` in `pid_dir`, refusing to start if a
    /// live master already holds it and cleaning up a stale leftover
    /// file otherwise.
    pub fn acquire(pid_dir: &Path, id: &str) -> Result<PidFile, PidFileError> {
        let path = pidfile_path(pid_dir, id);
        match write_new(&path) {
            Ok(()) => Ok(PidFile { path }),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                if is_stale(&path) {
                    fs::remove_file(&path)?;
                    write_new(&path)?;
                    Ok(PidFile { path })
                } else {
                    Err(PidFileError::AlreadyRunning(read_pid(&path).unwrap_or(-1)))
                }
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn write_new(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?;
    write!(file, "{}", std::process::id())
}

fn read_pid(path: &Path) -> Option<Pid> {
    let mut content = String::new();
    File::open(path).ok()?.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

fn is_stale(path: &Path) -> bool {
    let Some(pid) = read_pid(path) else {
        return true;
    };
    !lunch_core::process::is_alive(pid) || !looks_like_master(pid)
}

/// Guards against a recycled PID belonging to an unrelated process.
fn looks_like_master(pid: Pid) -> bool {
    let Ok(cmdline) = fs::read_to_string(format!("/proc/{}/cmdline", pid)) else {
        return true;
    };
    cmdline
        .split('\0')
        .next()
        .map_or(true, |arg0| arg0.contains("lunch"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_is_named_by_identifier() {
        assert_eq!(
            pidfile_path(Path::new("/var/run"), "main"),
            PathBuf::from("/var/run/lunch-pid-master-main.pid")
        );
    }

    #[test]
    fn acquire_then_drop_removes_the_file() {
        let dir = std::env::temp_dir().join(format!("lunch-pidfile-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        {
            let _pidfile = PidFile::acquire(&dir, "t1").unwrap();
            assert!(pidfile_path(&dir, "t1").exists());
        }
        assert!(!pidfile_path(&dir, "t1").exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn acquire_twice_without_dropping_fails() {
        let dir = std::env::temp_dir().join(format!("lunch-pidfile-test2-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let _first = PidFile::acquire(&dir, "t2").unwrap();
        let second = PidFile::acquire(&dir, "t2");
        assert!(matches!(second, Err(PidFileError::AlreadyRunning(_))));
        fs::remove_dir_all(&dir).ok();
    }
}
