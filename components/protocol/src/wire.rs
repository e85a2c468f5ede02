//! Line framing and the outbound/inbound verb sets (spec.md §4.2).
//!
//! A line is UTF-8 terminated by `\n`; on receipt it splits into a `key`
//! (leading token) and `payload` (the rest, after one space). The
//! dynamic-dispatch-by-key-name style of the original is replaced here
//! with exhaustive tagged enums, matched once at parse time rather than
//! dispatched by string lookup at every call site.

use lunch_core::Pid;
use std::fmt;

/// A message the master writes to a slave's stdin.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Do(String),
    Env(Vec<(String, String)>),
    Logdir(String),
    Run,
    Stop,
    Ping,
    Quit,
}

impl Outbound {
    /// The verb this message is framed with, used to recognize a PTY
    /// echoing the master's own writes back to it.
    pub fn key(&self) -> &'static str {
        match self {
            Outbound::Do(_) => "do",
            Outbound::Env(_) => "env",
            Outbound::Logdir(_) => "logdir",
            Outbound::Run => "run",
            Outbound::Stop => "stop",
            Outbound::Ping => "ping",
            Outbound::Quit => "quit",
        }
    }
}

impl fmt::Display for Outbound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outbound::Do(cmd) => write!(f, "do {}", cmd),
            Outbound::Env(pairs) => {
                write!(f, "env")?;
                for (k, v) in pairs {
                    write!(f, " {}={}", k, v)?;
                }
                Ok(())
            }
            Outbound::Logdir(path) => write!(f, "logdir {}", path),
            Outbound::Run => write!(f, "run"),
            Outbound::Stop => write!(f, "stop"),
            Outbound::Ping => write!(f, "ping"),
            Outbound::Quit => write!(f, "quit"),
        }
    }
}

/// A message parsed on the slave's side of the wire: what the master
/// wrote to its stdin. Distinct from [`Outbound`] (which the master
/// builds to serialize) so each side owns an exhaustive match over the
/// verbs it actually has to react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveInput {
    Do(String),
    Env(Vec<(String, String)>),
    Logdir(String),
    Run,
    Stop,
    Ping,
    Quit,
    Unknown { key: String, payload: String },
}

/// Parse one already-trimmed line of master input, as read by a slave.
pub fn parse_slave_input(line: &str) -> Option<SlaveInput> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }
    let (key, payload) = split_key_payload(line);
    Some(match key {
        "do" => SlaveInput::Do(payload.to_string()),
        "env" => SlaveInput::Env(
            payload
                .split_whitespace()
                .filter_map(|pair| pair.split_once('='))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        "logdir" => SlaveInput::Logdir(payload.to_string()),
        "run" => SlaveInput::Run,
        "stop" => SlaveInput::Stop,
        "ping" => SlaveInput::Ping,
        "quit" => SlaveInput::Quit,
        other => SlaveInput::Unknown {
            key: other.to_string(),
            payload: payload.to_string(),
        },
    })
}

/// A message a slave writes to its stdout, read by the master.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ready,
    ChildPid(Pid),
    /// `state <name> [runtime]`; `runtime` is only ever present on `STOPPED`.
    State { name: String, runtime: Option<f64> },
    Retval(i32),
    Msg(String),
    Log(String),
    Error(String),
    Pong,
    NotFound,
    Bye,
    /// A line with a key the current protocol doesn't define. Logged and
    /// ignored by callers rather than rejected, so the wire format can
    /// grow without breaking older masters.
    Unknown { key: String, payload: String },
}

/// The outbound verbs that can legitimately echo back on a PTY and must
/// be dropped rather than mistaken for slave output. `ping` and `quit`
/// are deliberately excluded: `ping` expects a genuine `pong` reply and
/// an echoed `ping` would be indistinguishable from one the slave never
/// read, and `quit` is never sent by the master in the first place
/// (only `stop`, to end just the child).
const ECHOABLE_OUTBOUND_KEYS: &[&str] = &["do", "env", "run", "logdir", "stop"];

fn split_key_payload(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((key, rest)) => (key, rest),
        None => (line, ""),
    }
}

/// Parse one already-trimmed line of slave output. Returns `None` for
/// blank lines and for echoes of the master's own outbound verbs.
pub fn parse_inbound(line: &str) -> Option<Inbound> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.is_empty() {
        return None;
    }
    let (key, payload) = split_key_payload(line);
    if ECHOABLE_OUTBOUND_KEYS.contains(&key) {
        return None;
    }
    Some(match key {
        "ready" => Inbound::Ready,
        "child_pid" => Inbound::ChildPid(payload.trim().parse().ok()?),
        "state" => {
            let mut parts = payload.split_whitespace();
            let name = parts.next()?.to_string();
            let runtime = parts.next().and_then(|s| s.parse().ok());
            Inbound::State { name, runtime }
        }
        "retval" => Inbound::Retval(payload.trim().parse().ok()?),
        "msg" => Inbound::Msg(payload.to_string()),
        "log" => Inbound::Log(payload.to_string()),
        "error" => Inbound::Error(payload.to_string()),
        "pong" => Inbound::Pong,
        "not_found" => Inbound::NotFound,
        "bye" => Inbound::Bye,
        other => Inbound::Unknown {
            key: other.to_string(),
            payload: payload.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_lines_are_ignored() {
        assert_eq!(parse_inbound(""), None);
        assert_eq!(parse_inbound("\n"), None);
    }

    #[test]
    fn outbound_echoes_are_dropped() {
        assert_eq!(parse_inbound("do true"), None);
        assert_eq!(parse_inbound("env FOO=bar"), None);
        assert_eq!(parse_inbound("run"), None);
    }

    #[test]
    fn ping_is_not_treated_as_an_echo() {
        // "ping" is outbound-only in the Outbound enum, but has no
        // inbound counterpart to collide with, so it simply doesn't parse.
        assert_eq!(
            parse_inbound("ping"),
            Some(Inbound::Unknown {
                key: "ping".to_string(),
                payload: String::new(),
            })
        );
    }

    #[test]
    fn parses_ready_and_bye() {
        assert_eq!(parse_inbound("ready"), Some(Inbound::Ready));
        assert_eq!(parse_inbound("bye"), Some(Inbound::Bye));
    }

    #[test]
    fn parses_child_pid() {
        assert_eq!(parse_inbound("child_pid 4242"), Some(Inbound::ChildPid(4242)));
    }

    #[test]
    fn parses_state_with_and_without_runtime() {
        assert_eq!(
            parse_inbound("state RUNNING"),
            Some(Inbound::State {
                name: "RUNNING".to_string(),
                runtime: None,
            })
        );
        assert_eq!(
            parse_inbound("state STOPPED 1.5"),
            Some(Inbound::State {
                name: "STOPPED".to_string(),
                runtime: Some(1.5),
            })
        );
    }

    #[test]
    fn parses_retval_and_error_text() {
        assert_eq!(parse_inbound("retval 0"), Some(Inbound::Retval(0)));
        assert_eq!(
            parse_inbound("error disk full"),
            Some(Inbound::Error("disk full".to_string()))
        );
    }

    #[test]
    fn unknown_keys_are_preserved_rather_than_rejected() {
        assert_eq!(
            parse_inbound("frobnicate 1 2 3"),
            Some(Inbound::Unknown {
                key: "frobnicate".to_string(),
                payload: "1 2 3".to_string(),
            })
        );
    }

    #[test]
    fn parses_slave_input_env_pairs() {
        assert_eq!(
            parse_slave_input("env A=1 B=2"),
            Some(SlaveInput::Env(vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string()),
            ]))
        );
    }

    #[test]
    fn parses_slave_input_quit_and_run() {
        assert_eq!(parse_slave_input("quit"), Some(SlaveInput::Quit));
        assert_eq!(parse_slave_input("run"), Some(SlaveInput::Run));
    }

    #[test]
    fn outbound_display_matches_wire_format() {
        assert_eq!(Outbound::Do("sleep 1".to_string()).to_string(), "do sleep 1");
        assert_eq!(
            Outbound::Env(vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "2".to_string())
            ])
            .to_string(),
            "env A=1 B=2"
        );
        assert_eq!(Outbound::Run.to_string(), "run");
    }
}
