//! `lunch-slave` — owns one child command and mediates it over stdio
//! (spec.md §4.3). Single-threaded cooperative loop except for the
//! stdin reader, which blocks on a dedicated thread and forwards lines
//! through a channel so the main loop never blocks waiting on input.

mod args;
mod child;

use args::Args;
use clap::Parser;
use lunch_core::process;
use lunch_core::Signal;
use lunch_protocol::{parse_slave_input, SlaveInput};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::Child;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

enum StdinEvent {
    Line(String),
    Eof,
}

#[derive(Default)]
struct Pending {
    command: Option<String>,
    env: Vec<(String, String)>,
    logdir: Option<PathBuf>,
}

struct RunningChild {
    child: Child,
    pid: lunch_core::Pid,
    started_at: Instant,
    announced_running: bool,
}

enum StopPhase {
    Idle,
    TermSent(Instant),
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    run(args);
}

fn say(line: &str) {
    println!("{}", line);
    let _ = io::stdout().flush();
}

fn run(args: Args) {
    say("ready");

    let (tx, rx) = mpsc::channel::<StdinEvent>();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(l) => {
                    if tx.send(StdinEvent::Line(l)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(StdinEvent::Eof);
    });

    let warmup = Duration::from_millis(args.warmup_ms);
    let kill_delay = Duration::from_millis(args.kill_delay_ms);
    let tick = Duration::from_millis(20);

    let mut pending = Pending::default();
    let mut running: Option<RunningChild> = None;
    let mut stop_phase = StopPhase::Idle;

    loop {
        let mut should_exit = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                StdinEvent::Eof => should_exit = true,
                StdinEvent::Line(line) => {
                    if handle_line(&line, &args, &mut pending, &mut running, &mut stop_phase) {
                        should_exit = true;
                    }
                }
            }
        }

        if let Some(rc) = running.as_mut() {
            if !rc.announced_running && rc.started_at.elapsed() >= warmup {
                say("state RUNNING");
                rc.announced_running = true;
            }
            match rc.child.try_wait() {
                Ok(Some(status)) => {
                    let lived = rc.started_at.elapsed().as_secs_f64();
                    if status.code() == Some(127) {
                        say("not_found");
                    } else {
                        say(&format!("retval {}", status.code().unwrap_or(-1)));
                    }
                    say(&format!("state STOPPED {:.3}", lived));
                    running = None;
                    stop_phase = StopPhase::Idle;
                }
                Ok(None) => {}
                Err(err) => log::error!("{}: waiting on child: {}", args.id, err),
            }
        }

        if let StopPhase::TermSent(at) = stop_phase {
            if let Some(rc) = running.as_ref() {
                if at.elapsed() >= kill_delay {
                    let target = process::pid_to_signal_target(rc.pid);
                    if let Err(err) = process::signal(target, Signal::KILL) {
                        log::warn!("{}: SIGKILL failed: {}", args.id, err);
                    }
                    stop_phase = StopPhase::Idle;
                }
            } else {
                stop_phase = StopPhase::Idle;
            }
        }

        if should_exit {
            say("bye");
            return;
        }

        thread::sleep(tick);
    }
}

/// Returns `true` if the slave should print `bye` and exit.
fn handle_line(
    line: &str,
    args: &Args,
    pending: &mut Pending,
    running: &mut Option<RunningChild>,
    stop_phase: &mut StopPhase,
) -> bool {
    let Some(input) = parse_slave_input(line) else {
        return false;
    };
    match input {
        SlaveInput::Do(cmd) => pending.command = Some(cmd),
        SlaveInput::Env(pairs) => pending.env = pairs,
        SlaveInput::Logdir(dir) => pending.logdir = Some(PathBuf::from(dir)),
        SlaveInput::Run => start_child(args, pending, running),
        SlaveInput::Stop => request_stop(args, running, stop_phase),
        SlaveInput::Ping => say("pong"),
        SlaveInput::Quit => return true,
        SlaveInput::Unknown { key, payload } => {
            log::warn!("{}: unrecognized command '{} {}'", args.id, key, payload);
        }
    }
    false
}

fn start_child(args: &Args, pending: &mut Pending, running: &mut Option<RunningChild>) {
    if running.is_some() {
        log::warn!("{}: run requested while a child is already active", args.id);
        return;
    }
    let Some(command) = pending.command.clone() else {
        say("not_found");
        return;
    };
    let logdir = pending.logdir.clone().unwrap_or_else(|| PathBuf::from("."));
    let log_path = logdir.join(format!("lunch-child-{}.log", args.id));

    match child::spawn(&command, &pending.env, &log_path) {
        Ok(child) => {
            let pid = child.id() as lunch_core::Pid;
            say(&format!("child_pid {}", pid));
            say("state STARTING");
            *running = Some(RunningChild {
                child,
                pid,
                started_at: Instant::now(),
                announced_running: false,
            });
        }
        Err(err) => {
            log::error!("{}: failed to spawn child: {}", args.id, err);
            say("not_found");
        }
    }
}

fn request_stop(args: &Args, running: &mut Option<RunningChild>, stop_phase: &mut StopPhase) {
    let Some(rc) = running.as_ref() else {
        return;
    };
    let target = process::pid_to_signal_target(rc.pid);
    if let Err(err) = process::signal(target, Signal::TERM) {
        log::warn!("{}: SIGTERM failed: {}", args.id, err);
    }
    *stop_phase = StopPhase::TermSent(Instant::now());
}
