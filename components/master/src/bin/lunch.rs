//! `lunch` — the CLI front-end that wires a [`Master`] to process
//! arguments, logging, a PID file, and SIGINT-driven shutdown (spec.md
//! §6). The scripted configuration loader itself is an external
//! collaborator (spec.md §1): this binary does not parse or execute a
//! config file, it only accepts the flag so the loader can be layered on
//! top later. Embedders call `Master::add_command` directly instead (see
//! `lunch-master`'s own tests for that usage pattern).

use clap::Parser;
use lunch_core::process;
use lunch_core::Signal;
use lunch_master::{Master, PidFile};
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A distributed process supervisor: launches and supervises a
/// dependency-ordered set of shell commands, locally or over SSH.
#[derive(Parser, Debug)]
#[command(name = "lunch", version)]
struct Args {
    /// Path to the configuration file registering commands. Parsing and
    /// executing this file is outside the core's scope; passing one only
    /// selects the master's identifier (its file stem) for the PID file
    /// and log file names.
    config_file: Option<PathBuf>,

    #[arg(long = "config-file")]
    config_file_flag: Option<PathBuf>,

    /// Where slave and child logs are written. Defaults to the system
    /// temp directory.
    #[arg(long = "logging-directory")]
    logging_directory: Option<PathBuf>,

    /// Where the master's PID file is written. Defaults to the logging
    /// directory.
    #[arg(long = "pid-directory")]
    pid_directory: Option<PathBuf>,

    /// Send log output to a file in the logging directory instead of
    /// stderr.
    #[arg(long = "log-to-file")]
    log_to_file: bool,

    /// Start the graphical status/control surface. Not implemented by
    /// the core; accepted so scripts written against the original CLI
    /// don't fail to parse.
    #[arg(long)]
    graphical: bool,

    #[arg(short, long)]
    verbose: bool,

    #[arg(long)]
    debug: bool,

    /// Send SIGINT to a running master matching this identifier, then
    /// exit, instead of starting a new one.
    #[arg(long)]
    kill: bool,
}

fn main() {
    let args = Args::parse();
    init_logging(&args);

    if args.graphical {
        log::warn!("--graphical was requested but the graphical status surface is not part of this core");
    }

    let identifier = args
        .config_file
        .as_ref()
        .or(args.config_file_flag.as_ref())
        .and_then(|p| p.file_stem())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string());

    let logging_directory = args
        .logging_directory
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let pid_directory = args
        .pid_directory
        .clone()
        .unwrap_or_else(|| logging_directory.clone());

    if args.kill {
        exit(kill_running_master(&pid_directory, &identifier));
    }

    if let Err(err) = std::fs::create_dir_all(&logging_directory) {
        eprintln!("failed to create logging directory: {}", err);
        exit(1);
    }

    let pid_file = match PidFile::acquire(&pid_directory, &identifier) {
        Ok(pid_file) => pid_file,
        Err(err) => {
            eprintln!("{}", err);
            exit(1);
        }
    };

    let now = Instant::now();
    let mut master = Master::new(logging_directory, now);

    let shutdown_requested = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown_requested.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        log::warn!("failed to install SIGINT handler: {}", err);
    }

    log::info!("{}: starting (pid {})", identifier, std::process::id());
    run_until_shutdown(&mut master, &shutdown_requested);
    log::info!("{}: shutting down", identifier);
    master.shutdown(Duration::from_secs(20), Instant::now());
    drop(pid_file);
}

/// The reconciler's tick loop (spec.md §4.5, §5): fixed ~50ms cadence
/// until a SIGINT requests shutdown.
fn run_until_shutdown(master: &mut Master, shutdown_requested: &AtomicBool) {
    let tick_interval = Duration::from_millis(50);
    while !shutdown_requested.load(Ordering::SeqCst) {
        master.tick(Instant::now());
        for (identifier, event) in master.take_events() {
            log::debug!("{}: {:?}", identifier, event);
        }
        std::thread::sleep(tick_interval);
    }
}

fn kill_running_master(pid_directory: &std::path::Path, identifier: &str) -> i32 {
    let path = lunch_master::pidfile_path(pid_directory, identifier);
    let Ok(contents) = std::fs::read_to_string(&path) else {
        eprintln!("no running master found for {:?}", identifier);
        return 1;
    };
    let Ok(pid) = contents.trim().parse() else {
        eprintln!("malformed pid file {:?}", path);
        return 1;
    };
    match process::signal(pid, Signal::INT) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("failed to signal master pid {}: {}", pid, err);
            1
        }
    }
}

fn init_logging(args: &Args) {
    let level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else {
        "warn"
    };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level));
    if args.log_to_file {
        if let Some(dir) = &args.logging_directory {
            let _ = std::fs::create_dir_all(dir);
            if let Ok(file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(dir.join("lunch.log"))
            {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }
    }
    builder.init();
}
