use clap::Parser;

/// `lunch-slave` — spawned by a supervisor, locally or over SSH, to own
/// one child command (spec.md §4.3).
#[derive(Parser, Debug)]
#[command(name = "lunch-slave")]
pub struct Args {
    /// The identifier of the command this slave supervises, used only
    /// for the child log file name and log lines.
    #[arg(long)]
    pub id: String,

    /// How long a child must run before `state RUNNING` is printed.
    #[arg(long, default_value_t = 200)]
    pub warmup_ms: u64,

    /// How long to wait after SIGTERM before escalating to SIGKILL on a
    /// `stop` request.
    #[arg(long, default_value_t = 2000)]
    pub kill_delay_ms: u64,
}
