//! Per-command lifecycle: spawns and supervises one slave process,
//! driving the `slaveState`/`childState` pair described in spec.md §3–§4.4.

mod events;
mod quit;
mod spec;
mod state;
mod supervisor;
mod transport;

pub use events::{Event, EventSink, NullSink};
pub use quit::QuitPhase;
pub use spec::CommandSpec;
pub use state::{ChildState, CommandState, SlaveState, StateInfo};
pub use supervisor::Supervisor;
pub use transport::build_argv;
