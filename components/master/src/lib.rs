//! Owns the dependency graph and every command's supervisor, and
//! reconciles desired vs actual state on a fixed cadence (spec.md §4.5).

mod events;
mod master;
mod pidfile;
mod registration;

pub use lunch_supervisor::Event;
pub use master::Master;
pub use pidfile::{pidfile_path, PidFile, PidFileError};
pub use registration::{CommandOptions, MasterError};
