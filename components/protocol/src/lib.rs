//! Wire protocol shared between `lunch-supervisor` and `lunch-slave`.

pub mod ssh;
pub mod wire;

pub use wire::{parse_inbound, parse_slave_input, Inbound, Outbound, SlaveInput};
