//! Process group tracking and tree termination

pub mod group;
pub mod terminator;

pub use group::{ProcessEntry, ProcessGroup};
pub use terminator::{ProcessTreeTerminator, TerminationReport};
