//! Core types shared by the supervisor and the result builder

pub mod status;
pub mod time;

pub use status::ExecutionStatus;
