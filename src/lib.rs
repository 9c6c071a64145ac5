//! Case executor
//!
//! Runs test case programs as supervised child processes: every run gets a
//! deadline, its whole process tree is terminated when it overruns or is
//! cancelled, its output is drained into a per-round log artifact, and its
//! outcome is turned into a result record for the scheduling system.

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod jobs;
pub mod output;
pub mod process;
pub mod redis_manager;
pub mod report;
pub mod storage;

pub use crate::config::SupervisorConfig;
pub use crate::core::ExecutionStatus;
pub use engine::{CaseRoundIdentity, ExecutionOutcome, ExecutionRequest, ProcessSupervisor, Supervised};
pub use report::{ExecutionResultBuilder, ResultRecord};
