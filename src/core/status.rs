use serde::{Deserialize, Serialize};
use std::fmt;

/// Final status of one supervised execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Exited with code 0 and no failure marker in its output
    Success,
    /// Non-zero exit, fatal signal, or a failure marker in the output
    Failure,
    /// Deadline expired; the process tree was terminated
    Timeout,
    /// Execution was cancelled from outside; the process tree was terminated
    Cancelled,
    /// Launch failure or unrecoverable cleanup failure
    Error,
}

impl ExecutionStatus {
    /// Status as it appears on the wire.
    ///
    /// The result record only knows SUCCESS|FAILURE|ERROR|TIMEOUT, so a
    /// cancelled run is reported as ERROR.
    pub fn wire_name(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failure => "FAILURE",
            ExecutionStatus::Timeout => "TIMEOUT",
            ExecutionStatus::Cancelled | ExecutionStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Failure => "failure",
            ExecutionStatus::Timeout => "timeout",
            ExecutionStatus::Cancelled => "cancelled",
            ExecutionStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}
