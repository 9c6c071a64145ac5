use chrono::NaiveDateTime;
use serde::Serialize;

use crate::core::time::serde_canonical;
use crate::core::ExecutionStatus;
use crate::output::LogArtifact;
use crate::process::TerminationReport;
use crate::report::parse::CaseLogReport;

/// Outcome of one supervised execution, produced exactly once per request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    #[serde(with = "serde_canonical")]
    pub start_time: NaiveDateTime,
    #[serde(with = "serde_canonical")]
    pub end_time: NaiveDateTime,
    pub execution_time_millis: u64,
    /// Exit code of the root; `None` after termination, launch failure or a fatal signal
    pub exit_code: Option<i32>,
    /// Signal that killed the root on a natural (unsupervised) death
    pub signal: Option<i32>,
    pub failure_reason: Option<String>,
    /// Present when the process tree was terminated or swept
    #[serde(skip)]
    pub termination: Option<TerminationReport>,
    /// Statistics and details the case printed about itself
    #[serde(skip)]
    pub log_report: Option<CaseLogReport>,
}

/// Everything `ProcessSupervisor::execute` hands back
#[derive(Debug)]
pub struct Supervised {
    pub outcome: ExecutionOutcome,
    pub artifact: LogArtifact,
    /// Non-fatal problems (collector, cleanup) that did not change the outcome
    pub warnings: Vec<String>,
}
