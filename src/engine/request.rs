//! Execution request types

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info_span, Span};

/// Identity of one round of one test case, fixed at dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseRoundIdentity {
    pub task_id: String,
    pub test_case_id: i64,
    pub round: u32,
    pub executor_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_set_id: Option<i64>,
}

impl CaseRoundIdentity {
    pub fn new(
        task_id: impl Into<String>,
        test_case_id: i64,
        round: u32,
        executor_ip: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            test_case_id,
            round,
            executor_ip: executor_ip.into(),
            test_case_set_id: None,
        }
    }

    pub fn with_test_case_set(mut self, test_case_set_id: i64) -> Self {
        self.test_case_set_id = Some(test_case_set_id);
        self
    }

    /// Name of the log artifact: `{testCaseId}_{round}.log`.
    /// Unique per (test case, round); a retry must bump the round.
    pub fn log_file_name(&self) -> String {
        format!("{}_{}.log", self.test_case_id, self.round)
    }
}

/// Everything needed to run one test case program
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub identity: CaseRoundIdentity,
    /// Program path or name (looked up in PATH)
    pub command: String,
    pub args: Vec<String>,
    /// Variables added to the inherited environment
    pub env: Vec<(String, String)>,
    pub work_dir: Option<PathBuf>,
    pub deadline: Duration,
}

impl ExecutionRequest {
    pub fn new(identity: CaseRoundIdentity, command: impl Into<String>, deadline: Duration) -> Self {
        Self {
            identity,
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
            deadline,
        }
    }

    /// Run `script` through `/bin/sh -c`
    pub fn shell(identity: CaseRoundIdentity, script: impl Into<String>, deadline: Duration) -> Self {
        Self::new(identity, "/bin/sh", deadline).with_args(["-c".to_string(), script.into()])
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(|a| a.into()).collect();
        self
    }

    pub fn with_env(
        mut self,
        env: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Self {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(identity: CaseRoundIdentity, cmd: &[String], deadline: Duration) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self::new(identity, program, deadline).with_args(iter.cloned())
    }

    /// Log sink for this execution; every component working on it logs inside this span
    pub fn span(&self) -> Span {
        info_span!(
            "case",
            task_id = %self.identity.task_id,
            test_case_id = self.identity.test_case_id,
            round = self.identity.round,
        )
    }

    /// Command line for diagnostics
    pub fn display_command(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.command.clone());
        for arg in &self.args {
            if arg.contains(' ') {
                parts.push(format!("\"{}\"", arg));
            } else {
                parts.push(arg.clone());
            }
        }
        parts.join(" ")
    }
}
