//! Jobs received from the Redis queue

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::config::{deadline_from_secs, MAX_DEADLINE};
use crate::engine::{CaseRoundIdentity, ExecutionRequest};

/// One round of one test case to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseJob {
    pub task_id: String,
    pub test_case_id: i64,
    pub round: u32,
    pub executor_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_case_set_id: Option<i64>,
    /// Program and arguments, run directly
    #[serde(default)]
    pub command: Vec<String>,
    /// Shell script, run through `/bin/sh -c` when `command` is empty
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Deadline in seconds; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl CaseJob {
    pub fn identity(&self) -> CaseRoundIdentity {
        let identity = CaseRoundIdentity::new(
            self.task_id.clone(),
            self.test_case_id,
            self.round,
            self.executor_ip.clone(),
        );
        match self.test_case_set_id {
            Some(id) => identity.with_test_case_set(id),
            None => identity,
        }
    }

    /// Build the execution request for this job
    pub fn to_request(&self, default_timeout: Duration) -> Result<ExecutionRequest> {
        let deadline = match self.timeout_secs {
            Some(secs) => match deadline_from_secs(secs) {
                Some(deadline) => deadline,
                None => bail!(
                    "timeoutSecs = {} must be between 1 and {}",
                    secs,
                    MAX_DEADLINE.as_secs()
                ),
            },
            None => default_timeout,
        };

        let request = match (self.command.is_empty(), &self.script) {
            (false, _) => ExecutionRequest::from_vec(self.identity(), &self.command, deadline),
            (true, Some(script)) => ExecutionRequest::shell(self.identity(), script.clone(), deadline),
            (true, None) => bail!("job has neither command nor script"),
        };

        let request = request.with_env(self.env.clone());
        Ok(match &self.work_dir {
            Some(dir) => request.with_work_dir(dir),
            None => request,
        })
    }
}
