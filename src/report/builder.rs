//! Result records
//!
//! The record is what crosses the service boundary. Its time fields always
//! use the canonical `YYYY-MM-DD HH:MM:SS` form; consumers parse them
//! verbatim, so no offset or fraction may ever leak in.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::diagnose::bound_reason;
use super::parse::CaseLogReport;
use crate::core::time::{self, serde_canonical};
use crate::core::ExecutionStatus;
use crate::engine::{CaseRoundIdentity, ExecutionOutcome, ExecutionRequest};
use crate::output::ArtifactRef;

/// Default maximum length of `failureReason`
pub const DEFAULT_REASON_LIMIT: usize = 1024;

/// Serializable result of one execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    task_id: String,
    test_case_id: i64,
    round: u32,
    status: String,
    result: String,
    execution_time: u64,
    #[serde(with = "serde_canonical")]
    start_time: NaiveDateTime,
    #[serde(with = "serde_canonical")]
    end_time: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    executor_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    test_case_set_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_file_path: Option<String>,
}

impl ResultRecord {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn test_case_id(&self) -> i64 {
        self.test_case_id
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// SUCCESS | FAILURE | ERROR | TIMEOUT
    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn result(&self) -> &str {
        &self.result
    }

    pub fn execution_time(&self) -> u64 {
        self.execution_time
    }

    pub fn start_time(&self) -> NaiveDateTime {
        self.start_time
    }

    pub fn end_time(&self) -> NaiveDateTime {
        self.end_time
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn log_file_path(&self) -> Option<&str> {
        self.log_file_path.as_deref()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Turns supervisor outcomes into result records
#[derive(Debug, Clone)]
pub struct ExecutionResultBuilder {
    reason_limit: usize,
}

impl Default for ExecutionResultBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_REASON_LIMIT)
    }
}

impl ExecutionResultBuilder {
    pub fn new(reason_limit: usize) -> Self {
        Self { reason_limit }
    }

    pub fn build(
        &self,
        request: &ExecutionRequest,
        outcome: &ExecutionOutcome,
        artifact: Option<&ArtifactRef>,
    ) -> ResultRecord {
        let identity = &request.identity;

        let failure_reason = match outcome.status {
            ExecutionStatus::Success => None,
            _ => {
                let mut reason = outcome
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| summary(outcome));
                if let Some(report) = &outcome.log_report {
                    reason.push_str(&failure_details(report));
                }
                Some(bound_reason(&reason, self.reason_limit))
            }
        };

        let mut result = summary(outcome);
        if let Some(report) = &outcome.log_report {
            if let Some(stats) = &report.statistics {
                result.push_str(&format!(" ({})", stats));
            }
            result.push_str(&report.metrics.summary_suffix());
        }

        ResultRecord {
            task_id: identity.task_id.clone(),
            test_case_id: identity.test_case_id,
            round: identity.round,
            status: outcome.status.wire_name().to_string(),
            result,
            execution_time: outcome.execution_time_millis,
            start_time: outcome.start_time,
            end_time: outcome.end_time.max(outcome.start_time),
            failure_reason,
            executor_ip: identity.executor_ip.clone(),
            test_case_set_id: identity.test_case_set_id,
            log_file_path: artifact.map(|a| a.location.clone()),
        }
    }

    /// ERROR record for a job that could not be turned into a request
    pub fn rejected(&self, identity: &CaseRoundIdentity, reason: &str) -> ResultRecord {
        let now = time::now();
        ResultRecord {
            task_id: identity.task_id.clone(),
            test_case_id: identity.test_case_id,
            round: identity.round,
            status: ExecutionStatus::Error.wire_name().to_string(),
            result: "case execution error".to_string(),
            execution_time: 0,
            start_time: now,
            end_time: now,
            failure_reason: Some(bound_reason(reason, self.reason_limit)),
            executor_ip: identity.executor_ip.clone(),
            test_case_set_id: identity.test_case_set_id,
            log_file_path: None,
        }
    }
}

/// Suffix naming the tests a failed case reported, or its statistics
fn failure_details(report: &CaseLogReport) -> String {
    if !report.failure_details.is_empty() {
        return format!("; failed tests: {}", report.failure_details.join("; "));
    }
    match &report.statistics {
        Some(stats) if stats.has_failures() => format!("; {}", stats),
        _ => String::new(),
    }
}

/// Human readable one-line summary for the `result` field
fn summary(outcome: &ExecutionOutcome) -> String {
    match outcome.status {
        ExecutionStatus::Success => "case execution succeeded".to_string(),
        ExecutionStatus::Failure => match (outcome.exit_code, outcome.signal) {
            (Some(code), _) => format!("case execution failed, exit code {}", code),
            (None, Some(sig)) => format!("case execution failed, killed by signal {}", sig),
            (None, None) => "case execution failed".to_string(),
        },
        ExecutionStatus::Timeout => format!(
            "case execution timed out after {} ms",
            outcome.execution_time_millis
        ),
        ExecutionStatus::Cancelled => "case execution cancelled".to_string(),
        ExecutionStatus::Error => "case execution error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::parse_canonical;
    use crate::report::parse;
    use std::time::Duration;

    fn request() -> ExecutionRequest {
        let id = CaseRoundIdentity::new("task-9", 123, 1, "10.1.2.3").with_test_case_set(77);
        ExecutionRequest::shell(id, "true", Duration::from_secs(5))
    }

    fn outcome(status: ExecutionStatus, reason: Option<&str>) -> ExecutionOutcome {
        ExecutionOutcome {
            status,
            start_time: parse_canonical("2024-05-01 10:00:00").unwrap(),
            end_time: parse_canonical("2024-05-01 10:00:02").unwrap(),
            execution_time_millis: 2000,
            exit_code: if status == ExecutionStatus::Success { Some(0) } else { None },
            signal: None,
            failure_reason: reason.map(|r| r.to_string()),
            termination: None,
            log_report: None,
        }
    }

    #[test]
    fn test_success_record_json() {
        let record = ExecutionResultBuilder::default().build(
            &request(),
            &outcome(ExecutionStatus::Success, Some("ignored")),
            None,
        );
        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

        assert_eq!(json["taskId"], "task-9");
        assert_eq!(json["testCaseId"], 123);
        assert_eq!(json["round"], 1);
        assert_eq!(json["status"], "SUCCESS");
        assert_eq!(json["executionTime"], 2000);
        assert_eq!(json["startTime"], "2024-05-01 10:00:00");
        assert_eq!(json["endTime"], "2024-05-01 10:00:02");
        assert_eq!(json["executorIp"], "10.1.2.3");
        assert_eq!(json["testCaseSetId"], 77);
        assert!(json.get("failureReason").is_none());
    }

    #[test]
    fn test_absent_test_case_set_is_omitted() {
        let id = CaseRoundIdentity::new("task-9", 123, 1, "10.1.2.3");
        let request = ExecutionRequest::shell(id, "true", Duration::from_secs(5));
        let record = ExecutionResultBuilder::default().build(
            &request,
            &outcome(ExecutionStatus::Success, None),
            None,
        );
        let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert!(json.get("testCaseSetId").is_none());
    }

    #[test]
    fn test_log_report_enriches_result_and_reason() {
        let mut failed = outcome(ExecutionStatus::Failure, Some("1 of 3 tests did not pass"));
        failed.log_report = Some(parse::parse(
            "运行测试数: 3 失败数: 1 错误数: 0\n失败的测试:\n- test_ping: packet loss 40%\n网络延迟: 20ms\n",
        ));

        let record = ExecutionResultBuilder::default().build(&request(), &failed, None);
        assert_eq!(
            record.result(),
            "case execution failed \
             (tests: total=3, passed=2, failed=1, errors=0, success rate=66.7%) \
             (network latency: 20.00ms)"
        );
        assert_eq!(
            record.failure_reason(),
            Some("1 of 3 tests did not pass; failed tests: test_ping: packet loss 40%")
        );
    }

    #[test]
    fn test_statistics_alone_explain_failure() {
        let mut failed = outcome(ExecutionStatus::Failure, Some("exit code 1"));
        failed.log_report = Some(parse::parse("运行测试数: 2, 失败数: 0, 错误数: 2"));

        let record = ExecutionResultBuilder::default().build(&request(), &failed, None);
        assert_eq!(
            record.failure_reason(),
            Some("exit code 1; tests: total=2, passed=0, failed=0, errors=2, success rate=0.0%")
        );
    }

    #[test]
    fn test_failure_reason_is_bounded() {
        let long = "x".repeat(5000);
        let record = ExecutionResultBuilder::new(100).build(
            &request(),
            &outcome(ExecutionStatus::Timeout, Some(&long)),
            None,
        );
        assert_eq!(record.status(), "TIMEOUT");
        assert_eq!(record.failure_reason().unwrap().chars().count(), 100);
    }

    #[test]
    fn test_cancelled_maps_to_error_with_reason() {
        let record = ExecutionResultBuilder::default().build(
            &request(),
            &outcome(ExecutionStatus::Cancelled, None),
            None,
        );
        assert_eq!(record.status(), "ERROR");
        assert_eq!(record.failure_reason(), Some("case execution cancelled"));
    }

    #[test]
    fn test_rejected_job_record() {
        let id = CaseRoundIdentity::new("task-9", 5, 2, "10.1.2.3");
        let record = ExecutionResultBuilder::default().rejected(&id, "job has neither command nor script");
        assert_eq!(record.status(), "ERROR");
        assert_eq!(record.execution_time(), 0);
        assert_eq!(record.start_time(), record.end_time());
        assert_eq!(record.failure_reason(), Some("job has neither command nor script"));
    }

    #[test]
    fn test_record_roundtrips_and_keeps_artifact_location() {
        let artifact = ArtifactRef {
            name: "123_1.log".into(),
            location: "task-9/logs/123_1.log".into(),
            truncated: false,
        };
        let record = ExecutionResultBuilder::default().build(
            &request(),
            &outcome(ExecutionStatus::Failure, Some("exit code 1")),
            Some(&artifact),
        );
        let back: ResultRecord = serde_json::from_str(&record.to_json().unwrap()).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.log_file_path(), Some("task-9/logs/123_1.log"));
    }
}
