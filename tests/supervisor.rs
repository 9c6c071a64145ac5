//! End-to-end runs of real shell processes (unix only)

use std::path::Path;
use std::time::Duration;

use case_executor::core::time::parse_canonical;
use case_executor::output::ArtifactRef;
use case_executor::process::ProcessGroup;
use case_executor::{
    CaseRoundIdentity, ExecutionRequest, ExecutionResultBuilder, ExecutionStatus, ProcessSupervisor,
    SupervisorConfig,
};
use tokio_util::sync::CancellationToken;

fn supervisor(log_dir: &Path) -> ProcessSupervisor {
    let config = SupervisorConfig::default()
        .with_log_dir(log_dir)
        .with_grace(Duration::from_millis(500));
    ProcessSupervisor::new(config)
}

fn identity() -> CaseRoundIdentity {
    CaseRoundIdentity::new("task-1", 123, 1, "127.0.0.1")
}

fn shell(script: &str, deadline: Duration) -> ExecutionRequest {
    ExecutionRequest::shell(identity(), script, deadline)
}

#[tokio::test]
async fn test_quick_success_writes_log() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("echo started; sleep 0.2", Duration::from_secs(10));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Success);
    assert_eq!(run.outcome.exit_code, Some(0));
    assert!(run.outcome.failure_reason.is_none());
    assert!(run.outcome.execution_time_millis >= 200);
    assert!(run.outcome.execution_time_millis < 5000);
    assert!(run.outcome.start_time <= run.outcome.end_time);

    let log = std::fs::read_to_string(dir.path().join("123_1.log")).unwrap();
    assert_eq!(log, "started\n");
}

#[tokio::test]
async fn test_detached_child_is_terminated_on_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("echo $$; sleep 300 & wait", Duration::from_secs(3));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Timeout);
    assert_eq!(run.outcome.exit_code, None);
    assert!(run.outcome.execution_time_millis >= 3000);
    assert!(run.outcome.execution_time_millis < 8000);
    assert!(run.outcome.failure_reason.as_deref().unwrap().contains("deadline"));

    let report = run.outcome.termination.as_ref().unwrap();
    assert!(report.fully_terminated);
    assert!(report.survivors.is_empty());

    let root: u32 = String::from_utf8_lossy(&run.artifact.stdout.bytes)
        .trim()
        .parse()
        .unwrap();
    assert!(ProcessGroup::from_leader(root).snapshot().is_empty());
}

#[tokio::test]
async fn test_term_ignoring_tree_is_killed() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("trap '' TERM; sleep 300 & wait", Duration::from_millis(300));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Timeout);
    let report = run.outcome.termination.as_ref().unwrap();
    assert!(report.escalated);
    assert!(report.fully_terminated);
}

#[tokio::test]
async fn test_nonzero_exit_is_failure() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("echo 'No module named requests' >&2; exit 1", Duration::from_secs(10));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Failure);
    assert_eq!(run.outcome.exit_code, Some(1));
    let reason = run.outcome.failure_reason.unwrap();
    assert!(reason.starts_with("missing module"));
    assert!(reason.contains("exit code 1"));
    assert!(reason.contains("No module named requests"));
}

#[tokio::test]
async fn test_failure_marker_overrides_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("echo 'step 3 FAIL'; exit 0", Duration::from_secs(10));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Failure);
    assert_eq!(run.outcome.exit_code, Some(0));
    assert!(run.outcome.failure_reason.unwrap().contains("\"FAIL\""));
}

#[tokio::test]
async fn test_signal_death_is_failure() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("kill -9 $$", Duration::from_secs(10));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Failure);
    assert_eq!(run.outcome.exit_code, None);
    assert_eq!(run.outcome.signal, Some(9));
}

#[tokio::test]
async fn test_output_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let config = SupervisorConfig::default()
        .with_log_dir(dir.path())
        .with_output_limit(1000);
    let request = shell(
        "head -c 100000 /dev/zero | tr '\\0' 'a'",
        Duration::from_secs(10),
    );

    let run = ProcessSupervisor::new(config)
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Success);
    assert!(run.artifact.truncated());
    assert_eq!(run.artifact.stdout.bytes.len(), 1000);
    assert_eq!(run.artifact.stdout.discarded, 99_000);
    assert_eq!(std::fs::metadata(dir.path().join("123_1.log")).unwrap().len(), 1000);
}

#[tokio::test]
async fn test_cancellation_stops_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("sleep 30", Duration::from_secs(60));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let run = supervisor(dir.path()).execute(&request, cancel).await;

    assert_eq!(run.outcome.status, ExecutionStatus::Cancelled);
    assert!(run.outcome.execution_time_millis < 5000);

    let record = ExecutionResultBuilder::default().build(&request, &run.outcome, None);
    assert_eq!(record.status(), "ERROR");
    assert_eq!(record.result(), "case execution cancelled");
}

#[tokio::test]
async fn test_launch_error() {
    let dir = tempfile::tempdir().unwrap();
    let request = ExecutionRequest::new(identity(), "/nonexistent/case-binary", Duration::from_secs(5));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Error);
    assert_eq!(run.outcome.exit_code, None);
    assert_eq!(run.outcome.execution_time_millis, 0);
    assert_eq!(run.outcome.start_time, run.outcome.end_time);
    assert!(run.outcome.failure_reason.unwrap().contains("failed to launch"));

    let log = std::fs::read_to_string(dir.path().join("123_1.log")).unwrap();
    assert!(log.contains("/nonexistent/case-binary"));
}

#[tokio::test]
async fn test_record_json_uses_canonical_times() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("exit 2", Duration::from_secs(10));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;
    let artifact = ArtifactRef::local(&run.artifact);
    let record = ExecutionResultBuilder::default().build(&request, &run.outcome, Some(&artifact));

    let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();
    assert_eq!(json["status"], "FAILURE");
    assert_eq!(json["result"], "case execution failed, exit code 2");

    let start = json["startTime"].as_str().unwrap();
    let end = json["endTime"].as_str().unwrap();
    for ts in [start, end] {
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[4..5], "-");
        assert_eq!(&ts[10..11], " ");
        assert_eq!(&ts[13..14], ":");
    }
    assert!(parse_canonical(start).unwrap() <= parse_canonical(end).unwrap());
    assert!(json["logFilePath"].as_str().unwrap().ends_with("123_1.log"));
}

#[tokio::test]
async fn test_natural_exit_sweeps_leftover_children() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("echo $$; sleep 300 & echo done", Duration::from_secs(10));

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Success);
    assert!(run.outcome.execution_time_millis < 5000);
    let report = run.outcome.termination.as_ref().unwrap();
    assert!(report.fully_terminated);
    assert!(report.snapshot_size >= 1);
    assert!(!report.escalated);

    let stdout = String::from_utf8_lossy(&run.artifact.stdout.bytes).to_string();
    let root: u32 = stdout.lines().next().unwrap().trim().parse().unwrap();
    assert!(ProcessGroup::from_leader(root).snapshot().is_empty());
}

#[tokio::test]
async fn test_natural_exit_escalates_on_term_ignoring_leftover() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell(
        "echo $$; (trap '' TERM; sleep 300) & sleep 0.3; echo done",
        Duration::from_secs(10),
    );

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Success);
    let report = run.outcome.termination.as_ref().unwrap();
    assert!(report.escalated);
    assert!(report.fully_terminated, "survivors: {:?}", report.survivors);

    let stdout = String::from_utf8_lossy(&run.artifact.stdout.bytes).to_string();
    let root: u32 = stdout.lines().next().unwrap().trim().parse().unwrap();
    assert!(ProcessGroup::from_leader(root).snapshot().is_empty());
}

#[tokio::test]
async fn test_unrepresentable_deadline_does_not_panic() {
    let dir = tempfile::tempdir().unwrap();
    let request = shell("exit 0", Duration::MAX);

    let run = supervisor(dir.path())
        .execute(&request, CancellationToken::new())
        .await;

    assert_eq!(run.outcome.status, ExecutionStatus::Success);
}

#[tokio::test]
async fn test_reported_test_statistics_decide_zero_exit() {
    let dir = tempfile::tempdir().unwrap();
    let passing = shell(
        "echo '运行测试数: 3, 失败数: 0, 错误数: 0'; echo '网络延迟: 8ms'",
        Duration::from_secs(10),
    );
    let failing = shell(
        "printf '运行测试数: 3, 失败数: 1, 错误数: 0\\n失败的测试:\\n- test_dns: lookup failed\\n'",
        Duration::from_secs(10),
    );

    let supervisor = supervisor(dir.path());
    let builder = ExecutionResultBuilder::default();

    let run = supervisor.execute(&passing, CancellationToken::new()).await;
    assert_eq!(run.outcome.status, ExecutionStatus::Success);
    let record = builder.build(&passing, &run.outcome, None);
    assert_eq!(
        record.result(),
        "case execution succeeded \
         (tests: total=3, passed=3, failed=0, errors=0, success rate=100.0%) \
         (network latency: 8.00ms)"
    );

    let run = supervisor.execute(&failing, CancellationToken::new()).await;
    assert_eq!(run.outcome.status, ExecutionStatus::Failure);
    assert_eq!(run.outcome.exit_code, Some(0));
    let record = builder.build(&failing, &run.outcome, None);
    let reason = record.failure_reason().unwrap();
    assert!(reason.starts_with("1 of 3 tests did not pass"));
    assert!(reason.ends_with("failed tests: test_dns: lookup failed"));
}
