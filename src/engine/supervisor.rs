//! Process supervisor
//!
//! Owns exactly one execution: spawns the command as the leader of a new
//! process group, drains its output, races natural exit against the
//! deadline and external cancellation, and terminates the whole group when
//! the run has to be stopped. `execute` only returns once the root is reaped
//! and every snapshotted group member is gone, or once the termination bound
//! is exhausted (survivors are then named in the failure reason).

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use super::outcome::{ExecutionOutcome, Supervised};
use super::request::ExecutionRequest;
use crate::config::SupervisorConfig;
use crate::core::{time, ExecutionStatus};
use crate::error::SupervisorError;
use crate::output::{LogArtifact, OutputCollector, StreamCapture};
use crate::process::{ProcessGroup, ProcessTreeTerminator, TerminationReport};
use crate::report::diagnose::{self, bound_reason};
use crate::report::parse::{self, CaseLogReport};

/// Characters of stderr kept in a failure reason
const TAIL_CHARS: usize = 512;

/// Which event ended the wait
enum Ended {
    Exited(std::io::Result<ExitStatus>),
    DeadlineExpired,
    Cancelled,
}

/// Supervises one execution request at a time; no state is shared between runs
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    terminator: ProcessTreeTerminator,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        let terminator = ProcessTreeTerminator::from_config(&config);
        Self { config, terminator }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run `request` to completion, deadline or cancellation.
    ///
    /// Never fails: launch errors and cleanup problems are folded into the
    /// outcome, collector problems into `warnings`.
    pub async fn execute(&self, request: &ExecutionRequest, cancel: CancellationToken) -> Supervised {
        let span = request.span();
        self.run(request, cancel).instrument(span).await
    }

    async fn run(&self, request: &ExecutionRequest, cancel: CancellationToken) -> Supervised {
        let name = request.identity.log_file_name();
        let start_time = time::now();
        let started = Instant::now();

        info!(
            "Starting case: {} (deadline {:?}, executor {})",
            request.display_command(),
            request.deadline,
            request.identity.executor_ip
        );

        let mut child = match self.spawn(request) {
            Ok(child) => child,
            Err(e) => return self.launch_failure(&name, e, start_time).await,
        };

        // The pid is always present until the child has been reaped
        let Some(pid) = child.id() else {
            let e = SupervisorError::NoPid;
            return self.launch_failure(&name, e, start_time).await;
        };
        let group = ProcessGroup::from_leader(pid);

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            (out, _) => {
                let stream = if out.is_none() { "stdout" } else { "stderr" };
                self.terminator.terminate(group, self.config.grace).await;
                if let Err(e) = self.reap(&mut child).await {
                    warn!("{}", e);
                }
                let e = SupervisorError::MissingStream { stream };
                return self.launch_failure(&name, e, start_time).await;
            }
        };

        let collector = OutputCollector::attach(
            stdout,
            stderr,
            &self.config.log_dir,
            &name,
            self.config.output_limit_bytes,
            tracing::Span::current(),
        );

        // A deadline beyond what Instant can represent never fires
        let deadline = started.checked_add(request.deadline);
        let expired = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        let ended = tokio::select! {
            status = child.wait() => Ended::Exited(status),
            _ = expired => Ended::DeadlineExpired,
            _ = cancel.cancelled() => Ended::Cancelled,
        };

        let mut warnings = Vec::new();

        // Natural exit still sweeps the group: descendants must not outlive the case
        let report = self.terminator.terminate(group, self.config.grace).await;
        let mut survivors = report.survivors.clone();

        let exit = match &ended {
            Ended::Exited(Ok(status)) => Some(*status),
            Ended::Exited(Err(e)) => {
                error!("Failed to wait for process {}: {}", pid, e);
                warnings.push(format!("wait on process {} failed: {}", pid, e));
                None
            }
            Ended::DeadlineExpired | Ended::Cancelled => {
                if let Err(e) = self.reap(&mut child).await {
                    warnings.push(e);
                    survivors.insert(pid as i32);
                }
                None
            }
        };

        let artifact = collector.finalize(self.config.kill_window).await;
        warnings.extend(artifact.warnings.iter().cloned());
        let log_report = parse::parse(&artifact.text());

        let (status, exit_code, signal, failure_reason) = match ended {
            Ended::DeadlineExpired => {
                warn!("Case exceeded its deadline of {:?}", request.deadline);
                let reason = with_survivors(
                    format!("execution exceeded deadline of {} ms", request.deadline.as_millis()),
                    &survivors,
                );
                (ExecutionStatus::Timeout, None, None, Some(reason))
            }
            Ended::Cancelled => {
                warn!("Case cancelled");
                let reason = with_survivors("execution cancelled".to_string(), &survivors);
                (ExecutionStatus::Cancelled, None, None, Some(reason))
            }
            Ended::Exited(_) if !survivors.is_empty() => {
                let reason = with_survivors("process tree could not be terminated".to_string(), &survivors);
                (ExecutionStatus::Error, None, None, Some(reason))
            }
            Ended::Exited(_) => match exit {
                Some(status) => self.judge_exit(status, &artifact, &log_report),
                None => (
                    ExecutionStatus::Error,
                    None,
                    None,
                    Some("lost track of the process while waiting for it".to_string()),
                ),
            },
        };

        let end_time = time::now().max(start_time);
        let execution_time_millis = started.elapsed().as_millis() as u64;

        info!(
            "Case finished: status={}, exit_code={:?}, execution_time_ms={}",
            status, exit_code, execution_time_millis
        );

        Supervised {
            outcome: ExecutionOutcome {
                status,
                start_time,
                end_time,
                execution_time_millis,
                exit_code,
                signal,
                failure_reason: failure_reason.map(|r| bound_reason(&r, self.config.reason_limit)),
                termination: Some(TerminationReport {
                    fully_terminated: survivors.is_empty(),
                    survivors,
                    ..report
                }),
                log_report: Some(log_report),
            },
            artifact,
            warnings,
        }
    }

    fn spawn(&self, request: &ExecutionRequest) -> Result<Child, SupervisorError> {
        let mut cmd = Command::new(&request.command);
        cmd.args(&request.args)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(dir) = &request.work_dir {
            cmd.current_dir(dir);
        }

        cmd.spawn().map_err(|source| SupervisorError::Launch {
            program: request.command.clone(),
            source,
        })
    }

    /// Reap the (already signaled) root within the reap bound
    async fn reap(&self, child: &mut Child) -> Result<(), String> {
        match timeout(self.config.reap_timeout, child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("failed to reap root process: {}", e)),
            Err(_) => {
                let _ = child.start_kill();
                Err(format!(
                    "root process not reaped within {:?}",
                    self.config.reap_timeout
                ))
            }
        }
    }

    /// SUCCESS, or FAILURE with a diagnosed reason.
    ///
    /// With exit code 0, test statistics printed by the case take precedence
    /// over failure markers: the summary block itself names its failure counts.
    fn judge_exit(
        &self,
        status: ExitStatus,
        artifact: &LogArtifact,
        log_report: &CaseLogReport,
    ) -> (ExecutionStatus, Option<i32>, Option<i32>, Option<String>) {
        let log = artifact.text();
        let markers = &self.config.failure_markers;

        match (status.code(), status.signal()) {
            (Some(0), _) if log_report.statistics.is_some() => match log_report.statistics {
                Some(stats) if stats.has_failures() => {
                    let reason = format!(
                        "{} of {} tests did not pass; {}",
                        stats.failed.saturating_add(stats.errors),
                        stats.total,
                        tail_note(artifact)
                    );
                    (ExecutionStatus::Failure, Some(0), None, Some(reason))
                }
                _ => (ExecutionStatus::Success, Some(0), None, None),
            },
            (Some(0), _) => match diagnose::find_marker(&log, markers) {
                None => (ExecutionStatus::Success, Some(0), None, None),
                Some(marker) => {
                    let reason = format!(
                        "exit code 0 but output contains failure marker {:?}; {}",
                        marker,
                        tail_note(artifact)
                    );
                    (ExecutionStatus::Failure, Some(0), None, Some(reason))
                }
            },
            (Some(code), _) => {
                let category = diagnose::classify(&log, markers);
                let reason = format!("{}; exit code {}; {}", category, code, tail_note(artifact));
                (ExecutionStatus::Failure, Some(code), None, Some(reason))
            }
            (None, sig) => {
                let reason = format!(
                    "terminated by signal {}; {}",
                    sig.map_or_else(|| "unknown".to_string(), |s| s.to_string()),
                    tail_note(artifact)
                );
                (ExecutionStatus::Failure, None, sig, Some(reason))
            }
        }
    }

    /// ERROR outcome for a command that never started
    async fn launch_failure(
        &self,
        name: &str,
        err: SupervisorError,
        start_time: chrono::NaiveDateTime,
    ) -> Supervised {
        error!("{}", err);
        let reason = err.to_string();
        let path = self.config.log_dir.join(name);

        let mut warnings = Vec::new();
        let write = async {
            tokio::fs::create_dir_all(&self.config.log_dir).await?;
            tokio::fs::write(&path, format!("{}\n", reason)).await
        };
        let bytes_written = match write.await {
            Ok(()) => reason.len() as u64 + 1,
            Err(source) => {
                let e = SupervisorError::Artifact {
                    path: path.clone(),
                    source,
                };
                warn!("{}", e);
                warnings.push(e.to_string());
                0
            }
        };

        Supervised {
            outcome: ExecutionOutcome {
                status: ExecutionStatus::Error,
                start_time,
                end_time: start_time,
                execution_time_millis: 0,
                exit_code: None,
                signal: None,
                failure_reason: Some(bound_reason(&reason, self.config.reason_limit)),
                termination: None,
                log_report: None,
            },
            artifact: LogArtifact {
                name: name.to_string(),
                path,
                stdout: StreamCapture::default(),
                stderr: StreamCapture::default(),
                bytes_written,
                incomplete: false,
                warnings: warnings.clone(),
            },
            warnings,
        }
    }
}

fn tail_note(artifact: &LogArtifact) -> String {
    let tail = artifact.tail(TAIL_CHARS);
    if tail.is_empty() {
        "no output captured".to_string()
    } else {
        format!("output tail: {}", tail)
    }
}

fn with_survivors(reason: String, survivors: &std::collections::BTreeSet<i32>) -> String {
    if survivors.is_empty() {
        return reason;
    }
    let pids: Vec<String> = survivors.iter().map(|p| p.to_string()).collect();
    format!("{}; surviving processes: {}", reason, pids.join(", "))
}
