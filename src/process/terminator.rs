//! Process tree termination
//!
//! The unit of termination is the whole process group, not a single pid:
//! 1. snapshot the members of the group
//! 2. SIGTERM the group and poll until every snapshotted process is gone or
//!    the grace period ends
//! 3. SIGKILL the group (and any snapshotted straggler that left it) and poll
//!    again under the shorter kill window
//! 4. report whatever still resists

use std::collections::BTreeSet;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::group::{ProcessEntry, ProcessGroup};
use crate::config::SupervisorConfig;

/// Result of terminating a process group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationReport {
    pub fully_terminated: bool,
    /// Snapshotted pids that survived SIGKILL
    pub survivors: BTreeSet<i32>,
    /// Number of processes found in the group when termination started
    pub snapshot_size: usize,
    /// Whether SIGKILL had to be sent
    pub escalated: bool,
}

impl TerminationReport {
    fn already_terminated() -> Self {
        Self {
            fully_terminated: true,
            survivors: BTreeSet::new(),
            snapshot_size: 0,
            escalated: false,
        }
    }
}

/// Terminates a process group with SIGTERM → SIGKILL escalation
#[derive(Debug, Clone)]
pub struct ProcessTreeTerminator {
    poll_interval: Duration,
    kill_window: Duration,
}

impl ProcessTreeTerminator {
    pub fn new(poll_interval: Duration, kill_window: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            kill_window,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.poll_interval, config.kill_window)
    }

    /// Terminate `group` and every process in it.
    ///
    /// Calling this on a group that is already gone returns a fully
    /// terminated report immediately.
    pub async fn terminate(&self, group: ProcessGroup, grace: Duration) -> TerminationReport {
        let snapshot = group.snapshot();
        if snapshot.is_empty() {
            debug!("Process group {} already terminated", group.id());
            return TerminationReport::already_terminated();
        }

        info!(
            "Terminating process group {} ({} processes, grace {:?})",
            group.id(),
            snapshot.len(),
            grace
        );

        if !group.signal(Signal::SIGTERM) {
            debug!("Process group {} vanished before SIGTERM", group.id());
        }

        let remaining = self.wait_for_exit(&snapshot, grace).await;
        if remaining.is_empty() {
            info!("Process group {} exited after SIGTERM", group.id());
            return TerminationReport {
                fully_terminated: true,
                survivors: BTreeSet::new(),
                snapshot_size: snapshot.len(),
                escalated: false,
            };
        }

        warn!(
            "{} processes of group {} ignored SIGTERM, sending SIGKILL",
            remaining.len(),
            group.id()
        );
        group.signal(Signal::SIGKILL);
        for entry in &remaining {
            entry.signal(Signal::SIGKILL);
        }

        let survivors: BTreeSet<i32> = self
            .wait_for_exit(&remaining, self.kill_window)
            .await
            .iter()
            .map(|e| e.pid)
            .collect();

        if !survivors.is_empty() {
            error!(
                "Process group {}: {} processes survived SIGKILL: {:?}",
                group.id(),
                survivors.len(),
                survivors
            );
        }

        TerminationReport {
            fully_terminated: survivors.is_empty(),
            survivors,
            snapshot_size: snapshot.len(),
            escalated: true,
        }
    }

    /// Poll until none of `entries` is alive or `bound` elapses; returns the living ones
    async fn wait_for_exit(&self, entries: &[ProcessEntry], bound: Duration) -> Vec<ProcessEntry> {
        let deadline = Instant::now() + bound;
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let alive: Vec<ProcessEntry> = entries.iter().filter(|e| e.is_alive()).copied().collect();
            if alive.is_empty() || Instant::now() >= deadline {
                return alive;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = sleep_until(deadline) => {}
            }
        }
    }
}
