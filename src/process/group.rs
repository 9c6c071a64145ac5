//! Process group membership
//!
//! On Linux membership is read from `/proc/<pid>/stat`. Each snapshotted
//! process remembers its start time so a recycled pid is never mistaken for
//! a survivor. A descendant that moved to a new session (setsid) before the
//! snapshot is not a member of the group any more and is not tracked.

use std::fs;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use tracing::debug;

/// Fields of `/proc/<pid>/stat` the terminator cares about
#[derive(Debug, Clone, PartialEq)]
pub struct ProcStat {
    pub pid: i32,
    pub state: char,
    pub ppid: i32,
    pub pgrp: i32,
    /// Start time in clock ticks since boot
    pub start_time: u64,
}

/// Parse the content of `/proc/<pid>/stat`.
///
/// The command name may contain spaces and parentheses, so fields are read
/// after the last `)`.
pub fn parse_stat(content: &str) -> Option<ProcStat> {
    let open = content.find('(')?;
    let close = content.rfind(')')?;
    let pid = content[..open].trim().parse().ok()?;
    let rest: Vec<&str> = content.get(close + 1..)?.split_whitespace().collect();

    // rest[0] is field 3 (state); starttime is field 22
    Some(ProcStat {
        pid,
        state: rest.first()?.chars().next()?,
        ppid: rest.get(1)?.parse().ok()?,
        pgrp: rest.get(2)?.parse().ok()?,
        start_time: rest.get(19)?.parse().ok()?,
    })
}

fn read_stat(pid: i32) -> Option<ProcStat> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    parse_stat(&content)
}

fn procfs_available() -> bool {
    Path::new("/proc/self/stat").exists()
}

/// Zombie or dead; only the parent can reap it, signals no longer matter
fn is_exited_state(state: char) -> bool {
    matches!(state, 'Z' | 'X' | 'x')
}

/// One process captured by a group snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessEntry {
    pub pid: i32,
    start_time: Option<u64>,
}

impl ProcessEntry {
    /// Whether this exact process (not a recycled pid) is still running
    pub fn is_alive(&self) -> bool {
        if procfs_available() {
            return match read_stat(self.pid) {
                Some(stat) => {
                    let same_process = self.start_time.map_or(true, |t| t == stat.start_time);
                    same_process && !is_exited_state(stat.state)
                }
                None => false,
            };
        }

        match kill(Pid::from_raw(self.pid), None) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            // EPERM: exists but belongs to someone else
            Err(_) => true,
        }
    }

    /// Send a signal to this process alone; an exited process is not an error
    pub fn signal(&self, sig: Signal) {
        if let Err(e) = kill(Pid::from_raw(self.pid), sig) {
            if e != Errno::ESRCH {
                debug!("kill({}, {:?}) failed: {}", self.pid, sig, e);
            }
        }
    }
}

/// A process group led by the root of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessGroup {
    pgid: i32,
}

impl ProcessGroup {
    /// Group whose id equals the pid of its leader
    pub fn from_leader(pid: u32) -> Self {
        Self { pgid: pid as i32 }
    }

    pub fn id(&self) -> i32 {
        self.pgid
    }

    /// All live processes currently in the group
    pub fn snapshot(&self) -> Vec<ProcessEntry> {
        if !procfs_available() {
            // Without procfs only the leader can be addressed by pid
            let leader = ProcessEntry {
                pid: self.pgid,
                start_time: None,
            };
            return if leader.is_alive() { vec![leader] } else { vec![] };
        }

        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Failed to read /proc: {}", e);
                return vec![];
            }
        };

        let mut members = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            if let Some(stat) = read_stat(pid) {
                if stat.pgrp == self.pgid && !is_exited_state(stat.state) {
                    members.push(ProcessEntry {
                        pid,
                        start_time: Some(stat.start_time),
                    });
                }
            }
        }
        members.sort_by_key(|e| e.pid);
        members
    }

    /// Signal the whole group.
    ///
    /// Returns `false` when the group no longer exists (ESRCH), which callers
    /// treat as "already terminated".
    pub fn signal(&self, sig: Signal) -> bool {
        match killpg(Pid::from_raw(self.pgid), sig) {
            Ok(()) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                debug!("killpg({}, {:?}) failed: {}", self.pgid, sig, e);
                true
            }
        }
    }
}
