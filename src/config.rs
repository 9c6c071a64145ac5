//! Supervisor configuration
//!
//! Defaults can be overridden by an optional TOML file and then by
//! environment variables. The resulting config is handed to each
//! supervisor instance explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use tracing::warn;

/// Longest deadline a case may ask for (one week)
pub const MAX_DEADLINE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Configuration of one supervisor (and of the terminator/collector it owns)
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Time between SIGTERM and SIGKILL
    pub grace: Duration,
    /// How long to wait for the group to die after SIGKILL
    pub kill_window: Duration,
    /// Liveness polling interval during termination
    pub poll_interval: Duration,
    /// Per-stream byte ceiling for captured output
    pub output_limit_bytes: usize,
    /// Directory where `{testCaseId}_{round}.log` artifacts are written
    pub log_dir: PathBuf,
    /// Output substrings that turn a zero exit code into a failure
    pub failure_markers: Vec<String>,
    /// Maximum length (in chars) of a failure reason
    pub reason_limit: usize,
    /// Deadline used when a job does not carry one
    pub default_timeout: Duration,
    /// Upper bound for reaping the root after its group was killed
    pub reap_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(5),
            kill_window: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            output_limit_bytes: 8 * 1024 * 1024,
            log_dir: std::env::temp_dir().join("case-executor").join("logs"),
            failure_markers: vec!["FAIL".into(), "ERROR".into(), "失败".into()],
            reason_limit: 1024,
            default_timeout: Duration::from_secs(60),
            reap_timeout: Duration::from_secs(2),
        }
    }
}

/// Raw TOML configuration, every field optional
#[derive(Debug, Default, Deserialize)]
struct RawSupervisorConfig {
    grace_ms: Option<u64>,
    kill_window_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    output_limit_bytes: Option<usize>,
    log_dir: Option<PathBuf>,
    failure_markers: Option<Vec<String>>,
    reason_limit: Option<usize>,
    default_timeout_secs: Option<u64>,
    reap_timeout_ms: Option<u64>,
}

impl SupervisorConfig {
    /// Load configuration: defaults, then `CASE_EXECUTOR_CONFIG` (TOML), then env vars
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = match std::env::var("CASE_EXECUTOR_CONFIG") {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };

        if let Some(ms) = env_u64("CASE_GRACE_MS") {
            config.grace = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CASE_KILL_WINDOW_MS") {
            config.kill_window = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("CASE_POLL_INTERVAL_MS") {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(bytes) = env_u64("CASE_OUTPUT_LIMIT_BYTES") {
            config.output_limit_bytes = bytes as usize;
        }
        if let Some(secs) = env_u64("CASE_DEFAULT_TIMEOUT_SECS") {
            match deadline_from_secs(secs) {
                Some(timeout) => config.default_timeout = timeout,
                None => warn!(
                    "Ignoring CASE_DEFAULT_TIMEOUT_SECS={}: must be between 1 and {}",
                    secs,
                    MAX_DEADLINE.as_secs()
                ),
            }
        }
        if let Some(ms) = env_u64("CASE_REAP_TIMEOUT_MS") {
            config.reap_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = env_u64("CASE_REASON_LIMIT") {
            config.reason_limit = limit as usize;
        }
        if let Ok(dir) = std::env::var("CASE_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Ok(markers) = std::env::var("CASE_FAILURE_MARKERS") {
            config.failure_markers = parse_markers(&markers);
        }

        Ok(config)
    }

    /// Load configuration from a TOML file on top of the defaults
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let raw: RawSupervisorConfig = toml::from_str(content)?;
        let mut config = Self::default();

        if let Some(ms) = raw.grace_ms {
            config.grace = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.kill_window_ms {
            config.kill_window = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(bytes) = raw.output_limit_bytes {
            config.output_limit_bytes = bytes;
        }
        if let Some(dir) = raw.log_dir {
            config.log_dir = dir;
        }
        if let Some(markers) = raw.failure_markers {
            config.failure_markers = markers;
        }
        if let Some(limit) = raw.reason_limit {
            config.reason_limit = limit;
        }
        if let Some(secs) = raw.default_timeout_secs {
            let Some(timeout) = deadline_from_secs(secs) else {
                bail!(
                    "default_timeout_secs = {} must be between 1 and {}",
                    secs,
                    MAX_DEADLINE.as_secs()
                );
            };
            config.default_timeout = timeout;
        }
        if let Some(ms) = raw.reap_timeout_ms {
            config.reap_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }
}

/// A deadline in whole seconds, if it is positive and at most `MAX_DEADLINE`
pub fn deadline_from_secs(secs: u64) -> Option<Duration> {
    let deadline = Duration::from_secs(secs);
    (secs > 0 && deadline <= MAX_DEADLINE).then_some(deadline)
}

fn env_u64(key: &str) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("Ignoring invalid {}={:?}: {}", key, raw, e);
            None
        }
    }
}

fn parse_markers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}
