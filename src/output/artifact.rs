//! Log artifact produced by the output collector

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Which output stream a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Bytes captured from one stream
#[derive(Debug, Clone, Default)]
pub struct StreamCapture {
    pub bytes: Vec<u8>,
    /// Bytes discarded after the ceiling was reached
    pub discarded: u64,
}

impl StreamCapture {
    pub fn truncated(&self) -> bool {
        self.discarded > 0
    }
}

/// The finished log of one execution, named `{testCaseId}_{round}.log`
#[derive(Debug, Clone)]
pub struct LogArtifact {
    pub name: String,
    /// Local file holding both streams in arrival order
    pub path: PathBuf,
    pub stdout: StreamCapture,
    pub stderr: StreamCapture,
    /// Bytes actually written to `path`
    pub bytes_written: u64,
    /// A stream was still open when collection was cut off
    pub incomplete: bool,
    /// Non-fatal problems (file creation or write failures, reader crashes)
    pub warnings: Vec<String>,
}

impl LogArtifact {
    pub fn truncated(&self) -> bool {
        self.stdout.truncated() || self.stderr.truncated()
    }

    /// Captured output of both streams as text
    pub fn text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout.bytes).into_owned();
        text.push_str(&String::from_utf8_lossy(&self.stderr.bytes));
        text
    }

    /// Last `max_chars` characters of stderr (stdout when stderr is empty)
    pub fn tail(&self, max_chars: usize) -> String {
        let source = if self.stderr.bytes.is_empty() {
            &self.stdout.bytes
        } else {
            &self.stderr.bytes
        };
        let text = String::from_utf8_lossy(source);
        let trimmed = text.trim_end();
        let count = trimmed.chars().count();
        trimmed.chars().skip(count.saturating_sub(max_chars)).collect()
    }
}

/// Where a published artifact ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub name: String,
    /// Remote location (URL or object key), or the local path when not published
    pub location: String,
    pub truncated: bool,
}

impl ArtifactRef {
    /// Reference to the local file, used when publishing failed or is disabled
    pub fn local(artifact: &LogArtifact) -> Self {
        Self {
            name: artifact.name.clone(),
            location: artifact.path.display().to_string(),
            truncated: artifact.truncated(),
        }
    }
}
