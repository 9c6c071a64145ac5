//! Concurrent output collection
//!
//! stdout and stderr are drained by two independent reader tasks so a
//! program blocked on a full stderr pipe never stalls the stdout side (and
//! vice versa). Readers keep draining after the per-stream ceiling is hit;
//! excess bytes are only counted. A single writer task owns the captures and
//! the log file, so whatever was collected survives even if a reader has to
//! be cut off.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument, Span};

use super::artifact::{LogArtifact, StreamCapture, StreamKind};
use crate::error::SupervisorError;

const READ_CHUNK: usize = 8 * 1024;
const CHANNEL_DEPTH: usize = 64;

enum Event {
    Data(StreamKind, Vec<u8>),
    Discarded(StreamKind, u64),
    ReadFailed(StreamKind, String),
}

/// Drains the output streams of one monitored process
pub struct OutputCollector {
    readers: Vec<(StreamKind, JoinHandle<()>)>,
    writer: JoinHandle<LogArtifact>,
    span: Span,
}

impl OutputCollector {
    /// Start draining `stdout` and `stderr` into `{log_dir}/{name}`.
    ///
    /// Never fails: if the log file cannot be created, output is still
    /// drained and captured in memory and the problem is reported as an
    /// artifact warning.
    pub fn attach<O, E>(
        stdout: O,
        stderr: E,
        log_dir: &Path,
        name: &str,
        limit_per_stream: usize,
        span: Span,
    ) -> Self
    where
        O: AsyncRead + Unpin + Send + 'static,
        E: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let path = log_dir.join(name);

        let writer = tokio::spawn(
            write_artifact(rx, log_dir.to_path_buf(), path, name.to_string())
                .instrument(span.clone()),
        );

        let readers = vec![
            (
                StreamKind::Stdout,
                tokio::spawn(
                    drain(stdout, StreamKind::Stdout, limit_per_stream, tx.clone())
                        .instrument(span.clone()),
                ),
            ),
            (
                StreamKind::Stderr,
                tokio::spawn(
                    drain(stderr, StreamKind::Stderr, limit_per_stream, tx)
                        .instrument(span.clone()),
                ),
            ),
        ];

        Self {
            readers,
            writer,
            span,
        }
    }

    /// Wait for both streams to reach EOF, flush and close the log file.
    ///
    /// Streams still open after `drain_timeout` (held by a process that
    /// escaped termination) are cut off and the artifact is marked incomplete.
    pub async fn finalize(self, drain_timeout: Duration) -> LogArtifact {
        let deadline = tokio::time::Instant::now() + drain_timeout;
        let mut incomplete = false;
        let mut reader_warnings = Vec::new();

        for (kind, mut handle) in self.readers {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    let err = SupervisorError::Reader {
                        stream: kind.as_str(),
                        message: e.to_string(),
                    };
                    self.span.in_scope(|| warn!("{}", err));
                    reader_warnings.push(err.to_string());
                }
                Err(_) => {
                    self.span
                        .in_scope(|| warn!("{} still open after {:?}, cutting off", kind.as_str(), drain_timeout));
                    handle.abort();
                    incomplete = true;
                }
            }
        }

        // All senders are gone once the readers finished or were aborted
        let mut artifact = match self.writer.await {
            Ok(artifact) => artifact,
            Err(e) => {
                let err = SupervisorError::Reader {
                    stream: "log writer",
                    message: e.to_string(),
                };
                LogArtifact {
                    name: String::new(),
                    path: PathBuf::new(),
                    stdout: StreamCapture::default(),
                    stderr: StreamCapture::default(),
                    bytes_written: 0,
                    incomplete: true,
                    warnings: vec![err.to_string()],
                }
            }
        };
        artifact.incomplete |= incomplete;
        artifact.warnings.extend(reader_warnings);
        artifact
    }
}

async fn drain<R>(mut stream: R, kind: StreamKind, limit: usize, tx: mpsc::Sender<Event>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut kept = 0usize;

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let _ = tx.send(Event::ReadFailed(kind, e.to_string())).await;
                break;
            }
        };

        let keep = n.min(limit.saturating_sub(kept));
        if keep > 0 {
            kept += keep;
            for line in String::from_utf8_lossy(&buf[..keep]).lines() {
                debug!(stream = kind.as_str(), "{}", line);
            }
            if tx.send(Event::Data(kind, buf[..keep].to_vec())).await.is_err() {
                break;
            }
        }
        if keep < n && tx.send(Event::Discarded(kind, (n - keep) as u64)).await.is_err() {
            break;
        }
    }
}

async fn open_log(log_dir: &Path, path: &Path) -> Result<BufWriter<File>, SupervisorError> {
    let artifact_err = |source| SupervisorError::Artifact {
        path: path.to_path_buf(),
        source,
    };
    fs::create_dir_all(log_dir).await.map_err(artifact_err)?;
    let file = File::create(path).await.map_err(artifact_err)?;
    Ok(BufWriter::new(file))
}

async fn write_artifact(
    mut rx: mpsc::Receiver<Event>,
    log_dir: PathBuf,
    path: PathBuf,
    name: String,
) -> LogArtifact {
    let mut warnings = Vec::new();
    let mut file = match open_log(&log_dir, &path).await {
        Ok(file) => Some(file),
        Err(e) => {
            warn!("{}", e);
            warnings.push(e.to_string());
            None
        }
    };

    let mut stdout = StreamCapture::default();
    let mut stderr = StreamCapture::default();
    let mut bytes_written = 0u64;

    while let Some(event) = rx.recv().await {
        match event {
            Event::Data(kind, bytes) => {
                if let Some(writer) = file.as_mut() {
                    match writer.write_all(&bytes).await {
                        Ok(()) => bytes_written += bytes.len() as u64,
                        Err(source) => {
                            let e = SupervisorError::Artifact {
                                path: path.clone(),
                                source,
                            };
                            warn!("{}", e);
                            warnings.push(e.to_string());
                            file = None;
                        }
                    }
                }
                match kind {
                    StreamKind::Stdout => stdout.bytes.extend_from_slice(&bytes),
                    StreamKind::Stderr => stderr.bytes.extend_from_slice(&bytes),
                }
            }
            Event::Discarded(kind, n) => match kind {
                StreamKind::Stdout => stdout.discarded += n,
                StreamKind::Stderr => stderr.discarded += n,
            },
            Event::ReadFailed(kind, message) => {
                let e = SupervisorError::Reader {
                    stream: kind.as_str(),
                    message,
                };
                warn!("{}", e);
                warnings.push(e.to_string());
            }
        }
    }

    if let Some(mut writer) = file {
        if let Err(source) = writer.shutdown().await {
            let e = SupervisorError::Artifact {
                path: path.clone(),
                source,
            };
            warn!("{}", e);
            warnings.push(e.to_string());
        }
    }

    if stdout.truncated() || stderr.truncated() {
        debug!(
            "Output truncated: stdout discarded {} bytes, stderr discarded {} bytes",
            stdout.discarded, stderr.discarded
        );
    }

    LogArtifact {
        name,
        path,
        stdout,
        stderr,
        bytes_written,
        incomplete: false,
        warnings,
    }
}
