//! Log streaming - relays container stdout/stderr to caller sinks.
//!
//! Each stream gets its own forwarder task:
//!
//! ```text
//! container stdout ──read──► buffer ──write+flush──► stdout sink
//! container stderr ──read──► buffer ──write+flush──► stderr sink
//! ```
//!
//! Bytes go through untouched, in order, with no line buffering. A
//! forwarder ends at source EOF (shutting the sink down) or when its source
//! fails. Once a sink refuses writes, the rest of the source is read and
//! discarded, so the container never sees a broken pipe because a consumer
//! went away. One stream ending never affects the other.

use crate::constants::STREAM_BUFFER_SIZE;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::debug;

/// A caller-supplied destination for container output.
pub type BoxedSink = Box<dyn AsyncWrite + Send + Unpin>;

/// A readable container output pipe.
pub type BoxedSource = Box<dyn AsyncRead + Send + Unpin>;

/// Which container stream a forwarder relays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// How a forwarder finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamEnd {
    /// The source reached end of file.
    Eof,
    /// The sink stopped accepting writes.
    SinkClosed,
    /// Reading the source failed.
    SourceError,
}

/// Outcome of one forwarded stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardReport {
    pub stream: StreamKind,
    /// Bytes written to the sink.
    pub bytes: u64,
    pub end: StreamEnd,
    /// Error text for `SinkClosed` and `SourceError`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ForwardReport {
    /// True when the whole source reached the sink.
    pub fn is_complete(&self) -> bool {
        self.end == StreamEnd::Eof
    }
}

// =============================================================================
// Forwarder
// =============================================================================

/// One running stream relay.
#[derive(Debug)]
pub struct Forwarder {
    stream: StreamKind,
    handle: Option<JoinHandle<ForwardReport>>,
    report: Option<ForwardReport>,
}

impl Forwarder {
    /// Spawns a task relaying `source` into `sink`.
    pub fn spawn<R, W>(stream: StreamKind, source: R, sink: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let handle = tokio::spawn(forward(stream, source, sink));
        Self {
            stream,
            handle: Some(handle),
            report: None,
        }
    }

    /// The stream this forwarder relays.
    pub fn stream(&self) -> StreamKind {
        self.stream
    }

    /// True once the relay has ended.
    pub fn is_finished(&self) -> bool {
        match &self.handle {
            Some(handle) => handle.is_finished(),
            None => true,
        }
    }

    /// Waits for the relay to end. Later calls return the same report.
    pub async fn finished(&mut self) -> ForwardReport {
        if let Some(report) = &self.report {
            return report.clone();
        }
        let report = match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(report) => report,
                Err(e) => ForwardReport {
                    stream: self.stream,
                    bytes: 0,
                    end: StreamEnd::SourceError,
                    detail: Some(format!("forwarder task failed: {}", e)),
                },
            },
            None => ForwardReport {
                stream: self.stream,
                bytes: 0,
                end: StreamEnd::SourceError,
                detail: Some("forwarder was never started".to_string()),
            },
        };
        self.report = Some(report.clone());
        report
    }
}

async fn forward<R, W>(stream: StreamKind, mut source: R, mut sink: W) -> ForwardReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; STREAM_BUFFER_SIZE];
    let mut bytes = 0u64;

    let (end, detail) = loop {
        let n = match source.read(&mut buf).await {
            Ok(0) => {
                if let Err(e) = sink.shutdown().await {
                    debug!("Closing {} sink failed: {}", stream, e);
                }
                break (StreamEnd::Eof, None);
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = sink.flush().await;
                break (StreamEnd::SourceError, Some(e.to_string()));
            }
        };

        let written = async {
            sink.write_all(&buf[..n]).await?;
            sink.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!("{} sink closed after {} bytes: {}", stream, bytes, e);
            match tokio::io::copy(&mut source, &mut tokio::io::sink()).await {
                Ok(dropped) => debug!(%stream, dropped, "Discarded output after sink closed"),
                Err(e) => debug!(%stream, "Source failed while discarding: {}", e),
            }
            break (StreamEnd::SinkClosed, Some(e.to_string()));
        }
        bytes += n as u64;
    };

    debug!(%stream, bytes, ?end, "Forwarder done");
    ForwardReport {
        stream,
        bytes,
        end,
        detail,
    }
}

// =============================================================================
// Log Streamer
// =============================================================================

/// The pair of forwarders for one task.
#[derive(Debug)]
pub struct LogStreamer {
    stdout: Forwarder,
    stderr: Forwarder,
}

impl LogStreamer {
    /// Starts relaying both streams.
    pub fn attach<R1, R2, W1, W2>(
        stdout_source: R1,
        stderr_source: R2,
        stdout_sink: W1,
        stderr_sink: W2,
    ) -> Self
    where
        R1: AsyncRead + Send + Unpin + 'static,
        R2: AsyncRead + Send + Unpin + 'static,
        W1: AsyncWrite + Send + Unpin + 'static,
        W2: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            stdout: Forwarder::spawn(StreamKind::Stdout, stdout_source, stdout_sink),
            stderr: Forwarder::spawn(StreamKind::Stderr, stderr_source, stderr_sink),
        }
    }

    /// The stdout forwarder.
    pub fn stdout(&mut self) -> &mut Forwarder {
        &mut self.stdout
    }

    /// The stderr forwarder.
    pub fn stderr(&mut self) -> &mut Forwarder {
        &mut self.stderr
    }

    /// True once both relays have ended.
    pub fn is_drained(&self) -> bool {
        self.stdout.is_finished() && self.stderr.is_finished()
    }

    /// Waits for both relays to end.
    pub async fn drain(&mut self) -> (ForwardReport, ForwardReport) {
        let (out, err) = (&mut self.stdout, &mut self.stderr);
        tokio::join!(out.finished(), err.finished())
    }
}

// =============================================================================
// Sinks
// =============================================================================

/// Caller-supplied stdout and stderr destinations for a task.
pub struct TaskSinks {
    pub stdout: BoxedSink,
    pub stderr: BoxedSink,
}

impl TaskSinks {
    /// Uses the given writers.
    pub fn new<W1, W2>(stdout: W1, stderr: W2) -> Self
    where
        W1: AsyncWrite + Send + Unpin + 'static,
        W2: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            stdout: Box::new(stdout),
            stderr: Box::new(stderr),
        }
    }

    /// Discards all output.
    pub fn discard() -> Self {
        Self {
            stdout: discard(),
            stderr: discard(),
        }
    }

    /// Opens two paths (files or named pipes) for writing.
    pub async fn open(stdout: &Path, stderr: &Path) -> Result<Self> {
        Ok(Self {
            stdout: open_sink(stdout).await?,
            stderr: open_sink(stderr).await?,
        })
    }
}

impl fmt::Debug for TaskSinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSinks").finish_non_exhaustive()
    }
}

/// Opens a file or named pipe as a sink, appending to existing files.
///
/// Opening a named pipe waits until its reader is present.
pub async fn open_sink(path: &Path) -> Result<BoxedSink> {
    let file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| Error::io_at("open sink", path, e))?;
    Ok(Box::new(file))
}

/// A sink that accepts and drops everything.
pub fn discard() -> BoxedSink {
    Box::new(tokio::io::sink())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwarder_report_is_cached() {
        let mut fwd = Forwarder::spawn(StreamKind::Stdout, &b"abc"[..], tokio::io::sink());
        let first = fwd.finished().await;
        let second = fwd.finished().await;
        assert_eq!(first, second);
        assert_eq!(first.bytes, 3);
        assert!(first.is_complete());
        assert!(fwd.is_finished());
    }

    #[test]
    fn test_stream_kind_display() {
        assert_eq!(StreamKind::Stdout.to_string(), "stdout");
        assert_eq!(StreamKind::Stderr.to_string(), "stderr");
    }
}
