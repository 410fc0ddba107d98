//! Tests for stdout/stderr forwarding.

use jarbox::streamer::{Forwarder, discard, open_sink};
use jarbox::{LogStreamer, StreamEnd, StreamKind, TaskSinks};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};

/// Yields `data` once, then fails.
struct FailingSource {
    data: Option<Vec<u8>>,
}

impl AsyncRead for FailingSource {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.data.take() {
            Some(data) => {
                buf.put_slice(&data);
                Poll::Ready(Ok(()))
            }
            None => Poll::Ready(Err(io::Error::other("pipe torn down"))),
        }
    }
}

// =============================================================================
// Forwarding Tests
// =============================================================================

#[tokio::test]
async fn test_bytes_forwarded_unchanged() {
    let payload: Vec<u8> = (0..=255u8).cycle().take(100_000).collect();
    let (sink, mut reader) = tokio::io::duplex(8 * 1024);

    let source = payload.clone();
    let mut fwd = Forwarder::spawn(StreamKind::Stdout, io::Cursor::new(source), sink);

    let mut received = Vec::new();
    reader.read_to_end(&mut received).await.unwrap();
    let report = fwd.finished().await;

    assert_eq!(received, payload);
    assert_eq!(report.bytes, payload.len() as u64);
    assert_eq!(report.end, StreamEnd::Eof);
    assert_eq!(report.stream, StreamKind::Stdout);
}

#[tokio::test]
async fn test_partial_line_is_delivered() {
    let (sink, mut reader) = tokio::io::duplex(1024);
    let mut fwd = Forwarder::spawn(StreamKind::Stderr, &b"no newline at end"[..], sink);

    let mut received = String::new();
    reader.read_to_string(&mut received).await.unwrap();

    assert_eq!(received, "no newline at end");
    assert!(fwd.finished().await.is_complete());
}

#[tokio::test]
async fn test_closed_sink_ends_only_that_stream() {
    let (out_sink, out_reader) = tokio::io::duplex(64);
    drop(out_reader);
    let (err_sink, mut err_reader) = tokio::io::duplex(1024);

    let mut streamer = LogStreamer::attach(
        &b"stdout data"[..],
        &b"stderr data"[..],
        out_sink,
        err_sink,
    );

    let mut err_text = String::new();
    err_reader.read_to_string(&mut err_text).await.unwrap();
    let (out, err) = streamer.drain().await;

    assert_eq!(out.end, StreamEnd::SinkClosed);
    assert_eq!(out.bytes, 0);
    assert!(out.detail.is_some());
    assert_eq!(err.end, StreamEnd::Eof);
    assert_eq!(err_text, "stderr data");
    assert!(streamer.is_drained());
}

#[tokio::test]
async fn test_writer_unblocked_after_sink_closes() {
    let (mut writer, source) = tokio::io::duplex(64);
    let (sink, reader) = tokio::io::duplex(64);
    drop(reader);
    let mut fwd = Forwarder::spawn(StreamKind::Stdout, source, sink);

    for _ in 0..64 {
        writer.write_all(&[b'x'; 256]).await.unwrap();
    }
    drop(writer);

    let report = fwd.finished().await;
    assert_eq!(report.end, StreamEnd::SinkClosed);
    assert_eq!(report.bytes, 0);
}

#[tokio::test]
async fn test_source_error_is_reported() {
    let (sink, mut reader) = tokio::io::duplex(1024);
    let source = FailingSource {
        data: Some(b"partial".to_vec()),
    };
    let mut fwd = Forwarder::spawn(StreamKind::Stdout, source, sink);

    let report = fwd.finished().await;
    assert_eq!(report.end, StreamEnd::SourceError);
    assert_eq!(report.bytes, 7);
    assert_eq!(report.detail.as_deref(), Some("pipe torn down"));

    let mut buf = [0u8; 7];
    reader.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"partial");
}

#[tokio::test]
async fn test_drain_is_repeatable() {
    let mut streamer = LogStreamer::attach(&b"a"[..], &b"bc"[..], discard(), discard());

    let first = streamer.drain().await;
    let second = streamer.drain().await;

    assert_eq!(first, second);
    assert_eq!(first.0.bytes, 1);
    assert_eq!(first.1.bytes, 2);
}

// =============================================================================
// Sink Tests
// =============================================================================

#[tokio::test]
async fn test_open_sink_appends() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stdout.log");
    std::fs::write(&path, "earlier\n").unwrap();

    let mut sink = open_sink(&path).await.unwrap();
    sink.write_all(b"later\n").await.unwrap();
    sink.shutdown().await.unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "earlier\nlater\n");
}

#[tokio::test]
async fn test_open_sink_missing_directory_fails() {
    let dir = TempDir::new().unwrap();
    let result = open_sink(&dir.path().join("no/such/dir/out.log")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_task_sinks_open_files() {
    let dir = TempDir::new().unwrap();
    let out_path = dir.path().join("out.log");
    let err_path = dir.path().join("err.log");

    let sinks = TaskSinks::open(&out_path, &err_path).await.unwrap();
    let mut streamer = LogStreamer::attach(&b"out\n"[..], &b"err\n"[..], sinks.stdout, sinks.stderr);
    streamer.drain().await;

    assert_eq!(std::fs::read_to_string(&out_path).unwrap(), "out\n");
    assert_eq!(std::fs::read_to_string(&err_path).unwrap(), "err\n");
}
