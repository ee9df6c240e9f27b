// ABOUTME: Exec pipeline: request limit clamping and bounded capture of demuxed output
// ABOUTME: Caps and defaults are wire contracts shared with existing clients

use bollard::container::LogOutput;
use futures_util::{Stream, StreamExt};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

use crate::sink::LimitedSink;

pub const DEFAULT_TIMEOUT_MS: i64 = 5_000;
pub const MAX_TIMEOUT_MS: i64 = 120_000;
pub const DEFAULT_STREAM_BYTES: i64 = 1 << 20;
pub const MAX_STREAM_BYTES: i64 = 10 << 20;
pub const REQUEST_BODY_CAP: usize = 2 << 20;
pub const DEFAULT_TTL_MS: i64 = 600_000;

/// Effective per-exec limits after applying defaults and ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecLimits {
    pub timeout: Duration,
    pub max_stdout: usize,
    pub max_stderr: usize,
}

impl ExecLimits {
    /// Clamp raw request values: zero or negative selects the default,
    /// anything above the ceiling is silently capped.
    pub fn from_request(timeout_ms: i64, max_stdout_bytes: i64, max_stderr_bytes: i64) -> Self {
        Self {
            timeout: Duration::from_millis(clamp(timeout_ms, DEFAULT_TIMEOUT_MS, MAX_TIMEOUT_MS) as u64),
            max_stdout: clamp(max_stdout_bytes, DEFAULT_STREAM_BYTES, MAX_STREAM_BYTES) as usize,
            max_stderr: clamp(max_stderr_bytes, DEFAULT_STREAM_BYTES, MAX_STREAM_BYTES) as usize,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self::from_request(0, 0, 0)
    }
}

fn clamp(value: i64, default: i64, max: i64) -> i64 {
    if value <= 0 {
        default
    } else if value > max {
        max
    } else {
        value
    }
}

/// Result of a one-shot command execution.
#[derive(Debug)]
pub struct ExecOutcome {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: i64,
    pub timed_out: bool,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
    pub duration: Duration,
}

/// Drain the demultiplexed attach stream into the two sinks until it closes
/// or the deadline fires. Returns true iff the deadline fired first.
///
/// Sinks discard overflow without erroring, so this loop always keeps
/// reading; stalling here would back-pressure the runtime's write side.
pub(crate) async fn drain_demuxed<S>(
    mut output: S,
    stdout: &mut LimitedSink,
    stderr: &mut LimitedSink,
    deadline: Instant,
) -> bool
where
    S: Stream<Item = std::result::Result<LogOutput, bollard::errors::Error>> + Unpin,
{
    loop {
        match tokio::time::timeout_at(deadline, output.next()).await {
            Err(_) => return true,
            Ok(None) => return false,
            Ok(Some(Ok(LogOutput::StdOut { message }))) => stdout.write(&message),
            Ok(Some(Ok(LogOutput::StdErr { message }))) => stderr.write(&message),
            Ok(Some(Ok(LogOutput::Console { message }))) => stdout.write(&message),
            Ok(Some(Ok(LogOutput::StdIn { .. }))) => {}
            Ok(Some(Err(e))) => {
                // Treat a broken stream like end-of-stream: callers still
                // inspect the exec and return whatever was captured.
                warn!("exec output stream error: {}", e);
                return false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;

    #[test]
    fn test_limits_defaults() {
        let limits = ExecLimits::from_request(0, 0, 0);
        assert_eq!(limits.timeout, Duration::from_millis(5_000));
        assert_eq!(limits.max_stdout, 1 << 20);
        assert_eq!(limits.max_stderr, 1 << 20);
    }

    #[test]
    fn test_limits_negative_selects_default() {
        let limits = ExecLimits::from_request(-1, -100, -1);
        assert_eq!(limits, ExecLimits::default());
    }

    #[test]
    fn test_limits_clamped_to_ceiling() {
        let limits = ExecLimits::from_request(500_000, 100 << 20, 100 << 20);
        assert_eq!(limits.timeout, Duration::from_millis(120_000));
        assert_eq!(limits.max_stdout, 10 << 20);
        assert_eq!(limits.max_stderr, 10 << 20);
    }

    #[test]
    fn test_limits_in_range_pass_through() {
        let limits = ExecLimits::from_request(200, 1024, 2048);
        assert_eq!(limits.timeout, Duration::from_millis(200));
        assert_eq!(limits.max_stdout, 1024);
        assert_eq!(limits.max_stderr, 2048);
    }

    fn out(bytes: &'static [u8]) -> std::result::Result<LogOutput, bollard::errors::Error> {
        Ok(LogOutput::StdOut {
            message: Bytes::from_static(bytes),
        })
    }

    fn err_out(bytes: &'static [u8]) -> std::result::Result<LogOutput, bollard::errors::Error> {
        Ok(LogOutput::StdErr {
            message: Bytes::from_static(bytes),
        })
    }

    #[tokio::test]
    async fn test_drain_routes_streams() {
        let chunks = stream::iter(vec![out(b"hello "), err_out(b"oops"), out(b"world")]);
        let mut stdout = LimitedSink::new(1024);
        let mut stderr = LimitedSink::new(1024);

        let timed_out = drain_demuxed(
            chunks,
            &mut stdout,
            &mut stderr,
            Instant::now() + Duration::from_secs(5),
        )
        .await;

        assert!(!timed_out);
        assert_eq!(stdout.into_bytes(), b"hello world");
        assert_eq!(stderr.into_bytes(), b"oops");
    }

    #[tokio::test]
    async fn test_drain_keeps_reading_past_cap() {
        let chunks = stream::iter(vec![out(b"aaaa"), out(b"bbbb"), out(b"cccc")]);
        let mut stdout = LimitedSink::new(6);
        let mut stderr = LimitedSink::new(1024);

        let timed_out = drain_demuxed(
            chunks,
            &mut stdout,
            &mut stderr,
            Instant::now() + Duration::from_secs(5),
        )
        .await;

        assert!(!timed_out);
        assert!(stdout.truncated());
        assert_eq!(stdout.into_bytes(), b"aaaabb");
    }

    #[tokio::test]
    async fn test_drain_reports_deadline() {
        // A stream that never yields: the deadline must fire.
        let pending = stream::pending::<std::result::Result<LogOutput, bollard::errors::Error>>();
        let mut stdout = LimitedSink::new(16);
        let mut stderr = LimitedSink::new(16);

        let timed_out = drain_demuxed(
            pending,
            &mut stdout,
            &mut stderr,
            Instant::now() + Duration::from_millis(20),
        )
        .await;

        assert!(timed_out);
    }
}
