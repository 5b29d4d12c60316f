use crate::error::FleetsshError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Shared slow-host marker.
///
/// The streamer publishes the owning [`HostResult`] to the caller before the
/// command produces any output, so the inactivity watchdog sets this flag
/// after the caller already holds the record. The flag latches: once set it
/// stays set.
#[derive(Debug, Clone, Default)]
pub struct SlowFlag(Arc<AtomicBool>);

impl SlowFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of one (host, job) execution.
///
/// In batch mode `output` carries the command's collected stdout. In stream
/// mode the record is delivered while the command runs and carries the
/// per-stream line channels and the completion signal instead.
///
/// `error` reports internal failures (connect, session, start, read); it is
/// distinct from anything the remote program writes to stderr.
#[derive(Debug)]
pub struct HostResult {
    /// Target host. Always populated, even when execution failed before
    /// anything was dispatched.
    pub host: String,

    /// The exact command string that was dispatched. Empty if execution
    /// never reached dispatch.
    pub job: String,

    /// Combined stdout bytes. Batch mode only, empty in stream mode.
    pub output: Vec<u8>,

    pub error: Option<FleetsshError>,

    /// True if the inactivity timer fired at least once while streaming.
    pub is_slow: SlowFlag,

    /// Byte-line channel for the remote stdout. Stream mode only.
    pub stdout_stream: Option<mpsc::Receiver<Vec<u8>>>,

    /// Byte-line channel for the remote stderr. Stream mode only.
    pub stderr_stream: Option<mpsc::Receiver<Vec<u8>>>,

    /// Fires once the session has fully exited and both output streams have
    /// been drained into their channels. Stream mode only.
    pub done: Option<oneshot::Receiver<()>>,
}

impl HostResult {
    pub(crate) fn new(host: impl Into<String>) -> Self {
        HostResult {
            host: host.into(),
            job: String::new(),
            output: Vec::new(),
            error: None,
            is_slow: SlowFlag::new(),
            stdout_stream: None,
            stderr_stream: None,
            done: None,
        }
    }

    /// A record reporting an internal failure for `host`.
    pub(crate) fn failed(host: impl Into<String>, job: impl Into<String>, error: FleetsshError) -> Self {
        let mut result = HostResult::new(host);
        result.job = job.into();
        result.error = Some(error);
        result
    }
}

/// Per-invocation completion accounting for [`Config::stream`].
///
/// Exactly one completion is recorded per (host, job) pair, whether the
/// session succeeded or failed internally. `wait` resolves once every
/// streaming task of the invocation has been joined, i.e. after every
/// record's data has been handed over.
///
/// [`Config::stream`]: crate::config::Config::stream
#[derive(Debug, Clone)]
pub struct StreamHandle {
    expected: usize,
    completed: Arc<AtomicUsize>,
    done: watch::Receiver<bool>,
}

impl StreamHandle {
    pub(crate) fn new(
        expected: usize,
        completed: Arc<AtomicUsize>,
        done: watch::Receiver<bool>,
    ) -> Self {
        StreamHandle {
            expected,
            completed,
            done,
        }
    }

    /// Number of (host, job) pairs this invocation dispatched.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Number of pairs that have terminated so far. Monotonic; may lag the
    /// delivery of the matching `done` signals.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn is_done(&self) -> bool {
        *self.done.borrow()
    }

    /// Resolves when every streaming task of this invocation has finished.
    pub async fn wait(&mut self) {
        // Err means the sender side is gone, which only happens after the
        // supervisor latched the flag or was torn down with the runtime.
        let _ = self.done.wait_for(|done| *done).await;
    }
}

/// Bookkeeping shared between the streaming tasks and the [`StreamHandle`].
#[derive(Debug, Clone)]
pub(crate) struct CompletionCounter(Arc<AtomicUsize>);

impl CompletionCounter {
    pub(crate) fn new() -> Self {
        CompletionCounter(Arc::new(AtomicUsize::new(0)))
    }

    pub(crate) fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn shared(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slow_flag_latches() {
        let flag = SlowFlag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
    }

    #[test]
    fn failed_result_keeps_host() {
        let result = HostResult::failed(
            "host1",
            "",
            FleetsshError::connect("host1", "connection refused"),
        );
        assert_eq!(result.host, "host1");
        assert!(result.error.is_some());
        assert!(result.stdout_stream.is_none());
        assert!(result.done.is_none());
    }

    #[tokio::test]
    async fn stream_handle_reports_completion() {
        let counter = CompletionCounter::new();
        let (done_tx, done_rx) = watch::channel(false);
        let mut handle = StreamHandle::new(2, counter.shared(), done_rx);

        assert_eq!(handle.expected(), 2);
        assert_eq!(handle.completed(), 0);
        assert!(!handle.is_done());

        counter.increment();
        counter.increment();
        done_tx.send(true).unwrap();

        handle.wait().await;
        assert_eq!(handle.completed(), 2);
        assert!(handle.is_done());
    }
}
