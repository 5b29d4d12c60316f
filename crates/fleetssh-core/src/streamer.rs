use crate::config::ExecContext;
use crate::job::Job;
use crate::result::{CompletionCounter, HostResult, SlowFlag};
use crate::transport::{self, RemoteSession, SessionEvent};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Shared last-activity clock for one streaming session. Both line readers
/// touch it; the slow watchdog measures idleness against it.
#[derive(Debug, Clone)]
pub(crate) struct ActivityClock {
    last: Arc<Mutex<Instant>>,
}

impl ActivityClock {
    pub(crate) fn new() -> Self {
        ActivityClock {
            last: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub(crate) fn touch(&self) {
        *self.last.lock() = Instant::now();
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last.lock().elapsed()
    }
}

/// Runs one (host, job) pair in stream mode.
///
/// The result envelope (with its stdout/stderr line channels and done
/// signal) is published on `delivery` before any data flows. Failures before
/// publication replace the envelope with an error record; failures after it
/// are published as a second, error-carrying record, and `done` only fires
/// on the success path. Exactly one completion is counted either way.
pub(crate) async fn execute_stream(
    host: String,
    job: Job,
    context: ExecContext,
    delivery: mpsc::Sender<HostResult>,
    counter: CompletionCounter,
) {
    let mut result = HostResult::new(host.as_str());

    let client = match transport::dial_through_chain(
        &context.route,
        &host,
        context.ssh.port,
        &context.ssh,
    )
    .await
    {
        Ok(client) => Arc::new(client),
        Err(err) => {
            result.error = Some(err);
            publish(&delivery, result).await;
            counter.increment();
            return;
        }
    };

    let mut session = match client.open_session().await {
        Ok(session) => session,
        Err(err) => {
            result.error = Some(err);
            client.close().await;
            publish(&delivery, result).await;
            counter.increment();
            return;
        }
    };

    let prepared = job.prepare();
    result.job = prepared.command.clone();
    let job_string = prepared.command.clone();

    let (stdout_tx, stdout_rx) = mpsc::channel(1);
    let (stderr_tx, stderr_rx) = mpsc::channel(1);
    let (raw_out_tx, raw_out_rx) = mpsc::channel::<Vec<u8>>(1);
    let (raw_err_tx, raw_err_rx) = mpsc::channel::<Vec<u8>>(1);
    let (done_tx, done_rx) = oneshot::channel();

    result.stdout_stream = Some(stdout_rx);
    result.stderr_stream = Some(stderr_rx);
    result.done = Some(done_rx);

    let slow_flag = result.is_slow.clone();
    let clock = ActivityClock::new();

    // The caller owns the streams from here on.
    if delivery.send(result).await.is_err() {
        warn!(target: "streamer::execute_stream", "Delivery channel closed before {} was published", host);
        client.close().await;
        counter.increment();
        return;
    }

    // One concurrent line reader per pipe, sharing the activity clock.
    let stdout_reader = tokio::spawn(pump_lines(raw_out_rx, stdout_tx, clock.clone()));
    let stderr_reader = tokio::spawn(pump_lines(raw_err_rx, stderr_tx, clock.clone()));

    let watchdog = (context.slow_timeout > 0).then(|| {
        tokio::spawn(slow_watchdog(
            clock.clone(),
            Duration::from_secs(context.slow_timeout),
            slow_flag,
        ))
    });

    // Stop observer: a raised stop signal closes this session, which drives
    // the pump (and with it both readers) through the normal end-of-stream
    // path.
    let stop_observer = tokio::spawn({
        let mut stop = context.stop.clone();
        let client = Arc::clone(&client);
        let host = host.clone();
        async move {
            if stop.wait_for(|raised| *raised).await.is_ok() {
                debug!(target: "streamer::execute_stream", "Stop signal received, closing session on {}", host);
                client.disconnect().await;
            }
        }
    });

    let outcome = match session.start(&prepared).await {
        Ok(()) => {
            pump_session(&mut session, raw_out_tx, raw_err_tx).await;
            Ok(())
        }
        Err(err) => {
            drop(raw_out_tx);
            drop(raw_err_tx);
            Err(err)
        }
    };

    // Readers flush their partial lines once the raw senders are gone; done
    // must not fire before both have.
    let _ = stdout_reader.await;
    let _ = stderr_reader.await;

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }
    stop_observer.abort();

    debug!(
        target: "streamer::execute_stream",
        "{} exited with status {:?}", host, session.exit_status()
    );
    client.close().await;

    counter.increment();

    match outcome {
        Ok(()) => {
            let _ = done_tx.send(());
        }
        Err(err) => {
            warn!(target: "streamer::execute_stream", "{}: {}", host, err);
            publish(
                &delivery,
                HostResult::failed(host.as_str(), job_string.as_str(), err),
            )
            .await;
        }
    }
}

/// Forwards session output into the per-stream raw channels until the
/// session closes. Raw sends block when a reader is saturated, which stalls
/// the remote through the SSH flow-control window.
async fn pump_session(
    session: &mut RemoteSession,
    raw_out: mpsc::Sender<Vec<u8>>,
    raw_err: mpsc::Sender<Vec<u8>>,
) {
    loop {
        match session.next_event().await {
            SessionEvent::Stdout(bytes) => {
                let _ = raw_out.send(bytes).await;
            }
            SessionEvent::Stderr(bytes) => {
                let _ = raw_err.send(bytes).await;
            }
            SessionEvent::Closed => return,
        }
    }
}

/// Assembles newline-delimited lines out of raw chunks and forwards them,
/// newline included, to the caller's channel. An unterminated tail is
/// flushed when the raw side reaches end-of-stream. Every received chunk
/// counts as activity.
pub(crate) async fn pump_lines(
    mut raw: mpsc::Receiver<Vec<u8>>,
    lines: mpsc::Sender<Vec<u8>>,
    clock: ActivityClock,
) {
    let mut pending: Vec<u8> = Vec::new();

    while let Some(chunk) = raw.recv().await {
        clock.touch();
        pending.extend_from_slice(&chunk);

        while let Some(newline) = pending.iter().position(|&byte| byte == b'\n') {
            let line: Vec<u8> = pending.drain(..=newline).collect();
            if lines.send(line).await.is_err() {
                // Consumer hung up; keep draining so the session pump never
                // blocks on a dead stream.
                pending.clear();
                while raw.recv().await.is_some() {
                    clock.touch();
                }
                return;
            }
        }
    }

    if !pending.is_empty() {
        let _ = lines.send(pending).await;
    }
}

/// Flags the session slow once the activity clock has been idle for
/// `timeout`, then stops. Never tears the session down.
pub(crate) async fn slow_watchdog(clock: ActivityClock, timeout: Duration, flag: SlowFlag) {
    loop {
        let idle = clock.idle_for();
        if idle >= timeout {
            debug!(target: "streamer::slow_watchdog", "No output for {:?}, flagging host slow", idle);
            flag.set();
            return;
        }
        tokio::time::sleep(timeout - idle).await;
    }
}

async fn publish(delivery: &mpsc::Sender<HostResult>, result: HostResult) {
    if delivery.send(result).await.is_err() {
        debug!(target: "streamer::publish", "Delivery channel closed, result dropped");
    }
}
