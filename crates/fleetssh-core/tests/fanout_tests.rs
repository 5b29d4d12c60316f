//! End-to-end tests that exercise the pool, executor, and streamer paths
//! without a live SSH server: dialing a closed loopback port fails fast and
//! must surface as a per-host result, never as a call-level error.

use fleetssh_core::{AuthMethod, Config, FleetsshError, Job, SshClientConfig};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

fn unreachable_config() -> Config {
    let mut config = Config::new();
    config.set_hosts(["127.0.0.1"]);

    let mut ssh = SshClientConfig::default();
    ssh.user = String::from("nobody");
    // Nothing listens on the discard port; connects are refused immediately.
    ssh.port = 1;
    ssh.timeout = Duration::from_secs(5);
    ssh.auth.push(AuthMethod::Password(String::from("wrong")));
    config.set_ssh_config(ssh);

    config.set_worker_pool(2);
    config
}

#[tokio::test]
async fn batch_reports_connect_failure_per_host() {
    let mut config = unreachable_config();
    config.set_job(Job::new("echo Hello, World"));

    let results = assert_ok!(config.run().await);
    assert_eq!(results.len(), 1);

    let result = &results[0];
    assert_eq!(result.host, "127.0.0.1");
    assert!(result.output.is_empty());
    assert!(result.job.is_empty());
    assert!(matches!(result.error, Some(FleetsshError::Connect { .. })));
}

#[tokio::test]
async fn batch_job_stack_yields_one_result_per_job() {
    let mut config = unreachable_config();
    config.job_stack = Some(vec![
        Job::new("echo 1"),
        Job::new("echo 2"),
        Job::new("echo 3"),
    ]);

    let results = config.run().await.unwrap();
    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.host, "127.0.0.1");
        assert!(result.error.is_some());
    }
}

#[tokio::test]
async fn stream_delivers_error_envelope_and_completes() {
    let mut config = unreachable_config();
    config.set_job(Job::new("echo Hello, World"));

    let (tx, mut rx) = mpsc::channel(1);
    let mut handle = config.stream(tx).await.unwrap();
    assert_eq!(handle.expected(), 1);

    let result = rx.recv().await.expect("one envelope per (host, job) pair");
    assert_eq!(result.host, "127.0.0.1");
    assert!(matches!(result.error, Some(FleetsshError::Connect { .. })));
    assert!(result.stdout_stream.is_none());
    assert!(result.stderr_stream.is_none());
    assert!(result.done.is_none());

    handle.wait().await;
    assert_eq!(handle.completed(), 1);
    assert!(handle.is_done());
}

#[tokio::test]
async fn stream_counts_every_pair_of_a_job_stack() {
    let mut config = unreachable_config();
    config.job_stack = Some(vec![Job::new("echo 1"), Job::new("echo 2")]);

    let (tx, mut rx) = mpsc::channel(2);
    let mut handle = config.stream(tx).await.unwrap();
    assert_eq!(handle.expected(), 2);

    let mut seen = 0;
    while let Some(result) = rx.recv().await {
        assert_eq!(result.host, "127.0.0.1");
        seen += 1;
        if seen == 2 {
            break;
        }
    }

    handle.wait().await;
    assert_eq!(handle.completed(), 2);
}

#[tokio::test]
async fn run_refuses_invalid_config() {
    let config = Config::new();
    match config.run().await {
        Err(FleetsshError::InvalidConfig { missing }) => {
            assert_eq!(missing.len(), 4);
        }
        other => panic!("expected InvalidConfig, got {other:?}"),
    }
}

#[tokio::test]
async fn stream_refuses_invalid_config() {
    let config = Config::new();
    let (tx, _rx) = mpsc::channel(1);
    assert!(matches!(
        config.stream(tx).await,
        Err(FleetsshError::InvalidConfig { .. })
    ));
}

#[tokio::test]
async fn conflicting_jobs_rejected_at_entry() {
    let mut config = unreachable_config();
    config.set_job(Job::new("echo 1"));
    config.job_stack = Some(vec![Job::new("echo 2")]);

    assert!(matches!(
        config.run().await,
        Err(FleetsshError::JobConflict)
    ));
}

#[tokio::test]
async fn stop_signal_does_not_disturb_failed_sessions() {
    let mut config = unreachable_config();
    config.set_job(Job::new("hexdump -C /dev/urandom"));

    let (tx, mut rx) = mpsc::channel(1);
    let mut handle = config.stream(tx).await.unwrap();

    config.stop_all_sessions();

    let result = rx.recv().await.expect("envelope still arrives");
    assert!(result.error.is_some());

    handle.wait().await;
    assert_eq!(handle.completed(), handle.expected());
}
