//! Stream mode: deliver per-host stdout lines while the command runs.
//!
//! Handling the delivery channel is up to the caller; one envelope arrives
//! per (host, job) pair, and an envelope with `error` set means the ssh task
//! never started.

use fleetssh_core::{Config, HostResult, Job, SshClientConfig};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let mut config = Config::new();
    config.set_hosts([
        "192.168.1.118",
        "192.168.1.119",
        "192.168.1.120",
        "192.168.1.129",
        "192.168.1.212",
    ]);

    let mut ssh = SshClientConfig::default();
    ssh.timeout = Duration::from_secs(2);
    config.set_ssh_config(ssh);
    config.set_password_auth("u01", "password");

    config.set_job(Job::new("echo \"Hello, World\""));
    config.set_worker_pool(10);

    let (tx, mut rx) = mpsc::channel(16);
    let mut handle = config.stream(tx).await.expect("stream launch");

    let mut consumers = Vec::new();
    while let Some(result) = rx.recv().await {
        consumers.push(tokio::spawn(read_stream(result)));
    }

    for consumer in consumers {
        let _ = consumer.await;
    }
    handle.wait().await;
    println!("Everything returned.");
}

/// Reads one host's stdout lines until its session reports completion.
async fn read_stream(mut result: HostResult) {
    if let Some(err) = result.error {
        eprintln!("{}: {}", result.host, err);
        return;
    }

    let mut stdout = result.stdout_stream.take().expect("stream mode envelope");
    let mut done = result.done.take().expect("stream mode envelope");
    let mut stdout_open = true;

    loop {
        tokio::select! {
            line = stdout.recv(), if stdout_open => match line {
                Some(line) => print!("{}: {}", result.host, String::from_utf8_lossy(&line)),
                None => stdout_open = false,
            },
            _ = &mut done => {
                // Completion is signalled after both pipe readers exited;
                // drain whatever is still buffered in the channel.
                while let Ok(line) = stdout.try_recv() {
                    print!("{}: {}", result.host, String::from_utf8_lossy(&line));
                }
                println!("{}: Finished", result.host);
                break;
            }
        }
    }
}
