//! Slow-host detection: a job that goes quiet for longer than the slow
//! timeout gets its result flagged, without the session being torn down.

use fleetssh_core::{Config, HostResult, Job, SshClientConfig};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let mut config = Config::new();
    config.set_hosts(["192.168.1.118"]);

    let mut ssh = SshClientConfig::default();
    ssh.timeout = Duration::from_secs(2);
    config.set_ssh_config(ssh);
    config.set_password_auth("u01", "password");

    // No stdout for 5 seconds, which trips the 3 second inactivity timer.
    config.set_job(Job::new("echo go; sleep 5"));
    config.set_slow_timeout(3);
    config.set_worker_pool(10);

    let (tx, mut rx) = mpsc::channel(4);
    let mut handle = config.stream(tx).await.expect("stream launch");

    let mut consumers = Vec::new();
    while let Some(result) = rx.recv().await {
        consumers.push(tokio::spawn(read_stream(result)));
    }

    for consumer in consumers {
        let _ = consumer.await;
    }
    handle.wait().await;
}

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
                if result.is_slow.is_set() {
                    println!("{} completed, and was slow.", result.host);
                } else {
                    println!("{} completed, and was not slow.", result.host);
                }
                break;
            }
        }
    }
}
