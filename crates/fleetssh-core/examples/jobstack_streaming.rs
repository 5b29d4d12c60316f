//! Stream an ordered stack of jobs to every host; each (host, job) pair
//! gets its own envelope and its own session.

use fleetssh_core::{Config, HostResult, Job, SshClientConfig};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    let mut config = Config::new();
    config.set_hosts(["192.168.1.119", "192.168.1.120"]);

    let mut ssh = SshClientConfig::default();
    ssh.timeout = Duration::from_secs(2);
    config.set_ssh_config(ssh);
    config.set_password_auth("u01", "password");

    config.job_stack = Some(vec![
        Job::new("echo \"Hello, World\""),
        Job::new("echo \"Hello, World 2\""),
        Job::new("echo \"Hello, World 3\""),
    ]);
    config.set_worker_pool(10);

    let (tx, mut rx) = mpsc::channel(16);
    let mut handle = config.stream(tx).await.expect("stream launch");
    println!("expecting {} completions", handle.expected());

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
                while let Ok(line) = stdout.try_recv() {
                    print!("{}: {}", result.host, String::from_utf8_lossy(&line));
                }
                println!("{} [{}]: Finished", result.host, result.job);
                break;
            }
        }
    }
}
