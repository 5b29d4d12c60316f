//! Batch mode: run one command on a set of hosts and print every result
//! once all hosts have finished.

use fleetssh_core::{Config, Job, SshClientConfig};
use std::time::Duration;

#[tokio::main]
async fn main() {
    let mut config = Config::new();
    config.set_hosts(["192.168.1.118", "192.168.1.119"]);

    let mut ssh = SshClientConfig::default();
    ssh.user = String::from("u01");
    ssh.timeout = Duration::from_secs(10);
    config.set_ssh_config(ssh);

    if let Err(err) = config.set_private_key_auth("~/.ssh/id_rsa", None) {
        eprintln!("unable to load private key: {err}");
        return;
    }

    config.set_job(Job::new("/usr/bin/whoami"));
    config.set_worker_pool(5);

    match config.run().await {
        Ok(results) => {
            for result in results {
                match result.error {
                    Some(err) => eprintln!("{}: {}", result.host, err),
                    None => print!(
                        "{}: {}",
                        result.host,
                        String::from_utf8_lossy(&result.output)
                    ),
                }
            }
        }
        Err(err) => eprintln!("run failed: {err}"),
    }
}
