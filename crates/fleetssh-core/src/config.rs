use crate::error::FleetsshError;
use crate::job::Job;
use crate::result::{HostResult, StreamHandle};
use crate::transport::{Hop, SSH_AUTH_SOCK_ENV};
use crate::worker_pool;
use russh_keys::key;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Host-key acceptance policy, invoked with the dialed host and the key the
/// server presented. Return `false` to abort the handshake.
pub type HostKeyCallback = Arc<dyn Fn(&str, &key::PublicKey) -> bool + Send + Sync>;

/// One way of proving the configured user to a server. Methods are tried in
/// the order they were added; the first accepted one wins.
#[derive(Clone)]
pub enum AuthMethod {
    PrivateKey(Arc<key::KeyPair>),
    Password(String),
    /// Offer the identities held by the agent behind `SSH_AUTH_SOCK`.
    Agent,
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::PrivateKey(_) => f.write_str("PrivateKey(..)"),
            AuthMethod::Password(_) => f.write_str("Password(***)"),
            AuthMethod::Agent => f.write_str("Agent"),
        }
    }
}

/// Authentication and transport parameters for dialing one endpoint.
#[derive(Clone)]
pub struct SshClientConfig {
    /// Username to authenticate as.
    pub user: String,

    /// Remote SSH port (default: 22).
    pub port: u16,

    /// Ordered auth methods.
    pub auth: Vec<AuthMethod>,

    /// Host-key policy (default: accept any key).
    pub host_key_callback: HostKeyCallback,

    /// Covers the TCP dial and the SSH handshake (default: 30s).
    pub timeout: Duration,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        SshClientConfig {
            user: String::new(),
            port: 22,
            auth: Vec::new(),
            host_key_callback: Arc::new(|_, _| true),
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Debug for SshClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshClientConfig")
            .field("user", &self.user)
            .field("port", &self.port)
            .field("auth", &self.auth)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Config for one fan-out invocation: the target hosts, how to reach and
/// authenticate to them, the work to run, and the execution knobs.
///
/// Populate via the mutators, then call [`Config::run`] for batch results or
/// [`Config::stream`] for live per-host output channels.
#[derive(Debug)]
pub struct Config {
    /// Target hosts. Duplicates are removed; order is insignificant.
    pub hosts: HashSet<String>,

    pub ssh_config: Option<SshClientConfig>,

    /// A single job. Mutually exclusive with `job_stack`.
    pub job: Option<Job>,

    /// An ordered list of jobs, each executed per host. Mutually exclusive
    /// with `job`. An empty list counts as unset.
    pub job_stack: Option<Vec<Job>>,

    /// Number of concurrent workers draining the host queue. The setter
    /// clamps values below 1; the default of 0 fails pre-flight validation.
    pub worker_pool: usize,

    /// Connect to target hosts through this bastion when set.
    pub bastion_host: Option<String>,

    /// SSH config for the bastion itself. Falls back to `ssh_config` when
    /// unset.
    pub bastion_host_ssh_config: Option<SshClientConfig>,

    /// Seconds of output inactivity after which a streaming host is flagged
    /// slow. 0 disables slow detection.
    pub slow_timeout: u64,

    /// Reserved: flagged-slow hosts are never cancelled by the core.
    pub cancel_slow_hosts: bool,

    stop: watch::Sender<bool>,
}

impl Config {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Config {
            hosts: HashSet::new(),
            ssh_config: None,
            job: None,
            job_stack: None,
            worker_pool: 0,
            bastion_host: None,
            bastion_host_ssh_config: None,
            slow_timeout: 0,
            cancel_slow_hosts: false,
            stop,
        }
    }

    /// Adds hosts to the target set, deduplicating as it goes.
    pub fn set_hosts<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.hosts.extend(hosts.into_iter().map(Into::into));
    }

    pub fn set_bastion_host(&mut self, host: impl Into<String>) {
        self.bastion_host = Some(host.into());
    }

    pub fn set_bastion_host_config(&mut self, config: SshClientConfig) {
        self.bastion_host_ssh_config = Some(config);
    }

    pub fn set_ssh_config(&mut self, config: SshClientConfig) {
        self.ssh_config = Some(config);
    }

    /// Overrides the host-key policy on the SSH config, initializing the
    /// config if none was set yet.
    pub fn set_ssh_host_key_callback<F>(&mut self, callback: F)
    where
        F: Fn(&str, &key::PublicKey) -> bool + Send + Sync + 'static,
    {
        self.ssh_config
            .get_or_insert_with(SshClientConfig::default)
            .host_key_callback = Arc::new(callback);
    }

    pub fn set_job(&mut self, job: Job) {
        self.job = Some(job);
    }

    /// Sets the worker count; values below 1 are clamped to 1.
    pub fn set_worker_pool(&mut self, workers: usize) {
        self.worker_pool = workers.max(1);
    }

    /// Parses the private key file (tilde-expanded) and appends a public-key
    /// auth method.
    pub fn set_private_key_auth(
        &mut self,
        key_path: &str,
        passphrase: Option<&str>,
    ) -> Result<(), FleetsshError> {
        let path = expand_tilde(key_path);
        let key_pair = russh_keys::load_secret_key(&path, passphrase).map_err(|err| {
            FleetsshError::AuthSetup(format!(
                "unable to parse private key {}: {}",
                path.display(),
                err
            ))
        })?;

        self.ssh_config
            .get_or_insert_with(SshClientConfig::default)
            .auth
            .push(AuthMethod::PrivateKey(Arc::new(key_pair)));
        Ok(())
    }

    /// Sets the user and appends a password auth method.
    pub fn set_password_auth(&mut self, user: impl Into<String>, password: impl Into<String>) {
        let ssh = self.ssh_config.get_or_insert_with(SshClientConfig::default);
        ssh.user = user.into();
        ssh.auth.push(AuthMethod::Password(password.into()));
    }

    /// Appends an agent auth method after verifying that `SSH_AUTH_SOCK`
    /// names a connectable unix socket. Identities are requested from the
    /// agent again for each dial.
    pub fn set_ssh_auth_sock(&mut self) -> Result<(), FleetsshError> {
        let sock = std::env::var(SSH_AUTH_SOCK_ENV).map_err(|_| {
            FleetsshError::AuthSetup(format!("{SSH_AUTH_SOCK_ENV} is not set"))
        })?;

        std::os::unix::net::UnixStream::connect(&sock).map_err(|err| {
            FleetsshError::AuthSetup(format!("could not reach SSH agent at {sock}: {err}"))
        })?;

        self.ssh_config
            .get_or_insert_with(SshClientConfig::default)
            .auth
            .push(AuthMethod::Agent);
        Ok(())
    }

    pub fn set_slow_timeout(&mut self, seconds: u64) {
        self.slow_timeout = seconds;
    }

    /// Reserved knob; the core flags slow hosts but never cancels them.
    pub fn auto_cancel_slow_hosts(&mut self) {
        self.cancel_slow_hosts = true;
    }

    /// Pre-flight validation. Every missing item is reported together.
    pub fn check_sanity(&self) -> Result<(), FleetsshError> {
        let mut missing = Vec::new();
        if self.hosts.is_empty() {
            missing.push("Hosts");
        }
        if !self.has_jobs() {
            missing.push("Jobs");
        }
        if self.ssh_config.is_none() {
            missing.push("SSHConfig");
        }
        if self.worker_pool == 0 {
            missing.push("WorkerPool");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(FleetsshError::InvalidConfig { missing })
        }
    }

    /// Executes the config in batch mode, returning one result per
    /// (host, job) pair once every host has finished.
    pub async fn run(&self) -> Result<Vec<HostResult>, FleetsshError> {
        worker_pool::run_batch(self).await
    }

    /// Executes the config in stream mode. Returns as soon as the work is
    /// launched; one [`HostResult`] envelope per (host, job) pair arrives on
    /// `delivery` carrying that pair's output channels (or its error).
    pub async fn stream(
        &self,
        delivery: mpsc::Sender<HostResult>,
    ) -> Result<StreamHandle, FleetsshError> {
        worker_pool::run_stream(self, delivery).await
    }

    /// Terminates every active streaming session launched from this config.
    pub fn stop_all_sessions(&self) {
        debug!(target: "Config::stop_all_sessions", "Stop signal raised");
        let _ = self.stop.send(true);
    }

    /// Arity check run at both execution entry points.
    pub(crate) fn check_jobs(&self) -> Result<(), FleetsshError> {
        let stack_set = self.job_stack.as_ref().is_some_and(|stack| !stack.is_empty());
        match (self.job.is_some(), stack_set) {
            (true, true) => Err(FleetsshError::JobConflict),
            (false, false) => Err(FleetsshError::NoJobsSet),
            _ => Ok(()),
        }
    }

    fn has_jobs(&self) -> bool {
        self.job.is_some() || self.job_stack.as_ref().is_some_and(|stack| !stack.is_empty())
    }

    /// The jobs to run per host, in execution order.
    pub(crate) fn job_list(&self) -> Vec<Job> {
        if let Some(job) = &self.job {
            vec![job.clone()]
        } else {
            self.job_stack.clone().unwrap_or_default()
        }
    }

    pub(crate) fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Snapshot of everything one (host, job) execution needs, detached from
    /// the Config so workers never touch it concurrently.
    pub(crate) fn exec_context(&self) -> Result<ExecContext, FleetsshError> {
        let ssh = self
            .ssh_config
            .clone()
            .ok_or(FleetsshError::InvalidConfig {
                missing: vec!["SSHConfig"],
            })?;

        let route = match &self.bastion_host {
            Some(bastion) => {
                let hop_config = self
                    .bastion_host_ssh_config
                    .clone()
                    .unwrap_or_else(|| ssh.clone());
                let port = hop_config.port;
                vec![Hop::new(bastion.clone(), port, hop_config)]
            }
            None => Vec::new(),
        };

        Ok(ExecContext {
            ssh,
            route,
            slow_timeout: self.slow_timeout,
            stop: self.stop_signal(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only execution view shared by all workers of one invocation.
#[derive(Debug, Clone)]
pub(crate) struct ExecContext {
    pub ssh: SshClientConfig,
    pub route: Vec<Hop>,
    pub slow_timeout: u64,
    pub stop: watch::Receiver<bool>,
}

fn expand_tilde(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_config_defaults() {
        let config = Config::new();
        assert!(config.hosts.is_empty());
        assert!(config.ssh_config.is_none());
        assert!(config.job.is_none());
        assert!(config.job_stack.is_none());
        assert_eq!(config.worker_pool, 0);
        assert_eq!(config.slow_timeout, 0);
        assert!(!config.cancel_slow_hosts);
    }

    #[test]
    fn set_hosts_dedupes() {
        let mut config = Config::new();
        config.set_hosts(["host1", "host2", "host1"]);
        config.set_hosts(["host2", "host3"]);
        assert_eq!(config.hosts.len(), 3);
    }

    #[test]
    fn worker_pool_clamped_to_one() {
        let mut config = Config::new();
        config.set_worker_pool(0);
        assert_eq!(config.worker_pool, 1);
        config.set_worker_pool(10);
        assert_eq!(config.worker_pool, 10);
    }

    #[test]
    fn check_sanity_names_every_missing_item() {
        let config = Config::new();
        match config.check_sanity() {
            Err(FleetsshError::InvalidConfig { missing }) => {
                assert_eq!(missing, vec!["Hosts", "Jobs", "SSHConfig", "WorkerPool"]);
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }
    }

    #[test]
    fn check_sanity_passes_on_complete_config() {
        let mut config = Config::new();
        config.set_hosts(["localhost"]);
        config.set_job(Job::new("uptime"));
        config.set_ssh_config(SshClientConfig::default());
        config.set_worker_pool(5);
        assert!(config.check_sanity().is_ok());
    }

    #[test]
    fn job_arity_conflict() {
        let mut config = Config::new();
        config.set_job(Job::new("echo 1"));
        config.job_stack = Some(vec![Job::new("echo 2")]);
        assert!(matches!(
            config.check_jobs(),
            Err(FleetsshError::JobConflict)
        ));
    }

    #[test]
    fn job_arity_none_set() {
        let config = Config::new();
        assert!(matches!(config.check_jobs(), Err(FleetsshError::NoJobsSet)));
    }

    #[test]
    fn empty_job_stack_counts_as_unset() {
        let mut config = Config::new();
        config.job_stack = Some(Vec::new());
        assert!(matches!(config.check_jobs(), Err(FleetsshError::NoJobsSet)));

        config.set_job(Job::new("echo 1"));
        assert!(config.check_jobs().is_ok());
    }

    #[test]
    fn job_list_prefers_single_job() {
        let mut config = Config::new();
        config.set_job(Job::new("echo solo"));
        assert_eq!(config.job_list().len(), 1);

        let mut config = Config::new();
        config.job_stack = Some(vec![Job::new("echo 1"), Job::new("echo 2")]);
        assert_eq!(config.job_list().len(), 2);
    }

    #[test]
    fn password_auth_sets_user_and_method() {
        let mut config = Config::new();
        config.set_password_auth("u01", "secret");

        let ssh = config.ssh_config.as_ref().unwrap();
        assert_eq!(ssh.user, "u01");
        assert!(matches!(ssh.auth[..], [AuthMethod::Password(_)]));
    }

    #[test]
    fn private_key_auth_rejects_missing_file() {
        let mut config = Config::new();
        let err = config
            .set_private_key_auth("/nonexistent/id_ed25519", None)
            .unwrap_err();
        assert!(matches!(err, FleetsshError::AuthSetup(_)));
        assert!(config.ssh_config.is_none());
    }

    #[test]
    fn auth_sock_requires_reachable_agent() {
        std::env::set_var(SSH_AUTH_SOCK_ENV, "/nonexistent/fleetssh-agent.sock");
        let mut config = Config::new();
        let err = config.set_ssh_auth_sock().unwrap_err();
        assert!(matches!(err, FleetsshError::AuthSetup(_)));
    }

    #[test]
    fn bastion_route_falls_back_to_ssh_config() {
        let mut config = Config::new();
        let mut ssh = SshClientConfig::default();
        ssh.user = String::from("u01");
        config.set_ssh_config(ssh);
        config.set_bastion_host("bastion.internal");

        let context = config.exec_context().unwrap();
        assert_eq!(context.route.len(), 1);
        assert_eq!(context.route[0].host, "bastion.internal");
        assert_eq!(context.route[0].config.user, "u01");
        assert_eq!(context.route[0].network, "tcp");
    }

    #[test]
    fn no_bastion_means_empty_route() {
        let mut config = Config::new();
        config.set_ssh_config(SshClientConfig::default());
        assert!(config.exec_context().unwrap().route.is_empty());
    }

    #[test]
    fn stop_signal_observed_by_subscribers() {
        let config = Config::new();
        let rx = config.stop_signal();
        assert!(!*rx.borrow());
        config.stop_all_sessions();
        assert!(*rx.borrow());
    }
}
