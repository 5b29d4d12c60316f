use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FleetsshError {
    #[error("bad config, the following config items are not correct: {missing:?}")]
    InvalidConfig { missing: Vec<&'static str> },

    #[error("only one of job or job stack must be present in config")]
    JobConflict,

    #[error("no jobs are set in config")]
    NoJobsSet,

    #[error("auth setup failed: {0}")]
    AuthSetup(String),

    #[error("unable to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("hop {index} ({host}) failed in bastion route: {reason}")]
    Hop {
        index: usize,
        host: String,
        reason: String,
    },

    #[error("failed to create session on {host}: {reason}")]
    Session { host: String, reason: String },

    #[error("could not start job on {host}: {reason}")]
    Start { host: String, reason: String },

    #[error("remote command exited with status {status} on {host}")]
    CommandFailed { host: String, status: u32 },

    #[error("could not read content to stream channel on {host}: {reason}")]
    Read { host: String, reason: String },

    #[error("shebang line not present in file {0}")]
    MissingShebang(String),

    #[error("script file {0} not supported")]
    UnsupportedScript(String),

    #[error("unsupported hop network {0:?}, only \"tcp\" is available")]
    UnsupportedNetwork(String),

    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// Context helpers, used on the per-host paths where the bare source error
// loses the host it belongs to.
impl FleetsshError {
    pub fn connect(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connect {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn hop(index: usize, host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Hop {
            index,
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn session(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Session {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn start(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Start {
            host: host.into(),
            reason: reason.to_string(),
        }
    }

    pub fn read(host: impl Into<String>, reason: impl ToString) -> Self {
        Self::Read {
            host: host.into(),
            reason: reason.to_string(),
        }
    }
}
