//! fleetssh-core runs shell work on many remote hosts concurrently over SSH.
//!
//! Populate a [`Config`] with hosts, auth material, and either a single
//! [`Job`] or an ordered job stack, then either:
//!
//! - [`Config::run`] — batch mode: every (host, job) pair runs to
//!   completion and one [`HostResult`] per pair comes back with the
//!   collected stdout bytes; or
//! - [`Config::stream`] — stream mode: one envelope per pair is delivered
//!   while the command runs, carrying per-host stdout/stderr line channels
//!   and a done signal, with slow-host detection and a config-wide stop
//!   switch ([`Config::stop_all_sessions`]).
//!
//! Per-host failures never abort the batch or cancel peers; inspect each
//! record's `error` field.

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod logging;
pub mod result;
pub mod script;
pub mod streamer;
pub mod transport;
pub mod worker_pool;

// Re-export core types
pub use config::{AuthMethod, Config, HostKeyCallback, SshClientConfig};
pub use error::FleetsshError;
pub use job::Job;
pub use logging::init_logging;
pub use result::{HostResult, SlowFlag, StreamHandle};
pub use script::{Script, ScriptKind};
pub use transport::Hop;
