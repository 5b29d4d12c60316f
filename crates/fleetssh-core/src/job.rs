use crate::error::FleetsshError;
use crate::script::Script;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single unit of remote work: either a literal command line, or a local
/// script file shipped to the host and executed there.
///
/// If `script` is set it supersedes `command`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub command: String,
    pub script: Option<Script>,
}

/// The materialized form of a [`Job`] for one session: the exact command
/// string handed to the remote shell, and the bytes (if any) the session
/// must feed to the command's stdin.
#[derive(Debug, Clone)]
pub(crate) struct PreparedJob {
    pub command: String,
    pub stdin: Option<Vec<u8>>,
}

impl Job {
    pub fn new(command: impl Into<String>) -> Self {
        Job {
            command: command.into(),
            script: None,
        }
    }

    /// Sets the command executed over SSH on all hosts.
    pub fn set_command(&mut self, command: impl Into<String>) {
        self.command = command.into();
    }

    /// Reads a local script file into the job. The script supersedes any
    /// command set on the job.
    pub fn set_local_script(
        &mut self,
        path: impl AsRef<Path>,
        args: &[&str],
    ) -> Result<(), FleetsshError> {
        self.script = Some(Script::from_file(path, args)?);
        Ok(())
    }

    pub(crate) fn prepare(&self) -> PreparedJob {
        match &self.script {
            Some(script) => PreparedJob {
                command: script.command_string(),
                stdin: Some(script.bytes().to_vec()),
            },
            None => PreparedJob {
                command: self.command.clone(),
                stdin: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn plain_command_prepares_verbatim() {
        let job = Job::new("echo Hello, World");
        let prepared = job.prepare();
        assert_eq!(prepared.command, "echo Hello, World");
        assert!(prepared.stdin.is_none());
    }

    #[test]
    fn script_supersedes_command() {
        let mut file = tempfile::Builder::new().suffix(".sh").tempfile().unwrap();
        file.write_all(b"#!/bin/sh\nhostname\n").unwrap();
        file.flush().unwrap();

        let mut job = Job::new("echo ignored");
        job.set_local_script(file.path(), &[]).unwrap();

        let prepared = job.prepare();
        assert!(prepared.command.starts_with("cat > massh-script-tmp.sh"));
        assert_eq!(prepared.stdin.as_deref(), Some(&b"#!/bin/sh\nhostname\n"[..]));
    }

    #[test]
    fn bad_script_leaves_job_untouched() {
        let mut job = Job::new("uptime");
        assert!(job.set_local_script("/nonexistent/script.sh", &[]).is_err());
        assert!(job.script.is_none());
        assert_eq!(job.prepare().command, "uptime");
    }

    #[test]
    fn jobs_round_trip_through_serde() {
        let jobs = vec![Job::new("echo 1"), Job::new("echo 2")];
        let encoded = serde_json::to_string(&jobs).unwrap();
        let decoded: Vec<Job> = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, jobs);
    }
}
