use crate::error::FleetsshError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Name of the temporary file the script is staged as on the remote host.
/// The file is written to the session's working directory, made executable,
/// run, and removed. A failure between the write and the removal leaves the
/// file in place.
const REMOTE_SCRIPT_STEM: &str = "massh-script-tmp";

/// Interpreter family of a [`Script`], derived from the local file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    Shell,
    Python,
}

impl ScriptKind {
    fn suffix(self) -> &'static str {
        match self {
            ScriptKind::Shell => "sh",
            ScriptKind::Python => "py",
        }
    }
}

/// A local script file bound to an interpreter, ready to be shipped to a
/// remote host over the session's stdin.
///
/// Only `.sh` and `.py` files are accepted, and the first byte of the file
/// must be the interpreter-directive marker (`#`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    kind: ScriptKind,
    bytes: Vec<u8>,
    args: String,
}

impl Script {
    /// Reads a script file and binds it to the interpreter its suffix names.
    ///
    /// Each element in `args` should contain one argument's key/value, for
    /// example `"--some-arg value"` or `"--some-arg=value"`; elements are
    /// joined with single spaces.
    pub fn from_file(path: impl AsRef<Path>, args: &[&str]) -> Result<Self, FleetsshError> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = fs::read(path)?;

        // Shebang line must be present, an empty file has none either.
        if bytes.first() != Some(&b'#') {
            return Err(FleetsshError::MissingShebang(file_name));
        }

        let kind = if file_name.ends_with(".sh") {
            ScriptKind::Shell
        } else if file_name.ends_with(".py") {
            ScriptKind::Python
        } else {
            return Err(FleetsshError::UnsupportedScript(file_name));
        };

        debug!(target: "Script::from_file", "Loaded {} byte {:?} script from {}", bytes.len(), kind, path.display());

        Ok(Script {
            kind,
            bytes,
            args: args.join(" "),
        })
    }

    /// The remote command line that stages, runs, and removes the script.
    pub(crate) fn command_string(&self) -> String {
        let suffix = self.kind.suffix();
        format!(
            "cat > {stem}.{suffix} && chmod +x ./{stem}.{suffix} && ./{stem}.{suffix} {args} && rm ./{stem}.{suffix}",
            stem = REMOTE_SCRIPT_STEM,
            suffix = suffix,
            args = self.args,
        )
    }

    /// Raw file contents, fed to the remote session's stdin.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn args(&self) -> &str {
        &self.args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn script_file(suffix: &str, contents: &[u8]) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .unwrap();
        file.write_all(contents).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn shell_script_command_string() {
        let file = script_file(".sh", b"#!/bin/bash\necho hello\n");
        let script = Script::from_file(file.path(), &["--first one", "--second=two"]).unwrap();

        assert_eq!(script.kind(), ScriptKind::Shell);
        assert_eq!(
            script.command_string(),
            "cat > massh-script-tmp.sh && chmod +x ./massh-script-tmp.sh && \
             ./massh-script-tmp.sh --first one --second=two && rm ./massh-script-tmp.sh"
        );
    }

    #[test]
    fn python_script_command_string() {
        let file = script_file(".py", b"#!/usr/bin/env python3\nprint('hi')\n");
        let script = Script::from_file(file.path(), &[]).unwrap();

        assert_eq!(script.kind(), ScriptKind::Python);
        assert_eq!(
            script.command_string(),
            "cat > massh-script-tmp.py && chmod +x ./massh-script-tmp.py && \
             ./massh-script-tmp.py  && rm ./massh-script-tmp.py"
        );
    }

    #[test]
    fn missing_shebang_rejected() {
        let file = script_file(".sh", b"echo no shebang\n");
        let err = Script::from_file(file.path(), &[]).unwrap_err();
        assert!(matches!(err, FleetsshError::MissingShebang(_)));
    }

    #[test]
    fn empty_file_rejected() {
        let file = script_file(".sh", b"");
        let err = Script::from_file(file.path(), &[]).unwrap_err();
        assert!(matches!(err, FleetsshError::MissingShebang(_)));
    }

    #[test]
    fn unknown_suffix_rejected() {
        let file = script_file(".rb", b"#!/usr/bin/env ruby\n");
        let err = Script::from_file(file.path(), &[]).unwrap_err();
        assert!(matches!(err, FleetsshError::UnsupportedScript(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Script::from_file("/nonexistent/script.sh", &[]).unwrap_err();
        assert!(matches!(err, FleetsshError::Io(_)));
    }

    #[test]
    fn script_bytes_preserved() {
        let contents = b"#!/bin/sh\nuptime\n";
        let file = script_file(".sh", contents);
        let script = Script::from_file(file.path(), &[]).unwrap();
        assert_eq!(script.bytes(), contents);
    }
}
