//! Invocation of external command line tools
//!
//! Steps that shell out build a `ToolCommand` and hand it to a `ToolRunner`.
//! The pipeline uses `SystemRunner`; tests substitute a runner that fakes the
//! tool outputs.

use std::{
    ffi::OsString,
    fmt, fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use anyhow::Context;

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    program: String,
    args: Vec<OsString>,
    log: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log: None,
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, s: S) -> Self {
        self.args.push(s.into());
        self
    }

    pub fn args<I, S>(mut self, it: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(it.into_iter().map(|s| s.into()));
        self
    }

    /// Capture stdout and stderr of the tool to this file
    pub fn log_to<P: AsRef<Path>>(mut self, p: P) -> Self {
        self.log = Some(p.as_ref().to_owned());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Value following the flag `name` (e.g., `--output-directory`)
    pub fn flag_value(&self, name: &str) -> Option<&OsString> {
        self.args
            .iter()
            .position(|a| a == name)
            .and_then(|i| self.args.get(i + 1))
    }

    pub fn log(&self) -> Option<&Path> {
        self.log.as_deref()
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for a in self.args.iter() {
            write!(f, " {}", a.to_string_lossy())?;
        }
        Ok(())
    }
}

pub trait ToolRunner: Sync {
    fn run(&self, cmd: &ToolCommand) -> anyhow::Result<()>;
}

/// Runs tools as child processes, failing on non-zero exit status
pub struct SystemRunner;

impl ToolRunner for SystemRunner {
    fn run(&self, cmd: &ToolCommand) -> anyhow::Result<()> {
        debug!("Running {}", cmd);
        let mut c = Command::new(cmd.program());
        c.args(cmd.get_args()).stdin(Stdio::null());
        if let Some(p) = cmd.log() {
            let f = fs::File::create(p)
                .with_context(|| format!("Could not create log file {}", p.display()))?;
            let f2 = f.try_clone()?;
            c.stdout(f).stderr(f2);
        }
        let status = c
            .status()
            .with_context(|| format!("Could not execute {}", cmd.program()))?;
        if status.success() {
            Ok(())
        } else {
            let log_msg = cmd
                .log()
                .map(|p| format!(" (see {})", p.display()))
                .unwrap_or_default();
            Err(anyhow!("{} failed with {}{}", cmd.program(), status, log_msg))
        }
    }
}
