//! Hand control to the long-running process without staying around as a
//! parent, so termination signals reach it directly.
use anyhow::{anyhow, Error, Result};
use std::ffi::OsString;
use std::process::Command;
use tracing::info;

/// Program plus arguments to run once startup has finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handoff {
    program: OsString,
    args: Vec<OsString>,
}

impl Handoff {
    /// Build from an argv-style list. The first element is the program.
    pub fn from_argv<I, S>(argv: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut argv = argv.into_iter().map(Into::into);
        let program = argv
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow!("no command given to hand off to"))?;
        Ok(Self {
            program,
            args: argv.collect(),
        })
    }

    pub fn program(&self) -> &OsString {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Replace the current process image. Only returns on failure.
    #[cfg(unix)]
    pub fn exec(&self) -> Error {
        use std::os::unix::process::CommandExt;

        info!(program = ?self.program, args = ?self.args, "handing off");
        let err = self.command().exec();
        anyhow!("failed to exec {:?}: {}", self.program, err)
    }

    /// Without `exec`, run the child in the foreground and exit with its
    /// status. Only returns on failure to start it.
    #[cfg(not(unix))]
    pub fn exec(&self) -> Error {
        info!(program = ?self.program, args = ?self.args, "handing off (spawn and wait)");
        match self.command().status() {
            Ok(status) => std::process::exit(status.code().unwrap_or(1)),
            Err(err) => anyhow!("failed to start {:?}: {}", self.program, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_program_and_args() {
        let handoff = Handoff::from_argv(["gunicorn", "app.wsgi", "--bind", "0.0.0.0:8000"]).unwrap();
        assert_eq!(handoff.program(), "gunicorn");
        assert_eq!(handoff.args().len(), 3);
    }

    #[test]
    fn empty_argv_is_rejected() {
        assert!(Handoff::from_argv(Vec::<String>::new()).is_err());
        assert!(Handoff::from_argv([""]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn exec_of_missing_program_returns_error() {
        let handoff = Handoff::from_argv(["/nonexistent/definitely-not-here"]).unwrap();
        let err = handoff.exec();
        assert!(err.to_string().contains("definitely-not-here"));
    }
}
