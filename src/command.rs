use crate::{Config, Error, Result};
use std::{fmt, path::PathBuf, process::Stdio};

/// a command line split in its program and arguments, kept in a
/// human readable format so it can be displayed or traced.
///
/// No shell is involved: the raw command line is split on runs of
/// whitespace and the tokens are handed to the operating system as they
/// are. Quotes and escapes have no special meaning.
///
/// a Command is not active unless it has been started
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    raw: String,
    current_working_directory: Option<PathBuf>,
    program: String,
    arguments: Vec<String>,
}

impl Command {
    /// tokenize the given command line
    ///
    /// ```
    /// # use koproc::Command;
    /// let cmd = Command::parse("git  log -n 1")?;
    /// assert_eq!(cmd.program(), "git");
    /// assert_eq!(cmd.arguments(), &["log", "-n", "1"]);
    /// # Ok::<(), koproc::Error>(())
    /// ```
    ///
    /// # Error
    ///
    /// fails with [`Error::EmptyCommand`] if there is not a single token.
    ///
    /// [`Error::EmptyCommand`]: ./enum.Error.html#variant.EmptyCommand
    pub fn parse<S: AsRef<str>>(raw: S) -> Result<Self> {
        let raw = raw.as_ref();
        let mut tokens = raw.split_whitespace().map(str::to_owned);
        let program = tokens.next().ok_or(Error::EmptyCommand)?;

        Ok(Command {
            raw: raw.to_owned(),
            current_working_directory: None,
            program,
            arguments: tokens.collect(),
        })
    }

    /// set the working directory: the directory in which the command
    /// will be executed.
    #[inline]
    pub fn current_working_directory(&mut self, cwd: PathBuf) -> &mut Self {
        self.current_working_directory = Some(cwd);
        self
    }

    /// the command line as it was given
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    #[inline]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[inline]
    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }

    pub(crate) fn configure(&mut self, config: &Config) -> &mut Self {
        if let Some(cwd) = config.working_directory() {
            self.current_working_directory(cwd.clone());
        }
        self
    }

    /// standard input is closed, standard output and standard error are
    /// always piped so they can be captured.
    pub(crate) fn process_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);

        if let Some(current_working_directory) = &self.current_working_directory {
            cmd.current_dir(current_working_directory);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .args(self.arguments.iter());

        cmd
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if let Some(cwd) = &self.current_working_directory {
            write!(f, "CWD={} ", cwd.display())?;
        }
        self.program.fmt(f)?;
        for argument in self.arguments.iter() {
            write!(f, " {}", argument)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_on_whitespace_runs() -> Result<()> {
        let cmd = Command::parse("  echo \t'hello   world'\n")?;

        assert_eq!(cmd.program(), "echo");
        assert_eq!(cmd.arguments(), &["'hello", "world'"]);
        assert_eq!(cmd.raw(), "  echo \t'hello   world'\n");
        Ok(())
    }

    #[test]
    fn empty_command_line() {
        match Command::parse(" \t ") {
            Err(Error::EmptyCommand) => (),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn display_with_working_directory() -> Result<()> {
        let mut cmd = Command::parse("ls -la")?;
        assert_eq!(cmd.to_string(), "ls -la");

        cmd.configure(&Config::default().with_working_directory("/tmp"));
        assert_eq!(cmd.to_string(), "CWD=/tmp ls -la");
        Ok(())
    }
}
