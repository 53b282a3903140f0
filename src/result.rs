use crate::{Error, Pid, Result};
use std::{error::Error as _, fmt, sync::Arc};

const HAS_ERROR: &str = "Command execution result has error";
const UNSUCCESSFUL_CODE: &str = "Command execution exit code is not zero";
const FAILED: &str = "Command execution failed";

/// the outcome of a process call: exit code, captured output, PID and
/// the error that happened while starting or waiting for the process.
///
/// A result is built once, when the [`ProcessCall`] finalizes, and never
/// changes afterwards. It is cheap to clone: the captured error is shared.
///
/// [`ProcessCall`]: ./struct.ProcessCall.html
#[derive(Debug, Clone)]
pub struct CallResult {
    command: String,
    code: i32,
    out: String,
    err: String,
    pid: Pid,
    error: Option<Arc<Error>>,
}

impl CallResult {
    pub(crate) fn new(
        command: String,
        code: i32,
        out: String,
        err: String,
        pid: Pid,
        error: Option<Arc<Error>>,
    ) -> Self {
        CallResult {
            command,
            code,
            out,
            err,
            pid,
            error,
        }
    }

    /// the command line as it was given
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    #[inline]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// everything captured from the standard output
    #[inline]
    pub fn out(&self) -> &str {
        &self.out
    }

    /// everything captured from the standard error output
    #[inline]
    pub fn err(&self) -> &str {
        &self.err
    }

    /// `-1` if the process was never started
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    #[inline]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_deref()
    }

    #[inline]
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    #[inline]
    pub fn has_not_error(&self) -> bool {
        !self.has_error()
    }

    #[inline]
    pub fn has_success_code(&self) -> bool {
        self.code == 0
    }

    #[inline]
    pub fn has_not_success_code(&self) -> bool {
        !self.has_success_code()
    }

    /// exit code is `0` and no error happened
    #[inline]
    pub fn is_success(&self) -> bool {
        self.has_not_error() && self.has_success_code()
    }

    #[inline]
    pub fn is_not_success(&self) -> bool {
        !self.is_success()
    }

    /// fail with [`Error::Failed`] if an error was captured
    ///
    /// [`Error::Failed`]: ./enum.Error.html#variant.Failed
    pub fn ensure_no_error(&self) -> Result<&Self> {
        self.ensure_no_error_with(HAS_ERROR)
    }

    pub fn ensure_no_error_with<S: Into<String>>(&self, message: S) -> Result<&Self> {
        self.ensure(self.has_not_error(), message)
    }

    /// fail with [`Error::Failed`] if the exit code is not `0`
    ///
    /// [`Error::Failed`]: ./enum.Error.html#variant.Failed
    pub fn ensure_success_code(&self) -> Result<&Self> {
        self.ensure_success_code_with(UNSUCCESSFUL_CODE)
    }

    pub fn ensure_success_code_with<S: Into<String>>(&self, message: S) -> Result<&Self> {
        self.ensure(self.has_success_code(), message)
    }

    /// fail with [`Error::Failed`] unless [`is_success`]
    ///
    /// ```
    /// # use koproc::{start_command, Config, Error};
    /// let result = start_command("error", &Config::command_defaults());
    ///
    /// match result.ensure_success() {
    ///     Err(Error::Failed { message, source, .. }) => {
    ///         assert_eq!(message, "Command execution failed");
    ///         assert!(source.is_some());
    ///     }
    ///     other => panic!("unexpected: {:?}", other),
    /// }
    /// ```
    ///
    /// [`Error::Failed`]: ./enum.Error.html#variant.Failed
    /// [`is_success`]: #method.is_success
    pub fn ensure_success(&self) -> Result<&Self> {
        self.ensure_success_with(FAILED)
    }

    pub fn ensure_success_with<S: Into<String>>(&self, message: S) -> Result<&Self> {
        self.ensure(self.is_success(), message)
    }

    fn ensure<S: Into<String>>(&self, ok: bool, message: S) -> Result<&Self> {
        if ok {
            Ok(self)
        } else {
            Err(Error::Failed {
                message: message.into(),
                result: self.to_string(),
                source: self.error.clone(),
            })
        }
    }
}

impl fmt::Display for CallResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[code={}] [pid={}] '{}'\nout='{}'\nerr='{}'\nerror=",
            self.code, self.pid, self.command, self.out, self.err
        )?;
        match &self.error {
            None => f.write_str("none"),
            Some(error) => {
                write!(f, "{}", error)?;
                let mut source = error.source();
                while let Some(cause) = source {
                    write!(f, ": {}", cause)?;
                    source = cause.source();
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io;

    fn result(code: i32, error: Option<Error>) -> CallResult {
        CallResult::new(
            "make all".to_owned(),
            code,
            "built\n".to_owned(),
            String::new(),
            42,
            error.map(Arc::new),
        )
    }

    #[test]
    fn success_truth_table() {
        let cases = [
            (0, false, true),
            (0, true, false),
            (2, false, false),
            (2, true, false),
        ];

        for (code, with_error, success) in cases.iter().copied() {
            let error = if with_error {
                Some(Error::EmptyCommand)
            } else {
                None
            };
            let result = result(code, error);

            assert_eq!(result.is_success(), success, "{}", result);
            assert_eq!(result.is_not_success(), !success, "{}", result);
            assert_eq!(result.has_error(), with_error);
            assert_eq!(result.has_not_error(), !with_error);
            assert_eq!(result.has_success_code(), code == 0);
            assert_eq!(result.has_not_success_code(), code != 0);
        }
    }

    #[test]
    fn ensure_passes_the_result_through() -> Result<()> {
        let result = result(0, None);

        let same = result
            .ensure_no_error()?
            .ensure_success_code()?
            .ensure_success()?;
        assert_eq!(same.out(), "built\n");
        Ok(())
    }

    #[test]
    fn ensure_success_code_ignores_the_error() {
        let result = result(0, Some(Error::EmptyCommand));

        assert!(result.ensure_success_code().is_ok());
        assert!(result.ensure_no_error().is_err());
        assert!(result.ensure_success().is_err());
    }

    #[test]
    fn escalation_keeps_the_captured_error() {
        let result = result(3, Some(Error::StillRunning { pid: 42 }));

        match result.ensure_success_with("build failed") {
            Err(Error::Failed {
                message,
                result: rendered,
                source: Some(source),
            }) => {
                assert_eq!(message, "build failed");
                assert!(rendered.starts_with("[code=3] [pid=42] 'make all'"));
                assert!(matches!(*source, Error::StillRunning { pid: 42 }));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn unsuccessful_code_without_error_has_no_source() {
        let result = result(2, None);

        match result.ensure_success_code() {
            Err(error) => {
                assert!(error.source().is_none());
                assert!(error
                    .to_string()
                    .starts_with("Command execution exit code is not zero. [code=2]"));
            }
            Ok(_) => panic!("exit code 2 should fail"),
        }
    }

    #[test]
    fn display_order() {
        let error = Error::Wait {
            pid: 42,
            source: io::Error::new(io::ErrorKind::Other, "interrupted"),
        };
        let result = CallResult::new(
            "ls".to_owned(),
            1,
            "a".to_owned(),
            "b".to_owned(),
            42,
            Some(Arc::new(error)),
        );

        assert_eq!(
            result.to_string(),
            "[code=1] [pid=42] 'ls'\nout='a'\nerr='b'\nerror=error while waiting for process 42: interrupted"
        );
        assert!(result.to_string().ends_with("interrupted"));
        assert_eq!(
            self::result(0, None).to_string(),
            "[code=0] [pid=42] 'make all'\nout='built\n'\nerr=''\nerror=none"
        );
    }
}
