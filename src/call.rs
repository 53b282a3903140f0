use crate::{
    capture::{lock, Capture, Channel, SharedCapture},
    process::{ProcessHandle, FAILED_CODE, STREAM_FLUSH_GRACE, TIMEOUT_FLUSH_GRACE},
    CallResult, Config, Pid, Timeout,
};
use chrono::{DateTime, Local};
use std::{
    fmt,
    sync::{Arc, OnceLock},
};
use tracing::{debug, trace, warn};

/// a started process whose output is being captured
///
/// created by [`start_process`]. The output can be followed while the
/// process runs with [`read_available_out`] and [`read_available_err`],
/// the final [`CallResult`] is computed once by [`result`].
///
/// A `ProcessCall` owns its process: it is terminated on [`close`] or
/// when the `ProcessCall` is dropped, whichever comes first.
///
/// Querying the call ([`pid`], [`is_alive`], the live reads) never waits,
/// even while another thread is blocked in [`result`].
///
/// # Panics
///
/// waiting for a process, or closing or dropping the call of a process
/// that is still running, blocks the current thread: doing so from within
/// an asynchronous runtime panics. Starting a process never does.
///
/// [`pid`]: #method.pid
/// [`is_alive`]: #method.is_alive
///
/// [`start_process`]: ./fn.start_process.html
/// [`read_available_out`]: #method.read_available_out
/// [`read_available_err`]: #method.read_available_err
/// [`result`]: #method.result
/// [`close`]: #method.close
/// [`CallResult`]: ./struct.CallResult.html
pub struct ProcessCall {
    command: String,
    started_at: DateTime<Local>,
    config: Config,
    pid: Pid,
    handle: ProcessHandle,
    capture: SharedCapture,
    result: OnceLock<CallResult>,
}

impl ProcessCall {
    pub(crate) fn new(
        command: String,
        handle: ProcessHandle,
        capture: SharedCapture,
        config: Config,
    ) -> Self {
        ProcessCall {
            command,
            started_at: Local::now(),
            config,
            pid: handle.pid(),
            handle,
            capture,
            result: OnceLock::new(),
        }
    }

    /// a call for a process that is not run, but reported as having
    /// terminated with the given exit code and no output
    ///
    /// ```
    /// # use koproc::{Config, ProcessCall};
    /// let call = ProcessCall::finished("make --dry-run", 0, Config::default());
    /// assert!(call.result().is_success());
    /// assert_eq!(call.result().pid(), -1);
    /// ```
    pub fn finished<S: Into<String>>(command: S, code: i32, config: Config) -> Self {
        let capture = Capture::shared(config.encoding());
        ProcessCall::new(
            command.into(),
            ProcessHandle::finished(code),
            capture,
            config,
        )
    }

    /// the command line as it was given
    #[inline]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// when the call was created, right after the process was spawned
    #[inline]
    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// the OS process identifier, `-1` if the process was never started
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// `true` until the process is seen terminated
    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }

    /// `true` once [`close`](#method.close) ran, the output is final then
    pub fn is_closed(&self) -> bool {
        lock(&self.capture).is_closed()
    }

    /// standard output produced since the previous call
    ///
    /// never blocks: the output is pulled in the background as the
    /// process writes it, this only takes what arrived so far. Returns
    /// nothing new once the call is closed.
    pub fn read_available_out(&self) -> String {
        self.read_available(Channel::Out)
    }

    /// standard error output produced since the previous call, see
    /// [`read_available_out`](#method.read_available_out)
    pub fn read_available_err(&self) -> String {
        self.read_available(Channel::Err)
    }

    pub fn read_available(&self, channel: Channel) -> String {
        lock(&self.capture).take_live(channel)
    }

    /// final standard output, available once the call is closed
    pub fn final_out(&self) -> Option<String> {
        lock(&self.capture)
            .finalized(Channel::Out)
            .map(str::to_owned)
    }

    /// final standard error output, available once the call is closed
    pub fn final_err(&self) -> Option<String> {
        lock(&self.capture)
            .finalized(Channel::Err)
            .map(str::to_owned)
    }

    /// the result of the call, waiting for it with the configured timeout
    /// the first time.
    ///
    /// Only the first caller waits for the process, concurrent callers
    /// block until it is done. Every caller gets the same result.
    pub fn result(&self) -> &CallResult {
        self.result
            .get_or_init(|| self.wait_result(self.config.timeout()))
    }

    /// block until the process terminates or `timeout` elapses, collect
    /// the output and close the call.
    ///
    /// Errors are never returned but captured in the [`CallResult`]: the
    /// process did not start, did not terminate in time, was killed by a
    /// signal... The exit code is the one of the process when it is known,
    /// `1` otherwise.
    ///
    /// Unlike [`result`] nothing is memoized, waiting again on a closed call
    /// reports the state of the process at that time.
    ///
    /// [`CallResult`]: ./struct.CallResult.html
    /// [`result`]: #method.result
    pub fn wait_result(&self, timeout: Timeout) -> CallResult {
        let handle = &self.handle;
        let pid = self.pid;

        let waited = handle.wait(timeout);
        handle.flush_streams(if waited.is_ok() {
            STREAM_FLUSH_GRACE
        } else {
            TIMEOUT_FLUSH_GRACE
        });
        let queried = handle.exit_code();

        let (code, error) = match (waited, queried) {
            (Ok(()), Ok(code)) => (code, handle.failure()),
            (Err(error), Ok(code)) => (code, Some(Arc::new(error))),
            (Ok(()), Err(error)) | (Err(error), Err(_)) => (
                handle.last_known_code().unwrap_or(FAILED_CODE),
                Some(Arc::new(error)),
            ),
        };

        self.close();

        let (out, err) = {
            let capture = lock(&self.capture);
            (
                capture.complete_text(Channel::Out),
                capture.complete_text(Channel::Err),
            )
        };
        let result = CallResult::new(self.command.clone(), code, out, err, pid, error);
        debug!(pid, "finished. {}", result);
        result
    }

    /// terminate the process and release its output streams
    ///
    /// the output captured until now is kept and becomes the final
    /// output ([`final_out`], [`final_err`]). Closing again does nothing,
    /// failures to terminate the process are logged and ignored.
    ///
    /// [`final_out`]: #method.final_out
    /// [`final_err`]: #method.final_err
    pub fn close(&self) {
        let first = lock(&self.capture).close();

        if let Err(error) = self.handle.destroy() {
            warn!(pid = self.pid, %error, "cannot terminate process");
        }

        if first {
            debug!(pid = self.pid, command = %self.command, "closed");
        } else {
            trace!(pid = self.pid, "already closed");
        }
    }
}

impl Drop for ProcessCall {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for ProcessCall {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ProcessCall")
            .field("command", &self.command)
            .field("started_at", &self.started_at)
            .field("config", &self.config)
            .field("pid", &self.pid)
            .field("closed", &self.is_closed())
            .finish()
    }
}
