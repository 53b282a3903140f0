use crate::{
    capture::Capture, process::ProcessHandle, CallResult, Command, Config, ProcessCall, Timeout,
};
use tracing::{debug, warn};

/// start the command and return right away
///
/// This never fails: if the command cannot be started the returned call
/// stands for a process that exited with code `1`, and its result
/// carries the reason.
///
/// ```
/// # use koproc::{start_process, Config};
/// let call = start_process("no-such-program --version", &Config::process_defaults());
///
/// assert!(call.result().has_error());
/// ```
pub fn start_process<S: AsRef<str>>(command: S, config: &Config) -> ProcessCall {
    let raw = command.as_ref();
    let config = config.clone();
    let capture = Capture::shared(config.encoding());

    let spawned = Command::parse(raw).and_then(|mut command| {
        command.configure(&config);
        ProcessHandle::spawn(&command, &capture)
    });
    let handle = match spawned {
        Ok(handle) => {
            debug!(pid = handle.pid(), command = raw, ?config, "process started");
            handle
        }
        Err(error) => {
            warn!(command = raw, %error, "cannot start process");
            ProcessHandle::failed(error)
        }
    };

    ProcessCall::new(raw.to_owned(), handle, capture, config)
}

/// start the command and wait for its result, see [`start_process`] and
/// [`ProcessCall::result`]
///
/// [`start_process`]: ./fn.start_process.html
/// [`ProcessCall::result`]: ./struct.ProcessCall.html#method.result
pub fn start_command<S: AsRef<str>>(command: S, config: &Config) -> CallResult {
    start_process(command, config).result().clone()
}

/// the default settings of the two entry points, owned by the caller
///
/// ```
/// # use koproc::{Launcher, Timeout};
/// let launcher = Launcher::default().with_command_timeout(Timeout::seconds(30));
///
/// assert_eq!(launcher.command_config().timeout(), Timeout::seconds(30));
/// assert_eq!(launcher.process_config().timeout(), Timeout::seconds(3600));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    process: Config,
    command: Config,
}

impl Launcher {
    pub fn new(process: Config, command: Config) -> Self {
        Launcher { process, command }
    }

    /// settings used by [`start_process`](#method.start_process)
    #[inline]
    pub fn process_config(&self) -> &Config {
        &self.process
    }

    /// settings used by [`start_command`](#method.start_command)
    #[inline]
    pub fn command_config(&self) -> &Config {
        &self.command
    }

    pub fn with_process_config(mut self, config: Config) -> Self {
        self.process = config;
        self
    }

    pub fn with_command_config(mut self, config: Config) -> Self {
        self.command = config;
        self
    }

    pub fn with_process_timeout(mut self, timeout: Timeout) -> Self {
        self.process = self.process.with_timeout(timeout);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Timeout) -> Self {
        self.command = self.command.with_timeout(timeout);
        self
    }

    pub fn start_process<S: AsRef<str>>(&self, command: S) -> ProcessCall {
        start_process(command, &self.process)
    }

    pub fn start_command<S: AsRef<str>>(&self, command: S) -> CallResult {
        start_command(command, &self.command)
    }
}

impl Default for Launcher {
    fn default() -> Self {
        Launcher::new(Config::process_defaults(), Config::command_defaults())
    }
}
