/*!
# process calls

this crate launches external programs, captures their standard output
and standard error output while they run and collects an immutable
[`CallResult`] once they finish or once the wait timed out.

Here we provide an opinionated API where failures are values: starting a
process never fails, a program that cannot be found or a process that
does not finish in time is reported in the [`CallResult`] (exit code
`1` and the [`Error`] that happened). Escalating a failure into an
`Err` is up to the caller, see [`CallResult::ensure_success`].

There are a couple of items to keep in mind when utilising this API:

* as soon as a [`ProcessCall`] is _dropped_ (or _closed_) the associated
  process is terminated;
* the standard output and standard error output are always captured, they
  won't be visible on your terminal;
* the standard input is closed, there is no interaction with the process;
* the command line is split on whitespace, there is no shell involved:
  quotes, pipes or variables have no special meaning.

# run a command

[`start_command`] starts the command and blocks until it finished (or the
timeout of the [`Config`] elapsed).

```
# #[cfg(unix)] {
use koproc::{start_command, Config};

let result = start_command("echo Hello World!", &Config::command_defaults());

assert!(result.is_success());
assert_eq!(result.out(), "Hello World!\n");
# }
```

# follow a running process

[`start_process`] returns the [`ProcessCall`] right away. The output
produced so far can be read while the process runs, the final result is
computed once and shared by every caller.

```
# #[cfg(unix)] {
use koproc::{start_process, Config};

let call = start_process("sleep 0.2", &Config::process_defaults());
# let _ =
call.read_available_out(); // whatever was printed until now

let result = call.result();
println!("spawned command: '{}' (PID: {})", result.command(), result.pid());
# }
```

# a failed launch

```
use koproc::{start_command, Config, Error};

let result = start_command("definitely-not-a-real-binary-xyz", &Config::command_defaults());

assert!(result.is_not_success());
assert_eq!(result.code(), 1);
assert_eq!(result.pid(), -1);
assert!(matches!(result.error(), Some(Error::CannotSpawnCommand { .. })));
assert!(result.ensure_success().is_err());
```

[`CallResult`]: ./struct.CallResult.html
[`CallResult::ensure_success`]: ./struct.CallResult.html#method.ensure_success
[`Error`]: ./enum.Error.html
[`ProcessCall`]: ./struct.ProcessCall.html
[`Config`]: ./struct.Config.html
[`start_command`]: ./fn.start_command.html
[`start_process`]: ./fn.start_process.html
*/

mod call;
mod capture;
mod command;
mod config;
mod launcher;
mod process;
mod result;

pub use self::call::ProcessCall;
pub use self::capture::Channel;
pub use self::command::Command;
pub use self::config::{Config, Timeout, COMMAND_TIMEOUT, PROCESS_TIMEOUT};
pub use self::launcher::{start_command, start_process, Launcher};
pub use self::process::{Pid, FAILED_CODE, SENTINEL_PID};
pub use self::result::CallResult;

use std::{io, sync::Arc};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty command line")]
    EmptyCommand,

    #[error("cannot spawn command: '{command}'")]
    CannotSpawnCommand {
        command: Command,
        #[source]
        source: io::Error,
    },

    #[error("cannot start the capture runtime of command: '{command}'")]
    CannotStartRuntime {
        command: Command,
        #[source]
        source: io::Error,
    },

    #[error("process {pid} still running after waiting {timeout}")]
    Timeout { pid: Pid, timeout: Timeout },

    #[error("process {pid} has not exited")]
    StillRunning { pid: Pid },

    #[error("process {pid} was terminated by a signal")]
    Terminated { pid: Pid },

    #[error("error while waiting for process {pid}")]
    Wait {
        pid: Pid,
        #[source]
        source: io::Error,
    },

    #[error("cannot kill process {pid}")]
    CannotKillProcess {
        pid: Pid,
        #[source]
        source: io::Error,
    },

    #[error("unknown text encoding: '{0}'")]
    UnknownEncoding(String),

    /// escalation of an unsuccessful [`CallResult`], `result` is its
    /// rendering and `source` the error it captured, if any
    ///
    /// [`CallResult`]: ./struct.CallResult.html
    #[error("{message}. {result}")]
    Failed {
        message: String,
        result: String,
        #[source]
        source: Option<Arc<Error>>,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
