use crate::{
    capture::{lock, Channel, SharedCapture, StreamTee},
    Command, Error, Result, Timeout,
};
use std::{
    io, mem,
    process::ExitStatus,
    sync::{Arc, Mutex, OnceLock},
    time::Duration,
};
use tokio::{
    process::Child,
    runtime::Runtime,
    sync::{oneshot, watch},
    task::{AbortHandle, JoinHandle},
};
use tracing::{debug, trace};

/// process identifier as reported in a [`CallResult`]
///
/// [`CallResult`]: ./struct.CallResult.html
pub type Pid = i64;

/// pid of a process that was never started
pub const SENTINEL_PID: Pid = -1;

/// exit code of a process that could not be started
pub const FAILED_CODE: i32 = 1;

/// time left to a process to terminate on `SIGTERM` before it is killed,
/// and to the kill to take effect
const GRACEFUL_TERMINATION: Duration = Duration::from_millis(200);

/// a process may exit while a grandchild still holds its output pipes,
/// this is how long the final drain waits for the end of the streams.
pub(crate) const STREAM_FLUSH_GRACE: Duration = Duration::from_millis(200);

/// drain left to the pumps when the process is still running, enough to
/// pull what is already sitting in the pipes.
pub(crate) const TIMEOUT_FLUSH_GRACE: Duration = Duration::from_millis(20);

/// what the reaper saw, `None` while the process runs
type Exit = Option<io::Result<ExitStatus>>;

/// the runtime driving every reaper and capture pump. It lives as long
/// as the program so no runtime is ever dropped by a call.
fn runtime(command: &Command) -> Result<&'static Runtime> {
    static RUNTIME: OnceLock<io::Result<Runtime>> = OnceLock::new();

    let built = RUNTIME.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("koproc-capture")
            .enable_all()
            .build()
    });
    match built {
        Ok(runtime) => Ok(runtime),
        Err(error) => Err(Error::CannotStartRuntime {
            command: command.clone(),
            source: io::Error::new(error.kind(), error.to_string()),
        }),
    }
}

/// owns the child until it terminates: either it exits on its own or a
/// kill is requested (or the requester is gone).
async fn reap(
    mut child: Child,
    pid: Pid,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Exit>,
) {
    let waited = tokio::select! {
        waited = child.wait() => waited,
        _ = kill => {
            if let Err(error) = child.start_kill() {
                debug!(pid, %error, "cannot kill process");
            }
            child.wait().await
        }
    };
    exit.send_replace(Some(waited));
}

/// a running OS process: the reaper holding the child and the capture
/// pumps, all driven by the shared runtime
pub(crate) struct Running {
    pid: Pid,
    runtime: &'static Runtime,
    exit: watch::Receiver<Exit>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    pumps: Mutex<Vec<JoinHandle<io::Result<u64>>>>,
    aborts: Vec<AbortHandle>,
}

impl Running {
    fn exited(&self) -> Option<Result<ExitStatus>> {
        self.exit.borrow().as_ref().map(|waited| match waited {
            Ok(status) => Ok(*status),
            Err(error) => Err(Error::Wait {
                pid: self.pid,
                source: io::Error::new(error.kind(), error.to_string()),
            }),
        })
    }

    /// block until the reaper saw the process terminate, `false` if
    /// `limit` elapsed first
    fn wait_for_exit(&self, limit: Option<Duration>) -> bool {
        let mut exit = self.exit.clone();
        self.runtime.block_on(async move {
            let exited = exit.wait_for(Option::is_some);
            match limit {
                Some(limit) => tokio::time::timeout(limit, exited)
                    .await
                    .map(|waited| waited.is_ok())
                    .unwrap_or(false),
                None => exited.await.is_ok(),
            }
        })
    }
}

/// the process of a [`ProcessCall`]
///
/// either a real process, or a synthetic one standing in for a process
/// that was never started so the call does not have to special case it.
/// The synthetic variants are always terminated and have no output.
///
/// Every operation takes `&self`: waiting in one thread does not
/// prevent querying or destroying the process from another one.
///
/// [`ProcessCall`]: ./struct.ProcessCall.html
pub(crate) enum ProcessHandle {
    Running(Box<Running>),
    Finished { code: i32 },
    Failed { code: i32, cause: Arc<Error> },
}

impl ProcessHandle {
    /// start the command, its standard output and standard error are
    /// teed into `capture` from now on.
    ///
    /// # Error
    ///
    /// the function fails if the runtime cannot be created or if the
    /// program cannot be spawned (not found, permission, missing working
    /// directory...).
    pub(crate) fn spawn(command: &Command, capture: &SharedCapture) -> Result<Self> {
        let runtime = runtime(command)?;

        let mut child = {
            let _guard = runtime.enter();
            command
                .process_command()
                .spawn()
                .map_err(|source| Error::CannotSpawnCommand {
                    command: command.clone(),
                    source,
                })?
        };
        let pid = child.id().map(Pid::from).unwrap_or(SENTINEL_PID);

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let tee = StreamTee::new(stdout, Channel::Out, capture.clone());
            pumps.push(runtime.spawn(tee.drain()));
        }
        if let Some(stderr) = child.stderr.take() {
            let tee = StreamTee::new(stderr, Channel::Err, capture.clone());
            pumps.push(runtime.spawn(tee.drain()));
        }
        let aborts = pumps.iter().map(JoinHandle::abort_handle).collect();

        let (kill, kill_requested) = oneshot::channel();
        let (exited, exit) = watch::channel(None);
        runtime.spawn(reap(child, pid, kill_requested, exited));

        Ok(ProcessHandle::Running(Box::new(Running {
            pid,
            runtime,
            exit,
            kill: Mutex::new(Some(kill)),
            pumps: Mutex::new(pumps),
            aborts,
        })))
    }

    #[inline]
    pub(crate) fn finished(code: i32) -> Self {
        ProcessHandle::Finished { code }
    }

    #[inline]
    pub(crate) fn failed(cause: Error) -> Self {
        ProcessHandle::Failed {
            code: FAILED_CODE,
            cause: Arc::new(cause),
        }
    }

    pub(crate) fn pid(&self) -> Pid {
        match self {
            ProcessHandle::Running(running) => running.pid,
            ProcessHandle::Finished { .. } | ProcessHandle::Failed { .. } => SENTINEL_PID,
        }
    }

    /// the error that prevented the process from starting
    pub(crate) fn failure(&self) -> Option<Arc<Error>> {
        match self {
            ProcessHandle::Failed { cause, .. } => Some(cause.clone()),
            _ => None,
        }
    }

    /// block until the process terminates or the timeout elapses
    ///
    /// # Error
    ///
    /// [`Error::Timeout`] if the process is still running once the
    /// timeout elapsed.
    ///
    /// [`Error::Timeout`]: ./enum.Error.html#variant.Timeout
    pub(crate) fn wait(&self, timeout: Timeout) -> Result<()> {
        let running = match self {
            ProcessHandle::Running(running) => running,
            ProcessHandle::Finished { .. } | ProcessHandle::Failed { .. } => return Ok(()),
        };
        let pid = running.pid;

        if !running.wait_for_exit(timeout.duration()) {
            debug!(pid, %timeout, "process still running after timeout");
            return Err(Error::Timeout { pid, timeout });
        }
        match running.exited() {
            Some(Ok(status)) => {
                trace!(pid, %status, "process terminated");
                Ok(())
            }
            Some(Err(error)) => Err(error),
            None => Err(Error::StillRunning { pid }),
        }
    }

    /// let the capture pumps reach the end of the streams within `grace`
    pub(crate) fn flush_streams(&self, grace: Duration) {
        let running = match self {
            ProcessHandle::Running(running) => running,
            ProcessHandle::Finished { .. } | ProcessHandle::Failed { .. } => return,
        };

        let pending = mem::take(&mut *lock(&running.pumps));
        if pending.is_empty() {
            return;
        }
        let unfinished = running.runtime.block_on(async move {
            let deadline = tokio::time::Instant::now() + grace;
            let mut unfinished = Vec::new();
            for mut pump in pending {
                if tokio::time::timeout_at(deadline, &mut pump).await.is_err() {
                    unfinished.push(pump);
                }
            }
            unfinished
        });
        lock(&running.pumps).extend(unfinished);
    }

    /// exit code of the terminated process
    ///
    /// # Error
    ///
    /// fails if the process is still running or if it was terminated
    /// by a signal and has no exit code.
    pub(crate) fn exit_code(&self) -> Result<i32> {
        let running = match self {
            ProcessHandle::Running(running) => running,
            ProcessHandle::Finished { code } | ProcessHandle::Failed { code, .. } => {
                return Ok(*code)
            }
        };

        let pid = running.pid;
        match running.exited() {
            None => Err(Error::StillRunning { pid }),
            Some(Err(error)) => Err(error),
            Some(Ok(status)) => status.code().ok_or(Error::Terminated { pid }),
        }
    }

    /// exit code from the last observed state, without querying the process
    pub(crate) fn last_known_code(&self) -> Option<i32> {
        match self {
            ProcessHandle::Running(running) => running
                .exit
                .borrow()
                .as_ref()
                .and_then(|waited| waited.as_ref().ok())
                .and_then(ExitStatus::code),
            ProcessHandle::Finished { code } | ProcessHandle::Failed { code, .. } => Some(*code),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            ProcessHandle::Running(running) => running.exit.borrow().is_none(),
            ProcessHandle::Finished { .. } | ProcessHandle::Failed { .. } => false,
        }
    }

    /// stop the capture pumps and terminate the process: politely first
    /// (`SIGTERM` on unix), then by force.
    pub(crate) fn destroy(&self) -> Result<()> {
        let running = match self {
            ProcessHandle::Running(running) => running,
            ProcessHandle::Finished { .. } | ProcessHandle::Failed { .. } => return Ok(()),
        };
        for pump in &running.aborts {
            pump.abort();
        }
        if !self.is_alive() {
            return Ok(());
        }
        let pid = running.pid;

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};

            if let Ok(raw) = i32::try_from(pid) {
                if let Err(error) = kill(nix::unistd::Pid::from_raw(raw), Signal::SIGTERM) {
                    debug!(pid, %error, "cannot send SIGTERM");
                }
            }
        }
        if running.wait_for_exit(Some(GRACEFUL_TERMINATION)) {
            return Ok(());
        }

        debug!(pid, "process did not terminate gracefully, killing it");
        if let Some(kill) = lock(&running.kill).take() {
            // the reaper is gone only if the process already terminated
            let _ = kill.send(());
        }
        if running.wait_for_exit(Some(GRACEFUL_TERMINATION)) {
            Ok(())
        } else {
            Err(Error::CannotKillProcess {
                pid,
                source: io::Error::new(io::ErrorKind::TimedOut, "still running after the kill"),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::capture::Capture;
    use encoding_rs::UTF_8;
    use std::{thread, time::Instant};

    fn spawn(command: &str) -> Result<(ProcessHandle, SharedCapture)> {
        let capture = Capture::shared(UTF_8);
        let handle = ProcessHandle::spawn(&Command::parse(command)?, &capture)?;
        Ok((handle, capture))
    }

    #[test]
    fn sentinels_are_terminated() -> Result<()> {
        let finished = ProcessHandle::finished(0);
        finished.wait(Timeout::Unbounded)?;
        assert_eq!(finished.exit_code()?, 0);
        assert_eq!(finished.pid(), SENTINEL_PID);
        assert!(!finished.is_alive());
        assert!(finished.failure().is_none());

        let failed = ProcessHandle::failed(Error::EmptyCommand);
        failed.wait(Timeout::seconds(0))?;
        failed.destroy()?;
        assert_eq!(failed.exit_code()?, FAILED_CODE);
        assert_eq!(failed.last_known_code(), Some(FAILED_CODE));
        assert!(matches!(
            failed.failure().as_deref(),
            Some(Error::EmptyCommand)
        ));
        Ok(())
    }

    #[test]
    fn spawn_unknown_program() {
        match spawn("the-impossible-program-that-does-not-exist") {
            Err(Error::CannotSpawnCommand { command, .. }) => {
                assert_eq!(command.program(), "the-impossible-program-that-does-not-exist")
            }
            Err(error) => panic!("unexpected error: {}", error),
            Ok(_) => panic!("the program should not exist"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn wait_and_flush() -> Result<()> {
        let (handle, capture) = spawn("echo Hello World!")?;
        assert!(handle.pid() > 0);

        handle.wait(Timeout::seconds(5))?;
        handle.flush_streams(STREAM_FLUSH_GRACE);

        assert_eq!(handle.exit_code()?, 0);
        assert_eq!(handle.last_known_code(), Some(0));
        assert_eq!(lock(&capture).complete_text(Channel::Out), "Hello World!\n");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn timeout_then_destroy() -> Result<()> {
        let (handle, _capture) = spawn("sleep 5")?;

        match handle.wait(Timeout::After(Duration::from_millis(100))) {
            Err(Error::Timeout { pid, .. }) => assert_eq!(pid, handle.pid()),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(handle.exit_code(), Err(Error::StillRunning { .. })));
        assert!(handle.is_alive());

        handle.destroy()?;
        assert!(!handle.is_alive());
        assert!(matches!(handle.exit_code(), Err(Error::Terminated { .. })));
        assert_eq!(handle.last_known_code(), None);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn destroy_ends_a_wait_in_another_thread() -> Result<()> {
        let (handle, _capture) = spawn("sleep 5")?;
        let handle = Arc::new(handle);

        let waiter = {
            let handle = handle.clone();
            thread::spawn(move || handle.wait(Timeout::seconds(4)).is_ok())
        };
        thread::sleep(Duration::from_millis(200));

        let started = Instant::now();
        assert!(handle.is_alive());
        handle.destroy()?;

        assert!(waiter.join().expect("waiter"));
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        Ok(())
    }
}
