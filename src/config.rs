use crate::{Error, Result};
use encoding_rs::{Encoding, UTF_8};
use std::{fmt, path::PathBuf, time::Duration};

/// default wait timeout of [`start_process`](./fn.start_process.html)
pub const PROCESS_TIMEOUT: Timeout = Timeout::After(Duration::from_secs(3600));

/// default wait timeout of [`start_command`](./fn.start_command.html)
pub const COMMAND_TIMEOUT: Timeout = Timeout::After(Duration::from_secs(10));

/// how long to block for a process to terminate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeout {
    /// give up waiting after the given duration, a zero duration
    /// checks the process once without waiting
    After(Duration),
    /// wait until the process terminates, however long it takes
    Unbounded,
}

impl Timeout {
    #[inline]
    pub const fn seconds(seconds: u64) -> Self {
        Timeout::After(Duration::from_secs(seconds))
    }

    #[inline]
    pub fn duration(self) -> Option<Duration> {
        match self {
            Timeout::After(duration) => Some(duration),
            Timeout::Unbounded => None,
        }
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Timeout::After(duration) => write!(f, "{}s", duration.as_secs_f64()),
            Timeout::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// settings of one process call
///
/// a `Config` is copied into the [`ProcessCall`] when the process is
/// started, changing it afterwards does not affect running calls.
///
/// [`ProcessCall`]: ./struct.ProcessCall.html
#[derive(Clone, PartialEq, Eq)]
pub struct Config {
    timeout: Timeout,
    working_directory: Option<PathBuf>,
    encoding: &'static Encoding,
}

impl Config {
    /// settings for long running processes, see [`PROCESS_TIMEOUT`]
    ///
    /// [`PROCESS_TIMEOUT`]: ./constant.PROCESS_TIMEOUT.html
    pub fn process_defaults() -> Self {
        Config {
            timeout: PROCESS_TIMEOUT,
            working_directory: None,
            encoding: UTF_8,
        }
    }

    /// settings for short commands one waits on, see [`COMMAND_TIMEOUT`]
    ///
    /// [`COMMAND_TIMEOUT`]: ./constant.COMMAND_TIMEOUT.html
    pub fn command_defaults() -> Self {
        Config {
            timeout: COMMAND_TIMEOUT,
            ..Config::process_defaults()
        }
    }

    pub fn with_timeout(mut self, timeout: Timeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout_secs(self, seconds: u64) -> Self {
        self.with_timeout(Timeout::seconds(seconds))
    }

    /// the directory the process is started in, the caller's current
    /// directory when unset
    pub fn with_working_directory<P: Into<PathBuf>>(mut self, directory: P) -> Self {
        self.working_directory = Some(directory.into());
        self
    }

    /// charset used to decode the captured output
    pub fn with_encoding(mut self, encoding: &'static Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// same as [`with_encoding`] but looks the charset up by its label
    /// (`"utf-8"`, `"latin1"`, `"windows-1251"`...)
    ///
    /// # Error
    ///
    /// fails with [`Error::UnknownEncoding`] if the label is not known.
    ///
    /// [`with_encoding`]: #method.with_encoding
    /// [`Error::UnknownEncoding`]: ./enum.Error.html#variant.UnknownEncoding
    pub fn with_encoding_label<S: AsRef<str>>(self, label: S) -> Result<Self> {
        let label = label.as_ref();
        match Encoding::for_label(label.trim().as_bytes()) {
            Some(encoding) => Ok(self.with_encoding(encoding)),
            None => Err(Error::UnknownEncoding(label.to_owned())),
        }
    }

    #[inline]
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    #[inline]
    pub fn working_directory(&self) -> Option<&PathBuf> {
        self.working_directory.as_ref()
    }

    #[inline]
    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::process_defaults()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Config")
            .field("timeout", &self.timeout)
            .field("working_directory", &self.working_directory)
            .field("encoding", &self.encoding.name())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use encoding_rs::WINDOWS_1251;

    #[test]
    fn defaults_differ_per_entry_point() {
        let process = Config::process_defaults();
        let command = Config::command_defaults();

        assert_eq!(process.timeout(), Timeout::seconds(3600));
        assert_eq!(command.timeout(), Timeout::seconds(10));
        assert!(process.working_directory().is_none());
        assert_eq!(command.encoding(), UTF_8);
    }

    #[test]
    fn encoding_from_label() -> Result<()> {
        let config = Config::default().with_encoding_label(" cp1251 ")?;
        assert_eq!(config.encoding(), WINDOWS_1251);
        Ok(())
    }

    #[test]
    fn unknown_encoding_label() {
        match Config::default().with_encoding_label("klingon-8") {
            Err(Error::UnknownEncoding(label)) => assert_eq!(label, "klingon-8"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn timeout_display() {
        assert_eq!(Timeout::seconds(2).to_string(), "2s");
        assert_eq!(Timeout::Unbounded.to_string(), "unbounded");
        assert_eq!(Timeout::Unbounded.duration(), None);
    }
}
