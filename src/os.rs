//! Mock APIs for operating system services: files, the environment and processes.
//!
//! Production code holds an `&dyn Os` (usually [SystemOs]) and tests hand it a
//! [unimock::Unimock] programmed through [OsMock], [FileMock] and [ProcessMock].

use std::fmt;
use std::io;

use unimock::unimock;

use crate::io::{Closer, Reader, ReaderAt, Seeker, StringWriter, Writer, WriterAt};

pub mod exec;
pub mod signal;

mod system;

pub use crate::io::fs::{DirEntry, FileInfo};
pub use signal::Signal;
pub use system::{SystemFile, SystemOs, SystemProcess};

/// An open file of the host file system.
#[unimock(api = FileMock)]
pub trait File:
    Reader + Writer + Seeker + Closer + ReaderAt + WriterAt + StringWriter + Send + Sync
{
    /// The name the file was opened with.
    fn name(&self) -> String;

    /// Describe the open file.
    fn stat(&self) -> io::Result<Box<dyn FileInfo>>;

    /// Flush file contents and metadata to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Change the size of the file, without moving the cursor.
    fn truncate(&mut self, size: u64) -> io::Result<()>;
}

/// How [Os::open_file] opens a file. The equivalent of the `O_*` flags plus permission bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub create_new: bool,
    pub truncate: bool,
    /// Permission bits for created files.
    pub perm: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            create: false,
            create_new: false,
            truncate: false,
            perm: 0o666,
        }
    }
}

impl OpenOptions {
    /// `O_RDONLY`
    pub fn read_only() -> Self {
        Self {
            read: true,
            ..Self::default()
        }
    }

    /// `O_RDWR|O_CREATE|O_TRUNC`, the options of [Os::create].
    pub fn create() -> Self {
        Self {
            read: true,
            write: true,
            create: true,
            truncate: true,
            ..Self::default()
        }
    }

    /// `O_WRONLY|O_CREATE|O_APPEND`
    pub fn append() -> Self {
        Self {
            write: true,
            append: true,
            create: true,
            ..Self::default()
        }
    }

    pub fn perm(mut self, perm: u32) -> Self {
        self.perm = perm;
        self
    }
}

/// Attributes of a process started with [Os::start_process].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcAttr {
    /// Working directory of the new process. `None` inherits the current one.
    pub dir: Option<String>,
    /// Environment as `KEY=value` strings. `None` inherits the current one.
    pub env: Option<Vec<String>>,
}

/// Operating system services.
#[unimock(api = OsMock)]
pub trait Os: Send + Sync {
    /// Create or truncate the named file, opened for reading and writing.
    fn create(&self, name: &str) -> io::Result<Box<dyn File>>;

    /// Open the named file for reading.
    fn open(&self, name: &str) -> io::Result<Box<dyn File>>;

    /// Open the named file with explicit options.
    fn open_file(&self, name: &str, options: OpenOptions) -> io::Result<Box<dyn File>>;

    /// Remove the named file or empty directory.
    fn remove(&self, name: &str) -> io::Result<()>;

    /// Remove `path` and everything it contains. A missing path is not an error.
    fn remove_all(&self, path: &str) -> io::Result<()>;

    /// Rename (move) `from` to `to`.
    fn rename(&self, from: &str, to: &str) -> io::Result<()>;

    /// Create a directory with the given permission bits.
    fn mkdir(&self, name: &str, perm: u32) -> io::Result<()>;

    /// Create a directory and any missing parents.
    fn mkdir_all(&self, path: &str, perm: u32) -> io::Result<()>;

    /// Describe the named file.
    fn stat(&self, name: &str) -> io::Result<Box<dyn FileInfo>>;

    /// Read the whole named file.
    fn read_file(&self, name: &str) -> io::Result<Vec<u8>>;

    /// Write `data` to the named file, creating it with `perm` if needed.
    fn write_file(&self, name: &str, data: &[u8], perm: u32) -> io::Result<()>;

    /// Entries of the named directory, sorted by name.
    fn read_dir(&self, name: &str) -> io::Result<Vec<Box<dyn DirEntry>>>;

    /// Value of an environment variable, empty if unset.
    fn getenv(&self, key: &str) -> String;

    /// Value of an environment variable, or `None` if unset.
    fn lookup_env(&self, key: &str) -> Option<String>;

    /// Set an environment variable.
    fn setenv(&self, key: &str, value: &str) -> io::Result<()>;

    /// Unset an environment variable.
    fn unsetenv(&self, key: &str) -> io::Result<()>;

    /// The environment as `KEY=value` strings.
    fn environ(&self) -> Vec<String>;

    /// The current working directory.
    fn getwd(&self) -> io::Result<String>;

    /// Change the current working directory.
    fn chdir(&self, dir: &str) -> io::Result<()>;

    /// The default directory for temporary files.
    fn temp_dir(&self) -> String;

    /// The root directory for user specific cache data.
    fn user_cache_dir(&self) -> io::Result<String>;

    /// The root directory for user specific configuration data.
    fn user_config_dir(&self) -> io::Result<String>;

    /// The home directory of the current user.
    fn user_home_dir(&self) -> io::Result<String>;

    /// The host name reported by the kernel.
    fn hostname(&self) -> io::Result<String>;

    /// The id of the current process.
    fn getpid(&self) -> u32;

    /// The id of the parent process.
    fn getppid(&self) -> u32;

    /// Start a new process. `argv` includes the program name as its first element.
    fn start_process(
        &self,
        name: &str,
        argv: &[&str],
        attr: ProcAttr,
    ) -> io::Result<Box<dyn Process>>;
}

/// A process started by [Os::start_process].
#[unimock(api = ProcessMock)]
pub trait Process: Send + Sync {
    fn pid(&self) -> u32;

    /// Cause the process to exit immediately.
    fn kill(&mut self) -> io::Result<()>;

    /// Send a signal to the process.
    fn signal(&mut self, sig: Signal) -> io::Result<()>;

    /// Wait for the process to exit.
    fn wait(&mut self) -> io::Result<ProcessState>;

    /// Release the resources associated with the process. It can no longer be waited for.
    fn release(&mut self) -> io::Result<()>;
}

/// The state of an exited process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProcessState {
    pub pid: u32,
    /// Exit code, `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Number of the terminating signal, if any.
    pub signal: Option<i32>,
}

impl ProcessState {
    /// A state for a process which exited with `code`.
    pub fn exited_with(pid: u32, code: i32) -> Self {
        Self {
            pid,
            exit_code: Some(code),
            signal: None,
        }
    }

    /// Whether the process exited with code zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Whether the process exited normally, rather than by a signal.
    pub fn exited(&self) -> bool {
        self.exit_code.is_some()
    }

    /// The exit code, or `-1` when terminated by a signal.
    pub fn exit_code(&self) -> i32 {
        self.exit_code.unwrap_or(-1)
    }

    pub(crate) fn from_status(pid: u32, status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;

        Self {
            pid,
            exit_code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.exit_code, self.signal) {
            (Some(code), _) => write!(f, "exit status {code}"),
            (None, Some(number)) => match Signal::from_number(number) {
                Some(sig) => write!(f, "signal: {sig}"),
                None => write!(f, "signal: {number}"),
            },
            (None, None) => write!(f, "exit status -1"),
        }
    }
}
