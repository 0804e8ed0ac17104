//! Mock APIs for running external commands.

use std::fmt;
use std::io::{self, Read, Write};
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use unimock::unimock;

use super::ProcessState;
use crate::io::{Closer, ReadCloser, Reader, WriteCloser, Writer};

/// Errors from running a command.
#[derive(Debug)]
pub enum Error {
    /// Starting or waiting for the process failed.
    Io(io::Error),
    /// The executable could not be found in `$PATH`.
    NotFound(String),
    /// The process exited unsuccessfully.
    Exit {
        /// The exit code, `-1` if the process was terminated by a signal.
        code: i32,
        /// Captured standard error, when collected by [Cmd::output].
        stderr: Vec<u8>,
    },
    AlreadyStarted,
    NotStarted,
    /// The process was already reaped by an earlier wait.
    WaitCalled,
}

impl Error {
    /// The exit code of an [Error::Exit].
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exit { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::NotFound(name) => {
                write!(f, "exec: \"{name}\": executable file not found in $PATH")
            }
            Self::Exit { code, .. } => write!(f, "exit status {code}"),
            Self::AlreadyStarted => write!(f, "exec: already started"),
            Self::NotStarted => write!(f, "exec: not started"),
            Self::WaitCalled => write!(f, "exec: Wait was already called"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(err) => err,
            Error::NotFound(_) => io::Error::new(io::ErrorKind::NotFound, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}

/// Where a standard stream of a command is connected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Stdio {
    /// The null device.
    #[default]
    Null,
    /// The stream of the parent process.
    Inherit,
    /// A pipe to the parent process.
    Piped,
}

impl Stdio {
    fn to_std(self) -> std::process::Stdio {
        match self {
            Self::Null => std::process::Stdio::null(),
            Self::Inherit => std::process::Stdio::inherit(),
            Self::Piped => std::process::Stdio::piped(),
        }
    }
}

/// An external command being prepared or run.
#[unimock(api = CmdMock)]
pub trait Cmd: fmt::Display + Send + Sync {
    /// Start the command and wait for it to complete.
    fn run(&mut self) -> Result<(), Error>;

    /// Start the command without waiting for it.
    fn start(&mut self) -> Result<(), Error>;

    /// Wait for a started command to exit. Pipes are closed afterwards.
    fn wait(&mut self) -> Result<(), Error>;

    /// Run the command and collect its standard output.
    fn output(&mut self) -> Result<Vec<u8>, Error>;

    /// Run the command and collect its interleaved standard output and standard error.
    ///
    /// The output collected so far is returned even when the command fails.
    fn combined_output(&mut self) -> (Vec<u8>, Result<(), Error>);

    /// A pipe connected to standard input once the command starts.
    fn stdin_pipe(&mut self) -> Result<Box<dyn WriteCloser + Send + Sync>, Error>;

    /// A pipe connected to standard output once the command starts.
    fn stdout_pipe(&mut self) -> Result<Box<dyn ReadCloser + Send + Sync>, Error>;

    /// A pipe connected to standard error once the command starts.
    fn stderr_pipe(&mut self) -> Result<Box<dyn ReadCloser + Send + Sync>, Error>;

    /// Path of the executable.
    fn path(&self) -> String;

    /// Arguments, including the command name as the first element.
    fn args(&self) -> Vec<String>;

    /// Working directory, `None` for the current one.
    fn dir(&self) -> Option<String>;

    /// Explicit environment, `None` to inherit.
    fn env(&self) -> Option<Vec<String>>;

    /// The environment the command would run with.
    fn environ(&self) -> Vec<String>;

    fn stdin(&self) -> Stdio;

    fn stdout(&self) -> Stdio;

    fn stderr(&self) -> Stdio;

    /// The state of the exited process, once waited for.
    fn process_state(&self) -> Option<ProcessState>;

    fn set_dir(&mut self, dir: &str);

    fn set_env(&mut self, env: Vec<String>);

    fn set_stdin(&mut self, stdio: Stdio);

    fn set_stdout(&mut self, stdio: Stdio);

    fn set_stderr(&mut self, stdio: Stdio);
}

/// Command construction and executable lookup.
#[unimock(api = ExecMock)]
pub trait Exec: Send + Sync {
    /// Prepare a command running `name` with `args`.
    fn command(&self, name: &str, args: &[&str]) -> Box<dyn Cmd>;

    /// Search `$PATH` for an executable named `file`.
    fn look_path(&self, file: &str) -> Result<String, Error>;
}

/// The real [Exec], spawning processes with [std::process::Command].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemExec;

impl Exec for SystemExec {
    fn command(&self, name: &str, args: &[&str]) -> Box<dyn Cmd> {
        Box::new(SystemCmd::new(name, args))
    }

    fn look_path(&self, file: &str) -> Result<String, Error> {
        look_path(file)
    }
}

fn is_executable(path: &std::path::Path) -> bool {
    let Ok(metadata) = std::fs::metadata(path) else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

/// Search the directories of `$PATH` for an executable named `file`.
///
/// A name containing a path separator is checked directly, without consulting `$PATH`.
pub fn look_path(file: &str) -> Result<String, Error> {
    if file.contains(std::path::is_separator) {
        return if is_executable(std::path::Path::new(file)) {
            Ok(file.to_string())
        } else {
            Err(Error::NotFound(file.to_string()))
        };
    }

    let path = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path) {
        let dir = if dir.as_os_str().is_empty() {
            std::path::PathBuf::from(".")
        } else {
            dir
        };
        let candidate = dir.join(file);
        if is_executable(&candidate) {
            return Ok(candidate.to_string_lossy().into_owned());
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if is_executable(&exe) {
                return Ok(exe.to_string_lossy().into_owned());
            }
        }
    }
    Err(Error::NotFound(file.to_string()))
}

enum PipeEnd<T> {
    Pending,
    Live(T),
    Closed,
}

/// One end of a pipe to a child process, connected when the command starts.
struct Pipe<T> {
    end: Arc<Mutex<PipeEnd<T>>>,
}

impl<T> Pipe<T> {
    fn new() -> Self {
        Self {
            end: Arc::new(Mutex::new(PipeEnd::Pending)),
        }
    }

    fn handle(&self) -> Self {
        Self {
            end: self.end.clone(),
        }
    }

    fn connect(&self, stream: Option<T>) {
        let mut end = self.end.lock();
        if let (PipeEnd::Pending, Some(stream)) = (&*end, stream) {
            *end = PipeEnd::Live(stream);
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> io::Result<R>) -> io::Result<R> {
        match &mut *self.end.lock() {
            PipeEnd::Live(stream) => f(stream),
            PipeEnd::Pending => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "exec: pipe used before command started",
            )),
            PipeEnd::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "file already closed",
            )),
        }
    }
}

impl<T: Read> Reader for Pipe<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.with(|stream| stream.read(buf))
    }
}

impl<T: Write> Writer for Pipe<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.with(|stream| stream.write(buf))
    }
}

impl<T> Closer for Pipe<T> {
    fn close(&mut self) -> io::Result<()> {
        let mut end = self.end.lock();
        match *end {
            PipeEnd::Closed => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "file already closed",
            )),
            _ => {
                *end = PipeEnd::Closed;
                Ok(())
            }
        }
    }
}

#[derive(Default)]
struct Pipes {
    stdin: Option<Pipe<ChildStdin>>,
    stdout: Option<Pipe<ChildStdout>>,
    stderr: Option<Pipe<ChildStderr>>,
}

impl Pipes {
    fn close_all(&mut self) {
        if let Some(pipe) = &mut self.stdin {
            let _ = pipe.close();
        }
        if let Some(pipe) = &mut self.stdout {
            let _ = pipe.close();
        }
        if let Some(pipe) = &mut self.stderr {
            let _ = pipe.close();
        }
    }
}

/// The real [Cmd], running a [std::process::Command].
pub struct SystemCmd {
    name: String,
    path: Option<String>,
    args: Vec<String>,
    dir: Option<String>,
    env: Option<Vec<String>>,
    stdin: Stdio,
    stdout: Stdio,
    stderr: Stdio,
    pipes: Pipes,
    child: Option<Child>,
    started: bool,
    state: Option<ProcessState>,
}

impl SystemCmd {
    /// Prepare `name` with `args`. A `name` without separators is resolved with [look_path].
    pub fn new(name: &str, args: &[&str]) -> Self {
        let path = if name.contains(std::path::is_separator) {
            Some(name.to_string())
        } else {
            look_path(name).ok()
        };

        Self {
            name: name.to_string(),
            path,
            args: std::iter::once(name)
                .chain(args.iter().copied())
                .map(str::to_string)
                .collect(),
            dir: None,
            env: None,
            stdin: Stdio::Null,
            stdout: Stdio::Null,
            stderr: Stdio::Null,
            pipes: Pipes::default(),
            child: None,
            started: false,
            state: None,
        }
    }

    fn check_not_started(&self) -> Result<(), Error> {
        if self.started {
            Err(Error::AlreadyStarted)
        } else {
            Ok(())
        }
    }

    fn spawn(
        &mut self,
        stdout: std::process::Stdio,
        stderr: std::process::Stdio,
    ) -> Result<Child, Error> {
        self.check_not_started()?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| Error::NotFound(self.name.clone()))?;

        let mut command = Command::new(&path);
        command.args(&self.args[1..]);
        if let Some(dir) = &self.dir {
            command.current_dir(dir);
        }
        if let Some(env) = &self.env {
            command.env_clear();
            for pair in env {
                if let Some((key, value)) = pair.split_once('=') {
                    command.env(key, value);
                }
            }
        }
        command.stdin(match self.pipes.stdin {
            Some(_) => std::process::Stdio::piped(),
            None => self.stdin.to_std(),
        });
        command.stdout(stdout);
        command.stderr(stderr);

        let child = command.spawn()?;
        self.started = true;
        debug!(cmd = %self, pid = child.id(), "started command");
        Ok(child)
    }

    fn stdout_for_start(&self) -> std::process::Stdio {
        match self.pipes.stdout {
            Some(_) => std::process::Stdio::piped(),
            None => self.stdout.to_std(),
        }
    }

    fn stderr_for_start(&self) -> std::process::Stdio {
        match self.pipes.stderr {
            Some(_) => std::process::Stdio::piped(),
            None => self.stderr.to_std(),
        }
    }

    fn finish(
        &mut self,
        pid: u32,
        status: std::process::ExitStatus,
        stderr: Vec<u8>,
    ) -> Result<(), Error> {
        self.child = None;
        let state = ProcessState::from_status(pid, status);
        debug!(cmd = %self, %state, "command exited");

        let result = if state.success() {
            Ok(())
        } else {
            Err(Error::Exit {
                code: state.exit_code(),
                stderr,
            })
        };
        self.state = Some(state);
        result
    }

    fn check_output_streams(&self) -> Result<(), Error> {
        if self.pipes.stdout.is_some() || self.stdout != Stdio::Null {
            return Err(Error::Io(io::Error::other("exec: Stdout already set")));
        }
        Ok(())
    }
}

impl fmt::Display for SystemCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = self.path.as_deref().unwrap_or(&self.name);
        write!(f, "{path}")?;
        for arg in &self.args[1..] {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl Cmd for SystemCmd {
    fn run(&mut self) -> Result<(), Error> {
        self.start()?;
        self.wait()
    }

    fn start(&mut self) -> Result<(), Error> {
        let mut child = self.spawn(self.stdout_for_start(), self.stderr_for_start())?;
        if let Some(pipe) = &self.pipes.stdin {
            pipe.connect(child.stdin.take());
        }
        if let Some(pipe) = &self.pipes.stdout {
            pipe.connect(child.stdout.take());
        }
        if let Some(pipe) = &self.pipes.stderr {
            pipe.connect(child.stderr.take());
        }
        self.child = Some(child);
        Ok(())
    }

    fn wait(&mut self) -> Result<(), Error> {
        let Some(child) = self.child.as_mut() else {
            return Err(match self.state {
                Some(_) => Error::WaitCalled,
                None => Error::NotStarted,
            });
        };
        let pid = child.id();
        let status = child.wait()?;
        self.pipes.close_all();
        self.finish(pid, status, vec![])
    }

    fn output(&mut self) -> Result<Vec<u8>, Error> {
        self.check_output_streams()?;
        let capture_stderr = self.pipes.stderr.is_none() && self.stderr == Stdio::Null;
        let stderr = if capture_stderr {
            std::process::Stdio::piped()
        } else {
            self.stderr_for_start()
        };

        let mut child = self.spawn(std::process::Stdio::piped(), stderr)?;
        if let Some(pipe) = &self.pipes.stdin {
            pipe.connect(child.stdin.take());
        }
        if let Some(pipe) = &self.pipes.stderr {
            pipe.connect(child.stderr.take());
        }
        let pid = child.id();
        let output = child.wait_with_output()?;
        self.pipes.close_all();
        self.finish(pid, output.status, output.stderr)
            .map(|()| output.stdout)
    }

    fn combined_output(&mut self) -> (Vec<u8>, Result<(), Error>) {
        if let Err(err) = self.check_output_streams() {
            return (vec![], Err(err));
        }
        if self.pipes.stderr.is_some() || self.stderr != Stdio::Null {
            return (vec![], Err(Error::Io(io::Error::other("exec: Stderr already set"))));
        }

        let mut child = match self.spawn(std::process::Stdio::piped(), std::process::Stdio::piped()) {
            Ok(child) => child,
            Err(err) => return (vec![], Err(err)),
        };
        if let Some(pipe) = &self.pipes.stdin {
            pipe.connect(child.stdin.take());
        }

        let combined = Mutex::new(Vec::new());
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collected = std::thread::scope(|scope| {
            let collect = |stream: Option<Box<dyn Read + Send>>| {
                let combined = &combined;
                scope.spawn(move || -> io::Result<()> {
                    let Some(mut stream) = stream else {
                        return Ok(());
                    };
                    let mut buf = [0; 4096];
                    loop {
                        match stream.read(&mut buf) {
                            Ok(0) => return Ok(()),
                            Ok(n) => combined.lock().extend_from_slice(&buf[..n]),
                            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                            Err(err) => return Err(err),
                        }
                    }
                })
            };
            let out = collect(stdout.map(|s| Box::new(s) as Box<dyn Read + Send>));
            let err = collect(stderr.map(|s| Box::new(s) as Box<dyn Read + Send>));
            [out, err]
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(io::Error::other("exec: output reader panicked")))
                })
                .collect::<io::Result<()>>()
        });

        let pid = child.id();
        let status = child.wait();
        self.pipes.close_all();
        let output = combined.into_inner();

        let result = match (collected, status) {
            (Ok(()), Ok(status)) => self.finish(pid, status, vec![]),
            (Err(err), _) | (_, Err(err)) => Err(Error::Io(err)),
        };
        (output, result)
    }

    fn stdin_pipe(&mut self) -> Result<Box<dyn WriteCloser + Send + Sync>, Error> {
        self.check_not_started()?;
        if self.pipes.stdin.is_some() || self.stdin != Stdio::Null {
            return Err(Error::Io(io::Error::other("exec: Stdin already set")));
        }
        let pipe = Pipe::new();
        let handle = pipe.handle();
        self.pipes.stdin = Some(pipe);
        Ok(Box::new(handle))
    }

    fn stdout_pipe(&mut self) -> Result<Box<dyn ReadCloser + Send + Sync>, Error> {
        self.check_not_started()?;
        if self.pipes.stdout.is_some() || self.stdout != Stdio::Null {
            return Err(Error::Io(io::Error::other("exec: Stdout already set")));
        }
        let pipe = Pipe::new();
        let handle = pipe.handle();
        self.pipes.stdout = Some(pipe);
        Ok(Box::new(handle))
    }

    fn stderr_pipe(&mut self) -> Result<Box<dyn ReadCloser + Send + Sync>, Error> {
        self.check_not_started()?;
        if self.pipes.stderr.is_some() || self.stderr != Stdio::Null {
            return Err(Error::Io(io::Error::other("exec: Stderr already set")));
        }
        let pipe = Pipe::new();
        let handle = pipe.handle();
        self.pipes.stderr = Some(pipe);
        Ok(Box::new(handle))
    }

    fn path(&self) -> String {
        self.path.clone().unwrap_or_else(|| self.name.clone())
    }

    fn args(&self) -> Vec<String> {
        self.args.clone()
    }

    fn dir(&self) -> Option<String> {
        self.dir.clone()
    }

    fn env(&self) -> Option<Vec<String>> {
        self.env.clone()
    }

    fn environ(&self) -> Vec<String> {
        match &self.env {
            Some(env) => env.clone(),
            None => std::env::vars_os()
                .map(|(key, value)| {
                    format!("{}={}", key.to_string_lossy(), value.to_string_lossy())
                })
                .collect(),
        }
    }

    fn stdin(&self) -> Stdio {
        self.stdin
    }

    fn stdout(&self) -> Stdio {
        self.stdout
    }

    fn stderr(&self) -> Stdio {
        self.stderr
    }

    fn process_state(&self) -> Option<ProcessState> {
        self.state.clone()
    }

    fn set_dir(&mut self, dir: &str) {
        self.dir = Some(dir.to_string());
    }

    fn set_env(&mut self, env: Vec<String>) {
        self.env = Some(env);
    }

    fn set_stdin(&mut self, stdio: Stdio) {
        self.stdin = stdio;
    }

    fn set_stdout(&mut self, stdio: Stdio) {
        self.stdout = stdio;
    }

    fn set_stderr(&mut self, stdio: Stdio) {
        self.stderr = stdio;
    }
}
