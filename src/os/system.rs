use std::io::{self, SeekFrom};
use std::path::PathBuf;
use std::process::Child;

use tracing::{debug, trace};

use super::{DirEntry, File, FileInfo, OpenOptions, Os, ProcAttr, Process, ProcessState, Signal};
use crate::io::fs::{Entry, Info, PathError};
use crate::io::{Closer, Reader, ReaderAt, Seeker, Stream, StringWriter, Writer, WriterAt};

/// The real [Os], backed by `std`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemOs;

fn base_name(name: &str) -> String {
    let trimmed = name.trim_end_matches(std::path::is_separator);
    trimmed
        .rsplit(std::path::is_separator)
        .next()
        .filter(|base| !base.is_empty())
        .unwrap_or(name)
        .to_string()
}

fn std_open_options(options: &OpenOptions) -> std::fs::OpenOptions {
    let mut std_options = std::fs::OpenOptions::new();
    std_options
        .read(options.read)
        .write(options.write)
        .append(options.append)
        .create(options.create)
        .create_new(options.create_new)
        .truncate(options.truncate);

    #[cfg(unix)]
    std::os::unix::fs::OpenOptionsExt::mode(&mut std_options, options.perm);

    std_options
}

fn check_env_key(op: &'static str, key: &str) -> io::Result<()> {
    if key.is_empty() || key.contains(['=', '\0']) {
        return Err(PathError::invalid(op, key).into());
    }
    Ok(())
}

fn home_dir(var: &str, suffix: &str) -> io::Result<String> {
    match std::env::var_os("HOME").filter(|home| !home.is_empty()) {
        Some(home) => Ok(PathBuf::from(home).join(suffix).to_string_lossy().into_owned()),
        None => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("neither ${var} nor $HOME are defined"),
        )),
    }
}

/// `$var` if set and absolute, otherwise `$HOME/suffix`.
fn xdg_dir(var: &str, suffix: &str) -> io::Result<String> {
    match std::env::var_os(var).filter(|dir| !dir.is_empty()) {
        Some(dir) if !std::path::Path::new(&dir).is_absolute() => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path in ${var} is relative"),
        )),
        Some(dir) => Ok(dir.to_string_lossy().into_owned()),
        None => home_dir(var, suffix),
    }
}

fn windows_dir(var: &str) -> io::Result<String> {
    match std::env::var(var) {
        Ok(dir) if !dir.is_empty() => Ok(dir),
        _ => Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("%{var}% is not defined"),
        )),
    }
}

impl Os for SystemOs {
    fn create(&self, name: &str) -> io::Result<Box<dyn File>> {
        self.open_file(name, OpenOptions::create())
    }

    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        self.open_file(name, OpenOptions::read_only())
    }

    fn open_file(&self, name: &str, options: OpenOptions) -> io::Result<Box<dyn File>> {
        let file = std_open_options(&options)
            .open(name)
            .map_err(|err| PathError::new("open", name, err))?;
        trace!(name, ?options, "open file");
        Ok(Box::new(SystemFile::new(name, file)))
    }

    fn remove(&self, name: &str) -> io::Result<()> {
        let metadata =
            std::fs::symlink_metadata(name).map_err(|err| PathError::new("remove", name, err))?;
        if metadata.is_dir() {
            std::fs::remove_dir(name)
        } else {
            std::fs::remove_file(name)
        }
        .map_err(|err| PathError::new("remove", name, err))?;
        debug!(name, "removed");
        Ok(())
    }

    fn remove_all(&self, path: &str) -> io::Result<()> {
        let metadata = match std::fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(PathError::new("unlinkat", path, err).into()),
        };
        if metadata.is_dir() {
            std::fs::remove_dir_all(path)
        } else {
            std::fs::remove_file(path)
        }
        .map_err(|err| PathError::new("unlinkat", path, err))?;
        debug!(path, "removed recursively");
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        std::fs::rename(from, to).map_err(|err| PathError::new("rename", format!("{from} {to}"), err))?;
        debug!(from, to, "renamed");
        Ok(())
    }

    fn mkdir(&self, name: &str, perm: u32) -> io::Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, perm);
        #[cfg(not(unix))]
        let _ = perm;

        builder
            .create(name)
            .map_err(|err| PathError::new("mkdir", name, err))?;
        debug!(name, "created directory");
        Ok(())
    }

    fn mkdir_all(&self, path: &str, perm: u32) -> io::Result<()> {
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        std::os::unix::fs::DirBuilderExt::mode(&mut builder, perm);
        #[cfg(not(unix))]
        let _ = perm;

        builder
            .create(path)
            .map_err(|err| PathError::new("mkdir", path, err))?;
        Ok(())
    }

    fn stat(&self, name: &str) -> io::Result<Box<dyn FileInfo>> {
        let metadata = std::fs::metadata(name).map_err(|err| PathError::new("stat", name, err))?;
        Ok(Box::new(Info::new(base_name(name), metadata)))
    }

    fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        Ok(std::fs::read(name).map_err(|err| PathError::new("open", name, err))?)
    }

    fn write_file(&self, name: &str, data: &[u8], perm: u32) -> io::Result<()> {
        let options = OpenOptions {
            write: true,
            create: true,
            truncate: true,
            ..OpenOptions::default()
        }
        .perm(perm);
        let mut file = std_open_options(&options)
            .open(name)
            .map_err(|err| PathError::new("open", name, err))?;
        std::io::Write::write_all(&mut file, data).map_err(|err| PathError::new("write", name, err))?;
        Ok(())
    }

    fn read_dir(&self, name: &str) -> io::Result<Vec<Box<dyn DirEntry>>> {
        let read_dir = std::fs::read_dir(name).map_err(|err| PathError::new("open", name, err))?;
        let mut entries = read_dir
            .map(|entry| entry.map(Entry::new))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|err| PathError::new("readdirent", name, err))?;
        entries.sort_by_key(|entry| DirEntry::name(entry));
        Ok(entries
            .into_iter()
            .map(|entry| Box::new(entry) as Box<dyn DirEntry>)
            .collect())
    }

    fn getenv(&self, key: &str) -> String {
        self.lookup_env(key).unwrap_or_default()
    }

    fn lookup_env(&self, key: &str) -> Option<String> {
        if key.is_empty() || key.contains(['=', '\0']) {
            return None;
        }
        std::env::var_os(key).map(|value| value.to_string_lossy().into_owned())
    }

    fn setenv(&self, key: &str, value: &str) -> io::Result<()> {
        check_env_key("setenv", key)?;
        if value.contains('\0') {
            return Err(PathError::invalid("setenv", key).into());
        }
        std::env::set_var(key, value);
        Ok(())
    }

    fn unsetenv(&self, key: &str) -> io::Result<()> {
        check_env_key("unsetenv", key)?;
        std::env::remove_var(key);
        Ok(())
    }

    fn environ(&self) -> Vec<String> {
        std::env::vars_os()
            .map(|(key, value)| format!("{}={}", key.to_string_lossy(), value.to_string_lossy()))
            .collect()
    }

    fn getwd(&self) -> io::Result<String> {
        Ok(std::env::current_dir()?.to_string_lossy().into_owned())
    }

    fn chdir(&self, dir: &str) -> io::Result<()> {
        std::env::set_current_dir(dir).map_err(|err| PathError::new("chdir", dir, err))?;
        Ok(())
    }

    fn temp_dir(&self) -> String {
        std::env::temp_dir().to_string_lossy().into_owned()
    }

    fn user_cache_dir(&self) -> io::Result<String> {
        if cfg!(windows) {
            windows_dir("LocalAppData")
        } else if cfg!(target_os = "macos") {
            home_dir("HOME", "Library/Caches")
        } else {
            xdg_dir("XDG_CACHE_HOME", ".cache")
        }
    }

    fn user_config_dir(&self) -> io::Result<String> {
        if cfg!(windows) {
            windows_dir("AppData")
        } else if cfg!(target_os = "macos") {
            home_dir("HOME", "Library/Application Support")
        } else {
            xdg_dir("XDG_CONFIG_HOME", ".config")
        }
    }

    fn user_home_dir(&self) -> io::Result<String> {
        if cfg!(windows) {
            return windows_dir("USERPROFILE");
        }
        match std::env::var("HOME") {
            Ok(home) if !home.is_empty() => Ok(home),
            _ => Err(io::Error::new(
                io::ErrorKind::NotFound,
                "$HOME is not defined",
            )),
        }
    }

    fn hostname(&self) -> io::Result<String> {
        for file in ["/proc/sys/kernel/hostname", "/etc/hostname"] {
            if let Ok(name) = std::fs::read_to_string(file) {
                let name = name.trim();
                if !name.is_empty() {
                    return Ok(name.to_string());
                }
            }
        }
        for var in ["HOSTNAME", "COMPUTERNAME"] {
            if let Ok(name) = std::env::var(var) {
                if !name.is_empty() {
                    return Ok(name);
                }
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "hostname: no source available",
        ))
    }

    fn getpid(&self) -> u32 {
        std::process::id()
    }

    fn getppid(&self) -> u32 {
        #[cfg(unix)]
        return std::os::unix::process::parent_id();
        #[cfg(not(unix))]
        return 0;
    }

    fn start_process(
        &self,
        name: &str,
        argv: &[&str],
        attr: ProcAttr,
    ) -> io::Result<Box<dyn Process>> {
        let mut command = std::process::Command::new(name);
        command.args(argv.iter().skip(1));
        if let Some(dir) = &attr.dir {
            command.current_dir(dir);
        }
        if let Some(env) = &attr.env {
            command.env_clear();
            for pair in env {
                if let Some((key, value)) = pair.split_once('=') {
                    command.env(key, value);
                }
            }
        }

        let child = command
            .spawn()
            .map_err(|err| PathError::new("fork/exec", name, err))?;
        debug!(name, pid = child.id(), "started process");
        Ok(Box::new(SystemProcess::new(child)))
    }
}

/// The real [File], an open [std::fs::File].
#[derive(Debug)]
pub struct SystemFile {
    name: String,
    stream: Stream<std::fs::File>,
}

impl SystemFile {
    /// Wrap an open file, remembering the name it was opened with.
    pub fn new(name: impl Into<String>, file: std::fs::File) -> Self {
        Self {
            name: name.into(),
            stream: Stream::new(file),
        }
    }

    fn file(&self, op: &'static str) -> io::Result<&std::fs::File> {
        self.stream.get_ref().ok_or_else(|| {
            PathError::new(
                op,
                self.name.clone(),
                io::Error::new(io::ErrorKind::BrokenPipe, "file already closed"),
            )
            .into()
        })
    }

    fn wrap(&self, op: &'static str, err: io::Error) -> io::Error {
        PathError::new(op, self.name.clone(), err).into()
    }
}

impl Reader for SystemFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file("read")?;
        self.stream.read(buf).map_err(|err| self.wrap("read", err))
    }
}

impl Writer for SystemFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file("write")?;
        self.stream.write(buf).map_err(|err| self.wrap("write", err))
    }
}

impl StringWriter for SystemFile {
    fn write_string(&mut self, s: &str) -> io::Result<usize> {
        self.file("write")?;
        self.stream.write_string(s).map_err(|err| self.wrap("write", err))
    }
}

impl Seeker for SystemFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file("seek")?;
        self.stream.seek(pos).map_err(|err| self.wrap("seek", err))
    }
}

impl Closer for SystemFile {
    fn close(&mut self) -> io::Result<()> {
        self.file("close")?;
        trace!(name = %self.name, "close file");
        self.stream.close()
    }
}

#[cfg(unix)]
fn read_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(unix)]
fn write_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::write_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &std::fs::File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}

#[cfg(windows)]
fn write_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_write(file, buf, offset)
}

#[cfg(not(any(unix, windows)))]
fn read_at(_: &std::fs::File, _: &mut [u8], _: u64) -> io::Result<usize> {
    Err(io::ErrorKind::Unsupported.into())
}

#[cfg(not(any(unix, windows)))]
fn write_at(_: &std::fs::File, _: &[u8], _: u64) -> io::Result<usize> {
    Err(io::ErrorKind::Unsupported.into())
}

impl ReaderAt for SystemFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        read_at(self.file("read")?, buf, offset).map_err(|err| self.wrap("read", err))
    }
}

impl WriterAt for SystemFile {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize> {
        write_at(self.file("write")?, buf, offset).map_err(|err| self.wrap("write", err))
    }
}

impl File for SystemFile {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn stat(&self) -> io::Result<Box<dyn FileInfo>> {
        let metadata = self
            .file("stat")?
            .metadata()
            .map_err(|err| self.wrap("stat", err))?;
        Ok(Box::new(Info::new(base_name(&self.name), metadata)))
    }

    fn sync(&mut self) -> io::Result<()> {
        self.file("sync")?
            .sync_all()
            .map_err(|err| self.wrap("sync", err))
    }

    fn truncate(&mut self, size: u64) -> io::Result<()> {
        self.file("truncate")?
            .set_len(size)
            .map_err(|err| self.wrap("truncate", err))
    }
}

/// The real [Process], a spawned [std::process::Child].
#[derive(Debug)]
pub struct SystemProcess {
    pid: u32,
    child: Option<Child>,
}

impl SystemProcess {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Some(child),
        }
    }

    fn child(&mut self) -> io::Result<&mut Child> {
        self.child
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "os: process already released"))
    }
}

impl Process for SystemProcess {
    fn pid(&self) -> u32 {
        self.pid
    }

    fn kill(&mut self) -> io::Result<()> {
        self.signal(Signal::Kill)
    }

    fn signal(&mut self, sig: Signal) -> io::Result<()> {
        let pid = self.pid;
        let child = self.child()?;
        if sig != Signal::Kill {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("os: unsupported signal {sig}"),
            ));
        }
        debug!(pid, %sig, "signal process");
        child.kill()
    }

    fn wait(&mut self) -> io::Result<ProcessState> {
        let pid = self.pid;
        let status = self.child()?.wait()?;
        let state = ProcessState::from_status(pid, status);
        debug!(pid, %state, "process exited");
        Ok(state)
    }

    fn release(&mut self) -> io::Result<()> {
        self.child()?;
        self.child = None;
        Ok(())
    }
}
