//! Read-only, slash separated file system interfaces.
//!
//! [Fs] is the minimal interface: a file system that can open files by name.
//! The extension traits ([GlobFs], [ReadDirFs], [ReadFileFs], [StatFs], [SubFs])
//! add operations which implementations may provide more efficiently than
//! the generic helpers in this module.
//!
//! Names passed to a file system are always slash separated and unrooted, see [valid_path].

use std::fmt;
use std::io;
use std::time::SystemTime;

use unimock::unimock;

use super::{Closer, Reader};
use crate::path;

mod dir;

pub use dir::{DirFile, DirFs};

/// The mode and permission bits of a file.
#[unimock(api = FileModeMock)]
pub trait FileMode: fmt::Display + Send + Sync {
    /// Whether the mode describes a directory.
    fn is_dir(&self) -> bool;

    /// Whether the mode describes a regular file, i.e. no type bits are set.
    fn is_regular(&self) -> bool;

    /// The unix permission bits (`0o777`).
    fn perm(&self) -> u32;
}

/// Describes a file, as returned by `stat`.
#[unimock(api = FileInfoMock)]
pub trait FileInfo: Send + Sync {
    /// Base name of the file.
    fn name(&self) -> String;

    /// Length in bytes for regular files.
    fn size(&self) -> u64;

    /// File mode bits.
    fn mode(&self) -> Box<dyn FileMode>;

    /// Modification time.
    fn mod_time(&self) -> SystemTime;

    /// Abbreviation for `mode().is_dir()`.
    fn is_dir(&self) -> bool;
}

/// An entry read from a directory.
#[unimock(api = DirEntryMock)]
pub trait DirEntry: Send + Sync {
    /// Base name of the entry.
    fn name(&self) -> String;

    /// Whether the entry describes a directory.
    fn is_dir(&self) -> bool;

    /// The type bits of the entry. Permission bits are not included.
    fn file_type(&self) -> Box<dyn FileMode>;

    /// The full [FileInfo] of the entry, which may involve a system call.
    fn info(&self) -> io::Result<Box<dyn FileInfo>>;
}

/// An open file in a [Fs].
#[unimock(api = FileMock)]
pub trait File: Reader + Closer + Send + Sync {
    /// Describe the open file.
    fn stat(&self) -> io::Result<Box<dyn FileInfo>>;
}

/// An open directory in a [Fs].
#[unimock(api = ReadDirFileMock)]
pub trait ReadDirFile: File {
    /// Read up to `n` entries in directory order, or all remaining entries when `n` is `0`.
    ///
    /// With `n > 0`, an exhausted directory reports [io::ErrorKind::UnexpectedEof].
    fn read_dir(&mut self, n: usize) -> io::Result<Vec<Box<dyn DirEntry>>>;
}

/// A file system.
#[unimock(api = FsMock)]
pub trait Fs: Send + Sync {
    /// Open the named file.
    fn open(&self, name: &str) -> io::Result<Box<dyn File>>;
}

/// A [Fs] with its own glob implementation.
#[unimock(api = GlobFsMock)]
pub trait GlobFs: Fs {
    /// Names of all files matching `pattern`, see [path::matches] for the syntax.
    fn glob(&self, pattern: &str) -> io::Result<Vec<String>>;
}

/// A [Fs] which can list directories.
#[unimock(api = ReadDirFsMock)]
pub trait ReadDirFs: Fs {
    /// Read the named directory, sorted by file name.
    fn read_dir(&self, name: &str) -> io::Result<Vec<Box<dyn DirEntry>>>;
}

/// A [Fs] which can read whole files.
#[unimock(api = ReadFileFsMock)]
pub trait ReadFileFs: Fs {
    /// Read the named file.
    fn read_file(&self, name: &str) -> io::Result<Vec<u8>>;
}

/// A [Fs] which can describe files without opening them.
#[unimock(api = StatFsMock)]
pub trait StatFs: Fs {
    /// Describe the named file.
    fn stat(&self, name: &str) -> io::Result<Box<dyn FileInfo>>;
}

/// A [Fs] which can produce sub trees of itself.
#[unimock(api = SubFsMock)]
pub trait SubFs: Fs {
    /// The file system rooted at `dir`.
    fn sub(&self, dir: &str) -> io::Result<Box<dyn Fs>>;
}

/// Records an error and the operation and file path that caused it.
#[derive(Debug)]
pub struct PathError {
    /// The failing operation, e.g. `"open"`.
    pub op: &'static str,
    /// The path the operation was applied to.
    pub path: String,
    /// The underlying error.
    pub err: io::Error,
}

impl PathError {
    pub(crate) fn new(op: &'static str, path: impl Into<String>, err: io::Error) -> Self {
        Self {
            op,
            path: path.into(),
            err,
        }
    }

    pub(crate) fn invalid(op: &'static str, path: impl Into<String>) -> Self {
        Self::new(
            op,
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "invalid argument"),
        )
    }
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.op, self.path, self.err)
    }
}

impl std::error::Error for PathError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

impl From<PathError> for io::Error {
    fn from(err: PathError) -> Self {
        io::Error::new(err.err.kind(), err)
    }
}

/// Whether `name` may be passed to a [Fs].
///
/// Valid names are slash separated, unrooted and contain no empty, `.` or `..` elements.
/// The name `"."` denotes the root itself.
pub fn valid_path(name: &str) -> bool {
    if name == "." {
        return true;
    }
    name.split('/').all(|elem| !elem.is_empty() && elem != "." && elem != "..")
}

/// Read the named file from any [Fs], by opening it and reading until end of stream.
pub fn read_file<F: Fs + ?Sized>(fsys: &F, name: &str) -> io::Result<Vec<u8>> {
    let mut file = fsys.open(name)?;
    let result = super::read_all(&mut file);
    let closed = file.close();
    let data = result?;
    closed?;
    Ok(data)
}

/// Describe the named file in any [Fs], by opening it.
pub fn stat<F: Fs + ?Sized>(fsys: &F, name: &str) -> io::Result<Box<dyn FileInfo>> {
    let mut file = fsys.open(name)?;
    let info = file.stat();
    file.close()?;
    info
}

/// Glob over any file system which can list directories and describe files.
///
/// Directories that cannot be read are skipped. The only error is a malformed pattern.
pub fn glob<F: ReadDirFs + StatFs + ?Sized>(fsys: &F, pattern: &str) -> io::Result<Vec<String>> {
    glob_depth(fsys, pattern, 0)
}

const MAX_GLOB_DEPTH: usize = 10_000;

fn glob_depth<F: ReadDirFs + StatFs + ?Sized>(
    fsys: &F,
    pattern: &str,
    depth: usize,
) -> io::Result<Vec<String>> {
    if depth > MAX_GLOB_DEPTH {
        return Err(path::Error::BadPattern.into());
    }

    // validate the whole pattern up front
    path::matches(pattern, "")?;

    if !path::has_meta(pattern) {
        return Ok(match StatFs::stat(fsys, pattern) {
            Ok(_) => vec![pattern.to_string()],
            Err(_) => vec![],
        });
    }

    let (dir, file) = path::split(pattern);
    let dir = match dir {
        "" => ".",
        dir => &dir[..dir.len() - 1],
    };

    let mut matches = vec![];
    if !path::has_meta(dir) {
        glob_dir(fsys, dir, file, &mut matches)?;
        return Ok(matches);
    }

    if dir == pattern {
        return Err(path::Error::BadPattern.into());
    }

    for dir in glob_depth(fsys, dir, depth + 1)? {
        glob_dir(fsys, &dir, file, &mut matches)?;
    }
    Ok(matches)
}

fn glob_dir<F: ReadDirFs + ?Sized>(
    fsys: &F,
    dir: &str,
    pattern: &str,
    matches: &mut Vec<String>,
) -> io::Result<()> {
    let Ok(entries) = ReadDirFs::read_dir(fsys, dir) else {
        return Ok(());
    };
    for entry in entries {
        let name = entry.name();
        if path::matches(pattern, &name)? {
            matches.push(path::join(&[dir, &name]));
        }
    }
    Ok(())
}

/// Mode bits in the layout used by [Mode].
pub mod mode {
    /// Directory.
    pub const DIR: u32 = 1 << 31;
    /// Append-only.
    pub const APPEND: u32 = 1 << 30;
    /// Exclusive use.
    pub const EXCLUSIVE: u32 = 1 << 29;
    /// Temporary file.
    pub const TEMPORARY: u32 = 1 << 28;
    /// Symbolic link.
    pub const SYMLINK: u32 = 1 << 27;
    /// Device file.
    pub const DEVICE: u32 = 1 << 26;
    /// Named pipe (FIFO).
    pub const NAMED_PIPE: u32 = 1 << 25;
    /// Unix domain socket.
    pub const SOCKET: u32 = 1 << 24;
    /// Setuid.
    pub const SETUID: u32 = 1 << 23;
    /// Setgid.
    pub const SETGID: u32 = 1 << 22;
    /// Unix character device, when [DEVICE] is set.
    pub const CHAR_DEVICE: u32 = 1 << 21;
    /// Sticky.
    pub const STICKY: u32 = 1 << 20;
    /// Non-regular file; nothing else is known about it.
    pub const IRREGULAR: u32 = 1 << 19;

    /// All type bits.
    pub const TYPE: u32 = DIR | SYMLINK | NAMED_PIPE | SOCKET | DEVICE | CHAR_DEVICE | IRREGULAR;
    /// Unix permission bits.
    pub const PERM: u32 = 0o777;
}

/// The real [FileMode]: type bits in the high bits, permissions in the low nine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct Mode(pub u32);

impl Mode {
    /// The mode of a file described by `metadata`.
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        Self(type_bits(&metadata.file_type()) | perm_bits(metadata))
    }

    /// The type bits of `file_type`, without permissions.
    pub fn from_file_type(file_type: &std::fs::FileType) -> Self {
        Self(type_bits(file_type))
    }

    /// The type bits.
    pub fn file_type(self) -> Mode {
        Mode(self.0 & mode::TYPE)
    }
}

#[cfg(unix)]
fn type_bits(file_type: &std::fs::FileType) -> u32 {
    use std::os::unix::fs::FileTypeExt;

    if file_type.is_dir() {
        mode::DIR
    } else if file_type.is_symlink() {
        mode::SYMLINK
    } else if file_type.is_fifo() {
        mode::NAMED_PIPE
    } else if file_type.is_socket() {
        mode::SOCKET
    } else if file_type.is_char_device() {
        mode::DEVICE | mode::CHAR_DEVICE
    } else if file_type.is_block_device() {
        mode::DEVICE
    } else {
        0
    }
}

#[cfg(not(unix))]
fn type_bits(file_type: &std::fs::FileType) -> u32 {
    if file_type.is_dir() {
        mode::DIR
    } else if file_type.is_symlink() {
        mode::SYMLINK
    } else {
        0
    }
}

#[cfg(unix)]
fn perm_bits(metadata: &std::fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;

    let raw = metadata.permissions().mode();
    let mut bits = raw & mode::PERM;
    if raw & 0o4000 != 0 {
        bits |= mode::SETUID;
    }
    if raw & 0o2000 != 0 {
        bits |= mode::SETGID;
    }
    if raw & 0o1000 != 0 {
        bits |= mode::STICKY;
    }
    bits
}

#[cfg(not(unix))]
fn perm_bits(metadata: &std::fs::Metadata) -> u32 {
    let bits = if metadata.permissions().readonly() {
        0o444
    } else {
        0o666
    };
    if metadata.is_dir() {
        bits | 0o111
    } else {
        bits
    }
}

impl FileMode for Mode {
    fn is_dir(&self) -> bool {
        self.0 & mode::DIR != 0
    }

    fn is_regular(&self) -> bool {
        self.0 & mode::TYPE == 0
    }

    fn perm(&self) -> u32 {
        self.0 & mode::PERM
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const TYPE_CHARS: &str = "dalTLDpSugct?";
        const RWX: &str = "rwxrwxrwx";

        let mut out = String::with_capacity(22);
        for (i, c) in TYPE_CHARS.chars().enumerate() {
            if self.0 & (1 << (31 - i)) != 0 {
                out.push(c);
            }
        }
        if out.is_empty() {
            out.push('-');
        }
        for (i, c) in RWX.chars().enumerate() {
            out.push(if self.0 & (1 << (8 - i)) != 0 { c } else { '-' });
        }
        f.write_str(&out)
    }
}

/// The real [FileInfo], backed by [std::fs::Metadata].
#[derive(Debug, Clone)]
pub struct Info {
    name: String,
    metadata: std::fs::Metadata,
}

impl Info {
    /// Describe a file named `name` (a base name) with the given metadata.
    pub fn new(name: impl Into<String>, metadata: std::fs::Metadata) -> Self {
        Self {
            name: name.into(),
            metadata,
        }
    }

    /// The underlying metadata.
    pub fn metadata(&self) -> &std::fs::Metadata {
        &self.metadata
    }
}

impl FileInfo for Info {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn size(&self) -> u64 {
        self.metadata.len()
    }

    fn mode(&self) -> Box<dyn FileMode> {
        Box::new(Mode::from_metadata(&self.metadata))
    }

    fn mod_time(&self) -> SystemTime {
        self.metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH)
    }

    fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }
}

/// The real [DirEntry], backed by [std::fs::DirEntry].
#[derive(Debug)]
pub struct Entry(std::fs::DirEntry);

impl Entry {
    pub(crate) fn new(entry: std::fs::DirEntry) -> Self {
        Self(entry)
    }
}

impl DirEntry for Entry {
    fn name(&self) -> String {
        self.0.file_name().to_string_lossy().into_owned()
    }

    fn is_dir(&self) -> bool {
        self.0.file_type().map(|t| t.is_dir()).unwrap_or(false)
    }

    fn file_type(&self) -> Box<dyn FileMode> {
        Box::new(
            self.0
                .file_type()
                .map(|t| Mode::from_file_type(&t))
                .unwrap_or(Mode(mode::IRREGULAR)),
        )
    }

    fn info(&self) -> io::Result<Box<dyn FileInfo>> {
        let metadata = self.0.metadata()?;
        Ok(Box::new(Info::new(DirEntry::name(self), metadata)))
    }
}
