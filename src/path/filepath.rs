//! Manipulation of file system paths using the separators of the host OS.
//!
//! On unix the lexical functions agree with [crate::path]. On Windows both `\` and `/`
//! are accepted as separators, volume names (`C:`, `\\host\share`) are kept intact,
//! and results use `\`.

use std::io;

use tracing::trace;
use unimock::unimock;

use super::Error;
use crate::io::fs::{DirEntry, FileInfo, Info, Mode};

/// The OS path separator.
pub const SEPARATOR: char = std::path::MAIN_SEPARATOR;

/// The separator of path lists such as `$PATH`.
pub const LIST_SEPARATOR: char = if cfg!(windows) { ';' } else { ':' };

/// How a walk continues after visiting a path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkControl {
    /// Keep walking.
    Continue,
    /// Skip the directory just visited. When returned for a file, skip the rest of its directory.
    SkipDir,
    /// Stop the walk without an error.
    SkipAll,
}

/// Callback for [FilePath::walk].
pub trait WalkVisitor {
    /// Visit `path`. `info` is the error if the path could not be described or listed.
    fn visit(&mut self, path: &str, info: io::Result<&dyn FileInfo>) -> io::Result<WalkControl>;
}

impl<F> WalkVisitor for F
where
    F: FnMut(&str, io::Result<&dyn FileInfo>) -> io::Result<WalkControl>,
{
    fn visit(&mut self, path: &str, info: io::Result<&dyn FileInfo>) -> io::Result<WalkControl> {
        self(path, info)
    }
}

/// Callback for [FilePath::walk_dir].
pub trait WalkDirVisitor {
    /// Visit `path`, described by `entry` or by the error reading it.
    fn visit(&mut self, path: &str, entry: io::Result<&dyn DirEntry>) -> io::Result<WalkControl>;
}

impl<F> WalkDirVisitor for F
where
    F: FnMut(&str, io::Result<&dyn DirEntry>) -> io::Result<WalkControl>,
{
    fn visit(&mut self, path: &str, entry: io::Result<&dyn DirEntry>) -> io::Result<WalkControl> {
        self(path, entry)
    }
}

/// Pins down the closure signature of a [WalkVisitor].
pub fn walk_fn<F>(f: F) -> F
where
    F: FnMut(&str, io::Result<&dyn FileInfo>) -> io::Result<WalkControl>,
{
    f
}

/// Pins down the closure signature of a [WalkDirVisitor].
pub fn walk_dir_fn<F>(f: F) -> F
where
    F: FnMut(&str, io::Result<&dyn DirEntry>) -> io::Result<WalkControl>,
{
    f
}

/// OS path manipulation and traversal.
#[unimock(api = FilePathMock)]
pub trait FilePath: Send + Sync {
    /// An absolute representation of `path`, joined with the working directory if relative.
    fn abs(&self, path: &str) -> io::Result<String>;

    /// The last element of `path`.
    fn base(&self, path: &str) -> String;

    /// The shortest lexically equivalent path.
    fn clean(&self, path: &str) -> String;

    /// All but the last element of `path`.
    fn dir(&self, path: &str) -> String;

    /// The path after evaluating symbolic links.
    fn eval_symlinks(&self, path: &str) -> io::Result<String>;

    /// The file name extension.
    fn ext(&self, path: &str) -> String;

    /// Replace each slash with the OS separator.
    fn from_slash(&self, path: &str) -> String;

    /// Names of all files matching `pattern`.
    fn glob(&self, pattern: &str) -> Result<Vec<String>, Error>;

    /// Whether `path` is absolute.
    fn is_abs(&self, path: &str) -> bool;

    /// Whether `path` is lexically local: relative, non-empty and not escaping its directory.
    fn is_local(&self, path: &str) -> bool;

    /// Join the non-empty elements with the separator and clean the result.
    fn join(&self, elems: &[&str]) -> String;

    /// Convert a slash separated, valid [crate::io::fs] path to an OS path.
    fn localize(&self, path: &str) -> Result<String, Error>;

    /// Whether `name` matches the shell pattern `pattern`.
    fn matches(&self, pattern: &str, name: &str) -> Result<bool, Error>;

    /// A relative path that is lexically equivalent to `target` when joined to `base`.
    fn rel(&self, base: &str, target: &str) -> Result<String, Error>;

    /// Split `path` after its final separator.
    fn split(&self, path: &str) -> (String, String);

    /// Split a list of paths joined by [LIST_SEPARATOR].
    fn split_list(&self, path: &str) -> Vec<String>;

    /// Replace each OS separator with a slash.
    fn to_slash(&self, path: &str) -> String;

    /// The leading volume name, empty on unix.
    fn volume_name(&self, path: &str) -> String;

    /// Walk the tree rooted at `root` in lexical order, describing each path with a [FileInfo].
    fn walk(&self, root: &str, visitor: &mut dyn WalkVisitor) -> io::Result<()>;

    /// Walk the tree rooted at `root` in lexical order, describing each path with a [DirEntry].
    fn walk_dir(&self, root: &str, visitor: &mut dyn WalkDirVisitor) -> io::Result<()>;
}

/// The real [FilePath] implementation for the host OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsFilePath;

impl FilePath for OsFilePath {
    fn abs(&self, path: &str) -> io::Result<String> {
        abs(path)
    }

    fn base(&self, path: &str) -> String {
        base(path).to_string()
    }

    fn clean(&self, path: &str) -> String {
        clean(path)
    }

    fn dir(&self, path: &str) -> String {
        dir(path)
    }

    fn eval_symlinks(&self, path: &str) -> io::Result<String> {
        eval_symlinks(path)
    }

    fn ext(&self, path: &str) -> String {
        ext(path).to_string()
    }

    fn from_slash(&self, path: &str) -> String {
        from_slash(path)
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>, Error> {
        glob(pattern)
    }

    fn is_abs(&self, path: &str) -> bool {
        is_abs(path)
    }

    fn is_local(&self, path: &str) -> bool {
        is_local(path)
    }

    fn join(&self, elems: &[&str]) -> String {
        join(elems)
    }

    fn localize(&self, path: &str) -> Result<String, Error> {
        localize(path)
    }

    fn matches(&self, pattern: &str, name: &str) -> Result<bool, Error> {
        matches(pattern, name)
    }

    fn rel(&self, base: &str, target: &str) -> Result<String, Error> {
        rel(base, target)
    }

    fn split(&self, path: &str) -> (String, String) {
        let (dir, file) = split(path);
        (dir.to_string(), file.to_string())
    }

    fn split_list(&self, path: &str) -> Vec<String> {
        split_list(path)
    }

    fn to_slash(&self, path: &str) -> String {
        to_slash(path)
    }

    fn volume_name(&self, path: &str) -> String {
        volume_name(path).to_string()
    }

    fn walk(&self, root: &str, visitor: &mut dyn WalkVisitor) -> io::Result<()> {
        walk(root, visitor)
    }

    fn walk_dir(&self, root: &str, visitor: &mut dyn WalkDirVisitor) -> io::Result<()> {
        walk_dir(root, visitor)
    }
}

/// Whether `c` separates path elements on this OS.
pub fn is_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

fn os_sep_byte() -> u8 {
    SEPARATOR as u8
}

/// Length of the leading volume name of `path`.
fn volume_name_len(path: &str) -> usize {
    if !cfg!(windows) {
        return 0;
    }

    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return 2;
    }

    // UNC: \\host\share
    let is_sep = |b: u8| b == b'/' || b == b'\\';
    if bytes.len() >= 5 && is_sep(bytes[0]) && is_sep(bytes[1]) && !is_sep(bytes[2]) && bytes[2] != b'.' {
        let mut n = 3;
        while n < bytes.len() && !is_sep(bytes[n]) {
            n += 1;
        }
        n += 1;
        if n < bytes.len() && !is_sep(bytes[n]) {
            while n < bytes.len() && !is_sep(bytes[n]) {
                n += 1;
            }
            return n;
        }
    }
    0
}

/// The leading volume name of `path`: `"C:"` or `"\\host\share"` on Windows, empty on unix.
pub fn volume_name(path: &str) -> &str {
    &path[..volume_name_len(path)]
}

/// The shortest path lexically equivalent to `path`, see [crate::path::clean].
pub fn clean(path: &str) -> String {
    let vol_len = volume_name_len(path);
    let (vol, rest) = path.split_at(vol_len);
    if rest.is_empty() {
        if vol_len > 1 && path.starts_with(is_separator) {
            return from_slash(vol);
        }
        return format!("{vol}.");
    }

    let rest = if cfg!(windows) {
        rest.replace('/', "\\")
    } else {
        rest.to_string()
    };
    format!("{}{}", from_slash(vol), super::clean_with(&rest, os_sep_byte()))
}

/// Replace each slash with [SEPARATOR].
pub fn from_slash(path: &str) -> String {
    if SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace('/', &SEPARATOR.to_string())
    }
}

/// Replace each [SEPARATOR] with a slash.
pub fn to_slash(path: &str) -> String {
    if SEPARATOR == '/' {
        path.to_string()
    } else {
        path.replace(SEPARATOR, "/")
    }
}

/// Split `path` immediately after its final separator.
pub fn split(path: &str) -> (&str, &str) {
    let vol_len = volume_name_len(path);
    match path[vol_len..].rfind(is_separator) {
        Some(i) => path.split_at(vol_len + i + 1),
        None => path.split_at(vol_len),
    }
}

/// Join the non-empty `elems` with [SEPARATOR] and clean the result.
pub fn join(elems: &[&str]) -> String {
    let parts: Vec<&str> = elems.iter().copied().filter(|e| !e.is_empty()).collect();
    if parts.is_empty() {
        return String::new();
    }
    clean(&parts.join(&SEPARATOR.to_string()))
}

/// The file name extension, see [crate::path::ext].
pub fn ext(path: &str) -> &str {
    for (i, c) in path.char_indices().rev() {
        if is_separator(c) {
            break;
        }
        if c == '.' {
            return &path[i..];
        }
    }
    ""
}

/// The last element of `path`, see [crate::path::base].
pub fn base(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches(is_separator);
    let trimmed = &trimmed[volume_name_len(trimmed)..];
    let last = match trimmed.rfind(is_separator) {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    };
    if last.is_empty() {
        return if SEPARATOR == '/' { "/" } else { "\\" };
    }
    last
}

/// All but the last element of `path`, cleaned, with the volume name kept.
pub fn dir(path: &str) -> String {
    let vol = volume_name(path);
    let rest = &path[vol.len()..];
    let upto = rest.rfind(is_separator).map(|i| i + 1).unwrap_or(0);
    let dir = clean(&rest[..upto]);
    if dir == "." && vol.len() > 2 {
        return vol.to_string();
    }
    format!("{vol}{dir}")
}

/// Whether `path` is absolute.
pub fn is_abs(path: &str) -> bool {
    if !cfg!(windows) {
        return path.starts_with('/');
    }
    let vol_len = volume_name_len(path);
    if vol_len == 0 {
        return false;
    }
    if vol_len > 2 {
        // UNC paths are always absolute
        return true;
    }
    path[vol_len..].starts_with(is_separator)
}

/// Whether `path` is lexically local: non-empty, relative, and not escaping
/// the directory it is evaluated in (no leading `..` after cleaning).
pub fn is_local(path: &str) -> bool {
    if path.is_empty() || is_abs(path) || (cfg!(windows) && !volume_name(path).is_empty()) {
        return false;
    }

    let has_dots = path
        .split(is_separator)
        .any(|part| part == "." || part == "..");
    let cleaned;
    let path = if has_dots {
        cleaned = clean(path);
        cleaned.as_str()
    } else {
        path
    };

    if path == ".." {
        return false;
    }
    let mut prefix = String::from("..");
    prefix.push(SEPARATOR);
    !path.starts_with(&prefix)
}

/// Convert a slash separated [crate::io::fs] path into an OS path.
///
/// Fails for paths which are not [crate::io::fs::valid_path], or which
/// would change meaning on this OS.
pub fn localize(path: &str) -> Result<String, Error> {
    if !crate::io::fs::valid_path(path) || path.contains('\0') {
        return Err(Error::InvalidPath(path.to_string()));
    }
    if cfg!(windows) && (path.contains(['\\', ':']) || !volume_name(path).is_empty()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(from_slash(path))
}

/// Whether `name` matches the shell pattern `pattern`, see [crate::path::matches].
///
/// On Windows, `\` is a separator rather than an escape.
pub fn matches(pattern: &str, name: &str) -> Result<bool, Error> {
    if cfg!(windows) {
        super::matches(&to_slash(pattern), &to_slash(name))
    } else {
        super::matches(pattern, name)
    }
}

fn same_word(a: &str, b: &str) -> bool {
    if cfg!(windows) {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

/// A relative path that is lexically equivalent to `target` when joined to `base`.
///
/// Fails when `target` cannot be made relative to `base`, for instance when one is absolute and the other is not.
pub fn rel(base_path: &str, target_path: &str) -> Result<String, Error> {
    let base_vol = volume_name(base_path);
    let target_vol = volume_name(target_path);
    let base = clean(base_path);
    let target = clean(target_path);
    if same_word(&target, &base) {
        return Ok(".".to_string());
    }

    let not_relative = || Error::NotRelative {
        base: base_path.to_string(),
        target: target_path.to_string(),
    };

    let mut base = &base[base_vol.len()..];
    let target = &target[target_vol.len()..];
    let sep_str = SEPARATOR.to_string();
    if base == "." {
        base = "";
    } else if base.is_empty() && base_vol.len() > 2 {
        base = &sep_str;
    }

    let base_slashed = base.starts_with(SEPARATOR);
    let target_slashed = target.starts_with(SEPARATOR);
    if base_slashed != target_slashed || !same_word(base_vol, target_vol) {
        return Err(not_relative());
    }

    let sep = os_sep_byte();
    let (bb, tb) = (base.as_bytes(), target.as_bytes());
    let (bl, tl) = (bb.len(), tb.len());
    let (mut b0, mut bi, mut t0, mut ti) = (0, 0, 0, 0);
    loop {
        while bi < bl && bb[bi] != sep {
            bi += 1;
        }
        while ti < tl && tb[ti] != sep {
            ti += 1;
        }
        if !same_word(&target[t0..ti], &base[b0..bi]) || (bi == bl && ti == tl) {
            break;
        }
        if bi < bl {
            bi += 1;
        }
        if ti < tl {
            ti += 1;
        }
        b0 = bi;
        t0 = ti;
    }

    if &base[b0..bi] == ".." {
        return Err(not_relative());
    }

    if b0 != bl {
        // base elements left: go up before going down
        let seps = base[b0..bl].matches(SEPARATOR).count();
        let mut out = String::from("..");
        for _ in 0..seps {
            out.push(SEPARATOR);
            out.push_str("..");
        }
        if t0 != tl {
            out.push(SEPARATOR);
            out.push_str(&target[t0..]);
        }
        return Ok(out);
    }

    Ok(target[t0..].to_string())
}

/// Split a list of paths joined by [LIST_SEPARATOR]. An empty string gives an empty list.
///
/// On Windows, separators inside double quotes do not split and the quotes are removed.
pub fn split_list(path: &str) -> Vec<String> {
    if path.is_empty() {
        return vec![];
    }
    if !cfg!(windows) {
        return path.split(LIST_SEPARATOR).map(str::to_string).collect();
    }

    let mut list = vec![];
    let mut current = String::new();
    let mut quoted = false;
    for c in path.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c == LIST_SEPARATOR && !quoted => list.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    list.push(current);
    list
}

/// An absolute representation of `path`. Relative paths are joined with the current working directory.
pub fn abs(path: &str) -> io::Result<String> {
    if is_abs(path) {
        return Ok(clean(path));
    }
    let wd = std::env::current_dir()?;
    Ok(join(&[&wd.to_string_lossy(), path]))
}

/// The path after evaluating symbolic links. A relative `path` gives a result relative to the working directory.
pub fn eval_symlinks(path: &str) -> io::Result<String> {
    let resolved = std::fs::canonicalize(path)?;
    let resolved = resolved.to_string_lossy().into_owned();
    if is_abs(path) {
        return Ok(resolved);
    }
    let wd = std::fs::canonicalize(std::env::current_dir()?)?;
    rel(&wd.to_string_lossy(), &resolved).map_err(io::Error::from)
}

/// Names of all files matching `pattern`, in lexical order per directory.
///
/// Unreadable directories are skipped. The only possible error is [Error::BadPattern].
pub fn glob(pattern: &str) -> Result<Vec<String>, Error> {
    glob_depth(pattern, 0)
}

const MAX_GLOB_DEPTH: usize = 10_000;

fn glob_depth(pattern: &str, depth: usize) -> Result<Vec<String>, Error> {
    if depth > MAX_GLOB_DEPTH {
        return Err(Error::BadPattern);
    }
    matches(pattern, "")?;

    if !super::has_meta(pattern) {
        return Ok(match std::fs::symlink_metadata(pattern) {
            Ok(_) => vec![pattern.to_string()],
            Err(_) => vec![],
        });
    }

    let (dir, file) = split(pattern);
    let vol_len = volume_name_len(dir);
    let dir = match &dir[vol_len..] {
        "" => {
            if vol_len == 0 {
                ".".to_string()
            } else {
                dir.to_string()
            }
        }
        rest if rest.len() == 1 && rest.starts_with(is_separator) => dir.to_string(),
        _ => dir[..dir.len() - 1].to_string(),
    };

    let mut found = vec![];
    if !super::has_meta(&dir[vol_len..]) {
        glob_dir(&dir, file, &mut found)?;
        return Ok(found);
    }

    if dir == pattern {
        return Err(Error::BadPattern);
    }

    for dir in glob_depth(&dir, depth + 1)? {
        glob_dir(&dir, file, &mut found)?;
    }
    Ok(found)
}

fn glob_dir(dir: &str, pattern: &str, found: &mut Vec<String>) -> Result<(), Error> {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return Ok(());
    };
    let mut names: Vec<String> = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    for name in names {
        if matches(pattern, &name)? {
            found.push(join(&[dir, &name]));
        }
    }
    Ok(())
}

fn walk_error(err: walkdir::Error) -> io::Error {
    match err.into_io_error() {
        Some(err) => err,
        None => io::Error::new(io::ErrorKind::Other, "filesystem loop detected"),
    }
}

fn path_string(path: &std::path::Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Walk the tree rooted at `root` in lexical order, visiting each path with its [FileInfo].
///
/// Symbolic links are not followed. Errors reading a path are passed to the visitor,
/// which decides whether to stop the walk by returning an error.
pub fn walk(root: &str, visitor: &mut dyn WalkVisitor) -> io::Result<()> {
    let mut iter = walkdir::WalkDir::new(root).sort_by_file_name().into_iter();
    while let Some(next) = iter.next() {
        let control = match next {
            Ok(entry) => {
                let path = path_string(entry.path());
                match entry.metadata() {
                    Ok(metadata) => {
                        let name = entry.file_name().to_string_lossy().into_owned();
                        let info = Info::new(name, metadata);
                        visitor.visit(&path, Ok(&info as &dyn FileInfo))?
                    }
                    Err(err) => visitor.visit(&path, Err(walk_error(err)))?,
                }
            }
            Err(err) => {
                let path = err.path().map(path_string).unwrap_or_else(|| root.to_string());
                visitor.visit(&path, Err(walk_error(err)))?
            }
        };

        match control {
            WalkControl::Continue => {}
            WalkControl::SkipDir => iter.skip_current_dir(),
            WalkControl::SkipAll => {
                trace!(root, "walk stopped");
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Walk the tree rooted at `root` in lexical order, visiting each path with its [DirEntry].
pub fn walk_dir(root: &str, visitor: &mut dyn WalkDirVisitor) -> io::Result<()> {
    let mut iter = walkdir::WalkDir::new(root).sort_by_file_name().into_iter();
    while let Some(next) = iter.next() {
        let control = match next {
            Ok(entry) => {
                let path = path_string(entry.path());
                let walked = WalkedEntry(entry);
                visitor.visit(&path, Ok(&walked as &dyn DirEntry))?
            }
            Err(err) => {
                let path = err.path().map(path_string).unwrap_or_else(|| root.to_string());
                visitor.visit(&path, Err(walk_error(err)))?
            }
        };

        match control {
            WalkControl::Continue => {}
            WalkControl::SkipDir => iter.skip_current_dir(),
            WalkControl::SkipAll => return Ok(()),
        }
    }
    Ok(())
}

/// A [DirEntry] produced by the walk, including the root itself.
struct WalkedEntry(walkdir::DirEntry);

impl DirEntry for WalkedEntry {
    fn name(&self) -> String {
        self.0.file_name().to_string_lossy().into_owned()
    }

    fn is_dir(&self) -> bool {
        self.0.file_type().is_dir()
    }

    fn file_type(&self) -> Box<dyn crate::io::fs::FileMode> {
        Box::new(Mode::from_file_type(&self.0.file_type()))
    }

    fn info(&self) -> io::Result<Box<dyn FileInfo>> {
        let metadata = self.0.metadata().map_err(walk_error)?;
        Ok(Box::new(Info::new(DirEntry::name(self), metadata)))
    }
}
