//! Lexical manipulation of slash separated paths, such as URL paths and [crate::io::fs] names.
//!
//! The free functions in this module are the implementation.
//! The [Path] trait exposes them behind a mockable seam.

use std::fmt;
use std::io;

use unimock::unimock;

pub mod filepath;

/// Errors from path operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A malformed glob pattern.
    BadPattern,
    /// [filepath::FilePath::rel] could not express `target` relative to `base`.
    NotRelative {
        /// The base path.
        base: String,
        /// The target path.
        target: String,
    },
    /// The path cannot be used in this context.
    InvalidPath(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadPattern => write!(f, "syntax error in pattern"),
            Self::NotRelative { base, target } => {
                write!(f, "Rel: can't make {target} relative to {base}")
            }
            Self::InvalidPath(path) => write!(f, "invalid path: {path}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// Slash separated path manipulation.
#[unimock(api = PathMock)]
pub trait Path: Send + Sync {
    /// The last element of `path`.
    fn base(&self, path: &str) -> String;

    /// The shortest path equivalent to `path` by purely lexical processing.
    fn clean(&self, path: &str) -> String;

    /// All but the last element of `path`, cleaned.
    fn dir(&self, path: &str) -> String;

    /// The file name extension of `path`, including the dot.
    fn ext(&self, path: &str) -> String;

    /// Whether `path` is rooted.
    fn is_abs(&self, path: &str) -> bool;

    /// Join the non-empty `elems` with slashes and clean the result.
    fn join(&self, elems: &[&str]) -> String;

    /// Whether `name` matches the shell pattern `pattern`.
    fn matches(&self, pattern: &str, name: &str) -> Result<bool, Error>;

    /// Split `path` after its final slash into directory and file.
    fn split(&self, path: &str) -> (String, String);
}

/// The real [Path] implementation.
#[derive(Clone, Copy, Debug, Default)]
pub struct SlashPath;

impl Path for SlashPath {
    fn base(&self, path: &str) -> String {
        base(path).to_string()
    }

    fn clean(&self, path: &str) -> String {
        clean(path)
    }

    fn dir(&self, path: &str) -> String {
        dir(path)
    }

    fn ext(&self, path: &str) -> String {
        ext(path).to_string()
    }

    fn is_abs(&self, path: &str) -> bool {
        is_abs(path)
    }

    fn join(&self, elems: &[&str]) -> String {
        join(elems)
    }

    fn matches(&self, pattern: &str, name: &str) -> Result<bool, Error> {
        matches(pattern, name)
    }

    fn split(&self, path: &str) -> (String, String) {
        let (dir, file) = split(path);
        (dir.to_string(), file.to_string())
    }
}

/// The shortest path equivalent to `path`, by purely lexical processing.
///
/// Multiple slashes are replaced by one, `.` elements are removed,
/// and each `..` element is removed together with the element preceding it.
/// A `..` at the beginning of a rooted path is removed, an empty result is `"."`.
pub fn clean(path: &str) -> String {
    clean_with(path, b'/')
}

/// [clean] with a configurable separator byte.
pub(crate) fn clean_with(path: &str, sep: u8) -> String {
    let bytes = path.as_bytes();
    if bytes.is_empty() {
        return ".".to_string();
    }

    let rooted = bytes[0] == sep;
    let n = bytes.len();
    let mut out: Vec<u8> = Vec::with_capacity(n);

    // r: next byte to read, dotdot: out index where `..` backtracking stops
    let (mut r, mut dotdot) = (0, 0);
    if rooted {
        out.push(sep);
        r = 1;
        dotdot = 1;
    }

    while r < n {
        let at_end = |i: usize| i == n || bytes[i] == sep;
        if bytes[r] == sep {
            r += 1;
        } else if bytes[r] == b'.' && at_end(r + 1) {
            r += 1;
        } else if bytes[r] == b'.' && r + 1 < n && bytes[r + 1] == b'.' && at_end(r + 2) {
            r += 2;
            if out.len() > dotdot {
                out.pop();
                while out.len() > dotdot && out[out.len() - 1] != sep {
                    out.pop();
                }
                if out.len() > dotdot && out[out.len() - 1] == sep {
                    out.pop();
                }
            } else if !rooted {
                if !out.is_empty() {
                    out.push(sep);
                }
                out.extend_from_slice(b"..");
                dotdot = out.len();
            }
        } else {
            if (rooted && out.len() != 1) || (!rooted && !out.is_empty()) {
                out.push(sep);
            }
            while r < n && bytes[r] != sep {
                out.push(bytes[r]);
                r += 1;
            }
        }
    }

    if out.is_empty() {
        return ".".to_string();
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split `path` immediately after its final slash.
///
/// With no slash, the directory part is empty. `dir + file == path` always holds.
pub fn split(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    }
}

/// Join the non-empty `elems` with slashes and clean the result.
///
/// Returns an empty string when all elements are empty.
pub fn join(elems: &[&str]) -> String {
    let parts: Vec<&str> = elems.iter().copied().filter(|e| !e.is_empty()).collect();
    if parts.is_empty() {
        return String::new();
    }
    clean(&parts.join("/"))
}

/// The file name extension: the suffix of the final element starting at its last dot.
pub fn ext(path: &str) -> &str {
    for (i, b) in path.bytes().enumerate().rev() {
        match b {
            b'/' => break,
            b'.' => return &path[i..],
            _ => {}
        }
    }
    ""
}

/// The last element of `path`. Trailing slashes are removed first.
///
/// An empty path gives `"."`, a path of only slashes gives `"/"`.
pub fn base(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// All but the last element of `path`, cleaned.
pub fn dir(path: &str) -> String {
    clean(split(path).0)
}

/// Whether `path` is rooted.
pub fn is_abs(path: &str) -> bool {
    path.starts_with('/')
}

/// Whether `path` contains any of the special characters recognized by [matches].
pub fn has_meta(path: &str) -> bool {
    path.contains(['*', '?', '[', '\\'])
}

/// Whether `name` matches the shell pattern `pattern`.
///
/// The pattern syntax is:
///
/// ```text
/// pattern:
///     { term }
/// term:
///     '*'         matches any sequence of non-/ characters
///     '?'         matches any single non-/ character
///     '[' [ '^' ] { character-range } ']'
///                 character class (must be non-empty)
///     c           matches character c (c != '*', '?', '\\', '[')
///     '\\' c      matches character c
///
/// character-range:
///     c           matches character c (c != '\\', '-', ']')
///     '\\' c      matches character c
///     lo '-' hi   matches character c for lo <= c <= hi
/// ```
///
/// The whole name must match. A malformed pattern is reported as [Error::BadPattern],
/// even when the name fails to match before the malformed part is reached.
pub fn matches(pattern: &str, name: &str) -> Result<bool, Error> {
    let mut pattern = pattern;
    let mut name = name;

    'pattern: while !pattern.is_empty() {
        let (star, chunk, rest) = scan_chunk(pattern);
        pattern = rest;

        if star && chunk.is_empty() {
            // trailing * matches the rest unless it has a slash
            return Ok(!name.contains('/'));
        }

        let (t, ok) = match_chunk(chunk, name)?;
        if ok && (t.is_empty() || !pattern.is_empty()) {
            name = t;
            continue;
        }

        if star {
            // retry, skipping one more character each time, but never a slash
            for (i, c) in name.char_indices() {
                if c == '/' {
                    break;
                }
                let skipped = &name[i + c.len_utf8()..];
                let (t, ok) = match_chunk(chunk, skipped)?;
                if ok {
                    if pattern.is_empty() && !t.is_empty() {
                        continue;
                    }
                    name = t;
                    continue 'pattern;
                }
            }
        }

        // no match, but the rest of the pattern must still be well-formed
        while !pattern.is_empty() {
            let (_, chunk, rest) = scan_chunk(pattern);
            pattern = rest;
            match_chunk(chunk, "")?;
        }
        return Ok(false);
    }

    Ok(name.is_empty())
}

/// Split off the next chunk of `pattern`: leading stars, then everything up to the next star.
fn scan_chunk(pattern: &str) -> (bool, &str, &str) {
    let trimmed = pattern.trim_start_matches('*');
    let star = trimmed.len() != pattern.len();

    let bytes = trimmed.as_bytes();
    let mut in_range = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                if i + 1 < bytes.len() {
                    i += 1;
                }
            }
            b'[' => in_range = true,
            b']' => in_range = false,
            b'*' if !in_range => break,
            _ => {}
        }
        i += 1;
    }
    // i is always at an ASCII byte or the end, so this never splits a character
    let (chunk, rest) = trimmed.split_at(i);
    (star, chunk, rest)
}

/// Match `chunk` (no stars) against the start of `s`, returning the unmatched rest.
///
/// After a mismatch the chunk is still parsed to completion, to report malformed patterns.
fn match_chunk<'s>(chunk: &str, s: &'s str) -> Result<(&'s str, bool), Error> {
    let mut chunk = chunk;
    let mut s = s;
    let mut failed = false;

    while let Some(c) = chunk.chars().next() {
        if !failed && s.is_empty() {
            failed = true;
        }
        match c {
            '[' => {
                let mut r = '\0';
                if !failed {
                    if let Some(first) = s.chars().next() {
                        r = first;
                        s = &s[first.len_utf8()..];
                    }
                }
                chunk = &chunk[1..];

                let negated = chunk.starts_with('^');
                if negated {
                    chunk = &chunk[1..];
                }

                let mut matched = false;
                let mut ranges = 0;
                loop {
                    if chunk.starts_with(']') && ranges > 0 {
                        chunk = &chunk[1..];
                        break;
                    }
                    let (lo, rest) = get_esc(chunk)?;
                    chunk = rest;
                    let mut hi = lo;
                    if chunk.starts_with('-') {
                        let (h, rest) = get_esc(&chunk[1..])?;
                        hi = h;
                        chunk = rest;
                    }
                    if lo <= r && r <= hi {
                        matched = true;
                    }
                    ranges += 1;
                }
                if matched == negated {
                    failed = true;
                }
            }
            '?' => {
                if !failed {
                    if let Some(first) = s.chars().next() {
                        if first == '/' {
                            failed = true;
                        }
                        s = &s[first.len_utf8()..];
                    }
                }
                chunk = &chunk[1..];
            }
            _ => {
                let literal = if c == '\\' {
                    chunk = &chunk[1..];
                    match chunk.chars().next() {
                        Some(escaped) => escaped,
                        None => return Err(Error::BadPattern),
                    }
                } else {
                    c
                };
                if !failed {
                    match s.chars().next() {
                        Some(first) if first == literal => s = &s[first.len_utf8()..],
                        _ => failed = true,
                    }
                }
                chunk = &chunk[literal.len_utf8()..];
            }
        }
    }

    if failed {
        Ok(("", false))
    } else {
        Ok((s, true))
    }
}

/// Parse one possibly escaped character of a character class.
fn get_esc(chunk: &str) -> Result<(char, &str), Error> {
    let mut chunk = chunk;
    match chunk.chars().next() {
        None | Some('-') | Some(']') => return Err(Error::BadPattern),
        Some('\\') => {
            chunk = &chunk[1..];
        }
        Some(_) => {}
    }
    let c = chunk.chars().next().ok_or(Error::BadPattern)?;
    let rest = &chunk[c.len_utf8()..];
    if rest.is_empty() {
        return Err(Error::BadPattern);
    }
    Ok((c, rest))
}
