use std::io;
use std::path::{Path, PathBuf};

use tracing::trace;

use super::{
    valid_path, DirEntry, Entry, File, FileInfo, Fs, GlobFs, Info, PathError, ReadDirFile,
    ReadDirFs, ReadFileFs, StatFs, SubFs,
};
use crate::io::{Closer, Reader, Stream};

/// A [Fs] for the tree of files rooted at a directory of the host file system.
///
/// Names are resolved relative to the root, and must satisfy [valid_path].
#[derive(Clone, Debug)]
pub struct DirFs {
    root: PathBuf,
}

impl DirFs {
    /// A file system rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, op: &'static str, name: &str) -> io::Result<PathBuf> {
        if !valid_path(name) || (cfg!(windows) && name.contains(['\\', ':'])) {
            return Err(PathError::invalid(op, name).into());
        }
        if name == "." {
            return Ok(self.root.clone());
        }
        Ok(name.split('/').fold(self.root.clone(), |path, elem| path.join(elem)))
    }
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

impl Fs for DirFs {
    fn open(&self, name: &str) -> io::Result<Box<dyn File>> {
        DirFile::open(self, name).map(|file| Box::new(file) as Box<dyn File>)
    }
}

impl StatFs for DirFs {
    fn stat(&self, name: &str) -> io::Result<Box<dyn FileInfo>> {
        let path = self.resolve("stat", name)?;
        let metadata = std::fs::metadata(&path).map_err(|err| PathError::new("stat", name, err))?;
        Ok(Box::new(Info::new(base_name(name), metadata)))
    }
}

impl ReadFileFs for DirFs {
    fn read_file(&self, name: &str) -> io::Result<Vec<u8>> {
        let path = self.resolve("open", name)?;
        trace!(?path, "read file");
        Ok(std::fs::read(&path).map_err(|err| PathError::new("open", name, err))?)
    }
}

impl ReadDirFs for DirFs {
    fn read_dir(&self, name: &str) -> io::Result<Vec<Box<dyn DirEntry>>> {
        let path = self.resolve("open", name)?;
        let mut entries = read_sorted(&path).map_err(|err| PathError::new("readdir", name, err))?;
        Ok(entries
            .drain(..)
            .map(|entry| Box::new(entry) as Box<dyn DirEntry>)
            .collect())
    }
}

impl GlobFs for DirFs {
    fn glob(&self, pattern: &str) -> io::Result<Vec<String>> {
        super::glob(self, pattern)
    }
}

impl SubFs for DirFs {
    fn sub(&self, dir: &str) -> io::Result<Box<dyn Fs>> {
        let root = self.resolve("sub", dir)?;
        Ok(Box::new(DirFs::new(root)))
    }
}

fn read_sorted(path: &Path) -> io::Result<Vec<Entry>> {
    let mut entries = std::fs::read_dir(path)?
        .map(|entry| entry.map(Entry::new))
        .collect::<io::Result<Vec<_>>>()?;
    entries.sort_by_key(|entry| DirEntry::name(entry));
    Ok(entries)
}

/// A file or directory opened from a [DirFs].
#[derive(Debug)]
pub struct DirFile {
    name: String,
    path: PathBuf,
    kind: Kind,
}

#[derive(Debug)]
enum Kind {
    File(Stream<std::fs::File>),
    Dir {
        entries: Option<std::vec::IntoIter<Entry>>,
        closed: bool,
    },
}

impl DirFile {
    fn open(fsys: &DirFs, name: &str) -> io::Result<Self> {
        let path = fsys.resolve("open", name)?;
        let metadata = std::fs::metadata(&path).map_err(|err| PathError::new("open", name, err))?;
        trace!(?path, "open");

        let kind = if metadata.is_dir() {
            Kind::Dir {
                entries: None,
                closed: false,
            }
        } else {
            let file =
                std::fs::File::open(&path).map_err(|err| PathError::new("open", name, err))?;
            Kind::File(Stream::new(file))
        };

        Ok(Self {
            name: name.to_string(),
            path,
            kind,
        })
    }

    fn error(&self, op: &'static str, kind: io::ErrorKind, msg: &str) -> io::Error {
        PathError::new(op, self.name.clone(), io::Error::new(kind, msg.to_string())).into()
    }
}

impl Reader for DirFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.kind {
            Kind::File(stream) => stream.read(buf),
            Kind::Dir { .. } => Err(self.error("read", io::ErrorKind::InvalidInput, "is a directory")),
        }
    }
}

impl Closer for DirFile {
    fn close(&mut self) -> io::Result<()> {
        match &mut self.kind {
            Kind::File(stream) => stream.close(),
            Kind::Dir { closed: true, .. } => {
                Err(self.error("close", io::ErrorKind::BrokenPipe, "file already closed"))
            }
            Kind::Dir { entries, closed } => {
                *entries = None;
                *closed = true;
                Ok(())
            }
        }
    }
}

impl File for DirFile {
    fn stat(&self) -> io::Result<Box<dyn FileInfo>> {
        let metadata = match &self.kind {
            Kind::File(stream) => match stream.get_ref() {
                Some(file) => file.metadata(),
                None => return Err(self.error("stat", io::ErrorKind::BrokenPipe, "file already closed")),
            },
            Kind::Dir { .. } => std::fs::metadata(&self.path),
        }
        .map_err(|err| PathError::new("stat", self.name.clone(), err))?;

        Ok(Box::new(Info::new(base_name(&self.name), metadata)))
    }
}

impl ReadDirFile for DirFile {
    fn read_dir(&mut self, n: usize) -> io::Result<Vec<Box<dyn DirEntry>>> {
        match &self.kind {
            Kind::File(_) => {
                return Err(self.error("readdir", io::ErrorKind::InvalidInput, "not a directory"));
            }
            Kind::Dir { closed: true, .. } => {
                return Err(self.error("readdir", io::ErrorKind::BrokenPipe, "file already closed"));
            }
            Kind::Dir { .. } => {}
        }

        let Kind::Dir { entries, .. } = &mut self.kind else {
            return Ok(vec![]);
        };
        let iter = match entries.take() {
            Some(iter) => iter,
            None => read_sorted(&self.path)
                .map_err(|err| PathError::new("readdir", self.name.clone(), err))?
                .into_iter(),
        };
        let iter = entries.insert(iter);

        let batch: Vec<Box<dyn DirEntry>> = match n {
            0 => iter.map(|entry| Box::new(entry) as Box<dyn DirEntry>).collect(),
            n => iter
                .take(n)
                .map(|entry| Box::new(entry) as Box<dyn DirEntry>)
                .collect(),
        };

        if n > 0 && batch.is_empty() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF"));
        }
        Ok(batch)
    }
}
