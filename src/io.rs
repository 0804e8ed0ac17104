//! Mockable byte stream interfaces.
//!
//! Each trait carries a single operation.
//! The composite traits ([ReadCloser], [ReadWriteCloser], ...) are blanket-implemented
//! for every type implementing their parts, including [unimock::Unimock].

use std::io::{self, SeekFrom};

use unimock::unimock;

pub mod fs;

mod adapter;

pub use adapter::{Discard, Std, Stream};

/// Reads bytes into a buffer.
#[unimock(api = ReaderMock)]
pub trait Reader {
    /// Read up to `buf.len()` bytes into `buf`, returning how many were read.
    ///
    /// `Ok(0)` signals end of stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Writes bytes from a buffer.
#[unimock(api = WriterMock)]
pub trait Writer {
    /// Write some prefix of `buf`, returning how many bytes were consumed.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Releases the resources behind a stream.
#[unimock(api = CloserMock)]
pub trait Closer {
    /// Close the stream. Further use of the stream is an error.
    fn close(&mut self) -> io::Result<()>;
}

/// Moves the cursor of a stream.
#[unimock(api = SeekerMock)]
pub trait Seeker {
    /// Move the cursor, returning the new offset from the start of the stream.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
}

/// Positional reads which do not move any cursor.
#[unimock(api = ReaderAtMock)]
pub trait ReaderAt {
    /// Read into `buf` starting at byte offset `offset`.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

/// Positional writes which do not move any cursor.
#[unimock(api = WriterAtMock)]
pub trait WriterAt {
    /// Write `buf` starting at byte offset `offset`.
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
}

/// A sink which knows how to drain a [Reader] into itself.
#[unimock(api = ReaderFromMock)]
pub trait ReaderFrom {
    /// Read from `reader` until end of stream, returning the number of bytes transferred.
    fn read_from(&mut self, reader: &mut dyn Reader) -> io::Result<u64>;
}

/// A source which knows how to drain itself into a [Writer].
#[unimock(api = WriterToMock)]
pub trait WriterTo {
    /// Write everything to `writer`, returning the number of bytes transferred.
    fn write_to(&mut self, writer: &mut dyn Writer) -> io::Result<u64>;
}

/// Single byte reads.
#[unimock(api = ByteReaderMock)]
pub trait ByteReader {
    /// Read the next byte. End of stream is [io::ErrorKind::UnexpectedEof].
    fn read_byte(&mut self) -> io::Result<u8>;
}

/// Single byte writes.
#[unimock(api = ByteWriterMock)]
pub trait ByteWriter {
    /// Write exactly one byte.
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;
}

/// String writes.
#[unimock(api = StringWriterMock)]
pub trait StringWriter {
    /// Write the UTF-8 bytes of `s`.
    fn write_string(&mut self, s: &str) -> io::Result<usize>;
}

macro_rules! composite {
    ($(#[$meta:meta])* $name:ident: $first:ident $(+ $rest:ident)*) => {
        $(#[$meta])*
        pub trait $name: $first $(+ $rest)* {}

        impl<T: $first $(+ $rest)* + ?Sized> $name for T {}
    };
}

composite!(
    /// [Reader] + [Writer]
    ReadWriter: Reader + Writer
);
composite!(
    /// [Reader] + [Closer]
    ReadCloser: Reader + Closer
);
composite!(
    /// [Writer] + [Closer]
    WriteCloser: Writer + Closer
);
composite!(
    /// [Reader] + [Writer] + [Closer]
    ReadWriteCloser: Reader + Writer + Closer
);
composite!(
    /// [Reader] + [Seeker]
    ReadSeeker: Reader + Seeker
);
composite!(
    /// [Writer] + [Seeker]
    WriteSeeker: Writer + Seeker
);
composite!(
    /// [Reader] + [Writer] + [Seeker]
    ReadWriteSeeker: Reader + Writer + Seeker
);
composite!(
    /// [Reader] + [Seeker] + [Closer]
    ReadSeekCloser: Reader + Seeker + Closer
);

macro_rules! forward {
    (@impl $trait:ident { $(fn $method:ident(($($recv:tt)*) $slf:ident $(, $arg:ident: $ty:ty)*) -> $ret:ty;)* }) => {
        impl<T: $trait + ?Sized> $trait for Box<T> {
            $(
                fn $method($($recv)* $slf $(, $arg: $ty)*) -> $ret {
                    (**$slf).$method($($arg),*)
                }
            )*
        }

        impl<T: $trait + ?Sized> $trait for &mut T {
            $(
                fn $method($($recv)* $slf $(, $arg: $ty)*) -> $ret {
                    (**$slf).$method($($arg),*)
                }
            )*
        }
    };
    ($trait:ident { $(fn $method:ident(&mut $slf:ident $(, $arg:ident: $ty:ty)*) -> $ret:ty;)* }) => {
        forward!(@impl $trait { $(fn $method((&mut) $slf $(, $arg: $ty)*) -> $ret;)* });
    };
    ($trait:ident { $(fn $method:ident(&$slf:ident $(, $arg:ident: $ty:ty)*) -> $ret:ty;)* }) => {
        forward!(@impl $trait { $(fn $method((&) $slf $(, $arg: $ty)*) -> $ret;)* });
    };
}

forward!(Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
});
forward!(Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
});
forward!(Closer {
    fn close(&mut self) -> io::Result<()>;
});
forward!(Seeker {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;
});
forward!(ReaderAt {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
});
forward!(WriterAt {
    fn write_at(&self, buf: &[u8], offset: u64) -> io::Result<usize>;
});
forward!(ByteReader {
    fn read_byte(&mut self) -> io::Result<u8>;
});
forward!(ByteWriter {
    fn write_byte(&mut self, byte: u8) -> io::Result<()>;
});
forward!(StringWriter {
    fn write_string(&mut self, s: &str) -> io::Result<usize>;
});

const COPY_BUF_SIZE: usize = 32 * 1024;

/// Copy from `src` to `dst` until `src` reports end of stream.
///
/// Returns the number of bytes copied. A writer accepting fewer bytes than
/// it was given fails the copy with [io::ErrorKind::WriteZero].
pub fn copy<W, R>(dst: &mut W, src: &mut R) -> io::Result<u64>
where
    W: Writer + ?Sized,
    R: Reader + ?Sized,
{
    let mut buf = vec![0; COPY_BUF_SIZE];
    let mut written = 0;

    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => return Ok(written),
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        let w = dst.write(&buf[..n])?;
        written += w as u64;
        if w < n {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short write"));
        }
    }
}

/// Fill all of `buf` from `reader`.
///
/// A stream ending before the buffer is full is an [io::ErrorKind::UnexpectedEof] error.
pub fn read_full<R: Reader + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF"));
            }
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected EOF",
                ));
            }
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// Read from `reader` until end of stream.
pub fn read_all<R: Reader + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = [0; 512];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return Ok(out),
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Write all of `s` to `writer`.
pub fn write_string<W: Writer + ?Sized>(writer: &mut W, s: &str) -> io::Result<usize> {
    let mut bytes = s.as_bytes();
    let mut total = 0;
    while !bytes.is_empty() {
        match writer.write(bytes)? {
            0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "short write")),
            n => {
                total += n;
                bytes = &bytes[n..];
            }
        }
    }
    Ok(total)
}
