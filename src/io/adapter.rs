use std::io::{self, Read, Seek, SeekFrom, Write};

use super::{ByteReader, ByteWriter, Closer, Reader, Seeker, StringWriter, Writer};

/// Adapts a `std::io` stream to the traits of this crate.
///
/// Closing the stream drops the inner value. Any later operation fails with [io::ErrorKind::BrokenPipe].
#[derive(Debug)]
pub struct Stream<T> {
    inner: Option<T>,
}

impl<T> Stream<T> {
    /// Wrap an open stream.
    pub fn new(inner: T) -> Self {
        Self { inner: Some(inner) }
    }

    /// The inner stream, if not closed.
    pub fn get_ref(&self) -> Option<&T> {
        self.inner.as_ref()
    }

    /// Unwrap the inner stream, if not closed.
    pub fn into_inner(self) -> Option<T> {
        self.inner
    }

    /// Whether [Closer::close] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn inner_mut(&mut self) -> io::Result<&mut T> {
        self.inner.as_mut().ok_or_else(closed)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "use of closed stream")
}

impl<T: Read> Reader for Stream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner_mut()?.read(buf)
    }
}

impl<T: Read> ByteReader for Stream<T> {
    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0];
        self.inner_mut()?.read_exact(&mut byte)?;
        Ok(byte[0])
    }
}

impl<T: Write> Writer for Stream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner_mut()?.write(buf)
    }
}

impl<T: Write> ByteWriter for Stream<T> {
    fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        self.inner_mut()?.write_all(&[byte])
    }
}

impl<T: Write> StringWriter for Stream<T> {
    fn write_string(&mut self, s: &str) -> io::Result<usize> {
        self.inner_mut()?.write_all(s.as_bytes())?;
        Ok(s.len())
    }
}

impl<T: Seek> Seeker for Stream<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.inner_mut()?.seek(pos)
    }
}

impl<T> Closer for Stream<T> {
    fn close(&mut self) -> io::Result<()> {
        match self.inner.take() {
            Some(_) => Ok(()),
            None => Err(closed()),
        }
    }
}

/// Adapts the traits of this crate back to `std::io`,
/// so that a facade stream (or a mock) can be handed to std consumers like [std::io::BufReader].
#[derive(Debug)]
pub struct Std<T>(pub T);

impl<T: Reader> Read for Std<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<T: Writer> Write for Std<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Seeker> Seek for Std<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.0.seek(pos)
    }
}

/// A [Writer] on which all writes succeed without doing anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct Discard;

impl Writer for Discard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(buf.len())
    }
}

impl StringWriter for Discard {
    fn write_string(&mut self, s: &str) -> io::Result<usize> {
        Ok(s.len())
    }
}
