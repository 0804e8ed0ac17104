//! Mock APIs for JSON encoding, with a real implementation over [serde_json].
//!
//! Values are [serde_json::Value]. Use [from_value] and [to_value] to convert
//! between values and typed data.

use std::fmt;
use std::io::{self, Write};

use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::error::Category;
use serde_json::ser::{CompactFormatter, Formatter, PrettyFormatter};
use serde_json::Value;
use unimock::unimock;

use crate::io::{Reader, Std, Writer};

/// Errors produced by JSON encoding and decoding.
#[derive(Debug)]
pub enum Error {
    /// The input is not valid JSON.
    Syntax { msg: String, offset: u64 },
    Io(io::Error),
    /// The input is valid JSON, but does not fit the requested type.
    Message(String),
    /// The input ends in the middle of a value.
    UnexpectedEnd,
}

impl Error {
    pub fn msg(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    fn eof() -> Self {
        Self::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "EOF"))
    }

    fn unexpected_eof() -> Self {
        Self::Io(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected EOF"))
    }

    fn invalid_start(byte: u8, offset: u64) -> Self {
        Self::Syntax {
            msg: format!(
                "invalid character '{}' looking for beginning of value",
                byte as char
            ),
            offset,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax { msg, .. } => write!(f, "{msg}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Message(msg) => write!(f, "{msg}"),
            Self::UnexpectedEnd => write!(f, "unexpected end of JSON input"),
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

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            Category::Eof => Self::UnexpectedEnd,
            Category::Syntax => Self::Syntax {
                msg: err.to_string(),
                offset: err.column() as u64,
            },
            Category::Io => Self::Io(err.into()),
            Category::Data => Self::Message(err.to_string()),
        }
    }
}

/// A lexical token of a JSON stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    /// One of `[`, `]`, `{` and `}`.
    Delim(char),
    Bool(bool),
    Number(serde_json::Number),
    /// A string value or an object key.
    String(String),
    Null,
}

/// The JSON package functions.
#[unimock(api = JsonMock)]
pub trait Json: Send + Sync {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, Error>;

    /// Like [Json::marshal], but every element begins on a new line starting with
    /// `prefix` followed by copies of `indent` according to the nesting.
    fn marshal_indent(&self, value: &Value, prefix: &str, indent: &str) -> Result<Vec<u8>, Error>;

    fn unmarshal(&self, data: &[u8]) -> Result<Value, Error>;

    /// Whether `data` is one valid JSON value.
    fn valid(&self, data: &[u8]) -> bool;

    /// Escape `<`, `>`, `&`, U+2028 and U+2029 in JSON text so it is safe to embed in HTML.
    fn html_escape(&self, src: &[u8]) -> Vec<u8>;

    fn new_decoder(&self, reader: Box<dyn Reader + Send + Sync>) -> Box<dyn Decoder>;

    fn new_encoder(&self, writer: Box<dyn Writer + Send + Sync>) -> Box<dyn Encoder>;
}

/// Reads successive JSON values from a stream.
#[unimock(api = DecoderMock)]
pub trait Decoder: Send + Sync {
    /// The next value. End of input is an [io::ErrorKind::UnexpectedEof] error.
    fn decode(&mut self) -> Result<Value, Error>;

    /// Whether the current array or object has another element.
    fn more(&mut self) -> bool;

    /// The next token. Commas and colons are consumed but not returned.
    fn token(&mut self) -> Result<Token, Error>;

    /// The stream offset of the decoder.
    fn input_offset(&self) -> u64;

    /// Data read from the stream but not yet decoded.
    fn buffered(&self) -> Vec<u8>;
}

/// Writes JSON values to a stream, each followed by a newline.
#[unimock(api = EncoderMock)]
pub trait Encoder: Send + Sync {
    fn encode(&mut self, value: &Value) -> Result<(), Error>;

    fn set_indent(&mut self, prefix: &str, indent: &str);

    /// Whether `<`, `>` and `&` are escaped inside strings. The default is `true`.
    fn set_escape_html(&mut self, escape: bool);
}

/// Convert a value to typed data.
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    Ok(serde_json::from_value(value)?)
}

/// Convert typed data to a value.
pub fn to_value<T: Serialize + ?Sized>(data: &T) -> Result<Value, Error> {
    Ok(serde_json::to_value(data)?)
}

/// The real [Json], over [serde_json].
#[derive(Clone, Copy, Debug, Default)]
pub struct SerdeJson;

impl Json for SerdeJson {
    fn marshal(&self, value: &Value) -> Result<Vec<u8>, Error> {
        encode_value(value, None, true)
    }

    fn marshal_indent(&self, value: &Value, prefix: &str, indent: &str) -> Result<Vec<u8>, Error> {
        encode_value(value, Some((prefix, indent)), true)
    }

    fn unmarshal(&self, data: &[u8]) -> Result<Value, Error> {
        Ok(serde_json::from_slice(data)?)
    }

    fn valid(&self, data: &[u8]) -> bool {
        serde_json::from_slice::<IgnoredAny>(data).is_ok()
    }

    fn html_escape(&self, src: &[u8]) -> Vec<u8> {
        escape(src, true)
    }

    fn new_decoder(&self, reader: Box<dyn Reader + Send + Sync>) -> Box<dyn Decoder> {
        Box::new(StreamDecoder::new(reader))
    }

    fn new_encoder(&self, writer: Box<dyn Writer + Send + Sync>) -> Box<dyn Encoder> {
        Box::new(StreamEncoder::new(writer))
    }
}

/// Serialize `value`, compact or with a `(prefix, indent)` layout.
///
/// Only string contents are escaped. The layout is written as given.
fn encode_value(value: &Value, layout: Option<(&str, &str)>, html: bool) -> Result<Vec<u8>, Error> {
    let mut out = vec![];
    let Some((prefix, indent)) = layout else {
        let formatter = Escaping {
            inner: CompactFormatter,
            html,
        };
        value.serialize(&mut serde_json::Serializer::with_formatter(&mut out, formatter))?;
        return Ok(out);
    };

    let formatter = Escaping {
        inner: PrettyFormatter::with_indent(indent.as_bytes()),
        html,
    };
    value.serialize(&mut serde_json::Serializer::with_formatter(&mut out, formatter))?;

    if prefix.is_empty() {
        return Ok(out);
    }

    let mut prefixed = Vec::with_capacity(out.len());
    for byte in out {
        prefixed.push(byte);
        if byte == b'\n' {
            prefixed.extend_from_slice(prefix.as_bytes());
        }
    }
    Ok(prefixed)
}

/// A [Formatter] escaping string fragments the way `encoding/json` does.
struct Escaping<F> {
    inner: F,
    html: bool,
}

impl<F: Formatter> Formatter for Escaping<F> {
    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        writer.write_all(&escape(fragment.as_bytes(), self.html))
    }

    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn end_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_key(writer)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }
}

/// Escape JSON text. U+2028 and U+2029 are always escaped.
fn escape(src: &[u8], html: bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(src.len());
    let mut i = 0;
    while i < src.len() {
        match src[i] {
            byte @ (b'<' | b'>' | b'&') if html => {
                out.extend_from_slice(format!("\\u00{byte:02x}").as_bytes());
                i += 1;
            }
            0xE2 if src.get(i + 1) == Some(&0x80) && matches!(src.get(i + 2), Some(0xA8 | 0xA9)) => {
                out.extend_from_slice(if src[i + 2] == 0xA8 {
                    b"\\u2028"
                } else {
                    b"\\u2029"
                });
                i += 3;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

fn is_ws(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r')
}

enum Extent {
    Complete(usize),
    Incomplete,
}

/// Find the end of the value at the start of `data`, which begins with a non-whitespace byte.
fn value_extent(data: &[u8], at_eof: bool, offset: u64) -> Result<Extent, Error> {
    match data[0] {
        b'{' | b'[' => {
            let mut depth = 0usize;
            let mut in_string = false;
            let mut escaped = false;
            for (i, byte) in data.iter().copied().enumerate() {
                if in_string {
                    if escaped {
                        escaped = false;
                    } else if byte == b'\\' {
                        escaped = true;
                    } else if byte == b'"' {
                        in_string = false;
                    }
                    continue;
                }
                match byte {
                    b'"' => in_string = true,
                    b'{' | b'[' => depth += 1,
                    b'}' | b']' => {
                        depth -= 1;
                        if depth == 0 {
                            return Ok(Extent::Complete(i + 1));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Extent::Incomplete)
        }
        b'"' => {
            let mut escaped = false;
            for (i, byte) in data.iter().copied().enumerate().skip(1) {
                if escaped {
                    escaped = false;
                } else if byte == b'\\' {
                    escaped = true;
                } else if byte == b'"' {
                    return Ok(Extent::Complete(i + 1));
                }
            }
            Ok(Extent::Incomplete)
        }
        byte @ (b'}' | b']' | b',' | b':') => Err(Error::invalid_start(byte, offset)),
        _ => match data
            .iter()
            .position(|byte| is_ws(*byte) || b",:]}[{\"".contains(byte))
        {
            Some(end) => Ok(Extent::Complete(end)),
            None if at_eof => Ok(Extent::Complete(data.len())),
            None => Ok(Extent::Incomplete),
        },
    }
}

const READ_CHUNK: usize = 4096;

/// The real [Decoder], reading from any [Reader].
pub struct StreamDecoder<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    discarded: u64,
    eof: bool,
    containers: Vec<u8>,
}

impl<R: Reader> StreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![],
            pos: 0,
            discarded: 0,
            eof: false,
            containers: vec![],
        }
    }

    /// Read more input. Returns `false` at end of input.
    fn fill(&mut self) -> Result<bool, Error> {
        if self.eof {
            return Ok(false);
        }
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.discarded += self.pos as u64;
            self.pos = 0;
        }

        let len = self.buf.len();
        self.buf.resize(len + READ_CHUNK, 0);
        let read = loop {
            match self.reader.read(&mut self.buf[len..]) {
                Ok(n) => break n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.buf.truncate(len);
                    return Err(Error::Io(err));
                }
            }
        };
        self.buf.truncate(len + read);
        if read == 0 {
            self.eof = true;
        }
        Ok(read > 0)
    }

    /// The next non-whitespace byte, without consuming it.
    fn peek(&mut self) -> Result<Option<u8>, Error> {
        loop {
            while self.pos < self.buf.len() && is_ws(self.buf[self.pos]) {
                self.pos += 1;
            }
            if self.pos < self.buf.len() {
                return Ok(Some(self.buf[self.pos]));
            }
            if !self.fill()? {
                return Ok(None);
            }
        }
    }

    fn offset(&self) -> u64 {
        self.discarded + self.pos as u64
    }

    fn read_value(&mut self) -> Result<Value, Error> {
        if self.peek()?.is_none() {
            return Err(Error::eof());
        }
        loop {
            let offset = self.offset();
            match value_extent(&self.buf[self.pos..], self.eof, offset)? {
                Extent::Complete(len) => {
                    let value = serde_json::from_slice(&self.buf[self.pos..self.pos + len])
                        .map_err(|err| match Error::from(err) {
                            Error::Syntax { msg, .. } => Error::Syntax { msg, offset },
                            other => other,
                        })?;
                    self.pos += len;
                    return Ok(value);
                }
                Extent::Incomplete if self.eof => return Err(Error::unexpected_eof()),
                Extent::Incomplete => {
                    self.fill()?;
                }
            }
        }
    }
}

impl<R: Reader + Send + Sync> Decoder for StreamDecoder<R> {
    fn decode(&mut self) -> Result<Value, Error> {
        if !self.containers.is_empty() {
            if let Some(b',' | b':') = self.peek()? {
                self.pos += 1;
            }
        }
        self.read_value()
    }

    fn more(&mut self) -> bool {
        matches!(self.peek(), Ok(Some(byte)) if byte != b']' && byte != b'}')
    }

    fn token(&mut self) -> Result<Token, Error> {
        loop {
            let Some(byte) = self.peek()? else {
                return Err(Error::eof());
            };
            match byte {
                b'[' | b'{' => {
                    self.pos += 1;
                    self.containers.push(byte);
                    return Ok(Token::Delim(byte as char));
                }
                b']' | b'}' => {
                    let opening = if byte == b']' { b'[' } else { b'{' };
                    if self.containers.last() != Some(&opening) {
                        return Err(Error::invalid_start(byte, self.offset()));
                    }
                    self.containers.pop();
                    self.pos += 1;
                    return Ok(Token::Delim(byte as char));
                }
                b',' | b':' if !self.containers.is_empty() => {
                    self.pos += 1;
                }
                _ => {
                    return match self.read_value()? {
                        Value::Null => Ok(Token::Null),
                        Value::Bool(b) => Ok(Token::Bool(b)),
                        Value::Number(n) => Ok(Token::Number(n)),
                        Value::String(s) => Ok(Token::String(s)),
                        Value::Array(_) | Value::Object(_) => {
                            Err(Error::msg("json: container read as a scalar token"))
                        }
                    };
                }
            }
        }
    }

    fn input_offset(&self) -> u64 {
        self.offset()
    }

    fn buffered(&self) -> Vec<u8> {
        self.buf[self.pos..].to_vec()
    }
}

/// The real [Encoder], writing to any [Writer].
pub struct StreamEncoder<W> {
    writer: W,
    prefix: String,
    indent: String,
    escape_html: bool,
}

impl<W: Writer> StreamEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            prefix: String::new(),
            indent: String::new(),
            escape_html: true,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Writer + Send + Sync> Encoder for StreamEncoder<W> {
    fn encode(&mut self, value: &Value) -> Result<(), Error> {
        let layout = if self.prefix.is_empty() && self.indent.is_empty() {
            None
        } else {
            Some((self.prefix.as_str(), self.indent.as_str()))
        };
        let mut out = encode_value(value, layout, self.escape_html)?;
        out.push(b'\n');

        Std(&mut self.writer).write_all(&out).map_err(Error::Io)
    }

    fn set_indent(&mut self, prefix: &str, indent: &str) {
        self.prefix = prefix.to_string();
        self.indent = indent.to_string();
    }

    fn set_escape_html(&mut self, escape: bool) {
        self.escape_html = escape;
    }
}
