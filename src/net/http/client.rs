//! Mock APIs for the client side of HTTP.

use std::fmt;

use unimock::unimock;

use super::{find_header, is_token_byte, set_header, Error};
use crate::io::{ReadCloser, Writer};

/// An HTTP response received by a [Client].
#[unimock(api = ResponseMock)]
pub trait Response: Send + Sync {
    /// The status line text, e.g. `"200 OK"`.
    fn status(&self) -> String;

    fn status_code(&self) -> u16;

    /// The protocol version, e.g. `"HTTP/1.1"`.
    fn proto(&self) -> String;

    /// The first value of a header, matched case insensitively.
    fn header(&self, name: &str) -> Option<String>;

    /// The length of the body, if known.
    fn content_length(&self) -> Option<u64>;

    /// The response body. The caller must close it.
    fn body(&mut self) -> Box<dyn ReadCloser + Send + Sync>;

    /// Whether the connection is closed after this response.
    fn close_connection(&self) -> bool;

    /// Write the response in wire format.
    fn write_wire(&self, w: &mut dyn Writer) -> Result<(), Error>;
}

/// An HTTP request to be sent by a [Client].
#[unimock(api = RequestMock)]
pub trait Request: fmt::Debug + Send + Sync {
    fn method(&self) -> String;

    fn url(&self) -> String;

    /// The first value of a header, matched case insensitively.
    fn header(&self, name: &str) -> Option<String>;

    /// Replace a header value.
    fn set_header(&mut self, name: &str, value: &str);

    /// Write the request in origin-form wire format, as sent to a server.
    fn write_wire(&self, w: &mut dyn Writer) -> Result<(), Error>;

    /// Write the request in absolute-form wire format, as sent to a proxy.
    fn write_proxy(&self, w: &mut dyn Writer) -> Result<(), Error>;
}

/// An HTTP client.
#[unimock(api = ClientMock)]
pub trait Client: Send + Sync {
    fn get(&self, url: &str) -> Result<Box<dyn Response>, Error>;

    fn head(&self, url: &str) -> Result<Box<dyn Response>, Error>;

    fn post(&self, url: &str, content_type: &str, body: &[u8]) -> Result<Box<dyn Response>, Error>;

    /// Send an arbitrary request.
    fn execute(&self, req: &dyn Request) -> Result<Box<dyn Response>, Error>;

    /// Close connections which are idle in a keep-alive state.
    fn close_idle_connections(&self);
}

/// The client side package functions of HTTP.
#[unimock(api = HttpMock)]
pub trait Http: Send + Sync {
    /// Build a request. Fails if the method is not a token or the URL cannot be parsed.
    fn new_request(
        &self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<Box<dyn Request>, Error>;
}

/// The real [Http]: requests are built in memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultHttp;

impl Http for DefaultHttp {
    fn new_request(
        &self,
        method: &str,
        url: &str,
        body: Option<&[u8]>,
    ) -> Result<Box<dyn Request>, Error> {
        Ok(Box::new(OutgoingRequest::new(method, url, body)?))
    }
}

/// The `User-Agent` sent when a request does not set one.
pub const DEFAULT_USER_AGENT: &str = concat!("stdmock/", env!("CARGO_PKG_VERSION"));

/// A request built in memory, see [DefaultHttp].
#[derive(Clone, Debug)]
pub struct OutgoingRequest {
    method: String,
    url: url::Url,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl OutgoingRequest {
    /// Build a request. An empty method means `GET`.
    pub fn new(method: &str, url: &str, body: Option<&[u8]>) -> Result<Self, Error> {
        let method = if method.is_empty() { "GET" } else { method };
        if !method.bytes().all(is_token_byte) {
            return Err(Error::InvalidMethod(method.to_string()));
        }

        let parsed = url::Url::parse(url).map_err(|err| Error::InvalidUrl {
            url: url.to_string(),
            reason: match err {
                url::ParseError::RelativeUrlWithoutBase => "missing protocol scheme".to_string(),
                other => other.to_string(),
            },
        })?;

        Ok(Self {
            method: method.to_string(),
            url: parsed,
            headers: vec![],
            body: body.map(<[u8]>::to_vec).unwrap_or_default(),
        })
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    fn host(&self) -> String {
        match (self.url.host_str(), self.url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }

    fn request_uri(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{query}", self.url.path()),
            None => self.url.path().to_string(),
        }
    }

    fn write_with_target(&self, w: &mut dyn Writer, target: &str) -> Result<(), Error> {
        let mut head = format!("{} {target} HTTP/1.1\r\nHost: {}\r\n", self.method, self.host());
        if find_header(&self.headers, "User-Agent").is_none() {
            head.push_str(&format!("User-Agent: {DEFAULT_USER_AGENT}\r\n"));
        }
        if !self.body.is_empty() && find_header(&self.headers, "Content-Length").is_none() {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }

        let mut headers: Vec<&(String, String)> = self.headers.iter().collect();
        headers.sort_by(|a, b| a.0.cmp(&b.0));
        for (key, value) in headers {
            head.push_str(&format!("{key}: {value}\r\n"));
        }
        head.push_str("\r\n");

        write_all(w, head.as_bytes())?;
        write_all(w, &self.body)?;
        Ok(())
    }
}

fn write_all(w: &mut dyn Writer, mut buf: &[u8]) -> Result<(), Error> {
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::WriteZero,
                    "short write",
                )))
            }
            Ok(n) => buf = &buf[n..],
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => return Err(Error::Io(err)),
        }
    }
    Ok(())
}

impl Request for OutgoingRequest {
    fn method(&self) -> String {
        self.method.clone()
    }

    fn url(&self) -> String {
        self.url.to_string()
    }

    fn header(&self, name: &str) -> Option<String> {
        find_header(&self.headers, name).map(str::to_string)
    }

    fn set_header(&mut self, name: &str, value: &str) {
        set_header(&mut self.headers, name, value);
    }

    fn write_wire(&self, w: &mut dyn Writer) -> Result<(), Error> {
        self.write_with_target(w, &self.request_uri())
    }

    fn write_proxy(&self, w: &mut dyn Writer) -> Result<(), Error> {
        self.write_with_target(w, self.url.as_str())
    }
}
