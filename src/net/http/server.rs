//! Mock APIs for the server side of HTTP, with real routing and response helpers.

use std::sync::Arc;

use async_trait::async_trait;
use unimock::unimock;

use super::client::Request;
use super::{detect_content_type, find_header, set_header, status, status_text, Error};
use crate::io::Writer;

/// Responds to an HTTP request.
#[unimock(api = HandlerMock)]
pub trait Handler: Send + Sync {
    fn serve_http(&self, w: &mut dyn ResponseWriter, r: &dyn Request);
}

/// Constructs the response to an HTTP request.
///
/// Writing the body before calling [ResponseWriter::write_header] implies status `200`.
#[unimock(api = ResponseWriterMock)]
pub trait ResponseWriter: Writer + Send + Sync {
    /// Replace a header value. Has no effect after the header is written.
    fn set_header(&mut self, name: &str, value: &str);

    /// The current value of a header.
    fn header(&self, name: &str) -> Option<String>;

    /// Send the status line and headers.
    fn write_header(&mut self, code: u16);
}

/// An HTTP server.
#[unimock(api = ServerMock)]
#[async_trait]
pub trait Server: Send + Sync {
    /// Serve until the server is closed. Returns [Error::ServerClosed] after close or shutdown.
    fn listen_and_serve(&self) -> Result<(), Error>;

    fn listen_and_serve_tls(&self, cert_file: &str, key_file: &str) -> Result<(), Error>;

    /// Close all listeners and connections immediately.
    fn close(&self) -> Result<(), Error>;

    /// Stop accepting connections and wait for active ones to become idle.
    async fn shutdown(&self) -> Result<(), Error>;

    fn set_keep_alives_enabled(&self, enabled: bool);

    /// Register a function to call on shutdown.
    fn register_on_shutdown(&self, f: Box<dyn FnOnce() + Send>);
}

/// A [Handler] made from a closure.
#[derive(Clone)]
pub struct HandlerFunc(Arc<dyn Fn(&mut dyn ResponseWriter, &dyn Request) + Send + Sync>);

impl HandlerFunc {
    pub fn new(f: impl Fn(&mut dyn ResponseWriter, &dyn Request) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl Handler for HandlerFunc {
    fn serve_http(&self, w: &mut dyn ResponseWriter, r: &dyn Request) {
        (self.0)(w, r)
    }
}

/// The server side package functions of HTTP.
#[unimock(api = HttpMock)]
pub trait Http: Send + Sync {
    /// Serve on `addr`. `None` means the default mux.
    fn listen_and_serve(&self, addr: &str, handler: Option<Arc<dyn Handler>>) -> Result<(), Error>;

    fn listen_and_serve_tls(
        &self,
        addr: &str,
        cert_file: &str,
        key_file: &str,
        handler: Option<Arc<dyn Handler>>,
    ) -> Result<(), Error>;

    /// Register a handler on the default mux.
    fn handle(&self, pattern: &str, handler: Arc<dyn Handler>);

    fn handle_func(&self, pattern: &str, handler: HandlerFunc);

    fn canonical_header_key(&self, key: &str) -> String;

    fn detect_content_type(&self, data: &[u8]) -> String;

    fn parse_http_version(&self, version: &str) -> Option<(u32, u32)>;

    /// Reply with a plain text error message.
    fn error(&self, w: &mut dyn ResponseWriter, msg: &str, code: u16);

    /// Reply with `404 page not found`.
    fn not_found(&self, w: &mut dyn ResponseWriter, r: &dyn Request);

    fn redirect(&self, w: &mut dyn ResponseWriter, r: &dyn Request, url: &str, code: u16);

    /// Reply with the contents of a file or directory.
    fn serve_file(&self, w: &mut dyn ResponseWriter, r: &dyn Request, name: &str);
}

/// Reply to a request with `msg` and the status `code`.
///
/// The message should be plain text. A newline is appended.
pub fn error(w: &mut dyn ResponseWriter, msg: &str, code: u16) {
    w.set_header("Content-Type", "text/plain; charset=utf-8");
    w.set_header("X-Content-Type-Options", "nosniff");
    w.write_header(code);
    write_body(w, format!("{msg}\n").as_bytes());
}

/// Reply with a `404 page not found` error.
pub fn not_found(w: &mut dyn ResponseWriter, _r: &dyn Request) {
    error(w, "404 page not found", status::NOT_FOUND);
}

/// Reply with a redirect to `url`, which may be relative to the request path.
///
/// `GET` requests get a short HTML body pointing at the new location.
pub fn redirect(w: &mut dyn ResponseWriter, r: &dyn Request, url: &str, code: u16) {
    let location = resolve_location(&request_path(r), url);
    let had_content_type = w.header("Content-Type").is_some();
    let method = r.method();

    w.set_header("Location", &location);
    if !had_content_type && (method == "GET" || method == "HEAD") {
        w.set_header("Content-Type", "text/html; charset=utf-8");
    }
    w.write_header(code);

    if !had_content_type && method == "GET" {
        let body = format!(
            "<a href=\"{}\">{}</a>.\n\n",
            html_escape(&location),
            status_text(code)
        );
        write_body(w, body.as_bytes());
    }
}

/// Reply with the contents of the file or directory `name`.
///
/// A directory is served by its `index.html`, or else by a listing of its entries.
/// Request paths containing `..` are rejected.
pub fn serve_file(w: &mut dyn ResponseWriter, r: &dyn Request, name: &str) {
    if request_path(r).split('/').any(|element| element == "..") {
        error(w, "invalid URL path", status::BAD_REQUEST);
        return;
    }

    let metadata = match std::fs::metadata(name) {
        Ok(metadata) => metadata,
        Err(err) => return fs_error(w, &err),
    };

    if metadata.is_dir() {
        let index = std::path::Path::new(name).join("index.html");
        if index.is_file() {
            return serve_contents(w, r, &index.to_string_lossy());
        }
        return serve_listing(w, r, name);
    }

    serve_contents(w, r, name);
}

fn serve_contents(w: &mut dyn ResponseWriter, r: &dyn Request, name: &str) {
    let contents = match std::fs::read(name) {
        Ok(contents) => contents,
        Err(err) => return fs_error(w, &err),
    };

    if w.header("Content-Type").is_none() {
        let content_type = content_type_by_extension(name)
            .map(str::to_string)
            .unwrap_or_else(|| detect_content_type(&contents));
        w.set_header("Content-Type", &content_type);
    }
    w.set_header("Content-Length", &contents.len().to_string());
    w.write_header(status::OK);

    if r.method() != "HEAD" {
        write_body(w, &contents);
    }
}

fn serve_listing(w: &mut dyn ResponseWriter, r: &dyn Request, name: &str) {
    let mut entries = match std::fs::read_dir(name).and_then(|dir| {
        dir.map(|entry| {
            entry.map(|entry| {
                let mut name = entry.file_name().to_string_lossy().into_owned();
                if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                    name.push('/');
                }
                name
            })
        })
        .collect::<std::io::Result<Vec<_>>>()
    }) {
        Ok(entries) => entries,
        Err(err) => return fs_error(w, &err),
    };
    entries.sort();

    let mut body = String::from("<pre>\n");
    for entry in entries {
        let escaped = html_escape(&entry);
        body.push_str(&format!("<a href=\"{escaped}\">{escaped}</a>\n"));
    }
    body.push_str("</pre>\n");

    w.set_header("Content-Type", "text/html; charset=utf-8");
    w.write_header(status::OK);
    if r.method() != "HEAD" {
        write_body(w, body.as_bytes());
    }
}

fn fs_error(w: &mut dyn ResponseWriter, err: &std::io::Error) {
    match err.kind() {
        std::io::ErrorKind::NotFound => error(w, "404 page not found", status::NOT_FOUND),
        std::io::ErrorKind::PermissionDenied => error(w, "403 Forbidden", status::FORBIDDEN),
        _ => error(w, "500 Internal Server Error", status::INTERNAL_SERVER_ERROR),
    }
}

fn content_type_by_extension(name: &str) -> Option<&'static str> {
    let ext = crate::path::ext(name).to_ascii_lowercase();
    Some(match ext.as_str() {
        ".html" | ".htm" => "text/html; charset=utf-8",
        ".css" => "text/css; charset=utf-8",
        ".js" | ".mjs" => "text/javascript; charset=utf-8",
        ".json" => "application/json",
        ".txt" => "text/plain; charset=utf-8",
        ".xml" => "text/xml; charset=utf-8",
        ".svg" => "image/svg+xml",
        ".png" => "image/png",
        ".jpg" | ".jpeg" => "image/jpeg",
        ".gif" => "image/gif",
        ".webp" => "image/webp",
        ".pdf" => "application/pdf",
        ".wasm" => "application/wasm",
        _ => return None,
    })
}

fn write_body(w: &mut dyn ResponseWriter, mut body: &[u8]) {
    while !body.is_empty() {
        match w.write(body) {
            Ok(0) => return,
            Ok(n) => body = &body[n..],
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
            Err(err) => {
                tracing::debug!(%err, "writing response body failed");
                return;
            }
        }
    }
}

fn html_escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// The path component of the request URL.
fn request_path(r: &dyn Request) -> String {
    let url = r.url();
    match url::Url::parse(&url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    }
}

/// Make a redirect target absolute with respect to the request path.
fn resolve_location(request_path: &str, target: &str) -> String {
    if url::Url::parse(target).is_ok() || target.starts_with('/') {
        return target.to_string();
    }

    let (target_path, query) = match target.find('?') {
        Some(index) => target.split_at(index),
        None => (target, ""),
    };
    let base = match request_path.rfind('/') {
        Some(index) => &request_path[..=index],
        None => "/",
    };

    let mut resolved = crate::path::clean(&format!("{base}{target_path}"));
    if target_path.ends_with('/') && !resolved.ends_with('/') {
        resolved.push('/');
    }
    resolved + query
}

/// Clean a request path, keeping a trailing slash.
fn clean_request_path(path: &str) -> String {
    if path.is_empty() {
        return "/".to_string();
    }
    let rooted = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let mut cleaned = crate::path::clean(&rooted);
    if rooted.ends_with('/') && cleaned != "/" {
        cleaned.push('/');
    }
    cleaned
}

struct Route {
    method: Option<String>,
    host: Option<String>,
    path: String,
    handler: Arc<dyn Handler>,
}

impl Route {
    fn is_subtree(&self) -> bool {
        self.path.ends_with('/')
    }

    fn matches_path(&self, path: &str) -> bool {
        if self.is_subtree() {
            path.starts_with(&self.path)
        } else {
            path == self.path
        }
    }

    fn allows(&self, method: &str) -> bool {
        match &self.method {
            None => true,
            Some(allowed) => allowed == method || (allowed == "GET" && method == "HEAD"),
        }
    }
}

/// A request multiplexer.
///
/// Patterns are `[METHOD ][HOST]/PATH`. A path ending in a slash matches its whole
/// subtree, other paths match exactly. The most specific pattern wins. A request
/// for the root of a subtree without its trailing slash is redirected to it.
#[derive(Default)]
pub struct ServeMux {
    routes: parking_lot::RwLock<Vec<Route>>,
}

impl ServeMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `pattern`.
    ///
    /// # Panics
    /// If the pattern is invalid or already registered.
    pub fn handle(&self, pattern: &str, handler: Arc<dyn Handler>) {
        let (method, rest) = match pattern.split_once(' ') {
            Some((method, rest)) => (Some(method.to_string()), rest.trim_start()),
            None => (None, pattern),
        };
        let Some(slash) = rest.find('/') else {
            panic!("http: invalid pattern {pattern:?}");
        };
        let host = Some(&rest[..slash])
            .filter(|host| !host.is_empty())
            .map(str::to_string);
        let path = rest[slash..].to_string();

        let mut routes = self.routes.write();
        if routes
            .iter()
            .any(|route| route.method == method && route.host == host && route.path == path)
        {
            panic!("http: multiple registrations for {pattern}");
        }
        tracing::trace!(pattern, "registered handler");
        routes.push(Route {
            method,
            host,
            path,
            handler,
        });
    }

    pub fn handle_func(&self, pattern: &str, handler: HandlerFunc) {
        self.handle(pattern, Arc::new(handler));
    }

    /// The handler for a request and the pattern it was registered with.
    ///
    /// Returns a redirect or error handler when no registered handler applies.
    pub fn handler(&self, r: &dyn Request) -> (Arc<dyn Handler>, String) {
        let raw_path = request_path(r);
        let path = clean_request_path(&raw_path);
        if path != raw_path {
            return (Arc::new(Redirect::permanent(path)), String::new());
        }

        let host = url::Url::parse(&r.url())
            .ok()
            .and_then(|url| url.host_str().map(str::to_string));
        let method = r.method();
        let routes = self.routes.read();

        let candidates: Vec<&Route> = routes
            .iter()
            .filter(|route| route.host.is_none() || route.host == host)
            .filter(|route| route.matches_path(&path))
            .collect();

        let best = candidates
            .iter()
            .filter(|route| route.allows(&method))
            .max_by_key(|route| (route.path.len(), route.host.is_some(), route.method.is_some()));

        if let Some(route) = best {
            return (route.handler.clone(), route.pattern());
        }

        if !candidates.is_empty() {
            let mut allowed: Vec<String> = candidates
                .iter()
                .filter_map(|route| route.method.clone())
                .collect();
            allowed.sort();
            allowed.dedup();
            return (Arc::new(MethodNotAllowed(allowed.join(", "))), String::new());
        }

        let subtree_root = format!("{path}/");
        if routes.iter().any(|route| route.path == subtree_root) {
            return (Arc::new(Redirect::permanent(subtree_root)), String::new());
        }

        (Arc::new(NotFound), String::new())
    }
}

impl Route {
    fn pattern(&self) -> String {
        let mut pattern = String::new();
        if let Some(method) = &self.method {
            pattern.push_str(method);
            pattern.push(' ');
        }
        if let Some(host) = &self.host {
            pattern.push_str(host);
        }
        pattern.push_str(&self.path);
        pattern
    }
}

impl Handler for ServeMux {
    fn serve_http(&self, w: &mut dyn ResponseWriter, r: &dyn Request) {
        let (handler, pattern) = self.handler(r);
        tracing::trace!(url = %r.url(), pattern, "routing request");
        handler.serve_http(w, r);
    }
}

struct NotFound;

impl Handler for NotFound {
    fn serve_http(&self, w: &mut dyn ResponseWriter, r: &dyn Request) {
        not_found(w, r);
    }
}

struct MethodNotAllowed(String);

impl Handler for MethodNotAllowed {
    fn serve_http(&self, w: &mut dyn ResponseWriter, _r: &dyn Request) {
        w.set_header("Allow", &self.0);
        error(w, "Method Not Allowed", status::METHOD_NOT_ALLOWED);
    }
}

struct Redirect {
    location: String,
    code: u16,
}

impl Redirect {
    fn permanent(location: String) -> Self {
        Self {
            location,
            code: status::MOVED_PERMANENTLY,
        }
    }
}

impl Handler for Redirect {
    fn serve_http(&self, w: &mut dyn ResponseWriter, r: &dyn Request) {
        redirect(w, r, &self.location, self.code);
    }
}

/// A [ResponseWriter] which records the response in memory, for tests.
#[derive(Debug, Default)]
pub struct ResponseRecorder {
    code: Option<u16>,
    headers: Vec<(String, String)>,
    sent_headers: Option<Vec<(String, String)>>,
    body: Vec<u8>,
}

impl ResponseRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The status written, `200` if only the body was written, or `None`.
    pub fn code(&self) -> Option<u16> {
        self.code
    }

    /// A header as it was when the status was written.
    pub fn sent_header(&self, name: &str) -> Option<&str> {
        find_header(self.sent_headers.as_ref().unwrap_or(&self.headers), name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl Writer for ResponseRecorder {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.code.is_none() {
            if find_header(&self.headers, "Content-Type").is_none() {
                let content_type = detect_content_type(buf);
                set_header(&mut self.headers, "Content-Type", &content_type);
            }
            self.write_header(status::OK);
        }
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }
}

impl ResponseWriter for ResponseRecorder {
    fn set_header(&mut self, name: &str, value: &str) {
        set_header(&mut self.headers, name, value);
    }

    fn header(&self, name: &str) -> Option<String> {
        find_header(&self.headers, name).map(str::to_string)
    }

    /// # Panics
    /// If `code` is not a three digit status.
    fn write_header(&mut self, code: u16) {
        if !(100..=999).contains(&code) {
            panic!("invalid WriteHeader code {code}");
        }
        if let Some(written) = self.code {
            tracing::debug!(written, code, "superfluous write_header call");
            return;
        }
        self.code = Some(code);
        self.sent_headers = Some(self.headers.clone());
    }
}
