use std::io::Cursor;
use std::sync::Arc;

use stdmock::io::{read_all, Closer, ReadCloser, Stream, Writer, WriterMock};
use stdmock::net::http::client::{
    self, Client, ClientMock, DefaultHttp, OutgoingRequest, Request, RequestMock, Response,
    ResponseMock,
};
use stdmock::net::http::server::{
    self, Handler, HandlerFunc, HandlerMock, ResponseRecorder, ResponseWriter, ResponseWriterMock,
    ServeMux, Server, ServerMock,
};
use stdmock::net::http::{self, status, Error};
use unimock::*;

use crate::AsyncTest;

fn get(url: &str) -> OutgoingRequest {
    OutgoingRequest::new("GET", url, None).unwrap()
}

fn request(method: &str, url: &str) -> OutgoingRequest {
    OutgoingRequest::new(method, url, None).unwrap()
}

fn body_of(text: &'static [u8]) -> Box<dyn ReadCloser + Send + Sync> {
    Box::new(Stream::new(Cursor::new(text.to_vec())))
}

/// Fetch a document, failing on any status but 200.
fn fetch(client: &dyn Client, url: &str) -> Result<String, Error> {
    let mut resp = client.get(url)?;
    if resp.status_code() != status::OK {
        return Err(Error::Status {
            code: resp.status_code(),
            status: resp.status(),
        });
    }
    let mut body = resp.body();
    let data = read_all(&mut body)?;
    body.close()?;
    Ok(String::from_utf8_lossy(&data).into_owned())
}

mod client_mocks {
    use super::*;

    #[test]
    fn get_ok() {
        let u = Unimock::new((
            ClientMock::get
                .next_call(matching!("https://example.com/doc"))
                .answers(&|u, _| Ok(Box::new(u.clone()) as Box<dyn Response>)),
            ResponseMock::status_code.next_call(matching!()).returns(200u16),
            ResponseMock::body
                .next_call(matching!())
                .answers(&|_| body_of(b"hello")),
        ));

        assert_eq!("hello", fetch(&u, "https://example.com/doc").unwrap());
    }

    #[test]
    fn get_unexpected_status() {
        let u = Unimock::new((
            ClientMock::get
                .next_call(matching!(_))
                .answers(&|u, _| Ok(Box::new(u.clone()) as Box<dyn Response>)),
            ResponseMock::status_code.each_call(matching!()).returns(503u16),
            ResponseMock::status
                .next_call(matching!())
                .returns("503 Service Unavailable".to_string()),
        ));

        let err = fetch(&u, "https://example.com/doc").unwrap_err();
        assert!(matches!(err, Error::Status { code: 503, .. }));
        assert_eq!("unexpected status: 503 Service Unavailable", err.to_string());
    }

    #[test]
    fn get_transport_error() {
        let u = Unimock::new(ClientMock::get.next_call(matching!(_)).answers(&|_, _| {
            Err(Error::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionReset,
            )))
        }));

        assert!(matches!(
            fetch(&u, "https://example.com/doc"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn post_and_headers() {
        let u = Unimock::new((
            ClientMock::post
                .next_call(matching!(
                    ("https://api.example.com/items", "application/json", body)
                        if *body == b"{\"name\":\"x\"}"
                ))
                .answers(&|u, _, _, _| Ok(Box::new(u.clone()) as Box<dyn Response>)),
            ResponseMock::status_code.next_call(matching!()).returns(201u16),
            ResponseMock::header
                .next_call(matching!("Location"))
                .returns(Some("/items/7".to_string())),
            ResponseMock::content_length
                .next_call(matching!())
                .returns(None::<u64>),
            ResponseMock::close_connection
                .next_call(matching!())
                .returns(false),
        ));

        let resp = u
            .post(
                "https://api.example.com/items",
                "application/json",
                b"{\"name\":\"x\"}",
            )
            .unwrap();
        assert_eq!(201, resp.status_code());
        assert_eq!(Some("/items/7".to_string()), resp.header("Location"));
        assert_eq!(None, resp.content_length());
        assert!(!resp.close_connection());
    }

    #[test]
    fn execute_built_request() {
        let u = Unimock::new((
            client::HttpMock::new_request
                .next_call(matching!("DELETE", "https://api.example.com/items/7", None))
                .answers(&|u, _, _, _| Ok(Box::new(u.clone()) as Box<dyn Request>)),
            RequestMock::set_header
                .next_call(matching!("Authorization", "Bearer t0k3n"))
                .returns(()),
            ClientMock::execute
                .next_call(matching!(_))
                .answers(&|u, _| Ok(Box::new(u.clone()) as Box<dyn Response>)),
            ResponseMock::status_code.next_call(matching!()).returns(204u16),
        ));

        let mut req = client::Http::new_request(&u, "DELETE", "https://api.example.com/items/7", None)
            .unwrap();
        req.set_header("Authorization", "Bearer t0k3n");
        let resp = u.execute(req.as_ref()).unwrap();
        assert_eq!(status::NO_CONTENT, resp.status_code());
    }

    #[test]
    fn close_idle_connections() {
        let u = Unimock::new(
            ClientMock::close_idle_connections
                .next_call(matching!())
                .returns(()),
        );
        u.close_idle_connections();
    }
}

mod requests {
    use super::*;

    struct Buffer(Vec<u8>);

    impl Writer for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    #[test]
    fn default_http_builds_requests() {
        let req = client::Http::new_request(&DefaultHttp, "PUT", "http://example.com/a b", Some(b"x"))
            .unwrap();
        assert_eq!("PUT", req.method());
        assert_eq!("http://example.com/a%20b", req.url());

        let err = client::Http::new_request(&DefaultHttp, "GET", "/relative", None)
            .err()
            .unwrap();
        assert_eq!("parse \"/relative\": missing protocol scheme", err.to_string());
    }

    #[test]
    fn proxy_form_uses_absolute_url() {
        let req = get("http://example.com/path?q=1");
        let mut out = Buffer(vec![]);
        req.write_proxy(&mut out).unwrap();

        let wire = String::from_utf8(out.0).unwrap();
        assert!(wire.starts_with("GET http://example.com/path?q=1 HTTP/1.1\r\nHost: example.com\r\n"));
        assert!(wire.contains(&format!("User-Agent: {}\r\n", client::DEFAULT_USER_AGENT)));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn write_wire_reports_writer_errors() {
        let req = get("http://example.com/");
        let mut w = Unimock::new(
            WriterMock::write
                .next_call(matching!(_))
                .answers(&|_, _| Err(std::io::Error::other("broken pipe"))),
        );

        assert!(matches!(req.write_wire(&mut w), Err(Error::Io(_))));
    }
}

mod routing {
    use super::*;

    fn text(body: &'static str) -> HandlerFunc {
        HandlerFunc::new(move |w, _| {
            w.set_header("Content-Type", "text/plain; charset=utf-8");
            w.write_header(status::OK);
            let _ = w.write(body.as_bytes());
        })
    }

    fn serve(mux: &ServeMux, r: &dyn Request) -> ResponseRecorder {
        let mut w = ResponseRecorder::new();
        mux.serve_http(&mut w, r);
        w
    }

    fn mux() -> ServeMux {
        let mux = ServeMux::new();
        mux.handle_func("GET /items", text("list"));
        mux.handle_func("POST /items", text("created"));
        mux.handle_func("/static/", text("static"));
        mux.handle_func("/static/special.css", text("special"));
        mux.handle_func("api.example.com/", text("api"));
        mux
    }

    #[test]
    fn routes_by_method_and_path() {
        let mux = mux();
        assert_eq!("list", serve(&mux, &get("http://localhost/items")).body_string());
        assert_eq!(
            "created",
            serve(&mux, &request("POST", "http://localhost/items")).body_string()
        );
        assert_eq!("list", serve(&mux, &request("HEAD", "http://localhost/items")).body_string());
    }

    #[test]
    fn most_specific_pattern_wins() {
        let mux = mux();
        assert_eq!(
            "static",
            serve(&mux, &get("http://localhost/static/css/site.css")).body_string()
        );
        assert_eq!(
            "special",
            serve(&mux, &get("http://localhost/static/special.css")).body_string()
        );
        assert_eq!("api", serve(&mux, &get("http://api.example.com/v1")).body_string());
        assert_eq!("list", serve(&mux, &get("http://api.example.com/items")).body_string());

        let (_, pattern) = mux.handler(&get("http://localhost/static/x"));
        assert_eq!("/static/", pattern);
        let (_, pattern) = mux.handler(&request("POST", "http://localhost/items"));
        assert_eq!("POST /items", pattern);
    }

    #[test]
    fn wrong_method_is_405_with_allow() {
        let w = serve(&mux(), &request("DELETE", "http://localhost/items"));
        assert_eq!(Some(status::METHOD_NOT_ALLOWED), w.code());
        assert_eq!(Some("GET, POST"), w.sent_header("Allow"));
        assert_eq!("Method Not Allowed\n", w.body_string());
    }

    #[test]
    fn subtree_root_redirects() {
        let w = serve(&mux(), &get("http://localhost/static"));
        assert_eq!(Some(status::MOVED_PERMANENTLY), w.code());
        assert_eq!(Some("/static/"), w.sent_header("Location"));
        assert_eq!("<a href=\"/static/\">Moved Permanently</a>.\n\n", w.body_string());
    }

    #[test]
    fn unclean_path_redirects() {
        let mux = mux();
        let r = Unimock::new((
            RequestMock::url
                .each_call(matching!())
                .returns("/static//x/../y".to_string()),
            RequestMock::method
                .each_call(matching!())
                .returns("GET".to_string()),
        ));

        let w = serve(&mux, &r);
        assert_eq!(Some(status::MOVED_PERMANENTLY), w.code());
        assert_eq!(Some("/static/y"), w.sent_header("Location"));
    }

    #[test]
    fn unknown_path_is_404() {
        let w = serve(&mux(), &get("http://localhost/nothing"));
        assert_eq!(Some(status::NOT_FOUND), w.code());
        assert_eq!("404 page not found\n", w.body_string());
    }

    #[test]
    fn mocked_handler_is_called_once() {
        let mux = ServeMux::new();
        mux.handle(
            "/hooks/",
            Arc::new(Unimock::new(
                HandlerMock::serve_http
                    .next_call(matching!(_, _))
                    .answers(&|_, w, r| {
                        assert_eq!("POST", r.method());
                        w.write_header(status::CREATED);
                    }),
            )),
        );

        let w = serve(&mux, &request("POST", "http://localhost/hooks/github"));
        assert_eq!(Some(status::CREATED), w.code());
        assert!(w.body().is_empty());
    }

    #[test]
    #[should_panic(expected = "http: multiple registrations for GET /items")]
    fn duplicate_registration_panics() {
        let mux = mux();
        mux.handle_func("GET /items", text("again"));
    }

    #[test]
    #[should_panic(expected = "http: invalid pattern")]
    fn invalid_pattern_panics() {
        ServeMux::new().handle_func("items", text("x"));
    }
}

mod responses {
    use super::*;

    #[test]
    fn error_through_mocked_writer() {
        let mut w = Unimock::new((
            ResponseWriterMock::set_header
                .next_call(matching!("Content-Type", "text/plain; charset=utf-8"))
                .returns(()),
            ResponseWriterMock::set_header
                .next_call(matching!("X-Content-Type-Options", "nosniff"))
                .returns(()),
            ResponseWriterMock::write_header
                .next_call(matching!(503))
                .returns(()),
            WriterMock::write
                .next_call(matching!((buf) if *buf == b"maintenance\n"))
                .returns(Ok(12)),
        ));

        server::error(&mut w, "maintenance", status::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn redirect_keeps_existing_content_type() {
        let mut w = ResponseRecorder::new();
        w.set_header("Content-Type", "application/json");
        server::redirect(&mut w, &request("POST", "http://h/a/b"), "../c?x=1", status::SEE_OTHER);

        assert_eq!(Some(status::SEE_OTHER), w.code());
        assert_eq!(Some("/c?x=1"), w.sent_header("Location"));
        assert_eq!(Some("application/json"), w.sent_header("Content-Type"));
        assert!(w.body().is_empty());
    }

    #[test]
    fn not_found_helper() {
        let mut w = ResponseRecorder::new();
        server::not_found(&mut w, &get("http://h/x"));
        assert_eq!(Some(404), w.code());
        assert_eq!("404 page not found\n", w.body_string());
    }

    #[test]
    fn recorder_keeps_first_status() {
        let mut w = ResponseRecorder::new();
        w.write_header(status::OK);
        w.write_header(status::INTERNAL_SERVER_ERROR);
        assert_eq!(Some(status::OK), w.code());
    }

    #[test]
    #[should_panic(expected = "invalid WriteHeader code 42")]
    fn recorder_rejects_bad_status() {
        ResponseRecorder::new().write_header(42);
    }
}

mod files {
    use super::*;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello, world").unwrap();
        std::fs::write(dir.path().join("data"), b"%PDF-1.4 ...").unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("docs/a&b.md"), b"# a").unwrap();
        std::fs::create_dir(dir.path().join("docs/img")).unwrap();
        std::fs::create_dir(dir.path().join("www")).unwrap();
        std::fs::write(dir.path().join("www/index.html"), b"<html>home</html>").unwrap();
        dir
    }

    fn serve(r: &dyn Request, path: &std::path::Path) -> ResponseRecorder {
        let mut w = ResponseRecorder::new();
        server::serve_file(&mut w, r, &path.to_string_lossy());
        w
    }

    #[test]
    fn serves_file_contents() {
        let site = site();
        let w = serve(&get("http://h/hello.txt"), &site.path().join("hello.txt"));
        assert_eq!(Some(200), w.code());
        assert_eq!(Some("text/plain; charset=utf-8"), w.sent_header("Content-Type"));
        assert_eq!(Some("12"), w.sent_header("Content-Length"));
        assert_eq!("hello, world", w.body_string());
    }

    #[test]
    fn sniffs_type_without_extension() {
        let site = site();
        let w = serve(&get("http://h/data"), &site.path().join("data"));
        assert_eq!(Some("application/pdf"), w.sent_header("Content-Type"));
    }

    #[test]
    fn head_has_no_body() {
        let site = site();
        let w = serve(&request("HEAD", "http://h/hello.txt"), &site.path().join("hello.txt"));
        assert_eq!(Some("12"), w.sent_header("Content-Length"));
        assert!(w.body().is_empty());
    }

    #[test]
    fn directory_index_and_listing() {
        let site = site();

        let w = serve(&get("http://h/www/"), &site.path().join("www"));
        assert_eq!("<html>home</html>", w.body_string());
        assert_eq!(Some("text/html; charset=utf-8"), w.sent_header("Content-Type"));

        let w = serve(&get("http://h/docs/"), &site.path().join("docs"));
        assert_eq!(
            "<pre>\n<a href=\"a&amp;b.md\">a&amp;b.md</a>\n<a href=\"img/\">img/</a>\n</pre>\n",
            w.body_string()
        );
    }

    #[test]
    fn missing_file_is_404() {
        let site = site();
        let w = serve(&get("http://h/nope"), &site.path().join("nope"));
        assert_eq!(Some(404), w.code());
        assert_eq!("404 page not found\n", w.body_string());
    }

    #[test]
    fn dot_dot_is_rejected() {
        let site = site();
        let r = Unimock::new(
            RequestMock::url
                .next_call(matching!())
                .returns("/../etc/passwd".to_string()),
        );

        let w = serve(&r, &site.path().join("hello.txt"));
        assert_eq!(Some(400), w.code());
        assert_eq!("invalid URL path\n", w.body_string());
    }
}

mod servers {
    use super::*;

    #[test]
    fn serve_until_shutdown() {
        async {
            let u = Unimock::new((
                ServerMock::set_keep_alives_enabled
                    .next_call(matching!(false))
                    .returns(()),
                ServerMock::register_on_shutdown
                    .next_call(matching!(_))
                    .returns(()),
                ServerMock::shutdown.next_call(matching!()).returns(Ok(())),
                ServerMock::listen_and_serve
                    .next_call(matching!())
                    .answers(&|_| Err(Error::ServerClosed)),
            ));

            u.set_keep_alives_enabled(false);
            u.register_on_shutdown(Box::new(|| {}));
            u.shutdown().await.unwrap();
            assert_eq!(
                "http: Server closed",
                u.listen_and_serve().unwrap_err().to_string()
            );
        }
        .test()
    }

    #[test]
    fn tls_and_close() {
        let u = Unimock::new((
            ServerMock::listen_and_serve_tls
                .next_call(matching!("cert.pem", "key.pem"))
                .answers(&|_, _, _| Err(Error::msg("open cert.pem: no such file or directory"))),
            ServerMock::close.next_call(matching!()).returns(Ok(())),
        ));

        assert!(server::Server::listen_and_serve_tls(&u, "cert.pem", "key.pem").is_err());
        server::Server::close(&u).unwrap();
    }

    #[test]
    fn package_level_registration() {
        let u = Unimock::new((
            server::HttpMock::handle_func
                .next_call(matching!("/health", _))
                .returns(()),
            server::HttpMock::listen_and_serve
                .next_call(matching!(":8080", None))
                .answers(&|_, _, _| Err(Error::ServerClosed)),
        ));

        server::Http::handle_func(&u, "/health", HandlerFunc::new(|w, _| {
            w.write_header(status::OK);
        }));
        assert!(matches!(
            server::Http::listen_and_serve(&u, ":8080", None),
            Err(Error::ServerClosed)
        ));
    }

    #[test]
    fn package_level_helpers_mocked() {
        let u = Unimock::new((
            server::HttpMock::canonical_header_key
                .next_call(matching!("x-request-id"))
                .returns("X-Request-Id".to_string()),
            server::HttpMock::detect_content_type
                .next_call(matching!(_))
                .returns("image/png".to_string()),
            server::HttpMock::parse_http_version
                .next_call(matching!("HTTP/2"))
                .returns(Some((2u32, 0u32))),
        ));

        assert_eq!("X-Request-Id", server::Http::canonical_header_key(&u, "x-request-id"));
        assert_eq!("image/png", server::Http::detect_content_type(&u, b"\x89PNG"));
        assert_eq!(Some((2, 0)), server::Http::parse_http_version(&u, "HTTP/2"));
    }
}

#[test]
fn protocol_helpers() {
    assert_eq!("X-Forwarded-For", http::canonical_header_key("x-forwarded-for"));
    assert_eq!(Some((1, 1)), http::parse_http_version("HTTP/1.1"));
    assert_eq!(None, http::parse_http_version("HTTP/1"));
    assert_eq!("text/html; charset=utf-8", http::detect_content_type(b"<!DOCTYPE html>"));
    assert_eq!("Not Found", http::status_text(404));
    assert_eq!("", http::status_text(999));
}
