use std::collections::BTreeMap;
use std::io::{self, Cursor};

use serde_json::{json, Value};
use stdmock::encoding::json::*;
use stdmock::io::{Reader, Stream, WriterMock};
use unimock::*;

fn reader(input: &str) -> Box<dyn Reader + Send + Sync> {
    Box::new(Stream::new(Cursor::new(input.as_bytes().to_vec())))
}

fn decoder_self(u: &Unimock, _: Box<dyn Reader + Send + Sync>) -> Box<dyn Decoder> {
    Box::new(u.clone())
}

/// Parse a config document, rejecting invalid input up front.
fn load_config(json: &dyn Json, data: &[u8]) -> Result<BTreeMap<String, u32>, Error> {
    if !json.valid(data) {
        return Err(Error::msg("config: invalid JSON"));
    }
    from_value(json.unmarshal(data)?)
}

/// Sum a stream of numbers until the input ends.
fn sum_stream(json: &dyn Json, input: Box<dyn Reader + Send + Sync>) -> Result<i64, Error> {
    let mut dec = json.new_decoder(input);
    let mut total = 0;
    loop {
        match dec.decode() {
            Ok(value) => total += value.as_i64().unwrap_or_default(),
            Err(Error::Io(err)) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(total),
            Err(err) => return Err(err),
        }
    }
}

#[test]
fn mocked_config_loading() {
    let u = Unimock::new((
        JsonMock::valid.next_call(matching!(_)).returns(true),
        JsonMock::unmarshal
            .next_call(matching!(_))
            .returns(Ok(json!({"workers": 4, "retries": 2}))),
        JsonMock::valid.next_call(matching!((buf) if *buf == b"{")).returns(false),
    ));

    let config = load_config(&u, b"{...}").unwrap();
    assert_eq!(Some(&4), config.get("workers"));
    assert_eq!("config: invalid JSON", load_config(&u, b"{").unwrap_err().to_string());
}

#[test]
fn config_of_wrong_shape() {
    let err = load_config(&SerdeJson, br#"{"workers": "four"}"#).unwrap_err();
    assert!(matches!(err, Error::Message(_)));
}

#[test]
fn mocked_decoder_stream() {
    let u = Unimock::new((
        JsonMock::new_decoder.next_call(matching!(_)).answers(&decoder_self),
        DecoderMock::decode
            .next_call(matching!())
            .answers(&|_| Ok(json!(2)))
            .n_times(2),
        DecoderMock::decode
            .next_call(matching!())
            .answers(&|_| Err(Error::Io(io::Error::from(io::ErrorKind::UnexpectedEof)))),
    ));

    assert_eq!(4, sum_stream(&u, reader("")).unwrap());
}

#[test]
fn mocked_decoder_syntax_error() {
    let u = Unimock::new((
        JsonMock::new_decoder.next_call(matching!(_)).answers(&decoder_self),
        DecoderMock::decode.next_call(matching!()).answers(&|_| {
            Err(Error::Syntax {
                msg: "invalid character 'x' looking for beginning of value".to_string(),
                offset: 0,
            })
        }),
    ));

    assert!(matches!(
        sum_stream(&u, reader("x")),
        Err(Error::Syntax { offset: 0, .. })
    ));
}

#[test]
fn real_decoder_stream() {
    assert_eq!(6, sum_stream(&SerdeJson, reader("1 2\n3")).unwrap());

    let err = sum_stream(&SerdeJson, reader("1 [2")).unwrap_err();
    assert_eq!("unexpected EOF", err.to_string());
}

#[test]
fn decoder_reads_from_mocked_reader() {
    let input = Unimock::new((
        stdmock::io::ReaderMock::read
            .next_call(matching!(_))
            .answers(&|_, buf| {
                buf[..3].copy_from_slice(b"[1,");
                Ok(3)
            }),
        stdmock::io::ReaderMock::read
            .next_call(matching!(_))
            .answers(&|_, buf| {
                buf[..2].copy_from_slice(b"2]");
                Ok(2)
            }),
        stdmock::io::ReaderMock::read
            .next_call(matching!(_))
            .returns(Ok(0)),
    ));

    let mut dec = SerdeJson.new_decoder(Box::new(input));
    assert_eq!(json!([1, 2]), dec.decode().unwrap());
    assert!(matches!(dec.decode(), Err(Error::Io(_))));
}

#[test]
fn encoder_writes_lines() {
    let out = Unimock::new((
        WriterMock::write
            .next_call(matching!((buf) if *buf == b"{\"ok\":true}\n"))
            .returns(Ok(12)),
        WriterMock::write
            .next_call(matching!(_))
            .answers(&|_, _| Err(io::Error::from(io::ErrorKind::BrokenPipe))),
    ));

    let mut enc = SerdeJson.new_encoder(Box::new(out));
    enc.encode(&json!({"ok": true})).unwrap();
    assert!(matches!(enc.encode(&json!(null)), Err(Error::Io(_))));
}

#[test]
fn mocked_encoder() {
    let mut u = Unimock::new((
        EncoderMock::set_indent.next_call(matching!("", "  ")).returns(()),
        EncoderMock::encode
            .next_call(matching!((value) if value["id"] == 7))
            .returns(Ok(())),
    ));

    u.set_indent("", "  ");
    u.encode(&to_value(&BTreeMap::from([("id", 7)])).unwrap())
        .unwrap();
}

#[test]
fn html_escaping() {
    let u = Unimock::new(
        JsonMock::html_escape
            .next_call(matching!(_))
            .answers(&|_, src| SerdeJson.html_escape(src)),
    );

    assert_eq!(
        br#""\u003cb\u003e""#.to_vec(),
        u.html_escape(br#""<b>""#)
    );
    assert_eq!(
        b"{\n  \"a\": 1\n}".to_vec(),
        SerdeJson.marshal_indent(&json!({"a": 1}), "", "  ").unwrap()
    );
    assert_eq!(b"[\"\\u0026\"]".to_vec(), SerdeJson.marshal(&json!(["&"])).unwrap());
}

#[test]
fn stream_encoder_into_inner() {
    let mut enc = StreamEncoder::new(Stream::new(Vec::<u8>::new()));
    enc.set_escape_html(false);
    enc.encode(&Value::String("<&>".to_string())).unwrap();
    assert_eq!(
        b"\"<&>\"\n".to_vec(),
        enc.into_inner().into_inner().unwrap()
    );
}

#[test]
fn stream_encoder_layout_is_not_escaped() {
    let mut enc = StreamEncoder::new(Stream::new(Vec::<u8>::new()));
    enc.set_indent("//", " ");
    enc.encode(&json!({"k": "<&>"})).unwrap();
    enc.encode(&json!(1)).unwrap();

    let out = String::from_utf8(enc.into_inner().into_inner().unwrap()).unwrap();
    assert_eq!("{\n// \"k\": \"\\u003c\\u0026\\u003e\"\n//}\n1\n", out);
}

#[test]
fn decoder_over_one_byte_reads() {
    let input = Unimock::new(
        stdmock::io::ReaderMock::read
            .each_call(matching!(_))
            .answers_arc(std::sync::Arc::new({
                let text = br#"{"list": [10, 20]} "tail""#;
                let pos = std::sync::atomic::AtomicUsize::new(0);
                move |_: &mut Unimock, buf: &mut [u8]| -> io::Result<usize> {
                    let at = pos.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    match text.get(at) {
                        Some(byte) => {
                            buf[0] = *byte;
                            Ok(1)
                        }
                        None => Ok(0),
                    }
                }
            })),
    );

    let mut dec = SerdeJson.new_decoder(Box::new(input));
    assert_eq!(json!({"list": [10, 20]}), dec.decode().unwrap());
    assert_eq!(json!("tail"), dec.decode().unwrap());
    assert!(matches!(dec.decode(), Err(Error::Io(_))));
}
