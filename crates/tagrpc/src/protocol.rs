//! # Wire Protocol
//!
//! Requests and responses are tagpack streams framed by protocol tags:
//!
//! ```text
//! call            C <name> [<args list> [t]] z
//! function list   z
//! result          R <value> [A <args list>] z
//! error           E <message> z
//! functions       F <names list> z
//! ```
//!
//! The reference table is reset between the name and the arguments, and
//! between the result and the echoed arguments, on both ends.

use tagpack::Reader;
use tagpack::Value;
use tagpack::Writer;
use tagpack::tags;

use crate::error::Error;
use crate::error::Result;
use crate::handler::Invocation;
use crate::handler::Reply;
use crate::settings::ResultMode;

fn writer(simple: bool) -> Writer {
    if simple { Writer::simple() } else { Writer::new() }
}

pub fn encode_request(call: &Invocation, byref: bool, simple: bool) -> Result<Vec<u8>> {
    let mut writer = writer(simple);
    writer.write_tag(tags::CALL);
    writer.write_str(&call.name);
    if !call.args.is_empty() || byref {
        writer.reset();
        writer.write_slice(&call.args)?;
        if byref {
            writer.write_bool(true);
        }
    }
    writer.write_tag(tags::END);
    Ok(writer.into_bytes())
}

/// The request for a service's function list.
pub fn encode_functions_request() -> Vec<u8> {
    vec![tags::END]
}

/// A decoded call.
#[derive(Debug, Clone)]
pub struct CallRequest {
    pub name: String,
    pub args: Vec<Value>,
    pub byref: bool,
}

#[derive(Debug, Clone)]
pub enum Request {
    Functions,
    Call(CallRequest),
}

pub fn decode_request(data: &[u8]) -> Result<Request> {
    let mut reader = Reader::new(data);
    match reader.read_tag()? {
        tags::END => Ok(Request::Functions),
        tags::CALL => {
            let name: String = reader.read()?;
            let mut args = Vec::new();
            let mut byref = false;
            if reader.peek_tag()? == tags::LIST {
                reader.reset();
                args = reader.read::<Vec<Value>>()?;
                match reader.peek_tag()? {
                    tags::TRUE => {
                        reader.read_tag()?;
                        byref = true;
                    }
                    tags::FALSE => {
                        reader.read_tag()?;
                    }
                    _ => {}
                }
            }
            match reader.read_tag()? {
                tags::END => Ok(Request::Call(CallRequest { name, args, byref })),
                other => Err(Error::protocol(
                    format!("unexpected {} after call to {}", tags::describe(other), name),
                    data,
                )),
            }
        }
        other => Err(Error::protocol(format!("unexpected {} in request", tags::describe(other)), data)),
    }
}

/// What follows the result tag.
#[derive(Debug, Clone, Copy)]
pub enum ResultBody<'a> {
    Value(&'a Value),
    /// A result the method already encoded.
    Encoded(&'a [u8]),
}

pub fn encode_result(body: ResultBody<'_>, args: Option<&[Value]>, simple: bool) -> Result<Vec<u8>> {
    let mut writer = writer(simple);
    writer.write_tag(tags::RESULT);
    match body {
        ResultBody::Value(value) => writer.write_value(value)?,
        ResultBody::Encoded(bytes) => writer.write_raw(bytes),
    }
    if let Some(args) = args {
        writer.write_tag(tags::ARGUMENT);
        writer.reset();
        writer.write_slice(args)?;
    }
    writer.write_tag(tags::END);
    Ok(writer.into_bytes())
}

pub fn encode_error(message: &str) -> Vec<u8> {
    let mut writer = Writer::simple();
    writer.write_tag(tags::ERROR);
    writer.write_str(message);
    writer.write_tag(tags::END);
    writer.into_bytes()
}

pub fn encode_functions(names: &[String]) -> Result<Vec<u8>> {
    let mut writer = Writer::simple();
    writer.write_tag(tags::FUNCTIONS);
    writer.write_slice(names)?;
    writer.write_tag(tags::END);
    Ok(writer.into_bytes())
}

fn check_end(data: &[u8]) -> Result<()> {
    match data.last() {
        Some(&tags::END) => Ok(()),
        _ => Err(Error::protocol("missing end tag", data)),
    }
}

/// Decodes a call response according to `mode`. Malformed or truncated
/// responses are protocol errors carrying the payload.
pub fn decode_response(data: &[u8], mode: ResultMode) -> Result<Reply> {
    check_end(data)?;
    match mode {
        ResultMode::RawWithEndTag => return Ok(Reply::new(Value::Bytes(data.to_vec()))),
        ResultMode::Raw => return Ok(Reply::new(Value::Bytes(data[..data.len() - 1].to_vec()))),
        ResultMode::Normal | ResultMode::Serialized => {}
    }

    let mut reader = Reader::new(data);
    let tag = reader.read_tag()?;
    match tag {
        tags::RESULT => decode_result(&mut reader, mode).map_err(|e| match e {
            Error::Codec(e) => Error::protocol(e.to_string(), data),
            other => other,
        }),
        tags::ERROR => {
            let message: String = reader.read().map_err(|e| Error::protocol(e.to_string(), data))?;
            Err(Error::Remote(message))
        }
        other => Err(Error::protocol(format!("unexpected {}", tags::describe(other)), data)),
    }
}

fn decode_result(reader: &mut Reader<'_>, mode: ResultMode) -> Result<Reply> {
    let result = match mode {
        ResultMode::Serialized => Value::Bytes(reader.read_raw()?.to_vec()),
        _ => reader.read_value()?,
    };
    let mut reply = Reply::new(result);
    if reader.peek_tag()? == tags::ARGUMENT {
        reader.read_tag()?;
        reader.reset();
        reply.args = Some(reader.read::<Vec<Value>>()?);
    }
    reader.expect_tag(tags::END, "end tag")?;
    Ok(reply)
}

pub fn decode_functions(data: &[u8]) -> Result<Vec<String>> {
    check_end(data)?;
    let mut reader = Reader::new(data);
    let names = (|| {
        reader.expect_tag(tags::FUNCTIONS, "function list")?;
        reader.read::<Vec<String>>()
    })();
    names.map_err(|e| Error::protocol(e.to_string(), data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_layout() {
        let call = Invocation::new("divide", vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(encode_request(&call, false, false).unwrap(), b"Cs6\"divide\"a2{12}z");
        assert_eq!(encode_request(&call, true, false).unwrap(), b"Cs6\"divide\"a2{12}tz");

        let bare = Invocation::new("ping", Vec::new());
        assert_eq!(encode_request(&bare, false, false).unwrap(), b"Cs4\"ping\"z");
        assert_eq!(encode_request(&bare, true, false).unwrap(), b"Cs4\"ping\"a{}tz");
    }

    #[test]
    fn request_decodes_name_args_and_byref() {
        let call = Invocation::new("hello", vec![Value::from("hello"), Value::from("hello")]);
        let bytes = encode_request(&call, true, false).unwrap();
        match decode_request(&bytes).unwrap() {
            Request::Call(req) => {
                assert_eq!(req.name, "hello");
                assert_eq!(req.args, vec![Value::from("hello"), Value::from("hello")]);
                assert!(req.byref);
            }
            Request::Functions => panic!("expected a call"),
        }
        assert!(matches!(decode_request(b"z").unwrap(), Request::Functions));
        assert!(matches!(decode_request(b"Cs4\"ping\"a{}q"), Err(Error::Protocol { .. })));
    }

    #[test]
    fn result_with_echoed_args() {
        let args = vec![Value::Int(5)];
        let bytes = encode_result(ResultBody::Value(&Value::Int(56)), Some(&args), false).unwrap();
        assert_eq!(bytes, b"Ri56;Aa1{5}z");
        let reply = decode_response(&bytes, ResultMode::Normal).unwrap();
        assert_eq!(reply.result, Value::Int(56));
        assert_eq!(reply.args, Some(args));
    }

    #[test]
    fn result_modes() {
        let bytes = encode_result(ResultBody::Value(&Value::from("ok")), None, false).unwrap();
        assert_eq!(bytes, b"Rs2\"ok\"z");
        let serialized = decode_response(&bytes, ResultMode::Serialized).unwrap();
        assert_eq!(serialized.result, Value::Bytes(b"s2\"ok\"".to_vec()));
        let raw = decode_response(&bytes, ResultMode::Raw).unwrap();
        assert_eq!(raw.result, Value::Bytes(b"Rs2\"ok\"".to_vec()));
        let with_end = decode_response(&bytes, ResultMode::RawWithEndTag).unwrap();
        assert_eq!(with_end.result, Value::Bytes(bytes.clone()));

        let encoded = encode_result(ResultBody::Encoded(b"s2\"ok\""), None, false).unwrap();
        assert_eq!(encoded, bytes);
    }

    #[test]
    fn error_response_is_remote_error() {
        let bytes = encode_error("divide by zero");
        assert_eq!(bytes, b"Es14\"divide by zero\"z");
        match decode_response(&bytes, ResultMode::Normal) {
            Err(Error::Remote(msg)) => assert_eq!(msg, "divide by zero"),
            other => panic!("expected remote error, got {:?}", other),
        }
    }

    #[test]
    fn malformed_responses_are_protocol_errors() {
        for bad in [&b"Ri56;"[..], b"", b"Xz", b"Rs9\"trunc\"z", b"Ri5;Q"] {
            match decode_response(bad, ResultMode::Normal) {
                Err(Error::Protocol { payload, .. }) => assert_eq!(payload, bad),
                other => panic!("expected protocol error for {:?}, got {:?}", bad, other),
            }
        }
        let err = decode_response(b"Xz", ResultMode::Normal).unwrap_err();
        assert!(err.to_string().starts_with("wrong response:"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn function_list() {
        let names = vec!["multiply".to_string(), "divide".to_string()];
        let bytes = encode_functions(&names).unwrap();
        assert_eq!(bytes, b"Fa2{s8\"multiply\"s6\"divide\"}z");
        assert_eq!(decode_functions(&bytes).unwrap(), names);
    }
}
