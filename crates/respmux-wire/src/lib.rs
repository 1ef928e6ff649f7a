// RESP2 wire format: generic values, command construction, and pub/sub push messages.
use bytes::{Buf, Bytes, BytesMut};

pub mod pubsub;

pub use pubsub::{MessageKind, PubSubMessage, is_push_frame};

// Nesting cap for arrays so a hostile peer cannot blow the stack.
pub const MAX_DEPTH: usize = 32;
// Largest bulk string we accept; matches the server-side proto-max-bulk-len default.
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid type prefix {0:#04x}")]
    InvalidPrefix(u8),
    #[error("invalid integer")]
    InvalidInteger,
    #[error("invalid length {0}")]
    InvalidLength(i64),
    #[error("missing CRLF terminator")]
    MissingTerminator,
    #[error("values nested too deeply")]
    TooDeep,
    #[error("message has too few elements ({0})")]
    TooFewElements(usize),
    #[error("unrecognized message kind {0:?}")]
    UnrecognizedKind(String),
    #[error("message is not a sequence")]
    NotASequence,
    #[error("message element is not a byte string")]
    NonScalarElement,
    #[error("message field is not valid utf-8")]
    InvalidUtf8,
    #[error("pmessage requires a pattern")]
    MissingPattern,
}

/// A single RESP2 protocol value.
///
/// ```
/// use bytes::BytesMut;
/// use respmux_wire::Value;
///
/// let value = Value::command("SUBSCRIBE", ["news", "sport"]);
/// let mut buf = BytesMut::new();
/// value.encode(&mut buf);
/// assert_eq!(&buf[..], b"*3\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n$5\r\nsport\r\n");
/// let decoded = Value::decode(&mut buf).expect("decode").expect("complete");
/// assert_eq!(decoded, value);
/// assert!(buf.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    // Null bulk string or null array.
    Nil,
    Array(Vec<Value>),
}

impl Value {
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Value::Bulk(data.into())
    }

    /// Build a command as an array of bulk strings.
    pub fn command<I, A>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let mut parts = vec![Value::Bulk(Bytes::copy_from_slice(name.as_bytes()))];
        parts.extend(
            args.into_iter()
                .map(|arg| Value::Bulk(Bytes::copy_from_slice(arg.as_ref()))),
        );
        Value::Array(parts)
    }

    /// Scalar view of the value, the way a byte-string sequence decoder sees it.
    pub fn as_bytes(&self) -> Option<Bytes> {
        match self {
            Value::Simple(text) => Some(Bytes::copy_from_slice(text.as_bytes())),
            Value::Bulk(data) => Some(data.clone()),
            Value::Integer(n) => Some(Bytes::from(n.to_string())),
            Value::Nil => Some(Bytes::new()),
            Value::Error(_) | Value::Array(_) => None,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Simple(text) => put_line(buf, b'+', text.as_bytes()),
            Value::Error(text) => put_line(buf, b'-', text.as_bytes()),
            Value::Integer(n) => put_line(buf, b':', n.to_string().as_bytes()),
            Value::Bulk(data) => {
                put_line(buf, b'$', data.len().to_string().as_bytes());
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\r\n");
            }
            Value::Nil => buf.extend_from_slice(b"$-1\r\n"),
            Value::Array(items) => {
                put_line(buf, b'*', items.len().to_string().as_bytes());
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode one value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves the buffer untouched when the value is not
    /// complete yet; on success the consumed bytes are removed.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        match parse(&buf[..], 0, 0)? {
            Some((value, consumed)) => {
                buf.advance(consumed);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

fn put_line(buf: &mut BytesMut, prefix: u8, body: &[u8]) {
    buf.reserve(body.len() + 3);
    buf.extend_from_slice(&[prefix]);
    buf.extend_from_slice(body);
    buf.extend_from_slice(b"\r\n");
}

fn read_line(input: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let rest = input.get(start..)?;
    let end = rest.windows(2).position(|pair| pair == b"\r\n")?;
    Some((&rest[..end], start + end + 2))
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(Error::InvalidInteger)
}

fn parse(input: &[u8], start: usize, depth: usize) -> Result<Option<(Value, usize)>> {
    let Some(&prefix) = input.get(start) else {
        return Ok(None);
    };
    let Some((line, next)) = read_line(input, start + 1) else {
        return Ok(None);
    };
    match prefix {
        b'+' => Ok(Some((
            Value::Simple(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b'-' => Ok(Some((
            Value::Error(String::from_utf8_lossy(line).into_owned()),
            next,
        ))),
        b':' => Ok(Some((Value::Integer(parse_int(line)?), next))),
        b'$' => {
            let declared = parse_int(line)?;
            if declared == -1 {
                return Ok(Some((Value::Nil, next)));
            }
            let len = usize::try_from(declared).map_err(|_| Error::InvalidLength(declared))?;
            if len > MAX_BULK_LEN {
                return Err(Error::InvalidLength(declared));
            }
            let end = next + len;
            if input.len() < end + 2 {
                return Ok(None);
            }
            if &input[end..end + 2] != b"\r\n" {
                return Err(Error::MissingTerminator);
            }
            Ok(Some((
                Value::Bulk(Bytes::copy_from_slice(&input[next..end])),
                end + 2,
            )))
        }
        b'*' => {
            let declared = parse_int(line)?;
            if declared == -1 {
                return Ok(Some((Value::Nil, next)));
            }
            let count = usize::try_from(declared).map_err(|_| Error::InvalidLength(declared))?;
            if depth >= MAX_DEPTH {
                return Err(Error::TooDeep);
            }
            // Cap the pre-allocation; the declared count is untrusted.
            let mut items = Vec::with_capacity(count.min(64));
            let mut cursor = next;
            for _ in 0..count {
                match parse(input, cursor, depth + 1)? {
                    Some((item, after)) => {
                        items.push(item);
                        cursor = after;
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((Value::Array(items), cursor)))
        }
        other => Err(Error::InvalidPrefix(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Result<Option<Value>> {
        let mut buf = BytesMut::from(bytes);
        Value::decode(&mut buf)
    }

    #[test]
    fn decodes_scalar_types() {
        assert_eq!(
            decode_all(b"+OK\r\n").expect("simple"),
            Some(Value::Simple("OK".into()))
        );
        assert_eq!(
            decode_all(b"-ERR wrong\r\n").expect("error"),
            Some(Value::Error("ERR wrong".into()))
        );
        assert_eq!(
            decode_all(b":-42\r\n").expect("integer"),
            Some(Value::Integer(-42))
        );
        assert_eq!(decode_all(b"$-1\r\n").expect("nil"), Some(Value::Nil));
        assert_eq!(decode_all(b"*-1\r\n").expect("nil array"), Some(Value::Nil));
        assert_eq!(
            decode_all(b"$0\r\n\r\n").expect("empty bulk"),
            Some(Value::Bulk(Bytes::new()))
        );
    }

    #[test]
    fn incomplete_input_leaves_buffer_untouched() {
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        let before = buf.len();
        assert_eq!(Value::decode(&mut buf).expect("partial"), None);
        assert_eq!(buf.len(), before);
        buf.extend_from_slice(b"r\r\n");
        let value = Value::decode(&mut buf).expect("decode").expect("complete");
        assert_eq!(
            value,
            Value::Array(vec![Value::bulk("foo"), Value::bulk("bar")])
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_consumes_only_the_first_value() {
        let mut buf = BytesMut::from(&b"+PONG\r\n:1\r\n"[..]);
        assert_eq!(
            Value::decode(&mut buf).expect("first"),
            Some(Value::Simple("PONG".into()))
        );
        assert_eq!(&buf[..], b":1\r\n");
    }

    #[test]
    fn rejects_unknown_prefix() {
        let err = decode_all(b"?what\r\n").expect_err("prefix");
        assert_eq!(err, Error::InvalidPrefix(b'?'));
    }

    #[test]
    fn rejects_bulk_without_terminator() {
        let err = decode_all(b"$3\r\nfooXX").expect_err("terminator");
        assert_eq!(err, Error::MissingTerminator);
    }

    #[test]
    fn rejects_negative_lengths_other_than_nil() {
        let err = decode_all(b"$-5\r\n").expect_err("length");
        assert_eq!(err, Error::InvalidLength(-5));
    }

    #[test]
    fn rejects_excessive_nesting() {
        let mut input = Vec::new();
        for _ in 0..=MAX_DEPTH {
            input.extend_from_slice(b"*1\r\n");
        }
        input.extend_from_slice(b":1\r\n");
        let err = decode_all(&input).expect_err("depth");
        assert_eq!(err, Error::TooDeep);
    }

    #[test]
    fn scalar_view_renders_integers_and_nil() {
        assert_eq!(Value::Integer(3).as_bytes(), Some(Bytes::from_static(b"3")));
        assert_eq!(Value::Nil.as_bytes(), Some(Bytes::new()));
        assert_eq!(Value::Array(vec![]).as_bytes(), None);
        assert_eq!(Value::Error("x".into()).as_bytes(), None);
    }

    #[test]
    fn nested_array_encoding_is_stable() {
        let value = Value::Array(vec![
            Value::Simple("subscribe".into()),
            Value::Array(vec![Value::Integer(1), Value::Nil]),
        ]);
        assert_eq!(
            &value.to_bytes()[..],
            b"*2\r\n+subscribe\r\n*2\r\n:1\r\n$-1\r\n"
        );
    }
}
