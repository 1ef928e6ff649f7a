// Push-message codec for subscribed connections.
//
// A literal publish arrives as ["message", channel, payload]; a pattern match as
// ["pmessage", pattern, channel, payload]. The kind tag is compared lower-cased.
use bytes::{Bytes, BytesMut};

use crate::{Error, Result, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Message,
    PMessage,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Message => "message",
            MessageKind::PMessage => "pmessage",
        }
    }
}

/// A message published to a channel the connection is subscribed to.
///
/// ```
/// use bytes::Bytes;
/// use respmux_wire::PubSubMessage;
///
/// let message = PubSubMessage::pmessage("news.*", "news.tech", Bytes::from_static(b"hi"));
/// let value = message.to_value().expect("encode");
/// let decoded = PubSubMessage::from_value(&value).expect("decode");
/// assert_eq!(decoded, message);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    pub kind: MessageKind,
    // Set only for pattern messages.
    pub pattern: Option<String>,
    pub channel: String,
    pub payload: Bytes,
}

impl PubSubMessage {
    pub fn message(channel: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: MessageKind::Message,
            pattern: None,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    pub fn pmessage(
        pattern: impl Into<String>,
        channel: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            kind: MessageKind::PMessage,
            pattern: Some(pattern.into()),
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// The registry key this message is routed by: the pattern for pattern
    /// messages, the channel otherwise.
    pub fn routing_key(&self) -> &str {
        match (self.kind, self.pattern.as_deref()) {
            (MessageKind::PMessage, Some(pattern)) => pattern,
            _ => &self.channel,
        }
    }

    pub fn to_value(&self) -> Result<Value> {
        let mut parts = Vec::with_capacity(4);
        parts.push(Value::bulk(self.kind.as_str()));
        if self.kind == MessageKind::PMessage {
            let pattern = self.pattern.as_ref().ok_or(Error::MissingPattern)?;
            parts.push(Value::Bulk(Bytes::copy_from_slice(pattern.as_bytes())));
        }
        parts.push(Value::Bulk(Bytes::copy_from_slice(self.channel.as_bytes())));
        parts.push(Value::Bulk(self.payload.clone()));
        Ok(Value::Array(parts))
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        self.to_value()?.encode(buf);
        Ok(())
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(Error::NotASequence);
        };
        let mut fields = items
            .iter()
            .map(|item| item.as_bytes().ok_or(Error::NonScalarElement))
            .collect::<Result<Vec<Bytes>>>()?
            .into_iter();
        if fields.len() < 3 {
            return Err(Error::TooFewElements(fields.len()));
        }

        let kind = fields
            .next()
            .map(|tag| String::from_utf8_lossy(&tag).to_lowercase())
            .unwrap_or_default();
        let kind = match kind.as_str() {
            "pmessage" if fields.len() < 3 => return Err(Error::TooFewElements(fields.len() + 1)),
            "pmessage" => MessageKind::PMessage,
            "message" => MessageKind::Message,
            _ => return Err(Error::UnrecognizedKind(kind)),
        };

        let pattern = match kind {
            MessageKind::PMessage => Some(utf8(fields.next())?),
            MessageKind::Message => None,
        };
        let channel = utf8(fields.next())?;
        let payload = fields.next().unwrap_or_default();
        Ok(Self {
            kind,
            pattern,
            channel,
            payload,
        })
    }

    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>> {
        match Value::decode(buf)? {
            Some(value) => Self::from_value(&value).map(Some),
            None => Ok(None),
        }
    }
}

fn utf8(field: Option<Bytes>) -> Result<String> {
    let field = field.unwrap_or_default();
    String::from_utf8(field.to_vec()).map_err(|_| Error::InvalidUtf8)
}

/// Whether a decoded frame claims to be a push message.
///
/// Only the kind tag is inspected; a frame that passes this check can still
/// fail `PubSubMessage::from_value` if it is malformed.
pub fn is_push_frame(value: &Value) -> bool {
    let Value::Array(items) = value else {
        return false;
    };
    items
        .first()
        .and_then(Value::as_bytes)
        .is_some_and(|tag| {
            tag.eq_ignore_ascii_case(b"message") || tag.eq_ignore_ascii_case(b"pmessage")
        })
}
