//! Message sections (OASIS AMQP 1.0 Part 3).
//!
//! A message payload is a sequence of described sections. This client emits
//! and consumes the standard set: header, the two annotation maps,
//! properties, application-properties, one of the three body shapes, and
//! footer. Multiple `data` sections concatenate into a multi-part binary
//! body; the other sections occupy a single slot each.

use bytes::{Bytes, BytesMut};

use crate::decode::decode_value;
use crate::definitions::{composite, open_composite, opt, Fields};
use crate::encode::encode_value;
use crate::error::CodecError;
use crate::value::Value;
use crate::Result;

pub const CODE_HEADER: u64 = 0x70;
pub const CODE_DELIVERY_ANNOTATIONS: u64 = 0x71;
pub const CODE_MESSAGE_ANNOTATIONS: u64 = 0x72;
pub const CODE_PROPERTIES: u64 = 0x73;
pub const CODE_APPLICATION_PROPERTIES: u64 = 0x74;
pub const CODE_DATA: u64 = 0x75;
pub const CODE_SEQUENCE: u64 = 0x76;
pub const CODE_VALUE: u64 = 0x77;
pub const CODE_FOOTER: u64 = 0x78;

/// Transport header section.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub durable: bool,
    pub priority: u8,
    /// Time to live in milliseconds.
    pub ttl: Option<u32>,
    pub first_acquirer: bool,
    pub delivery_count: u32,
}

impl Default for Header {
    fn default() -> Self {
        Header {
            durable: false,
            priority: 4,
            ttl: None,
            first_acquirer: false,
            delivery_count: 0,
        }
    }
}

/// Immutable message properties section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties {
    /// ulong, uuid, binary or string; kept as a raw value.
    pub message_id: Option<Value>,
    pub user_id: Option<Bytes>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<Value>,
    pub content_type: Option<Bytes>,
    pub content_encoding: Option<Bytes>,
    pub absolute_expiry_time: Option<i64>,
    pub creation_time: Option<i64>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
    pub reply_to_group_id: Option<String>,
}

/// The three body shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// One or more binary `data` sections.
    Data(Vec<Bytes>),
    /// A single `amqp-value` section.
    Value(Value),
    /// One or more `amqp-sequence` sections, flattened.
    Sequence(Vec<Value>),
}

impl Body {
    pub fn data(bytes: impl Into<Bytes>) -> Body {
        Body::Data(vec![bytes.into()])
    }
}

/// A complete bare message plus annotations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub header: Option<Header>,
    pub delivery_annotations: Option<Vec<(Value, Value)>>,
    pub message_annotations: Option<Vec<(Value, Value)>>,
    pub properties: Option<Properties>,
    pub application_properties: Option<Vec<(Value, Value)>>,
    pub body: Option<Body>,
    pub footer: Option<Vec<(Value, Value)>>,
}

impl Message {
    /// A message whose body is a single binary data section.
    pub fn from_data(bytes: impl Into<Bytes>) -> Message {
        Message {
            body: Some(Body::data(bytes)),
            ..Message::default()
        }
    }

    /// A message whose body is a single amqp-value section.
    pub fn from_value(value: Value) -> Message {
        Message {
            body: Some(Body::Value(value)),
            ..Message::default()
        }
    }

    /// Application property lookup accepting symbol or string keys.
    pub fn application_property(&self, key: &[u8]) -> Option<&Value> {
        self.application_properties.as_ref()?.iter().find_map(|(k, v)| match k {
            Value::Symbol(s) if s.as_ref() == key => Some(v),
            Value::String(s) if s.as_bytes() == key => Some(v),
            _ => None,
        })
    }
}

fn header_value(h: &Header) -> Value {
    composite(
        CODE_HEADER,
        vec![
            Value::Boolean(h.durable),
            Value::Ubyte(h.priority),
            h.ttl.map_or(Value::Null, Value::Uint),
            Value::Boolean(h.first_acquirer),
            Value::Uint(h.delivery_count),
        ],
    )
}

fn header_from(items: &[Value]) -> Result<Header> {
    let f = Fields::new("header", items);
    Ok(Header {
        durable: f.bool(0, "durable")?.unwrap_or(false),
        priority: f.ubyte(1, "priority")?.unwrap_or(4),
        ttl: f.u32(2, "ttl")?,
        first_acquirer: f.bool(3, "first-acquirer")?.unwrap_or(false),
        delivery_count: f.u32(4, "delivery-count")?.unwrap_or(0),
    })
}

fn properties_value(p: &Properties) -> Value {
    composite(
        CODE_PROPERTIES,
        vec![
            p.message_id.clone().unwrap_or(Value::Null),
            p.user_id.clone().map_or(Value::Null, Value::Binary),
            opt(p.to.clone()),
            opt(p.subject.clone()),
            opt(p.reply_to.clone()),
            p.correlation_id.clone().unwrap_or(Value::Null),
            p.content_type.clone().map_or(Value::Null, Value::Symbol),
            p.content_encoding.clone().map_or(Value::Null, Value::Symbol),
            p.absolute_expiry_time.map_or(Value::Null, Value::Timestamp),
            p.creation_time.map_or(Value::Null, Value::Timestamp),
            opt(p.group_id.clone()),
            p.group_sequence.map_or(Value::Null, Value::Uint),
            opt(p.reply_to_group_id.clone()),
        ],
    )
}

fn properties_from(items: &[Value]) -> Result<Properties> {
    let f = Fields::new("properties", items);
    Ok(Properties {
        message_id: f.get(0).cloned(),
        user_id: f.binary(1, "user-id")?,
        to: f.string(2, "to")?,
        subject: f.string(3, "subject")?,
        reply_to: f.string(4, "reply-to")?,
        correlation_id: f.get(5).cloned(),
        content_type: f.symbol(6, "content-type")?,
        content_encoding: f.symbol(7, "content-encoding")?,
        absolute_expiry_time: f.timestamp(8, "absolute-expiry-time")?,
        creation_time: f.timestamp(9, "creation-time")?,
        group_id: f.string(10, "group-id")?,
        group_sequence: f.u32(11, "group-sequence")?,
        reply_to_group_id: f.string(12, "reply-to-group-id")?,
    })
}

fn annotations(code: u64, map: &[(Value, Value)]) -> Value {
    Value::Described(
        Box::new(Value::Ulong(code)),
        Box::new(Value::Map(map.to_vec())),
    )
}

/// Serialize all present sections in section order.
pub fn encode_payload(message: &Message, buf: &mut BytesMut) -> Result<()> {
    if let Some(h) = &message.header {
        encode_value(&header_value(h), buf)?;
    }
    if let Some(m) = &message.delivery_annotations {
        encode_value(&annotations(CODE_DELIVERY_ANNOTATIONS, m), buf)?;
    }
    if let Some(m) = &message.message_annotations {
        encode_value(&annotations(CODE_MESSAGE_ANNOTATIONS, m), buf)?;
    }
    if let Some(p) = &message.properties {
        encode_value(&properties_value(p), buf)?;
    }
    if let Some(m) = &message.application_properties {
        encode_value(&annotations(CODE_APPLICATION_PROPERTIES, m), buf)?;
    }
    match &message.body {
        Some(Body::Data(parts)) => {
            for part in parts {
                let section = Value::Described(
                    Box::new(Value::Ulong(CODE_DATA)),
                    Box::new(Value::Binary(part.clone())),
                );
                encode_value(&section, buf)?;
            }
        }
        Some(Body::Sequence(items)) => {
            let section = Value::Described(
                Box::new(Value::Ulong(CODE_SEQUENCE)),
                Box::new(Value::List(items.clone())),
            );
            encode_value(&section, buf)?;
        }
        Some(Body::Value(value)) => {
            let section = Value::Described(
                Box::new(Value::Ulong(CODE_VALUE)),
                Box::new(value.clone()),
            );
            encode_value(&section, buf)?;
        }
        None => {}
    }
    if let Some(m) = &message.footer {
        encode_value(&annotations(CODE_FOOTER, m), buf)?;
    }
    Ok(())
}

fn expect_map(value: &Value, what: &'static str) -> Result<Vec<(Value, Value)>> {
    match value {
        Value::Map(entries) => Ok(entries.clone()),
        _ => Err(CodecError::FieldType {
            performative: what,
            field: "map",
        }),
    }
}

/// Reassemble a message from a complete payload.
///
/// Sections may arrive in any order from permissive peers; multiple `data`
/// sections append, multiple `amqp-sequence` sections flatten, and any
/// other repeated section overwrites its slot.
pub fn decode_payload(input: &[u8]) -> Result<Message> {
    let mut message = Message::default();
    let mut offset = 0;
    while offset < input.len() {
        let (section, used) = decode_value(&input[offset..])?;
        offset += used;
        let (descriptor, payload) = match &section {
            Value::Described(d, p) => (d.as_ref(), p.as_ref()),
            _ => return Err(CodecError::Malformed("message section is not described")),
        };
        let code = descriptor
            .as_u64()
            .ok_or(CodecError::Malformed("section descriptor is not a ulong"))?;
        match code {
            CODE_HEADER => {
                let (_, items) = open_composite(&section)?;
                message.header = Some(header_from(items)?);
            }
            CODE_DELIVERY_ANNOTATIONS => {
                message.delivery_annotations = Some(expect_map(payload, "delivery-annotations")?);
            }
            CODE_MESSAGE_ANNOTATIONS => {
                message.message_annotations = Some(expect_map(payload, "message-annotations")?);
            }
            CODE_PROPERTIES => {
                let (_, items) = open_composite(&section)?;
                message.properties = Some(properties_from(items)?);
            }
            CODE_APPLICATION_PROPERTIES => {
                message.application_properties =
                    Some(expect_map(payload, "application-properties")?);
            }
            CODE_DATA => {
                let part = payload
                    .as_bytes()
                    .cloned()
                    .ok_or(CodecError::Malformed("data section is not binary"))?;
                match &mut message.body {
                    Some(Body::Data(parts)) => parts.push(part),
                    _ => message.body = Some(Body::Data(vec![part])),
                }
            }
            CODE_SEQUENCE => {
                let items = match payload {
                    Value::List(items) => items.clone(),
                    _ => return Err(CodecError::Malformed("sequence section is not a list")),
                };
                match &mut message.body {
                    Some(Body::Sequence(all)) => all.extend(items),
                    _ => message.body = Some(Body::Sequence(items)),
                }
            }
            CODE_VALUE => {
                message.body = Some(Body::Value(payload.clone()));
            }
            CODE_FOOTER => {
                message.footer = Some(expect_map(payload, "footer")?);
            }
            other => return Err(CodecError::UnknownDescriptor(other)),
        }
    }
    Ok(message)
}
