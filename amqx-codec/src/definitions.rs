//! Composite non-frame types: termini, delivery states, error info.
//!
//! These share the described-list encoding of performatives (descriptor
//! code + field list, trailing absent fields trimmed) but appear inside
//! frame bodies rather than as frame bodies. The field-list reader here is
//! also the machinery the performative codec builds on.

use bytes::Bytes;

use crate::error::CodecError;
use crate::value::Value;
use crate::Result;

// ============================================================================
// Descriptor codes
// ============================================================================

pub const CODE_ERROR: u64 = 0x1d;
pub const CODE_RECEIVED: u64 = 0x23;
pub const CODE_ACCEPTED: u64 = 0x24;
pub const CODE_REJECTED: u64 = 0x25;
pub const CODE_RELEASED: u64 = 0x26;
pub const CODE_MODIFIED: u64 = 0x27;
pub const CODE_SOURCE: u64 = 0x28;
pub const CODE_TARGET: u64 = 0x29;

// ============================================================================
// Described-list plumbing
// ============================================================================

/// Build a described list, dropping trailing null fields as the wire format
/// allows.
pub(crate) fn composite(code: u64, mut fields: Vec<Value>) -> Value {
    while fields.last().is_some_and(Value::is_null) {
        fields.pop();
    }
    Value::Described(Box::new(Value::Ulong(code)), Box::new(Value::List(fields)))
}

/// Split a described value into its numeric descriptor code and field list.
/// An empty-list payload may arrive as `list0`; symbols as descriptors are
/// not produced by the brokers this client targets and are rejected.
pub(crate) fn open_composite(value: &Value) -> Result<(u64, &[Value])> {
    let (descriptor, payload) = match value {
        Value::Described(d, p) => (d.as_ref(), p.as_ref()),
        _ => return Err(CodecError::Malformed("expected a described value")),
    };
    let code = descriptor
        .as_u64()
        .ok_or(CodecError::Malformed("descriptor is not a ulong"))?;
    let fields = match payload {
        Value::List(items) => items.as_slice(),
        _ => return Err(CodecError::Malformed("composite payload is not a list")),
    };
    Ok((code, fields))
}

/// Positional reader over a composite's field list. Fields past the encoded
/// length, and explicit nulls, read as absent; typed accessors produce
/// [`CodecError::FieldType`] / [`CodecError::MandatoryField`] with the owning
/// type's name.
pub(crate) struct Fields<'a> {
    owner: &'static str,
    items: &'a [Value],
}

impl<'a> Fields<'a> {
    pub(crate) fn new(owner: &'static str, items: &'a [Value]) -> Self {
        Fields { owner, items }
    }

    pub(crate) fn get(&self, index: usize) -> Option<&'a Value> {
        self.items.get(index).filter(|v| !v.is_null())
    }

    fn typed<T>(&self, index: usize, field: &'static str, cast: impl FnOnce(&'a Value) -> Option<T>) -> Result<Option<T>> {
        match self.get(index) {
            None => Ok(None),
            Some(v) => cast(v).map(Some).ok_or(CodecError::FieldType {
                performative: self.owner,
                field,
            }),
        }
    }

    pub(crate) fn required<T>(&self, value: Result<Option<T>>, field: &'static str) -> Result<T> {
        value?.ok_or(CodecError::MandatoryField {
            performative: self.owner,
            field,
        })
    }

    pub(crate) fn bool(&self, index: usize, field: &'static str) -> Result<Option<bool>> {
        self.typed(index, field, Value::as_bool)
    }

    pub(crate) fn ubyte(&self, index: usize, field: &'static str) -> Result<Option<u8>> {
        self.typed(index, field, |v| match v {
            Value::Ubyte(b) => Some(*b),
            _ => None,
        })
    }

    pub(crate) fn ushort(&self, index: usize, field: &'static str) -> Result<Option<u16>> {
        self.typed(index, field, |v| match v {
            Value::Ushort(s) => Some(*s),
            Value::Ubyte(b) => Some(u16::from(*b)),
            _ => None,
        })
    }

    pub(crate) fn u32(&self, index: usize, field: &'static str) -> Result<Option<u32>> {
        self.typed(index, field, Value::as_u32)
    }

    pub(crate) fn u64(&self, index: usize, field: &'static str) -> Result<Option<u64>> {
        self.typed(index, field, Value::as_u64)
    }

    pub(crate) fn timestamp(&self, index: usize, field: &'static str) -> Result<Option<i64>> {
        self.typed(index, field, |v| match v {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        })
    }

    pub(crate) fn string(&self, index: usize, field: &'static str) -> Result<Option<String>> {
        self.typed(index, field, |v| v.as_str().map(str::to_owned))
    }

    pub(crate) fn symbol(&self, index: usize, field: &'static str) -> Result<Option<Bytes>> {
        self.typed(index, field, |v| v.as_symbol().cloned())
    }

    pub(crate) fn binary(&self, index: usize, field: &'static str) -> Result<Option<Bytes>> {
        self.typed(index, field, |v| v.as_bytes().cloned())
    }

    pub(crate) fn map(&self, index: usize, field: &'static str) -> Result<Option<Vec<(Value, Value)>>> {
        self.typed(index, field, |v| match v {
            Value::Map(entries) => Some(entries.clone()),
            _ => None,
        })
    }

    /// "Multiple" fields encode one element bare or several as an array.
    pub(crate) fn symbols(&self, index: usize, field: &'static str) -> Result<Vec<Bytes>> {
        match self.get(index) {
            None => Ok(Vec::new()),
            Some(Value::Symbol(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) | Some(Value::List(items)) => items
                .iter()
                .map(|v| {
                    v.as_symbol().cloned().ok_or(CodecError::FieldType {
                        performative: self.owner,
                        field,
                    })
                })
                .collect(),
            Some(_) => Err(CodecError::FieldType {
                performative: self.owner,
                field,
            }),
        }
    }
}

/// Encode a "multiple" symbol field: absent, bare, or array.
pub(crate) fn symbols_value(symbols: &[Bytes]) -> Value {
    match symbols {
        [] => Value::Null,
        [one] => Value::Symbol(one.clone()),
        many => Value::Array(many.iter().cloned().map(Value::Symbol).collect()),
    }
}

pub(crate) fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map_or(Value::Null, Into::into)
}

pub(crate) fn opt_map(map: &Option<Vec<(Value, Value)>>) -> Value {
    map.as_ref().map_or(Value::Null, |m| Value::Map(m.clone()))
}

// ============================================================================
// Link endpoint roles and settle modes
// ============================================================================

/// Link role. On the wire a boolean: false = sender, true = receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl Role {
    pub fn is_receiver(self) -> bool {
        matches!(self, Role::Receiver)
    }

    /// The role the peer must present for this endpoint.
    pub fn complement(self) -> Role {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }

    pub(crate) fn to_value(self) -> Value {
        Value::Boolean(self.is_receiver())
    }

    pub(crate) fn from_bool(v: bool) -> Role {
        if v {
            Role::Receiver
        } else {
            Role::Sender
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    #[default]
    Mixed,
}

impl SenderSettleMode {
    pub(crate) fn to_value(self) -> Value {
        Value::Ubyte(match self {
            SenderSettleMode::Unsettled => 0,
            SenderSettleMode::Settled => 1,
            SenderSettleMode::Mixed => 2,
        })
    }

    pub(crate) fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(SenderSettleMode::Unsettled),
            1 => Ok(SenderSettleMode::Settled),
            2 => Ok(SenderSettleMode::Mixed),
            _ => Err(CodecError::Malformed("snd-settle-mode out of range")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverSettleMode {
    #[default]
    First,
    Second,
}

impl ReceiverSettleMode {
    pub(crate) fn to_value(self) -> Value {
        Value::Ubyte(match self {
            ReceiverSettleMode::First => 0,
            ReceiverSettleMode::Second => 1,
        })
    }

    pub(crate) fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ReceiverSettleMode::First),
            1 => Ok(ReceiverSettleMode::Second),
            _ => Err(CodecError::Malformed("rcv-settle-mode out of range")),
        }
    }
}

// ============================================================================
// Error info (descriptor 0x1d)
// ============================================================================

/// The error struct carried in DETACH, END and CLOSE.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorInfo {
    /// Condition symbol, e.g. `amqp:internal-error`. Mandatory.
    pub condition: Bytes,
    pub description: Option<String>,
    pub info: Option<Vec<(Value, Value)>>,
}

impl ErrorInfo {
    pub fn new(condition: &'static str, description: impl Into<String>) -> Self {
        ErrorInfo {
            condition: Bytes::from_static(condition.as_bytes()),
            description: Some(description.into()),
            info: None,
        }
    }

    pub fn to_value(&self) -> Value {
        composite(
            CODE_ERROR,
            vec![
                Value::Symbol(self.condition.clone()),
                opt(self.description.clone()),
                opt_map(&self.info),
            ],
        )
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (code, items) = open_composite(value)?;
        if code != CODE_ERROR {
            return Err(CodecError::UnknownDescriptor(code));
        }
        let f = Fields::new("error", items);
        Ok(ErrorInfo {
            condition: f.required(f.symbol(0, "condition"), "condition")?,
            description: f.string(1, "description")?,
            info: f.map(2, "info")?,
        })
    }
}

// ============================================================================
// Delivery states and outcomes (descriptors 0x23..0x27)
// ============================================================================

/// Terminal delivery outcomes.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted,
    Rejected(Option<ErrorInfo>),
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
        message_annotations: Option<Vec<(Value, Value)>>,
    },
}

/// Delivery state as carried by DISPOSITION and TRANSFER: either a terminal
/// outcome or the non-terminal `received` marker.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Received {
        section_number: u32,
        section_offset: u64,
    },
    Outcome(Outcome),
}

impl DeliveryState {
    pub const ACCEPTED: DeliveryState = DeliveryState::Outcome(Outcome::Accepted);

    pub fn outcome(&self) -> Option<&Outcome> {
        match self {
            DeliveryState::Outcome(o) => Some(o),
            DeliveryState::Received { .. } => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DeliveryState::Received {
                section_number,
                section_offset,
            } => composite(
                CODE_RECEIVED,
                vec![Value::Uint(*section_number), Value::Ulong(*section_offset)],
            ),
            DeliveryState::Outcome(Outcome::Accepted) => composite(CODE_ACCEPTED, vec![]),
            DeliveryState::Outcome(Outcome::Rejected(error)) => composite(
                CODE_REJECTED,
                vec![error.as_ref().map_or(Value::Null, ErrorInfo::to_value)],
            ),
            DeliveryState::Outcome(Outcome::Released) => composite(CODE_RELEASED, vec![]),
            DeliveryState::Outcome(Outcome::Modified {
                delivery_failed,
                undeliverable_here,
                message_annotations,
            }) => composite(
                CODE_MODIFIED,
                vec![
                    Value::Boolean(*delivery_failed),
                    Value::Boolean(*undeliverable_here),
                    opt_map(message_annotations),
                ],
            ),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (code, items) = open_composite(value)?;
        let state = match code {
            CODE_RECEIVED => {
                let f = Fields::new("received", items);
                DeliveryState::Received {
                    section_number: f.required(f.u32(0, "section-number"), "section-number")?,
                    section_offset: f.required(f.u64(1, "section-offset"), "section-offset")?,
                }
            }
            CODE_ACCEPTED => DeliveryState::Outcome(Outcome::Accepted),
            CODE_REJECTED => {
                let f = Fields::new("rejected", items);
                let error = match f.get(0) {
                    Some(v) => Some(ErrorInfo::from_value(v)?),
                    None => None,
                };
                DeliveryState::Outcome(Outcome::Rejected(error))
            }
            CODE_RELEASED => DeliveryState::Outcome(Outcome::Released),
            CODE_MODIFIED => {
                let f = Fields::new("modified", items);
                DeliveryState::Outcome(Outcome::Modified {
                    delivery_failed: f.bool(0, "delivery-failed")?.unwrap_or(false),
                    undeliverable_here: f.bool(1, "undeliverable-here")?.unwrap_or(false),
                    message_annotations: f.map(2, "message-annotations")?,
                })
            }
            other => return Err(CodecError::UnknownDescriptor(other)),
        };
        Ok(state)
    }
}

// ============================================================================
// Termini (descriptors 0x28 / 0x29)
// ============================================================================

/// Link source terminus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    pub address: Option<String>,
    pub durable: u32,
    pub expiry_policy: Option<Bytes>,
    pub timeout: u32,
    pub dynamic: bool,
    pub dynamic_node_properties: Option<Vec<(Value, Value)>>,
    pub distribution_mode: Option<Bytes>,
    pub filter: Option<Vec<(Value, Value)>>,
    pub default_outcome: Option<DeliveryState>,
    pub outcomes: Vec<Bytes>,
    pub capabilities: Vec<Bytes>,
}

impl Source {
    pub fn with_address(address: impl Into<String>) -> Self {
        Source {
            address: Some(address.into()),
            ..Source::default()
        }
    }

    pub fn to_value(&self) -> Value {
        composite(
            CODE_SOURCE,
            vec![
                opt(self.address.clone()),
                Value::Uint(self.durable),
                self.expiry_policy.clone().map_or(Value::Null, Value::Symbol),
                Value::Uint(self.timeout),
                Value::Boolean(self.dynamic),
                opt_map(&self.dynamic_node_properties),
                self.distribution_mode.clone().map_or(Value::Null, Value::Symbol),
                opt_map(&self.filter),
                self.default_outcome
                    .as_ref()
                    .map_or(Value::Null, DeliveryState::to_value),
                symbols_value(&self.outcomes),
                symbols_value(&self.capabilities),
            ],
        )
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (code, items) = open_composite(value)?;
        if code != CODE_SOURCE {
            return Err(CodecError::UnknownDescriptor(code));
        }
        let f = Fields::new("source", items);
        Ok(Source {
            address: f.string(0, "address")?,
            durable: f.u32(1, "durable")?.unwrap_or(0),
            expiry_policy: f.symbol(2, "expiry-policy")?,
            timeout: f.u32(3, "timeout")?.unwrap_or(0),
            dynamic: f.bool(4, "dynamic")?.unwrap_or(false),
            dynamic_node_properties: f.map(5, "dynamic-node-properties")?,
            distribution_mode: f.symbol(6, "distribution-mode")?,
            filter: f.map(7, "filter")?,
            default_outcome: match f.get(8) {
                Some(v) => Some(DeliveryState::from_value(v)?),
                None => None,
            },
            outcomes: f.symbols(9, "outcomes")?,
            capabilities: f.symbols(10, "capabilities")?,
        })
    }
}

/// Link target terminus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    pub address: Option<String>,
    pub durable: u32,
    pub expiry_policy: Option<Bytes>,
    pub timeout: u32,
    pub dynamic: bool,
    pub dynamic_node_properties: Option<Vec<(Value, Value)>>,
    pub capabilities: Vec<Bytes>,
}

impl Target {
    pub fn with_address(address: impl Into<String>) -> Self {
        Target {
            address: Some(address.into()),
            ..Target::default()
        }
    }

    pub fn to_value(&self) -> Value {
        composite(
            CODE_TARGET,
            vec![
                opt(self.address.clone()),
                Value::Uint(self.durable),
                self.expiry_policy.clone().map_or(Value::Null, Value::Symbol),
                Value::Uint(self.timeout),
                Value::Boolean(self.dynamic),
                opt_map(&self.dynamic_node_properties),
                symbols_value(&self.capabilities),
            ],
        )
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (code, items) = open_composite(value)?;
        if code != CODE_TARGET {
            return Err(CodecError::UnknownDescriptor(code));
        }
        let f = Fields::new("target", items);
        Ok(Target {
            address: f.string(0, "address")?,
            durable: f.u32(1, "durable")?.unwrap_or(0),
            expiry_policy: f.symbol(2, "expiry-policy")?,
            timeout: f.u32(3, "timeout")?.unwrap_or(0),
            dynamic: f.bool(4, "dynamic")?.unwrap_or(false),
            dynamic_node_properties: f.map(5, "dynamic-node-properties")?,
            capabilities: f.symbols(6, "capabilities")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_trims_trailing_nulls() {
        let v = composite(0x28, vec![Value::string("addr"), Value::Null, Value::Null]);
        match &v {
            Value::Described(_, payload) => match payload.as_ref() {
                Value::List(items) => assert_eq!(items.len(), 1),
                other => panic!("unexpected payload {other:?}"),
            },
            other => panic!("unexpected value {other:?}"),
        }
    }

    #[test]
    fn error_info_roundtrip() {
        let e = ErrorInfo::new("amqp:internal-error", "boom");
        let decoded = ErrorInfo::from_value(&e.to_value()).unwrap();
        assert_eq!(decoded, e);
    }

    #[test]
    fn error_info_requires_condition() {
        let v = composite(CODE_ERROR, vec![]);
        let err = ErrorInfo::from_value(&v).unwrap_err();
        assert_eq!(
            err,
            CodecError::MandatoryField {
                performative: "error",
                field: "condition"
            }
        );
    }

    #[test]
    fn delivery_state_roundtrips() {
        for state in [
            DeliveryState::ACCEPTED,
            DeliveryState::Outcome(Outcome::Released),
            DeliveryState::Outcome(Outcome::Rejected(Some(ErrorInfo::new(
                "amqp:not-allowed",
                "nope",
            )))),
            DeliveryState::Outcome(Outcome::Modified {
                delivery_failed: true,
                undeliverable_here: false,
                message_annotations: None,
            }),
            DeliveryState::Received {
                section_number: 1,
                section_offset: 42,
            },
        ] {
            let decoded = DeliveryState::from_value(&state.to_value()).unwrap();
            assert_eq!(decoded, state);
        }
    }

    #[test]
    fn source_defaults_apply_on_decode() {
        let wire = composite(CODE_SOURCE, vec![Value::string("q1")]);
        let s = Source::from_value(&wire).unwrap();
        assert_eq!(s.address.as_deref(), Some("q1"));
        assert_eq!(s.durable, 0);
        assert!(!s.dynamic);
        assert!(s.outcomes.is_empty());
    }

    #[test]
    fn target_roundtrip() {
        let t = Target {
            address: Some("sink".into()),
            capabilities: vec![Bytes::from_static(b"temporary-queue")],
            ..Target::default()
        };
        assert_eq!(Target::from_value(&t.to_value()).unwrap(), t);
    }
}
