//! Frame bodies: the nine AMQP performatives (OPEN..CLOSE, descriptor codes
//! 0x10..0x18) and the five SASL performatives (0x40..0x44).
//!
//! Each performative is a described list with a fixed field order. Encoding
//! trims trailing absent fields; decoding applies the per-field defaults
//! the protocol defines and rejects composites missing a mandatory field.

use bytes::Bytes;

use crate::definitions::{
    composite, open_composite, opt, opt_map, symbols_value, DeliveryState, ErrorInfo, Fields,
    ReceiverSettleMode, Role, SenderSettleMode, Source, Target,
};
use crate::error::CodecError;
use crate::value::Value;
use crate::Result;

pub const CODE_OPEN: u64 = 0x10;
pub const CODE_BEGIN: u64 = 0x11;
pub const CODE_ATTACH: u64 = 0x12;
pub const CODE_FLOW: u64 = 0x13;
pub const CODE_TRANSFER: u64 = 0x14;
pub const CODE_DISPOSITION: u64 = 0x15;
pub const CODE_DETACH: u64 = 0x16;
pub const CODE_END: u64 = 0x17;
pub const CODE_CLOSE: u64 = 0x18;
pub const CODE_SASL_MECHANISMS: u64 = 0x40;
pub const CODE_SASL_INIT: u64 = 0x41;
pub const CODE_SASL_CHALLENGE: u64 = 0x42;
pub const CODE_SASL_RESPONSE: u64 = 0x43;
pub const CODE_SASL_OUTCOME: u64 = 0x44;

/// Default max-frame-size advertised when OPEN omits the field.
pub const OPEN_MAX_FRAME_SIZE_DEFAULT: u32 = 4_294_967_295;
/// Default channel-max advertised when OPEN omits the field.
pub const OPEN_CHANNEL_MAX_DEFAULT: u16 = 65_535;
/// Default handle-max when BEGIN omits the field.
pub const BEGIN_HANDLE_MAX_DEFAULT: u32 = 4_294_967_295;

#[derive(Debug, Clone, PartialEq)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    /// Idle timeout in milliseconds.
    pub idle_timeout: Option<u32>,
    pub outgoing_locales: Vec<Bytes>,
    pub incoming_locales: Vec<Bytes>,
    pub offered_capabilities: Vec<Bytes>,
    pub desired_capabilities: Vec<Bytes>,
    pub properties: Option<Vec<(Value, Value)>>,
}

impl Open {
    pub fn new(container_id: impl Into<String>) -> Self {
        Open {
            container_id: container_id.into(),
            hostname: None,
            max_frame_size: OPEN_MAX_FRAME_SIZE_DEFAULT,
            channel_max: OPEN_CHANNEL_MAX_DEFAULT,
            idle_timeout: None,
            outgoing_locales: Vec::new(),
            incoming_locales: Vec::new(),
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Begin {
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: u32,
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: u32,
    pub offered_capabilities: Vec<Bytes>,
    pub desired_capabilities: Vec<Bytes>,
    pub properties: Option<Vec<(Value, Value)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
    pub source: Option<Source>,
    pub target: Option<Target>,
    pub unsettled: Option<Vec<(Value, Value)>>,
    pub incomplete_unsettled: bool,
    /// Mandatory when the sending endpoint attaches as sender.
    pub initial_delivery_count: Option<u32>,
    pub max_message_size: Option<u64>,
    pub offered_capabilities: Vec<Bytes>,
    pub desired_capabilities: Vec<Bytes>,
    pub properties: Option<Vec<(Value, Value)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Flow {
    pub next_incoming_id: Option<u32>,
    pub incoming_window: u32,
    pub next_outgoing_id: u32,
    pub outgoing_window: u32,
    pub handle: Option<u32>,
    pub delivery_count: Option<u32>,
    pub link_credit: Option<u32>,
    pub available: Option<u32>,
    pub drain: bool,
    pub echo: bool,
    pub properties: Option<Vec<(Value, Value)>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transfer {
    pub handle: u32,
    pub delivery_id: Option<u32>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: u32,
    pub settled: Option<bool>,
    pub more: bool,
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    pub state: Option<DeliveryState>,
    pub resume: bool,
    pub aborted: bool,
    pub batchable: bool,
}

impl Transfer {
    pub fn new(handle: u32) -> Self {
        Transfer {
            handle,
            delivery_id: None,
            delivery_tag: None,
            message_format: 0,
            settled: None,
            more: false,
            rcv_settle_mode: None,
            state: None,
            resume: false,
            aborted: false,
            batchable: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub last: Option<u32>,
    pub settled: bool,
    pub state: Option<DeliveryState>,
    pub batchable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct End {
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Close {
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaslMechanisms {
    pub mechanisms: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaslInit {
    pub mechanism: Bytes,
    pub initial_response: Option<Bytes>,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaslChallenge {
    pub challenge: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaslResponse {
    pub response: Bytes,
}

/// SASL outcome codes (0 = ok, 1 = auth failure, 2 = system error,
/// 3 = permanent system error, 4 = transient system error).
#[derive(Debug, Clone, PartialEq)]
pub struct SaslOutcome {
    pub code: u8,
    pub additional_data: Option<Bytes>,
}

impl SaslOutcome {
    pub fn is_ok(&self) -> bool {
        self.code == 0
    }
}

/// Closed union of all frame bodies.
#[derive(Debug, Clone, PartialEq)]
pub enum Performative {
    Open(Open),
    Begin(Begin),
    Attach(Box<Attach>),
    Flow(Flow),
    Transfer(Transfer),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Close(Close),
    SaslMechanisms(SaslMechanisms),
    SaslInit(SaslInit),
    SaslChallenge(SaslChallenge),
    SaslResponse(SaslResponse),
    SaslOutcome(SaslOutcome),
}

impl Performative {
    /// Wire name, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Performative::Open(_) => "open",
            Performative::Begin(_) => "begin",
            Performative::Attach(_) => "attach",
            Performative::Flow(_) => "flow",
            Performative::Transfer(_) => "transfer",
            Performative::Disposition(_) => "disposition",
            Performative::Detach(_) => "detach",
            Performative::End(_) => "end",
            Performative::Close(_) => "close",
            Performative::SaslMechanisms(_) => "sasl-mechanisms",
            Performative::SaslInit(_) => "sasl-init",
            Performative::SaslChallenge(_) => "sasl-challenge",
            Performative::SaslResponse(_) => "sasl-response",
            Performative::SaslOutcome(_) => "sasl-outcome",
        }
    }

    /// True for the SASL family, which travels in SASL-typed frames.
    pub fn is_sasl(&self) -> bool {
        matches!(
            self,
            Performative::SaslMechanisms(_)
                | Performative::SaslInit(_)
                | Performative::SaslChallenge(_)
                | Performative::SaslResponse(_)
                | Performative::SaslOutcome(_)
        )
    }

    pub fn to_value(&self) -> Value {
        match self {
            Performative::Open(p) => composite(
                CODE_OPEN,
                vec![
                    Value::string(p.container_id.clone()),
                    opt(p.hostname.clone()),
                    Value::Uint(p.max_frame_size),
                    Value::Ushort(p.channel_max),
                    p.idle_timeout.map_or(Value::Null, Value::Uint),
                    symbols_value(&p.outgoing_locales),
                    symbols_value(&p.incoming_locales),
                    symbols_value(&p.offered_capabilities),
                    symbols_value(&p.desired_capabilities),
                    opt_map(&p.properties),
                ],
            ),
            Performative::Begin(p) => composite(
                CODE_BEGIN,
                vec![
                    p.remote_channel.map_or(Value::Null, Value::Ushort),
                    Value::Uint(p.next_outgoing_id),
                    Value::Uint(p.incoming_window),
                    Value::Uint(p.outgoing_window),
                    Value::Uint(p.handle_max),
                    symbols_value(&p.offered_capabilities),
                    symbols_value(&p.desired_capabilities),
                    opt_map(&p.properties),
                ],
            ),
            Performative::Attach(p) => composite(
                CODE_ATTACH,
                vec![
                    Value::string(p.name.clone()),
                    Value::Uint(p.handle),
                    p.role.to_value(),
                    p.snd_settle_mode.to_value(),
                    p.rcv_settle_mode.to_value(),
                    p.source.as_ref().map_or(Value::Null, Source::to_value),
                    p.target.as_ref().map_or(Value::Null, Target::to_value),
                    opt_map(&p.unsettled),
                    Value::Boolean(p.incomplete_unsettled),
                    p.initial_delivery_count.map_or(Value::Null, Value::Uint),
                    p.max_message_size.map_or(Value::Null, Value::Ulong),
                    symbols_value(&p.offered_capabilities),
                    symbols_value(&p.desired_capabilities),
                    opt_map(&p.properties),
                ],
            ),
            Performative::Flow(p) => composite(
                CODE_FLOW,
                vec![
                    p.next_incoming_id.map_or(Value::Null, Value::Uint),
                    Value::Uint(p.incoming_window),
                    Value::Uint(p.next_outgoing_id),
                    Value::Uint(p.outgoing_window),
                    p.handle.map_or(Value::Null, Value::Uint),
                    p.delivery_count.map_or(Value::Null, Value::Uint),
                    p.link_credit.map_or(Value::Null, Value::Uint),
                    p.available.map_or(Value::Null, Value::Uint),
                    Value::Boolean(p.drain),
                    Value::Boolean(p.echo),
                    opt_map(&p.properties),
                ],
            ),
            Performative::Transfer(p) => composite(
                CODE_TRANSFER,
                vec![
                    Value::Uint(p.handle),
                    p.delivery_id.map_or(Value::Null, Value::Uint),
                    p.delivery_tag.clone().map_or(Value::Null, Value::Binary),
                    Value::Uint(p.message_format),
                    p.settled.map_or(Value::Null, Value::Boolean),
                    Value::Boolean(p.more),
                    p.rcv_settle_mode
                        .map_or(Value::Null, ReceiverSettleMode::to_value),
                    p.state.as_ref().map_or(Value::Null, DeliveryState::to_value),
                    Value::Boolean(p.resume),
                    Value::Boolean(p.aborted),
                    Value::Boolean(p.batchable),
                ],
            ),
            Performative::Disposition(p) => composite(
                CODE_DISPOSITION,
                vec![
                    p.role.to_value(),
                    Value::Uint(p.first),
                    p.last.map_or(Value::Null, Value::Uint),
                    Value::Boolean(p.settled),
                    p.state.as_ref().map_or(Value::Null, DeliveryState::to_value),
                    Value::Boolean(p.batchable),
                ],
            ),
            Performative::Detach(p) => composite(
                CODE_DETACH,
                vec![
                    Value::Uint(p.handle),
                    Value::Boolean(p.closed),
                    p.error.as_ref().map_or(Value::Null, ErrorInfo::to_value),
                ],
            ),
            Performative::End(p) => composite(
                CODE_END,
                vec![p.error.as_ref().map_or(Value::Null, ErrorInfo::to_value)],
            ),
            Performative::Close(p) => composite(
                CODE_CLOSE,
                vec![p.error.as_ref().map_or(Value::Null, ErrorInfo::to_value)],
            ),
            Performative::SaslMechanisms(p) => {
                composite(CODE_SASL_MECHANISMS, vec![symbols_value(&p.mechanisms)])
            }
            Performative::SaslInit(p) => composite(
                CODE_SASL_INIT,
                vec![
                    Value::Symbol(p.mechanism.clone()),
                    p.initial_response.clone().map_or(Value::Null, Value::Binary),
                    opt(p.hostname.clone()),
                ],
            ),
            Performative::SaslChallenge(p) => composite(
                CODE_SASL_CHALLENGE,
                vec![Value::Binary(p.challenge.clone())],
            ),
            Performative::SaslResponse(p) => {
                composite(CODE_SASL_RESPONSE, vec![Value::Binary(p.response.clone())])
            }
            Performative::SaslOutcome(p) => composite(
                CODE_SASL_OUTCOME,
                vec![
                    Value::Ubyte(p.code),
                    p.additional_data.clone().map_or(Value::Null, Value::Binary),
                ],
            ),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let (code, items) = open_composite(value)?;
        let body = match code {
            CODE_OPEN => {
                let f = Fields::new("open", items);
                Performative::Open(Open {
                    container_id: f.required(f.string(0, "container-id"), "container-id")?,
                    hostname: f.string(1, "hostname")?,
                    max_frame_size: f
                        .u32(2, "max-frame-size")?
                        .unwrap_or(OPEN_MAX_FRAME_SIZE_DEFAULT),
                    channel_max: f.ushort(3, "channel-max")?.unwrap_or(OPEN_CHANNEL_MAX_DEFAULT),
                    idle_timeout: f.u32(4, "idle-time-out")?,
                    outgoing_locales: f.symbols(5, "outgoing-locales")?,
                    incoming_locales: f.symbols(6, "incoming-locales")?,
                    offered_capabilities: f.symbols(7, "offered-capabilities")?,
                    desired_capabilities: f.symbols(8, "desired-capabilities")?,
                    properties: f.map(9, "properties")?,
                })
            }
            CODE_BEGIN => {
                let f = Fields::new("begin", items);
                Performative::Begin(Begin {
                    remote_channel: f.ushort(0, "remote-channel")?,
                    next_outgoing_id: f
                        .required(f.u32(1, "next-outgoing-id"), "next-outgoing-id")?,
                    incoming_window: f.required(f.u32(2, "incoming-window"), "incoming-window")?,
                    outgoing_window: f.required(f.u32(3, "outgoing-window"), "outgoing-window")?,
                    handle_max: f.u32(4, "handle-max")?.unwrap_or(BEGIN_HANDLE_MAX_DEFAULT),
                    offered_capabilities: f.symbols(5, "offered-capabilities")?,
                    desired_capabilities: f.symbols(6, "desired-capabilities")?,
                    properties: f.map(7, "properties")?,
                })
            }
            CODE_ATTACH => {
                let f = Fields::new("attach", items);
                Performative::Attach(Box::new(Attach {
                    name: f.required(f.string(0, "name"), "name")?,
                    handle: f.required(f.u32(1, "handle"), "handle")?,
                    role: Role::from_bool(f.required(f.bool(2, "role"), "role")?),
                    snd_settle_mode: match f.ubyte(3, "snd-settle-mode")? {
                        Some(v) => SenderSettleMode::from_u8(v)?,
                        None => SenderSettleMode::default(),
                    },
                    rcv_settle_mode: match f.ubyte(4, "rcv-settle-mode")? {
                        Some(v) => ReceiverSettleMode::from_u8(v)?,
                        None => ReceiverSettleMode::default(),
                    },
                    source: match f.get(5) {
                        Some(v) => Some(Source::from_value(v)?),
                        None => None,
                    },
                    target: match f.get(6) {
                        Some(v) => Some(Target::from_value(v)?),
                        None => None,
                    },
                    unsettled: f.map(7, "unsettled")?,
                    incomplete_unsettled: f.bool(8, "incomplete-unsettled")?.unwrap_or(false),
                    initial_delivery_count: f.u32(9, "initial-delivery-count")?,
                    max_message_size: f.u64(10, "max-message-size")?,
                    offered_capabilities: f.symbols(11, "offered-capabilities")?,
                    desired_capabilities: f.symbols(12, "desired-capabilities")?,
                    properties: f.map(13, "properties")?,
                }))
            }
            CODE_FLOW => {
                let f = Fields::new("flow", items);
                Performative::Flow(Flow {
                    next_incoming_id: f.u32(0, "next-incoming-id")?,
                    incoming_window: f.required(f.u32(1, "incoming-window"), "incoming-window")?,
                    next_outgoing_id: f
                        .required(f.u32(2, "next-outgoing-id"), "next-outgoing-id")?,
                    outgoing_window: f.required(f.u32(3, "outgoing-window"), "outgoing-window")?,
                    handle: f.u32(4, "handle")?,
                    delivery_count: f.u32(5, "delivery-count")?,
                    link_credit: f.u32(6, "link-credit")?,
                    available: f.u32(7, "available")?,
                    drain: f.bool(8, "drain")?.unwrap_or(false),
                    echo: f.bool(9, "echo")?.unwrap_or(false),
                    properties: f.map(10, "properties")?,
                })
            }
            CODE_TRANSFER => {
                let f = Fields::new("transfer", items);
                Performative::Transfer(Transfer {
                    handle: f.required(f.u32(0, "handle"), "handle")?,
                    delivery_id: f.u32(1, "delivery-id")?,
                    delivery_tag: f.binary(2, "delivery-tag")?,
                    message_format: f.u32(3, "message-format")?.unwrap_or(0),
                    settled: f.bool(4, "settled")?,
                    more: f.bool(5, "more")?.unwrap_or(false),
                    rcv_settle_mode: match f.ubyte(6, "rcv-settle-mode")? {
                        Some(v) => Some(ReceiverSettleMode::from_u8(v)?),
                        None => None,
                    },
                    state: match f.get(7) {
                        Some(v) => Some(DeliveryState::from_value(v)?),
                        None => None,
                    },
                    resume: f.bool(8, "resume")?.unwrap_or(false),
                    aborted: f.bool(9, "aborted")?.unwrap_or(false),
                    batchable: f.bool(10, "batchable")?.unwrap_or(false),
                })
            }
            CODE_DISPOSITION => {
                let f = Fields::new("disposition", items);
                Performative::Disposition(Disposition {
                    role: Role::from_bool(f.required(f.bool(0, "role"), "role")?),
                    first: f.required(f.u32(1, "first"), "first")?,
                    last: f.u32(2, "last")?,
                    settled: f.bool(3, "settled")?.unwrap_or(false),
                    state: match f.get(4) {
                        Some(v) => Some(DeliveryState::from_value(v)?),
                        None => None,
                    },
                    batchable: f.bool(5, "batchable")?.unwrap_or(false),
                })
            }
            CODE_DETACH => {
                let f = Fields::new("detach", items);
                Performative::Detach(Detach {
                    handle: f.required(f.u32(0, "handle"), "handle")?,
                    closed: f.bool(1, "closed")?.unwrap_or(false),
                    error: match f.get(2) {
                        Some(v) => Some(ErrorInfo::from_value(v)?),
                        None => None,
                    },
                })
            }
            CODE_END => {
                let f = Fields::new("end", items);
                Performative::End(End {
                    error: match f.get(0) {
                        Some(v) => Some(ErrorInfo::from_value(v)?),
                        None => None,
                    },
                })
            }
            CODE_CLOSE => {
                let f = Fields::new("close", items);
                Performative::Close(Close {
                    error: match f.get(0) {
                        Some(v) => Some(ErrorInfo::from_value(v)?),
                        None => None,
                    },
                })
            }
            CODE_SASL_MECHANISMS => {
                let f = Fields::new("sasl-mechanisms", items);
                let mechanisms = f.symbols(0, "sasl-server-mechanisms")?;
                if mechanisms.is_empty() {
                    return Err(CodecError::MandatoryField {
                        performative: "sasl-mechanisms",
                        field: "sasl-server-mechanisms",
                    });
                }
                Performative::SaslMechanisms(SaslMechanisms { mechanisms })
            }
            CODE_SASL_INIT => {
                let f = Fields::new("sasl-init", items);
                Performative::SaslInit(SaslInit {
                    mechanism: f.required(f.symbol(0, "mechanism"), "mechanism")?,
                    initial_response: f.binary(1, "initial-response")?,
                    hostname: f.string(2, "hostname")?,
                })
            }
            CODE_SASL_CHALLENGE => {
                let f = Fields::new("sasl-challenge", items);
                Performative::SaslChallenge(SaslChallenge {
                    challenge: f.required(f.binary(0, "challenge"), "challenge")?,
                })
            }
            CODE_SASL_RESPONSE => {
                let f = Fields::new("sasl-response", items);
                Performative::SaslResponse(SaslResponse {
                    response: f.required(f.binary(0, "response"), "response")?,
                })
            }
            CODE_SASL_OUTCOME => {
                let f = Fields::new("sasl-outcome", items);
                Performative::SaslOutcome(SaslOutcome {
                    code: f.required(f.ubyte(0, "code"), "code")?,
                    additional_data: f.binary(1, "additional-data")?,
                })
            }
            other => return Err(CodecError::UnknownDescriptor(other)),
        };
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode_value;
    use crate::encode::encode_value;
    use bytes::BytesMut;

    fn roundtrip(p: Performative) {
        let mut buf = BytesMut::new();
        encode_value(&p.to_value(), &mut buf).unwrap();
        let (value, used) = decode_value(&buf).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(Performative::from_value(&value).unwrap(), p);
    }

    #[test]
    fn open_roundtrip_with_fields() {
        let mut open = Open::new("client-1");
        open.hostname = Some("broker.example.com".into());
        open.max_frame_size = 65_536;
        open.channel_max = 31;
        open.idle_timeout = Some(30_000);
        roundtrip(Performative::Open(open));
    }

    #[test]
    fn open_defaults_apply_when_fields_absent() {
        let wire = composite(CODE_OPEN, vec![Value::string("c")]);
        let decoded = Performative::from_value(&wire).unwrap();
        match decoded {
            Performative::Open(o) => {
                assert_eq!(o.max_frame_size, OPEN_MAX_FRAME_SIZE_DEFAULT);
                assert_eq!(o.channel_max, OPEN_CHANNEL_MAX_DEFAULT);
                assert_eq!(o.idle_timeout, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn open_requires_container_id() {
        let wire = composite(CODE_OPEN, vec![]);
        let err = Performative::from_value(&wire).unwrap_err();
        assert_eq!(
            err,
            CodecError::MandatoryField {
                performative: "open",
                field: "container-id"
            }
        );
    }

    #[test]
    fn begin_requires_windows() {
        let wire = composite(CODE_BEGIN, vec![Value::Null, Value::Uint(0)]);
        let err = Performative::from_value(&wire).unwrap_err();
        assert_eq!(
            err,
            CodecError::MandatoryField {
                performative: "begin",
                field: "incoming-window"
            }
        );
    }

    #[test]
    fn attach_roundtrip() {
        roundtrip(Performative::Attach(Box::new(Attach {
            name: "sender-0".into(),
            handle: 0,
            role: Role::Sender,
            snd_settle_mode: SenderSettleMode::Unsettled,
            rcv_settle_mode: ReceiverSettleMode::First,
            source: Some(Source::with_address("local")),
            target: Some(Target::with_address("queue-a")),
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count: Some(0),
            max_message_size: Some(1_048_576),
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: None,
        })));
    }

    #[test]
    fn transfer_defaults() {
        let wire = composite(CODE_TRANSFER, vec![Value::Uint(3)]);
        match Performative::from_value(&wire).unwrap() {
            Performative::Transfer(t) => {
                assert_eq!(t.handle, 3);
                assert_eq!(t.message_format, 0);
                assert!(!t.more);
                assert_eq!(t.settled, None);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn flow_roundtrip() {
        roundtrip(Performative::Flow(Flow {
            next_incoming_id: Some(1),
            incoming_window: 100,
            next_outgoing_id: 1,
            outgoing_window: 100,
            handle: Some(0),
            delivery_count: Some(0),
            link_credit: Some(300),
            available: None,
            drain: false,
            echo: false,
            properties: None,
        }));
    }

    #[test]
    fn disposition_roundtrip() {
        roundtrip(Performative::Disposition(Disposition {
            role: Role::Receiver,
            first: 0,
            last: Some(4),
            settled: true,
            state: Some(DeliveryState::ACCEPTED),
            batchable: false,
        }));
    }

    #[test]
    fn close_with_error_roundtrip() {
        roundtrip(Performative::Close(Close {
            error: Some(ErrorInfo::new(
                "amqp:connection:forced",
                "administrative shutdown",
            )),
        }));
    }

    #[test]
    fn sasl_family_roundtrip() {
        roundtrip(Performative::SaslMechanisms(SaslMechanisms {
            mechanisms: vec![Bytes::from_static(b"PLAIN"), Bytes::from_static(b"ANONYMOUS")],
        }));
        roundtrip(Performative::SaslInit(SaslInit {
            mechanism: Bytes::from_static(b"PLAIN"),
            initial_response: Some(Bytes::from_static(b"\0user\0pass")),
            hostname: Some("broker".into()),
        }));
        roundtrip(Performative::SaslOutcome(SaslOutcome {
            code: 0,
            additional_data: None,
        }));
    }

    #[test]
    fn unknown_descriptor_rejected() {
        let wire = composite(0x99, vec![]);
        assert_eq!(
            Performative::from_value(&wire).unwrap_err(),
            CodecError::UnknownDescriptor(0x99)
        );
    }
}
