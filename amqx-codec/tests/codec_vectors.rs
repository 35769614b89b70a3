//! Byte-exact wire vectors and cross-cutting codec laws.

use bytes::{Bytes, BytesMut};

use amqx_codec::decode::decode_value;
use amqx_codec::encode::{encode, encode_value};
use amqx_codec::frame::{
    encode_frame, FrameDecoder, FrameEvent, AMQP_PROTOCOL_HEADER,
};
use amqx_codec::message::{decode_payload, encode_payload, Message};
use amqx_codec::performative::{Begin, Open, Performative, Transfer};
use amqx_codec::value::Value;

fn enc(value: &Value) -> Vec<u8> {
    let mut buf = BytesMut::new();
    encode_value(value, &mut buf).unwrap();
    buf.to_vec()
}

// ============================================================================
// Smallest-width law
// ============================================================================

#[test]
fn uint_width_vectors() {
    assert_eq!(enc(&Value::Uint(0)), b"\x43");
    assert_eq!(enc(&Value::Uint(66)), b"\x52\x42");
    assert_eq!(enc(&Value::Uint(255)), b"\x52\xff");
    assert_eq!(enc(&Value::Uint(256)), b"\x70\x00\x00\x01\x00");
    assert_eq!(enc(&Value::Uint(4_294_967_295)), b"\x70\xff\xff\xff\xff");
}

#[test]
fn uint_wide_when_smallest_disabled() {
    for v in [1u32, 66, 255] {
        let mut buf = BytesMut::new();
        encode(&Value::Uint(v), &mut buf, true, false).unwrap();
        assert_eq!(buf[0], 0x70);
        assert_eq!(buf.len(), 5);
    }
}

#[test]
fn string_width_boundary() {
    let s255 = Value::string("a".repeat(255));
    let e = enc(&s255);
    assert_eq!(e[0], 0xa1);
    assert_eq!(e.len(), 2 + 255);

    let s256 = Value::string("a".repeat(256));
    let e = enc(&s256);
    assert_eq!(e[0], 0xb1);
    assert_eq!(&e[1..5], &[0, 0, 1, 0]);
    assert_eq!(e.len(), 5 + 256);
}

#[test]
fn list_width_tracks_encoded_size() {
    assert_eq!(enc(&Value::List(vec![])), b"\x45");

    // Null encodes to one byte, so 254 elements keep the one-byte size
    // field (254 body + 1 count octet = 255) while 255 overflow it.
    let e = enc(&Value::List(vec![Value::Null; 254]));
    assert_eq!(e[0], 0xc0);
    assert_eq!(e[1], 0xff);
    assert_eq!(e[2], 0xfe);

    let e = enc(&Value::List(vec![Value::Null; 255]));
    assert_eq!(e[0], 0xd0);
    assert_eq!(&e[1..5], &[0, 0, 1, 3]); // 255 body + 4-byte count field
    assert_eq!(&e[5..9], &[0, 0, 0, 255]);
}

// ============================================================================
// Round-trip law
// ============================================================================

#[test]
fn representative_values_roundtrip() {
    let values = [
        Value::Null,
        Value::Boolean(false),
        Value::Ubyte(0xff),
        Value::Short(-2),
        Value::Uint(66),
        Value::Ulong(1 << 50),
        Value::Int(-70_000),
        Value::Long(i64::MIN),
        Value::Double(1e300),
        Value::Timestamp(0),
        Value::Binary(Bytes::from(vec![7u8; 300])),
        Value::string("héllo"),
        Value::symbol("amqp:link:redirect"),
        Value::List(vec![Value::Uint(1), Value::List(vec![Value::Null])]),
        Value::Map(vec![(Value::symbol("k"), Value::Uint(1))]),
        Value::Array(vec![Value::Long(-1), Value::Long(500)]),
        Value::Described(Box::new(Value::Ulong(0x10)), Box::new(Value::List(vec![]))),
    ];
    for v in values {
        let bytes = enc(&v);
        let (decoded, used) = decode_value(&bytes).unwrap();
        assert_eq!(used, bytes.len(), "{v:?}");
        assert_eq!(decoded, v);
    }
}

// ============================================================================
// Message payload vectors
// ============================================================================

#[test]
fn bare_data_message_exact_bytes() {
    let m = Message::from_data(Bytes::from_static(b"Abc 123 !@#"));
    let mut buf = BytesMut::new();
    encode_payload(&m, &mut buf).unwrap();
    assert_eq!(buf.as_ref(), b"\x00\x53\x75\xa0\x0bAbc 123 !@#");
    assert_eq!(decode_payload(&buf).unwrap(), m);
}

// ============================================================================
// Incremental frame decoding
// ============================================================================

#[test]
fn trickled_handshake_equals_bulk() {
    let mut wire = BytesMut::new();
    wire.extend_from_slice(&AMQP_PROTOCOL_HEADER);
    encode_frame(0, &Performative::Open(Open::new("vector-client")), None, &mut wire).unwrap();
    encode_frame(
        0,
        &Performative::Begin(Begin {
            remote_channel: None,
            next_outgoing_id: 0,
            incoming_window: 100,
            outgoing_window: 100,
            handle_max: 255,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: None,
        }),
        None,
        &mut wire,
    )
    .unwrap();
    let mut transfer = Transfer::new(0);
    transfer.delivery_id = Some(0);
    transfer.delivery_tag = Some(Bytes::from_static(b"\x00\x00"));
    transfer.settled = Some(false);
    encode_frame(0, &Performative::Transfer(transfer), Some(b"\x00\x53\x77\x43"), &mut wire)
        .unwrap();

    let mut bulk = FrameDecoder::new();
    bulk.feed(&wire);
    let mut expected = Vec::new();
    while let Some(ev) = bulk.poll().unwrap() {
        expected.push(ev);
    }
    assert_eq!(expected.len(), 4);

    for chunk_size in [1usize, 3, 7, 64] {
        let mut dec = FrameDecoder::new();
        let mut got = Vec::new();
        for chunk in wire.chunks(chunk_size) {
            dec.feed(chunk);
            while let Some(ev) = dec.poll().unwrap() {
                got.push(ev);
            }
        }
        assert_eq!(got, expected, "chunk size {chunk_size}");
    }
}

#[test]
fn transfer_payload_survives_framing() {
    let body = Message::from_data(Bytes::from_static(b"Abc 123 !@#"));
    let mut payload = BytesMut::new();
    encode_payload(&body, &mut payload).unwrap();

    let mut transfer = Transfer::new(1);
    transfer.delivery_id = Some(9);
    transfer.delivery_tag = Some(Bytes::from_static(b"\x09"));
    let mut wire = BytesMut::new();
    wire.extend_from_slice(&AMQP_PROTOCOL_HEADER);
    encode_frame(2, &Performative::Transfer(transfer), Some(&payload), &mut wire).unwrap();

    let mut dec = FrameDecoder::new();
    dec.feed(&wire);
    dec.poll().unwrap();
    match dec.poll().unwrap() {
        Some(FrameEvent::Frame { channel, payload, .. }) => {
            assert_eq!(channel, 2);
            assert_eq!(decode_payload(&payload).unwrap(), body);
        }
        other => panic!("unexpected {other:?}"),
    }
}
