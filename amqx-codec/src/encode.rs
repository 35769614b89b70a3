//! Smallest-width value encoder.
//!
//! Writes into a caller-provided `BytesMut` (buffer injection). Width
//! selection reproduces the reference behavior bit-for-bit: with
//! `use_smallest` set, unsigned values of 0 use the zero-width constructor,
//! values ≤ 255 the one-byte form, and compound types the 8-bit form only
//! when both the element count fits a byte and the encoded body (including
//! the count field) stays under 255 bytes.

use bytes::{BufMut, BytesMut};

use crate::error::CodecError;
use crate::value::*;
use crate::Result;

/// Encode a value with its constructor, choosing the smallest valid width.
pub fn encode_value(value: &Value, buf: &mut BytesMut) -> Result<()> {
    encode(value, buf, true, true)
}

/// Encode a value with explicit constructor/width control.
///
/// `with_constructor = false` omits the leading constructor byte (array
/// elements after the first); `use_smallest = false` forces the widest
/// encoding of each sub-type, which keeps array elements uniform.
pub fn encode(value: &Value, buf: &mut BytesMut, with_constructor: bool, use_smallest: bool) -> Result<()> {
    match value {
        Value::Null => {
            buf.put_u8(CTOR_NULL);
        }
        Value::Boolean(v) => {
            if with_constructor {
                buf.put_u8(CTOR_BOOL);
                buf.put_u8(u8::from(*v));
            } else if *v {
                buf.put_u8(CTOR_BOOL_TRUE);
            } else {
                buf.put_u8(CTOR_BOOL_FALSE);
            }
        }
        Value::Ubyte(v) => {
            ctor(buf, CTOR_UBYTE, with_constructor);
            buf.put_u8(*v);
        }
        Value::Ushort(v) => {
            ctor(buf, CTOR_USHORT, with_constructor);
            buf.put_u16(*v);
        }
        Value::Uint(v) => {
            if use_smallest && *v == 0 {
                buf.put_u8(CTOR_UINT_0);
            } else if use_smallest && *v <= 255 {
                ctor(buf, CTOR_UINT_SMALL, with_constructor);
                buf.put_u8(*v as u8);
            } else {
                ctor(buf, CTOR_UINT, with_constructor);
                buf.put_u32(*v);
            }
        }
        Value::Ulong(v) => {
            if use_smallest && *v == 0 {
                buf.put_u8(CTOR_ULONG_0);
            } else if use_smallest && *v <= 255 {
                ctor(buf, CTOR_ULONG_SMALL, with_constructor);
                buf.put_u8(*v as u8);
            } else {
                ctor(buf, CTOR_ULONG, with_constructor);
                buf.put_u64(*v);
            }
        }
        Value::Byte(v) => {
            ctor(buf, CTOR_BYTE, with_constructor);
            buf.put_i8(*v);
        }
        Value::Short(v) => {
            ctor(buf, CTOR_SHORT, with_constructor);
            buf.put_i16(*v);
        }
        Value::Int(v) => {
            if use_smallest && (-128..=127).contains(v) {
                ctor(buf, CTOR_INT_SMALL, with_constructor);
                buf.put_i8(*v as i8);
            } else {
                ctor(buf, CTOR_INT, with_constructor);
                buf.put_i32(*v);
            }
        }
        Value::Long(v) => {
            if use_smallest && (-128..=127).contains(v) {
                ctor(buf, CTOR_LONG_SMALL, with_constructor);
                buf.put_i8(*v as i8);
            } else {
                ctor(buf, CTOR_LONG, with_constructor);
                buf.put_i64(*v);
            }
        }
        Value::Float(v) => {
            ctor(buf, CTOR_FLOAT, with_constructor);
            buf.put_f32(*v);
        }
        Value::Double(v) => {
            ctor(buf, CTOR_DOUBLE, with_constructor);
            buf.put_f64(*v);
        }
        Value::Timestamp(v) => {
            ctor(buf, CTOR_TIMESTAMP, with_constructor);
            buf.put_i64(*v);
        }
        Value::Uuid(v) => {
            ctor(buf, CTOR_UUID, with_constructor);
            buf.put_slice(v.as_bytes());
        }
        Value::Binary(v) => {
            encode_variable(buf, v, CTOR_BINARY_SMALL, CTOR_BINARY, with_constructor, use_smallest, "binary")?;
        }
        Value::String(v) => {
            encode_variable(buf, v.as_bytes(), CTOR_STRING_SMALL, CTOR_STRING, with_constructor, use_smallest, "string")?;
        }
        Value::Symbol(v) => {
            encode_variable(buf, v, CTOR_SYMBOL_SMALL, CTOR_SYMBOL, with_constructor, use_smallest, "symbol")?;
        }
        Value::List(items) => {
            if use_smallest && items.is_empty() {
                buf.put_u8(CTOR_LIST_0);
                return Ok(());
            }
            let mut body = BytesMut::new();
            for item in items {
                encode(item, &mut body, true, true)?;
            }
            encode_compound(buf, &body, items.len(), CTOR_LIST_SMALL, CTOR_LIST, with_constructor, use_smallest, "list")?;
        }
        Value::Map(entries) => {
            let mut body = BytesMut::new();
            for (k, v) in entries {
                encode(k, &mut body, true, true)?;
                encode(v, &mut body, true, true)?;
            }
            let count = entries
                .len()
                .checked_mul(2)
                .ok_or(CodecError::EncodeOverflow("map"))?;
            encode_compound(buf, &body, count, CTOR_MAP_SMALL, CTOR_MAP, with_constructor, use_smallest, "map")?;
        }
        Value::Array(items) => {
            let mut body = BytesMut::new();
            let mut first = true;
            for item in items {
                if !first && core::mem::discriminant(item) != core::mem::discriminant(&items[0]) {
                    return Err(CodecError::EncodeOverflow("heterogeneous array"));
                }
                match item {
                    Value::Described(descriptor, payload) => {
                        // Described arrays carry the 0x00 marker, descriptor
                        // and payload constructor once; elements contribute
                        // only their payload bodies.
                        if first {
                            body.put_u8(CTOR_DESCRIBED);
                            encode(descriptor, &mut body, true, true)?;
                        }
                        encode(payload, &mut body, first, false)?;
                    }
                    // One shared constructor, widest encoding per element.
                    _ => encode(item, &mut body, first, false)?,
                }
                first = false;
            }
            encode_compound(buf, &body, items.len(), CTOR_ARRAY_SMALL, CTOR_ARRAY, with_constructor, use_smallest, "array")?;
        }
        Value::Described(descriptor, payload) => {
            buf.put_u8(CTOR_DESCRIBED);
            encode(descriptor, buf, true, true)?;
            encode(payload, buf, true, true)?;
        }
    }
    Ok(())
}

fn ctor(buf: &mut BytesMut, byte: u8, with_constructor: bool) {
    if with_constructor {
        buf.put_u8(byte);
    }
}

fn encode_variable(
    buf: &mut BytesMut,
    data: &[u8],
    small: u8,
    large: u8,
    with_constructor: bool,
    use_smallest: bool,
    what: &'static str,
) -> Result<()> {
    let len = data.len();
    if use_smallest && len <= 255 {
        ctor(buf, small, with_constructor);
        buf.put_u8(len as u8);
    } else {
        let len32 = u32::try_from(len).map_err(|_| CodecError::EncodeOverflow(what))?;
        ctor(buf, large, with_constructor);
        buf.put_u32(len32);
    }
    buf.put_slice(data);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn encode_compound(
    buf: &mut BytesMut,
    body: &[u8],
    count: usize,
    small: u8,
    large: u8,
    with_constructor: bool,
    use_smallest: bool,
    what: &'static str,
) -> Result<()> {
    // The one-byte form holds size and count each in a single octet; the
    // size field covers the count octet plus the body, so the body itself
    // must stay strictly under 255 bytes.
    if use_smallest && count <= 255 && body.len() < 255 {
        ctor(buf, small, with_constructor);
        buf.put_u8((body.len() + 1) as u8);
        buf.put_u8(count as u8);
    } else {
        let size = u32::try_from(body.len())
            .ok()
            .and_then(|s| s.checked_add(4))
            .ok_or(CodecError::EncodeOverflow(what))?;
        let count32 = u32::try_from(count).map_err(|_| CodecError::EncodeOverflow(what))?;
        ctor(buf, large, with_constructor);
        buf.put_u32(size);
        buf.put_u32(count32);
    }
    buf.put_slice(body);
    Ok(())
}
