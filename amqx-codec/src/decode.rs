//! Incremental value decoder.
//!
//! Decoding never panics on short input: a buffer ending mid-value yields
//! [`CodecError::Incomplete`] with the number of further bytes required, so
//! stream readers can retry after buffering. Structural violations (bad
//! constructors, counts that disagree with sizes, invalid UTF-8 strings)
//! are [`CodecError::Malformed`] and are fatal.

use bytes::Bytes;
use uuid::Uuid;

use crate::error::CodecError;
use crate::value::*;
use crate::Result;

/// Decode a single value from the front of `input`.
///
/// Returns the value and the number of bytes consumed. `input` is not
/// modified; the caller advances its own buffer by the returned count.
pub fn decode_value(input: &[u8]) -> Result<(Value, usize)> {
    let mut cur = Cursor::new(input);
    let value = cur.read_value()?;
    Ok((value, cur.pos))
}

/// Byte cursor over borrowed input. All reads are bounds-checked and report
/// the exact shortfall on truncation.
pub(crate) struct Cursor<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(input: &'a [u8]) -> Self {
        Cursor { input, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.input.len() - self.pos
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Incomplete {
                needed: n - self.remaining(),
            });
        }
        let out = &self.input[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn take_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub(crate) fn take_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn take_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_be_bytes(raw))
    }

    /// Read a complete value, constructor included.
    pub(crate) fn read_value(&mut self) -> Result<Value> {
        let ctor = self.take_u8()?;
        self.read_body(ctor)
    }

    /// Read a value body for a constructor already consumed (array elements
    /// share one constructor for the whole sequence).
    fn read_body(&mut self, ctor: u8) -> Result<Value> {
        let value = match ctor {
            CTOR_NULL => Value::Null,
            CTOR_BOOL_TRUE => Value::Boolean(true),
            CTOR_BOOL_FALSE => Value::Boolean(false),
            CTOR_BOOL => match self.take_u8()? {
                0 => Value::Boolean(false),
                1 => Value::Boolean(true),
                _ => return Err(CodecError::Malformed("boolean octet out of range")),
            },
            CTOR_UBYTE => Value::Ubyte(self.take_u8()?),
            CTOR_USHORT => Value::Ushort(self.take_u16()?),
            CTOR_UINT_0 => Value::Uint(0),
            CTOR_UINT_SMALL => Value::Uint(u32::from(self.take_u8()?)),
            CTOR_UINT => Value::Uint(self.take_u32()?),
            CTOR_ULONG_0 => Value::Ulong(0),
            CTOR_ULONG_SMALL => Value::Ulong(u64::from(self.take_u8()?)),
            CTOR_ULONG => Value::Ulong(self.take_u64()?),
            CTOR_BYTE => Value::Byte(self.take_u8()? as i8),
            CTOR_SHORT => Value::Short(self.take_u16()? as i16),
            CTOR_INT_SMALL => Value::Int(i32::from(self.take_u8()? as i8)),
            CTOR_INT => Value::Int(self.take_u32()? as i32),
            CTOR_LONG_SMALL => Value::Long(i64::from(self.take_u8()? as i8)),
            CTOR_LONG => Value::Long(self.take_u64()? as i64),
            CTOR_FLOAT => Value::Float(f32::from_bits(self.take_u32()?)),
            CTOR_DOUBLE => Value::Double(f64::from_bits(self.take_u64()?)),
            CTOR_TIMESTAMP => Value::Timestamp(self.take_u64()? as i64),
            CTOR_UUID => {
                let b = self.take(16)?;
                let mut raw = [0u8; 16];
                raw.copy_from_slice(b);
                Value::Uuid(Uuid::from_bytes(raw))
            }
            CTOR_BINARY_SMALL | CTOR_BINARY => {
                let len = self.read_width(ctor == CTOR_BINARY)?;
                Value::Binary(Bytes::copy_from_slice(self.take(len)?))
            }
            CTOR_STRING_SMALL | CTOR_STRING => {
                let len = self.read_width(ctor == CTOR_STRING)?;
                let raw = self.take(len)?;
                let s = core::str::from_utf8(raw)
                    .map_err(|_| CodecError::Malformed("string is not valid utf-8"))?;
                Value::String(s.to_owned())
            }
            CTOR_SYMBOL_SMALL | CTOR_SYMBOL => {
                let len = self.read_width(ctor == CTOR_SYMBOL)?;
                Value::Symbol(Bytes::copy_from_slice(self.take(len)?))
            }
            CTOR_LIST_0 => Value::List(Vec::new()),
            CTOR_LIST_SMALL | CTOR_LIST => {
                let (mut body, count) = self.read_compound(ctor == CTOR_LIST)?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(body.read_value().map_err(truncated_compound)?);
                }
                if !body.is_empty() {
                    return Err(CodecError::Malformed("trailing bytes inside list"));
                }
                Value::List(items)
            }
            CTOR_MAP_SMALL | CTOR_MAP => {
                let (mut body, count) = self.read_compound(ctor == CTOR_MAP)?;
                if count % 2 != 0 {
                    return Err(CodecError::Malformed("map with odd entry count"));
                }
                let pairs = count / 2;
                let mut entries = Vec::with_capacity(pairs.min(1024));
                for _ in 0..pairs {
                    let k = body.read_value().map_err(truncated_compound)?;
                    let v = body.read_value().map_err(truncated_compound)?;
                    entries.push((k, v));
                }
                if !body.is_empty() {
                    return Err(CodecError::Malformed("trailing bytes inside map"));
                }
                Value::Map(entries)
            }
            CTOR_ARRAY_SMALL | CTOR_ARRAY => {
                let (mut body, count) = self.read_compound(ctor == CTOR_ARRAY)?;
                let mut items = Vec::with_capacity(count.min(1024));
                if count > 0 {
                    let elem_ctor = body.take_u8().map_err(truncated_compound)?;
                    // A described element constructor covers the whole array.
                    if elem_ctor == CTOR_DESCRIBED {
                        let descriptor = body.read_value().map_err(truncated_compound)?;
                        let elem_ctor = body.take_u8().map_err(truncated_compound)?;
                        for _ in 0..count {
                            let payload = body.read_body(elem_ctor).map_err(truncated_compound)?;
                            items.push(Value::Described(
                                Box::new(descriptor.clone()),
                                Box::new(payload),
                            ));
                        }
                    } else {
                        for _ in 0..count {
                            items.push(body.read_body(elem_ctor).map_err(truncated_compound)?);
                        }
                    }
                }
                if !body.is_empty() {
                    return Err(CodecError::Malformed("trailing bytes inside array"));
                }
                Value::Array(items)
            }
            CTOR_DESCRIBED => {
                let descriptor = self.read_value()?;
                let payload = self.read_value()?;
                Value::Described(Box::new(descriptor), Box::new(payload))
            }
            other => return Err(CodecError::InvalidConstructor(other)),
        };
        Ok(value)
    }

    fn read_width(&mut self, wide: bool) -> Result<usize> {
        if wide {
            Ok(self.take_u32()? as usize)
        } else {
            Ok(usize::from(self.take_u8()?))
        }
    }

    /// Read a compound header and return a sub-cursor over exactly the body
    /// bytes plus the element count. The size field covers the count field,
    /// so the body is `size - width(count)` bytes.
    fn read_compound(&mut self, wide: bool) -> Result<(Cursor<'a>, usize)> {
        let (size, count_width) = if wide {
            (self.take_u32()? as usize, 4)
        } else {
            (usize::from(self.take_u8()?), 1)
        };
        if size < count_width {
            return Err(CodecError::Malformed("compound size below count width"));
        }
        let count = self.read_width(wide)?;
        let body = self.take(size - count_width)?;
        Ok((Cursor::new(body), count))
    }
}

/// Inside a size-delimited compound the full extent is already buffered, so
/// running out of bytes means the count and size fields disagree. Promote
/// `Incomplete` to a hard error rather than asking the caller for bytes
/// that will never arrive.
fn truncated_compound(err: CodecError) -> CodecError {
    if err.is_incomplete() {
        CodecError::Malformed("compound count exceeds its size")
    } else {
        err
    }
}
