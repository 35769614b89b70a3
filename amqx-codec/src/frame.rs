//! Frame assembly and the incremental frame decoder.
//!
//! Frame layout (OASIS AMQP 1.0 Part 2, Section 2.3): 4-byte size covering
//! the whole frame, 1-byte data offset in 4-byte words (always 2 here),
//! 1-byte frame type (0 = AMQP, 1 = SASL), 2-byte channel, then the
//! performative body and, for TRANSFER, the raw message payload.

use bytes::{BufMut, Bytes, BytesMut};

use crate::decode::decode_value;
use crate::encode::encode_value;
use crate::error::CodecError;
use crate::performative::Performative;
use crate::Result;

pub const FRAME_TYPE_AMQP: u8 = 0;
pub const FRAME_TYPE_SASL: u8 = 1;
pub const FRAME_HEADER_SIZE: usize = 8;
/// Smallest max-frame-size a peer may advertise.
pub const MIN_MAX_FRAME_SIZE: u32 = 512;

/// 8-byte preamble opening the AMQP layer.
pub const AMQP_PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x01\x00\x00";
/// 8-byte preamble opening the SASL layer.
pub const SASL_PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x03\x01\x00\x00";

/// Parsed fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub size: u32,
    pub doff: u8,
    pub frame_type: u8,
    pub channel: u16,
}

/// One unit of input recognized by the [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Protocol preamble. `sasl` distinguishes the SASL and AMQP layers.
    ProtocolHeader { sasl: bool },
    /// A size-8 frame with no body. Keepalive only; refreshes the idle
    /// deadline and is never dispatched further.
    Empty { channel: u16 },
    /// A performative frame, with any trailing payload bytes.
    Frame {
        channel: u16,
        frame_type: u8,
        performative: Performative,
        payload: Bytes,
    },
}

/// Serialize one frame: header, performative body, optional payload.
pub fn encode_frame(
    channel: u16,
    performative: &Performative,
    payload: Option<&[u8]>,
    buf: &mut BytesMut,
) -> Result<()> {
    let frame_type = if performative.is_sasl() {
        FRAME_TYPE_SASL
    } else {
        FRAME_TYPE_AMQP
    };
    let start = buf.len();
    buf.put_u32(0); // patched below
    buf.put_u8(2);
    buf.put_u8(frame_type);
    buf.put_u16(channel);
    encode_value(&performative.to_value(), buf)?;
    if let Some(payload) = payload {
        buf.put_slice(payload);
    }
    let size = u32::try_from(buf.len() - start)
        .map_err(|_| CodecError::EncodeOverflow("frame"))?;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
    Ok(())
}

/// Serialize an empty (keepalive) frame on channel 0.
pub fn encode_empty_frame(buf: &mut BytesMut) {
    buf.put_u32(FRAME_HEADER_SIZE as u32);
    buf.put_u8(2);
    buf.put_u8(FRAME_TYPE_AMQP);
    buf.put_u16(0);
}

/// Incremental frame decoder.
///
/// Bytes go in through [`feed`](Self::feed); complete events come out of
/// [`poll`](Self::poll). Feeding one byte at a time produces the same event
/// sequence as feeding everything at once. The decoder starts out expecting
/// a protocol header; the connection layer re-arms header expectation after
/// a SASL outcome restarts the wire.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    expect_header: bool,
    max_frame_size: u32,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            buf: BytesMut::new(),
            expect_header: true,
            max_frame_size: u32::MAX,
        }
    }

    /// Expect an 8-byte protocol header before the next frame.
    pub fn expect_protocol_header(&mut self) {
        self.expect_header = true;
    }

    /// Cap accepted frame sizes at the locally advertised maximum.
    pub fn set_max_frame_size(&mut self, max: u32) {
        self.max_frame_size = max;
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Decode the next complete event, or `None` when more bytes are needed.
    pub fn poll(&mut self) -> Result<Option<FrameEvent>> {
        if self.expect_header {
            return self.poll_protocol_header();
        }
        if self.buf.len() < 4 {
            return Ok(None);
        }
        let size = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        if (size as usize) < FRAME_HEADER_SIZE {
            return Err(CodecError::Framing("frame size below header size"));
        }
        if size > self.max_frame_size {
            return Err(CodecError::Framing("frame exceeds negotiated maximum"));
        }
        if self.buf.len() < size as usize {
            return Ok(None);
        }
        let frame = self.buf.split_to(size as usize);
        let header = FrameHeader {
            size,
            doff: frame[4],
            frame_type: frame[5],
            channel: u16::from_be_bytes([frame[6], frame[7]]),
        };
        if usize::from(header.doff) * 4 < FRAME_HEADER_SIZE
            || usize::from(header.doff) * 4 > size as usize
        {
            return Err(CodecError::Framing("data offset out of range"));
        }
        if header.frame_type != FRAME_TYPE_AMQP && header.frame_type != FRAME_TYPE_SASL {
            return Err(CodecError::Framing("unknown frame type"));
        }
        let body = &frame[usize::from(header.doff) * 4..];
        if body.is_empty() {
            return Ok(Some(FrameEvent::Empty {
                channel: header.channel,
            }));
        }
        // The frame is complete, so a short read here means the body lies
        // about its own extents.
        let (value, used) = decode_value(body).map_err(|err| {
            if err.is_incomplete() {
                CodecError::Framing("performative body truncated within frame")
            } else {
                err
            }
        })?;
        let performative = Performative::from_value(&value)?;
        let payload = Bytes::copy_from_slice(&body[used..]);
        Ok(Some(FrameEvent::Frame {
            channel: header.channel,
            frame_type: header.frame_type,
            performative,
            payload,
        }))
    }

    fn poll_protocol_header(&mut self) -> Result<Option<FrameEvent>> {
        if self.buf.len() < 8 {
            return Ok(None);
        }
        let header = self.buf.split_to(8);
        let sasl = if header[..] == AMQP_PROTOCOL_HEADER {
            false
        } else if header[..] == SASL_PROTOCOL_HEADER {
            true
        } else {
            return Err(CodecError::Framing("unrecognized protocol header"));
        };
        self.expect_header = false;
        Ok(Some(FrameEvent::ProtocolHeader { sasl }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::performative::Open;

    fn open_frame() -> BytesMut {
        let mut buf = BytesMut::new();
        encode_frame(0, &Performative::Open(Open::new("c1")), None, &mut buf).unwrap();
        buf
    }

    #[test]
    fn header_then_frame() {
        let mut dec = FrameDecoder::new();
        dec.feed(&AMQP_PROTOCOL_HEADER);
        dec.feed(&open_frame());
        assert_eq!(
            dec.poll().unwrap(),
            Some(FrameEvent::ProtocolHeader { sasl: false })
        );
        match dec.poll().unwrap() {
            Some(FrameEvent::Frame {
                channel,
                performative: Performative::Open(o),
                payload,
                ..
            }) => {
                assert_eq!(channel, 0);
                assert_eq!(o.container_id, "c1");
                assert!(payload.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dec.poll().unwrap(), None);
    }

    #[test]
    fn one_byte_at_a_time_matches_all_at_once() {
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&AMQP_PROTOCOL_HEADER);
        wire.extend_from_slice(&open_frame());
        encode_empty_frame(&mut wire);

        let mut all = FrameDecoder::new();
        all.feed(&wire);
        let mut expected = Vec::new();
        while let Some(ev) = all.poll().unwrap() {
            expected.push(ev);
        }

        let mut trickle = FrameDecoder::new();
        let mut got = Vec::new();
        for byte in wire.iter() {
            trickle.feed(&[*byte]);
            while let Some(ev) = trickle.poll().unwrap() {
                got.push(ev);
            }
        }
        assert_eq!(got, expected);
        assert_eq!(expected.len(), 3);
    }

    #[test]
    fn empty_frame_recognized() {
        let mut dec = FrameDecoder::new();
        dec.feed(&AMQP_PROTOCOL_HEADER);
        let mut buf = BytesMut::new();
        encode_empty_frame(&mut buf);
        dec.feed(&buf);
        dec.poll().unwrap();
        assert_eq!(dec.poll().unwrap(), Some(FrameEvent::Empty { channel: 0 }));
    }

    #[test]
    fn undersized_frame_rejected() {
        let mut dec = FrameDecoder::new();
        dec.feed(&AMQP_PROTOCOL_HEADER);
        dec.poll().unwrap();
        dec.feed(&[0, 0, 0, 7, 2, 0, 0, 0]);
        assert_eq!(
            dec.poll().unwrap_err(),
            CodecError::Framing("frame size below header size")
        );
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut dec = FrameDecoder::new();
        dec.feed(&AMQP_PROTOCOL_HEADER);
        dec.poll().unwrap();
        dec.set_max_frame_size(512);
        dec.feed(&[0, 0, 2, 1]); // 513
        assert_eq!(
            dec.poll().unwrap_err(),
            CodecError::Framing("frame exceeds negotiated maximum")
        );
    }

    #[test]
    fn bad_protocol_header_rejected() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"HTTP/1.1");
        assert!(dec.poll().is_err());
    }

    #[test]
    fn sasl_header_then_rearmed_amqp_header() {
        let mut dec = FrameDecoder::new();
        dec.feed(&SASL_PROTOCOL_HEADER);
        assert_eq!(
            dec.poll().unwrap(),
            Some(FrameEvent::ProtocolHeader { sasl: true })
        );
        dec.expect_protocol_header();
        dec.feed(&AMQP_PROTOCOL_HEADER);
        assert_eq!(
            dec.poll().unwrap(),
            Some(FrameEvent::ProtocolHeader { sasl: false })
        );
    }

    #[test]
    fn transfer_payload_carried_through() {
        use crate::performative::Transfer;
        let mut t = Transfer::new(0);
        t.delivery_id = Some(0);
        t.delivery_tag = Some(Bytes::from_static(b"\x00"));
        let mut buf = BytesMut::new();
        encode_frame(1, &Performative::Transfer(t), Some(b"payload-bytes"), &mut buf).unwrap();

        let mut dec = FrameDecoder::new();
        dec.feed(&AMQP_PROTOCOL_HEADER);
        dec.poll().unwrap();
        dec.feed(&buf);
        match dec.poll().unwrap() {
            Some(FrameEvent::Frame { channel, payload, .. }) => {
                assert_eq!(channel, 1);
                assert_eq!(payload.as_ref(), b"payload-bytes");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
