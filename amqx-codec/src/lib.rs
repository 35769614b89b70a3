//! amqx-codec: AMQP 1.0 Type System and Frame Codec
//!
//! This crate implements the binary codec layer of AMQP 1.0 as specified by
//! OASIS (Part 1: Types, Part 2: Transport ch. 2.3 framing, Part 3:
//! Messaging message format).
//!
//! # Architecture
//!
//! - **Buffer injection**: encoders write into caller-provided
//!   `bytes::BytesMut`, no internal allocation of output buffers
//! - **Incremental decoding**: truncated input is reported as
//!   [`CodecError::Incomplete`], never as malformed data, so callers can
//!   buffer more bytes and retry
//! - **Closed unions**: performatives and delivery outcomes are closed
//!   enums dispatched by `match`, with compile-time exhaustiveness
//!
//! # Module Organization
//!
//! - `value`: the AMQP primitive/compound value union and constructor bytes
//! - `encode`: smallest-width value encoder
//! - `decode`: value decoder
//! - `definitions`: composite non-frame types (termini, outcomes, error)
//! - `performative`: frame body types OPEN..CLOSE plus the SASL family
//! - `frame`: frame header assembly and the incremental frame decoder
//! - `message`: message sections and payload (de)serialization

#![forbid(unsafe_code)]

pub mod decode;
pub mod definitions;
pub mod encode;
pub mod error;
pub mod frame;
pub mod message;
pub mod performative;
pub mod value;

pub use decode::decode_value;
pub use definitions::{
    DeliveryState, ErrorInfo, Outcome, ReceiverSettleMode, Role, SenderSettleMode, Source, Target,
};
pub use encode::encode_value;
pub use error::CodecError;
pub use frame::{encode_frame, FrameDecoder, FrameEvent, FrameHeader, FRAME_TYPE_AMQP, FRAME_TYPE_SASL};
pub use message::{decode_payload, encode_payload, Body, Header, Message, Properties};
pub use performative::Performative;
pub use value::Value;

/// Generic result type for codec operations.
pub type Result<T> = core::result::Result<T, CodecError>;
