//! Application-facing events drained from the connection state machine.

use bytes::Bytes;

use amqx_codec::Message;

use crate::error::RemoteError;

/// Final result of an outbound delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Accepted,
    Rejected(Option<RemoteError>),
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
    },
    /// No disposition arrived before the per-delivery deadline.
    Timeout,
    /// The link, session or connection tore down first; not delivered.
    Cancelled,
}

impl DeliveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DeliveryOutcome::Accepted)
    }
}

/// An inbound message delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub delivery_id: u32,
    pub delivery_tag: Bytes,
    pub message: Message,
    /// True when the sender pre-settled; no disposition owed.
    pub settled: bool,
}

/// Events surfaced by [`Connection::poll_event`](crate::Connection::poll_event).
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// OPEN negotiation completed.
    Opened,
    /// The connection reached its end state.
    Closed { error: Option<RemoteError> },
    SessionBegun {
        channel: u16,
    },
    SessionEnded {
        channel: u16,
        error: Option<RemoteError>,
    },
    LinkAttached {
        channel: u16,
        handle: u32,
    },
    LinkDetached {
        channel: u16,
        handle: u32,
        error: Option<RemoteError>,
    },
    /// Sender credit changed; queued sends may now flush.
    LinkFlow {
        channel: u16,
        handle: u32,
        credit: u32,
    },
    /// A complete (reassembled) inbound message.
    Message {
        channel: u16,
        handle: u32,
        delivery: Delivery,
    },
    /// An unsettled outbound delivery reached a terminal state.
    DeliveryResolved {
        channel: u16,
        handle: u32,
        delivery_id: u32,
        outcome: DeliveryOutcome,
    },
}
