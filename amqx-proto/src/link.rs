//! Link endpoints: attach lifecycle, credit flow control, transfer
//! queueing and fragmentation, unsettled-delivery tracking.
//!
//! A link never talks to the wire directly. It queues link-scoped frames
//! into an outgoing vector that the owning session drains, completing the
//! session-level fields of FLOW on the way out. Delivery ids are session
//! scope and are assigned by the session during the transfer pump.

use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::{debug, warn};

use amqx_codec::performative::{Attach, Detach, Disposition, Flow, Transfer};
use amqx_codec::{
    DeliveryState, ErrorInfo, Outcome, ReceiverSettleMode, Role, SenderSettleMode, Source, Target,
    Value,
};

use crate::error::{AmqpError, RemoteError, Result};
use crate::event::{Delivery, DeliveryOutcome};
use crate::serial::{serial_add, serial_diff};

/// Default credit a receiver grants on attach.
pub const DEFAULT_RECEIVER_CREDIT: u32 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Detached,
    AttachSent,
    AttachRcvd,
    Attached,
    DetachSent,
    DetachRcvd,
    Error,
}

#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub name: String,
    pub role: Role,
    pub source: Option<Source>,
    pub target: Option<Target>,
    pub snd_settle_mode: SenderSettleMode,
    pub rcv_settle_mode: ReceiverSettleMode,
    pub max_message_size: Option<u64>,
    /// Credit window a receiver grants and replenishes.
    pub credit_window: u32,
    /// Deadline for a disposition on each unsettled outbound delivery.
    pub delivery_timeout: Option<Duration>,
    pub properties: Option<Vec<(Value, Value)>>,
}

impl LinkConfig {
    pub fn sender(name: impl Into<String>, target_address: impl Into<String>) -> Self {
        LinkConfig {
            name: name.into(),
            role: Role::Sender,
            source: Some(Source::default()),
            target: Some(Target::with_address(target_address)),
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            max_message_size: None,
            credit_window: DEFAULT_RECEIVER_CREDIT,
            delivery_timeout: None,
            properties: None,
        }
    }

    pub fn receiver(name: impl Into<String>, source_address: impl Into<String>) -> Self {
        LinkConfig {
            name: name.into(),
            role: Role::Receiver,
            source: Some(Source::with_address(source_address)),
            target: Some(Target::default()),
            snd_settle_mode: SenderSettleMode::default(),
            rcv_settle_mode: ReceiverSettleMode::default(),
            max_message_size: None,
            credit_window: DEFAULT_RECEIVER_CREDIT,
            delivery_timeout: None,
            properties: None,
        }
    }
}

/// Link-scoped FLOW; the session fills in its id/window fields on encode.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FlowRequest {
    pub handle: u32,
    pub delivery_count: u32,
    pub link_credit: u32,
    pub drain: bool,
    pub echo: bool,
}

/// Frames a link wants on the wire, drained by the session.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkFrame {
    Attach(Box<Attach>),
    Flow(FlowRequest),
    Disposition(Disposition),
    Detach(Detach),
}

/// A link-level observation the session turns into a connection event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LinkNotice {
    Attached,
    Detached { error: Option<RemoteError> },
    CreditChanged { credit: u32 },
    Message(Delivery),
    Resolved { delivery_id: u32, outcome: DeliveryOutcome },
}

struct PendingSend {
    payload: Bytes,
    offset: usize,
    tag: Bytes,
    settled: bool,
    deadline: Option<Instant>,
    /// Set once the first fragment is on the wire.
    delivery_id: Option<u32>,
}

struct UnsettledDelivery {
    deadline: Option<Instant>,
}

struct InboundDelivery {
    delivery_id: u32,
    delivery_tag: Bytes,
    settled: bool,
    buffer: BytesMut,
}

pub(crate) struct Link {
    pub(crate) config: LinkConfig,
    pub(crate) state: LinkState,
    pub(crate) handle: u32,
    pub(crate) remote_handle: Option<u32>,
    delivery_count: u32,
    link_credit: u32,
    remote_max_message_size: Option<u64>,
    next_tag: u64,
    queue: VecDeque<PendingSend>,
    unsettled: BTreeMap<u32, UnsettledDelivery>,
    inbound: Option<InboundDelivery>,
    pub(crate) outgoing: Vec<LinkFrame>,
    pub(crate) notices: Vec<LinkNotice>,
}

impl Link {
    pub(crate) fn new(config: LinkConfig, handle: u32) -> Link {
        Link {
            config,
            state: LinkState::Detached,
            handle,
            remote_handle: None,
            delivery_count: 0,
            link_credit: 0,
            remote_max_message_size: None,
            next_tag: 0,
            queue: VecDeque::new(),
            unsettled: BTreeMap::new(),
            inbound: None,
            outgoing: Vec::new(),
            notices: Vec::new(),
        }
    }

    pub(crate) fn is_attached(&self) -> bool {
        self.state == LinkState::Attached
    }

    pub(crate) fn credit(&self) -> u32 {
        self.link_credit
    }

    fn make_attach(&self) -> Box<Attach> {
        Box::new(Attach {
            name: self.config.name.clone(),
            handle: self.handle,
            role: self.config.role,
            snd_settle_mode: self.config.snd_settle_mode,
            rcv_settle_mode: self.config.rcv_settle_mode,
            source: self.config.source.clone(),
            target: self.config.target.clone(),
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count: match self.config.role {
                Role::Sender => Some(self.delivery_count),
                Role::Receiver => None,
            },
            max_message_size: self.config.max_message_size,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: self.config.properties.clone(),
        })
    }

    /// Begin the attach handshake.
    pub(crate) fn attach(&mut self) -> Result<()> {
        match self.state {
            LinkState::Detached => {}
            LinkState::AttachRcvd => {
                // Responding to a remotely initiated attach.
                self.outgoing.push(LinkFrame::Attach(self.make_attach()));
                self.state = LinkState::Attached;
                self.complete_attach();
                return Ok(());
            }
            _ => return Err(AmqpError::IllegalState("link is not detached")),
        }
        self.outgoing.push(LinkFrame::Attach(self.make_attach()));
        self.state = LinkState::AttachSent;
        Ok(())
    }

    pub(crate) fn on_attach(&mut self, attach: &Attach) -> Result<()> {
        self.remote_handle = Some(attach.handle);
        self.remote_max_message_size = attach.max_message_size;
        match self.config.role {
            Role::Sender => {
                // The receiving peer grants credit later via FLOW.
            }
            Role::Receiver => match attach.initial_delivery_count {
                Some(count) => self.delivery_count = count,
                None => {
                    warn!(link = %self.config.name, "sender attach without initial-delivery-count");
                    self.local_detach(
                        true,
                        Some(ErrorInfo::new(
                            "amqp:invalid-field",
                            "attach from sender must carry initial-delivery-count",
                        )),
                    );
                    return Ok(());
                }
            },
        }
        match self.state {
            LinkState::Detached => {
                self.state = LinkState::AttachRcvd;
            }
            LinkState::AttachSent => {
                self.state = LinkState::Attached;
                self.complete_attach();
            }
            _ => return Err(AmqpError::IllegalState("attach in unexpected link state")),
        }
        Ok(())
    }

    fn complete_attach(&mut self) {
        debug!(link = %self.config.name, handle = self.handle, "link attached");
        self.notices.push(LinkNotice::Attached);
        if self.config.role.is_receiver() {
            self.grant_credit(self.config.credit_window);
        }
    }

    fn grant_credit(&mut self, credit: u32) {
        self.link_credit = credit;
        self.outgoing.push(LinkFrame::Flow(FlowRequest {
            handle: self.handle,
            delivery_count: self.delivery_count,
            link_credit: credit,
            drain: false,
            echo: false,
        }));
    }

    // ------------------------------------------------------------------
    // Sender side
    // ------------------------------------------------------------------

    /// Queue an encoded message payload for transfer. Blocked sends sit in
    /// the queue until credit and session window allow; queueing is never
    /// an error.
    pub(crate) fn queue_send(
        &mut self,
        payload: Bytes,
        settled: bool,
        deadline: Option<Instant>,
    ) -> Result<Bytes> {
        if !matches!(self.state, LinkState::Attached | LinkState::AttachSent) {
            return Err(AmqpError::Detached);
        }
        if let Some(max) = self.remote_max_message_size {
            if max > 0 && payload.len() as u64 > max {
                return Err(AmqpError::Link(RemoteError::from_info(&ErrorInfo::new(
                    "amqp:link:message-size-exceeded",
                    "message exceeds the peer's max-message-size",
                ))));
            }
        }
        let mut tag = BytesMut::with_capacity(8);
        tag.put_u64(self.next_tag);
        self.next_tag += 1;
        let tag = tag.freeze();
        self.queue.push_back(PendingSend {
            payload,
            offset: 0,
            tag: tag.clone(),
            settled,
            deadline,
            delivery_id: None,
        });
        Ok(tag)
    }

    /// True when the next call to [`next_transfer`](Self::next_transfer)
    /// can produce a frame.
    pub(crate) fn has_sendable(&self) -> bool {
        if !self.is_attached() || self.queue.is_empty() {
            return false;
        }
        let head = &self.queue[0];
        // A delivery mid-fragmentation keeps its claim on credit already
        // spent; a fresh delivery needs credit.
        head.offset > 0 || self.link_credit > 0
    }

    /// Produce the next TRANSFER frame. `delivery_id` is consumed only for
    /// the first fragment of a delivery; `max_payload` caps the fragment
    /// body per the negotiated frame size.
    pub(crate) fn next_transfer(
        &mut self,
        next_delivery_id: u32,
        max_payload: usize,
    ) -> Option<(Transfer, Bytes, bool)> {
        if !self.has_sendable() {
            return None;
        }
        let head = self.queue.front_mut()?;
        let first_fragment = head.offset == 0;
        if first_fragment {
            head.delivery_id = Some(next_delivery_id);
            self.link_credit = self.link_credit.saturating_sub(1);
            self.delivery_count = serial_add(self.delivery_count, 1);
        }
        let remaining = head.payload.len() - head.offset;
        let take = remaining.min(max_payload.max(1));
        let chunk = head.payload.slice(head.offset..head.offset + take);
        head.offset += take;
        let more = head.offset < head.payload.len();

        let mut transfer = Transfer::new(self.handle);
        transfer.delivery_id = head.delivery_id;
        transfer.delivery_tag = Some(head.tag.clone());
        transfer.settled = Some(head.settled);
        transfer.more = more;

        let consumed_new_id = first_fragment;
        if !more {
            let done = self.queue.pop_front();
            if let Some(done) = done {
                if !done.settled {
                    if let Some(id) = done.delivery_id {
                        self.unsettled.insert(
                            id,
                            UnsettledDelivery {
                                deadline: done.deadline,
                            },
                        );
                    }
                }
            }
        }
        Some((transfer, chunk, consumed_new_id))
    }

    /// Incoming FLOW echoing the peer's view of this link.
    pub(crate) fn on_flow(&mut self, flow: &Flow) {
        if self.config.role.is_receiver() {
            return;
        }
        let remote_count = flow.delivery_count.unwrap_or(0);
        let remote_credit = flow.link_credit.unwrap_or(0);
        self.link_credit =
            serial_diff(serial_add(remote_count, remote_credit), self.delivery_count);
        debug!(
            link = %self.config.name,
            credit = self.link_credit,
            "sender credit recomputed"
        );
        self.notices.push(LinkNotice::CreditChanged {
            credit: self.link_credit,
        });
    }

    /// Disposition covering `[first, last]` from the peer.
    pub(crate) fn on_disposition(
        &mut self,
        first: u32,
        last: u32,
        state: Option<&DeliveryState>,
        settled: bool,
    ) {
        if !settled {
            // Mode-first peers settle in one step; an unsettled disposition
            // is informational only.
            return;
        }
        let resolved: Vec<u32> = self
            .unsettled
            .keys()
            .copied()
            .filter(|id| {
                crate::serial::serial_le(first, *id) && crate::serial::serial_le(*id, last)
            })
            .collect();
        for id in resolved {
            self.unsettled.remove(&id);
            let outcome = match state.and_then(DeliveryState::outcome) {
                Some(Outcome::Accepted) | None => DeliveryOutcome::Accepted,
                Some(Outcome::Rejected(err)) => DeliveryOutcome::Rejected(
                    err.as_ref().map(RemoteError::from_info),
                ),
                Some(Outcome::Released) => DeliveryOutcome::Released,
                Some(Outcome::Modified {
                    delivery_failed,
                    undeliverable_here,
                    ..
                }) => DeliveryOutcome::Modified {
                    delivery_failed: *delivery_failed,
                    undeliverable_here: *undeliverable_here,
                },
            };
            self.notices.push(LinkNotice::Resolved {
                delivery_id: id,
                outcome,
            });
        }
    }

    // ------------------------------------------------------------------
    // Receiver side
    // ------------------------------------------------------------------

    /// Incoming TRANSFER fragment. Returns an error only for protocol
    /// violations; a completed message surfaces as a notice.
    pub(crate) fn on_transfer(&mut self, transfer: &Transfer, payload: &[u8]) -> Result<()> {
        if !self.config.role.is_receiver() {
            return Err(AmqpError::IllegalState("transfer on a sender link"));
        }
        match &mut self.inbound {
            Some(inbound) => {
                // Continuation fragments may omit id and tag.
                if let Some(id) = transfer.delivery_id {
                    if id != inbound.delivery_id {
                        return Err(AmqpError::IllegalState(
                            "interleaved deliveries on one link",
                        ));
                    }
                }
                inbound.buffer.extend_from_slice(payload);
            }
            None => {
                let delivery_id = transfer
                    .delivery_id
                    .ok_or(AmqpError::IllegalState("first fragment without delivery-id"))?;
                let mut buffer = BytesMut::new();
                buffer.extend_from_slice(payload);
                self.inbound = Some(InboundDelivery {
                    delivery_id,
                    delivery_tag: transfer.delivery_tag.clone().unwrap_or_default(),
                    settled: transfer.settled.unwrap_or(false),
                    buffer,
                });
                self.link_credit = self.link_credit.saturating_sub(1);
                self.delivery_count = serial_add(self.delivery_count, 1);
            }
        }
        if transfer.aborted {
            self.inbound = None;
            return Ok(());
        }
        if transfer.more {
            return Ok(());
        }
        let inbound = match self.inbound.take() {
            Some(inbound) => inbound,
            None => return Ok(()),
        };
        let message = amqx_codec::decode_payload(&inbound.buffer)?;
        self.notices.push(LinkNotice::Message(Delivery {
            delivery_id: inbound.delivery_id,
            delivery_tag: inbound.delivery_tag,
            message,
            settled: inbound.settled,
        }));
        self.replenish_credit();
        Ok(())
    }

    /// Top the window back up once credit drops to a third of it.
    fn replenish_credit(&mut self) {
        let window = self.config.credit_window;
        if window > 0 && self.link_credit <= window / 3 {
            debug!(link = %self.config.name, window, "replenishing receiver credit");
            self.grant_credit(window);
        }
    }

    /// Settle an inbound delivery with the given outcome.
    pub(crate) fn settle(&mut self, delivery_id: u32, state: DeliveryState) {
        self.outgoing.push(LinkFrame::Disposition(Disposition {
            role: Role::Receiver,
            first: delivery_id,
            last: None,
            settled: true,
            state: Some(state),
            batchable: false,
        }));
    }

    // ------------------------------------------------------------------
    // Detach and teardown
    // ------------------------------------------------------------------

    pub(crate) fn local_detach(&mut self, closed: bool, error: Option<ErrorInfo>) {
        if matches!(self.state, LinkState::Detached | LinkState::DetachSent) {
            return;
        }
        self.outgoing.push(LinkFrame::Detach(Detach {
            handle: self.handle,
            closed,
            error,
        }));
        self.state = if self.state == LinkState::DetachRcvd {
            self.cancel_all();
            LinkState::Detached
        } else {
            LinkState::DetachSent
        };
    }

    pub(crate) fn on_detach(&mut self, detach: &Detach) {
        let error = detach.error.as_ref().map(RemoteError::from_info);
        match self.state {
            LinkState::DetachSent => {
                self.state = LinkState::Detached;
                self.cancel_all();
                self.notices.push(LinkNotice::Detached { error });
            }
            _ => {
                // Peer-initiated detach: echo and tear down.
                self.outgoing.push(LinkFrame::Detach(Detach {
                    handle: self.handle,
                    closed: detach.closed,
                    error: None,
                }));
                self.state = if error.is_some() {
                    LinkState::Error
                } else {
                    LinkState::Detached
                };
                self.cancel_all();
                self.notices.push(LinkNotice::Detached { error });
            }
        }
    }

    /// Session or connection teardown: every pending operation observes a
    /// cancelled outcome instead of hanging.
    pub(crate) fn teardown(&mut self) {
        self.state = LinkState::Detached;
        self.cancel_all();
        self.notices.push(LinkNotice::Detached { error: None });
    }

    fn cancel_all(&mut self) {
        let unsettled: Vec<u32> = self.unsettled.keys().copied().collect();
        for id in unsettled {
            self.unsettled.remove(&id);
            self.notices.push(LinkNotice::Resolved {
                delivery_id: id,
                outcome: DeliveryOutcome::Cancelled,
            });
        }
        for send in self.queue.drain(..) {
            if let Some(id) = send.delivery_id {
                self.notices.push(LinkNotice::Resolved {
                    delivery_id: id,
                    outcome: DeliveryOutcome::Cancelled,
                });
            }
        }
        self.inbound = None;
    }

    /// Resolve unsettled deliveries whose disposition deadline has passed.
    pub(crate) fn expire_deliveries(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .unsettled
            .iter()
            .filter(|(_, d)| d.deadline.is_some_and(|dl| now >= dl))
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            self.unsettled.remove(&id);
            warn!(link = %self.config.name, delivery_id = id, "delivery timed out unsettled");
            self.notices.push(LinkNotice::Resolved {
                delivery_id: id,
                outcome: DeliveryOutcome::Timeout,
            });
        }
    }

    /// Earliest pending delivery deadline.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.unsettled.values().filter_map(|d| d.deadline).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached_sender() -> Link {
        let mut link = Link::new(LinkConfig::sender("s", "queue"), 0);
        link.attach().unwrap();
        link.outgoing.clear();
        let mut attach = link.make_attach();
        attach.role = Role::Receiver;
        attach.initial_delivery_count = None;
        link.on_attach(&attach).unwrap();
        link
    }

    fn flow_with_credit(count: u32, credit: u32) -> Flow {
        Flow {
            next_incoming_id: Some(0),
            incoming_window: 100,
            next_outgoing_id: 0,
            outgoing_window: 100,
            handle: Some(0),
            delivery_count: Some(count),
            link_credit: Some(credit),
            available: None,
            drain: false,
            echo: false,
            properties: None,
        }
    }

    // ========================================================================
    // Sender credit
    // ========================================================================

    #[test]
    fn credit_starts_at_zero_and_follows_flow() {
        let mut link = attached_sender();
        assert_eq!(link.credit(), 0);
        assert!(!link.has_sendable());

        link.on_flow(&flow_with_credit(0, 5));
        assert_eq!(link.credit(), 5);
    }

    #[test]
    fn credit_decreases_monotonically_then_blocks() {
        let mut link = attached_sender();
        link.on_flow(&flow_with_credit(0, 2));
        link.queue_send(Bytes::from_static(b"a"), false, None).unwrap();
        link.queue_send(Bytes::from_static(b"b"), false, None).unwrap();
        link.queue_send(Bytes::from_static(b"c"), false, None).unwrap();

        assert!(link.next_transfer(0, 1024).is_some());
        assert_eq!(link.credit(), 1);
        assert!(link.next_transfer(1, 1024).is_some());
        assert_eq!(link.credit(), 0);
        // Third send stays queued until new credit arrives.
        assert!(!link.has_sendable());
        assert!(link.next_transfer(2, 1024).is_none());

        link.on_flow(&flow_with_credit(2, 1));
        assert_eq!(link.credit(), 1);
        assert!(link.has_sendable());
    }

    #[test]
    fn credit_recompute_uses_serial_arithmetic() {
        let mut link = attached_sender();
        link.delivery_count = u32::MAX - 1;
        link.on_flow(&flow_with_credit(u32::MAX - 1, 10));
        assert_eq!(link.credit(), 10);
    }

    // ========================================================================
    // Fragmentation
    // ========================================================================

    #[test]
    fn large_payload_fragments_with_more_flag() {
        let mut link = attached_sender();
        link.on_flow(&flow_with_credit(0, 1));
        link.queue_send(Bytes::from(vec![7u8; 10]), false, None).unwrap();

        let (t1, chunk1, fresh1) = link.next_transfer(0, 4).unwrap();
        assert!(t1.more);
        assert!(fresh1);
        assert_eq!(chunk1.len(), 4);
        assert_eq!(t1.delivery_id, Some(0));

        let (t2, chunk2, fresh2) = link.next_transfer(1, 4).unwrap();
        assert!(t2.more);
        assert!(!fresh2, "continuation keeps the original delivery id");
        assert_eq!(t2.delivery_id, Some(0));
        assert_eq!(chunk2.len(), 4);

        let (t3, chunk3, _) = link.next_transfer(1, 4).unwrap();
        assert!(!t3.more);
        assert_eq!(chunk3.len(), 2);
        // One delivery, one unit of credit.
        assert_eq!(link.credit(), 0);
        assert_eq!(link.delivery_count, 1);
    }

    // ========================================================================
    // Dispositions and deadlines
    // ========================================================================

    #[test]
    fn disposition_resolves_unsettled_range() {
        let mut link = attached_sender();
        link.on_flow(&flow_with_credit(0, 3));
        for _ in 0..3 {
            link.queue_send(Bytes::from_static(b"m"), false, None).unwrap();
        }
        for id in 0..3 {
            link.next_transfer(id, 1024).unwrap();
        }
        link.notices.clear();

        link.on_disposition(0, 1, Some(&DeliveryState::ACCEPTED), true);
        let resolved: Vec<_> = link
            .notices
            .iter()
            .filter(|n| matches!(n, LinkNotice::Resolved { .. }))
            .collect();
        assert_eq!(resolved.len(), 2);
        assert_eq!(link.unsettled.len(), 1);
    }

    #[test]
    fn deadline_passage_times_out_delivery() {
        let mut link = attached_sender();
        link.on_flow(&flow_with_credit(0, 1));
        let now = Instant::now();
        link.queue_send(Bytes::from_static(b"m"), false, Some(now)).unwrap();
        link.next_transfer(0, 1024).unwrap();
        link.notices.clear();

        link.expire_deliveries(now + Duration::from_millis(1));
        assert_eq!(
            link.notices,
            vec![LinkNotice::Resolved {
                delivery_id: 0,
                outcome: DeliveryOutcome::Timeout
            }]
        );
        assert!(link.unsettled.is_empty());
    }

    #[test]
    fn teardown_cancels_everything() {
        let mut link = attached_sender();
        link.on_flow(&flow_with_credit(0, 1));
        link.queue_send(Bytes::from_static(b"sent"), false, None).unwrap();
        link.queue_send(Bytes::from_static(b"queued"), false, None).unwrap();
        link.next_transfer(0, 1024).unwrap();
        link.notices.clear();

        link.teardown();
        let cancelled = link
            .notices
            .iter()
            .filter(|n| {
                matches!(
                    n,
                    LinkNotice::Resolved {
                        outcome: DeliveryOutcome::Cancelled,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(cancelled, 1, "on-the-wire delivery observes cancellation");
        assert!(link.queue.is_empty());
    }

    // ========================================================================
    // Receiver
    // ========================================================================

    fn attached_receiver(window: u32) -> Link {
        let mut config = LinkConfig::receiver("r", "queue");
        config.credit_window = window;
        let mut link = Link::new(config, 0);
        link.attach().unwrap();
        let mut attach = link.make_attach();
        attach.role = Role::Sender;
        attach.initial_delivery_count = Some(0);
        link.on_attach(&attach).unwrap();
        link.outgoing.clear();
        link.notices.clear();
        link
    }

    fn transfer_with_body(id: u32, more: bool, body: &[u8]) -> (Transfer, Vec<u8>) {
        let mut t = Transfer::new(0);
        t.delivery_id = Some(id);
        t.delivery_tag = Some(Bytes::copy_from_slice(&id.to_be_bytes()));
        t.more = more;
        (t, body.to_vec())
    }

    fn encoded_body() -> Vec<u8> {
        let mut buf = BytesMut::new();
        amqx_codec::encode_payload(
            &amqx_codec::Message::from_data(Bytes::from_static(b"hi")),
            &mut buf,
        )
        .unwrap();
        buf.to_vec()
    }

    #[test]
    fn receiver_grants_initial_credit_on_attach() {
        let mut config = LinkConfig::receiver("r", "queue");
        config.credit_window = 300;
        let mut link = Link::new(config, 0);
        link.attach().unwrap();
        let mut attach = link.make_attach();
        attach.role = Role::Sender;
        attach.initial_delivery_count = Some(0);
        link.on_attach(&attach).unwrap();
        assert!(link
            .outgoing
            .iter()
            .any(|f| matches!(f, LinkFrame::Flow(FlowRequest { link_credit: 300, .. }))));
        assert_eq!(link.credit(), 300);
    }

    #[test]
    fn sender_attach_without_initial_delivery_count_detaches() {
        let mut link = Link::new(LinkConfig::receiver("r", "queue"), 0);
        link.attach().unwrap();
        let mut attach = link.make_attach();
        attach.role = Role::Sender;
        attach.initial_delivery_count = None;
        link.on_attach(&attach).unwrap();
        assert!(link.outgoing.iter().any(|f| matches!(
            f,
            LinkFrame::Detach(Detach { closed: true, error: Some(_), .. })
        )));
    }

    #[test]
    fn fragments_reassemble_into_one_message() {
        let mut link = attached_receiver(10);
        let body = encoded_body();
        let (t1, _) = transfer_with_body(0, true, &[]);
        link.on_transfer(&t1, &body[..3]).unwrap();
        assert!(link.notices.is_empty());

        let mut t2 = Transfer::new(0);
        t2.more = false;
        link.on_transfer(&t2, &body[3..]).unwrap();
        match &link.notices[..] {
            [LinkNotice::Message(delivery)] => {
                assert_eq!(delivery.delivery_id, 0);
                assert_eq!(
                    delivery.message,
                    amqx_codec::Message::from_data(Bytes::from_static(b"hi"))
                );
            }
            other => panic!("unexpected notices {other:?}"),
        }
        assert_eq!(link.credit(), 9);
        assert_eq!(link.delivery_count, 1);
    }

    #[test]
    fn credit_replenishes_at_a_third_of_window() {
        let mut link = attached_receiver(9);
        let body = encoded_body();
        // Burn credit down to the threshold.
        for id in 0..6u32 {
            let (t, _) = transfer_with_body(id, false, &[]);
            link.on_transfer(&t, &body).unwrap();
        }
        // 9 - 6 = 3 = window / 3: replenished back to the window.
        assert_eq!(link.credit(), 9);
        assert!(link
            .outgoing
            .iter()
            .any(|f| matches!(f, LinkFrame::Flow(FlowRequest { link_credit: 9, .. }))));
    }

    #[test]
    fn settle_emits_disposition() {
        let mut link = attached_receiver(10);
        let body = encoded_body();
        let (t, _) = transfer_with_body(4, false, &[]);
        link.on_transfer(&t, &body).unwrap();
        link.settle(4, DeliveryState::ACCEPTED);
        assert!(link.outgoing.iter().any(|f| matches!(
            f,
            LinkFrame::Disposition(Disposition { first: 4, settled: true, .. })
        )));
    }

    #[test]
    fn aborted_transfer_discards_fragments() {
        let mut link = attached_receiver(10);
        let (t1, _) = transfer_with_body(0, true, &[]);
        link.on_transfer(&t1, b"partial").unwrap();
        let mut t2 = Transfer::new(0);
        t2.aborted = true;
        link.on_transfer(&t2, &[]).unwrap();
        assert!(link.notices.is_empty());
        assert!(link.inbound.is_none());
    }
}
