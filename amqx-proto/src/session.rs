//! Session endpoints: channel mapping, transfer-window flow control, link
//! multiplexing and the transfer pump.
//!
//! The session owns its links and is the only place delivery ids are
//! assigned. Outbound frames accumulate in an internal queue the
//! connection drains; the connection never reaches into link state.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use amqx_codec::performative::{
    Attach, Begin, Detach, Disposition, End, Flow, Performative, Transfer,
};
use amqx_codec::{DeliveryState, ErrorInfo, Role, Value};

use crate::error::{AmqpError, RemoteError, Result};
use crate::event::Event;
use crate::link::{Link, LinkConfig, LinkFrame, LinkNotice, LinkState};
use crate::serial::{serial_add, serial_diff};

/// Default incoming/outgoing transfer window.
pub const DEFAULT_WINDOW: u32 = 65_536;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unmapped,
    BeginSent,
    BeginRcvd,
    Mapped,
    EndSent,
    EndRcvd,
    Discarding,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: u32,
    pub properties: Option<Vec<(Value, Value)>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            incoming_window: DEFAULT_WINDOW,
            outgoing_window: DEFAULT_WINDOW,
            handle_max: 4_294_967_295,
            properties: None,
        }
    }
}

pub(crate) struct Session {
    pub(crate) channel: u16,
    pub(crate) remote_channel: Option<u16>,
    pub(crate) state: SessionState,
    config: SessionConfig,
    next_outgoing_id: u32,
    initial_outgoing_id: u32,
    next_incoming_id: u32,
    incoming_window: u32,
    remote_incoming_window: u32,
    remote_outgoing_window: u32,
    links: Vec<Option<Link>>,
    names: HashMap<String, u32>,
    remote_handles: HashMap<u32, u32>,
    pub(crate) outgoing: Vec<(Performative, Option<Bytes>)>,
    pub(crate) events: Vec<Event>,
}

impl Session {
    pub(crate) fn new(channel: u16, config: SessionConfig) -> Session {
        Session {
            channel,
            remote_channel: None,
            state: SessionState::Unmapped,
            next_outgoing_id: 0,
            initial_outgoing_id: 0,
            next_incoming_id: 0,
            incoming_window: config.incoming_window,
            remote_incoming_window: 0,
            remote_outgoing_window: 0,
            config,
            links: Vec::new(),
            names: HashMap::new(),
            remote_handles: HashMap::new(),
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    pub(crate) fn is_mapped(&self) -> bool {
        self.state == SessionState::Mapped
    }

    fn make_begin(&self) -> Begin {
        Begin {
            remote_channel: self.remote_channel,
            next_outgoing_id: self.next_outgoing_id,
            incoming_window: self.incoming_window,
            outgoing_window: self.config.outgoing_window,
            handle_max: self.config.handle_max,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: self.config.properties.clone(),
        }
    }

    pub(crate) fn begin(&mut self) -> Result<()> {
        if self.state != SessionState::Unmapped {
            return Err(AmqpError::IllegalState("session already begun"));
        }
        self.initial_outgoing_id = self.next_outgoing_id;
        self.outgoing.push((Performative::Begin(self.make_begin()), None));
        self.state = SessionState::BeginSent;
        Ok(())
    }

    pub(crate) fn on_begin(&mut self, remote_channel: u16, begin: &Begin) -> Result<()> {
        self.remote_channel = Some(remote_channel);
        self.next_incoming_id = begin.next_outgoing_id;
        self.remote_incoming_window = begin.incoming_window;
        self.remote_outgoing_window = begin.outgoing_window;
        match self.state {
            SessionState::BeginSent => {
                self.state = SessionState::Mapped;
                debug!(channel = self.channel, "session mapped");
                self.events.push(Event::SessionBegun {
                    channel: self.channel,
                });
            }
            SessionState::Unmapped => {
                // Remotely initiated session: answer with our BEGIN.
                self.state = SessionState::BeginRcvd;
                self.initial_outgoing_id = self.next_outgoing_id;
                self.outgoing.push((Performative::Begin(self.make_begin()), None));
                self.state = SessionState::Mapped;
                self.events.push(Event::SessionBegun {
                    channel: self.channel,
                });
            }
            _ => return Err(AmqpError::IllegalState("begin in unexpected session state")),
        }
        Ok(())
    }

    pub(crate) fn end(&mut self, error: Option<ErrorInfo>) -> Result<()> {
        match self.state {
            SessionState::Mapped => {
                self.outgoing.push((Performative::End(End { error }), None));
                self.state = SessionState::EndSent;
                Ok(())
            }
            SessionState::EndRcvd => {
                self.outgoing.push((Performative::End(End { error }), None));
                self.finish(None);
                Ok(())
            }
            _ => Err(AmqpError::IllegalState("session is not mapped")),
        }
    }

    pub(crate) fn on_end(&mut self, end: &End) {
        let error = end.error.as_ref().map(RemoteError::from_info);
        match self.state {
            SessionState::EndSent => self.finish(error),
            _ => {
                self.outgoing.push((Performative::End(End::default()), None));
                self.finish(error);
            }
        }
    }

    fn finish(&mut self, error: Option<RemoteError>) {
        for link in self.links.iter_mut().flatten() {
            link.teardown();
        }
        self.collect_link_output();
        // Teardown frames from links must not chase a dead session.
        self.outgoing.retain(|(p, _)| {
            matches!(p, Performative::Begin(_) | Performative::End(_))
        });
        self.state = SessionState::Unmapped;
        self.events.push(Event::SessionEnded {
            channel: self.channel,
            error,
        });
    }

    /// Connection teardown: no frames, synthetic end for every dependent.
    pub(crate) fn discard(&mut self) {
        if self.state == SessionState::Unmapped {
            return;
        }
        self.state = SessionState::Discarding;
        for link in self.links.iter_mut().flatten() {
            link.teardown();
        }
        self.collect_link_output();
        self.outgoing.clear();
        self.state = SessionState::Unmapped;
        self.events.push(Event::SessionEnded {
            channel: self.channel,
            error: None,
        });
    }

    // ------------------------------------------------------------------
    // Links
    // ------------------------------------------------------------------

    pub(crate) fn attach_link(&mut self, config: LinkConfig) -> Result<u32> {
        let handle = self
            .links
            .iter()
            .position(Option::is_none)
            .unwrap_or(self.links.len()) as u32;
        if handle > self.config.handle_max {
            return Err(AmqpError::Session(RemoteError::from_info(&ErrorInfo::new(
                "amqp:resource-limit-exceeded",
                "handle-max exhausted",
            ))));
        }
        let mut link = Link::new(config, handle);
        link.attach()?;
        self.names.insert(link.config.name.clone(), handle);
        if (handle as usize) < self.links.len() {
            self.links[handle as usize] = Some(link);
        } else {
            self.links.push(Some(link));
        }
        self.collect_link_output();
        Ok(handle)
    }

    pub(crate) fn link_mut(&mut self, handle: u32) -> Result<&mut Link> {
        self.links
            .get_mut(handle as usize)
            .and_then(Option::as_mut)
            .ok_or(AmqpError::IllegalState("unknown link handle"))
    }

    fn link_by_remote(&mut self, remote_handle: u32) -> Option<&mut Link> {
        let local = *self.remote_handles.get(&remote_handle)?;
        self.links.get_mut(local as usize).and_then(Option::as_mut)
    }

    /// Queue a message payload on a sender link. Returns the delivery tag.
    pub(crate) fn send_on_link(
        &mut self,
        handle: u32,
        payload: Bytes,
        settled: bool,
        deadline: Option<Instant>,
    ) -> Result<Bytes> {
        let link = self.link_mut(handle)?;
        let tag = link.queue_send(payload, settled, deadline)?;
        Ok(tag)
    }

    pub(crate) fn settle_delivery(
        &mut self,
        handle: u32,
        delivery_id: u32,
        state: DeliveryState,
    ) -> Result<()> {
        let link = self.link_mut(handle)?;
        link.settle(delivery_id, state);
        self.collect_link_output();
        Ok(())
    }

    pub(crate) fn detach_link(&mut self, handle: u32, closed: bool) -> Result<()> {
        let link = self.link_mut(handle)?;
        link.local_detach(closed, None);
        self.collect_link_output();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    pub(crate) fn on_frame(
        &mut self,
        performative: &Performative,
        payload: &Bytes,
        strict: bool,
    ) -> Result<()> {
        match performative {
            Performative::Attach(attach) => self.on_attach(attach)?,
            Performative::Flow(flow) => self.on_flow(flow),
            Performative::Transfer(transfer) => self.on_transfer(transfer, payload, strict)?,
            Performative::Disposition(disposition) => self.on_disposition(disposition, strict)?,
            Performative::Detach(detach) => self.on_detach(detach, strict)?,
            other => {
                return Err(AmqpError::IllegalState(match other {
                    Performative::Open(_) | Performative::Close(_) => {
                        "connection frame on a session channel"
                    }
                    _ => "unexpected performative for a session",
                }))
            }
        }
        self.collect_link_output();
        Ok(())
    }

    fn on_attach(&mut self, attach: &Attach) -> Result<()> {
        let handle = match self.names.get(attach.name.as_str()) {
            Some(handle) => *handle,
            None => {
                // Unknown name: peer-initiated link, attach the
                // complementary role.
                debug!(link = %attach.name, "auto-attaching remotely initiated link");
                let role: Role = attach.role.complement();
                let mut config = if role.is_receiver() {
                    LinkConfig::receiver(attach.name.clone(), "")
                } else {
                    LinkConfig::sender(attach.name.clone(), "")
                };
                config.source = attach.source.clone();
                config.target = attach.target.clone();
                self.attach_link(config)?
            }
        };
        self.remote_handles.insert(attach.handle, handle);
        let link = self.link_mut(handle)?;
        link.on_attach(attach)?;
        if link.state == LinkState::AttachRcvd {
            link.attach()?;
        }
        Ok(())
    }

    fn on_flow(&mut self, flow: &Flow) {
        // Session-level bookkeeping first.
        let next_incoming = flow.next_incoming_id.unwrap_or(self.initial_outgoing_id);
        self.remote_incoming_window = serial_diff(
            serial_add(next_incoming, flow.incoming_window),
            self.next_outgoing_id,
        );
        self.next_incoming_id = flow.next_outgoing_id;
        self.remote_outgoing_window = flow.outgoing_window;

        match flow.handle {
            Some(remote_handle) => {
                if let Some(link) = self.link_by_remote(remote_handle) {
                    link.on_flow(flow);
                } else {
                    warn!(remote_handle, "flow for unattached handle ignored");
                }
            }
            None => {
                // Session-scoped flow: the refreshed window alone may
                // unblock queued sends; the next pump picks them up.
            }
        }
        if flow.echo {
            let reply = self.make_flow(None);
            self.outgoing.push((Performative::Flow(reply), None));
        }
    }

    fn on_transfer(&mut self, transfer: &Transfer, payload: &Bytes, strict: bool) -> Result<()> {
        if self.incoming_window == 0 {
            return Err(AmqpError::Session(RemoteError::from_info(&ErrorInfo::new(
                "amqp:session:window-violation",
                "transfer outside the incoming window",
            ))));
        }
        self.next_incoming_id = serial_add(self.next_incoming_id, 1);
        self.incoming_window -= 1;
        let link = match self.link_by_remote(transfer.handle) {
            Some(link) => link,
            None => {
                if strict {
                    return Err(AmqpError::Session(RemoteError::from_info(&ErrorInfo::new(
                        "amqp:session:unattached-handle",
                        "transfer for an unattached handle",
                    ))));
                }
                warn!(handle = transfer.handle, "transfer for unattached handle ignored");
                self.maybe_replenish_window();
                return Ok(());
            }
        };
        link.on_transfer(transfer, payload)?;
        self.maybe_replenish_window();
        Ok(())
    }

    fn maybe_replenish_window(&mut self) {
        if self.incoming_window == 0 {
            self.incoming_window = self.config.incoming_window;
            debug!(channel = self.channel, window = self.incoming_window, "incoming window refilled");
            let flow = self.make_flow(None);
            self.outgoing.push((Performative::Flow(flow), None));
        }
    }

    fn on_disposition(&mut self, disposition: &Disposition, strict: bool) -> Result<()> {
        // Dispositions address delivery ids, which are session scope:
        // every sender link checks its own unsettled map.
        if !disposition.role.is_receiver() {
            // Outcome of our inbound deliveries; nothing tracked yet.
            return Ok(());
        }
        let first = disposition.first;
        let last = disposition.last.unwrap_or(first);
        let mut touched = false;
        for link in self.links.iter_mut().flatten() {
            if link.config.role.is_receiver() {
                continue;
            }
            let before = link.notices.len();
            link.on_disposition(first, last, disposition.state.as_ref(), disposition.settled);
            touched |= link.notices.len() > before;
        }
        if !touched && strict {
            return Err(AmqpError::Session(RemoteError::from_info(&ErrorInfo::new(
                "amqp:session:unattached-handle",
                "disposition matched no delivery",
            ))));
        }
        Ok(())
    }

    fn on_detach(&mut self, detach: &Detach, strict: bool) -> Result<()> {
        match self.link_by_remote(detach.handle) {
            Some(link) => link.on_detach(detach),
            None => {
                if strict {
                    return Err(AmqpError::Session(RemoteError::from_info(&ErrorInfo::new(
                        "amqp:session:unattached-handle",
                        "detach for an unattached handle",
                    ))));
                }
                warn!(handle = detach.handle, "detach for unattached handle ignored");
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound pump
    // ------------------------------------------------------------------

    fn make_flow(&self, link_part: Option<&crate::link::FlowRequest>) -> Flow {
        Flow {
            next_incoming_id: Some(self.next_incoming_id),
            incoming_window: self.incoming_window,
            next_outgoing_id: self.next_outgoing_id,
            outgoing_window: self.config.outgoing_window,
            handle: link_part.map(|f| f.handle),
            delivery_count: link_part.map(|f| f.delivery_count),
            link_credit: link_part.map(|f| f.link_credit),
            available: None,
            drain: link_part.is_some_and(|f| f.drain),
            echo: link_part.is_some_and(|f| f.echo),
            properties: None,
        }
    }

    /// Move link-queued frames into the session queue and link notices
    /// into connection events.
    fn collect_link_output(&mut self) {
        let channel = self.channel;
        let mut flows: Vec<crate::link::FlowRequest> = Vec::new();
        for slot in self.links.iter_mut() {
            let Some(link) = slot else { continue };
            let handle = link.handle;
            for frame in link.outgoing.drain(..) {
                match frame {
                    LinkFrame::Attach(attach) => self
                        .outgoing
                        .push((Performative::Attach(attach), None)),
                    LinkFrame::Flow(request) => flows.push(request),
                    LinkFrame::Disposition(d) => {
                        self.outgoing.push((Performative::Disposition(d), None))
                    }
                    LinkFrame::Detach(d) => {
                        self.outgoing.push((Performative::Detach(d), None))
                    }
                }
            }
            for notice in link.notices.drain(..) {
                self.events.push(match notice {
                    LinkNotice::Attached => Event::LinkAttached { channel, handle },
                    LinkNotice::Detached { error } => Event::LinkDetached {
                        channel,
                        handle,
                        error,
                    },
                    LinkNotice::CreditChanged { credit } => Event::LinkFlow {
                        channel,
                        handle,
                        credit,
                    },
                    LinkNotice::Message(delivery) => Event::Message {
                        channel,
                        handle,
                        delivery,
                    },
                    LinkNotice::Resolved {
                        delivery_id,
                        outcome,
                    } => Event::DeliveryResolved {
                        channel,
                        handle,
                        delivery_id,
                        outcome,
                    },
                });
            }
        }
        for request in flows {
            let flow = self.make_flow(Some(&request));
            self.outgoing.push((Performative::Flow(flow), None));
        }
    }

    /// Drive queued sends into TRANSFER frames, bounded by session window
    /// and per-link credit. `max_payload` is the fragment budget derived
    /// from the negotiated max frame size.
    pub(crate) fn pump_transfers(&mut self, max_payload: usize) {
        if !self.is_mapped() {
            return;
        }
        loop {
            if self.remote_incoming_window == 0 {
                break;
            }
            let next_id = self.next_outgoing_id;
            let mut produced = false;
            for slot in self.links.iter_mut() {
                let Some(link) = slot else { continue };
                if !link.has_sendable() {
                    continue;
                }
                if let Some((transfer, chunk, _fresh)) = link.next_transfer(next_id, max_payload) {
                    self.outgoing
                        .push((Performative::Transfer(transfer), Some(chunk)));
                    self.next_outgoing_id = serial_add(self.next_outgoing_id, 1);
                    self.remote_incoming_window -= 1;
                    produced = true;
                    break;
                }
            }
            if !produced {
                break;
            }
        }
        self.collect_link_output();
    }

    /// Expire per-delivery deadlines across all links.
    pub(crate) fn handle_timeouts(&mut self, now: Instant) {
        for link in self.links.iter_mut().flatten() {
            link.expire_deliveries(now);
        }
        self.collect_link_output();
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.links
            .iter()
            .flatten()
            .filter_map(Link::next_deadline)
            .min()
    }

    #[cfg(test)]
    pub(crate) fn remote_incoming_window(&self) -> u32 {
        self.remote_incoming_window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DeliveryOutcome;
    use crate::link::DEFAULT_RECEIVER_CREDIT;

    fn begin_reply(session: &Session) -> Begin {
        Begin {
            remote_channel: Some(session.channel),
            next_outgoing_id: 0,
            incoming_window: 10,
            outgoing_window: 10,
            handle_max: 255,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: None,
        }
    }

    fn mapped_session() -> Session {
        let mut s = Session::new(0, SessionConfig::default());
        s.begin().unwrap();
        s.outgoing.clear();
        let reply = begin_reply(&s);
        s.on_begin(7, &reply).unwrap();
        s
    }

    fn sender_flow(handle: u32, credit: u32) -> Flow {
        Flow {
            next_incoming_id: Some(0),
            incoming_window: 10,
            next_outgoing_id: 0,
            outgoing_window: 10,
            handle: Some(handle),
            delivery_count: Some(0),
            link_credit: Some(credit),
            available: None,
            drain: false,
            echo: false,
            properties: None,
        }
    }

    fn attach_reply(name: &str, handle: u32, role: Role) -> Performative {
        Performative::Attach(Box::new(Attach {
            name: name.into(),
            handle,
            role,
            snd_settle_mode: Default::default(),
            rcv_settle_mode: Default::default(),
            source: None,
            target: None,
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count: match role {
                Role::Sender => Some(0),
                Role::Receiver => None,
            },
            max_message_size: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
            properties: None,
        }))
    }

    fn attached_sender_session() -> (Session, u32) {
        let mut s = mapped_session();
        let handle = s.attach_link(LinkConfig::sender("s-0", "queue")).unwrap();
        s.outgoing.clear();
        s.on_frame(&attach_reply("s-0", 9, Role::Receiver), &Bytes::new(), false)
            .unwrap();
        s.events.clear();
        (s, handle)
    }

    #[test]
    fn begin_handshake_maps_session() {
        let mut s = Session::new(0, SessionConfig::default());
        s.begin().unwrap();
        assert_eq!(s.state, SessionState::BeginSent);
        let reply = begin_reply(&s);
        s.on_begin(3, &reply).unwrap();
        assert!(s.is_mapped());
        assert_eq!(s.remote_channel, Some(3));
        assert_eq!(s.remote_incoming_window(), 10);
        assert_eq!(s.events, vec![Event::SessionBegun { channel: 0 }]);
    }

    #[test]
    fn transfer_pump_respects_remote_window() {
        let (mut s, handle) = attached_sender_session();
        s.on_frame(
            &Performative::Flow(sender_flow(9, 20)),
            &Bytes::new(),
            false,
        )
        .unwrap();
        for _ in 0..12 {
            s.send_on_link(handle, Bytes::from_static(b"x"), false, None)
                .unwrap();
        }
        s.outgoing.clear();
        s.pump_transfers(1024);
        // Window of 10 caps the burst even with credit 20.
        let transfers = s
            .outgoing
            .iter()
            .filter(|(p, _)| matches!(p, Performative::Transfer(_)))
            .count();
        assert_eq!(transfers, 10);
        assert_eq!(s.remote_incoming_window(), 0);
        assert_eq!(s.next_outgoing_id, 10);

        // Never drives the window negative; resumes after a FLOW.
        s.pump_transfers(1024);
        assert_eq!(s.outgoing.len(), 10);

        let mut refresh = sender_flow(9, 20);
        refresh.next_incoming_id = Some(10);
        refresh.delivery_count = Some(10);
        refresh.link_credit = Some(10);
        s.on_frame(&Performative::Flow(refresh), &Bytes::new(), false)
            .unwrap();
        s.pump_transfers(1024);
        let transfers = s
            .outgoing
            .iter()
            .filter(|(p, _)| matches!(p, Performative::Transfer(_)))
            .count();
        assert_eq!(transfers, 12);
    }

    #[test]
    fn delivery_ids_are_session_scoped_and_sequential() {
        let (mut s, handle) = attached_sender_session();
        s.on_frame(&Performative::Flow(sender_flow(9, 10)), &Bytes::new(), false)
            .unwrap();
        for _ in 0..3 {
            s.send_on_link(handle, Bytes::from_static(b"m"), false, None)
                .unwrap();
        }
        s.outgoing.clear();
        s.pump_transfers(1024);
        let ids: Vec<u32> = s
            .outgoing
            .iter()
            .filter_map(|(p, _)| match p {
                Performative::Transfer(t) => t.delivery_id,
                _ => None,
            })
            .collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn inbound_transfer_refills_window_at_zero() {
        let mut config = SessionConfig::default();
        config.incoming_window = 2;
        let mut s = Session::new(0, config);
        s.begin().unwrap();
        let reply = begin_reply(&s);
        s.on_begin(1, &reply).unwrap();
        s.attach_link(LinkConfig::receiver("r-0", "queue")).unwrap();
        s.on_frame(&attach_reply("r-0", 4, Role::Sender), &Bytes::new(), false)
            .unwrap();
        s.outgoing.clear();

        let mut body = bytes::BytesMut::new();
        amqx_codec::encode_payload(
            &amqx_codec::Message::from_data(Bytes::from_static(b"hi")),
            &mut body,
        )
        .unwrap();
        let body = body.freeze();

        for id in 0..2u32 {
            let mut t = Transfer::new(4);
            t.delivery_id = Some(id);
            t.delivery_tag = Some(Bytes::copy_from_slice(&id.to_be_bytes()));
            s.on_frame(&Performative::Transfer(t), &body, false).unwrap();
        }
        assert_eq!(s.incoming_window, 2, "window refilled at zero");
        assert!(s.outgoing.iter().any(|(p, _)| matches!(
            p,
            Performative::Flow(Flow { incoming_window: 2, .. })
        )));
        let messages = s
            .events
            .iter()
            .filter(|e| matches!(e, Event::Message { .. }))
            .count();
        assert_eq!(messages, 2);
    }

    #[test]
    fn unknown_handle_ignored_unless_strict() {
        let mut s = mapped_session();
        let mut t = Transfer::new(42);
        t.delivery_id = Some(0);
        assert!(s
            .on_frame(&Performative::Transfer(t.clone()), &Bytes::new(), false)
            .is_ok());
        let err = s
            .on_frame(&Performative::Transfer(t), &Bytes::new(), true)
            .unwrap_err();
        assert!(matches!(err, AmqpError::Session(_)));
    }

    #[test]
    fn remote_attach_auto_creates_complementary_link() {
        let mut s = mapped_session();
        s.on_frame(&attach_reply("their-sender", 0, Role::Sender), &Bytes::new(), false)
            .unwrap();
        // Our receiver answers with attach and grants credit.
        assert!(s.outgoing.iter().any(|(p, _)| matches!(
            p,
            Performative::Attach(a) if a.role.is_receiver()
        )));
        assert!(s.outgoing.iter().any(|(p, _)| matches!(
            p,
            Performative::Flow(f) if f.link_credit == Some(DEFAULT_RECEIVER_CREDIT)
        )));
    }

    #[test]
    fn end_tears_links_down_with_cancellation() {
        let (mut s, handle) = attached_sender_session();
        s.on_frame(&Performative::Flow(sender_flow(9, 5)), &Bytes::new(), false)
            .unwrap();
        s.send_on_link(handle, Bytes::from_static(b"m"), false, None)
            .unwrap();
        s.pump_transfers(1024);
        s.events.clear();

        s.on_end(&End {
            error: Some(ErrorInfo::new("amqp:session:errant-link", "bad link")),
        });
        assert!(s.events.iter().any(|e| matches!(
            e,
            Event::DeliveryResolved {
                outcome: DeliveryOutcome::Cancelled,
                ..
            }
        )));
        assert!(s.events.iter().any(|e| matches!(
            e,
            Event::SessionEnded { error: Some(_), .. }
        )));
    }
}
