//! The connection state machine.
//!
//! Sans-I/O: bytes from the transport go in through [`Connection::feed`],
//! outbound bytes drain through [`Connection::poll_transmit`], application
//! events through [`Connection::poll_event`], and timer work runs via
//! [`Connection::next_timeout`] / [`Connection::handle_timeout`]. The
//! drivers own the actual sockets and clocks.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, trace, warn};

use amqx_codec::frame::{
    encode_empty_frame, encode_frame, FrameDecoder, FrameEvent, AMQP_PROTOCOL_HEADER,
    MIN_MAX_FRAME_SIZE, SASL_PROTOCOL_HEADER,
};
use amqx_codec::performative::{
    Begin, Close, Open, Performative, SaslInit, OPEN_MAX_FRAME_SIZE_DEFAULT,
};
use amqx_codec::{DeliveryState, ErrorInfo, Message, Value};

use crate::error::{AmqpError, AuthFailure, RemoteError, Result};
use crate::event::Event;
use crate::link::LinkConfig;
use crate::sasl::SaslCredential;
use crate::session::{Session, SessionConfig};

/// Default max-frame-size this client advertises.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65_536;
/// Fraction of the remote idle timeout at which keepalives go out.
pub const DEFAULT_IDLE_SEND_RATIO: f64 = 0.5;

/// Connection endpoint states, including the pipelined-open variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Start,
    HdrRcvd,
    HdrSent,
    HdrExch,
    OpenPipe,
    OcPipe,
    OpenRcvd,
    OpenSent,
    ClosePipe,
    Opened,
    CloseRcvd,
    CloseSent,
    Discarding,
    End,
    Error,
}

/// Hooks for observing wire and state activity. All methods default to
/// no-ops; inject an implementation for recording or metrics.
pub trait ConnectionObserver: Send {
    fn on_state(&mut self, _state: ConnectionState) {}
    fn on_frame_sent(&mut self, _channel: u16, _performative: &Performative) {}
    fn on_frame_received(&mut self, _channel: u16, _performative: &Performative) {}
}

struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

#[derive(Clone)]
pub struct ConnectionConfig {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: u32,
    pub channel_max: u16,
    /// Local idle timeout; exceeded means the peer went quiet too long.
    pub idle_timeout: Option<Duration>,
    pub idle_timeout_empty_frame_send_ratio: f64,
    pub allow_pipelined_open: bool,
    /// Treat tolerable anomalies (frames for unattached channels or
    /// handles) as connection errors instead of logging and ignoring.
    pub strict: bool,
    pub properties: Option<Vec<(Value, Value)>>,
    pub offered_capabilities: Vec<Bytes>,
    pub desired_capabilities: Vec<Bytes>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            container_id: format!("amqx-{}", uuid::Uuid::new_v4()),
            hostname: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: 65_535,
            idle_timeout: None,
            idle_timeout_empty_frame_send_ratio: DEFAULT_IDLE_SEND_RATIO,
            allow_pipelined_open: true,
            strict: false,
            properties: None,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaslPhase {
    Inactive,
    HdrSent,
    InitSent,
    Done,
}

pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    decoder: FrameDecoder,
    outbound: BytesMut,
    events: VecDeque<Event>,
    sessions: HashMap<u16, Session>,
    remote_channels: HashMap<u16, u16>,
    credential: Option<Box<dyn SaslCredential>>,
    sasl_phase: SaslPhase,
    remote_max_frame_size: u32,
    channel_max: u16,
    remote_idle_timeout: Option<Duration>,
    last_received: Option<Instant>,
    last_sent: Option<Instant>,
    observer: Box<dyn ConnectionObserver>,
    terminal_error: Option<AmqpError>,
}

impl Connection {
    pub fn new(config: ConnectionConfig) -> Connection {
        let channel_max = config.channel_max;
        Connection {
            config,
            state: ConnectionState::Start,
            decoder: FrameDecoder::new(),
            outbound: BytesMut::new(),
            events: VecDeque::new(),
            sessions: HashMap::new(),
            remote_channels: HashMap::new(),
            credential: None,
            sasl_phase: SaslPhase::Inactive,
            remote_max_frame_size: OPEN_MAX_FRAME_SIZE_DEFAULT,
            channel_max,
            remote_idle_timeout: None,
            last_received: None,
            last_sent: None,
            observer: Box::new(NoopObserver),
            terminal_error: None,
        }
    }

    pub fn with_credential(mut self, credential: Box<dyn SaslCredential>) -> Connection {
        self.credential = Some(credential);
        self
    }

    pub fn with_observer(mut self, observer: Box<dyn ConnectionObserver>) -> Connection {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_opened(&self) -> bool {
        self.state == ConnectionState::Opened
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, ConnectionState::End | ConnectionState::Error)
    }

    /// The error that terminated the connection, if any.
    pub fn terminal_error(&self) -> Option<&AmqpError> {
        self.terminal_error.as_ref()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if state != self.state {
            debug!(from = ?self.state, to = ?state, "connection state");
            self.state = state;
            self.observer.on_state(state);
        }
    }

    // ------------------------------------------------------------------
    // Outbound plumbing
    // ------------------------------------------------------------------

    fn send_frame(
        &mut self,
        channel: u16,
        performative: &Performative,
        payload: Option<&[u8]>,
        now: Instant,
    ) -> Result<()> {
        trace!(channel, frame = performative.name(), "send");
        self.observer.on_frame_sent(channel, performative);
        encode_frame(channel, performative, payload, &mut self.outbound)?;
        self.last_sent = Some(now);
        Ok(())
    }

    fn send_protocol_header(&mut self, sasl: bool, now: Instant) {
        let header = if sasl {
            SASL_PROTOCOL_HEADER
        } else {
            AMQP_PROTOCOL_HEADER
        };
        self.outbound.extend_from_slice(&header);
        self.last_sent = Some(now);
    }

    fn make_open(&self) -> Open {
        let mut open = Open::new(self.config.container_id.clone());
        open.hostname = self.config.hostname.clone();
        open.max_frame_size = self.config.max_frame_size;
        open.channel_max = self.config.channel_max;
        open.idle_timeout = self
            .config
            .idle_timeout
            .map(|t| t.as_millis().min(u128::from(u32::MAX)) as u32);
        open.offered_capabilities = self.config.offered_capabilities.clone();
        open.desired_capabilities = self.config.desired_capabilities.clone();
        open.properties = self.config.properties.clone();
        open
    }

    /// Start the handshake. With a credential the SASL layer runs first;
    /// pipelined open sends OPEN without waiting for the peer's header.
    pub fn open(&mut self, now: Instant) -> Result<()> {
        if self.state != ConnectionState::Start {
            return Err(AmqpError::IllegalState("connection already started"));
        }
        self.decoder.set_max_frame_size(self.config.max_frame_size);
        if self.credential.is_some() {
            self.send_protocol_header(true, now);
            self.sasl_phase = SaslPhase::HdrSent;
            self.set_state(ConnectionState::HdrSent);
            return Ok(());
        }
        self.send_protocol_header(false, now);
        if self.config.allow_pipelined_open {
            let open = Performative::Open(self.make_open());
            self.send_frame(0, &open, None, now)?;
            self.set_state(ConnectionState::OpenPipe);
        } else {
            self.set_state(ConnectionState::HdrSent);
        }
        Ok(())
    }

    /// Locally close the connection, optionally carrying an error.
    pub fn close(&mut self, error: Option<ErrorInfo>, now: Instant) -> Result<()> {
        let close = Performative::Close(Close { error });
        match self.state {
            ConnectionState::Opened => {
                self.send_frame(0, &close, None, now)?;
                self.set_state(ConnectionState::CloseSent);
            }
            ConnectionState::OpenPipe => {
                self.send_frame(0, &close, None, now)?;
                self.set_state(ConnectionState::OcPipe);
            }
            ConnectionState::OpenSent => {
                self.send_frame(0, &close, None, now)?;
                self.set_state(ConnectionState::ClosePipe);
            }
            ConnectionState::CloseRcvd => {
                self.send_frame(0, &close, None, now)?;
                self.finish(None);
            }
            ConnectionState::End
            | ConnectionState::Error
            | ConnectionState::CloseSent
            | ConnectionState::OcPipe
            | ConnectionState::ClosePipe => {}
            _ => {
                // Closing before the handshake finished: disconnect
                // without negotiation.
                self.finish(None);
            }
        }
        Ok(())
    }

    fn close_with_error(&mut self, info: ErrorInfo, now: Instant) {
        error!(condition = %String::from_utf8_lossy(&info.condition), "closing connection");
        let remote = RemoteError::from_info(&info);
        let _ = self.close(Some(info), now);
        self.terminal_error = Some(AmqpError::from_remote(remote));
        self.set_state(ConnectionState::Discarding);
    }

    /// Terminal teardown: every session and link observes cancellation.
    fn finish(&mut self, error: Option<RemoteError>) {
        for session in self.sessions.values_mut() {
            session.discard();
        }
        self.collect_session_output_discarding();
        if let Some(remote) = &error {
            self.terminal_error = Some(AmqpError::from_remote(remote.clone()));
        }
        self.set_state(ConnectionState::End);
        self.events.push_back(Event::Closed { error });
    }

    fn collect_session_output_discarding(&mut self) {
        for session in self.sessions.values_mut() {
            session.outgoing.clear();
            for event in session.events.drain(..) {
                self.events.push_back(event);
            }
        }
    }

    /// Transport loss. No frames can flow; everything cancels.
    pub fn transport_failed(&mut self, reason: &str) {
        if self.is_ended() {
            return;
        }
        warn!(reason, "transport lost");
        self.terminal_error = Some(AmqpError::Transport(reason.to_owned()));
        self.finish(None);
        self.set_state(ConnectionState::Error);
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    fn allocate_channel(&mut self) -> Result<u16> {
        for channel in 0..=self.channel_max {
            if !self.sessions.contains_key(&channel) {
                return Ok(channel);
            }
        }
        Err(AmqpError::IllegalState("channel-max exhausted"))
    }

    /// Begin a locally initiated session. Returns its channel.
    pub fn begin_session(&mut self, config: SessionConfig) -> Result<u16> {
        if !self.is_opened() && !matches!(self.state, ConnectionState::OpenPipe | ConnectionState::OpenSent) {
            return Err(AmqpError::IllegalState("connection is not open"));
        }
        let channel = self.allocate_channel()?;
        let mut session = Session::new(channel, config);
        session.begin()?;
        self.sessions.insert(channel, session);
        Ok(channel)
    }

    pub fn end_session(&mut self, channel: u16, error: Option<ErrorInfo>) -> Result<()> {
        self.session_mut(channel)?.end(error)
    }

    fn session_mut(&mut self, channel: u16) -> Result<&mut Session> {
        self.sessions
            .get_mut(&channel)
            .ok_or(AmqpError::IllegalState("unknown session channel"))
    }

    pub fn attach_link(&mut self, channel: u16, config: LinkConfig) -> Result<u32> {
        self.session_mut(channel)?.attach_link(config)
    }

    pub fn detach_link(&mut self, channel: u16, handle: u32, closed: bool) -> Result<()> {
        self.session_mut(channel)?.detach_link(handle, closed)
    }

    /// Queue a message for send. Returns the delivery tag; resolution
    /// arrives later as [`Event::DeliveryResolved`].
    pub fn send_message(
        &mut self,
        channel: u16,
        handle: u32,
        message: &Message,
        settled: bool,
        deadline: Option<Instant>,
    ) -> Result<Bytes> {
        let mut payload = BytesMut::new();
        amqx_codec::encode_payload(message, &mut payload)?;
        self.session_mut(channel)?
            .send_on_link(handle, payload.freeze(), settled, deadline)
    }

    /// Settle an inbound delivery with a disposition.
    pub fn settle_delivery(
        &mut self,
        channel: u16,
        handle: u32,
        delivery_id: u32,
        state: DeliveryState,
    ) -> Result<()> {
        self.session_mut(channel)?
            .settle_delivery(handle, delivery_id, state)
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Ingest transport bytes, advancing the state machine.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Result<()> {
        self.decoder.feed(data);
        loop {
            let event = match self.decoder.poll() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(err) => {
                    let info = ErrorInfo::new(
                        if err.is_incomplete() {
                            "amqp:connection:framing-error"
                        } else {
                            "amqp:decode-error"
                        },
                        "could not decode incoming frame",
                    );
                    self.close_with_error(info, now);
                    return Err(AmqpError::Codec(err));
                }
            };
            self.last_received = Some(now);
            self.handle_wire_event(event, now)?;
        }
        Ok(())
    }

    fn handle_wire_event(&mut self, event: FrameEvent, now: Instant) -> Result<()> {
        match event {
            FrameEvent::ProtocolHeader { sasl } => self.on_protocol_header(sasl, now),
            FrameEvent::Empty { .. } => {
                trace!("empty frame received");
                Ok(())
            }
            FrameEvent::Frame {
                channel,
                performative,
                payload,
                ..
            } => {
                trace!(channel, frame = performative.name(), "recv");
                self.observer.on_frame_received(channel, &performative);
                self.dispatch_frame(channel, performative, payload, now)
            }
        }
    }

    fn on_protocol_header(&mut self, sasl: bool, now: Instant) -> Result<()> {
        if sasl {
            if self.sasl_phase != SaslPhase::HdrSent {
                self.close_with_error(
                    ErrorInfo::new("amqp:not-allowed", "unexpected SASL header"),
                    now,
                );
                return Err(AmqpError::IllegalState("unexpected SASL header"));
            }
            // Mechanisms frame comes next on the SASL layer.
            return Ok(());
        }
        match self.state {
            ConnectionState::HdrSent => {
                self.set_state(ConnectionState::HdrExch);
                let open = Performative::Open(self.make_open());
                self.send_frame(0, &open, None, now)?;
                self.set_state(ConnectionState::OpenSent);
                Ok(())
            }
            ConnectionState::OpenPipe => {
                self.set_state(ConnectionState::OpenSent);
                Ok(())
            }
            ConnectionState::OcPipe => {
                self.set_state(ConnectionState::ClosePipe);
                Ok(())
            }
            ConnectionState::Start => {
                // Peer spoke first.
                self.set_state(ConnectionState::HdrRcvd);
                self.send_protocol_header(false, now);
                self.set_state(ConnectionState::HdrExch);
                Ok(())
            }
            _ => {
                self.close_with_error(
                    ErrorInfo::new("amqp:connection:framing-error", "unexpected protocol header"),
                    now,
                );
                Err(AmqpError::IllegalState("unexpected protocol header"))
            }
        }
    }

    fn dispatch_frame(
        &mut self,
        channel: u16,
        performative: Performative,
        payload: Bytes,
        now: Instant,
    ) -> Result<()> {
        match performative {
            Performative::SaslMechanisms(m) => self.on_sasl_mechanisms(&m.mechanisms, now),
            Performative::SaslChallenge(_) => {
                let failure = AuthFailure {
                    status_code: None,
                    description: Some("challenge-based SASL mechanisms not supported".into()),
                };
                self.terminal_error = Some(AmqpError::Auth(failure.clone()));
                self.finish(None);
                Err(AmqpError::Auth(failure))
            }
            Performative::SaslOutcome(outcome) => self.on_sasl_outcome(outcome.code, now),
            Performative::SaslInit(_) | Performative::SaslResponse(_) => {
                Err(AmqpError::IllegalState("server-side SASL frame received"))
            }
            Performative::Open(open) => self.on_open(&open, now),
            Performative::Close(close) => self.on_close(&close, now),
            Performative::Begin(begin) => self.on_begin(channel, &begin, now),
            other => self.route_to_session(channel, other, payload, now),
        }
    }

    fn on_sasl_mechanisms(&mut self, offered: &[Bytes], now: Instant) -> Result<()> {
        let credential = match &self.credential {
            Some(credential) => credential,
            None => return Err(AmqpError::IllegalState("SASL mechanisms without credential")),
        };
        let wanted = credential.mechanism();
        if !offered.iter().any(|m| m.as_ref() == wanted) {
            let failure = AuthFailure {
                status_code: None,
                description: Some(format!(
                    "mechanism {} not offered by peer",
                    String::from_utf8_lossy(wanted)
                )),
            };
            self.terminal_error = Some(AmqpError::Auth(failure.clone()));
            self.finish(None);
            return Err(AmqpError::Auth(failure));
        }
        let init = Performative::SaslInit(SaslInit {
            mechanism: Bytes::copy_from_slice(wanted),
            initial_response: Some(credential.initial_response()),
            hostname: self.config.hostname.clone(),
        });
        self.send_frame(0, &init, None, now)?;
        self.sasl_phase = SaslPhase::InitSent;
        Ok(())
    }

    fn on_sasl_outcome(&mut self, code: u8, now: Instant) -> Result<()> {
        if self.sasl_phase != SaslPhase::InitSent {
            return Err(AmqpError::IllegalState("sasl outcome before init"));
        }
        if code != 0 {
            let failure = AuthFailure {
                status_code: Some(i32::from(code)),
                description: Some("sasl negotiation rejected".into()),
            };
            self.terminal_error = Some(AmqpError::Auth(failure.clone()));
            self.finish(None);
            return Err(AmqpError::Auth(failure));
        }
        debug!("sasl negotiation complete");
        self.sasl_phase = SaslPhase::Done;
        // The wire restarts at the AMQP layer.
        self.decoder.expect_protocol_header();
        self.send_protocol_header(false, now);
        if self.config.allow_pipelined_open {
            let open = Performative::Open(self.make_open());
            self.send_frame(0, &open, None, now)?;
            self.set_state(ConnectionState::OpenPipe);
        } else {
            self.set_state(ConnectionState::HdrSent);
        }
        Ok(())
    }

    fn on_open(&mut self, open: &Open, now: Instant) -> Result<()> {
        if open.max_frame_size < MIN_MAX_FRAME_SIZE {
            self.close_with_error(
                ErrorInfo::new(
                    "amqp:invalid-field",
                    "max-frame-size below the protocol minimum of 512",
                ),
                now,
            );
            return Ok(());
        }
        self.remote_max_frame_size = open.max_frame_size;
        self.channel_max = self.config.channel_max.min(open.channel_max);
        self.remote_idle_timeout = open
            .idle_timeout
            .filter(|ms| *ms > 0)
            .map(|ms| Duration::from_millis(u64::from(ms)));
        match self.state {
            ConnectionState::OpenSent | ConnectionState::ClosePipe => {
                if self.state == ConnectionState::ClosePipe {
                    self.set_state(ConnectionState::CloseSent);
                } else {
                    self.set_state(ConnectionState::Opened);
                    self.events.push_back(Event::Opened);
                }
                Ok(())
            }
            ConnectionState::HdrExch => {
                // Peer opened first; answer and settle into Opened.
                self.set_state(ConnectionState::OpenRcvd);
                let reply = Performative::Open(self.make_open());
                self.send_frame(0, &reply, None, now)?;
                self.set_state(ConnectionState::Opened);
                self.events.push_back(Event::Opened);
                Ok(())
            }
            _ => {
                self.close_with_error(
                    ErrorInfo::new("amqp:illegal-state", "OPEN in unexpected state"),
                    now,
                );
                Ok(())
            }
        }
    }

    fn on_close(&mut self, close: &Close, now: Instant) -> Result<()> {
        let error = close.error.as_ref().map(RemoteError::from_info);
        match self.state {
            ConnectionState::Opened => {
                let reply = Performative::Close(Close::default());
                self.set_state(ConnectionState::CloseRcvd);
                self.send_frame(0, &reply, None, now)?;
                self.finish(error);
            }
            ConnectionState::CloseSent | ConnectionState::Discarding => {
                self.finish(error);
            }
            _ => {
                // CLOSE mid-handshake: drop everything without negotiating.
                debug!("close received before open completed");
                self.finish(error);
            }
        }
        Ok(())
    }

    fn on_begin(&mut self, remote_channel: u16, begin: &Begin, now: Instant) -> Result<()> {
        let local = match begin.remote_channel {
            Some(local) => local,
            None => {
                // Remotely initiated session.
                let channel = self.allocate_channel()?;
                self.sessions
                    .insert(channel, Session::new(channel, SessionConfig::default()));
                channel
            }
        };
        self.remote_channels.insert(remote_channel, local);
        match self.sessions.get_mut(&local) {
            Some(session) => session.on_begin(remote_channel, begin)?,
            None => {
                return self.channel_anomaly(local, "begin pairs to no local session", now);
            }
        }
        self.drain_session(local, now);
        Ok(())
    }

    fn route_to_session(
        &mut self,
        remote_channel: u16,
        performative: Performative,
        payload: Bytes,
        now: Instant,
    ) -> Result<()> {
        let local = match self.remote_channels.get(&remote_channel) {
            Some(local) => *local,
            None => {
                return self.channel_anomaly(remote_channel, "frame for unattached channel", now);
            }
        };
        let strict = self.config.strict;
        let ended = {
            let session = match self.sessions.get_mut(&local) {
                Some(session) => session,
                None => {
                    return self.channel_anomaly(remote_channel, "frame for unattached channel", now);
                }
            };
            if let Performative::End(end) = &performative {
                session.on_end(end);
                true
            } else {
                session.on_frame(&performative, &payload, strict)?;
                false
            }
        };
        self.drain_session(local, now);
        if ended {
            self.remote_channels.retain(|_, l| *l != local);
            self.sessions.remove(&local);
        }
        Ok(())
    }

    fn channel_anomaly(&mut self, channel: u16, what: &'static str, now: Instant) -> Result<()> {
        if self.config.strict {
            self.close_with_error(ErrorInfo::new("amqp:not-allowed", what), now);
            return Err(AmqpError::IllegalState(what));
        }
        warn!(channel, what, "ignored");
        Ok(())
    }

    /// Move a session's queued frames into the outbound byte stream.
    fn drain_session(&mut self, channel: u16, now: Instant) {
        let Some(session) = self.sessions.get_mut(&channel) else {
            return;
        };
        let frames: Vec<_> = session.outgoing.drain(..).collect();
        let events: Vec<_> = session.events.drain(..).collect();
        for event in events {
            self.events.push_back(event);
        }
        for (performative, payload) in frames {
            if let Err(err) = self.send_frame(channel, &performative, payload.as_deref(), now) {
                error!(%err, "failed to encode outbound frame");
                self.terminal_error = Some(err);
                self.finish(None);
                return;
            }
        }
    }

    /// Fragment budget for TRANSFER payload bytes, leaving room for the
    /// frame header and performative body.
    fn max_transfer_payload(&self) -> usize {
        let frame = self.remote_max_frame_size.min(1 << 20) as usize;
        frame.saturating_sub(256).max(256)
    }

    // ------------------------------------------------------------------
    // Polling
    // ------------------------------------------------------------------

    /// Drain outbound bytes into `buf`. Runs the transfer pump first so
    /// newly unblocked sends ride along. Returns the number of bytes moved.
    pub fn poll_transmit(&mut self, buf: &mut BytesMut, now: Instant) -> usize {
        let channels: Vec<u16> = self.sessions.keys().copied().collect();
        let budget = self.max_transfer_payload();
        for channel in channels {
            if let Some(session) = self.sessions.get_mut(&channel) {
                session.pump_transfers(budget);
            }
            self.drain_session(channel, now);
        }
        if self.outbound.is_empty() {
            return 0;
        }
        let drained = self.outbound.split();
        buf.extend_from_slice(&drained);
        drained.len()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    fn keepalive_deadline(&self) -> Option<Instant> {
        let remote = self.remote_idle_timeout?;
        let last = self.last_sent?;
        let ratio = self.config.idle_timeout_empty_frame_send_ratio;
        Some(last + remote.mul_f64(ratio.clamp(0.1, 1.0)))
    }

    fn local_idle_deadline(&self) -> Option<Instant> {
        let timeout = self.config.idle_timeout?;
        let last = self.last_received?;
        Some(last + timeout)
    }

    /// Earliest instant at which [`handle_timeout`](Self::handle_timeout)
    /// has work to do.
    pub fn next_timeout(&self, _now: Instant) -> Option<Instant> {
        if !self.is_opened() {
            return None;
        }
        let mut deadline = self.keepalive_deadline();
        for candidate in [
            self.local_idle_deadline(),
            self.sessions.values().filter_map(Session::next_deadline).min(),
        ] {
            deadline = match (deadline, candidate) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }
        deadline
    }

    /// Evaluate timers: keepalive emission, local idle enforcement,
    /// per-delivery deadlines.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if !self.is_opened() {
            return Ok(());
        }
        if let Some(deadline) = self.local_idle_deadline() {
            if now >= deadline {
                self.close_with_error(
                    ErrorInfo::new(
                        "amqp:connection:framing-error",
                        "no frames received within the local idle timeout",
                    ),
                    now,
                );
                return Err(AmqpError::Timeout);
            }
        }
        if let Some(deadline) = self.keepalive_deadline() {
            if now >= deadline {
                trace!("sending keepalive");
                encode_empty_frame(&mut self.outbound);
                self.last_sent = Some(now);
            }
        }
        let channels: Vec<u16> = self.sessions.keys().copied().collect();
        for channel in channels {
            if let Some(session) = self.sessions.get_mut(&channel) {
                session.handle_timeouts(now);
            }
            self.drain_session(channel, now);
        }
        Ok(())
    }
}
