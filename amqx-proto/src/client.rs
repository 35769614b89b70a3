//! Blocking client facade.
//!
//! Wraps a [`Driver`] with call-and-wait operations: open, attach, send,
//! receive, management requests. CBS authentication runs automatically when
//! a token source is configured; pump iterations renew the token inside its
//! refresh window.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;

use amqx_codec::{DeliveryState, Message};

use crate::cbs::{AuthState, CbsAuth, TokenSource};
use crate::connection::{Connection, ConnectionConfig};
use crate::driver::Driver;
use crate::error::{AmqpError, Result};
use crate::event::{DeliveryOutcome, Event};
use crate::link::LinkConfig;
use crate::mgmt::{ManagementLink, MgmtCompletion};
use crate::sasl::SaslCredential;
use crate::session::SessionConfig;
use crate::transport::Transport;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);
const PUMP_SLICE: Duration = Duration::from_millis(20);

pub struct ClientConfig {
    pub connection: ConnectionConfig,
    pub session: SessionConfig,
    pub credential: Option<Box<dyn SaslCredential>>,
    /// `(audience, source)`; when set, `$cbs` links attach after OPEN and
    /// the token is put before `open()` returns.
    pub token_source: Option<(String, Box<dyn TokenSource>)>,
    pub operation_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            connection: ConnectionConfig::default(),
            session: SessionConfig::default(),
            credential: None,
            token_source: None,
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }
}

pub struct Client<T: Transport> {
    driver: Driver<T>,
    session_config: SessionConfig,
    channel: Option<u16>,
    backlog: VecDeque<Event>,
    cbs: Option<CbsAuth>,
    mgmt: Option<ManagementLink>,
    mgmt_results: HashMap<u64, MgmtCompletion>,
    operation_timeout: Duration,
}

fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Client<T> {
        let mut connection = Connection::new(config.connection);
        if let Some(credential) = config.credential {
            connection = connection.with_credential(credential);
        }
        let cbs = config
            .token_source
            .map(|(audience, source)| CbsAuth::new(audience, source, 0));
        Client {
            driver: Driver::new(connection, transport),
            session_config: config.session,
            channel: None,
            backlog: VecDeque::new(),
            cbs,
            mgmt: None,
            mgmt_results: HashMap::new(),
            operation_timeout: config.operation_timeout,
        }
    }

    pub fn channel(&self) -> Option<u16> {
        self.channel
    }

    /// Pop an event gathered while waiting for something else.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.backlog.pop_front()
    }

    /// One pump iteration plus CBS/management housekeeping. Events that
    /// satisfy `take` are returned; the rest land in the backlog.
    fn pump(&mut self, take: &mut dyn FnMut(&Event) -> bool) -> Result<Option<Event>> {
        // Deferred events first.
        if let Some(index) = self.backlog.iter().position(|e| take(e)) {
            return Ok(self.backlog.remove(index));
        }
        let events = self.driver.do_work(PUMP_SLICE)?;
        let now = Instant::now();
        let mut taken = None;
        for event in events {
            if let Some(cbs) = self.cbs.as_mut() {
                if cbs.on_event(&event) {
                    continue;
                }
            }
            if let Some(mgmt) = self.mgmt.as_mut() {
                if mgmt.owns_event(&event) {
                    if let Some((id, completion)) = mgmt.on_event(&event) {
                        self.mgmt_results.insert(id, completion);
                    }
                    continue;
                }
            }
            if taken.is_none() && take(&event) {
                taken = Some(event);
            } else {
                self.backlog.push_back(event);
            }
        }
        if let Some(mgmt) = self.mgmt.as_mut() {
            for (id, completion) in mgmt.handle_timeouts(now) {
                self.mgmt_results.insert(id, completion);
            }
        }
        if let Some(cbs) = self.cbs.as_mut() {
            cbs.handle_timeouts(now);
            if cbs.is_ready() {
                match cbs.handle_token(epoch_now()) {
                    Ok(AuthState::RefreshRequired) => {
                        debug!("renewing security token");
                        self.driver
                            .with_connection(|conn| cbs.update_token(conn, epoch_now(), now))??;
                    }
                    Ok(_) => {}
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(taken)
    }

    fn wait_for(
        &mut self,
        deadline: Instant,
        mut take: impl FnMut(&Event) -> bool,
    ) -> Result<Event> {
        loop {
            if let Some(event) = self.pump(&mut take)? {
                return Ok(event);
            }
            if Instant::now() >= deadline {
                return Err(AmqpError::Timeout);
            }
        }
    }

    /// Open the connection and the default session, running SASL and CBS
    /// as configured.
    pub fn open(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.operation_timeout;
        self.driver
            .with_connection(|conn| conn.open(Instant::now()))??;
        self.wait_for(deadline, |e| matches!(e, Event::Opened))?;

        let channel = self
            .driver
            .with_connection(|conn| conn.begin_session(self.session_config.clone()))??;
        self.channel = Some(channel);
        self.wait_for(
            deadline,
            |e| matches!(e, Event::SessionBegun { channel: c } if *c == channel),
        )?;

        if let Some(cbs) = self.cbs.as_mut() {
            self.driver.with_connection(|conn| cbs.attach(conn))??;
        }
        if self.cbs.is_some() {
            self.authenticate(deadline)?;
        }
        Ok(())
    }

    fn authenticate(&mut self, deadline: Instant) -> Result<()> {
        // Wait for both $cbs links, put the token, wait for acceptance.
        loop {
            self.pump(&mut |_| false)?;
            if self.cbs.as_ref().is_some_and(CbsAuth::is_ready) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(AmqpError::Timeout);
            }
        }
        if let Some(cbs) = self.cbs.as_mut() {
            self.driver
                .with_connection(|conn| cbs.update_token(conn, epoch_now(), Instant::now()))??;
        }
        loop {
            self.pump(&mut |_| false)?;
            match self.cbs.as_mut().map(|c| c.handle_token(epoch_now())) {
                Some(Ok(AuthState::Ok)) => return Ok(()),
                Some(Err(err)) => return Err(err),
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(AmqpError::Timeout);
            }
        }
    }

    fn require_channel(&self) -> Result<u16> {
        self.channel
            .ok_or(AmqpError::IllegalState("client is not open"))
    }

    /// Attach a sender link to `address`. Blocks until the peer answers.
    pub fn attach_sender(&mut self, name: &str, address: &str) -> Result<u32> {
        self.attach(LinkConfig::sender(name, address))
    }

    /// Attach a receiver link to `address`. Blocks until the peer answers;
    /// initial credit goes out with the attach.
    pub fn attach_receiver(&mut self, name: &str, address: &str) -> Result<u32> {
        self.attach(LinkConfig::receiver(name, address))
    }

    fn attach(&mut self, config: LinkConfig) -> Result<u32> {
        let channel = self.require_channel()?;
        let deadline = Instant::now() + self.operation_timeout;
        let handle = self
            .driver
            .with_connection(|conn| conn.attach_link(channel, config))??;
        self.wait_for(
            deadline,
            |e| matches!(e, Event::LinkAttached { channel: c, handle: h } if *c == channel && *h == handle),
        )?;
        Ok(handle)
    }

    /// Send one message and wait for its terminal outcome.
    pub fn send_message(&mut self, handle: u32, message: &Message) -> Result<DeliveryOutcome> {
        let channel = self.require_channel()?;
        let deadline = Instant::now() + self.operation_timeout;
        self.driver.with_connection(|conn| {
            conn.send_message(channel, handle, message, false, Some(deadline))
        })??;
        let event = self.wait_for(
            deadline,
            |e| matches!(e, Event::DeliveryResolved { channel: c, handle: h, .. } if *c == channel && *h == handle),
        )?;
        match event {
            Event::DeliveryResolved { outcome, .. } => Ok(outcome),
            _ => Err(AmqpError::IllegalState("unexpected event")),
        }
    }

    /// Receive up to `max` messages, accepting each, until `timeout`
    /// elapses. Returns whatever arrived in time.
    pub fn receive_message_batch(&mut self, handle: u32, max: usize, timeout: Duration) -> Result<Vec<Message>> {
        let channel = self.require_channel()?;
        let deadline = Instant::now() + timeout;
        let mut batch = Vec::new();
        while batch.len() < max {
            let event = match self.wait_for(
                deadline,
                |e| matches!(e, Event::Message { channel: c, handle: h, .. } if *c == channel && *h == handle),
            ) {
                Ok(event) => event,
                Err(AmqpError::Timeout) => break,
                Err(err) => return Err(err),
            };
            let Event::Message { delivery, .. } = event else {
                continue;
            };
            if !delivery.settled {
                self.driver.with_connection(|conn| {
                    conn.settle_delivery(channel, handle, delivery.delivery_id, DeliveryState::ACCEPTED)
                })??;
            }
            batch.push(delivery.message);
        }
        Ok(batch)
    }

    /// Execute a management request against `node` and return the 2xx
    /// response message.
    pub fn mgmt_request(
        &mut self,
        node: &str,
        message: Message,
        operation: &str,
        operation_type: Option<&str>,
    ) -> Result<Message> {
        let channel = self.require_channel()?;
        let deadline = Instant::now() + self.operation_timeout;
        if self.mgmt.as_ref().is_none_or(|m| m.node() != node) {
            let mut mgmt = ManagementLink::new(node, channel);
            self.driver.with_connection(|conn| mgmt.attach(conn))??;
            self.mgmt = Some(mgmt);
        }
        loop {
            self.pump(&mut |_| false)?;
            if self.mgmt.as_ref().is_some_and(ManagementLink::is_ready) {
                break;
            }
            if Instant::now() >= deadline {
                return Err(AmqpError::Timeout);
            }
        }
        let mgmt = self
            .mgmt
            .as_mut()
            .ok_or(AmqpError::IllegalState("management link missing"))?;
        let id = self.driver.with_connection(|conn| {
            mgmt.execute_operation(conn, message, operation, operation_type, Some(deadline))
        })??;
        loop {
            self.pump(&mut |_| false)?;
            if let Some(completion) = self.mgmt_results.remove(&id) {
                return match completion {
                    MgmtCompletion::Response(response) => response.into_result(),
                    MgmtCompletion::Timeout => Err(AmqpError::Timeout),
                };
            }
            if Instant::now() >= deadline {
                return Err(AmqpError::Timeout);
            }
        }
    }

    /// Close the connection and wait for the peer's CLOSE.
    pub fn close(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.operation_timeout;
        self.driver
            .with_connection(|conn| conn.close(None, Instant::now()))??;
        match self.wait_for(deadline, |e| matches!(e, Event::Closed { .. })) {
            Ok(_) | Err(AmqpError::Timeout) => Ok(()),
            Err(err) => Err(err),
        }
    }
}
