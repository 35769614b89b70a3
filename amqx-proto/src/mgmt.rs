//! Request/response over a paired link: the AMQP management pattern.
//!
//! One sender and one receiver link share a node address. Requests carry a
//! strictly incrementing message-id; responses correlate back through
//! `correlation-id` and report their result in `status-code` /
//! `status-description` application properties.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use amqx_codec::{Body, Message, Properties, Value};

use crate::connection::Connection;
use crate::error::{AmqpError, Result};
use crate::event::Event;
use crate::link::LinkConfig;

/// A correlated management response with its status decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MgmtResponse {
    pub status_code: i32,
    pub status_description: Option<String>,
    pub message: Message,
}

impl MgmtResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status_code)
    }

    /// Unwrap a 2xx response or turn the status into an error.
    pub fn into_result(self) -> Result<Message> {
        if self.is_ok() {
            Ok(self.message)
        } else {
            Err(AmqpError::Management {
                status_code: self.status_code,
                description: self.status_description,
            })
        }
    }
}

/// What became of an outstanding request.
#[derive(Debug, Clone, PartialEq)]
pub enum MgmtCompletion {
    Response(MgmtResponse),
    /// The per-request deadline passed; the pending entry is gone.
    Timeout,
}

struct PendingRequest {
    deadline: Option<Instant>,
}

/// Paired sender/receiver on a management node.
pub struct ManagementLink {
    node: String,
    channel: u16,
    request_handle: Option<u32>,
    response_handle: Option<u32>,
    attached: u32,
    next_message_id: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl ManagementLink {
    pub fn new(node: impl Into<String>, channel: u16) -> ManagementLink {
        ManagementLink {
            node: node.into(),
            channel,
            request_handle: None,
            response_handle: None,
            attached: 0,
            next_message_id: 0,
            pending: HashMap::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    /// Attach both halves. Completion surfaces through
    /// [`on_event`](Self::on_event) as the peer's ATTACH frames arrive.
    pub fn attach(&mut self, conn: &mut Connection) -> Result<()> {
        let sender = LinkConfig::sender(format!("mgmt-request-{}", self.node), self.node.clone());
        let receiver =
            LinkConfig::receiver(format!("mgmt-response-{}", self.node), self.node.clone());
        self.request_handle = Some(conn.attach_link(self.channel, sender)?);
        self.response_handle = Some(conn.attach_link(self.channel, receiver)?);
        Ok(())
    }

    /// Both links attached and ready to carry requests.
    pub fn is_ready(&self) -> bool {
        self.attached >= 2
    }

    /// Send a management request. The message-id is assigned here, never
    /// reused while the request is outstanding, and returned for
    /// correlation.
    pub fn execute_operation(
        &mut self,
        conn: &mut Connection,
        mut message: Message,
        operation: &str,
        operation_type: Option<&str>,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        let handle = self
            .request_handle
            .ok_or(AmqpError::IllegalState("management link not attached"))?;
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        let properties = message.properties.get_or_insert_with(Properties::default);
        properties.message_id = Some(Value::Ulong(message_id));
        let app = message.application_properties.get_or_insert_with(Vec::new);
        app.push((Value::string("operation"), Value::string(operation)));
        if let Some(t) = operation_type {
            app.push((Value::string("type"), Value::string(t)));
        }

        debug!(node = %self.node, message_id, operation, "management request");
        conn.send_message(self.channel, handle, &message, true, None)?;
        self.pending.insert(message_id, PendingRequest { deadline });
        Ok(message_id)
    }

    fn status_of(message: &Message) -> (Option<i32>, Option<String>) {
        let code = message
            .application_property(b"status-code")
            .or_else(|| message.application_property(b"statusCode"))
            .and_then(as_i32);
        let description = message
            .application_property(b"status-description")
            .or_else(|| message.application_property(b"statusDescription"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                _ => None,
            });
        (code, description)
    }

    /// Inspect a connection event. Returns `Some((message_id, completion))`
    /// when it completes one of this link's requests; management-internal
    /// events are consumed silently (`Some` with no completion is never
    /// used, unrelated events return `None`).
    pub fn on_event(&mut self, event: &Event) -> Option<(u64, MgmtCompletion)> {
        match event {
            Event::LinkAttached { channel, handle }
                if *channel == self.channel
                    && (Some(*handle) == self.request_handle
                        || Some(*handle) == self.response_handle) =>
            {
                self.attached += 1;
                None
            }
            Event::Message {
                channel,
                handle,
                delivery,
            } if *channel == self.channel && Some(*handle) == self.response_handle => {
                let correlation = delivery
                    .message
                    .properties
                    .as_ref()
                    .and_then(|p| p.correlation_id.as_ref())
                    .and_then(as_u64);
                let Some(message_id) = correlation else {
                    warn!(node = %self.node, "management response without correlation-id");
                    return None;
                };
                if self.pending.remove(&message_id).is_none() {
                    warn!(node = %self.node, message_id, "uncorrelated management response");
                    return None;
                }
                let (code, description) = Self::status_of(&delivery.message);
                let Some(status_code) = code else {
                    warn!(node = %self.node, message_id, "management response without status");
                    return Some((
                        message_id,
                        MgmtCompletion::Response(MgmtResponse {
                            status_code: 500,
                            status_description: Some("response carried no status".into()),
                            message: delivery.message.clone(),
                        }),
                    ));
                };
                Some((
                    message_id,
                    MgmtCompletion::Response(MgmtResponse {
                        status_code,
                        status_description: description,
                        message: delivery.message.clone(),
                    }),
                ))
            }
            _ => None,
        }
    }

    /// True when the event addresses one of this pair's links.
    pub fn owns_event(&self, event: &Event) -> bool {
        let (channel, handle) = match event {
            Event::LinkAttached { channel, handle }
            | Event::LinkDetached { channel, handle, .. }
            | Event::LinkFlow { channel, handle, .. }
            | Event::Message { channel, handle, .. }
            | Event::DeliveryResolved { channel, handle, .. } => (*channel, *handle),
            _ => return false,
        };
        channel == self.channel
            && (Some(handle) == self.request_handle || Some(handle) == self.response_handle)
    }

    /// Expire overdue requests, purging their pending entries.
    pub fn handle_timeouts(&mut self, now: Instant) -> Vec<(u64, MgmtCompletion)> {
        let overdue: Vec<u64> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline.is_some_and(|d| now >= d))
            .map(|(id, _)| *id)
            .collect();
        overdue
            .into_iter()
            .map(|id| {
                self.pending.remove(&id);
                warn!(node = %self.node, message_id = id, "management request timed out");
                (id, MgmtCompletion::Timeout)
            })
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().filter_map(|p| p.deadline).min()
    }

    #[cfg(test)]
    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub(crate) fn test_pending(&mut self, message_id: u64, deadline: Option<Instant>) {
        self.next_message_id = self.next_message_id.max(message_id + 1);
        self.pending.insert(message_id, PendingRequest { deadline });
    }

    #[cfg(test)]
    pub(crate) fn test_handles(&mut self, request: u32, response: u32) {
        self.request_handle = Some(request);
        self.response_handle = Some(response);
        self.attached = 2;
    }
}

fn as_i32(value: &Value) -> Option<i32> {
    match value {
        Value::Int(v) => Some(*v),
        Value::Uint(v) => i32::try_from(*v).ok(),
        Value::Long(v) => i32::try_from(*v).ok(),
        Value::Ulong(v) => i32::try_from(*v).ok(),
        Value::Short(v) => Some(i32::from(*v)),
        Value::Ushort(v) => Some(i32::from(*v)),
        Value::Ubyte(v) => Some(i32::from(*v)),
        Value::Byte(v) => Some(i32::from(*v)),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Ulong(v) => Some(*v),
        Value::Uint(v) => Some(u64::from(*v)),
        Value::Long(v) => u64::try_from(*v).ok(),
        Value::Int(v) => u64::try_from(*v).ok(),
        _ => None,
    }
}
