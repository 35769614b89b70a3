//! amqx-proto: AMQP 1.0 Client Protocol Engine
//!
//! Connection, session and link state machines over the `amqx-codec` wire
//! layer, plus SASL startup, CBS token auth, the management request
//! pattern, and blocking/async drivers.
//!
//! # Architecture
//!
//! - **Sans-I/O core**: [`Connection`] consumes bytes via `feed`, emits
//!   bytes via `poll_transmit` and application [`Event`]s via `poll_event`;
//!   it never touches a socket or a clock of its own
//! - **Layered endpoints**: links queue frames and notices into their
//!   session, sessions queue into the connection; delivery ids are assigned
//!   only in the session transfer pump
//! - **Drivers**: [`driver::Driver`] (blocking [`Transport`]) and
//!   [`driver::AsyncDriver`] (tokio streams) run the same iteration over
//!   the shared core
//!
//! # Module Organization
//!
//! - `serial`: RFC 1982 serial arithmetic for ids, counts and windows
//! - `error`: condition taxonomy and the client error type
//! - `event`: application-facing events and delivery outcomes
//! - `transport`: blocking byte-stream seam and the in-memory test pair
//! - `sasl`: SASL credentials (PLAIN, ANONYMOUS)
//! - `link` / `session` / `connection`: the protocol endpoints
//! - `mgmt`: correlated request/response over a paired link
//! - `cbs`: claims-based security token put and renewal
//! - `driver` / `client`: work loops and the blocking facade

#![forbid(unsafe_code)]

pub mod cbs;
pub mod client;
pub mod connection;
pub mod driver;
pub mod error;
pub mod event;
pub mod link;
pub mod mgmt;
pub mod sasl;
pub mod serial;
pub mod session;
pub mod transport;

pub use cbs::{AccessToken, AuthState, CbsAuth, TokenSource};
pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionConfig, ConnectionObserver, ConnectionState};
pub use error::{AmqpError, AuthFailure, ErrorCondition, RedirectInfo, RemoteError, Result};
pub use event::{Delivery, DeliveryOutcome, Event};
pub use link::LinkConfig;
pub use mgmt::{ManagementLink, MgmtResponse};
pub use sasl::{AnonymousCredential, PlainCredential, SaslCredential};
pub use session::SessionConfig;
pub use transport::{memory_pair, MemoryTransport, Transport};
