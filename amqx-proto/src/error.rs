//! Protocol error taxonomy.
//!
//! Faults are scoped: link faults detach the link, session faults end the
//! session, framing and decode faults close the connection. A remote
//! `redirect` condition is not a failure at all; it surfaces as
//! [`AmqpError::Redirect`] with the alternate endpoint pulled out of the
//! error info map.

use bytes::Bytes;
use thiserror::Error;

use amqx_codec::{CodecError, ErrorInfo, Value};

// ============================================================================
// Condition symbols
// ============================================================================

/// Wire-defined error conditions, plus passthrough for extension symbols.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCondition {
    InternalError,
    NotFound,
    UnauthorizedAccess,
    DecodeError,
    ResourceLimitExceeded,
    NotAllowed,
    InvalidField,
    NotImplemented,
    ResourceLocked,
    PreconditionFailed,
    ResourceDeleted,
    IllegalState,
    FrameSizeTooSmall,
    ConnectionForced,
    ConnectionFramingError,
    ConnectionRedirect,
    SessionWindowViolation,
    SessionErrantLink,
    SessionHandleInUse,
    SessionUnattachedHandle,
    LinkDetachForced,
    LinkTransferLimitExceeded,
    LinkMessageSizeExceeded,
    LinkRedirect,
    LinkStolen,
    Custom(Bytes),
}

const CONDITION_TABLE: &[(&[u8], ErrorCondition)] = &[
    (b"amqp:internal-error", ErrorCondition::InternalError),
    (b"amqp:not-found", ErrorCondition::NotFound),
    (b"amqp:unauthorized-access", ErrorCondition::UnauthorizedAccess),
    (b"amqp:decode-error", ErrorCondition::DecodeError),
    (b"amqp:resource-limit-exceeded", ErrorCondition::ResourceLimitExceeded),
    (b"amqp:not-allowed", ErrorCondition::NotAllowed),
    (b"amqp:invalid-field", ErrorCondition::InvalidField),
    (b"amqp:not-implemented", ErrorCondition::NotImplemented),
    (b"amqp:resource-locked", ErrorCondition::ResourceLocked),
    (b"amqp:precondition-failed", ErrorCondition::PreconditionFailed),
    (b"amqp:resource-deleted", ErrorCondition::ResourceDeleted),
    (b"amqp:illegal-state", ErrorCondition::IllegalState),
    (b"amqp:frame-size-too-small", ErrorCondition::FrameSizeTooSmall),
    (b"amqp:connection:forced", ErrorCondition::ConnectionForced),
    (b"amqp:connection:framing-error", ErrorCondition::ConnectionFramingError),
    (b"amqp:connection:redirect", ErrorCondition::ConnectionRedirect),
    (b"amqp:session:window-violation", ErrorCondition::SessionWindowViolation),
    (b"amqp:session:errant-link", ErrorCondition::SessionErrantLink),
    (b"amqp:session:handle-in-use", ErrorCondition::SessionHandleInUse),
    (b"amqp:session:unattached-handle", ErrorCondition::SessionUnattachedHandle),
    (b"amqp:link:detach-forced", ErrorCondition::LinkDetachForced),
    (b"amqp:link:transfer-limit-exceeded", ErrorCondition::LinkTransferLimitExceeded),
    (b"amqp:link:message-size-exceeded", ErrorCondition::LinkMessageSizeExceeded),
    (b"amqp:link:redirect", ErrorCondition::LinkRedirect),
    (b"amqp:link:stolen", ErrorCondition::LinkStolen),
];

impl ErrorCondition {
    pub fn from_symbol(symbol: &[u8]) -> ErrorCondition {
        CONDITION_TABLE
            .iter()
            .find(|(sym, _)| *sym == symbol)
            .map(|(_, cond)| cond.clone())
            .unwrap_or_else(|| ErrorCondition::Custom(Bytes::copy_from_slice(symbol)))
    }

    pub fn as_symbol(&self) -> Bytes {
        match self {
            ErrorCondition::Custom(sym) => sym.clone(),
            known => CONDITION_TABLE
                .iter()
                .find(|(_, cond)| cond == known)
                .map(|(sym, _)| Bytes::from_static(sym))
                .unwrap_or_else(|| Bytes::from_static(b"amqp:internal-error")),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(
            self,
            ErrorCondition::ConnectionRedirect | ErrorCondition::LinkRedirect
        )
    }
}

// ============================================================================
// Remote errors
// ============================================================================

/// An error received from the peer in DETACH, END or CLOSE.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    pub condition: ErrorCondition,
    pub description: Option<String>,
    pub info: Option<Vec<(Value, Value)>>,
}

impl RemoteError {
    pub fn from_info(info: &ErrorInfo) -> RemoteError {
        RemoteError {
            condition: ErrorCondition::from_symbol(&info.condition),
            description: info.description.clone(),
            info: info.info.clone(),
        }
    }

    pub fn to_info(&self) -> ErrorInfo {
        ErrorInfo {
            condition: self.condition.as_symbol(),
            description: self.description.clone(),
            info: self.info.clone(),
        }
    }

    fn info_get(&self, key: &[u8]) -> Option<&Value> {
        self.info.as_ref()?.iter().find_map(|(k, v)| match k {
            Value::Symbol(s) if s.as_ref() == key => Some(v),
            Value::String(s) if s.as_bytes() == key => Some(v),
            _ => None,
        })
    }

    /// Alternate endpoint carried by a redirect condition.
    pub fn redirect(&self) -> Option<RedirectInfo> {
        if !self.condition.is_redirect() {
            return None;
        }
        Some(RedirectInfo {
            hostname: self
                .info_get(b"hostname")
                .and_then(Value::as_str)
                .map(str::to_owned),
            network_host: self
                .info_get(b"network-host")
                .and_then(Value::as_str)
                .map(str::to_owned),
            port: self.info_get(b"port").and_then(Value::as_u32).map(|p| p as u16),
            address: self
                .info_get(b"address")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }
}

impl core::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.condition.as_symbol()))?;
        if let Some(desc) = &self.description {
            write!(f, ": {desc}")?;
        }
        Ok(())
    }
}

/// Where the peer says to go instead.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RedirectInfo {
    pub hostname: Option<String>,
    pub network_host: Option<String>,
    pub port: Option<u16>,
    pub address: Option<String>,
}

/// Authentication failure detail, from a SASL outcome or a CBS rejection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub status_code: Option<i32>,
    pub description: Option<String>,
}

impl core::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (&self.status_code, &self.description) {
            (Some(code), Some(desc)) => write!(f, "status {code}: {desc}"),
            (Some(code), None) => write!(f, "status {code}"),
            (None, Some(desc)) => write!(f, "{desc}"),
            (None, None) => write!(f, "authentication rejected"),
        }
    }
}

// ============================================================================
// The client error type
// ============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AmqpError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("connection error: {0}")]
    Connection(RemoteError),

    #[error("session error: {0}")]
    Session(RemoteError),

    #[error("link error: {0}")]
    Link(RemoteError),

    /// The peer closed with a redirect condition. Not a failure: carries
    /// the endpoint to reconnect to.
    #[error("redirected by peer")]
    Redirect(RedirectInfo),

    #[error("authentication failed: {0}")]
    Auth(AuthFailure),

    /// A management request completed with a non-2xx status.
    #[error("management request failed with status {status_code}")]
    Management {
        status_code: i32,
        description: Option<String>,
    },

    #[error("security token expired")]
    TokenExpired,

    #[error("operation timed out")]
    Timeout,

    #[error("link is detached")]
    Detached,

    /// The owning link, session or connection tore down before the
    /// operation completed; the message was not delivered.
    #[error("operation cancelled by teardown")]
    Cancelled,
}

impl AmqpError {
    /// Classify a peer error by its condition namespace, honoring the
    /// redirect special case.
    pub fn from_remote(remote: RemoteError) -> AmqpError {
        if let Some(redirect) = remote.redirect() {
            return AmqpError::Redirect(redirect);
        }
        match &remote.condition {
            ErrorCondition::ConnectionForced
            | ErrorCondition::ConnectionFramingError
            | ErrorCondition::ConnectionRedirect => AmqpError::Connection(remote),
            ErrorCondition::SessionWindowViolation
            | ErrorCondition::SessionErrantLink
            | ErrorCondition::SessionHandleInUse
            | ErrorCondition::SessionUnattachedHandle => AmqpError::Session(remote),
            ErrorCondition::LinkDetachForced
            | ErrorCondition::LinkTransferLimitExceeded
            | ErrorCondition::LinkMessageSizeExceeded
            | ErrorCondition::LinkRedirect
            | ErrorCondition::LinkStolen => AmqpError::Link(remote),
            _ => AmqpError::Connection(remote),
        }
    }
}

pub type Result<T> = core::result::Result<T, AmqpError>;
